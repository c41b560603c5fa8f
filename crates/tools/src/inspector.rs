use serde::Serialize;
use tickspace_common::{ChunkPos, SectionPos};
use tickspace_region::{Region, RegionState, Regionizer};

/// Region inspector for developer tooling.
///
/// Read-only queries against a regionizer for debugging, the CLI and tests.
/// Every query works on a snapshot; concurrent structural changes may make
/// the result stale but never inconsistent with a single region.
pub struct RegionInspector;

impl RegionInspector {
    /// Aggregate counters over every live region.
    pub fn summary<D>(regionizer: &Regionizer<D>) -> RegionizerSummary {
        let mut summary = RegionizerSummary {
            pending_merges: regionizer.pending_merge_count(),
            ..RegionizerSummary::default()
        };
        for region in regionizer.snapshot_regions() {
            summary.regions += 1;
            summary.sections += region.section_count();
            summary.live_sections += region.live_section_count();
            summary.dead_sections += region.dead_section_count();
            summary.chunks += region.chunk_count();
            summary.queued_tasks += region.task_queue().len();
            match region.state() {
                RegionState::Ticking => summary.ticking += 1,
                RegionState::Transient => summary.transient += 1,
                _ => {}
            }
        }
        summary
    }

    pub fn describe<D>(region: &Region<D>) -> RegionInfo {
        RegionInfo {
            id: region.id(),
            state: region.state(),
            sections: region.section_count(),
            live_sections: region.live_section_count(),
            dead_sections: region.dead_section_count(),
            chunks: region.chunk_count(),
            queued_tasks: region.task_queue().len(),
            center: region.center_chunk(),
        }
    }

    /// One [`RegionInfo`] per live region, ordered by id.
    pub fn list<D>(regionizer: &Regionizer<D>) -> Vec<RegionInfo> {
        regionizer
            .snapshot_regions()
            .iter()
            .map(|region| Self::describe(region.as_ref()))
            .collect()
    }

    /// Check the ownership invariants. Live sections of different regions
    /// within the merge radius are only reported when no deferred merge
    /// between the two regions is pending.
    pub fn find_violations<D>(regionizer: &Regionizer<D>) -> Vec<Violation> {
        let radius = regionizer.config().merge_radius.max(0) as u32;
        let regions = regionizer.snapshot_regions();
        let mut violations = Vec::new();

        for region in &regions {
            if region.section_count() == 0 {
                violations.push(Violation::NoSections { region: region.id() });
            }
            for section in region.section_positions() {
                let owner = regionizer.region_for_section(section).map(|r| r.id());
                if owner != Some(region.id()) {
                    violations.push(Violation::Unmapped {
                        region: region.id(),
                        section,
                        owner,
                    });
                }
            }
        }

        let live: Vec<(u64, Vec<SectionPos>)> = regions
            .iter()
            .map(|r| {
                let mut sections: Vec<SectionPos> = r.live_section_positions().into_iter().collect();
                sections.sort();
                (r.id(), sections)
            })
            .collect();
        for (i, (first, first_live)) in live.iter().enumerate() {
            let pending = regionizer.pending_merge_partners(*first);
            for (second, second_live) in &live[i + 1..] {
                if pending.contains(second) {
                    continue;
                }
                let close = first_live.iter().find_map(|a| {
                    second_live
                        .iter()
                        .find(|b| a.chebyshev_distance(**b) <= radius)
                        .map(|b| (*a, *b))
                });
                if let Some((a, b)) = close {
                    violations.push(Violation::TooClose {
                        first: *first,
                        second: *second,
                        first_section: a,
                        second_section: b,
                        distance: a.chebyshev_distance(b),
                    });
                }
            }
        }

        if !violations.is_empty() {
            tracing::warn!(count = violations.len(), "region invariant violations");
        }
        violations
    }
}

/// Summary of regionizer state for the inspector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegionizerSummary {
    pub regions: usize,
    pub sections: usize,
    pub live_sections: usize,
    pub dead_sections: usize,
    pub chunks: usize,
    pub queued_tasks: usize,
    pub ticking: usize,
    pub transient: usize,
    pub pending_merges: usize,
}

impl std::fmt::Display for RegionizerSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Regionizer: regions={} sections={} (live={} dead={}) chunks={} tasks={} ticking={} transient={} pending_merges={}",
            self.regions,
            self.sections,
            self.live_sections,
            self.dead_sections,
            self.chunks,
            self.queued_tasks,
            self.ticking,
            self.transient,
            self.pending_merges
        )
    }
}

/// Detailed info about a single region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionInfo {
    pub id: u64,
    pub state: RegionState,
    pub sections: usize,
    pub live_sections: usize,
    pub dead_sections: usize,
    pub chunks: usize,
    pub queued_tasks: usize,
    pub center: Option<ChunkPos>,
}

impl std::fmt::Display for RegionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Region #{} [{}] sections={} live={} dead={} chunks={} tasks={}",
            self.id,
            self.state,
            self.sections,
            self.live_sections,
            self.dead_sections,
            self.chunks,
            self.queued_tasks
        )?;
        if let Some(center) = self.center {
            write!(f, " center={center}")?;
        }
        Ok(())
    }
}

/// A broken ownership invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// A live region without sections.
    NoSections { region: u64 },
    /// A section a region claims but the section map attributes elsewhere.
    Unmapped {
        region: u64,
        section: SectionPos,
        owner: Option<u64>,
    },
    /// Live sections of two regions within the merge radius, with no pending
    /// merge between them.
    TooClose {
        first: u64,
        second: u64,
        first_section: SectionPos,
        second_section: SectionPos,
        distance: u32,
    },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSections { region } => write!(f, "region {region} owns no sections"),
            Self::Unmapped {
                region,
                section,
                owner,
            } => match owner {
                Some(owner) => write!(f, "section {section} of region {region} maps to region {owner}"),
                None => write!(f, "section {section} of region {region} is unmapped"),
            },
            Self::TooClose {
                first,
                second,
                first_section,
                second_section,
                distance,
            } => write!(
                f,
                "regions {first} and {second} have live sections {first_section} and {second_section} at distance {distance}"
            ),
        }
    }
}
