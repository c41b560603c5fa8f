use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// Opt-in diagnostic output, toggled at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugCategory {
    /// Region creation, merges, splits and retirement.
    Lifecycle,
    /// Per-region tick timing and task execution.
    Scheduler,
    /// Section ownership dumps after structural changes.
    Structure,
}

impl DebugCategory {
    pub const ALL: [DebugCategory; 3] = [Self::Lifecycle, Self::Scheduler, Self::Structure];

    pub fn name(self) -> &'static str {
        match self {
            Self::Lifecycle => "lifecycle",
            Self::Scheduler => "scheduler",
            Self::Structure => "structure",
        }
    }
}

impl std::fmt::Display for DebugCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown debug category `{0}` (expected lifecycle, scheduler or structure)")]
pub struct UnknownCategory(pub String);

impl FromStr for DebugCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

static ENABLED: Mutex<BTreeSet<DebugCategory>> = Mutex::new(BTreeSet::new());

fn enabled_set() -> MutexGuard<'static, BTreeSet<DebugCategory>> {
    ENABLED.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn is_enabled(category: DebugCategory) -> bool {
    enabled_set().contains(&category)
}

pub fn enable(category: DebugCategory) {
    enabled_set().insert(category);
    tracing::info!(%category, "debug category enabled");
}

pub fn disable(category: DebugCategory) {
    enabled_set().remove(&category);
    tracing::info!(%category, "debug category disabled");
}

/// Flip `category`, returning whether it is now enabled.
pub fn toggle(category: DebugCategory) -> bool {
    let on = {
        let mut set = enabled_set();
        if !set.remove(&category) {
            set.insert(category);
            true
        } else {
            false
        }
    };
    tracing::info!(%category, on, "debug category toggled");
    on
}

pub fn set_all(on: bool) {
    let mut set = enabled_set();
    if on {
        set.extend(DebugCategory::ALL);
    } else {
        set.clear();
    }
}

/// Replace the enabled set with exactly `categories`.
pub fn set_enabled(categories: impl IntoIterator<Item = DebugCategory>) {
    let mut set = enabled_set();
    set.clear();
    set.extend(categories);
}

pub fn enabled() -> Vec<DebugCategory> {
    enabled_set().iter().copied().collect()
}

/// Parse a comma separated list such as `lifecycle,scheduler`. `all` selects
/// every category.
pub fn parse_list(list: &str) -> Result<Vec<DebugCategory>, UnknownCategory> {
    if list.trim().eq_ignore_ascii_case("all") {
        return Ok(DebugCategory::ALL.to_vec());
    }
    list.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect()
}
