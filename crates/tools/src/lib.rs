//! Developer tooling: region inspector, invariant checks, debug categories.
//!
//! # Invariants
//! - Tools only read regionizer state; they never trigger structural changes.
//! - The regionizer never consults the debug categories.

pub mod debug;
mod inspector;

pub use debug::{DebugCategory, UnknownCategory};
pub use inspector::{RegionInfo, RegionInspector, RegionizerSummary, Violation};

pub fn crate_info() -> &'static str {
    "tickspace-tools v0.1.0"
}
