use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tickspace_region::RegionizerConfig;
use tickspace_sched::SchedulerConfig;

/// Settings document accepted by `check-config` and `simulate --config`.
/// Both sections are optional; missing fields keep their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub regionizer: RegionizerConfig,
    pub scheduler: SchedulerConfig,
}

impl Settings {
    /// Load from `.yaml`/`.yml` or `.json`, chosen by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let settings = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => serde_yaml::from_str(&text)
                .with_context(|| format!("invalid YAML in {}", path.display()))?,
            Some("json") => serde_json::from_str(&text)
                .with_context(|| format!("invalid JSON in {}", path.display()))?,
            other => bail!(
                "unsupported config format {:?} for {} (expected .yaml, .yml or .json)",
                other.unwrap_or(""),
                path.display()
            ),
        };
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.regionizer
            .validate()
            .context("invalid regionizer settings")?;
        self.scheduler
            .validate()
            .context("invalid scheduler settings")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let file = write_temp(
            ".yaml",
            "regionizer:\n  merge_radius: 3\nscheduler:\n  worker_threads: 8\n",
        );
        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.regionizer.merge_radius, 3);
        assert_eq!(settings.regionizer.section_chunk_shift, 4);
        assert_eq!(settings.scheduler.worker_threads, 8);
        assert_eq!(settings.scheduler.tick_interval_ms, 50);
        settings.validate().unwrap();
    }

    #[test]
    fn json_document() {
        let file = write_temp(".json", r#"{"regionizer": {"section_chunk_shift": 5}}"#);
        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.regionizer.section_chunk_shift, 5);
        assert_eq!(settings.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn out_of_range_values_fail_validation() {
        let file = write_temp(".yml", "regionizer:\n  section_chunk_shift: 11\n");
        let settings = Settings::load(file.path()).unwrap();
        let err = settings.validate().unwrap_err();
        assert!(format!("{err:#}").contains("regionizer"));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let file = write_temp(".toml", "merge_radius = 1\n");
        let err = Settings::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }

    #[test]
    fn malformed_document_is_an_error() {
        let file = write_temp(".json", "{ not json");
        assert!(Settings::load(file.path()).is_err());
    }
}
