//! Runtime configuration (§6 "Configuration options"): worker pool size,
//! retry budget, per-attempt timeout, and export defaults. `mtj_cli` loads
//! this from an optional TOML file with environment overrides.

use mtj_store::model::ExportSettings;

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub worker_concurrency: usize,
    /// Accepted for interface completeness but not currently threaded into
    /// `mtj_segment`, which still segments against its own hardcoded
    /// constant. See DESIGN.md.
    pub batch_char_limit: usize,
    pub translate_timeout_ms: u64,
    pub max_retries: i64,
    pub export_settings: ExportSettings,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            worker_concurrency: 5,
            batch_char_limit: 6000,
            translate_timeout_ms: 600_000,
            max_retries: 3,
            export_settings: ExportSettings::default(),
        }
    }
}
