//! `profview.toml` config loading.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// What happens to an in-flight session load when another session is picked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReselectPolicy {
    /// The newest selection wins; replies for older loads are dropped.
    #[default]
    CancelSuperseded,
    /// Every load runs to completion and makes its session current when done.
    LastWriteWins,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ViewerConfig {
    /// Base URL of the profiling results server.
    #[serde(default = "default_server")]
    pub server: String,

    /// Flame graph block threshold, in percent of the total.
    #[serde(default = "default_flame_graph_threshold")]
    pub flame_graph_threshold_pct: f64,

    /// Sampled vs measured runtime difference that triggers a warning, in percent.
    #[serde(default = "default_runtime_diff_threshold")]
    pub runtime_diff_threshold_pct: f64,

    /// Off-CPU display sampling stride in ms. 0 shows every interval.
    #[serde(default)]
    pub offcpu_sampling_ms: f64,

    #[serde(default)]
    pub reselect_policy: ReselectPolicy,
}

fn default_server() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_flame_graph_threshold() -> f64 {
    1.0
}

fn default_runtime_diff_threshold() -> f64 {
    10.0
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            flame_graph_threshold_pct: default_flame_graph_threshold(),
            runtime_diff_threshold_pct: default_runtime_diff_threshold(),
            offcpu_sampling_ms: 0.0,
            reselect_policy: ReselectPolicy::default(),
        }
    }
}

impl ViewerConfig {
    /// Read a config file, falling back to defaults when it is missing or
    /// cannot be parsed.
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match Self::from_toml_str(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Threshold as sent to the server, a fraction of the total.
    pub fn flame_graph_threshold_fraction(&self) -> f64 {
        self.flame_graph_threshold_pct / 100.0
    }
}

/// Parse a percentage typed by the user: unparsable input is 0, anything
/// else is clamped to `0..=100`.
pub fn parse_percentage(input: &str) -> f64 {
    sanitize_percentage(input.trim().parse().unwrap_or(0.0))
}

pub fn sanitize_percentage(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = ViewerConfig::from_toml_str("").expect("parse");
        assert_eq!(cfg, ViewerConfig::default());
        assert_eq!(cfg.server, "http://127.0.0.1:8000");
        assert_eq!(cfg.reselect_policy, ReselectPolicy::CancelSuperseded);
    }

    #[test]
    fn partial_file_overrides() {
        let cfg = ViewerConfig::from_toml_str(
            r#"
            server = "http://perf.example:9000"
            offcpu_sampling_ms = 5.0
            reselect_policy = "last_write_wins"
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.server, "http://perf.example:9000");
        assert!((cfg.offcpu_sampling_ms - 5.0).abs() < f64::EPSILON);
        assert!((cfg.runtime_diff_threshold_pct - 10.0).abs() < f64::EPSILON);
        assert_eq!(cfg.reselect_policy, ReselectPolicy::LastWriteWins);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = ViewerConfig::load_optional(Path::new("/nonexistent/profview.toml"));
        assert_eq!(cfg, ViewerConfig::default());
    }

    #[test]
    fn threshold_fraction() {
        let cfg = ViewerConfig {
            flame_graph_threshold_pct: 2.5,
            ..ViewerConfig::default()
        };
        assert!((cfg.flame_graph_threshold_fraction() - 0.025).abs() < 1e-12);
    }

    #[test]
    fn percentages_are_clamped() {
        assert!((parse_percentage(" 2.5 ") - 2.5).abs() < f64::EPSILON);
        assert!(parse_percentage("abc").abs() < f64::EPSILON);
        assert!(parse_percentage("").abs() < f64::EPSILON);
        assert!((parse_percentage("250") - 100.0).abs() < f64::EPSILON);
        assert!(sanitize_percentage(-3.0).abs() < f64::EPSILON);
        assert!(sanitize_percentage(f64::NAN).abs() < f64::EPSILON);
    }
}
