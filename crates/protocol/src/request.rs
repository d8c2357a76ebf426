use serde::{Deserialize, Serialize};

/// A POST request against `<server>/<session>/`.
///
/// The server dispatches on which form fields are present, so each variant
/// maps to a fixed set of fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    /// The process/thread tree.
    Tree,
    /// Compressed symbol name → full symbol mappings.
    Callchain,
    /// perf symbol maps (JIT regions and the like).
    PerfMap,
    /// Flame graphs of one thread. `threshold` is a fraction (0.01 = 1 %).
    FlameGraphs {
        pid: String,
        tid: String,
        threshold: f64,
    },
    /// A session-wide analysis such as `roofline`.
    GeneralAnalysis { analysis: String },
    /// Plain-text contents of a source file.
    Source { file_index: String },
}

impl Request {
    /// Form fields to send, in order.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Tree => vec![("tree", "true".into())],
            Self::Callchain => vec![("callchain", "true".into())],
            Self::PerfMap => vec![("perf_map", "true".into())],
            Self::FlameGraphs {
                pid,
                tid,
                threshold,
            } => vec![
                ("pid", pid.clone()),
                ("tid", tid.clone()),
                ("threshold", threshold.to_string()),
            ],
            Self::GeneralAnalysis { analysis } => vec![("general_analysis", analysis.clone())],
            Self::Source { file_index } => vec![("src", file_index.clone())],
        }
    }

    /// URL of the session endpoint this request is posted to.
    pub fn url(server: &str, session: &str) -> String {
        format!("{}/{}/", server.trim_end_matches('/'), session)
    }
}
