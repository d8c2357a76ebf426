//! JSON payloads served by the profiling results server.
//!
//! Every response the viewer consumes is decoded into one of these types at
//! the fetch boundary, so the rest of the viewer never inspects raw JSON:
//!
//! ```text
//!   tree=true            ─▶ ProfileNode
//!   callchain=true       ─▶ CallchainMappings
//!   perf_map=true        ─▶ BTreeMap<map name, Vec<AddressRange>>
//!   pid/tid/threshold    ─▶ FlameGraphSet
//!   general_analysis=…   ─▶ RooflinePayload
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// One process or thread in the session's process/thread tree.
///
/// Times are in milliseconds relative to the start of the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileNode {
    /// `<pid>_<tid>`, unique within a session.
    pub id: String,
    pub name: String,
    /// `<pid>/<tid>` as displayed to the user.
    pub pid_tid: String,
    pub start_time: f64,
    /// Exactly measured runtime. Negative when the server could not measure it.
    pub runtime: f64,
    /// Runtime estimated from sampling.
    pub sampled_time: f64,
    #[serde(default)]
    pub children: Vec<ProfileNode>,
    #[serde(default)]
    pub off_cpu: Vec<OffCpuInterval>,
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricInfo>,
    /// Callchain that spawned this process/thread, outermost frame first.
    #[serde(default)]
    pub start_callchain: Vec<CallchainFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub general_metrics: Option<BTreeMap<String, MetricInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<SourceMap>,
    /// Source file path → index to request it with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_index: Option<BTreeMap<String, FileIndex>>,
}

impl ProfileNode {
    /// End of the node's lifetime.
    pub fn end_time(&self) -> f64 {
        self.start_time + self.runtime
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(ProfileNode::subtree_len).sum::<usize>()
    }
}

/// `[start, duration]` of a period the thread spent off the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OffCpuInterval(pub f64, pub f64);

impl OffCpuInterval {
    pub fn start(&self) -> f64 {
        self.0
    }

    pub fn duration(&self) -> f64 {
        self.1
    }

    pub fn end(&self) -> f64 {
        self.0 + self.1
    }
}

/// An analysis offered for a node (or, in `general_metrics`, for the session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawMetric")]
pub struct MetricInfo {
    pub title: String,
    /// Whether the metric is shown through the flame graph window.
    pub flame_graph: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMetric {
    Full {
        title: String,
        #[serde(default)]
        flame_graph: bool,
    },
    Title(String),
}

impl From<RawMetric> for MetricInfo {
    fn from(raw: RawMetric) -> Self {
        match raw {
            RawMetric::Full { title, flame_graph } => Self { title, flame_graph },
            RawMetric::Title(title) => Self {
                title,
                flame_graph: false,
            },
        }
    }
}

/// `[raw name, offset]` entry of a start callchain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallchainFrame(
    pub String,
    #[serde(deserialize_with = "scalar_as_string")] pub String,
);

impl CallchainFrame {
    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn offset(&self) -> &str {
        &self.1
    }
}

/// Index of a source file on the server, sent back in `src=<index>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIndex(#[serde(deserialize_with = "scalar_as_string")] pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u64,
}

/// Category → map name → offset → source location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceMap(pub BTreeMap<String, BTreeMap<String, BTreeMap<String, SourceLocation>>>);

impl SourceMap {
    pub fn lookup(&self, category: &str, map_name: &str, offset: &str) -> Option<&SourceLocation> {
        self.0.get(category)?.get(map_name)?.get(offset)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// `[symbol or bracketed address, map name]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRef(pub String, pub String);

impl SymbolRef {
    pub fn token(&self) -> &str {
        &self.0
    }

    pub fn map_name(&self) -> &str {
        &self.1
    }
}

/// Compressed symbol names → full symbol references, partitioned by category
/// (`syscall` for start callchains, one entry per flame-graph metric).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallchainMappings(pub BTreeMap<String, BTreeMap<String, SymbolRef>>);

impl CallchainMappings {
    pub const SYSCALL: &'static str = "syscall";

    pub fn lookup(&self, category: &str, raw_name: &str) -> Option<&SymbolRef> {
        self.0.get(category)?.get(raw_name)
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.0.contains_key(category)
    }
}

/// `[start_hex, end_hex, symbol]` of one mapped region, bounds inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRange(pub String, pub String, pub String);

/// One node of a flame graph in d3-flame-graph shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlameNode {
    pub name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FlameNode>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub cold: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed_id: Option<u64>,
    /// Present only on `(compressed)` placeholders: the nodes they stand for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden_children: Option<Vec<FlameNode>>,
}

impl FlameNode {
    pub const COMPRESSED_NAME: &'static str = "(compressed)";

    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            children: Vec::new(),
            cold: false,
            compressed_id: None,
            hidden_children: None,
        }
    }

    pub fn with_children(mut self, children: Vec<FlameNode>) -> Self {
        self.children = children;
        self
    }

    /// A placeholder standing for `hidden`, valued at their sum.
    pub fn compressed(compressed_id: u64, hidden: Vec<FlameNode>) -> Self {
        let value = hidden.iter().map(|n| n.value).sum();
        Self {
            name: Self::COMPRESSED_NAME.to_string(),
            value,
            children: Vec::new(),
            cold: false,
            compressed_id: Some(compressed_id),
            hidden_children: Some(hidden),
        }
    }

    pub fn is_compressed_placeholder(&self) -> bool {
        self.name == Self::COMPRESSED_NAME
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// `[sorted tree, time-ordered tree]` of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlameGraphPair(pub FlameNode, pub FlameNode);

impl FlameGraphPair {
    pub fn variant(&self, time_ordered: bool) -> &FlameNode {
        if time_ordered { &self.1 } else { &self.0 }
    }
}

/// Flame graphs of one process/thread, keyed by metric name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlameGraphSet(pub BTreeMap<String, FlameGraphPair>);

impl FlameGraphSet {
    pub const WALLTIME: &'static str = "walltime";

    pub fn metric(&self, metric: &str) -> Option<&FlameGraphPair> {
        self.0.get(metric)
    }

    pub fn metrics(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bandwidth {
    pub gbps: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Throughput {
    pub gflops: f64,
}

/// One hardware/ISA variant of a cache-aware roofline model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RooflineModel {
    pub isa: String,
    #[serde(deserialize_with = "scalar_as_string")]
    pub precision: String,
    #[serde(deserialize_with = "scalar_as_string")]
    pub threads: String,
    #[serde(deserialize_with = "scalar_as_string")]
    pub loads: String,
    #[serde(deserialize_with = "scalar_as_string")]
    pub stores: String,
    #[serde(deserialize_with = "scalar_as_string")]
    pub interleaved: String,
    #[serde(deserialize_with = "scalar_as_string")]
    pub dram_bytes: String,
    pub l1: Bandwidth,
    pub l2: Bandwidth,
    pub l3: Bandwidth,
    pub dram: Bandwidth,
    /// Peak without fused multiply-add.
    pub fp: Throughput,
    pub fp_fma: Throughput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RooflinePayload {
    /// Bytes moved through each cache level during benchmarking.
    #[serde(deserialize_with = "scalar_as_string")]
    pub l1: String,
    #[serde(deserialize_with = "scalar_as_string")]
    pub l2: String,
    #[serde(deserialize_with = "scalar_as_string")]
    pub l3: String,
    pub models: Vec<RooflineModel>,
}

/// Accept a JSON string, number or boolean and keep its display form.
fn scalar_as_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Str(String),
        Int(i64),
        Float(f64),
        Bool(bool),
    }

    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Str(s) => s,
        Scalar::Int(n) => n.to_string(),
        Scalar::Float(f) => f.to_string(),
        Scalar::Bool(b) => b.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE: &str = r#"{
        "id": "100_100", "name": "app", "pid_tid": "100/100",
        "start_time": 0.0, "runtime": 100.0, "sampled_time": 95.0,
        "off_cpu": [[10.0, 5.0]],
        "metrics": {
            "walltime": {"title": "Wall time", "flame_graph": true},
            "extra_cache": "Cache misses"
        },
        "start_callchain": [["f1", 16], ["f2", "0x20"]],
        "src_index": {"main.c": 0},
        "children": [{
            "id": "100_101", "name": "worker", "pid_tid": "100/101",
            "start_time": 5.0, "runtime": 20.0, "sampled_time": 20.0,
            "off_cpu": [], "metrics": {}, "start_callchain": [], "children": []
        }]
    }"#;

    #[test]
    fn decodes_profile_node() {
        let node: ProfileNode = serde_json::from_str(NODE).expect("node");
        assert_eq!(node.subtree_len(), 2);
        assert!((node.off_cpu[0].end() - 15.0).abs() < f64::EPSILON);
        assert_eq!(node.start_callchain[0].offset(), "16");
        assert_eq!(node.start_callchain[1].offset(), "0x20");
        assert!(node.metrics["walltime"].flame_graph);
        assert_eq!(node.metrics["extra_cache"].title, "Cache misses");
        assert!(!node.metrics["extra_cache"].flame_graph);
        let index = node.src_index.expect("src_index");
        assert_eq!(index["main.c"].0, "0");
        assert!(node.general_metrics.is_none());
    }

    #[test]
    fn compressed_node_shape() {
        let json = r#"{
            "name": "(compressed)", "value": 7, "compressed_id": 3,
            "hidden_children": [{"name": "a", "value": 3}, {"name": "b", "value": 4}]
        }"#;
        let node: FlameNode = serde_json::from_str(json).expect("node");
        assert!(node.is_compressed_placeholder());
        assert_eq!(node.hidden_children.as_ref().map(Vec::len), Some(2));
        assert!(node.children.is_empty());
    }

    #[test]
    fn flame_graph_pair_variants() {
        let json = r#"{"walltime": [{"name": "all", "value": 10}, {"name": "all", "value": 11}]}"#;
        let set: FlameGraphSet = serde_json::from_str(json).expect("set");
        let pair = set.metric(FlameGraphSet::WALLTIME).expect("walltime");
        assert!((pair.variant(false).value - 10.0).abs() < f64::EPSILON);
        assert!((pair.variant(true).value - 11.0).abs() < f64::EPSILON);
        assert!(set.metric("cycles").is_none());
    }

    #[test]
    fn callchain_lookup_by_category() {
        let json = r#"{"syscall": {"f1": ["[0x1000]", "perf-1.map"]}}"#;
        let map: CallchainMappings = serde_json::from_str(json).expect("map");
        assert!(map.has_category(CallchainMappings::SYSCALL));
        let sym = map.lookup("syscall", "f1").expect("f1");
        assert_eq!(sym.token(), "[0x1000]");
        assert_eq!(sym.map_name(), "perf-1.map");
        assert!(map.lookup("walltime", "f1").is_none());
    }

    #[test]
    fn roofline_details_accept_scalars() {
        let json = r#"{
            "l1": 1024, "l2": "2048", "l3": 4096,
            "models": [{
                "isa": "avx2", "precision": "double", "threads": 8,
                "loads": 2, "stores": 1, "interleaved": false, "dram_bytes": 1e9,
                "l1": {"gbps": 400.0}, "l2": {"gbps": 200.0},
                "l3": {"gbps": 100.0}, "dram": {"gbps": 20.0},
                "fp": {"gflops": 50.0}, "fp_fma": {"gflops": 100.0}
            }]
        }"#;
        let payload: RooflinePayload = serde_json::from_str(json).expect("roofline");
        assert_eq!(payload.l2, "2048");
        let model = &payload.models[0];
        assert_eq!(model.threads, "8");
        assert_eq!(model.interleaved, "false");
        assert!((model.fp_fma.gflops - 100.0).abs() < f64::EPSILON);
    }
}
