//! Flattening of the process/thread tree into timeline rows.
//!
//! The timeline shows one row (group) per process/thread, nested like the
//! tree, with a lifetime band and the off-CPU intervals as items on the row.

use std::collections::{BTreeMap, HashMap};

use profview_protocol::{
    CallchainFrame, MetricInfo, Point, ProfileNode, Rect, RenderCommand, SourceMap, TextAlign,
    ThemeToken, Viewport,
};
use serde::{Deserialize, Serialize};

use crate::config::ViewerConfig;

/// Horizontal indentation per tree level, in pixels.
pub const INDENT_PX: f64 = 25.0;
const ROW_HEIGHT: f64 = 20.0;
const LABEL_WIDTH: f64 = 240.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStyle {
    /// The whole lifetime of a process/thread.
    Lifetime,
    /// A period spent off the CPU.
    OffCpu,
}

impl ItemStyle {
    pub fn theme(self) -> ThemeToken {
        match self {
            Self::Lifetime => ThemeToken::LifetimeBand,
            Self::OffCpu => ThemeToken::OffCpuBand,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineItem {
    pub id: String,
    pub group: String,
    pub start: f64,
    pub end: f64,
    pub style: ItemStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineGroup {
    pub id: String,
    /// `<name> (<pid/tid>)`.
    pub content: String,
    pub level: u32,
    /// Direct children, in tree order. `None` for leaves.
    pub nested_groups: Option<Vec<String>>,
}

impl TimelineGroup {
    pub fn indent_px(&self) -> f64 {
        f64::from(self.level) * INDENT_PX
    }
}

/// Runtime vs sampled time of a node, pre-formatted for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tooltip {
    pub runtime_ms: f64,
    pub sampled_ms: f64,
}

impl Tooltip {
    /// `Runtime: X unit (sampled: ~Y unit)`, in seconds when either value
    /// reaches 1000 ms unless `always_ms` is set.
    pub fn render(&self, always_ms: bool) -> String {
        let runtime = round3(self.runtime_ms);
        let sampled = round3(self.sampled_ms);
        let (runtime, sampled, unit) = if !always_ms && (runtime >= 1000.0 || sampled >= 1000.0) {
            (round3(runtime / 1000.0), round3(sampled / 1000.0), "s")
        } else {
            (runtime, sampled, "ms")
        };
        format!(
            "Runtime: {} {unit} (sampled: ~{} {unit})",
            format_number(runtime),
            format_number(sampled)
        )
    }
}

/// Relative error of the sampled runtime and whether it crossed the
/// threshold in effect at flattening time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuntimeWarning {
    pub flagged: bool,
    pub sampled_diff: f64,
}

impl RuntimeWarning {
    pub fn exceeds(sampled_diff: f64, threshold_pct: f64) -> bool {
        sampled_diff > threshold_pct / 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlattenOptions {
    /// Sampled-time error above which a node is flagged, in percent.
    pub warning_threshold_pct: f64,
    /// Off-CPU sampling stride in ms; 0 keeps every interval.
    pub offcpu_stride: f64,
}

impl From<&ViewerConfig> for FlattenOptions {
    fn from(config: &ViewerConfig) -> Self {
        Self {
            warning_threshold_pct: config.runtime_diff_threshold_pct,
            offcpu_stride: config.offcpu_sampling_ms,
        }
    }
}

/// Everything the timeline and the thread menus need, keyed by node id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlattenedTree {
    pub items: Vec<TimelineItem>,
    pub groups: Vec<TimelineGroup>,
    pub labels: HashMap<String, String>,
    pub tooltips: HashMap<String, Tooltip>,
    pub metrics: HashMap<String, BTreeMap<String, MetricInfo>>,
    /// Start callchains. The root has none.
    pub callchains: HashMap<String, Vec<CallchainFrame>>,
    pub warnings: HashMap<String, RuntimeWarning>,
    pub general_metrics: BTreeMap<String, MetricInfo>,
    pub src: SourceMap,
    pub src_index: BTreeMap<String, String>,
    pub overall_end_time: f64,
}

impl FlattenedTree {
    pub fn group(&self, id: &str) -> Option<&TimelineGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn sampled_diff(&self, id: &str) -> Option<f64> {
        self.warnings.get(id).map(|w| w.sampled_diff)
    }

    /// Re-evaluate a node's warning against a threshold chosen later.
    pub fn is_flagged(&self, id: &str, threshold_pct: f64) -> bool {
        self.sampled_diff(id)
            .is_some_and(|d| RuntimeWarning::exceeds(d, threshold_pct))
    }

    /// Visible time range of the timeline.
    pub fn time_range(&self) -> (f64, f64) {
        (0.0, 2.0 * self.overall_end_time)
    }

    /// Lay the timeline out: one row per group, label column on the left.
    /// Labels of groups over `warning_threshold_pct` are drawn as warnings.
    pub fn render(
        &self,
        viewport: &Viewport,
        start: f64,
        end: f64,
        warning_threshold_pct: f64,
    ) -> Vec<RenderCommand> {
        let span = end - start;
        if span <= 0.0 || self.groups.is_empty() {
            return Vec::new();
        }
        let band_width = (viewport.width - LABEL_WIDTH).max(1.0);
        let x_scale = band_width / span;

        let row_of: HashMap<&str, usize> = self
            .groups
            .iter()
            .enumerate()
            .map(|(i, g)| (g.id.as_str(), i))
            .collect();

        let mut commands = Vec::with_capacity(self.items.len() + self.groups.len() + 2);
        commands.push(RenderCommand::BeginGroup {
            id: "timeline".into(),
            label: Some("Timeline".into()),
        });

        for (row, group) in self.groups.iter().enumerate() {
            let y = row as f64 * ROW_HEIGHT;
            if !viewport.shows_rows(y, ROW_HEIGHT) {
                continue;
            }
            let color = if self.is_flagged(&group.id, warning_threshold_pct) {
                ThemeToken::WarningText
            } else {
                ThemeToken::GroupLabel
            };
            commands.push(RenderCommand::DrawText {
                position: Point::new(group.indent_px() + 4.0, y + ROW_HEIGHT * 0.7),
                text: group.content.as_str().into(),
                color,
                font_size: 11.0,
                align: TextAlign::Left,
            });
        }

        for (index, item) in self.items.iter().enumerate() {
            let Some(&row) = row_of.get(item.group.as_str()) else {
                continue;
            };
            let y = row as f64 * ROW_HEIGHT;
            if !viewport.shows_rows(y, ROW_HEIGHT) || item.end < start || item.start > end {
                continue;
            }
            let x0 = LABEL_WIDTH + (item.start.max(start) - start) * x_scale;
            let x1 = LABEL_WIDTH + (item.end.min(end) - start) * x_scale;
            commands.push(RenderCommand::DrawRect {
                rect: Rect::new(x0, y + 1.0, (x1 - x0).max(1.0), ROW_HEIGHT - 2.0),
                color: item.style.theme(),
                border_color: None,
                label: None,
                frame_id: Some(index as u64),
            });
        }

        commands.push(RenderCommand::EndGroup);
        commands
    }
}

/// Whether an off-CPU interval survives sampling with the given stride.
///
/// Only intervals touching or crossing a stride boundary are kept; this thins
/// the display without touching the underlying data.
pub fn keep_off_cpu(start: f64, end: f64, stride: f64) -> bool {
    if stride == 0.0 {
        return true;
    }
    start % stride == 0.0
        || end % stride == 0.0
        || (start / stride).floor() != (end / stride).floor()
}

/// Flatten a process/thread tree, depth first, children in input order.
pub fn flatten(root: &ProfileNode, options: FlattenOptions) -> FlattenedTree {
    let mut out = FlattenedTree::default();
    out.groups.reserve(root.subtree_len());
    visit(root, 0, options, &mut out);
    out
}

fn visit(node: &ProfileNode, level: u32, options: FlattenOptions, out: &mut FlattenedTree) {
    out.items.push(TimelineItem {
        id: node.id.clone(),
        group: node.id.clone(),
        start: node.start_time,
        end: node.end_time(),
        style: ItemStyle::Lifetime,
    });
    out.overall_end_time = out.overall_end_time.max(node.end_time());

    let sampled_diff = if node.runtime > 0.0 {
        (node.runtime - node.sampled_time).abs() / node.runtime
    } else {
        0.0
    };
    out.warnings.insert(
        node.id.clone(),
        RuntimeWarning {
            flagged: RuntimeWarning::exceeds(sampled_diff, options.warning_threshold_pct),
            sampled_diff,
        },
    );

    let label = format!("{} ({})", node.name, node.pid_tid);
    let nested: Vec<String> = node.children.iter().map(|c| c.id.clone()).collect();
    out.groups.push(TimelineGroup {
        id: node.id.clone(),
        content: label.clone(),
        level,
        nested_groups: (!nested.is_empty()).then_some(nested),
    });
    out.labels.insert(node.id.clone(), label);
    out.tooltips.insert(
        node.id.clone(),
        Tooltip {
            runtime_ms: node.runtime,
            sampled_ms: node.sampled_time,
        },
    );
    out.metrics.insert(node.id.clone(), node.metrics.clone());

    if let Some(general) = &node.general_metrics
        && out.general_metrics.is_empty()
    {
        out.general_metrics.extend(general.clone());
    }
    if let Some(src) = &node.src
        && out.src.is_empty()
    {
        out.src = src.clone();
    }
    if let Some(index) = &node.src_index
        && out.src_index.is_empty()
    {
        out.src_index
            .extend(index.iter().map(|(path, idx)| (path.clone(), idx.0.clone())));
    }

    if level > 0 {
        out.callchains
            .insert(node.id.clone(), node.start_callchain.clone());
    }

    for (i, interval) in node.off_cpu.iter().enumerate() {
        if keep_off_cpu(interval.start(), interval.end(), options.offcpu_stride) {
            out.items.push(TimelineItem {
                id: format!("{}_offcpu{i}", node.id),
                group: node.id.clone(),
                start: interval.start(),
                end: interval.end(),
                style: ItemStyle::OffCpu,
            });
        }
    }

    for child in &node.children {
        visit(child, level + 1, options, out);
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// en-US style: thousands separators, at most three decimals, no trailing zeros.
pub fn format_number(v: f64) -> String {
    let fixed = format!("{:.3}", v.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
    let frac = frac_part.trim_end_matches('0');

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if v < 0.0 && (grouped != "0" || !frac.is_empty()) {
        "-"
    } else {
        ""
    };
    if frac.is_empty() {
        format!("{sign}{grouped}")
    } else {
        format!("{sign}{grouped}.{frac}")
    }
}
