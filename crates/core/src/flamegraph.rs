//! Interactive flame graph of one process/thread.
//!
//! The panel keeps the server's result set untouched and works on a private
//! copy of the selected metric/variant, so expanding compressed blocks never
//! leaks into other windows showing the same cached result.

use std::sync::Arc;

use profview_protocol::{FlameGraphSet, FlameNode, Rect, RenderCommand, ThemeToken, Viewport};
use serde::{Deserialize, Serialize};

use crate::session::SessionState;

pub const FRAME_HEIGHT: f64 = 18.0;

/// Turns raw frame names into what the user sees.
pub trait NameSource {
    fn display_name(&mut self, category: &str, raw: &str) -> String;
}

impl NameSource for SessionState {
    fn display_name(&mut self, category: &str, raw: &str) -> String {
        SessionState::display_name(self, category, raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchSummary {
    /// Number of matching blocks.
    pub matches: usize,
    /// Value covered by the matches; nested matches count once.
    pub matched_value: f64,
    /// Value of the root.
    pub total: f64,
}

impl SearchSummary {
    pub fn percentage(&self) -> f64 {
        if self.total > 0.0 {
            self.matched_value / self.total * 100.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickOutcome {
    /// A compressed block was replaced by the blocks it stood for.
    Expanded,
    Zoomed,
    Ignored,
}

#[derive(Debug, Clone)]
struct Frame {
    label: String,
    value: f64,
    cold: bool,
    compressed: bool,
    compressed_id: Option<u64>,
    hidden: Option<Vec<FlameNode>>,
    children: Vec<Frame>,
}

impl Frame {
    fn build(node: &FlameNode, category: &str, sorted: bool, names: &mut dyn NameSource) -> Self {
        let mut children: Vec<Frame> = node
            .children
            .iter()
            .map(|c| Frame::build(c, category, sorted, names))
            .collect();
        if sorted {
            sort_children(&mut children);
        }
        Self {
            label: names.display_name(category, &node.name),
            value: node.value,
            cold: node.cold,
            compressed: node.is_compressed_placeholder(),
            compressed_id: node.compressed_id,
            hidden: node.hidden_children.clone(),
            children,
        }
    }

    fn at(&self, path: &[usize]) -> Option<&Frame> {
        path.iter().try_fold(self, |f, &i| f.children.get(i))
    }

    fn at_mut(&mut self, path: &[usize]) -> Option<&mut Frame> {
        path.iter().try_fold(self, |f, &i| f.children.get_mut(i))
    }

    /// Child-index path of the `target`-th node in pre-order.
    fn find_path(&self, target: u64) -> Option<Vec<usize>> {
        fn walk(f: &Frame, target: u64, next: &mut u64, path: &mut Vec<usize>) -> bool {
            if *next == target {
                return true;
            }
            *next += 1;
            for (i, child) in f.children.iter().enumerate() {
                path.push(i);
                if walk(child, target, next, path) {
                    return true;
                }
                path.pop();
            }
            false
        }

        let mut path = Vec::new();
        walk(self, target, &mut 0, &mut path).then_some(path)
    }
}

/// Heaviest first; equal values by name so the order is stable.
fn compare_frames(a: &Frame, b: &Frame) -> std::cmp::Ordering {
    b.value
        .total_cmp(&a.value)
        .then_with(|| a.label.cmp(&b.label))
}

fn sort_children(children: &mut [Frame]) {
    children.sort_by(compare_frames);
}

#[derive(Clone, Copy)]
enum Placement {
    Ancestor,
    Inside { x: f64, scale: f64 },
    Hidden,
}

#[derive(Debug, Clone)]
pub struct FlameGraphPanel {
    group: String,
    set: Arc<FlameGraphSet>,
    metric: String,
    time_ordered: bool,
    root: Option<Frame>,
    zoom: Vec<usize>,
    query: String,
    summary: Option<SearchSummary>,
    width: f64,
}

impl FlameGraphPanel {
    /// Open on the wall-time metric, sorted.
    pub fn new(
        group: impl Into<String>,
        set: Arc<FlameGraphSet>,
        width: f64,
        names: &mut dyn NameSource,
    ) -> Self {
        let mut panel = Self {
            group: group.into(),
            set,
            metric: FlameGraphSet::WALLTIME.to_string(),
            time_ordered: false,
            root: None,
            zoom: Vec::new(),
            query: String::new(),
            summary: None,
            width,
        };
        panel.rebuild(names);
        panel
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn time_ordered(&self) -> bool {
        self.time_ordered
    }

    /// Whether the selected metric has a flame graph at all.
    pub fn has_graph(&self) -> bool {
        self.root.is_some()
    }

    pub fn metrics(&self) -> Vec<String> {
        self.set.metrics().map(str::to_string).collect()
    }

    pub fn total(&self) -> f64 {
        self.root.as_ref().map_or(0.0, |r| r.value)
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn zoom_path(&self) -> &[usize] {
        &self.zoom
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn search_summary(&self) -> Option<SearchSummary> {
        self.summary
    }

    /// Labels of the children of the node at `path`, in display order.
    pub fn child_labels(&self, path: &[usize]) -> Vec<&str> {
        self.root
            .as_ref()
            .and_then(|r| r.at(path))
            .map(|f| f.children.iter().map(|c| c.label.as_str()).collect())
            .unwrap_or_default()
    }

    /// Switch metric. Always starts over from the sorted variant.
    pub fn set_metric(&mut self, metric: &str, names: &mut dyn NameSource) {
        self.metric = metric.to_string();
        self.time_ordered = false;
        self.rebuild(names);
    }

    pub fn set_time_ordered(&mut self, time_ordered: bool, names: &mut dyn NameSource) {
        if self.root.is_none() {
            return;
        }
        self.time_ordered = time_ordered;
        self.rebuild(names);
    }

    /// Recompute layout width after the window was resized.
    pub fn set_width(&mut self, width: f64) {
        self.width = width.max(0.0);
    }

    fn rebuild(&mut self, names: &mut dyn NameSource) {
        let sorted = !self.time_ordered;
        self.root = self
            .set
            .metric(&self.metric)
            .map(|pair| Frame::build(pair.variant(self.time_ordered), &self.metric, sorted, names));
        self.zoom.clear();
        self.query.clear();
        self.summary = None;
    }

    /// Click on the block drawn with `frame_id`.
    pub fn click(&mut self, frame_id: u64, names: &mut dyn NameSource) -> ClickOutcome {
        let Some(root) = self.root.as_mut() else {
            return ClickOutcome::Ignored;
        };
        let Some(path) = root.find_path(frame_id) else {
            return ClickOutcome::Ignored;
        };
        let Some(node) = root.at(&path) else {
            return ClickOutcome::Ignored;
        };

        if node.hidden.is_none() {
            self.zoom = path;
            return ClickOutcome::Zoomed;
        }
        let Some((&index, parent_path)) = path.split_last() else {
            return ClickOutcome::Ignored;
        };

        let compressed_id = node.compressed_id;
        let sorted = !self.time_ordered;
        let metric = self.metric.clone();
        let Some(parent) = root.at_mut(parent_path) else {
            return ClickOutcome::Ignored;
        };

        // Every sibling standing for the same hidden set opens at once.
        let depth = parent_path.len();
        let zoomed = (self.zoom.len() > depth && self.zoom.starts_with(parent_path))
            .then(|| self.zoom[depth]);
        let mut zoom_lost = false;
        let mut merged: Vec<(Option<usize>, Frame)> = Vec::with_capacity(parent.children.len());
        for (i, child) in std::mem::take(&mut parent.children).into_iter().enumerate() {
            let opens =
                i == index || (compressed_id.is_some() && child.compressed_id == compressed_id);
            if opens && child.hidden.is_some() {
                zoom_lost |= zoomed == Some(i);
                let hidden = child.hidden.unwrap_or_default();
                merged.extend(
                    hidden
                        .iter()
                        .map(|n| (None, Frame::build(n, &metric, sorted, names))),
                );
            } else {
                merged.push((Some(i), child));
            }
        }
        if sorted {
            merged.sort_by(|(_, a), (_, b)| compare_frames(a, b));
        }

        if zoom_lost {
            self.zoom.truncate(depth);
        } else if let Some(old) = zoomed
            && let Some(new) = merged.iter().position(|(orig, _)| *orig == Some(old))
        {
            self.zoom[depth] = new;
        }
        parent.children = merged.into_iter().map(|(_, f)| f).collect();

        if !self.query.is_empty() {
            let query = self.query.clone();
            self.search(&query);
        }
        ClickOutcome::Expanded
    }

    pub fn reset_zoom(&mut self) {
        self.zoom.clear();
    }

    /// Highlight blocks whose display name contains `query`. An empty query
    /// clears the search.
    pub fn search(&mut self, query: &str) -> Option<SearchSummary> {
        self.query = query.to_string();
        self.summary = match (&self.root, query.is_empty()) {
            (Some(root), false) => {
                let mut summary = SearchSummary {
                    matches: 0,
                    matched_value: 0.0,
                    total: root.value,
                };
                tally(root, query, false, &mut summary);
                Some(summary)
            }
            _ => None,
        };
        self.summary
    }

    /// Height of the graph at the current zoom.
    pub fn content_height(&self) -> f64 {
        fn depth(f: &Frame) -> usize {
            1 + f.children.iter().map(depth).max().unwrap_or(0)
        }
        match self.root.as_ref().and_then(|r| r.at(&self.zoom)) {
            Some(zoomed) => (self.zoom.len() + depth(zoomed)) as f64 * FRAME_HEIGHT,
            None => 0.0,
        }
    }

    /// Lay the graph out top-down, each block tagged with its pre-order id.
    pub fn render(&self, viewport: &Viewport) -> Vec<RenderCommand> {
        let Some(root) = &self.root else {
            return Vec::new();
        };

        let mut commands = Vec::new();
        commands.push(RenderCommand::BeginGroup {
            id: self.group.as_str().into(),
            label: Some(self.metric.as_str().into()),
        });
        let start = if self.zoom.is_empty() {
            Placement::Inside {
                x: 0.0,
                scale: scale_for(self.width, root.value),
            }
        } else {
            Placement::Ancestor
        };
        let mut path = Vec::new();
        self.layout(root, start, &mut path, &mut 0, viewport, &mut commands);
        commands.push(RenderCommand::EndGroup);
        commands
    }

    fn layout(
        &self,
        frame: &Frame,
        placement: Placement,
        path: &mut Vec<usize>,
        next_id: &mut u64,
        viewport: &Viewport,
        out: &mut Vec<RenderCommand>,
    ) {
        let id = *next_id;
        *next_id += 1;

        let y = path.len() as f64 * FRAME_HEIGHT;
        let span = match placement {
            Placement::Ancestor => Some((0.0, self.width)),
            Placement::Inside { x, scale } => Some((x, frame.value * scale)),
            Placement::Hidden => None,
        };
        if let Some((x, w)) = span
            && w >= 0.5
            && viewport.shows_rows(y, FRAME_HEIGHT)
        {
            out.push(RenderCommand::DrawRect {
                rect: Rect::new(x, y, w, FRAME_HEIGHT - 1.0),
                color: self.color(frame),
                border_color: Some(ThemeToken::Border),
                label: Some(frame.label.as_str().into()),
                frame_id: Some(id),
            });
        }

        let mut cursor = match placement {
            Placement::Inside { x, .. } => x,
            _ => 0.0,
        };
        for (i, child) in frame.children.iter().enumerate() {
            path.push(i);
            let child_placement = match placement {
                Placement::Hidden => Placement::Hidden,
                Placement::Inside { scale, .. } => {
                    let p = Placement::Inside { x: cursor, scale };
                    cursor += child.value * scale;
                    p
                }
                Placement::Ancestor if path.as_slice() == self.zoom.as_slice() => {
                    Placement::Inside {
                        x: 0.0,
                        scale: scale_for(self.width, child.value),
                    }
                }
                Placement::Ancestor if self.zoom.starts_with(path) => Placement::Ancestor,
                Placement::Ancestor => Placement::Hidden,
            };
            self.layout(child, child_placement, path, next_id, viewport, out);
            path.pop();
        }
    }

    fn color(&self, frame: &Frame) -> ThemeToken {
        if !self.query.is_empty() && frame.label.contains(&self.query) {
            return ThemeToken::SearchHighlight;
        }
        if frame.cold {
            return ThemeToken::FlameCold;
        }
        if frame.compressed {
            return ThemeToken::FlameCompressed;
        }

        let weight = if self.total() > 0.0 {
            frame.value / self.total()
        } else {
            0.0
        };
        let warm = self.metric == FlameGraphSet::WALLTIME;
        match (warm, weight) {
            (true, w) if w >= 0.5 => ThemeToken::FlameHot,
            (true, w) if w >= 0.1 => ThemeToken::FlameWarm,
            (true, _) => ThemeToken::FlameNeutral,
            (false, w) if w >= 0.5 => ThemeToken::MetricHeavy,
            (false, w) if w >= 0.1 => ThemeToken::MetricMedium,
            (false, _) => ThemeToken::MetricLight,
        }
    }
}

fn scale_for(width: f64, value: f64) -> f64 {
    if value > 0.0 { width / value } else { 0.0 }
}

fn tally(frame: &Frame, query: &str, inside_match: bool, summary: &mut SearchSummary) {
    let hit = frame.label.contains(query);
    if hit {
        summary.matches += 1;
        if !inside_match {
            summary.matched_value += frame.value;
        }
    }
    for child in &frame.children {
        tally(child, query, inside_match || hit, summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use profview_protocol::FlameGraphPair;

    /// Identity names, except `sym_*` frames which show up upper-cased.
    struct Names;

    impl NameSource for Names {
        fn display_name(&mut self, _category: &str, raw: &str) -> String {
            match raw.strip_prefix("sym_") {
                Some(rest) => rest.to_uppercase(),
                None => raw.to_string(),
            }
        }
    }

    fn leaf(name: &str, value: f64) -> FlameNode {
        FlameNode::new(name, value)
    }

    fn set(sorted: FlameNode, time_ordered: FlameNode) -> Arc<FlameGraphSet> {
        Arc::new(FlameGraphSet(BTreeMap::from([(
            FlameGraphSet::WALLTIME.to_string(),
            FlameGraphPair(sorted, time_ordered),
        )])))
    }

    fn compressed_tree() -> FlameNode {
        FlameNode::new("all", 10.0).with_children(vec![
            leaf("x", 5.0),
            FlameNode::compressed(7, vec![leaf("y", 3.0), leaf("z", 2.0)]),
        ])
    }

    fn rect_ids(cmds: &[RenderCommand]) -> Vec<(u64, String)> {
        cmds.iter()
            .filter_map(|c| match c {
                RenderCommand::DrawRect {
                    frame_id: Some(id),
                    label: Some(label),
                    ..
                } => Some((*id, label.to_string())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn sorted_variant_orders_by_value() {
        let tree = FlameNode::new("all", 10.0).with_children(vec![
            leaf("small", 1.0),
            leaf("big", 6.0),
            leaf("b", 3.0),
            leaf("a", 3.0),
        ]);
        let mut panel = FlameGraphPanel::new("1_1", set(tree.clone(), tree), 800.0, &mut Names);
        assert_eq!(panel.child_labels(&[]), ["big", "a", "b", "small"]);

        panel.set_time_ordered(true, &mut Names);
        assert_eq!(panel.child_labels(&[]), ["small", "big", "b", "a"]);
    }

    #[test]
    fn expanding_compressed_block_splices_in_place() {
        let tree = compressed_tree();
        let mut panel = FlameGraphPanel::new("1_1", set(tree.clone(), tree), 800.0, &mut Names);
        panel.set_time_ordered(true, &mut Names);
        assert_eq!(panel.child_labels(&[]), ["x", "(compressed)"]);

        // Pre-order: all=0, x=1, (compressed)=2.
        assert_eq!(panel.click(2, &mut Names), ClickOutcome::Expanded);
        assert_eq!(panel.child_labels(&[]), ["x", "y", "z"]);
        assert!((panel.total() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn expansion_resorts_sorted_variant() {
        let tree = FlameNode::new("all", 10.0).with_children(vec![
            leaf("x", 5.0),
            FlameNode::compressed(7, vec![leaf("y", 1.0), leaf("z", 4.0)]),
        ]);
        let mut panel = FlameGraphPanel::new("1_1", set(tree.clone(), tree), 800.0, &mut Names);
        assert_eq!(panel.child_labels(&[]), ["(compressed)", "x"]);

        // Sorted pre-order: all=0, (compressed)=1, x=2.
        assert_eq!(panel.click(1, &mut Names), ClickOutcome::Expanded);
        assert_eq!(panel.child_labels(&[]), ["x", "z", "y"]);
    }

    #[test]
    fn expansion_keeps_input_order_when_time_ordered() {
        let tree = FlameNode::new("all", 10.0).with_children(vec![
            leaf("x", 5.0),
            FlameNode::compressed(7, vec![leaf("y", 1.0), leaf("z", 4.0)]),
        ]);
        let mut panel = FlameGraphPanel::new("1_1", set(tree.clone(), tree), 800.0, &mut Names);
        panel.set_time_ordered(true, &mut Names);

        assert_eq!(panel.click(2, &mut Names), ClickOutcome::Expanded);
        assert_eq!(panel.child_labels(&[]), ["x", "y", "z"]);
    }

    #[test]
    fn siblings_sharing_compressed_id_expand_together() {
        let tree = FlameNode::new("all", 12.0).with_children(vec![
            FlameNode::compressed(4, vec![leaf("a", 2.0), leaf("b", 1.0)]),
            leaf("m", 6.0),
            FlameNode::compressed(4, vec![leaf("c", 3.0)]),
            FlameNode::compressed(5, vec![leaf("d", 0.5)]),
        ]);
        let mut panel = FlameGraphPanel::new("1_1", set(tree.clone(), tree), 800.0, &mut Names);
        panel.set_time_ordered(true, &mut Names);

        // Pre-order: all=0, (compressed)=1, m=2, (compressed)=3, (compressed)=4.
        assert_eq!(panel.click(3, &mut Names), ClickOutcome::Expanded);
        assert_eq!(
            panel.child_labels(&[]),
            ["a", "b", "m", "c", "(compressed)"]
        );
    }

    #[test]
    fn zoom_follows_sibling_across_resort() {
        let tree = FlameNode::new("all", 20.0).with_children(vec![
            FlameNode::new("x", 8.0).with_children(vec![leaf("x1", 8.0)]),
            FlameNode::compressed(1, vec![leaf("y", 9.0), leaf("z", 3.0)]),
        ]);
        let mut panel = FlameGraphPanel::new("1_1", set(tree.clone(), tree), 800.0, &mut Names);
        // Sorted pre-order: all=0, (compressed)=1, x=2, x1=3.
        assert_eq!(panel.click(2, &mut Names), ClickOutcome::Zoomed);
        assert_eq!(panel.zoom_path(), [1]);

        assert_eq!(panel.click(1, &mut Names), ClickOutcome::Expanded);
        assert_eq!(panel.child_labels(&[]), ["y", "x", "z"]);
        assert_eq!(panel.zoom_path(), [1]);
        assert_eq!(panel.child_labels(panel.zoom_path()), ["x1"]);
    }

    #[test]
    fn expansion_keeps_zoom_on_shifted_sibling() {
        let tree = FlameNode::new("all", 20.0).with_children(vec![
            FlameNode::compressed(1, vec![leaf("y", 3.0), leaf("z", 2.0), leaf("w", 1.0)]),
            FlameNode::new("x", 14.0).with_children(vec![leaf("x1", 14.0)]),
        ]);
        let mut panel = FlameGraphPanel::new("1_1", set(tree.clone(), tree), 800.0, &mut Names);
        panel.set_time_ordered(true, &mut Names);

        // Pre-order: all=0, (compressed)=1, x=2, x1=3.
        assert_eq!(panel.click(2, &mut Names), ClickOutcome::Zoomed);
        assert_eq!(panel.zoom_path(), [1]);
        assert_eq!(panel.click(1, &mut Names), ClickOutcome::Expanded);
        assert_eq!(panel.zoom_path(), [3]);
        assert_eq!(panel.child_labels(panel.zoom_path()), ["x1"]);
    }

    #[test]
    fn zoomed_layout_fills_width() {
        let tree = FlameNode::new("all", 10.0).with_children(vec![
            FlameNode::new("a", 8.0).with_children(vec![leaf("a1", 4.0), leaf("a2", 4.0)]),
            leaf("b", 2.0),
        ]);
        let mut panel = FlameGraphPanel::new("1_1", set(tree.clone(), tree), 1000.0, &mut Names);
        // Sorted pre-order: all=0, a=1, a1=2, a2=3, b=4.
        assert_eq!(panel.click(1, &mut Names), ClickOutcome::Zoomed);

        let cmds = panel.render(&Viewport::new(1000.0, 600.0));
        let ids = rect_ids(&cmds);
        assert_eq!(
            ids.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            [0, 1, 2, 3]
        );
        let widths: Vec<f64> = cmds
            .iter()
            .filter_map(|c| match c {
                RenderCommand::DrawRect { rect, .. } => Some(rect.w),
                _ => None,
            })
            .collect();
        assert_eq!(widths, [1000.0, 1000.0, 500.0, 500.0]);
        assert!((panel.content_height() - 3.0 * FRAME_HEIGHT).abs() < f64::EPSILON);
    }

    #[test]
    fn search_counts_nested_matches_once() {
        let tree = FlameNode::new("all", 100.0).with_children(vec![
            FlameNode::new("sym_alloc", 40.0).with_children(vec![leaf("alloc_slow", 10.0)]),
            leaf("ALLOC_fast", 20.0),
            leaf("free", 40.0),
        ]);
        let mut panel = FlameGraphPanel::new("1_1", set(tree.clone(), tree), 800.0, &mut Names);

        let summary = panel.search("ALLOC").expect("summary");
        assert_eq!(summary.matches, 2);
        assert!((summary.matched_value - 60.0).abs() < f64::EPSILON);
        assert!((summary.percentage() - 60.0).abs() < 1e-9);

        let summary = panel.search("alloc").expect("summary");
        assert_eq!(summary.matches, 1);
        assert!((summary.matched_value - 10.0).abs() < f64::EPSILON);

        assert!(panel.search("").is_none());
    }

    #[test]
    fn metric_switch_resets_time_ordering_and_search() {
        let tree = compressed_tree();
        let mut panel = FlameGraphPanel::new("1_1", set(tree.clone(), tree), 800.0, &mut Names);
        panel.set_time_ordered(true, &mut Names);
        panel.search("x");

        panel.set_metric("cycles", &mut Names);
        assert!(!panel.time_ordered());
        assert!(!panel.has_graph());
        assert!(panel.search_summary().is_none());
        assert!(panel.render(&Viewport::new(800.0, 600.0)).is_empty());

        panel.set_metric(FlameGraphSet::WALLTIME, &mut Names);
        assert!(panel.has_graph());
    }

    #[test]
    fn fixed_colours_override_weight() {
        let mut cold = leaf("cold", 9.0);
        cold.cold = true;
        let tree = FlameNode::new("all", 10.0).with_children(vec![
            cold,
            FlameNode::compressed(1, vec![leaf("h", 1.0)]),
        ]);
        let panel = FlameGraphPanel::new("1_1", set(tree.clone(), tree), 800.0, &mut Names);
        let colors: Vec<ThemeToken> = panel
            .render(&Viewport::new(800.0, 600.0))
            .iter()
            .filter_map(|c| match c {
                RenderCommand::DrawRect { color, .. } => Some(*color),
                _ => None,
            })
            .collect();
        assert_eq!(
            colors,
            [
                ThemeToken::FlameHot,
                ThemeToken::FlameCold,
                ThemeToken::FlameCompressed
            ]
        );
    }
}
