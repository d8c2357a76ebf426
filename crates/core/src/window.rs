//! Floating panels: identity, focus and stacking, collapse, drag, resize.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use profview_protocol::{Point, Rect, RenderCommand, TextAlign, ThemeToken, Viewport};
use serde::{Deserialize, Serialize};

use crate::flamegraph::FlameGraphPanel;
use crate::roofline::RooflinePanel;

pub const HEADER_HEIGHT: f64 = 28.0;
/// Once the top z-index reaches this, stacking is renumbered from 1.
pub const Z_INDEX_LIMIT: u32 = 10_000;
const MIN_HEIGHT: f64 = 150.0;
const CODE_LINE_HEIGHT: f64 = 16.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelKind {
    FlameGraphs,
    Roofline,
    Code,
}

impl PanelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FlameGraphs => "flame_graphs",
            Self::Roofline => "roofline",
            Self::Code => "code",
        }
    }

    fn default_size(self) -> (f64, f64) {
        match self {
            Self::FlameGraphs | Self::Roofline => (900.0, 500.0),
            Self::Code => (750.0, 550.0),
        }
    }
}

/// Source preview with marked lines.
#[derive(Debug, Clone)]
pub struct CodePanel {
    pub files_and_lines: BTreeMap<String, BTreeSet<u64>>,
    pub default_file: String,
    pub code: Arc<str>,
}

impl CodePanel {
    /// Preview of `file` with a single exact line.
    pub fn exact(file: &str, line: u64, code: Arc<str>) -> Self {
        Self {
            files_and_lines: BTreeMap::from([(
                file.to_string(),
                BTreeSet::from([line]),
            )]),
            default_file: file.to_string(),
            code,
        }
    }

    /// Marked lines of the displayed file, ascending.
    pub fn highlighted_lines(&self) -> Vec<u64> {
        self.files_and_lines
            .get(&self.default_file)
            .map(|lines| lines.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn render(&self, viewport: &Viewport) -> Vec<RenderCommand> {
        let highlighted = self.highlighted_lines();
        let mut out = Vec::new();
        for (i, text) in self.code.lines().enumerate() {
            let line = i as u64 + 1;
            let y = i as f64 * CODE_LINE_HEIGHT;
            if !viewport.shows_rows(y, CODE_LINE_HEIGHT) {
                continue;
            }
            if highlighted.contains(&line) {
                out.push(RenderCommand::DrawRect {
                    rect: Rect::new(0.0, y, viewport.width, CODE_LINE_HEIGHT),
                    color: ThemeToken::SearchHighlight,
                    border_color: None,
                    label: None,
                    frame_id: Some(line),
                });
            }
            out.push(RenderCommand::DrawText {
                position: Point::new(40.0, y + CODE_LINE_HEIGHT * 0.75),
                text: format!("{line:>4}  {text}").into(),
                color: ThemeToken::TextPrimary,
                font_size: 12.0,
                align: TextAlign::Left,
            });
        }
        out
    }
}

/// What a window shows.
#[derive(Debug, Clone)]
pub enum PanelData {
    /// Waiting for the server.
    Loading,
    FlameGraphs(FlameGraphPanel),
    /// The fetch failed or there is no wall-time graph for the thread.
    NoFlameGraph,
    Roofline(RooflinePanel),
    Code(CodePanel),
}

impl PanelData {
    fn has_plot(&self, kind: PanelKind) -> bool {
        match self {
            Self::FlameGraphs(panel) => panel.has_graph(),
            _ => kind == PanelKind::Roofline,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderStyle {
    pub background: ThemeToken,
    pub text: ThemeToken,
}

#[derive(Debug, Clone)]
pub struct WindowEntry {
    pub id: String,
    pub kind: PanelKind,
    pub session: String,
    pub group: Option<String>,
    pub title: String,
    pub data: PanelData,
    pub collapsed: bool,
    pub last_focus: u64,
    pub being_resized: bool,
    pub last_height: Option<f64>,
    pub min_height: Option<f64>,
    pub geometry: Rect,
    pub z_index: u32,
    current_min_height: f64,
}

impl WindowEntry {
    /// Area below the header available to the panel.
    pub fn content_size(&self) -> (f64, f64) {
        (
            self.geometry.w,
            (self.geometry.h - HEADER_HEIGHT).max(0.0),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WindowEvent {
    Opened { id: String },
    Focused { id: String },
    Collapsed { id: String },
    Expanded { id: String },
    Moved { id: String },
    /// The panel was resized and has been laid out again.
    Relayout { id: String, kind: PanelKind },
    Closed { id: String },
}

#[derive(Debug, Clone, Copy)]
struct Drag {
    offset: Point,
}

#[derive(Debug, Default)]
pub struct WindowManager {
    windows: Vec<WindowEntry>,
    focused: Option<String>,
    largest_z: u32,
    focus_clock: u64,
    drag: Option<(String, Drag)>,
    events: Vec<WindowEvent>,
}

impl WindowManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&WindowEntry> {
        self.windows.iter().find(|w| w.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut WindowEntry> {
        self.windows.iter_mut().find(|w| w.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WindowEntry> {
        self.windows.iter()
    }

    /// Windows from bottom to top.
    pub fn stacking_order(&self) -> Vec<&WindowEntry> {
        let mut order: Vec<&WindowEntry> = self.windows.iter().collect();
        order.sort_by_key(|w| w.z_index);
        order
    }

    pub fn focused(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    pub fn take_events(&mut self) -> Vec<WindowEvent> {
        std::mem::take(&mut self.events)
    }

    fn next_id(&self, session: &str, kind: PanelKind, group: Option<&str>) -> String {
        let base = match group {
            Some(group) => format!("w_{session}_{}_{group}", kind.as_str()),
            None => format!("w_{session}_{}", kind.as_str()),
        };
        let mut n = 0usize;
        loop {
            let id = format!("{base}_{n}");
            if self.get(&id).is_none() {
                return id;
            }
            n += 1;
        }
    }

    /// Create a window at `at` and focus it.
    pub fn open(
        &mut self,
        kind: PanelKind,
        session: &str,
        group: Option<&str>,
        title: impl Into<String>,
        at: Point,
    ) -> String {
        let id = self.next_id(session, kind, group);
        let (w, h) = kind.default_size();
        self.windows.push(WindowEntry {
            id: id.clone(),
            kind,
            session: session.to_string(),
            group: group.map(str::to_string),
            title: title.into(),
            data: PanelData::Loading,
            collapsed: false,
            last_focus: 0,
            being_resized: false,
            last_height: None,
            min_height: None,
            geometry: Rect::new(at.x, at.y, w, h),
            z_index: 0,
            current_min_height: MIN_HEIGHT,
        });
        self.events.push(WindowEvent::Opened { id: id.clone() });
        self.focus(&id);
        id
    }

    /// Bring a window to the front. Focusing the focused window does nothing.
    pub fn focus(&mut self, id: &str) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        if self.focused.as_deref() == Some(id) {
            return true;
        }

        let z = if self.largest_z >= Z_INDEX_LIMIT {
            let mut order: Vec<usize> = (0..self.windows.len()).collect();
            order.sort_by_key(|&i| self.windows[i].z_index);
            for (rank, &i) in order.iter().enumerate() {
                self.windows[i].z_index = rank as u32 + 1;
            }
            self.windows.len() as u32 + 1
        } else {
            self.largest_z + 1
        };
        self.largest_z = z;
        self.focus_clock += 1;

        let clock = self.focus_clock;
        if let Some(window) = self.get_mut(id) {
            window.z_index = z;
            window.last_focus = clock;
        }
        self.focused = Some(id.to_string());
        self.events.push(WindowEvent::Focused { id: id.to_string() });
        true
    }

    pub fn header_style(&self, id: &str) -> HeaderStyle {
        if self.focused.as_deref() == Some(id) {
            HeaderStyle {
                background: ThemeToken::WindowHeaderFocused,
                text: ThemeToken::WindowHeaderTextFocused,
            }
        } else {
            HeaderStyle {
                background: ThemeToken::WindowHeaderUnfocused,
                text: ThemeToken::WindowHeaderTextUnfocused,
            }
        }
    }

    /// Collapse to the header, or restore the previous size.
    pub fn toggle_collapsed(&mut self, id: &str) -> bool {
        let Some(window) = self.get_mut(id) else {
            return false;
        };
        let event = if window.collapsed {
            window.collapsed = false;
            if let Some(h) = window.last_height {
                window.geometry.h = h;
            }
            if let Some(min) = window.min_height {
                window.current_min_height = min;
            }
            WindowEvent::Expanded { id: id.to_string() }
        } else {
            window.collapsed = true;
            window.min_height = Some(window.current_min_height);
            window.last_height = Some(window.geometry.h);
            window.current_min_height = 0.0;
            window.geometry.h = HEADER_HEIGHT;
            WindowEvent::Collapsed { id: id.to_string() }
        };
        self.events.push(event);
        true
    }

    /// Remove a window and hand focus to the most recently focused survivor.
    pub fn close(&mut self, id: &str) -> Option<WindowEntry> {
        let index = self.windows.iter().position(|w| w.id == id)?;
        let entry = self.windows.remove(index);
        if self.drag.as_ref().is_some_and(|(d, _)| d == id) {
            self.drag = None;
        }
        self.events.push(WindowEvent::Closed { id: id.to_string() });

        if self.focused.as_deref() == Some(id) {
            self.focused = None;
            let next = self
                .windows
                .iter()
                .max_by_key(|w| w.last_focus)
                .map(|w| w.id.clone());
            if let Some(next) = next {
                self.focus(&next);
            }
        }
        Some(entry)
    }

    /// Start dragging by the header; `pointer` is in page coordinates.
    pub fn begin_drag(&mut self, id: &str, pointer: Point) -> bool {
        if !self.focus(id) {
            return false;
        }
        let Some(window) = self.get(id) else {
            return false;
        };
        let offset = Point::new(pointer.x - window.geometry.x, pointer.y - window.geometry.y);
        self.drag = Some((id.to_string(), Drag { offset }));
        true
    }

    /// Follow the pointer while the primary button is held.
    pub fn drag_to(&mut self, pointer: Point) {
        let Some((id, drag)) = self.drag.clone() else {
            return;
        };
        if let Some(window) = self.get_mut(&id) {
            window.geometry.x = pointer.x - drag.offset.x;
            window.geometry.y = pointer.y - drag.offset.y;
            self.events.push(WindowEvent::Moved { id });
        }
    }

    pub fn end_drag(&mut self) {
        self.drag = None;
    }

    /// Apply a new size. Windows with a plot are laid out again on pointer-up.
    pub fn resize(&mut self, id: &str, width: f64, height: f64) -> bool {
        let Some(window) = self.get_mut(id) else {
            return false;
        };
        window.geometry.w = width.max(0.0);
        window.geometry.h = height.max(window.current_min_height);
        if window.data.has_plot(window.kind) {
            window.being_resized = true;
        }
        true
    }

    /// Finish a resize: relayout the panel once and emit [`WindowEvent::Relayout`].
    pub fn pointer_up(&mut self, id: &str) -> bool {
        let Some(window) = self.get_mut(id) else {
            return false;
        };
        if !window.being_resized {
            return false;
        }
        window.being_resized = false;
        let (w, h) = window.content_size();
        match &mut window.data {
            PanelData::FlameGraphs(panel) => panel.set_width(w),
            PanelData::Roofline(panel) => panel.resize(w - 10.0, h - 10.0),
            _ => {}
        }
        let kind = window.kind;
        self.events.push(WindowEvent::Relayout {
            id: id.to_string(),
            kind,
        });
        true
    }

    /// Header bar of a window, ready to draw.
    pub fn render_header(&self, id: &str) -> Vec<RenderCommand> {
        let Some(window) = self.get(id) else {
            return Vec::new();
        };
        let style = self.header_style(id);
        let g = window.geometry;
        vec![
            RenderCommand::DrawRect {
                rect: Rect::new(g.x, g.y, g.w, HEADER_HEIGHT),
                color: style.background,
                border_color: Some(ThemeToken::Border),
                label: None,
                frame_id: None,
            },
            RenderCommand::DrawText {
                position: Point::new(g.x + 8.0, g.y + HEADER_HEIGHT * 0.65),
                text: window.title.as_str().into(),
                color: style.text,
                font_size: 12.0,
                align: TextAlign::Left,
            },
        ]
    }
}
