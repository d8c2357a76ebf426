use std::io::stdout;
use std::time::Duration;

use anyhow::Result;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
        MouseButton, MouseEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use profview_core::roofline::Bound;
use profview_core::viewer::{FLAME_GRAPHS, ROOFLINE, ThreadDetails};
use profview_core::window::{PanelData, PanelKind};
use profview_core::{Fetch, Viewer};
use profview_protocol::{Point, RenderCommand, TextAlign, ThemeToken, Viewport};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};
use tracing::{info, warn};

use crate::http::HttpBackend;

/// Logical pixels covered by one terminal cell.
#[derive(Clone, Copy, Debug)]
struct Scale {
    px_per_col: f64,
    px_per_row: f64,
}

const TIMELINE_ROW_PX: f64 = 20.0;
const FLAME_ROW_PX: f64 = 18.0;
const CODE_ROW_PX: f64 = 16.0;
const COL_PX: f64 = 8.0;

fn theme_to_color(token: ThemeToken) -> Color {
    match token {
        ThemeToken::FlameHot => Color::Red,
        ThemeToken::FlameWarm => Color::LightRed,
        ThemeToken::FlameNeutral => Color::Yellow,
        ThemeToken::MetricHeavy => Color::Green,
        ThemeToken::MetricMedium => Color::LightGreen,
        ThemeToken::MetricLight => Color::Rgb(163, 217, 165),
        ThemeToken::FlameCold => Color::Blue,
        ThemeToken::FlameCompressed => Color::Magenta,
        ThemeToken::SearchHighlight => Color::LightMagenta,
        ThemeToken::LifetimeBand => Color::Rgb(170, 0, 0),
        ThemeToken::OffCpuBand => Color::LightBlue,
        ThemeToken::GroupLabel => Color::White,
        ThemeToken::WarningText => Color::LightRed,
        ThemeToken::WindowHeaderFocused => Color::White,
        ThemeToken::WindowHeaderUnfocused => Color::DarkGray,
        ThemeToken::WindowHeaderTextFocused => Color::Black,
        ThemeToken::WindowHeaderTextUnfocused => Color::White,
        ThemeToken::CeilingL1 => Color::Red,
        ThemeToken::CeilingL2 => Color::Green,
        ThemeToken::CeilingL3 => Color::Blue,
        ThemeToken::CeilingDram => Color::Gray,
        ThemeToken::CeilingFp | ThemeToken::Axis | ThemeToken::TextPrimary => Color::White,
        ThemeToken::GridLine | ThemeToken::Border => Color::DarkGray,
        ThemeToken::TextSecondary => Color::Gray,
        ThemeToken::TextMuted => Color::DarkGray,
        ThemeToken::Background | ThemeToken::Surface => Color::Black,
    }
}

/// Cell-addressed drawing surface: positions are relative to `area`,
/// anything outside `clip` is dropped.
#[derive(Clone, Copy)]
struct Canvas {
    area: Rect,
    clip: Rect,
}

impl Canvas {
    fn new(area: Rect) -> Self {
        Self { area, clip: area }
    }

    fn put(self, buf: &mut Buffer, col: i64, row: i64, text: &str, fg: Color, bg: Option<Color>) {
        let y = i64::from(self.area.y) + row;
        if y < i64::from(self.clip.top()) || y >= i64::from(self.clip.bottom()) {
            return;
        }
        for (i, ch) in text.chars().enumerate() {
            let x = i64::from(self.area.x) + col + i as i64;
            if x < i64::from(self.clip.left()) {
                continue;
            }
            if x >= i64::from(self.clip.right()) {
                break;
            }
            let cell = &mut buf[(x as u16, y as u16)];
            cell.set_char(ch).set_fg(fg);
            if let Some(bg) = bg {
                cell.set_bg(bg);
            }
        }
    }
}

/// Draw render commands into `area`. `top` is the logical y shown on the
/// first row.
fn paint(buf: &mut Buffer, area: Rect, commands: &[RenderCommand], scale: Scale, top: f64) {
    let to_col = |x: f64| (x / scale.px_per_col).floor() as i64;
    let to_row = |y: f64| ((y - top) / scale.px_per_row).floor() as i64;
    let mut canvas = Canvas::new(area);

    for cmd in commands {
        match cmd {
            RenderCommand::DrawRect {
                rect, color, label, ..
            } => {
                let col = to_col(rect.x);
                let row = to_row(rect.y);
                let width = ((rect.w / scale.px_per_col).round() as i64).max(1);
                let height = ((rect.h / scale.px_per_row).round() as i64).max(1);
                let bg = theme_to_color(*color);
                let label = label.as_deref().unwrap_or("");
                for r in 0..height {
                    let text: String = if r == 0 && width as usize > label.chars().count() + 1 {
                        format!(" {label:<w$}", w = width as usize - 1)
                    } else {
                        " ".repeat(width as usize)
                    };
                    canvas.put(buf, col, row + r, &text, Color::Black, Some(bg));
                }
            }
            RenderCommand::DrawText {
                position,
                text,
                color,
                align,
                ..
            } => {
                let len = text.chars().count() as i64;
                let col = match align {
                    TextAlign::Left => to_col(position.x),
                    TextAlign::Center => to_col(position.x) - len / 2,
                    TextAlign::Right => to_col(position.x) - len,
                };
                canvas.put(buf, col, to_row(position.y), text, theme_to_color(*color), None);
            }
            RenderCommand::DrawLine {
                from,
                to,
                color,
                dashed,
                ..
            } => {
                let (c0, r0) = (to_col(from.x), to_row(from.y));
                let (c1, r1) = (to_col(to.x), to_row(to.y));
                let steps = (c1 - c0).abs().max((r1 - r0).abs()).max(1);
                let glyph = if *dashed { "·" } else { "•" };
                for s in 0..=steps {
                    if *dashed && s % 2 == 1 {
                        continue;
                    }
                    let c = c0 + (c1 - c0) * s / steps;
                    let r = r0 + (r1 - r0) * s / steps;
                    canvas.put(buf, c, r, glyph, theme_to_color(*color), None);
                }
            }
            RenderCommand::SetClip { rect } => {
                let x0 = to_col(rect.x).clamp(0, i64::from(area.width));
                let y0 = to_row(rect.y).clamp(0, i64::from(area.height));
                let x1 = to_col(rect.x + rect.w).clamp(x0, i64::from(area.width));
                let y1 = to_row(rect.y + rect.h).clamp(y0, i64::from(area.height));
                canvas.clip = Rect::new(
                    area.x + x0 as u16,
                    area.y + y0 as u16,
                    (x1 - x0) as u16,
                    (y1 - y0) as u16,
                );
            }
            RenderCommand::ClearClip => canvas.clip = area,
            RenderCommand::BeginGroup { .. } | RenderCommand::EndGroup => {}
        }
    }
}

/// `frame_id` of the topmost block drawn at a logical point.
fn hit_test(commands: &[RenderCommand], at: Point) -> Option<u64> {
    commands.iter().rev().find_map(|cmd| match cmd {
        RenderCommand::DrawRect { rect, frame_id, .. } if rect.contains(at) => *frame_id,
        _ => None,
    })
}

enum Input {
    Search(String),
    FlameThreshold(String),
    DiffThreshold(String),
}

struct App {
    viewer: Viewer,
    backend: HttpBackend,
    selected: usize,
    scroll: usize,
    view: (f64, f64),
    full: (f64, f64),
    focus: Option<String>,
    details: Option<ThreadDetails>,
    input: Option<Input>,
    status: Vec<String>,
    /// Last window body painted, for mouse hits.
    painted: Option<(Rect, Scale, f64, Vec<RenderCommand>)>,
    window_scroll: f64,
}

impl App {
    fn new(viewer: Viewer, backend: HttpBackend, status: Vec<String>) -> Self {
        let full = viewer.timeline().map(|t| t.time_range()).unwrap_or((0.0, 1.0));
        Self {
            viewer,
            backend,
            selected: 0,
            scroll: 0,
            view: full,
            full,
            focus: None,
            details: None,
            input: None,
            status,
            painted: None,
            window_scroll: 0.0,
        }
    }

    fn fetch(&mut self, fetch: Option<Fetch>) {
        self.viewer.drive(&mut self.backend, fetch);
        self.collect_notices();
    }

    fn collect_notices(&mut self) {
        for notice in self.viewer.take_notices() {
            warn!("{}", notice.message);
            self.status.push(notice.message);
        }
    }

    fn selected_group(&self) -> Option<String> {
        self.viewer
            .timeline()
            .and_then(|t| t.groups.get(self.selected))
            .map(|g| g.id.clone())
    }

    fn group_count(&self) -> usize {
        self.viewer.timeline().map_or(0, |t| t.groups.len())
    }

    fn report(&mut self, result: profview_core::Result<()>) {
        if let Err(err) = result {
            self.status.push(err.to_string());
        }
    }

    fn focused_kind(&self) -> Option<PanelKind> {
        let id = self.focus.as_deref()?;
        self.viewer.windows().get(id).map(|w| w.kind)
    }

    fn open(&mut self, analysis: &str) {
        let group = self.selected_group();
        match self
            .viewer
            .open_analysis(analysis, group.as_deref(), Point::new(0.0, 0.0))
        {
            Ok((id, fetch)) => {
                info!(window = %id, "opened");
                self.focus = Some(id);
                self.window_scroll = 0.0;
                self.fetch(fetch);
                self.sync_focus();
            }
            Err(err) => self.status.push(err.to_string()),
        }
    }

    fn sync_focus(&mut self) {
        self.focus = self.viewer.windows().focused().map(str::to_string);
    }

    fn cycle_focus(&mut self) {
        let order: Vec<String> = self
            .viewer
            .windows()
            .iter()
            .map(|w| w.id.clone())
            .collect();
        if order.is_empty() {
            return;
        }
        let next = match &self.focus {
            Some(id) => order
                .iter()
                .position(|w| w == id)
                .map_or(0, |i| (i + 1) % order.len()),
            None => 0,
        };
        self.viewer.windows_mut().focus(&order[next]);
        self.window_scroll = 0.0;
        self.sync_focus();
    }

    fn show_details(&mut self) {
        let Some(group) = self.selected_group() else {
            return;
        };
        match self.viewer.thread_details(&group, false) {
            Ok(details) => self.details = Some(details),
            Err(err) => self.status.push(err.to_string()),
        }
    }

    fn open_source(&mut self, index: usize) {
        let link = self
            .details
            .as_ref()
            .and_then(|d| d.callchain.as_ref())
            .and_then(|c| c.iter().filter_map(|e| e.source.clone()).nth(index));
        let Some(link) = link else {
            return;
        };
        match self.viewer.open_code(&link.file, link.line) {
            Ok(fetch) => {
                self.fetch(fetch);
                self.sync_focus();
                self.window_scroll = link.line.saturating_sub(5) as f64 * CODE_ROW_PX;
            }
            Err(err) => self.status.push(err.to_string()),
        }
    }

    fn export(&mut self) {
        let Some(id) = self.focus.clone() else {
            return;
        };
        let path = format!("{id}.svg");
        let written = self
            .viewer
            .export_svg(&id)
            .map_err(anyhow::Error::from)
            .and_then(|svg| Ok(std::fs::write(&path, svg)?));
        match written {
            Ok(()) => self.status.push(format!("wrote {path}")),
            Err(err) => self.status.push(err.to_string()),
        }
    }

    fn zoom_timeline(&mut self, factor: f64) {
        let (start, end) = self.view;
        let center = (start + end) / 2.0;
        let half = ((end - start) * factor / 2.0).min((self.full.1 - self.full.0) / 2.0);
        self.view = (center - half, center + half);
        self.pan_timeline(0.0);
    }

    fn pan_timeline(&mut self, fraction: f64) {
        let (start, end) = self.view;
        let span = end - start;
        let start = (start + span * fraction).clamp(self.full.0, (self.full.1 - span).max(self.full.0));
        self.view = (start, start + span);
    }

    /// Returns false to quit.
    fn on_key(&mut self, key: KeyEvent) -> bool {
        if let Some(input) = self.input.take() {
            self.on_input(input, key.code);
            return true;
        }
        let window = self.focus.clone();
        match (key.code, self.focused_kind(), window) {
            (KeyCode::Char('q'), _, _) => return false,
            (KeyCode::Esc, _, _) => {
                self.details = None;
                self.status.clear();
            }
            (KeyCode::Up, _, _) => self.selected = self.selected.saturating_sub(1),
            (KeyCode::Down, _, _) => {
                self.selected = (self.selected + 1).min(self.group_count().saturating_sub(1));
            }
            (KeyCode::PageDown, _, _) => self.window_scroll += 10.0 * FLAME_ROW_PX,
            (KeyCode::PageUp, _, _) => {
                self.window_scroll = (self.window_scroll - 10.0 * FLAME_ROW_PX).max(0.0);
            }
            (KeyCode::Left, _, _) => self.pan_timeline(-0.1),
            (KeyCode::Right, _, _) => self.pan_timeline(0.1),
            (KeyCode::Char('+') | KeyCode::Char('='), _, _) => self.zoom_timeline(1.0 / 1.3),
            (KeyCode::Char('-'), _, _) => self.zoom_timeline(1.3),
            (KeyCode::Enter, _, _) => self.show_details(),
            (KeyCode::Char('f'), _, _) => self.open(FLAME_GRAPHS),
            (KeyCode::Char('r'), _, _) => self.open(ROOFLINE),
            (KeyCode::Char('T'), _, _) => self.input = Some(Input::FlameThreshold(String::new())),
            (KeyCode::Char('W'), _, _) => self.input = Some(Input::DiffThreshold(String::new())),
            (KeyCode::Char(c @ '0'..='9'), None, _) => {
                self.open_source(c.to_digit(10).map_or(0, |d| d as usize));
            }
            (KeyCode::Tab, _, _) => self.cycle_focus(),
            (KeyCode::Char('x'), _, Some(id)) => {
                self.viewer.close_window(&id);
                self.sync_focus();
            }
            (KeyCode::Char('c'), _, Some(id)) => {
                self.viewer.windows_mut().toggle_collapsed(&id);
            }
            (KeyCode::Char('e'), Some(PanelKind::FlameGraphs | PanelKind::Roofline), _) => {
                self.export();
            }
            (KeyCode::Char('/'), Some(PanelKind::FlameGraphs), _) => {
                self.input = Some(Input::Search(String::new()));
            }
            (KeyCode::Char('t'), Some(PanelKind::FlameGraphs), Some(id)) => {
                let on = self.flame_time_ordered(&id);
                let result = self.viewer.flame_graph_time_ordered(&id, !on);
                self.report(result);
            }
            (KeyCode::Char('m'), Some(PanelKind::FlameGraphs), Some(id)) => {
                self.next_metric(&id);
            }
            (KeyCode::Char('z'), Some(PanelKind::FlameGraphs), Some(id)) => {
                let result = self.viewer.flame_graph_reset_zoom(&id);
                self.report(result);
            }
            (KeyCode::Char(c @ '1'..='9'), Some(PanelKind::Roofline), Some(id)) => {
                let index = c.to_digit(10).map_or(0, |d| d as usize - 1);
                let result = self.viewer.roofline_select_model(&id, index).map(|_| ());
                self.report(result);
            }
            (KeyCode::Char(c), Some(PanelKind::Roofline), Some(id)) => {
                let bound = match c {
                    'a' => Some(Bound::L1),
                    's' => Some(Bound::L2),
                    'd' => Some(Bound::L3),
                    'g' => Some(Bound::Dram),
                    'p' => Some(Bound::Fp),
                    _ => None,
                };
                if let Some(bound) = bound {
                    let result = self.viewer.roofline_toggle(&id, bound);
                    self.report(result);
                }
            }
            _ => {}
        }
        true
    }

    fn on_input(&mut self, input: Input, code: KeyCode) {
        let (mut text, kind) = match input {
            Input::Search(t) => (t, 0),
            Input::FlameThreshold(t) => (t, 1),
            Input::DiffThreshold(t) => (t, 2),
        };
        match code {
            KeyCode::Esc => return,
            KeyCode::Enter => {
                match (kind, self.focus.clone()) {
                    (0, Some(id)) => {
                        let result = self.viewer.flame_graph_search(&id, &text).map(|_| ());
                        self.report(result);
                    }
                    (1, _) => self
                        .viewer
                        .set_flame_graph_threshold(profview_core::config::parse_percentage(&text)),
                    (2, _) => self
                        .viewer
                        .set_runtime_diff_threshold(profview_core::config::parse_percentage(&text)),
                    _ => {}
                }
                return;
            }
            KeyCode::Backspace => {
                text.pop();
            }
            KeyCode::Char(c) => text.push(c),
            _ => {}
        }
        self.input = Some(match kind {
            0 => Input::Search(text),
            1 => Input::FlameThreshold(text),
            _ => Input::DiffThreshold(text),
        });
    }

    fn flame_time_ordered(&self, id: &str) -> bool {
        match self.viewer.windows().get(id).map(|w| &w.data) {
            Some(PanelData::FlameGraphs(panel)) => panel.time_ordered(),
            _ => false,
        }
    }

    fn next_metric(&mut self, id: &str) {
        let next = match self.viewer.windows().get(id).map(|w| &w.data) {
            Some(PanelData::FlameGraphs(panel)) => {
                let metrics = panel.metrics();
                let at = metrics.iter().position(|m| m == panel.metric()).unwrap_or(0);
                metrics.get((at + 1) % metrics.len().max(1)).cloned()
            }
            _ => None,
        };
        if let Some(metric) = next {
            let result = self.viewer.flame_graph_metric(id, &metric);
            self.report(result);
        }
    }

    fn on_click(&mut self, col: u16, row: u16) {
        let Some((area, scale, top, commands)) = &self.painted else {
            return;
        };
        if col < area.x || row < area.y || col >= area.x + area.width || row >= area.y + area.height {
            return;
        }
        let at = Point::new(
            (f64::from(col - area.x) + 0.5) * scale.px_per_col,
            f64::from(row - area.y) * scale.px_per_row + top + 1.0,
        );
        let Some(frame_id) = hit_test(commands, at) else {
            return;
        };
        if let Some(id) = self.focus.clone()
            && self.focused_kind() == Some(PanelKind::FlameGraphs)
        {
            let result = self.viewer.flame_graph_click(&id, frame_id).map(|_| ());
            self.report(result);
        }
    }

    fn draw(&mut self, frame: &mut ratatui::Frame) {
        let area = frame.area();
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(4),
                Constraint::Length(1),
            ])
            .split(area);

        let session = self
            .viewer
            .sessions()
            .current()
            .map(|s| s.label.clone())
            .unwrap_or_default();
        let header = Block::default()
            .title(format!(
                " profview: {session} | ↑↓ thread | Enter details | f flame | r roofline | Tab window | q quit "
            ))
            .style(Style::default().fg(Color::White).bg(Color::DarkGray));
        frame.render_widget(header, rows[0]);

        let has_window = self
            .focus
            .as_deref()
            .is_some_and(|id| self.viewer.windows().get(id).is_some());
        let main = if has_window {
            Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
                .split(rows[1])
        } else {
            Layout::default()
                .constraints([Constraint::Percentage(100)])
                .split(rows[1])
        };

        self.draw_timeline(frame, main[0]);
        if has_window {
            self.draw_window(frame, main[1]);
        } else {
            self.painted = None;
        }
        if self.details.is_some() {
            self.draw_details(frame, main[0]);
        }

        let status = match &self.input {
            Some(Input::Search(t)) => format!("search: {t}"),
            Some(Input::FlameThreshold(t)) => format!("flame graph threshold %: {t}"),
            Some(Input::DiffThreshold(t)) => format!("runtime warning threshold %: {t}"),
            None => self.status.last().cloned().unwrap_or_default(),
        };
        frame.render_widget(
            Paragraph::new(status).style(Style::default().fg(Color::Yellow)),
            rows[2],
        );
    }

    fn draw_timeline(&mut self, frame: &mut ratatui::Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!(" timeline {:.1}–{:.1} ms ", self.view.0, self.view.1));
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let visible = usize::from(inner.height);
        if self.selected < self.scroll {
            self.scroll = self.selected;
        } else if visible > 0 && self.selected >= self.scroll + visible {
            self.scroll = self.selected + 1 - visible;
        }
        let top = self.scroll as f64 * TIMELINE_ROW_PX;
        let viewport = Viewport {
            y: top,
            ..Viewport::new(
                f64::from(inner.width) * COL_PX,
                f64::from(inner.height) * TIMELINE_ROW_PX,
            )
        };
        let commands = self.viewer.render_timeline(&viewport, self.view.0, self.view.1);
        let scale = Scale {
            px_per_col: COL_PX,
            px_per_row: TIMELINE_ROW_PX,
        };
        paint(frame.buffer_mut(), inner, &commands, scale, top);

        let row = self.selected as i64 - self.scroll as i64;
        Canvas::new(inner).put(frame.buffer_mut(), 0, row, "▶", Color::Cyan, None);
    }

    fn draw_window(&mut self, frame: &mut ratatui::Frame, area: Rect) {
        let Some(id) = self.focus.clone() else {
            return;
        };
        let Some(window) = self.viewer.windows().get(&id) else {
            return;
        };
        let title = format!(" {} ", window.title);
        let kind = window.kind;
        let (content_w, content_h) = window.content_size();
        let block = Block::default().borders(Borders::ALL).title(title);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let commands = match self.viewer.render_panel(&id) {
            Ok(commands) => commands,
            Err(err) => {
                warn!(window = %id, "render failed: {err}");
                return;
            }
        };
        let px_per_col = content_w / f64::from(inner.width.max(1));
        let px_per_row = match kind {
            PanelKind::FlameGraphs => FLAME_ROW_PX,
            PanelKind::Code => CODE_ROW_PX,
            PanelKind::Roofline => content_h / f64::from(inner.height.max(1)),
        };
        let scale = Scale {
            px_per_col,
            px_per_row,
        };
        let top = if kind == PanelKind::Roofline {
            0.0
        } else {
            self.window_scroll
        };
        paint(frame.buffer_mut(), inner, &commands, scale, top);

        if let Some(PanelData::Roofline(panel)) = self.viewer.windows().get(&id).map(|w| &w.data) {
            let mut lines: Vec<String> = panel
                .model_names()
                .iter()
                .enumerate()
                .map(|(i, name)| format!("{}: {name}", i + 1))
                .collect();
            lines.push(panel.bound_labels().join("  "));
            if let Some(details) = panel.details() {
                lines.extend(details.into_iter().map(|(k, v)| format!("{k}: {v}")));
            }
            for (row, line) in lines.iter().enumerate() {
                let col = i64::from(inner.width) - 40;
                Canvas::new(inner).put(frame.buffer_mut(), col, row as i64, line, Color::Gray, None);
            }
        }
        self.painted = Some((inner, scale, top, commands));
    }

    fn draw_details(&self, frame: &mut ratatui::Frame, area: Rect) {
        let Some(details) = &self.details else {
            return;
        };
        let width = (area.width / 2).max(30).min(area.width);
        let popup = Rect::new(area.x + area.width - width, area.y, width, area.height);
        let mut text = vec![details.runtime.clone()];
        if let Some(warning) = &details.warning {
            text.push(format!(
                "Sampled runtime differs by {}% (threshold {}%)",
                warning.sampled_diff_pct, warning.threshold_pct
            ));
        }
        if let Some(chain) = &details.callchain {
            text.push("Start callchain:".to_string());
            let mut link = 0;
            for entry in chain {
                let hint = entry.hint.as_deref().unwrap_or("");
                let key = if entry.source.is_some() {
                    link += 1;
                    format!("[{}] ", link - 1)
                } else {
                    String::new()
                };
                text.push(format!("  {key}{} {hint}", entry.text));
            }
        }
        text.push(String::new());
        for item in &details.menu {
            text.push(format!("• {}", item.title));
        }
        frame.render_widget(Clear, popup);
        frame.render_widget(
            Paragraph::new(text.join("\n"))
                .wrap(Wrap { trim: false })
                .block(Block::default().borders(Borders::ALL).title(format!(" {} ", details.label))),
            popup,
        );
    }
}

pub fn run(viewer: Viewer, backend: HttpBackend, status: Vec<String>) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend_term = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend_term)?;

    let mut app = App::new(viewer, backend, status);
    let outcome = event_loop(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    outcome
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app: &mut App,
) -> Result<()> {
    loop {
        terminal.draw(|frame| app.draw(frame))?;

        if event::poll(Duration::from_millis(100))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if !app.on_key(key) {
                        return Ok(());
                    }
                }
                Event::Mouse(mouse) => match mouse.kind {
                    MouseEventKind::Down(MouseButton::Left) => app.on_click(mouse.column, mouse.row),
                    MouseEventKind::ScrollDown => app.window_scroll += FLAME_ROW_PX,
                    MouseEventKind::ScrollUp => {
                        app.window_scroll = (app.window_scroll - FLAME_ROW_PX).max(0.0);
                    }
                    _ => {}
                },
                _ => {}
            }
        }
    }
}
