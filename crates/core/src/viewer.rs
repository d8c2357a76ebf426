//! The viewer as a whole: sessions, windows and every user action.
//!
//! Actions that need the server return a [`Fetch`]. The host posts its
//! request, then hands the reply back through [`Viewer::complete`], which may
//! ask for the next fetch. [`Viewer::drive`] does this loop against a
//! blocking [`Backend`].

use std::sync::Arc;

use profview_protocol::{
    CallchainFrame, CallchainMappings, FlameGraphSet, Point, RenderCommand, Request, TextAlign,
    ThemeToken, Viewport,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{Backend, FetchError};
use crate::config::{ViewerConfig, sanitize_percentage};
use crate::error::{Error, Result};
use crate::flamegraph::{ClickOutcome, FlameGraphPanel, SearchSummary};
use crate::roofline::{Bound, RooflinePanel};
use crate::session::{Notice, SessionState, SessionStore, Step};
use crate::svg::render_svg;
use crate::timeline::{FlattenOptions, FlattenedTree};
use crate::window::{CodePanel, PanelData, PanelKind, WindowManager};

pub const FLAME_GRAPHS: &str = "flame_graphs";
pub const ROOFLINE: &str = "roofline";

const FLAME_GRAPH_NOTICE: &str = "Could not load the flame graphs!";
const ROOFLINE_NOTICE: &str = "Could not load the roofline model!";

type Reply = std::result::Result<String, FetchError>;

/// What a pending request is for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "for", rename_all = "snake_case")]
pub enum FetchToken {
    Load(crate::session::LoadTicket),
    FlameGraphs {
        window: String,
        group: String,
        threshold_pct: f64,
    },
    Analysis {
        window: String,
        analysis: String,
    },
    Source {
        file: String,
        line: u64,
    },
}

/// A request the host has to post to `<server>/<session>/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fetch {
    pub token: FetchToken,
    pub session: String,
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLink {
    pub file: String,
    pub line: u64,
}

/// One resolved frame of a start callchain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallchainEntry {
    pub text: String,
    /// `file:line` when the source is known, `map+offset` otherwise.
    pub hint: Option<String>,
    /// Set when the file can be previewed.
    pub source: Option<SourceLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub analysis: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledWarning {
    /// Relative difference in percent, two decimals.
    pub sampled_diff_pct: String,
    pub threshold_pct: f64,
}

/// Context menu contents of a timeline group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadDetails {
    pub group: String,
    pub label: String,
    /// `None` for the root process.
    pub callchain: Option<Vec<CallchainEntry>>,
    pub runtime: String,
    pub warning: Option<SampledWarning>,
    pub menu: Vec<MenuItem>,
}

pub struct Viewer {
    config: ViewerConfig,
    sessions: SessionStore,
    windows: WindowManager,
    notices: Vec<Notice>,
    screen: (f64, f64),
}

impl Viewer {
    pub fn new(config: ViewerConfig) -> Self {
        let sessions = SessionStore::new(config.reselect_policy, FlattenOptions::from(&config));
        Self {
            config,
            sessions,
            windows: WindowManager::new(),
            notices: Vec::new(),
            screen: (1280.0, 800.0),
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn windows(&self) -> &WindowManager {
        &self.windows
    }

    pub fn windows_mut(&mut self) -> &mut WindowManager {
        &mut self.windows
    }

    pub fn set_screen_size(&mut self, width: f64, height: f64) {
        self.screen = (width, height);
    }

    /// Threshold used for flame graphs opened from now on.
    pub fn set_flame_graph_threshold(&mut self, pct: f64) {
        self.config.flame_graph_threshold_pct = sanitize_percentage(pct);
    }

    /// Warnings are re-evaluated against this on the next query.
    pub fn set_runtime_diff_threshold(&mut self, pct: f64) {
        self.config.runtime_diff_threshold_pct = sanitize_percentage(pct);
        self.sessions.set_options(FlattenOptions::from(&self.config));
    }

    /// Pending user-facing messages, oldest first.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        let mut notices = self.sessions.take_notices();
        notices.append(&mut self.notices);
        notices
    }

    pub fn timeline(&self) -> Option<&FlattenedTree> {
        self.sessions.current().map(|s| &s.timeline)
    }

    pub fn render_timeline(&self, viewport: &Viewport, start: f64, end: f64) -> Vec<RenderCommand> {
        self.timeline()
            .map(|t| t.render(viewport, start, end, self.config.runtime_diff_threshold_pct))
            .unwrap_or_default()
    }

    pub fn select_session(&mut self, session: &str, label: &str) -> Option<Fetch> {
        Self::fetch_for_step(self.sessions.select(session, label))
    }

    fn fetch_for_step(step: Step) -> Option<Fetch> {
        match step {
            Step::Fetch { ticket, request } => Some(Fetch {
                session: ticket.session.clone(),
                token: FetchToken::Load(ticket),
                request,
            }),
            Step::Ready { .. } | Step::Failed { .. } | Step::Discarded => None,
        }
    }

    /// Hand over the reply to `fetch`.
    pub fn complete(&mut self, fetch: &Fetch, reply: Reply) -> Option<Fetch> {
        match &fetch.token {
            FetchToken::Load(ticket) => Self::fetch_for_step(self.sessions.advance(ticket, reply)),
            FetchToken::FlameGraphs {
                window,
                group,
                threshold_pct,
            } => {
                self.complete_flame_graphs(&fetch.session, window, group, *threshold_pct, reply);
                None
            }
            FetchToken::Analysis { window, analysis } => {
                self.complete_analysis(&fetch.session, window, analysis, reply);
                None
            }
            FetchToken::Source { file, line } => {
                self.complete_source(&fetch.session, file, *line, reply);
                None
            }
        }
    }

    /// Run fetches against a blocking backend until nothing is pending.
    pub fn drive(&mut self, backend: &mut impl Backend, mut next: Option<Fetch>) {
        while let Some(fetch) = next {
            debug!(session = %fetch.session, request = ?fetch.request, "posting");
            let reply = backend.post(&fetch.session, &fetch.request);
            next = self.complete(&fetch, reply);
        }
    }

    fn current_session(&self) -> Result<String> {
        self.sessions
            .current_id()
            .map(str::to_string)
            .ok_or(Error::NoSession)
    }

    /// Context menu of a timeline group.
    pub fn thread_details(&mut self, group: &str, always_ms: bool) -> Result<ThreadDetails> {
        let threshold_pct = self.config.runtime_diff_threshold_pct;
        let session = self.current_session()?;
        let state = self.sessions.get_mut(&session).ok_or(Error::NoSession)?;

        let label = state
            .timeline
            .labels
            .get(group)
            .cloned()
            .ok_or_else(|| Error::UnknownGroup(group.to_string()))?;
        let frames = state.timeline.callchains.get(group).cloned();
        let callchain = frames.map(|frames| {
            frames
                .iter()
                .map(|frame| callchain_entry(state, frame))
                .collect()
        });

        let runtime = state
            .timeline
            .tooltips
            .get(group)
            .map(|t| t.render(always_ms))
            .unwrap_or_default();
        let warning = state
            .timeline
            .sampled_diff(group)
            .filter(|_| state.timeline.is_flagged(group, threshold_pct))
            .map(|diff| SampledWarning {
                sampled_diff_pct: format!("{:.2}", diff * 100.0),
                threshold_pct,
            });

        let mut menu = Vec::new();
        if let Some(metrics) = state.timeline.metrics.get(group) {
            let mut flame_graphs_listed = false;
            for (key, info) in metrics {
                if info.flame_graph {
                    if !flame_graphs_listed {
                        flame_graphs_listed = true;
                        menu.push(MenuItem {
                            analysis: FLAME_GRAPHS.to_string(),
                            title: "Flame graphs".to_string(),
                        });
                    }
                } else {
                    menu.push(MenuItem {
                        analysis: key.clone(),
                        title: info.title.clone(),
                    });
                }
            }
        }

        Ok(ThreadDetails {
            group: group.to_string(),
            label,
            callchain,
            runtime,
            warning,
            menu,
        })
    }

    /// Session-wide analyses of the current session.
    pub fn general_analyses(&self) -> Vec<MenuItem> {
        self.timeline()
            .map(|t| {
                t.general_metrics
                    .iter()
                    .map(|(key, info)| MenuItem {
                        analysis: key.clone(),
                        title: info.title.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Open the window behind a menu item.
    pub fn open_analysis(
        &mut self,
        analysis: &str,
        group: Option<&str>,
        at: Point,
    ) -> Result<(String, Option<Fetch>)> {
        match (analysis, group) {
            (FLAME_GRAPHS, Some(group)) => self.open_flame_graphs(group, at),
            (ROOFLINE, _) => self.open_roofline(at),
            _ => {
                warn!(analysis, group, "no panel for this analysis, nothing opened");
                Err(Error::UnknownAnalysis(analysis.to_string()))
            }
        }
    }

    pub fn open_flame_graphs(&mut self, group: &str, at: Point) -> Result<(String, Option<Fetch>)> {
        let session = self.current_session()?;
        let state = self.sessions.get(&session).ok_or(Error::NoSession)?;
        let item = state
            .timeline
            .labels
            .get(group)
            .ok_or_else(|| Error::UnknownGroup(group.to_string()))?;
        let title = format!("[Session: {}] Flame graphs for {item}", state.label);
        let threshold_pct = self.config.flame_graph_threshold_pct;
        let cached = state.cached_flame_graphs(group, threshold_pct);

        let id = self
            .windows
            .open(PanelKind::FlameGraphs, &session, Some(group), title, at);
        match cached {
            Some(set) => {
                debug!(group, threshold_pct, "flame graphs from cache");
                self.install_flame_graphs(&session, &id, group, set);
                Ok((id, None))
            }
            None => {
                let fetch = Fetch {
                    token: FetchToken::FlameGraphs {
                        window: id.clone(),
                        group: group.to_string(),
                        threshold_pct,
                    },
                    session,
                    request: SessionState::flame_graph_request(group, &self.config),
                };
                Ok((id, Some(fetch)))
            }
        }
    }

    fn install_flame_graphs(&mut self, session: &str, window: &str, group: &str, set: Arc<FlameGraphSet>) {
        let (Some(entry), Some(state)) = (self.windows.get_mut(window), self.sessions.get_mut(session))
        else {
            return;
        };
        entry.data = if set.metric(FlameGraphSet::WALLTIME).is_some() {
            let (width, _) = entry.content_size();
            PanelData::FlameGraphs(FlameGraphPanel::new(group, set, width, state))
        } else {
            PanelData::NoFlameGraph
        };
    }

    fn complete_flame_graphs(
        &mut self,
        session: &str,
        window: &str,
        group: &str,
        threshold_pct: f64,
        reply: Reply,
    ) {
        let Some(state) = self.sessions.get_mut(session) else {
            return;
        };
        let stored = reply
            .map_err(Error::from)
            .and_then(|body| Ok(state.store_flame_graphs(group, threshold_pct, &body)?));
        match stored {
            Ok(set) => self.install_flame_graphs(session, window, group, set),
            Err(err) => {
                warn!(session, group, "flame graphs unavailable: {err}");
                self.notices.push(Notice::warning(FLAME_GRAPH_NOTICE));
                if let Some(entry) = self.windows.get_mut(window) {
                    entry.data = PanelData::NoFlameGraph;
                }
            }
        }
    }

    pub fn open_roofline(&mut self, at: Point) -> Result<(String, Option<Fetch>)> {
        let session = self.current_session()?;
        let state = self.sessions.get(&session).ok_or(Error::NoSession)?;
        let title = format!("[Session: {}] Cache-aware roofline model", state.label);
        let cached = state.cached_roofline(ROOFLINE);

        let id = self
            .windows
            .open(PanelKind::Roofline, &session, None, title, at);
        match cached {
            Some(payload) => {
                self.install_roofline(&id, payload);
                Ok((id, None))
            }
            None => {
                let fetch = Fetch {
                    token: FetchToken::Analysis {
                        window: id.clone(),
                        analysis: ROOFLINE.to_string(),
                    },
                    session,
                    request: Request::GeneralAnalysis {
                        analysis: ROOFLINE.to_string(),
                    },
                };
                Ok((id, Some(fetch)))
            }
        }
    }

    fn install_roofline(&mut self, window: &str, payload: Arc<profview_protocol::RooflinePayload>) {
        if let Some(entry) = self.windows.get_mut(window) {
            let (w, h) = entry.content_size();
            entry.data = PanelData::Roofline(RooflinePanel::new(payload, w - 10.0, h - 10.0));
        }
    }

    fn complete_analysis(
        &mut self,
        session: &str,
        window: &str,
        analysis: &str,
        reply: Reply,
    ) {
        let Some(state) = self.sessions.get_mut(session) else {
            return;
        };
        let stored = reply
            .map_err(Error::from)
            .and_then(|body| Ok(state.store_roofline(analysis, &body)?));
        match stored {
            Ok(payload) => self.install_roofline(window, payload),
            Err(err) => {
                warn!(session, analysis, "analysis unavailable: {err}");
                self.notices.push(Notice::warning(ROOFLINE_NOTICE));
                self.windows.close(window);
            }
        }
    }

    /// Preview `file` around `line`. The window opens once the source is in.
    pub fn open_code(&mut self, file: &str, line: u64) -> Result<Option<Fetch>> {
        let session = self.current_session()?;
        let state = self.sessions.get(&session).ok_or(Error::NoSession)?;
        if let Some(code) = state.cached_source(file) {
            self.install_code(&session, file, line, code);
            return Ok(None);
        }
        let request = state
            .source_request(file)
            .ok_or_else(|| Error::NoSource(file.to_string()))?;
        Ok(Some(Fetch {
            token: FetchToken::Source {
                file: file.to_string(),
                line,
            },
            session,
            request,
        }))
    }

    fn install_code(&mut self, session: &str, file: &str, line: u64, code: Arc<str>) {
        let Some(state) = self.sessions.get(session) else {
            return;
        };
        let title = format!("[Session: {}] Code preview", state.label);
        let at = Point::new(self.screen.0 / 2.0 - 375.0, self.screen.1 / 2.0 - 275.0);
        let id = self.windows.open(PanelKind::Code, session, None, title, at);
        if let Some(entry) = self.windows.get_mut(&id) {
            entry.data = PanelData::Code(CodePanel::exact(file, line, code));
        }
    }

    fn complete_source(
        &mut self,
        session: &str,
        file: &str,
        line: u64,
        reply: Reply,
    ) {
        match reply {
            Ok(body) => {
                let Some(state) = self.sessions.get_mut(session) else {
                    return;
                };
                let code = state.store_source(file, body);
                self.install_code(session, file, line, code);
            }
            Err(err) => debug!(session, file, "source unavailable: {err}"),
        }
    }

    pub fn close_window(&mut self, window: &str) -> bool {
        self.windows.close(window).is_some()
    }

    fn flame_panel(&mut self, window: &str) -> Result<(&mut FlameGraphPanel, &mut SessionState)> {
        let entry = self
            .windows
            .get_mut(window)
            .ok_or_else(|| Error::UnknownWindow(window.to_string()))?;
        let state = self
            .sessions
            .get_mut(&entry.session)
            .ok_or(Error::NoSession)?;
        match &mut entry.data {
            PanelData::FlameGraphs(panel) => Ok((panel, state)),
            _ => Err(Error::WrongPanel {
                window: window.to_string(),
                expected: FLAME_GRAPHS,
            }),
        }
    }

    pub fn flame_graph_click(&mut self, window: &str, frame_id: u64) -> Result<ClickOutcome> {
        let (panel, state) = self.flame_panel(window)?;
        Ok(panel.click(frame_id, state))
    }

    pub fn flame_graph_reset_zoom(&mut self, window: &str) -> Result<()> {
        let (panel, _) = self.flame_panel(window)?;
        panel.reset_zoom();
        Ok(())
    }

    pub fn flame_graph_metric(&mut self, window: &str, metric: &str) -> Result<()> {
        let (panel, state) = self.flame_panel(window)?;
        panel.set_metric(metric, state);
        Ok(())
    }

    pub fn flame_graph_time_ordered(&mut self, window: &str, time_ordered: bool) -> Result<()> {
        let (panel, state) = self.flame_panel(window)?;
        panel.set_time_ordered(time_ordered, state);
        Ok(())
    }

    pub fn flame_graph_search(&mut self, window: &str, query: &str) -> Result<Option<SearchSummary>> {
        let (panel, _) = self.flame_panel(window)?;
        Ok(panel.search(query))
    }

    fn roofline_panel(&mut self, window: &str) -> Result<&mut RooflinePanel> {
        let entry = self
            .windows
            .get_mut(window)
            .ok_or_else(|| Error::UnknownWindow(window.to_string()))?;
        match &mut entry.data {
            PanelData::Roofline(panel) => Ok(panel),
            _ => Err(Error::WrongPanel {
                window: window.to_string(),
                expected: ROOFLINE,
            }),
        }
    }

    pub fn roofline_select_model(&mut self, window: &str, index: usize) -> Result<bool> {
        Ok(self.roofline_panel(window)?.select_model(index))
    }

    pub fn roofline_toggle(&mut self, window: &str, bound: Bound) -> Result<()> {
        self.roofline_panel(window)?.toggle(bound);
        Ok(())
    }

    /// Body of a window in its own coordinates, below the header.
    pub fn render_panel(&self, window: &str) -> Result<Vec<RenderCommand>> {
        let entry = self
            .windows
            .get(window)
            .ok_or_else(|| Error::UnknownWindow(window.to_string()))?;
        if entry.collapsed {
            return Ok(Vec::new());
        }
        let (w, h) = entry.content_size();
        let message = |text: &str| {
            vec![RenderCommand::DrawText {
                position: Point::new(w / 2.0, 24.0),
                text: text.into(),
                color: ThemeToken::TextMuted,
                font_size: 13.0,
                align: TextAlign::Center,
            }]
        };
        Ok(match &entry.data {
            PanelData::Loading => message("Loading..."),
            PanelData::NoFlameGraph => message("No flame graph available."),
            PanelData::FlameGraphs(panel) => {
                panel.render(&Viewport::new(w, h.max(panel.content_height())))
            }
            PanelData::Roofline(panel) if panel.selected().is_none() => {
                message("Please select a roofline type first.")
            }
            PanelData::Roofline(panel) => panel.render(),
            PanelData::Code(panel) => panel.render(&Viewport::new(w, h)),
        })
    }

    /// Standalone SVG of a flame graph or roofline window.
    pub fn export_svg(&self, window: &str) -> Result<String> {
        let entry = self
            .windows
            .get(window)
            .ok_or_else(|| Error::UnknownWindow(window.to_string()))?;
        let (width, height) = match &entry.data {
            PanelData::FlameGraphs(panel) => (panel.width(), panel.content_height()),
            PanelData::Roofline(panel) => panel.size(),
            _ => {
                return Err(Error::WrongPanel {
                    window: window.to_string(),
                    expected: FLAME_GRAPHS,
                });
            }
        };
        Ok(render_svg(&self.render_panel(window)?, width, height))
    }
}

fn callchain_entry(state: &mut SessionState, frame: &CallchainFrame) -> CallchainEntry {
    let symbol = state
        .callchains
        .as_ref()
        .and_then(|c| c.lookup(CallchainMappings::SYSCALL, frame.name()))
        .cloned();
    let Some(symbol) = symbol else {
        return CallchainEntry {
            text: format!(
                "{} (not-yet-loaded or missing callchain dictionary)",
                frame.name()
            ),
            hint: None,
            source: None,
        };
    };

    let text = state.resolver.resolve(symbol.token(), symbol.map_name());
    match state
        .timeline
        .src
        .lookup(CallchainMappings::SYSCALL, symbol.map_name(), frame.offset())
    {
        Some(location) => CallchainEntry {
            text,
            hint: Some(format!("{}:{}", location.file, location.line)),
            source: state
                .timeline
                .src_index
                .contains_key(&location.file)
                .then(|| SourceLink {
                    file: location.file.clone(),
                    line: location.line,
                }),
        },
        None => CallchainEntry {
            text,
            hint: Some(format!("{}+{}", symbol.map_name(), frame.offset())),
            source: None,
        },
    }
}
