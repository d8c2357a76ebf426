//! Per-session state and the sequential session load.
//!
//! Picking a session runs three round trips in a fixed order:
//!
//! ```text
//!   Idle ─▶ FetchingCallchain ─▶ FetchingMaps ─▶ FetchingTree ─▶ Ready
//!                 │ (degraded)        │ (degraded)       └─────────▶ Failed
//!                 └──────────▶────────┘
//! ```
//!
//! Each load is identified by a [`LoadTicket`]; replies carrying a ticket the
//! store no longer tracks are discarded without touching any state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use profview_protocol::{
    AddressRange, CallchainMappings, FlameGraphSet, ProfileNode, Request, RooflinePayload,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{FetchError, PayloadError, decode};
use crate::config::{ReselectPolicy, ViewerConfig};
use crate::resolver::AddressResolver;
use crate::timeline::{FlattenOptions, FlattenedTree, flatten};

pub const CALLCHAIN_NOTICE: &str = "Could not obtain the callchain mappings! You will not get \
     meaningful names when checking any stack traces.";
pub const PERF_MAP_NOTICE: &str = "Could not obtain the perf symbol maps! You will not get \
     meaningful names when checking stack traces e.g. for JIT-ed codes.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// A message for the user, shown modally by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
}

impl Notice {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }
}

/// Why a session load was aborted.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("tree request failed: {0}")]
    Tree(#[from] FetchError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

impl LoadError {
    pub fn notice(&self) -> Notice {
        match self {
            Self::Tree(FetchError::Status(500)) => {
                Notice::error("Could not load the session because of an error on the server side!")
            }
            Self::Tree(FetchError::Status(code)) => {
                Notice::error(format!("Could not load the session! (HTTP code {code})"))
            }
            Self::Tree(FetchError::Transport(_)) => {
                Notice::error("Could not load the session! (HTTP code 0)")
            }
            Self::Payload(_) => Notice::error("Could not load the session! (malformed reply)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPhase {
    Idle,
    FetchingCallchain,
    FetchingMaps,
    FetchingTree,
    Ready,
    Failed,
}

/// Identifies one load of one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoadTicket {
    pub session: String,
    pub generation: u64,
}

/// What the host has to do next for a load.
#[derive(Debug)]
pub enum Step {
    /// Post `request` for `ticket.session` and hand the reply to [`SessionStore::advance`].
    Fetch { ticket: LoadTicket, request: Request },
    /// The session is loaded and current.
    Ready { session: String },
    /// The load was aborted.
    Failed { session: String, error: LoadError },
    /// The reply belonged to a cancelled or unknown load.
    Discarded,
}

/// A cached on-demand result.
#[derive(Debug, Clone)]
pub enum CachedResult {
    FlameGraphs(Arc<FlameGraphSet>),
    Roofline(Arc<RooflinePayload>),
}

/// Everything known about one loaded session.
#[derive(Debug)]
pub struct SessionState {
    pub label: String,
    pub timeline: FlattenedTree,
    /// `None` when the callchain mappings could not be obtained.
    pub callchains: Option<CallchainMappings>,
    pub resolver: AddressResolver,
    result_cache: HashMap<String, CachedResult>,
    src_cache: HashMap<String, Arc<str>>,
}

impl SessionState {
    pub fn new(
        label: impl Into<String>,
        timeline: FlattenedTree,
        callchains: Option<CallchainMappings>,
        resolver: AddressResolver,
    ) -> Self {
        Self {
            label: label.into(),
            timeline,
            callchains,
            resolver,
            result_cache: HashMap::new(),
            src_cache: HashMap::new(),
        }
    }

    /// Name to show for a raw symbol of the given callchain category.
    pub fn display_name(&mut self, category: &str, raw: &str) -> String {
        match self
            .callchains
            .as_ref()
            .and_then(|c| c.lookup(category, raw))
        {
            Some(symbol) => self.resolver.resolve(symbol.token(), symbol.map_name()),
            None => raw.to_string(),
        }
    }

    /// Cache key of a flame graph result; the threshold is the percentage
    /// as entered, not the fraction sent to the server.
    pub fn flame_graph_key(group: &str, threshold_pct: f64) -> String {
        format!("{group}_{threshold_pct}")
    }

    pub fn flame_graph_request(group: &str, config: &ViewerConfig) -> Request {
        let (pid, tid) = group.split_once('_').unwrap_or((group, ""));
        Request::FlameGraphs {
            pid: pid.to_string(),
            tid: tid.to_string(),
            threshold: config.flame_graph_threshold_fraction(),
        }
    }

    pub fn cached_flame_graphs(&self, group: &str, threshold_pct: f64) -> Option<Arc<FlameGraphSet>> {
        match self
            .result_cache
            .get(&Self::flame_graph_key(group, threshold_pct))
        {
            Some(CachedResult::FlameGraphs(set)) => Some(Arc::clone(set)),
            _ => None,
        }
    }

    pub fn store_flame_graphs(
        &mut self,
        group: &str,
        threshold_pct: f64,
        body: &str,
    ) -> Result<Arc<FlameGraphSet>, PayloadError> {
        let set = Arc::new(decode::<FlameGraphSet>("flame graph", body)?);
        self.result_cache.insert(
            Self::flame_graph_key(group, threshold_pct),
            CachedResult::FlameGraphs(Arc::clone(&set)),
        );
        Ok(set)
    }

    pub fn cached_roofline(&self, analysis: &str) -> Option<Arc<RooflinePayload>> {
        match self.result_cache.get(analysis) {
            Some(CachedResult::Roofline(payload)) => Some(Arc::clone(payload)),
            _ => None,
        }
    }

    pub fn store_roofline(
        &mut self,
        analysis: &str,
        body: &str,
    ) -> Result<Arc<RooflinePayload>, PayloadError> {
        let payload = Arc::new(decode::<RooflinePayload>("roofline", body)?);
        self.result_cache
            .insert(analysis.to_string(), CachedResult::Roofline(Arc::clone(&payload)));
        Ok(payload)
    }

    pub fn cached_source(&self, path: &str) -> Option<Arc<str>> {
        self.src_cache.get(path).cloned()
    }

    /// Request for a source file, `None` when the server has no index for it.
    pub fn source_request(&self, path: &str) -> Option<Request> {
        self.timeline
            .src_index
            .get(path)
            .map(|index| Request::Source {
                file_index: index.clone(),
            })
    }

    pub fn store_source(&mut self, path: &str, code: String) -> Arc<str> {
        let code: Arc<str> = Arc::from(code);
        self.src_cache.insert(path.to_string(), Arc::clone(&code));
        code
    }
}

#[derive(Debug)]
struct PendingLoad {
    ticket: LoadTicket,
    label: String,
    phase: LoadPhase,
    callchains: Option<CallchainMappings>,
    resolver: AddressResolver,
}

/// Sessions by id, the current one, and the loads still in flight.
#[derive(Debug)]
pub struct SessionStore {
    sessions: HashMap<String, SessionState>,
    pending: Vec<PendingLoad>,
    current: Option<String>,
    next_generation: u64,
    policy: ReselectPolicy,
    options: FlattenOptions,
    notices: Vec<Notice>,
}

impl SessionStore {
    pub fn new(policy: ReselectPolicy, options: FlattenOptions) -> Self {
        Self {
            sessions: HashMap::new(),
            pending: Vec::new(),
            current: None,
            next_generation: 0,
            policy,
            options,
            notices: Vec::new(),
        }
    }

    pub fn set_options(&mut self, options: FlattenOptions) {
        self.options = options;
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn current(&self) -> Option<&SessionState> {
        self.current.as_ref().and_then(|id| self.sessions.get(id))
    }

    pub fn get(&self, session: &str) -> Option<&SessionState> {
        self.sessions.get(session)
    }

    pub fn get_mut(&mut self, session: &str) -> Option<&mut SessionState> {
        self.sessions.get_mut(session)
    }

    pub fn insert(&mut self, session: impl Into<String>, state: SessionState) {
        self.sessions.insert(session.into(), state);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn phase(&self, session: &str) -> LoadPhase {
        if let Some(load) = self.pending.iter().find(|p| p.ticket.session == session) {
            load.phase
        } else if self.sessions.contains_key(session) {
            LoadPhase::Ready
        } else {
            LoadPhase::Idle
        }
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Select a session. Loaded sessions become current straight away;
    /// others start a load whose first request is returned.
    pub fn select(&mut self, session: &str, label: &str) -> Step {
        match self.policy {
            ReselectPolicy::CancelSuperseded => {
                for load in self.pending.drain(..) {
                    debug!(session = %load.ticket.session, generation = load.ticket.generation, "load cancelled");
                }
            }
            ReselectPolicy::LastWriteWins => {
                self.pending.retain(|p| p.ticket.session != session);
            }
        }

        if self.sessions.contains_key(session) {
            debug!(session, "session already loaded");
            self.current = Some(session.to_string());
            return Step::Ready {
                session: session.to_string(),
            };
        }

        self.next_generation += 1;
        let ticket = LoadTicket {
            session: session.to_string(),
            generation: self.next_generation,
        };
        self.pending.push(PendingLoad {
            ticket: ticket.clone(),
            label: label.to_string(),
            phase: LoadPhase::FetchingCallchain,
            callchains: None,
            resolver: AddressResolver::empty(),
        });
        Step::Fetch {
            ticket,
            request: Request::Callchain,
        }
    }

    /// Feed the reply to the request of `ticket`'s current phase.
    pub fn advance(&mut self, ticket: &LoadTicket, reply: Result<String, FetchError>) -> Step {
        let Some(index) = self.pending.iter().position(|p| &p.ticket == ticket) else {
            debug!(session = %ticket.session, generation = ticket.generation, "stale reply discarded");
            return Step::Discarded;
        };

        match self.pending[index].phase {
            LoadPhase::FetchingCallchain => {
                let callchains = reply
                    .map_err(crate::Error::from)
                    .and_then(|body| Ok(decode::<CallchainMappings>("callchain", &body)?))
                    .and_then(|c| {
                        if c.has_category(CallchainMappings::SYSCALL) {
                            Ok(c)
                        } else {
                            Err(crate::Error::MissingCategory(CallchainMappings::SYSCALL))
                        }
                    });
                let load = &mut self.pending[index];
                match callchains {
                    Ok(c) => load.callchains = Some(c),
                    Err(err) => {
                        warn!(session = %ticket.session, "callchain mappings unavailable: {err}");
                        self.notices.push(Notice::warning(CALLCHAIN_NOTICE));
                    }
                }
                load.phase = LoadPhase::FetchingMaps;
                Step::Fetch {
                    ticket: ticket.clone(),
                    request: Request::PerfMap,
                }
            }
            LoadPhase::FetchingMaps => {
                let resolver = reply
                    .map_err(crate::Error::from)
                    .and_then(|body| {
                        Ok(decode::<BTreeMap<String, Vec<AddressRange>>>("perf map", &body)?)
                    })
                    .and_then(|maps| Ok(AddressResolver::from_perf_maps(&maps)?));
                let load = &mut self.pending[index];
                match resolver {
                    Ok(r) => load.resolver = r,
                    Err(err) => {
                        warn!(session = %ticket.session, "perf symbol maps unavailable: {err}");
                        self.notices.push(Notice::warning(PERF_MAP_NOTICE));
                    }
                }
                load.phase = LoadPhase::FetchingTree;
                Step::Fetch {
                    ticket: ticket.clone(),
                    request: Request::Tree,
                }
            }
            LoadPhase::FetchingTree => {
                let load = self.pending.remove(index);
                let tree = reply
                    .map_err(LoadError::from)
                    .and_then(|body| Ok(decode::<ProfileNode>("tree", &body)?));
                match tree {
                    Ok(root) => {
                        let timeline = flatten(&root, self.options);
                        info!(
                            session = %ticket.session,
                            groups = timeline.groups.len(),
                            items = timeline.items.len(),
                            "session loaded"
                        );
                        self.sessions.insert(
                            ticket.session.clone(),
                            SessionState::new(load.label, timeline, load.callchains, load.resolver),
                        );
                        self.current = Some(ticket.session.clone());
                        Step::Ready {
                            session: ticket.session.clone(),
                        }
                    }
                    Err(error) => {
                        warn!(session = %ticket.session, "session load failed: {error}");
                        self.notices.push(error.notice());
                        Step::Failed {
                            session: ticket.session.clone(),
                            error,
                        }
                    }
                }
            }
            LoadPhase::Idle | LoadPhase::Ready | LoadPhase::Failed => {
                self.pending.remove(index);
                Step::Discarded
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREE: &str = r#"{
        "id": "1_1", "name": "app", "pid_tid": "1/1",
        "start_time": 0, "runtime": 10, "sampled_time": 10,
        "children": [{
            "id": "1_2", "name": "worker", "pid_tid": "1/2",
            "start_time": 1, "runtime": 5, "sampled_time": 5,
            "start_callchain": [["f", 0]]
        }]
    }"#;

    fn store(policy: ReselectPolicy) -> SessionStore {
        SessionStore::new(
            policy,
            FlattenOptions {
                warning_threshold_pct: 10.0,
                offcpu_stride: 0.0,
            },
        )
    }

    fn expect_fetch(step: Step) -> (LoadTicket, Request) {
        match step {
            Step::Fetch { ticket, request } => (ticket, request),
            other => panic!("expected a fetch, got {other:?}"),
        }
    }

    #[test]
    fn phases_follow_fixed_order() {
        let mut store = store(ReselectPolicy::CancelSuperseded);
        let (ticket, req) = expect_fetch(store.select("s1", "Session 1"));
        assert_eq!(req, Request::Callchain);
        assert_eq!(store.phase("s1"), LoadPhase::FetchingCallchain);

        let (_, req) = expect_fetch(store.advance(&ticket, Ok(r#"{"syscall": {}}"#.into())));
        assert_eq!(req, Request::PerfMap);
        assert_eq!(store.phase("s1"), LoadPhase::FetchingMaps);

        let (_, req) = expect_fetch(store.advance(&ticket, Ok("{}".into())));
        assert_eq!(req, Request::Tree);

        assert!(matches!(
            store.advance(&ticket, Ok(TREE.into())),
            Step::Ready { .. }
        ));
        assert_eq!(store.phase("s1"), LoadPhase::Ready);
        assert_eq!(store.current_id(), Some("s1"));
        assert!(store.take_notices().is_empty());
        assert_eq!(store.current().map(|s| s.label.as_str()), Some("Session 1"));
    }

    #[test]
    fn callchain_without_syscall_category_degrades() {
        let mut store = store(ReselectPolicy::CancelSuperseded);
        let (ticket, _) = expect_fetch(store.select("s1", "s1"));
        expect_fetch(store.advance(&ticket, Ok(r#"{"walltime": {}}"#.into())));
        expect_fetch(store.advance(&ticket, Ok("{}".into())));
        store.advance(&ticket, Ok(TREE.into()));

        assert!(store.get("s1").is_some_and(|s| s.callchains.is_none()));
        assert_eq!(store.take_notices(), vec![Notice::warning(CALLCHAIN_NOTICE)]);
    }

    #[test]
    fn tree_failure_notices() {
        let cases = [
            (
                FetchError::Status(500),
                "Could not load the session because of an error on the server side!",
            ),
            (FetchError::Status(404), "Could not load the session! (HTTP code 404)"),
        ];
        for (error, message) in cases {
            let mut store = store(ReselectPolicy::CancelSuperseded);
            let (ticket, _) = expect_fetch(store.select("s1", "s1"));
            expect_fetch(store.advance(&ticket, Ok(r#"{"syscall": {}}"#.into())));
            expect_fetch(store.advance(&ticket, Ok("{}".into())));
            assert!(matches!(
                store.advance(&ticket, Err(error)),
                Step::Failed { .. }
            ));
            assert_eq!(store.take_notices(), vec![Notice::error(message)]);
            assert!(store.get("s1").is_none());
            assert_eq!(store.phase("s1"), LoadPhase::Idle);
            assert_eq!(store.current_id(), None);
        }
    }

    #[test]
    fn superseded_ticket_is_discarded() {
        let mut store = store(ReselectPolicy::CancelSuperseded);
        let (old, _) = expect_fetch(store.select("s1", "s1"));
        let (new, _) = expect_fetch(store.select("s2", "s2"));
        assert_eq!(store.in_flight(), 1);
        assert!(matches!(
            store.advance(&old, Ok(r#"{"syscall": {}}"#.into())),
            Step::Discarded
        ));
        assert_eq!(store.phase("s1"), LoadPhase::Idle);
        assert_eq!(store.phase("s2"), LoadPhase::FetchingCallchain);
        assert_ne!(old, new);
    }

    #[test]
    fn flame_graph_keys_use_percentage() {
        assert_eq!(SessionState::flame_graph_key("10_11", 1.0), "10_11_1");
        assert_eq!(SessionState::flame_graph_key("10_11", 2.5), "10_11_2.5");
        assert_eq!(
            SessionState::flame_graph_request(
                "10_11",
                &ViewerConfig {
                    flame_graph_threshold_pct: 5.0,
                    ..ViewerConfig::default()
                }
            ),
            Request::FlameGraphs {
                pid: "10".into(),
                tid: "11".into(),
                threshold: 0.05,
            }
        );
    }

    #[test]
    fn display_name_falls_back_to_raw() {
        let callchains: CallchainMappings =
            serde_json::from_str(r#"{"syscall": {"f": ["main", "exe"]}}"#).expect("callchains");
        let mut state = SessionState::new(
            "s",
            FlattenedTree::default(),
            Some(callchains),
            AddressResolver::empty(),
        );
        assert_eq!(state.display_name("syscall", "f"), "main");
        assert_eq!(state.display_name("syscall", "g"), "g");
        assert_eq!(state.display_name("walltime", "f"), "f");
    }
}
