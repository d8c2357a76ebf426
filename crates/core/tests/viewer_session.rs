//! Integration test: drive a viewer against a scripted server and check the
//! load sequence, panel lifecycles and result caching end to end.

use std::collections::HashMap;

use profview_core::flamegraph::ClickOutcome;
use profview_core::roofline::Bound;
use profview_core::session::{CALLCHAIN_NOTICE, PERF_MAP_NOTICE};
use profview_core::viewer::FLAME_GRAPHS;
use profview_core::window::PanelData;
use profview_core::{
    Backend, FetchError, FetchToken, LoadPhase, ReselectPolicy, Severity, Viewer, ViewerConfig,
};
use profview_protocol::{Point, RenderCommand, Request};

const TREE: &str = include_str!("fixtures/tree.json");
const CALLCHAIN: &str = include_str!("fixtures/callchain.json");
const PERF_MAP: &str = include_str!("fixtures/perf_map.json");
const FLAME_GRAPHS_BODY: &str = include_str!("fixtures/flame_graphs.json");
const ROOFLINE: &str = include_str!("fixtures/roofline.json");
const SOURCE: &str = "#include <stdio.h>\n\nint main(void) {\n    return solve();\n}\n";

const WORKER: &str = "4210_4211";

/// Answers by the first form field of each request and records every post.
struct ScriptedServer {
    routes: HashMap<&'static str, Result<String, FetchError>>,
    log: Vec<(String, Request)>,
}

impl ScriptedServer {
    fn healthy() -> Self {
        let mut routes = HashMap::new();
        routes.insert("tree", Ok(TREE.to_string()));
        routes.insert("callchain", Ok(CALLCHAIN.to_string()));
        routes.insert("perf_map", Ok(PERF_MAP.to_string()));
        routes.insert("pid", Ok(FLAME_GRAPHS_BODY.to_string()));
        routes.insert("general_analysis", Ok(ROOFLINE.to_string()));
        routes.insert("src", Ok(SOURCE.to_string()));
        Self {
            routes,
            log: Vec::new(),
        }
    }

    fn with(mut self, route: &'static str, reply: Result<String, FetchError>) -> Self {
        self.routes.insert(route, reply);
        self
    }

    fn route(request: &Request) -> &'static str {
        request.form_fields().first().map(|(k, _)| *k).unwrap_or("")
    }

    fn kinds(&self) -> Vec<&'static str> {
        self.log.iter().map(|(_, r)| Self::route(r)).collect()
    }

    fn count(&self, route: &str) -> usize {
        self.kinds().iter().filter(|k| **k == route).count()
    }
}

impl Backend for ScriptedServer {
    fn post(&mut self, session: &str, request: &Request) -> Result<String, FetchError> {
        self.log.push((session.to_string(), request.clone()));
        self.routes
            .get(Self::route(request))
            .cloned()
            .unwrap_or(Err(FetchError::Status(404)))
    }
}

fn loaded(server: &mut ScriptedServer) -> Viewer {
    let mut viewer = Viewer::new(ViewerConfig::default());
    let first = viewer.select_session("s1", "nightly run");
    viewer.drive(server, first);
    viewer
}

fn origin() -> Point {
    Point::new(40.0, 40.0)
}

#[test]
fn load_follows_callchain_maps_tree_order() {
    let mut server = ScriptedServer::healthy();
    let mut viewer = loaded(&mut server);

    assert_eq!(server.kinds(), ["callchain", "perf_map", "tree"]);
    assert!(server.log.iter().all(|(s, _)| s == "s1"));
    assert_eq!(viewer.sessions().phase("s1"), LoadPhase::Ready);
    assert!(viewer.take_notices().is_empty());

    let timeline = viewer.timeline().expect("timeline");
    assert_eq!(timeline.groups.len(), 3);
    assert_eq!(timeline.groups[1].content, "solver-worker (4210/4211)");
    assert_eq!(timeline.groups[1].level, 1);
    assert_eq!(timeline.time_range(), (0.0, 2.0 * 1200.0));
    // one lifetime bar per node plus two off-CPU periods of the worker
    assert_eq!(timeline.items.len(), 5);
}

#[test]
fn reselecting_loaded_session_skips_the_server() {
    let mut server = ScriptedServer::healthy();
    let mut viewer = loaded(&mut server);
    assert!(viewer.select_session("s1", "nightly run").is_none());
    assert_eq!(server.log.len(), 3);
}

#[test]
fn missing_callchain_mappings_degrade_the_load() {
    let mut server = ScriptedServer::healthy().with("callchain", Err(FetchError::Status(404)));
    let mut viewer = loaded(&mut server);

    assert_eq!(server.kinds(), ["callchain", "perf_map", "tree"]);
    let notices = viewer.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].severity, Severity::Warning);
    assert_eq!(notices[0].message, CALLCHAIN_NOTICE);

    let details = viewer.thread_details(WORKER, false).expect("details");
    let chain = details.callchain.expect("callchain");
    assert_eq!(
        chain[0].text,
        "main (not-yet-loaded or missing callchain dictionary)"
    );
    assert!(chain[0].hint.is_none());
}

#[test]
fn malformed_perf_map_leaves_addresses_unresolved() {
    let mut server = ScriptedServer::healthy().with("perf_map", Ok("<html>".to_string()));
    let mut viewer = loaded(&mut server);

    let notices = viewer.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].message, PERF_MAP_NOTICE);

    let chain = viewer
        .thread_details(WORKER, false)
        .expect("details")
        .callchain
        .expect("callchain");
    assert_eq!(chain[1].text, "[0x1010]");
}

#[test]
fn server_error_on_tree_aborts_the_load() {
    let mut server = ScriptedServer::healthy().with("tree", Err(FetchError::Status(500)));
    let mut viewer = loaded(&mut server);

    assert!(viewer.timeline().is_none());
    assert!(viewer.sessions().is_empty());
    let notices = viewer.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].severity, Severity::Error);
    assert_eq!(
        notices[0].message,
        "Could not load the session because of an error on the server side!"
    );
}

#[test]
fn other_tree_failures_report_the_status() {
    let mut server = ScriptedServer::healthy().with("tree", Err(FetchError::Status(404)));
    let mut viewer = loaded(&mut server);
    let notices = viewer.take_notices();
    assert_eq!(notices[0].message, "Could not load the session! (HTTP code 404)");

    let mut server = ScriptedServer::healthy().with("tree", Ok("{\"id\": 3".to_string()));
    let mut viewer = loaded(&mut server);
    let notices = viewer.take_notices();
    assert_eq!(notices[0].message, "Could not load the session! (malformed reply)");
}

#[test]
fn start_callchain_resolves_symbols_and_sources() {
    let mut server = ScriptedServer::healthy();
    let mut viewer = loaded(&mut server);
    let details = viewer.thread_details(WORKER, false).expect("details");

    assert_eq!(details.label, "solver-worker (4210/4211)");
    let chain = details.callchain.expect("callchain");
    assert_eq!(chain.len(), 3);

    assert_eq!(chain[0].text, "main");
    assert_eq!(chain[0].hint.as_deref(), Some("/work/solver/main.c:42"));
    assert_eq!(chain[0].source.as_ref().map(|s| s.line), Some(42));

    assert_eq!(chain[1].text, "Solver::spawn_worker");
    assert_eq!(chain[1].hint.as_deref(), Some("solver-jit+16"));

    // an address in a map the server never sent stays as it is
    assert_eq!(chain[2].text, "[0x7f0000001010]");

    let warning = details.warning.expect("warning");
    assert_eq!(warning.sampled_diff_pct, "33.33");

    let menu: Vec<_> = details.menu.iter().map(|m| m.title.as_str()).collect();
    assert_eq!(menu, ["Off-CPU regions", "Flame graphs"]);

    // no measured runtime, so nothing to compare against
    let io = viewer.thread_details("4210_4212", false).expect("details");
    assert!(io.warning.is_none());
}

#[test]
fn flame_graphs_are_fetched_once_per_threshold() {
    let mut server = ScriptedServer::healthy();
    let mut viewer = loaded(&mut server);

    let (first, fetch) = viewer
        .open_analysis(FLAME_GRAPHS, Some(WORKER), origin())
        .expect("open");
    let fetch = fetch.expect("first open fetches");
    assert_eq!(
        fetch.request,
        Request::FlameGraphs {
            pid: "4210".into(),
            tid: "4211".into(),
            threshold: 0.01,
        }
    );
    viewer.drive(&mut server, Some(fetch));

    let (second, fetch) = viewer.open_flame_graphs(WORKER, origin()).expect("open");
    assert!(fetch.is_none());
    assert_eq!(server.count("pid"), 1);

    assert_eq!(first, "w_s1_flame_graphs_4210_4211_0");
    assert_eq!(second, "w_s1_flame_graphs_4210_4211_1");
    for id in [&first, &second] {
        assert!(matches!(
            viewer.windows().get(id).map(|w| &w.data),
            Some(PanelData::FlameGraphs(_))
        ));
    }

    viewer.set_flame_graph_threshold(5.0);
    let (_, fetch) = viewer.open_flame_graphs(WORKER, origin()).expect("open");
    assert!(matches!(
        fetch.map(|f| f.token),
        Some(FetchToken::FlameGraphs { threshold_pct, .. }) if (threshold_pct - 5.0).abs() < 1e-9
    ));
}

#[test]
fn closing_one_flame_window_keeps_its_sibling() {
    let mut server = ScriptedServer::healthy();
    let mut viewer = loaded(&mut server);

    let (first, fetch) = viewer.open_flame_graphs(WORKER, origin()).expect("open");
    viewer.drive(&mut server, fetch);
    let (second, _) = viewer.open_flame_graphs(WORKER, origin()).expect("open");

    viewer.flame_graph_search(&second, "Solver").expect("search");
    assert!(viewer.close_window(&first));
    assert!(!viewer.close_window(&first));

    assert_eq!(viewer.windows().len(), 1);
    assert_eq!(viewer.windows().focused(), Some(second.as_str()));
    let summary = viewer
        .flame_graph_search(&second, "Solver")
        .expect("search")
        .expect("summary");
    assert_eq!(summary.matches, 1);

    // the freed suffix is handed out again
    let (third, _) = viewer.open_flame_graphs(WORKER, origin()).expect("open");
    assert_eq!(third, first);
}

#[test]
fn flame_graph_interaction() {
    let mut server = ScriptedServer::healthy();
    let mut viewer = loaded(&mut server);
    let (id, fetch) = viewer.open_flame_graphs(WORKER, origin()).expect("open");
    viewer.drive(&mut server, fetch);

    let panel = |viewer: &Viewer| match viewer.windows().get(&id).map(|w| &w.data) {
        Some(PanelData::FlameGraphs(panel)) => panel.clone(),
        _ => panic!("not a flame graph window"),
    };

    assert_eq!(
        panel(&viewer).child_labels(&[]),
        ["Solver::compute", "(compressed)", "idle"]
    );

    // pre-order: all, compute, kernel, (compressed), idle
    assert_eq!(viewer.flame_graph_click(&id, 3).expect("click"), ClickOutcome::Expanded);
    assert_eq!(
        panel(&viewer).child_labels(&[]),
        ["Solver::compute", "io_wait", "idle", "log"]
    );

    assert_eq!(viewer.flame_graph_click(&id, 1).expect("click"), ClickOutcome::Zoomed);
    assert_eq!(panel(&viewer).zoom_path(), [0_usize]);

    let summary = viewer
        .flame_graph_search(&id, "o")
        .expect("search")
        .expect("summary");
    assert_eq!(summary.matches, 3);
    assert!((summary.matched_value - 850.0).abs() < 1e-9);

    viewer.flame_graph_time_ordered(&id, true).expect("toggle");
    assert_eq!(
        panel(&viewer).child_labels(&[]),
        ["idle", "Solver::compute", "io_wait"]
    );
    assert!(panel(&viewer).zoom_path().is_empty());

    let svg = viewer.export_svg(&id).expect("svg");
    assert!(svg.starts_with("<svg"));
    assert!(svg.contains("<title>Solver::compute</title>"));

    viewer.flame_graph_metric(&id, "page-faults").expect("metric");
    assert!(!panel(&viewer).time_ordered());
    assert_eq!(panel(&viewer).metric(), "page-faults");

    let commands = viewer.render_panel(&id).expect("render");
    assert_eq!(RenderCommand::count_rects(&commands), 2);
}

#[test]
fn flame_graph_failure_shows_placeholder() {
    let mut server = ScriptedServer::healthy().with("pid", Err(FetchError::Status(502)));
    let mut viewer = loaded(&mut server);
    let (id, fetch) = viewer.open_flame_graphs(WORKER, origin()).expect("open");
    viewer.drive(&mut server, fetch);

    assert!(matches!(
        viewer.windows().get(&id).map(|w| &w.data),
        Some(PanelData::NoFlameGraph)
    ));
    assert_eq!(
        viewer.take_notices().first().map(|n| n.message.as_str()),
        Some("Could not load the flame graphs!")
    );
    let text = viewer.render_panel(&id).expect("render");
    assert!(text.iter().any(|c| matches!(
        c,
        RenderCommand::DrawText { text, .. } if *text == "No flame graph available."
    )));
}

#[test]
fn roofline_loads_and_plots() {
    let mut server = ScriptedServer::healthy();
    let mut viewer = loaded(&mut server);

    let analyses = viewer.general_analyses();
    assert_eq!(analyses.len(), 1);
    assert_eq!(analyses[0].title, "Cache-aware roofline model");

    let (id, fetch) = viewer
        .open_analysis(&analyses[0].analysis, None, origin())
        .expect("open");
    viewer.drive(&mut server, fetch);
    assert_eq!(server.count("general_analysis"), 1);
    assert_eq!(
        viewer.windows().get(&id).map(|w| w.title.as_str()),
        Some("[Session: nightly run] Cache-aware roofline model")
    );

    assert!(viewer.roofline_select_model(&id, 0).expect("select"));
    assert!(!viewer.roofline_select_model(&id, 7).expect("select"));
    viewer.roofline_toggle(&id, Bound::L1).expect("toggle");

    let Some(PanelData::Roofline(panel)) = viewer.windows().get(&id).map(|w| &w.data) else {
        panic!("not a roofline window");
    };
    assert!(!panel.bounds().is_enabled(Bound::L1));
    assert_eq!(panel.size(), (890.0, 500.0 - 28.0 - 10.0));
    let details = panel.details().expect("details");
    assert_eq!(details[0], ("Precision", "double".to_string()));

    let commands = viewer.render_panel(&id).expect("render");
    assert!(commands.iter().any(|c| matches!(c, RenderCommand::DrawLine { dashed: true, .. })));

    // a second window reuses the cached payload
    let (_, fetch) = viewer.open_roofline(origin()).expect("open");
    assert!(fetch.is_none());
}

#[test]
fn roofline_failure_closes_the_window() {
    let mut server = ScriptedServer::healthy().with("general_analysis", Ok("[]".to_string()));
    let mut viewer = loaded(&mut server);
    let (id, fetch) = viewer.open_roofline(origin()).expect("open");
    assert!(viewer.windows().get(&id).is_some());

    viewer.drive(&mut server, fetch);
    assert!(viewer.windows().get(&id).is_none());
    assert_eq!(
        viewer.take_notices().first().map(|n| n.message.as_str()),
        Some("Could not load the roofline model!")
    );
}

#[test]
fn code_preview_is_fetched_once() {
    let mut server = ScriptedServer::healthy();
    let mut viewer = loaded(&mut server);
    viewer.set_screen_size(1600.0, 1000.0);

    let link = viewer
        .thread_details(WORKER, false)
        .expect("details")
        .callchain
        .and_then(|c| c[0].source.clone())
        .expect("source link");

    let fetch = viewer.open_code(&link.file, link.line).expect("open");
    assert_eq!(
        fetch.as_ref().map(|f| &f.request),
        Some(&Request::Source {
            file_index: "0".into()
        })
    );
    viewer.drive(&mut server, fetch);

    let window = viewer
        .windows()
        .iter()
        .find(|w| w.title == "[Session: nightly run] Code preview")
        .expect("code window");
    assert_eq!((window.geometry.x, window.geometry.y), (425.0, 225.0));
    match &window.data {
        PanelData::Code(panel) => assert_eq!(panel.highlighted_lines(), [42_u64]),
        _ => panic!("not a code window"),
    }

    assert!(viewer.open_code(&link.file, link.line).expect("open").is_none());
    assert_eq!(server.count("src"), 1);
    assert_eq!(viewer.windows().len(), 2);
}

#[test]
fn superseded_load_is_discarded() {
    let mut server = ScriptedServer::healthy();
    let mut viewer = Viewer::new(ViewerConfig::default());

    let stale = viewer.select_session("s1", "first").expect("fetch");
    let fresh = viewer.select_session("s2", "second").expect("fetch");
    assert!(viewer.complete(&stale, Ok(CALLCHAIN.to_string())).is_none());

    viewer.drive(&mut server, Some(fresh));
    assert_eq!(viewer.sessions().current_id(), Some("s2"));
    assert!(viewer.sessions().get("s1").is_none());
    assert_eq!(viewer.sessions().in_flight(), 0);
}

#[test]
fn last_write_wins_keeps_both_loads() {
    let mut server = ScriptedServer::healthy();
    let mut viewer = Viewer::new(ViewerConfig {
        reselect_policy: ReselectPolicy::LastWriteWins,
        ..ViewerConfig::default()
    });

    let first = viewer.select_session("s1", "first");
    let second = viewer.select_session("s2", "second");
    assert_eq!(viewer.sessions().in_flight(), 2);

    viewer.drive(&mut server, second);
    assert_eq!(viewer.sessions().current_id(), Some("s2"));
    viewer.drive(&mut server, first);
    assert_eq!(viewer.sessions().current_id(), Some("s1"));
    assert_eq!(viewer.sessions().len(), 2);
}
