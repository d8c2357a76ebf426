//! Browser bridge. The page owns the DOM and the network: it posts every
//! [`Fetch`] returned here and hands the reply back through [`complete`].
//! Everything crosses the boundary as JSON.

use std::sync::{Mutex, MutexGuard};

use profview_core::config::parse_percentage;
use profview_core::roofline::Bound;
use profview_core::{Fetch, FetchError, Viewer, ViewerConfig};
use profview_protocol::{Point, Rect, Request, Viewport};
use serde::Serialize;
use wasm_bindgen::prelude::*;

static VIEWER: Mutex<Option<Viewer>> = Mutex::new(None);

fn js(err: impl std::fmt::Display) -> JsError {
    JsError::new(&err.to_string())
}

fn to_json(value: &impl Serialize) -> Result<String, JsError> {
    serde_json::to_string(value).map_err(js)
}

fn lock() -> Result<MutexGuard<'static, Option<Viewer>>, JsError> {
    VIEWER.lock().map_err(|_| JsError::new("viewer state poisoned"))
}

fn with_viewer<T>(f: impl FnOnce(&mut Viewer) -> Result<T, JsError>) -> Result<T, JsError> {
    let mut guard = lock()?;
    let viewer = guard
        .as_mut()
        .ok_or_else(|| JsError::new("viewer not initialised"))?;
    f(viewer)
}

/// Create the viewer from a `profview.toml` document (empty for defaults).
#[wasm_bindgen]
pub fn init(config_toml: &str) -> Result<(), JsError> {
    let config = ViewerConfig::from_toml_str(config_toml).map_err(js)?;
    *lock()? = Some(Viewer::new(config));
    Ok(())
}

/// Endpoint a fetch is posted to.
#[wasm_bindgen]
pub fn request_url(fetch_json: &str) -> Result<String, JsError> {
    let fetch: Fetch = serde_json::from_str(fetch_json).map_err(js)?;
    with_viewer(|v| Ok(Request::url(&v.config().server, &fetch.session)))
}

/// Form fields of a fetch as `[[name, value], ...]`.
#[wasm_bindgen]
pub fn request_form(fetch_json: &str) -> Result<String, JsError> {
    let fetch: Fetch = serde_json::from_str(fetch_json).map_err(js)?;
    to_json(&fetch.request.form_fields())
}

/// Returns the first fetch of the load as JSON, or `null`.
#[wasm_bindgen]
pub fn select_session(session: &str, label: &str) -> Result<String, JsError> {
    with_viewer(|v| to_json(&v.select_session(session, label)))
}

/// Hand over the reply to a fetch. `status` is the HTTP status, 0 when the
/// request never got an answer. Returns the next fetch or `null`.
#[wasm_bindgen]
pub fn complete(fetch_json: &str, status: u16, body: &str) -> Result<String, JsError> {
    let fetch: Fetch = serde_json::from_str(fetch_json).map_err(js)?;
    with_viewer(|v| to_json(&v.complete(&fetch, reply(status, body))))
}

fn reply(status: u16, body: &str) -> Result<String, FetchError> {
    match status {
        200..300 => Ok(body.to_string()),
        0 => Err(FetchError::Transport(body.to_string())),
        code => Err(FetchError::Status(code)),
    }
}

/// Both inputs take what the user typed.
#[wasm_bindgen]
pub fn set_flame_graph_threshold(input: &str) -> Result<f64, JsError> {
    with_viewer(|v| {
        v.set_flame_graph_threshold(parse_percentage(input));
        Ok(v.config().flame_graph_threshold_pct)
    })
}

#[wasm_bindgen]
pub fn set_runtime_diff_threshold(input: &str) -> Result<f64, JsError> {
    with_viewer(|v| {
        v.set_runtime_diff_threshold(parse_percentage(input));
        Ok(v.config().runtime_diff_threshold_pct)
    })
}

#[wasm_bindgen]
pub fn set_screen_size(width: f64, height: f64) -> Result<(), JsError> {
    with_viewer(|v| {
        v.set_screen_size(width, height);
        Ok(())
    })
}

/// Timeline render commands for the visible time range.
#[wasm_bindgen]
pub fn render_timeline(width: f64, height: f64, start: f64, end: f64) -> Result<String, JsError> {
    with_viewer(|v| to_json(&v.render_timeline(&Viewport::new(width, height), start, end)))
}

#[wasm_bindgen]
pub fn time_range() -> Result<Vec<f64>, JsError> {
    with_viewer(|v| {
        let (start, end) = v.timeline().map(|t| t.time_range()).unwrap_or((0.0, 0.0));
        Ok(vec![start, end])
    })
}

#[wasm_bindgen]
pub fn thread_details(group: &str, always_ms: bool) -> Result<String, JsError> {
    with_viewer(|v| to_json(&v.thread_details(group, always_ms).map_err(js)?))
}

#[wasm_bindgen]
pub fn general_analyses() -> Result<String, JsError> {
    with_viewer(|v| to_json(&v.general_analyses()))
}

#[derive(Serialize)]
struct Opened {
    window: String,
    fetch: Option<Fetch>,
}

/// Open a menu item's window. Returns `{window, fetch}`.
#[wasm_bindgen]
pub fn open_analysis(analysis: &str, group: Option<String>, x: f64, y: f64) -> Result<String, JsError> {
    with_viewer(|v| {
        let (window, fetch) = v
            .open_analysis(analysis, group.as_deref(), Point::new(x, y))
            .map_err(js)?;
        to_json(&Opened { window, fetch })
    })
}

#[wasm_bindgen]
pub fn open_code(file: &str, line: u32) -> Result<String, JsError> {
    with_viewer(|v| to_json(&v.open_code(file, u64::from(line)).map_err(js)?))
}

#[wasm_bindgen]
pub fn flame_graph_click(window: &str, frame_id: u32) -> Result<String, JsError> {
    with_viewer(|v| to_json(&v.flame_graph_click(window, u64::from(frame_id)).map_err(js)?))
}

#[wasm_bindgen]
pub fn flame_graph_reset_zoom(window: &str) -> Result<(), JsError> {
    with_viewer(|v| v.flame_graph_reset_zoom(window).map_err(js))
}

#[wasm_bindgen]
pub fn flame_graph_metric(window: &str, metric: &str) -> Result<(), JsError> {
    with_viewer(|v| v.flame_graph_metric(window, metric).map_err(js))
}

#[wasm_bindgen]
pub fn flame_graph_time_ordered(window: &str, time_ordered: bool) -> Result<(), JsError> {
    with_viewer(|v| v.flame_graph_time_ordered(window, time_ordered).map_err(js))
}

/// Search summary as JSON, `null` once the query is cleared.
#[wasm_bindgen]
pub fn flame_graph_search(window: &str, query: &str) -> Result<String, JsError> {
    with_viewer(|v| to_json(&v.flame_graph_search(window, query).map_err(js)?))
}

#[wasm_bindgen]
pub fn roofline_select_model(window: &str, index: usize) -> Result<bool, JsError> {
    with_viewer(|v| v.roofline_select_model(window, index).map_err(js))
}

/// `bound` is one of `l1`, `l2`, `l3`, `dram`, `fp`.
#[wasm_bindgen]
pub fn roofline_toggle(window: &str, bound: &str) -> Result<(), JsError> {
    let bound: Bound = serde_json::from_value(serde_json::Value::String(bound.to_string()))
        .map_err(js)?;
    with_viewer(|v| v.roofline_toggle(window, bound).map_err(js))
}

#[derive(Serialize)]
struct WindowSummary<'a> {
    id: &'a str,
    kind: &'static str,
    title: &'a str,
    geometry: Rect,
    z_index: u32,
    collapsed: bool,
    focused: bool,
}

/// Open windows, back to front.
#[wasm_bindgen]
pub fn windows() -> Result<String, JsError> {
    with_viewer(|v| {
        let windows = v.windows();
        let focused = windows.focused();
        let list: Vec<_> = windows
            .stacking_order()
            .into_iter()
            .map(|w| WindowSummary {
                id: &w.id,
                kind: w.kind.as_str(),
                title: &w.title,
                geometry: w.geometry,
                z_index: w.z_index,
                collapsed: w.collapsed,
                focused: focused == Some(w.id.as_str()),
            })
            .collect();
        to_json(&list)
    })
}

#[derive(Serialize)]
struct WindowCommands {
    header: Vec<profview_protocol::RenderCommand>,
    body: Vec<profview_protocol::RenderCommand>,
}

#[wasm_bindgen]
pub fn render_window(window: &str) -> Result<String, JsError> {
    with_viewer(|v| {
        let body = v.render_panel(window).map_err(js)?;
        let header = v.windows().render_header(window);
        to_json(&WindowCommands { header, body })
    })
}

#[wasm_bindgen]
pub fn focus_window(window: &str) -> Result<bool, JsError> {
    with_viewer(|v| Ok(v.windows_mut().focus(window)))
}

#[wasm_bindgen]
pub fn toggle_collapsed(window: &str) -> Result<bool, JsError> {
    with_viewer(|v| Ok(v.windows_mut().toggle_collapsed(window)))
}

#[wasm_bindgen]
pub fn begin_drag(window: &str, x: f64, y: f64) -> Result<bool, JsError> {
    with_viewer(|v| Ok(v.windows_mut().begin_drag(window, Point::new(x, y))))
}

#[wasm_bindgen]
pub fn drag_to(x: f64, y: f64) -> Result<(), JsError> {
    with_viewer(|v| {
        v.windows_mut().drag_to(Point::new(x, y));
        Ok(())
    })
}

#[wasm_bindgen]
pub fn end_drag() -> Result<(), JsError> {
    with_viewer(|v| {
        v.windows_mut().end_drag();
        Ok(())
    })
}

#[wasm_bindgen]
pub fn resize_window(window: &str, width: f64, height: f64) -> Result<bool, JsError> {
    with_viewer(|v| Ok(v.windows_mut().resize(window, width, height)))
}

#[wasm_bindgen]
pub fn pointer_up(window: &str) -> Result<bool, JsError> {
    with_viewer(|v| Ok(v.windows_mut().pointer_up(window)))
}

#[wasm_bindgen]
pub fn close_window(window: &str) -> Result<bool, JsError> {
    with_viewer(|v| Ok(v.close_window(window)))
}

/// SVG document of a plot; the page rasterises it for the PNG download.
#[wasm_bindgen]
pub fn export_svg(window: &str) -> Result<String, JsError> {
    with_viewer(|v| v.export_svg(window).map_err(js))
}

#[wasm_bindgen]
pub fn take_notices() -> Result<String, JsError> {
    with_viewer(|v| to_json(&v.take_notices()))
}

#[wasm_bindgen]
pub fn take_window_events() -> Result<String, JsError> {
    with_viewer(|v| to_json(&v.windows_mut().take_events()))
}
