//! Core of the profiling results viewer: session loading, timeline
//! flattening, symbol resolution, floating panels and their layout into
//! render commands. Nothing here touches the network or a display.

pub mod backend;
pub mod config;
pub mod error;
pub mod flamegraph;
pub mod resolver;
pub mod roofline;
pub mod session;
pub mod svg;
pub mod timeline;
pub mod viewer;
pub mod window;

pub use backend::{Backend, FetchError, PayloadError};
pub use config::{ReselectPolicy, ViewerConfig};
pub use error::{Error, Result};
pub use resolver::{AddressMap, AddressResolver, MapError};
pub use session::{LoadError, LoadPhase, LoadTicket, Notice, SessionState, SessionStore, Severity, Step};
pub use timeline::{FlattenOptions, FlattenedTree, flatten};
pub use viewer::{Fetch, FetchToken, Viewer};
pub use window::{PanelKind, WindowEvent, WindowManager};
