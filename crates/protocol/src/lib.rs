pub mod commands;
pub mod payload;
pub mod request;
pub mod shared_str;
pub mod theme;
pub mod types;

pub use commands::{RenderCommand, TextAlign};
pub use payload::{
    AddressRange, CallchainFrame, CallchainMappings, FlameGraphPair, FlameGraphSet, FlameNode,
    MetricInfo, ProfileNode, RooflineModel, RooflinePayload, SourceLocation, SourceMap,
    SymbolRef,
};
pub use request::Request;
pub use shared_str::SharedStr;
pub use theme::ThemeToken;
pub use types::{Point, Rect, Viewport};
