//! Study material generation with a deterministic two-column mind-map layout.
//!
//! The layout core (`outline`, `measure`, `layout`, `driver`, `render`) is pure
//! and synchronous. Generation, persistence and the HTTP API sit around it.

pub mod account;
pub mod database;
pub mod document;
pub mod driver;
pub mod export;
pub mod generate;
pub mod layout;
pub mod measure;
pub mod outline;
pub mod preferences;
pub mod render;
#[cfg(feature = "server")]
pub mod serve;
pub mod session;
pub mod study;
pub mod templates;
pub mod utils;

pub use document::Document;
pub use driver::{BatchOutcome, LayoutDriver};
pub use generate::{
    BackendConfig, BackendRequest, GenerationError, GenerativeBackend, Generator, HttpBackend,
};
pub use layout::{
    Canvas, ColumnSide, Connector, LayoutError, MindMapLayout, Palette, PositionedNode,
    compute_layout, layout_outline,
};
pub use measure::{
    Measure, MeasureError, MeasuredNode, MeasurementPass, MeasurementStatus, Measurements, Size,
    TextMetrics, UniformSize, measure_outline,
};
pub use outline::{ChildNode, MainNode, NodeId, Outline, OutlineError};
pub use render::{RenderOptions, render_png, render_svg};
pub use study::{ContentError, Difficulty, GenerationMode, GenerationOptions, StudyContent};
