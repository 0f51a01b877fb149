//! HTML rendering of annotated text

mod highlight_renderer;

pub use highlight_renderer::{application_order, render_highlights, HighlightConfig, RenderedDocument};
