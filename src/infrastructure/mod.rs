pub mod chromium;
pub mod js_executor;
pub mod renderer;

pub use chromium::ChromiumRenderer;
pub use js_executor::JsExecutor;
pub use renderer::{RenderSession, RenderedPage, Renderer};
