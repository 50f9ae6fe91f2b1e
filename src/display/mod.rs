pub mod gpu;
pub mod snapshot;
pub mod surface;

pub use gpu::{WgpuContextFactory, WgpuRenderContext};
pub use snapshot::save_png;
pub use surface::{ContextFactory, RenderContext, RenderSurface, SurfaceState, SurfaceStats};
