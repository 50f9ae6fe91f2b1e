pub mod decoder;
pub mod frame;
pub mod normalize;
pub mod source;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use frame::{FramePool, Plane, RawFrame, SensorEncoding};
pub use normalize::{FormatNormalizer, PixelBuffer};
pub use source::{FrameSource, PatternConfig, TestPatternSource};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Source;
