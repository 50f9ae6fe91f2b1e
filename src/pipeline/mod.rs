pub mod coordinator;
pub mod edge;
pub mod latest;
pub mod metrics;
pub mod mode;
pub mod session;
pub mod transform;

pub use coordinator::{CoordinatorStats, DropReason, FrameOutcome, PipelineCoordinator};
pub use edge::{Canny, EdgeConfig, EdgeKind, EdgeOperator, SobelThreshold};
pub use latest::{latest, LatestReceiver, LatestSender, LatestStats};
pub use self::metrics::{FpsReport, MetricsSink, MetricsTracker, NullSink};
pub use mode::{ModeControl, ProcessingMode};
pub use session::{PipelineSession, SessionReport};
pub use transform::{ProcessedBuffer, ProcessingPipeline};
