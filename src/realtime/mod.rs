pub mod decode;
pub mod enrich;
pub mod fetcher;
pub mod pipeline;
pub mod replay;

pub use decode::{DecodeError, FeedDecoder, GtfsRealtimeDecoder};
pub use enrich::{enrich, BearingPairing, DEFAULT_BEARING};
pub use fetcher::{FeedSource, FetchError, HttpFeedSource};
pub use pipeline::{run_pipeline, CycleError, CycleReport, CycleStage, PipelineConfig, PositionPipeline};
pub use replay::{replay_frames, ReplayError, ReplayFrame};
