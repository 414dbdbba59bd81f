pub mod book;
pub mod config;
pub mod engine;
pub mod errors;
pub mod projector;
pub mod sequencer;
pub mod snapshot;
pub mod stream;
pub mod trades;
pub mod wire;

pub use config::Config;
pub use engine::{DepthEngine, FeedStatus};
pub use projector::{Projection, ProjectionRow};
pub use stream::{FeedHandle, StreamManager};
