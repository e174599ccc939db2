pub mod audio;
pub mod config;
pub mod error;
pub mod state;

pub use audio::{
    crossfade::{CrossfadeLaw, DeckSide},
    decoder::{Fetcher, HttpFetcher, MemoryFetcher},
    engine::DjEngine,
    track::Track,
};
pub use config::{EngineConfig, OutputBackend};
pub use error::{EngineError, LoadError};
pub use state::{DeckSnapshot, EngineState, TrackSnapshot};
