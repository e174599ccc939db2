pub mod analyzer;
pub mod crossfade;
pub mod deck;
pub mod decoder;
pub mod engine;
pub mod mixer;
pub mod output;
pub mod renderer;
pub mod track;
pub mod transport;
