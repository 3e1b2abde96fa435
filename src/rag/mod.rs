pub mod chunker;
pub mod engine;
