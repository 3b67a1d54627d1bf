//! Embedding containers for child contexts

pub mod memory;

pub use parley_protocol::frame::{origin_of, Embedded, Embedder, Frame, FrameSpec};
