//! # Core Infrastructure Module
//!
//! Fundamental building blocks shared by every pipeline stage: the bounded
//! SPSC ring buffer that connects stages and carries frames, textures, and
//! raw pixel blocks between their worker threads.

pub mod ring_buffer;

pub use ring_buffer::RingBuffer;
