//! Bundled backends.
//!
//! Production deployments implement [`crate::session::Session`] against
//! their own storage; the in-memory backend here exists for tests, demos,
//! and as a reference for the contract's semantics.

pub mod memory;
pub mod message;

pub use memory::MemoryBackend;
