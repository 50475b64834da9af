//! Stream abstraction and the STARTTLS seam.
//!
//! The engine runs over any byte stream and upgrades it in place when the
//! client negotiates TLS. Which TLS implementation performs the handshake
//! is the caller's business; the engine only needs "give me a stream back".

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Object-safe alias for anything the engine can read and write.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// A boxed connection stream, before or after TLS.
pub type BoxedStream = Box<dyn AsyncStream>;

/// The TLS collaborator invoked on `STARTTLS`.
///
/// Called after the `OK Begin TLS negotiation` line has been flushed;
/// returns the stream to continue on once the handshake finished.
#[async_trait]
pub trait TlsUpgrader: Send + Sync {
    async fn upgrade(&self, stream: BoxedStream) -> io::Result<BoxedStream>;
}
