//! # imapd-server
//!
//! The IMAP4rev1 protocol engine: a per-connection state machine over the
//! `imapd-codec` wire layer, mediating between clients and a pluggable
//! backend.
//!
//! The moving parts:
//!
//! * [`connection`]: greeting, command loop, legality table, TLS upgrade
//!   and authentication orchestration, `IDLE`.
//! * [`view`]: the selected-mailbox view; the snapshot the client knows,
//!   the snapshot the backend has, and the diff between them that becomes
//!   untagged `EXPUNGE`/`EXISTS`/`RECENT`/`FETCH` traffic.
//! * [`session`]: the async backend contract (`LoginProtocol`,
//!   `Session`) the state machine is polymorphic over.
//! * [`backend`]: the bundled in-memory backend used by tests and demos.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use imapd_server::{
//!     backend::MemoryBackend, config::ImapConfig, connection::serve_connection,
//!     session::ConnectionInfo,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let backend = Arc::new(MemoryBackend::with_demo_user().await);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:143").await?;
//!
//! loop {
//!     let (stream, peer) = listener.accept().await?;
//!     let backend = backend.clone();
//!     tokio::spawn(async move {
//!         let info = ConnectionInfo {
//!             peer: Some(peer),
//!             tls: false,
//!         };
//!         let _ = serve_connection(Box::new(stream), ImapConfig::default(), backend, info)
//!             .await;
//!     });
//! }
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod connection;
pub mod error;
pub mod flush;
pub mod session;
pub mod snapshot;
pub mod stream;
pub mod view;

pub use config::ImapConfig;
pub use connection::serve_connection;
pub use error::ServerError;
