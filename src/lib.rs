//! # diameter-session
//!
//! Session layer for the Diameter AAA protocol over any duplex byte stream.
//!
//! This crate turns a raw stream into Diameter messages and back, and
//! matches outbound requests to their answers.
//!
//! ## Architecture
//!
//! - **Inbound**: read loop → [`protocol::StreamAssembler`] cuts complete
//!   messages out of the byte stream → [`codec::Codec`] decodes them → the
//!   dispatcher hands requests to the application and answers to the caller
//!   waiting on that hop-by-hop id
//! - **Outbound**: `send_request` allocates a hop-by-hop id, registers the
//!   transaction, then queues the bytes on a dedicated writer task; the
//!   caller's future resolves with the answer or fails on timeout
//!
//! ## Example
//!
//! ```ignore
//! use diameter_session::Session;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stream = tokio::net::TcpStream::connect("127.0.0.1:3868").await?;
//!     let (session, mut inbound) = Session::builder().start(stream);
//!
//!     tokio::spawn(async move {
//!         while let Some(request) = inbound.recv().await {
//!             let _ = request.respond().await;
//!         }
//!     });
//!
//!     let answer = session.send_request(session.create_request(0, 280)).await?;
//!     println!("answer for {}", answer.hop_by_hop_id());
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;

mod allocator;
mod dispatcher;
mod hooks;
mod responder;
mod session;
mod transaction;
mod writer;

pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use hooks::MessageHook;
pub use protocol::{Header, Message};
pub use responder::{InboundRequest, InboundRequests, Responder};
pub use session::{Session, SessionBuilder, SessionState};
