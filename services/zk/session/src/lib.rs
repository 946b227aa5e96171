//! Client-side session engine for a coordination service.
//!
//! This crate owns the single TCP connection from a client to a cluster
//! member: it frames and writes queued requests, matches replies to
//! outstanding requests in order, renegotiates the session after every
//! reconnect and fails in-flight traffic with a precise error code when the
//! connection is lost.
//!
//! ## Features
//!
//! - **Ordered queues**: xids assigned under the outgoing lock, strict FIFO
//!   reply matching against the pending queue
//! - **Address rotation**: round-robin with jitter and a cooldown after a
//!   full lap of failures
//! - **Session negotiation**: connect request, auth replay and watch reset
//!   primed ahead of application traffic
//! - **Keepalive**: ping after half the read timeout of silence
//! - **Failure handling**: every queued or pending packet completed exactly
//!   once on teardown
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zk_session::{ChannelConsumer, ClientConfig, ClientConnection, Delivery, Request};
//! use zk_wire::{ExistsRequest, ExistsResponse, OpCode};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_connect_string("127.0.0.1:2181/app")?;
//! let (consumer, mut deliveries) = ChannelConsumer::new();
//!
//! let conn = ClientConnection::new(config, Arc::new(consumer))?;
//! conn.start();
//!
//! conn.submit(
//!     Request::new(OpCode::Exists)
//!         .with_record(ExistsRequest { path: "/app/node".into(), watch: true })
//!         .with_response(ExistsResponse::default())
//!         .with_paths("/node", "/app/node"),
//! );
//!
//! while let Some(delivery) = deliveries.recv().await {
//!     match delivery {
//!         Delivery::Event(event) => println!("{}", event),
//!         Delivery::Packet(packet) => {
//!             println!("xid {:?} finished with rc {:?}", packet.xid(), packet.err());
//!             break;
//!         }
//!     }
//! }
//!
//! conn.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod config;
pub mod connection;
pub mod consumer;
mod dispatch;
pub mod error;
pub mod handshake;
pub mod keepalive;
pub mod packet;
pub mod queue;
pub mod session;
pub mod transport;

// Re-export main types
pub use address::{AddressRotation, Attempt};
pub use config::{AuthData, ClientConfig, DEFAULT_PORT};
pub use connection::ClientConnection;
pub use consumer::{
    strip_chroot, ChannelConsumer, Delivery, EventConsumer, EventType, KeeperState,
    WatchSnapshot, WatchSource, WatchedEvent,
};
pub use error::SessionError;
pub use handshake::connect_request;
pub use keepalive::{ping_request, time_to_next_ping, PingTracker};
pub use packet::{Packet, Request, WatchRegistration};
pub use queue::{OutgoingQueue, PendingQueue};
pub use session::{ConnectionState, ConnectionStats};
pub use transport::{connect_tcp, listen_tcp};
