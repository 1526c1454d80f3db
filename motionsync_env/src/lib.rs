//! MotionSync Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seam that lets the motion-synchronization
//! engine run against a real session transport (tokio) or inside the
//! deterministic simulator.
//!
//! # Core Concept
//!
//! Everything non-deterministic is behind a trait:
//! - Clocks (`now()`, `server_now()`, `sleep()`)
//! - The buffered broadcast bus (`call()`, `replicate()`, `drain()`)
//!
//! Local clocks are NOT synchronized between peers. `Timestamp` is the peer's
//! own wall clock in ticks; `ServerTime` is the session's shared clock in
//! milliseconds and is only used for delay correction on the replication path.
//!
//! # Example
//!
//! ```ignore
//! use motionsync_env::{SyncContext, BroadcastTransport, CallTarget};
//!
//! async fn peer_loop<Ctx: SyncContext, Net: BroadcastTransport>(ctx: &Ctx, net: &Net) {
//!     loop {
//!         for inbound in net.drain() {
//!             handle(inbound);
//!         }
//!         ctx.sleep(Duration::from_millis(33)).await;
//!     }
//! }
//! ```

mod context;
mod error;
mod network;
mod tokio_impl;
mod types;

pub use context::SyncContext;
pub use error::EnvError;
pub use network::{BroadcastTransport, NetworkController};
pub use tokio_impl::TokioContext;
pub use types::{
    AvatarId, BufferSlot, BufferedCall, CallKind, CallTarget, Inbound, PeerId,
    ReplicationFrame, ServerTime, Timestamp, TICKS_PER_SECOND,
};
