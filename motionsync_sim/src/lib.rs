//! MotionSync Deterministic Simulation Testing (DST) Harness
//!
//! A controlled session where many peers, each owning one avatar, run the
//! real `motionsync_core` protocol against a simulated broadcast channel.
//!
//! # Core Principle: Everything Derives From One Seed
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: one virtual clock, read by every peer through its own skew
//! - **Network**: buffered calls and replication frames with latency,
//!   jitter, loss, duplication and partitions
//! - **Randomness**: physics, network and clock skew seeds derived from the
//!   master seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ SimRouter (Call Buffer + In-Flight Queue)            │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                        │                            │
//! │  ┌────▼────┐              ┌────▼────┐                       │
//! │  │  Peer   │◄────────────►│  Peer   │     ...               │
//! │  │   #1    │  SimNetwork  │   #2    │                       │
//! │  └─────────┘              └─────────┘                       │
//! │       ▲                        ▲                            │
//! │       │                        │                            │
//! │  ┌────┴────────────────────────┴────┐                       │
//! │  │            Oracle                 │                       │
//! │  │  (Ground Truth Locomotion)        │                       │
//! │  └───────────────────────────────────┘                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use motionsync_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 4).run(ScenarioId::ChainReaction);
//! assert!(result.passed);
//! ```

mod buffer;
mod context;
mod error;
mod exporter;
mod network;
mod oracle;
mod peer;
mod router;
mod runner;
pub mod scenarios;
mod sensor;
mod world;

pub use buffer::CallBuffer;
pub use context::SimContext;
pub use error::{ensure, SimError, SimResult};
pub use exporter::{AvatarView, BodyPosition, PeerFrame, SimEvent, SimExport, SimFrame};
pub use network::{LinkProfile, NetworkMessage, Outbound, SimNetwork, SimNetworkController};
pub use oracle::{Body, Oracle};
pub use peer::{MotionView, SimulatedPeer};
pub use router::{RouterStats, SimRouter};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
pub use sensor::ProximitySensor;
pub use world::{SimConfig, SimWorld};
