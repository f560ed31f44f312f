//! HyDFS: a small distributed hybrid file system built atop a SWIM-style
//! gossip failure detector.
//!
//! A fixed cluster of nodes is arranged on a consistent-hash ring over the
//! key space `[1, 1000]`. Each file is mapped by name to a primary node and
//! replicated to that primary's immediate ring successors. Clients submit
//! `create`/`append`/`get` requests against any node, which acts as
//! coordinator: it resolves the file's primary from the current live
//! membership view and forwards the request through a two-phase
//! authorize-then-upload sequence.
//!
//! ```text
//! client -> coordinator -> primary -> replica, replica, ...
//!              ^              ^
//!          placement      membership
//! ```
//!
//! The crate is organized around the components that make up that flow:
//!
//! - [`membership`] — the SWIM-derived failure detector and membership table.
//! - [`placement`] — consistent-hash key assignment and ring math.
//! - [`transport`] — the UDP control channel and the HTTP file RPC surface.
//! - [`coordinator`] — client-facing request forwarding.
//! - [`primary`] — per-file storage and replica fan-out.
//! - [`maintenance`] — periodic ring-view recomputation and janitorial work.
//! - [`node`] — the assembly type tying all of the above together.

#![warn(rust_2018_idioms)]
#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod maintenance;
pub mod membership;
pub mod node;
pub mod placement;
pub mod primary;
pub mod resolver;
pub mod transport;
pub mod types;

pub use config::Config;
pub use coordinator::FileCoordinator;
pub use error::{Error, Result};
pub use maintenance::MaintenanceLoop;
pub use membership::{FailureDetector, MembershipTable};
pub use node::HyDfsNode;
pub use primary::PrimaryEngine;
pub use resolver::{EndpointResolver, StaticResolver};
pub use types::{FileRole, Member, MemberState, NodeId, StoredFile};
