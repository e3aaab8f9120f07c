//! Shardmesh - game backend control plane
//!
//! Command-orchestration mesh for a Discord-fronted multiplayer game:
//! services consume command envelopes from a broker, execute business
//! logic under transactional discipline, and publish correlated results
//! back for delivery to the originating client.

pub mod bus;
pub mod config;
pub mod envelope;
pub mod handlers;
pub mod intake;
pub mod presence;
pub mod response;
pub mod router;
pub mod shard;
pub mod storage;
