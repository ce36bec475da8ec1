//! Switch configuration datastore.
//!
//! `swcfgd` keeps the configuration of the switch's logical objects (bridges,
//! l2-bridges, policers and policer actions) in namespaced registries and
//! applies it to the dataplane through a transaction engine. Commands arrive
//! as text lines and are answered with a JSON envelope.
//!
//! # Modules
//!
//! - [`engine`]: context, command table, transaction coordinator and
//!   interpreter commands
//! - [`kind`] / [`kinds`]: per-kind contract and the four managed kinds
//! - [`query`] / [`dump`]: read-only queries answered by dump workers
//! - [`dataplane`]: the dataplane seam and an in-memory implementation
//! - [`server`]: sessions and connection loops
//! - [`config`]: YAML engine configuration

mod cmd;
pub mod config;
pub mod dataplane;
pub mod dump;
pub mod engine;
pub mod kind;
pub mod kinds;
pub mod query;
pub mod server;

pub use config::{ConfigError, DumpConfig, EngineConfig};
pub use dataplane::{Dataplane, SoftDataplane};
pub use engine::{Command, Engine, Response, Stores};
pub use server::{Server, Session};
