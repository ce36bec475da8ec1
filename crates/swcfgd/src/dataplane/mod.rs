//! Dataplane collaborator.
//!
//! The engine never touches packet processing itself. Every side effect and
//! every live-state query goes through the [`Dataplane`] trait, which the
//! daemon backs with [`SoftDataplane`] and tests back with recording fakes.
//!
//! # Architecture
//!
//! ```text
//!   command ──> coordinator ──> Dataplane (create/destroy/start/stop)
//!                                   ▲
//!   dump worker ────────────────────┘ (read-only queries)
//! ```

mod soft;

use serde::Serialize;
use swcfg_common::DatastoreResult;

use crate::kinds::{BridgeAttr, L2BridgeAttr, PolicerActionAttr, PolicerAttr};

pub use soft::SoftDataplane;

/// One learned entry of an L2 bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct L2Entry {
    pub hw_addr: String,
    pub port_number: u32,
    pub ageing_timer: u64,
}

/// One entry of a bridge MAC table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MacEntry {
    pub mac_addr: String,
    pub port_no: u32,
    pub update_time: u64,
    pub address_type: MacAddressType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MacAddressType {
    Static,
    Dynamic,
}

/// MAC table of one bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MacTable {
    pub num_entries: u32,
    pub max_entries: u32,
    pub ageing_time: u32,
    pub entries: Vec<MacEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BandStats {
    pub band_id: u32,
    pub packet_band_count: u64,
    pub byte_band_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MeterStats {
    pub meter_id: u32,
    pub flow_count: u32,
    pub packet_in_count: u64,
    pub byte_in_count: u64,
    pub duration_sec: u32,
    pub duration_nsec: u32,
    pub band_stats: Vec<BandStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MeterBand {
    pub band_id: u32,
    #[serde(rename = "type")]
    pub band_type: String,
    pub rate: u32,
    pub burst_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prec_level: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MeterConfig {
    pub meter_id: u32,
    pub flags: Vec<String>,
    pub bands: Vec<MeterBand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BucketStats {
    pub bucket_id: u32,
    pub packet_count: u64,
    pub byte_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct GroupStats {
    pub group_id: u32,
    pub ref_count: u32,
    pub packet_count: u64,
    pub byte_count: u64,
    pub duration_sec: u32,
    pub duration_nsec: u32,
    pub bucket_stats: Vec<BucketStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct GroupBucket {
    pub bucket_id: u32,
    pub weight: u16,
    pub watch_port: u32,
    pub watch_group: u32,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct GroupDesc {
    pub group_id: u32,
    #[serde(rename = "type")]
    pub group_type: String,
    pub buckets: Vec<GroupBucket>,
}

/// One IPv4 route of a bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteEntry {
    pub dest: String,
    pub gate: String,
    pub ifindex: u32,
}

/// One flow entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowEntry {
    pub priority: u16,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub cookie: u64,
    pub packet_count: u64,
    pub byte_count: u64,
    /// Match fields as rendered by the dataplane, in match order.
    #[serde(rename = "match")]
    pub matches: serde_json::Map<String, serde_json::Value>,
    pub actions: Vec<String>,
}

/// Flows of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowTable {
    pub table: u8,
    pub flows: Vec<FlowEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoreType {
    Unknown,
    Worker,
    Io,
}

/// Core placement of dataplane threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AffinityInfo {
    pub core_no: u32,
    #[serde(rename = "type")]
    pub core_type: CoreType,
    pub interfaces: Vec<String>,
}

/// Side effects and queries the engine delegates to the dataplane.
///
/// Names passed in are fully qualified. Failures come back as
/// [`swcfg_common::DatastoreError`] and are reported to the client as is.
pub trait Dataplane: Send + Sync {
    fn l2_bridge_create(&self, name: &str, attr: &L2BridgeAttr) -> DatastoreResult<()>;
    fn l2_bridge_destroy(&self, name: &str) -> DatastoreResult<()>;
    fn l2_bridge_start(&self, name: &str) -> DatastoreResult<()>;
    fn l2_bridge_stop(&self, name: &str) -> DatastoreResult<()>;

    fn bridge_create(&self, name: &str, attr: &BridgeAttr) -> DatastoreResult<()>;
    fn bridge_destroy(&self, name: &str) -> DatastoreResult<()>;
    fn bridge_start(&self, name: &str) -> DatastoreResult<()>;
    fn bridge_stop(&self, name: &str) -> DatastoreResult<()>;

    fn policer_action_create(&self, name: &str, attr: &PolicerActionAttr) -> DatastoreResult<()>;
    fn policer_action_destroy(&self, name: &str) -> DatastoreResult<()>;

    fn policer_create(&self, name: &str, attr: &PolicerAttr) -> DatastoreResult<()>;
    fn policer_destroy(&self, name: &str) -> DatastoreResult<()>;
    fn policer_start(&self, name: &str) -> DatastoreResult<()>;
    fn policer_stop(&self, name: &str) -> DatastoreResult<()>;
    fn policer_action_attach(&self, policer: &str, action: &str) -> DatastoreResult<()>;
    fn policer_action_detach(&self, policer: &str, action: &str) -> DatastoreResult<()>;

    /// Number of learned entries in the L2 table bound to `bridge`.
    fn l2_bridge_entries(&self, bridge: &str) -> DatastoreResult<u64>;
    fn l2_bridge_clear(&self, bridge: &str) -> DatastoreResult<()>;
    fn l2_bridge_dump(&self, bridge: &str) -> DatastoreResult<Vec<L2Entry>>;

    fn mac_table(&self, bridge: &str) -> DatastoreResult<MacTable>;
    fn meter_stats(&self, bridge: &str) -> DatastoreResult<Vec<MeterStats>>;
    fn meter_configs(&self, bridge: &str) -> DatastoreResult<Vec<MeterConfig>>;
    fn group_stats(&self, bridge: &str) -> DatastoreResult<Vec<GroupStats>>;
    fn group_descs(&self, bridge: &str) -> DatastoreResult<Vec<GroupDesc>>;
    fn routes(&self, bridge: &str) -> DatastoreResult<Vec<RouteEntry>>;
    fn flows(&self, bridge: &str, table_id: Option<u8>) -> DatastoreResult<Vec<FlowTable>>;
    fn affinity(&self) -> DatastoreResult<Vec<AffinityInfo>>;
}
