//! In-memory software dataplane.
//!
//! Keeps just enough state to honour the [`Dataplane`] contract: which
//! resources exist, whether they run, and the tables the read-only queries
//! return. Creating an existing resource replaces its configuration.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use swcfg_common::{DatastoreError, DatastoreResult, ResultCode};
use tracing::debug;

use super::{
    AffinityInfo, CoreType, Dataplane, FlowTable, GroupDesc, GroupStats, L2Entry, MacAddressType,
    MacEntry, MacTable, MeterConfig, MeterStats, RouteEntry,
};
use crate::kinds::{BridgeAttr, L2BridgeAttr, PolicerActionAttr, PolicerAttr};

#[derive(Debug, Default)]
struct SoftBridge {
    attr: BridgeAttr,
    running: bool,
    macs: Vec<MacEntry>,
    routes: Vec<RouteEntry>,
    flows: BTreeMap<u8, FlowTable>,
    meters: Vec<(MeterConfig, MeterStats)>,
    groups: Vec<(GroupDesc, GroupStats)>,
}

#[derive(Debug, Default)]
struct SoftL2Bridge {
    attr: L2BridgeAttr,
    running: bool,
}

#[derive(Debug, Default)]
struct SoftPolicer {
    attr: PolicerAttr,
    running: bool,
    attached: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct SoftState {
    bridges: HashMap<String, SoftBridge>,
    l2_bridges: HashMap<String, SoftL2Bridge>,
    policer_actions: HashMap<String, PolicerActionAttr>,
    policers: HashMap<String, SoftPolicer>,
}

/// Dataplane kept entirely in process memory.
#[derive(Debug, Default)]
pub struct SoftDataplane {
    state: Mutex<SoftState>,
    cores: Vec<AffinityInfo>,
}

fn missing(kind: &str, name: &str) -> DatastoreError {
    DatastoreError::interp(ResultCode::NotFound, format!("{} {} does not exist.", kind, name))
}

impl SoftDataplane {
    pub fn new() -> Self {
        let cores = (0..std::thread::available_parallelism().map_or(1, |n| n.get()))
            .map(|core| AffinityInfo {
                core_no: core as u32,
                core_type: if core == 0 { CoreType::Io } else { CoreType::Worker },
                interfaces: Vec::new(),
            })
            .collect();
        Self {
            state: Mutex::new(SoftState::default()),
            cores,
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SoftState) -> DatastoreResult<T>) -> DatastoreResult<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| DatastoreError::interp(ResultCode::AnyFailures, "dataplane state poisoned"))?;
        f(&mut state)
    }

    fn with_bridge<T>(
        &self,
        bridge: &str,
        f: impl FnOnce(&mut SoftBridge) -> DatastoreResult<T>,
    ) -> DatastoreResult<T> {
        self.with_state(|s| {
            s.bridges
                .get_mut(bridge)
                .ok_or_else(|| missing("bridge", bridge))
                .and_then(f)
        })
    }

    /// Records a learned MAC address on a bridge.
    pub fn learn(&self, bridge: &str, mac_addr: &str, port_no: u32, update_time: u64) -> DatastoreResult<()> {
        self.with_bridge(bridge, |b| {
            b.macs.retain(|m| m.mac_addr != mac_addr);
            b.macs.push(MacEntry {
                mac_addr: mac_addr.to_string(),
                port_no,
                update_time,
                address_type: MacAddressType::Dynamic,
            });
            Ok(())
        })
    }

    pub fn add_route(&self, bridge: &str, route: RouteEntry) -> DatastoreResult<()> {
        self.with_bridge(bridge, |b| {
            b.routes.push(route);
            Ok(())
        })
    }

    pub fn add_flow_table(&self, bridge: &str, table: FlowTable) -> DatastoreResult<()> {
        self.with_bridge(bridge, |b| {
            b.flows.insert(table.table, table);
            Ok(())
        })
    }

    pub fn add_meter(&self, bridge: &str, config: MeterConfig, stats: MeterStats) -> DatastoreResult<()> {
        self.with_bridge(bridge, |b| {
            b.meters.push((config, stats));
            Ok(())
        })
    }

    pub fn add_group(&self, bridge: &str, desc: GroupDesc, stats: GroupStats) -> DatastoreResult<()> {
        self.with_bridge(bridge, |b| {
            b.groups.push((desc, stats));
            Ok(())
        })
    }

    /// True if the named bridge exists and runs.
    pub fn is_bridge_running(&self, bridge: &str) -> bool {
        self.with_bridge(bridge, |b| Ok(b.running)).unwrap_or(false)
    }

    pub fn is_l2_bridge_running(&self, name: &str) -> bool {
        self.with_state(|s| Ok(s.l2_bridges.get(name).map_or(false, |l| l.running)))
            .unwrap_or(false)
    }

    /// Actions currently attached to a policer.
    pub fn attached_actions(&self, policer: &str) -> Vec<String> {
        self.with_state(|s| {
            Ok(s.policers
                .get(policer)
                .map(|p| p.attached.iter().cloned().collect())
                .unwrap_or_default())
        })
        .unwrap_or_default()
    }
}

impl Dataplane for SoftDataplane {
    fn l2_bridge_create(&self, name: &str, attr: &L2BridgeAttr) -> DatastoreResult<()> {
        debug!("soft dataplane: create l2-bridge {}", name);
        self.with_state(|s| {
            let entry = s.l2_bridges.entry(name.to_string()).or_default();
            entry.attr = attr.clone();
            Ok(())
        })
    }

    fn l2_bridge_destroy(&self, name: &str) -> DatastoreResult<()> {
        self.with_state(|s| s.l2_bridges.remove(name).map(drop).ok_or_else(|| missing("l2-bridge", name)))
    }

    fn l2_bridge_start(&self, name: &str) -> DatastoreResult<()> {
        self.with_state(|s| {
            let l2 = s.l2_bridges.get_mut(name).ok_or_else(|| missing("l2-bridge", name))?;
            l2.running = true;
            Ok(())
        })
    }

    fn l2_bridge_stop(&self, name: &str) -> DatastoreResult<()> {
        self.with_state(|s| {
            let l2 = s.l2_bridges.get_mut(name).ok_or_else(|| missing("l2-bridge", name))?;
            l2.running = false;
            Ok(())
        })
    }

    fn bridge_create(&self, name: &str, attr: &BridgeAttr) -> DatastoreResult<()> {
        debug!("soft dataplane: create bridge {}", name);
        self.with_state(|s| {
            let entry = s.bridges.entry(name.to_string()).or_default();
            entry.attr = attr.clone();
            Ok(())
        })
    }

    fn bridge_destroy(&self, name: &str) -> DatastoreResult<()> {
        self.with_state(|s| s.bridges.remove(name).map(drop).ok_or_else(|| missing("bridge", name)))
    }

    fn bridge_start(&self, name: &str) -> DatastoreResult<()> {
        self.with_bridge(name, |b| {
            b.running = true;
            Ok(())
        })
    }

    fn bridge_stop(&self, name: &str) -> DatastoreResult<()> {
        self.with_bridge(name, |b| {
            b.running = false;
            Ok(())
        })
    }

    fn policer_action_create(&self, name: &str, attr: &PolicerActionAttr) -> DatastoreResult<()> {
        self.with_state(|s| {
            s.policer_actions.insert(name.to_string(), attr.clone());
            Ok(())
        })
    }

    fn policer_action_destroy(&self, name: &str) -> DatastoreResult<()> {
        self.with_state(|s| {
            s.policer_actions
                .remove(name)
                .map(drop)
                .ok_or_else(|| missing("policer-action", name))
        })
    }

    fn policer_create(&self, name: &str, attr: &PolicerAttr) -> DatastoreResult<()> {
        self.with_state(|s| {
            let entry = s.policers.entry(name.to_string()).or_default();
            entry.attr = attr.clone();
            Ok(())
        })
    }

    fn policer_destroy(&self, name: &str) -> DatastoreResult<()> {
        self.with_state(|s| s.policers.remove(name).map(drop).ok_or_else(|| missing("policer", name)))
    }

    fn policer_start(&self, name: &str) -> DatastoreResult<()> {
        self.with_state(|s| {
            let p = s.policers.get_mut(name).ok_or_else(|| missing("policer", name))?;
            p.running = true;
            Ok(())
        })
    }

    fn policer_stop(&self, name: &str) -> DatastoreResult<()> {
        self.with_state(|s| {
            let p = s.policers.get_mut(name).ok_or_else(|| missing("policer", name))?;
            p.running = false;
            Ok(())
        })
    }

    fn policer_action_attach(&self, policer: &str, action: &str) -> DatastoreResult<()> {
        self.with_state(|s| {
            if !s.policer_actions.contains_key(action) {
                return Err(missing("policer-action", action));
            }
            let p = s.policers.get_mut(policer).ok_or_else(|| missing("policer", policer))?;
            p.attached.insert(action.to_string());
            Ok(())
        })
    }

    fn policer_action_detach(&self, policer: &str, action: &str) -> DatastoreResult<()> {
        self.with_state(|s| {
            let p = s.policers.get_mut(policer).ok_or_else(|| missing("policer", policer))?;
            p.attached.remove(action);
            Ok(())
        })
    }

    fn l2_bridge_entries(&self, bridge: &str) -> DatastoreResult<u64> {
        self.with_bridge(bridge, |b| Ok(b.macs.len() as u64))
    }

    fn l2_bridge_clear(&self, bridge: &str) -> DatastoreResult<()> {
        self.with_bridge(bridge, |b| {
            b.macs.retain(|m| m.address_type == MacAddressType::Static);
            Ok(())
        })
    }

    fn l2_bridge_dump(&self, bridge: &str) -> DatastoreResult<Vec<L2Entry>> {
        self.with_bridge(bridge, |b| {
            Ok(b.macs
                .iter()
                .map(|m| L2Entry {
                    hw_addr: m.mac_addr.clone(),
                    port_number: m.port_no,
                    ageing_timer: m.update_time,
                })
                .collect())
        })
    }

    fn mac_table(&self, bridge: &str) -> DatastoreResult<MacTable> {
        self.with_state(|s| {
            let b = s.bridges.get(bridge).ok_or_else(|| missing("bridge", bridge))?;
            let l2 = b.attr.l2_bridge.as_ref().and_then(|n| s.l2_bridges.get(n));
            Ok(MacTable {
                num_entries: b.macs.len() as u32,
                max_entries: l2.map_or(0, |l| l.attr.max_entries.min(u64::from(u32::MAX)) as u32),
                ageing_time: l2.map_or(0, |l| l.attr.expire.min(u64::from(u32::MAX)) as u32),
                entries: b.macs.clone(),
            })
        })
    }

    fn meter_stats(&self, bridge: &str) -> DatastoreResult<Vec<MeterStats>> {
        self.with_bridge(bridge, |b| Ok(b.meters.iter().map(|(_, st)| st.clone()).collect()))
    }

    fn meter_configs(&self, bridge: &str) -> DatastoreResult<Vec<MeterConfig>> {
        self.with_bridge(bridge, |b| Ok(b.meters.iter().map(|(c, _)| c.clone()).collect()))
    }

    fn group_stats(&self, bridge: &str) -> DatastoreResult<Vec<GroupStats>> {
        self.with_bridge(bridge, |b| Ok(b.groups.iter().map(|(_, st)| st.clone()).collect()))
    }

    fn group_descs(&self, bridge: &str) -> DatastoreResult<Vec<GroupDesc>> {
        self.with_bridge(bridge, |b| Ok(b.groups.iter().map(|(d, _)| d.clone()).collect()))
    }

    fn routes(&self, bridge: &str) -> DatastoreResult<Vec<RouteEntry>> {
        self.with_bridge(bridge, |b| Ok(b.routes.clone()))
    }

    fn flows(&self, bridge: &str, table_id: Option<u8>) -> DatastoreResult<Vec<FlowTable>> {
        self.with_bridge(bridge, |b| {
            Ok(b.flows
                .values()
                .filter(|t| table_id.map_or(true, |id| t.table == id))
                .cloned()
                .collect())
        })
    }

    fn affinity(&self) -> DatastoreResult<Vec<AffinityInfo>> {
        Ok(self.cores.clone())
    }
}
