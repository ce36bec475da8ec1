//! Recording dataplane with fault injection
//!
//! Wraps [`SoftDataplane`] so live state behaves like the daemon's, records
//! every side-effecting call as `"<op> <name>"` and fails chosen calls on
//! demand.

use std::sync::{Mutex, MutexGuard};

use swcfg_common::{DatastoreError, DatastoreResult, ResultCode};
use swcfgd::dataplane::{
    AffinityInfo, FlowTable, GroupDesc, GroupStats, L2Entry, MacTable, MeterConfig, MeterStats,
    RouteEntry,
};
use swcfgd::kinds::{BridgeAttr, L2BridgeAttr, PolicerActionAttr, PolicerAttr};
use swcfgd::{Dataplane, SoftDataplane};
use tracing::debug;

/// One injected failure
#[derive(Debug, Clone)]
struct Fault {
    op: String,
    name: String,
    code: ResultCode,
    /// Remaining failures; `None` fails forever
    remaining: Option<usize>,
}

/// Dataplane fake for integration tests
#[derive(Debug)]
pub struct RecordingDataplane {
    inner: SoftDataplane,
    calls: Mutex<Vec<String>>,
    faults: Mutex<Vec<Fault>>,
}

impl Default for RecordingDataplane {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecordingDataplane {
    /// Create an empty dataplane
    pub fn new() -> Self {
        Self {
            inner: SoftDataplane::new(),
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(Vec::new()),
        }
    }

    /// The wrapped dataplane, for seeding live tables
    pub fn soft(&self) -> &SoftDataplane {
        &self.inner
    }

    /// Fail `op` on `name` every time it is called
    pub fn fail_always(&self, op: &str, name: &str, code: ResultCode) {
        self.push_fault(op, name, code, None);
    }

    /// Fail `op` on `name` for the next `times` calls
    pub fn fail_times(&self, op: &str, name: &str, code: ResultCode, times: usize) {
        self.push_fault(op, name, code, Some(times));
    }

    fn push_fault(&self, op: &str, name: &str, code: ResultCode, remaining: Option<usize>) {
        lock(&self.faults).push(Fault {
            op: op.to_string(),
            name: name.to_string(),
            code,
            remaining,
        });
    }

    /// Drop every injected failure
    pub fn clear_faults(&self) {
        lock(&self.faults).clear();
    }

    /// Calls recorded so far
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// Recorded calls matching `op`, in call order
    pub fn calls_of(&self, op: &str) -> Vec<String> {
        let prefix = format!("{} ", op);
        lock(&self.calls)
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .cloned()
            .collect()
    }

    /// Forget the recorded calls
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn hook(&self, op: &str, name: &str) -> DatastoreResult<()> {
        lock(&self.calls).push(format!("{} {}", op, name));

        let mut faults = lock(&self.faults);
        let Some(idx) = faults.iter().position(|f| f.op == op && f.name == name) else {
            return Ok(());
        };
        let fault = &mut faults[idx];
        let code = fault.code;
        let exhausted = match &mut fault.remaining {
            Some(n) => {
                *n = n.saturating_sub(1);
                *n == 0
            }
            None => false,
        };
        if exhausted {
            faults.remove(idx);
        }
        debug!("injected failure: {} {} -> {}", op, name, code);
        Err(DatastoreError::interp(
            code,
            format!("injected {} failure on {}", op, name),
        ))
    }
}

impl Dataplane for RecordingDataplane {
    fn l2_bridge_create(&self, name: &str, attr: &L2BridgeAttr) -> DatastoreResult<()> {
        self.hook("l2_bridge_create", name)?;
        self.inner.l2_bridge_create(name, attr)
    }

    fn l2_bridge_destroy(&self, name: &str) -> DatastoreResult<()> {
        self.hook("l2_bridge_destroy", name)?;
        self.inner.l2_bridge_destroy(name)
    }

    fn l2_bridge_start(&self, name: &str) -> DatastoreResult<()> {
        self.hook("l2_bridge_start", name)?;
        self.inner.l2_bridge_start(name)
    }

    fn l2_bridge_stop(&self, name: &str) -> DatastoreResult<()> {
        self.hook("l2_bridge_stop", name)?;
        self.inner.l2_bridge_stop(name)
    }

    fn bridge_create(&self, name: &str, attr: &BridgeAttr) -> DatastoreResult<()> {
        self.hook("bridge_create", name)?;
        self.inner.bridge_create(name, attr)
    }

    fn bridge_destroy(&self, name: &str) -> DatastoreResult<()> {
        self.hook("bridge_destroy", name)?;
        self.inner.bridge_destroy(name)
    }

    fn bridge_start(&self, name: &str) -> DatastoreResult<()> {
        self.hook("bridge_start", name)?;
        self.inner.bridge_start(name)
    }

    fn bridge_stop(&self, name: &str) -> DatastoreResult<()> {
        self.hook("bridge_stop", name)?;
        self.inner.bridge_stop(name)
    }

    fn policer_action_create(&self, name: &str, attr: &PolicerActionAttr) -> DatastoreResult<()> {
        self.hook("policer_action_create", name)?;
        self.inner.policer_action_create(name, attr)
    }

    fn policer_action_destroy(&self, name: &str) -> DatastoreResult<()> {
        self.hook("policer_action_destroy", name)?;
        self.inner.policer_action_destroy(name)
    }

    fn policer_create(&self, name: &str, attr: &PolicerAttr) -> DatastoreResult<()> {
        self.hook("policer_create", name)?;
        self.inner.policer_create(name, attr)
    }

    fn policer_destroy(&self, name: &str) -> DatastoreResult<()> {
        self.hook("policer_destroy", name)?;
        self.inner.policer_destroy(name)
    }

    fn policer_start(&self, name: &str) -> DatastoreResult<()> {
        self.hook("policer_start", name)?;
        self.inner.policer_start(name)
    }

    fn policer_stop(&self, name: &str) -> DatastoreResult<()> {
        self.hook("policer_stop", name)?;
        self.inner.policer_stop(name)
    }

    fn policer_action_attach(&self, policer: &str, action: &str) -> DatastoreResult<()> {
        self.hook("policer_action_attach", action)?;
        self.inner.policer_action_attach(policer, action)
    }

    fn policer_action_detach(&self, policer: &str, action: &str) -> DatastoreResult<()> {
        self.hook("policer_action_detach", action)?;
        self.inner.policer_action_detach(policer, action)
    }

    // Queries are read-only and not recorded.

    fn l2_bridge_entries(&self, bridge: &str) -> DatastoreResult<u64> {
        self.inner.l2_bridge_entries(bridge)
    }

    fn l2_bridge_clear(&self, bridge: &str) -> DatastoreResult<()> {
        self.inner.l2_bridge_clear(bridge)
    }

    fn l2_bridge_dump(&self, bridge: &str) -> DatastoreResult<Vec<L2Entry>> {
        self.inner.l2_bridge_dump(bridge)
    }

    fn mac_table(&self, bridge: &str) -> DatastoreResult<MacTable> {
        self.inner.mac_table(bridge)
    }

    fn meter_stats(&self, bridge: &str) -> DatastoreResult<Vec<MeterStats>> {
        self.inner.meter_stats(bridge)
    }

    fn meter_configs(&self, bridge: &str) -> DatastoreResult<Vec<MeterConfig>> {
        self.inner.meter_configs(bridge)
    }

    fn group_stats(&self, bridge: &str) -> DatastoreResult<Vec<GroupStats>> {
        self.inner.group_stats(bridge)
    }

    fn group_descs(&self, bridge: &str) -> DatastoreResult<Vec<GroupDesc>> {
        self.inner.group_descs(bridge)
    }

    fn routes(&self, bridge: &str) -> DatastoreResult<Vec<RouteEntry>> {
        self.inner.routes(bridge)
    }

    fn flows(&self, bridge: &str, table_id: Option<u8>) -> DatastoreResult<Vec<FlowTable>> {
        self.inner.flows(bridge, table_id)
    }

    fn affinity(&self) -> DatastoreResult<Vec<AffinityInfo>> {
        self.inner.affinity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_calls() {
        let dp = RecordingDataplane::new();
        dp.bridge_create(":br0", &BridgeAttr::default()).unwrap();
        dp.bridge_start(":br0").unwrap();

        assert_eq!(dp.calls(), vec!["bridge_create :br0", "bridge_start :br0"]);
        assert_eq!(dp.calls_of("bridge_start"), vec!["bridge_start :br0"]);
        assert!(dp.soft().is_bridge_running(":br0"));
    }

    #[test]
    fn test_fail_times_runs_out() {
        let dp = RecordingDataplane::new();
        dp.fail_times("bridge_create", ":br0", ResultCode::AnyFailures, 2);

        for _ in 0..2 {
            let err = dp.bridge_create(":br0", &BridgeAttr::default()).unwrap_err();
            assert_eq!(err.result_code(), ResultCode::AnyFailures);
        }
        assert!(dp.bridge_create(":br0", &BridgeAttr::default()).is_ok());
        // Other names are unaffected.
        assert!(dp.bridge_create(":br1", &BridgeAttr::default()).is_ok());
    }

    #[test]
    fn test_fail_always() {
        let dp = RecordingDataplane::new();
        dp.fail_always("policer_start", ":p", ResultCode::NotOperational);
        for _ in 0..3 {
            assert!(dp.policer_start(":p").is_err());
        }
        dp.clear_faults();
        dp.clear_calls();
        assert!(dp.calls().is_empty());
    }
}
