//! Transaction coordinator.
//!
//! [`update_internal`] applies one record according to the interpreter
//! state. The atomic passes in [`super::interp`] call it once per record per
//! state, in object table order.
//!
//! # States
//!
//! ```text
//!   AutoCommit ──begin──> Atomic ──commit──> Committing ──> Committed ──> AutoCommit
//!                           │                    │ error
//!                           │                    v
//!                           │              CommitFailure ──> Rollbacking ──> Rolledback
//!                           └──abort──> Aborting ──> Aborted ──> AutoCommit
//! ```

use swcfg_common::{DatastoreError, DatastoreResult, InterpState};
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::kind::{KConf, ObjectKind};

/// A record taken out of its registry while a handler works on it.
///
/// The handler gets the whole engine alongside the record. Unless the record
/// was deleted, it is put back when the handler returns.
#[derive(Debug)]
pub(crate) struct Detached<K: ObjectKind> {
    pub conf: KConf<K>,
    pub removed: bool,
}

impl<K: ObjectKind> Detached<K> {
    /// A new record that is not registered yet.
    pub fn fresh(name: &str) -> Self {
        Self {
            conf: KConf::<K>::new(name),
            removed: false,
        }
    }
}

/// Runs `f` on the detached record `name` and re-attaches it afterwards.
pub(crate) fn with_detached<K, T>(
    engine: &mut Engine,
    name: &str,
    f: impl FnOnce(&mut Engine, &mut Detached<K>) -> DatastoreResult<T>,
) -> DatastoreResult<T>
where
    K: ObjectKind,
{
    let conf = K::registry_mut(engine.stores_mut()).take(name)?;
    let mut det = Detached {
        conf,
        removed: false,
    };
    let ret = f(engine, &mut det);
    if det.removed {
        debug!("{} {} deleted", K::NAME, name);
    } else {
        K::registry_mut(engine.stores_mut()).restore(det.conf);
    }
    ret
}

/// Applies one record in the engine's current state.
pub(crate) fn update_internal<K: ObjectKind>(
    engine: &mut Engine,
    det: &mut Detached<K>,
    propagate: bool,
    is_enable_disable_cmd: bool,
) -> DatastoreResult<()> {
    let state = engine.state();
    match state {
        InterpState::DryRun => {
            dry_run_update(engine, det);
            Ok(())
        }
        InterpState::AutoCommit => auto_commit(engine, det, propagate, is_enable_disable_cmd),
        InterpState::Atomic => {
            if let Some(attr) = det.conf.modified.clone() {
                K::hold(engine, &attr, true);
            }
            Ok(())
        }
        // A start or stop propagated from another record during an atomic
        // pass; the record's own pass already swapped its attributes.
        InterpState::Committing | InterpState::Rollbacking if is_enable_disable_cmd => {
            if det.conf.is_enabled {
                K::start(engine, &det.conf, propagate)
            } else {
                K::stop(engine, &det.conf, propagate)
            }
        }
        InterpState::Committing => {
            det.conf.resolve_enabled();
            do_update(engine, det, propagate, is_enable_disable_cmd)
        }
        InterpState::Committed | InterpState::Rolledback => {
            det.conf.update_current_attr(state);
            det.conf.clear_intent();
            do_destroy(engine, det);
            Ok(())
        }
        InterpState::Rollbacking => {
            if det.conf.is_pending_create() {
                K::release(engine, &mut det.conf);
                Ok(())
            } else {
                det.conf.switch_attr();
                det.conf.revert_enabled();
                do_update(engine, det, propagate, is_enable_disable_cmd)
            }
        }
        InterpState::Aborting => {
            det.conf.abort_intent();
            if let Some(modified) = det.conf.modified.clone() {
                K::hold(engine, &modified, false);
                if let Some(current) = det.conf.current.clone() {
                    K::hold(engine, &current, true);
                }
            }
            Ok(())
        }
        InterpState::Aborted => {
            if det.conf.modified.is_some() {
                if det.conf.current.is_none() {
                    det.removed = true;
                } else {
                    det.conf.modified = None;
                }
            }
            Ok(())
        }
        InterpState::CommitFailure => Err(DatastoreError::invalid_state_transition()),
    }
}

/// Re-applies a dependent record after its parent changed.
///
/// Inside an atomic pass the record has had its own turn already, so it is
/// applied as it stands.
pub(crate) fn reapply<K: ObjectKind>(engine: &mut Engine, det: &mut Detached<K>) -> DatastoreResult<()> {
    if engine.state().is_applying() {
        do_update(engine, det, false, false)
    } else {
        update_internal(engine, det, false, false)
    }
}

/// Retries a failed apply by swapping back to the previous attributes.
///
/// A retry that succeeds restored the previous state, so the first error is
/// still reported. A bound that ends on the new attributes gets one extra
/// restore attempt. If every attempt fails, the record is left with the
/// attribute pair it had before the first attempt.
fn auto_commit<K: ObjectKind>(
    engine: &mut Engine,
    det: &mut Detached<K>,
    propagate: bool,
    is_enable_disable_cmd: bool,
) -> DatastoreResult<()> {
    let mut first_err: Option<DatastoreError> = None;
    let mut last_err = None;
    let mut swaps = 0usize;

    for attempt in engine.retry().attempts() {
        match do_update(engine, det, propagate, is_enable_disable_cmd) {
            Ok(()) => return first_err.map_or(Ok(()), Err),
            Err(e) if is_enable_disable_cmd => return Err(e),
            Err(e) if det.conf.is_pending_create() => {
                do_destroy(engine, det);
                return Err(e);
            }
            Err(e) => {
                det.conf.switch_attr();
                swaps += 1;
                warn!(
                    "FAILED auto_commit {} {} (attempt {}): {}: rollbacking....",
                    K::NAME,
                    det.conf.name,
                    attempt + 1,
                    e
                );
                first_err.get_or_insert_with(|| e.clone());
                last_err = Some(e);
            }
        }
    }

    // The last failure destroyed the old resource and staged the previous
    // attributes, so they get one restore attempt past the bound.
    if swaps % 2 == 1 {
        match do_update(engine, det, propagate, is_enable_disable_cmd) {
            Ok(()) => return first_err.map_or(Ok(()), Err),
            Err(e) => {
                warn!("FAILED auto_commit {} {} (restore): {}", K::NAME, det.conf.name, e);
                det.conf.switch_attr();
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(DatastoreError::invalid_state_transition))
}

/// Applies a staged edit, or the pending enable state when nothing changed.
fn do_update<K: ObjectKind>(
    engine: &mut Engine,
    det: &mut Detached<K>,
    propagate: bool,
    is_enable_disable_cmd: bool,
) -> DatastoreResult<()> {
    let state = engine.state();
    let conf = &mut det.conf;

    if conf.is_modified() {
        let Some(attr) = conf.modified.clone() else {
            return Err(DatastoreError::invalid_args());
        };
        if conf.current.is_some() {
            if let Err(e) = K::destroy(engine.dataplane(), conf) {
                warn!("Can't delete {} {}: {}", K::NAME, conf.name, e);
            }
        }
        K::create(engine.dataplane(), conf, &attr)?;
        K::bind(engine, conf)?;
        if conf.is_enabled {
            K::start(engine, conf, propagate)?;
        }
        if !state.is_applying() {
            conf.update_current_attr(state);
        }
        return Ok(());
    }

    // An edit equal to the live attributes needs no re-create.
    if state == InterpState::AutoCommit && conf.current.is_some() {
        conf.modified = None;
    }
    let mut ret = Ok(());
    if is_enable_disable_cmd || conf.is_enabling || conf.is_disabling {
        ret = if conf.is_enabled {
            K::start(engine, conf, propagate)
        } else {
            K::stop(engine, conf, propagate)
        };
    }
    // Atomic passes keep the intent so a rollback can undo it.
    if !state.is_applying() {
        conf.clear_intent();
    }
    ret
}

/// Dry runs keep the bookkeeping of a real apply without any side effect.
fn dry_run_update<K: ObjectKind>(engine: &mut Engine, det: &mut Detached<K>) {
    if det.conf.is_modified() {
        if let Err(e) = K::bind(engine, &mut det.conf) {
            debug!("dryrun bind of {} failed: {}", det.conf.name, e);
        }
    }
    det.conf.resolve_enabled();
    det.conf.clear_intent();
    det.conf.update_current_attr(InterpState::DryRun);
}

/// Runs the deferred destruction of a record, if any is due.
pub(crate) fn do_destroy<K: ObjectKind>(engine: &mut Engine, det: &mut Detached<K>) {
    let state = engine.state();
    let conf = &mut det.conf;

    if state == InterpState::Rolledback {
        if conf.is_pending_create() {
            // The committing pass may have created it already.
            if let Err(e) = K::destroy(engine.dataplane(), conf) {
                debug!("rolled back {} {} had no resource: {}", K::NAME, conf.name, e);
            }
            K::release(engine, conf);
            det.removed = true;
        } else {
            conf.abort_intent();
        }
        return;
    }

    if conf.is_destroying || matches!(state, InterpState::AutoCommit | InterpState::DryRun) {
        if state != InterpState::DryRun {
            if let Err(e) = K::destroy(engine.dataplane(), conf) {
                warn!("Can't delete {} {}: {}", K::NAME, conf.name, e);
            }
        }
        K::release(engine, conf);
        det.removed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::{BridgeAttr, BridgeKind};
    use pretty_assertions::assert_eq;

    fn committed_bridge(engine: &mut Engine, dpid: u64) -> Detached<BridgeKind> {
        let mut det = Detached::<BridgeKind>::fresh(":br0");
        det.conf.modified = Some(BridgeAttr {
            dpid,
            ..BridgeAttr::default()
        });
        update_internal(engine, &mut det, false, false).unwrap();
        det
    }

    #[test]
    fn test_auto_commit_promotes() {
        let mut engine = Engine::default();
        let det = committed_bridge(&mut engine, 1);
        assert_eq!(det.conf.current.as_ref().map(|a| a.dpid), Some(1));
        assert!(det.conf.modified.is_none());
        assert!(!det.removed);
    }

    #[test]
    fn test_atomic_defers_everything() {
        let mut engine = Engine::default();
        let mut det = committed_bridge(&mut engine, 1);
        engine.set_state(InterpState::Atomic);
        det.conf.modified = Some(BridgeAttr {
            dpid: 2,
            ..BridgeAttr::default()
        });
        det.conf.mark_enabling();
        update_internal(&mut engine, &mut det, true, false).unwrap();
        assert_eq!(det.conf.current.as_ref().map(|a| a.dpid), Some(1));
        assert!(!det.conf.is_enabled);

        engine.set_state(InterpState::Committing);
        update_internal(&mut engine, &mut det, false, false).unwrap();
        assert!(det.conf.is_enabled);
        assert_eq!(det.conf.current.as_ref().map(|a| a.dpid), Some(1));

        engine.set_state(InterpState::Committed);
        update_internal(&mut engine, &mut det, false, false).unwrap();
        assert_eq!(det.conf.current.as_ref().map(|a| a.dpid), Some(2));
        assert!(det.conf.modified.is_none());
    }

    #[test]
    fn test_rollback_undoes_resolved_enable() {
        let mut engine = Engine::default();
        let mut det = committed_bridge(&mut engine, 1);
        engine.set_state(InterpState::Atomic);
        det.conf.mark_enabling();

        engine.set_state(InterpState::Committing);
        update_internal(&mut engine, &mut det, false, false).unwrap();
        assert!(det.conf.is_enabled);
        assert!(det.conf.is_enabling);

        engine.set_state(InterpState::Rollbacking);
        update_internal(&mut engine, &mut det, false, false).unwrap();
        assert!(!det.conf.is_enabled);

        engine.set_state(InterpState::Rolledback);
        update_internal(&mut engine, &mut det, false, false).unwrap();
        assert!(!det.conf.is_enabling);
        assert!(!det.removed);
    }

    #[test]
    fn test_aborted_create_is_removed() {
        let mut engine = Engine::default();
        engine.set_state(InterpState::Aborted);
        let mut det = Detached::<BridgeKind>::fresh(":br0");
        update_internal(&mut engine, &mut det, false, false).unwrap();
        assert!(det.removed);
    }

    #[test]
    fn test_rolledback_create_is_removed() {
        let mut engine = Engine::default();
        let mut det = Detached::<BridgeKind>::fresh(":br0");
        engine.set_state(InterpState::Rollbacking);
        update_internal(&mut engine, &mut det, false, false).unwrap();
        assert!(!det.removed);
        engine.set_state(InterpState::Rolledback);
        update_internal(&mut engine, &mut det, false, false).unwrap();
        assert!(det.removed);
    }

    #[test]
    fn test_commit_failure_state_is_rejected() {
        let mut engine = Engine::default();
        let mut det = Detached::<BridgeKind>::fresh(":br0");
        engine.set_state(InterpState::CommitFailure);
        assert!(update_internal(&mut engine, &mut det, false, false).is_err());
    }

    #[test]
    fn test_dry_run_has_no_side_effects() {
        let mut engine = Engine::default();
        engine.set_state(InterpState::DryRun);
        let mut det = Detached::<BridgeKind>::fresh("dryrun:br0");
        update_internal(&mut engine, &mut det, true, false).unwrap();
        assert!(det.conf.current.is_some());
        assert_eq!(
            engine.dataplane().bridge_start("dryrun:br0").unwrap_err().result_code(),
            swcfg_common::ResultCode::NotFound
        );
    }
}
