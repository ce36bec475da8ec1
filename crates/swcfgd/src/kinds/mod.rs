//! Managed object kinds.
//!
//! | kind             | uses             | used by  |
//! |------------------|------------------|----------|
//! | `policer-action` |                  | policer  |
//! | `policer`        | policer-action   |          |
//! | `l2-bridge`      |                  | bridge   |
//! | `bridge`         | l2-bridge        |          |

mod bridge;
mod l2_bridge;
mod policer;
mod policer_action;

pub use bridge::{BridgeAttr, BridgeKind, FailMode};
pub use l2_bridge::{L2BridgeAttr, L2BridgeBinding, L2BridgeKind};
pub use policer::{PolicerAttr, PolicerKind, BANDWIDTH_LIMIT_MIN, BURST_SIZE_LIMIT_MIN};
pub use policer_action::{PolicerActionAttr, PolicerActionKind, PolicerActionType};

use swcfg_common::{DatastoreError, ResultCode};
use tracing::warn;

use crate::engine::Engine;
use crate::kind::ObjectKind;

/// `INVALID_ARGS "opt = <opt>."`
pub(crate) fn unknown_opt(opt: &str) -> DatastoreError {
    DatastoreError::interp(ResultCode::InvalidArgs, format!("opt = {}.", opt))
}

/// Sets the used flag of a referenced object; a missing target is ignored.
pub(crate) fn set_used<K: ObjectKind>(engine: &mut Engine, name: &str, is_used: bool) {
    match K::registry_mut(engine.stores_mut()).set_used(name, is_used) {
        Ok(()) => {}
        Err(e) if e.result_code() == ResultCode::NotFound => {}
        Err(e) => warn!("can't set used flag of {} {}: {}", K::NAME, name, e),
    }
}
