//! `policer`: rate limiter applying a set of policer actions.

use std::collections::BTreeSet;

use itertools::Itertools;
use serde_json::{json, Map, Value};
use swcfg_common::{
    parse_set_edit, parse_u64, parse_u8, DatastoreError, DatastoreResult, InterpState, Namespaces,
    ResultCode, SetEdit, Tokens,
};
use tracing::warn;

use super::{set_used, unknown_opt, PolicerActionKind};
use crate::cmd::{disable_propagation, enable_propagation, update_propagation};
use crate::dataplane::Dataplane;
use crate::engine::{Engine, Stores};
use crate::kind::{check_reference, KConf, KRegistry, ObjectKind, OptParsed};

pub const BANDWIDTH_LIMIT_MIN: u64 = 1500;
pub const BURST_SIZE_LIMIT_MIN: u64 = 1500;
pub const BANDWIDTH_PERCENT_MAX: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicerAttr {
    /// Fully-qualified names of the attached policer actions.
    pub actions: BTreeSet<String>,
    pub bandwidth_limit: u64,
    pub burst_size_limit: u64,
    pub bandwidth_percent: u8,
}

impl Default for PolicerAttr {
    fn default() -> Self {
        Self {
            actions: BTreeSet::new(),
            bandwidth_limit: BANDWIDTH_LIMIT_MIN,
            burst_size_limit: BURST_SIZE_LIMIT_MIN,
            bandwidth_percent: 0,
        }
    }
}

#[derive(Debug)]
pub struct PolicerKind;

fn actions_of(attr: Option<&PolicerAttr>) -> BTreeSet<String> {
    attr.map(|a| a.actions.clone()).unwrap_or_default()
}

fn parse_min(value: &str, min: u64) -> DatastoreResult<u64> {
    let v = parse_u64(value)?;
    if v < min {
        return Err(DatastoreError::bad_opt_value(ResultCode::OutOfRange, value));
    }
    Ok(v)
}

fn disable_action(engine: &mut Engine, action: &str) {
    if let Err(e) = disable_propagation::<PolicerActionKind>(engine, action) {
        if e.result_code() != ResultCode::InvalidObject {
            warn!("can't disable policer-action {}: {}", action, e);
        }
    }
}

impl ObjectKind for PolicerKind {
    type Attr = PolicerAttr;
    type Extra = ();

    const NAME: &'static str = "policer";
    const REQUIRES_USED: bool = true;

    fn registry(stores: &Stores) -> &KRegistry<Self> {
        &stores.policers
    }

    fn registry_mut(stores: &mut Stores) -> &mut KRegistry<Self> {
        &mut stores.policers
    }

    fn parse_opt(
        engine: &Engine,
        conf: &mut KConf<Self>,
        opt: &str,
        toks: &mut Tokens<'_>,
    ) -> DatastoreResult<OptParsed> {
        match opt {
            "-action" => {
                let Some(value) = toks.value() else {
                    return Ok(OptParsed::Show("actions"));
                };
                let (edit, raw) = parse_set_edit(value)?;
                if edit == SetEdit::Remove {
                    let fullname = engine.namespaces().fullname(raw).map_err(|e| {
                        DatastoreError::interp(e.result_code(), format!("Can't get fullname {}.", raw))
                    })?;
                    if !conf.modified_mut()?.actions.remove(&fullname) {
                        return Err(DatastoreError::interp(
                            ResultCode::NotFound,
                            format!("action name = {}.", raw),
                        ));
                    }
                } else {
                    let mut owned = actions_of(conf.current.as_ref());
                    owned.extend(actions_of(conf.modified.as_ref()));
                    let fullname = check_reference::<PolicerActionKind>(engine, raw, "action", |n| {
                        owned.contains(n)
                    })?;
                    let attr = conf.modified_mut()?;
                    if edit == SetEdit::Replace {
                        attr.actions.clear();
                    }
                    attr.actions.insert(fullname);
                }
            }
            "-bandwidth-limit" => {
                let Some(value) = toks.value() else {
                    return Ok(OptParsed::Show("bandwidth-limit"));
                };
                conf.modified_mut()?.bandwidth_limit = parse_min(value, BANDWIDTH_LIMIT_MIN)?;
            }
            "-burst-size-limit" => {
                let Some(value) = toks.value() else {
                    return Ok(OptParsed::Show("burst-size-limit"));
                };
                conf.modified_mut()?.burst_size_limit = parse_min(value, BURST_SIZE_LIMIT_MIN)?;
            }
            "-bandwidth-percent" => {
                let Some(value) = toks.value() else {
                    return Ok(OptParsed::Show("bandwidth-percent"));
                };
                let percent = parse_u8(value)?;
                if percent > BANDWIDTH_PERCENT_MAX {
                    return Err(DatastoreError::bad_opt_value(ResultCode::OutOfRange, value));
                }
                conf.modified_mut()?.bandwidth_percent = percent;
            }
            _ => return Err(unknown_opt(opt)),
        }
        Ok(OptParsed::Set)
    }

    fn create(dp: &dyn Dataplane, conf: &KConf<Self>, attr: &PolicerAttr) -> DatastoreResult<()> {
        dp.policer_create(&conf.name, attr)?;
        for action in &attr.actions {
            dp.policer_action_attach(&conf.name, action)?;
        }
        Ok(())
    }

    fn destroy(dp: &dyn Dataplane, conf: &KConf<Self>) -> DatastoreResult<()> {
        for action in actions_of(conf.current.as_ref()) {
            if let Err(e) = dp.policer_action_detach(&conf.name, &action) {
                warn!("can't detach {} from {}: {}", action, conf.name, e);
            }
        }
        dp.policer_destroy(&conf.name)
    }

    fn start(engine: &mut Engine, conf: &KConf<Self>, propagate: bool) -> DatastoreResult<()> {
        engine.dataplane().policer_start(&conf.name)?;
        if propagate || engine.state().is_applying() {
            for action in actions_of(conf.latest()) {
                enable_propagation::<PolicerActionKind>(engine, &action)?;
            }
        }
        Ok(())
    }

    fn stop(engine: &mut Engine, conf: &KConf<Self>, propagate: bool) -> DatastoreResult<()> {
        engine.dataplane().policer_stop(&conf.name)?;
        if propagate || engine.state().is_applying() {
            for action in actions_of(conf.latest()) {
                disable_propagation::<PolicerActionKind>(engine, &action)?;
            }
        }
        Ok(())
    }

    fn bind(engine: &mut Engine, conf: &mut KConf<Self>) -> DatastoreResult<()> {
        let old = actions_of(conf.current.as_ref());
        let new = actions_of(conf.modified.as_ref());
        for removed in old.difference(&new) {
            set_used::<PolicerActionKind>(engine, removed, false);
            disable_action(engine, removed);
        }
        for action in &new {
            set_used::<PolicerActionKind>(engine, action, true);
            update_propagation::<PolicerActionKind>(engine, action)?;
        }
        Ok(())
    }

    fn release(engine: &mut Engine, conf: &mut KConf<Self>) {
        let disable = matches!(engine.state(), InterpState::AutoCommit | InterpState::DryRun);
        let mut refs = actions_of(conf.current.as_ref());
        refs.extend(actions_of(conf.modified.as_ref()));
        for action in refs {
            set_used::<PolicerActionKind>(engine, &action, false);
            if disable {
                disable_action(engine, &action);
            }
        }
    }

    fn hold(engine: &mut Engine, attr: &PolicerAttr, used: bool) {
        for action in &attr.actions {
            set_used::<PolicerActionKind>(engine, action, used);
        }
    }

    fn render(_conf: &KConf<Self>, attr: &PolicerAttr, out: &mut Map<String, Value>) {
        out.insert("actions".into(), json!(attr.actions.iter().collect_vec()));
        out.insert("bandwidth-limit".into(), json!(attr.bandwidth_limit));
        out.insert("burst-size-limit".into(), json!(attr.burst_size_limit));
        out.insert("bandwidth-percent".into(), json!(attr.bandwidth_percent));
    }

    fn serialize(attr: &PolicerAttr) -> Vec<String> {
        let mut out = Vec::new();
        for action in &attr.actions {
            out.push("-action".to_string());
            out.push(format!("+{}", action));
        }
        out.extend([
            "-bandwidth-limit".to_string(),
            attr.bandwidth_limit.to_string(),
            "-burst-size-limit".to_string(),
            attr.burst_size_limit.to_string(),
            "-bandwidth-percent".to_string(),
            attr.bandwidth_percent.to_string(),
        ]);
        out
    }

    fn duplicate(ns: &Namespaces, conf: &KConf<Self>, target_ns: &str) -> KConf<Self> {
        let rehome = |attr: &PolicerAttr| PolicerAttr {
            actions: attr.actions.iter().map(|a| ns.rehome(a, target_ns)).collect(),
            ..attr.clone()
        };
        let mut dup = conf.duplicate(ns.rehome(&conf.name, target_ns));
        dup.current = conf.current.as_ref().map(rehome);
        dup.modified = conf.modified.as_ref().map(rehome);
        dup
    }
}
