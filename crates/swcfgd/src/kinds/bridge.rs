//! `bridge`: a logical switch instance, optionally owning an l2-bridge.

use std::fmt;

use serde_json::{json, Map, Value};
use swcfg_common::{
    parse_set_edit, parse_u32, parse_u64, DatastoreError, DatastoreResult, InterpState, Namespaces,
    ResultCode, SetEdit, Tokens,
};
use tracing::warn;

use super::{set_used, unknown_opt, L2BridgeKind};
use crate::cmd::{disable_propagation, enable_propagation};
use crate::dataplane::Dataplane;
use crate::engine::{Engine, Stores};
use crate::kind::{check_reference, KConf, KRegistry, ObjectKind, OptParsed};

/// Behaviour when the controller connection is lost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailMode {
    #[default]
    Secure,
    Standalone,
}

impl FailMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailMode::Secure => "secure",
            FailMode::Standalone => "standalone",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "secure" => Some(FailMode::Secure),
            "standalone" => Some(FailMode::Standalone),
            _ => None,
        }
    }
}

impl fmt::Display for FailMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeAttr {
    pub dpid: u64,
    pub fail_mode: FailMode,
    pub max_flows: u32,
    /// Fully-qualified name of the owned l2-bridge.
    pub l2_bridge: Option<String>,
}

impl Default for BridgeAttr {
    fn default() -> Self {
        Self {
            dpid: 0,
            fail_mode: FailMode::default(),
            max_flows: u32::MAX,
            l2_bridge: None,
        }
    }
}

#[derive(Debug)]
pub struct BridgeKind;

impl BridgeKind {
    fn l2_of(attr: Option<&BridgeAttr>) -> Option<String> {
        attr.and_then(|a| a.l2_bridge.clone())
    }

    /// Gives an l2-bridge back: unbound, unused and, unless inside a
    /// transaction pass, disabled.
    fn unbind(engine: &mut Engine, l2: &str, disable: bool) {
        L2BridgeKind::set_bridge(engine, l2, None);
        set_used::<L2BridgeKind>(engine, l2, false);
        if disable {
            if let Err(e) = disable_propagation::<L2BridgeKind>(engine, l2) {
                if e.result_code() != ResultCode::InvalidObject {
                    warn!("can't disable l2-bridge {}: {}", l2, e);
                }
            }
        }
    }
}

impl ObjectKind for BridgeKind {
    type Attr = BridgeAttr;
    type Extra = ();

    const NAME: &'static str = "bridge";
    const REQUIRES_USED: bool = false;

    fn registry(stores: &Stores) -> &KRegistry<Self> {
        &stores.bridges
    }

    fn registry_mut(stores: &mut Stores) -> &mut KRegistry<Self> {
        &mut stores.bridges
    }

    fn parse_opt(
        engine: &Engine,
        conf: &mut KConf<Self>,
        opt: &str,
        toks: &mut Tokens<'_>,
    ) -> DatastoreResult<OptParsed> {
        match opt {
            "-dpid" => {
                let Some(value) = toks.value() else {
                    return Ok(OptParsed::Show("dpid"));
                };
                conf.modified_mut()?.dpid = parse_u64(value)?;
            }
            "-fail-mode" => {
                let Some(value) = toks.value() else {
                    return Ok(OptParsed::Show("fail-mode"));
                };
                conf.modified_mut()?.fail_mode = FailMode::parse(value)
                    .ok_or_else(|| DatastoreError::bad_opt_value(ResultCode::InvalidArgs, value))?;
            }
            "-max-flows" => {
                let Some(value) = toks.value() else {
                    return Ok(OptParsed::Show("max-flows"));
                };
                conf.modified_mut()?.max_flows = parse_u32(value)?;
            }
            "-l2-bridge" => {
                let Some(value) = toks.value() else {
                    return Ok(OptParsed::Show("l2-bridge"));
                };
                let (edit, raw) = parse_set_edit(value)?;
                if edit == SetEdit::Remove {
                    let fullname = engine.namespaces().fullname(raw).map_err(|e| {
                        DatastoreError::interp(e.result_code(), format!("Can't get fullname {}.", raw))
                    })?;
                    let attr = conf.modified_mut()?;
                    if attr.l2_bridge.as_deref() != Some(fullname.as_str()) {
                        return Err(DatastoreError::interp(
                            ResultCode::NotFound,
                            format!("l2-bridge name = {}.", raw),
                        ));
                    }
                    attr.l2_bridge = None;
                } else {
                    let owned = [
                        Self::l2_of(conf.current.as_ref()),
                        Self::l2_of(conf.modified.as_ref()),
                    ];
                    let fullname = check_reference::<L2BridgeKind>(engine, raw, "l2-bridge", |n| {
                        owned.iter().flatten().any(|o| o == n)
                    })?;
                    conf.modified_mut()?.l2_bridge = Some(fullname);
                }
            }
            _ => return Err(unknown_opt(opt)),
        }
        Ok(OptParsed::Set)
    }

    fn create(dp: &dyn Dataplane, conf: &KConf<Self>, attr: &BridgeAttr) -> DatastoreResult<()> {
        dp.bridge_create(&conf.name, attr)
    }

    fn destroy(dp: &dyn Dataplane, conf: &KConf<Self>) -> DatastoreResult<()> {
        dp.bridge_destroy(&conf.name)
    }

    fn start(engine: &mut Engine, conf: &KConf<Self>, propagate: bool) -> DatastoreResult<()> {
        engine.dataplane().bridge_start(&conf.name)?;
        if propagate || engine.state().is_applying() {
            if let Some(l2) = Self::l2_of(conf.latest()) {
                enable_propagation::<L2BridgeKind>(engine, &l2)?;
            }
        }
        Ok(())
    }

    fn stop(engine: &mut Engine, conf: &KConf<Self>, propagate: bool) -> DatastoreResult<()> {
        engine.dataplane().bridge_stop(&conf.name)?;
        if propagate || engine.state().is_applying() {
            if let Some(l2) = Self::l2_of(conf.latest()) {
                disable_propagation::<L2BridgeKind>(engine, &l2)?;
            }
        }
        Ok(())
    }

    fn bind(engine: &mut Engine, conf: &mut KConf<Self>) -> DatastoreResult<()> {
        let old = Self::l2_of(conf.current.as_ref());
        let new = Self::l2_of(conf.modified.as_ref());
        if old != new {
            if let Some(old) = old {
                Self::unbind(engine, &old, true);
            }
        }
        if let Some(new) = new {
            set_used::<L2BridgeKind>(engine, &new, true);
            L2BridgeKind::set_bridge(engine, &new, Some(&conf.name));
        }
        Ok(())
    }

    fn release(engine: &mut Engine, conf: &mut KConf<Self>) {
        let disable = matches!(engine.state(), InterpState::AutoCommit | InterpState::DryRun);
        let mut refs = vec![Self::l2_of(conf.current.as_ref()), Self::l2_of(conf.modified.as_ref())];
        refs.dedup();
        for l2 in refs.into_iter().flatten() {
            Self::unbind(engine, &l2, disable);
        }
    }

    fn hold(engine: &mut Engine, attr: &BridgeAttr, used: bool) {
        if let Some(l2) = &attr.l2_bridge {
            set_used::<L2BridgeKind>(engine, l2, used);
        }
    }

    fn render(_conf: &KConf<Self>, attr: &BridgeAttr, out: &mut Map<String, Value>) {
        out.insert("dpid".into(), json!(attr.dpid));
        out.insert("fail-mode".into(), json!(attr.fail_mode.as_str()));
        out.insert("max-flows".into(), json!(attr.max_flows));
        out.insert(
            "l2-bridge".into(),
            json!(attr.l2_bridge.as_deref().unwrap_or_default()),
        );
    }

    fn serialize(attr: &BridgeAttr) -> Vec<String> {
        let mut out = vec![
            "-dpid".to_string(),
            attr.dpid.to_string(),
            "-fail-mode".to_string(),
            attr.fail_mode.to_string(),
            "-max-flows".to_string(),
            attr.max_flows.to_string(),
        ];
        if let Some(l2) = &attr.l2_bridge {
            out.push("-l2-bridge".to_string());
            out.push(l2.clone());
        }
        out
    }

    fn duplicate(ns: &Namespaces, conf: &KConf<Self>, target_ns: &str) -> KConf<Self> {
        let rehome = |attr: &BridgeAttr| BridgeAttr {
            l2_bridge: attr.l2_bridge.as_deref().map(|l2| ns.rehome(l2, target_ns)),
            ..attr.clone()
        };
        let mut dup = conf.duplicate(ns.rehome(&conf.name, target_ns));
        dup.current = conf.current.as_ref().map(rehome);
        dup.modified = conf.modified.as_ref().map(rehome);
        dup
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fail_mode() {
        assert_eq!(FailMode::parse("standalone"), Some(FailMode::Standalone));
        assert_eq!(FailMode::parse("open"), None);
        assert_eq!(FailMode::default().to_string(), "secure");
    }

    #[test]
    fn test_defaults_serialize() {
        assert_eq!(
            BridgeKind::serialize(&BridgeAttr::default()).join(" "),
            "-dpid 0 -fail-mode secure -max-flows 4294967295"
        );
    }

    #[test]
    fn test_duplicate_rehomes_l2_bridge() {
        let ns = Namespaces::default();
        let mut conf = KConf::<BridgeKind>::new(":br0");
        conf.modified.as_mut().unwrap().l2_bridge = Some(":l2".to_string());
        let dup = BridgeKind::duplicate(&ns, &conf, "dryrun");
        assert_eq!(dup.name, "dryrun:br0");
        assert_eq!(
            dup.modified.unwrap().l2_bridge.as_deref(),
            Some("dryrun:l2")
        );
    }

    #[test]
    fn test_l2_bridge_reference_must_exist() {
        let engine = Engine::default();
        let mut conf = KConf::<BridgeKind>::new(":br0");
        let args = vec!["missing".to_string()];
        let mut toks = Tokens::new(&args);
        let err = BridgeKind::parse_opt(&engine, &mut conf, "-l2-bridge", &mut toks).unwrap_err();
        assert_eq!(err.result_code(), ResultCode::NotFound);
        assert_eq!(err.message(), Some("l2-bridge name = missing."));
    }
}
