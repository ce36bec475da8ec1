//! `policer-action`: what a policer does with non-conforming traffic.

use std::fmt;

use serde_json::{json, Map, Value};
use swcfg_common::{DatastoreError, DatastoreResult, ResultCode, Tokens};

use super::unknown_opt;
use crate::dataplane::Dataplane;
use crate::engine::{Engine, Stores};
use crate::kind::{KConf, KRegistry, ObjectKind, OptParsed};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PolicerActionType {
    #[default]
    Discard,
}

impl PolicerActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicerActionType::Discard => "discard",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "discard" => Some(PolicerActionType::Discard),
            _ => None,
        }
    }
}

impl fmt::Display for PolicerActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicerActionAttr {
    pub action_type: PolicerActionType,
}

#[derive(Debug)]
pub struct PolicerActionKind;

impl ObjectKind for PolicerActionKind {
    type Attr = PolicerActionAttr;
    type Extra = ();

    const NAME: &'static str = "policer-action";
    const REQUIRES_USED: bool = true;

    fn registry(stores: &Stores) -> &KRegistry<Self> {
        &stores.policer_actions
    }

    fn registry_mut(stores: &mut Stores) -> &mut KRegistry<Self> {
        &mut stores.policer_actions
    }

    fn parse_opt(
        _engine: &Engine,
        conf: &mut KConf<Self>,
        opt: &str,
        toks: &mut Tokens<'_>,
    ) -> DatastoreResult<OptParsed> {
        if opt != "-type" {
            return Err(unknown_opt(opt));
        }
        let Some(value) = toks.value() else {
            return Ok(OptParsed::Show("type"));
        };
        conf.modified_mut()?.action_type = PolicerActionType::parse(value)
            .ok_or_else(|| DatastoreError::bad_opt_value(ResultCode::InvalidArgs, value))?;
        Ok(OptParsed::Set)
    }

    fn create(dp: &dyn Dataplane, conf: &KConf<Self>, attr: &PolicerActionAttr) -> DatastoreResult<()> {
        dp.policer_action_create(&conf.name, attr)
    }

    fn destroy(dp: &dyn Dataplane, conf: &KConf<Self>) -> DatastoreResult<()> {
        dp.policer_action_destroy(&conf.name)
    }

    // Actions take effect through their policer.
    fn start(_engine: &mut Engine, _conf: &KConf<Self>, _propagate: bool) -> DatastoreResult<()> {
        Ok(())
    }

    fn stop(_engine: &mut Engine, _conf: &KConf<Self>, _propagate: bool) -> DatastoreResult<()> {
        Ok(())
    }

    fn render(_conf: &KConf<Self>, attr: &PolicerActionAttr, out: &mut Map<String, Value>) {
        out.insert("type".into(), json!(attr.action_type.as_str()));
    }

    fn serialize(attr: &PolicerActionAttr) -> Vec<String> {
        vec!["-type".to_string(), attr.action_type.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_opt() {
        let engine = Engine::default();
        let mut conf = KConf::<PolicerActionKind>::new(":a");
        let args = vec!["drop".to_string()];
        let err = PolicerActionKind::parse_opt(&engine, &mut conf, "-type", &mut Tokens::new(&args))
            .unwrap_err();
        assert_eq!(err.message(), Some("Bad opt value = drop."));

        let args = vec!["discard".to_string()];
        let parsed =
            PolicerActionKind::parse_opt(&engine, &mut conf, "-type", &mut Tokens::new(&args)).unwrap();
        assert_eq!(parsed, OptParsed::Set);
        assert_eq!(PolicerActionKind::serialize(&PolicerActionAttr::default()).join(" "), "-type discard");
    }
}
