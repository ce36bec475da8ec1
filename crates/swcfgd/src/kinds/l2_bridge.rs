//! `l2-bridge`: the MAC learning table bound to one bridge.

use std::path::PathBuf;

use serde_json::{json, Map, Value};
use swcfg_common::{parse_u64, DatastoreError, DatastoreResult, Namespaces, Reply, ResultCode, Tokens};
use tracing::debug;

use super::unknown_opt;
use crate::dataplane::Dataplane;
use crate::dump::{DumpJob, DumpKind};
use crate::engine::{Engine, Response, Stores};
use crate::kind::{KConf, KRegistry, ObjectKind, OptParsed, QueryCmd};

pub const DEFAULT_EXPIRE: u64 = 300;
pub const DEFAULT_MAX_ENTRIES: u64 = 1_000_000;
pub const DEFAULT_TMP_DIR: &str = "/tmp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L2BridgeAttr {
    /// Ageing time of learned entries, in seconds.
    pub expire: u64,
    pub max_entries: u64,
    /// Staging directory of this table's dumps.
    pub tmp_dir: PathBuf,
}

impl Default for L2BridgeAttr {
    fn default() -> Self {
        Self {
            expire: DEFAULT_EXPIRE,
            max_entries: DEFAULT_MAX_ENTRIES,
            tmp_dir: PathBuf::from(DEFAULT_TMP_DIR),
        }
    }
}

/// Bridge the table is bound to, maintained by the bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct L2BridgeBinding {
    pub bridge: Option<String>,
}

#[derive(Debug)]
pub struct L2BridgeKind;

impl L2BridgeKind {
    /// Binds or unbinds the owning bridge. A missing table is ignored.
    pub fn set_bridge(engine: &mut Engine, name: &str, bridge: Option<&str>) {
        if let Ok(conf) = engine.stores_mut().l2_bridges.find_mut(name) {
            debug!("l2-bridge {}: bridge = {:?}", name, bridge);
            conf.extra.bridge = bridge.map(str::to_string);
        }
    }

    fn bound_bridge(conf: &KConf<Self>) -> DatastoreResult<&str> {
        conf.extra.bridge.as_deref().ok_or_else(|| {
            DatastoreError::interp(
                ResultCode::NotOperational,
                format!("name = {}. is not bound to a bridge.", conf.name),
            )
        })
    }
}

impl ObjectKind for L2BridgeKind {
    type Attr = L2BridgeAttr;
    type Extra = L2BridgeBinding;

    const NAME: &'static str = "l2-bridge";
    const REQUIRES_USED: bool = true;
    const HAS_QUERIES: bool = true;

    fn registry(stores: &Stores) -> &KRegistry<Self> {
        &stores.l2_bridges
    }

    fn registry_mut(stores: &mut Stores) -> &mut KRegistry<Self> {
        &mut stores.l2_bridges
    }

    fn parse_opt(
        _engine: &Engine,
        conf: &mut KConf<Self>,
        opt: &str,
        toks: &mut Tokens<'_>,
    ) -> DatastoreResult<OptParsed> {
        match opt {
            "-expire" => {
                let Some(value) = toks.value() else {
                    return Ok(OptParsed::Show("expire"));
                };
                conf.modified_mut()?.expire = parse_u64(value)?;
            }
            "-max-entries" => {
                let Some(value) = toks.value() else {
                    return Ok(OptParsed::Show("max-entries"));
                };
                conf.modified_mut()?.max_entries = parse_u64(value)?;
            }
            "-tmp-dir" => {
                let Some(value) = toks.value() else {
                    return Ok(OptParsed::Show("tmp-dir"));
                };
                if value.is_empty() {
                    return Err(DatastoreError::bad_opt_value(ResultCode::InvalidArgs, value));
                }
                conf.modified_mut()?.tmp_dir = PathBuf::from(value);
            }
            _ => return Err(unknown_opt(opt)),
        }
        Ok(OptParsed::Set)
    }

    fn create(dp: &dyn Dataplane, conf: &KConf<Self>, attr: &L2BridgeAttr) -> DatastoreResult<()> {
        dp.l2_bridge_create(&conf.name, attr)
    }

    fn destroy(dp: &dyn Dataplane, conf: &KConf<Self>) -> DatastoreResult<()> {
        dp.l2_bridge_destroy(&conf.name)
    }

    fn start(engine: &mut Engine, conf: &KConf<Self>, _propagate: bool) -> DatastoreResult<()> {
        engine.dataplane().l2_bridge_start(&conf.name)
    }

    fn stop(engine: &mut Engine, conf: &KConf<Self>, _propagate: bool) -> DatastoreResult<()> {
        engine.dataplane().l2_bridge_stop(&conf.name)
    }

    fn render(conf: &KConf<Self>, attr: &L2BridgeAttr, out: &mut Map<String, Value>) {
        out.insert("expire".into(), json!(attr.expire));
        out.insert("max-entries".into(), json!(attr.max_entries));
        out.insert("tmp-dir".into(), json!(attr.tmp_dir.display().to_string()));
        out.insert(
            "bridge".into(),
            json!(conf.extra.bridge.as_deref().unwrap_or_default()),
        );
    }

    fn serialize(attr: &L2BridgeAttr) -> Vec<String> {
        vec![
            "-expire".to_string(),
            attr.expire.to_string(),
            "-max-entries".to_string(),
            attr.max_entries.to_string(),
            "-tmp-dir".to_string(),
            attr.tmp_dir.display().to_string(),
        ]
    }

    fn duplicate(ns: &Namespaces, conf: &KConf<Self>, target_ns: &str) -> KConf<Self> {
        let mut dup = conf.duplicate(ns.rehome(&conf.name, target_ns));
        dup.extra.bridge = conf.extra.bridge.as_deref().map(|b| ns.rehome(b, target_ns));
        dup
    }

    fn query(engine: &mut Engine, conf: &KConf<Self>, cmd: QueryCmd) -> DatastoreResult<Response> {
        let bridge = Self::bound_bridge(conf)?.to_string();
        match cmd {
            QueryCmd::Stats => {
                let entries = engine.dataplane().l2_bridge_entries(&bridge)?;
                Ok(Response::Reply(Reply::ok_with(json!([{
                    "name": conf.name,
                    "entries": entries,
                }]))))
            }
            QueryCmd::Clear => {
                engine.dataplane().l2_bridge_clear(&bridge)?;
                Ok(Response::Reply(Reply::ok()))
            }
            QueryCmd::Dump => {
                let tmp_dir = conf
                    .latest()
                    .map(|a| a.tmp_dir.clone())
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_TMP_DIR));
                Ok(Response::Dump(DumpJob::new(
                    DumpKind::L2Bridge {
                        name: conf.name.clone(),
                        bridge,
                    },
                    tmp_dir,
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn conf() -> KConf<L2BridgeKind> {
        KConf::<L2BridgeKind>::new(":l2")
    }

    fn parse(conf: &mut KConf<L2BridgeKind>, args: &[&str]) -> DatastoreResult<OptParsed> {
        let engine = Engine::default();
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let mut toks = Tokens::new(&args);
        let opt = toks.next().unwrap_or_default();
        L2BridgeKind::parse_opt(&engine, conf, opt, &mut toks)
    }

    #[test]
    fn test_defaults() {
        let attr = L2BridgeAttr::default();
        assert_eq!(attr.expire, 300);
        assert_eq!(attr.max_entries, 1_000_000);
        assert_eq!(attr.tmp_dir, PathBuf::from("/tmp"));
    }

    #[test]
    fn test_parse_opts() {
        let mut conf = conf();
        assert_eq!(parse(&mut conf, &["-expire", "60"]).unwrap(), OptParsed::Set);
        assert_eq!(parse(&mut conf, &["-tmp-dir", "/var/tmp"]).unwrap(), OptParsed::Set);
        let attr = conf.modified.clone().unwrap();
        assert_eq!(attr.expire, 60);
        assert_eq!(attr.tmp_dir, PathBuf::from("/var/tmp"));

        assert_eq!(parse(&mut conf, &["-max-entries"]).unwrap(), OptParsed::Show("max-entries"));
    }

    #[test]
    fn test_parse_bad_values() {
        let mut conf = conf();
        let err = parse(&mut conf, &["-expire", "18446744073709551616"]).unwrap_err();
        assert_eq!(err.result_code(), ResultCode::OutOfRange);

        let err = parse(&mut conf, &["-expire", "abc"]).unwrap_err();
        assert_eq!(err.result_code(), ResultCode::InvalidArgs);
        assert_eq!(err.message(), Some("Bad opt value = abc."));

        let err = parse(&mut conf, &["-hoge", "1"]).unwrap_err();
        assert_eq!(err.message(), Some("opt = -hoge."));
    }

    #[test]
    fn test_serialize_and_render() {
        let mut conf = conf();
        conf.extra.bridge = Some(":br0".to_string());
        let attr = L2BridgeAttr::default();
        assert_eq!(
            L2BridgeKind::serialize(&attr).join(" "),
            "-expire 300 -max-entries 1000000 -tmp-dir /tmp"
        );

        let mut out = Map::new();
        L2BridgeKind::render(&conf, &attr, &mut out);
        assert_eq!(
            out.keys().cloned().collect::<Vec<_>>(),
            vec!["expire", "max-entries", "tmp-dir", "bridge"]
        );
        assert_eq!(out["bridge"], json!(":br0"));
    }

    #[test]
    fn test_duplicate_rehomes_binding() {
        let ns = Namespaces::default();
        let mut conf = conf();
        conf.extra.bridge = Some(":br0".to_string());
        let dup = L2BridgeKind::duplicate(&ns, &conf, "dryrun");
        assert_eq!(dup.name, "dryrun:l2");
        assert_eq!(dup.extra.bridge.as_deref(), Some("dryrun:br0"));
    }

    #[test]
    fn test_query_requires_bridge() {
        let mut engine = Engine::default();
        let err = L2BridgeKind::query(&mut engine, &conf(), QueryCmd::Stats).unwrap_err();
        assert_eq!(err.result_code(), ResultCode::NotOperational);
    }
}
