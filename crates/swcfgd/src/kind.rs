//! Per-kind contract of managed objects.
//!
//! Every configurable entity (bridge, l2-bridge, policer, policer-action)
//! implements [`ObjectKind`] over its own attribute type. The generic
//! sub-command handlers in [`crate::cmd`] and the transaction coordinator
//! in [`crate::engine`] only ever talk to a kind through this trait.
//!
//! Hooks are split in two groups:
//!
//! - dataplane hooks (`create`, `destroy`, `start`, `stop`) perform side
//!   effects and are skipped entirely during dry runs;
//! - bookkeeping hooks (`bind`, `release`, `hold`) maintain the used flags
//!   and back references between objects and never touch the dataplane.

use std::fmt;
use std::marker::PhantomData;

use serde_json::{Map, Value};
use swcfg_common::{Attr, Conf, DatastoreError, DatastoreResult, Namespaces, Registry, ResultCode, Tokens};

use crate::dataplane::Dataplane;
use crate::engine::{Engine, Response, Stores};

/// Registry record of kind `K`.
pub type KConf<K> = Conf<<K as ObjectKind>::Attr, <K as ObjectKind>::Extra>;

/// Registry of kind `K`.
pub type KRegistry<K> = Registry<<K as ObjectKind>::Attr, <K as ObjectKind>::Extra>;

/// Outcome of parsing one option of a `create` / `config` sub-command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptParsed {
    /// The option carried a value that was applied to `modified`.
    Set,
    /// The option had no value; the named output field is requested.
    Show(&'static str),
}

/// Read-only sub-commands of kinds that own live tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryCmd {
    Stats,
    Dump,
    Clear,
}

impl QueryCmd {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "stats" => Some(QueryCmd::Stats),
            "dump" => Some(QueryCmd::Dump),
            "clear" => Some(QueryCmd::Clear),
            _ => None,
        }
    }
}

/// One managed object kind.
pub trait ObjectKind: Sized + Send + Sync + 'static {
    type Attr: Attr;
    type Extra: Clone + Default + fmt::Debug + Send + Sync + 'static;

    /// Command name, e.g. `l2-bridge`.
    const NAME: &'static str;

    /// `enable` is only allowed once another object uses this one.
    const REQUIRES_USED: bool;

    /// Whether `stats`, `dump` and `clear` are accepted.
    const HAS_QUERIES: bool = false;

    fn registry(stores: &Stores) -> &KRegistry<Self>;
    fn registry_mut(stores: &mut Stores) -> &mut KRegistry<Self>;

    /// Applies one option to `conf.modified`.
    ///
    /// `opt` is the option token including its leading dash. The option
    /// value, if any, is taken from `toks`.
    fn parse_opt(
        engine: &Engine,
        conf: &mut KConf<Self>,
        opt: &str,
        toks: &mut Tokens<'_>,
    ) -> DatastoreResult<OptParsed>;

    /// Creates the dataplane resource from `conf.modified`.
    fn create(dp: &dyn Dataplane, conf: &KConf<Self>, attr: &Self::Attr) -> DatastoreResult<()>;

    /// Destroys the dataplane resource built from `conf.current`.
    fn destroy(dp: &dyn Dataplane, conf: &KConf<Self>) -> DatastoreResult<()>;

    /// Starts the resource; cascades to dependents when `propagate`.
    fn start(engine: &mut Engine, conf: &KConf<Self>, propagate: bool) -> DatastoreResult<()>;

    /// Stops the resource; cascades to dependents when `propagate`.
    fn stop(engine: &mut Engine, conf: &KConf<Self>, propagate: bool) -> DatastoreResult<()>;

    /// Claims the objects `conf.modified` refers to after a successful apply.
    fn bind(_engine: &mut Engine, _conf: &mut KConf<Self>) -> DatastoreResult<()> {
        Ok(())
    }

    /// Gives back everything the record refers to before it is deleted.
    fn release(_engine: &mut Engine, _conf: &mut KConf<Self>) {}

    /// Marks or unmarks the references of `attr` inside an atomic block.
    fn hold(_engine: &mut Engine, _attr: &Self::Attr, _used: bool) {}

    /// Appends the kind's show fields, in output order.
    fn render(conf: &KConf<Self>, attr: &Self::Attr, out: &mut Map<String, Value>);

    /// Option tokens that recreate `attr` with `create`.
    fn serialize(attr: &Self::Attr) -> Vec<String>;

    /// Copies a record into `target_ns`, rewriting the names it refers to.
    fn duplicate(ns: &Namespaces, conf: &KConf<Self>, target_ns: &str) -> KConf<Self> {
        conf.duplicate(ns.rehome(&conf.name, target_ns))
    }

    /// Runs a `stats` / `dump` / `clear` sub-command.
    fn query(_engine: &mut Engine, conf: &KConf<Self>, cmd: QueryCmd) -> DatastoreResult<Response> {
        let _ = cmd;
        Err(DatastoreError::interp(
            ResultCode::InvalidArgs,
            format!("{} does not support queries.", conf.name),
        ))
    }
}

/// Object-safe view of one kind, as stored in the engine's tables.
pub trait ObjectTable: Sync {
    fn kind(&self) -> &'static str;

    /// Every registered name, destroying ones included.
    fn names(&self, engine: &Engine) -> Vec<String>;

    /// Runs the coordinator on one record in the engine's current state.
    fn update(&self, engine: &mut Engine, name: &str) -> DatastoreResult<()>;

    /// Replayable `create` lines of the committed objects in `ns`.
    fn serialize(&self, engine: &Engine, ns: &str) -> Vec<String>;

    /// `enable` / `disable` lines of the committed objects in `ns`.
    fn statuses(&self, engine: &Engine, ns: &str) -> Vec<String>;

    /// Tears down every object in `ns`, ignoring used flags.
    fn destroy_all(&self, engine: &mut Engine, ns: Option<&str>) -> DatastoreResult<()>;

    /// Copies every object of `from` into `to`.
    fn duplicate_namespace(&self, engine: &mut Engine, from: &str, to: &str) -> DatastoreResult<()>;
}

/// Static dispatch entry of kind `K`.
pub struct KindTable<K>(PhantomData<fn() -> K>);

impl<K> KindTable<K> {
    pub const fn new() -> Self {
        KindTable(PhantomData)
    }
}

impl<K> fmt::Debug for KindTable<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KindTable")
    }
}

/// Quotes a token for a replayable command line when needed.
pub fn quote(token: &str) -> String {
    if !token.is_empty() && !token.contains(|c: char| c.is_whitespace() || c == '"') {
        return token.to_string();
    }
    format!("\"{}\"", token.replace('"', "\\\""))
}

/// Resolves a reference to an object of kind `K`.
///
/// The referenced object must exist and be unused, unless `conf` already
/// refers to it.
pub fn check_reference<K: ObjectKind>(
    engine: &Engine,
    raw: &str,
    label: &str,
    already_ours: impl Fn(&str) -> bool,
) -> DatastoreResult<String> {
    let fullname = engine.namespaces().fullname(raw).map_err(|e| {
        DatastoreError::interp(e.result_code(), format!("Can't get fullname {}.", raw))
    })?;
    let target = K::registry(engine.stores()).find(&fullname).map_err(|e| {
        DatastoreError::interp(e.result_code(), format!("{} name = {}.", label, raw))
    })?;
    if target.is_destroying {
        return Err(DatastoreError::interp(
            ResultCode::NotFound,
            format!("{} name = {}.", label, raw),
        ));
    }
    if target.is_used && !already_ours(&fullname) {
        return Err(DatastoreError::interp(
            ResultCode::NotOperational,
            format!("{} name = {}.", label, raw),
        ));
    }
    Ok(fullname)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote() {
        assert_eq!(quote(":br0"), ":br0");
        assert_eq!(quote("/tmp/my dir"), "\"/tmp/my dir\"");
        assert_eq!(quote(""), "\"\"");
        assert_eq!(quote("a\"b"), "\"a\\\"b\"");
    }

    #[test]
    fn test_query_cmd_parse() {
        assert_eq!(QueryCmd::parse("stats"), Some(QueryCmd::Stats));
        assert_eq!(QueryCmd::parse("clear"), Some(QueryCmd::Clear));
        assert_eq!(QueryCmd::parse("enable"), None);
    }
}
