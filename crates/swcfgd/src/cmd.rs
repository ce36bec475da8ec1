//! Generic sub-commands shared by every managed object kind.
//!
//! Grammar: `<kind> [<name> [<sub-command> [<opt> [<value>]]...]]`.
//!
//! | sub-command               | effect                                        |
//! |---------------------------|-----------------------------------------------|
//! | (none)                    | show the object, or every object of a namespace |
//! | `current` / `modified`    | show the chosen attribute set                 |
//! | `create`                  | register and apply                            |
//! | `config`                  | stage an edit and apply, or show fields       |
//! | `enable` / `disable`      | start or stop the dataplane resource          |
//! | `destroy`                 | tear down and unregister                      |
//! | `stats` / `dump` / `clear`| live-table queries, where the kind has them   |

use serde_json::{json, Map, Value};
use swcfg_common::{
    DatastoreError, DatastoreResult, InterpState, Reply, ResultCode, SearchTarget, Tokens,
};
use tracing::{debug, warn};

use crate::engine::txn::{do_destroy, reapply, update_internal, with_detached, Detached};
use crate::engine::{Command, Engine, Response};
use crate::kind::{quote, KConf, KRegistry, KindTable, ObjectKind, ObjectTable, OptParsed, QueryCmd};

/// Which attribute set a show request renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShowAttr {
    Current,
    Modified,
}

impl ShowAttr {
    fn pick<K: ObjectKind>(self, conf: &KConf<K>) -> Option<&K::Attr> {
        match self {
            ShowAttr::Current => conf.current.as_ref(),
            ShowAttr::Modified => conf.modified.as_ref(),
        }
    }

    fn missing(self) -> DatastoreError {
        let which = match self {
            ShowAttr::Current => "current",
            ShowAttr::Modified => "modified",
        };
        DatastoreError::interp(ResultCode::NotOperational, format!("Not set {}.", which))
    }
}

fn resolve(engine: &Engine, name: &str) -> DatastoreResult<String> {
    engine
        .namespaces()
        .fullname(name)
        .map_err(|e| DatastoreError::interp(e.result_code(), format!("Can't get fullname {}.", name)))
}

/// Fails with `INVALID_OBJECT` unless `fullname` is registered and alive.
fn ensure_live<K: ObjectKind>(engine: &Engine, fullname: &str) -> DatastoreResult<()> {
    match K::registry(engine.stores()).find(fullname) {
        Ok(conf) if !conf.is_destroying => Ok(()),
        _ => Err(DatastoreError::interp(
            ResultCode::InvalidObject,
            format!("name = {}", fullname),
        )),
    }
}

/// Renders one record: `name`, the kind's fields, then the status flags.
pub(crate) fn render<K: ObjectKind>(conf: &KConf<K>, attr: &K::Attr) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("name".into(), json!(conf.name));
    K::render(conf, attr, &mut out);
    out.insert("is-used".into(), json!(conf.is_used));
    out.insert("is-enabled".into(), json!(conf.is_enabled));
    out
}

/// Applies every option left in `toks`; returns whether a value was set and
/// the fields requested for display.
fn parse_opts<K: ObjectKind>(
    engine: &Engine,
    conf: &mut KConf<K>,
    toks: &mut Tokens<'_>,
) -> DatastoreResult<(bool, Vec<&'static str>)> {
    let mut is_set = false;
    let mut shows = Vec::new();
    while let Some(opt) = toks.next() {
        if !opt.starts_with('-') {
            return Err(DatastoreError::interp(
                ResultCode::InvalidArgs,
                format!("opt = {}.", opt),
            ));
        }
        match K::parse_opt(engine, conf, opt, toks)? {
            OptParsed::Set => is_set = true,
            OptParsed::Show(field) => shows.push(field),
        }
    }
    Ok((is_set, shows))
}

fn create<K: ObjectKind>(engine: &mut Engine, name: &str, toks: &mut Tokens<'_>) -> DatastoreResult<Reply> {
    let fullname = resolve(engine, name)?;
    if let Ok(conf) = K::registry(engine.stores()).find(&fullname) {
        if conf.is_destroying {
            return config::<K>(engine, name, toks);
        }
        return Err(DatastoreError::interp(
            ResultCode::AlreadyExists,
            format!("name = {}", fullname),
        ));
    }

    let mut det = Detached::<K>::fresh(&fullname);
    let (_, shows) = parse_opts::<K>(engine, &mut det.conf, toks)?;
    if !shows.is_empty() {
        return Err(DatastoreError::interp(ResultCode::InvalidArgs, "Bad opt value."));
    }
    update_internal::<K>(engine, &mut det, true, false)?;
    if !det.removed {
        K::registry_mut(engine.stores_mut()).add(det.conf)?;
    }
    debug!("{} {} created in {}", K::NAME, fullname, engine.state());
    Ok(Reply::ok())
}

fn config<K: ObjectKind>(engine: &mut Engine, name: &str, toks: &mut Tokens<'_>) -> DatastoreResult<Reply> {
    let fullname = resolve(engine, name)?;
    if !K::registry(engine.stores()).contains(&fullname) {
        return create::<K>(engine, name, toks);
    }

    with_detached::<K, _>(engine, &fullname, |engine, det| {
        let had_modified = det.conf.modified.is_some();
        let was_destroying = det.conf.is_destroying;
        det.conf.dup_modified()?;
        det.conf.is_destroying = false;

        let (is_set, shows) = match parse_opts::<K>(engine, &mut det.conf, toks) {
            Ok(parsed) => parsed,
            Err(e) => {
                if !had_modified {
                    det.conf.modified = None;
                }
                det.conf.is_destroying = was_destroying;
                return Err(e);
            }
        };

        if is_set {
            update_internal::<K>(engine, det, true, false)?;
        } else if !had_modified {
            det.conf.modified = None;
        }

        if shows.is_empty() {
            return Ok(Reply::ok());
        }
        let Some(attr) = det.conf.latest() else {
            return Ok(Reply::ok());
        };
        let mut full = render::<K>(&det.conf, attr);
        full.retain(|key, _| key == "name" || shows.contains(&key.as_str()));
        Ok(Reply::ok_with(Value::Array(vec![Value::Object(full)])))
    })
}

fn enable<K: ObjectKind>(engine: &mut Engine, fullname: &str, propagate: bool) -> DatastoreResult<()> {
    ensure_live::<K>(engine, fullname)?;
    with_detached::<K, _>(engine, fullname, |engine, det| {
        if K::REQUIRES_USED && !det.conf.is_used {
            return Err(DatastoreError::interp(
                ResultCode::NotOperational,
                format!("name = {}. is not used.", det.conf.name),
            ));
        }
        if engine.state() == InterpState::Atomic {
            if det.conf.is_enabled {
                det.conf.clear_intent();
            } else {
                det.conf.mark_enabling();
            }
            return Ok(());
        }
        if det.conf.is_enabled {
            return Ok(());
        }
        det.conf.is_enabled = true;
        update_internal::<K>(engine, det, propagate, true).map_err(|e| {
            det.conf.is_enabled = false;
            e
        })
    })
}

fn disable<K: ObjectKind>(engine: &mut Engine, fullname: &str, propagate: bool) -> DatastoreResult<()> {
    ensure_live::<K>(engine, fullname)?;
    with_detached::<K, _>(engine, fullname, |engine, det| {
        if engine.state() == InterpState::Atomic {
            if det.conf.is_enabled {
                det.conf.mark_disabling();
            } else {
                det.conf.clear_intent();
            }
            return Ok(());
        }
        if !det.conf.is_enabled {
            return Ok(());
        }
        det.conf.is_enabled = false;
        update_internal::<K>(engine, det, propagate, true).map_err(|e| {
            det.conf.is_enabled = true;
            e
        })
    })
}

fn destroy<K: ObjectKind>(engine: &mut Engine, fullname: &str, force: bool) -> DatastoreResult<()> {
    if !force {
        ensure_live::<K>(engine, fullname)?;
    }
    with_detached::<K, _>(engine, fullname, |engine, det| {
        if force {
            det.conf.is_used = false;
        } else if det.conf.is_used {
            return Err(DatastoreError::interp(
                ResultCode::NotOperational,
                format!("name = {}. is used.", det.conf.name),
            ));
        }
        if engine.state() == InterpState::Atomic {
            det.conf.mark_destroying();
            return Ok(());
        }
        if det.conf.is_enabled {
            det.conf.is_enabled = false;
            if let Err(e) = update_internal::<K>(engine, det, true, true) {
                if !force {
                    det.conf.is_enabled = true;
                    return Err(e);
                }
                warn!("{} {}: disable before destroy failed: {}", K::NAME, det.conf.name, e);
            }
        }
        do_destroy::<K>(engine, det);
        Ok(())
    })
}

fn query<K: ObjectKind>(engine: &mut Engine, name: &str, cmd: QueryCmd) -> DatastoreResult<Response> {
    let fullname = resolve(engine, name)?;
    ensure_live::<K>(engine, &fullname)?;
    let conf = K::registry(engine.stores()).find(&fullname)?.clone();
    K::query(engine, &conf, cmd)
}

fn show_list<K: ObjectKind>(engine: &Engine, ns: &str, which: ShowAttr) -> Reply {
    let items: Vec<Value> = K::registry(engine.stores())
        .list(Some(ns))
        .into_iter()
        .filter_map(|conf| which.pick::<K>(conf).map(|attr| Value::Object(render::<K>(conf, attr))))
        .collect();
    if items.is_empty() {
        Reply::ok()
    } else {
        Reply::ok_with(Value::Array(items))
    }
}

fn show<K: ObjectKind>(engine: &Engine, name: &str, which: ShowAttr) -> DatastoreResult<Reply> {
    let target = engine
        .namespaces()
        .search_target(name)
        .map_err(|e| DatastoreError::interp(e.result_code(), format!("Can't get fullname {}.", name)))?;
    let fullname = match target {
        SearchTarget::DefaultNamespace => return Ok(show_list::<K>(engine, "", which)),
        SearchTarget::Namespace(ns) => return Ok(show_list::<K>(engine, &ns, which)),
        SearchTarget::Fullname(fullname) => fullname,
    };
    let registry = K::registry(engine.stores());
    let conf = match registry.find(&fullname) {
        Ok(conf) if !conf.is_destroying => conf,
        _ => {
            return Err(DatastoreError::interp(
                ResultCode::NotFound,
                format!("name = {}", fullname),
            ))
        }
    };
    let attr = which.pick::<K>(conf).ok_or_else(|| which.missing())?;
    let items = KRegistry::<K>::one_list(conf)
        .into_iter()
        .map(|conf| Value::Object(render::<K>(conf, attr)))
        .collect();
    Ok(Reply::ok_with(Value::Array(items)))
}

/// Enables a dependent object on behalf of its parent.
pub(crate) fn enable_propagation<K: ObjectKind>(engine: &mut Engine, name: &str) -> DatastoreResult<()> {
    enable::<K>(engine, name, false)
}

/// Disables a dependent object on behalf of its parent.
pub(crate) fn disable_propagation<K: ObjectKind>(engine: &mut Engine, name: &str) -> DatastoreResult<()> {
    disable::<K>(engine, name, false)
}

/// Re-applies a dependent object after its parent changed.
pub(crate) fn update_propagation<K: ObjectKind>(engine: &mut Engine, name: &str) -> DatastoreResult<()> {
    ensure_live::<K>(engine, name)?;
    with_detached::<K, _>(engine, name, |engine, det| reapply::<K>(engine, det))
}

impl<K: ObjectKind> Command for KindTable<K> {
    fn name(&self) -> &'static str {
        K::NAME
    }

    fn execute(&self, engine: &mut Engine, args: &[String]) -> DatastoreResult<Response> {
        let mut toks = Tokens::new(args);
        let Some(name) = toks.next() else {
            let ns = engine.namespaces().current().to_string();
            return Ok(Response::Reply(show_list::<K>(engine, &ns, ShowAttr::Current)));
        };
        let Some(sub) = toks.next() else {
            return show::<K>(engine, name, ShowAttr::Current).map(Response::Reply);
        };

        let reply = match sub {
            "create" => create::<K>(engine, name, &mut toks)?,
            "config" => config::<K>(engine, name, &mut toks)?,
            "enable" | "disable" | "destroy" => {
                toks.expect_end()?;
                let fullname = resolve(engine, name)?;
                match sub {
                    "enable" => enable::<K>(engine, &fullname, true)?,
                    "disable" => disable::<K>(engine, &fullname, true)?,
                    _ => destroy::<K>(engine, &fullname, false)?,
                }
                Reply::ok()
            }
            "current" | "modified" => {
                if !toks.is_empty() {
                    return Err(DatastoreError::invalid_args());
                }
                let which = if sub == "modified" {
                    ShowAttr::Modified
                } else {
                    ShowAttr::Current
                };
                show::<K>(engine, name, which)?
            }
            other => match QueryCmd::parse(other) {
                Some(cmd) if K::HAS_QUERIES => {
                    toks.expect_end()?;
                    return query::<K>(engine, name, cmd);
                }
                _ => {
                    return Err(DatastoreError::interp(
                        ResultCode::InvalidArgs,
                        format!("sub_cmd = {}.", other),
                    ))
                }
            },
        };
        Ok(Response::Reply(reply))
    }
}

impl<K: ObjectKind> ObjectTable for KindTable<K> {
    fn kind(&self) -> &'static str {
        K::NAME
    }

    fn names(&self, engine: &Engine) -> Vec<String> {
        K::registry(engine.stores()).names()
    }

    fn update(&self, engine: &mut Engine, name: &str) -> DatastoreResult<()> {
        if !K::registry(engine.stores()).contains(name) {
            // Deleted by an earlier record of the same pass.
            return Ok(());
        }
        with_detached::<K, _>(engine, name, |engine, det| update_internal::<K>(engine, det, false, false))
    }

    fn serialize(&self, engine: &Engine, ns: &str) -> Vec<String> {
        K::registry(engine.stores())
            .list(Some(ns))
            .into_iter()
            .filter_map(|conf| {
                let attr = conf.current.as_ref()?;
                let opts: Vec<String> = K::serialize(attr).iter().map(|t| quote(t)).collect();
                Some(format!("{} {} create {}", K::NAME, quote(&conf.name), opts.join(" ")))
            })
            .collect()
    }

    fn statuses(&self, engine: &Engine, ns: &str) -> Vec<String> {
        K::registry(engine.stores())
            .list(Some(ns))
            .into_iter()
            .filter(|conf| conf.current.is_some())
            .map(|conf| {
                let status = if conf.is_enabled { "enable" } else { "disable" };
                format!("{} {} {}", K::NAME, quote(&conf.name), status)
            })
            .collect()
    }

    fn destroy_all(&self, engine: &mut Engine, ns: Option<&str>) -> DatastoreResult<()> {
        let registry = K::registry(engine.stores());
        let names = match ns {
            Some(ns) => registry.names_in(ns),
            None => registry.names(),
        };
        let mut first_err = None;
        for name in names {
            if let Err(e) = destroy::<K>(engine, &name, true) {
                warn!("can't destroy {} {}: {}", K::NAME, name, e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn duplicate_namespace(&self, engine: &mut Engine, from: &str, to: &str) -> DatastoreResult<()> {
        let dups: Vec<KConf<K>> = K::registry(engine.stores())
            .list(Some(from))
            .into_iter()
            .map(|conf| K::duplicate(engine.namespaces(), conf, to))
            .collect();
        let registry = K::registry_mut(engine.stores_mut());
        for dup in dups {
            registry.add(dup)?;
        }
        Ok(())
    }
}
