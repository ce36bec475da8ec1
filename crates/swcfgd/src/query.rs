//! Read-only query commands over live dataplane tables.
//!
//! All of them resolve their bridges on the interpreter side and hand a
//! [`DumpJob`] to the dump workers.

use serde_json::json;
use swcfg_common::{parse_u8, DatastoreError, DatastoreResult, Reply, ResultCode, Tokens};

use crate::dump::{DumpJob, DumpKind};
use crate::engine::{Command, Engine, Response};

/// Bridges a query runs over: the one named, or every live bridge.
fn target_bridges(engine: &Engine, name: Option<&str>) -> DatastoreResult<Vec<String>> {
    let registry = &engine.stores().bridges;
    let Some(raw) = name else {
        return Ok(registry.list(None).into_iter().map(|c| c.name.clone()).collect());
    };
    let fullname = engine
        .namespaces()
        .fullname(raw)
        .map_err(|e| DatastoreError::interp(e.result_code(), format!("Can't get fullname {}.", raw)))?;
    match registry.find(&fullname) {
        Ok(conf) if !conf.is_destroying => Ok(vec![fullname]),
        _ => Err(DatastoreError::interp(
            ResultCode::NotFound,
            format!("name = {}", fullname),
        )),
    }
}

/// Splits `[<bridge>] [<sub-command>]` off the front of `toks`.
///
/// Returns the bridge name and the sub-command, `default` if none was given.
fn bridge_and_sub<'a>(
    toks: &mut Tokens<'a>,
    subs: &[&'static str],
    default: &'static str,
) -> (Option<&'a str>, &'static str) {
    let find_sub = |tok: &str| subs.iter().copied().find(|s| *s == tok);
    let name = match toks.peek() {
        Some(tok) if find_sub(tok).is_none() && !tok.starts_with('-') => toks.next(),
        _ => None,
    };
    let sub = match toks.peek().and_then(find_sub) {
        Some(sub) => {
            toks.next();
            sub
        }
        None => default,
    };
    (name, sub)
}

fn unknown_opt(opt: &str) -> DatastoreError {
    DatastoreError::interp(ResultCode::InvalidArgs, format!("opt = {}.", opt))
}

fn no_opts(toks: &Tokens<'_>) -> DatastoreResult<()> {
    match toks.peek() {
        Some(opt) => Err(unknown_opt(opt)),
        None => Ok(()),
    }
}

fn dump(engine: &Engine, kind: DumpKind) -> Response {
    Response::Dump(DumpJob::new(kind, engine.dumps().tmp_dir()))
}

/// `mactable [<bridge>] [dump]` and `mactable config [-tmp-dir [<path>]]`.
#[derive(Debug)]
pub struct MacTableCmd;

impl MacTableCmd {
    fn config(engine: &Engine, toks: &mut Tokens<'_>) -> DatastoreResult<Response> {
        let show = || Response::Reply(Reply::ok_with(json!({"tmp-dir": engine.dumps().tmp_dir()})));
        if toks.is_empty() {
            return Ok(show());
        }
        while let Some(opt) = toks.next() {
            match opt {
                "-tmp-dir" => match toks.value() {
                    Some(path) => engine.dumps().set_tmp_dir(path)?,
                    None => return Ok(show()),
                },
                other => return Err(unknown_opt(other)),
            }
        }
        Ok(Response::Reply(Reply::ok()))
    }
}

impl Command for MacTableCmd {
    fn name(&self) -> &'static str {
        "mactable"
    }

    fn execute(&self, engine: &mut Engine, args: &[String]) -> DatastoreResult<Response> {
        let mut toks = Tokens::new(args);
        if toks.peek() == Some("config") {
            toks.next();
            return Self::config(engine, &mut toks);
        }
        let (name, _) = bridge_and_sub(&mut toks, &["dump"], "dump");
        let bridges = target_bridges(engine, name)?;
        no_opts(&toks)?;
        Ok(dump(engine, DumpKind::MacTable { bridges }))
    }
}

/// `meter [<bridge>] [stats|dump]`
#[derive(Debug)]
pub struct MeterCmd;

impl Command for MeterCmd {
    fn name(&self) -> &'static str {
        "meter"
    }

    fn execute(&self, engine: &mut Engine, args: &[String]) -> DatastoreResult<Response> {
        let mut toks = Tokens::new(args);
        let (name, sub) = bridge_and_sub(&mut toks, &["stats", "dump"], "dump");
        let bridges = target_bridges(engine, name)?;
        no_opts(&toks)?;
        Ok(dump(
            engine,
            DumpKind::Meter {
                bridges,
                stats: sub == "stats",
            },
        ))
    }
}

/// `group [<bridge>] [stats|dump]`
#[derive(Debug)]
pub struct GroupCmd;

impl Command for GroupCmd {
    fn name(&self) -> &'static str {
        "group"
    }

    fn execute(&self, engine: &mut Engine, args: &[String]) -> DatastoreResult<Response> {
        let mut toks = Tokens::new(args);
        let (name, sub) = bridge_and_sub(&mut toks, &["stats", "dump"], "dump");
        let bridges = target_bridges(engine, name)?;
        no_opts(&toks)?;
        Ok(dump(
            engine,
            DumpKind::Group {
                bridges,
                stats: sub == "stats",
            },
        ))
    }
}

/// `route [<bridge>] [dump]`
#[derive(Debug)]
pub struct RouteCmd;

impl Command for RouteCmd {
    fn name(&self) -> &'static str {
        "route"
    }

    fn execute(&self, engine: &mut Engine, args: &[String]) -> DatastoreResult<Response> {
        let mut toks = Tokens::new(args);
        let (name, _) = bridge_and_sub(&mut toks, &["dump"], "dump");
        let bridges = target_bridges(engine, name)?;
        no_opts(&toks)?;
        Ok(dump(engine, DumpKind::Route { bridges }))
    }
}

/// `flow [<bridge>] [dump] [-table-id <id>]`
#[derive(Debug)]
pub struct FlowCmd;

impl Command for FlowCmd {
    fn name(&self) -> &'static str {
        "flow"
    }

    fn execute(&self, engine: &mut Engine, args: &[String]) -> DatastoreResult<Response> {
        let mut toks = Tokens::new(args);
        let (name, _) = bridge_and_sub(&mut toks, &["dump"], "dump");
        let bridges = target_bridges(engine, name)?;
        let mut table_id = None;
        while let Some(opt) = toks.next() {
            match opt {
                "-table-id" => table_id = Some(parse_u8(toks.require_value()?)?),
                other => return Err(unknown_opt(other)),
            }
        }
        Ok(dump(engine, DumpKind::Flow { bridges, table_id }))
    }
}

/// `affinition [dump]`
#[derive(Debug)]
pub struct AffinitionCmd;

impl Command for AffinitionCmd {
    fn name(&self) -> &'static str {
        "affinition"
    }

    fn execute(&self, engine: &mut Engine, args: &[String]) -> DatastoreResult<Response> {
        let mut toks = Tokens::new(args);
        if toks.peek() == Some("dump") {
            toks.next();
        }
        no_opts(&toks)?;
        Ok(dump(engine, DumpKind::Affinition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    fn job(engine: &mut Engine, line: &str) -> DumpKind {
        match engine.execute(line) {
            Response::Dump(job) => job.kind().clone(),
            Response::Reply(reply) => panic!("{} replied {}", line, reply.to_json()),
        }
    }

    fn reply(engine: &mut Engine, line: &str) -> Value {
        serde_json::from_str(&engine.run_line(line)).unwrap()
    }

    fn engine_with_bridges() -> Engine {
        let mut engine = Engine::default();
        engine.run_line("bridge br0 create");
        engine.run_line("bridge br1 create");
        engine
    }

    #[test]
    fn test_mactable_targets() {
        let mut engine = engine_with_bridges();
        assert_eq!(
            job(&mut engine, "mactable"),
            DumpKind::MacTable {
                bridges: vec![":br0".to_string(), ":br1".to_string()]
            }
        );
        assert_eq!(
            job(&mut engine, "mactable br1 dump"),
            DumpKind::MacTable {
                bridges: vec![":br1".to_string()]
            }
        );
        assert_eq!(
            reply(&mut engine, "mactable nope"),
            serde_json::json!({"ret": "NOT_FOUND", "data": "name = :nope"})
        );
        assert_eq!(reply(&mut engine, "mactable br0 -x")["ret"], "INVALID_ARGS");
    }

    #[test]
    fn test_mactable_tmp_dir() {
        let mut engine = Engine::default();
        assert_eq!(
            reply(&mut engine, "mactable config -tmp-dir"),
            serde_json::json!({"ret": "OK", "data": {"tmp-dir": "/tmp"}})
        );
        let dir = tempfile::tempdir().unwrap();
        let line = format!("mactable config -tmp-dir {}", dir.path().display());
        assert_eq!(reply(&mut engine, &line), serde_json::json!({"ret": "OK"}));
        assert_eq!(engine.dumps().tmp_dir(), dir.path());
        assert_eq!(
            reply(&mut engine, "mactable config -tmp-dir /nonexistent")["ret"],
            "POSIX_API_ERROR"
        );
    }

    #[test]
    fn test_meter_and_group_sub_commands() {
        let mut engine = engine_with_bridges();
        assert_eq!(
            job(&mut engine, "meter br0 stats"),
            DumpKind::Meter {
                bridges: vec![":br0".to_string()],
                stats: true
            }
        );
        assert_eq!(
            job(&mut engine, "group br0"),
            DumpKind::Group {
                bridges: vec![":br0".to_string()],
                stats: false
            }
        );
    }

    #[test]
    fn test_flow_table_id() {
        let mut engine = engine_with_bridges();
        assert_eq!(
            job(&mut engine, "flow br0 dump -table-id 3"),
            DumpKind::Flow {
                bridges: vec![":br0".to_string()],
                table_id: Some(3)
            }
        );
        assert_eq!(reply(&mut engine, "flow br0 -table-id 256")["ret"], "OUT_OF_RANGE");
        assert_eq!(reply(&mut engine, "flow br0 -table-id")["ret"], "INVALID_ARGS");
    }

    #[test]
    fn test_route_and_affinition_run() {
        let mut engine = engine_with_bridges();
        assert_eq!(
            reply(&mut engine, "route br0"),
            serde_json::json!({"ret": "OK", "data": [{"name": ":br0", "routes": []}]})
        );
        assert_eq!(reply(&mut engine, "affinition dump")["ret"], "OK");
        assert_eq!(reply(&mut engine, "affinition stats")["ret"], "INVALID_ARGS");
    }
}
