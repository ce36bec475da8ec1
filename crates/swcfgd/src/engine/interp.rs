//! Interpreter-level commands: transactions, dry runs, namespaces and
//! configuration dumps.
//!
//! An atomic block runs in passes. Each pass walks every object table in
//! commit order and hands each record to the coordinator in one state:
//!
//! | command          | passes                                               |
//! |------------------|------------------------------------------------------|
//! | `commit`         | Committing, Committed                                |
//! | commit failure   | Rollbacking, Rolledback, then a snapshot reload if   |
//! |                  | the rollback fails too                               |
//! | `abort`          | Aborting, Aborted                                    |
//! | `rollback-force` | Aborting, Rollbacking, Rolledback                    |

use std::fs;

use serde_json::json;
use swcfg_common::{
    DatastoreError, DatastoreResult, InterpState, Reply, ResultCode, Tokens, DRYRUN_NAMESPACE,
};
use tracing::{error, info, warn};

use super::{Command, Engine, Response, OBJECT_TABLES};

fn unknown_option(opt: &str) -> DatastoreError {
    DatastoreError::interp(ResultCode::InvalidArgs, format!("Unknown option '{}'", opt))
}

fn ok() -> DatastoreResult<Response> {
    Ok(Response::Reply(Reply::ok()))
}

/// Runs the coordinator over every record in `state`, stopping at the first
/// failure.
fn run_pass(engine: &mut Engine, state: InterpState) -> DatastoreResult<()> {
    engine.set_state(state);
    for table in OBJECT_TABLES.iter() {
        for name in table.names(engine) {
            table.update(engine, &name).map_err(|e| {
                warn!("{} pass failed on {} {}: {}", state, table.kind(), name, e);
                e
            })?;
        }
    }
    Ok(())
}

/// Force-destroys every object, dependents first. `ns` limits the sweep to
/// one namespace.
pub(crate) fn destroy_all(engine: &mut Engine, ns: Option<&str>) -> DatastoreResult<()> {
    let mut first_err = None;
    for table in OBJECT_TABLES.iter().rev() {
        if let Err(e) = table.destroy_all(engine, ns) {
            first_err.get_or_insert(e);
        }
    }
    first_err.map_or(Ok(()), Err)
}

fn finish_transaction(engine: &mut Engine) {
    engine.set_snapshot(None);
    engine.set_state(InterpState::AutoCommit);
}

fn begin(engine: &mut Engine) -> DatastoreResult<()> {
    if engine.state() != InterpState::AutoCommit {
        return Err(DatastoreError::invalid_state_transition());
    }
    let snapshot = engine.serialize_config();
    engine.set_snapshot(Some(snapshot));
    engine.set_state(InterpState::Atomic);
    Ok(())
}

fn require_atomic(engine: &Engine) -> DatastoreResult<()> {
    if engine.state() == InterpState::Atomic {
        Ok(())
    } else {
        Err(DatastoreError::invalid_state_transition())
    }
}

fn abort(engine: &mut Engine) -> DatastoreResult<()> {
    require_atomic(engine)?;
    info!("abort start.");
    let ret = run_pass(engine, InterpState::Aborting).and_then(|()| run_pass(engine, InterpState::Aborted));
    match &ret {
        Ok(()) => info!("abort success."),
        Err(e) => error!("CAUTION: Failed to abort: {}", e),
    }
    finish_transaction(engine);
    ret
}

fn commit(engine: &mut Engine) -> DatastoreResult<()> {
    require_atomic(engine)?;
    info!("commit start.");
    let ret = run_pass(engine, InterpState::Committing).map_err(|e| {
        error!("CAUTION: Failed to commit: {}", e);
        e
    });
    let ret = ret.and_then(|()| {
        run_pass(engine, InterpState::Committed).map_err(|e| {
            error!("CAUTION: Failed to cleanup after commit: {}", e);
            e
        })
    });
    match ret {
        Ok(()) => {
            info!("commit success.");
            finish_transaction(engine);
            Ok(())
        }
        Err(e) => {
            engine.set_state(InterpState::CommitFailure);
            rollback(engine)?;
            Err(e)
        }
    }
}

fn rollback(engine: &mut Engine) -> DatastoreResult<()> {
    info!("rollback start.");
    let ret = match run_pass(engine, InterpState::Rollbacking)
        .and_then(|()| run_pass(engine, InterpState::Rolledback))
    {
        Ok(()) => {
            info!("rollback success.");
            Ok(())
        }
        Err(e) => {
            error!("CAUTION: Failed to rollback: {}", e);
            auto_load(engine)
        }
    };
    finish_transaction(engine);
    ret
}

fn rollback_force(engine: &mut Engine) -> DatastoreResult<()> {
    require_atomic(engine)?;
    if let Err(e) = run_pass(engine, InterpState::Aborting) {
        error!("CAUTION: Failed to drop pending intents: {}", e);
    }
    rollback(engine)
}

/// Rebuilds the whole configuration from the snapshot taken at `begin`.
fn auto_load(engine: &mut Engine) -> DatastoreResult<()> {
    let Some(snapshot) = engine.take_snapshot() else {
        return Err(DatastoreError::interp(
            ResultCode::NotFound,
            "No configuration to roll back to.",
        ));
    };
    engine.set_state(InterpState::AutoCommit);
    if let Err(e) = destroy_all(engine, None) {
        error!("CAUTION: Failed to rollback (auto load): {}", e);
        return Err(e);
    }

    info!("auto rollbacking from snapshot.");
    let current = engine.namespaces().current().to_string();
    engine.namespaces_mut().unset_current();
    let failures: Vec<_> = engine
        .load_str(&snapshot)
        .into_iter()
        .filter(|(_, reply)| reply.ret != ResultCode::AlreadyExists)
        .collect();
    if engine.namespaces().exists(&current) {
        engine.namespaces_mut().set_current(&current)?;
    }
    match failures.first() {
        None => Ok(()),
        Some((line, reply)) => Err(DatastoreError::interp(
            reply.ret,
            format!("Can't reload line {}.", line),
        )),
    }
}

/// `atomic [begin|commit|abort|rollback-force]`
#[derive(Debug)]
pub struct AtomicCmd;

impl Command for AtomicCmd {
    fn name(&self) -> &'static str {
        "atomic"
    }

    fn execute(&self, engine: &mut Engine, args: &[String]) -> DatastoreResult<Response> {
        let mut toks = Tokens::new(args);
        let Some(sub) = toks.next() else {
            return ok();
        };
        if !matches!(sub, "begin" | "commit" | "abort" | "rollback-force") {
            return Err(unknown_option(sub));
        }
        toks.expect_end()?;
        if engine.state() == InterpState::DryRun {
            return ok();
        }
        match sub {
            "begin" => begin(engine)?,
            "commit" => commit(engine)?,
            "abort" => abort(engine)?,
            _ => rollback_force(engine)?,
        }
        ok()
    }
}

fn dryrun_begin(engine: &mut Engine) -> DatastoreResult<()> {
    if engine.state() != InterpState::AutoCommit {
        return Err(DatastoreError::invalid_state_transition());
    }
    let from = engine.namespaces().current().to_string();
    engine.set_state(InterpState::DryRun);
    // Leftovers of an earlier dry run.
    let ret = destroy_all(engine, Some(DRYRUN_NAMESPACE)).and_then(|()| {
        OBJECT_TABLES
            .iter()
            .try_for_each(|table| table.duplicate_namespace(engine, &from, DRYRUN_NAMESPACE))
    });
    match ret {
        Ok(()) => {
            engine.namespaces_mut().enter_dryrun();
            Ok(())
        }
        Err(e) => {
            if let Err(cleanup) = destroy_all(engine, Some(DRYRUN_NAMESPACE)) {
                warn!("can't clean up dryrun namespace: {}", cleanup);
            }
            engine.set_state(InterpState::AutoCommit);
            Err(e)
        }
    }
}

fn dryrun_end(engine: &mut Engine) -> DatastoreResult<()> {
    if engine.state() != InterpState::DryRun {
        return Err(DatastoreError::invalid_state_transition());
    }
    let ret = destroy_all(engine, Some(DRYRUN_NAMESPACE));
    engine.namespaces_mut().leave_dryrun();
    engine.set_state(InterpState::AutoCommit);
    ret
}

/// `dryrun begin|end`
#[derive(Debug)]
pub struct DryrunCmd;

impl Command for DryrunCmd {
    fn name(&self) -> &'static str {
        "dryrun"
    }

    fn execute(&self, engine: &mut Engine, args: &[String]) -> DatastoreResult<Response> {
        let mut toks = Tokens::new(args);
        let sub = toks
            .next()
            .ok_or_else(|| DatastoreError::interp(ResultCode::InvalidArgs, "Bad opt value."))?;
        toks.expect_end()?;
        match sub {
            "begin" => dryrun_begin(engine)?,
            "end" => dryrun_end(engine)?,
            other => return Err(unknown_option(other)),
        }
        ok()
    }
}

/// `namespace [add <ns>|delete <ns>|set <ns>|unset]`
#[derive(Debug)]
pub struct NamespaceCmd;

impl NamespaceCmd {
    fn show(engine: &Engine) -> Response {
        let ns = engine.namespaces();
        let current = match engine.state() {
            InterpState::DryRun => ns.saved().unwrap_or_default(),
            _ => ns.current(),
        };
        let all: Vec<&str> = ns.list().collect();
        Response::Reply(Reply::ok_with(json!({"current": current, "all": all})))
    }

    fn add(engine: &mut Engine, ns: &str) -> DatastoreResult<()> {
        if engine.state() != InterpState::AutoCommit {
            return Err(DatastoreError::invalid_state_transition());
        }
        engine
            .namespaces_mut()
            .add(ns)
            .map_err(|e| DatastoreError::interp(e.result_code(), format!("Can't add = {}.", ns)))
    }

    fn delete(engine: &mut Engine, ns: &str) -> DatastoreResult<()> {
        if engine.state() != InterpState::AutoCommit {
            return Err(DatastoreError::invalid_state_transition());
        }
        if ns.is_empty() || ns == DRYRUN_NAMESPACE || !engine.namespaces().exists(ns) {
            return Err(DatastoreError::bad_opt_value(ResultCode::NotFound, ns));
        }
        if engine.namespaces().current() == ns {
            engine.namespaces_mut().unset_current();
        }
        destroy_all(engine, Some(ns))
            .map_err(|e| DatastoreError::interp(e.result_code(), "destroy object failed."))?;
        engine.namespaces_mut().remove(ns)
    }

    fn set(engine: &mut Engine, ns: &str) -> DatastoreResult<()> {
        if ns == DRYRUN_NAMESPACE {
            return Err(DatastoreError::bad_opt_value(ResultCode::InvalidNamespace, ns));
        }
        engine
            .namespaces_mut()
            .set_current(ns)
            .map_err(|e| DatastoreError::bad_opt_value(e.result_code(), ns))
    }
}

impl Command for NamespaceCmd {
    fn name(&self) -> &'static str {
        "namespace"
    }

    fn execute(&self, engine: &mut Engine, args: &[String]) -> DatastoreResult<Response> {
        let Some((sub, rest)) = args.split_first() else {
            return Ok(Self::show(engine));
        };
        let arity = match sub.as_str() {
            "add" | "delete" | "set" => 1,
            "unset" => 0,
            other => return Err(unknown_option(other)),
        };
        if rest.len() != arity {
            return Err(DatastoreError::interp(
                ResultCode::InvalidArgs,
                "invalid option value.",
            ));
        }
        // The dry-run namespace stays current until `dryrun end`.
        if engine.state() == InterpState::DryRun {
            return ok();
        }
        let ns = rest.first().map(String::as_str).unwrap_or_default();
        match sub.as_str() {
            "add" => Self::add(engine, ns)?,
            "delete" => Self::delete(engine, ns)?,
            "set" => Self::set(engine, ns)?,
            _ => engine.namespaces_mut().unset_current(),
        }
        ok()
    }
}

/// `save [<file>]`
#[derive(Debug)]
pub struct SaveCmd;

impl Command for SaveCmd {
    fn name(&self) -> &'static str {
        "save"
    }

    fn execute(&self, engine: &mut Engine, args: &[String]) -> DatastoreResult<Response> {
        let mut toks = Tokens::new(args);
        let path = toks.next();
        toks.expect_end()?;
        let text = engine.serialize_config();
        match path {
            None => Ok(Response::Reply(Reply::ok_with(json!(text)))),
            Some(path) => {
                fs::write(path, text).map_err(|e| {
                    warn!("can't save to {}: {}", path, e);
                    DatastoreError::interp(ResultCode::PosixApiError, format!("Can't write {}.", path))
                })?;
                info!("configuration saved to {}", path);
                ok()
            }
        }
    }
}

/// `destroy-all-obj`
#[derive(Debug)]
pub struct DestroyAllObjCmd;

impl Command for DestroyAllObjCmd {
    fn name(&self) -> &'static str {
        "destroy-all-obj"
    }

    fn execute(&self, engine: &mut Engine, args: &[String]) -> DatastoreResult<Response> {
        Tokens::new(args).expect_end()?;
        match engine.state() {
            InterpState::AutoCommit => destroy_all(engine, None)?,
            InterpState::DryRun => destroy_all(engine, Some(DRYRUN_NAMESPACE))?,
            _ => return Err(DatastoreError::invalid_state_transition()),
        }
        ok()
    }
}
