//! The engine context: registries, namespaces, interpreter state and the
//! dataplane handle, plus the command table that dispatches into them.
//!
//! One [`Engine`] serves one datastore. The daemon keeps it behind a single
//! async mutex so every command runs to completion before the next starts;
//! tests create as many isolated engines as they like.

pub(crate) mod interp;
pub(crate) mod txn;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use swcfg_common::{
    tokenize, DatastoreError, DatastoreResult, InterpState, Namespaces, Reply, ResultCode,
    RetryPolicy,
};
use tracing::{debug, instrument, warn};

use crate::config::EngineConfig;
use crate::dataplane::{Dataplane, SoftDataplane};
use crate::dump::{DumpContext, DumpJob};
use crate::kind::{KRegistry, KindTable, ObjectTable};
use crate::kinds::{BridgeKind, L2BridgeKind, PolicerActionKind, PolicerKind};
use crate::query;

/// One interpreter command, e.g. `bridge` or `atomic`.
pub trait Command: Sync {
    fn name(&self) -> &'static str;

    /// Runs the command with the tokens that follow its name.
    fn execute(&self, engine: &mut Engine, args: &[String]) -> DatastoreResult<Response>;
}

/// Result of one command.
#[derive(Debug)]
pub enum Response {
    /// Ready to send.
    Reply(Reply),
    /// Must be produced by a dump worker.
    Dump(DumpJob),
}

impl From<Reply> for Response {
    fn from(reply: Reply) -> Self {
        Response::Reply(reply)
    }
}

/// Registries of every managed object kind.
#[derive(Debug, Clone)]
pub struct Stores {
    pub policer_actions: KRegistry<PolicerActionKind>,
    pub policers: KRegistry<PolicerKind>,
    pub l2_bridges: KRegistry<L2BridgeKind>,
    pub bridges: KRegistry<BridgeKind>,
}

impl Stores {
    fn new(delimiter: &str) -> Self {
        Self {
            policer_actions: KRegistry::<PolicerActionKind>::new(delimiter),
            policers: KRegistry::<PolicerKind>::new(delimiter),
            l2_bridges: KRegistry::<L2BridgeKind>::new(delimiter),
            bridges: KRegistry::<BridgeKind>::new(delimiter),
        }
    }
}

pub(crate) static POLICER_ACTIONS: KindTable<PolicerActionKind> = KindTable::new();
pub(crate) static POLICERS: KindTable<PolicerKind> = KindTable::new();
pub(crate) static L2_BRIDGES: KindTable<L2BridgeKind> = KindTable::new();
pub(crate) static BRIDGES: KindTable<BridgeKind> = KindTable::new();

/// Object tables in commit order. Teardown walks them in reverse.
pub(crate) static OBJECT_TABLES: [&dyn ObjectTable; 4] =
    [&POLICER_ACTIONS, &POLICERS, &L2_BRIDGES, &BRIDGES];

static COMMANDS: [&dyn Command; 15] = [
    &POLICER_ACTIONS,
    &POLICERS,
    &L2_BRIDGES,
    &BRIDGES,
    &interp::AtomicCmd,
    &interp::DryrunCmd,
    &interp::NamespaceCmd,
    &interp::SaveCmd,
    &interp::DestroyAllObjCmd,
    &query::MacTableCmd,
    &query::MeterCmd,
    &query::GroupCmd,
    &query::RouteCmd,
    &query::FlowCmd,
    &query::AffinitionCmd,
];

/// Looks up a command by name.
pub fn lookup(name: &str) -> DatastoreResult<&'static dyn Command> {
    COMMANDS
        .iter()
        .copied()
        .find(|cmd| cmd.name() == name)
        .ok_or_else(|| DatastoreError::interp(ResultCode::InvalidArgs, format!("command = {}.", name)))
}

/// Names of every registered command.
pub fn command_names() -> impl Iterator<Item = &'static str> {
    COMMANDS.iter().map(|cmd| cmd.name())
}

/// The datastore.
pub struct Engine {
    config: EngineConfig,
    state: InterpState,
    namespaces: Namespaces,
    stores: Stores,
    dataplane: Arc<dyn Dataplane>,
    dumps: DumpContext,
    atomic_snapshot: Option<String>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default(), Arc::new(SoftDataplane::new()))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("namespace", &self.namespaces.current())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(config: EngineConfig, dataplane: Arc<dyn Dataplane>) -> Self {
        let namespaces = Namespaces::new(config.delimiter.clone(), config.namespace_max);
        let stores = Stores::new(&config.delimiter);
        let dumps = DumpContext::new(&config.dump);
        Self {
            config,
            state: InterpState::AutoCommit,
            namespaces,
            stores,
            dataplane,
            dumps,
            atomic_snapshot: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> InterpState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: InterpState) {
        debug!("interp state: {} -> {}", self.state, state);
        self.state = state;
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    pub(crate) fn namespaces_mut(&mut self) -> &mut Namespaces {
        &mut self.namespaces
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub(crate) fn stores_mut(&mut self) -> &mut Stores {
        &mut self.stores
    }

    pub fn dataplane(&self) -> &dyn Dataplane {
        self.dataplane.as_ref()
    }

    /// Shared handle for dump workers.
    pub fn dataplane_handle(&self) -> Arc<dyn Dataplane> {
        Arc::clone(&self.dataplane)
    }

    pub fn dumps(&self) -> &DumpContext {
        &self.dumps
    }

    pub(crate) fn retry(&self) -> RetryPolicy {
        self.config.update_retry_max
    }

    pub(crate) fn take_snapshot(&mut self) -> Option<String> {
        self.atomic_snapshot.take()
    }

    pub(crate) fn set_snapshot(&mut self, snapshot: Option<String>) {
        self.atomic_snapshot = snapshot;
    }

    /// Runs one command line.
    #[instrument(skip(self), fields(state = %self.state))]
    pub fn execute(&mut self, line: &str) -> Response {
        let args = match tokenize(line) {
            Ok(args) => args,
            Err(e) => return Response::Reply(Reply::from_error(&e)),
        };
        match self.execute_args(&args) {
            Ok(response) => response,
            Err(e) => {
                debug!("command failed: {}", e);
                Response::Reply(Reply::from_error(&e))
            }
        }
    }

    /// Runs an already tokenized command.
    pub fn execute_args(&mut self, args: &[String]) -> DatastoreResult<Response> {
        let Some((name, rest)) = args.split_first() else {
            return Ok(Response::Reply(Reply::ok()));
        };
        lookup(name)?.execute(self, rest)
    }

    /// Runs one command line to completion, producing dumps inline.
    pub fn run_line(&mut self, line: &str) -> String {
        match self.execute(line) {
            Response::Reply(reply) => reply.to_json(),
            Response::Dump(job) => job.run(self.dataplane(), self.dumps.spool_limit()),
        }
    }

    /// Replays a configuration text line by line.
    ///
    /// Failing lines are logged and skipped; their 1-based line numbers and
    /// replies are returned.
    pub fn load_str(&mut self, text: &str) -> Vec<(usize, Reply)> {
        let mut failures = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let reply = match self.execute(line) {
                Response::Reply(reply) => reply,
                // Dumps are read-only; nothing to replay.
                Response::Dump(_) => continue,
            };
            if !reply.is_ok() {
                warn!("line {}: '{}' failed: {}", idx + 1, line.trim(), reply.to_json());
                failures.push((idx + 1, reply));
            }
        }
        failures
    }

    /// Replays a configuration file such as one written by `save`.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> DatastoreResult<Vec<(usize, Reply)>> {
        let text = fs::read_to_string(path.as_ref())?;
        Ok(self.load_str(&text))
    }

    /// Serializes the committed configuration as replayable commands.
    pub fn serialize_config(&self) -> String {
        let mut out = Vec::new();
        out.push(format!(
            "# swcfgd configuration saved at {}",
            Local::now().format("%Y-%m-%d %H:%M:%S %z")
        ));
        out.push(String::new());

        out.push("# all the namespace objects' attribute".to_string());
        for ns in self.namespaces.list() {
            out.push(format!("namespace add {}", crate::kind::quote(ns)));
        }
        out.push(String::new());

        for table in OBJECT_TABLES.iter() {
            out.push(format!("# all the {} objects' attribute", table.kind()));
            self.push_per_namespace(&mut out, |ns| table.serialize(self, ns));
            out.push(String::new());
        }
        for table in OBJECT_TABLES.iter() {
            out.push(format!("# {} objects' status", table.kind()));
            self.push_per_namespace(&mut out, |ns| table.statuses(self, ns));
            out.push(String::new());
        }
        out.join("\n")
    }

    /// Emits `lines(ns)` for the default namespace, then every named one
    /// wrapped in `namespace set` / `namespace unset`.
    fn push_per_namespace(&self, out: &mut Vec<String>, lines: impl Fn(&str) -> Vec<String>) {
        out.extend(lines(""));
        for ns in self.namespaces.list() {
            let ns_lines = lines(ns);
            if ns_lines.is_empty() {
                continue;
            }
            out.push(format!("namespace set {}", crate::kind::quote(ns)));
            out.extend(ns_lines);
            out.push("namespace unset".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unknown_command() {
        let mut engine = Engine::default();
        assert_eq!(
            engine.run_line("hoge"),
            r#"{"ret":"INVALID_ARGS","data":"command = hoge."}"#
        );
    }

    #[test]
    fn test_empty_and_comment_lines() {
        let mut engine = Engine::default();
        assert_eq!(engine.run_line(""), r#"{"ret":"OK"}"#);
        assert_eq!(engine.run_line("# nothing"), r#"{"ret":"OK"}"#);
        assert_eq!(
            engine.run_line("bridge \"br0"),
            r#"{"ret":"INVALID_ARGS","data":"Unterminated quote."}"#
        );
    }

    #[test]
    fn test_command_names_are_unique() {
        let mut names: Vec<_> = command_names().collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
        assert!(lookup("l2-bridge").is_ok());
    }

    #[test]
    fn test_serialize_config_replays() {
        let mut engine = Engine::default();
        for line in [
            "namespace add ns1",
            "policer-action a create",
            "policer p create -action a -bandwidth-limit 2000",
            "l2-bridge l2 create -expire 30",
            "bridge br0 create -dpid 1 -l2-bridge l2",
            "bridge br0 enable",
            "namespace set ns1",
            "bridge br1 create -dpid 2",
            "namespace unset",
        ] {
            assert_eq!(engine.run_line(line), r#"{"ret":"OK"}"#, "{}", line);
        }
        let saved = engine.serialize_config();
        assert!(saved.contains("bridge :br0 create -dpid 1 -fail-mode secure -max-flows 4294967295 -l2-bridge :l2"));
        assert!(saved.contains("namespace set ns1\nbridge ns1:br1 create"));
        assert!(saved.contains("bridge :br0 enable"));

        let mut replayed = Engine::default();
        assert!(replayed.load_str(&saved).is_empty());
        assert_eq!(replayed.namespaces().current(), "");
        let br0 = replayed.stores().bridges.find(":br0").unwrap();
        assert!(br0.is_enabled);
        assert!(replayed.stores().l2_bridges.find(":l2").unwrap().is_enabled);
        assert!(replayed.stores().bridges.contains("ns1:br1"));
        assert!(replayed.stores().policer_actions.find(":a").unwrap().is_used);
    }
}
