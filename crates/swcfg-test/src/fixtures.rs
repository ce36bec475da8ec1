//! Test fixtures for common datastore patterns
//!
//! Provides an engine wired to a [`RecordingDataplane`] plus reusable
//! command scripts for the managed kinds.

use std::sync::Arc;

use serde_json::Value;
use swcfgd::{Dataplane, Engine, EngineConfig};

use crate::dataplane::RecordingDataplane;
use crate::verification::{VerificationError, VerifyResult};

/// Engine under test and its dataplane fake
#[derive(Debug)]
pub struct TestEngine {
    pub engine: Engine,
    pub dataplane: Arc<RecordingDataplane>,
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEngine {
    /// Engine with the default configuration
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Engine with a custom configuration
    pub fn with_config(config: EngineConfig) -> Self {
        let dataplane = Arc::new(RecordingDataplane::new());
        let handle: Arc<dyn Dataplane> = Arc::clone(&dataplane) as Arc<dyn Dataplane>;
        Self {
            engine: Engine::new(config, handle),
            dataplane,
        }
    }

    /// Engine using `delimiter` between namespace and name
    pub fn with_delimiter(delimiter: &str) -> Self {
        Self::with_config(EngineConfig {
            delimiter: delimiter.to_string(),
            ..EngineConfig::default()
        })
    }

    /// Run one command line and parse its reply
    pub fn run(&mut self, line: &str) -> VerifyResult<Value> {
        let reply = self.engine.run_line(line);
        serde_json::from_str(&reply).map_err(|source| VerificationError::BadReply { reply, source })
    }

    /// Run one command line that must succeed
    pub fn ok(&mut self, line: &str) -> VerifyResult<Value> {
        let reply = self.run(line)?;
        if reply["ret"] != "OK" {
            return Err(VerificationError::CommandFailed {
                line: line.to_string(),
                reply,
            });
        }
        Ok(reply)
    }

    /// Run a script, stopping at the first failing line
    pub fn script(&mut self, script: &ConfigScript) -> VerifyResult<()> {
        for line in &script.lines {
            self.ok(line)?;
        }
        Ok(())
    }
}

/// Ordered command lines making up one test step
#[derive(Debug, Clone, Default)]
pub struct ConfigScript {
    /// Script name
    pub name: String,
    /// Command lines, in execution order
    pub lines: Vec<String>,
}

impl ConfigScript {
    /// Create an empty script
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lines: Vec::new(),
        }
    }

    /// Append one command line
    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    /// Append another script's lines
    pub fn then(mut self, other: ConfigScript) -> Self {
        self.lines.extend(other.lines);
        self
    }

    /// Wrap the script in `atomic begin` / `atomic commit`
    pub fn atomic(self) -> Self {
        let mut lines = Vec::with_capacity(self.lines.len() + 2);
        lines.push("atomic begin".to_string());
        lines.extend(self.lines);
        lines.push("atomic commit".to_string());
        Self {
            name: self.name,
            lines,
        }
    }

    /// The script as one text, as `save` would write it
    pub fn to_text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Bridge fixtures
pub mod bridge_fixtures {
    use super::*;

    /// Bridge with the given datapath id
    pub fn bridge(name: &str, dpid: u64) -> ConfigScript {
        ConfigScript::new(format!("bridge {}", name))
            .line(format!("bridge {} create -dpid {}", name, dpid))
    }

    /// Bridge owning a fresh l2-bridge
    pub fn bridge_with_l2(name: &str, l2: &str, dpid: u64) -> ConfigScript {
        ConfigScript::new(format!("bridge {} with {}", name, l2))
            .line(format!("l2-bridge {} create -expire 300", l2))
            .line(format!("bridge {} create -dpid {} -l2-bridge {}", name, dpid, l2))
    }
}

/// Policer fixtures
pub mod policer_fixtures {
    use super::*;

    /// Discard action
    pub fn action(name: &str) -> ConfigScript {
        ConfigScript::new(format!("policer-action {}", name))
            .line(format!("policer-action {} create -type discard", name))
    }

    /// Policer attached to fresh actions
    pub fn policer(name: &str, actions: &[&str]) -> ConfigScript {
        let mut script = ConfigScript::new(format!("policer {}", name));
        for action in actions {
            script = script.then(self::action(action));
        }
        let opts: String = actions.iter().map(|a| format!(" -action +{}", a)).collect();
        script.line(format!(
            "policer {} create -bandwidth-limit 1500000{}",
            name, opts
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_builder() {
        let script = bridge_fixtures::bridge("br0", 1).atomic();
        assert_eq!(script.name, "bridge br0");
        assert_eq!(
            script.lines,
            vec!["atomic begin", "bridge br0 create -dpid 1", "atomic commit"]
        );
    }

    #[test]
    fn test_policer_fixture_lines() {
        let script = policer_fixtures::policer("p", &["a1", "a2"]);
        assert_eq!(
            script.to_text(),
            "policer-action a1 create -type discard\n\
             policer-action a2 create -type discard\n\
             policer p create -bandwidth-limit 1500000 -action +a1 -action +a2"
        );
    }

    #[test]
    fn test_engine_runs_fixtures() {
        let mut t = TestEngine::new();
        t.script(&bridge_fixtures::bridge_with_l2("br0", "l2", 7))
            .unwrap();
        assert!(t.engine.stores().bridges.contains(":br0"));
        assert_eq!(
            t.dataplane.calls(),
            vec!["l2_bridge_create :l2", "bridge_create :br0"]
        );

        let err = t.ok("bridge br0 create").unwrap_err();
        assert!(matches!(err, VerificationError::CommandFailed { .. }));
    }
}
