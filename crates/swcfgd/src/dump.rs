//! Background dump workers.
//!
//! A dump copies its parameters into a [`DumpJob`] and runs on a blocking
//! worker, so the interpreter keeps serving other sessions while large tables
//! are serialized. The output is written incrementally to a [`Spool`]. The
//! spool stays in memory until it crosses the configured limit, then spills
//! into an anonymous, already-unlinked file in the staging directory.
//!
//! While a dump runs, the originating session is marked blocking and its
//! next request waits; the reply is sent in one piece once the job finishes.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde_json::json;
use swcfg_common::{DatastoreError, DatastoreResult, Reply, ResultCode};
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use crate::config::DumpConfig;
use crate::dataplane::Dataplane;
use crate::server::Session;

/// What a dump job serializes. Names are fully qualified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpKind {
    /// Learned entries of an L2 bridge, read through its bound bridge.
    L2Bridge { name: String, bridge: String },
    MacTable { bridges: Vec<String> },
    Meter { bridges: Vec<String>, stats: bool },
    Group { bridges: Vec<String>, stats: bool },
    Route { bridges: Vec<String> },
    Flow { bridges: Vec<String>, table_id: Option<u8> },
    Affinition,
}

/// A self-contained dump request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpJob {
    kind: DumpKind,
    tmp_dir: PathBuf,
}

impl DumpJob {
    pub fn new(kind: DumpKind, tmp_dir: PathBuf) -> Self {
        Self { kind, tmp_dir }
    }

    pub fn kind(&self) -> &DumpKind {
        &self.kind
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    /// Produces the complete JSON reply. Failures are reported in the
    /// envelope.
    pub fn run(&self, dp: &dyn Dataplane, spool_limit: usize) -> String {
        let mut spool = Spool::new(&self.tmp_dir, spool_limit);
        let written = self
            .write_to(dp, &mut spool)
            .and_then(|()| spool.into_string().map_err(DatastoreError::from));
        match written {
            Ok(out) => out,
            Err(e) => {
                warn!("dump {:?} failed: {}", self.kind, e);
                Reply::from_error(&e).to_json()
            }
        }
    }

    fn write_to(&self, dp: &dyn Dataplane, out: &mut Spool) -> DatastoreResult<()> {
        out.write_all(br#"{"ret":"OK","data":["#)?;
        let mut items = ItemWriter {
            out: &mut *out,
            first: true,
        };
        match &self.kind {
            DumpKind::L2Bridge { name, bridge } => {
                let entries = dp.l2_bridge_dump(bridge)?;
                items.push(&json!({"name": name, "bridge": bridge, "entries": entries}))?;
            }
            DumpKind::MacTable { bridges } => {
                for bridge in bridges {
                    let table = dp.mac_table(bridge).map_err(|e| {
                        e.describe(format!("Can't get mactable of {}.", bridge))
                    })?;
                    items.push(&json!({"name": bridge, "mactable": [table]}))?;
                }
            }
            DumpKind::Meter { bridges, stats } => {
                for bridge in bridges {
                    let meters = if *stats {
                        serde_json::to_value(dp.meter_stats(bridge)?)?
                    } else {
                        serde_json::to_value(dp.meter_configs(bridge)?)?
                    };
                    items.push(&json!({"name": bridge, "meters": meters}))?;
                }
            }
            DumpKind::Group { bridges, stats } => {
                for bridge in bridges {
                    let groups = if *stats {
                        serde_json::to_value(dp.group_stats(bridge)?)?
                    } else {
                        serde_json::to_value(dp.group_descs(bridge)?)?
                    };
                    items.push(&json!({"name": bridge, "groups": groups}))?;
                }
            }
            DumpKind::Route { bridges } => {
                for bridge in bridges {
                    let routes = dp.routes(bridge)?;
                    items.push(&json!({"name": bridge, "routes": routes}))?;
                }
            }
            DumpKind::Flow { bridges, table_id } => {
                for bridge in bridges {
                    let tables = dp.flows(bridge, *table_id)?;
                    items.push(&json!({"name": bridge, "tables": tables}))?;
                }
            }
            DumpKind::Affinition => {
                for info in dp.affinity()? {
                    items.push(&info)?;
                }
            }
        }
        out.write_all(b"]}")?;
        Ok(())
    }
}

/// Comma-separates the elements of the `data` array.
struct ItemWriter<'a> {
    out: &'a mut Spool,
    first: bool,
}

impl ItemWriter<'_> {
    fn push<T: Serialize>(&mut self, item: &T) -> DatastoreResult<()> {
        if !self.first {
            self.out.write_all(b",")?;
        }
        self.first = false;
        serde_json::to_writer(&mut *self.out, item)?;
        Ok(())
    }
}

/// Staging area of one dump.
#[derive(Debug)]
pub struct Spool {
    dir: PathBuf,
    limit: usize,
    mem: Vec<u8>,
    file: Option<File>,
}

impl Spool {
    pub fn new(dir: &Path, limit: usize) -> Self {
        Self {
            dir: dir.to_path_buf(),
            limit,
            mem: Vec::new(),
            file: None,
        }
    }

    /// Returns true once the spool has spilled to disk.
    pub fn is_spilled(&self) -> bool {
        self.file.is_some()
    }

    fn spill(&mut self) -> io::Result<()> {
        let mut file = tempfile::tempfile_in(&self.dir)?;
        file.write_all(&self.mem)?;
        self.mem = Vec::new();
        debug!("dump spool spilled to {}", self.dir.display());
        self.file = Some(file);
        Ok(())
    }

    /// Reads the whole staged output back.
    pub fn into_string(mut self) -> io::Result<String> {
        let bytes = match self.file.take() {
            None => self.mem,
            Some(mut file) => {
                file.seek(SeekFrom::Start(0))?;
                let mut buf = Vec::new();
                file.read_to_end(&mut buf)?;
                buf
            }
        };
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl Write for Spool {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.file.is_none() && self.mem.len() + buf.len() > self.limit {
            self.spill()?;
        }
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => {
                self.mem.extend_from_slice(buf);
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Shared state of the dump workers.
#[derive(Debug)]
pub struct DumpContext {
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    tmp_dir: Arc<Mutex<PathBuf>>,
    spool_limit: usize,
}

impl DumpContext {
    pub fn new(config: &DumpConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            tracker: TaskTracker::new(),
            tmp_dir: Arc::new(Mutex::new(config.tmp_dir.clone())),
            spool_limit: config.spool_limit,
        }
    }

    pub fn spool_limit(&self) -> usize {
        self.spool_limit
    }

    fn lock_tmp_dir(&self) -> MutexGuard<'_, PathBuf> {
        self.tmp_dir.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Default staging directory of new dumps.
    pub fn tmp_dir(&self) -> PathBuf {
        self.lock_tmp_dir().clone()
    }

    /// Changes the default staging directory; it must be an existing
    /// directory.
    pub fn set_tmp_dir(&self, path: &str) -> DatastoreResult<()> {
        let meta = std::fs::metadata(path)
            .map_err(|_| DatastoreError::bad_opt_value(ResultCode::PosixApiError, path))?;
        if !meta.is_dir() {
            return Err(DatastoreError::bad_opt_value(ResultCode::InvalidArgs, path));
        }
        *self.lock_tmp_dir() = PathBuf::from(path);
        Ok(())
    }

    /// Number of dumps in flight.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Runs `job` on a worker and delivers the reply to `session`.
    pub fn spawn(&self, job: DumpJob, dp: Arc<dyn Dataplane>, session: Arc<Session>) {
        let permits = Arc::clone(&self.permits);
        let limit = self.spool_limit;
        session.set_blocking();
        self.tracker.spawn(async move {
            let reply = match permits.acquire_owned().await {
                Ok(_permit) => {
                    match tokio::task::spawn_blocking(move || job.run(dp.as_ref(), limit)).await {
                        Ok(reply) => reply,
                        Err(e) => {
                            error!("dump worker panicked: {}", e);
                            Reply::from_error(&DatastoreError::interp(
                                ResultCode::AnyFailures,
                                "Can't start dump thread.",
                            ))
                            .to_json()
                        }
                    }
                }
                Err(_) => Reply::from_error(&DatastoreError::code(ResultCode::NotOperational)).to_json(),
            };
            session.finish_dump(reply);
        });
    }

    /// Stops accepting dumps and waits for the running ones.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataplane::SoftDataplane;
    use crate::kinds::BridgeAttr;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    fn soft_with_macs() -> SoftDataplane {
        let dp = SoftDataplane::new();
        dp.bridge_create(":br0", &BridgeAttr::default()).unwrap();
        dp.learn(":br0", "00:00:00:00:00:01", 1, 100).unwrap();
        dp.learn(":br0", "00:00:00:00:00:02", 2, 200).unwrap();
        dp
    }

    #[test]
    fn test_spool_spills_past_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut spool = Spool::new(dir.path(), 8);
        spool.write_all(b"1234").unwrap();
        assert!(!spool.is_spilled());
        spool.write_all(b"56789").unwrap();
        assert!(spool.is_spilled());
        // The spill file is unlinked on creation.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(spool.into_string().unwrap(), "123456789");
    }

    #[test]
    fn test_mactable_dump_small_and_spilled() {
        let dp = soft_with_macs();
        let dir = tempfile::tempdir().unwrap();
        let job = DumpJob::new(
            DumpKind::MacTable {
                bridges: vec![":br0".to_string()],
            },
            dir.path().to_path_buf(),
        );
        let in_mem = job.run(&dp, 1 << 20);
        let spilled = job.run(&dp, 16);
        assert_eq!(in_mem, spilled);

        let v: Value = serde_json::from_str(&in_mem).unwrap();
        assert_eq!(v["ret"], json!("OK"));
        assert_eq!(v["data"][0]["name"], json!(":br0"));
        let table = &v["data"][0]["mactable"][0];
        assert_eq!(table["num_entries"], json!(2));
        assert_eq!(table["entries"][1]["mac_addr"], json!("00:00:00:00:00:02"));
        assert_eq!(table["entries"][1]["address_type"], json!("dynamic"));
    }

    #[test]
    fn test_failed_dump_is_enveloped() {
        let dp = SoftDataplane::new();
        let job = DumpJob::new(
            DumpKind::Route {
                bridges: vec![":nope".to_string()],
            },
            PathBuf::from("/tmp"),
        );
        let v: Value = serde_json::from_str(&job.run(&dp, 1024)).unwrap();
        assert_eq!(v["ret"], json!("NOT_FOUND"));
    }

    #[test]
    fn test_empty_dump() {
        let dp = SoftDataplane::new();
        let job = DumpJob::new(DumpKind::MacTable { bridges: vec![] }, PathBuf::from("/tmp"));
        assert_eq!(job.run(&dp, 1024), r#"{"ret":"OK","data":[]}"#);
    }

    #[test]
    fn test_tmp_dir_validation() {
        let ctx = DumpContext::new(&DumpConfig::default());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        ctx.set_tmp_dir(path).unwrap();
        assert_eq!(ctx.tmp_dir(), dir.path());

        let err = ctx.set_tmp_dir("/nonexistent/dir").unwrap_err();
        assert_eq!(err.result_code(), ResultCode::PosixApiError);
        assert_eq!(err.message(), Some("Bad opt value = /nonexistent/dir."));

        let file = tempfile::NamedTempFile::new_in(dir.path()).unwrap();
        let err = ctx.set_tmp_dir(file.path().to_str().unwrap()).unwrap_err();
        assert_eq!(err.result_code(), ResultCode::InvalidArgs);
        assert_eq!(ctx.tmp_dir(), dir.path());
    }

    #[tokio::test]
    async fn test_spawn_blocks_session_until_done() {
        let ctx = DumpContext::new(&DumpConfig::default());
        let dp: Arc<dyn Dataplane> = Arc::new(soft_with_macs());
        let (session, mut rx) = Session::new();
        let job = DumpJob::new(
            DumpKind::MacTable {
                bridges: vec![":br0".to_string()],
            },
            std::env::temp_dir(),
        );

        ctx.spawn(job, dp, Arc::clone(&session));
        assert!(session.is_blocking());
        session.wait_idle().await;
        assert!(!session.is_blocking());

        let reply = rx.recv().await.unwrap();
        assert!(reply.starts_with(r#"{"ret":"OK","data":[{"name":":br0""#));
        ctx.shutdown().await;
        assert_eq!(ctx.in_flight(), 0);
    }
}
