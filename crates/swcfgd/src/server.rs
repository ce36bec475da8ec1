//! Client sessions and the connection loops feeding the engine.
//!
//! The wire protocol is line oriented: every request line gets exactly one
//! JSON reply line, in request order. A request that turns into a dump
//! blocks its session until the worker has written the reply; other
//! sessions keep being served meanwhile.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::engine::{Engine, Response};

/// One connected client.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
    blocking: AtomicBool,
    idle: Notify,
}

impl Session {
    /// Creates a session and the receiving end of its reply queue.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            tx,
            blocking: AtomicBool::new(false),
            idle: Notify::new(),
        });
        (session, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// True while a dump owns the session.
    pub fn is_blocking(&self) -> bool {
        self.blocking.load(Ordering::Acquire)
    }

    pub fn set_blocking(&self) {
        self.blocking.store(true, Ordering::Release);
    }

    /// Queues one reply line. Returns false once the client is gone.
    pub fn send(&self, reply: String) -> bool {
        if self.tx.send(reply).is_err() {
            debug!("session {} closed, reply dropped", self.id);
            return false;
        }
        true
    }

    /// Delivers a dump reply and unblocks the session.
    pub fn finish_dump(&self, reply: String) {
        self.send(reply);
        self.blocking.store(false, Ordering::Release);
        self.idle.notify_waiters();
    }

    /// Waits until no dump owns the session.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if !self.is_blocking() {
                return;
            }
            notified.await;
        }
    }
}

/// Shared daemon state: the engine and the live sessions.
#[derive(Debug)]
pub struct Server {
    engine: Arc<Mutex<Engine>>,
    sessions: DashMap<Uuid, Arc<Session>>,
    shutdown: CancellationToken,
}

impl Server {
    pub fn new(engine: Engine) -> Arc<Self> {
        Arc::new(Self {
            engine: Arc::new(Mutex::new(engine)),
            sessions: DashMap::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn engine(&self) -> Arc<Mutex<Engine>> {
        Arc::clone(&self.engine)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Stops the connection loops and waits for in-flight dumps.
    pub async fn shutdown(&self) {
        info!("shutting down, {} session(s) open", self.sessions.len());
        self.shutdown.cancel();
        let engine = self.engine.lock().await;
        engine.dumps().shutdown().await;
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Runs one request line for `session`.
    async fn handle(&self, session: &Arc<Session>, line: &str) {
        let mut engine = self.engine.lock().await;
        match engine.execute(line) {
            Response::Reply(reply) => {
                session.send(reply.to_json());
            }
            Response::Dump(job) => {
                let dp = engine.dataplane_handle();
                engine.dumps().spawn(job, dp, Arc::clone(session));
            }
        }
    }

    /// Serves one client until it disconnects or the server shuts down.
    #[instrument(skip_all)]
    pub async fn serve_connection<R, W>(self: Arc<Self>, reader: R, writer: W)
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (session, rx) = Session::new();
        let id = session.id();
        self.sessions.insert(id, Arc::clone(&session));
        debug!("session {} opened", id);
        let writer_task = tokio::spawn(write_replies(writer, rx));

        let mut lines = BufReader::new(reader).lines();
        loop {
            session.wait_idle().await;
            let line = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => self.handle(&session, &line).await,
                Ok(None) => break,
                Err(e) => {
                    warn!("session {}: read failed: {}", id, e);
                    break;
                }
            }
        }

        // A pending dump still owns a sender; the writer drains its reply.
        self.sessions.remove(&id);
        drop(session);
        if let Err(e) = writer_task.await {
            warn!("session {}: writer task failed: {}", id, e);
        }
        debug!("session {} closed", id);
    }

    /// Accepts clients on `listener` until shutdown.
    pub async fn serve_tcp(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        info!("listening on {}", listener.local_addr()?);
        loop {
            let (stream, peer) = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted?,
            };
            debug!("connection from {}", peer);
            let (reader, writer) = stream.into_split();
            tokio::spawn(Arc::clone(&self).serve_connection(reader, writer));
        }
    }

    /// Serves a single session over stdin and stdout.
    pub async fn serve_stdio(self: Arc<Self>) {
        self.serve_connection(tokio::io::stdin(), tokio::io::stdout()).await;
    }
}

async fn write_replies<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(reply) = rx.recv().await {
        let written = async {
            writer.write_all(reply.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            warn!("can't write reply: {}", e);
            return;
        }
    }
}
