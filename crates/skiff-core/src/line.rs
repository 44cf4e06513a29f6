//! Newline-delimited JSON transport.
//!
//! Each line is one [`Frame`]. Requests carry an id that the matching
//! reply echoes; pushes are forwarded to the session's event channel in
//! arrival order. Works over any byte stream, TCP in production and
//! `tokio::io::duplex` in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::message::{Command, PushEvent, Reply};
use crate::transport::{BoxFuture, Connection, Connector, Transport};

/// One line on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    Request {
        id: u64,
        command: Command,
    },
    Send {
        command: Command,
    },
    Reply {
        id: u64,
        result: std::result::Result<Reply, String>,
    },
    Push {
        event: PushEvent,
    },
}

type Waiter = oneshot::Sender<std::result::Result<Reply, String>>;
type Pending = Arc<Mutex<HashMap<u64, Waiter>>>;

/// Connects to a location over TCP and speaks [`Frame`]s.
#[derive(Debug, Clone)]
pub struct LineConnector {
    request_timeout: Duration,
}

impl LineConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Default for LineConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl Connector for LineConnector {
    fn connect<'a>(&'a self, location: &'a str) -> BoxFuture<'a, Result<Connection>> {
        Box::pin(async move {
            let stream = TcpStream::connect(location)
                .await
                .map_err(|e| Error::Connectivity(format!("{location}: {e}")))?;
            stream.set_nodelay(true)?;
            debug!(%location, "connected to location");
            Ok(LineTransport::start(stream, self.request_timeout))
        })
    }
}

/// Frame transport over a split byte stream.
pub struct LineTransport {
    /// Taken on close so the writer drains what is queued, then stops.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pending: Pending,
    next_id: AtomicU64,
    request_timeout: Duration,
    reader: Mutex<Option<JoinHandle<()>>>,
    /// Set once the location hangs up.
    lost: Arc<AtomicBool>,
}

impl LineTransport {
    /// Start reader and writer tasks over `stream`.
    pub fn start<S>(stream: S, request_timeout: Duration) -> Connection
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pending: Pending = Arc::default();
        let lost = Arc::new(AtomicBool::new(false));

        tokio::spawn(write_loop(write_half, outbound_rx));
        let reader = tokio::spawn(read_loop(
            read_half,
            Arc::clone(&pending),
            Arc::clone(&lost),
            events_tx,
        ));

        let transport = Arc::new(LineTransport {
            outbound: Mutex::new(Some(outbound_tx)),
            pending,
            next_id: AtomicU64::new(1),
            request_timeout,
            reader: Mutex::new(Some(reader)),
            lost,
        });

        Connection {
            transport,
            events: events_rx,
        }
    }

    fn write(&self, frame: &Frame) -> Result<()> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(lost_error());
        }
        let line = serde_json::to_string(frame).map_err(|e| Error::Codec(e.to_string()))?;
        let outbound = self.outbound.lock().expect("outbound lock");
        outbound
            .as_ref()
            .ok_or(Error::Disconnected)?
            .send(line)
            .map_err(|_| Error::Disconnected)
    }

    fn forget(&self, id: u64) {
        self.pending.lock().expect("pending lock").remove(&id);
    }

    /// Error for a request whose waiter was dropped.
    fn closed(&self) -> Error {
        if self.lost.load(Ordering::SeqCst) {
            lost_error()
        } else {
            Error::Disconnected
        }
    }
}

fn lost_error() -> Error {
    Error::Connectivity("location closed the connection".to_string())
}

impl Transport for LineTransport {
    fn request(&self, command: Command) -> BoxFuture<'_, Result<Reply>> {
        Box::pin(async move {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let name = command.name();
            let (tx, rx) = oneshot::channel();
            self.pending.lock().expect("pending lock").insert(id, tx);

            if let Err(e) = self.write(&Frame::Request { id, command }) {
                self.forget(id);
                return Err(e);
            }

            match tokio::time::timeout(self.request_timeout, rx).await {
                Ok(Ok(Ok(reply))) => Ok(reply),
                Ok(Ok(Err(reason))) => Err(Error::Remote(reason)),
                Ok(Err(_)) => Err(self.closed()),
                Err(_) => {
                    self.forget(id);
                    Err(Error::ProtocolTimeout(format!(
                        "no reply to {name} within {:?}",
                        self.request_timeout
                    )))
                }
            }
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.write(&Frame::Send { command })
    }

    fn close(&self) {
        let sender = self.outbound.lock().expect("outbound lock").take();
        if sender.is_none() {
            return;
        }
        if let Some(reader) = self.reader.lock().expect("reader lock").take() {
            reader.abort();
        }
        // Dropping the waiters wakes every in-flight request with `Disconnected`.
        self.pending.lock().expect("pending lock").clear();
        debug!("transport closed");
    }
}

async fn write_loop<W>(mut writer: W, mut outbound: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = outbound.recv().await {
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!(error = %e, "write to location failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop<R>(
    reader: R,
    pending: Pending,
    lost: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<PushEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("location closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "read from location failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Frame>(&line) {
            Ok(Frame::Reply { id, result }) => {
                let waiter = pending.lock().expect("pending lock").remove(&id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(result);
                    }
                    None => debug!(id, "reply for a request nobody is waiting on"),
                }
            }
            Ok(Frame::Push { event }) => {
                if events.send(event).is_err() {
                    debug!("push event dropped, session is gone");
                }
            }
            Ok(other) => warn!(frame = ?other, "unexpected frame from location"),
            Err(e) => warn!(error = %e, "undecodable frame from location"),
        }
    }
    lost.store(true, Ordering::SeqCst);
    pending.lock().expect("pending lock").clear();
}
