//! In-memory transport and connector for session tests.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use skiff_core::{
    BoxFuture, Command, Connection, Connector, ContainerRef, Error, OfferedDomain, OfferedNode,
    OfferedVolume, PushEvent, Reply, Result, Stats, Transport,
};

use crate::container::Container;

/// Records every command and answers requests from a script, falling
/// back to `Ack`.
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<Command>>,
    replies: Mutex<VecDeque<Result<Reply>>>,
    closed: AtomicBool,
}

impl MockTransport {
    pub fn script(&self, reply: Result<Reply>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn sent(&self) -> Vec<Command> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Command) -> bool) -> usize {
        self.sent.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn request(&self, command: Command) -> BoxFuture<'_, Result<Reply>> {
        self.sent.lock().unwrap().push(command);
        let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Ok(Reply::Ack));
        Box::pin(async move { reply })
    }

    fn send(&self, command: Command) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Disconnected);
        }
        self.sent.lock().unwrap().push(command);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out one connection backed by a shared [`MockTransport`];
/// tests inject push events through `push`.
pub struct MockConnector {
    pub transport: Arc<MockTransport>,
    pub push: mpsc::UnboundedSender<PushEvent>,
    events: Mutex<Option<mpsc::UnboundedReceiver<PushEvent>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        let (push, events) = mpsc::unbounded_channel();
        Self {
            transport: Arc::new(MockTransport::default()),
            push,
            events: Mutex::new(Some(events)),
        }
    }

    /// A connector whose first resource offer is already queued.
    pub fn offering(event: PushEvent) -> Self {
        let connector = Self::new();
        connector.push.send(event).unwrap();
        connector
    }
}

impl Connector for MockConnector {
    fn connect<'a>(&'a self, location: &'a str) -> BoxFuture<'a, Result<Connection>> {
        let events = self.events.lock().unwrap().take();
        let transport: Arc<dyn Transport> = self.transport.clone();
        Box::pin(async move {
            let events = events.ok_or_else(|| Error::Connectivity(location.to_string()))?;
            Ok(Connection { transport, events })
        })
    }
}

pub fn stats(cpu: f64, memory: f64) -> Stats {
    Stats::from([("cpu".to_string(), cpu), ("memory".to_string(), memory)])
}

pub fn offer(domains: &[&str], nodes: &[(&str, f64, f64)], volumes: &[(&str, Option<&str>)]) -> PushEvent {
    PushEvent::ResourceOffer {
        domains: domains
            .iter()
            .map(|d| OfferedDomain {
                domain: d.to_string(),
            })
            .collect(),
        nodes: nodes
            .iter()
            .map(|(id, cpu, memory)| OfferedNode(id.to_string(), stats(*cpu, *memory)))
            .collect(),
        volumes: volumes
            .iter()
            .map(|(uuid, tag)| OfferedVolume {
                uuid: uuid.to_string(),
                tag: tag.map(str::to_string),
                async_writes: true,
            })
            .collect(),
    }
}

/// A container that becomes ready after `delay`, or never.
pub struct FakeContainer {
    pub reference: ContainerRef,
    pub ready_after: Option<Duration>,
}

impl FakeContainer {
    pub fn ready(uuid: &str) -> Self {
        Self {
            reference: ContainerRef {
                uuid: uuid.to_string(),
                node: "n1".to_string(),
            },
            ready_after: Some(Duration::ZERO),
        }
    }

    pub fn never_ready(uuid: &str) -> Self {
        Self {
            ready_after: None,
            ..Self::ready(uuid)
        }
    }
}

impl Container for FakeContainer {
    fn reference(&self) -> ContainerRef {
        self.reference.clone()
    }

    fn wait_until_ready(&self, timeout: Duration) -> BoxFuture<'_, Result<()>> {
        let ready_after = self.ready_after;
        Box::pin(async move {
            match ready_after {
                Some(delay) if delay <= timeout => {
                    tokio::time::sleep(delay).await;
                    Ok(())
                }
                _ => {
                    tokio::time::sleep(timeout).await;
                    Err(Error::ProtocolTimeout("container never became ready".to_string()))
                }
            }
        })
    }

    fn address(&self) -> Option<IpAddr> {
        None
    }
}
