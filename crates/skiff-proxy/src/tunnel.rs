//! Tunnels: local TCP ports forwarded onto container ports.
//!
//! A tunnel listens on a local port. Every accepted connection becomes a
//! *proxy* with a per-tunnel id. Local bytes travel to the location as
//! `to_proxy` commands; the location answers with `from_proxy` push
//! events keyed by tunnel uuid and proxy id.
//!
//! The tunnel uuid is generated locally and the tunnel is registered
//! under it before the location is asked to open the remote end, so no
//! push event can arrive for a tunnel the session does not know yet.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use skiff_core::{Command, ContainerRef, Error, Result, Transport};

const READ_CHUNK: usize = 16 * 1024;

/// Proxy id → channel feeding that proxy's local writer.
type ProxyMap = Arc<Mutex<HashMap<u64, mpsc::UnboundedSender<Vec<u8>>>>>;

/// A forwarding path from a local port to a port on a remote container.
pub struct Tunnel {
    uuid: Uuid,
    container: ContainerRef,
    remote_port: u16,
    requested_local_port: u16,
    bind: Option<IpAddr>,
    /// Port actually bound; zero until connected.
    local_port: AtomicU16,
    proxies: ProxyMap,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl Tunnel {
    /// A new, unconnected tunnel with a fresh uuid.
    ///
    /// `local_port` 0 lets the OS pick; `bind` defaults to 127.0.0.1.
    pub fn new(
        container: ContainerRef,
        remote_port: u16,
        local_port: u16,
        bind: Option<IpAddr>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            container,
            remote_port,
            requested_local_port: local_port,
            bind,
            local_port: AtomicU16::new(0),
            proxies: Arc::default(),
            transport: Mutex::new(None),
            accept_task: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn container(&self) -> &ContainerRef {
        &self.container
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    /// The local port, once bound; before that, the requested one.
    pub fn local_port(&self) -> u16 {
        match self.local_port.load(Ordering::SeqCst) {
            0 => self.requested_local_port,
            port => port,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip(), self.local_port())
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Number of local connections currently proxied.
    pub fn proxy_count(&self) -> usize {
        self.proxies.lock().expect("proxy lock").len()
    }

    fn bind_ip(&self) -> IpAddr {
        self.bind.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    /// Bind the local port, then ask the location to open the remote end.
    pub async fn connect(&self, transport: Arc<dyn Transport>) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::Disconnected);
        }

        let listener = TcpListener::bind(SocketAddr::new(self.bind_ip(), self.requested_local_port)).await?;
        let port = listener.local_addr()?.port();

        transport
            .request(Command::CreateTunnel {
                tunnel: self.uuid,
                container: self.container.clone(),
                port: self.remote_port,
            })
            .await?
            .into_ack()?;

        self.local_port.store(port, Ordering::SeqCst);
        *self.transport.lock().expect("tunnel transport lock") = Some(Arc::clone(&transport));

        let task = tokio::spawn(accept_loop(
            listener,
            self.uuid,
            Arc::clone(&transport),
            Arc::clone(&self.proxies),
        ));

        let mut slot = self.accept_task.lock().expect("tunnel task lock");
        if self.is_destroyed() {
            // Destroyed while the location was answering. Whoever takes
            // the stored transport tells the location.
            task.abort();
            let unsent = self.transport.lock().expect("tunnel transport lock").take();
            if let Some(transport) = unsent
                && let Err(e) = transport.send(Command::DestroyTunnel { tunnel: self.uuid })
            {
                debug!(tunnel = %self.uuid, error = %e, "could not notify location of tunnel teardown");
            }
            return Err(Error::Disconnected);
        }
        *slot = Some(task);

        info!(
            tunnel = %self.uuid,
            container = %self.container,
            port = self.remote_port,
            local_port = port,
            "tunnel open"
        );
        Ok(())
    }

    /// Stop listening, drop every proxied connection, and tell the
    /// location. Returns `false` if the tunnel was already destroyed.
    pub fn destroy(&self) -> bool {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return false;
        }

        if let Some(task) = self.accept_task.lock().expect("tunnel task lock").take() {
            task.abort();
        }
        self.proxies.lock().expect("proxy lock").clear();

        if let Some(transport) = self.transport.lock().expect("tunnel transport lock").take()
            && let Err(e) = transport.send(Command::DestroyTunnel { tunnel: self.uuid })
        {
            debug!(tunnel = %self.uuid, error = %e, "could not notify location of tunnel teardown");
        }

        info!(tunnel = %self.uuid, "tunnel destroyed");
        true
    }

    /// Deliver bytes from the remote end to a local connection.
    pub fn from_proxy(&self, proxy: u64, data: Vec<u8>) {
        let proxies = self.proxies.lock().expect("proxy lock");
        match proxies.get(&proxy) {
            Some(tx) => {
                if tx.send(data).is_err() {
                    debug!(tunnel = %self.uuid, proxy, "local connection already gone");
                }
            }
            None => debug!(tunnel = %self.uuid, proxy, "data arrived for a proxy that is already closed"),
        }
    }

    /// The remote end closed: finish writing and close the local side.
    pub fn close_proxy(&self, proxy: u64) {
        let removed = self.proxies.lock().expect("proxy lock").remove(&proxy);
        if removed.is_some() {
            debug!(tunnel = %self.uuid, proxy, "remote closed proxy");
        } else {
            debug!(tunnel = %self.uuid, proxy, "asked to close a proxy that is already closed");
        }
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        if let Ok(slot) = self.accept_task.get_mut()
            && let Some(task) = slot.take()
        {
            task.abort();
        }
    }
}

impl fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tunnel")
            .field("uuid", &self.uuid)
            .field("container", &self.container)
            .field("remote_port", &self.remote_port)
            .field("local_port", &self.local_port())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// Accept local connections until aborted. Dropping the `JoinSet` on
/// abort cancels every proxy task with it.
async fn accept_loop(
    listener: TcpListener,
    tunnel: Uuid,
    transport: Arc<dyn Transport>,
    proxies: ProxyMap,
) {
    let mut next_proxy: u64 = 0;
    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(%tunnel, error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                };
                next_proxy += 1;
                debug!(%tunnel, proxy = next_proxy, %peer, "local connection accepted");
                spawn_proxy(
                    &mut tasks,
                    stream,
                    tunnel,
                    next_proxy,
                    Arc::clone(&transport),
                    Arc::clone(&proxies),
                );
            }
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }
}

fn spawn_proxy(
    tasks: &mut JoinSet<()>,
    stream: TcpStream,
    tunnel: Uuid,
    proxy: u64,
    transport: Arc<dyn Transport>,
    proxies: ProxyMap,
) {
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    // Registered before the reader starts, so a fast local EOF cannot
    // race the insert.
    proxies.lock().expect("proxy lock").insert(proxy, tx);

    tasks.spawn(async move {
        while let Some(data) = rx.recv().await {
            if let Err(e) = writer.write_all(&data).await {
                debug!(%tunnel, proxy, error = %e, "write to local connection failed");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    tasks.spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    debug!(%tunnel, proxy, error = %e, "read from local connection failed");
                    break;
                }
            };
            let command = Command::ToProxy {
                tunnel,
                proxy,
                data: buf[..n].to_vec(),
            };
            if transport.send(command).is_err() {
                break;
            }
        }
        // Only report the close if the remote end did not close first.
        let open = proxies.lock().expect("proxy lock").remove(&proxy).is_some();
        if open
            && let Err(e) = transport.send(Command::CloseProxy { tunnel, proxy })
        {
            debug!(%tunnel, proxy, error = %e, "could not report local close");
        }
    });
}

/// Active tunnels keyed by uuid.
#[derive(Debug, Default)]
pub struct TunnelRegistry {
    tunnels: HashMap<Uuid, Arc<Tunnel>>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tunnel: Arc<Tunnel>) {
        self.tunnels.insert(tunnel.uuid(), tunnel);
    }

    pub fn get(&self, uuid: &Uuid) -> Option<Arc<Tunnel>> {
        self.tunnels.get(uuid).cloned()
    }

    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.tunnels.contains_key(uuid)
    }

    pub fn remove(&mut self, uuid: &Uuid) -> Option<Arc<Tunnel>> {
        self.tunnels.remove(uuid)
    }

    /// Remove a tunnel, refusing if `owner` is given and the tunnel is
    /// connected to some other container. A refusal leaves the registry
    /// untouched.
    pub fn remove_owned(
        &mut self,
        uuid: &Uuid,
        owner: Option<&ContainerRef>,
    ) -> Result<Option<Arc<Tunnel>>> {
        if let (Some(owner), Some(tunnel)) = (owner, self.tunnels.get(uuid))
            && tunnel.container() != owner
        {
            return Err(Error::NotFound(format!(
                "tunnel {uuid} is connected to container {}, not {owner}",
                tunnel.container()
            )));
        }
        Ok(self.tunnels.remove(uuid))
    }

    /// Route inbound proxy data. Returns `false` for an unknown tunnel.
    pub fn from_proxy(&self, uuid: &Uuid, proxy: u64, data: Vec<u8>) -> bool {
        match self.tunnels.get(uuid) {
            Some(tunnel) => {
                tunnel.from_proxy(proxy, data);
                true
            }
            None => false,
        }
    }

    /// Route an inbound proxy close. Returns `false` for an unknown tunnel.
    pub fn close_proxy(&self, uuid: &Uuid, proxy: u64) -> bool {
        match self.tunnels.get(uuid) {
            Some(tunnel) => {
                tunnel.close_proxy(proxy);
                true
            }
            None => false,
        }
    }

    /// Remove and return every tunnel.
    pub fn drain(&mut self) -> Vec<Arc<Tunnel>> {
        self.tunnels.drain().map(|(_, tunnel)| tunnel).collect()
    }

    pub fn list(&self) -> Vec<Arc<Tunnel>> {
        self.tunnels.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }

    pub fn clear(&mut self) {
        self.tunnels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use skiff_core::{BoxFuture, Reply};

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Command>>,
        reject: bool,
        /// Destroyed while `create_tunnel` is being answered.
        destroy_on_create: Mutex<Option<Arc<Tunnel>>>,
    }

    impl Recorder {
        fn rejecting() -> Self {
            Self {
                reject: true,
                ..Self::default()
            }
        }

        fn count(&self, pred: impl Fn(&Command) -> bool) -> usize {
            self.sent.lock().unwrap().iter().filter(|c| pred(c)).count()
        }

        async fn wait_for(&self, pred: impl Fn(&Command) -> bool) -> Command {
            for _ in 0..200 {
                let found = self.sent.lock().unwrap().iter().find(|c| pred(c)).cloned();
                if let Some(command) = found {
                    return command;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("expected command was never sent");
        }
    }

    impl Transport for Recorder {
        fn request(&self, command: Command) -> BoxFuture<'_, Result<Reply>> {
            self.sent.lock().unwrap().push(command);
            if let Some(tunnel) = self.destroy_on_create.lock().unwrap().take() {
                tunnel.destroy();
            }
            let reject = self.reject;
            Box::pin(async move {
                if reject {
                    Err(Error::Remote("no such container".to_string()))
                } else {
                    Ok(Reply::Ack)
                }
            })
        }

        fn send(&self, command: Command) -> Result<()> {
            self.sent.lock().unwrap().push(command);
            Ok(())
        }

        fn close(&self) {}
    }

    fn container(uuid: &str) -> ContainerRef {
        ContainerRef {
            uuid: uuid.to_string(),
            node: "n1".to_string(),
        }
    }

    async fn open_tunnel(recorder: &Arc<Recorder>) -> Arc<Tunnel> {
        let tunnel = Arc::new(Tunnel::new(container("c1"), 80, 0, None));
        tunnel.connect(recorder.clone()).await.unwrap();
        tunnel
    }

    #[tokio::test]
    async fn connect_binds_and_creates_remote_end() {
        let recorder = Arc::new(Recorder::default());
        let tunnel = open_tunnel(&recorder).await;

        assert_ne!(tunnel.local_port(), 0);
        let uuid = tunnel.uuid();
        assert_eq!(
            recorder.count(|c| matches!(c, Command::CreateTunnel { tunnel, port: 80, .. } if *tunnel == uuid)),
            1
        );
    }

    #[tokio::test]
    async fn bytes_flow_both_ways() {
        let recorder = Arc::new(Recorder::default());
        let tunnel = open_tunnel(&recorder).await;

        let mut client = TcpStream::connect(tunnel.local_addr()).await.unwrap();
        client.write_all(b"hello").await.unwrap();

        let sent = recorder
            .wait_for(|c| matches!(c, Command::ToProxy { .. }))
            .await;
        let Command::ToProxy { proxy, data, .. } = sent else {
            unreachable!()
        };
        assert_eq!(proxy, 1);
        assert_eq!(data, b"hello");

        tunnel.from_proxy(proxy, b"world".to_vec());
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");

        tunnel.close_proxy(proxy);
        let mut rest = Vec::new();
        let n = client.read_to_end(&mut rest).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn local_close_is_reported() {
        let recorder = Arc::new(Recorder::default());
        let tunnel = open_tunnel(&recorder).await;

        let client = TcpStream::connect(tunnel.local_addr()).await.unwrap();
        drop(client);

        recorder
            .wait_for(|c| matches!(c, Command::CloseProxy { proxy: 1, .. }))
            .await;
        assert_eq!(tunnel.proxy_count(), 0);
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let recorder = Arc::new(Recorder::default());
        let tunnel = open_tunnel(&recorder).await;

        assert!(tunnel.destroy());
        assert!(!tunnel.destroy());
        assert!(tunnel.is_destroyed());
        assert_eq!(
            recorder.count(|c| matches!(c, Command::DestroyTunnel { .. })),
            1
        );
    }

    #[tokio::test]
    async fn destroyed_tunnel_will_not_connect() {
        let recorder = Arc::new(Recorder::default());
        let tunnel = Tunnel::new(container("c1"), 80, 0, None);

        tunnel.destroy();
        let err = tunnel.connect(recorder.clone()).await.unwrap_err();
        assert!(matches!(err, Error::Disconnected));
        assert_eq!(recorder.count(|_| true), 0);
    }

    #[tokio::test]
    async fn destroy_during_connect_notifies_location_once() {
        let recorder = Arc::new(Recorder::default());
        let tunnel = Arc::new(Tunnel::new(container("c1"), 80, 0, None));
        *recorder.destroy_on_create.lock().unwrap() = Some(Arc::clone(&tunnel));

        let err = tunnel.connect(recorder.clone()).await.unwrap_err();
        assert!(matches!(err, Error::Disconnected));
        assert!(tunnel.is_destroyed());
        assert!(!tunnel.destroy());
        assert_eq!(
            recorder.count(|c| matches!(c, Command::DestroyTunnel { .. })),
            1
        );
    }

    #[tokio::test]
    async fn remote_rejection_propagates() {
        let recorder = Arc::new(Recorder::rejecting());
        let tunnel = Tunnel::new(container("c1"), 80, 0, None);

        let err = tunnel.connect(recorder.clone()).await.unwrap_err();
        assert!(matches!(err, Error::Remote(_)));
        assert_eq!(tunnel.local_port(), 0);
    }

    #[tokio::test]
    async fn stale_proxy_traffic_is_harmless() {
        let recorder = Arc::new(Recorder::default());
        let tunnel = open_tunnel(&recorder).await;

        tunnel.from_proxy(42, b"late".to_vec());
        tunnel.close_proxy(42);
        assert_eq!(tunnel.proxy_count(), 0);
    }

    #[test]
    fn registry_enforces_ownership_guard() {
        let mut reg = TunnelRegistry::new();
        let tunnel = Arc::new(Tunnel::new(container("c1"), 80, 0, None));
        let uuid = tunnel.uuid();
        reg.insert(Arc::clone(&tunnel));

        let err = reg.remove_owned(&uuid, Some(&container("c2"))).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(reg.contains(&uuid));

        let removed = reg.remove_owned(&uuid, Some(&container("c1"))).unwrap();
        assert!(removed.is_some());
        assert!(reg.remove_owned(&uuid, Some(&container("c1"))).unwrap().is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn registry_reports_unknown_tunnels() {
        let reg = TunnelRegistry::new();
        let ghost = Uuid::new_v4();

        assert!(!reg.from_proxy(&ghost, 1, b"data".to_vec()));
        assert!(!reg.close_proxy(&ghost, 1));
    }

    #[test]
    fn drain_empties_registry() {
        let mut reg = TunnelRegistry::new();
        reg.insert(Arc::new(Tunnel::new(container("c1"), 80, 0, None)));
        reg.insert(Arc::new(Tunnel::new(container("c2"), 81, 0, None)));

        assert_eq!(reg.drain().len(), 2);
        assert!(reg.is_empty());
    }
}
