//! The session object.
//!
//! One [`ClusterSession`] per connection. Push events are applied by a
//! single event-loop task in arrival order, so no two handlers ever run
//! at once. Caller operations read and mutate the same registries under
//! the session lock and never hold it across an await.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use skiff_core::{
    Command, Connection, Connector, ContainerRef, Error, OfferedDomain, OfferedNode,
    OfferedVolume, OwnerId, PushEvent, RankBias, Result, Transport, TransportSlot,
};
use skiff_placement::{Node, NodeRegistry};
use skiff_proxy::{
    Cluster, EndpointRegistry, PublishedCluster, Tunnel, TunnelRegistry, WebEndpoint, http_status,
    load_tls,
};
use skiff_volume::{MountPlan, Volume, VolumeRegistry, validate_tag};

use crate::config::SessionConfig;
use crate::container::{Container, ExternalContainer};
use crate::heartbeat::Heartbeat;
use crate::image::ImageResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    /// Connected, no resource offer yet.
    Waiting,
    Ready,
    Closed,
}

struct State {
    nodes: NodeRegistry,
    volumes: VolumeRegistry,
    tunnels: TunnelRegistry,
    endpoints: EndpointRegistry,
    heartbeat: Heartbeat,
}

struct Shared {
    config: SessionConfig,
    owner: OwnerId,
    link: Arc<TransportSlot>,
    state: Mutex<State>,
    ready: watch::Sender<Readiness>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    /// Layers with an upload in flight.
    uploading: Mutex<HashSet<String>>,
    /// Set when the location hung up rather than the caller disconnecting.
    lost: AtomicBool,
}

/// A live connection to one location.
///
/// Dropping the session disconnects it.
pub struct ClusterSession {
    shared: Arc<Shared>,
}

impl ClusterSession {
    /// Connect to `config.location` and wait for the first resource offer.
    ///
    /// Fails with `Connectivity` if the location cannot be reached, or
    /// `ProtocolTimeout` if no offer arrives within `ready_timeout_secs`.
    pub async fn connect(connector: &dyn Connector, config: SessionConfig) -> Result<Self> {
        let Connection { transport, events } = connector.connect(&config.location).await?;

        let (ready, mut ready_rx) = watch::channel(Readiness::Waiting);
        let idle_tick = config.idle_tick();
        let ready_timeout = config.ready_timeout();
        let location = config.location.clone();

        let shared = Arc::new(Shared {
            owner: config.owner.clone(),
            link: Arc::new(TransportSlot::new(transport)),
            state: Mutex::new(State {
                nodes: NodeRegistry::new(),
                volumes: VolumeRegistry::new(),
                tunnels: TunnelRegistry::new(),
                endpoints: EndpointRegistry::new(),
                heartbeat: Heartbeat::new(config.heartbeat_interval()),
            }),
            config,
            ready,
            event_loop: Mutex::new(None),
            uploading: Mutex::new(HashSet::new()),
            lost: AtomicBool::new(false),
        });

        let handle = tokio::spawn(event_loop(Arc::downgrade(&shared), events, idle_tick));
        *shared.event_loop.lock().expect("event loop lock") = Some(handle);
        let session = ClusterSession { shared };

        debug!(%location, "waiting for resource offer");
        let outcome = tokio::time::timeout(
            ready_timeout,
            ready_rx.wait_for(|r| *r != Readiness::Waiting),
        )
        .await
        .map(|r| r.map(|readiness| *readiness));

        match outcome {
            Ok(Ok(Readiness::Ready)) => {
                info!(%location, "connected to location");
                Ok(session)
            }
            Ok(_) => {
                session.disconnect();
                Err(Error::Connectivity(format!(
                    "{location} closed the connection before sending a resource offer"
                )))
            }
            Err(_) => {
                session.disconnect();
                Err(Error::ProtocolTimeout(format!(
                    "no resource offer from {location} within {ready_timeout:?}"
                )))
            }
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn owner(&self) -> &str {
        &self.shared.owner
    }

    pub fn is_connected(&self) -> bool {
        self.shared.link.is_connected()
    }

    pub fn is_ready(&self) -> bool {
        *self.shared.ready.borrow() == Readiness::Ready
    }

    // --- Nodes ---

    /// Nodes ordered best-first by `bias`; ties keep offer order.
    pub fn ranked_nodes(&self, bias: RankBias) -> Result<Vec<Node>> {
        self.shared.ready_state()?.nodes.ranked(bias)
    }

    pub fn best_node(&self, bias: RankBias) -> Result<Node> {
        self.shared.ready_state()?.nodes.best(bias)
    }

    pub fn node(&self, id: &str) -> Result<Node> {
        self.shared
            .ready_state()?
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no node with id {id}")))
    }

    /// Snapshot of every node, in offer order.
    pub fn nodes(&self) -> Vec<Node> {
        self.shared.state().nodes.nodes().to_vec()
    }

    // --- Volumes ---

    /// Create a volume, optionally tagged.
    ///
    /// The tag is validated and checked for uniqueness locally before
    /// the location sees it; a remote rejection leaves the registry
    /// untouched.
    pub async fn create_volume(&self, tag: Option<&str>, async_writes: bool) -> Result<Volume> {
        let tag = tag.map(validate_tag).transpose()?.map(str::to_string);
        let owner = self.shared.owner.clone();

        if let Some(tag) = &tag {
            let taken = self.shared.ready_state()?.volumes.tag_taken(&owner, tag);
            if taken {
                return Err(Error::Validation(format!(
                    "tag '{tag}' is already used by another volume"
                )));
            }
        }

        let transport = self.shared.transport()?;
        let uuid = transport
            .request(Command::CreateVolume {
                owner: owner.clone(),
                tag: tag.clone(),
                async_writes,
            })
            .await?
            .into_volume_uuid()?;

        let volume = Volume::new(owner, uuid, tag, async_writes, Arc::downgrade(&self.shared.link));
        self.shared.ready_state()?.volumes.insert(volume.clone())?;
        info!(volume = %volume.uuid(), tag = ?volume.tag(), async_writes, "created volume");
        Ok(volume)
    }

    /// Destroy a volume this session knows about.
    pub async fn destroy_volume(&self, volume: &Volume) -> Result<()> {
        let known = volume.owner() == self.shared.owner
            && self.shared.ready_state()?.volumes.contains(volume.uuid());
        if !known {
            return Err(Error::NotFound(format!(
                "volume {volume} is not known to this session"
            )));
        }

        self.shared
            .transport()?
            .request(Command::DestroyVolume {
                owner: self.shared.owner.clone(),
                volume: volume.uuid().to_string(),
            })
            .await?
            .into_ack()?;

        self.shared.state().volumes.remove(volume.uuid());
        info!(volume = %volume.uuid(), "destroyed volume");
        Ok(())
    }

    /// Look a volume up by uuid or tag.
    pub fn volume(&self, key: &str) -> Result<Volume> {
        self.shared.ready_state()?.volumes.get(&self.shared.owner, key)
    }

    pub fn all_volumes(&self) -> Vec<Volume> {
        self.shared.state().volumes.all()
    }

    /// Resolve `(volume key, mountpoint)` pairs into a conflict-free plan.
    pub fn plan_mounts<K, P>(&self, mounts: impl IntoIterator<Item = (K, P)>) -> Result<MountPlan<Volume>>
    where
        K: AsRef<str>,
        P: AsRef<Path>,
    {
        let mut plan = MountPlan::new();
        for (key, mountpoint) in mounts {
            plan.add(self.volume(key.as_ref())?, mountpoint)?;
        }
        Ok(plan)
    }

    // --- Endpoints ---

    /// The first endpoint whose domain is a suffix of `fqdn`.
    pub fn endpoint_for(&self, fqdn: &str) -> Result<WebEndpoint> {
        self.shared.ready_state()?.endpoints.endpoint_for(fqdn).cloned()
    }

    pub fn endpoints(&self) -> Vec<WebEndpoint> {
        self.shared.state().endpoints.endpoints().to_vec()
    }

    /// Publish `containers` as one cluster under `fqdn`.
    ///
    /// `tls` names a certificate and key on local disk; both must exist
    /// before anything is sent.
    pub async fn publish(
        &self,
        fqdn: &str,
        containers: Vec<ContainerRef>,
        rewrite: Option<String>,
        tls: Option<(&Path, &Path)>,
    ) -> Result<Cluster> {
        if containers.is_empty() {
            return Err(Error::Validation(
                "a cluster needs at least one container".to_string(),
            ));
        }
        let ssl = match tls {
            Some((cert, key)) => Some(load_tls(cert, key).await?),
            None => None,
        };
        let domain = self
            .shared
            .ready_state()?
            .endpoints
            .endpoint_for(fqdn)?
            .domain()
            .to_string();

        let transport = self.shared.transport()?;
        let cluster = Cluster::new(containers, rewrite);
        let published = PublishedCluster {
            cluster: cluster.clone(),
            fqdn: fqdn.to_string(),
            tls: ssl.is_some(),
        };

        transport
            .request(Command::PublishWeb {
                domain: domain.clone(),
                fqdn: fqdn.to_string(),
                cluster: cluster.uuid,
                containers: cluster.containers.clone(),
                rewrite: cluster.rewrite.clone(),
                ssl,
            })
            .await?
            .into_ack()?;

        let attached = self.shared.state().endpoints.attach(&domain, published);
        if let Err(e) = attached {
            // The domain was withdrawn while the location was answering.
            if let Err(send_err) = transport.send(Command::UnpublishWeb {
                domain: domain.clone(),
                cluster: cluster.uuid,
            }) {
                warn!(%domain, cluster = %cluster.uuid, error = %send_err, "failed to unpublish cluster");
            }
            return Err(e);
        }

        info!(cluster = %cluster.uuid, %fqdn, %domain, "published cluster");
        Ok(cluster)
    }

    pub async fn unpublish(&self, cluster: &Uuid) -> Result<()> {
        let domain = self
            .shared
            .ready_state()?
            .endpoints
            .domain_of(cluster)
            .map(str::to_string)
            .ok_or_else(|| Error::NotFound(format!("cluster {cluster} is not published")))?;

        self.shared
            .transport()?
            .request(Command::UnpublishWeb {
                domain: domain.clone(),
                cluster: *cluster,
            })
            .await?
            .into_ack()?;

        self.shared.state().endpoints.detach(cluster);
        info!(%cluster, %domain, "unpublished cluster");
        Ok(())
    }

    // --- Tunnels ---

    /// Forward a local port onto `port` of `container`.
    ///
    /// `local_port` 0 picks a free port. `timeout` bounds the wait for
    /// the container to become ready and defaults to
    /// `container_ready_timeout_secs`.
    pub async fn tunnel_onto(
        &self,
        container: &dyn Container,
        port: u16,
        local_port: u16,
        bind: Option<IpAddr>,
        timeout: Option<Duration>,
    ) -> Result<Arc<Tunnel>> {
        let transport = self.shared.transport()?;
        let tunnel = Arc::new(Tunnel::new(container.reference(), port, local_port, bind));
        // Registered first: the location may push proxy traffic for it
        // as soon as it exists remotely.
        self.shared.ready_state()?.tunnels.insert(Arc::clone(&tunnel));

        let timeout = timeout.unwrap_or_else(|| self.shared.config.container_ready_timeout());
        let opened = match container.wait_until_ready(timeout).await {
            Ok(()) => tunnel.connect(transport).await,
            Err(e) => Err(e),
        };

        if let Err(e) = opened {
            self.shared.state().tunnels.remove(&tunnel.uuid());
            tunnel.destroy();
            return Err(e);
        }
        Ok(tunnel)
    }

    /// Open a tunnel onto `port` and poll `http://fqdn:<local>/path`
    /// through it until it answers 200.
    ///
    /// `fqdn` must resolve to loopback, since that is where the tunnel
    /// listens. On failure the tunnel is destroyed again.
    pub async fn wait_http_200(
        &self,
        container: &dyn Container,
        port: u16,
        fqdn: &str,
        path: &str,
        local_port: u16,
    ) -> Result<Arc<Tunnel>> {
        ensure_loopback(fqdn).await?;
        info!(container = %container.reference(), %fqdn, "waiting on http 200");

        let tunnel = self.tunnel_onto(container, port, local_port, None, None).await?;
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), tunnel.local_port());
        let config = &self.shared.config;
        let deadline = config.http_poll_interval() * config.http_poll_attempts;

        let polled = tokio::time::timeout(deadline, async {
            for attempt in 1..=config.http_poll_attempts {
                match http_status(addr, fqdn, path, config.http_probe_timeout()).await {
                    Some(status) if status.as_u16() == 200 => return true,
                    status => debug!(attempt, ?status, "not serving yet"),
                }
                if attempt < config.http_poll_attempts {
                    tokio::time::sleep(config.http_poll_interval()).await;
                }
            }
            false
        })
        .await;

        if matches!(polled, Ok(true)) {
            info!(%fqdn, port = tunnel.local_port(), "connected");
            return Ok(tunnel);
        }

        self.destroy_tunnel(&tunnel, None)?;
        Err(Error::ProtocolTimeout(format!(
            "could not connect to http://{fqdn}:{}/{}",
            tunnel.local_port(),
            path.trim_start_matches('/')
        )))
    }

    /// Destroy a tunnel. With `container` given, refuse unless the
    /// tunnel is connected to that container. Destroying an already
    /// destroyed tunnel does nothing.
    pub fn destroy_tunnel(&self, tunnel: &Tunnel, container: Option<&dyn Container>) -> Result<()> {
        let owner = container.map(|c| c.reference());
        let removed = self
            .shared
            .state()
            .tunnels
            .remove_owned(&tunnel.uuid(), owner.as_ref())?;
        match removed {
            Some(tunnel) => {
                tunnel.destroy();
            }
            None => debug!(tunnel = %tunnel.uuid(), "tunnel already destroyed"),
        }
        Ok(())
    }

    pub fn tunnels(&self) -> Vec<Arc<Tunnel>> {
        self.shared.state().tunnels.list()
    }

    // --- Containers and images ---

    /// A container started elsewhere and advertised under `tag`.
    pub async fn container_for(&self, tag: &str) -> Result<ExternalContainer> {
        let (reference, address) = self
            .shared
            .transport()?
            .request(Command::FindTag {
                tag: tag.to_string(),
            })
            .await?
            .into_tag_found()?;
        debug!(%tag, container = %reference, %address, "found tagged container");
        Ok(ExternalContainer::new(reference, address))
    }

    /// Make sure the location holds every layer of `image`, uploading
    /// the missing ones in the background. Returns the full layer stack.
    ///
    /// Layers already being uploaded are not sent again.
    pub async fn ensure_image_uploaded(
        &self,
        resolver: Arc<dyn ImageResolver>,
        image: &str,
    ) -> Result<Vec<String>> {
        self.shared.transport()?;
        let layers = resolver.layer_stack(image).await?;
        let missing = resolver.missing_layers(&layers).await?;
        info!(%image, layers = layers.len(), "ensuring layers are uploaded");

        let to_upload: Vec<String> = {
            let mut uploading = self.shared.uploading.lock().expect("upload lock");
            missing
                .into_iter()
                .filter(|layer| uploading.insert(layer.clone()))
                .collect()
        };
        if to_upload.is_empty() {
            return Ok(layers);
        }

        info!(%image, missing = to_upload.len(), of = layers.len(), "uploading layers");
        let shared = Arc::downgrade(&self.shared);
        let image = image.to_string();
        tokio::spawn(async move {
            if let Err(e) = resolver.upload(&image, to_upload.clone()).await {
                warn!(%image, error = %e, "layer upload failed");
            }
            if let Some(shared) = shared.upgrade() {
                let mut uploading = shared.uploading.lock().expect("upload lock");
                for layer in &to_upload {
                    uploading.remove(layer);
                }
            }
        });
        Ok(layers)
    }

    // --- Lifecycle ---

    /// Send a keepalive if one is due. Called on every idle tick.
    pub fn heartbeat(&self) {
        self.shared.heartbeat();
    }

    /// Tear the session down. Safe to call repeatedly and from a signal
    /// handler; only the first call does anything.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }
}

impl Drop for ClusterSession {
    fn drop(&mut self) {
        self.shared.disconnect();
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("session state lock")
    }

    /// State guard for an operation that needs a live, offered session.
    fn ready_state(&self) -> Result<MutexGuard<'_, State>> {
        if !self.link.is_connected() {
            return Err(self.closed());
        }
        if *self.ready.borrow() != Readiness::Ready {
            return Err(Error::NotReady);
        }
        Ok(self.state())
    }

    fn transport(&self) -> Result<Arc<dyn Transport>> {
        self.link.get().map_err(|_| self.closed())
    }

    /// Why the link is gone: `Connectivity` if the location dropped it.
    fn closed(&self) -> Error {
        if self.lost.load(Ordering::SeqCst) {
            Error::Connectivity(format!("lost connection to {}", self.config.location))
        } else {
            Error::Disconnected
        }
    }

    fn dispatch(&self, event: PushEvent) {
        match event {
            PushEvent::ResourceOffer {
                domains,
                nodes,
                volumes,
            } => self.resource_offer(domains, nodes, volumes),
            PushEvent::UpdateStats { node, stats } => {
                if !self.state().nodes.update_stats(&node, stats) {
                    debug!(%node, "stats for unknown node ignored");
                }
            }
            PushEvent::FromProxy {
                tunnel,
                proxy,
                data,
            } => {
                if !self.state().tunnels.from_proxy(&tunnel, proxy, data) {
                    debug!(%tunnel, proxy, "data for unknown tunnel dropped");
                }
            }
            PushEvent::CloseProxy { tunnel, proxy } => {
                if !self.state().tunnels.close_proxy(&tunnel, proxy) {
                    debug!(%tunnel, proxy, "close for unknown tunnel dropped");
                }
            }
            PushEvent::Log { error: true, log } => error!(target: "skiff::location", "{log}"),
            PushEvent::Log { error: false, log } => info!(target: "skiff::location", "{log}"),
        }
    }

    fn resource_offer(
        &self,
        domains: Vec<OfferedDomain>,
        nodes: Vec<OfferedNode>,
        volumes: Vec<OfferedVolume>,
    ) {
        let link = Arc::downgrade(&self.link);
        {
            let mut state = self.state();
            state
                .nodes
                .replace(nodes.into_iter().map(|OfferedNode(id, stats)| Node::new(id, stats)));
            state.volumes.replace(volumes.into_iter().map(|v| {
                Volume::new(self.owner.clone(), v.uuid, v.tag, v.async_writes, link.clone())
            }));
            state
                .endpoints
                .replace(domains.into_iter().map(|d| d.domain));
            info!(
                nodes = state.nodes.len(),
                volumes = state.volumes.len(),
                domains = state.endpoints.len(),
                "resource offer"
            );
        }
        self.ready.send_if_modified(|r| {
            if *r == Readiness::Waiting {
                *r = Readiness::Ready;
                true
            } else {
                false
            }
        });
    }

    fn heartbeat(&self) {
        if !self.state().heartbeat.poll(Instant::now()) {
            return;
        }
        let Ok(transport) = self.transport() else {
            return;
        };
        match transport.send(Command::Heartbeat) {
            Ok(()) => debug!("heartbeat sent"),
            Err(e) => debug!(error = %e, "heartbeat not sent"),
        }
    }

    fn disconnect(&self) {
        let Some(transport) = self.link.take() else {
            return;
        };
        info!("disconnecting");

        let (published, tunnels) = {
            let mut state = self.state();
            (state.endpoints.published(), state.tunnels.drain())
        };
        for (domain, cluster) in published {
            if let Err(e) = transport.send(Command::UnpublishWeb {
                domain: domain.clone(),
                cluster,
            }) {
                warn!(%domain, %cluster, error = %e, "failed to unpublish cluster");
            }
        }
        for tunnel in tunnels {
            tunnel.destroy();
        }

        transport.close();
        if let Some(handle) = self.event_loop.lock().expect("event loop lock").take() {
            handle.abort();
        }

        {
            let mut state = self.state();
            state.endpoints.clear();
            state.tunnels.clear();
            state.volumes.clear();
            state.nodes.clear();
        }
        self.ready.send_replace(Readiness::Closed);
        info!("disconnected");
    }
}

/// Apply push events one at a time; consider a heartbeat on every idle
/// tick. Holds the session weakly so it can still be dropped.
async fn event_loop(
    shared: Weak<Shared>,
    mut events: mpsc::UnboundedReceiver<PushEvent>,
    idle_tick: Duration,
) {
    let mut ticks = tokio::time::interval(idle_tick);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                shared.dispatch(event);
            }
            _ = ticks.tick() => {
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                shared.heartbeat();
            }
        }
    }

    if let Some(shared) = shared.upgrade()
        && shared.link.is_connected()
    {
        warn!(location = %shared.config.location, "location closed the connection");
        shared.lost.store(true, Ordering::SeqCst);
        shared.disconnect();
    }
}

async fn ensure_loopback(fqdn: &str) -> Result<()> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((fqdn, 0))
        .await
        .map_err(|e| Error::Validation(format!("cannot resolve {fqdn}: {e}")))?
        .collect();
    if addrs.is_empty() || !addrs.iter().all(|a| a.ip().is_loopback()) {
        return Err(Error::Validation(format!(
            "{fqdn} does not resolve to localhost"
        )));
    }
    Ok(())
}
