//! Web endpoints: domains the location can route, and the clusters
//! published on them.
//!
//! An endpoint serves every fully qualified name ending in its domain.
//! Endpoints keep the order the location offered them in, and lookup
//! picks the first one that serves the name.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use skiff_core::{ContainerRef, Error, Result, SslMaterial};

/// A set of containers published together behind one name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub uuid: Uuid,
    pub containers: Vec<ContainerRef>,
    /// Host header value requests are rewritten to before forwarding.
    pub rewrite: Option<String>,
}

impl Cluster {
    pub fn new(containers: Vec<ContainerRef>, rewrite: Option<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            containers,
            rewrite,
        }
    }
}

/// A cluster as published on an endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedCluster {
    pub cluster: Cluster,
    pub fqdn: String,
    pub tls: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebEndpoint {
    domain: String,
    clusters: Vec<PublishedCluster>,
}

impl WebEndpoint {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            clusters: Vec::new(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn clusters(&self) -> &[PublishedCluster] {
        &self.clusters
    }

    /// Whether `fqdn` falls under this endpoint's domain.
    pub fn serves(&self, fqdn: &str) -> bool {
        fqdn.ends_with(&self.domain)
    }
}

#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: Vec<WebEndpoint>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set of domains. Clusters published on a domain that
    /// is offered again stay attached to it.
    pub fn replace(&mut self, domains: impl IntoIterator<Item = String>) {
        let mut previous = std::mem::take(&mut self.endpoints);
        for domain in domains {
            if domain.is_empty() || self.endpoints.iter().any(|e| e.domain == domain) {
                continue;
            }
            let endpoint = match previous.iter().position(|e| e.domain == domain) {
                Some(i) => previous.swap_remove(i),
                None => WebEndpoint::new(domain),
            };
            self.endpoints.push(endpoint);
        }

        for dropped in previous.iter().filter(|e| !e.clusters.is_empty()) {
            warn!(
                domain = %dropped.domain,
                clusters = dropped.clusters.len(),
                "domain withdrawn with clusters still published"
            );
        }
    }

    /// The first endpoint able to serve `fqdn`.
    pub fn endpoint_for(&self, fqdn: &str) -> Result<&WebEndpoint> {
        self.endpoints
            .iter()
            .find(|e| e.serves(fqdn))
            .ok_or_else(|| {
                Error::NotFound(format!("there is no endpoint capable of serving {fqdn}"))
            })
    }

    pub fn get(&self, domain: &str) -> Option<&WebEndpoint> {
        self.endpoints.iter().find(|e| e.domain == domain)
    }

    /// Record `published` against `domain`.
    pub fn attach(&mut self, domain: &str, published: PublishedCluster) -> Result<()> {
        let endpoint = self
            .endpoints
            .iter_mut()
            .find(|e| e.domain == domain)
            .ok_or_else(|| Error::NotFound(format!("no endpoint for domain {domain}")))?;
        endpoint.clusters.push(published);
        Ok(())
    }

    /// Forget a published cluster, returning it with its domain.
    pub fn detach(&mut self, cluster: &Uuid) -> Option<(String, PublishedCluster)> {
        for endpoint in &mut self.endpoints {
            if let Some(i) = endpoint.clusters.iter().position(|p| p.cluster.uuid == *cluster) {
                let published = endpoint.clusters.remove(i);
                return Some((endpoint.domain.clone(), published));
            }
        }
        None
    }

    /// The domain a cluster is published on.
    pub fn domain_of(&self, cluster: &Uuid) -> Option<&str> {
        self.endpoints
            .iter()
            .find(|e| e.clusters.iter().any(|p| p.cluster.uuid == *cluster))
            .map(|e| e.domain.as_str())
    }

    /// `(domain, cluster uuid)` for every published cluster.
    pub fn published(&self) -> Vec<(String, Uuid)> {
        self.endpoints
            .iter()
            .flat_map(|e| e.clusters.iter().map(|p| (e.domain.clone(), p.cluster.uuid)))
            .collect()
    }

    pub fn endpoints(&self) -> &[WebEndpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn clear(&mut self) {
        self.endpoints.clear();
    }
}

/// Read a PEM certificate and key from disk.
pub async fn load_tls(cert: &Path, key: &Path) -> Result<SslMaterial> {
    let cert_pem = read_pem(cert, "certificate").await?;
    let key_pem = read_pem(key, "key").await?;
    Ok(SslMaterial { cert_pem, key_pem })
}

async fn read_pem(path: &Path, what: &str) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(pem) => Ok(pem),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::Validation(format!(
            "cannot find {what} for tls: {}",
            path.display()
        ))),
        Err(e) => Err(e.into()),
    }
}
