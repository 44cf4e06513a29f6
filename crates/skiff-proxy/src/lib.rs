//! Skiff proxying: tunnels onto remote containers and web endpoints.
//!
//! # Components
//!
//! - **`tunnel`**: Local TCP listeners multiplexed onto the session connection
//! - **`endpoint`**: Routable domains and the clusters published on them
//! - **`probe`**: Minimal HTTP/1 GET used to wait for a service behind a tunnel

pub mod endpoint;
pub mod probe;
pub mod tunnel;

pub use endpoint::{Cluster, EndpointRegistry, PublishedCluster, WebEndpoint, load_tls};
pub use probe::http_status;
pub use tunnel::{Tunnel, TunnelRegistry};
