use std::net::IpAddr;

use skiff_session::ClusterSession;

/// Forward a local port onto a tagged container until interrupted.
pub async fn open(
    session: &ClusterSession,
    tag: &str,
    remote_port: u16,
    local_port: u16,
    bind: Option<IpAddr>,
) -> anyhow::Result<()> {
    let container = session.container_for(tag).await?;
    let tunnel = session
        .tunnel_onto(&container, remote_port, local_port, bind, None)
        .await?;

    println!(
        "✓ Forwarding {} → {}:{} (Ctrl-C to stop)",
        tunnel.local_addr(),
        container.uuid(),
        remote_port
    );
    super::until_interrupted().await
}
