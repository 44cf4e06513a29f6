use std::path::{Path, PathBuf};

use skiff_session::{ClusterSession, Container};

/// Publish a tagged container under `fqdn` until interrupted.
///
/// `cert` is a base name: `NAME.crt` and `NAME.key` are read from disk.
pub async fn publish(
    session: &ClusterSession,
    tag: &str,
    fqdn: &str,
    rewrite: Option<String>,
    cert: Option<&Path>,
) -> anyhow::Result<()> {
    let tls = cert.map(|base| {
        (
            PathBuf::from(format!("{}.crt", base.display())),
            PathBuf::from(format!("{}.key", base.display())),
        )
    });

    // Both files must exist before anything is sent.
    if let Some((crt, key)) = &tls {
        for path in [crt, key] {
            anyhow::ensure!(path.is_file(), "cannot find {} for tls", path.display());
        }
    }

    let container = session.container_for(tag).await?;
    let cluster = session
        .publish(
            fqdn,
            vec![container.reference()],
            rewrite,
            tls.as_ref().map(|(c, k)| (c.as_path(), k.as_path())),
        )
        .await?;

    println!(
        "✓ Published {tag} at {fqdn} (cluster {}, Ctrl-C to withdraw)",
        cluster.uuid
    );
    super::until_interrupted().await
}
