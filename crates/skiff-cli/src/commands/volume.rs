use skiff_session::ClusterSession;

pub fn list(session: &ClusterSession) -> anyhow::Result<()> {
    let volumes = session.all_volumes();
    if volumes.is_empty() {
        println!("No volumes.");
        return Ok(());
    }

    println!("{:<38} {:<24} {}", "UUID", "TAG", "WRITES");
    for volume in volumes {
        let writes = if volume.async_writes() { "async" } else { "sync" };
        println!("{:<38} {:<24} {}", volume.uuid(), volume.tag().unwrap_or("-"), writes);
    }
    Ok(())
}

pub async fn create(session: &ClusterSession, tag: Option<&str>, sync: bool) -> anyhow::Result<()> {
    let volume = session.create_volume(tag, !sync).await?;
    println!("✓ Created volume {}", volume.uuid());
    Ok(())
}

pub async fn destroy(session: &ClusterSession, key: &str) -> anyhow::Result<()> {
    let volume = session.volume(key)?;
    session.destroy_volume(&volume).await?;
    println!("✓ Destroyed volume {volume}");
    Ok(())
}

pub fn snapshot(session: &ClusterSession, key: &str) -> anyhow::Result<()> {
    let volume = session.volume(key)?;
    volume.snapshot()?;
    println!("✓ Snapshot set for {volume}");
    Ok(())
}

pub fn rollback(session: &ClusterSession, key: &str) -> anyhow::Result<()> {
    let volume = session.volume(key)?;
    volume.rollback()?;
    println!("✓ Rolled {volume} back to its snapshot");
    Ok(())
}
