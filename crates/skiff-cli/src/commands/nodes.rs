use skiff_core::RankBias;
use skiff_session::ClusterSession;

pub fn list(session: &ClusterSession, bias: RankBias) -> anyhow::Result<()> {
    let nodes = session.ranked_nodes(bias)?;

    println!("{:<36} {:>10} {:>10}", "NODE", "CPU", "MEMORY");
    for node in nodes {
        println!("{:<36} {:>10.1} {:>10.1}", node.id, node.cpu(), node.memory());
    }
    Ok(())
}
