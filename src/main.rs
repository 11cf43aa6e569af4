#[cfg(feature = "server")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rep_swarm::server::run().await
}
