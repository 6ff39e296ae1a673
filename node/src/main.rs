use std::io;

use log::info;
use node::{Node, NodeConfig};
use tokio::signal;

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let config = NodeConfig::from_env()?;
    let (name, nthreads, max_mem) = (config.name.clone(), config.nthreads, config.max_mem);

    let node = Node::bind(config).await?;
    info!(
        nthreads = nthreads.get();
        "node {name} listening at {} (max_mem={max_mem:?})",
        node.local_addr()?
    );

    tokio::select! {
        ret = node.run() => ret?,
        _ = signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
    }

    Ok(())
}
