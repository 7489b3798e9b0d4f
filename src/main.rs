// This is my entry point for the peer node
// I parse the flags, start the node and let it run until the process is killed
use clap::Parser;
use log::{error, info, LevelFilter};
use peerlink::{Node, Opt};
use std::process;

fn main() {
    // I default to Info so I can watch connections and messages,
    // RUST_LOG still wins when I need more (or less) detail
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();

    // Anything that fails here is fatal: bad config, key generation, bind
    if let Err(e) = run(opt) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run(opt: Opt) -> peerlink::Result<()> {
    let config = opt.into_config()?;
    info!(
        "Starting node on port {} (relay: {})",
        config.port,
        match config.relay_port {
            Some(port) => format!("{} on port {port}", config.relay_mode),
            None => "off".to_string(),
        }
    );

    let node = Node::start(config)?;
    // The driver threads never finish on their own, so this blocks for the
    // lifetime of the process
    node.run();
    Ok(())
}
