use vigildb::{server, Config, Dispatcher};
use tracing::{info, error};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("VigilDB starting...");
    info!(
        "Detected {} CPU cores, creating {} shards",
        num_cpus::get(),
        config.shard_count()
    );

    let dispatcher = match Dispatcher::start(&config) {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            error!("Failed to initialize shards: {:#}", e);
            std::process::exit(1);
        }
    };

    let shutdown = dispatcher.shutdown_token();
    let bind = config.bind.clone();

    tokio::select! {
        result = server::run(&bind, dispatcher) => {
            if let Err(e) = result {
                error!("RESP server error: {}", e);
                std::process::exit(1);
            }
        }
        _ = shutdown.cancelled() => {
            error!("A shard failed, shutting down");
            std::process::exit(1);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
    }
}
