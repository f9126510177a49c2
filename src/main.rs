use inkframe::config::Config;
use inkframe::device::Device;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(
        "Boot! Wake cause: {:?}, sleep cycle: {}",
        config.wake_cause,
        config.sleep_cycle
    );

    let device = match Device::bring_up(config) {
        Ok(device) => device,
        Err(e) => {
            tracing::error!("Bring-up failed: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = device.run().await {
        tracing::error!("Fatal: {}", e);
        std::process::exit(1);
    }
}
