mod app;
mod config;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = config::ServerConfig::load_or_create(&config::config_file_path())?;
    app::run(config, app::shutdown_on_ctrl_c()).await
}
