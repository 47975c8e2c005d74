use stratos_launch::config::LauncherConfig;
use stratos_launch::launcher::{LaunchError, Launcher};
use stratos_launch::python_env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let code = match launch().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("[{}] {}", e.error_code(), e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn launch() -> Result<i32, LaunchError> {
    let config = LauncherConfig::load().map_err(LaunchError::Config)?;
    tracing::info!(
        "Launching {} on {}:{}",
        config.app,
        config.host,
        config.port
    );

    if tracing::enabled!(tracing::Level::DEBUG) {
        let status = python_env::status(&config.venv_dir).await;
        tracing::debug!("Environment status: {}", status);
    }

    Launcher::new(config).run().await
}
