//! Launch pipeline
//!
//! 1. ensure environment
//! 2. activate environment
//! 3. install dependencies
//! 4. free port
//! 5. start server (blocks until it exits)
//!
//! Strictly sequential. The first failing step aborts the run.

mod error;

pub use error::LaunchError;

use std::time::Duration;

use crate::config::LauncherConfig;
use crate::port::{self, FreeReport};
use crate::python_env::{self, ActivatedEnv};
use crate::server::{self, ServerCommand};

const STEPS: usize = 5;

/// Outcome of steps 1–4
#[derive(Debug)]
pub struct Prepared {
    pub env: ActivatedEnv,
    pub freed: FreeReport,
}

pub struct Launcher {
    config: LauncherConfig,
}

impl Launcher {
    pub fn new(config: LauncherConfig) -> Self {
        Self { config }
    }

    /// Run every step. Returns the server's exit code.
    pub async fn run(&self) -> Result<i32, LaunchError> {
        let prepared = self.prepare().await?;

        step(5, "start server");
        let server = ServerCommand::uvicorn(&self.config, &prepared.env);
        server::run(&server).await
    }

    /// Steps 1–4: everything up to, not including, the server start.
    pub async fn prepare(&self) -> Result<Prepared, LaunchError> {
        let cfg = &self.config;

        step(1, "ensure environment");
        python_env::ensure_environment(&cfg.venv_dir, cfg.base_python.as_deref()).await?;

        step(2, "activate environment");
        let env = python_env::activate(&cfg.venv_dir)?;

        step(3, "install dependencies");
        python_env::install_requirements(&env, &cfg.requirements).await?;

        step(4, "free port");
        let freed = self.free_port().await;

        Ok(Prepared { env, freed })
    }

    /// Kill whatever holds the port, then give the OS a moment to release
    /// it. Never fails; a port that stays busy surfaces as the server's
    /// bind error.
    async fn free_port(&self) -> FreeReport {
        let cfg = &self.config;
        let report = port::free_port(cfg.port).await;

        if !report.killed.is_empty() {
            let timeout = Duration::from_millis(cfg.free_port_timeout_ms);
            if !port::wait_until_free(&cfg.host, cfg.port, timeout).await {
                tracing::warn!(
                    "Port {} still busy after {:?}; the server may fail to bind",
                    cfg.port,
                    timeout
                );
            }
        }
        report
    }
}

fn step(n: usize, name: &str) {
    tracing::info!("[{}/{}] {}", n, STEPS, name);
}
