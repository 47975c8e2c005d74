//! Foreground server process. The launcher blocks on it and exits with its
//! exit code.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;

use crate::config::LauncherConfig;
use crate::launcher::LaunchError;
use crate::port;
use crate::python_env::ActivatedEnv;
use crate::utils::render_command;

/// Everything needed to spawn the server, resolved up front.
#[derive(Debug, Clone)]
pub struct ServerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(&'static str, OsString)>,
    pub port: u16,
    pub readiness_timeout: Duration,
}

impl ServerCommand {
    /// `<venv python> -m uvicorn <app> --host <host> --port <port> [--reload]`
    pub fn uvicorn(cfg: &LauncherConfig, env: &ActivatedEnv) -> Self {
        let mut args: Vec<OsString> = ["-m", "uvicorn", cfg.app.as_str(), "--host", cfg.host.as_str()]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push("--port".into());
        args.push(cfg.port.to_string().into());
        if cfg.reload {
            args.push("--reload".into());
        }

        Self {
            program: env.python.clone(),
            args,
            env: env.vars(),
            port: cfg.port,
            readiness_timeout: Duration::from_millis(cfg.readiness_timeout_ms),
        }
    }

    pub fn display(&self) -> String {
        render_command(&self.program, &self.args)
    }

    /// No creation flags here: the server keeps the launcher's console so
    /// Ctrl+C reaches it.
    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(false);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.env_remove("PYTHONHOME");
        cmd
    }
}

/// Spawn the server and wait for it to exit. Returns the exit code to
/// propagate.
pub async fn run(server: &ServerCommand) -> Result<i32, LaunchError> {
    tracing::info!("Starting server: {}", server.display());

    let mut child = server.to_command().spawn().map_err(|e| LaunchError::ServerSpawn {
        program: server.program.display().to_string(),
        reason: e.to_string(),
    })?;
    if let Some(pid) = child.id() {
        tracing::info!("Server started (pid {})", pid);
    }

    let port = server.port;
    let timeout = server.readiness_timeout;
    let watcher = tokio::spawn(async move {
        if port::wait_until_listening(port, timeout).await {
            tracing::info!("Server is accepting connections on port {}", port);
        } else {
            tracing::warn!(
                "Server not accepting connections on port {} after {:?}",
                port,
                timeout
            );
        }
    });

    // Ctrl+C reaches the child through the terminal's process group; keep
    // waiting so its own exit code is what we return.
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            res = tokio::signal::ctrl_c() => match res {
                Ok(()) => tracing::info!("Interrupt received, waiting for server to exit"),
                Err(e) => {
                    tracing::debug!("Cannot listen for Ctrl+C: {}", e);
                    break child.wait().await;
                }
            },
        }
    }
    .map_err(|e| anyhow::anyhow!("Failed to wait for server: {}", e))?;
    watcher.abort();

    let code = exit_code(status);
    if status.success() {
        tracing::info!("Server exited");
    } else {
        tracing::warn!("Server exited with {} (code {})", status, code);
    }
    Ok(code)
}

/// Exit code to propagate: the child's code, `128 + signal` when it was
/// killed by a signal, otherwise 1.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return 128 + sig;
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_env() -> ActivatedEnv {
        let dir = tempfile::tempdir().unwrap();
        let python = crate::python_env::venv_python_exe(dir.path());
        std::fs::create_dir_all(python.parent().unwrap()).unwrap();
        std::fs::write(&python, b"").unwrap();
        let env = crate::python_env::activate(dir.path()).unwrap();
        // Paths stay valid as values once the directory is gone
        drop(dir);
        env
    }

    #[test]
    fn test_uvicorn_command_defaults() {
        let env = fake_env();
        let cmd = ServerCommand::uvicorn(&LauncherConfig::default(), &env);
        let args: Vec<String> = cmd.args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            ["-m", "uvicorn", "api.main:app", "--host", "0.0.0.0", "--port", "8000", "--reload"]
        );
        assert_eq!(cmd.program, env.python);
        assert!(cmd.env.iter().any(|(k, _)| *k == "VIRTUAL_ENV"));
        assert_eq!(cmd.port, 8000);
    }

    #[test]
    fn test_uvicorn_command_without_reload() {
        let env = fake_env();
        let cfg = LauncherConfig {
            reload: false,
            port: 9100,
            ..Default::default()
        };
        let cmd = ServerCommand::uvicorn(&cfg, &env);
        assert!(!cmd.args.iter().any(|a| a == "--reload"));
        assert!(cmd.display().ends_with("--port 9100"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_propagates_exit_code() {
        let server = ServerCommand {
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), "exit 3".into()],
            env: Vec::new(),
            port: 1,
            readiness_timeout: Duration::from_millis(10),
        };
        assert_eq!(run(&server).await.unwrap(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_interrupted_server_ends_the_wait() {
        let server = ServerCommand {
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), "kill -INT $$; sleep 30".into()],
            env: Vec::new(),
            port: 1,
            readiness_timeout: Duration::from_millis(10),
        };
        assert_eq!(run(&server).await.unwrap(), 128 + 2);
    }

    #[tokio::test]
    async fn test_run_missing_program() {
        let server = ServerCommand {
            program: PathBuf::from("/nonexistent/python"),
            args: Vec::new(),
            env: Vec::new(),
            port: 1,
            readiness_timeout: Duration::from_millis(10),
        };
        let err = run(&server).await.unwrap_err();
        assert!(matches!(err, LaunchError::ServerSpawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_code_from_signal() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(exit_code(ExitStatus::from_raw(9)), 137);
        assert_eq!(exit_code(ExitStatus::from_raw(2 << 8)), 2);
    }
}
