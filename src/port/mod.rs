//! TCP port ownership — find listeners, evict them, check bindability
//!
//! Listener lookup per platform:
//! - Linux: `/proc/net/tcp{,6}` LISTEN rows → socket inode → `/proc/<pid>/fd`
//! - other Unix: `lsof -nP -tiTCP:<port> -sTCP:LISTEN`
//! - Windows: `netstat -ano`, TCP rows with a wildcard foreign address
//!
//! Sockets owned by processes we may not inspect (other users, without root)
//! are invisible to every method, so eviction is best-effort.

mod parse;

use anyhow::{Context, Result};
use socket2::{Domain, Socket, Type};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;
use tokio::time::Instant;

use crate::process::{force_kill_pid, ProcessError};
use crate::process_monitor::{self, ProcessSummary};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// How long a killed pid may linger before it counts as a survivor
const EXIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Result of [`free_port`]
#[derive(Debug, Default, Clone)]
pub struct FreeReport {
    pub port: u16,
    pub killed: Vec<ProcessSummary>,
    /// (pid, reason) for listeners that survived
    pub failed: Vec<(u32, String)>,
    /// A listener exists but its owner could not be identified
    pub unresolved: bool,
}

impl FreeReport {
    pub fn is_noop(&self) -> bool {
        self.killed.is_empty() && self.failed.is_empty() && !self.unresolved
    }
}

/// Listener pids, plus whether some listening socket had no visible owner
#[derive(Debug, Default)]
struct ListenerLookup {
    pids: Vec<u32>,
    hidden: bool,
}

/// PIDs of processes listening on TCP `port`, deduplicated and sorted.
pub async fn find_listeners(port: u16) -> Result<Vec<u32>> {
    Ok(lookup_listeners(port).await?.pids)
}

async fn lookup_listeners(port: u16) -> Result<ListenerLookup> {
    let mut lookup = platform_listeners(port).await?;
    lookup.pids.sort_unstable();
    lookup.pids.dedup();
    Ok(lookup)
}

/// Forcibly terminate every process listening on `port`.
///
/// Never fails: lookup and kill errors are logged and recorded in the
/// report. A pid only counts as killed once it is gone. The launcher's own
/// PID is never targeted.
pub async fn free_port(port: u16) -> FreeReport {
    let mut report = FreeReport {
        port,
        ..Default::default()
    };

    let lookup = match lookup_listeners(port).await {
        Ok(lookup) => lookup,
        Err(e) => {
            tracing::warn!("Could not look up listeners on port {}: {:#}", port, e);
            return report;
        }
    };
    if lookup.hidden {
        tracing::warn!(
            "Port {} has a listener whose owner is not visible to this user",
            port
        );
        report.unresolved = true;
    }

    let me = std::process::id();
    for pid in lookup.pids.into_iter().filter(|pid| *pid != me) {
        let summary = process_monitor::describe_async(pid)
            .await
            .unwrap_or_else(|| ProcessSummary::unknown(pid));
        tracing::info!("Killing process holding port {}: {}", port, summary);

        match force_kill_pid(pid) {
            Ok(()) => {
                if wait_for_exit(pid, EXIT_TIMEOUT).await {
                    report.killed.push(summary);
                } else {
                    tracing::warn!("pid {} still running after SIGKILL", pid);
                    report
                        .failed
                        .push((pid, format!("still running after {:?}", EXIT_TIMEOUT)));
                }
            }
            Err(ProcessError::NotFound { .. }) => {
                tracing::debug!("pid {} exited before it could be killed", pid);
            }
            Err(e) => {
                tracing::warn!("{}", e);
                report.failed.push((pid, e.to_string()));
            }
        }
    }

    if report.is_noop() {
        tracing::info!("Port {} is free", port);
    }
    report
}

/// Poll until `pid` is gone or `timeout` passes.
async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !process_monitor::is_running_async(pid).await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Whether a listener could bind `host:port` right now.
///
/// Binds the way a server would (`SO_REUSEADDR` on Unix, so TIME_WAIT
/// leftovers do not count) and releases the socket immediately.
pub fn is_port_bindable(host: &str, port: u16) -> bool {
    let addr = match resolve(host, port) {
        Ok(addr) => addr,
        Err(e) => {
            tracing::debug!("{:#}", e);
            return false;
        }
    };
    let Ok(socket) = Socket::new(Domain::for_address(addr), Type::STREAM, None) else {
        return false;
    };
    #[cfg(unix)]
    {
        if socket.set_reuse_address(true).is_err() {
            return false;
        }
    }
    socket.bind(&addr.into()).is_ok()
}

/// Poll until `host:port` is bindable or `timeout` passes.
pub async fn wait_until_free(host: &str, port: u16, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if is_port_bindable(host, port) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Poll a loopback connect until something accepts on `port` or `timeout`
/// passes.
pub async fn wait_until_listening(port: u16, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("cannot resolve {}:{}", host, port))?
        .next()
        .with_context(|| format!("no address for {}:{}", host, port))
}

// ═══════════════════════════════════════════════════════════════
//  Platform lookups
// ═══════════════════════════════════════════════════════════════

#[cfg(target_os = "linux")]
async fn platform_listeners(port: u16) -> Result<ListenerLookup> {
    tokio::task::spawn_blocking(move || procfs_listeners(std::path::Path::new("/proc"), port))
        .await
        .context("listener lookup task panicked")?
}

/// Listener owners from a procfs tree rooted at `proc_root`.
#[cfg(target_os = "linux")]
fn procfs_listeners(proc_root: &std::path::Path, port: u16) -> Result<ListenerLookup> {
    use std::collections::HashSet;

    let mut inodes = HashSet::new();
    for table in ["net/tcp", "net/tcp6"] {
        let path = proc_root.join(table);
        match std::fs::read_to_string(&path) {
            Ok(s) => inodes.extend(parse::proc_net_listen_inodes(&s, port)),
            // tcp6 is absent when IPv6 is disabled
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }
    if inodes.is_empty() {
        return Ok(ListenerLookup::default());
    }

    let mut pids = Vec::new();
    for entry in std::fs::read_dir(proc_root)?.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        // Unreadable fd tables belong to other users
        let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        let owns = fds.flatten().any(|fd| {
            std::fs::read_link(fd.path())
                .ok()
                .and_then(|link| link.to_str().and_then(parse::socket_inode))
                .map_or(false, |inode| inodes.contains(&inode))
        });
        if owns {
            pids.push(pid);
        }
    }

    let hidden = pids.is_empty();
    Ok(ListenerLookup { pids, hidden })
}

#[cfg(all(unix, not(target_os = "linux")))]
async fn platform_listeners(port: u16) -> Result<ListenerLookup> {
    let mut cmd = tokio::process::Command::new("lsof");
    cmd.args(["-nP", &format!("-tiTCP:{}", port), "-sTCP:LISTEN"])
        .stdin(std::process::Stdio::null());
    let output = cmd.output().await.context("Failed to run lsof")?;
    // lsof exits 1 when nothing matches
    Ok(ListenerLookup {
        pids: parse::lsof_pids(&String::from_utf8_lossy(&output.stdout)),
        hidden: false,
    })
}

#[cfg(target_os = "windows")]
async fn platform_listeners(port: u16) -> Result<ListenerLookup> {
    let mut cmd = tokio::process::Command::new("netstat");
    cmd.args(["-ano"]).stdin(std::process::Stdio::null());
    crate::utils::apply_creation_flags(&mut cmd);
    let output = cmd.output().await.context("Failed to run netstat")?;
    if !output.status.success() {
        anyhow::bail!("netstat exited with {}", output.status);
    }
    Ok(ListenerLookup {
        pids: parse::netstat_listen_pids(&String::from_utf8_lossy(&output.stdout), port),
        hidden: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn ephemeral_listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn test_bindable_tracks_listener_lifetime() {
        let (listener, port) = ephemeral_listener();
        assert!(!is_port_bindable("127.0.0.1", port));
        drop(listener);
        assert!(is_port_bindable("127.0.0.1", port));
    }

    #[test]
    fn test_unresolvable_host_is_not_bindable() {
        assert!(!is_port_bindable("no such host.invalid", 8000));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_find_listeners_sees_own_socket() {
        let (_listener, port) = ephemeral_listener();
        let pids = find_listeners(port).await.unwrap();
        assert_eq!(pids, vec![std::process::id()]);
    }

    #[tokio::test]
    async fn test_free_port_without_listener_is_noop() {
        let (listener, port) = ephemeral_listener();
        drop(listener);
        let report = free_port(port).await;
        assert_eq!(report.port, port);
        assert!(report.is_noop());
    }

    #[tokio::test]
    async fn test_free_port_never_kills_self() {
        let (listener, port) = ephemeral_listener();
        let report = free_port(port).await;
        assert!(report.killed.iter().all(|p| p.pid != std::process::id()));
        // Still ours
        assert!(!is_port_bindable("127.0.0.1", port));
        drop(listener);
    }

    #[tokio::test]
    async fn test_wait_until_free_times_out_while_held() {
        let (listener, port) = ephemeral_listener();
        assert!(!wait_until_free("127.0.0.1", port, Duration::from_millis(120)).await);
        drop(listener);
        assert!(wait_until_free("127.0.0.1", port, Duration::from_millis(120)).await);
    }

    #[tokio::test]
    async fn test_wait_until_listening() {
        let (listener, port) = ephemeral_listener();
        assert!(wait_until_listening(port, Duration::from_millis(500)).await);
        drop(listener);
        assert!(!wait_until_listening(port, Duration::from_millis(300)).await);
    }

    #[test]
    fn test_unresolved_report_is_not_noop() {
        let report = FreeReport {
            port: 8000,
            unresolved: true,
            ..Default::default()
        };
        assert!(!report.is_noop());
        assert!(FreeReport::default().is_noop());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_for_exit() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        assert!(!wait_for_exit(pid, Duration::from_millis(100)).await);

        force_kill_pid(pid).unwrap();
        // Unreaped zombie already counts as gone
        assert!(wait_for_exit(pid, Duration::from_secs(2)).await);
        child.wait().unwrap();
    }

    #[cfg(target_os = "linux")]
    mod procfs {
        use super::super::procfs_listeners;
        use std::os::unix::fs::symlink;
        use std::path::Path;

        const TCP_TABLE: &str = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000:1F40 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 48213 1 0000000000000000 100 0 0 10 0
";

        fn fake_proc(root: &Path) {
            std::fs::create_dir_all(root.join("net")).unwrap();
            std::fs::write(root.join("net/tcp"), TCP_TABLE).unwrap();
            std::fs::create_dir_all(root.join("self")).unwrap();
        }

        fn add_fd(root: &Path, pid: u32, fd: u32, target: &str) {
            let dir = root.join(pid.to_string()).join("fd");
            std::fs::create_dir_all(&dir).unwrap();
            symlink(target, dir.join(fd.to_string())).unwrap();
        }

        #[test]
        fn test_owner_resolved_through_fd_links() {
            let dir = tempfile::tempdir().unwrap();
            fake_proc(dir.path());
            add_fd(dir.path(), 4242, 3, "socket:[48213]");
            add_fd(dir.path(), 4243, 0, "socket:[1]");
            add_fd(dir.path(), 4244, 1, "/dev/null");

            let lookup = procfs_listeners(dir.path(), 8000).unwrap();
            assert_eq!(lookup.pids, vec![4242]);
            assert!(!lookup.hidden);
        }

        #[test]
        fn test_invisible_owner_is_flagged() {
            let dir = tempfile::tempdir().unwrap();
            fake_proc(dir.path());
            add_fd(dir.path(), 4243, 0, "socket:[1]");

            let lookup = procfs_listeners(dir.path(), 8000).unwrap();
            assert!(lookup.pids.is_empty());
            assert!(lookup.hidden);
        }

        #[test]
        fn test_no_listener_on_port() {
            let dir = tempfile::tempdir().unwrap();
            fake_proc(dir.path());
            let lookup = procfs_listeners(dir.path(), 9000).unwrap();
            assert!(lookup.pids.is_empty());
            assert!(!lookup.hidden);
        }
    }
}
