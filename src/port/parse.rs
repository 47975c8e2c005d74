//! Parsers for the OS tables that map a listening TCP port to its owner.

use regex::Regex;
use std::sync::OnceLock;

/// `/proc/net/tcp` socket state for LISTEN
const TCP_LISTEN: &str = "0A";

/// Inodes of sockets listening on `port` in a `/proc/net/tcp{,6}` table.
///
/// ```text
///   sl  local_address rem_address   st ... uid  timeout inode
///    0: 00000000:1F40 00000000:0000 0A ... 1000        0 123456 ...
/// ```
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub fn proc_net_listen_inodes(table: &str, port: u16) -> Vec<u64> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 || fields[3] != TCP_LISTEN {
                return None;
            }
            let (_, port_hex) = fields[1].rsplit_once(':')?;
            if u16::from_str_radix(port_hex, 16).ok()? != port {
                return None;
            }
            match fields[9].parse::<u64>() {
                Ok(0) | Err(_) => None,
                Ok(inode) => Some(inode),
            }
        })
        .collect()
}

/// `socket:[123456]` → 123456
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub fn socket_inode(link: &str) -> Option<u64> {
    link.strip_prefix("socket:[")?.strip_suffix(']')?.parse().ok()
}

/// PIDs printed by `lsof -t`, one per line.
#[cfg_attr(not(all(unix, not(target_os = "linux"))), allow(dead_code))]
pub fn lsof_pids(output: &str) -> Vec<u32> {
    output
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

#[cfg_attr(not(windows), allow(dead_code))]
fn netstat_listen_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // The state column is localized on some Windows installs, so listening
    // rows are recognized by their wildcard remote address instead.
    RE.get_or_init(|| {
        Regex::new(r"^\s*TCP\s+\S+:(\d+)\s+(?:0\.0\.0\.0|\[::\]):0\s+\S+\s+(\d+)\s*$")
            .expect("static regex")
    })
}

/// PIDs listening on `port` in `netstat -ano` output.
#[cfg_attr(not(windows), allow(dead_code))]
pub fn netstat_listen_pids(output: &str, port: u16) -> Vec<u32> {
    let re = netstat_listen_re();
    output
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            let local_port: u16 = caps[1].parse().ok()?;
            if local_port != port {
                return None;
            }
            caps[2].parse().ok()
        })
        .collect()
}
