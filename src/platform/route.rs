use std::net::{IpAddr, Ipv4Addr};

use super::RouteTable;

/// Reads the default gateway from the host's routing table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRouteTable;

impl RouteTable for SystemRouteTable {
    fn default_gateway_address(&self) -> Option<IpAddr> {
        #[cfg(target_os = "linux")]
        {
            let table = std::fs::read_to_string("/proc/net/route").ok()?;
            parse_proc_net_route(&table).map(IpAddr::V4)
        }

        #[cfg(target_os = "macos")]
        {
            let output = std::process::Command::new("route").args(["-n", "get", "default"]).output().ok()?;
            parse_route_get(&String::from_utf8_lossy(&output.stdout))
        }

        #[cfg(target_os = "windows")]
        {
            let output = std::process::Command::new("ipconfig").output().ok()?;
            parse_ipconfig(&String::from_utf8_lossy(&output.stdout))
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            None
        }
    }
}

/// Linux `/proc/net/route`: destination `00000000`, gateway as little-endian hex.
pub fn parse_proc_net_route(table: &str) -> Option<Ipv4Addr> {
    for line in table.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() >= 3 && fields[1] == "00000000" {
            let raw = u32::from_str_radix(fields[2], 16).ok()?;
            let gateway = Ipv4Addr::from(raw.to_le_bytes());
            if !gateway.is_unspecified() {
                return Some(gateway);
            }
        }
    }
    None
}

/// macOS `route -n get default`.
pub fn parse_route_get(output: &str) -> Option<IpAddr> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("gateway:"))
        .and_then(|gw| gw.trim().parse().ok())
}

/// Windows `ipconfig`.
pub fn parse_ipconfig(output: &str) -> Option<IpAddr> {
    for line in output.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Default Gateway") {
            let rest = rest.trim_start_matches(|c: char| c == '.' || c == ' ' || c == ':');
            if let Ok(ip) = rest.trim().parse::<Ipv4Addr>() {
                if !ip.is_unspecified() {
                    return Some(IpAddr::V4(ip));
                }
            }
        }
    }
    None
}
