use std::process::Command;

use tracing::debug;

use super::NetworkServices;

/// Used whenever the host cannot tell us its services.
pub const FALLBACK_SERVICES: [&str; 2] = ["Wi-Fi", "Ethernet"];

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemNetworkServices;

impl NetworkServices for SystemNetworkServices {
    fn enumerate_interfaces(&self) -> Vec<String> {
        if cfg!(target_os = "macos") {
            match Command::new("networksetup").arg("-listallnetworkservices").output() {
                Ok(output) if output.status.success() => {
                    let services = parse_network_services(&String::from_utf8_lossy(&output.stdout));
                    if !services.is_empty() {
                        return services;
                    }
                }
                Ok(output) => debug!("networksetup exited with {}", output.status),
                Err(e) => debug!("networksetup unavailable: {}", e),
            }
        }
        fallback()
    }
}

/// `networksetup -listallnetworkservices`: skip the legend line and disabled
/// (`*`-prefixed) services.
pub fn parse_network_services(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with('*'))
        .filter(|line| !line.starts_with("An asterisk"))
        .map(str::to_string)
        .collect()
}

fn fallback() -> Vec<String> {
    FALLBACK_SERVICES.iter().map(|s| s.to_string()).collect()
}
