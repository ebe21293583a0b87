use std::net::IpAddr;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::ProxyConfigurator;
use crate::error::PlatformError;

/// Applies SOCKS proxy settings with the host's own tooling.
///
/// macOS goes through `networksetup` per network service; Linux sets the
/// GNOME proxy through `gsettings`, which is host-wide, so the interface name
/// is ignored there. Both need a privileged caller for the change to stick.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProxyConfigurator;

#[async_trait]
impl ProxyConfigurator for SystemProxyConfigurator {
    async fn apply_proxy_configuration(
        &self,
        interface: &str,
        address: Option<IpAddr>,
        port: u16,
        enabled: bool,
    ) -> Result<(), PlatformError> {
        let steps = plan(std::env::consts::OS, interface, address, port, enabled)?;
        for (program, args) in steps {
            run(program, &args).await?;
        }
        Ok(())
    }
}

type Step = (&'static str, Vec<String>);

/// Commands that switch the proxy on `os`.
fn plan(
    os: &str,
    interface: &str,
    address: Option<IpAddr>,
    port: u16,
    enabled: bool,
) -> Result<Vec<Step>, PlatformError> {
    let args = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    match (os, enabled, address) {
        ("macos", true, Some(address)) => Ok(vec![
            (
                "networksetup",
                args(&["-setsocksfirewallproxy", interface, address.to_string().as_str(), port.to_string().as_str()]),
            ),
            ("networksetup", args(&["-setsocksfirewallproxystate", interface, "on"])),
        ]),
        ("macos", false, _) => Ok(vec![(
            "networksetup",
            args(&["-setsocksfirewallproxystate", interface, "off"]),
        )]),
        ("linux", true, Some(address)) => Ok(vec![
            ("gsettings", args(&["set", "org.gnome.system.proxy", "mode", "manual"])),
            (
                "gsettings",
                args(&["set", "org.gnome.system.proxy.socks", "host", address.to_string().as_str()]),
            ),
            (
                "gsettings",
                args(&["set", "org.gnome.system.proxy.socks", "port", port.to_string().as_str()]),
            ),
        ]),
        ("linux", false, _) => Ok(vec![(
            "gsettings",
            args(&["set", "org.gnome.system.proxy", "mode", "none"]),
        )]),
        _ => Err(PlatformError::Unsupported),
    }
}

async fn run(program: &'static str, args: &[String]) -> Result<(), PlatformError> {
    debug!("running {} {:?}", program, args);
    let status = Command::new(program)
        .args(args)
        .status()
        .await
        .map_err(|source| PlatformError::Command { program, source })?;

    if status.success() {
        Ok(())
    } else {
        Err(PlatformError::CommandStatus { program, status })
    }
}
