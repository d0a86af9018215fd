//! Network switcher
//!
//! Joins wireless networks and reports the network active on the monitored
//! interface. The platform tool is chosen once at startup; callers only see
//! [`NetworkSwitcher`].

use crate::{
    config::WifiConfig,
    services::command::{CommandLine, diagnostic},
};
use log::{debug, error, info, warn};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use std::{process::Output, sync::Arc, time::Duration};
use trait_variant::make;

const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait NetworkSwitcher {
    /// Join `ssid`; failures are logged and reported as false
    async fn join(&self, ssid: &str) -> bool;
    /// Network currently active on the monitored interface
    async fn current_network(&self) -> Option<String>;
}

/// Platform specific commands and output parsing
pub trait WifiBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn join_command(&self, ssid: &str) -> CommandLine;
    fn current_command(&self) -> CommandLine;
    fn parse_current(&self, stdout: &str) -> Option<String>;

    /// Reason a join failed, if it did
    fn join_error(&self, output: &Output) -> Option<String> {
        (!output.status.success()).then(|| diagnostic(output))
    }
}

/// Linux, via NetworkManager's `nmcli`
#[derive(Clone, Debug)]
pub struct NetworkManager {
    interface: Option<String>,
    use_sudo: bool,
}

/// Windows, via `netsh wlan`
#[derive(Clone, Debug)]
pub struct Netsh {
    interface: Option<String>,
}

/// macOS, via `networksetup`
#[derive(Clone, Debug)]
pub struct Networksetup {
    interface: String,
}

impl WifiBackend for NetworkManager {
    fn name(&self) -> &'static str {
        "nmcli"
    }

    fn join_command(&self, ssid: &str) -> CommandLine {
        let mut args = vec!["nmcli", "device", "wifi", "connect", ssid];

        if let Some(interface) = &self.interface {
            args.extend(["ifname", interface.as_str()]);
        }

        if self.use_sudo {
            CommandLine::new("sudo", args)
        } else {
            CommandLine::new("nmcli", args.into_iter().skip(1))
        }
    }

    fn current_command(&self) -> CommandLine {
        CommandLine::new(
            "nmcli",
            ["-t", "-f", "DEVICE,NAME", "connection", "show", "--active"],
        )
    }

    fn parse_current(&self, stdout: &str) -> Option<String> {
        stdout
            .lines()
            .map(split_terse)
            .filter(|fields| fields.len() >= 2)
            .find(|fields| {
                self.interface
                    .as_deref()
                    .is_none_or(|interface| fields[0] == interface)
            })
            .map(|fields| fields[1].trim().to_string())
            .filter(|name| !name.is_empty())
    }
}

/// Split a line of `nmcli --terse` output, undoing its `\:` and `\\` escapes
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => field.extend(chars.next()),
            ':' => fields.push(std::mem::take(&mut field)),
            c => field.push(c),
        }
    }

    fields.push(field);
    fields
}

impl WifiBackend for Netsh {
    fn name(&self) -> &'static str {
        "netsh"
    }

    fn join_command(&self, ssid: &str) -> CommandLine {
        let mut args = vec![
            "wlan".to_string(),
            "connect".to_string(),
            format!("name={ssid}"),
        ];

        if let Some(interface) = &self.interface {
            args.push(format!("interface={interface}"));
        }

        CommandLine::new("netsh", args)
    }

    fn current_command(&self) -> CommandLine {
        CommandLine::new("netsh", ["wlan", "show", "interfaces"])
    }

    fn parse_current(&self, stdout: &str) -> Option<String> {
        let mut interface: Option<&str> = None;

        for line in stdout.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };

            let value = value.trim();

            match key.trim() {
                "Name" => interface = Some(value),
                "SSID" if !value.is_empty() => {
                    let monitored = match (&self.interface, interface) {
                        (None, _) => true,
                        (Some(wanted), Some(current)) => wanted.eq_ignore_ascii_case(current),
                        (Some(_), None) => false,
                    };

                    if monitored {
                        return Some(value.to_string());
                    }
                }
                _ => {}
            }
        }

        None
    }
}

impl WifiBackend for Networksetup {
    fn name(&self) -> &'static str {
        "networksetup"
    }

    fn join_command(&self, ssid: &str) -> CommandLine {
        CommandLine::new(
            "networksetup",
            ["-setairportnetwork", self.interface.as_str(), ssid],
        )
    }

    fn current_command(&self) -> CommandLine {
        CommandLine::new(
            "networksetup",
            ["-getairportnetwork", self.interface.as_str()],
        )
    }

    fn parse_current(&self, stdout: &str) -> Option<String> {
        stdout.lines().find_map(|line| {
            line.strip_prefix("Current Wi-Fi Network:")
                .or_else(|| line.strip_prefix("Current AirPort Network:"))
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
        })
    }

    // networksetup exits with 0 even if the network could not be joined
    fn join_error(&self, output: &Output) -> Option<String> {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let failed = ["Error", "Could not", "Failed"]
            .iter()
            .any(|marker| stdout.contains(marker));

        (!output.status.success() || failed).then(|| diagnostic(output))
    }
}

#[derive(Clone)]
pub struct WifiSwitcher {
    backend: Arc<dyn WifiBackend>,
    join_timeout: Duration,
}

impl WifiSwitcher {
    pub fn new(backend: Arc<dyn WifiBackend>, join_timeout: Duration) -> Self {
        Self {
            backend,
            join_timeout,
        }
    }

    /// Switcher using the WiFi tool of the platform this binary was built for
    pub fn for_platform(config: &WifiConfig) -> Self {
        let backend: Arc<dyn WifiBackend> = if cfg!(target_os = "windows") {
            Arc::new(Netsh {
                interface: config.interface.clone(),
            })
        } else if cfg!(target_os = "macos") {
            Arc::new(Networksetup {
                interface: config.interface.clone().unwrap_or_else(|| "en0".to_string()),
            })
        } else {
            Arc::new(NetworkManager {
                interface: config.interface.clone(),
                use_sudo: config.use_sudo,
            })
        };

        info!("wifi backend: {}", backend.name());

        Self::new(backend, config.join_timeout)
    }
}

impl NetworkSwitcher for WifiSwitcher {
    async fn join(&self, ssid: &str) -> bool {
        info!("attempting to connect to wifi: {ssid}");

        match self.backend.join_command(ssid).run(self.join_timeout).await {
            Ok(output) => match self.backend.join_error(&output) {
                None => {
                    info!("successfully connected to {ssid}");
                    true
                }
                Some(reason) => {
                    error!("failed to connect to {ssid}: {reason}");
                    false
                }
            },
            Err(e) => {
                error!("failed to connect to {ssid}: {e:#}");
                false
            }
        }
    }

    async fn current_network(&self) -> Option<String> {
        let output = match self.backend.current_command().run(QUERY_TIMEOUT).await {
            Ok(output) => output,
            Err(e) => {
                error!("failed to get current wifi: {e:#}");
                return None;
            }
        };

        if !output.status.success() {
            warn!("failed to get current wifi: {}", diagnostic(&output));
            return None;
        }

        let current = self
            .backend
            .parse_current(&String::from_utf8_lossy(&output.stdout));

        debug!("current wifi: {current:?}");

        current
    }
}
