//! Connectivity prober
//!
//! Reduces a bounded batch of single pings against the reference host to a
//! reachability verdict.

use crate::{
    config::ProbeConfig,
    services::command::{CommandLine, diagnostic},
};
use anyhow::{Result, ensure};
use log::{debug, info, warn};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use std::time::Duration;
use trait_variant::make;

/// Extra time granted to the ping process on top of its own timeout
const PING_GRACE: Duration = Duration::from_secs(2);

/// Outcome of one probe batch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectivityVerdict {
    pub reachable: bool,
    pub attempts: u32,
    pub failures: u32,
}

impl ConnectivityVerdict {
    pub fn reachable() -> Self {
        Self {
            reachable: true,
            attempts: 1,
            failures: 0,
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            attempts: 1,
            failures: 1,
        }
    }
}

/// A single reachability probe against the reference host
#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait Ping {
    async fn ping(&self) -> Result<()>;
}

#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait ConnectivityProbe {
    async fn probe(&self, sample_count: u32, failure_threshold: u32) -> ConnectivityVerdict;
}

/// Ping through the system `ping` utility
#[derive(Clone, Debug)]
pub struct SystemPing {
    host: String,
    timeout: Duration,
}

impl SystemPing {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            host: config.host.clone(),
            timeout: config.timeout,
        }
    }

    fn command(&self) -> CommandLine {
        if cfg!(target_os = "windows") {
            let millis = self.timeout.as_millis().to_string();
            CommandLine::new("ping", ["-n", "1", "-w", millis.as_str(), self.host.as_str()])
        } else {
            let secs = self.timeout.as_secs().max(1).to_string();
            CommandLine::new("ping", ["-c", "1", "-W", secs.as_str(), self.host.as_str()])
        }
    }
}

impl Ping for SystemPing {
    async fn ping(&self) -> Result<()> {
        let output = self.command().run(self.timeout + PING_GRACE).await?;

        ensure!(
            output.status.success(),
            "ping {} failed: {}",
            self.host,
            diagnostic(&output)
        );

        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Prober<P> {
    ping: P,
}

impl<P> Prober<P> {
    pub fn new(ping: P) -> Self {
        Self { ping }
    }
}

impl<P> ConnectivityProbe for Prober<P>
where
    P: Ping + Sync,
{
    async fn probe(&self, sample_count: u32, failure_threshold: u32) -> ConnectivityVerdict {
        let samples = sample_count.max(1);
        let threshold = failure_threshold.min(samples);

        let mut attempts = 0;
        let mut failures = 0;

        while failures < threshold && attempts < samples {
            attempts += 1;

            if let Err(e) = self.ping.ping().await {
                debug!("probe {attempts}/{samples} failed: {e:#}");
                failures += 1;
            }
        }

        let reachable = failures < threshold;

        if !reachable {
            warn!("ping failed ({failures}/{samples} failures)");
        } else if failures > 0 {
            info!(
                "ping results: {}/{attempts} successful",
                attempts - failures
            );
        }

        ConnectivityVerdict {
            reachable,
            attempts,
            failures,
        }
    }
}
