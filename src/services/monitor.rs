//! Monitor loop
//!
//! Probes reachability on a fixed cadence, walks the network priority list
//! when the connection is lost and periodically tries to get back from the
//! fallback network to the primary one.

use crate::{
    config::{AppConfig, MonitorConfig, ProbeConfig, WifiConfig},
    messages,
    services::{
        panic_message, pending::PendingQueue, prober::ConnectivityProbe, wifi::NetworkSwitcher,
    },
    telegram_client::NotificationChannel,
};
use chrono::{DateTime, Local};
use futures_util::FutureExt;
use log::{error, info, warn};
use std::{panic::AssertUnwindSafe, sync::Arc};
use tokio::{sync::watch, time::sleep};

/// Connectivity history the loop decides on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorState {
    pub connection_was_good: bool,
    pub last_network: Option<String>,
    /// `None` until the first attempt, so a retry is due right away
    pub last_primary_retry: Option<DateTime<Local>>,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self {
            connection_was_good: true,
            last_network: None,
            last_primary_retry: None,
        }
    }
}

pub struct Monitor<C, P, S> {
    channel: C,
    prober: P,
    switcher: S,
    queue: Arc<PendingQueue>,
    wifi: WifiConfig,
    probe: ProbeConfig,
    config: MonitorConfig,
    state: MonitorState,
}

impl<C, P, S> Monitor<C, P, S>
where
    C: NotificationChannel,
    P: ConnectivityProbe,
    S: NetworkSwitcher,
{
    pub fn new(
        channel: C,
        prober: P,
        switcher: S,
        queue: Arc<PendingQueue>,
        config: &AppConfig,
    ) -> Self {
        Self {
            channel,
            prober,
            switcher,
            queue,
            wifi: config.wifi.clone(),
            probe: config.probe.clone(),
            config: config.monitor.clone(),
            state: MonitorState::default(),
        }
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    /// Run cycles until `shutdown` flips to true or its sender is dropped
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("monitor started");

        while !*shutdown.borrow() {
            let cycle = AssertUnwindSafe(self.run_cycle(Local::now())).catch_unwind();

            tokio::select! {
                result = cycle => {
                    if let Err(panic) = result {
                        error!("monitor cycle panicked: {}", panic_message(&*panic));
                    }
                }
                _ = shutdown.changed() => break,
            }

            tokio::select! {
                _ = sleep(self.config.check_interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("monitor stopped");
    }

    /// One probe and the reactions to its verdict
    pub async fn run_cycle(&mut self, now: DateTime<Local>) {
        let timestamp = messages::timestamp(now);

        let verdict = self
            .prober
            .probe(self.probe.samples, self.probe.max_failures)
            .await;
        let mut current = self.switcher.current_network().await;

        if verdict.reachable {
            if self.state.connection_was_good {
                info!("connected (wifi: {})", current.as_deref().unwrap_or("unknown"));
            } else {
                info!("internet connection restored");
                self.notify_unqueued(&messages::restored(current.as_deref(), &timestamp))
                    .await;
                self.queue.flush(&self.channel).await;
                self.state.connection_was_good = true;
            }

            if current.as_deref() == Some(self.wifi.fallback.as_str())
                && self.should_retry_primary(now)
            {
                current = self.retry_primary(current, now, &timestamp).await;
            }
        } else {
            warn!("ping check failed, attempting wifi switch");

            if self.state.connection_was_good {
                warn!("internet connection lost");
                self.notify(&messages::lost(&timestamp)).await;
                self.state.connection_was_good = false;
            }

            current = self.walk_priority_list(current, now, &timestamp).await;
        }

        self.track_network(current);
    }

    fn should_retry_primary(&self, now: DateTime<Local>) -> bool {
        match self.state.last_primary_retry {
            None => true,
            Some(at) => (now - at)
                .to_std()
                .is_ok_and(|elapsed| elapsed >= self.config.retry_primary_interval),
        }
    }

    /// Try to move from the fallback network back to the primary one
    ///
    /// # Returns
    /// Network active after the attempt
    async fn retry_primary(
        &mut self,
        mut current: Option<String>,
        now: DateTime<Local>,
        timestamp: &str,
    ) -> Option<String> {
        let primary = self.wifi.primary.clone();
        let fallback = self.wifi.fallback.clone();

        info!("attempting to reconnect to {primary}");
        self.notify(&messages::retrying_primary(&primary, timestamp))
            .await;

        if self.switcher.join(&primary).await {
            sleep(self.config.join_settle).await;
            current = self.switcher.current_network().await;

            if current.as_deref() == Some(primary.as_str()) {
                sleep(self.config.probe_settle).await;

                let verdict = self
                    .prober
                    .probe(self.probe.samples, self.probe.max_failures)
                    .await;

                if verdict.reachable {
                    info!("switched to {primary} with internet");
                    self.notify(&messages::switched_to_primary(&primary, timestamp))
                        .await;
                } else {
                    warn!("{primary} has no internet, staying on {fallback}");
                    self.notify(&messages::primary_without_internet(
                        &primary, &fallback, timestamp,
                    ))
                    .await;

                    if self.switcher.join(&fallback).await {
                        current = Some(fallback);
                    } else {
                        error!("failed to rejoin {fallback}");
                    }
                }
            } else {
                warn!("failed to switch to {primary}");
            }
        } else {
            warn!("could not connect to {primary}");
        }

        self.state.last_primary_retry = Some(now);

        current
    }

    /// Join the networks in priority order until one has internet
    ///
    /// # Returns
    /// Network active after the walk
    async fn walk_priority_list(
        &mut self,
        mut current: Option<String>,
        now: DateTime<Local>,
        timestamp: &str,
    ) -> Option<String> {
        let candidates = self.wifi.priority_list().map(String::from);

        for (index, candidate) in candidates.iter().enumerate() {
            if current.as_deref() == Some(candidate.as_str()) {
                continue;
            }

            info!("attempting to connect to {candidate} (priority {})", index + 1);

            if !self.switcher.join(candidate).await {
                continue;
            }

            sleep(self.config.join_settle).await;
            current = self.switcher.current_network().await;

            if current.as_deref() != Some(candidate.as_str()) {
                warn!(
                    "joined {candidate} but active network is {}",
                    current.as_deref().unwrap_or("none")
                );
                continue;
            }

            sleep(self.config.probe_settle).await;

            let verdict = self
                .prober
                .probe(self.probe.samples, self.probe.max_failures)
                .await;

            if !verdict.reachable {
                warn!("{candidate} has no internet, trying next priority");
                continue;
            }

            info!("connected to {candidate}");
            self.notify_unqueued(&messages::connected(candidate, timestamp))
                .await;
            self.queue.flush(&self.channel).await;

            if index == 0 {
                self.state.last_primary_retry = Some(now);
            }

            break;
        }

        current
    }

    fn track_network(&mut self, current: Option<String>) {
        let Some(current) = current else {
            return;
        };

        if self.state.last_network.as_ref() != Some(&current) {
            if self.wifi.priority_list().contains(&current.as_str()) {
                info!("switched to {current}");
            } else {
                info!("active network: {current}");
            }

            self.state.last_network = Some(current);
        }
    }

    /// Send, queueing the message for a later flush if nobody received it
    async fn notify(&self, text: &str) {
        if !self.channel.send(text).await && self.channel.is_configured() {
            self.queue.enqueue(text);
        }
    }

    /// Send without queueing on failure
    async fn notify_unqueued(&self, text: &str) {
        if !self.channel.send(text).await {
            warn!("notification not delivered and not queued");
        }
    }
}
