//! Command responder
//!
//! Long-polls the bot for commands and answers `/start`, `/help` and
//! `/wifistatus` independently of the monitor loop.

use crate::{
    messages,
    services::{panic_message, prober::ConnectivityProbe, wifi::NetworkSwitcher},
    telegram_client::{ChatKind, NotificationChannel, PollOutcome, Update},
};
use chrono::Local;
use futures_util::FutureExt;
use log::{debug, error, info, warn};
use std::{panic::AssertUnwindSafe, time::Duration};
use tokio::{sync::watch, time::sleep};

const CONFLICT_BACKOFF: Duration = Duration::from_secs(30);
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    WifiStatus,
}

impl BotCommand {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "/start" => Some(Self::Start),
            "/help" => Some(Self::Help),
            "/wifistatus" => Some(Self::WifiStatus),
            _ => None,
        }
    }
}

/// Command extracted from an inbound update
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundCommand {
    pub name: String,
    pub chat_id: i64,
    pub chat_kind: ChatKind,
}

impl InboundCommand {
    /// Command of `update`, with arguments and a `@botname` suffix stripped
    pub fn from_update(update: &Update) -> Option<Self> {
        let message = update.message.as_ref()?;
        let chat = message.chat.as_ref()?;
        let text = message.text.as_deref()?.trim();

        if !text.starts_with('/') {
            return None;
        }

        let token = text.split_whitespace().next()?;
        let name = token.split_once('@').map_or(token, |(name, _)| name);

        Some(Self {
            name: name.to_string(),
            chat_id: chat.id,
            chat_kind: chat.kind,
        })
    }
}

pub struct CommandResponder<C, P, S> {
    channel: C,
    prober: P,
    switcher: S,
    status_samples: u32,
    failure_threshold: u32,
    last_update_id: Option<i64>,
}

impl<C, P, S> CommandResponder<C, P, S>
where
    C: NotificationChannel,
    P: ConnectivityProbe,
    S: NetworkSwitcher,
{
    pub fn new(
        channel: C,
        prober: P,
        switcher: S,
        status_samples: u32,
        failure_threshold: u32,
    ) -> Self {
        Self {
            channel,
            prober,
            switcher,
            status_samples,
            failure_threshold,
            last_update_id: None,
        }
    }

    pub fn last_update_id(&self) -> Option<i64> {
        self.last_update_id
    }

    /// Poll for commands until `shutdown` flips to true or its sender is dropped
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        if !self.channel.has_token() {
            warn!("telegram bot not configured, command handler disabled");
            return;
        }

        info!("telegram command handler started");

        while !*shutdown.borrow() {
            let round = AssertUnwindSafe(self.poll_once()).catch_unwind();

            let backoff = tokio::select! {
                result = round => result.unwrap_or_else(|panic| {
                    error!("command handler panicked: {}", panic_message(&*panic));
                    ERROR_BACKOFF
                }),
                _ = shutdown.changed() => break,
            };

            if backoff.is_zero() {
                continue;
            }

            tokio::select! {
                _ = sleep(backoff) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("telegram command handler stopped");
    }

    /// One long-poll round
    ///
    /// # Returns
    /// Time to wait before the next round
    pub async fn poll_once(&mut self) -> Duration {
        let offset = self.last_update_id.map(|id| id + 1);

        match self.channel.poll_updates(offset).await {
            Ok(PollOutcome::Updates(updates)) => {
                self.process_updates(&updates).await;
                Duration::ZERO
            }
            Ok(PollOutcome::IdleTimeout) => Duration::ZERO,
            Ok(PollOutcome::Conflict(description)) => {
                error!("conflict (409): another bot instance is running: {description}");
                error!("make sure only one instance of netchange is running");
                CONFLICT_BACKOFF
            }
            Err(e) => {
                error!("telegram command handler error: {e:#}");
                ERROR_BACKOFF
            }
        }
    }

    /// Dispatch every update newer than the cursor
    ///
    /// # Returns
    /// Number of dispatched commands
    pub async fn process_updates(&mut self, updates: &[Update]) -> usize {
        let mut dispatched = 0;

        for update in updates {
            if self.last_update_id.is_some_and(|last| update.update_id <= last) {
                debug!("skip already processed update {}", update.update_id);
                continue;
            }

            self.last_update_id = Some(update.update_id);

            let Some(command) = InboundCommand::from_update(update) else {
                continue;
            };

            info!(
                "received command: {} from chat {} ({:?})",
                command.name, command.chat_id, command.chat_kind
            );

            if self.dispatch(&command).await {
                dispatched += 1;
            }
        }

        dispatched
    }

    async fn dispatch(&self, command: &InboundCommand) -> bool {
        let Some(bot_command) = BotCommand::from_name(&command.name) else {
            debug!("ignore unknown command {}", command.name);
            return false;
        };

        let reply = match bot_command {
            BotCommand::Start | BotCommand::Help => messages::help(),
            BotCommand::WifiStatus => {
                if let Err(e) = self
                    .channel
                    .send_to(command.chat_id, messages::CHECKING)
                    .await
                {
                    error!("failed to send checking message: {e:#}");
                }

                self.status().await
            }
        };

        match self.channel.send_to(command.chat_id, &reply).await {
            Ok(()) => info!("responded to {} command", command.name),
            Err(e) => error!("failed to respond to {}: {e:#}", command.name),
        }

        true
    }

    async fn status(&self) -> String {
        let verdict = self
            .prober
            .probe(self.status_samples, self.failure_threshold)
            .await;
        let current = self.switcher.current_network().await;

        messages::status(
            verdict.reachable,
            current.as_deref(),
            &messages::timestamp(Local::now()),
        )
    }
}
