use crate::{
    config::TelegramConfig,
    http_client::{handle_api_response, json_client},
};
use anyhow::{Context, Result, bail};
use log::{debug, error, info, warn};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use reqwest::Client;
use serde::{Deserialize, Serialize, de::IgnoredAny};
use std::time::Duration;
use trait_variant::make;

/// Kind of chat an update originates from
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    #[serde(alias = "personal")]
    Private,
    Group,
    Supergroup,
    Channel,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: ChatKind,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub text: Option<String>,
    pub chat: Option<Chat>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

/// Result of one long-poll round
#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Updates(Vec<Update>),
    /// The long poll elapsed without new updates
    IdleTimeout,
    /// Another listener is polling with the same bot token
    Conflict(String),
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GetUpdates {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait NotificationChannel {
    /// Whether a bot token and at least one recipient are configured
    fn is_configured(&self) -> bool;
    /// Whether a bot token is configured
    fn has_token(&self) -> bool;
    /// Deliver `text` to every configured recipient; true if at least one accepted it
    async fn send(&self, text: &str) -> bool;
    async fn send_to(&self, chat_id: i64, text: &str) -> Result<()>;
    async fn poll_updates(&self, offset: Option<i64>) -> Result<PollOutcome>;
}

#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    config: TelegramConfig,
}

impl TelegramClient {
    /// Server side wait of a long poll
    pub const LONG_POLL_SECS: u64 = 30;

    const SEND_MESSAGE_ENDPOINT: &str = "sendMessage";
    const GET_UPDATES_ENDPOINT: &str = "getUpdates";
    const SEND_TIMEOUT: Duration = Duration::from_secs(10);
    const POLL_TIMEOUT: Duration = Duration::from_secs(Self::LONG_POLL_SECS + 5);

    pub fn new(config: TelegramConfig) -> Result<Self> {
        Ok(TelegramClient {
            client: json_client()?,
            config,
        })
    }

    fn build_url(&self, method: &str) -> Option<String> {
        let token = self.config.bot_token.as_deref()?;
        let base = self.config.api_url.trim_end_matches('/');
        let method = method.trim_start_matches('/');
        Some(format!("{base}/bot{token}/{method}"))
    }
}

impl NotificationChannel for TelegramClient {
    fn is_configured(&self) -> bool {
        self.has_token() && !self.config.chat_ids.is_empty()
    }

    fn has_token(&self) -> bool {
        self.config.bot_token.is_some()
    }

    async fn send(&self, text: &str) -> bool {
        if !self.has_token() {
            warn!("telegram bot not configured, skipping notification");
            return false;
        }

        if self.config.chat_ids.is_empty() {
            warn!("telegram chat ids not configured, skipping notification");
            return false;
        }

        let mut sent = 0;

        for chat_id in &self.config.chat_ids {
            match self.send_to(*chat_id, text).await {
                Ok(()) => {
                    info!("telegram message sent to {chat_id}");
                    sent += 1;
                }
                Err(e) => error!("failed to send telegram message to {chat_id}: {e:#}"),
            }
        }

        if sent == 0 {
            warn!(
                "failed to send telegram message to all {} chat(s)",
                self.config.chat_ids.len()
            );
        }

        sent > 0
    }

    async fn send_to(&self, chat_id: i64, text: &str) -> Result<()> {
        let Some(url) = self.build_url(Self::SEND_MESSAGE_ENDPOINT) else {
            bail!("failed to send message: telegram bot not configured")
        };

        let res = self
            .client
            .post(&url)
            .timeout(Self::SEND_TIMEOUT)
            .json(&SendMessage { chat_id, text })
            .send()
            .await
            .context(format!("failed to send {} request", Self::SEND_MESSAGE_ENDPOINT))?;

        handle_api_response::<IgnoredAny>(res, Self::SEND_MESSAGE_ENDPOINT)
            .await?
            .into_result(Self::SEND_MESSAGE_ENDPOINT)?;

        Ok(())
    }

    async fn poll_updates(&self, offset: Option<i64>) -> Result<PollOutcome> {
        let Some(url) = self.build_url(Self::GET_UPDATES_ENDPOINT) else {
            warn!("telegram bot not configured, skipping poll");
            return Ok(PollOutcome::Updates(vec![]));
        };

        let request = GetUpdates {
            offset,
            timeout: Self::LONG_POLL_SECS,
            allowed_updates: ["message"],
        };

        debug!("poll updates with offset {offset:?}");

        let res = match self
            .client
            .post(&url)
            .timeout(Self::POLL_TIMEOUT)
            .json(&request)
            .send()
            .await
        {
            Ok(res) => res,
            Err(e) if e.is_timeout() => return Ok(PollOutcome::IdleTimeout),
            Err(e) => {
                return Err(e).context(format!(
                    "failed to send {} request",
                    Self::GET_UPDATES_ENDPOINT
                ));
            }
        };

        let reply = handle_api_response::<Vec<Update>>(res, Self::GET_UPDATES_ENDPOINT).await?;

        if reply.is_conflict() {
            return Ok(PollOutcome::Conflict(reply.description().to_string()));
        }

        Ok(PollOutcome::Updates(
            reply.into_result(Self::GET_UPDATES_ENDPOINT)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_client(bot_token: Option<&str>, chat_ids: Vec<i64>) -> TelegramClient {
        TelegramClient {
            client: reqwest::Client::new(),
            config: TelegramConfig {
                api_url: "https://api.telegram.org/".to_string(),
                bot_token: bot_token.map(String::from),
                chat_ids,
            },
        }
    }

    mod build_url {
        use super::*;

        #[test]
        fn joins_base_token_and_method() {
            let client = create_test_client(Some("123:abc"), vec![]);
            assert_eq!(
                client.build_url("sendMessage").as_deref(),
                Some("https://api.telegram.org/bot123:abc/sendMessage")
            );
        }

        #[test]
        fn normalizes_method_with_leading_slash() {
            let client = create_test_client(Some("123:abc"), vec![]);
            assert_eq!(
                client.build_url("/getUpdates").as_deref(),
                Some("https://api.telegram.org/bot123:abc/getUpdates")
            );
        }

        #[test]
        fn is_none_without_token() {
            let client = create_test_client(None, vec![1]);
            assert!(client.build_url("sendMessage").is_none());
        }
    }

    mod configuration {
        use super::*;

        #[test]
        fn needs_token_and_recipients() {
            assert!(create_test_client(Some("t"), vec![1]).is_configured());
            assert!(!create_test_client(Some("t"), vec![]).is_configured());
            assert!(!create_test_client(None, vec![1]).is_configured());
        }

        #[tokio::test]
        async fn send_is_noop_without_token() {
            let client = create_test_client(None, vec![1]);
            assert!(!client.send("hello").await);
        }

        #[tokio::test]
        async fn send_is_noop_without_recipients() {
            let client = create_test_client(Some("t"), vec![]);
            assert!(!client.send("hello").await);
        }

        #[tokio::test]
        async fn poll_is_empty_without_token() {
            let client = create_test_client(None, vec![]);
            assert_eq!(
                client.poll_updates(Some(3)).await.unwrap(),
                PollOutcome::Updates(vec![])
            );
        }
    }

    mod payloads {
        use super::*;

        #[test]
        fn get_updates_omits_missing_offset() {
            let body = serde_json::to_value(GetUpdates {
                offset: None,
                timeout: 30,
                allowed_updates: ["message"],
            })
            .unwrap();

            assert_eq!(
                body,
                serde_json::json!({"timeout": 30, "allowed_updates": ["message"]})
            );
        }

        #[test]
        fn parses_update_with_group_chat() {
            let update: Update = serde_json::from_str(
                r#"{"update_id":7,"message":{"message_id":1,"text":"/wifistatus@netbot","chat":{"id":-100,"type":"supergroup","title":"ops"}}}"#,
            )
            .unwrap();

            let message = update.message.unwrap();
            assert_eq!(update.update_id, 7);
            assert_eq!(message.text.as_deref(), Some("/wifistatus@netbot"));
            assert_eq!(
                message.chat,
                Some(Chat {
                    id: -100,
                    kind: ChatKind::Supergroup
                })
            );
        }

        #[test]
        fn tolerates_unknown_chat_kind_and_missing_text() {
            let update: Update = serde_json::from_str(
                r#"{"update_id":8,"message":{"chat":{"id":5,"type":"bizarre"}}}"#,
            )
            .unwrap();

            let message = update.message.unwrap();
            assert!(message.text.is_none());
            assert_eq!(message.chat.unwrap().kind, ChatKind::Unknown);
        }

        #[test]
        fn parses_update_without_message() {
            let update: Update =
                serde_json::from_str(r#"{"update_id":9,"edited_message":{}}"#).unwrap();
            assert!(update.message.is_none());
        }
    }
}
