use anyhow::{Context, Result, ensure};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Create an HTTP client for JSON APIs
///
/// Only the connect phase is bounded here; every request sets its own
/// overall timeout since long polls need a longer one than plain calls.
pub fn json_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context("failed to create HTTP client")
}

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
}

/// Decoded `{ok, result, error_code, description}` reply of the bot API
#[derive(Debug)]
pub struct ApiReply<T> {
    pub status: StatusCode,
    pub ok: bool,
    pub result: Option<T>,
    pub error_code: Option<i64>,
    pub description: Option<String>,
}

impl<T> ApiReply<T> {
    /// Another client is already long-polling with the same token
    pub fn is_conflict(&self) -> bool {
        self.status == StatusCode::CONFLICT || self.error_code == Some(409)
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or("unknown error")
    }

    /// Ensure the reply is successful and extract its result
    pub fn into_result(self, context_msg: &str) -> Result<T> {
        ensure!(
            self.ok,
            "{context_msg} failed with status {} (error code {:?}): {}",
            self.status,
            self.error_code,
            self.description()
        );

        self.result
            .context(format!("{context_msg} returned no result"))
    }
}

/// Handle HTTP response of the bot API by reading and decoding its envelope
///
/// Error statuses are not turned into errors here, since callers need to
/// classify them (e.g. a listener conflict). A body that is no envelope is an
/// error only for successful statuses; otherwise it becomes the description.
///
/// # Arguments
/// * `res` - The HTTP response to handle
/// * `context_msg` - Context message describing the request (e.g., "sendMessage")
pub async fn handle_api_response<T>(res: Response, context_msg: &str) -> Result<ApiReply<T>>
where
    T: DeserializeOwned,
{
    let status = res.status();
    let body = res.text().await.context("failed to read response body")?;

    decode_api_reply(status, &body, context_msg)
}

pub fn decode_api_reply<T>(status: StatusCode, body: &str, context_msg: &str) -> Result<ApiReply<T>>
where
    T: DeserializeOwned,
{
    let envelope = match serde_json::from_str::<Envelope<T>>(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            ensure!(
                !status.is_success(),
                "{context_msg} returned malformed body: {e}"
            );

            Envelope {
                ok: false,
                result: None,
                error_code: None,
                description: Some(body.trim().to_string()).filter(|b| !b.is_empty()),
            }
        }
    };

    Ok(ApiReply {
        status,
        ok: status.is_success() && envelope.ok,
        result: envelope.result,
        error_code: envelope.error_code,
        description: envelope.description,
    })
}
