use netchange::{
    config::TelegramConfig,
    telegram_client::{ChatKind, NotificationChannel, PollOutcome, TelegramClient},
};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// Request as seen by the mock bot API
#[derive(Clone, Debug)]
struct RecordedRequest {
    path: String,
    body: Value,
}

type Responder = fn(&RecordedRequest) -> (u16, String);

struct MockBotApi {
    url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockBotApi {
    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockBotApi {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// Minimal HTTP/1.1 server answering every request via `respond`
async fn start_mock_bot_api(respond: Responder) -> MockBotApi {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind mock server");
    let url = format!("http://{}", listener.local_addr().unwrap());
    let requests = Arc::new(Mutex::new(Vec::new()));
    let recorded = requests.clone();

    let handle = tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let recorded = recorded.clone();

            tokio::spawn(async move {
                let mut reader = BufReader::new(&mut stream);

                let mut request_line = String::new();
                if reader.read_line(&mut request_line).await.is_err() {
                    return;
                }
                let path = request_line
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or_default()
                    .to_string();

                // Read HTTP headers
                let mut content_length = 0;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.is_err() {
                        return;
                    }

                    if line.trim().is_empty() {
                        break;
                    }

                    if let Some((name, value)) = line.split_once(':') {
                        if name.trim().eq_ignore_ascii_case("content-length") {
                            content_length = value.trim().parse().unwrap_or(0);
                        }
                    }
                }

                let mut body = vec![0; content_length];
                if reader.read_exact(&mut body).await.is_err() {
                    return;
                }

                let request = RecordedRequest {
                    path,
                    body: serde_json::from_slice(&body).unwrap_or(Value::Null),
                };
                let (status, response_body) = respond(&request);
                recorded.lock().unwrap().push(request);

                let http_response = format!(
                    "HTTP/1.1 {status} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{response_body}",
                    response_body.len(),
                );

                let _ = stream.write_all(http_response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    MockBotApi {
        url,
        requests,
        handle,
    }
}

fn client(api: &MockBotApi, chat_ids: Vec<i64>) -> TelegramClient {
    TelegramClient::new(TelegramConfig {
        api_url: api.url.clone(),
        bot_token: Some("123:token".to_string()),
        chat_ids,
    })
    .expect("failed to create telegram client")
}

fn ok(result: &str) -> (u16, String) {
    (200, format!(r#"{{"ok":true,"result":{result}}}"#))
}

fn api_error(code: u16, description: &str) -> (u16, String) {
    (
        code,
        format!(r#"{{"ok":false,"error_code":{code},"description":"{description}"}}"#),
    )
}

#[tokio::test]
async fn send_succeeds_when_one_recipient_accepts() {
    let api = start_mock_bot_api(|request| {
        if request.body["chat_id"] == 2 {
            ok(r#"{"message_id":1}"#)
        } else {
            api_error(400, "Bad Request: chat not found")
        }
    })
    .await;

    assert!(client(&api, vec![1, 2]).send("hello").await);

    let requests = api.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.path == "/bot123:token/sendMessage"));
    assert!(requests.iter().all(|r| r.body["text"] == "hello"));
}

#[tokio::test]
async fn send_fails_when_all_recipients_reject() {
    let api =
        start_mock_bot_api(|_| api_error(403, "Forbidden: bot was blocked by the user")).await;

    assert!(!client(&api, vec![1, 2]).send("hello").await);
    assert_eq!(api.requests().len(), 2);
}

#[tokio::test]
async fn send_to_reports_api_description() {
    let api = start_mock_bot_api(|_| api_error(400, "Bad Request: chat not found")).await;

    let err = client(&api, vec![]).send_to(7, "hi").await.unwrap_err();

    assert!(format!("{err:#}").contains("chat not found"));
}

#[tokio::test]
async fn poll_parses_updates_and_sends_offset() {
    let api = start_mock_bot_api(|_| {
        ok(r#"[{"update_id":5,"message":{"message_id":3,"text":"/help","chat":{"id":42,"type":"private"}}}]"#)
    })
    .await;

    let outcome = client(&api, vec![]).poll_updates(Some(5)).await.unwrap();

    let updates = match outcome {
        PollOutcome::Updates(updates) => updates,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].update_id, 5);

    let chat = updates[0].message.as_ref().unwrap().chat.as_ref().unwrap();
    assert_eq!(chat.id, 42);
    assert_eq!(chat.kind, ChatKind::Private);

    let requests = api.requests();
    assert_eq!(requests[0].path, "/bot123:token/getUpdates");
    assert_eq!(requests[0].body["offset"], 5);
    assert_eq!(requests[0].body["timeout"], 30);
    assert_eq!(requests[0].body["allowed_updates"][0], "message");
}

#[tokio::test]
async fn poll_classifies_listener_conflict() {
    let api = start_mock_bot_api(|_| {
        api_error(
            409,
            "Conflict: terminated by other getUpdates request; make sure that only one bot instance is running",
        )
    })
    .await;

    let outcome = client(&api, vec![]).poll_updates(None).await.unwrap();

    let description = match outcome {
        PollOutcome::Conflict(description) => description,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert!(description.starts_with("Conflict: terminated by other getUpdates request"));
    assert!(api.requests()[0].body.get("offset").is_none());
}

#[tokio::test]
async fn poll_fails_on_server_error() {
    let api = start_mock_bot_api(|_| (500, "internal error".to_string())).await;

    let err = client(&api, vec![]).poll_updates(None).await.unwrap_err();

    assert!(format!("{err:#}").contains("internal error"));
}
