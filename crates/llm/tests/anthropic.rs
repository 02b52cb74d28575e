use std::sync::{Arc, Mutex};
use std::time::Duration;

use llm::{AnthropicConfig, AnthropicProvider, ANTHROPIC_VERSION};
use pipeline::{GenerationError, GenerationRequest, GenerationSettings, TextGenerator};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

type Seen = Arc<Mutex<Vec<String>>>;

fn http_response(status: &str, extra_headers: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n{extra_headers}\r\n{body}",
        body.len()
    )
}

fn ok_body(text: &str) -> String {
    serde_json::json!({
        "id": "msg_01",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": text}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 12, "output_tokens": 5}
    })
    .to_string()
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.expect("read request");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (key, value) = line.split_once(':')?;
                    key.trim()
                        .eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Serves `responses` to successive connections, recording each request.
async fn serve(responses: Vec<String>) -> (String, Seen) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    tokio::spawn(async move {
        for response in responses {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let request = read_request(&mut socket).await;
            recorder.lock().unwrap().push(request);
            socket.write_all(response.as_bytes()).await.expect("write");
            let _ = socket.shutdown().await;
        }
    });
    (format!("http://{addr}"), seen)
}

fn provider(base_url: String, max_retries: u32) -> AnthropicProvider {
    let config = AnthropicConfig {
        base_url,
        max_retries,
        retry_base_delay_ms: 1,
        timeout_secs: 5,
        ..AnthropicConfig::default()
    };
    AnthropicProvider::new("test-key", config).expect("provider")
}

fn request(prompt: &str) -> GenerationRequest {
    GenerationRequest::new(prompt, &GenerationSettings::default())
}

#[tokio::test]
async fn test_returns_first_text_block_and_sends_headers() {
    let (url, seen) = serve(vec![http_response("200 OK", "", &ok_body("Hello, Jane."))]).await;
    let provider = provider(url, 0);

    let text = provider.generate(request("Say hello")).await.expect("text");

    assert_eq!(text, "Hello, Jane.");
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let raw = &seen[0];
    let lower = raw.to_lowercase();
    assert!(raw.starts_with("POST /v1/messages "));
    assert!(lower.contains("x-api-key: test-key"));
    assert!(lower.contains(&format!("anthropic-version: {ANTHROPIC_VERSION}")));

    let body = &raw[raw.find("\r\n\r\n").expect("body") + 4..];
    let body: serde_json::Value = serde_json::from_str(body).expect("json body");
    assert_eq!(body["model"], llm::DEFAULT_MODEL);
    assert_eq!(body["max_tokens"], 4096);
    assert_eq!(body["temperature"], 0.0);
    assert_eq!(body["messages"][0]["content"], "Say hello");
}

#[tokio::test]
async fn test_rate_limit_is_retried_after_the_requested_delay() {
    let limited = http_response(
        "429 Too Many Requests",
        "retry-after: 0\r\n",
        r#"{"type":"error","error":{"type":"rate_limit_error","message":"slow down"}}"#,
    );
    let (url, seen) = serve(vec![limited, http_response("200 OK", "", &ok_body("done"))]).await;
    let provider = provider(url, 2);

    let text = provider.generate(request("retry me")).await.expect("text");

    assert_eq!(text, "done");
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let bad = http_response(
        "400 Bad Request",
        "",
        r#"{"type":"error","error":{"type":"invalid_request_error","message":"prompt is too long"}}"#,
    );
    let (url, seen) = serve(vec![bad]).await;
    let provider = provider(url, 3);

    let err = provider.generate(request("too long")).await.unwrap_err();

    match err {
        GenerationError::Api { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "prompt is too long");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_server_errors_exhaust_retries() {
    let overloaded = || http_response("529 Overloaded", "", "overloaded");
    let (url, seen) = serve(vec![overloaded(), overloaded(), overloaded()]).await;
    let provider = provider(url, 2);

    let err = provider.generate(request("busy")).await.unwrap_err();

    assert!(matches!(
        err,
        GenerationError::Api { status: 529, ref message } if message == "overloaded"
    ));
    assert_eq!(seen.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_reply_without_text_is_invalid() {
    let body = r#"{"content":[{"type":"tool_use","id":"t1","name":"x","input":{}}],"stop_reason":"tool_use"}"#;
    let (url, _seen) = serve(vec![http_response("200 OK", "", body)]).await;
    let provider = provider(url, 0);

    let err = provider.generate(request("no text")).await.unwrap_err();

    assert!(matches!(err, GenerationError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_connection_refused_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let provider = provider(format!("http://{addr}"), 0);

    let err = tokio::time::timeout(Duration::from_secs(10), provider.generate(request("hi")))
        .await
        .expect("finishes")
        .unwrap_err();

    assert!(matches!(err, GenerationError::Transport { timed_out: false, .. }));
}

#[tokio::test]
#[ignore = "requires ANTHROPIC_API_KEY and network access"]
async fn test_live_generation() {
    let key = std::env::var("ANTHROPIC_API_KEY").expect("ANTHROPIC_API_KEY");
    let provider = AnthropicProvider::new(key, AnthropicConfig::default()).expect("provider");

    let text = provider
        .generate(request("Reply with the single word: ready"))
        .await
        .expect("text");

    assert!(!text.trim().is_empty());
}
