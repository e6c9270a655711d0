use std::sync::Arc;
use std::time;

use eyre::bail;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use super::*;

#[tokio::test]
async fn test_get_completion_streaming() {
    let body = [
        r#"data: {"choices":[{"delta":{"content":"Hello "},"finish_reason":null}]}"#,
        r#"data: {"choices":[{"delta":{"content":"there!"},"finish_reason":null}]}"#,
        r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
        "data: [DONE]",
    ]
    .join("\n");

    let mut server = mockito::Server::new_async().await;
    let completion_handler = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .match_header("Authorization", "Bearer test_token")
        .with_body(body)
        .create();

    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let sender: ArcEventTx = Arc::new(tx);

    let backend = OpenAI::default()
        .with_endpoint(&server.url())
        .with_api_key("test_token");

    let prompt = BackendPrompt::new("gpt-4")
        .with_turns(vec![Message::user("Hello")])
        .with_generation(7);

    backend
        .get_completion(prompt, sender)
        .await
        .expect("Failed to get completion");
    completion_handler.assert();

    let responses = collect_responses(&mut rx, time::Duration::from_secs(5), 3)
        .await
        .expect("Failed to collect responses");

    assert_eq!(responses[0].text, "Hello ");
    assert!(!responses[0].done);
    assert_eq!(responses[0].generation, 7);
    assert_eq!(responses[1].text, "there!");
    assert!(responses[2].done);
    assert_eq!(responses[2].text, "");
}

#[tokio::test]
async fn test_malformed_chunk_is_skipped() {
    let body = [
        r#"data: {"choices":[{"delta":{"content":"keep"},"finish_reason":null}]}"#,
        "data: {not json at all",
        r#"data: {"choices":[{"delta":{"content":" going"},"finish_reason":null}]}"#,
        "data: [DONE]",
    ]
    .join("\n");

    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_body(body)
        .create();

    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let sender: ArcEventTx = Arc::new(tx);

    let backend = OpenAI::default().with_endpoint(&server.url());
    let prompt = BackendPrompt::new("gpt-4").with_turns(vec![Message::user("hi")]);

    backend
        .get_completion(prompt, sender)
        .await
        .expect("stream should survive a bad chunk");

    let responses = collect_responses(&mut rx, time::Duration::from_secs(5), 3)
        .await
        .expect("Failed to collect responses");
    assert_eq!(responses[0].text, "keep");
    assert_eq!(responses[1].text, " going");
    assert!(responses[2].done);
}

#[tokio::test]
async fn test_get_completion_non_streaming() {
    let body = r#"{"choices":[{"message":{"role":"assistant","content":"Hi there"}}]}"#;

    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_body(body)
        .create();

    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let sender: ArcEventTx = Arc::new(tx);

    let backend = OpenAI::default()
        .with_endpoint(&server.url())
        .with_stream(false);
    let prompt = BackendPrompt::new("gpt-4").with_turns(vec![Message::user("Hello")]);

    backend
        .get_completion(prompt, sender)
        .await
        .expect("Failed to get completion");

    let responses = collect_responses(&mut rx, time::Duration::from_secs(5), 2)
        .await
        .expect("Failed to collect responses");
    assert_eq!(responses[0].text, "Hi there");
    assert!(responses[1].done);
}

#[tokio::test]
async fn test_error_response_normalized() {
    let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error","param":null,"code":"invalid_api_key"}}"#;

    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(401)
        .with_body(body)
        .create();

    let (tx, _rx) = mpsc::unbounded_channel::<Event>();
    let sender: ArcEventTx = Arc::new(tx);

    let backend = OpenAI::default()
        .with_endpoint(&server.url())
        .with_api_key("bad_token");
    let prompt = BackendPrompt::new("gpt-4").with_turns(vec![Message::user("Hello")]);

    let err = backend
        .get_completion(prompt, sender)
        .await
        .expect_err("expected an error");

    let chat_err = err
        .downcast_ref::<ChatError>()
        .expect("error should be normalized");
    match chat_err {
        ChatError::Provider {
            provider,
            http_code,
            message,
        } => {
            assert_eq!(provider, "OpenAI");
            assert_eq!(*http_code, 401);
            assert_eq!(message, "Incorrect API key provided");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_system_prompt_is_first_message() {
    let prompt = BackendPrompt::new("gpt-4")
        .with_system_prompt("You are terse.")
        .with_turns(vec![Message::user("Hello"), Message::assistant("Hi")]);

    let messages = build_messages(&prompt);
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].role, "system");
    assert_eq!(messages[0].content, "You are terse.");
    assert_eq!(messages[1].role, "user");
    assert_eq!(messages[2].role, "assistant");
}

async fn collect_responses(
    rx: &mut UnboundedReceiver<Event>,
    timeout: time::Duration,
    want_len: usize,
) -> Result<Vec<BackendResponse>> {
    let mut responses = Vec::new();
    let start = time::Instant::now();
    while responses.len() < want_len {
        if let Some(event) = rx.recv().await {
            match event {
                Event::ChatDelta(msg) => responses.push(msg),
                event => bail!("Unexpected event: {:?}", event),
            }
        }
        if start.elapsed() > timeout {
            bail!("Timeout while waiting for responses");
        }
    }
    Ok(responses)
}
