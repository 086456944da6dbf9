use std::sync::{Arc, Mutex};

use responses_api::{
    ResponseStatus, ResponsesApiClient, ResponsesApiConfig, ResponsesApiError, ResponsesRequest,
    ResponsesStreamEvent,
};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

struct ScriptedServer {
    base_url: String,
    captured_body: Arc<Mutex<Option<Value>>>,
    handle: JoinHandle<()>,
}

impl ScriptedServer {
    async fn new(status: u16, content_type: &'static str, body: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("local TCP listener should bind");
        let addr = listener
            .local_addr()
            .expect("resolved local listener address");
        let captured_body = Arc::new(Mutex::new(None));

        let handle = tokio::spawn({
            let captured_body = Arc::clone(&captured_body);
            async move {
                if let Ok((socket, _)) = listener.accept().await {
                    serve_one(socket, status, content_type, body, captured_body).await;
                }
            }
        });

        Self {
            base_url: format!("http://{addr}/v1"),
            captured_body,
            handle,
        }
    }

    fn captured_body(&self) -> Option<Value> {
        self.captured_body
            .lock()
            .expect("captured body lock")
            .clone()
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_one(
    mut socket: TcpStream,
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
    captured_body: Arc<Mutex<Option<Value>>>,
) {
    let Ok(request_body) = read_request(&mut socket).await else {
        return;
    };
    *captured_body.lock().expect("captured body lock") =
        serde_json::from_slice(&request_body).ok();

    let reason = if status == 200 { "OK" } else { "Error" };
    let headers = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    if socket.write_all(headers.as_bytes()).await.is_err() {
        return;
    }
    let _ = socket.write_all(&body).await;
    let _ = socket.shutdown().await;
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut request = Vec::new();
    let mut buffer = [0_u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            return Ok(Vec::new());
        }
        request.extend_from_slice(&buffer[..n]);
        if let Some(position) = request.windows(4).position(|window| window == b"\r\n\r\n") {
            break position + 4;
        }
    };

    let head = String::from_utf8_lossy(&request[..header_end]).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while request.len() < header_end + content_length {
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buffer[..n]);
    }

    Ok(request[header_end..].to_vec())
}

fn sse_frames(frames: &[Value]) -> Vec<u8> {
    let mut body = String::new();
    for frame in frames {
        body.push_str("data: ");
        body.push_str(&frame.to_string());
        body.push_str("\n\n");
    }
    body.push_str("data: [DONE]\n\n");
    body.into_bytes()
}

#[tokio::test]
async fn stream_collects_items_and_response_id() {
    let server = ScriptedServer::new(
        200,
        "text/event-stream",
        sse_frames(&[
            json!({"type": "response.created", "response": {"id": "resp_42"}}),
            json!({"type": "response.output_item.done", "item": {
                "type": "message",
                "content": [{"type": "output_text", "text": "done"}],
            }}),
            json!({"type": "response.completed", "response": {"id": "resp_42", "status": "completed"}}),
        ]),
    )
    .await;

    let mut request = ResponsesRequest::new("o3", json!([]), Some("be brief".to_string()));
    request.previous_response_id = Some("resp_41".to_string());
    let client = ResponsesApiClient::new(ResponsesApiConfig::new("sk").with_base_url(&server.base_url))
        .expect("client");

    let result = client.stream(&request).await.expect("stream should succeed");

    assert_eq!(result.response_id.as_deref(), Some("resp_42"));
    assert_eq!(result.terminal, Some(ResponseStatus::Completed));
    assert!(result
        .events
        .iter()
        .any(|event| matches!(event, ResponsesStreamEvent::OutputItemDone { .. })));

    let body = server.captured_body().expect("request body should be captured");
    assert_eq!(body["model"], "o3");
    assert_eq!(body["stream"], true);
    assert_eq!(body["previous_response_id"], "resp_41");
    assert_eq!(body["instructions"], "be brief");
}

#[tokio::test]
async fn non_success_status_is_reported_without_retry() {
    let server = ScriptedServer::new(
        401,
        "application/json",
        br#"{"error":{"message":"Incorrect API key provided"}}"#.to_vec(),
    )
    .await;

    let client = ResponsesApiClient::new(ResponsesApiConfig::new("sk").with_base_url(&server.base_url))
        .expect("client");
    let error = client
        .stream(&ResponsesRequest::new("o3", json!([]), None))
        .await
        .expect_err("401 must fail");

    assert!(matches!(
        error,
        ResponsesApiError::Status(status, message)
            if status.as_u16() == 401 && message == "Incorrect API key provided"
    ));
}

#[tokio::test]
async fn failed_stream_event_is_an_error() {
    let server = ScriptedServer::new(
        200,
        "text/event-stream",
        sse_frames(&[json!({
            "type": "response.failed",
            "response": {"error": {"message": "model overloaded"}},
        })]),
    )
    .await;

    let client = ResponsesApiClient::new(ResponsesApiConfig::new("sk").with_base_url(&server.base_url))
        .expect("client");
    let error = client
        .stream(&ResponsesRequest::new("o3", json!([]), None))
        .await
        .expect_err("failed stream must error");

    assert!(error.to_string().contains("model overloaded"), "{error}");
}
