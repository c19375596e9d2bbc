/// LLM Client: the single point of entry for all chat-completion calls.
///
/// ARCHITECTURAL RULE: No other module may talk to the model endpoint directly.
/// Analysis code depends on the `ModelClient` trait; `LlmClient` is the only
/// implementation that touches the network.
///
/// Protocol: OpenAI-compatible `POST {base_url}/chat/completions`, optionally
/// streamed as server-sent events.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;

pub mod prompts;
pub mod sink;

pub use sink::{NullSink, StreamSink, TerminalSink};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound on the backoff exponent so a large `max_retries` can't overflow.
const MAX_BACKOFF_SHIFT: u32 = 5;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("stream ended before [DONE] after {received} characters")]
    Truncated { received: usize },

    #[error("call exceeded its deadline of {}s", .0.as_secs())]
    Timeout(Duration),
}

// ────────────────────────────────────────────────────────────────────────────
// Conversation model
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered turns sent in a single call. Role ordering is the caller's business.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Conversation(Vec<Turn>);

impl Conversation {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self(turns)
    }

    pub fn turns(&self) -> &[Turn] {
        &self.0
    }

    /// Content of the final user turn, if any.
    pub fn last_user(&self) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
    }
}

/// Response format hint passed through to the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    PlainText,
    /// The model is asked for a single JSON object.
    StructuredJson,
}

impl ResponseFormat {
    fn api_type(self) -> &'static str {
        match self {
            ResponseFormat::PlainText => "text",
            ResponseFormat::StructuredJson => "json_object",
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: &'a Conversation,
    stream: bool,
    response_format: ResponseFormatBody,
}

#[derive(Debug, Serialize)]
struct ResponseFormatBody {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Client
// ────────────────────────────────────────────────────────────────────────────

/// The model capability the analysis pipeline depends on.
///
/// Returns the full completion text. Implementations may report partial text
/// elsewhere (see `StreamSink`) but never add formatting to the return value.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        conversation: &Conversation,
        temperature: f32,
        format: ResponseFormat,
    ) -> Result<String, LlmError>;
}

/// Per-call behaviour shared by every request an `LlmClient` makes.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub stream: bool,
    /// Deadline for one whole call, streaming included.
    pub timeout: Option<Duration>,
    /// Extra attempts after a 429, a 5xx or a transport error.
    pub max_retries: u32,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            stream: true,
            timeout: Some(Duration::from_secs(300)),
            max_retries: 2,
        }
    }
}

/// Chat-completions client with retry, deadline and optional streaming.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    options: CallOptions,
    sink: Arc<dyn StreamSink>,
}

impl LlmClient {
    pub fn new(
        config: &Config,
        options: CallOptions,
        sink: Arc<dyn StreamSink>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?,
            endpoint: config.completions_url(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            options,
            sink,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One call with retries on 429 (rate limit), 5xx and transport errors,
    /// using exponential backoff (1s, 2s, 4s, ...).
    async fn call(
        &self,
        conversation: &Conversation,
        temperature: f32,
        format: ResponseFormat,
    ) -> Result<String, LlmError> {
        let request_body = ChatRequest {
            model: &self.model,
            temperature,
            messages: conversation,
            stream: self.options.stream,
            response_format: ResponseFormatBody {
                kind: format.api_type(),
            },
        };

        debug!(
            "Calling {} with {} turns (format: {:?}, temperature: {})",
            self.model,
            conversation.turns().len(),
            format,
            temperature
        );

        let mut last_error: Option<LlmError> = None;

        for attempt in 0..=self.options.max_retries {
            if attempt > 0 {
                let shift = (attempt - 1).min(MAX_BACKOFF_SHIFT);
                let delay = Duration::from_millis(1000 * (1 << shift));
                warn!(
                    "LLM call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&request_body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("LLM API returned {}: {}", status, body);
                last_error = Some(LlmError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiError>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(LlmError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            return if self.options.stream {
                self.read_stream(response).await
            } else {
                read_body(response).await
            };
        }

        match last_error {
            Some(LlmError::Api { status: 429, .. }) | None => Err(LlmError::RateLimited {
                retries: self.options.max_retries,
            }),
            Some(e) => Err(e),
        }
    }

    /// Forwards each streamed fragment to the sink and returns the concatenation.
    /// A stream that closes before `[DONE]` is an error, whatever it carried.
    async fn read_stream(&self, response: reqwest::Response) -> Result<String, LlmError> {
        let mut decoder = SseDecoder::default();
        let mut text = String::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            for fragment in decoder.feed(&chunk?)? {
                self.sink.on_fragment(&fragment);
                text.push_str(&fragment);
            }
            if decoder.is_done() {
                break;
            }
        }
        for fragment in decoder.finish()? {
            self.sink.on_fragment(&fragment);
            text.push_str(&fragment);
        }
        self.sink.on_finish();

        let received = text.chars().count();
        if !decoder.is_done() {
            warn!("LLM stream closed without [DONE] after {} chars", received);
            return Err(LlmError::Truncated { received });
        }
        if text.is_empty() {
            return Err(LlmError::EmptyContent);
        }

        debug!("LLM stream finished: {} chars", received);
        Ok(text)
    }
}

#[async_trait]
impl ModelClient for LlmClient {
    async fn complete(
        &self,
        conversation: &Conversation,
        temperature: f32,
        format: ResponseFormat,
    ) -> Result<String, LlmError> {
        let call = self.call(conversation, temperature, format);
        match self.options.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| LlmError::Timeout(limit))?,
            None => call.await,
        }
    }
}

async fn read_body(response: reqwest::Response) -> Result<String, LlmError> {
    let body = response.text().await?;
    let parsed: ChatResponse = serde_json::from_str(&body)?;

    if let Some(usage) = &parsed.usage {
        debug!(
            "LLM call succeeded: prompt_tokens={}, completion_tokens={}",
            usage.prompt_tokens, usage.completion_tokens
        );
    }

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .ok_or(LlmError::EmptyContent)
}

// ────────────────────────────────────────────────────────────────────────────
// Server-sent events
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Fragment(String),
    Done,
    Ignored,
}

fn parse_sse_line(line: &str) -> Result<SseLine, LlmError> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        // comments, `event:` and `id:` fields, keep-alives
        return Ok(SseLine::Ignored);
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if data.is_empty() {
        return Ok(SseLine::Ignored);
    }

    let chunk: ChatChunk = serde_json::from_str(data)?;
    if let Some(error) = chunk.error {
        return Err(LlmError::Api {
            status: 200,
            message: error.message,
        });
    }

    match chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
    {
        Some(content) if !content.is_empty() => Ok(SseLine::Fragment(content)),
        _ => Ok(SseLine::Ignored),
    }
}

/// Splits a byte stream into SSE lines. Buffers raw bytes so multi-byte
/// characters split across network chunks decode intact.
#[derive(Debug, Default)]
struct SseDecoder {
    pending: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    fn feed(&mut self, bytes: &[u8]) -> Result<Vec<String>, LlmError> {
        self.pending.extend_from_slice(bytes);
        let mut fragments = Vec::new();

        while !self.done {
            let Some(pos) = self.pending.iter().position(|b| *b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.handle_line(&line, &mut fragments)?;
        }
        Ok(fragments)
    }

    /// Flushes a final line that arrived without a trailing newline.
    fn finish(&mut self) -> Result<Vec<String>, LlmError> {
        let mut fragments = Vec::new();
        if !self.done && !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.handle_line(&line, &mut fragments)?;
        }
        Ok(fragments)
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn handle_line(&mut self, line: &[u8], fragments: &mut Vec<String>) -> Result<(), LlmError> {
        match parse_sse_line(&String::from_utf8_lossy(line))? {
            SseLine::Fragment(text) => fragments.push(text),
            SseLine::Done => self.done = true,
            SseLine::Ignored => {}
        }
        Ok(())
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let input = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_without_tag() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        let input = "{\"key\": \"value\"}";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_conversation_serializes_as_openai_messages() {
        let conversation = Conversation::new(vec![
            Turn::system("你是编辑"),
            Turn::user("第一稿"),
            Turn::assistant("收到"),
        ]);
        let json = serde_json::to_value(&conversation).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"role": "system", "content": "你是编辑"},
                {"role": "user", "content": "第一稿"},
                {"role": "assistant", "content": "收到"}
            ])
        );
    }

    #[test]
    fn test_last_user_returns_final_user_turn() {
        let conversation = Conversation::new(vec![
            Turn::user("first"),
            Turn::assistant("ok"),
            Turn::user("second"),
        ]);
        assert_eq!(conversation.last_user(), Some("second"));
        assert_eq!(Conversation::default().last_user(), None);
    }

    #[test]
    fn test_parse_sse_line_variants() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"风"}}]}"#).unwrap(),
            SseLine::Fragment("风".to_string())
        );
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseLine::Done);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseLine::Ignored);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            SseLine::Ignored
        );
    }

    #[test]
    fn test_parse_sse_line_surfaces_inline_error() {
        let err = parse_sse_line(r#"data: {"error":{"message":"quota exhausted"}}"#).unwrap_err();
        assert!(matches!(err, LlmError::Api { message, .. } if message == "quota exhausted"));
    }

    #[test]
    fn test_sse_decoder_reassembles_split_multibyte_characters() {
        let payload = "data: {\"choices\":[{\"delta\":{\"content\":\"灯塔\"}}]}\n\ndata: [DONE]\n";
        let bytes = payload.as_bytes();
        // split in the middle of the first CJK character
        let split = payload.find('灯').unwrap() + 1;

        let mut decoder = SseDecoder::default();
        let mut fragments = decoder.feed(&bytes[..split]).unwrap();
        assert!(fragments.is_empty());
        fragments.extend(decoder.feed(&bytes[split..]).unwrap());
        fragments.extend(decoder.finish().unwrap());

        assert_eq!(fragments, vec!["灯塔".to_string()]);
        assert!(decoder.is_done());
    }

    #[test]
    fn test_sse_decoder_flushes_unterminated_last_line() {
        let mut decoder = SseDecoder::default();
        let fragments = decoder
            .feed(br#"data: {"choices":[{"delta":{"content":"tail"}}]}"#)
            .unwrap();
        assert!(fragments.is_empty());
        assert_eq!(decoder.finish().unwrap(), vec!["tail".to_string()]);
    }

    #[derive(Default)]
    struct RecordingSink {
        fragments: Mutex<Vec<String>>,
        finished: Mutex<u32>,
    }

    impl StreamSink for RecordingSink {
        fn on_fragment(&self, fragment: &str) {
            self.fragments.lock().unwrap().push(fragment.to_string());
        }

        fn on_finish(&self) {
            *self.finished.lock().unwrap() += 1;
        }
    }

    /// Reads one HTTP request off `socket` and returns its body.
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return String::new();
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
            let length = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let body_start = header_end + 4;
            if buf.len() >= body_start + length {
                return String::from_utf8_lossy(&buf[body_start..body_start + length]).to_string();
            }
        }
    }

    /// Serves the canned responses in order, one connection each, and hands
    /// the first request body back. `hits` counts the requests answered.
    async fn serve_sequence(
        responses: Vec<(&'static str, &'static str, String)>,
    ) -> (String, Arc<AtomicUsize>, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();

        let served = hits.clone();
        tokio::spawn(async move {
            let mut first = Some(tx);
            for (status_line, content_type, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let request_body = read_request(&mut socket).await;
                if let Some(tx) = first.take() {
                    let _ = tx.send(request_body);
                }
                served.fetch_add(1, Ordering::SeqCst);

                let response = format!(
                    "HTTP/1.1 {status_line}\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });

        (format!("http://{addr}"), hits, rx)
    }

    /// Serves one canned HTTP response and hands the request body back.
    async fn serve_once(
        status_line: &'static str,
        content_type: &'static str,
        body: String,
    ) -> (String, oneshot::Receiver<String>) {
        let (url, _hits, rx) = serve_sequence(vec![(status_line, content_type, body)]).await;
        (url, rx)
    }

    /// Accepts one connection, reads the request and never answers.
    async fn serve_silence() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            // keep the connection open without ever answering
            std::future::pending::<()>().await;
        });
        format!("http://{addr}")
    }

    fn client_with(base_url: String, options: CallOptions, sink: Arc<dyn StreamSink>) -> LlmClient {
        let config = Config {
            api_key: "sk-test".to_string(),
            base_url,
            model: "deepseek-chat".to_string(),
        };
        LlmClient::new(&config, options, sink).unwrap()
    }

    fn client_for(base_url: String, stream: bool, sink: Arc<dyn StreamSink>) -> LlmClient {
        let options = CallOptions {
            stream,
            timeout: Some(Duration::from_secs(10)),
            max_retries: 0,
        };
        client_with(base_url, options, sink)
    }

    #[tokio::test]
    async fn test_streaming_call_returns_concatenation_and_notifies_sink() {
        let body = [
            r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"他走向"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"灯塔。"}}]}"#,
            "data: [DONE]",
        ]
        .join("\n\n")
            + "\n\n";
        let (url, request) = serve_once("200 OK", "text/event-stream", body).await;
        let sink = Arc::new(RecordingSink::default());
        let client = client_for(url, true, sink.clone());

        let conversation = Conversation::new(vec![Turn::user("hi")]);
        let text = client
            .complete(&conversation, 0.2, ResponseFormat::PlainText)
            .await
            .unwrap();

        assert_eq!(text, "他走向灯塔。");
        assert_eq!(
            *sink.fragments.lock().unwrap(),
            vec!["他走向".to_string(), "灯塔。".to_string()]
        );
        assert_eq!(*sink.finished.lock().unwrap(), 1);

        let sent: serde_json::Value = serde_json::from_str(&request.await.unwrap()).unwrap();
        assert_eq!(sent["stream"], true);
        assert_eq!(sent["model"], "deepseek-chat");
        assert_eq!(sent["response_format"]["type"], "text");
        assert_eq!(sent["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn test_non_streaming_call_reads_message_content() {
        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"total\":0,\"scenes\":[]}"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 8}
        })
        .to_string();
        let (url, request) = serve_once("200 OK", "application/json", body).await;
        let client = client_for(url, false, Arc::new(NullSink));

        let conversation = Conversation::new(vec![Turn::user("segment")]);
        let text = client
            .complete(&conversation, 0.2, ResponseFormat::StructuredJson)
            .await
            .unwrap();

        assert_eq!(text, "{\"total\":0,\"scenes\":[]}");
        let sent: serde_json::Value = serde_json::from_str(&request.await.unwrap()).unwrap();
        assert_eq!(sent["stream"], false);
        assert_eq!(sent["response_format"]["type"], "json_object");
    }

    #[tokio::test]
    async fn test_client_error_extracts_api_message() {
        let body = r#"{"error":{"message":"Authentication Fails"}}"#.to_string();
        let (url, _request) = serve_once("401 Unauthorized", "application/json", body).await;
        let client = client_for(url, true, Arc::new(NullSink));

        let conversation = Conversation::new(vec![Turn::user("hi")]);
        let err = client
            .complete(&conversation, 0.2, ResponseFormat::PlainText)
            .await
            .unwrap_err();

        match err {
            LlmError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Authentication Fails");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    fn sse(lines: &[&str]) -> String {
        lines.join("\n\n") + "\n\n"
    }

    #[tokio::test]
    async fn test_stream_closed_before_done_is_truncated() {
        let body = sse(&[r#"data: {"choices":[{"delta":{"content":"他走"}}]}"#]);
        let (url, _request) = serve_once("200 OK", "text/event-stream", body).await;
        let sink = Arc::new(RecordingSink::default());
        let client = client_for(url, true, sink.clone());

        let conversation = Conversation::new(vec![Turn::user("hi")]);
        let err = client
            .complete(&conversation, 0.2, ResponseFormat::PlainText)
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::Truncated { received: 2 }), "{err}");
        assert_eq!(*sink.fragments.lock().unwrap(), vec!["他走".to_string()]);
        assert_eq!(*sink.finished.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stream_with_no_content_is_empty() {
        let body = sse(&[
            r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
            "data: [DONE]",
        ]);
        let (url, _request) = serve_once("200 OK", "text/event-stream", body).await;
        let client = client_for(url, true, Arc::new(NullSink));

        let conversation = Conversation::new(vec![Turn::user("hi")]);
        let err = client
            .complete(&conversation, 0.2, ResponseFormat::PlainText)
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::EmptyContent), "{err}");
    }

    #[tokio::test]
    async fn test_non_streaming_partial_usage_is_accepted() {
        let body = serde_json::json!({
            "choices": [{"message": {"content": "好"}}],
            "usage": {"total_tokens": 3}
        })
        .to_string();
        let (url, _request) = serve_once("200 OK", "application/json", body).await;
        let client = client_for(url, false, Arc::new(NullSink));

        let conversation = Conversation::new(vec![Turn::user("hi")]);
        let text = client
            .complete(&conversation, 0.2, ResponseFormat::PlainText)
            .await
            .unwrap();
        assert_eq!(text, "好");
    }

    fn completion(content: &str) -> String {
        serde_json::json!({"choices": [{"message": {"content": content}}]}).to_string()
    }

    fn retrying(max_retries: u32) -> CallOptions {
        CallOptions {
            stream: false,
            timeout: None,
            max_retries,
        }
    }

    // Backoff sleeps run on the real clock (1s, then 2s).
    #[tokio::test]
    async fn test_rate_limit_then_success_retries_once() {
        let (url, hits, _request) = serve_sequence(vec![
            ("429 Too Many Requests", "application/json", "{}".to_string()),
            ("200 OK", "application/json", completion("ok")),
        ])
        .await;
        let client = client_with(url, retrying(2), Arc::new(NullSink));

        let conversation = Conversation::new(vec![Turn::user("hi")]);
        let text = client
            .complete(&conversation, 0.2, ResponseFormat::PlainText)
            .await
            .unwrap();

        assert_eq!(text, "ok");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_server_error_then_success_retries_once() {
        let (url, hits, _request) = serve_sequence(vec![
            ("503 Service Unavailable", "text/plain", "busy".to_string()),
            ("200 OK", "application/json", completion("ok")),
        ])
        .await;
        let client = client_with(url, retrying(1), Arc::new(NullSink));

        let conversation = Conversation::new(vec![Turn::user("hi")]);
        let text = client
            .complete(&conversation, 0.2, ResponseFormat::PlainText)
            .await
            .unwrap();

        assert_eq!(text, "ok");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_persistent_rate_limit_exhausts_retries() {
        let limited = || ("429 Too Many Requests", "application/json", "{}".to_string());
        let (url, hits, _request) = serve_sequence(vec![limited(), limited(), limited()]).await;
        let client = client_with(url, retrying(2), Arc::new(NullSink));

        let conversation = Conversation::new(vec![Turn::user("hi")]);
        let err = client
            .complete(&conversation, 0.2, ResponseFormat::PlainText)
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::RateLimited { retries: 2 }), "{err}");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let (url, hits, _request) = serve_sequence(vec![
            ("400 Bad Request", "application/json", r#"{"error":{"message":"bad"}}"#.to_string()),
            ("200 OK", "application/json", completion("ok")),
        ])
        .await;
        let client = client_with(url, retrying(2), Arc::new(NullSink));

        let conversation = Conversation::new(vec![Turn::user("hi")]);
        let err = client
            .complete(&conversation, 0.2, ResponseFormat::PlainText)
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::Api { status: 400, .. }), "{err}");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_server_hits_the_call_deadline() {
        let url = serve_silence().await;
        let options = CallOptions {
            stream: true,
            timeout: Some(Duration::from_secs(1)),
            max_retries: 0,
        };
        let client = client_with(url, options, Arc::new(NullSink));

        let conversation = Conversation::new(vec![Turn::user("hi")]);
        let err = client
            .complete(&conversation, 0.2, ResponseFormat::PlainText)
            .await
            .unwrap_err();

        match err {
            LlmError::Timeout(limit) => assert_eq!(limit, Duration::from_secs(1)),
            other => panic!("unexpected error: {other}"),
        }
    }
}
