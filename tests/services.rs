//! HTTP client tests against mocked Ollama, STT and TTS services

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use voicebot::voice::{SpeechToText, Synthesizer, TextToSpeech, Transcriber};
use voicebot::{
    ChatMessage, ChatModel, Error, MemoryStore, ModelController, OllamaClient, Role, VoiceBot,
};

mod common;

use common::{FixedTranscriber, RecordingSynthesizer};

const TIMEOUT: Duration = Duration::from_secs(2);

fn ndjson(lines: &[serde_json::Value]) -> String {
    lines.iter().map(|l| format!("{l}\n")).collect()
}

fn chunk(content: &str, done: bool) -> serde_json::Value {
    json!({
        "model": "mistral:7b-instruct",
        "created_at": "2024-01-01T00:00:00Z",
        "message": {"role": "assistant", "content": content},
        "done": done
    })
}

fn pcm_line(samples: &[f32]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    format!("{}\n", STANDARD.encode(bytes))
}

// ============================================================================
// Ollama
// ============================================================================

#[tokio::test]
async fn test_ollama_streams_fragments() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": "mistral:7b-instruct",
            "stream": true,
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(ndjson(&[
            chunk("Hi", false),
            chunk(" there", false),
            chunk("", true),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&server.uri(), "mistral:7b-instruct", TIMEOUT).unwrap();
    let stream = client.stream_chat(&[ChatMessage::user("Hello")]).await.unwrap();
    let fragments: Vec<String> = stream.map(Result::unwrap).collect().await;

    assert_eq!(fragments, vec!["Hi", " there"]);
}

#[tokio::test]
async fn test_ollama_skips_malformed_lines() {
    let server = MockServer::start().await;

    let body = format!(
        "{}not json\n\n{}",
        ndjson(&[chunk("a", false)]),
        // Last line without a trailing newline
        chunk("b", true)
    );

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&server.uri(), "m", TIMEOUT).unwrap();
    let stream = client.stream_chat(&[ChatMessage::user("x")]).await.unwrap();
    let fragments: Vec<String> = stream.map(Result::unwrap).collect().await;

    assert_eq!(fragments, vec!["a", "b"]);
}

#[tokio::test]
async fn test_ollama_error_line_fails_stream() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ndjson(&[
            chunk("partial", false),
            json!({"error": "model crashed"}),
            chunk("never", false),
        ])))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&server.uri(), "m", TIMEOUT).unwrap();
    let stream = client.stream_chat(&[ChatMessage::user("x")]).await.unwrap();
    let items: Vec<_> = stream.collect().await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_deref().unwrap(), "partial");
    assert!(matches!(&items[1], Err(Error::Llm(msg)) if msg == "model crashed"));
}

#[tokio::test]
async fn test_ollama_body_closed_before_done() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(ndjson(&[chunk("Par", false)])),
        )
        .mount(&server)
        .await;

    let client = OllamaClient::new(&server.uri(), "m", TIMEOUT).unwrap();
    let stream = client.stream_chat(&[ChatMessage::user("x")]).await.unwrap();
    let items: Vec<_> = stream.collect().await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_deref().unwrap(), "Par");
    assert!(matches!(&items[1], Err(Error::Llm(msg)) if msg.contains("before done")));
}

#[tokio::test]
async fn test_truncated_ollama_reply_not_remembered() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ndjson(&[
            chunk("Hi", false),
            chunk(" the", false),
        ])))
        .mount(&server)
        .await;

    let llm = OllamaClient::new(&server.uri(), "m", TIMEOUT).unwrap();
    let controller = ModelController::new(
        Arc::new(llm),
        Arc::new(FixedTranscriber("unused".to_string())),
        Arc::new(RecordingSynthesizer::default()),
    );
    let bot = VoiceBot::with_parts(controller, MemoryStore::new(10));

    let fragments: Vec<_> = bot.ask("hello", false, None).collect().await;
    assert!(matches!(fragments.last(), Some(Err(Error::Llm(_)))));

    let history = bot.history(None);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::User);
}

#[tokio::test]
async fn test_ollama_http_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"error": "model 'nope' not found"})),
        )
        .mount(&server)
        .await;

    let client = OllamaClient::new(&server.uri(), "nope", TIMEOUT).unwrap();
    let result = client.stream_chat(&[ChatMessage::user("x")]).await;

    assert!(matches!(result, Err(Error::Llm(msg)) if msg.contains("404")));
}

#[tokio::test]
async fn test_ollama_health() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&server.uri(), "m", TIMEOUT).unwrap();
    assert!(client.health().await.is_ok());
}

// ============================================================================
// STT
// ============================================================================

#[tokio::test]
async fn test_stt_transcribes_upload() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/stt/transcribe"))
        .and(body_string_contains("audio.wav"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "text": "  turn on the lights ",
            "language": "en",
            "duration": 1.2
        })))
        .expect(1)
        .mount(&server)
        .await;

    let stt = SpeechToText::new(&server.uri(), TIMEOUT).unwrap();
    let text = stt.transcribe(b"RIFF....WAVE").await.unwrap();

    assert_eq!(text, "turn on the lights");
}

#[tokio::test]
async fn test_stt_empty_transcript() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/stt/transcribe"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "   "})))
        .mount(&server)
        .await;

    let stt = SpeechToText::new(&server.uri(), TIMEOUT).unwrap();
    assert!(matches!(stt.transcribe(b"RIFF").await, Err(Error::NoTranscript)));
}

#[tokio::test]
async fn test_stt_empty_audio_not_sent() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let stt = SpeechToText::new(&server.uri(), TIMEOUT).unwrap();
    assert!(matches!(stt.transcribe(&[]).await, Err(Error::NoSpeech)));
}

#[tokio::test]
async fn test_stt_service_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/stt/transcribe"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .mount(&server)
        .await;

    let stt = SpeechToText::new(&server.uri(), TIMEOUT).unwrap();
    let err = stt.transcribe(b"RIFF").await.unwrap_err();

    assert!(matches!(err, Error::Stt(ref msg) if msg.contains("model not loaded")));
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_stt_health() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "unhealthy",
            "error": "Model not loaded"
        })))
        .mount(&server)
        .await;

    let stt = SpeechToText::new(&server.uri(), TIMEOUT).unwrap();
    assert!(matches!(stt.health().await, Err(Error::Stt(msg)) if msg == "Model not loaded"));
}

// ============================================================================
// TTS
// ============================================================================

#[tokio::test]
async fn test_tts_decodes_pcm_lines() {
    let server = MockServer::start().await;

    let body = format!("{}{}", pcm_line(&[0.5, -0.5]), pcm_line(&[0.25]));

    Mock::given(method("POST"))
        .and(path("/tts/stream"))
        .and(body_partial_json(json!({"text": "Hello there."})))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&server)
        .await;

    let tts = TextToSpeech::new(&server.uri(), TIMEOUT).unwrap();
    let audio = tts.synthesize("Hello there.").await.unwrap();
    let chunks: Vec<Vec<f32>> = audio.map(Result::unwrap).collect().await;

    assert_eq!(chunks, vec![vec![0.5, -0.5], vec![0.25]]);
}

#[tokio::test]
async fn test_tts_skips_bad_lines() {
    let server = MockServer::start().await;

    let body = format!("!!not base64!!\n\n{}", pcm_line(&[1.0]));

    Mock::given(method("POST"))
        .and(path("/tts/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let tts = TextToSpeech::new(&server.uri(), TIMEOUT).unwrap();
    let audio = tts.synthesize("x").await.unwrap();
    let chunks: Vec<Vec<f32>> = audio.map(Result::unwrap).collect().await;

    assert_eq!(chunks, vec![vec![1.0]]);
}

#[tokio::test]
async fn test_tts_blank_text_makes_no_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let tts = TextToSpeech::new(&server.uri(), TIMEOUT).unwrap();
    let audio = tts.synthesize("   ").await.unwrap();

    assert_eq!(audio.count().await, 0);
}

#[tokio::test]
async fn test_tts_service_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tts/stream"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let tts = TextToSpeech::new(&server.uri(), TIMEOUT).unwrap();
    assert!(matches!(tts.synthesize("Hello").await, Err(Error::Tts(_))));
}

// ============================================================================
// Controller
// ============================================================================

#[tokio::test]
async fn test_controller_health_reports_each_service() {
    let ollama = MockServer::start().await;
    let tts = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
        .mount(&ollama)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&tts)
        .await;

    let mut config = voicebot::Config::default();
    config.services.ollama_url = ollama.uri();
    config.services.tts_url = tts.uri();
    // Nothing listens on port 9 locally
    config.services.stt_url = "http://127.0.0.1:9".to_string();

    let controller = ModelController::from_config(&config).unwrap();
    let report = controller.health().await;

    assert!(report.llm.is_up());
    assert!(report.tts.is_up());
    assert!(!report.stt.is_up());
    assert!(!report.all_up());
}
