use chatwire::core::kernel::{
    ApiRequest, FileUpload, RestClient, RestClientBuilder, RestClientConfig, RetryingClient,
    TungsteniteTransport,
};
use chatwire::services::{CharacterApi, ChatApi, ServerConfigLoader};
use chatwire::{
    ChatConnection, ChatRequest, CreateCharacterRequest, NetworkConfig, NetworkError,
    SessionSource, UpdateCharacterRequest,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct FixedSession(Option<&'static str>);

impl SessionSource for FixedSession {
    fn current_session(&self) -> Option<String> {
        self.0.map(str::to_string)
    }
}

fn config_for(server: &MockServer) -> RestClientConfig {
    RestClientConfig::new(format!("{}/api/v1", server.uri()))
        .with_max_retries(3)
        .with_retry_delay(Duration::from_millis(10))
}

fn client(server: &MockServer, session: Option<&'static str>) -> RetryingClient {
    RestClientBuilder::new(config_for(server))
        .with_session_source(Arc::new(FixedSession(session)))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_server_errors_are_retried_then_surface() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/config"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .expect(4)
        .mount(&server)
        .await;

    let result = client(&server, None)
        .send_value(ApiRequest::get("config"))
        .await;

    match result {
        Err(NetworkError::RequestFailure { status, body, .. }) => {
            assert_eq!(status, 503);
            assert_eq!(body, "busy");
        }
        other => panic!("expected request failure, got {:?}", other),
    }
    server.verify().await;
}

#[tokio::test]
async fn test_rate_limit_is_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/config"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"messageType": "json"})))
        .expect(1)
        .mount(&server)
        .await;

    let value = client(&server, None)
        .send_value(ApiRequest::get("config"))
        .await
        .unwrap();
    assert_eq!(value["messageType"], "json");
    server.verify().await;
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such route"))
        .expect(1)
        .mount(&server)
        .await;

    let result = client(&server, None)
        .send_value(ApiRequest::post("chat").with_body(json!({})))
        .await;

    assert_eq!(result.unwrap_err().status(), Some(404));
    server.verify().await;
}

#[tokio::test]
async fn test_unreachable_server_surfaces_status_zero() {
    let rest = RetryingClient::new(
        RestClientConfig::new("http://127.0.0.1:1/api/v1".to_string())
            .with_max_retries(2)
            .with_retry_delay(Duration::from_millis(5)),
    )
    .unwrap();

    let result = rest.send_value(ApiRequest::get("config")).await;
    assert_eq!(result.unwrap_err().status(), Some(0));
}

#[tokio::test]
async fn test_chat_request_gets_session_injected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat"))
        .and(body_partial_json(json!({"sessionId": "S1", "action": "chat"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "queued",
            "sessionId": "S1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let chat = ChatApi::new(client(&server, Some("S1")));
    let request = ChatRequest::new("hi".to_string(), "c1".to_string(), "u1".to_string());
    let response = chat
        .send_chat(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.session_id, "S1");
    server.verify().await;
}

#[tokio::test]
async fn test_chat_request_without_session_is_sent_unmodified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let chat = ChatApi::new(client(&server, None));
    chat.send_message("hi", "c1", "u1", None, &CancellationToken::new())
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: Value = requests[0].body_json().unwrap();
    assert_eq!(body["sessionId"], "");
    assert_eq!(body["message"], "hi");
}

#[tokio::test]
async fn test_cancellation_aborts_in_flight_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/config"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let rest = client(&server, None);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let result = rest
        .send_value(ApiRequest::get("config").with_cancellation(cancel))
        .await;
    assert!(matches!(result, Err(NetworkError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_default_and_auth_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/config"))
        .and(header("Authorization", "Bearer secret"))
        .and(header("Accept", "application/json"))
        .and(header("X-Client", "test"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let rest = RestClientBuilder::new(config_for(&server))
        .with_auth_token("secret")
        .build()
        .unwrap();
    rest.add_default_header("X-Client", "test");

    // Empty body reads as null
    let value = rest.send_value(ApiRequest::get("config")).await.unwrap();
    assert_eq!(value, Value::Null);
    server.verify().await;
}

#[tokio::test]
async fn test_negotiation_applies_server_encoding() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messageType": "binary",
            "version": "1.0",
            "supportsAudio": true,
            "supportsBinary": true,
            "audioFormat": "wav",
            "maxMessageSize": 65536
        })))
        .mount(&server)
        .await;

    let connection = ChatConnection::new(TungsteniteTransport::default(), NetworkConfig::default());
    let rest = client(&server, None);

    let profile = ServerConfigLoader::load(&rest).await.unwrap();
    assert!(profile.supports_audio);
    assert_eq!(profile.max_message_size, 65536);

    assert_eq!(ServerConfigLoader::negotiate(&connection, &rest).await, "binary");
    assert_eq!(connection.encoding(), "binary");
}

#[tokio::test]
async fn test_negotiation_keeps_encoding_on_invalid_profile() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"messageType": "xml"})))
        .mount(&server)
        .await;

    let connection = ChatConnection::new(TungsteniteTransport::default(), NetworkConfig::default());
    let rest = client(&server, None);

    assert_eq!(ServerConfigLoader::negotiate(&connection, &rest).await, "json");
}

#[tokio::test]
async fn test_file_upload_is_multipart_and_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/upload"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"stored": "voice.wav"})))
        .expect(1)
        .mount(&server)
        .await;

    let file = FileUpload::new("voice.wav", b"RIFF-data".to_vec())
        .with_field_name("audio")
        .with_mime("audio/wav");
    let value: Value = client(&server, None)
        .upload_file("upload", file, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(value["stored"], "voice.wav");
    server.verify().await;

    // Both attempts carried the whole form
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        let content_type = request
            .headers
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.starts_with("multipart/form-data; boundary="));
        let body = String::from_utf8_lossy(&request.body);
        assert!(body.contains(r#"name="audio"; filename="voice.wav""#));
        assert!(body.contains("RIFF-data"));
    }
}

#[tokio::test]
async fn test_file_upload_honours_cancellation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/upload"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result: Result<Value, _> = client(&server, None)
        .upload_file("upload", FileUpload::new("a.bin", vec![0; 16]), &cancel)
        .await;
    assert!(matches!(result, Err(NetworkError::Cancelled)));
}

#[tokio::test]
async fn test_character_crud() {
    let server = MockServer::start().await;
    let fio = json!({"id": "c1", "name": "Fio", "description": "guide", "role": "helper", "isActive": true});
    Mock::given(method("GET"))
        .and(path("/api/v1/character"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([fio.clone()])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/character/c1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fio.clone()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/character"))
        .and(body_json(json!({"name": "Fio", "description": "guide", "role": "helper", "isActive": true})))
        .respond_with(ResponseTemplate::new(201).set_body_json(fio.clone()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/character/c1"))
        .and(body_json(json!({"role": "narrator"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c1", "role": "narrator"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/character/c1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let characters = CharacterApi::new(client(&server, None));
    let cancel = CancellationToken::new();

    let all = characters.list(&cancel).await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].is_active);
    assert_eq!(characters.get("c1", &cancel).await.unwrap().name, "Fio");

    let request = CreateCharacterRequest::new(
        "Fio".to_string(),
        "guide".to_string(),
        "helper".to_string(),
    );
    assert_eq!(characters.create(&request, &cancel).await.unwrap().id, "c1");

    let update = UpdateCharacterRequest {
        role: Some("narrator".to_string()),
        ..UpdateCharacterRequest::default()
    };
    assert_eq!(
        characters.update("c1", &update, &cancel).await.unwrap().role,
        "narrator"
    );

    characters.delete("c1", &cancel).await.unwrap();
    server.verify().await;
}

#[tokio::test]
async fn test_character_delete_surfaces_failure() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/character/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let characters = CharacterApi::new(client(&server, None));
    let result = characters.delete("missing", &CancellationToken::new()).await;
    assert_eq!(result.unwrap_err().status(), Some(404));
}
