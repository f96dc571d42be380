//! Integration tests for the request executor's recovery behaviour.
//!
//! These tests verify that the executor:
//! - Repairs credentials exactly once for every recoverable error code
//! - Never repairs on unknown codes or bare error statuses
//! - Stops after one repair even if the provider keeps failing
//! - Caps device session creation at three consecutive attempts
//! - Honours cancellation before and during a call

use std::sync::Arc;
use std::time::Duration;

use panauth_core::{
    AccountId, ApiClient, ApiRequest, ApiVariant, ClientConfig, CredentialOwner, CredentialStore,
    Credentials, DelegatedCredentials, Endpoints, MemoryCredentialStore, Renewal, RequestError,
    SessionError, SessionStore, TokenProvider,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::{
    Mock, MockServer, Request, Respond, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

fn config(server: &MockServer, variant: ApiVariant) -> ClientConfig {
    ClientConfig {
        variant,
        drive_id: "d1".to_string(),
        endpoints: Endpoints::all(server.uri()),
        ..ClientConfig::default()
    }
}

fn owner(
    config: &ClientConfig,
    credentials: Credentials,
    store: Arc<MemoryCredentialStore>,
) -> Arc<CredentialOwner> {
    let renewal = Renewal::from_config(config, reqwest::Client::new());
    Arc::new(CredentialOwner::new(
        AccountId::new("user-1"),
        credentials,
        renewal,
        store,
    ))
}

fn client(config: ClientConfig, provider: Arc<dyn TokenProvider>) -> ApiClient {
    ApiClient::with_http(
        reqwest::Client::new(),
        config,
        provider,
        Arc::new(SessionStore::new()),
    )
}

fn error_body(code: &str) -> serde_json::Value {
    json!({ "code": code, "message": format!("{} happened", code) })
}

/// Cancels the caller's token while answering with a recoverable error.
struct CancelWhileResponding {
    cancel: CancellationToken,
    code: &'static str,
}

impl Respond for CancelWhileResponding {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.cancel.cancel();
        ResponseTemplate::new(401)
            .set_body_json(error_body(self.code))
            .set_delay(Duration::from_millis(20))
    }
}

fn list_request(server: &MockServer) -> ApiRequest {
    ApiRequest::post(format!("{}/v2/file/list", server.uri())).json(json!({"parent_file_id": "root"}))
}

#[tokio::test]
async fn test_token_codes_refresh_exactly_once() {
    for code in ["AccessTokenInvalid", "AccessTokenExpired", "I400JD"] {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/file/list"))
            .and(header("authorization", "Bearer\told-at"))
            .respond_with(ResponseTemplate::new(401).set_body_json(error_body(code)))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v2/account/token"))
            .and(body_partial_json(json!({
                "refresh_token": "old-rt",
                "grant_type": "refresh_token",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "refresh_token": "new-rt",
                "access_token": "new-at",
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v2/file/list"))
            .and(header("authorization", "Bearer\tnew-at"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [], "next_marker": ""})))
            .expect(1)
            .mount(&server)
            .await;

        let config = config(&server, ApiVariant::DeviceSession);
        let store = Arc::new(MemoryCredentialStore::new());
        let owner = owner(&config, Credentials::new("old-rt", "old-at"), store.clone());
        let client = client(config, owner);

        let body = client
            .execute(&list_request(&server), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!body.is_empty());

        // The renewed pair was written to the sink
        let record = store.load(&AccountId::new("user-1")).await.unwrap().unwrap();
        assert_eq!(record.credentials().unwrap(), Credentials::new("new-rt", "new-at"));
    }
}

#[tokio::test]
async fn test_unknown_code_is_surfaced_without_recovery() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/file/list"))
        .respond_with(ResponseTemplate::new(404).set_body_json(error_body("NotFound.File")))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v2/account/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/users/v1/users/device/create_session"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = config(&server, ApiVariant::DeviceSession);
    let owner = owner(
        &config,
        Credentials::new("rt", "at"),
        Arc::new(MemoryCredentialStore::new()),
    );
    let client = client(config, owner);

    let result = client
        .execute(&list_request(&server), &CancellationToken::new())
        .await;

    match result {
        Err(RequestError::Api { code, message }) => {
            assert_eq!(code, "NotFound.File");
            assert_eq!(message, "NotFound.File happened");
        }
        other => panic!("expected API error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_repeated_token_error_is_not_retried_twice() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/file/list"))
        .respond_with(ResponseTemplate::new(401).set_body_json(error_body("AccessTokenInvalid")))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v2/account/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "refresh_token": "rt-2",
            "access_token": "at-2",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = config(&server, ApiVariant::DeviceSession);
    let owner = owner(
        &config,
        Credentials::new("rt", "at"),
        Arc::new(MemoryCredentialStore::new()),
    );
    let client = client(config, owner);

    let result = client
        .execute(&list_request(&server), &CancellationToken::new())
        .await;
    assert!(matches!(
        result,
        Err(RequestError::Api { ref code, .. }) if code == "AccessTokenInvalid"
    ));
}

#[tokio::test]
async fn test_status_without_envelope_is_bad_status() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/file/list"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let config = config(&server, ApiVariant::DeviceSession);
    let owner = owner(
        &config,
        Credentials::new("rt", "at"),
        Arc::new(MemoryCredentialStore::new()),
    );
    let client = client(config, owner);

    let result = client
        .execute(&list_request(&server), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(RequestError::BadStatus { status: 502, .. })));
}

#[tokio::test]
async fn test_transport_error_is_not_recovered() {
    let config = ClientConfig {
        endpoints: Endpoints::all("http://127.0.0.1:9"),
        ..ClientConfig::default()
    };
    let owner = owner(
        &config,
        Credentials::new("rt", "at"),
        Arc::new(MemoryCredentialStore::new()),
    );
    let client = client(config, owner);

    let request = ApiRequest::post("http://127.0.0.1:9/v2/file/list");
    let result = client.execute(&request, &CancellationToken::new()).await;
    assert!(matches!(result, Err(RequestError::Transport(_))));
}

#[tokio::test]
async fn test_invalid_signature_creates_session_and_retries() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/file/list"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(error_body("DeviceSessionSignatureInvalid")),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/users/v1/users/device/create_session"))
        .and(body_partial_json(json!({
            "deviceName": "samsung",
            "modelName": "SM-G9810",
            "nonce": 0,
            "refreshToken": "rt",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v2/file/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [], "next_marker": ""})))
        .expect(1)
        .mount(&server)
        .await;

    let config = config(&server, ApiVariant::DeviceSession);
    let owner = owner(
        &config,
        Credentials::new("rt", "at"),
        Arc::new(MemoryCredentialStore::new()),
    );
    let client = client(config, owner);

    client
        .execute(&list_request(&server), &CancellationToken::new())
        .await
        .unwrap();

    let handle = client.sessions().load(&AccountId::new("user-1")).unwrap();
    let state = handle.lock().await;
    assert_eq!(state.retry_count(), 0);
    assert!(!state.signature().is_empty());
}

#[tokio::test]
async fn test_session_code_is_not_recovered_on_open_api() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/file/list"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(error_body("DeviceSessionSignatureInvalid")),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/users/v1/users/device/create_session"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = config(&server, ApiVariant::Open);
    let owner = owner(
        &config,
        Credentials::new("rt", "at"),
        Arc::new(MemoryCredentialStore::new()),
    );
    let client = client(config, owner);

    let result = client
        .execute(&list_request(&server), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(RequestError::Api { .. })));
}

#[tokio::test]
async fn test_session_creation_fails_after_three_attempts() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/users/v1/users/device/create_session"))
        .respond_with(ResponseTemplate::new(400).set_body_json(error_body("InvalidParameter")))
        .expect(3)
        .mount(&server)
        .await;

    let config = config(&server, ApiVariant::DeviceSession);
    let owner = owner(
        &config,
        Credentials::new("rt", "at"),
        Arc::new(MemoryCredentialStore::new()),
    );
    let client = client(config, owner);
    let cancel = CancellationToken::new();

    for _ in 0..3 {
        let result = client.create_session(&cancel).await;
        assert!(matches!(result, Err(RequestError::Api { .. })));
    }

    let err = client.create_session(&cancel).await.unwrap_err();
    assert!(matches!(
        err,
        RequestError::Session(SessionError::RetriesExhausted)
    ));
    assert_eq!(err.to_string(), "createSession failed after three retries");

    let handle = client.sessions().load(&AccountId::new("user-1")).unwrap();
    assert_eq!(handle.lock().await.retry_count(), 0);
}

#[tokio::test]
async fn test_cancelled_before_send() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = config(&server, ApiVariant::DeviceSession);
    let owner = owner(
        &config,
        Credentials::new("rt", "at"),
        Arc::new(MemoryCredentialStore::new()),
    );
    let client = client(config, owner);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = client.execute(&list_request(&server), &cancel).await;
    assert!(matches!(result, Err(RequestError::Cancelled)));
}

#[tokio::test]
async fn test_no_recovery_after_cancellation() {
    let server = MockServer::start().await;
    let cancel = CancellationToken::new();

    Mock::given(method("POST"))
        .and(path("/v2/file/list"))
        .respond_with(CancelWhileResponding {
            cancel: cancel.clone(),
            code: "AccessTokenInvalid",
        })
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v2/account/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"refresh_token": "rt-2", "access_token": "at-2"})),
        )
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::new());
    let config = config(&server, ApiVariant::DeviceSession);
    let owner = owner(&config, Credentials::new("rt", "at"), store.clone());
    let client = client(config, owner.clone());

    let result = client.execute(&list_request(&server), &cancel).await;

    assert!(matches!(result, Err(RequestError::Cancelled)));
    assert_eq!(owner.credentials().await.unwrap(), Credentials::new("rt", "at"));
    assert!(store.load(&AccountId::new("user-1")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancelled_session_creation_is_not_counted() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/users/v1/users/device/create_session"))
        .respond_with(ResponseTemplate::new(400).set_body_json(error_body("InvalidParameter")))
        .mount(&server)
        .await;

    let config = config(&server, ApiVariant::DeviceSession);
    let owner = owner(
        &config,
        Credentials::new("rt", "at"),
        Arc::new(MemoryCredentialStore::new()),
    );
    let client = client(config, owner);
    let account = AccountId::new("user-1");

    let live = CancellationToken::new();
    let result = client.create_session(&live).await;
    assert!(matches!(result, Err(RequestError::Api { .. })));

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let result = client.create_session(&cancelled).await;
    assert!(matches!(result, Err(RequestError::Cancelled)));

    let handle = client.sessions().load(&account).unwrap();
    assert_eq!(handle.lock().await.retry_count(), 1);
}

#[tokio::test]
async fn test_cancel_aborts_in_flight_call() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/file/list"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"items": [], "next_marker": ""}))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let config = config(&server, ApiVariant::DeviceSession);
    let owner = owner(
        &config,
        Credentials::new("rt", "at"),
        Arc::new(MemoryCredentialStore::new()),
    );
    let client = client(config, owner);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = client.execute(&list_request(&server), &cancel).await;
    assert!(matches!(result, Err(RequestError::Cancelled)));
}

#[tokio::test]
async fn test_delegate_refreshes_through_owner() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/file/list"))
        .and(header("authorization", "Bearer\tstale"))
        .respond_with(ResponseTemplate::new(401).set_body_json(error_body("AccessTokenExpired")))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v2/account/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "refresh_token": "rt-2",
            "access_token": "fresh",
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v2/file/list"))
        .and(header("authorization", "Bearer\tfresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [], "next_marker": ""})))
        .expect(1)
        .mount(&server)
        .await;

    let config = config(&server, ApiVariant::DeviceSession);
    let owner = owner(
        &config,
        Credentials::new("rt", "stale"),
        Arc::new(MemoryCredentialStore::new()),
    );
    let delegate = Arc::new(DelegatedCredentials::new(owner.clone()));
    let client = client(config, delegate);

    client
        .execute(&list_request(&server), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(owner.access_token().await.unwrap().expose(), "fresh");
}
