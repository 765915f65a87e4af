use secrecy::SecretString;
use vspace_api::HttpAccountBackend;
use vspace_core::config::ApiConfig;
use vspace_core::{AccountBackend, BackendError, PasswordUpdate, VaultSpaceId, WrappedKeyRecord};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn setup(server: &MockServer, token: Option<&str>) -> HttpAccountBackend {
    let config = ApiConfig {
        base_url: format!("{}/", server.uri()),
        timeout_secs: 5,
    };
    HttpAccountBackend::new(&config, token.map(SecretString::from)).unwrap()
}

fn update(keys: Vec<WrappedKeyRecord>) -> PasswordUpdate {
    PasswordUpdate {
        current_password: SecretString::from("old password"),
        new_password: SecretString::from("new password!"),
        reencrypted_keys: keys,
    }
}

#[tokio::test]
async fn fetch_salt_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/account/master-key-salt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "salt": "AAECAw==" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let backend = setup(&server, None);
    assert_eq!(backend.fetch_salt().await.unwrap(), "AAECAw==");
}

#[tokio::test]
async fn bearer_token_attached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/vaultspaces/keys"))
        .and(header("authorization", "Bearer at-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "keys": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = setup(&server, Some("at-123"));
    assert!(backend.list_wrapped_keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn list_wrapped_keys_parses_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/vaultspaces/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "keys": [
                { "vaultspace_id": "vs-1", "encrypted_key": "abc" },
                { "vaultspace_id": "vs-2", "encrypted_key": "def" }
            ]
        })))
        .mount(&server)
        .await;

    let keys = setup(&server, None).list_wrapped_keys().await.unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[1].vaultspace_id, VaultSpaceId::from("vs-2"));
    assert_eq!(keys[1].encrypted_key, "def");
}

#[tokio::test]
async fn submit_password_change_body_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/account/password"))
        .and(body_json(serde_json::json!({
            "current_password": "old password",
            "new_password": "new password!",
            "reencrypted_keys": [{ "vaultspace_id": "vs-1", "encrypted_key": "wrapped" }]
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let keys = vec![WrappedKeyRecord {
        vaultspace_id: VaultSpaceId::from("vs-1"),
        encrypted_key: "wrapped".into(),
    }];
    setup(&server, None)
        .submit_password_change(update(keys))
        .await
        .unwrap();
}

#[tokio::test]
async fn rejection_carries_status_and_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/account/password"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(serde_json::json!({ "error": "Invalid current password" })),
        )
        .mount(&server)
        .await;

    let err = setup(&server, None)
        .submit_password_change(update(Vec::new()))
        .await
        .unwrap_err();
    match err {
        BackendError::Rejected { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Invalid current password");
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn plain_text_error_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/account/master-key-salt"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = setup(&server, None).fetch_salt().await.unwrap_err();
    assert!(matches!(
        err,
        BackendError::Rejected { status: 503, ref message } if message == "maintenance"
    ));
}

#[tokio::test]
async fn malformed_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/vaultspaces/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = setup(&server, None).list_wrapped_keys().await.unwrap_err();
    assert!(matches!(err, BackendError::Malformed(_)));
}

#[tokio::test]
async fn unreachable_server_is_network_error() {
    // Bind then release an ephemeral port so nothing is listening on it.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = ApiConfig {
        base_url: format!("http://127.0.0.1:{port}"),
        timeout_secs: 5,
    };

    let backend = HttpAccountBackend::new(&config, None).unwrap();
    let err = backend.fetch_salt().await.unwrap_err();
    assert!(matches!(err, BackendError::Network(_)));
}
