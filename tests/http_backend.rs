//! HTTP adapter contract tests against a local mock server.

use promptgate::backend::{Backend, HttpBackend, HttpBackendConfig};
use promptgate::types::GenerationRequest;
use promptgate::{Error, ErrorKind};

#[tokio::test]
async fn success_response_is_mapped_onto_the_wire_contract() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/generate")
        .match_header("content-type", "application/json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"content": "hello from the mock", "tokens_used": 7}"#)
        .create_async()
        .await;

    let backend = HttpBackend::new(HttpBackendConfig::new("mock", server.url())).unwrap();
    let response = backend
        .generate(&GenerationRequest::new("say hello"))
        .await
        .unwrap();

    assert_eq!(response.content, "hello from the mock");
    assert_eq!(response.tokens_used, Some(7));
    assert_eq!(response.backend, "mock");
    mock.assert_async().await;
}

#[tokio::test]
async fn custom_path_and_model_are_forwarded() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/complete")
        .match_body(mockito::Matcher::PartialJsonString(
            r#"{"model": "tiny-1"}"#.to_string(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"content": "ok"}"#)
        .create_async()
        .await;

    let config = HttpBackendConfig::new("mock", server.url())
        .with_path("/api/complete")
        .with_model("tiny-1");
    let backend = HttpBackend::new(config).unwrap();
    let response = backend
        .generate(&GenerationRequest::new("ping"))
        .await
        .unwrap();

    assert_eq!(response.content, "ok");
    assert_eq!(response.tokens_used, None);
    mock.assert_async().await;
}

#[tokio::test]
async fn non_success_status_becomes_a_backend_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/generate")
        .with_status(503)
        .with_body("overloaded")
        .create_async()
        .await;

    let backend = HttpBackend::new(HttpBackendConfig::new("mock", server.url())).unwrap();
    let err = backend
        .generate(&GenerationRequest::new("say hello"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Backend);
    match err {
        Error::Backend {
            backend, status, ..
        } => {
            assert_eq!(backend, "mock");
            assert_eq!(status, Some(503));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn malformed_body_becomes_a_backend_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/generate")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("not json at all")
        .create_async()
        .await;

    let backend = HttpBackend::new(HttpBackendConfig::new("mock", server.url())).unwrap();
    let err = backend
        .generate(&GenerationRequest::new("say hello"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);
}

#[test]
fn invalid_base_url_is_rejected_at_construction() {
    let err = HttpBackend::new(HttpBackendConfig::new("bad", "not a url")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}
