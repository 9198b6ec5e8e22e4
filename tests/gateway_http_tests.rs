//! HTTP-level tests for the gateway client against a local mock server.

use std::sync::Arc;
use std::time::Duration;

use mockito::{Matcher, Server};
use serde_json::json;

use rubric_grader::gateway::{
    GatewayClient, GatewayConfig, GatewayError, GradingGateway, Quality, PLUGIN_ID,
};
use rubric_grader::grader::{Grader, GraderError};
use rubric_grader::similarity::{SimilarityAnalyzer, SimilarityMethod};

fn config(server: &Server) -> GatewayConfig {
    GatewayConfig::new()
        .with_api_key("  secret-key  ")
        .with_base_url(server.url())
        .with_timeout(Duration::from_secs(5))
}

fn client(server: &Server) -> GatewayClient {
    GatewayClient::new(config(server)).unwrap()
}

#[test]
fn posts_operation_envelope_with_bearer_key() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/grade")
        .match_header("authorization", "Bearer secret-key")
        .match_header("accept", "application/json")
        .match_header("content-type", "application/json")
        .match_body(Matcher::Json(json!({
            "operation": "grade_text",
            "quality": "best",
            "payload": {"question": "Why?"},
            "plugin": PLUGIN_ID,
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"provider": "openai", "content": "```json\n{\"score\": 7}\n```"}"#)
        .create();

    let response = client(&server)
        .grade("grade_text", json!({"question": "Why?"}), Quality::Best)
        .unwrap();

    mock.assert();
    assert_eq!(response.provider, "openai");
    assert_eq!(response.document.unwrap()["score"], json!(7));
}

#[test]
fn error_body_is_invalid_response_regardless_of_status() {
    let mut server = Server::new();
    server
        .mock("POST", "/grade")
        .with_status(200)
        .with_body(r#"{"error": "quota exceeded"}"#)
        .create();

    let err = client(&server)
        .grade("grade_text", json!({}), Quality::Fast)
        .unwrap_err();

    assert!(matches!(&err, GatewayError::InvalidResponse(msg) if msg.contains("quota exceeded")));
    assert!(!err.is_retryable());
}

#[test]
fn server_error_with_valid_body_is_accepted() {
    let mut server = Server::new();
    server
        .mock("POST", "/grade")
        .with_status(500)
        .with_body(r#"{"result": {"score": 3}}"#)
        .create();

    let response = client(&server)
        .grade("grade_text", json!({}), Quality::Balanced)
        .unwrap();

    assert_eq!(response.provider, "gateway");
    assert_eq!(response.content, json!({"score": 3}));
}

#[test]
fn non_json_body_is_invalid_response() {
    let mut server = Server::new();
    server
        .mock("POST", "/grade")
        .with_status(502)
        .with_body("<html>Bad gateway</html>")
        .create();

    let err = client(&server)
        .grade("grade_text", json!({}), Quality::Balanced)
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidResponse(_)));
}

#[test]
fn unreachable_gateway_is_a_retryable_transport_error() {
    let config = GatewayConfig::new()
        .with_api_key("secret-key")
        .with_base_url("http://127.0.0.1:1")
        .with_timeout(Duration::from_secs(2));
    let client = GatewayClient::new(config).unwrap();

    let err = client
        .grade("grade_text", json!({}), Quality::Balanced)
        .unwrap_err();
    assert!(matches!(err, GatewayError::Transport(_)));
    assert!(err.is_retryable());
}

#[test]
fn missing_key_never_reaches_the_server() {
    let mut server = Server::new();
    let mock = server.mock("POST", "/grade").expect(0).create();
    let config = GatewayConfig::new()
        .with_api_key("   ")
        .with_base_url(server.url());
    let client = GatewayClient::new(config).unwrap();

    assert!(!client.is_ready());
    assert!(matches!(
        client.grade("grade_text", json!({}), Quality::Balanced),
        Err(GatewayError::NotReady)
    ));
    mock.assert();
}

#[test]
fn grader_sends_rubric_and_decodes_grade() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/grade")
        .match_body(Matcher::PartialJson(json!({
            "operation": "grade_text",
            "payload": {
                "question": "Explain osmosis.",
                "submission": "Water moves across a membrane.",
                "rubric_json": "{\"criteria\": []}",
            },
        })))
        .with_body(r#"{"content": {"score": 6, "max_score": 10, "reasoning": "Brief."}}"#)
        .create();
    let grader = Grader::new(Arc::new(client(&server)));

    let grade = grader
        .grade_text(
            "Explain osmosis.",
            "Water moves across a membrane.",
            Some("{\"criteria\": []}"),
            Quality::Balanced,
        )
        .unwrap();

    mock.assert();
    let response = grade.response();
    assert_eq!(response.score, Some(6.0));
    assert_eq!(response.max_score, Some(10.0));
    assert_eq!(response.reasoning, "Brief.");
}

#[test]
fn grader_rejects_prose_replies() {
    let mut server = Server::new();
    server
        .mock("POST", "/grade")
        .with_body(r#"{"content": "I think this deserves a B."}"#)
        .create();
    let grader = Grader::new(Arc::new(client(&server)));

    let err = grader
        .grade_text("Q", "A", None, Quality::Balanced)
        .unwrap_err();
    assert!(matches!(err, GraderError::InvalidAiGrade(_)));
}

#[test]
fn similarity_falls_back_to_overlap_when_gateway_fails() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/grade")
        .match_body(Matcher::PartialJson(json!({"operation": "semantic_similarity"})))
        .with_body(r#"{"error": "model unavailable"}"#)
        .create();
    let analyzer = SimilarityAnalyzer::new(Arc::new(client(&server)));

    let analysis = analyzer.analyze(
        "The mitochondria is the powerhouse of the cell",
        "Mitochondria produce energy for the cell",
    );

    mock.assert();
    assert_eq!(analysis.method, SimilarityMethod::Overlap);
    assert_eq!(analysis.final_percent, 58.67);
}
