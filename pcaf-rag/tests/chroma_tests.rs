//! HTTP contract tests for the Chroma-backed document store.

use std::sync::Arc;
use std::time::Duration;

use pcaf_rag::{
    ChromaConfig, ChromaDocumentStore, Document, DocumentMetadata, DocumentStore,
    HashEmbeddingProvider, RagError,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DIMS: usize = 8;

fn store_for(server: &MockServer, api_key: Option<&str>, timeout: Duration) -> ChromaDocumentStore {
    let config = ChromaConfig {
        base_url: server.uri(),
        api_key: api_key.map(str::to_string),
        timeout,
        heartbeat_timeout: timeout,
    };
    ChromaDocumentStore::new(config, Arc::new(HashEmbeddingProvider::new(DIMS))).unwrap()
}

async fn mount_collection(server: &MockServer, name: &str, count: u64) {
    Mock::given(method("POST"))
        .and(path("/api/v1/collections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": name,
            "id": "c-1",
            "metadata": {}
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/collections/{name}/count")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(count)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn non_success_status_carries_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/collections"))
        .respond_with(ResponseTemplate::new(500).set_body_string("kaboom"))
        .mount(&server)
        .await;

    let store = store_for(&server, None, Duration::from_secs(5));
    let err = store.create_collection("loans", None).await.unwrap_err();
    match &err {
        RagError::HttpStatus { status, body } => {
            assert_eq!(*status, 500);
            assert_eq!(body, "kaboom");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("(500): kaboom"));
    assert!(err.is_upstream());
}

#[tokio::test]
async fn slow_server_yields_timeout_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/collections"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let store = store_for(&server, None, Duration::from_millis(50));
    let err = store.list_collections().await.unwrap_err();
    assert!(matches!(err, RagError::Timeout { after, .. } if after == Duration::from_millis(50)));
}

#[tokio::test]
async fn requests_carry_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/collections"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server, Some("secret"), Duration::from_secs(5));
    assert!(store.list_collections().await.unwrap().is_empty());
}

#[tokio::test]
async fn health_check_reports_unhealthy_instead_of_failing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/heartbeat"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let store = store_for(&server, None, Duration::from_secs(5));
    assert!(!store.health_check().await.is_healthy());
}

#[tokio::test]
async fn health_check_sums_collection_counts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/heartbeat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"nanosecond heartbeat": 1})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/collections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"name": "loan_documents", "id": "1", "metadata": null},
            {"name": "bank_targets", "id": "2", "metadata": {"description": "targets"}},
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/collections/loan_documents/count"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(3)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/collections/bank_targets/count"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 2})))
        .mount(&server)
        .await;

    let store = store_for(&server, None, Duration::from_secs(5));
    let health = store.health_check().await;
    assert!(health.is_healthy());
    assert_eq!(health.total_documents, 5);
    assert_eq!(health.collections, vec!["loan_documents".to_string(), "bank_targets".to_string()]);
}

#[tokio::test]
async fn add_splits_new_and_existing_ids() {
    let server = MockServer::start().await;
    mount_collection(&server, "loans", 1).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/collections/loans/get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ids": ["old"]})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/collections/loans/add"))
        .and(body_partial_json(json!({"ids": ["new"]})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!(true)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/collections/loans/update"))
        .and(body_partial_json(json!({"ids": ["old"], "metadatas": [{"tags": "ev,loan"}]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server, None, Duration::from_secs(5));
    let meta = DocumentMetadata::new("loan_analysis", "t").with_tags(["ev", "loan"]);
    let report = store
        .add_documents(
            "loans",
            vec![
                Document::new("new", "tesla loan", meta.clone()),
                Document::new("old", "ford loan", meta),
            ],
        )
        .await
        .unwrap();
    assert_eq!((report.added, report.updated, report.errors), (1, 1, 0));
}

#[tokio::test]
async fn similarity_scan_scores_returned_embeddings() {
    let server = MockServer::start().await;
    mount_collection(&server, "loans", 2).await;

    let provider = HashEmbeddingProvider::new(DIMS);
    let matching = provider.embed_text("tesla loan");
    Mock::given(method("POST"))
        .and(path("/api/v1/collections/loans/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ids": [["a", "z"]],
            "distances": [[0.0, 1.0]],
            "documents": [["tesla loan", "nothing"]],
            "metadatas": [[
                {
                    "type": "loan_analysis", "source": "t", "timestamp": "2026-01-01T00:00:00Z",
                    "dataQuality": 2.0, "tags": "ev"
                },
                {
                    "type": "loan_analysis", "source": "t", "timestamp": "2026-01-01T00:00:00Z",
                    "dataQuality": 2.0, "tags": ""
                }
            ]],
            "embeddings": [[matching, vec![0.0f32; DIMS]]],
        })))
        .mount(&server)
        .await;

    let store = store_for(&server, None, Duration::from_secs(5));
    let query = provider.embed_text("tesla loan");
    let hits = store.similarity_scan("loans", &query, None, 0.3).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document.id, "a");
    assert_eq!(hits[0].document.metadata.tags, vec!["ev".to_string()]);
    assert!((hits[0].similarity - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn delete_by_ids_reports_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/collections/loans/get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ids": ["a"]})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/collections/loans/delete"))
        .and(body_partial_json(json!({"ids": ["a"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["a"])))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server, None, Duration::from_secs(5));
    let report = store
        .delete_documents("loans", pcaf_rag::DeleteSelector::Ids(vec!["a".into(), "b".into()]))
        .await
        .unwrap();
    assert_eq!((report.deleted, report.not_found), (1, 1));
}
