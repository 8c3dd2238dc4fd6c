mod harness;

use gateway_auth::Credential;
use harness::server::TestServer;

#[tokio::test]
async fn models_listing_crosses_providers_and_enabled_models() {
    let mut credential = Credential::from_api_key("sk-test");
    credential.enabled_models = vec!["gpt-4o-mini".to_owned()];

    let server = TestServer::start(vec![("openai", credential)], vec![]).await.unwrap();

    let resp = server
        .client()
        .get(server.url("/v1/models"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "list");

    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["id"], "openai/gpt-4o-mini");
    assert_eq!(data[0]["object"], "model");
    assert_eq!(data[0]["owned_by"], "ai-gateway");
    assert!(data[0]["created"].is_u64());
}

#[tokio::test]
async fn empty_store_lists_no_models() {
    let server = TestServer::start(vec![], vec![]).await.unwrap();

    let body: serde_json::Value = server
        .client()
        .get(server.url("/v1/models"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn models_keep_enabled_order_within_provider() {
    let mut credential = Credential::from_api_key("sk-test");
    credential.enabled_models = vec!["b-model".to_owned(), "a-model".to_owned()];

    let server = TestServer::start(vec![("openai", credential)], vec![]).await.unwrap();

    let body: serde_json::Value = server
        .client()
        .get(server.url("/v1/models"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["id"].as_str())
        .collect();
    assert_eq!(ids, vec!["openai/b-model", "openai/a-model"]);
}
