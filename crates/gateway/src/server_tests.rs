//! Router-level tests for both gateway surfaces.

use crate::server::{admin_router, public_router, GatewayState, SharedState};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use pidgate_resolver::{EngineConfig, ResolutionEngine};
use pidgate_rewrite::{Action, Condition, RedirectEngine, Rule, RuleTable};
use pidgate_store::MemoryRecordStore;
use pidgate_types::{AdminRecord, Handle, PermissionSet, Value};
use serde_json::{json, Value as JsonValue};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceExt;

fn rule(priority: u32, pattern: &str, action: Action, target: &str) -> Rule {
    Rule {
        priority,
        pattern: pattern.to_string(),
        condition: None,
        action,
        target: target.to_string(),
    }
}

fn admin_value(index: u32, bits: &str) -> Value {
    Value::admin(
        index,
        AdminRecord {
            referenced_handle: Handle::parse("0.NA/10.123").unwrap(),
            referenced_index: 200,
            permissions: PermissionSet::from_bitstring(bits).unwrap(),
        },
    )
}

/// State with the usual fixture: a self-governing naming authority, one
/// collection handle, and the given redirect rules.
async fn seeded_state(rules: Vec<Rule>, rule_source: Option<PathBuf>) -> SharedState {
    let store = Arc::new(MemoryRecordStore::new());
    let resolution = ResolutionEngine::new(store, EngineConfig::default());

    resolution
        .create(
            &Handle::parse("0.NA/10.123").unwrap(),
            vec![admin_value(200, "111111111111")],
        )
        .await
        .unwrap();
    resolution
        .create(
            &Handle::parse("10.123/collection.1").unwrap(),
            vec![
                Value::text(1, "URL", "https://example.org/c/1"),
                admin_value(100, "011111110011"),
            ],
        )
        .await
        .unwrap();

    let table = Arc::new(RuleTable::new());
    table.load(rules).unwrap();

    Arc::new(GatewayState {
        resolution,
        redirect: RedirectEngine::new(table),
        mount: "handle".to_string(),
        rule_source,
        start_time: Instant::now(),
    })
}

fn islandora_rules() -> Vec<Rule> {
    vec![
        rule(
            1,
            "/islandora/object/(.+)",
            Action::RedirectPermanent,
            "/items/$1",
        ),
        rule(2, "/islandora/(.+)", Action::Rewrite, "/legacy/$1"),
    ]
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: JsonValue) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> JsonValue {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_counts() {
    let state = seeded_state(islandora_rules(), None).await;
    let response = public_router(state).oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["handle_count"], 2);
    assert_eq!(body["rule_count"], 2);
}

#[tokio::test]
async fn public_surface_resolves_mounted_identifier() {
    let state = seeded_state(vec![], None).await;
    let response = public_router(state)
        .oneshot(get("/handle/10.123/collection.1?type=URL"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["handle"], "10.123/collection.1");
    let values = body["values"].as_array().unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0]["payload"]["data"], "https://example.org/c/1");
}

#[tokio::test]
async fn admin_value_is_not_publicly_visible() {
    let state = seeded_state(vec![], None).await;
    let response = public_router(state)
        .oneshot(get("/handle/10.123/collection.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let values = body["values"].as_array().unwrap();
    assert!(values.iter().all(|v| v["value_type"] != "HS_ADMIN"));
}

#[tokio::test]
async fn unknown_identifier_is_not_found() {
    let state = seeded_state(vec![], None).await;
    let response = public_router(state)
        .oneshot(get("/handle/10.123/absent"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_paths_are_forbidden_on_public_surface() {
    let state = seeded_state(vec![], None).await;
    let router = public_router(state);

    let response = router
        .clone()
        .oneshot(get("/admin/handles"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = router
        .oneshot(post_json("/admin/rules/reload", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn legacy_object_path_redirects_with_location() {
    let state = seeded_state(islandora_rules(), None).await;
    let response = public_router(state)
        .oneshot(get("/islandora/object/grinnell:123"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/items/grinnell:123"
    );
}

#[tokio::test]
async fn broader_legacy_path_becomes_rewrite_directive() {
    let state = seeded_state(islandora_rules(), None).await;
    let response = public_router(state)
        .oneshot(get("/islandora/search"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["action"], "rewrite");
    assert_eq!(body["target"], "/legacy/search");
}

#[tokio::test]
async fn unmatched_legacy_path_signals_fallthrough() {
    let state = seeded_state(islandora_rules(), None).await;
    let response = public_router(state)
        .oneshot(get("/completely/unrelated"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["fallthrough"], true);
}

#[tokio::test]
async fn encoded_query_keys_are_decoded_for_conditions() {
    let mut gated = rule(1, "/search", Action::RedirectTemporary, "/find");
    gated.condition = Some(Condition::Query {
        query: "mój".to_string(),
    });
    let state = seeded_state(vec![gated], None).await;
    let router = public_router(state);

    let response = router.clone().oneshot(get("/search")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router.oneshot(get("/search?m%C3%B3j=1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/find");
}

#[tokio::test]
async fn proxy_target_resolves_inline() {
    let rules = vec![rule(
        1,
        "/objects/(.+)",
        Action::Proxy,
        "handle/10.123/$1",
    )];
    let state = seeded_state(rules, None).await;
    let response = public_router(state)
        .oneshot(get("/objects/collection.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["handle"], "10.123/collection.1");
    assert_eq!(
        body["values"][0]["payload"]["data"],
        "https://example.org/c/1"
    );
}

#[tokio::test]
async fn admin_create_mutate_and_resolve_flow() {
    let state = seeded_state(vec![], None).await;
    let router = admin_router(state);

    let create = json!({
        "handle": "10.123/item.7",
        "values": [
            { "index": 1, "value_type": "URL", "payload": { "kind": "text", "data": "https://example.org/i/7" } },
            {
                "index": 100,
                "value_type": "HS_ADMIN",
                "payload": { "kind": "admin", "data": {
                    "referenced_handle": "0.NA/10.123",
                    "referenced_index": 200,
                    "permissions": "111111111111"
                } },
                "perms": { "public_read": false, "public_write": false }
            }
        ]
    });
    let response = router
        .clone()
        .oneshot(post_json("/admin/handles", create))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["version"], 1);

    let mutate = json!({
        "handle": "10.123/item.7",
        "op": { "kind": "add_value", "data": {
            "index": 2, "value_type": "DESC",
            "payload": { "kind": "text", "data": "seventh item" }
        } },
        "caller": { "handle": "0.NA/10.123", "index": 200 }
    });
    let response = router
        .clone()
        .oneshot(post_json("/admin/mutate", mutate))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["version"], 2);

    // Administrative visibility includes the HS_ADMIN value.
    let response = router
        .oneshot(get("/admin/resolve/10.123/item.7"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let values = body["values"].as_array().unwrap();
    assert_eq!(values.len(), 3);
    assert!(values.iter().any(|v| v["value_type"] == "HS_ADMIN"));
}

#[tokio::test]
async fn mutate_with_wrong_caller_is_forbidden() {
    let state = seeded_state(vec![], None).await;
    let mutate = json!({
        "handle": "10.123/collection.1",
        "op": { "kind": "delete_value", "data": { "index": 1 } },
        "caller": { "handle": "10.123/collection.1", "index": 100 }
    });
    let response = admin_router(state)
        .oneshot(post_json("/admin/mutate", mutate))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    // The message names the operation and nothing else about the chain.
    assert_eq!(body["error"], "permission denied for operation delete_value");
}

#[tokio::test]
async fn reload_failure_keeps_previous_snapshot() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
        [[rule]]
        priority = 1
        pattern = "/dup/(.+)"
        action = "rewrite"
        target = "/a/$1"

        [[rule]]
        priority = 1
        pattern = "/dup2/(.+)"
        action = "rewrite"
        target = "/b/$1"
        "#
    )
    .unwrap();

    let state = seeded_state(islandora_rules(), Some(file.path().to_path_buf())).await;
    let admin = admin_router(state.clone());
    let public = public_router(state);

    let response = admin
        .oneshot(post_json("/admin/rules/reload", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // The islandora rules are still the active snapshot.
    let response = public
        .oneshot(get("/islandora/object/grinnell:123"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
}

#[tokio::test]
async fn reload_success_activates_new_rules() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
        [[rule]]
        priority = 1
        pattern = "/new/(.+)"
        action = "redirect_temporary"
        target = "/fresh/$1"
        "#
    )
    .unwrap();

    let state = seeded_state(islandora_rules(), Some(file.path().to_path_buf())).await;
    let admin = admin_router(state.clone());
    let public = public_router(state);

    let response = admin
        .oneshot(post_json("/admin/rules/reload", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["rules"], 1);

    let response = public.oneshot(get("/new/path")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/fresh/path"
    );
}
