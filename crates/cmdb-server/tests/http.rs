//! End-to-end tests for the HTTP surface.
//!
//! Each test builds the full router over an in-memory store and a temporary
//! feature-pack directory, then drives it with `tower::ServiceExt::oneshot`.
//! Run with: cargo test --package cmdb-server --test http

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use cmdb_core::config::{CmdbConfig, GroupConfig, UserConfig};
use cmdb_graph::MemoryStore;
use cmdb_server::auth::encode_token;
use cmdb_server::{bootstrap, build_router, AppState};

const SECRET: &str = "http-test-secret";
const PASSWORD: &str = "s3cret-pass";

const TYPES_JSON: &str = r#"{
  "Rack": {
    "display_name": "Rack",
    "category": "Data Center",
    "properties": ["name", {"name": "status", "choices": ["active", "planned"]}, "units"],
    "required": ["name"],
    "relationships": {"LOCATED_IN": {"target": "Room", "direction": "out"}}
  },
  "Room": {
    "display_name": "Room",
    "category": "Data Center",
    "properties": ["name", "floor"],
    "required": ["name"]
  }
}"#;

struct TestApp {
    router: Router,
    _packs: TempDir,
}

fn user(username: &str, hash: &str, staff: bool, groups: &[&str]) -> UserConfig {
    UserConfig {
        username: username.to_string(),
        password_hash: hash.to_string(),
        email: format!("{username}@example.com"),
        is_staff: staff,
        is_superuser: staff,
        is_active: true,
        groups: groups.iter().map(|g| g.to_string()).collect(),
        permissions: Vec::new(),
    }
}

async fn setup() -> TestApp {
    let packs = tempfile::tempdir().unwrap();
    let pack_dir = packs.path().join("dc_pack");
    std::fs::create_dir_all(&pack_dir).unwrap();
    std::fs::write(pack_dir.join("types.json"), TYPES_JSON).unwrap();
    std::fs::write(
        pack_dir.join("pack.json"),
        r#"{"tabs": [{"id": "elevation", "name": "Elevation", "for_labels": ["Rack"]}]}"#,
    )
    .unwrap();

    let hash = bcrypt::hash(PASSWORD, 4).unwrap();
    let mut config = CmdbConfig::default();
    config.server.session_secret = SECRET.to_string();
    config.packs.dir = packs.path().display().to_string();
    config.auth.users = vec![
        user("admin", &hash, true, &[]),
        user("viewer", &hash, false, &["viewers"]),
    ];
    config.auth.groups = vec![GroupConfig {
        name: "viewers".to_string(),
        permissions: vec!["view_rack".to_string(), "view_room".to_string()],
    }];

    let state = AppState::new(config, Arc::new(MemoryStore::new()));
    bootstrap::load(&state).await.unwrap();
    TestApp {
        router: build_router(state.into_shared()),
        _packs: packs,
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn json(&self, method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token(user)));
        }
        let body = match body {
            Some(v) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let response = self.send(builder.body(body).unwrap()).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    /// A browser-style request with a session cookie.
    fn page(method: &str, uri: &str, user: &str, htmx: bool, form: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::COOKIE, format!("graphcmdb_session={}", token(user)));
        if htmx {
            builder = builder.header("hx-request", "true");
        }
        match form {
            Some(form) => builder
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn create_node(&self, label: &str, properties: Value) -> String {
        let (status, body) = self
            .json("POST", &format!("/api/nodes/{label}/"), Some("admin"), Some(json!({"properties": properties})))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["node"]["id"].as_str().unwrap().to_string()
    }
}

fn token(user: &str) -> String {
    encode_token(user, SECRET, 3600).unwrap()
}

async fn text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn header_value<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

// ── JSON API ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_token_endpoint_and_authentication() {
    let app = setup().await;

    let (status, body) = app.json("GET", "/api/types/", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], json!(false));

    let (status, _) = app
        .json("POST", "/api/auth/token/", None, Some(json!({"username": "admin", "password": "wrong"})))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .json("POST", "/api/auth/token/", None, Some(json!({"username": "admin", "password": PASSWORD})))
        .await;
    assert_eq!(status, StatusCode::OK);
    let issued = body["token"].as_str().unwrap().to_string();

    let request = Request::builder()
        .uri("/api/types/")
        .header(header::AUTHORIZATION, format!("Bearer {issued}"))
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_api_types_and_packs() {
    let app = setup().await;

    let (status, body) = app.json("GET", "/api/types/", Some("viewer"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], json!(2));
    let rack = body["types"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["label"] == "Rack")
        .unwrap();
    assert_eq!(rack["category"], json!("Data Center"));
    assert_eq!(rack["required"], json!(["name"]));

    let (status, body) = app.json("GET", "/api/feature-packs/", Some("admin"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], json!(1));
    assert_eq!(body["packs"][0]["name"], json!("dc_pack"));
    assert_eq!(body["packs"][0]["enabled"], json!(true));
    assert_eq!(body["packs"][0]["type_count"], json!(2));
}

#[tokio::test]
async fn test_api_node_lifecycle() {
    let app = setup().await;
    let rack = app
        .create_node("Rack", json!({"name": "rack-a1", "status": "active", "units": 42}))
        .await;
    let room = app.create_node("Room", json!({"name": "room-1"})).await;

    let (status, body) = app.json("GET", "/api/nodes/Rack/", Some("viewer"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], json!(1));
    assert_eq!(body["limit"], json!(100));
    assert_eq!(body["offset"], json!(0));
    assert_eq!(body["nodes"][0]["properties"]["units"], json!(42));

    let (status, body) = app
        .json("PATCH", &format!("/api/nodes/Rack/{rack}/"), Some("admin"), Some(json!({"properties": {"status": "planned"}})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["node"]["properties"]["status"], json!("planned"));
    assert_eq!(body["node"]["properties"]["name"], json!("rack-a1"));

    let rel_uri = format!("/api/nodes/Rack/{rack}/relationships/");
    let (status, _) = app
        .json(
            "POST",
            &rel_uri,
            Some("admin"),
            Some(json!({"relationship_type": "LOCATED_IN", "target_label": "Room", "target_id": room})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = app.json("GET", &format!("/api/nodes/Rack/{rack}/"), Some("viewer"), None).await;
    let outgoing = &body["node"]["relationships"]["outgoing"]["LOCATED_IN"];
    assert_eq!(outgoing.as_array().map(Vec::len), Some(1));

    let delete_rel = format!("/api/nodes/Rack/{rack}/relationships/LOCATED_IN/{room}/");
    let (status, _) = app.json("DELETE", &delete_rel, Some("admin"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app.json("DELETE", &delete_rel, Some("admin"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("Relationship not found"));

    let (status, body) = app.json("DELETE", &format!("/api/nodes/Rack/{rack}/"), Some("admin"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], json!("Node deleted successfully"));

    let (status, _) = app.json("GET", &format!("/api/nodes/Rack/{rack}/"), Some("admin"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_api_validation_errors() {
    let app = setup().await;

    let (status, body) = app
        .json("POST", "/api/nodes/Rack/", Some("admin"), Some(json!({"properties": {"units": 4}})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Missing required property: name"));

    let (status, body) = app
        .json("POST", "/api/nodes/Rack/", Some("admin"), Some(json!({"properties": {"name": "r", "status": "gone"}})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid value 'gone' for status"));

    let request = Request::builder()
        .method("POST")
        .uri("/api/nodes/Rack/")
        .header(header::AUTHORIZATION, format!("Bearer {}", token("admin")))
        .body(Body::from("{not json"))
        .unwrap();
    assert_eq!(app.send(request).await.status(), StatusCode::BAD_REQUEST);

    let (status, body) = app.json("GET", "/api/nodes/Spaceship/", Some("admin"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], json!(false));

    let (status, _) = app.json("GET", "/api/nodes/Rack/?limit=lots", Some("admin"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let rack = app.create_node("Rack", json!({"name": "rack-z"})).await;
    let (status, body) = app
        .json("POST", &format!("/api/nodes/Rack/{rack}/relationships/"), Some("admin"), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        json!("relationship_type, target_label and target_id are required")
    );
}

#[tokio::test]
async fn test_api_permissions() {
    let app = setup().await;
    let (status, body) = app
        .json("POST", "/api/nodes/Rack/", Some("viewer"), Some(json!({"properties": {"name": "r"}})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body["error"],
        json!("Access Denied: you do not have permission to add Rack.")
    );
}

// ── HTML Views ───────────────────────────────────────────────────

#[tokio::test]
async fn test_anonymous_page_redirects_to_login() {
    let app = setup().await;
    let request = Request::builder().uri("/cmdb/Rack/").body(Body::empty()).unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        header_value(&response, "location"),
        Some("/users/login/?next=%2Fcmdb%2FRack%2F")
    );
}

#[tokio::test]
async fn test_login_sets_session_and_honours_next() {
    let app = setup().await;

    let request = Request::builder()
        .method("POST")
        .uri("/users/login/")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!("username=admin&password={PASSWORD}&next=%2Fcmdb%2FRack%2F")))
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(header_value(&response, "location"), Some("/cmdb/Rack/"));
    assert!(header_value(&response, "set-cookie").unwrap().starts_with("graphcmdb_session="));

    let request = Request::builder()
        .method("POST")
        .uri("/users/login/")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("username=admin&password=nope&next=%2F%2Fevil.example"))
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = text(response).await;
    assert!(body.contains("Invalid username or password."));
    assert!(body.contains(r#"name="next" value="/cmdb/""#));
}

#[tokio::test]
async fn test_htmx_denial_targets_error_surface() {
    let app = setup().await;
    let response = app
        .send(TestApp::page("POST", "/cmdb/Rack/create/", "viewer", true, Some("prop_name=r1")))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(header_value(&response, "hx-retarget"), Some("#error-surface"));
    assert_eq!(header_value(&response, "hx-reswap"), Some("innerHTML"));
    let body = text(response).await;
    assert!(body.contains(r#"data-cmdb-error="true""#));
    assert!(body.contains("Access Denied: you do not have permission to add Rack."));
}

#[tokio::test]
async fn test_navigation_denial_flashes_on_dashboard() {
    let app = setup().await;
    let response = app
        .send(TestApp::page("GET", "/cmdb/Rack/create/", "viewer", false, None))
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(header_value(&response, "location"), Some("/cmdb/"));
    let flash = header_value(&response, "set-cookie").unwrap();
    let flash = flash.split(';').next().unwrap().to_string();
    assert!(flash.starts_with("graphcmdb_flash="));

    let request = Request::builder()
        .uri("/cmdb/")
        .header(
            header::COOKIE,
            format!("graphcmdb_session={}; {flash}", token("viewer")),
        )
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header_value(&response, "set-cookie").unwrap().contains("Max-Age=0"));
    let body = text(response).await;
    assert!(body.contains("Access Denied: you do not have permission to add Rack."));
}

#[tokio::test]
async fn test_list_page_and_partial() {
    let app = setup().await;
    app.create_node("Rack", json!({"name": "rack-a1", "units": 42})).await;

    let body = text(app.send(TestApp::page("GET", "/cmdb/Rack/", "viewer", false, None)).await).await;
    assert!(body.starts_with("<!DOCTYPE html>"));
    assert!(body.contains(r#"data-column-prefs-key="cmdb.columns.Rack""#));
    assert!(body.contains("rack-a1"));
    // Viewers get no add, edit or delete controls.
    assert!(!body.contains("/cmdb/Rack/create/"));
    assert!(!body.contains("/delete/"));

    let body = text(app.send(TestApp::page("GET", "/cmdb/Rack/", "admin", true, None)).await).await;
    assert!(body.starts_with(r#"<div id="nodes-table""#));
    assert!(body.contains("/delete/"));
}

#[tokio::test]
async fn test_htmx_create_and_validation() {
    let app = setup().await;

    let response = app
        .send(TestApp::page(
            "POST",
            "/cmdb/Rack/create/",
            "admin",
            true,
            Some("prop_name=rack-b2&prop_status=active&prop_units=10&properties="),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_value(&response, "hx-trigger"), Some("nodes-changed"));
    let body = text(response).await;
    assert!(body.contains("Rack created with ID"));
    assert!(body.contains(r#"hx-swap-oob="innerHTML""#));

    let (_, listed) = app.json("GET", "/api/nodes/Rack/", Some("admin"), None).await;
    assert_eq!(listed["nodes"][0]["properties"]["units"], json!(10));

    let response = app
        .send(TestApp::page("POST", "/cmdb/Rack/create/", "admin", true, Some("prop_units=3")))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header_value(&response, "hx-retarget").is_none());
    let body = text(response).await;
    assert!(body.contains(r#"id="node-form""#));
    assert!(body.contains("Missing required property: name"));
    assert!(body.contains(r#"value="3""#));
}

#[tokio::test]
async fn test_relationship_forms() {
    let app = setup().await;
    let rack = app.create_node("Rack", json!({"name": "rack-a1"})).await;
    let room = app.create_node("Room", json!({"name": "room-1"})).await;
    let connect = format!("/cmdb/Rack/{rack}/connect/");

    let body = text(
        app.send(TestApp::page("POST", &connect, "admin", true, Some("rel_type=&target_label=Room&target_id=")))
            .await,
    )
    .await;
    assert!(body.contains(r#"<div id="relationships">"#));
    assert!(body.contains("Missing relationship details"));

    let form = format!("rel_type=located_in&target_label=Room&target_id={room}");
    let body = text(app.send(TestApp::page("POST", &connect, "admin", true, Some(&form))).await).await;
    assert!(body.contains("Relationship &#x27;LOCATED_IN&#x27; added"));
    assert!(body.contains("room-1"));

    let form = format!("rel_type=LOCATED_IN&target_id={room}");
    let disconnect = format!("/cmdb/Rack/{rack}/disconnect/");
    let body = text(app.send(TestApp::page("POST", &disconnect, "admin", true, Some(&form))).await).await;
    assert!(body.contains("Relationship &#x27;LOCATED_IN&#x27; removed"));

    let history = text(
        app.send(TestApp::page("GET", &format!("/cmdb/Rack/{rack}/audit/"), "viewer", true, None))
            .await,
    )
    .await;
    assert!(history.contains("connect"));
    assert!(history.contains("disconnect"));
}

#[tokio::test]
async fn test_target_picker() {
    let app = setup().await;
    app.create_node("Room", json!({"name": "Zulu"})).await;
    app.create_node("Room", json!({"name": "alpha"})).await;

    let body = text(app.send(TestApp::page("GET", "/cmdb/targets/", "viewer", true, None)).await).await;
    assert!(body.contains("No label selected"));

    let body = text(
        app.send(TestApp::page("GET", "/cmdb/targets/?target_label=Room", "viewer", true, None))
            .await,
    )
    .await;
    let alpha = body.find("alpha").unwrap();
    let zulu = body.find("Zulu").unwrap();
    assert!(alpha < zulu);
}

#[tokio::test]
async fn test_feature_pack_toggle_is_staff_only() {
    let app = setup().await;

    let response = app
        .send(TestApp::page("POST", "/feature-packs/dc_pack/disable/", "viewer", false, None))
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let response = app
        .send(TestApp::page("POST", "/feature-packs/dc_pack/disable/", "admin", false, None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&text(response).await).unwrap();
    assert_eq!(body["message"], json!("Feature pack \"dc_pack\" disabled successfully"));
    assert_eq!(body["enabled"], json!(false));

    let (_, types) = app.json("GET", "/api/types/", Some("admin"), None).await;
    assert_eq!(types["count"], json!(0));
    let (status, _) = app.json("GET", "/api/nodes/Rack/", Some("admin"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let response = app
        .send(TestApp::page("POST", "/feature-packs/dc_pack/enable/", "admin", false, None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let (_, types) = app.json("GET", "/api/types/", Some("admin"), None).await;
    assert_eq!(types["count"], json!(2));
}
