use crate::{
    config::Config,
    mcp::registry::ToolRegistry,
    sandbox::PathResolver,
    server::{build_router, AppState},
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::path::Path;
use tower::ServiceExt;

fn state_for(root: &Path, token: Option<&str>) -> AppState {
    let mut cfg = Config::default();
    cfg.root.root_dir = Some(root.to_path_buf());
    cfg.auth.bearer_token = token.map(String::from);
    cfg.exec.allowed_cmds = vec!["cat".into()];
    let reg = cfg.root_registry().unwrap();
    let resolver = PathResolver::new(reg.clone());
    let registry = ToolRegistry::new(&cfg, &resolver).unwrap();
    AppState::new(cfg, reg, registry)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

fn call_req(tool: &str, params: Value) -> Request<Body> {
    Request::builder()
        .uri("/mcp/call")
        .method("POST")
        .header("content-type", "application/json")
        .body(Body::from(json!({"id": "1", "tool": tool, "params": params}).to_string()))
        .unwrap()
}

mod integration {
    use super::*;

    #[tokio::test]
    async fn capabilities_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let app = build_router(state_for(tmp.path(), Some("t")));
        let req = Request::builder()
            .uri("/mcp/capabilities")
            .header("Authorization", "Bearer t")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["exec", "exec_list", "fs_delete", "fs_list", "fs_read", "fs_write"]);
    }

    #[tokio::test]
    async fn bearer_is_enforced() {
        let tmp = tempfile::tempdir().unwrap();
        let app = build_router(state_for(tmp.path(), Some("t")));
        let (status, body) = send(&app, call_req("fs_read", json!({"path": "x"}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "Unauthorized");
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let app = build_router(state_for(tmp.path(), None));
        let (status, body) =
            send(&app, call_req("fs_write", json!({"path": "new.txt", "content": "hi"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["success"], true);

        let (status, body) = send(&app, call_req("fs_read", json!({"path": "new.txt"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "1");
        assert_eq!(body["result"]["content"], "hi");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reading_outside_root_is_forbidden() {
        let tmp = tempfile::tempdir().unwrap();
        let app = build_router(state_for(tmp.path(), None));
        let (status, body) = send(&app, call_req("fs_read", json!({"path": "/etc/passwd"}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "PathOutsideRoot");
        assert!(body.get("result").is_none());
    }

    #[tokio::test]
    async fn empty_path_is_bad_request() {
        let tmp = tempfile::tempdir().unwrap();
        let app = build_router(state_for(tmp.path(), None));
        let (status, body) = send(&app, call_req("fs_list", json!({"path": ""}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "InvalidPath");
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let app = build_router(state_for(tmp.path(), None));
        let (status, _) = send(&app, call_req("fs_chmod", json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn named_tool_route_returns_bare_result() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "named").unwrap();
        let app = build_router(state_for(tmp.path(), None));
        let req = Request::builder()
            .uri("/mcp/tool/fs_read")
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(json!({"path": "a.txt"}).to_string()))
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["content"], "named");

        let req = Request::builder()
            .uri("/mcp/tool/exec_list")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["commands"].is_array());
    }

    #[tokio::test]
    async fn index_reports_root_and_endpoints() {
        let tmp = tempfile::tempdir().unwrap();
        let app = build_router(state_for(tmp.path(), None));
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        let root = dunce::canonicalize(tmp.path()).unwrap();
        assert_eq!(body["allowed_root"], root.display().to_string());
        assert!(body["endpoints"]
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e["path"] == "/mcp/tool/fs_write"));
    }

    #[tokio::test]
    async fn cors_preflight_allows_any_origin_by_default() {
        let tmp = tempfile::tempdir().unwrap();
        let app = build_router(state_for(tmp.path(), None));
        let req = Request::builder()
            .uri("/mcp/call")
            .method("OPTIONS")
            .header("Origin", "https://client.example")
            .header("Access-Control-Request-Method", "POST")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn rate_limit_applies() {
        let tmp = tempfile::tempdir().unwrap();
        let mut state = state_for(tmp.path(), None);
        state.rls = crate::security::RateLimiters::new(1, 1, 100, 100);
        let app = build_router(state);
        let (first, _) = send(&app, call_req("exec_list", json!({}))).await;
        let (second, body) = send(&app, call_req("exec_list", json!({}))).await;
        assert_eq!(first, StatusCode::OK);
        assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["code"], "RateLimited");
    }

    #[tokio::test]
    async fn rotating_tokens_do_not_reset_the_budget_without_auth() {
        let tmp = tempfile::tempdir().unwrap();
        let mut state = state_for(tmp.path(), None);
        state.rls = crate::security::RateLimiters::new(1, 1, 100, 100);
        let app = build_router(state);
        let with_token = |t: &str| {
            let mut req = call_req("exec_list", json!({}));
            req.headers_mut()
                .insert("Authorization", format!("Bearer {t}").parse().unwrap());
            req
        };
        let (first, _) = send(&app, with_token("one")).await;
        let (second, _) = send(&app, with_token("two")).await;
        assert_eq!(first, StatusCode::OK);
        assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exec_stream_is_ndjson() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("s.txt"), "x").unwrap();
        let app = build_router(state_for(tmp.path(), None));
        let req = Request::builder()
            .uri("/mcp/call")
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"id": "s", "tool": "exec", "params": {"command": "cat", "args": ["s.txt"]}, "stream": true})
                    .to_string(),
            ))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "application/x-ndjson");
    }
}

mod live {
    use super::*;

    #[tokio::test]
    async fn served_over_tcp() {
        let tmp = tempfile::tempdir().unwrap();
        let app = build_router(state_for(tmp.path(), Some("secret")));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let client = reqwest::Client::new();
        let url = format!("http://{addr}/mcp/call");
        let written: Value = client
            .post(&url)
            .bearer_auth("secret")
            .json(&json!({"id": "w", "tool": "fs_write", "params": {"path": "deep/er/f.txt", "content": "over tcp"}}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(written["result"]["bytes_written"], 8);

        let read: Value = client
            .post(&url)
            .bearer_auth("secret")
            .json(&json!({"id": "r", "tool": "fs_read", "params": {"path": "deep/er/f.txt"}}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(read["result"]["content"], "over tcp");

        let denied = client
            .post(&url)
            .bearer_auth("secret")
            .json(&json!({"id": "d", "tool": "fs_delete", "params": {"path": "../"}}))
            .send()
            .await
            .unwrap();
        assert_eq!(denied.status(), reqwest::StatusCode::FORBIDDEN);
        assert!(tmp.path().join("deep/er/f.txt").exists());
    }
}
