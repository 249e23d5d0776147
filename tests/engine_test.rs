//! End-to-end pipeline behavior through the real router: caching,
//! conditional requests, negotiation variants and strategy selection.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`

use pixbox::config::Config;
use pixbox::api::{build_router, build_state};

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    bytes.extend_from_slice(&13u32.to_be_bytes());
    bytes.extend_from_slice(b"IHDR");
    bytes.extend_from_slice(&width.to_be_bytes());
    bytes.extend_from_slice(&height.to_be_bytes());
    bytes.extend_from_slice(&[8, 6, 0, 0, 0]);
    bytes.extend_from_slice(&[0; 4]);
    bytes
}

fn build_app() -> (Router, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::create_dir_all(temp_dir.path().join("images")).unwrap();
    std::fs::write(temp_dir.path().join("images/lenna.png"), png_bytes(64, 48)).unwrap();

    let config_toml = format!(
        r#"
[dispatcher]
core_pool_size = 2
max_pool_size = 4
queue_capacity = 8
task_timeout_ms = 5000

[cache]
capacity = 16

[resources]
root = "{}"
"#,
        temp_dir.path().display()
    );
    let config: Config = toml::from_str(&config_toml).expect("Failed to parse test config");
    let state = build_state(config).expect("Failed to wire app state");

    (build_router(state), temp_dir)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn get_with(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_miss_is_stored_and_replayed_as_hit() {
    let (app, _root) = build_app();

    let first = app.clone().oneshot(get("/images/lenna.png")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["content-type"], "image/png");
    assert_eq!(first.headers()["x-pixbox-cache"], "MISS");
    assert!(first.headers()["cache-control"]
        .to_str()
        .unwrap()
        .starts_with("public, max-age="));
    let etag = first.headers()["etag"].to_str().unwrap().to_string();
    let first_body = first.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&first_body[..], &png_bytes(64, 48)[..]);

    let second = app.oneshot(get("/images/lenna.png")).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers()["x-pixbox-cache"], "HIT");
    assert_eq!(second.headers()["etag"].to_str().unwrap(), etag);
    let second_body = second.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(first_body, second_body);
}

#[tokio::test]
async fn test_matching_etag_revalidates_from_the_cache() {
    let (app, _root) = build_app();

    let first = app.clone().oneshot(get("/images/lenna.png")).await.unwrap();
    let etag = first.headers()["etag"].to_str().unwrap().to_string();

    let response = app
        .oneshot(get_with(
            "/images/lenna.png",
            &[("if-none-match", &etag)],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(response.headers()["x-pixbox-cache"], "HIT");
    assert_eq!(response.headers()["etag"].to_str().unwrap(), etag);
    assert!(!response.headers().contains_key("content-type"));
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_no_cache_query_bypasses_the_cache() {
    let (app, _root) = build_app();

    let response = app
        .clone()
        .oneshot(get("/images/lenna.png?dnc"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.headers().contains_key("x-pixbox-cache"));
    assert_eq!(response.headers()["cache-control"], "no-cache");

    // nothing was stored, the plain read still misses
    let response = app.oneshot(get("/images/lenna.png")).await.unwrap();
    assert_eq!(response.headers()["x-pixbox-cache"], "MISS");
}

#[tokio::test]
async fn test_device_widths_get_their_own_variants() {
    let (app, _root) = build_app();

    let narrow = app
        .clone()
        .oneshot(get_with("/images/lenna.png", &[("Width", "200")]))
        .await
        .unwrap();
    assert_eq!(narrow.status(), StatusCode::OK);
    assert_eq!(narrow.headers()["x-pixbox-cache"], "MISS");
    assert!(narrow.headers()["vary"].to_str().unwrap().contains("Width"));

    let wide = app
        .clone()
        .oneshot(get_with("/images/lenna.png", &[("Width", "400")]))
        .await
        .unwrap();
    assert_eq!(wide.headers()["x-pixbox-cache"], "MISS");

    // the first width again, now served from its own entry
    let narrow_again = app
        .oneshot(get_with("/images/lenna.png", &[("Width", "200")]))
        .await
        .unwrap();
    assert_eq!(narrow_again.headers()["x-pixbox-cache"], "HIT");
}

#[tokio::test]
async fn test_crawlers_are_redirected_to_the_canonical_path() {
    let (app, _root) = build_app();

    let bot = app
        .clone()
        .oneshot(get_with(
            "/o=50/images/lenna.png",
            &[("user-agent", "Googlebot/2.1 (+http://www.google.com/bot.html)")],
        ))
        .await
        .unwrap();
    assert_eq!(bot.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(bot.headers()["location"], "/images/lenna.png");
    assert!(!bot.headers().contains_key("x-pixbox-cache"));

    // a regular client on the same path is served the image
    let browser = app
        .oneshot(get_with(
            "/o=50/images/lenna.png",
            &[("user-agent", "Mozilla/5.0 (X11; Linux x86_64)")],
        ))
        .await
        .unwrap();
    assert_eq!(browser.status(), StatusCode::OK);
    assert_eq!(browser.headers()["x-pixbox-cache"], "MISS");
}

#[tokio::test]
async fn test_concurrent_identical_requests_settle_on_one_entry() {
    let (app, _root) = build_app();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            app.oneshot(get("/o=50/images/lenna.png")).await.unwrap()
        }));
    }
    for handle in handles {
        let response = handle.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.oneshot(get("/o=50/images/lenna.png")).await.unwrap();
    assert_eq!(response.headers()["x-pixbox-cache"], "HIT");
}

#[tokio::test]
async fn test_download_marker_sets_disposition() {
    let (app, _root) = build_app();

    let response = app
        .oneshot(get("/images/lenna.png?dl=portrait.png"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-disposition"],
        "attachment; filename=\"portrait.png\""
    );
}

#[tokio::test]
async fn test_duplicate_parameter_is_a_client_error() {
    let (app, _root) = build_app();

    let response = app
        .oneshot(get("/o=50/o=50/images/lenna.png"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["code"], "INVALID_PARAMETER");
}
