//! End-to-end tests: client → proxy → mock origin.

use axum::http::StatusCode;
use policy_admin_sdk::AdminClient;

mod common;

#[tokio::test]
async fn test_unapproved_domain_is_denied() {
    let dir = tempfile::tempdir().unwrap();
    let backend = common::start_mock_backend("text/html", "<h1>hello</h1>").await;
    let (proxy, _shutdown) = common::start_proxy(common::test_config(&dir.path().join("db.json"))).await;

    let res = common::proxied_client(&proxy)
        .get(format!("http://{}/", backend))
        .send()
        .await
        .expect("Proxy unreachable");

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(res.text().await.unwrap(), "Unauthorized request!");
}

#[tokio::test]
async fn test_approved_domain_is_forwarded() {
    let dir = tempfile::tempdir().unwrap();
    let backend = common::start_mock_backend("text/html", "<h1>hello</h1>").await;
    let (proxy, _shutdown) = common::start_proxy(common::test_config(&dir.path().join("db.json"))).await;

    let admin = AdminClient::new(&proxy).unwrap();
    admin.add_domain("127.0.0.1").await.unwrap();

    let res = common::proxied_client(&proxy)
        .get(format!("http://{}/page", backend))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.text().await.unwrap(), "<h1>hello</h1>");
}

#[tokio::test]
async fn test_content_rules_filter_responses() {
    let dir = tempfile::tempdir().unwrap();
    let html = common::start_mock_backend("text/html; charset=utf-8", "<p>ok</p>").await;
    let png = common::start_mock_backend("image/png", "PNG").await;
    let untyped = common::start_mock_backend("", "raw").await;
    let (proxy, _shutdown) = common::start_proxy(common::test_config(&dir.path().join("db.json"))).await;

    let admin = AdminClient::new(&proxy).unwrap();
    admin.add_domain("127.0.0.1").await.unwrap();
    admin.add_content("127.0.0.1", "text").await.unwrap();

    let client = common::proxied_client(&proxy);

    let res = client.get(format!("http://{}/", html)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "<p>ok</p>");

    let res = client.get(format!("http://{}/logo.png", png)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(res.text().await.unwrap(), "Unauthorized request!");

    // No Content-Type header means nothing to filter on.
    let res = client.get(format!("http://{}/", untyped)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    admin.add_content("127.0.0.1", "image").await.unwrap();
    let res = client.get(format!("http://{}/logo.png", png)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_removing_allow_list_module_admits_everything() {
    let dir = tempfile::tempdir().unwrap();
    let backend = common::start_mock_backend("text/plain", "open").await;
    let (proxy, _shutdown) = common::start_proxy(common::test_config(&dir.path().join("db.json"))).await;
    let client = common::proxied_client(&proxy);

    let res = client.get(format!("http://{}/", backend)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let admin = AdminClient::new(&proxy).unwrap();
    admin.remove_plugin("allow_list").await.unwrap();
    let ordering = admin.plugins().await.unwrap();
    assert!(!ordering.request_modules.iter().any(|id| id == "allow_list"));

    let res = client.get(format!("http://{}/", backend)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "open");
}

#[tokio::test]
async fn test_admin_host_is_never_forwarded() {
    let dir = tempfile::tempdir().unwrap();
    let (proxy, _shutdown) = common::start_proxy(common::test_config(&dir.path().join("db.json"))).await;

    let res = common::proxied_client(&proxy)
        .get("http://settings.it/index.html")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unreachable_origin_is_bad_gateway() {
    let dir = tempfile::tempdir().unwrap();
    let (proxy, _shutdown) = common::start_proxy(common::test_config(&dir.path().join("db.json"))).await;

    // Bind then drop to get a port nobody listens on.
    let closed = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();

    let admin = AdminClient::new(&proxy).unwrap();
    admin.add_domain("127.0.0.1").await.unwrap();

    let res = common::proxied_client(&proxy)
        .get(format!("http://{}/", closed))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
}
