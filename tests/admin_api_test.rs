//! Administrative API through the proxy, driven by the admin SDK.

use axum::http::StatusCode;
use policy_admin_sdk::{AdminClient, ContentRule};

mod common;

#[tokio::test]
async fn test_domain_crud() {
    let dir = tempfile::tempdir().unwrap();
    let (proxy, _shutdown) = common::start_proxy(common::test_config(&dir.path().join("db.json"))).await;
    let admin = AdminClient::new(&proxy).unwrap();

    assert!(admin.domains().await.unwrap().is_empty());
    assert_eq!(admin.add_domain("Example.COM").await.unwrap(), "Domain added successfully");
    admin.add_domain("foo.org").await.unwrap();
    assert_eq!(admin.domains().await.unwrap(), vec!["example.com", "foo.org"]);

    let err = admin.add_domain("example.com").await.unwrap_err();
    assert!(err.to_string().contains("Domain already exists"));

    assert_eq!(admin.remove_domain("example.com").await.unwrap(), vec!["foo.org"]);
}

#[tokio::test]
async fn test_rules_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("db.json");

    {
        let (proxy, shutdown) = common::start_proxy(common::test_config(&store)).await;
        let admin = AdminClient::new(&proxy).unwrap();
        admin.add_domain("example.com").await.unwrap();
        admin.add_content("example.com", "text").await.unwrap();
        admin
            .set_plugins(None, Some(vec![]))
            .await
            .unwrap();
        shutdown.trigger();
    }

    let (proxy, _shutdown) = common::start_proxy(common::test_config(&store)).await;
    let admin = AdminClient::new(&proxy).unwrap();
    assert_eq!(admin.domains().await.unwrap(), vec!["example.com"]);
    assert_eq!(
        admin.content_rules().await.unwrap(),
        vec![ContentRule {
            domain_name: "example.com".to_string(),
            content_types: vec!["text".to_string()],
        }]
    );
    assert!(admin.plugins().await.unwrap().response_modules.is_empty());
}

#[tokio::test]
async fn test_content_delete_cascades() {
    let dir = tempfile::tempdir().unwrap();
    let (proxy, _shutdown) = common::start_proxy(common::test_config(&dir.path().join("db.json"))).await;
    let admin = AdminClient::new(&proxy).unwrap();

    admin.add_content("a.com", "text").await.unwrap();
    admin.add_content("a.com", "image").await.unwrap();
    admin.remove_content("a.com", "text").await.unwrap();
    assert_eq!(admin.content_rules().await.unwrap()[0].content_types, vec!["image"]);

    admin.remove_content("a.com", "image").await.unwrap();
    assert!(admin.content_rules().await.unwrap().is_empty());

    let err = admin.remove_content("a.com", "image").await.unwrap_err();
    assert!(err.to_string().contains("Content not found"));
}

#[tokio::test]
async fn test_invalid_plugin_ordering_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (proxy, _shutdown) = common::start_proxy(common::test_config(&dir.path().join("db.json"))).await;
    let admin = AdminClient::new(&proxy).unwrap();
    let before = admin.plugins().await.unwrap();

    let err = admin
        .set_plugins(Some(vec!["plugins_management".into(), "evil".into()]), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Unknown module: evil"));
    assert_eq!(admin.plugins().await.unwrap(), before);

    let res = common::proxied_client(&proxy)
        .post("http://settings.it/api/plugins")
        .body("filename=\"evil.py\"")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_register_login_check() {
    let dir = tempfile::tempdir().unwrap();
    let (proxy, _shutdown) = common::start_proxy(common::test_config(&dir.path().join("db.json"))).await;
    let admin = AdminClient::new(&proxy).unwrap();

    assert!(!admin.any_user().await.unwrap());
    assert!(!admin.check().await.unwrap());

    admin.register("alice", "secret").await.unwrap();
    assert!(admin.any_user().await.unwrap());
    assert!(admin.login("alice", "wrong").await.is_err());

    admin.login("alice", "secret").await.unwrap();
    assert!(admin.session().is_some());
    assert!(admin.check().await.unwrap());
}

#[tokio::test]
async fn test_require_session_gates_admin_api() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::test_config(&dir.path().join("db.json"));
    config.admin.require_session = true;
    let (proxy, _shutdown) = common::start_proxy(config).await;
    let admin = AdminClient::new(&proxy).unwrap();

    let err = admin.domains().await.unwrap_err();
    assert!(err.to_string().contains("403"));

    admin.register("alice", "secret").await.unwrap();
    admin.login("alice", "secret").await.unwrap();
    assert!(admin.domains().await.unwrap().is_empty());
}
