//! esa.io client tests against a local mock server.

use esapub::remote::{EsaClient, PostDraft};
use esapub::{publish, PostId, PublishConfig, Publisher, RemoteError};
use mockito::{Matcher, Server};
use serde_json::json;

fn client(server: &Server) -> EsaClient {
    EsaClient::new("docs", "secret-token", None, 5)
        .unwrap()
        .with_api_root(server.url())
}

fn post_record(number: u64, name: &str) -> String {
    json!({
        "number": number,
        "name": name,
        "url": format!("https://docs.esa.io/posts/{number}"),
        "wip": true,
        "body_md": "large body",
        "revision_number": 1
    })
    .to_string()
}

#[tokio::test]
async fn create_post_wraps_the_draft_and_authenticates() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/teams/docs/posts")
        .match_header("authorization", "Bearer secret-token")
        .match_body(Matcher::PartialJson(json!({
            "post": {"name": "Hello", "body_md": "# Hi", "wip": true}
        })))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(post_record(12, "Hello"))
        .create_async()
        .await;

    let draft = PostDraft {
        name: Some("Hello".into()),
        wip: Some(true),
        body_md: "# Hi".into(),
        ..Default::default()
    };
    let post = client(&server).create_post(&draft).await.unwrap();

    mock.assert_async().await;
    assert_eq!(post.id, PostId::Number(12));
    assert_eq!(post.url, "https://docs.esa.io/posts/12");
}

#[tokio::test]
async fn patching_a_deleted_post_reports_not_found() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("PATCH", "/v1/teams/docs/posts/5")
        .with_status(404)
        .with_body(r#"{"error":"not_found"}"#)
        .create_async()
        .await;

    let err = client(&server)
        .patch_post(&PostId::Number(5), &PostDraft::default())
        .await
        .unwrap_err();

    mock.assert_async().await;
    assert!(matches!(err, RemoteError::NotFound { id } if id == "5"));
}

#[tokio::test]
async fn server_errors_carry_status_and_body() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/teams/docs/posts")
        .with_status(400)
        .with_body(r#"{"error":"bad_request","message":"name is missing"}"#)
        .create_async()
        .await;

    let err = client(&server)
        .create_post(&PostDraft::default())
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("400"), "{msg}");
    assert!(msg.contains("name is missing"), "{msg}");
}

#[tokio::test]
async fn upload_uses_policy_then_form_post() {
    let mut server = Server::new_async().await;
    let policy = server
        .mock("POST", "/v1/teams/docs/attachments/policies")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("type".into(), "image/png".into()),
            Matcher::UrlEncoded("name".into(), "fig.png".into()),
            Matcher::UrlEncoded("size".into(), "4".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "attachment": {
                    "endpoint": format!("{}/s3-upload", server.url()),
                    "url": "https://files.esa.io/uploads/fig.png"
                },
                "form": {"key": "uploads/fig.png", "acl": "public-read"}
            })
            .to_string(),
        )
        .create_async()
        .await;
    let transfer = server
        .mock("POST", "/s3-upload")
        .match_body(Matcher::Regex("uploads/fig.png".into()))
        .with_status(204)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("fig.png");
    std::fs::write(&file, b"fake").unwrap();

    let url = client(&server).upload_binary(&file).await.unwrap();

    policy.assert_async().await;
    transfer.assert_async().await;
    assert_eq!(url, "https://files.esa.io/uploads/fig.png");
}

#[tokio::test]
async fn rejected_policy_fails_the_upload() {
    let mut server = Server::new_async().await;
    let _policy = server
        .mock("POST", "/v1/teams/docs/attachments/policies")
        .match_query(Matcher::Any)
        .with_status(403)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("fig.png");
    std::fs::write(&file, b"fake").unwrap();

    let err = client(&server).upload_binary(&file).await.unwrap_err();
    assert!(matches!(err, RemoteError::Upload { stage: "policy", .. }));
}

#[tokio::test]
async fn notebook_round_trip_through_the_api() {
    let mut server = Server::new_async().await;
    let create = server
        .mock("POST", "/v1/teams/docs/posts")
        .with_status(201)
        .with_body(post_record(3, "nb"))
        .expect(1)
        .create_async()
        .await;
    let patch = server
        .mock("PATCH", "/v1/teams/docs/posts/3")
        .match_body(Matcher::PartialJson(json!({"post": {"body_md": "Plain text\n"}})))
        .with_status(200)
        .with_body(post_record(3, "nb"))
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nb.ipynb");
    std::fs::write(
        &path,
        json!({
            "cells": [{"cell_type": "markdown", "metadata": {}, "source": ["Plain text"]}],
            "metadata": {},
            "nbformat": 4,
            "nbformat_minor": 5
        })
        .to_string(),
    )
    .unwrap();

    let esa = client(&server);
    let config = PublishConfig::default();
    let first = publish(&path, &config, &esa).await.unwrap();
    let second = publish(&path, &config, &esa).await.unwrap();

    create.assert_async().await;
    patch.assert_async().await;
    assert!(!first.post.unwrap().updated);
    assert!(second.post.unwrap().updated);

    let saved = std::fs::read_to_string(&path).unwrap();
    assert!(saved.contains("\"revision_number\": 1"));
    assert!(!saved.contains("large body"));
}
