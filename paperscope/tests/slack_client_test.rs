use mockito::Matcher;
use paperscope::slack::{MessageSink, SlackClient};
use paperscope::types::DeliveryError;
use serde_json::json;

fn client(server: &mockito::ServerGuard) -> SlackClient {
    let config = common::SlackConfig {
        api_url: server.url(),
        ..Default::default()
    };
    SlackClient::new(&config, "xoxb-test", "C0123456").expect("client")
}

#[tokio::test]
async fn test_post_message_disables_unfurling() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/chat.postMessage")
        .match_header("authorization", "Bearer xoxb-test")
        .match_body(Matcher::Json(json!({
            "channel": "C0123456",
            "text": "*:newspaper: Digest*",
            "unfurl_links": false,
            "unfurl_media": false
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ok": true, "channel": "C0123456", "ts": "1700000000.000100"}"#)
        .create_async()
        .await;

    client(&server)
        .post_message("*:newspaper: Digest*")
        .await
        .expect("post");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_ok_false_is_a_delivery_error() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/chat.postMessage")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ok": false, "error": "channel_not_found"}"#)
        .create_async()
        .await;

    let err = client(&server).post_message("hi").await.unwrap_err();

    assert!(matches!(err, DeliveryError::Api(ref code) if code == "channel_not_found"));
}

#[tokio::test]
async fn test_http_error_is_a_delivery_error() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/chat.postMessage")
        .with_status(500)
        .with_body("upstream failure")
        .create_async()
        .await;

    let err = client(&server).post_message("hi").await.unwrap_err();

    match err {
        DeliveryError::Status { status, body } => {
            assert_eq!(status.as_u16(), 500);
            assert_eq!(body, "upstream failure");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_auth_check_returns_bot_user() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/auth.test")
        .match_header("authorization", "Bearer xoxb-test")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ok": true, "user": "paperbot", "team": "Astro"}"#)
        .create_async()
        .await;

    let user = client(&server).check_auth().await.expect("auth");
    assert_eq!(user, "paperbot");

    mock.assert_async().await;
}
