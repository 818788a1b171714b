use serde_json::json;
use vk_wall_lib::{Thresholds, WallClient, WallError, WallParams, WallPost};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn params() -> WallParams {
    WallParams::new("test-token", -1, "5.103")
        .filter("owner")
        .offset(0)
        .count(100)
}

async fn serve_items(items: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wall.get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {"count": 1000, "items": items}
        })))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn fetch_posts_sends_query_and_projects_items() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wall.get"))
        .and(query_param("access_token", "test-token"))
        .and(query_param("owner_id", "-1"))
        .and(query_param("v", "5.103"))
        .and(query_param("filter", "owner"))
        .and(query_param("offset", "0"))
        .and(query_param("count", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {
                "count": 2,
                "items": [
                    {"id": 1, "text": "hello", "likes": {"count": 5}, "reposts": {"count": 2}},
                    {"id": 2, "date": 1580000000, "text": "repost",
                     "likes": {"count": 50}, "reposts": {"count": 20},
                     "copy_history": [{"id": 3}]}
                ]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = WallClient::with_base_url(server.uri());
    let posts = client
        .fetch_posts(&params(), Thresholds::default())
        .await
        .expect("fetch should succeed");

    assert_eq!(
        posts,
        vec![WallPost {
            id: 1,
            date: None,
            text: "hello".to_string(),
            likes_count: 5,
            reposts_count: 2,
            views_count: None,
        }]
    );
}

#[tokio::test]
async fn invalid_params_make_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = WallClient::with_base_url(server.uri());
    let cases = [
        WallParams::new("", -1, "5.103"),
        WallParams::new("test-token", 0, "5.103"),
        WallParams::new("test-token", -1, ""),
    ];

    for params in &cases {
        let err = client
            .fetch_posts(params, Thresholds::default())
            .await
            .unwrap_err();
        assert!(err.is_validation(), "unexpected error: {err}");
    }
}

#[tokio::test]
async fn empty_items_is_empty_result() {
    let server = serve_items(json!([])).await;
    let client = WallClient::with_base_url(server.uri());

    let err = client
        .fetch_posts(&params(), Thresholds::default())
        .await
        .unwrap_err();
    assert!(matches!(err, WallError::EmptyResult));
}

#[tokio::test]
async fn missing_response_is_empty_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wall.get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    let client = WallClient::with_base_url(server.uri());

    let err = client.fetch_texts(&params(), 0).await.unwrap_err();
    assert!(matches!(err, WallError::EmptyResult));
}

#[tokio::test]
async fn nothing_qualifying_is_empty_vec() {
    let server = serve_items(json!([
        {"id": 1, "text": "quiet", "likes": {"count": 1}, "reposts": {"count": 1}}
    ]))
    .await;
    let client = WallClient::with_base_url(server.uri());

    let posts = client
        .fetch_posts(&params(), Thresholds::new(10, 0))
        .await
        .expect("fetch should succeed");
    assert!(posts.is_empty());
}

#[tokio::test]
async fn server_error_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wall.get"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let client = WallClient::with_base_url(server.uri());

    let err = client
        .fetch_posts(&params(), Thresholds::default())
        .await
        .unwrap_err();
    assert!(matches!(err, WallError::Transport(_)));
    assert_eq!(err.status(), Some(reqwest::StatusCode::SERVICE_UNAVAILABLE));
    assert!(!err.to_string().contains("test-token"));
}

#[tokio::test]
async fn api_error_body_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wall.get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": {"error_code": 5, "error_msg": "User authorization failed: invalid access_token"}
        })))
        .mount(&server)
        .await;
    let client = WallClient::with_base_url(server.uri());

    let err = client
        .fetch_posts(&params(), Thresholds::default())
        .await
        .unwrap_err();
    match err {
        WallError::Api { code, message } => {
            assert_eq!(code, 5);
            assert!(message.starts_with("User authorization failed"));
        }
        other => panic!("expected API error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wall.get"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;
    let client = WallClient::with_base_url(server.uri());

    let err = client
        .fetch_posts(&params(), Thresholds::default())
        .await
        .unwrap_err();
    assert!(matches!(err, WallError::Decode(_)));
}

#[tokio::test]
async fn fetch_texts_applies_like_threshold_only() {
    let server = serve_items(json!([
        {"id": 1, "text": "popular", "likes": {"count": 40}},
        {"id": 2, "text": "ignored", "likes": {"count": 3}, "reposts": {"count": 30}},
        {"id": 3, "text": "", "likes": {"count": 99}}
    ]))
    .await;
    let client = WallClient::with_base_url(format!("{}/", server.uri()));

    let texts = client
        .fetch_texts(&params(), 3)
        .await
        .expect("fetch should succeed");
    assert_eq!(texts, vec!["popular".to_string()]);
}

#[tokio::test]
async fn connection_failure_is_transport_error() {
    // Nothing listens on a port we just released.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = WallClient::with_base_url(format!("http://{addr}"));
    let err = client
        .fetch_posts(&params(), Thresholds::default())
        .await
        .unwrap_err();
    assert!(matches!(err, WallError::Transport(_)));
    assert_eq!(err.status(), None);
    assert!(std::error::Error::source(&err).is_none());
    assert!(!err.to_string().contains("test-token"));
}

#[tokio::test]
async fn custom_reqwest_client_is_used() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wall.get"))
        .and(wiremock::matchers::header("user-agent", "vk-wall-tests"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {"items": [
                {"id": 4, "text": "hi", "likes": {"count": 0}, "reposts": {"count": 0}}
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let http = reqwest::Client::builder()
        .user_agent("vk-wall-tests")
        .build()
        .unwrap();
    let client = WallClient::with_base_url(server.uri()).with_client(http);

    let posts = client
        .fetch_posts(&params(), Thresholds::new(-1, -1))
        .await
        .expect("fetch should succeed");
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].id, 4);
}

#[tokio::test]
async fn convenience_fetches_validate_before_requesting() {
    let params = WallParams::new("", -1, "5.103");

    let err = vk_wall_lib::fetch_wall(&params, Thresholds::default())
        .await
        .unwrap_err();
    assert!(matches!(err, WallError::MissingParameter("access_token")));

    let err = vk_wall_lib::fetch_wall_texts(&params, 0).await.unwrap_err();
    assert!(err.is_validation());
}
