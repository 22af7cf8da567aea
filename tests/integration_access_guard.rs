use reqwest::StatusCode;
use uuid::Uuid;

mod common;

#[tokio::test]
async fn test_missing_authorization_header() {
    let app = common::TestApp::spawn().await;

    let resp = app.client.get(app.url("/auth/me")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(common::body(resp).await["error"], "Authorization header is required");
}

#[tokio::test]
async fn test_malformed_authorization_header() {
    let app = common::TestApp::spawn().await;

    for value in ["Basic dXNlcjpwYXNz", "Bearer", "token-without-scheme"] {
        let resp = app.client.get(app.url("/auth/me")).header("authorization", value).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{value}");
        assert_eq!(common::body(resp).await["error"], "Invalid authorization header format");
    }
}

#[tokio::test]
async fn test_garbage_token_is_invalid() {
    let app = common::TestApp::spawn().await;

    let resp = app.me("not.a.jwt").await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(common::body(resp).await["error"], "Invalid token");
}

#[tokio::test]
async fn test_expired_token() {
    let app = common::TestApp::spawn().await;
    let json = common::body(app.register(&common::unique_email("expired"), "password123").await).await;
    let user_id: Uuid = json["user"]["_id"].as_str().unwrap().parse().unwrap();

    let token = app.sign(&common::expired_claims(user_id));

    let resp = app.me(&token).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(common::body(resp).await["error"], "Token has expired");
}

#[tokio::test]
async fn test_refresh_token_is_not_an_access_token() {
    let app = common::TestApp::spawn().await;
    let json = common::body(app.register(&common::unique_email("confused"), "password123").await).await;

    let resp = app.me(json["refreshToken"].as_str().unwrap()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(common::body(resp).await["error"], "Invalid token");
}

#[tokio::test]
async fn test_token_for_unknown_user() {
    let app = common::TestApp::spawn().await;

    let mut claims = common::expired_claims(Uuid::new_v4());
    claims.exp = time::OffsetDateTime::now_utc().unix_timestamp() + 600;
    let token = app.sign(&claims);

    let resp = app.me(&token).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(common::body(resp).await["error"], "User not found");
}

#[tokio::test]
async fn test_me_exposes_token_id() {
    let app = common::TestApp::spawn().await;
    let email = common::unique_email("me");
    let json = common::body(app.register(&email, "password123").await).await;

    let me = common::body(app.me(json["accessToken"].as_str().unwrap()).await).await;
    assert_eq!(me["email"], email.as_str());
    assert!(me["jti"].as_str().is_some_and(|jti| jti.parse::<Uuid>().is_ok()));
    assert!(me.get("passwordHash").is_none());
    assert!(me.get("password_hash").is_none());
}
