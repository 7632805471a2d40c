mod common;
use common::*;

use authgate_core::store::RefreshTokenStore;
use authgate_core::token::hash_token;
use regex::Regex;

#[test]
fn health_check() {
    let s = server();
    runtime().block_on(async {
        let resp = s.client().get(s.url("/health")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());
        assert_eq!(body["providers"], 2);
        assert_eq!(body["store"], "memory");
    });
}

#[test]
fn signin_redirects_to_provider() {
    let s = server();
    runtime().block_on(async {
        let client = s.client();
        let (location, cookie) = s.signin(&client, "custom-google").await;

        let expected = Regex::new(
            r"^https://accounts\.google\.com/o/oauth2/v2/auth\?client_id=cg-mock-id&redirect_uri=https://api-id\.execute-api\.eu-west-1\.amazonaws\.com/dev/authentication/callback/custom-google&response_type=code&scope=profile email&state=[A-Fa-f0-9]{64}$",
        )
        .unwrap();
        assert!(expected.is_match(&location), "unexpected location: {location}");
        assert!(!location.contains("cg-mock-secret"));
        assert!(!location.contains(TOKEN_SECRET));

        assert_eq!(cookie, format!("{STATE_COOKIE}={}", state_of(&location)));
    });
}

#[test]
fn signin_state_differs_per_request() {
    let s = server();
    runtime().block_on(async {
        let client = s.client();
        let (first, _) = s.signin(&client, "custom-google").await;
        let (second, _) = s.signin(&client, "custom-google").await;
        assert_ne!(state_of(&first), state_of(&second));
    });
}

#[test]
fn signin_unknown_provider() {
    let s = server();
    runtime().block_on(async {
        let resp = s
            .client()
            .get(s.url("/authentication/signin/myspace"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "unknown_provider");
    });
}

#[test]
fn full_signin_callback_and_refresh() {
    let s = server();
    runtime().block_on(async {
        let client = s.client();
        let (location, cookie) = s.signin(&client, "custom-google").await;
        let state = state_of(&location);

        // Callback
        let resp = client
            .get(s.url("/authentication/callback/custom-google"))
            .query(&[("code", "code"), ("state", state.as_str())])
            .header("cookie", &cookie)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(header(&resp, "cache-control"), "no-store");

        let location = header(&resp, "location");
        let expected = Regex::new(
            r"^http://127\.0\.0\.1:3000/\?authorization_token=([A-Za-z0-9\-_]+\.[A-Za-z0-9\-_]+\.[A-Za-z0-9\-_]+)&refresh_token=([A-Fa-f0-9]{64})$",
        )
        .unwrap();
        let captures = expected
            .captures(&location)
            .unwrap_or_else(|| panic!("unexpected location: {location}"));
        let authorization_token = captures[1].to_string();
        let refresh_token = captures[2].to_string();

        let claims = s.codec.verify_authorization_token(&authorization_token).unwrap();
        assert_eq!(claims.id, IDENTITY_ID);
        assert_eq!(claims.provider, "custom-google");
        assert!(!location.contains("cg-mock-secret"));

        // The state cookie is cleared on callback
        let cleared = resp
            .headers()
            .get_all("set-cookie")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.starts_with(&format!("{STATE_COOKIE}=;")));
        assert!(cleared, "state cookie must be removed");

        // Refresh
        let resp = client
            .post(s.url("/authentication/refresh"))
            .json(&serde_json::json!({ "refresh_token": refresh_token, "stage": "dev" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = resp.json().await.unwrap();

        let refreshed_authorization = body["authorization_token"].as_str().unwrap();
        let rotated = body["refresh_token"].as_str().unwrap().to_string();
        let claims = s.codec.verify_authorization_token(refreshed_authorization).unwrap();
        assert_eq!(claims.id, IDENTITY_ID);
        assert_eq!(claims.provider, "custom-google");
        assert!(Regex::new(r"^[A-Fa-f0-9]{64}$").unwrap().is_match(&rotated));
        assert_ne!(rotated, refresh_token);

        // The consumed token is gone, the rotated one is live
        assert!(s.store.find(&hash_token(&refresh_token)).await.unwrap().is_none());
        assert!(s.store.find(&hash_token(&rotated)).await.unwrap().is_some());

        let resp = client
            .post(s.url("/authentication/refresh"))
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    });
}

#[test]
fn callback_without_state_cookie_fails() {
    let s = server();
    runtime().block_on(async {
        let client = s.client();
        let (location, _) = s.signin(&client, "custom-google").await;

        let resp = client
            .get(s.url("/authentication/callback/custom-google"))
            .query(&[("code", "code"), ("state", state_of(&location).as_str())])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            header(&resp, "location"),
            "http://127.0.0.1:3000/?error=authentication_failed"
        );
    });
}

#[test]
fn callback_with_foreign_state_fails() {
    let s = server();
    runtime().block_on(async {
        let client = s.client();
        let (_, cookie) = s.signin(&client, "custom-google").await;
        let (other, _) = s.signin(&client, "custom-google").await;

        let resp = client
            .get(s.url("/authentication/callback/custom-google"))
            .query(&[("code", "code"), ("state", state_of(&other).as_str())])
            .header("cookie", &cookie)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            header(&resp, "location"),
            "http://127.0.0.1:3000/?error=authentication_failed"
        );
    });
}

#[test]
fn callback_without_code_fails() {
    let s = server();
    runtime().block_on(async {
        let client = s.client();
        let (location, cookie) = s.signin(&client, "custom-google").await;

        let resp = client
            .get(s.url("/authentication/callback/custom-google"))
            .query(&[("state", state_of(&location).as_str())])
            .header("cookie", &cookie)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            header(&resp, "location"),
            "http://127.0.0.1:3000/?error=authentication_failed"
        );
    });
}

#[test]
fn callback_provider_failure_redirects_with_error() {
    let s = server();
    runtime().block_on(async {
        let client = s.client();
        let (location, cookie) = s.signin(&client, "github").await;

        let resp = client
            .get(s.url("/authentication/callback/github"))
            .query(&[("code", "bad-code"), ("state", state_of(&location).as_str())])
            .header("cookie", &cookie)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);

        let location = header(&resp, "location");
        assert_eq!(location, "http://127.0.0.1:3000/?error=authentication_failed");
        assert!(!location.contains("bad_verification_code"));
    });
}

#[test]
fn refresh_unknown_token_is_unauthorized() {
    let s = server();
    runtime().block_on(async {
        let resp = s
            .client()
            .post(s.url("/authentication/refresh"))
            .json(&serde_json::json!({ "refresh_token": "0".repeat(64) }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "unknown_refresh_token");
    });
}

#[test]
fn refresh_requires_json_body() {
    let s = server();
    runtime().block_on(async {
        let resp = s
            .client()
            .post(s.url("/authentication/refresh"))
            .header("content-type", "application/json")
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "bad_request");
    });
}
