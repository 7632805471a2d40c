//! Shared test infrastructure for authgate integration tests.
//!
//! A single shared tokio runtime runs one Axum server backed by the memory
//! store. A wiremock server stands in for the identity providers:
//! `custom-google` answers with a fixed profile, `github` fails the code
//! exchange.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

pub use reqwest::{Client, StatusCode};
pub use serde_json;

use authgate_api::AppState;
use authgate_core::Gateway;
use authgate_core::config::Config;
use authgate_core::store::MemoryTokenStore;
use authgate_core::token::TokenCodec;
use tokio::net::TcpListener;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN_SECRET: &str = "token-secret-123";
pub const PUBLIC_URL: &str = "https://api-id.execute-api.eu-west-1.amazonaws.com/dev";
pub const CLIENT_URL: &str = "http://127.0.0.1:3000/";
pub const STATE_COOKIE: &str = "authgate_state";

/// Identity id for `custom-google` / `user-id-1` under [`TOKEN_SECRET`].
pub const IDENTITY_ID: &str = "46344f93c18d9b70ddef7cc5c24886451a0af124f74d84a0c89387b5f7c70ff4";

static RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
static SERVER: OnceLock<TestServer> = OnceLock::new();

pub fn runtime() -> &'static tokio::runtime::Runtime {
    RT.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("failed to create tokio runtime")
    })
}

pub fn server() -> &'static TestServer {
    SERVER.get_or_init(|| runtime().block_on(TestServer::init()))
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<MemoryTokenStore>,
    pub codec: TokenCodec,
    pub provider: MockServer,
}

impl TestServer {
    async fn init() -> Self {
        let provider = MockServer::start().await;
        mount_providers(&provider).await;

        let config = test_config(&provider.uri());
        config.validate().expect("test config must validate");

        let store = Arc::new(MemoryTokenStore::default());
        let gateway = Gateway::new(&config, store.clone()).expect("failed to build gateway");
        let codec = TokenCodec::from_config(&config.tokens).expect("failed to build codec");
        let app = authgate_api::app(AppState::new(config, gateway));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            addr,
            store,
            codec,
            provider,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Fresh reqwest client that never follows redirects.
    pub fn client(&self) -> Client {
        Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    /// Run a signin for `provider` and return the `Location` plus the
    /// `name=value` pair of the state cookie.
    pub async fn signin(&self, client: &Client, provider: &str) -> (String, String) {
        let resp = client
            .get(self.url(&format!("/authentication/signin/{provider}")))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);

        let location = header(&resp, "location");
        let cookie = resp
            .headers()
            .get_all("set-cookie")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with(&format!("{STATE_COOKIE}=")))
            .and_then(|v| v.split(';').next())
            .expect("signin must set the state cookie")
            .to_string();
        (location, cookie)
    }
}

pub fn header(resp: &reqwest::Response, name: &str) -> String {
    resp.headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing {name} header"))
        .to_str()
        .unwrap()
        .to_string()
}

/// The `state` query value of a provider authorization URL.
pub fn state_of(location: &str) -> String {
    location
        .rsplit_once("&state=")
        .map(|(_, state)| state.to_string())
        .expect("authorization URL must carry state")
}

fn test_config(provider_base: &str) -> Config {
    let toml = format!(
        r#"
[server]
host = "127.0.0.1"
port = 0
public_url = "{PUBLIC_URL}"
client_redirect_uri = "{CLIENT_URL}"

[tokens]
token_secret = "{TOKEN_SECRET}"

[providers]
http_timeout_secs = 5

[[providers.entries]]
id = "custom-google"
client_id = "cg-mock-id"
client_secret = "cg-mock-secret"
token_url = "{provider_base}/oauth2/v4/token"
profile_url = "{provider_base}/plus/v1/people/me"

[[providers.entries]]
id = "github"
client_id = "gh-mock-id"
client_secret = "gh-mock-secret"
token_url = "{provider_base}/login/oauth/access_token"
profile_url = "{provider_base}/user"
"#
    );
    toml::from_str(&toml).expect("failed to parse test config")
}

async fn mount_providers(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth2/v4/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "access-token-123",
            "token_type": "Bearer"
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/plus/v1/people/me"))
        .and(query_param("access_token", "access-token-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "user-id-1",
            "displayName": "Eetu Tuomala",
            "emails": [{ "value": "email@test.com" }],
            "image": { "url": "https://avatars3.githubusercontent.com/u/4726921?v=3&s=460" }
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .respond_with(ResponseTemplate::new(500).set_body_string("bad_verification_code"))
        .mount(server)
        .await;
}
