//! Shared harness: the real server on a random port, backed by the
//! in-memory store and a mailer that records instead of sending.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ocm_auth::auth::TokenService;
use ocm_auth::configuration::{
    ApplicationSettings, BanSettings, DatabaseSettings, EmailSettings, JwtSettings, Settings,
    StorageSettings, VerificationSettings,
};
use ocm_auth::email_client::Mailer;
use ocm_auth::error::EmailError;
use ocm_auth::startup::{run, AppState};
use ocm_auth::store::MemoryStore;

pub const PASSWORD: &str = "correcthorse1";

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub recipient: String,
    pub template: String,
    pub data: Value,
}

/// Mailer that keeps every message, or fails every send when `failing`
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentEmail>>,
    failing: bool,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, recipient: &str, template: &str, data: Value) -> Result<(), EmailError> {
        if self.failing {
            return Err(EmailError::ServiceUnavailable("mailer is down".to_string()));
        }
        self.sent.lock().unwrap().push(SentEmail {
            recipient: recipient.to_string(),
            template: template.to_string(),
            data,
        });
        Ok(())
    }
}

pub struct TestApp {
    pub address: String,
    pub store: MemoryStore,
    pub mailer: Arc<RecordingMailer>,
    pub tokens: Arc<TokenService>,
    pub client: reqwest::Client,
}

pub fn test_settings() -> Settings {
    Settings {
        application: ApplicationSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        database: DatabaseSettings {
            username: "postgres".to_string(),
            password: "password".to_string(),
            port: 5432,
            host: "localhost".to_string(),
            database_name: "unused".to_string(),
        },
        jwt: JwtSettings {
            secret: "integration-test-secret-0123456789abcdef".to_string(),
            access_token_expiry: 86_400,
            refresh_token_expiry: 604_800,
            issuer: "ocm_auth".to_string(),
        },
        verification: VerificationSettings { code_ttl: 86_400 },
        storage: StorageSettings {
            query_timeout_ms: 3_000,
        },
        email: EmailSettings {
            base_url: "http://127.0.0.1:1".to_string(),
            sender: "no-reply@example.com".to_string(),
            timeout_ms: 1_000,
        },
        bans: BanSettings {
            sweep_interval: 3_600,
        },
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with_mailer(RecordingMailer::default()).await
}

pub async fn spawn_app_with_mailer(mailer: RecordingMailer) -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    let settings = test_settings();
    let store = MemoryStore::new();
    let mailer = Arc::new(mailer);
    let tokens = Arc::new(TokenService::new(&settings.jwt));

    let state = AppState {
        tokens: tokens.clone(),
        users: Arc::new(store.clone()),
        verifications: Arc::new(store.clone()),
        mailer: mailer.clone(),
        settings: Arc::new(settings),
    };

    let server = run(listener, state).expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        store,
        mailer,
        tokens,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn register(&self, username: &str, email: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url("/users"))
            .json(&json!({ "username": username, "email": email, "password": password }))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn login(&self, body: Value) -> reqwest::Response {
        self.client
            .post(self.url("/tokens/authentication"))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    /// Log in and return `(access_token, refresh_token)`
    pub async fn login_tokens(&self, username: &str, password: &str) -> (String, String) {
        let response = self
            .login(json!({ "username": username, "password": password }))
            .await;
        assert_eq!(201, response.status().as_u16());

        let body: Value = response.json().await.expect("Failed to parse response");
        (
            body["access_token"].as_str().unwrap().to_string(),
            body["refresh_token"].as_str().unwrap().to_string(),
        )
    }

    pub async fn get_with_token(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn post_with_token(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn activate(&self, code: &str) -> reqwest::Response {
        self.client
            .put(self.url("/users/activated"))
            .json(&json!({ "code": code }))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    /// Wait for the background mailer to deliver `count` messages
    pub async fn wait_for_emails(&self, count: usize) -> Vec<SentEmail> {
        for _ in 0..100 {
            let sent = self.mailer.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("Expected {} emails, got {}", count, self.mailer.sent().len());
    }

    /// Activation code from the most recent email to `recipient`, once at
    /// least `min_emails` messages have gone out in total
    pub async fn activation_code_for(&self, recipient: &str, min_emails: usize) -> String {
        for _ in 0..100 {
            let sent = self.wait_for_emails(min_emails).await;
            let code = sent
                .iter()
                .rev()
                .find(|email| email.recipient == recipient)
                .and_then(|email| email.data["activation_code"].as_str())
                .map(str::to_string);
            if let Some(code) = code {
                return code;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("No activation code sent to {}", recipient);
    }
}
