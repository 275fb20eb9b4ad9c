use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::EmailError;
use crate::validators::parse_email;

pub const USER_WELCOME_TEMPLATE: &str = "user_welcome";
pub const VERIFICATION_CODE_TEMPLATE: &str = "verification_code";

/// Outbound mail collaborator
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        template: &str,
        data: serde_json::Value,
    ) -> Result<(), EmailError>;
}

#[derive(Clone, Debug)]
pub struct SenderAddress(String);

impl SenderAddress {
    pub fn parse(s: String) -> Result<Self, String> {
        let email = parse_email(&s).map_err(|e| e.message())?;
        Ok(Self(email))
    }

    pub fn inner(&self) -> &str {
        &self.0
    }
}

/// Mailer backed by an HTTP email API
#[derive(Clone)]
pub struct EmailClient {
    http_client: reqwest::Client,
    base_url: String,
    sender: SenderAddress,
}

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    #[serde(rename = "Subject")]
    subject: String,
    #[serde(rename = "Html")]
    html: String,
}

impl EmailClient {
    pub fn new(base_url: String, sender: SenderAddress, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            http_client,
            base_url,
            sender,
        }
    }
}

#[async_trait]
impl Mailer for EmailClient {
    async fn send(
        &self,
        recipient: &str,
        template: &str,
        data: serde_json::Value,
    ) -> Result<(), EmailError> {
        let (subject, html) = render(template, &data)?;
        let url = format!("{}/email", self.base_url);
        let request = SendEmailRequest {
            from: self.sender.inner(),
            to: recipient,
            subject,
            html,
        };

        self.http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send email: {}", e);
                EmailError::SendFailed(e.to_string())
            })?
            .error_for_status()
            .map_err(|e| {
                tracing::error!("Email service returned error: {}", e);
                EmailError::ServiceUnavailable(e.to_string())
            })?;

        tracing::info!(template = template, "Email sent");
        Ok(())
    }
}

/// Render a named template into a subject and HTML body
pub fn render(template: &str, data: &serde_json::Value) -> Result<(String, String), EmailError> {
    let code = data
        .get("activation_code")
        .and_then(|c| c.as_str())
        .unwrap_or_default();

    match template {
        USER_WELCOME_TEMPLATE => {
            let username = data
                .get("username")
                .and_then(|u| u.as_str())
                .unwrap_or("there");
            Ok((
                "Welcome!".to_string(),
                format!(
                    "<p>Hi {},</p>\
                     <p>Thanks for signing up. To activate your account, send a \
                     <code>PUT /users/activated</code> request with the following body:</p>\
                     <pre>{{\"code\": \"{}\"}}</pre>\
                     <p>This code will expire in 24 hours and can only be used once.</p>",
                    username, code
                ),
            ))
        }
        VERIFICATION_CODE_TEMPLATE => Ok((
            "Activate your account".to_string(),
            format!(
                "<p>Your new activation code is:</p>\
                 <pre>{}</pre>\
                 <p>Any earlier code is no longer valid.</p>",
                code
            ),
        )),
        other => Err(EmailError::UnknownTemplate(other.to_string())),
    }
}
