//! Transactional emails
//!
//! Sends account emails via the Resend API. Sending is best-effort: failures
//! are logged and never fail the request that triggered them.

/// Email configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Resend API key
    pub resend_api_key: String,
    /// From address for emails
    pub email_from: String,
    /// App name for branding
    pub app_name: String,
    /// Public URL of the app
    pub public_url: String,
}

impl EmailConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            resend_api_key: std::env::var("RESEND_API_KEY").unwrap_or_default(),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Blogify <noreply@localhost>".to_string()),
            app_name: std::env::var("APP_NAME").unwrap_or_else(|_| "Blogify".to_string()),
            public_url: std::env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        }
    }

    /// Check if email sending is enabled
    pub fn is_enabled(&self) -> bool {
        !self.resend_api_key.is_empty()
    }
}

/// Account email service
#[derive(Clone)]
pub struct AccountEmailService {
    config: EmailConfig,
    client: reqwest::Client,
}

impl AccountEmailService {
    /// Create a new email service
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        Self::new(EmailConfig::from_env())
    }

    /// Check if email sending is enabled
    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    /// Send an email via Resend API
    async fn send_email(&self, to: &str, subject: &str, html: &str) {
        if !self.config.is_enabled() {
            tracing::warn!("Email not configured, skipping: {}", subject);
            return;
        }

        let body = serde_json::json!({
            "from": self.config.email_from,
            "to": [to],
            "subject": subject,
            "html": html
        });

        let response = self
            .client
            .post("https://api.resend.com/emails")
            .header("Authorization", format!("Bearer {}", self.config.resend_api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(to = %to, subject = %subject, "Email sent");
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::error!(
                    status = %status,
                    body = %body,
                    "Failed to send email"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to send email");
            }
        }
    }

    /// Send the signup confirmation code
    pub async fn send_confirmation_code(&self, to: &str, code: &str) {
        let subject = format!("{} : votre code de confirmation", self.config.app_name);
        let html = confirmation_email_html(&self.config, code);
        self.send_email(to, &subject, &html).await;
    }
}

fn confirmation_email_html(config: &EmailConfig, code: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #111;">Bienvenue sur {app}</h2>
    <p>Voici votre code de confirmation :</p>
    <p style="font-size: 28px; font-weight: bold; letter-spacing: 6px; background: #f4f4f5; padding: 12px 20px; display: inline-block; border-radius: 6px;">{code}</p>
    <p>Saisissez-le sur <a href="{url}/confirm">{url}/confirm</a> pour activer votre compte.</p>
    <p style="color: #666; font-size: 14px;">Si vous n'avez pas créé de compte, ignorez cet email.</p>
</body>
</html>"#,
        app = config.app_name,
        code = code,
        url = config.public_url.trim_end_matches('/'),
    )
}
