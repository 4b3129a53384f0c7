use serde_json::{Value, json};
use tracing::{debug, warn};

/// Transactional email templates. The data map supplies the placeholders;
/// the subject line is fixed per template.
#[derive(Debug, Clone, Copy)]
pub enum Template {
    OrderConfirmation,
    WinnerNotification,
    DrawResult,
    CompetitionCancelled,
}

impl Template {
    pub fn id(self) -> &'static str {
        match self {
            Template::OrderConfirmation => "order-confirmation",
            Template::WinnerNotification => "winner-notification",
            Template::DrawResult => "draw-result",
            Template::CompetitionCancelled => "competition-cancelled",
        }
    }

    fn subject(self) -> &'static str {
        match self {
            Template::OrderConfirmation => "Your entry is confirmed",
            Template::WinnerNotification => "You won!",
            Template::DrawResult => "The winner has been drawn",
            Template::CompetitionCancelled => "Competition cancelled and refunded",
        }
    }
}

/// Fire-and-forget email sender over the Resend HTTP API.
///
/// Send failures are logged and swallowed; a draw or cancellation must never
/// roll back because an email bounced. With no API key configured the mailer
/// only logs, which is what tests and local runs want.
#[derive(Debug, Clone)]
pub struct Mailer {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    from: String,
}

impl Mailer {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            api_key: api_key.into(),
            from: from.into(),
        }
    }

    pub async fn send(&self, to: &str, template: Template, data: Value) {
        if self.api_key.is_empty() {
            debug!("Mailer disabled, skipping {} to {to}", template.id());
            return;
        }

        let body = json!({
            "from": self.from,
            "to": [to],
            "subject": template.subject(),
            "text": format!("template={} data={data}", template.id()),
        });

        let result = self
            .http
            .post(format!("{}/emails", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(_) => debug!("Sent {} to {to}", template.id()),
            Err(e) => warn!("Failed to send {} to {to}: {e}", template.id()),
        }
    }
}
