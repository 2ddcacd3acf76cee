use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

/// Transactional mail sender.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), MailError>;
}

/// Client for a SendGrid-compatible v3 mail API.
pub struct MailApiClient {
    http: Client,
    base_url: String,
    api_key: String,
    sender_name: String,
    sender_email: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    personalizations: [Personalization<'a>; 1],
    from: Address<'a>,
    content: [Content<'a>; 1],
    tracking_settings: TrackingSettings,
}

#[derive(Serialize)]
struct Personalization<'a> {
    to: [Recipient<'a>; 1],
    subject: &'a str,
}

#[derive(Serialize)]
struct Recipient<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct Address<'a> {
    name: &'a str,
    email: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'a str,
    value: &'a str,
}

#[derive(Serialize)]
struct TrackingSettings {
    click_tracking: TrackingFlag,
    open_tracking: TrackingFlag,
    subscription_tracking: TrackingFlag,
}

#[derive(Serialize)]
struct TrackingFlag {
    enable: bool,
}

impl MailApiClient {
    pub fn new(base_url: &str, api_key: &str, sender_name: &str, sender_email: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            sender_name: sender_name.to_string(),
            sender_email: sender_email.to_string(),
        }
    }

    // All provider tracking is off; links and the unsubscribe footer reach
    // recipients exactly as composed.
    fn build_request<'a>(&'a self, to: &'a str, subject: &'a str, html: &'a str) -> SendRequest<'a> {
        SendRequest {
            personalizations: [Personalization {
                to: [Recipient { email: to }],
                subject,
            }],
            from: Address {
                name: &self.sender_name,
                email: &self.sender_email,
            },
            content: [Content {
                content_type: "text/html",
                value: html,
            }],
            tracking_settings: TrackingSettings {
                click_tracking: TrackingFlag { enable: false },
                open_tracking: TrackingFlag { enable: false },
                subscription_tracking: TrackingFlag { enable: false },
            },
        }
    }
}

#[async_trait]
impl Mailer for MailApiClient {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), MailError> {
        let to = to.trim();
        let body = self.build_request(to, subject, html);
        let response = self
            .http
            .post(format!("{}/v3/mail/send", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(MailError::Api {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("mail API returned {status}: {body}")]
    Api { status: u16, body: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_request_wire_shape() {
        let client = MailApiClient::new(
            "https://api.sendgrid.com",
            "key",
            "Newsletter",
            "news@example.com",
        );
        let request = client.build_request("user@example.com", "August update", "<p>Hi</p>");
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(
            value["personalizations"][0]["to"][0]["email"],
            "user@example.com"
        );
        assert_eq!(value["personalizations"][0]["subject"], "August update");
        assert_eq!(value["from"]["name"], "Newsletter");
        assert_eq!(value["from"]["email"], "news@example.com");
        assert_eq!(value["content"][0]["type"], "text/html");
        assert_eq!(value["content"][0]["value"], "<p>Hi</p>");
        assert_eq!(
            value["tracking_settings"]["click_tracking"]["enable"],
            false
        );
        assert_eq!(value["tracking_settings"]["open_tracking"]["enable"], false);
        assert_eq!(
            value["tracking_settings"]["subscription_tracking"]["enable"],
            false
        );
    }
}
