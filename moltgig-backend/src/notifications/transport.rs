//! Outbound HTTP for webhook delivery

use async_trait::async_trait;

/// Sends one webhook POST and reports the HTTP status.
/// Connection-level failures are `Err`; timeouts are enforced by the caller.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        body: &str,
        headers: &[(&'static str, String)],
    ) -> Result<u16, String>;
}

pub struct HttpWebhookTransport {
    http_client: reqwest::Client,
}

impl HttpWebhookTransport {
    pub fn new() -> Result<Self, String> {
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl WebhookTransport for HttpWebhookTransport {
    async fn post(
        &self,
        url: &str,
        body: &str,
        headers: &[(&'static str, String)],
    ) -> Result<u16, String> {
        let mut request = self.http_client.post(url).body(body.to_string());
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }
        let response = request
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        Ok(response.status().as_u16())
    }
}
