use std::time;

use async_trait::async_trait;
use http::StatusCode;
use reqwest::header;
use serde::Deserialize;
use url::Url;

use crate::error::NotifierError;
use crate::render::RenderedMessage;

/// Posts a rendered message somewhere people will read it.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `message` and return the id the destination gave it.
    async fn send(&self, message: &RenderedMessage) -> Result<String, NotifierError>;
}

/// Executes a Discord webhook with `?wait=true`, so the response carries the created message.
pub struct DiscordWebhookNotifier {
    url: Url,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct WebhookMessage {
    id: String,
}

impl DiscordWebhookNotifier {
    pub fn new(webhook_url: &str, request_timeout: time::Duration) -> Result<Self, NotifierError> {
        let mut url = Url::parse(webhook_url)?;
        url.query_pairs_mut().append_pair("wait", "true");

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("Lap Record Worker")
            .timeout(request_timeout)
            .build()
            .map_err(NotifierError::ClientError)?;

        Ok(Self { url, client })
    }
}

#[async_trait]
impl Notifier for DiscordWebhookNotifier {
    async fn send(&self, message: &RenderedMessage) -> Result<String, NotifierError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(message)
            .send()
            .await
            .map_err(NotifierError::RequestError)?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifierError::StatusError {
                status,
                retry_after: parse_retry_after_header(response.headers()),
            });
        }

        let created: WebhookMessage = response
            .json()
            .await
            .map_err(NotifierError::InvalidResponseError)?;

        Ok(created.id)
    }
}

/// Whether Discord asked us to slow down.
pub fn is_rate_limited(error: &NotifierError) -> bool {
    matches!(
        error,
        NotifierError::StatusError {
            status: StatusCode::TOO_MANY_REQUESTS,
            ..
        }
    )
}

/// Attempt to parse a Retry-After header as a number of seconds, returning None if not possible.
/// Discord may send fractional seconds.
fn parse_retry_after_header(header_map: &header::HeaderMap) -> Option<time::Duration> {
    let retry_after = header_map.get(header::RETRY_AFTER)?.to_str().ok()?;

    retry_after
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|seconds| time::Duration::try_from_secs_f64(seconds).ok())
}
