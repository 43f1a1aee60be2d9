//! Twitter (X) publisher.
//!
//! Credentials are verified once at startup with
//! `GET 1.1/account/verify_credentials.json`; each forecast is posted with
//! `POST 2/tweets`. Requests are signed with OAuth 1.0a (HMAC-SHA1) using
//! the consumer key/secret and the user's access token/secret.
//!
//! JSON bodies are not part of the OAuth signature base string, so only
//! query parameters (none here) and the `oauth_*` fields are signed.

use async_trait::async_trait;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::Publisher;
use crate::config::TwitterCredentials;
use crate::types::{BotError, PostReceipt};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const VERIFY_CREDENTIALS_URL: &str = "https://api.twitter.com/1.1/account/verify_credentials.json";
const CREATE_TWEET_URL: &str = "https://api.twitter.com/2/tweets";
const PUBLISHER_NAME: &str = "twitter";

/// Platform post length limit. Not enforced locally.
const MAX_POST_CHARS: usize = 280;

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct VerifiedUser {
    #[serde(default)]
    screen_name: String,
}

#[derive(Debug, Serialize)]
struct CreateTweetRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateTweetResponse {
    data: CreatedTweet,
}

#[derive(Debug, Deserialize)]
struct CreatedTweet {
    id: String,
}

// ---------------------------------------------------------------------------
// OAuth 1.0a
// ---------------------------------------------------------------------------

fn percent_encode(raw: &str) -> String {
    urlencoding::encode(raw).into_owned()
}

/// HMAC-SHA1 signature over the OAuth signature base string.
///
/// `params` must contain every `oauth_*` field (except the signature)
/// plus any query/form parameters of the request.
pub fn oauth_signature(
    method: &str,
    url: &str,
    params: &[(&str, &str)],
    consumer_secret: &str,
    token_secret: &str,
) -> Result<String, BotError> {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();
    let param_string = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let base = format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(url),
        percent_encode(&param_string)
    );
    let key = format!(
        "{}&{}",
        percent_encode(consumer_secret),
        percent_encode(token_secret)
    );

    let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes())
        .map_err(|e| BotError::Authentication(format!("Invalid signing key: {e}")))?;
    mac.update(base.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// Build the `Authorization: OAuth ...` header value.
fn oauth_header(
    creds: &TwitterCredentials,
    method: &str,
    url: &str,
    nonce: &str,
    timestamp: &str,
) -> Result<String, BotError> {
    let fields = vec![
        ("oauth_consumer_key", creds.consumer_key.expose_secret().as_str()),
        ("oauth_nonce", nonce),
        ("oauth_signature_method", "HMAC-SHA1"),
        ("oauth_timestamp", timestamp),
        ("oauth_token", creds.access_key.expose_secret().as_str()),
        ("oauth_version", "1.0"),
    ];

    let signature = oauth_signature(
        method,
        url,
        &fields,
        creds.consumer_secret.expose_secret(),
        creds.access_secret.expose_secret(),
    )?;
    let mut signed = fields.clone();
    signed.push(("oauth_signature", signature.as_str()));
    signed.sort();

    let header = signed
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("OAuth {header}"))
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

pub struct TwitterPublisher {
    http: Client,
    creds: TwitterCredentials,
    /// Set once `start` has verified the credentials.
    screen_name: Option<String>,
}

impl TwitterPublisher {
    pub fn new(creds: TwitterCredentials, timeout_secs: u64) -> Result<Self, BotError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("arma-bot/0.1.0")
            .build()
            .map_err(|e| BotError::Publish(format!("Failed to build Twitter HTTP client: {e}")))?;
        Ok(Self {
            http,
            creds,
            screen_name: None,
        })
    }

    fn authorization(&self, method: &str, url: &str) -> Result<String, BotError> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let timestamp = Utc::now().timestamp().to_string();
        oauth_header(&self.creds, method, url, &nonce, &timestamp)
    }

    /// Map a non-success status to the matching error kind. Only 401 means
    /// bad credentials; 403 also covers duplicate or disallowed posts.
    fn status_error(status: StatusCode, body: &str) -> BotError {
        match status {
            StatusCode::UNAUTHORIZED => {
                BotError::Authentication(format!("Twitter rejected credentials ({status}): {body}"))
            }
            _ => BotError::Publish(format!("Twitter API error {status}: {body}")),
        }
    }
}

#[async_trait]
impl Publisher for TwitterPublisher {
    async fn start(&mut self) -> Result<(), BotError> {
        let auth = self.authorization("GET", VERIFY_CREDENTIALS_URL)?;
        let resp = self
            .http
            .get(VERIFY_CREDENTIALS_URL)
            .header("Authorization", auth)
            .send()
            .await
            .map_err(|e| BotError::Authentication(format!("Credential check failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::status_error(status, &body));
        }

        let user: VerifiedUser = resp
            .json()
            .await
            .map_err(|e| BotError::Authentication(format!("Unexpected verify response: {e}")))?;

        info!(screen_name = %user.screen_name, "Twitter credentials verified");
        self.screen_name = Some(user.screen_name);
        Ok(())
    }

    async fn publish(&self, text: &str) -> Result<PostReceipt, BotError> {
        if self.screen_name.is_none() {
            return Err(BotError::Authentication(
                "Twitter credentials have not been verified".into(),
            ));
        }

        let length = text.chars().count();
        if length > MAX_POST_CHARS {
            warn!(length, limit = MAX_POST_CHARS, "Post exceeds platform limit, sending anyway");
        }

        let auth = self.authorization("POST", CREATE_TWEET_URL)?;
        let resp = self
            .http
            .post(CREATE_TWEET_URL)
            .header("Authorization", auth)
            .json(&CreateTweetRequest { text })
            .send()
            .await
            .map_err(|e| BotError::Publish(format!("Twitter request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::status_error(status, &body));
        }

        let created: CreateTweetResponse = resp
            .json()
            .await
            .map_err(|e| BotError::Publish(format!("Failed to parse tweet response: {e}")))?;

        debug!(post_id = %created.data.id, "Tweet created");

        Ok(PostReceipt {
            post_id: created.data.id,
            publisher: PUBLISHER_NAME.to_string(),
            text: text.to_string(),
            posted_at: Utc::now(),
        })
    }

    fn name(&self) -> &'static str {
        PUBLISHER_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
