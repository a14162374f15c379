//! Gmail API mail source.
//!
//! This module provides a [`MailSource`] implementation using the Gmail REST API:
//! - `users.messages.list` with `q=` for the paged listing
//! - `users.messages.get?format=minimal` for the received timestamp
//! - `users.messages.get?format=raw` for the MIME body

use std::sync::Arc;

use async_trait::async_trait;
use base64::alphabet::URL_SAFE;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use serde::Deserialize;

use super::{MailSource, MessagePage};
use crate::domain::{MessageId, MessageRef};
use crate::providers::google::{self, GoogleSession};
use crate::providers::{ProviderError, Result};

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users";

/// Gmail emits URL-safe base64, with or without padding.
const RAW_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Gmail API message list response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    messages: Option<Vec<GmailMessageRef>>,
    next_page_token: Option<String>,
}

/// Gmail API message reference from a listing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessageRef {
    id: String,
    #[allow(dead_code)]
    thread_id: Option<String>,
}

/// Gmail API message (minimal or raw format).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    internal_date: Option<String>,
    raw: Option<String>,
}

/// Gmail API mail source.
///
/// # Example
///
/// ```ignore
/// let session = Arc::new(GoogleSession::new(credentials));
/// let source = GmailSource::new(session, "me");
/// let page = source.list_page("from:bookings@example.com", None).await?;
/// ```
pub struct GmailSource {
    session: Arc<GoogleSession>,
    user_id: String,
    base_url: String,
}

impl GmailSource {
    /// Creates a Gmail source for the given mailbox user ("me" for the
    /// authenticated user).
    pub fn new(session: Arc<GoogleSession>, user_id: impl Into<String>) -> Self {
        Self {
            session,
            user_id: user_id.into(),
            base_url: GMAIL_API_BASE.to_string(),
        }
    }

    /// Overrides the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/{}/messages", self.base_url, self.user_id)
    }

    /// Fetches a single message in the given format.
    async fn get_message(&self, id: &str, format: &'static str) -> Result<GmailMessage> {
        let url = format!("{}/{}", self.messages_url(), id);
        let response = self
            .session
            .send(|client| client.get(&url).query(&[("format", format)]))
            .await?;
        google::json(response).await
    }
}

/// Parses Gmail's `internalDate` (epoch milliseconds as a string).
fn parse_internal_date(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|d| d.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
}

/// Resolves a listed id from its `format=minimal` lookup.
///
/// A message deleted since the listing was taken is skipped.
fn listed_message_ref(id: &str, lookup: Result<GmailMessage>) -> Result<Option<MessageRef>> {
    let message = match lookup {
        Ok(message) => message,
        Err(ProviderError::NotFound(_)) => {
            tracing::warn!(message_id = id, "Listed message no longer exists, skipping");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let received_at = parse_internal_date(message.internal_date.as_deref()).ok_or_else(|| {
        ProviderError::Internal(format!("message {} has no internalDate", message.id))
    })?;
    Ok(Some(MessageRef::new(message.id, received_at)))
}

/// Decodes a `format=raw` payload into the message's plain-text body.
///
/// Takes the first inline text part; HTML-only messages are converted to text.
fn decode_raw_body(raw: &str) -> Result<String> {
    let bytes = RAW_ENGINE
        .decode(raw.trim())
        .map_err(|e| ProviderError::UndecodableMessage(format!("invalid raw encoding: {}", e)))?;

    let message = MessageParser::default()
        .parse(bytes.as_slice())
        .ok_or_else(|| ProviderError::UndecodableMessage("unparseable MIME message".to_string()))?;

    Ok(message
        .body_text(0)
        .map(|body| body.into_owned())
        .unwrap_or_default())
}

#[async_trait]
impl MailSource for GmailSource {
    async fn list_page(&self, query: &str, page_token: Option<String>) -> Result<MessagePage> {
        let url = self.messages_url();
        let response = self
            .session
            .send(|client| {
                let request = client.get(&url).query(&[("q", query)]);
                match &page_token {
                    Some(token) => request.query(&[("pageToken", token.as_str())]),
                    None => request,
                }
            })
            .await?;
        let listing: MessageListResponse = google::json(response).await?;

        let refs = listing.messages.unwrap_or_default();
        let mut messages = Vec::with_capacity(refs.len());
        for item in refs {
            let lookup = self.get_message(&item.id, "minimal").await;
            if let Some(message) = listed_message_ref(&item.id, lookup)? {
                messages.push(message);
            }
        }

        tracing::debug!(
            count = messages.len(),
            has_more = listing.next_page_token.is_some(),
            "Listed Gmail page"
        );

        Ok(MessagePage {
            messages,
            next_page_token: listing.next_page_token,
        })
    }

    async fn fetch_body(&self, message_id: &MessageId) -> Result<String> {
        let message = self.get_message(&message_id.0, "raw").await?;
        let raw = message
            .raw
            .ok_or_else(|| {
                ProviderError::UndecodableMessage(format!("message {} has no raw body", message_id))
            })?;
        decode_raw_body(&raw)
    }
}
