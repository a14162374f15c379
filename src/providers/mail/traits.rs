//! Mail source trait definition.
//!
//! This module defines the [`MailSource`] trait, the capability the sync
//! service needs from a mailbox: paged listing of messages matching a query
//! and fetching a message's decoded body.

use async_trait::async_trait;

use crate::domain::{MessageId, MessageRef};
use crate::providers::Result;

/// One page of a message listing.
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    /// Messages on this page, in provider order.
    pub messages: Vec<MessageRef>,
    /// Token for the next page; `None` when the listing is exhausted.
    pub next_page_token: Option<String>,
}

impl MessagePage {
    /// Creates a final page holding `messages`.
    pub fn last(messages: Vec<MessageRef>) -> Self {
        Self {
            messages,
            next_page_token: None,
        }
    }
}

/// Trait for mailbox implementations.
///
/// Listing is paged; callers drain pages until no token is returned.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Lists one page of messages matching `query`.
    ///
    /// # Arguments
    ///
    /// * `query` - Provider search query
    /// * `page_token` - Token from the previous page, or `None` for the first
    async fn list_page(&self, query: &str, page_token: Option<String>) -> Result<MessagePage>;

    /// Fetches the decoded plain-text body of a message.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NotFound`](crate::providers::ProviderError::NotFound)
    /// if the message no longer exists.
    async fn fetch_body(&self, message_id: &MessageId) -> Result<String>;
}
