//! Mail source implementations.
//!
//! This module contains the [`MailSource`] trait and the Gmail implementation:
//!
//! - [`GmailSource`] - Gmail API with OAuth 2.0

mod gmail;
mod traits;

pub use gmail::GmailSource;
pub use traits::{MailSource, MessagePage};

#[cfg(test)]
pub use traits::MockMailSource;
