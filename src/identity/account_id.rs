use url::Url;

use super::handle::{Handle, parse_handle};
use super::local_id::LocalId;
use crate::error::AppError;

/// An account reference as typed by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountIdentifier {
    /// Decimal local id
    Mastodon(LocalId),
    /// Absolute actor URI
    ActivityPub(Url),
    /// `local@domain`, `@local@domain` or bare `local`
    Handle(Handle),
}

impl AccountIdentifier {
    /// Label used in metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AccountIdentifier::Mastodon(_) => "mastodon",
            AccountIdentifier::ActivityPub(_) => "activitypub",
            AccountIdentifier::Handle(_) => "handle",
        }
    }
}

/// Classify a raw identifier.
///
/// All-digit input is a local id, an absolute http(s) URL is an actor URI,
/// anything else goes through [`parse_handle`].
pub fn classify(input: &str) -> Result<AccountIdentifier, AppError> {
    let input = input.trim();

    if !input.is_empty() && input.bytes().all(|b| b.is_ascii_digit()) {
        return input.parse().map(AccountIdentifier::Mastodon);
    }

    if let Ok(url) = Url::parse(input) {
        if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() {
            return Ok(AccountIdentifier::ActivityPub(url));
        }
    }

    parse_handle(input).map(AccountIdentifier::Handle)
}
