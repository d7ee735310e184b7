//! `local@domain` handles

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use url::Url;

use super::ACTOR_PATH_MARKER;
use crate::error::AppError;

lazy_static! {
    static ref LOCAL_PART: Regex =
        Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("local part pattern is valid");
}

/// A user-facing account name.
///
/// `domain == None` means the local instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Handle {
    pub local_part: String,
    pub domain: Option<String>,
}

impl Handle {
    pub fn local(local_part: impl Into<String>) -> Self {
        Self {
            local_part: local_part.into(),
            domain: None,
        }
    }

    pub fn remote(local_part: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local_part: local_part.into(),
            domain: Some(domain.into()),
        }
    }

    /// Whether the handle names an account on `local_domain`.
    pub fn is_local(&self, local_domain: &str) -> bool {
        match &self.domain {
            None => true,
            Some(domain) => domain.eq_ignore_ascii_case(local_domain),
        }
    }

    /// Mastodon `acct` form: bare `local` for local accounts,
    /// `local@domain` otherwise.
    pub fn acct(&self, local_domain: &str) -> String {
        match &self.domain {
            Some(domain) if !self.is_local(local_domain) => {
                format!("{}@{}", self.local_part, domain)
            }
            _ => self.local_part.clone(),
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.domain {
            Some(domain) => write!(f, "@{}@{}", self.local_part, domain),
            None => write!(f, "@{}", self.local_part),
        }
    }
}

/// Parse a user-supplied handle.
///
/// Accepted forms, in precedence order:
/// - a local actor URI (`https://host/ap/users/alice`)
/// - `@alice@host`, `alice@host`, optionally percent-encoded
/// - bare `alice` (domain left unset)
/// - `host/.../alice` style strings containing several `@`, where the first
///   path segment is the domain and the last one the local part
pub fn parse_handle(query: &str) -> Result<Handle, AppError> {
    if query.starts_with("http") && query.contains(ACTOR_PATH_MARKER) {
        return parse_actor_uri(query);
    }

    let query = query.strip_prefix('@').unwrap_or(query);
    let query = urlencoding::decode(query)
        .map_err(|_| AppError::InvalidHandle(format!("not valid UTF-8: {}", query)))?
        .into_owned();

    let parts: Vec<&str> = query.split('@').collect();
    match parts.as_slice() {
        [_] => Ok(Handle::local(query.clone())),
        [local_part, domain] => {
            if !LOCAL_PART.is_match(local_part) {
                return Err(AppError::InvalidHandle(format!(
                    "invalid local part: {}",
                    local_part
                )));
            }
            Ok(Handle::remote(*local_part, *domain))
        }
        _ => {
            let without_scheme = query
                .strip_prefix("https://")
                .or_else(|| query.strip_prefix("http://"))
                .unwrap_or(&query);
            let segments: Vec<&str> = without_scheme.split('/').collect();
            let domain = segments.first().copied().unwrap_or_default();
            let local_part = segments.last().copied().unwrap_or_default();
            Ok(Handle::remote(local_part, domain))
        }
    }
}

fn parse_actor_uri(query: &str) -> Result<Handle, AppError> {
    let url = Url::parse(query)
        .map_err(|e| AppError::InvalidHandle(format!("invalid actor URI: {}", e)))?;
    let domain = url
        .host_str()
        .ok_or_else(|| AppError::InvalidHandle("actor URI has no host".to_string()))?;

    let local_part = url
        .path()
        .split_once(ACTOR_PATH_MARKER)
        .map(|(_, rest)| rest.split('/').next().unwrap_or_default())
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| AppError::InvalidHandle(format!("no username in {}", query)))?;

    Ok(Handle::remote(local_part, domain))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_at_prefixed_handle() {
        assert_eq!(
            parse_handle("@alice@example.com").unwrap(),
            Handle::remote("alice", "example.com")
        );
    }

    #[test]
    fn parses_actor_uri() {
        assert_eq!(
            parse_handle("https://example.com/ap/users/alice").unwrap(),
            Handle::remote("alice", "example.com")
        );
    }

    #[test]
    fn parses_percent_encoded_handle() {
        assert_eq!(
            parse_handle("alice%40example.com").unwrap(),
            Handle::remote("alice", "example.com")
        );
    }

    #[test]
    fn rejects_invalid_local_part() {
        assert!(matches!(
            parse_handle("al ice@example.com"),
            Err(AppError::InvalidHandle(_))
        ));
        assert!(matches!(
            parse_handle("al%20ice@example.com"),
            Err(AppError::InvalidHandle(_))
        ));
    }

    #[test]
    fn local_part_accepts_dots_dashes_and_underscores() {
        assert_eq!(
            parse_handle("a.l-i_c3@example.com").unwrap(),
            Handle::remote("a.l-i_c3", "example.com")
        );
    }

    #[test]
    fn bare_name_has_no_domain() {
        assert_eq!(parse_handle("alice").unwrap(), Handle::local("alice"));
        assert_eq!(parse_handle("@alice").unwrap(), Handle::local("alice"));
    }

    #[test]
    fn actor_uri_branch_skips_local_part_validation() {
        assert_eq!(
            parse_handle("https://example.com/ap/users/al+ice").unwrap(),
            Handle::remote("al+ice", "example.com")
        );
    }

    #[test]
    fn actor_uri_without_username_is_invalid() {
        assert!(matches!(
            parse_handle("https://example.com/ap/users/"),
            Err(AppError::InvalidHandle(_))
        ));
    }

    #[test]
    fn several_at_signs_fall_back_to_path_split() {
        assert_eq!(
            parse_handle("https://example.com/@bob@x/alice").unwrap(),
            Handle::remote("alice", "example.com")
        );
        assert_eq!(
            parse_handle("a@b@c").unwrap(),
            Handle::remote("a@b@c", "a@b@c")
        );
    }

    #[test]
    fn invalid_utf8_escape_is_invalid_handle() {
        assert!(matches!(
            parse_handle("%ff@example.com"),
            Err(AppError::InvalidHandle(_))
        ));
    }

    #[test]
    fn acct_omits_local_domain() {
        assert_eq!(Handle::local("admin").acct("social.example"), "admin");
        assert_eq!(
            Handle::remote("admin", "Social.Example").acct("social.example"),
            "admin"
        );
        assert_eq!(
            Handle::remote("alice", "remote.example").acct("social.example"),
            "alice@remote.example"
        );
    }

    #[test]
    fn display_uses_at_prefix() {
        assert_eq!(
            Handle::remote("alice", "remote.example").to_string(),
            "@alice@remote.example"
        );
        assert_eq!(Handle::local("admin").to_string(), "@admin");
    }
}
