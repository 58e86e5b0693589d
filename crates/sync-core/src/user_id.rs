//! UserId: the partition key shared by a client and the server.
//!
//! There is no authentication. Whoever presents the same identifier sees the
//! same partition, so the only validation is what keeps the value safe to use
//! as a URL path segment and inside a file name: no path separators, no URL
//! delimiters or escapes, and not a relative path component.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Maximum length of a user identifier, in characters.
pub const MAX_USER_ID_LEN: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UserIdError {
    #[error("User ID must not be empty")]
    Empty,
    #[error("User ID exceeds {MAX_USER_ID_LEN} characters")]
    TooLong,
    #[error("User ID contains forbidden character {0:?}")]
    ForbiddenChar(char),
    #[error("User ID {0:?} is reserved")]
    Reserved(String),
}

/// Characters that would change the meaning of a URL path or a file path.
const FORBIDDEN: &[char] = &['/', '\\', '#', '?', '%'];

/// Identifier of one participant's partition.
///
/// # Examples
/// ```
/// use tasksync_core::UserId;
///
/// let user: UserId = "  alice ".parse().unwrap();
/// assert_eq!(user.as_str(), "alice");
/// assert!("a/b".parse::<UserId>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = UserIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(UserIdError::Empty);
        }
        if trimmed.chars().count() > MAX_USER_ID_LEN {
            return Err(UserIdError::TooLong);
        }
        if let Some(c) = trimmed
            .chars()
            .find(|c| FORBIDDEN.contains(c) || c.is_control())
        {
            return Err(UserIdError::ForbiddenChar(c));
        }
        if trimmed == "." || trimmed == ".." {
            return Err(UserIdError::Reserved(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl serde::Serialize for UserId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for UserId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trims_whitespace() {
        let id: UserId = "  team-a  ".parse().unwrap();
        assert_eq!(id.as_str(), "team-a");
        assert_eq!(id.to_string(), "team-a");
    }

    #[test]
    fn test_parse_accepts_non_ascii() {
        let id: UserId = "通道一".parse().unwrap();
        assert_eq!(id.as_str(), "通道一");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!("".parse::<UserId>(), Err(UserIdError::Empty));
        assert_eq!("   ".parse::<UserId>(), Err(UserIdError::Empty));
    }

    #[test]
    fn test_parse_rejects_path_separators() {
        assert_eq!("a/b".parse::<UserId>(), Err(UserIdError::ForbiddenChar('/')));
        assert_eq!("a\\b".parse::<UserId>(), Err(UserIdError::ForbiddenChar('\\')));
        assert!("a\u{0}b".parse::<UserId>().is_err());
    }

    #[test]
    fn test_parse_rejects_url_delimiters() {
        assert_eq!("mallory#x".parse::<UserId>(), Err(UserIdError::ForbiddenChar('#')));
        assert_eq!("mallory?x=1".parse::<UserId>(), Err(UserIdError::ForbiddenChar('?')));
        assert_eq!("%41".parse::<UserId>(), Err(UserIdError::ForbiddenChar('%')));
    }

    #[test]
    fn test_parse_rejects_relative_components() {
        assert!(matches!("..".parse::<UserId>(), Err(UserIdError::Reserved(_))));
        assert!(matches!(" . ".parse::<UserId>(), Err(UserIdError::Reserved(_))));
        assert!("a..b".parse::<UserId>().is_ok());
    }

    #[test]
    fn test_parse_rejects_overlong() {
        let long = "x".repeat(MAX_USER_ID_LEN + 1);
        assert_eq!(long.parse::<UserId>(), Err(UserIdError::TooLong));
        let exact = "x".repeat(MAX_USER_ID_LEN);
        assert!(exact.parse::<UserId>().is_ok());
    }

    #[test]
    fn test_serde_roundtrip_validates() {
        let id: UserId = "bob".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"bob\"");
        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<UserId>("\"a/b\"").is_err());
    }
}
