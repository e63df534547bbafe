//! Lease token codec
//!
//! A lease token is the value stored under a lock key. Its wire form is
//! `"<expiry millis>_<owner id>"`. Holders that predate owner ids wrote a bare
//! `"<expiry millis>"`; those values still parse, with no owner.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Separator between the expiry timestamp and the owner id
pub const TOKEN_SEPARATOR: char = '_';

/// Parsed lease token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseToken {
    /// Expiry timestamp (Unix millis)
    expires_at: i64,
    /// Unique owner id, `None` for legacy timestamp-only values
    owner: Option<String>,
}

impl LeaseToken {
    /// Issue a token with a fresh owner id
    pub fn issue(expires_at: i64) -> Self {
        Self {
            expires_at,
            owner: Some(Uuid::new_v4().to_string()),
        }
    }

    /// Issue a token that expires `lease` after `now` (Unix millis)
    ///
    /// One extra millisecond keeps the expiry strictly after `now + lease`.
    pub fn issue_for_lease(now: i64, lease: Duration) -> Self {
        Self::issue(now.saturating_add(lease.as_millis() as i64).saturating_add(1))
    }

    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Wire representation written to the store
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Parse a stored value
    pub fn parse(value: &str) -> Option<Self> {
        let (millis, owner) = match value.split_once(TOKEN_SEPARATOR) {
            Some((millis, owner)) if !owner.is_empty() => (millis, Some(owner.to_string())),
            Some(_) => return None,
            None => (value, None),
        };
        if millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let expires_at = millis.parse::<i64>().ok()?;
        Some(Self { expires_at, owner })
    }

    /// A token is expired once its expiry is strictly before `now`
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at < now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp())
    }

    /// Remaining lease time relative to `now`, zero once expired
    pub fn remaining(&self, now: i64) -> Duration {
        if self.expires_at > now {
            Duration::from_millis((self.expires_at - now) as u64)
        } else {
            Duration::ZERO
        }
    }
}

impl Display for LeaseToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.owner {
            Some(owner) => write!(f, "{}{}{}", self.expires_at, TOKEN_SEPARATOR, owner),
            None => write!(f, "{}", self.expires_at),
        }
    }
}

impl FromStr for LeaseToken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Invalid lease token: {}", s))
    }
}

/// Current wall-clock time in Unix millis
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
