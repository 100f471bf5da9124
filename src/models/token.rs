// src/models/token.rs

//! Push token records and resolved audiences.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Device platform reported at token registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    Web,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Web => "web",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            "web" => Ok(Platform::Web),
            other => Err(AppError::validation(format!("unknown platform '{other}'"))),
        }
    }
}

/// A registered user account as far as notifications are concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub is_active: bool,
    /// The user's single live token; re-registration overwrites it
    pub push_token: Option<String>,
}

/// A device token registered before its owner signed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymousToken {
    pub id: i64,
    pub token: String,
    pub platform: Platform,
    pub device_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    /// Set once the token has been absorbed into a user account
    pub linked_user_id: Option<i64>,
}

/// Which record a token belongs to, so a dead token can be cleaned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenOwner {
    User(i64),
    Anonymous(i64),
}

/// One addressable device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTarget {
    pub token: String,
    pub owner: TokenOwner,
}

impl PushTarget {
    pub fn user(user_id: i64, token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            owner: TokenOwner::User(user_id),
        }
    }

    pub fn anonymous(id: i64, token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            owner: TokenOwner::Anonymous(id),
        }
    }
}

/// Recipients of a news notification.
#[derive(Debug, Clone, Default)]
pub struct NewsAudience {
    pub registered: Vec<PushTarget>,
    pub anonymous: Vec<PushTarget>,
}

impl NewsAudience {
    pub fn len(&self) -> usize {
        self.registered.len() + self.anonymous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered users first, then anonymous devices. A device whose token
    /// also belongs to a registered user is addressed once, as the user.
    pub fn into_targets(self) -> Vec<PushTarget> {
        let mut seen = HashSet::new();
        self.registered
            .into_iter()
            .chain(self.anonymous)
            .filter(|target| seen.insert(target.token.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_from_str() {
        assert_eq!("iOS".parse::<Platform>().unwrap(), Platform::Ios);
        assert_eq!("android".parse::<Platform>().unwrap(), Platform::Android);
        assert!("symbian".parse::<Platform>().is_err());
    }

    #[test]
    fn test_news_audience_concatenates() {
        let audience = NewsAudience {
            registered: vec![PushTarget::user(1, "ExponentPushToken[a]")],
            anonymous: vec![
                PushTarget::anonymous(7, "ExponentPushToken[b]"),
                PushTarget::anonymous(8, "ExponentPushToken[c]"),
            ],
        };
        assert_eq!(audience.len(), 3);

        let targets = audience.into_targets();
        assert_eq!(targets[0].owner, TokenOwner::User(1));
        assert_eq!(targets[2].owner, TokenOwner::Anonymous(8));
    }

    #[test]
    fn test_shared_token_is_addressed_once() {
        let audience = NewsAudience {
            registered: vec![PushTarget::user(1, "ExponentPushToken[a]")],
            anonymous: vec![
                PushTarget::anonymous(7, "ExponentPushToken[a]"),
                PushTarget::anonymous(8, "ExponentPushToken[b]"),
            ],
        };
        assert_eq!(audience.len(), 3);

        let targets = audience.into_targets();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].owner, TokenOwner::User(1));
        assert_eq!(targets[1].owner, TokenOwner::Anonymous(8));
    }
}
