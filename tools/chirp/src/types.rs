use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! row_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(UserId);
row_id!(FeedId);
row_id!(UpdateId);

/// Third-party account a user signed in with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Twitter,
    Facebook,
    Email,
}

impl Provider {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "twitter" => Some(Self::Twitter),
            "facebook" => Some(Self::Facebook),
            "email" => Some(Self::Email),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Twitter => "twitter",
            Self::Facebook => "facebook",
            Self::Email => "email",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Twitter => "Twitter",
            Self::Facebook => "Facebook",
            Self::Email => "Email",
        }
    }

    /// Whether the share form offers cross-posting to this provider.
    pub fn supports_cross_post(self) -> bool {
        matches!(self, Self::Twitter | Self::Facebook)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub user_id: UserId,
    pub username: String,
    pub email: Option<String>,
    pub feed_id: FeedId,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub user_id: UserId,
    pub provider: Provider,
    pub uid: String,
    pub nickname: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub feed_id: FeedId,
    pub owner: Option<UserId>,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub update_id: UpdateId,
    pub feed_id: FeedId,
    pub author: String,
    pub text: String,
    pub referral_id: Option<UpdateId>,
    pub created_at: i64,
}

/// Which updates a listing covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateScope {
    World,
    Feed(FeedId),
    Mentions(String),
}

impl UpdateScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::World => "world",
            Self::Feed(_) => "feed",
            Self::Mentions(_) => "mentions",
        }
    }
}
