//! Test-data builders that write straight to a [`FeedStore`].
//!
//! Every fixture struct has a `Default` that fills unset fields from the
//! factory's sequence counter, so `factory.update(UpdateFixture::default())`
//! yields "This is update #1", then "#2", and so on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::errors::ChirpError;
use crate::feed_store::{FeedStore, NewUpdate, NewUser};
use crate::types::{Authorization, Feed, FeedId, Provider, Update, UpdateId, User};

const DEFAULT_FEED_TITLE: &str = "fixtures";

#[derive(Debug, Clone, Default)]
pub struct UpdateFixture {
    /// Defaults to `"This is update #N"`.
    pub text: Option<String>,
    /// Defaults to a feed shared by every fixture of this factory.
    pub feed_id: Option<FeedId>,
    /// Defaults to the feed's title.
    pub author: Option<String>,
    pub referral_id: Option<UpdateId>,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct UserFixture {
    /// Defaults to `"user_N"`.
    pub username: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthorizationFixture {
    pub provider: Provider,
    /// Defaults to the sequence number.
    pub uid: Option<String>,
    /// Defaults to the user's username.
    pub nickname: Option<String>,
}

impl Default for AuthorizationFixture {
    fn default() -> Self {
        Self {
            provider: Provider::Twitter,
            uid: None,
            nickname: None,
        }
    }
}

pub struct Factory<'a> {
    store: &'a FeedStore,
    sequence: AtomicU64,
    default_feed: Mutex<Option<Feed>>,
}

impl<'a> Factory<'a> {
    pub fn new(store: &'a FeedStore) -> Self {
        Self {
            store,
            sequence: AtomicU64::new(0),
            default_feed: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &FeedStore {
        self.store
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn feed(&self, title: &str) -> Result<Feed, ChirpError> {
        self.store.create_feed(title, None)
    }

    fn default_feed(&self) -> Result<Feed, ChirpError> {
        let mut slot = self
            .default_feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(feed) = slot.as_ref() {
            return Ok(feed.clone());
        }
        let feed = self.store.create_feed(DEFAULT_FEED_TITLE, None)?;
        *slot = Some(feed.clone());
        Ok(feed)
    }

    fn build_update(&self, fixture: UpdateFixture) -> Result<NewUpdate, ChirpError> {
        let seq = self.next_seq();
        let feed = match fixture.feed_id {
            Some(feed_id) => self
                .store
                .get_feed(feed_id)?
                .ok_or_else(|| ChirpError::NotFound(format!("feed {feed_id}")))?,
            None => self.default_feed()?,
        };
        Ok(NewUpdate {
            feed_id: feed.feed_id,
            author: fixture.author.unwrap_or(feed.title),
            text: fixture
                .text
                .unwrap_or_else(|| format!("This is update #{seq}")),
            referral_id: fixture.referral_id,
            created_at: fixture.created_at,
        })
    }

    pub fn update(&self, fixture: UpdateFixture) -> Result<Update, ChirpError> {
        let update = self.build_update(fixture)?;
        self.store.insert_update(update)
    }

    /// `count` updates built from `template`, each with its own sequence
    /// number, inserted oldest first in one transaction.
    pub fn updates(&self, count: usize, template: UpdateFixture) -> Result<Vec<Update>, ChirpError> {
        let updates = (0..count)
            .map(|_| self.build_update(template.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        self.store.insert_updates(updates)
    }

    pub fn user(&self, fixture: UserFixture) -> Result<User, ChirpError> {
        let seq = self.next_seq();
        self.store.create_user(NewUser {
            username: fixture.username.unwrap_or_else(|| format!("user_{seq}")),
            email: fixture.email,
        })
    }

    pub fn authorization(
        &self,
        user: &User,
        fixture: AuthorizationFixture,
    ) -> Result<Authorization, ChirpError> {
        let seq = self.next_seq();
        self.store.create_authorization(Authorization {
            user_id: user.user_id,
            provider: fixture.provider,
            uid: fixture.uid.unwrap_or_else(|| seq.to_string()),
            nickname: fixture.nickname.unwrap_or_else(|| user.username.clone()),
        })
    }

    /// A fresh user signed in through `provider`.
    pub fn user_with_provider(&self, provider: Provider) -> Result<User, ChirpError> {
        let user = self.user(UserFixture::default())?;
        self.authorization(
            &user,
            AuthorizationFixture {
                provider,
                ..AuthorizationFixture::default()
            },
        )?;
        Ok(user)
    }
}
