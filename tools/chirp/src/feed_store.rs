use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use crate::config::PaginationConfig;
use crate::errors::ChirpError;
use crate::logging::append_run_log;
use crate::pagination::{self, Cursor, FeedPage};
use crate::types::{
    Authorization, Feed, FeedId, Provider, Update, UpdateId, UpdateScope, User, UserId,
};

const READ_POOL_SIZE: usize = 4;

type StoreResult<T> = Result<T, ChirpError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUpdate {
    pub feed_id: FeedId,
    pub author: String,
    pub text: String,
    pub referral_id: Option<UpdateId>,
    /// Explicit timestamp (unix millis); `None` stamps the insert time.
    pub created_at: Option<i64>,
}

#[derive(Debug)]
enum WriteCmd {
    CreateUser {
        user: NewUser,
        now: i64,
        reply: oneshot::Sender<StoreResult<User>>,
    },
    CreateFeed {
        title: String,
        owner: Option<UserId>,
        now: i64,
        reply: oneshot::Sender<StoreResult<Feed>>,
    },
    CreateAuthorization {
        authorization: Authorization,
        now: i64,
        reply: oneshot::Sender<StoreResult<Authorization>>,
    },
    InsertUpdates {
        updates: Vec<NewUpdate>,
        now: i64,
        reply: oneshot::Sender<StoreResult<Vec<Update>>>,
    },
    SetReferral {
        update_id: UpdateId,
        referral_id: Option<UpdateId>,
        reply: oneshot::Sender<StoreResult<bool>>,
    },
}

/// SQLite-backed users, feeds and updates.
///
/// All writes go through one writer thread; reads use a small pool of
/// read-only connections. Calls block, so do not drive the store from inside
/// an async runtime.
pub struct FeedStore {
    write_tx: Option<mpsc::Sender<WriteCmd>>,
    read_pool: ReadPool,
    writer_join: Option<thread::JoinHandle<()>>,
    db_path: PathBuf,
}

impl Drop for FeedStore {
    fn drop(&mut self) {
        // Closing the sender ends the writer loop; joining flushes queued writes.
        drop(self.write_tx.take());
        if let Some(handle) = self.writer_join.take() {
            let _ = handle.join();
        }
    }
}

impl FeedStore {
    fn sender(&self) -> StoreResult<&mpsc::Sender<WriteCmd>> {
        self.write_tx
            .as_ref()
            .ok_or_else(|| ChirpError::Database("store is closed".to_string()))
    }

    fn roundtrip<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<StoreResult<T>>) -> WriteCmd,
    ) -> StoreResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender()?
            .blocking_send(build(reply_tx))
            .map_err(|e| ChirpError::Database(e.to_string()))?;
        reply_rx
            .blocking_recv()
            .map_err(|e| ChirpError::Database(e.to_string()))?
    }

    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        append_run_log(
            "info",
            "feed_store.open",
            json!({ "path": path.display().to_string() }),
        );
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ChirpError::Database(e.to_string()))?;
        }

        let existed_before_open = path.exists();
        if existed_before_open {
            let meta =
                std::fs::metadata(&path).map_err(|e| ChirpError::Database(e.to_string()))?;
            if meta.len() == 0 {
                return Err(ChirpError::Database(format!(
                    "feed database is 0 bytes (corrupt): {}",
                    path.display()
                )));
            }
        }

        let mut write_conn = Connection::open(&path).map_err(db_err)?;
        configure_write_connection(&write_conn)?;

        if existed_before_open {
            let integrity: String = write_conn
                .pragma_query_value(None, "quick_check", |row| row.get(0))
                .map_err(db_err)?;
            if integrity != "ok" {
                return Err(ChirpError::Database(format!(
                    "feed database failed integrity check: {integrity}"
                )));
            }
        }

        run_migrations(&mut write_conn)?;

        let (write_tx, mut write_rx) = mpsc::channel(128);
        let writer_join = thread::spawn(move || {
            while let Some(cmd) = write_rx.blocking_recv() {
                match cmd {
                    WriteCmd::CreateUser { user, now, reply } => {
                        let _ = reply.send(create_user(&mut write_conn, &user, now));
                    }
                    WriteCmd::CreateFeed {
                        title,
                        owner,
                        now,
                        reply,
                    } => {
                        let _ = reply.send(create_feed(&write_conn, &title, owner, now));
                    }
                    WriteCmd::CreateAuthorization {
                        authorization,
                        now,
                        reply,
                    } => {
                        let _ = reply.send(create_authorization(&write_conn, authorization, now));
                    }
                    WriteCmd::InsertUpdates {
                        updates,
                        now,
                        reply,
                    } => {
                        let _ = reply.send(insert_updates(&mut write_conn, &updates, now));
                    }
                    WriteCmd::SetReferral {
                        update_id,
                        referral_id,
                        reply,
                    } => {
                        let _ = reply.send(set_referral(&write_conn, update_id, referral_id));
                    }
                }
            }
        });

        let read_pool = ReadPool::open(&path, READ_POOL_SIZE)?;
        append_run_log(
            "info",
            "feed_store.opened",
            json!({ "path": path.display().to_string() }),
        );
        Ok(Self {
            write_tx: Some(write_tx),
            read_pool,
            writer_join: Some(writer_join),
            db_path: path,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Creates the user together with the feed their updates go to.
    pub fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let now = unix_millis();
        let created = self.roundtrip(|reply| WriteCmd::CreateUser { user, now, reply })?;
        append_run_log(
            "info",
            "feed_store.user.created",
            json!({
                "user_id": created.user_id.0,
                "username": created.username,
                "feed_id": created.feed_id.0,
            }),
        );
        Ok(created)
    }

    pub fn create_feed(&self, title: &str, owner: Option<UserId>) -> StoreResult<Feed> {
        let now = unix_millis();
        let title = title.to_string();
        let feed = self.roundtrip(|reply| WriteCmd::CreateFeed {
            title,
            owner,
            now,
            reply,
        })?;
        append_run_log(
            "info",
            "feed_store.feed.created",
            json!({ "feed_id": feed.feed_id.0, "title": feed.title }),
        );
        Ok(feed)
    }

    pub fn create_authorization(&self, authorization: Authorization) -> StoreResult<Authorization> {
        let now = unix_millis();
        let created = self.roundtrip(|reply| WriteCmd::CreateAuthorization {
            authorization,
            now,
            reply,
        })?;
        append_run_log(
            "info",
            "feed_store.authorization.created",
            json!({
                "user_id": created.user_id.0,
                "provider": created.provider.as_str(),
                "nickname": created.nickname,
            }),
        );
        Ok(created)
    }

    pub fn insert_update(&self, update: NewUpdate) -> StoreResult<Update> {
        self.insert_updates(vec![update])?
            .pop()
            .ok_or_else(|| ChirpError::Database("row missing after insert".to_string()))
    }

    /// Inserts all updates in one transaction; returned rows keep input order.
    pub fn insert_updates(&self, updates: Vec<NewUpdate>) -> StoreResult<Vec<Update>> {
        if updates.is_empty() {
            return Ok(Vec::new());
        }
        let now = unix_millis();
        let inserted = self.roundtrip(|reply| WriteCmd::InsertUpdates {
            updates,
            now,
            reply,
        })?;
        append_run_log(
            "info",
            "feed_store.update.inserted",
            json!({
                "count": inserted.len(),
                "update_ids": inserted.iter().map(|u| u.update_id.0).collect::<Vec<_>>(),
            }),
        );
        Ok(inserted)
    }

    /// Returns `false` when `update_id` does not exist.
    pub fn set_referral(
        &self,
        update_id: UpdateId,
        referral_id: Option<UpdateId>,
    ) -> StoreResult<bool> {
        self.roundtrip(|reply| WriteCmd::SetReferral {
            update_id,
            referral_id,
            reply,
        })
    }

    pub fn get_user(&self, user_id: UserId) -> StoreResult<Option<User>> {
        self.read_pool.with_conn(|conn| {
            conn.query_row(
                &format!("{USER_SELECT} WHERE u.user_id = ?1"),
                [user_id.0],
                row_to_user,
            )
            .optional()
            .map_err(db_err)
        })
    }

    pub fn find_user(&self, username: &str) -> StoreResult<Option<User>> {
        self.read_pool.with_conn(|conn| {
            conn.query_row(
                &format!("{USER_SELECT} WHERE u.username = ?1"),
                [username],
                row_to_user,
            )
            .optional()
            .map_err(db_err)
        })
    }

    pub fn get_feed(&self, feed_id: FeedId) -> StoreResult<Option<Feed>> {
        self.read_pool.with_conn(|conn| fetch_feed(conn, feed_id))
    }

    pub fn get_update(&self, update_id: UpdateId) -> StoreResult<Option<Update>> {
        self.read_pool.with_conn(|conn| fetch_update(conn, update_id))
    }

    pub fn authorizations_for(&self, user_id: UserId) -> StoreResult<Vec<Authorization>> {
        self.read_pool.with_conn(|conn| {
            let mut statement = conn
                .prepare(
                    "SELECT user_id, provider, uid, nickname
                     FROM authorizations
                     WHERE user_id = ?1
                     ORDER BY created_at ASC, provider ASC",
                )
                .map_err(db_err)?;
            let rows = statement
                .query_map([user_id.0], row_to_authorization)
                .map_err(db_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(rows)
        })
    }

    pub fn count_updates(&self, scope: &UpdateScope) -> StoreResult<u64> {
        self.read_pool.with_conn(|conn| count_in_scope(conn, scope))
    }

    /// One page of `scope`, newest first.
    pub fn list_feed(
        &self,
        scope: &UpdateScope,
        cursor: Option<Cursor>,
        settings: &PaginationConfig,
    ) -> StoreResult<FeedPage<Update>> {
        let page = self.read_pool.with_conn(|conn| {
            // Count and rows come from one read transaction so they agree.
            let tx = conn.unchecked_transaction().map_err(db_err)?;
            let total = count_in_scope(&tx, scope)?;
            let window =
                pagination::window(total, cursor, settings.page_size, settings.out_of_range)?;
            let (clause, mut values) = scope_filter(scope);
            values.push(Value::Integer(i64::from(window.page_size)));
            values.push(Value::Integer(
                i64::try_from(window.offset()).unwrap_or(i64::MAX),
            ));
            let mut statement = tx
                .prepare(&format!(
                    "{UPDATE_SELECT} WHERE {clause}
                     ORDER BY created_at DESC, update_id DESC
                     LIMIT ? OFFSET ?"
                ))
                .map_err(db_err)?;
            let items = statement
                .query_map(params_from_iter(values), row_to_update)
                .map_err(db_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err)?;
            drop(statement);
            tx.finish().map_err(db_err)?;
            Ok(FeedPage { items, window })
        })?;
        append_run_log(
            "debug",
            "feed_store.feed.listed",
            json!({
                "scope": scope.as_str(),
                "page": page.window.page,
                "last_page": page.window.last_page,
                "total": page.window.total,
                "returned": page.items.len(),
            }),
        );
        Ok(page)
    }
}

#[derive(Clone)]
struct ReadPool {
    conns: Arc<Vec<Mutex<Connection>>>,
    next: Arc<AtomicUsize>,
}

impl ReadPool {
    fn open(path: &Path, size: usize) -> StoreResult<Self> {
        let mut conns = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
                .map_err(db_err)?;
            conn.busy_timeout(std::time::Duration::from_secs(3))
                .map_err(db_err)?;
            conns.push(Mutex::new(conn));
        }

        Ok(Self {
            conns: Arc::new(conns),
            next: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.conns.len();
        let guard = self.conns[idx]
            .lock()
            .map_err(|_| ChirpError::Database("read connection lock poisoned".to_string()))?;
        f(&guard)
    }
}

fn configure_write_connection(conn: &Connection) -> StoreResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(db_err)?;
    conn.pragma_update(None, "synchronous", "FULL")
        .map_err(db_err)?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(db_err)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(db_err)?;
    Ok(())
}

fn run_migrations(conn: &mut Connection) -> StoreResult<()> {
    let migrations = [(1_i64, include_str!("../migrations/0001_feeds.sql"))];

    conn.execute_batch("BEGIN IMMEDIATE; CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY, applied_at INTEGER NOT NULL); COMMIT;")
        .map_err(db_err)?;

    for (version, sql) in migrations {
        let exists = conn
            .query_row(
                "SELECT 1 FROM schema_migrations WHERE version = ?1 LIMIT 1",
                [version],
                |_| Ok(()),
            )
            .optional()
            .map_err(db_err)?
            .is_some();

        if exists {
            continue;
        }

        append_run_log(
            "info",
            "feed_store.migration.applying",
            json!({ "version": version }),
        );
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute_batch(sql).map_err(db_err)?;
        tx.execute(
            "INSERT INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![version, unix_millis()],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        append_run_log(
            "info",
            "feed_store.migration.applied",
            json!({ "version": version }),
        );
    }

    Ok(())
}

const USER_SELECT: &str = "SELECT u.user_id, u.username, u.email, f.feed_id, u.created_at
     FROM users u JOIN feeds f ON f.owner_id = u.user_id";

const UPDATE_SELECT: &str =
    "SELECT update_id, feed_id, author, text, referral_id, created_at FROM updates";

fn create_user(conn: &mut Connection, user: &NewUser, now: i64) -> StoreResult<User> {
    let username = user.username.trim();
    if username.is_empty() {
        return Err(ChirpError::Database("username must not be empty".to_string()));
    }
    let tx = conn.transaction().map_err(db_err)?;
    tx.execute(
        "INSERT INTO users (username, email, created_at) VALUES (?1, ?2, ?3)",
        params![username, user.email, now],
    )
    .map_err(db_err)?;
    let user_id = tx.last_insert_rowid();
    tx.execute(
        "INSERT INTO feeds (owner_id, title, created_at) VALUES (?1, ?2, ?3)",
        params![user_id, username, now],
    )
    .map_err(db_err)?;
    let feed_id = tx.last_insert_rowid();
    tx.commit().map_err(db_err)?;
    Ok(User {
        user_id: UserId(user_id),
        username: username.to_string(),
        email: user.email.clone(),
        feed_id: FeedId(feed_id),
        created_at: now,
    })
}

fn create_feed(
    conn: &Connection,
    title: &str,
    owner: Option<UserId>,
    now: i64,
) -> StoreResult<Feed> {
    conn.execute(
        "INSERT INTO feeds (owner_id, title, created_at) VALUES (?1, ?2, ?3)",
        params![owner.map(|id| id.0), title, now],
    )
    .map_err(db_err)?;
    Ok(Feed {
        feed_id: FeedId(conn.last_insert_rowid()),
        owner,
        title: title.to_string(),
    })
}

fn create_authorization(
    conn: &Connection,
    authorization: Authorization,
    now: i64,
) -> StoreResult<Authorization> {
    conn.execute(
        "INSERT INTO authorizations (user_id, provider, uid, nickname, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            authorization.user_id.0,
            authorization.provider.as_str(),
            authorization.uid,
            authorization.nickname,
            now
        ],
    )
    .map_err(db_err)?;
    Ok(authorization)
}

fn insert_updates(
    conn: &mut Connection,
    updates: &[NewUpdate],
    now: i64,
) -> StoreResult<Vec<Update>> {
    let tx = conn.transaction().map_err(db_err)?;
    let mut inserted = Vec::with_capacity(updates.len());
    for update in updates {
        if fetch_feed(&tx, update.feed_id)?.is_none() {
            return Err(ChirpError::NotFound(format!("feed {}", update.feed_id)));
        }
        let created_at = update.created_at.unwrap_or(now);
        tx.execute(
            "INSERT INTO updates (feed_id, author, text, referral_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                update.feed_id.0,
                update.author,
                update.text,
                update.referral_id.map(|id| id.0),
                created_at
            ],
        )
        .map_err(db_err)?;
        inserted.push(Update {
            update_id: UpdateId(tx.last_insert_rowid()),
            feed_id: update.feed_id,
            author: update.author.clone(),
            text: update.text.clone(),
            referral_id: update.referral_id,
            created_at,
        });
    }
    tx.commit().map_err(db_err)?;
    Ok(inserted)
}

fn set_referral(
    conn: &Connection,
    update_id: UpdateId,
    referral_id: Option<UpdateId>,
) -> StoreResult<bool> {
    let changed = conn
        .execute(
            "UPDATE updates SET referral_id = ?2 WHERE update_id = ?1",
            params![update_id.0, referral_id.map(|id| id.0)],
        )
        .map_err(db_err)?;
    Ok(changed > 0)
}

fn fetch_feed(conn: &Connection, feed_id: FeedId) -> StoreResult<Option<Feed>> {
    conn.query_row(
        "SELECT feed_id, owner_id, title FROM feeds WHERE feed_id = ?1",
        [feed_id.0],
        |row| {
            Ok(Feed {
                feed_id: FeedId(row.get(0)?),
                owner: row.get::<_, Option<i64>>(1)?.map(UserId),
                title: row.get(2)?,
            })
        },
    )
    .optional()
    .map_err(db_err)
}

fn fetch_update(conn: &Connection, update_id: UpdateId) -> StoreResult<Option<Update>> {
    conn.query_row(
        &format!("{UPDATE_SELECT} WHERE update_id = ?1"),
        [update_id.0],
        row_to_update,
    )
    .optional()
    .map_err(db_err)
}

fn count_in_scope(conn: &Connection, scope: &UpdateScope) -> StoreResult<u64> {
    let (clause, values) = scope_filter(scope);
    let count: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM updates WHERE {clause}"),
            params_from_iter(values),
            |row| row.get(0),
        )
        .map_err(db_err)?;
    Ok(u64::try_from(count).unwrap_or(0))
}

fn scope_filter(scope: &UpdateScope) -> (&'static str, Vec<Value>) {
    match scope {
        UpdateScope::World => ("1 = 1", Vec::new()),
        UpdateScope::Feed(feed_id) => ("feed_id = ?", vec![Value::Integer(feed_id.0)]),
        UpdateScope::Mentions(username) => (
            "instr(lower(text), lower(?)) > 0",
            vec![Value::Text(format!("@{username}"))],
        ),
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        user_id: UserId(row.get(0)?),
        username: row.get(1)?,
        email: row.get(2)?,
        feed_id: FeedId(row.get(3)?),
        created_at: row.get(4)?,
    })
}

fn row_to_update(row: &rusqlite::Row<'_>) -> rusqlite::Result<Update> {
    Ok(Update {
        update_id: UpdateId(row.get(0)?),
        feed_id: FeedId(row.get(1)?),
        author: row.get(2)?,
        text: row.get(3)?,
        referral_id: row.get::<_, Option<i64>>(4)?.map(UpdateId),
        created_at: row.get(5)?,
    })
}

fn row_to_authorization(row: &rusqlite::Row<'_>) -> rusqlite::Result<Authorization> {
    let provider = row.get::<_, String>(1)?;
    Ok(Authorization {
        user_id: UserId(row.get(0)?),
        provider: Provider::parse(&provider).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "invalid provider",
                )),
            )
        })?,
        uid: row.get(2)?,
        nickname: row.get(3)?,
    })
}

fn db_err(error: rusqlite::Error) -> ChirpError {
    ChirpError::Database(error.to_string())
}

pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(saturating_millis)
        .unwrap_or(0)
}

fn saturating_millis(elapsed: Duration) -> i64 {
    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::{saturating_millis, unix_millis, FeedStore, NewUpdate, NewUser};
    use crate::config::{OutOfRangePolicy, PaginationConfig};
    use crate::errors::ChirpError;
    use crate::pagination::Cursor;
    use crate::types::{Authorization, FeedId, Provider, UpdateScope};

    fn temp_store() -> (FeedStore, TempDir) {
        let dir = TempDir::new().expect("tempdir");
        let db = dir.path().join("chirp.sqlite");
        (FeedStore::open(&db).expect("open store"), dir)
    }

    fn settings(page_size: u32) -> PaginationConfig {
        PaginationConfig {
            page_size,
            out_of_range: OutOfRangePolicy::Reject,
        }
    }

    fn update(feed_id: FeedId, text: &str, created_at: i64) -> NewUpdate {
        NewUpdate {
            feed_id,
            author: "test".to_string(),
            text: text.to_string(),
            referral_id: None,
            created_at: Some(created_at),
        }
    }

    #[test]
    fn millisecond_clock_saturates_instead_of_wrapping() {
        assert_eq!(saturating_millis(std::time::Duration::from_millis(7)), 7);
        assert_eq!(saturating_millis(std::time::Duration::MAX), i64::MAX);
        assert!(unix_millis() > 0);
    }

    #[test]
    fn creating_a_user_creates_their_feed() {
        let (store, _dir) = temp_store();
        let user = store
            .create_user(NewUser {
                username: "alice".to_string(),
                email: Some("alice@example.com".to_string()),
            })
            .expect("user");

        let feed = store.get_feed(user.feed_id).expect("get").expect("feed");
        assert_eq!(feed.owner, Some(user.user_id));
        assert_eq!(feed.title, "alice");
        assert_eq!(store.find_user("alice").expect("find"), Some(user.clone()));
        assert_eq!(store.get_user(user.user_id).expect("get"), Some(user));
    }

    #[test]
    fn duplicate_usernames_are_rejected() {
        let (store, _dir) = temp_store();
        let new_user = NewUser {
            username: "bob".to_string(),
            email: None,
        };
        store.create_user(new_user.clone()).expect("first");
        assert!(matches!(
            store.create_user(new_user),
            Err(ChirpError::Database(_))
        ));
    }

    #[test]
    fn listing_is_newest_first_with_id_tiebreak() {
        let (store, _dir) = temp_store();
        let feed = store.create_feed("news", None).expect("feed");
        let inserted = store
            .insert_updates(vec![
                update(feed.feed_id, "old", 1),
                update(feed.feed_id, "tie-a", 5),
                update(feed.feed_id, "tie-b", 5),
            ])
            .expect("insert");
        assert_eq!(inserted.len(), 3);

        let page = store
            .list_feed(&UpdateScope::World, None, &settings(20))
            .expect("list");
        let texts = page.items.iter().map(|u| u.text.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["tie-b", "tie-a", "old"]);
        assert!(!page.has_next());
        assert!(!page.has_previous());
    }

    #[test]
    fn pages_over_the_store_cover_every_update_once() {
        let (store, _dir) = temp_store();
        let feed = store.create_feed("news", None).expect("feed");
        store
            .insert_updates(
                (1..=54)
                    .map(|n| update(feed.feed_id, &format!("This is update #{n}"), 100))
                    .collect(),
            )
            .expect("insert");

        let scope = UpdateScope::Feed(feed.feed_id);
        let first = store.list_feed(&scope, None, &settings(20)).expect("first");
        let second = store
            .list_feed(&scope, first.next_cursor(), &settings(20))
            .expect("second");
        let third = store
            .list_feed(&scope, second.next_cursor(), &settings(20))
            .expect("third");
        assert!(second.has_previous() && second.has_next());
        assert!(third.has_previous() && !third.has_next());
        assert_eq!(third.items.len(), 14);

        let mut ids = first
            .items
            .iter()
            .chain(&second.items)
            .chain(&third.items)
            .map(|u| u.update_id)
            .collect::<Vec<_>>();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 54);

        let again = store
            .list_feed(&scope, Some(Cursor::page(2)), &settings(20))
            .expect("again");
        assert_eq!(again, second);

        let err = store
            .list_feed(&scope, Some(Cursor::page(4)), &settings(20))
            .expect_err("out of range");
        assert!(matches!(err, ChirpError::InvalidCursor { page: 4, last_page: 3 }));
    }

    #[test]
    fn scopes_filter_by_feed_and_mention() {
        let (store, _dir) = temp_store();
        let alice = store
            .create_user(NewUser {
                username: "alice".to_string(),
                email: None,
            })
            .expect("alice");
        let bob = store
            .create_user(NewUser {
                username: "bob".to_string(),
                email: None,
            })
            .expect("bob");
        store
            .insert_updates(vec![
                update(alice.feed_id, "hello world", 1),
                update(bob.feed_id, "hey @Alice, welcome", 2),
                update(bob.feed_id, "talking to myself", 3),
            ])
            .expect("insert");

        assert_eq!(store.count_updates(&UpdateScope::World).expect("world"), 3);
        assert_eq!(
            store
                .count_updates(&UpdateScope::Feed(bob.feed_id))
                .expect("feed"),
            2
        );
        let mentions = store
            .list_feed(
                &UpdateScope::Mentions("alice".to_string()),
                None,
                &settings(20),
            )
            .expect("mentions");
        assert_eq!(mentions.items.len(), 1);
        assert_eq!(mentions.items[0].text, "hey @Alice, welcome");
    }

    #[test]
    fn referral_can_be_set_after_insert() {
        let (store, _dir) = temp_store();
        let feed = store.create_feed("news", None).expect("feed");
        let original = store
            .insert_update(update(feed.feed_id, "original", 1))
            .expect("original");
        let reply = store
            .insert_update(update(feed.feed_id, "reply", 2))
            .expect("reply");

        assert!(store
            .set_referral(reply.update_id, Some(original.update_id))
            .expect("set"));
        let fetched = store.get_update(reply.update_id).expect("get").expect("row");
        assert_eq!(fetched.referral_id, Some(original.update_id));
        assert!(!store
            .set_referral(crate::types::UpdateId(9_999), None)
            .expect("missing"));
    }

    #[test]
    fn inserting_into_a_missing_feed_is_not_found() {
        let (store, _dir) = temp_store();
        let err = store
            .insert_update(update(FeedId(42), "lost", 1))
            .expect_err("missing feed");
        assert!(matches!(err, ChirpError::NotFound(_)));
    }

    #[test]
    fn authorizations_round_trip_by_user() {
        let (store, _dir) = temp_store();
        let user = store
            .create_user(NewUser {
                username: "carol".to_string(),
                email: None,
            })
            .expect("user");
        store
            .create_authorization(Authorization {
                user_id: user.user_id,
                provider: Provider::Twitter,
                uid: "12345".to_string(),
                nickname: "carol".to_string(),
            })
            .expect("auth");
        let auths = store.authorizations_for(user.user_id).expect("list");
        assert_eq!(auths.len(), 1);
        assert_eq!(auths[0].provider, Provider::Twitter);
    }

    #[test]
    fn drop_flushes_pending_writes() {
        let dir = TempDir::new().expect("tempdir");
        let db = dir.path().join("chirp.sqlite");
        {
            let store = FeedStore::open(&db).expect("open store");
            let feed = store.create_feed("news", None).expect("feed");
            store
                .insert_update(update(feed.feed_id, "survive-drop", 1))
                .expect("insert");
        }
        let reopened = FeedStore::open(&db).expect("reopen");
        let page = reopened
            .list_feed(&UpdateScope::World, None, &settings(20))
            .expect("list");
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].text, "survive-drop");
    }

    #[test]
    fn open_rejects_zero_byte_file() {
        let dir = TempDir::new().expect("tempdir");
        let db = dir.path().join("chirp.sqlite");
        std::fs::write(&db, b"").expect("create zero-byte file");
        match FeedStore::open(&db) {
            Err(ChirpError::Database(msg)) => {
                assert!(msg.contains("0 bytes"), "unexpected message: {msg}");
            }
            Err(e) => panic!("expected Database error, got: {e}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }
}
