use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

#[cfg(test)]
use mockall::automock;

use crate::db::models::{Statistics, StoredMessage, TopUser, UserRecord};
use crate::error::DatabaseError;

pub type Result<T> = std::result::Result<T, DatabaseError>;

/// The interface the protocol engine consumes. Any conforming
/// implementation suffices; tests mock it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Look a user up by nickname (refreshing `last_seen`) or create one.
    async fn find_or_create_user(&self, nickname: &str, address: &str) -> Result<UserRecord>;

    async fn create_session(&self, user_id: i64, nickname: &str, address: &str) -> Result<i64>;

    async fn end_session(&self, session_id: i64) -> Result<()>;

    async fn save_message(
        &self,
        session_id: Option<i64>,
        nickname: &str,
        address: &str,
        text: &str,
        kind: &str,
    ) -> Result<()>;

    async fn increment_user_messages(&self, user_id: i64) -> Result<()>;

    /// Newest `limit` messages, returned oldest-first.
    async fn recent_messages(&self, limit: i64) -> Result<Vec<StoredMessage>>;

    async fn statistics(&self) -> Result<Statistics>;

    async fn top_users(&self, limit: i64) -> Result<Vec<TopUser>>;

    /// Delete messages older than `days`. Returns the number deleted.
    async fn clean_old_messages(&self, days: i64) -> Result<u64>;

    // The named lifetime is what lets automock generate this method.
    async fn log_system<'a>(&self, kind: &str, message: &str, address: Option<&'a str>)
        -> Result<()>;
}

/// SQLite-backed store. Schema is created in code on connect.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        info!(url, "connecting to database");

        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| DatabaseError::Connection(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        info!("database initialized");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                nickname TEXT NOT NULL,
                ip_address TEXT,
                first_join DATETIME DEFAULT CURRENT_TIMESTAMP,
                last_seen DATETIME DEFAULT CURRENT_TIMESTAMP,
                total_messages INTEGER DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER,
                nickname TEXT NOT NULL,
                ip_address TEXT,
                join_time DATETIME DEFAULT CURRENT_TIMESTAMP,
                leave_time DATETIME,
                duration INTEGER,
                FOREIGN KEY (user_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER,
                nickname TEXT NOT NULL,
                ip_address TEXT,
                message TEXT NOT NULL,
                message_type TEXT DEFAULT 'user',
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS system_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                log_type TEXT NOT NULL,
                message TEXT NOT NULL,
                ip_address TEXT,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn find_or_create_user(&self, nickname: &str, address: &str) -> Result<UserRecord> {
        let existing = sqlx::query_as::<_, UserRecord>(
            "SELECT id, nickname, ip_address, total_messages FROM users \
             WHERE nickname = ? ORDER BY last_seen DESC LIMIT 1",
        )
        .bind(nickname)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(user) = existing {
            sqlx::query("UPDATE users SET last_seen = CURRENT_TIMESTAMP WHERE id = ?")
                .bind(user.id)
                .execute(&self.pool)
                .await?;
            return Ok(user);
        }

        let result = sqlx::query("INSERT INTO users (nickname, ip_address) VALUES (?, ?)")
            .bind(nickname)
            .bind(address)
            .execute(&self.pool)
            .await?;

        Ok(UserRecord {
            id: result.last_insert_rowid(),
            nickname: nickname.to_string(),
            ip_address: Some(address.to_string()),
            total_messages: 0,
        })
    }

    async fn create_session(&self, user_id: i64, nickname: &str, address: &str) -> Result<i64> {
        let result =
            sqlx::query("INSERT INTO sessions (user_id, nickname, ip_address) VALUES (?, ?, ?)")
                .bind(user_id)
                .bind(nickname)
                .bind(address)
                .execute(&self.pool)
                .await?;
        Ok(result.last_insert_rowid())
    }

    async fn end_session(&self, session_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sessions
            SET leave_time = CURRENT_TIMESTAMP,
                duration = CAST((julianday(CURRENT_TIMESTAMP) - julianday(join_time)) * 86400 AS INTEGER)
            WHERE id = ?
            "#,
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_message(
        &self,
        session_id: Option<i64>,
        nickname: &str,
        address: &str,
        text: &str,
        kind: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO messages (session_id, nickname, ip_address, message, message_type) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(nickname)
        .bind(address)
        .bind(text)
        .bind(kind)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_user_messages(&self, user_id: i64) -> Result<()> {
        sqlx::query("UPDATE users SET total_messages = total_messages + 1 WHERE id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent_messages(&self, limit: i64) -> Result<Vec<StoredMessage>> {
        let mut rows = sqlx::query_as::<_, StoredMessage>(
            r#"
            SELECT nickname, message, message_type,
                   strftime('%H:%M:%S', timestamp) AS time
            FROM messages
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.reverse();
        Ok(rows)
    }

    async fn statistics(&self) -> Result<Statistics> {
        let total_users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        let total_messages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;
        let total_sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&self.pool)
            .await?;
        let today_messages: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE DATE(timestamp) = DATE('now')",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(Statistics {
            total_users,
            total_messages,
            total_sessions,
            today_messages,
        })
    }

    async fn top_users(&self, limit: i64) -> Result<Vec<TopUser>> {
        let rows = sqlx::query_as::<_, TopUser>(
            r#"
            SELECT nickname, total_messages,
                   strftime('%Y-%m-%d %H:%M:%S', last_seen) AS last_seen
            FROM users
            ORDER BY total_messages DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn clean_old_messages(&self, days: i64) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM messages WHERE timestamp < datetime('now', '-' || ? || ' days')")
                .bind(days)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn log_system<'a>(
        &self,
        kind: &str,
        message: &str,
        address: Option<&'a str>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO system_logs (log_type, message, ip_address) VALUES (?, ?, ?)")
            .bind(kind)
            .bind(message)
            .bind(address)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteStore {
        // One pooled connection, otherwise every checkout sees a fresh
        // in-memory database.
        SqliteStore::connect("sqlite::memory:", 1)
            .await
            .expect("in-memory store")
    }

    #[tokio::test]
    async fn test_find_or_create_user_reuses_rows() {
        let store = memory_store().await;

        let first = store
            .find_or_create_user("Ann", "127.0.0.1:5000")
            .await
            .unwrap();
        let second = store
            .find_or_create_user("Ann", "127.0.0.1:6000")
            .await
            .unwrap();
        assert_eq!(first.id, second.id);

        let other = store
            .find_or_create_user("Bob", "127.0.0.1:7000")
            .await
            .unwrap();
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = memory_store().await;
        let user = store.find_or_create_user("Ann", "addr").await.unwrap();
        let session_id = store.create_session(user.id, "Ann", "addr").await.unwrap();
        store.end_session(session_id).await.unwrap();

        let (leave_time, duration): (Option<String>, Option<i64>) = sqlx::query_as(
            "SELECT leave_time, duration FROM sessions WHERE id = ?",
        )
        .bind(session_id)
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert!(leave_time.is_some());
        assert!(duration.is_some());
    }

    #[tokio::test]
    async fn test_recent_messages_oldest_first() {
        let store = memory_store().await;
        for i in 0..5 {
            store
                .save_message(None, "Ann", "addr", &format!("msg {i}"), "user")
                .await
                .unwrap();
        }

        let history = store.recent_messages(3).await.unwrap();
        let texts: Vec<&str> = history.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, ["msg 2", "msg 3", "msg 4"]);
        assert_eq!(history[0].message_type, "user");
        assert_eq!(history[0].time.len(), 8);
    }

    #[tokio::test]
    async fn test_statistics_counts() {
        let store = memory_store().await;
        let user = store.find_or_create_user("Ann", "addr").await.unwrap();
        let session = store.create_session(user.id, "Ann", "addr").await.unwrap();
        store
            .save_message(Some(session), "Ann", "addr", "hello", "user")
            .await
            .unwrap();
        store.increment_user_messages(user.id).await.unwrap();

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total_users, 1);
        assert_eq!(stats.total_messages, 1);
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.today_messages, 1);

        let top = store.top_users(10).await.unwrap();
        assert_eq!(top[0].nickname, "Ann");
        assert_eq!(top[0].total_messages, 1);
    }

    #[tokio::test]
    async fn test_clean_old_messages_only_drops_aged_rows() {
        let store = memory_store().await;
        store
            .save_message(None, "Ann", "addr", "old", "user")
            .await
            .unwrap();
        store
            .save_message(None, "Ann", "addr", "fresh", "user")
            .await
            .unwrap();
        sqlx::query("UPDATE messages SET timestamp = datetime('now', '-40 days') WHERE message = 'old'")
            .execute(store.pool())
            .await
            .unwrap();

        let deleted = store.clean_old_messages(30).await.unwrap();
        assert_eq!(deleted, 1);
        let remaining = store.recent_messages(10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message, "fresh");
    }

    #[tokio::test]
    async fn test_system_log_insert() {
        let store = memory_store().await;
        store
            .log_system("connect", "client 1 connected", Some("127.0.0.1:5000"))
            .await
            .unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM system_logs")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_mocked_log_system_takes_optional_address() {
        let mut store = MockChatStore::new();
        store.expect_log_system().times(2).returning(|_, _, _| Ok(()));

        store
            .log_system("connect", "client 1 connected", Some("127.0.0.1:5000"))
            .await
            .unwrap();
        store
            .log_system("cleanup", "removed 0 old messages", None)
            .await
            .unwrap();
    }
}
