//! Database module for SQLite persistence.
//!
//! SQLite is the source of truth for users, their embedded donation forms and
//! the ongoing donation queue. Reads are public on [`Repository`]; writes to
//! the two donation stores are crate-private so that the lifecycle
//! coordinator stays their only writer.

mod codec;
pub(crate) mod donation_forms;
pub(crate) mod ongoing_donations;
pub(crate) mod users;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;

use crate::errors::AppError;

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    // Run embedded migrations
    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            business_name TEXT NOT NULL DEFAULT '',
            phone_number TEXT,
            is_admin INTEGER NOT NULL DEFAULT 0,
            auth_subject TEXT UNIQUE,
            roles TEXT NOT NULL DEFAULT '[]',
            push_tokens TEXT NOT NULL DEFAULT '[]',
            pickup_addresses TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dishes (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            dish_name TEXT NOT NULL,
            cost REAL NOT NULL,
            pounds REAL NOT NULL,
            allergens TEXT NOT NULL DEFAULT '[]',
            image_link TEXT NOT NULL DEFAULT '',
            comments TEXT NOT NULL DEFAULT '',
            favorite INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    let donation_forms = format!(
        r#"
        CREATE TABLE IF NOT EXISTS donation_forms (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            position INTEGER NOT NULL,
            ongoing INTEGER NOT NULL,
            {},
            created_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            UNIQUE (user_id, position)
        );
        "#,
        codec::DETAIL_COLUMN_DEFINITIONS
    );
    sqlx::query(&donation_forms).execute(pool).await?;

    let ongoing_donations = format!(
        r#"
        CREATE TABLE IF NOT EXISTS ongoing_donations (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            business_name TEXT NOT NULL,
            {},
            version INTEGER NOT NULL DEFAULT 1
        );
        "#,
        codec::DETAIL_COLUMN_DEFINITIONS
    );
    sqlx::query(&ongoing_donations).execute(pool).await?;

    // Create indexes for common queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_dishes_user_id ON dishes(user_id);
        CREATE INDEX IF NOT EXISTS idx_donation_forms_user_id ON donation_forms(user_id);
        CREATE INDEX IF NOT EXISTS idx_donation_forms_status ON donation_forms(status);
        CREATE INDEX IF NOT EXISTS idx_ongoing_donations_user_id ON ongoing_donations(user_id);
        CREATE INDEX IF NOT EXISTS idx_users_is_admin ON users(is_admin);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Shared storage handle, built once at start-up and passed to components.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Raw pool for test setup such as fault-injection triggers. Writes to
    /// the donation tables go through `LifecycleCoordinator`.
    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open a transaction scope. Dropping it without commit rolls back.
    pub(crate) async fn begin(&self) -> Result<Transaction<'static, Sqlite>, AppError> {
        Ok(self.pool.begin().await?)
    }
}
