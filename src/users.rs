use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub google_id: String,
    pub picture: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewGoogleUser {
    pub google_id: String,
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
}

type UserRow = (String, String, String, String, Option<String>, String, String);

fn user_from_row((id, email, name, google_id, picture, created_at, updated_at): UserRow) -> User {
    User {
        id,
        email,
        name,
        google_id,
        picture,
        created_at,
        updated_at,
    }
}

#[derive(Clone)]
pub struct UserDirectory {
    pool: SqlitePool,
}

impl UserDirectory {
    /// Open the user database, creating it if needed
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        tracing::debug!("Connecting to user database: {}", db_url);

        let pool = SqlitePool::connect(&db_url).await.with_context(|| {
            format!("Failed to connect to user database at: {}", db_path.display())
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                google_id TEXT NOT NULL UNIQUE,
                picture TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("Failed to create users table")?;

        tracing::info!("User database initialized: {}", db_path.display());

        Ok(Self { pool })
    }

    pub async fn find_by_google_id(&self, google_id: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, name, google_id, picture, created_at, updated_at
            FROM users
            WHERE google_id = ?
            "#,
        )
        .bind(google_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user by Google id")?;

        Ok(row.map(user_from_row))
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, name, google_id, picture, created_at, updated_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user")?;

        Ok(row.map(user_from_row))
    }

    /// Register a user who signed in with Google for the first time
    pub async fn create_with_google(&self, new_user: NewGoogleUser) -> Result<User> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO users (id, email, name, google_id, picture, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&new_user.email)
        .bind(&new_user.name)
        .bind(&new_user.google_id)
        .bind(&new_user.picture)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::info!("Created new user: {}", id);
                Ok(User {
                    id,
                    email: new_user.email,
                    name: new_user.name,
                    google_id: new_user.google_id,
                    picture: new_user.picture,
                    created_at: now.clone(),
                    updated_at: now,
                })
            }
            Err(e) => {
                let message = e.to_string();
                if message.contains("UNIQUE constraint failed: users.google_id") {
                    anyhow::bail!(
                        "A user with the Google id '{}' already exists",
                        new_user.google_id
                    )
                } else if message.contains("UNIQUE constraint failed: users.email") {
                    anyhow::bail!("A user with the email '{}' already exists", new_user.email)
                } else {
                    Err(e).context("Failed to insert user")
                }
            }
        }
    }
}
