use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgPool, FromRow};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// A persisted lead. `website` is the natural key: one row per site, ever.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Prospect {
    pub id: String,
    pub name: String,
    pub website: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Re-hosted logo URL, never the scraped source
    pub logo: Option<String>,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProspect {
    pub name: String,
    pub website: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub logo: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(Prospect),
    /// Another writer already stored this website.
    Conflict,
}

#[async_trait]
pub trait ProspectStore: Send + Sync {
    /// True when a prospect with this website is already stored.
    async fn exists(&self, website: &str) -> Result<bool>;

    /// Append-only insert; the store assigns `id` and `created_at`.
    async fn add(&self, prospect: NewProspect) -> Result<InsertOutcome>;

    /// Every prospect, oldest first.
    async fn list_all(&self) -> Result<Vec<Prospect>>;
}

pub async fn init_db(pool: &PgPool) -> Result<()> {
    // 1. Base table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prospects (
            id VARCHAR PRIMARY KEY,
            name TEXT NOT NULL,
            website TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(pool)
    .await?;

    // 2. Schema evolution: logo came later
    sqlx::query("ALTER TABLE prospects ADD COLUMN IF NOT EXISTS logo TEXT;")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS prospects_created_at_idx ON prospects (created_at);")
        .execute(pool)
        .await?;

    // 3. One row per website. Tables that already hold duplicates keep working
    //    without the constraint, with the check-then-insert race reopened.
    if let Err(e) = sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS prospects_website_key ON prospects (website);")
        .execute(pool)
        .await
    {
        warn!("⚠️ Could not enforce unique websites (existing duplicates?): {}", e);
    }

    info!("💾 Database schema ready");
    Ok(())
}

pub struct PgProspectStore {
    pool: PgPool,
}

impl PgProspectStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProspectStore for PgProspectStore {
    async fn exists(&self, website: &str) -> Result<bool> {
        let found: Option<(String,)> = sqlx::query_as("SELECT id FROM prospects WHERE website = $1 LIMIT 1")
            .bind(website)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn add(&self, prospect: NewProspect) -> Result<InsertOutcome> {
        let id = Uuid::new_v4().to_string();

        let inserted: Option<Prospect> = sqlx::query_as(
            r#"
            INSERT INTO prospects (id, name, website, email, phone, logo)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (website) DO NOTHING
            RETURNING id, name, website, email, phone, logo, created_at
            "#,
        )
        .bind(&id)
        .bind(&prospect.name)
        .bind(&prospect.website)
        .bind(&prospect.email)
        .bind(&prospect.phone)
        .bind(&prospect.logo)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match inserted {
            Some(row) => {
                info!("💾 Saved prospect {} ({})", row.name, row.website);
                InsertOutcome::Inserted(row)
            }
            None => InsertOutcome::Conflict,
        })
    }

    async fn list_all(&self) -> Result<Vec<Prospect>> {
        let rows = sqlx::query_as(
            "SELECT id, name, website, email, phone, logo, created_at FROM prospects ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
