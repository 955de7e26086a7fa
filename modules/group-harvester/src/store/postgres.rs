// Postgres record store. Each keyword batch is one transaction.

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use harvest_common::HarvestedPost;

use crate::traits::RecordStore;

pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;
        info!("Connected to Postgres");
        Ok(Self::new(pool))
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn load_texts(&self) -> Result<HashSet<String>> {
        let texts = sqlx::query_scalar::<_, String>("SELECT text FROM harvested_posts")
            .fetch_all(&self.pool)
            .await
            .context("Failed to read harvested texts")?;
        Ok(texts
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect())
    }

    async fn append(&self, posts: &[HarvestedPost]) -> Result<()> {
        if posts.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for post in posts {
            sqlx::query(
                r#"
                INSERT INTO harvested_posts
                    (id, text, posted_at, url, keyword, evidence_ref, captured_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&post.text)
            .bind(post.captured_at_date)
            .bind(&post.url)
            .bind(&post.keyword)
            .bind(&post.evidence_ref)
            .bind(post.captured_date)
            .execute(&mut *tx)
            .await
            .context("Failed to insert harvested post")?;
        }
        tx.commit().await.context("Failed to commit batch")?;
        Ok(())
    }
}
