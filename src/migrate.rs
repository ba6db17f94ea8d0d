//! Database schema migrations (idempotent).
//!
//! Creates the relational tables (`project`, `entity`, `observation`,
//! `relation`) and the FTS5 `search_index` virtual table.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index on an open pool. Safe to call repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS project (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            path TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // NULL permalinks never collide, so non-markdown files may share them.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entity (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL REFERENCES project(id),
            title TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_metadata TEXT NOT NULL DEFAULT '{}',
            content_type TEXT NOT NULL,
            permalink TEXT,
            file_path TEXT NOT NULL,
            checksum TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(project_id, file_path),
            UNIQUE(project_id, permalink)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS observation (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id INTEGER NOT NULL REFERENCES entity(id),
            category TEXT NOT NULL,
            content TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '[]',
            context TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS relation (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            from_id INTEGER NOT NULL REFERENCES entity(id),
            to_id INTEGER REFERENCES entity(id),
            to_name TEXT NOT NULL,
            relation_type TEXT NOT NULL,
            context TEXT,
            UNIQUE(from_id, to_name, relation_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='search_index'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE search_index USING fts5(
                id UNINDEXED,
                title,
                content_stems,
                content_snippet,
                permalink,
                file_path UNINDEXED,
                type UNINDEXED,
                project_id UNINDEXED,
                metadata UNINDEXED,
                entity_id UNINDEXED,
                from_id UNINDEXED,
                to_id UNINDEXED,
                relation_type UNINDEXED,
                category UNINDEXED,
                created_at UNINDEXED,
                updated_at UNINDEXED,
                prefix = '1,2,3,4'
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entity_project ON entity(project_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entity_title ON entity(project_id, title)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_observation_entity ON observation(entity_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_relation_from ON relation(from_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_relation_to ON relation(to_id)")
        .execute(pool)
        .await?;

    Ok(())
}
