//! Entity rows, scoped to one project.

use std::collections::HashMap;

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{into_outcome, Outcome};
use crate::error::Result;
use crate::models::{Entity, EntityFields, Metadata};

const ENTITY_COLUMNS: &str = "id, project_id, title, entity_type, entity_metadata, content_type, \
                              permalink, file_path, checksum, created_at, updated_at";

fn entity_from_row(row: &SqliteRow) -> Entity {
    let metadata_json: String = row.get("entity_metadata");
    let entity_metadata: Metadata = serde_json::from_str(&metadata_json).unwrap_or_default();
    Entity {
        id: row.get("id"),
        project_id: row.get("project_id"),
        title: row.get("title"),
        entity_type: row.get("entity_type"),
        entity_metadata,
        content_type: row.get("content_type"),
        permalink: row.get("permalink"),
        file_path: row.get("file_path"),
        checksum: row.get("checksum"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[derive(Debug, Clone)]
pub struct EntityRepository {
    pool: SqlitePool,
    project_id: i64,
}

impl EntityRepository {
    pub fn new(pool: SqlitePool, project_id: i64) -> Self {
        Self { pool, project_id }
    }

    pub fn project_id(&self) -> i64 {
        self.project_id
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Entity>> {
        let sql = format!("SELECT {ENTITY_COLUMNS} FROM entity WHERE id = ? AND project_id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(self.project_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(entity_from_row))
    }

    pub async fn find_by_file_path(&self, file_path: &str) -> Result<Option<Entity>> {
        let sql =
            format!("SELECT {ENTITY_COLUMNS} FROM entity WHERE file_path = ? AND project_id = ?");
        let row = sqlx::query(&sql)
            .bind(file_path)
            .bind(self.project_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(entity_from_row))
    }

    pub async fn find_by_permalink(&self, permalink: &str) -> Result<Option<Entity>> {
        let sql =
            format!("SELECT {ENTITY_COLUMNS} FROM entity WHERE permalink = ? AND project_id = ?");
        let row = sqlx::query(&sql)
            .bind(permalink)
            .bind(self.project_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(entity_from_row))
    }

    /// Entities with an exact title, shortest path first, then oldest.
    pub async fn find_by_title(&self, title: &str) -> Result<Vec<Entity>> {
        let sql = format!(
            "SELECT {ENTITY_COLUMNS} FROM entity WHERE title = ? AND project_id = ? \
             ORDER BY length(file_path), id"
        );
        let rows = sqlx::query(&sql)
            .bind(title)
            .bind(self.project_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(entity_from_row).collect())
    }

    pub async fn find_all(&self) -> Result<Vec<Entity>> {
        let sql = format!("SELECT {ENTITY_COLUMNS} FROM entity WHERE project_id = ? ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(self.project_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(entity_from_row).collect())
    }

    /// `file_path → checksum` for every entity in the project.
    pub async fn file_state(&self) -> Result<HashMap<String, Option<String>>> {
        let rows: Vec<(String, Option<String>)> =
            sqlx::query_as("SELECT file_path, checksum FROM entity WHERE project_id = ?")
                .bind(self.project_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entity WHERE project_id = ?")
            .bind(self.project_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn insert(&self, fields: &EntityFields) -> Result<Outcome<Entity>> {
        let metadata_json = serde_json::to_string(&fields.entity_metadata)?;
        let result = sqlx::query(
            r#"
            INSERT INTO entity (project_id, title, entity_type, entity_metadata, content_type,
                                permalink, file_path, checksum, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(self.project_id)
        .bind(&fields.title)
        .bind(&fields.entity_type)
        .bind(&metadata_json)
        .bind(&fields.content_type)
        .bind(&fields.permalink)
        .bind(&fields.file_path)
        .bind(&fields.checksum)
        .bind(fields.created_at)
        .bind(fields.updated_at)
        .execute(&self.pool)
        .await;

        match into_outcome(result)? {
            Outcome::Written(done) => {
                let id = done.last_insert_rowid();
                Ok(Outcome::Written(Entity {
                    id,
                    project_id: self.project_id,
                    title: fields.title.clone(),
                    entity_type: fields.entity_type.clone(),
                    entity_metadata: fields.entity_metadata.clone(),
                    content_type: fields.content_type.clone(),
                    permalink: fields.permalink.clone(),
                    file_path: fields.file_path.clone(),
                    checksum: fields.checksum.clone(),
                    created_at: fields.created_at,
                    updated_at: fields.updated_at,
                }))
            }
            Outcome::Conflict(c) => Ok(Outcome::Conflict(c)),
        }
    }

    /// Rewrite every column of an existing row. `Written(None)` means no row
    /// had that id. `created_at` is left untouched.
    pub async fn update(&self, id: i64, fields: &EntityFields) -> Result<Outcome<Option<Entity>>> {
        let metadata_json = serde_json::to_string(&fields.entity_metadata)?;
        let result = sqlx::query(
            r#"
            UPDATE entity SET title = ?, entity_type = ?, entity_metadata = ?, content_type = ?,
                              permalink = ?, file_path = ?, checksum = ?, updated_at = ?
            WHERE id = ? AND project_id = ?
            "#,
        )
        .bind(&fields.title)
        .bind(&fields.entity_type)
        .bind(&metadata_json)
        .bind(&fields.content_type)
        .bind(&fields.permalink)
        .bind(&fields.file_path)
        .bind(&fields.checksum)
        .bind(fields.updated_at)
        .bind(id)
        .bind(self.project_id)
        .execute(&self.pool)
        .await;

        match into_outcome(result)? {
            Outcome::Written(done) if done.rows_affected() == 0 => Ok(Outcome::Written(None)),
            Outcome::Written(_) => Ok(Outcome::Written(self.find_by_id(id).await?)),
            Outcome::Conflict(c) => Ok(Outcome::Conflict(c)),
        }
    }

    /// Record the final checksum. Returns false when no row matched.
    pub async fn set_checksum(&self, id: i64, checksum: Option<&str>) -> Result<bool> {
        let done = sqlx::query("UPDATE entity SET checksum = ? WHERE id = ? AND project_id = ?")
            .bind(checksum)
            .bind(id)
            .bind(self.project_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Delete an entity with its observations and outgoing relations in one
    /// transaction. Incoming relations become forward references again.
    pub async fn delete_cascade(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM observation WHERE entity_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM relation WHERE from_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE relation SET to_id = NULL WHERE to_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let done = sqlx::query("DELETE FROM entity WHERE id = ? AND project_id = ?")
            .bind(id)
            .bind(self.project_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(done.rows_affected() > 0)
    }
}
