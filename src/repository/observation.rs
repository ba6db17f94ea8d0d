//! Observation rows. Tags are stored as a JSON array.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::Result;
use crate::models::{NewObservation, Observation};

fn observation_from_row(row: &SqliteRow) -> Observation {
    let tags_json: String = row.get("tags");
    Observation {
        id: row.get("id"),
        entity_id: row.get("entity_id"),
        category: row.get("category"),
        content: row.get("content"),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        context: row.get("context"),
    }
}

#[derive(Debug, Clone)]
pub struct ObservationRepository {
    pool: SqlitePool,
}

impl ObservationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn for_entity(&self, entity_id: i64) -> Result<Vec<Observation>> {
        let rows = sqlx::query(
            "SELECT id, entity_id, category, content, tags, context FROM observation \
             WHERE entity_id = ? ORDER BY id",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(observation_from_row).collect())
    }

    /// Replace an entity's observations atomically and return the new rows.
    pub async fn replace(
        &self,
        entity_id: i64,
        observations: &[NewObservation],
    ) -> Result<Vec<Observation>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM observation WHERE entity_id = ?")
            .bind(entity_id)
            .execute(&mut *tx)
            .await?;

        let mut stored = Vec::with_capacity(observations.len());
        for obs in observations {
            let tags_json = serde_json::to_string(&obs.tags)?;
            let done = sqlx::query(
                "INSERT INTO observation (entity_id, category, content, tags, context) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(entity_id)
            .bind(&obs.category)
            .bind(&obs.content)
            .bind(&tags_json)
            .bind(&obs.context)
            .execute(&mut *tx)
            .await?;

            stored.push(Observation {
                id: done.last_insert_rowid(),
                entity_id,
                category: obs.category.clone(),
                content: obs.content.clone(),
                tags: obs.tags.clone(),
                context: obs.context.clone(),
            });
        }

        tx.commit().await?;
        Ok(stored)
    }

    pub async fn count_for_project(&self, project_id: i64) -> Result<i64> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM observation o JOIN entity e ON e.id = o.entity_id \
             WHERE e.project_id = ?",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }
}
