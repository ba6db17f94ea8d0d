//! Relation rows. A relation with `to_id IS NULL` is a forward reference.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{into_outcome, Outcome};
use crate::error::Result;
use crate::models::{NewRelation, Relation};

const RELATION_COLUMNS: &str = "r.id, r.from_id, r.to_id, r.to_name, r.relation_type, r.context";

fn relation_from_row(row: &SqliteRow) -> Relation {
    Relation {
        id: row.get("id"),
        from_id: row.get("from_id"),
        to_id: row.get("to_id"),
        to_name: row.get("to_name"),
        relation_type: row.get("relation_type"),
        context: row.get("context"),
    }
}

#[derive(Debug, Clone)]
pub struct RelationRepository {
    pool: SqlitePool,
    project_id: i64,
}

impl RelationRepository {
    pub fn new(pool: SqlitePool, project_id: i64) -> Self {
        Self { pool, project_id }
    }

    /// Insert one relation. A duplicate `(from_id, to_name, relation_type)`
    /// comes back as [`Outcome::Conflict`].
    pub async fn insert(&self, relation: &NewRelation) -> Result<Outcome<Relation>> {
        let result = sqlx::query(
            "INSERT INTO relation (from_id, to_id, to_name, relation_type, context) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(relation.from_id)
        .bind(relation.to_id)
        .bind(&relation.to_name)
        .bind(&relation.relation_type)
        .bind(&relation.context)
        .execute(&self.pool)
        .await;

        Ok(match into_outcome(result)? {
            Outcome::Written(done) => Outcome::Written(Relation {
                id: done.last_insert_rowid(),
                from_id: relation.from_id,
                to_id: relation.to_id,
                to_name: relation.to_name.clone(),
                relation_type: relation.relation_type.clone(),
                context: relation.context.clone(),
            }),
            Outcome::Conflict(c) => Outcome::Conflict(c),
        })
    }

    pub async fn delete_outgoing(&self, from_id: i64) -> Result<u64> {
        let done = sqlx::query("DELETE FROM relation WHERE from_id = ?")
            .bind(from_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    pub async fn outgoing(&self, from_id: i64) -> Result<Vec<Relation>> {
        let sql = format!("SELECT {RELATION_COLUMNS} FROM relation r WHERE r.from_id = ? ORDER BY r.id");
        let rows = sqlx::query(&sql)
            .bind(from_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(relation_from_row).collect())
    }

    /// Every unresolved relation whose source belongs to this project.
    pub async fn find_unresolved(&self) -> Result<Vec<Relation>> {
        let sql = format!(
            "SELECT {RELATION_COLUMNS} FROM relation r JOIN entity e ON e.id = r.from_id \
             WHERE e.project_id = ? AND r.to_id IS NULL ORDER BY r.id"
        );
        let rows = sqlx::query(&sql)
            .bind(self.project_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(relation_from_row).collect())
    }

    /// Point a forward reference at its target, renaming it to the target's
    /// title. Renaming can collide with an existing triple.
    pub async fn resolve(&self, id: i64, to_id: i64, to_name: &str) -> Result<Outcome<bool>> {
        let result = sqlx::query("UPDATE relation SET to_id = ?, to_name = ? WHERE id = ?")
            .bind(to_id)
            .bind(to_name)
            .bind(id)
            .execute(&self.pool)
            .await;
        Ok(match into_outcome(result)? {
            Outcome::Written(done) => Outcome::Written(done.rows_affected() > 0),
            Outcome::Conflict(c) => Outcome::Conflict(c),
        })
    }

    pub async fn count(&self, resolved: Option<bool>) -> Result<i64> {
        let filter = match resolved {
            Some(true) => " AND r.to_id IS NOT NULL",
            Some(false) => " AND r.to_id IS NULL",
            None => "",
        };
        let sql = format!(
            "SELECT COUNT(*) FROM relation r JOIN entity e ON e.id = r.from_id \
             WHERE e.project_id = ?{filter}"
        );
        let n: i64 = sqlx::query_scalar(&sql)
            .bind(self.project_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}
