use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::Result;
use crate::models::Project;

#[derive(Debug, Clone)]
pub struct ProjectRepository {
    pool: SqlitePool,
}

impl ProjectRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch the named project, creating it on first use. The stored path
    /// follows the configuration.
    pub async fn get_or_create(&self, name: &str, path: &str) -> Result<Project> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO project (name, path, created_at, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET path = excluded.path, updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(path)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let (id,): (i64,) = sqlx::query_as("SELECT id FROM project WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;

        Ok(Project {
            id,
            name: name.to_string(),
            path: path.to_string(),
        })
    }
}
