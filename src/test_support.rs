//! Shared fixtures for unit tests.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::migrate::apply_schema;
use crate::models::Project;
use crate::repository::{
    EntityRepository, ObservationRepository, ProjectRepository, RelationRepository,
};

pub(crate) struct Repositories {
    pub pool: SqlitePool,
    pub project: Project,
    pub entities: EntityRepository,
    pub observations: ObservationRepository,
    pub relations: RelationRepository,
}

/// A migrated in-memory database. One connection, so every query sees the
/// same database.
pub(crate) async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    apply_schema(&pool).await.unwrap();
    pool
}

pub(crate) async fn memory_repositories() -> Repositories {
    let pool = memory_pool().await;
    let project = ProjectRepository::new(pool.clone())
        .get_or_create("test", "/tmp/test")
        .await
        .unwrap();
    Repositories {
        entities: EntityRepository::new(pool.clone(), project.id),
        observations: ObservationRepository::new(pool.clone()),
        relations: RelationRepository::new(pool.clone(), project.id),
        project,
        pool,
    }
}
