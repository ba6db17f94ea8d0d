//! Wiring: one open knowledge base with every service built on a shared pool.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::entity_service::EntityService;
use crate::file_service::FileService;
use crate::link_resolver::{LinkResolver, RepositoryLinkResolver};
use crate::migrate::apply_schema;
use crate::models::Project;
use crate::repository::{
    EntityRepository, ObservationRepository, ProjectRepository, RelationRepository,
};
use crate::search::{SearchRepository, SearchService};
use crate::sync::{SyncOptions, SyncService};

pub struct KnowledgeBase {
    pub config: Config,
    pub pool: SqlitePool,
    pub project: Project,
    pub entities: EntityRepository,
    pub observations: ObservationRepository,
    pub relations: RelationRepository,
    pub search: SearchService,
    pub entity_service: EntityService,
    pub sync: SyncService,
}

impl KnowledgeBase {
    /// Connect, apply the schema and register the configured project.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        apply_schema(&pool).await?;

        let root = config.project.root.display().to_string();
        let project = ProjectRepository::new(pool.clone())
            .get_or_create(&config.project.name, &root)
            .await
            .with_context(|| format!("Failed to register project '{}'", config.project.name))?;

        Ok(Self::with_pool(config.clone(), pool, project))
    }

    /// Build every service on an already migrated pool.
    pub fn with_pool(config: Config, pool: SqlitePool, project: Project) -> Self {
        let files = FileService::new(config.project.root.clone());
        let entities = EntityRepository::new(pool.clone(), project.id);
        let observations = ObservationRepository::new(pool.clone());
        let relations = RelationRepository::new(pool.clone(), project.id);
        let search = SearchService::new(
            SearchRepository::new(pool.clone(), project.id),
            entities.clone(),
            observations.clone(),
            relations.clone(),
            files.clone(),
        );
        let links: Arc<dyn LinkResolver> = Arc::new(RepositoryLinkResolver::new(entities.clone()));
        let entity_service = EntityService::new(
            files,
            entities.clone(),
            observations.clone(),
            relations.clone(),
            links.clone(),
            search.clone(),
        );
        let sync = SyncService::new(
            SyncOptions::from_config(&config),
            entity_service.clone(),
            relations.clone(),
            links,
            search.clone(),
        );

        Self {
            config,
            pool,
            project,
            entities,
            observations,
            relations,
            search,
            entity_service,
            sync,
        }
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
