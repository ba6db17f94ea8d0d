//! Full-text search over entities, observations and relations.
//!
//! The index is an FTS5 table holding one denormalized row per item. Rows
//! are rebuilt per entity whenever the entity is written, and removed by
//! permalink when it is deleted.
//!
//! # Query flow
//!
//! ```text
//! SearchQuery ─► query::prepare_search_term ─► repository::match_expression
//!                                                 │
//!                     filters (type, entity_type, ▼ after, permalink)
//!                                     SearchRepository::search ─► ranked rows
//! ```

pub mod query;
pub mod repository;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;

use crate::config::Config;
use crate::error::Result;
use crate::file_service::FileService;
use crate::markdown;
use crate::models::{Entity, Observation, Relation, SearchIndexRow, SearchItemType, SearchResult};
use crate::permalink::slugify;
use crate::repository::{EntityRepository, ObservationRepository, RelationRepository};

pub use query::prepare_search_term;
pub use repository::SearchRepository;

/// Observation titles carry at most this many characters of content.
const OBSERVATION_TITLE_CHARS: usize = 50;

/// Structured search criteria. Every filter is optional; an empty query
/// returns everything, most relevant first.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub title: Option<String>,
    pub permalink: Option<String>,
    pub permalink_match: Option<String>,
    pub item_types: Vec<SearchItemType>,
    pub entity_types: Vec<String>,
    pub after_date: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            text: None,
            title: None,
            permalink: None,
            permalink_match: None,
            item_types: Vec::new(),
            entity_types: Vec::new(),
            after_date: None,
            limit: 10,
            offset: 0,
        }
    }
}

impl SearchQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

/// Parse a `YYYY-MM-DD` date as midnight UTC.
pub fn parse_after_date(date: &str) -> anyhow::Result<DateTime<Utc>> {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", date))?;
    let midnight = day
        .and_hms_opt(0, 0, 0)
        .context("Invalid time of day")?;
    Ok(midnight.and_utc())
}

/// Permalink of an observation row.
pub fn observation_permalink(entity_permalink: &str, observation: &Observation) -> String {
    format!(
        "{}/observations/{}/{}",
        entity_permalink,
        slugify(&observation.category),
        slugify(&observation.content)
    )
}

/// Permalink of a relation row. Unresolved targets use the slugified name.
pub fn relation_permalink(from_permalink: &str, relation: &Relation, to_permalink: Option<&str>) -> String {
    let target = match to_permalink {
        Some(permalink) => permalink.to_string(),
        None => slugify(&relation.to_name),
    };
    format!("{}/{}/{}", from_permalink, slugify(&relation.relation_type), target)
}

fn observation_title(observation: &Observation) -> String {
    let content: String = observation
        .content
        .chars()
        .take(OBSERVATION_TITLE_CHARS)
        .collect();
    format!("{}: {}", observation.category, content)
}

/// Builds index rows from the relational model and keeps them current.
#[derive(Debug, Clone)]
pub struct SearchService {
    repository: SearchRepository,
    entities: EntityRepository,
    observations: ObservationRepository,
    relations: RelationRepository,
    files: FileService,
}

impl SearchService {
    pub fn new(
        repository: SearchRepository,
        entities: EntityRepository,
        observations: ObservationRepository,
        relations: RelationRepository,
        files: FileService,
    ) -> Self {
        Self {
            repository,
            entities,
            observations,
            relations,
            files,
        }
    }

    pub fn repository(&self) -> &SearchRepository {
        &self.repository
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        self.repository.search(query).await
    }

    /// Rebuild every index row derived from `entity`.
    pub async fn index_entity(&self, entity: &Entity) -> Result<()> {
        let rows = self.rows_for_entity(entity).await?;
        self.repository.replace_entity_rows(entity.id, &rows).await
    }

    /// Remove an entity's rows by permalink, then sweep anything left under
    /// its id. Relation rows indexed before their target resolved carry a
    /// permalink that no longer derives from the stored relation. Call before
    /// the relational delete.
    pub async fn remove_entity(&self, entity: &Entity) -> Result<()> {
        for permalink in self.item_permalinks(entity).await?.into_iter().flatten() {
            self.repository.delete_by_permalink(&permalink).await?;
        }
        self.repository.delete_by_entity_id(entity.id).await?;
        Ok(())
    }

    pub async fn delete_by_permalink(&self, permalink: &str) -> Result<u64> {
        self.repository.delete_by_permalink(permalink).await
    }

    pub async fn delete_by_entity_id(&self, entity_id: i64) -> Result<u64> {
        self.repository.delete_by_entity_id(entity_id).await
    }

    /// Drop the project's index and rebuild it from the relational store.
    /// Returns the number of entities indexed.
    pub async fn reindex_all(&self) -> Result<usize> {
        self.repository.clear().await?;
        let entities = self.entities.find_all().await?;
        for entity in &entities {
            self.index_entity(entity).await?;
        }
        Ok(entities.len())
    }

    async fn target_permalink(&self, relation: &Relation) -> Result<Option<String>> {
        match relation.to_id {
            Some(to_id) => Ok(self
                .entities
                .find_by_id(to_id)
                .await?
                .and_then(|target| target.permalink)),
            None => Ok(None),
        }
    }

    /// Permalinks of the entity row and every observation and relation row.
    async fn item_permalinks(&self, entity: &Entity) -> Result<Vec<Option<String>>> {
        let mut permalinks = vec![entity.permalink.clone()];
        let Some(base) = entity.permalink.as_deref() else {
            return Ok(permalinks);
        };

        for observation in self.observations.for_entity(entity.id).await? {
            permalinks.push(Some(observation_permalink(base, &observation)));
        }
        for relation in self.relations.outgoing(entity.id).await? {
            let to_permalink = self.target_permalink(&relation).await?;
            permalinks.push(Some(relation_permalink(base, &relation, to_permalink.as_deref())));
        }
        Ok(permalinks)
    }

    async fn rows_for_entity(&self, entity: &Entity) -> Result<Vec<SearchIndexRow>> {
        let body = if entity.is_markdown() {
            match self.files.read_file(&entity.file_path).await {
                Ok((content, _)) => markdown::split_frontmatter(&content).1.to_string(),
                Err(err) => {
                    tracing::debug!(path = %entity.file_path, error = %err, "indexing without body");
                    String::new()
                }
            }
        } else {
            String::new()
        };

        let mut rows = vec![SearchIndexRow {
            project_id: entity.project_id,
            id: entity.id,
            item_type: SearchItemType::Entity,
            title: entity.title.clone(),
            content_stems: [
                entity.title.as_str(),
                body.as_str(),
                entity.permalink.as_deref().unwrap_or_default(),
                entity.file_path.as_str(),
            ]
            .join("\n"),
            content_snippet: body,
            permalink: entity.permalink.clone(),
            file_path: entity.file_path.clone(),
            metadata: json!({ "entity_type": entity.entity_type }),
            entity_id: Some(entity.id),
            from_id: None,
            to_id: None,
            relation_type: None,
            category: None,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }];

        let base = entity
            .permalink
            .clone()
            .unwrap_or_else(|| slugify(&entity.file_path));

        for observation in self.observations.for_entity(entity.id).await? {
            rows.push(SearchIndexRow {
                project_id: entity.project_id,
                id: observation.id,
                item_type: SearchItemType::Observation,
                title: observation_title(&observation),
                content_stems: std::iter::once(observation.content.as_str())
                    .chain(observation.tags.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join(" "),
                content_snippet: observation.content.clone(),
                permalink: Some(observation_permalink(&base, &observation)),
                file_path: entity.file_path.clone(),
                metadata: json!({ "tags": observation.tags }),
                entity_id: Some(entity.id),
                from_id: None,
                to_id: None,
                relation_type: None,
                category: Some(observation.category.clone()),
                created_at: entity.created_at,
                updated_at: entity.updated_at,
            });
        }

        for relation in self.relations.outgoing(entity.id).await? {
            let to_permalink = self.target_permalink(&relation).await?;
            let context = relation.context.clone().unwrap_or_default();
            rows.push(SearchIndexRow {
                project_id: entity.project_id,
                id: relation.id,
                item_type: SearchItemType::Relation,
                title: format!("{} → {}", entity.title, relation.to_name),
                content_stems: format!("{} {} {}", relation.relation_type, relation.to_name, context)
                    .trim_end()
                    .to_string(),
                content_snippet: context,
                permalink: Some(relation_permalink(&base, &relation, to_permalink.as_deref())),
                file_path: entity.file_path.clone(),
                metadata: json!({}),
                entity_id: Some(entity.id),
                from_id: Some(relation.from_id),
                to_id: relation.to_id,
                relation_type: Some(relation.relation_type.clone()),
                category: None,
                created_at: entity.created_at,
                updated_at: entity.updated_at,
            });
        }

        Ok(rows)
    }
}

/// Run a search from the CLI and print the results.
pub async fn run_search(config: &Config, query: SearchQuery) -> anyhow::Result<()> {
    let kb = crate::KnowledgeBase::open(config).await?;
    let results = kb.search.search(&query).await?;

    if results.is_empty() {
        println!("No results.");
        kb.close().await;
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let row = &result.row;
        let date = DateTime::from_timestamp(row.updated_at, 0)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default();

        println!(
            "{}. [{:.2}] {} / {}",
            i + 1 + query.offset as usize,
            result.score,
            row.item_type,
            row.title
        );
        if let Some(ref permalink) = row.permalink {
            println!("    permalink: {}", permalink);
        }
        println!("    file: {}", row.file_path);
        println!("    updated: {}", date);
        let excerpt: String = row.content_snippet.chars().take(240).collect();
        if !excerpt.trim().is_empty() {
            println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        }
        println!();
    }

    kb.close().await;
    Ok(())
}

/// Rebuild the project's search index from the relational store.
pub async fn run_reindex(config: &Config) -> anyhow::Result<()> {
    let kb = crate::KnowledgeBase::open(config).await?;
    let entities = kb.search.reindex_all().await?;
    let rows = kb.search.repository().count().await?;

    println!("reindex {}", config.project.name);
    println!("  entities: {}", entities);
    println!("  index rows: {}", rows);
    println!("ok");

    kb.close().await;
    Ok(())
}
