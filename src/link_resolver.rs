//! Resolution of link text (`[[Target]]`, titles, paths) to entities.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Entity;
use crate::permalink::slugify;
use crate::repository::EntityRepository;

/// Looks up the entity a piece of link text refers to.
#[async_trait]
pub trait LinkResolver: Send + Sync {
    async fn resolve(&self, link_text: &str) -> Result<Option<Entity>>;
}

/// Strip `[[...]]` and any `|alias` from link text.
pub fn clean_link_text(text: &str) -> &str {
    let mut text = text.trim();
    if let Some(inner) = text.strip_prefix("[[").and_then(|t| t.strip_suffix("]]")) {
        text = inner;
    }
    match text.split_once('|') {
        Some((target, _alias)) => target.trim(),
        None => text.trim(),
    }
}

/// Exact-match resolver over the entity table. Tries, in order: permalink,
/// title (shortest path wins), file path, file path with `.md`, and the
/// slugified text as a permalink.
#[derive(Debug, Clone)]
pub struct RepositoryLinkResolver {
    entities: EntityRepository,
}

impl RepositoryLinkResolver {
    pub fn new(entities: EntityRepository) -> Self {
        Self { entities }
    }
}

#[async_trait]
impl LinkResolver for RepositoryLinkResolver {
    async fn resolve(&self, link_text: &str) -> Result<Option<Entity>> {
        let text = clean_link_text(link_text);
        if text.is_empty() {
            return Ok(None);
        }

        if let Some(entity) = self.entities.find_by_permalink(text).await? {
            return Ok(Some(entity));
        }

        if let Some(entity) = self.entities.find_by_title(text).await?.into_iter().next() {
            return Ok(Some(entity));
        }

        if let Some(entity) = self.entities.find_by_file_path(text).await? {
            return Ok(Some(entity));
        }

        if !text.ends_with(".md") {
            if let Some(entity) = self.entities.find_by_file_path(&format!("{text}.md")).await? {
                return Ok(Some(entity));
            }
        }

        let slug = slugify(text);
        if !slug.is_empty() && slug != text {
            if let Some(entity) = self.entities.find_by_permalink(&slug).await? {
                return Ok(Some(entity));
            }
        }

        Ok(None)
    }
}
