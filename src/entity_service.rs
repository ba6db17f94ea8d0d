//! Per-file sync: turns one file on disk into its entity, observations,
//! relations and index rows.
//!
//! A markdown file moves through four stages:
//!
//! ```text
//! Parsed ─► Persisted (checksum NULL) ─► RelationsResolved ─► Finalized (checksum set)
//! ```
//!
//! The checksum is written last, from the bytes on disk after every
//! rewrite, so a row with a NULL checksum always means "not finished" and
//! the next sync picks the file up again.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;

use crate::edit::{apply_edit, EditOperation};
use crate::error::{KbError, Result};
use crate::file_service::{self, FileService, MIME_MARKDOWN};
use crate::link_resolver::LinkResolver;
use crate::markdown::{self, ParsedNote};
use crate::models::{merge_metadata, Entity, EntityFields, MetaValue, Metadata, NewRelation};
use crate::permalink::PermalinkResolver;
use crate::repository::{
    EntityRepository, ObservationRepository, Outcome, RelationRepository, UniqueConflict,
};
use crate::search::SearchService;

/// Entity type given to non-markdown files.
pub const FILE_ENTITY_TYPE: &str = "file";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Parsed,
    Persisted,
    RelationsResolved,
    Finalized,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStage::Parsed => "parsed",
            SyncStage::Persisted => "persisted",
            SyncStage::RelationsResolved => "relations_resolved",
            SyncStage::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

struct Parsed {
    note: ParsedNote,
    permalink: String,
}

struct Persisted {
    entity: Entity,
    note: ParsedNote,
}

struct RelationsResolved {
    entity: Entity,
}

#[derive(Clone)]
pub struct EntityService {
    files: FileService,
    entities: EntityRepository,
    observations: ObservationRepository,
    relations: RelationRepository,
    permalinks: PermalinkResolver,
    links: Arc<dyn LinkResolver>,
    search: SearchService,
}

impl EntityService {
    pub fn new(
        files: FileService,
        entities: EntityRepository,
        observations: ObservationRepository,
        relations: RelationRepository,
        links: Arc<dyn LinkResolver>,
        search: SearchService,
    ) -> Self {
        Self {
            permalinks: PermalinkResolver::new(entities.clone()),
            files,
            entities,
            observations,
            relations,
            links,
            search,
        }
    }

    pub fn files(&self) -> &FileService {
        &self.files
    }

    pub fn entities(&self) -> &EntityRepository {
        &self.entities
    }

    /// Sync one file of any kind.
    pub async fn sync_file(&self, path: &str) -> Result<Entity> {
        if file_service::is_markdown(path) {
            self.sync_markdown_file(path).await
        } else {
            self.sync_regular_file(path).await
        }
    }

    /// Full markdown pipeline for one file. Creates or updates as needed.
    pub async fn sync_markdown_file(&self, path: &str) -> Result<Entity> {
        let parsed = self.parse(path).await?;
        tracing::debug!(path, stage = %SyncStage::Parsed, permalink = %parsed.permalink, "sync stage");

        let persisted = self.persist(path, parsed).await?;
        tracing::debug!(path, stage = %SyncStage::Persisted, entity_id = persisted.entity.id, "sync stage");

        let resolved = self.write_relations(persisted).await?;
        tracing::debug!(path, stage = %SyncStage::RelationsResolved, "sync stage");

        let entity = self.finalize(resolved).await?;
        tracing::debug!(path, stage = %SyncStage::Finalized, checksum = ?entity.checksum, "sync stage");
        Ok(entity)
    }

    async fn parse(&self, path: &str) -> Result<Parsed> {
        let (content, _) = self.files.read_file(path).await?;
        let mut note = markdown::parse_note(path, &content)?;

        let declared = note.frontmatter.permalink.clone();
        let permalink = self.permalinks.resolve(path, declared.as_deref()).await?;

        if note.has_frontmatter && declared.as_deref() != Some(permalink.as_str()) {
            let fields = permalink_frontmatter(&permalink);
            self.files.update_frontmatter(path, &fields).await?;
            note.frontmatter.permalink = Some(permalink.clone());
            merge_metadata(&mut note.frontmatter.metadata, fields);
        }

        Ok(Parsed { note, permalink })
    }

    async fn persist(&self, path: &str, parsed: Parsed) -> Result<Persisted> {
        let stats = self.files.file_stats(path).await?;
        let Parsed { note, permalink } = parsed;

        let fields = EntityFields {
            title: note.title(),
            entity_type: note.entity_type(),
            entity_metadata: note.frontmatter.metadata.clone(),
            content_type: MIME_MARKDOWN.to_string(),
            permalink: Some(permalink),
            file_path: path.to_string(),
            checksum: None,
            created_at: stats.created_at,
            updated_at: stats.modified_at,
        };
        let entity = self.upsert(&fields).await?;
        self.observations.replace(entity.id, &note.observations).await?;

        Ok(Persisted { entity, note })
    }

    async fn write_relations(&self, persisted: Persisted) -> Result<RelationsResolved> {
        let Persisted { entity, note } = persisted;
        self.relations.delete_outgoing(entity.id).await?;

        for relation in &note.relations {
            let target = self.links.resolve(&relation.target).await?;
            let to_id = target.map(|t| t.id).filter(|id| *id != entity.id);

            let new = NewRelation {
                from_id: entity.id,
                to_id,
                to_name: relation.target.clone(),
                relation_type: relation.relation_type.clone(),
                context: relation.context.clone(),
            };
            match self.relations.insert(&new).await? {
                Outcome::Written(_) => {}
                Outcome::Conflict(UniqueConflict::RelationTriple) => {
                    tracing::debug!(
                        path = %entity.file_path,
                        relation_type = %new.relation_type,
                        target = %new.to_name,
                        "duplicate relation ignored"
                    );
                }
                Outcome::Conflict(other) => return Err(KbError::Conflict(other.to_string())),
            }
        }

        Ok(RelationsResolved { entity })
    }

    async fn finalize(&self, resolved: RelationsResolved) -> Result<Entity> {
        let mut entity = resolved.entity;
        let checksum = self.files.compute_checksum(&entity.file_path).await?;
        if !self.entities.set_checksum(entity.id, Some(&checksum)).await? {
            return Err(KbError::UpdateFailed(entity.id));
        }
        entity.checksum = Some(checksum);
        self.search.index_entity(&entity).await?;
        Ok(entity)
    }

    /// Bookkeeping-only sync for non-markdown files.
    pub async fn sync_regular_file(&self, path: &str) -> Result<Entity> {
        let checksum = self.files.compute_checksum(path).await?;
        let stats = self.files.file_stats(path).await?;
        let title = path.rsplit('/').next().unwrap_or(path).to_string();

        let fields = EntityFields {
            title,
            entity_type: FILE_ENTITY_TYPE.to_string(),
            entity_metadata: Metadata::new(),
            content_type: file_service::content_type(path).to_string(),
            permalink: None,
            file_path: path.to_string(),
            checksum: Some(checksum),
            created_at: stats.created_at,
            updated_at: stats.modified_at,
        };
        let entity = self.upsert(&fields).await?;
        self.search.index_entity(&entity).await?;
        Ok(entity)
    }

    /// Insert or update by file path. An insert that loses a race on
    /// `file_path` becomes an update of the row that won.
    async fn upsert(&self, fields: &EntityFields) -> Result<Entity> {
        if let Some(existing) = self.entities.find_by_file_path(&fields.file_path).await? {
            return self.update_existing(existing.id, fields).await;
        }
        self.insert_or_update(fields).await
    }

    /// Insert half of [`upsert`](Self::upsert). A `file_path` conflict means
    /// another writer got there first; any other conflict is an error.
    async fn insert_or_update(&self, fields: &EntityFields) -> Result<Entity> {
        match self.entities.insert(fields).await? {
            Outcome::Written(entity) => Ok(entity),
            Outcome::Conflict(UniqueConflict::FilePath) => {
                tracing::info!(path = %fields.file_path, "entity created concurrently; updating instead");
                let existing = self
                    .entities
                    .find_by_file_path(&fields.file_path)
                    .await?
                    .ok_or_else(|| KbError::EntityNotFound(fields.file_path.clone()))?;
                self.update_existing(existing.id, fields).await
            }
            Outcome::Conflict(other) => Err(KbError::Conflict(other.to_string())),
        }
    }

    async fn update_existing(&self, id: i64, fields: &EntityFields) -> Result<Entity> {
        match self.entities.update(id, fields).await? {
            Outcome::Written(Some(entity)) => Ok(entity),
            Outcome::Written(None) => Err(KbError::UpdateFailed(id)),
            Outcome::Conflict(conflict) => Err(KbError::Conflict(conflict.to_string())),
        }
    }

    /// Point an entity at a new path. With `update_permalink`, a markdown
    /// file also gets a permalink derived from its new location. The
    /// frontmatter is rewritten only if the file already has one.
    ///
    /// Returns `None` when there is nothing to move or the destination is
    /// already tracked by another entity.
    pub async fn move_entity(
        &self,
        old_path: &str,
        new_path: &str,
        update_permalink: bool,
    ) -> Result<Option<Entity>> {
        let Some(entity) = self.entities.find_by_file_path(old_path).await? else {
            tracing::warn!(old_path, new_path, "move source is not tracked; skipping");
            return Ok(None);
        };

        if let Some(occupant) = self.entities.find_by_file_path(new_path).await? {
            if occupant.id != entity.id {
                tracing::warn!(
                    old_path,
                    new_path,
                    occupant_id = occupant.id,
                    "move destination already tracked by another entity; skipping"
                );
                return Ok(None);
            }
        }

        let mut fields = entity.fields();
        fields.file_path = new_path.to_string();
        fields.updated_at = Utc::now().timestamp();
        let mut moved = self.update_existing(entity.id, &fields).await?;

        if update_permalink && file_service::is_markdown(new_path) {
            let permalink = self.permalinks.regenerate(new_path).await?;
            if moved.permalink.as_deref() != Some(permalink.as_str()) {
                let mut fields = moved.fields();
                let (content, _) = self.files.read_file(new_path).await?;
                if markdown::has_frontmatter(&content) {
                    let frontmatter = permalink_frontmatter(&permalink);
                    let checksum = self.files.update_frontmatter(new_path, &frontmatter).await?;
                    fields.checksum = Some(checksum);
                    merge_metadata(&mut fields.entity_metadata, frontmatter);
                }
                fields.permalink = Some(permalink);
                moved = self.update_existing(moved.id, &fields).await?;
            }
        }

        self.search.index_entity(&moved).await?;
        Ok(Some(moved))
    }

    /// Delete an entity and everything derived from it. Index rows go first,
    /// while the observations and relations naming them still exist.
    pub async fn delete_entity(&self, entity: &Entity) -> Result<bool> {
        self.search.remove_entity(entity).await?;
        self.entities.delete_cascade(entity.id).await
    }

    pub async fn delete_by_file_path(&self, path: &str) -> Result<bool> {
        match self.entities.find_by_file_path(path).await? {
            Some(entity) => self.delete_entity(&entity).await,
            None => Ok(false),
        }
    }

    /// Apply an edit to the note `identifier` resolves to, then re-sync it.
    pub async fn edit_entity(&self, identifier: &str, op: &EditOperation) -> Result<Entity> {
        let entity = self
            .links
            .resolve(identifier)
            .await?
            .ok_or_else(|| KbError::EntityNotFound(identifier.to_string()))?;

        if !entity.is_markdown() {
            return Err(KbError::Validation(format!(
                "{} is not a markdown note and cannot be edited",
                entity.file_path
            )));
        }

        let (content, _) = self.files.read_file(&entity.file_path).await?;
        let updated = apply_edit(&content, op)?;
        self.files.write_file(&entity.file_path, &updated).await?;

        tracing::info!(path = %entity.file_path, operation = op.name(), "note edited");
        self.sync_markdown_file(&entity.file_path).await
    }
}

fn permalink_frontmatter(permalink: &str) -> Metadata {
    let mut fields = Metadata::new();
    fields.insert("permalink".into(), MetaValue::from(permalink));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link_resolver::RepositoryLinkResolver;
    use crate::search::SearchRepository;
    use crate::test_support::{memory_repositories, Repositories};
    use tempfile::TempDir;

    fn service(repos: &Repositories, root: &std::path::Path) -> EntityService {
        let files = FileService::new(root);
        let search = SearchService::new(
            SearchRepository::new(repos.pool.clone(), repos.project.id),
            repos.entities.clone(),
            repos.observations.clone(),
            repos.relations.clone(),
            files.clone(),
        );
        EntityService::new(
            files,
            repos.entities.clone(),
            repos.observations.clone(),
            repos.relations.clone(),
            Arc::new(RepositoryLinkResolver::new(repos.entities.clone())),
            search,
        )
    }

    #[tokio::test]
    async fn markdown_sync_writes_permalink_and_final_checksum() {
        let tmp = TempDir::new().unwrap();
        let repos = memory_repositories().await;
        let svc = service(&repos, tmp.path());
        svc.files()
            .write_file(
                "notes/Search Design.md",
                "---\ntitle: Search Design\n---\n- [design] Use FTS5 #search\n- implements [[Spec]]\n- implements [[Spec]]\n",
            )
            .await
            .unwrap();

        let entity = svc.sync_markdown_file("notes/Search Design.md").await.unwrap();
        assert_eq!(entity.permalink.as_deref(), Some("notes/search-design"));
        assert_eq!(
            entity.checksum.as_deref(),
            Some(svc.files().compute_checksum("notes/Search Design.md").await.unwrap().as_str())
        );

        let (content, _) = svc.files().read_file("notes/Search Design.md").await.unwrap();
        assert!(content.contains("permalink: notes/search-design"));

        let observations = repos.observations.for_entity(entity.id).await.unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].tags, vec!["search"]);

        let relations = repos.relations.outgoing(entity.id).await.unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].to_id, None);
        assert_eq!(relations[0].to_name, "Spec");
    }

    #[tokio::test]
    async fn file_without_frontmatter_is_left_untouched() {
        let tmp = TempDir::new().unwrap();
        let repos = memory_repositories().await;
        let svc = service(&repos, tmp.path());
        let written = svc.files().write_file("plain.md", "just text\n").await.unwrap();

        let entity = svc.sync_markdown_file("plain.md").await.unwrap();
        assert_eq!(entity.permalink.as_deref(), Some("plain"));
        assert_eq!(entity.checksum.as_deref(), Some(written.as_str()));
        assert_eq!(entity.title, "plain");
    }

    #[tokio::test]
    async fn regular_files_are_bookkept() {
        let tmp = TempDir::new().unwrap();
        let repos = memory_repositories().await;
        let svc = service(&repos, tmp.path());
        svc.files().write_file("img/logo.png", "not really a png").await.unwrap();

        let entity = svc.sync_regular_file("img/logo.png").await.unwrap();
        assert_eq!(entity.title, "logo.png");
        assert_eq!(entity.entity_type, FILE_ENTITY_TYPE);
        assert_eq!(entity.content_type, "image/png");
        assert_eq!(entity.permalink, None);
        assert!(entity.checksum.is_some());

        // Re-sync updates in place.
        svc.files().write_file("img/logo.png", "changed").await.unwrap();
        let again = svc.sync_regular_file("img/logo.png").await.unwrap();
        assert_eq!(again.id, entity.id);
        assert_ne!(again.checksum, entity.checksum);
    }

    #[tokio::test]
    async fn self_references_stay_unresolved() {
        let tmp = TempDir::new().unwrap();
        let repos = memory_repositories().await;
        let svc = service(&repos, tmp.path());
        svc.files()
            .write_file("Loop.md", "---\ntitle: Loop\n---\n- refers_to [[Loop]]\n")
            .await
            .unwrap();

        svc.sync_markdown_file("Loop.md").await.unwrap();
        let entity = svc.sync_markdown_file("Loop.md").await.unwrap();
        let relations = repos.relations.outgoing(entity.id).await.unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].to_id, None);
    }

    #[tokio::test]
    async fn edit_rejects_bad_requests() {
        let tmp = TempDir::new().unwrap();
        let repos = memory_repositories().await;
        let svc = service(&repos, tmp.path());
        svc.files()
            .write_file("Doc.md", "---\ntitle: Doc\n---\n## A\none\n## A\ntwo\n")
            .await
            .unwrap();
        svc.sync_markdown_file("Doc.md").await.unwrap();

        let op = EditOperation::ReplaceSection {
            section: "## A".into(),
            content: "x".into(),
        };
        let err = svc.edit_entity("Doc", &op).await.unwrap_err();
        assert!(matches!(err, KbError::Validation(_)));

        let missing = svc
            .edit_entity("Nope", &EditOperation::Append { content: "x".into() })
            .await
            .unwrap_err();
        assert!(matches!(missing, KbError::EntityNotFound(_)));

        let appended = svc
            .edit_entity("doc", &EditOperation::Append { content: "- [fact] added".into() })
            .await
            .unwrap();
        let observations = repos.observations.for_entity(appended.id).await.unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].content, "added");
    }

    fn fields(path: &str, title: &str, permalink: &str) -> EntityFields {
        EntityFields {
            title: title.into(),
            entity_type: "note".into(),
            entity_metadata: Metadata::new(),
            content_type: MIME_MARKDOWN.into(),
            permalink: Some(permalink.into()),
            file_path: path.into(),
            checksum: None,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[tokio::test]
    async fn insert_losing_file_path_race_updates_winner() {
        let tmp = TempDir::new().unwrap();
        let repos = memory_repositories().await;
        let svc = service(&repos, tmp.path());

        let winner = match repos.entities.insert(&fields("race.md", "First", "race")).await.unwrap() {
            Outcome::Written(entity) => entity,
            other => panic!("unexpected {:?}", other),
        };

        let entity = svc
            .insert_or_update(&fields("race.md", "Second", "race"))
            .await
            .unwrap();
        assert_eq!(entity.id, winner.id);
        assert_eq!(entity.title, "Second");
        assert_eq!(repos.entities.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn insert_with_taken_permalink_is_a_conflict() {
        let tmp = TempDir::new().unwrap();
        let repos = memory_repositories().await;
        let svc = service(&repos, tmp.path());
        repos.entities.insert(&fields("a.md", "A", "shared")).await.unwrap();

        let err = svc
            .insert_or_update(&fields("b.md", "B", "shared"))
            .await
            .unwrap_err();
        assert!(matches!(err, KbError::Conflict(ref what) if what == "entity.permalink"));
        assert!(repos.entities.find_by_file_path("b.md").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn move_leaves_files_without_frontmatter_untouched() {
        let tmp = TempDir::new().unwrap();
        let repos = memory_repositories().await;
        let svc = service(&repos, tmp.path());
        let written = svc.files().write_file("plain.md", "just text\n").await.unwrap();
        svc.sync_markdown_file("plain.md").await.unwrap();

        std::fs::create_dir_all(tmp.path().join("archive")).unwrap();
        std::fs::rename(tmp.path().join("plain.md"), tmp.path().join("archive/plain.md")).unwrap();
        let moved = svc
            .move_entity("plain.md", "archive/plain.md", true)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(moved.permalink.as_deref(), Some("archive/plain"));
        assert_eq!(moved.checksum.as_deref(), Some(written.as_str()));
        let (content, _) = svc.files().read_file("archive/plain.md").await.unwrap();
        assert_eq!(content, "just text\n");
    }
}
