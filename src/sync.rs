//! Directory sync: reconcile the files under a project root with the
//! relational store and the search index.
//!
//! One pass runs in a fixed order:
//!
//! ```text
//! scan ─► change set ─► moves ─► deletes ─► creates ─► modifies ─► resolve relations
//! ```
//!
//! Moves go first so a renamed file is never deleted and re-created.
//! Relation resolution goes last so every entity created in this pass is a
//! candidate target for forward references.
//!
//! A failure while processing one file is logged and the file is left out
//! of the returned report; its checksum stays unrecorded, so the next pass
//! retries it. Storage failures that make further work pointless (pool
//! closed, I/O on the database) abort the pass.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result as AnyResult;

use crate::changes::{build_change_set, SyncReport};
use crate::config::Config;
use crate::entity_service::EntityService;
use crate::error::{KbError, Result};
use crate::knowledge_base::KnowledgeBase;
use crate::link_resolver::LinkResolver;
use crate::models::Entity;
use crate::progress::{ProgressMode, SyncPhase, SyncProgressEvent, SyncProgressReporter};
use crate::repository::{EntityRepository, Outcome, RelationRepository};
use crate::scanner;
use crate::search::SearchService;

/// Sync behaviour taken from the project config.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub project: String,
    pub root: PathBuf,
    pub exclude_globs: Vec<String>,
    pub update_permalinks_on_move: bool,
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            project: config.project.name.clone(),
            root: config.project.root.clone(),
            exclude_globs: config.project.exclude_globs.clone(),
            update_permalinks_on_move: config.project.update_permalinks_on_move,
        }
    }
}

#[derive(Clone)]
pub struct SyncService {
    options: SyncOptions,
    entity_service: EntityService,
    entities: EntityRepository,
    relations: RelationRepository,
    links: Arc<dyn LinkResolver>,
    search: SearchService,
}

impl SyncService {
    pub fn new(
        options: SyncOptions,
        entity_service: EntityService,
        relations: RelationRepository,
        links: Arc<dyn LinkResolver>,
        search: SearchService,
    ) -> Self {
        Self {
            entities: entity_service.entities().clone(),
            options,
            entity_service,
            relations,
            links,
            search,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Compare the directory with the database without changing anything.
    pub async fn scan_changes(&self) -> Result<SyncReport> {
        let scan = scanner::scan(&self.options.root, &self.options.exclude_globs).await?;
        let db_state = self.entities.file_state().await?;
        Ok(build_change_set(&scan, &db_state))
    }

    /// Run one full sync pass. The returned report lists only the files that
    /// were processed successfully.
    pub async fn sync(&self, reporter: &dyn SyncProgressReporter) -> Result<SyncReport> {
        let project = self.options.project.as_str();
        let changes = self.scan_changes().await?;
        tracing::info!(
            project,
            new = changes.new.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            moved = changes.moves.len(),
            "change set built"
        );
        reporter.report(SyncProgressEvent::Started {
            project: project.to_string(),
            total: changes.total() as u64,
        });

        let mut done = SyncReport::default();
        let mut failed = 0u64;

        let total = changes.moves.len() as u64;
        for (i, (old_path, new_path)) in changes.moves.iter().enumerate() {
            let moved = self
                .entity_service
                .move_entity(old_path, new_path, self.options.update_permalinks_on_move)
                .await;
            match contain(new_path, moved)? {
                Some(Some(_)) => {
                    done.moves.insert(old_path.clone(), new_path.clone());
                }
                Some(None) => {}
                None => failed += 1,
            }
            self.phase(reporter, SyncPhase::Moves, i, total, new_path);
        }

        let total = changes.deleted.len() as u64;
        for (i, path) in changes.deleted.iter().enumerate() {
            let deleted = self.entity_service.delete_by_file_path(path).await;
            match contain(path, deleted)? {
                Some(_) => {
                    done.deleted.insert(path.clone());
                }
                None => failed += 1,
            }
            self.phase(reporter, SyncPhase::Deletes, i, total, path);
        }

        let total = changes.new.len() as u64;
        for (i, path) in changes.new.iter().enumerate() {
            match self.sync_one(path).await? {
                Some(entity) => {
                    done.new.insert(path.clone());
                    if let Some(checksum) = entity.checksum {
                        done.checksums.insert(path.clone(), checksum);
                    }
                }
                None => failed += 1,
            }
            self.phase(reporter, SyncPhase::Creates, i, total, path);
        }

        let total = changes.modified.len() as u64;
        for (i, path) in changes.modified.iter().enumerate() {
            match self.sync_one(path).await? {
                Some(entity) => {
                    done.modified.insert(path.clone());
                    if let Some(checksum) = entity.checksum {
                        done.checksums.insert(path.clone(), checksum);
                    }
                }
                None => failed += 1,
            }
            self.phase(reporter, SyncPhase::Modifies, i, total, path);
        }

        self.resolve_relations(reporter).await?;

        reporter.report(SyncProgressEvent::Completed {
            project: project.to_string(),
            new: done.new.len() as u64,
            modified: done.modified.len() as u64,
            deleted: done.deleted.len() as u64,
            moved: done.moves.len() as u64,
            failed,
        });
        tracing::info!(project, total = done.total(), failed, "sync complete");
        Ok(done)
    }

    async fn sync_one(&self, path: &str) -> Result<Option<Entity>> {
        let synced = self.entity_service.sync_file(path).await;
        contain(path, synced)
    }

    /// Point every forward reference whose target now exists at that
    /// target. Returns the number of relations resolved.
    pub async fn resolve_relations(&self, reporter: &dyn SyncProgressReporter) -> Result<usize> {
        let unresolved = self.relations.find_unresolved().await?;
        let total = unresolved.len() as u64;
        let mut resolved = 0;

        for (i, relation) in unresolved.iter().enumerate() {
            let target = match self.links.resolve(&relation.to_name).await {
                Ok(Some(target)) => target,
                Ok(None) => {
                    self.phase(reporter, SyncPhase::Relations, i, total, &relation.to_name);
                    continue;
                }
                Err(err) if err.is_systemic() => return Err(err),
                Err(err) => {
                    tracing::warn!(relation_id = relation.id, error = %err, "link lookup failed");
                    continue;
                }
            };

            if target.id == relation.from_id {
                tracing::debug!(relation_id = relation.id, "self reference left unresolved");
            } else {
                match self
                    .relations
                    .resolve(relation.id, target.id, &target.title)
                    .await?
                {
                    Outcome::Written(true) => {
                        self.search.index_entity(&target).await?;
                        resolved += 1;
                    }
                    Outcome::Written(false) => {}
                    Outcome::Conflict(conflict) => {
                        tracing::debug!(
                            relation_id = relation.id,
                            target_id = target.id,
                            %conflict,
                            "resolved relation duplicates an existing edge; ignored"
                        );
                    }
                }
            }
            self.phase(reporter, SyncPhase::Relations, i, total, &relation.to_name);
        }

        if resolved > 0 {
            tracing::info!(resolved, "forward references resolved");
        }
        Ok(resolved)
    }

    fn phase(
        &self,
        reporter: &dyn SyncProgressReporter,
        phase: SyncPhase,
        index: usize,
        total: u64,
        message: &str,
    ) {
        reporter.report(SyncProgressEvent::Phase {
            project: self.options.project.clone(),
            phase,
            processed: index as u64 + 1,
            total,
            message: message.to_string(),
        });
    }
}

/// Keep a per-file failure from ending the pass. `Ok(None)` means the file
/// failed and was logged.
fn contain<T>(path: &str, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_systemic() => Err(err),
        Err(err) if err.is_parse_error() => {
            tracing::warn!(path, kind = err.kind(), error = %err, "skipping file that failed to parse");
            Ok(None)
        }
        Err(err) => {
            tracing::error!(path, kind = err.kind(), error = %err, "failed to sync file");
            Ok(None)
        }
    }
}

/// Run the `sync` command and print a summary to stdout.
pub async fn run_sync(config: &Config, dry_run: bool, progress: ProgressMode) -> AnyResult<()> {
    let kb = KnowledgeBase::open(config).await?;
    let project = config.project.name.as_str();

    if dry_run {
        let changes = kb.sync.scan_changes().await?;
        println!("sync {} (dry-run)", project);
        println!("  new: {}", changes.new.len());
        println!("  modified: {}", changes.modified.len());
        println!("  deleted: {}", changes.deleted.len());
        println!("  moved: {}", changes.moves.len());
        for (old_path, new_path) in &changes.moves {
            println!("    {} -> {}", old_path, new_path);
        }
        kb.close().await;
        return Ok(());
    }

    let reporter = progress.reporter();
    let report = match kb.sync.sync(reporter.as_ref()).await {
        Ok(report) => report,
        Err(err) => {
            kb.close().await;
            return Err(sync_error(err));
        }
    };

    let unresolved = kb.relations.count(Some(false)).await?;
    println!("sync {}", project);
    println!("  new: {}", report.new.len());
    println!("  modified: {}", report.modified.len());
    println!("  deleted: {}", report.deleted.len());
    println!("  moved: {}", report.moves.len());
    println!("  unresolved relations: {}", unresolved);
    println!("ok");

    kb.close().await;
    Ok(())
}

fn sync_error(err: KbError) -> anyhow::Error {
    anyhow::Error::new(err).context("sync failed")
}
