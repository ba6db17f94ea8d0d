//! SQLite repositories for the relational model.
//!
//! Lookups return `Option<T>` for "not found". Writes that can lose a race
//! against a unique constraint return [`Outcome::Conflict`] instead of an
//! error, so callers decide whether the conflict is benign. Every other
//! database failure is an error.

pub mod entity;
pub mod observation;
pub mod project;
pub mod relation;

pub use entity::EntityRepository;
pub use observation::ObservationRepository;
pub use project::ProjectRepository;
pub use relation::RelationRepository;

/// Which unique constraint a write collided with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniqueConflict {
    /// `entity(project_id, file_path)`.
    FilePath,
    /// `entity(project_id, permalink)`.
    Permalink,
    /// `relation(from_id, to_name, relation_type)`.
    RelationTriple,
    Other(String),
}

impl std::fmt::Display for UniqueConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UniqueConflict::FilePath => f.write_str("entity.file_path"),
            UniqueConflict::Permalink => f.write_str("entity.permalink"),
            UniqueConflict::RelationTriple => f.write_str("relation(from_id, to_name, relation_type)"),
            UniqueConflict::Other(msg) => f.write_str(msg),
        }
    }
}

/// Result of a write that may hit a unique constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Written(T),
    Conflict(UniqueConflict),
}

/// Classify a sqlx error as a unique-constraint violation, if it is one.
pub(crate) fn unique_conflict(err: &sqlx::Error) -> Option<UniqueConflict> {
    let db_err = match err {
        sqlx::Error::Database(db_err) => db_err,
        _ => return None,
    };
    if !db_err.is_unique_violation() {
        return None;
    }

    let message = db_err.message();
    let conflict = if message.contains("entity.file_path") {
        UniqueConflict::FilePath
    } else if message.contains("entity.permalink") {
        UniqueConflict::Permalink
    } else if message.contains("relation.") {
        UniqueConflict::RelationTriple
    } else {
        UniqueConflict::Other(message.to_string())
    };
    Some(conflict)
}

/// Turn a write result into an [`Outcome`], passing other errors through.
pub(crate) fn into_outcome<T>(result: Result<T, sqlx::Error>) -> crate::error::Result<Outcome<T>> {
    match result {
        Ok(value) => Ok(Outcome::Written(value)),
        Err(err) => match unique_conflict(&err) {
            Some(conflict) => Ok(Outcome::Conflict(conflict)),
            None => Err(err.into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_service::MIME_MARKDOWN;
    use crate::models::{Entity, EntityFields, Metadata, NewRelation};
    use crate::test_support::memory_repositories;

    fn fields(path: &str, permalink: &str) -> EntityFields {
        EntityFields {
            title: path.into(),
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

    fn written(outcome: Outcome<Entity>) -> Entity {
        match outcome {
            Outcome::Written(entity) => entity,
            Outcome::Conflict(conflict) => panic!("unexpected conflict {}", conflict),
        }
    }

    #[tokio::test]
    async fn entity_conflicts_name_the_constraint() {
        let repos = memory_repositories().await;
        written(repos.entities.insert(&fields("a.md", "a")).await.unwrap());

        let same_path = repos.entities.insert(&fields("a.md", "other")).await.unwrap();
        assert!(matches!(same_path, Outcome::Conflict(UniqueConflict::FilePath)));

        let same_permalink = repos.entities.insert(&fields("b.md", "a")).await.unwrap();
        assert!(matches!(same_permalink, Outcome::Conflict(UniqueConflict::Permalink)));

        let b = written(repos.entities.insert(&fields("b.md", "b")).await.unwrap());
        let update = repos.entities.update(b.id, &fields("b.md", "a")).await.unwrap();
        assert!(matches!(update, Outcome::Conflict(UniqueConflict::Permalink)));
    }

    #[tokio::test]
    async fn duplicate_relation_is_a_triple_conflict() {
        let repos = memory_repositories().await;
        let a = written(repos.entities.insert(&fields("a.md", "a")).await.unwrap());
        let edge = NewRelation {
            from_id: a.id,
            to_id: None,
            to_name: "Elsewhere".into(),
            relation_type: "links".into(),
            context: None,
        };

        assert!(matches!(
            repos.relations.insert(&edge).await.unwrap(),
            Outcome::Written(_)
        ));
        assert!(matches!(
            repos.relations.insert(&edge).await.unwrap(),
            Outcome::Conflict(UniqueConflict::RelationTriple)
        ));
    }
}
