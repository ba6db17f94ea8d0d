//! Permalink generation and collision-free resolution.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;
use crate::repository::EntityRepository;

static CAMEL_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\p{Ll}|\p{Nd})(\p{Lu})").unwrap());

/// Slug form of arbitrary text. `/` is kept as a path separator.
///
/// `"Design Notes/MyTopic_v2"` becomes `"design-notes/my-topic-v2"`.
pub fn slugify(text: &str) -> String {
    let split = CAMEL_BOUNDARY.replace_all(text, "$1-$2");
    let lowered = split.to_lowercase();

    let mut mapped = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        match c {
            '/' => mapped.push('/'),
            c if c.is_alphanumeric() => mapped.push(c),
            _ => mapped.push('-'),
        }
    }

    mapped
        .split('/')
        .map(|segment| {
            segment
                .split('-')
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join("-")
        })
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Candidate permalink for a file: its path without extension, slugified.
pub fn generate_permalink(file_path: &str) -> String {
    let (dir, name) = match file_path.rfind('/') {
        Some(slash) => file_path.split_at(slash + 1),
        None => ("", file_path),
    };
    let stem = match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    };
    slugify(&format!("{dir}{stem}"))
}

/// Assigns permalinks that are unique within a project.
#[derive(Debug, Clone)]
pub struct PermalinkResolver {
    entities: EntityRepository,
}

impl PermalinkResolver {
    pub fn new(entities: EntityRepository) -> Self {
        Self { entities }
    }

    /// Permalink for `file_path`, in priority order: the declared one if no
    /// other file owns it, the one already on record for this path, then the
    /// declared or generated candidate with a numeric suffix until free.
    pub async fn resolve(&self, file_path: &str, declared: Option<&str>) -> Result<String> {
        let declared = declared.map(str::trim).filter(|p| !p.is_empty());

        if let Some(permalink) = declared {
            if !self.owned_by_other(permalink, file_path).await? {
                return Ok(permalink.to_string());
            }
        }

        if let Some(existing) = self.entities.find_by_file_path(file_path).await? {
            if let Some(permalink) = existing.permalink {
                return Ok(permalink);
            }
        }

        let base = match declared {
            Some(permalink) => permalink.to_string(),
            None => generate_permalink(file_path),
        };
        self.unique(&base, file_path).await
    }

    /// Fresh permalink derived from the path alone, ignoring what is on
    /// record. Used when a moved file should follow its new location.
    pub async fn regenerate(&self, file_path: &str) -> Result<String> {
        self.unique(&generate_permalink(file_path), file_path).await
    }

    async fn unique(&self, base: &str, file_path: &str) -> Result<String> {
        let mut candidate = base.to_string();
        let mut suffix = 1;
        while self.owned_by_other(&candidate, file_path).await? {
            candidate = format!("{base}-{suffix}");
            suffix += 1;
        }
        Ok(candidate)
    }

    async fn owned_by_other(&self, permalink: &str, file_path: &str) -> Result<bool> {
        Ok(self
            .entities
            .find_by_permalink(permalink)
            .await?
            .is_some_and(|owner| owner.file_path != file_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityFields;
    use crate::repository::Outcome;
    use crate::test_support::memory_repositories;

    #[test]
    fn slugify_normalizes_separators_and_case() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("snake_case  text"), "snake-case-text");
        assert_eq!(slugify("MyTopicNotes"), "my-topic-notes");
        assert_eq!(slugify("C++ & Rust!"), "c-rust");
        assert_eq!(slugify("--a--b--"), "a-b");
        assert_eq!(slugify("Über Café"), "über-café");
    }

    #[test]
    fn generate_strips_extension_and_keeps_folders() {
        assert_eq!(generate_permalink("Notes/Design Doc.md"), "notes/design-doc");
        assert_eq!(generate_permalink("a/b.c/File Name.md"), "a/b-c/file-name");
        assert_eq!(generate_permalink("README"), "readme");
        assert_eq!(generate_permalink("specs/v0.13.0 release.md"), "specs/v0-13-0-release");
        assert_eq!(generate_permalink(".hidden"), "hidden");
    }

    fn fields(path: &str, permalink: &str) -> EntityFields {
        EntityFields {
            title: path.to_string(),
            entity_type: "note".into(),
            entity_metadata: Default::default(),
            content_type: "text/markdown".into(),
            permalink: Some(permalink.to_string()),
            file_path: path.to_string(),
            checksum: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn resolve_priorities_and_suffixes() {
        let repos = memory_repositories().await;
        let resolver = PermalinkResolver::new(repos.entities.clone());

        // Fresh path: generated.
        assert_eq!(resolver.resolve("notes/Topic.md", None).await.unwrap(), "notes/topic");

        let created = repos
            .entities
            .insert(&fields("notes/Topic.md", "notes/topic"))
            .await
            .unwrap();
        assert!(matches!(created, Outcome::Written(_)));

        // Same path keeps its record.
        assert_eq!(resolver.resolve("notes/Topic.md", None).await.unwrap(), "notes/topic");
        // A different path colliding on the candidate gets a suffix.
        assert_eq!(resolver.resolve("notes/topic.md", None).await.unwrap(), "notes/topic-1");
        // A declared permalink owned by another file is suffixed too.
        assert_eq!(
            resolver.resolve("other.md", Some("notes/topic")).await.unwrap(),
            "notes/topic-1"
        );
        // A free declared permalink is used verbatim.
        assert_eq!(resolver.resolve("other.md", Some("custom/id")).await.unwrap(), "custom/id");
    }

    #[tokio::test]
    async fn suffixes_keep_counting() {
        let repos = memory_repositories().await;
        repos.entities.insert(&fields("x.md", "x")).await.unwrap();
        repos.entities.insert(&fields("X.txt.md", "x-1")).await.unwrap();

        let resolver = PermalinkResolver::new(repos.entities.clone());
        assert_eq!(resolver.resolve("dir/../X.md", Some("x")).await.unwrap(), "x-2");
        assert_eq!(resolver.regenerate("x.md").await.unwrap(), "x");
    }
}
