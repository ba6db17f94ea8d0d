//! File I/O for the knowledge-base directory.
//!
//! All paths handed to [`FileService`] are relative to the project root and
//! use forward slashes. Checksums are the lowercase hex SHA-256 of the raw
//! bytes, so reading a file as text or as bytes yields the same value.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use sha2::{Digest, Sha256};

use crate::error::{KbError, Result};
use crate::markdown;
use crate::models::Metadata;

pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

/// Extension → MIME type table for non-markdown files.
const CONTENT_TYPES: &[(&str, &str)] = &[
    ("md", MIME_MARKDOWN),
    ("markdown", MIME_MARKDOWN),
    ("txt", "text/plain"),
    ("csv", "text/csv"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("js", "text/javascript"),
    ("json", "application/json"),
    ("toml", "application/toml"),
    ("yaml", "application/yaml"),
    ("yml", "application/yaml"),
    ("xml", "application/xml"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("webp", "image/webp"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("mp4", "video/mp4"),
    ("canvas", "application/json"),
];

/// Checksum of a byte slice.
pub fn compute_checksum_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// MIME type for a path, by extension.
pub fn content_type(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    CONTENT_TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
        .unwrap_or(MIME_OCTET_STREAM)
}

pub fn is_markdown(path: &str) -> bool {
    content_type(path) == MIME_MARKDOWN
}

/// Creation and modification times (unix seconds) plus size.
#[derive(Debug, Clone, Copy)]
pub struct FileStats {
    pub created_at: i64,
    pub modified_at: i64,
    pub size: u64,
}

fn unix_secs(time: std::io::Result<SystemTime>) -> Option<i64> {
    time.ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
}

#[derive(Debug, Clone)]
pub struct FileService {
    root: PathBuf,
}

impl FileService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    /// Read a text file, returning its content and checksum.
    pub async fn read_file(&self, path: &str) -> Result<(String, String)> {
        let full = self.full_path(path);
        let bytes = tokio::fs::read(&full).await?;
        let checksum = compute_checksum_bytes(&bytes);
        let content = String::from_utf8(bytes).map_err(|_| KbError::NotUtf8(full))?;
        Ok((content, checksum))
    }

    /// Write `content`, creating parent directories, and return its checksum.
    pub async fn write_file(&self, path: &str, content: &str) -> Result<String> {
        let full = self.full_path(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, content.as_bytes()).await?;
        Ok(compute_checksum_bytes(content.as_bytes()))
    }

    pub async fn compute_checksum(&self, path: &str) -> Result<String> {
        let bytes = tokio::fs::read(self.full_path(path)).await?;
        Ok(compute_checksum_bytes(&bytes))
    }

    pub async fn file_stats(&self, path: &str) -> Result<FileStats> {
        let meta = tokio::fs::metadata(self.full_path(path)).await?;
        let modified_at = unix_secs(meta.modified()).unwrap_or(0);
        let created_at = unix_secs(meta.created()).unwrap_or(modified_at);
        Ok(FileStats {
            created_at,
            modified_at,
            size: meta.len(),
        })
    }

    /// Merge `fields` into the file's frontmatter and return the new checksum.
    ///
    /// Keys not named in `fields` and the body are preserved byte-for-byte.
    /// A file without frontmatter gains a frontmatter block.
    pub async fn update_frontmatter(&self, path: &str, fields: &Metadata) -> Result<String> {
        let (content, _) = self.read_file(path).await?;
        let updated = merge_frontmatter(path, &content, fields)?;
        self.write_file(path, &updated).await
    }
}

/// Pure half of [`FileService::update_frontmatter`].
pub fn merge_frontmatter(path: &str, content: &str, fields: &Metadata) -> Result<String> {
    let (yaml, body) = markdown::split_frontmatter(content);
    let mut mapping = match yaml {
        Some(y) => markdown::parse_frontmatter_mapping(path, y)?,
        None => serde_yaml::Mapping::new(),
    };

    for (key, value) in fields {
        mapping.insert(serde_yaml::Value::String(key.clone()), value.to_yaml());
    }

    let yaml_text = if mapping.is_empty() {
        String::new()
    } else {
        serde_yaml::to_string(&mapping)?
    };
    Ok(format!("---\n{}---\n{}", yaml_text, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetaValue;
    use tempfile::TempDir;

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type("notes/a.md"), MIME_MARKDOWN);
        assert_eq!(content_type("img/Photo.PNG"), "image/png");
        assert_eq!(content_type("data/blob"), MIME_OCTET_STREAM);
        assert!(is_markdown("x.markdown"));
        assert!(!is_markdown("x.txt"));
    }

    #[test]
    fn merge_preserves_body_and_other_keys() {
        let content = "---\ntitle: Note\nstatus: draft\n---\n# Body\n\nkeep me\n";
        let mut fields = Metadata::new();
        fields.insert("permalink".into(), MetaValue::Text("notes/note".into()));
        fields.insert("title".into(), MetaValue::Text("Renamed".into()));

        let merged = merge_frontmatter("note.md", content, &fields).unwrap();
        assert!(merged.starts_with("---\ntitle: Renamed\nstatus: draft\npermalink: notes/note\n---\n"));
        assert!(merged.ends_with("---\n# Body\n\nkeep me\n"));
    }

    #[test]
    fn merge_adds_frontmatter_when_missing() {
        let mut fields = Metadata::new();
        fields.insert("permalink".into(), MetaValue::Text("plain".into()));
        let merged = merge_frontmatter("plain.md", "just text\n", &fields).unwrap();
        assert_eq!(merged, "---\npermalink: plain\n---\njust text\n");
    }

    #[tokio::test]
    async fn text_and_byte_checksums_agree() {
        let tmp = TempDir::new().unwrap();
        let files = FileService::new(tmp.path());
        let written = files.write_file("dir/a.md", "héllo\r\nworld\n").await.unwrap();
        let (content, read_sum) = files.read_file("dir/a.md").await.unwrap();
        let byte_sum = files.compute_checksum("dir/a.md").await.unwrap();

        assert_eq!(content, "héllo\r\nworld\n");
        assert_eq!(written, read_sum);
        assert_eq!(read_sum, byte_sum);
        assert_eq!(byte_sum, compute_checksum_bytes("héllo\r\nworld\n".as_bytes()));
    }

    #[tokio::test]
    async fn update_frontmatter_returns_new_checksum() {
        let tmp = TempDir::new().unwrap();
        let files = FileService::new(tmp.path());
        files
            .write_file("a.md", "---\ntitle: A\n---\nbody\n")
            .await
            .unwrap();

        let mut fields = Metadata::new();
        fields.insert("permalink".into(), MetaValue::Text("a".into()));
        let checksum = files.update_frontmatter("a.md", &fields).await.unwrap();

        assert_eq!(checksum, files.compute_checksum("a.md").await.unwrap());
        let (content, _) = files.read_file("a.md").await.unwrap();
        assert_eq!(content, "---\ntitle: A\npermalink: a\n---\nbody\n");
    }
}
