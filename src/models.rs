//! Core data models used throughout kbsync.
//!
//! These types represent the relational projection of a knowledge base
//! (entities, observations, relations) and the denormalized rows that feed
//! the full-text index.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A frontmatter / metadata value. Closed over the shapes YAML frontmatter
/// can produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<MetaValue>),
    Map(BTreeMap<String, MetaValue>),
}

/// Open-ended key/value bag attached to an entity.
pub type Metadata = BTreeMap<String, MetaValue>;

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn from_yaml(value: &serde_yaml::Value) -> Self {
        match value {
            serde_yaml::Value::Null => MetaValue::Null,
            serde_yaml::Value::Bool(b) => MetaValue::Bool(*b),
            serde_yaml::Value::Number(n) => match n.as_i64() {
                Some(i) => MetaValue::Int(i),
                None => MetaValue::Float(n.as_f64().unwrap_or_default()),
            },
            serde_yaml::Value::String(s) => MetaValue::Text(s.clone()),
            serde_yaml::Value::Sequence(seq) => {
                MetaValue::List(seq.iter().map(MetaValue::from_yaml).collect())
            }
            serde_yaml::Value::Mapping(map) => MetaValue::Map(
                map.iter()
                    .map(|(k, v)| (yaml_key(k), MetaValue::from_yaml(v)))
                    .collect(),
            ),
            serde_yaml::Value::Tagged(tagged) => MetaValue::from_yaml(&tagged.value),
        }
    }

    pub fn to_yaml(&self) -> serde_yaml::Value {
        match self {
            MetaValue::Null => serde_yaml::Value::Null,
            MetaValue::Bool(b) => serde_yaml::Value::Bool(*b),
            MetaValue::Int(i) => serde_yaml::Value::Number((*i).into()),
            MetaValue::Float(f) => serde_yaml::Value::Number((*f).into()),
            MetaValue::Text(s) => serde_yaml::Value::String(s.clone()),
            MetaValue::List(items) => {
                serde_yaml::Value::Sequence(items.iter().map(MetaValue::to_yaml).collect())
            }
            MetaValue::Map(map) => {
                let mut out = serde_yaml::Mapping::new();
                for (k, v) in map {
                    out.insert(serde_yaml::Value::String(k.clone()), v.to_yaml());
                }
                serde_yaml::Value::Mapping(out)
            }
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Text(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Text(s)
    }
}

/// Render a YAML mapping key as a string.
pub(crate) fn yaml_key(key: &serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// Merge `updates` into `base`: new keys are added, existing keys are
/// overwritten, keys absent from `updates` are left alone.
pub fn merge_metadata(base: &mut Metadata, updates: Metadata) {
    for (key, value) in updates {
        base.insert(key, value);
    }
}

/// A project: the namespace every entity and index row belongs to.
#[derive(Debug, Clone)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub path: String,
}

/// The root record for one tracked file.
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub entity_type: String,
    pub entity_metadata: Metadata,
    pub content_type: String,
    pub permalink: Option<String>,
    pub file_path: String,
    pub checksum: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Entity {
    pub fn is_markdown(&self) -> bool {
        self.content_type == crate::file_service::MIME_MARKDOWN
    }

    /// Writable fields of this row, for an update.
    pub fn fields(&self) -> EntityFields {
        EntityFields {
            title: self.title.clone(),
            entity_type: self.entity_type.clone(),
            entity_metadata: self.entity_metadata.clone(),
            content_type: self.content_type.clone(),
            permalink: self.permalink.clone(),
            file_path: self.file_path.clone(),
            checksum: self.checksum.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Field values for inserting or rewriting an entity row.
#[derive(Debug, Clone)]
pub struct EntityFields {
    pub title: String,
    pub entity_type: String,
    pub entity_metadata: Metadata,
    pub content_type: String,
    pub permalink: Option<String>,
    pub file_path: String,
    pub checksum: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A categorized, taggable fact extracted from an entity body.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub id: i64,
    pub entity_id: i64,
    pub category: String,
    pub content: String,
    pub tags: Vec<String>,
    pub context: Option<String>,
}

/// An observation before it has been assigned an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewObservation {
    pub category: String,
    pub content: String,
    pub tags: Vec<String>,
    pub context: Option<String>,
}

/// A typed directed edge. `to_id == None` is a forward reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub id: i64,
    pub from_id: i64,
    pub to_id: Option<i64>,
    pub to_name: String,
    pub relation_type: String,
    pub context: Option<String>,
}

impl Relation {
    pub fn is_resolved(&self) -> bool {
        self.to_id.is_some()
    }
}

/// A relation before it has been assigned an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRelation {
    pub from_id: i64,
    pub to_id: Option<i64>,
    pub to_name: String,
    pub relation_type: String,
    pub context: Option<String>,
}

/// Discriminator for rows in the search index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchItemType {
    Entity,
    Observation,
    Relation,
}

impl SearchItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchItemType::Entity => "entity",
            SearchItemType::Observation => "observation",
            SearchItemType::Relation => "relation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "entity" => Some(SearchItemType::Entity),
            "observation" => Some(SearchItemType::Observation),
            "relation" => Some(SearchItemType::Relation),
            _ => None,
        }
    }
}

impl fmt::Display for SearchItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A denormalized row in the full-text index.
#[derive(Debug, Clone, Serialize)]
pub struct SearchIndexRow {
    pub project_id: i64,
    pub id: i64,
    #[serde(rename = "type")]
    pub item_type: SearchItemType,
    pub title: String,
    pub content_stems: String,
    pub content_snippet: String,
    pub permalink: Option<String>,
    pub file_path: String,
    pub metadata: serde_json::Value,
    pub entity_id: Option<i64>,
    pub from_id: Option<i64>,
    pub to_id: Option<i64>,
    pub relation_type: Option<String>,
    pub category: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A search hit. Lower `score` is more relevant (bm25 ordering).
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub row: SearchIndexRow,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_untouched_keys() {
        let mut base = Metadata::new();
        base.insert("title".into(), "Old".into());
        base.insert("status".into(), "draft".into());

        let mut updates = Metadata::new();
        updates.insert("title".into(), "New".into());
        updates.insert("permalink".into(), "notes/new".into());
        merge_metadata(&mut base, updates);

        assert_eq!(base["title"], MetaValue::Text("New".into()));
        assert_eq!(base["status"], MetaValue::Text("draft".into()));
        assert_eq!(base["permalink"], MetaValue::Text("notes/new".into()));
    }

    #[test]
    fn yaml_values_convert() {
        let yaml: serde_yaml::Value =
            serde_yaml::from_str("tags: [a, b]\ncount: 3\nratio: 0.5\nok: true").unwrap();
        let value = MetaValue::from_yaml(&yaml);
        let MetaValue::Map(map) = value else {
            panic!("expected map");
        };
        assert_eq!(
            map["tags"],
            MetaValue::List(vec!["a".into(), "b".into()])
        );
        assert_eq!(map["count"], MetaValue::Int(3));
        assert_eq!(map["ratio"], MetaValue::Float(0.5));
        assert_eq!(map["ok"], MetaValue::Bool(true));
    }

    #[test]
    fn metadata_json_roundtrip_is_untagged() {
        let mut meta = Metadata::new();
        meta.insert("type".into(), "note".into());
        meta.insert("n".into(), MetaValue::Int(2));
        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(json, r#"{"n":2,"type":"note"}"#);
    }
}
