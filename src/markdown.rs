//! Markdown note parsing.
//!
//! Turns a note into its structured parts: YAML frontmatter, observations
//! (`- [category] content #tag (context)`), and relations
//! (`- relation_type [[Target]] (context)` plus inline `[[Target]]` links,
//! which become `links_to` relations).

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{KbError, Result};
use crate::models::{yaml_key, MetaValue, Metadata, NewObservation};

/// Category used when an observation has an empty `[]` category.
pub const DEFAULT_CATEGORY: &str = "note";
/// Entity type used when frontmatter has no `type`.
pub const DEFAULT_ENTITY_TYPE: &str = "note";
/// Relation type for inline wiki links.
pub const LINKS_TO: &str = "links_to";

static LIST_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[-*+]\s+(.+?)\s*$").unwrap());
static OBSERVATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[([^\[\]]*)\]\s+(.+)$").unwrap());
static RELATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^\[\]()#]+?)\s+\[\[([^\]]+)\]\](?:\s*\(([^()]*)\))?$").unwrap()
});
static BARE_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[\[([^\]]+)\]\](?:\s*\(([^()]*)\))?$").unwrap());
static WIKI_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[([^\]]+)\]\]").unwrap());
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|\s)#([\w/-]+)").unwrap());
static TRAILING_CONTEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\(([^()]*)\)\s*$").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Frontmatter fields the sync engine reads, plus the full metadata map.
#[derive(Debug, Clone, Default)]
pub struct Frontmatter {
    pub title: Option<String>,
    pub entity_type: Option<String>,
    pub permalink: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Metadata,
}

/// A relation as written in the note, before target resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRelation {
    pub relation_type: String,
    pub target: String,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedNote {
    pub file_path: String,
    pub has_frontmatter: bool,
    pub frontmatter: Frontmatter,
    pub observations: Vec<NewObservation>,
    pub relations: Vec<ParsedRelation>,
    /// Body text after the frontmatter block.
    pub content: String,
}

impl ParsedNote {
    pub fn title(&self) -> String {
        self.frontmatter
            .title
            .clone()
            .unwrap_or_else(|| file_stem(&self.file_path))
    }

    pub fn entity_type(&self) -> String {
        self.frontmatter
            .entity_type
            .clone()
            .unwrap_or_else(|| DEFAULT_ENTITY_TYPE.to_string())
    }
}

pub fn file_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

/// Split `content` into `(frontmatter_yaml, body)`.
///
/// Frontmatter is present only when the first line is `---` and a later
/// line is `---`; otherwise the whole content is body.
pub fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let rest = match content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    {
        Some(rest) => rest,
        None => return (None, content),
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\n', '\r']) == "---" {
            return (Some(&rest[..offset]), &rest[offset + line.len()..]);
        }
        offset += line.len();
    }
    (None, content)
}

pub fn has_frontmatter(content: &str) -> bool {
    split_frontmatter(content).0.is_some()
}

/// Parse a frontmatter block into a YAML mapping.
pub fn parse_frontmatter_mapping(path: &str, yaml: &str) -> Result<serde_yaml::Mapping> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(yaml).map_err(|e| KbError::MalformedFrontmatter {
            path: path.to_string(),
            message: e.to_string(),
        })?;

    match value {
        serde_yaml::Value::Null => Ok(serde_yaml::Mapping::new()),
        serde_yaml::Value::Mapping(map) => Ok(map),
        _ => Err(KbError::FrontmatterNotMapping {
            path: path.to_string(),
        }),
    }
}

fn meta_to_string(value: &MetaValue) -> Option<String> {
    match value {
        MetaValue::Text(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        MetaValue::Int(i) => Some(i.to_string()),
        MetaValue::Float(f) => Some(f.to_string()),
        MetaValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn frontmatter_from_mapping(mapping: &serde_yaml::Mapping) -> Frontmatter {
    let metadata: Metadata = mapping
        .iter()
        .map(|(k, v)| (yaml_key(k), MetaValue::from_yaml(v)))
        .collect();

    let tags = match metadata.get("tags") {
        Some(MetaValue::List(items)) => items.iter().filter_map(meta_to_string).collect(),
        Some(MetaValue::Text(s)) => s
            .split(',')
            .map(|t| t.trim().trim_start_matches('#').to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        _ => Vec::new(),
    };

    Frontmatter {
        title: metadata.get("title").and_then(meta_to_string),
        entity_type: metadata.get("type").and_then(meta_to_string),
        permalink: metadata.get("permalink").and_then(meta_to_string),
        tags,
        metadata,
    }
}

/// Parse a full note.
pub fn parse_note(path: &str, content: &str) -> Result<ParsedNote> {
    let (yaml, body) = split_frontmatter(content);
    let frontmatter = match yaml {
        Some(y) => frontmatter_from_mapping(&parse_frontmatter_mapping(path, y)?),
        None => Frontmatter::default(),
    };

    let (observations, relations) = parse_body(body);

    Ok(ParsedNote {
        file_path: path.to_string(),
        has_frontmatter: yaml.is_some(),
        frontmatter,
        observations,
        relations,
        content: body.to_string(),
    })
}

/// Strip `[[ ]]` and any `|alias` from a link target.
pub fn normalize_link_target(raw: &str) -> String {
    let inner = raw
        .trim()
        .trim_start_matches("[[")
        .trim_end_matches("]]");
    inner.split('|').next().unwrap_or("").trim().to_string()
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn parse_body(body: &str) -> (Vec<NewObservation>, Vec<ParsedRelation>) {
    let mut observations = Vec::new();
    let mut relations = Vec::new();
    let mut in_fence = false;

    for line in body.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }

        if let Some(item) = LIST_ITEM.captures(line).and_then(|c| c.get(1)) {
            let item = item.as_str();

            if let Some(caps) = RELATION.captures(item) {
                let target = normalize_link_target(&caps[2]);
                if !target.is_empty() {
                    relations.push(ParsedRelation {
                        relation_type: caps[1].trim().to_string(),
                        target,
                        context: non_empty(caps.get(3).map(|m| m.as_str())),
                    });
                }
                continue;
            }

            if let Some(caps) = BARE_LINK.captures(item) {
                let target = normalize_link_target(&caps[1]);
                if !target.is_empty() {
                    relations.push(ParsedRelation {
                        relation_type: LINKS_TO.to_string(),
                        target,
                        context: non_empty(caps.get(2).map(|m| m.as_str())),
                    });
                }
                continue;
            }

            if let Some(caps) = OBSERVATION.captures(item) {
                let raw_category = &caps[1];
                // `- [ ] task` / `- [x] done` are checkboxes, not facts
                let is_checkbox = matches!(raw_category, " " | "x" | "X");
                if !is_checkbox {
                    if let Some(obs) = parse_observation(raw_category, &caps[2]) {
                        observations.push(obs);
                    }
                }
            }
        }

        relations.extend(inline_links(line));
    }

    (observations, relations)
}

fn inline_links(line: &str) -> impl Iterator<Item = ParsedRelation> + '_ {
    WIKI_LINK.captures_iter(line).filter_map(|caps| {
        let target = normalize_link_target(&caps[1]);
        (!target.is_empty()).then(|| ParsedRelation {
            relation_type: LINKS_TO.to_string(),
            target,
            context: None,
        })
    })
}

fn parse_observation(raw_category: &str, text: &str) -> Option<NewObservation> {
    let category = match raw_category.trim() {
        "" => DEFAULT_CATEGORY.to_string(),
        c => c.to_string(),
    };

    let mut text = text.trim().to_string();
    let mut context = None;
    if let Some(caps) = TRAILING_CONTEXT.captures(&text) {
        let whole = caps.get(0).map(|m| m.start()).unwrap_or(text.len());
        if whole > 0 {
            context = non_empty(caps.get(1).map(|m| m.as_str()));
            text.truncate(whole);
        }
    }

    let tags: Vec<String> = TAG
        .captures_iter(&text)
        .map(|caps| caps[1].to_string())
        .collect();
    let stripped = TAG.replace_all(&text, "");
    let content = WHITESPACE.replace_all(stripped.trim(), " ").to_string();

    if content.is_empty() {
        return None;
    }

    Some(NewObservation {
        category,
        content,
        tags,
        context,
    })
}
