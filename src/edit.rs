//! In-place edits of note content.
//!
//! Every operation is a pure `&str → String` rewrite. Malformed requests
//! (missing parameters, ambiguous section headers, replacement count
//! mismatches) are [`KbError::Validation`] errors, never silently ignored.

use crate::config::Config;
use crate::error::{KbError, Result};
use crate::knowledge_base::KnowledgeBase;
use crate::markdown::split_frontmatter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOperation {
    Append {
        content: String,
    },
    /// Insert after the frontmatter block, if any.
    Prepend {
        content: String,
    },
    FindReplace {
        find: String,
        content: String,
        expected_replacements: usize,
    },
    /// Replace the body under a markdown header, up to the next header of
    /// the same or higher level. An absent header is appended.
    ReplaceSection {
        section: String,
        content: String,
    },
}

impl EditOperation {
    /// Build an operation from loosely-typed request fields.
    pub fn from_parts(
        operation: &str,
        content: String,
        find_text: Option<String>,
        section: Option<String>,
        expected_replacements: Option<usize>,
    ) -> Result<Self> {
        match operation {
            "append" => Ok(EditOperation::Append { content }),
            "prepend" => Ok(EditOperation::Prepend { content }),
            "find_replace" => {
                let find = find_text.filter(|f| !f.is_empty()).ok_or_else(|| {
                    KbError::Validation("find_text is required for find_replace".into())
                })?;
                Ok(EditOperation::FindReplace {
                    find,
                    content,
                    expected_replacements: expected_replacements.unwrap_or(1),
                })
            }
            "replace_section" => {
                let section = section.filter(|s| !s.trim().is_empty()).ok_or_else(|| {
                    KbError::Validation("section is required for replace_section".into())
                })?;
                Ok(EditOperation::ReplaceSection { section, content })
            }
            other => Err(KbError::Validation(format!(
                "unknown edit operation '{}': use append, prepend, find_replace or replace_section",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EditOperation::Append { .. } => "append",
            EditOperation::Prepend { .. } => "prepend",
            EditOperation::FindReplace { .. } => "find_replace",
            EditOperation::ReplaceSection { .. } => "replace_section",
        }
    }
}

fn ensure_trailing_newline(text: &mut String) {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
}

/// Level of a markdown header line (`## A` → 2), or `None`.
fn header_level(line: &str) -> Option<usize> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    (rest.is_empty() || rest.starts_with(' ')).then_some(hashes)
}

fn append(current: &str, content: &str) -> String {
    let mut out = current.to_string();
    ensure_trailing_newline(&mut out);
    out.push_str(content);
    out
}

fn prepend(current: &str, content: &str) -> String {
    let (_, body) = split_frontmatter(current);
    let header = &current[..current.len() - body.len()];

    let mut out = String::with_capacity(current.len() + content.len() + 1);
    out.push_str(header);
    out.push_str(content);
    if !body.is_empty() {
        ensure_trailing_newline(&mut out);
    }
    out.push_str(body);
    out
}

fn find_replace(current: &str, find: &str, content: &str, expected: usize) -> Result<String> {
    let found = current.matches(find).count();
    if found == 0 {
        return Err(KbError::Validation(format!("text to replace not found: '{}'", find)));
    }
    if found != expected {
        return Err(KbError::Validation(format!(
            "expected {} occurrences of '{}', but found {}",
            expected, find, found
        )));
    }
    Ok(current.replace(find, content))
}

fn replace_section(current: &str, section: &str, content: &str) -> Result<String> {
    let header = section.trim();
    let level = header_level(header).ok_or_else(|| {
        KbError::Validation(format!("section must be a markdown header: '{}'", header))
    })?;

    let lines: Vec<&str> = current.split_inclusive('\n').collect();
    let matches: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.trim() == header)
        .map(|(i, _)| i)
        .collect();

    let mut new_section = content.to_string();
    ensure_trailing_newline(&mut new_section);

    match matches.as_slice() {
        [] => {
            let mut out = current.to_string();
            ensure_trailing_newline(&mut out);
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(header);
            out.push('\n');
            out.push_str(&new_section);
            Ok(out)
        }
        [start] => {
            let end = lines[start + 1..]
                .iter()
                .position(|line| header_level(line).is_some_and(|l| l <= level))
                .map_or(lines.len(), |offset| start + 1 + offset);

            let mut out: String = lines[..=*start].concat();
            ensure_trailing_newline(&mut out);
            out.push_str(&new_section);
            out.push_str(&lines[end..].concat());
            Ok(out)
        }
        _ => Err(KbError::Validation(format!(
            "multiple sections found with header '{}'; use find_replace instead",
            header
        ))),
    }
}

/// Apply `op` to `current`, returning the new file content.
pub fn apply_edit(current: &str, op: &EditOperation) -> Result<String> {
    match op {
        EditOperation::Append { content } => Ok(append(current, content)),
        EditOperation::Prepend { content } => Ok(prepend(current, content)),
        EditOperation::FindReplace {
            find,
            content,
            expected_replacements,
        } => find_replace(current, find, content, *expected_replacements),
        EditOperation::ReplaceSection { section, content } => {
            replace_section(current, section, content)
        }
    }
}

/// Run the `edit` command: rewrite the note, re-sync it and print where it
/// ended up.
pub async fn run_edit(config: &Config, identifier: &str, op: EditOperation) -> anyhow::Result<()> {
    let kb = KnowledgeBase::open(config).await?;
    let edited = kb.entity_service.edit_entity(identifier, &op).await;
    kb.close().await;
    let entity = edited?;

    println!("edit {} ({})", identifier, op.name());
    println!("  file: {}", entity.file_path);
    if let Some(permalink) = &entity.permalink {
        println!("  permalink: {}", permalink);
    }
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_validation(err: KbError) -> bool {
        matches!(err, KbError::Validation(_))
    }

    #[test]
    fn append_separates_with_newline() {
        let op = EditOperation::Append {
            content: "more".into(),
        };
        assert_eq!(apply_edit("text", &op).unwrap(), "text\nmore");
        assert_eq!(apply_edit("text\n", &op).unwrap(), "text\nmore");
    }

    #[test]
    fn prepend_goes_after_frontmatter() {
        let op = EditOperation::Prepend {
            content: "first".into(),
        };
        assert_eq!(
            apply_edit("---\ntitle: A\n---\nbody\n", &op).unwrap(),
            "---\ntitle: A\n---\nfirst\nbody\n"
        );
        assert_eq!(apply_edit("body", &op).unwrap(), "first\nbody");
    }

    #[test]
    fn find_replace_checks_count() {
        let op = EditOperation::FindReplace {
            find: "cat".into(),
            content: "dog".into(),
            expected_replacements: 1,
        };
        assert_eq!(apply_edit("a cat sat", &op).unwrap(), "a dog sat");
        assert!(is_validation(apply_edit("cat and cat", &op).unwrap_err()));
        assert!(is_validation(apply_edit("no pets", &op).unwrap_err()));

        let two = EditOperation::FindReplace {
            find: "cat".into(),
            content: "dog".into(),
            expected_replacements: 2,
        };
        assert_eq!(apply_edit("cat and cat", &two).unwrap(), "dog and dog");
    }

    #[test]
    fn replace_section_stops_at_same_level() {
        let doc = "# Title\n\n## Plan\nold plan\n### Detail\nold detail\n## Notes\nkeep\n";
        let op = EditOperation::ReplaceSection {
            section: "## Plan".into(),
            content: "new plan".into(),
        };
        assert_eq!(
            apply_edit(doc, &op).unwrap(),
            "# Title\n\n## Plan\nnew plan\n## Notes\nkeep\n"
        );
    }

    #[test]
    fn replace_section_appends_when_missing() {
        let op = EditOperation::ReplaceSection {
            section: "## Log".into(),
            content: "entry".into(),
        };
        assert_eq!(apply_edit("# Title\n", &op).unwrap(), "# Title\n\n## Log\nentry\n");
    }

    #[test]
    fn replace_section_rejects_ambiguity_and_non_headers() {
        let doc = "## A\none\n## A\ntwo\n";
        let op = EditOperation::ReplaceSection {
            section: "## A".into(),
            content: "x".into(),
        };
        assert!(is_validation(apply_edit(doc, &op).unwrap_err()));

        let not_header = EditOperation::ReplaceSection {
            section: "Plan".into(),
            content: "x".into(),
        };
        assert!(is_validation(apply_edit(doc, &not_header).unwrap_err()));
    }

    #[test]
    fn from_parts_requires_parameters() {
        assert!(is_validation(
            EditOperation::from_parts("find_replace", "x".into(), None, None, None).unwrap_err()
        ));
        assert!(is_validation(
            EditOperation::from_parts("replace_section", "x".into(), None, None, None).unwrap_err()
        ));
        assert!(is_validation(
            EditOperation::from_parts("rewrite", "x".into(), None, None, None).unwrap_err()
        ));
        assert_eq!(
            EditOperation::from_parts("find_replace", "x".into(), Some("y".into()), None, None)
                .unwrap(),
            EditOperation::FindReplace {
                find: "y".into(),
                content: "x".into(),
                expected_replacements: 1
            }
        );
    }
}
