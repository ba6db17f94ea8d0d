//! Storage side of the full-text index: row writes, removals and the
//! filtered, ranked query.

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};

use super::query::{is_match_all, prepare_search_term};
use super::SearchQuery;
use crate::error::Result;
use crate::models::{SearchIndexRow, SearchItemType, SearchResult};

const SEARCH_COLUMNS: &str = "id, title, content_stems, content_snippet, permalink, file_path, \
                              type, project_id, metadata, entity_id, from_id, to_id, \
                              relation_type, category, created_at, updated_at";

/// How a permalink filter is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermalinkFilter {
    Glob(String),
    Exact(String),
    Match(String),
}

impl PermalinkFilter {
    /// `*` means glob, a path separator means equality, anything else is
    /// compiled as an exact term.
    pub fn from_pattern(pattern: &str) -> Self {
        let pattern = pattern.trim();
        if pattern.contains('*') {
            PermalinkFilter::Glob(pattern.to_string())
        } else if pattern.contains('/') {
            PermalinkFilter::Exact(pattern.to_string())
        } else {
            PermalinkFilter::Match(prepare_search_term(pattern, false))
        }
    }
}

/// Build the single FTS5 MATCH expression for a query, if it needs one.
pub fn match_expression(query: &SearchQuery) -> Option<String> {
    let mut parts = Vec::new();

    if let Some(text) = query.text.as_deref().filter(|t| !is_match_all(t)) {
        parts.push(format!(
            "{{title content_stems}} : ({})",
            prepare_search_term(text, true)
        ));
    }
    if let Some(title) = query.title.as_deref().filter(|t| !is_match_all(t)) {
        parts.push(format!("{{title}} : ({})", prepare_search_term(title, false)));
    }
    if let Some(PermalinkFilter::Match(expr)) =
        query.permalink_match.as_deref().map(PermalinkFilter::from_pattern)
    {
        parts.push(format!("{{permalink}} : ({expr})"));
    }

    (!parts.is_empty()).then(|| parts.join(" AND "))
}

/// True for errors the FTS5 parser raises on malformed MATCH input.
fn is_query_syntax_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message();
            message.contains("fts5:")
                || message.contains("unterminated string")
                || message.contains("unknown special query")
        }
        _ => false,
    }
}

fn result_from_row(row: &SqliteRow) -> SearchResult {
    let item_type: String = row.get("type");
    let metadata: String = row.get("metadata");
    SearchResult {
        row: SearchIndexRow {
            project_id: row.get("project_id"),
            id: row.get("id"),
            item_type: SearchItemType::parse(&item_type).unwrap_or(SearchItemType::Entity),
            title: row.get("title"),
            content_stems: row.get("content_stems"),
            content_snippet: row.get("content_snippet"),
            permalink: row.get("permalink"),
            file_path: row.get("file_path"),
            metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
            entity_id: row.get("entity_id"),
            from_id: row.get("from_id"),
            to_id: row.get("to_id"),
            relation_type: row.get("relation_type"),
            category: row.get("category"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        },
        score: row.get("score"),
    }
}

async fn delete_prior(conn: &mut SqliteConnection, project_id: i64, row: &SearchIndexRow) -> Result<()> {
    match &row.permalink {
        Some(permalink) => {
            sqlx::query("DELETE FROM search_index WHERE permalink = ? AND project_id = ?")
                .bind(permalink)
                .bind(project_id)
                .execute(&mut *conn)
                .await?;
        }
        None => {
            sqlx::query("DELETE FROM search_index WHERE id = ? AND type = ? AND project_id = ?")
                .bind(row.id)
                .bind(row.item_type.as_str())
                .bind(project_id)
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(())
}

async fn insert_row(conn: &mut SqliteConnection, row: &SearchIndexRow) -> Result<()> {
    let metadata = serde_json::to_string(&row.metadata)?;
    sqlx::query(
        r#"
        INSERT INTO search_index (id, title, content_stems, content_snippet, permalink, file_path,
                                  type, project_id, metadata, entity_id, from_id, to_id,
                                  relation_type, category, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(row.id)
    .bind(&row.title)
    .bind(&row.content_stems)
    .bind(&row.content_snippet)
    .bind(&row.permalink)
    .bind(&row.file_path)
    .bind(row.item_type.as_str())
    .bind(row.project_id)
    .bind(&metadata)
    .bind(row.entity_id)
    .bind(row.from_id)
    .bind(row.to_id)
    .bind(&row.relation_type)
    .bind(&row.category)
    .bind(row.created_at)
    .bind(row.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SearchRepository {
    pool: SqlitePool,
    project_id: i64,
}

impl SearchRepository {
    pub fn new(pool: SqlitePool, project_id: i64) -> Self {
        Self { pool, project_id }
    }

    /// Replace the row sharing this row's permalink, atomically.
    pub async fn index_item(&self, row: &SearchIndexRow) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        delete_prior(&mut *tx, self.project_id, row).await?;
        insert_row(&mut *tx, row).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Drop every row derived from `entity_id` and write `rows` in its place,
    /// in one transaction.
    pub async fn replace_entity_rows(&self, entity_id: i64, rows: &[SearchIndexRow]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM search_index WHERE entity_id = ? AND project_id = ?")
            .bind(entity_id)
            .bind(self.project_id)
            .execute(&mut *tx)
            .await?;
        for row in rows {
            delete_prior(&mut *tx, self.project_id, row).await?;
            insert_row(&mut *tx, row).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_by_permalink(&self, permalink: &str) -> Result<u64> {
        let done = sqlx::query("DELETE FROM search_index WHERE permalink = ? AND project_id = ?")
            .bind(permalink)
            .bind(self.project_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    pub async fn delete_by_entity_id(&self, entity_id: i64) -> Result<u64> {
        let done = sqlx::query("DELETE FROM search_index WHERE entity_id = ? AND project_id = ?")
            .bind(entity_id)
            .bind(self.project_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    /// Remove every row belonging to this project.
    pub async fn clear(&self) -> Result<u64> {
        let done = sqlx::query("DELETE FROM search_index WHERE project_id = ?")
            .bind(self.project_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM search_index WHERE project_id = ?")
            .bind(self.project_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Run a filtered search, best match first.
    ///
    /// Input the FTS5 parser still rejects yields an empty list; any other
    /// database error propagates.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let match_expr = match_expression(query);
        let score = if match_expr.is_some() {
            "bm25(search_index)"
        } else {
            "0.0"
        };

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {SEARCH_COLUMNS}, {score} AS score FROM search_index WHERE project_id = "
        ));
        qb.push_bind(self.project_id);

        if let Some(expr) = &match_expr {
            qb.push(" AND search_index MATCH ").push_bind(expr.clone());
        }

        if let Some(permalink) = &query.permalink {
            qb.push(" AND permalink = ").push_bind(permalink.clone());
        }

        match query.permalink_match.as_deref().map(PermalinkFilter::from_pattern) {
            Some(PermalinkFilter::Glob(pattern)) => {
                qb.push(" AND permalink GLOB ").push_bind(pattern);
            }
            Some(PermalinkFilter::Exact(permalink)) => {
                qb.push(" AND permalink = ").push_bind(permalink);
            }
            Some(PermalinkFilter::Match(_)) | None => {}
        }

        if !query.item_types.is_empty() {
            qb.push(" AND type IN (");
            let mut types = qb.separated(", ");
            for item_type in &query.item_types {
                types.push_bind(item_type.as_str());
            }
            types.push_unseparated(")");
        }

        if !query.entity_types.is_empty() {
            qb.push(" AND json_extract(metadata, '$.entity_type') IN (");
            let mut types = qb.separated(", ");
            for entity_type in &query.entity_types {
                types.push_bind(entity_type.clone());
            }
            types.push_unseparated(")");
        }

        if let Some(after) = query.after_date {
            qb.push(" AND created_at >= ").push_bind(after.timestamp());
        }

        qb.push(" ORDER BY score ASC");
        if query.after_date.is_some() {
            qb.push(", updated_at DESC");
        }
        qb.push(" LIMIT ").push_bind(query.limit);
        qb.push(" OFFSET ").push_bind(query.offset);

        let rows = match qb.build().fetch_all(&self.pool).await {
            Ok(rows) => rows,
            Err(err) if is_query_syntax_error(&err) => {
                tracing::warn!(error = %err, "search index rejected query; returning no results");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        Ok(rows.iter().map(result_from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permalink_filters() {
        assert_eq!(
            PermalinkFilter::from_pattern("docs/*"),
            PermalinkFilter::Glob("docs/*".into())
        );
        assert_eq!(
            PermalinkFilter::from_pattern("docs/intro"),
            PermalinkFilter::Exact("docs/intro".into())
        );
        assert_eq!(
            PermalinkFilter::from_pattern("intro"),
            PermalinkFilter::Match("intro".into())
        );
    }

    #[test]
    fn match_expression_combines_columns() {
        let query = SearchQuery {
            text: Some("hello world".into()),
            title: Some("Design".into()),
            permalink_match: Some("specs".into()),
            ..SearchQuery::default()
        };
        assert_eq!(
            match_expression(&query).as_deref(),
            Some("{title content_stems} : (hello* AND world*) AND {title} : (Design) AND {permalink} : (specs)")
        );
    }

    #[test]
    fn wildcard_only_text_has_no_match_clause() {
        for text in ["*", "   ", ""] {
            let query = SearchQuery {
                text: Some(text.into()),
                ..SearchQuery::default()
            };
            assert_eq!(match_expression(&query), None);
        }
        let glob = SearchQuery {
            permalink_match: Some("notes/*".into()),
            ..SearchQuery::default()
        };
        assert_eq!(match_expression(&glob), None);
    }

    #[tokio::test]
    async fn after_date_includes_the_boundary() {
        let repos = crate::test_support::memory_repositories().await;
        let search = SearchRepository::new(repos.pool.clone(), repos.project.id);
        let midnight = crate::search::parse_after_date("2024-03-01").unwrap();
        let row = SearchIndexRow {
            project_id: repos.project.id,
            id: 1,
            item_type: SearchItemType::Entity,
            title: "Boundary".into(),
            content_stems: "boundary".into(),
            content_snippet: "boundary".into(),
            permalink: Some("boundary".into()),
            file_path: "boundary.md".into(),
            metadata: serde_json::json!({}),
            entity_id: Some(1),
            from_id: None,
            to_id: None,
            relation_type: None,
            category: None,
            created_at: midnight.timestamp(),
            updated_at: midnight.timestamp(),
        };
        search.index_item(&row).await.unwrap();

        let on_the_day = SearchQuery {
            after_date: Some(midnight),
            ..SearchQuery::default()
        };
        assert_eq!(search.search(&on_the_day).await.unwrap().len(), 1);

        let next_day = SearchQuery {
            after_date: Some(midnight + chrono::Duration::days(1)),
            ..SearchQuery::default()
        };
        assert!(search.search(&next_day).await.unwrap().is_empty());
    }
}
