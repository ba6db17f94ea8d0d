//! Database statistics and health overview.
//!
//! A quick summary of what is tracked for the configured project: entity,
//! observation and relation counts, how many forward references are still
//! dangling, and how many entities a crashed sync left unfinished. Used by
//! `kb stats`.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::knowledge_base::KnowledgeBase;

/// Per-entity-type breakdown.
struct TypeStats {
    entity_type: String,
    entity_count: i64,
    last_update_ts: Option<i64>,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let kb = KnowledgeBase::open(config).await?;
    let project_id = kb.project.id;

    let total_entities = kb.entities.count().await?;
    let total_observations = kb.observations.count_for_project(project_id).await?;
    let total_relations = kb.relations.count(None).await?;
    let unresolved = kb.relations.count(Some(false)).await?;
    let index_rows = kb.search.repository().count().await?;

    let incomplete: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM entity WHERE project_id = ? AND checksum IS NULL",
    )
    .bind(project_id)
    .fetch_one(&kb.pool)
    .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("kbsync: {}", config.project.name);
    println!("================================");
    println!();
    println!("  Root:          {}", config.project.root.display());
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    println!("  Entities:      {}", total_entities);
    println!("  Observations:  {}", total_observations);
    println!(
        "  Relations:     {} ({} unresolved)",
        total_relations, unresolved
    );
    println!("  Index rows:    {}", index_rows);
    if incomplete > 0 {
        println!("  Unfinished:    {} (re-run sync)", incomplete);
    }

    let type_rows = sqlx::query(
        r#"
        SELECT entity_type, COUNT(*) AS entity_count, MAX(updated_at) AS last_update
        FROM entity
        WHERE project_id = ?
        GROUP BY entity_type
        ORDER BY entity_count DESC, entity_type
        "#,
    )
    .bind(project_id)
    .fetch_all(&kb.pool)
    .await?;

    let type_stats: Vec<TypeStats> = type_rows
        .iter()
        .map(|row| TypeStats {
            entity_type: row.get("entity_type"),
            entity_count: row.get("entity_count"),
            last_update_ts: row.get("last_update"),
        })
        .collect();

    if !type_stats.is_empty() {
        println!();
        println!("  By type:");
        println!("  {:<24} {:>8}   {}", "TYPE", "ENTITIES", "LAST UPDATE");
        println!("  {}", "-".repeat(56));

        for s in &type_stats {
            let updated = match s.last_update_ts {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!("  {:<24} {:>8}   {}", s.entity_type, s.entity_count, updated);
        }
    }

    println!();

    kb.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now ("3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    let plural = |n: i64| if n == 1 { "" } else { "s" };
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, plural(mins))
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, plural(hours))
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, plural(days))
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_human_readable() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn relative_times() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 2 * 3600), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400 - 10), "1 day ago");
        assert_eq!(format_ts_relative(0), "1970-01-01 00:00");
    }
}
