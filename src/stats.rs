//! Database statistics.
//!
//! A quick summary of what is stored: document and chunk counts, how many
//! chunks carry generated context, and a per-owner breakdown. Used by
//! `hctx stats`.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

struct OwnerStats {
    owner_id: String,
    doc_count: i64,
    chunk_count: i64,
    contextualized: i64,
    last_ingest_ts: Option<i64>,
}

/// Query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await?;
    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await?;
    let total_contextualized: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE is_contextualized = 1")
            .fetch_one(&pool)
            .await?;
    let total_links: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agent_documents")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Hybrid Context: Database Stats");
    println!("==============================");
    println!();
    println!("  Database:        {}", config.db.path.display());
    println!("  Size:            {}", format_bytes(db_size));
    println!();
    println!("  Documents:       {}", total_docs);
    println!("  Chunks:          {}", total_chunks);
    println!(
        "  Contextualized:  {} / {} ({}%)",
        total_contextualized,
        total_chunks,
        percent(total_contextualized, total_chunks)
    );
    println!("  Agent links:     {}", total_links);

    let rows = sqlx::query(
        r#"
        SELECT
            d.owner_id,
            COUNT(DISTINCT d.id) AS doc_count,
            COUNT(c.id) AS chunk_count,
            COALESCE(SUM(c.is_contextualized), 0) AS contextualized,
            MAX(d.created_at) AS last_ingest
        FROM documents d
        LEFT JOIN chunks c ON c.document_id = d.id
        GROUP BY d.owner_id
        ORDER BY doc_count DESC, d.owner_id ASC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let owners: Vec<OwnerStats> = rows
        .iter()
        .map(|row| OwnerStats {
            owner_id: row.get("owner_id"),
            doc_count: row.get("doc_count"),
            chunk_count: row.get("chunk_count"),
            contextualized: row.get("contextualized"),
            last_ingest_ts: row.get("last_ingest"),
        })
        .collect();

    if !owners.is_empty() {
        println!();
        println!("  By owner:");
        println!(
            "  {:<24} {:>6} {:>8} {:>8}   {}",
            "OWNER", "DOCS", "CHUNKS", "CTX %", "LAST INGEST"
        );
        println!("  {}", "-".repeat(72));
        for o in &owners {
            let last = match o.last_ingest_ts {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "  {:<24} {:>6} {:>8} {:>7}%   {}",
                o.owner_id,
                o.doc_count,
                o.chunk_count,
                percent(o.contextualized, o.chunk_count),
                last
            );
        }
    }
    println!();

    pool.close().await;
    Ok(())
}

fn percent(part: i64, whole: i64) -> i64 {
    if whole > 0 {
        part * 100 / whole
    } else {
        0
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Unix timestamp as "3 hours ago", falling back to a date after a month.
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    let (n, unit) = match delta {
        d if d < 0 => return format_ts_iso(ts),
        d if d < 60 => return "just now".to_string(),
        d if d < 3600 => (d / 60, "min"),
        d if d < 86400 => (d / 3600, "hour"),
        d if d < 86400 * 30 => (d / 86400, "day"),
        _ => return format_ts_iso(ts),
    };
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
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
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(5, 0), 0);
    }

    #[test]
    fn test_format_ts_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
    }
}
