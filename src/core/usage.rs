use anyhow::Result;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::config::settings::config_dir;

/// One completed provider round-trip.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageRecord {
    pub id: String,
    pub recorded_at: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    pub command: String,
    pub success: bool,
}

impl UsageRecord {
    pub fn new(provider: &str, model: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            recorded_at: Utc::now(),
            provider: provider.to_string(),
            model: model.to_string(),
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            cost: 0.0,
            command: "chat".to_string(),
            success: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderTotals {
    pub cost: f64,
    pub tokens: u64,
    pub requests: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageSummary {
    pub total_cost: f64,
    pub total_tokens: u64,
    pub request_count: u64,
    pub average_cost_per_request: f64,
    pub by_provider: BTreeMap<String, ProviderTotals>,
}

/// Fixed-width so text ordering matches time ordering.
fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// All-time token/cost ledger in `~/.codemonkey/usage.db`.
pub struct UsageStore {
    conn: Mutex<Connection>,
}

impl UsageStore {
    pub fn open() -> Result<Self> {
        let dir = config_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Self::open_at(dir.join("usage.db"))
    }

    /// Open the database at a specific path (useful for testing).
    pub fn open_at(path: PathBuf) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS usage (
                id TEXT PRIMARY KEY,
                recorded_at TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                total_tokens INTEGER NOT NULL DEFAULT 0,
                cost REAL NOT NULL DEFAULT 0,
                command TEXT NOT NULL DEFAULT 'chat',
                success INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_usage_recorded_at ON usage(recorded_at);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn record(&self, record: &UsageRecord) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("lock error: {}", e))?;
        conn.execute(
            "INSERT INTO usage (id, recorded_at, provider, model, input_tokens, output_tokens, total_tokens, cost, command, success)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.id,
                timestamp(record.recorded_at),
                record.provider,
                record.model,
                record.input_tokens as i64,
                record.output_tokens as i64,
                record.total_tokens as i64,
                record.cost,
                record.command,
                record.success,
            ],
        )?;
        Ok(())
    }

    pub fn summary(&self) -> Result<UsageSummary> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("lock error: {}", e))?;
        let mut stmt = conn.prepare(
            "SELECT provider, SUM(cost), SUM(total_tokens), COUNT(*) FROM usage GROUP BY provider",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    ProviderTotals {
                        cost: row.get::<_, f64>(1)?,
                        tokens: row.get::<_, i64>(2)? as u64,
                        requests: row.get::<_, i64>(3)? as u64,
                    },
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut summary = UsageSummary::default();
        for (provider, totals) in rows {
            summary.total_cost += totals.cost;
            summary.total_tokens += totals.tokens;
            summary.request_count += totals.requests;
            summary.by_provider.insert(provider, totals);
        }
        if summary.request_count > 0 {
            summary.average_cost_per_request = summary.total_cost / summary.request_count as f64;
        }
        Ok(summary)
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<UsageRecord>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("lock error: {}", e))?;
        let mut stmt = conn.prepare(
            "SELECT id, recorded_at, provider, model, input_tokens, output_tokens, total_tokens, cost, command, success
             FROM usage ORDER BY recorded_at DESC LIMIT ?1",
        )?;
        let records = stmt
            .query_map(params![limit as i64], |row| {
                let recorded_at: String = row.get(1)?;
                Ok(UsageRecord {
                    id: row.get(0)?,
                    recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
                        .map(|t| t.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    provider: row.get(2)?,
                    model: row.get(3)?,
                    input_tokens: row.get::<_, i64>(4)? as u64,
                    output_tokens: row.get::<_, i64>(5)? as u64,
                    total_tokens: row.get::<_, i64>(6)? as u64,
                    cost: row.get(7)?,
                    command: row.get(8)?,
                    success: row.get(9)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Delete records older than `days_to_keep` days. Returns how many went.
    pub fn prune(&self, days_to_keep: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(days_to_keep);
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("lock error: {}", e))?;
        let removed = conn.execute(
            "DELETE FROM usage WHERE recorded_at < ?1",
            params![timestamp(cutoff)],
        )?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(provider: &str, tokens: u64, cost: f64) -> UsageRecord {
        UsageRecord {
            total_tokens: tokens,
            input_tokens: tokens / 2,
            output_tokens: tokens - tokens / 2,
            cost,
            ..UsageRecord::new(provider, "gpt-4o")
        }
    }

    #[test]
    fn empty_summary() {
        let store = UsageStore::open_in_memory().unwrap();
        let summary = store.summary().unwrap();
        assert_eq!(summary, UsageSummary::default());
    }

    #[test]
    fn summary_groups_by_provider() {
        let store = UsageStore::open_in_memory().unwrap();
        store.record(&record("openai", 1000, 0.5)).unwrap();
        store.record(&record("openai", 500, 0.25)).unwrap();
        store.record(&record("ollama", 2000, 0.0)).unwrap();

        let summary = store.summary().unwrap();
        assert_eq!(summary.request_count, 3);
        assert_eq!(summary.total_tokens, 3500);
        assert!((summary.total_cost - 0.75).abs() < 1e-9);
        assert!((summary.average_cost_per_request - 0.25).abs() < 1e-9);

        let openai = &summary.by_provider["openai"];
        assert_eq!(openai.requests, 2);
        assert_eq!(openai.tokens, 1500);
        assert_eq!(summary.by_provider["ollama"].cost, 0.0);
    }

    #[test]
    fn recent_is_newest_first() {
        let store = UsageStore::open_in_memory().unwrap();
        let mut old = record("openai", 10, 0.0);
        old.recorded_at = Utc::now() - Duration::hours(1);
        store.record(&old).unwrap();
        let new = record("groq", 20, 0.0);
        store.record(&new).unwrap();

        let recent = store.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, new.id);
        assert_eq!(recent[1].provider, "openai");
        assert!(recent[0].success);
    }

    #[test]
    fn prune_removes_old_records() {
        let store = UsageStore::open_in_memory().unwrap();
        let mut ancient = record("openai", 10, 0.0);
        ancient.recorded_at = Utc::now() - Duration::days(120);
        store.record(&ancient).unwrap();
        store.record(&record("openai", 10, 0.0)).unwrap();

        assert_eq!(store.prune(90).unwrap(), 1);
        assert_eq!(store.summary().unwrap().request_count, 1);
    }

    #[test]
    fn persists_on_disk() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("usage.db");
        {
            let store = UsageStore::open_at(path.clone()).unwrap();
            store.record(&record("openai", 42, 0.01)).unwrap();
        }
        let store = UsageStore::open_at(path).unwrap();
        assert_eq!(store.summary().unwrap().total_tokens, 42);
    }
}
