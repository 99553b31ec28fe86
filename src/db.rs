use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::model::{JobStatus, NormalizedRecord, RunOutcome, RunStatus};

pub const DEFAULT_PAGE_SIZE: usize = 50;

/// SQLite-backed job store. Shared across source tasks; every mutation is a
/// keyed upsert so concurrent writers never conflict.
pub struct Store {
    conn: Mutex<Connection>,
}

/// What an upsert did to the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaceSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deactivated: usize,
}

/// A stored job, with bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredJob {
    #[serde(flatten)]
    pub record: NormalizedRecord,
    pub created_at: String,
    pub updated_at: String,
}

/// Filters for the read API. Empty fields match everything.
#[derive(Debug, Clone)]
pub struct JobQuery {
    pub source: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub department: Option<String>,
    pub search: Option<String>,
    pub include_inactive: bool,
    pub page: usize,
    pub page_size: usize,
}

impl Default for JobQuery {
    fn default() -> Self {
        Self {
            source: None,
            city: None,
            country: None,
            department: None,
            search: None,
            include_inactive: false,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceCount {
    pub source_name: String,
    pub active: usize,
    pub inactive: usize,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let conn = Connection::open(path).with_context(|| format!("opening {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        Self::with_connection(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("store connection poisoned"))
    }

    // ── Writes ──

    #[cfg(test)]
    pub fn upsert(&self, record: &NormalizedRecord) -> Result<UpsertOutcome> {
        let conn = self.conn()?;
        upsert_in(&conn, record, &now())
    }

    pub fn upsert_many(&self, records: &[NormalizedRecord]) -> Result<ReplaceSummary> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let ts = now();
        let mut summary = ReplaceSummary::default();
        for r in records {
            match upsert_in(&tx, r, &ts)? {
                UpsertOutcome::Inserted => summary.inserted += 1,
                UpsertOutcome::Updated => summary.updated += 1,
            }
        }
        tx.commit()?;
        Ok(summary)
    }

    /// Make `records` the source's complete active set. Previously active
    /// records not in the batch become inactive; rows are kept so
    /// `created_at` survives a posting that comes back.
    pub fn replace_source_records(&self, source_name: &str, records: &[NormalizedRecord]) -> Result<ReplaceSummary> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let ts = now();

        let previous: HashSet<String> = {
            let mut stmt = tx.prepare("SELECT external_id FROM jobs WHERE source_name = ?1 AND status = 'active'")?;
            let ids = stmt
                .query_map([source_name], |row| row.get(0))?
                .collect::<Result<HashSet<String>, _>>()?;
            ids
        };

        let mut summary = ReplaceSummary::default();
        let mut kept = HashSet::new();
        for r in records.iter().filter(|r| r.source_name == source_name) {
            match upsert_in(&tx, r, &ts)? {
                UpsertOutcome::Inserted => summary.inserted += 1,
                UpsertOutcome::Updated => summary.updated += 1,
            }
            kept.insert(r.external_id.as_str());
        }

        {
            let mut stmt = tx.prepare("UPDATE jobs SET status = 'inactive', updated_at = ?2 WHERE external_id = ?1")?;
            for id in previous.iter().filter(|id| !kept.contains(id.as_str())) {
                summary.deactivated += stmt.execute(params![id, ts])?;
            }
        }
        tx.commit()?;
        Ok(summary)
    }

    /// Latest outcome per source wins.
    pub fn record_run_outcome(&self, outcome: &RunOutcome) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO run_outcomes (source_name, status, record_count, error, finished_at, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(source_name) DO UPDATE SET
                status = excluded.status,
                record_count = excluded.record_count,
                error = excluded.error,
                finished_at = excluded.finished_at,
                duration_ms = excluded.duration_ms",
            params![
                outcome.source_name,
                outcome.status.as_str(),
                outcome.record_count as i64,
                outcome.error,
                outcome.finished_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                outcome.duration_ms as i64,
            ],
        )?;
        Ok(())
    }

    // ── Reads ──

    pub fn get_job(&self, external_id: &str) -> Result<Option<StoredJob>> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE external_id = ?1"),
                [external_id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    pub fn list_jobs(&self, query: &JobQuery) -> Result<Vec<StoredJob>> {
        let (clause, args) = where_clause(query);
        let page_size = query.page_size.max(1);
        let offset = query.page.saturating_sub(1) * page_size;
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs{clause}
             ORDER BY source_name, title, external_id
             LIMIT {page_size} OFFSET {offset}"
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Rows matching the query's filters, ignoring pagination.
    pub fn count_jobs(&self, query: &JobQuery) -> Result<usize> {
        let (clause, args) = where_clause(query);
        let conn = self.conn()?;
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM jobs{clause}"),
            rusqlite::params_from_iter(args.iter()),
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn counts_by_source(&self) -> Result<Vec<SourceCount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT source_name,
                    SUM(CASE WHEN status = 'active' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'inactive' THEN 1 ELSE 0 END)
             FROM jobs GROUP BY source_name ORDER BY source_name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SourceCount {
                    source_name: row.get(0)?,
                    active: row.get::<_, i64>(1)? as usize,
                    inactive: row.get::<_, i64>(2)? as usize,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn run_outcomes(&self) -> Result<Vec<RunOutcome>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT source_name, status, record_count, error, finished_at, duration_ms
             FROM run_outcomes ORDER BY source_name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let status: String = row.get(1)?;
                let finished_at: String = row.get(4)?;
                Ok(RunOutcome {
                    source_name: row.get(0)?,
                    status: RunStatus::parse(&status).unwrap_or(RunStatus::Failed),
                    record_count: row.get::<_, i64>(2)? as usize,
                    error: row.get(3)?,
                    finished_at: DateTime::parse_from_rfc3339(&finished_at)
                        .map(|t| t.with_timezone(&Utc))
                        .unwrap_or_default(),
                    duration_ms: row.get::<_, i64>(5)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    let had_index: bool = conn
        .query_row("SELECT 1 FROM sqlite_master WHERE name = 'jobs_fts'", [], |_| Ok(()))
        .optional()?
        .is_some();
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id          INTEGER PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            source_name TEXT NOT NULL,
            title       TEXT NOT NULL,
            apply_url   TEXT NOT NULL DEFAULT '',
            location    TEXT NOT NULL DEFAULT '',
            city        TEXT NOT NULL DEFAULT '',
            region      TEXT NOT NULL DEFAULT '',
            country     TEXT NOT NULL DEFAULT '',
            department  TEXT NOT NULL DEFAULT '',
            posted_at   TEXT NOT NULL DEFAULT '',
            status      TEXT NOT NULL DEFAULT 'active' CHECK(status IN ('active','inactive')),
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_source ON jobs(source_name, status);
        CREATE INDEX IF NOT EXISTS idx_jobs_country_city ON jobs(country, city);

        -- substring search over the text columns
        CREATE VIRTUAL TABLE IF NOT EXISTS jobs_fts USING fts5(
            title, source_name, department, location,
            content = 'jobs', content_rowid = 'id', tokenize = 'trigram'
        );
        CREATE TRIGGER IF NOT EXISTS jobs_fts_insert AFTER INSERT ON jobs BEGIN
            INSERT INTO jobs_fts(rowid, title, source_name, department, location)
            VALUES (new.id, new.title, new.source_name, new.department, new.location);
        END;
        CREATE TRIGGER IF NOT EXISTS jobs_fts_delete AFTER DELETE ON jobs BEGIN
            INSERT INTO jobs_fts(jobs_fts, rowid, title, source_name, department, location)
            VALUES ('delete', old.id, old.title, old.source_name, old.department, old.location);
        END;
        CREATE TRIGGER IF NOT EXISTS jobs_fts_update
        AFTER UPDATE OF title, source_name, department, location ON jobs BEGIN
            INSERT INTO jobs_fts(jobs_fts, rowid, title, source_name, department, location)
            VALUES ('delete', old.id, old.title, old.source_name, old.department, old.location);
            INSERT INTO jobs_fts(rowid, title, source_name, department, location)
            VALUES (new.id, new.title, new.source_name, new.department, new.location);
        END;

        CREATE TABLE IF NOT EXISTS run_outcomes (
            source_name  TEXT PRIMARY KEY,
            status       TEXT NOT NULL CHECK(status IN ('success','empty','failed','timed_out')),
            record_count INTEGER NOT NULL DEFAULT 0,
            error        TEXT,
            finished_at  TEXT NOT NULL,
            duration_ms  INTEGER NOT NULL DEFAULT 0
        );
        ",
    )?;
    if !had_index {
        conn.execute("INSERT INTO jobs_fts(jobs_fts) VALUES ('rebuild')", [])?;
    }
    Ok(())
}

fn upsert_in(conn: &Connection, r: &NormalizedRecord, ts: &str) -> Result<UpsertOutcome> {
    let existed: bool = conn
        .query_row("SELECT 1 FROM jobs WHERE external_id = ?1", [&r.external_id], |_| Ok(()))
        .optional()?
        .is_some();
    conn.execute(
        "INSERT INTO jobs (external_id, source_name, title, apply_url, location, city, region,
                           country, department, posted_at, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
         ON CONFLICT(external_id) DO UPDATE SET
            source_name = excluded.source_name,
            title = excluded.title,
            apply_url = excluded.apply_url,
            location = excluded.location,
            city = excluded.city,
            region = excluded.region,
            country = excluded.country,
            department = excluded.department,
            posted_at = excluded.posted_at,
            status = excluded.status,
            updated_at = excluded.updated_at",
        params![
            r.external_id,
            r.source_name,
            r.title,
            r.apply_url,
            r.location,
            r.city,
            r.region,
            r.country,
            r.department,
            r.posted_at,
            r.status.as_str(),
            ts,
        ],
    )?;
    Ok(if existed { UpsertOutcome::Updated } else { UpsertOutcome::Inserted })
}

const JOB_COLUMNS: &str = "external_id, source_name, title, apply_url, location, city, region, \
                           country, department, posted_at, status, created_at, updated_at";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<StoredJob> {
    let status: String = row.get(10)?;
    Ok(StoredJob {
        record: NormalizedRecord {
            external_id: row.get(0)?,
            source_name: row.get(1)?,
            title: row.get(2)?,
            apply_url: row.get(3)?,
            location: row.get(4)?,
            city: row.get(5)?,
            region: row.get(6)?,
            country: row.get(7)?,
            department: row.get(8)?,
            posted_at: row.get(9)?,
            status: JobStatus::parse(&status),
        },
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

/// ` WHERE ...` (or empty) plus positional args for a query's filters.
fn where_clause(query: &JobQuery) -> (String, Vec<String>) {
    let mut conds = Vec::new();
    let mut args = Vec::new();

    if !query.include_inactive {
        conds.push("status = 'active'".to_string());
    }
    let exact = [
        ("source_name", &query.source),
        ("city", &query.city),
        ("country", &query.country),
        ("department", &query.department),
    ];
    for (column, value) in exact {
        if let Some(v) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            args.push(v.to_string());
            conds.push(format!("{column} = ?{} COLLATE NOCASE", args.len()));
        }
    }
    if let Some(term) = query.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        // trigram index needs at least three characters
        if term.chars().count() >= 3 {
            args.push(format!("\"{}\"", term.replace('"', "\"\"")));
            conds.push(format!("id IN (SELECT rowid FROM jobs_fts WHERE jobs_fts MATCH ?{})", args.len()));
        } else {
            args.push(format!("%{}%", escape_like(term)));
            let n = args.len();
            conds.push(format!(
                "(title LIKE ?{n} ESCAPE '\\' OR source_name LIKE ?{n} ESCAPE '\\' \
                 OR department LIKE ?{n} ESCAPE '\\' OR location LIKE ?{n} ESCAPE '\\')"
            ));
        }
    }

    if conds.is_empty() {
        (String::new(), args)
    } else {
        (format!(" WHERE {}", conds.join(" AND ")), args)
    }
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}
