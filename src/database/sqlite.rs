use super::models::{ParseEnumError, Report, Reporter, Role};
use super::{DatabaseError, ReportFilter, Store};
use crate::core::settings::Settings;
use chrono::{DateTime, SecondsFormat, Utc};
use log::warn;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed store. Reports are kept as JSON bodies next to the columns
/// used for filtering and ordering; reporters are plain rows.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

type ReporterColumns = (String, String, u32, u32, u32);

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DatabaseError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::Poisoned)
    }

    fn initialize_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS reports (
                id TEXT PRIMARY KEY,
                reporter_id TEXT NOT NULL,
                status TEXT NOT NULL,
                category TEXT NOT NULL,
                created_at TEXT NOT NULL,
                body TEXT NOT NULL
            )",
            [],
        )?;

        // Create indexes for the filters the engine runs on every submission
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_reports_status ON reports(status)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_reports_reporter ON reports(reporter_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS reporters (
                id TEXT PRIMARY KEY,
                role TEXT NOT NULL,
                points INTEGER NOT NULL DEFAULT 0,
                report_count INTEGER NOT NULL DEFAULT 0,
                spam_score INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS app_config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// Defaults overlaid with whatever the config table holds.
    pub fn load_settings(&self) -> Result<Settings, DatabaseError> {
        let mut settings = Settings::default();

        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key, value FROM app_config")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (key, value) = row?;
            if let Err(err) = settings.set(&key, &value) {
                warn!("Ignoring stored setting {}: {}", key, err);
            }
        }

        Ok(settings)
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<(), DatabaseError> {
        let timestamp = Utc::now().timestamp();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for (key, value) in settings.to_pairs() {
            tx.execute(
                "INSERT OR REPLACE INTO app_config (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![key, value, timestamp],
            )?;
        }
        tx.commit()?;

        Ok(())
    }
}

fn sortable_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn insert_report_row(conn: &Connection, report: &Report) -> Result<(), DatabaseError> {
    let body = serde_json::to_string(report)?;

    let result = conn.execute(
        "INSERT INTO reports (id, reporter_id, status, category, created_at, body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            report.id,
            report.reporter_id,
            report.status.as_str(),
            report.category.as_str(),
            sortable_timestamp(&report.created_at),
            body,
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(DatabaseError::Conflict(report.id.clone()))
        }
        Err(err) => Err(err.into()),
    }
}

fn update_report_row(conn: &Connection, report: &Report) -> Result<(), DatabaseError> {
    let body = serde_json::to_string(report)?;
    conn.execute(
        "UPDATE reports SET status = ?1, category = ?2, body = ?3 WHERE id = ?4",
        params![
            report.status.as_str(),
            report.category.as_str(),
            body,
            report.id
        ],
    )?;
    Ok(())
}

fn select_report(conn: &Connection, id: &str) -> Result<Option<Report>, DatabaseError> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM reports WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;

    match body {
        Some(body) => Ok(Some(serde_json::from_str(&body)?)),
        None => Ok(None),
    }
}

fn reporter_columns(row: &Row<'_>) -> rusqlite::Result<ReporterColumns> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn reporter_from_columns(columns: ReporterColumns) -> Result<Reporter, DatabaseError> {
    let (id, role, points, report_count, spam_score) = columns;
    let role: Role = role
        .parse()
        .map_err(|err: ParseEnumError| DatabaseError::Corrupt(err.to_string()))?;

    Ok(Reporter {
        id,
        role,
        points,
        report_count,
        spam_score,
    })
}

fn select_reporter(conn: &Connection, id: &str) -> Result<Option<Reporter>, DatabaseError> {
    conn.query_row(
        "SELECT id, role, points, report_count, spam_score FROM reporters WHERE id = ?1",
        params![id],
        reporter_columns,
    )
    .optional()?
    .map(reporter_from_columns)
    .transpose()
}

fn upsert_reporter(conn: &Connection, reporter: &Reporter) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR REPLACE INTO reporters (id, role, points, report_count, spam_score)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            reporter.id,
            reporter.role.as_str(),
            reporter.points,
            reporter.report_count,
            reporter.spam_score,
        ],
    )?;
    Ok(())
}

fn adjust_reporter(
    conn: &Connection,
    id: &str,
    apply: &mut dyn FnMut(&mut Reporter),
) -> Result<Reporter, DatabaseError> {
    let mut reporter = select_reporter(conn, id)?.unwrap_or_else(|| Reporter::new(id, Role::User));
    apply(&mut reporter);
    upsert_reporter(conn, &reporter)?;
    Ok(reporter)
}

impl Store for SqliteStore {
    fn insert_report(&self, report: &Report) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        insert_report_row(&conn, report)
    }

    fn find_report(&self, id: &str) -> Result<Option<Report>, DatabaseError> {
        let conn = self.lock()?;
        select_report(&conn, id)
    }

    fn list_reports(&self, filter: &ReportFilter) -> Result<Vec<Report>, DatabaseError> {
        let mut clauses = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(reporter_id) = &filter.reporter_id {
            clauses.push("reporter_id = ?");
            args.push(reporter_id.clone());
        }
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            args.push(status.as_str().to_string());
        }
        if let Some(category) = filter.category {
            clauses.push("category = ?");
            args.push(category.as_str().to_string());
        }

        let mut sql = String::from("SELECT body FROM reports");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| row.get::<_, String>(0))?;

        let mut reports = Vec::new();
        for body in rows {
            let report: Report = serde_json::from_str(&body?)?;
            // excluded statuses are filtered here rather than in SQL
            if filter.matches(&report) {
                reports.push(report);
            }
        }

        Ok(reports)
    }

    fn update_report(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut Report),
    ) -> Result<Option<Report>, DatabaseError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(mut report) = select_report(&tx, id)? else {
            return Ok(None);
        };
        apply(&mut report);
        update_report_row(&tx, &report)?;

        tx.commit()?;
        Ok(Some(report))
    }

    fn update_report_awarding(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut Report) -> u32,
    ) -> Result<Option<Report>, DatabaseError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(mut report) = select_report(&tx, id)? else {
            return Ok(None);
        };
        let award = apply(&mut report);
        update_report_row(&tx, &report)?;
        if award > 0 {
            adjust_reporter(&tx, &report.reporter_id, &mut |reporter| reporter.award(award))?;
        }

        tx.commit()?;
        Ok(Some(report))
    }

    fn delete_report(&self, id: &str) -> Result<Option<Report>, DatabaseError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = select_report(&tx, id)?;
        if existing.is_some() {
            tx.execute("DELETE FROM reports WHERE id = ?1", params![id])?;
        }

        tx.commit()?;
        Ok(existing)
    }

    fn find_reporter(&self, id: &str) -> Result<Option<Reporter>, DatabaseError> {
        let conn = self.lock()?;
        select_reporter(&conn, id)
    }

    fn list_reporters(&self) -> Result<Vec<Reporter>, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, role, points, report_count, spam_score FROM reporters ORDER BY id",
        )?;
        let rows = stmt.query_map([], reporter_columns)?;

        let mut reporters = Vec::new();
        for row in rows {
            reporters.push(reporter_from_columns(row?)?);
        }
        Ok(reporters)
    }

    fn save_reporter(&self, reporter: &Reporter) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        upsert_reporter(&conn, reporter)
    }

    fn update_reporter(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut Reporter),
    ) -> Result<Reporter, DatabaseError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let reporter = adjust_reporter(&tx, id, apply)?;
        tx.commit()?;
        Ok(reporter)
    }

    fn commit_submission(
        &self,
        report: &Report,
        apply: &mut dyn FnMut(&mut Reporter),
    ) -> Result<Reporter, DatabaseError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        insert_report_row(&tx, report)?;
        let reporter = adjust_reporter(&tx, &report.reporter_id, apply)?;
        tx.commit()?;
        Ok(reporter)
    }
}
