/// CSV ingestion: read a run-log snapshot, coerce every row, and replace the
/// target table in a single transaction.
use crate::analytics::AnalyticsError;
use crate::record::{AgentRunRecord, RawRecord, REQUIRED_COLUMNS};
use regex::Regex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::LazyLock;

pub const DEFAULT_TABLE: &str = "agent_runs";

static TABLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Table names are interpolated into SQL, so only plain identifiers pass.
/// SQLite reserves the `sqlite_` prefix for its own schema objects.
pub fn validate_table_name(name: &str) -> Result<(), AnalyticsError> {
    let reserved = name
        .get(..7)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("sqlite_"));
    if TABLE_NAME.is_match(name) && !reserved {
        Ok(())
    } else {
        Err(AnalyticsError::InvalidTableName {
            name: name.to_string(),
        })
    }
}

/// Parse and coerce every row of `path`. Fails on the first bad row.
pub fn read_records(path: &Path) -> Result<Vec<AgentRunRecord>, AnalyticsError> {
    if !path.exists() {
        return Err(AnalyticsError::SourceNotFound {
            path: path.to_path_buf(),
        });
    }
    let file = std::fs::File::open(path).map_err(|e| AnalyticsError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| malformed_from_csv(&e, 1))?
        .clone();

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|col| !headers.iter().any(|h| h == *col))
        .collect();
    if !missing.is_empty() {
        return Err(AnalyticsError::MalformedInput {
            line: 1,
            reason: format!("missing column(s): {}", missing.join(", ")),
        });
    }

    let mut records = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        let fallback_line = idx as u64 + 2;
        let row = row.map_err(|e| malformed_from_csv(&e, fallback_line))?;
        let line = row.position().map(|p| p.line()).unwrap_or(fallback_line);

        let raw: RawRecord =
            row.deserialize(Some(&headers))
                .map_err(|e| AnalyticsError::MalformedInput {
                    line,
                    reason: e.to_string(),
                })?;
        let record = AgentRunRecord::try_from(raw)
            .map_err(|reason| AnalyticsError::MalformedInput { line, reason })?;
        records.push(record);
    }

    Ok(records)
}

fn malformed_from_csv(err: &csv::Error, fallback_line: u64) -> AnalyticsError {
    let line = err.position().map(|p| p.line()).unwrap_or(fallback_line);
    AnalyticsError::MalformedInput {
        line,
        reason: err.to_string(),
    }
}

/// Load `path` into `table`, replacing any existing table of that name.
///
/// The file is fully parsed before the store is touched; the drop, create and
/// inserts then run in one transaction, so readers never see a mix of old and
/// new rows. Returns the number of rows loaded.
pub fn load(conn: &mut Connection, path: &Path, table: &str) -> Result<usize, AnalyticsError> {
    validate_table_name(table)?;
    let records = read_records(path)?;
    replace_table(conn, table, &records)?;
    Ok(records.len())
}

/// Atomically replace `table` with `records`. Other tables are untouched.
pub fn replace_table(
    conn: &mut Connection,
    table: &str,
    records: &[AgentRunRecord],
) -> Result<(), AnalyticsError> {
    validate_table_name(table)?;
    let tx = conn.transaction()?;

    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS \"{table}\";
        CREATE TABLE \"{table}\" (
            timestamp               TEXT NOT NULL,
            user_id                 TEXT NOT NULL,
            task_type               TEXT NOT NULL,
            agent_version           TEXT,
            resolution_time_seconds REAL NOT NULL,
            user_accepted           INTEGER NOT NULL,
            user_rating             REAL,
            abstained               INTEGER NOT NULL,
            error_occurred          INTEGER NOT NULL
        );"
    ))?;

    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO \"{table}\" (timestamp, user_id, task_type, agent_version,
                resolution_time_seconds, user_accepted, user_rating, abstained, error_occurred)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        ))?;
        for r in records {
            stmt.execute(rusqlite::params![
                r.timestamp_text(),
                r.user_id,
                r.task_type,
                r.agent_version,
                r.resolution_time_seconds,
                r.user_accepted,
                r.user_rating,
                r.abstained,
                r.error_occurred,
            ])?;
        }
    }

    tx.commit()?;
    Ok(())
}
