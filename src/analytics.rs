/// Reporting façade: one store handle, one loaded table, four rollups.
use crate::ingest;
use crate::rollup::{self, DailyTrend, Summary, TaskTypeMetrics, VersionMetrics};
use fs2::FileExt;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Errors surfaced by ingestion and the rollup façade.
#[derive(Debug)]
pub enum AnalyticsError {
    /// The input file does not exist.
    SourceNotFound { path: PathBuf },
    /// Missing column or a value that failed coercion. `line` is 1-based;
    /// the header is line 1.
    MalformedInput { line: u64, reason: String },
    /// A rollup was requested before any successful load.
    NotLoaded,
    /// The store could not be opened or closed.
    StoreUnavailable { source: rusqlite::Error },
    /// Table names must be plain SQL identifiers.
    InvalidTableName { name: String },
    /// Any other failure reading the input file.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Unexpected failure executing SQL against an open store.
    Db(rusqlite::Error),
}

impl std::fmt::Display for AnalyticsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalyticsError::SourceNotFound { path } => {
                write!(f, "data file not found: {}", path.display())
            }
            AnalyticsError::MalformedInput { line, reason } => {
                write!(f, "malformed input at line {line}: {reason}")
            }
            AnalyticsError::NotLoaded => write!(f, "no dataset loaded; call load_dataset first"),
            AnalyticsError::StoreUnavailable { source } => {
                write!(f, "analytics store unavailable: {source}")
            }
            AnalyticsError::InvalidTableName { name } => {
                write!(f, "invalid table name {name:?}")
            }
            AnalyticsError::Io { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            AnalyticsError::Db(e) => write!(f, "database error: {e}"),
        }
    }
}

impl std::error::Error for AnalyticsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AnalyticsError::StoreUnavailable { source } => Some(source),
            AnalyticsError::Io { source, .. } => Some(source),
            AnalyticsError::Db(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for AnalyticsError {
    fn from(e: rusqlite::Error) -> Self {
        AnalyticsError::Db(e)
    }
}

/// Owns a SQLite connection and remembers which table the last successful
/// load wrote. Not shared across threads; give each session its own.
pub struct Analytics {
    conn: Connection,
    db_path: Option<PathBuf>,
    loaded: Option<String>,
}

impl Analytics {
    /// Private in-memory store, discarded on close.
    pub fn open_in_memory() -> Result<Self, AnalyticsError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AnalyticsError::StoreUnavailable { source: e })?;
        Ok(Self {
            conn,
            db_path: None,
            loaded: None,
        })
    }

    /// Store backed by a file that other processes may also load into.
    /// Loads against the same file are serialized through `<path>.lock`.
    pub fn open(path: &Path) -> Result<Self, AnalyticsError> {
        let conn =
            Connection::open(path).map_err(|e| AnalyticsError::StoreUnavailable { source: e })?;
        Ok(Self {
            conn,
            db_path: Some(path.to_path_buf()),
            loaded: None,
        })
    }

    /// Replace `table` with the contents of `source`. Returns the row count.
    ///
    /// On failure the previously loaded table (if any) remains queryable.
    pub fn load_dataset(&mut self, source: &Path, table: &str) -> Result<usize, AnalyticsError> {
        let _guard = match &self.db_path {
            Some(db) => Some(LoadLock::acquire(db)?),
            None => None,
        };
        let rows = ingest::load(&mut self.conn, source, table)?;
        self.loaded = Some(table.to_string());
        Ok(rows)
    }

    pub fn loaded_table(&self) -> Option<&str> {
        self.loaded.as_deref()
    }

    fn table(&self) -> Result<&str, AnalyticsError> {
        self.loaded.as_deref().ok_or(AnalyticsError::NotLoaded)
    }

    pub fn summary(&self) -> Result<Summary, AnalyticsError> {
        Ok(rollup::summary(&self.conn, self.table()?)?)
    }

    pub fn by_version(&self) -> Result<Vec<VersionMetrics>, AnalyticsError> {
        Ok(rollup::by_version(&self.conn, self.table()?)?)
    }

    pub fn by_task_type(&self) -> Result<Vec<TaskTypeMetrics>, AnalyticsError> {
        Ok(rollup::by_task_type(&self.conn, self.table()?)?)
    }

    pub fn daily_trend(&self) -> Result<Vec<DailyTrend>, AnalyticsError> {
        Ok(rollup::daily_trend(&self.conn, self.table()?)?)
    }

    /// Release the store handle. In-memory tables are discarded.
    pub fn close(self) -> Result<(), AnalyticsError> {
        self.conn
            .close()
            .map_err(|(_, e)| AnalyticsError::StoreUnavailable { source: e })
    }
}

/// Exclusive advisory lock held for the duration of one load.
struct LoadLock {
    file: std::fs::File,
}

impl LoadLock {
    fn acquire(db: &Path) -> Result<Self, AnalyticsError> {
        let mut lock_path = db.as_os_str().to_owned();
        lock_path.push(".lock");
        let lock_path = PathBuf::from(lock_path);

        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| AnalyticsError::Io {
                path: lock_path.clone(),
                source: e,
            })?;
        file.lock_exclusive().map_err(|e| AnalyticsError::Io {
            path: lock_path,
            source: e,
        })?;
        Ok(Self { file })
    }
}

impl Drop for LoadLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::DEFAULT_TABLE;
    use std::io::Write;
    use tempfile::TempDir;

    const HEADER: &str = "timestamp,user_id,task_type,agent_version,resolution_time_seconds,user_accepted,user_rating,abstained,error_occurred";

    fn write_csv(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{}", line).unwrap();
        }
        path
    }

    fn scenario(dir: &Path) -> PathBuf {
        write_csv(
            dir,
            "scenario.csv",
            &[
                HEADER,
                "2024-02-01 09:00:00,alice,lead_summary,v1,2.0,true,5,false,false",
                "2024-02-01 12:00:00,bob,lead_summary,v1,4.0,false,,true,false",
                "2024-02-02 08:00:00,carol,lead_summary,v2,1.0,true,3,false,true",
            ],
        )
    }

    #[test]
    fn three_row_scenario() {
        let dir = TempDir::new().unwrap();
        let path = scenario(dir.path());
        let mut a = Analytics::open_in_memory().unwrap();

        assert_eq!(a.load_dataset(&path, DEFAULT_TABLE).unwrap(), 3);
        assert_eq!(a.loaded_table(), Some("agent_runs"));

        let s = a.summary().unwrap();
        assert_eq!(s.total_runs, 3);
        assert_eq!(s.unique_users, 3);
        assert!((s.acceptance_rate.unwrap() - 66.67).abs() < 0.01);
        assert!((s.abstention_rate.unwrap() - 33.33).abs() < 0.01);
        assert!((s.error_rate.unwrap() - 33.33).abs() < 0.01);

        let versions = a.by_version().unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].agent_version.as_deref(), Some("v1"));
        assert_eq!(versions[0].total_tasks, 2);
        assert_eq!(versions[0].accuracy_pct, Some(50.0));
        assert_eq!(versions[1].agent_version.as_deref(), Some("v2"));
        assert_eq!(versions[1].total_tasks, 1);
        assert_eq!(versions[1].accuracy_pct, Some(100.0));

        let days = a.daily_trend().unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, "2024-02-01");

        a.close().unwrap();
    }

    #[test]
    fn rollups_before_load_are_not_loaded() {
        let a = Analytics::open_in_memory().unwrap();
        assert!(matches!(a.summary(), Err(AnalyticsError::NotLoaded)));
        assert!(matches!(a.by_version(), Err(AnalyticsError::NotLoaded)));
        assert!(matches!(a.by_task_type(), Err(AnalyticsError::NotLoaded)));
        assert!(matches!(a.daily_trend(), Err(AnalyticsError::NotLoaded)));
    }

    #[test]
    fn failed_first_load_stays_not_loaded() {
        let mut a = Analytics::open_in_memory().unwrap();
        let err = a
            .load_dataset(Path::new("/nonexistent/agent_runs.csv"), DEFAULT_TABLE)
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::SourceNotFound { .. }));
        assert!(matches!(a.summary(), Err(AnalyticsError::NotLoaded)));
    }

    #[test]
    fn failed_reload_keeps_previous_results() {
        let dir = TempDir::new().unwrap();
        let good = scenario(dir.path());
        let bad = write_csv(dir.path(), "bad.csv", &["user_id", "u1"]);

        let mut a = Analytics::open_in_memory().unwrap();
        a.load_dataset(&good, DEFAULT_TABLE).unwrap();
        assert!(matches!(
            a.load_dataset(&bad, DEFAULT_TABLE),
            Err(AnalyticsError::MalformedInput { .. })
        ));
        assert_eq!(a.summary().unwrap().total_runs, 3);
    }

    #[test]
    fn reloading_same_file_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = scenario(dir.path());
        let mut a = Analytics::open_in_memory().unwrap();

        a.load_dataset(&path, DEFAULT_TABLE).unwrap();
        let first = (
            a.summary().unwrap(),
            a.by_version().unwrap(),
            a.by_task_type().unwrap(),
            a.daily_trend().unwrap(),
        );
        a.load_dataset(&path, DEFAULT_TABLE).unwrap();
        let second = (
            a.summary().unwrap(),
            a.by_version().unwrap(),
            a.by_task_type().unwrap(),
            a.daily_trend().unwrap(),
        );
        assert_eq!(first, second);
    }

    #[test]
    fn rollups_follow_most_recent_table() {
        let dir = TempDir::new().unwrap();
        let path = scenario(dir.path());
        let small = write_csv(
            dir.path(),
            "small.csv",
            &[HEADER, "2024-02-01 09:00:00,alice,follow_up,v1,2.0,true,5,false,false"],
        );
        let mut a = Analytics::open_in_memory().unwrap();
        a.load_dataset(&path, "first").unwrap();
        a.load_dataset(&small, "second").unwrap();
        assert_eq!(a.loaded_table(), Some("second"));
        assert_eq!(a.summary().unwrap().total_runs, 1);
    }

    #[test]
    fn file_backed_store_takes_lock_and_persists() {
        let dir = TempDir::new().unwrap();
        let csv = scenario(dir.path());
        let db = dir.path().join("analytics.db");

        let mut a = Analytics::open(&db).unwrap();
        a.load_dataset(&csv, DEFAULT_TABLE).unwrap();
        a.close().unwrap();
        assert!(dir.path().join("analytics.db.lock").exists());

        // A second loader on the same file is not blocked once the first is done.
        let mut b = Analytics::open(&db).unwrap();
        assert_eq!(b.load_dataset(&csv, DEFAULT_TABLE).unwrap(), 3);
        assert_eq!(b.summary().unwrap().total_runs, 3);
    }

    #[test]
    fn unreachable_store_is_unavailable() {
        let err = Analytics::open(Path::new("/nonexistent/dir/analytics.db"))
            .err()
            .unwrap();
        assert!(matches!(err, AnalyticsError::StoreUnavailable { .. }));
    }
}
