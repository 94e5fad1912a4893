/// KPI rollups over a loaded run table.
///
/// Every rate is `100 * AVG(indicator)` and every average is left to SQL NULL
/// propagation, so an empty group yields `None` rather than zero.
use rusqlite::{Connection, Result, Row};
use serde::Serialize;

/// Overall totals across the whole table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total_runs: i64,
    pub unique_users: i64,
    pub task_types: i64,
    pub avg_resolution_time: Option<f64>,
    pub acceptance_rate: Option<f64>,
    pub avg_rating: Option<f64>,
    pub abstention_rate: Option<f64>,
    pub error_rate: Option<f64>,
}

/// A/B comparison row, one per agent version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionMetrics {
    pub agent_version: Option<String>,
    pub total_tasks: i64,
    pub accuracy_pct: Option<f64>,
    pub avg_satisfaction: Option<f64>,
    pub avg_resolution_time: Option<f64>,
    pub error_rate: Option<f64>,
    pub abstention_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskTypeMetrics {
    pub task_type: String,
    pub total_tasks: i64,
    pub accuracy_pct: Option<f64>,
    pub avg_satisfaction: Option<f64>,
    pub avg_resolution_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyTrend {
    /// Calendar day, `YYYY-MM-DD`.
    pub date: String,
    pub total_tasks: i64,
    pub accuracy_pct: Option<f64>,
    pub avg_satisfaction: Option<f64>,
    pub active_users: i64,
}

const ACCEPTED_PCT: &str = "AVG(CASE WHEN user_accepted THEN 1.0 ELSE 0.0 END) * 100";
const ABSTAINED_PCT: &str = "AVG(CASE WHEN abstained THEN 1.0 ELSE 0.0 END) * 100";
const ERROR_PCT: &str = "AVG(CASE WHEN error_occurred THEN 1.0 ELSE 0.0 END) * 100";

/// `table` must already be a validated identifier.
pub fn summary(conn: &Connection, table: &str) -> Result<Summary> {
    let sql = format!(
        "SELECT
            COUNT(*),
            COUNT(DISTINCT user_id),
            COUNT(DISTINCT task_type),
            AVG(resolution_time_seconds),
            {ACCEPTED_PCT},
            AVG(user_rating),
            {ABSTAINED_PCT},
            {ERROR_PCT}
        FROM \"{table}\""
    );
    conn.query_row(&sql, [], |row| {
        Ok(Summary {
            total_runs: row.get(0)?,
            unique_users: row.get(1)?,
            task_types: row.get(2)?,
            avg_resolution_time: row.get(3)?,
            acceptance_rate: row.get(4)?,
            avg_rating: row.get(5)?,
            abstention_rate: row.get(6)?,
            error_rate: row.get(7)?,
        })
    })
}

pub fn by_version(conn: &Connection, table: &str) -> Result<Vec<VersionMetrics>> {
    let sql = format!(
        "SELECT
            agent_version,
            COUNT(*) AS total_tasks,
            {ACCEPTED_PCT},
            AVG(user_rating),
            AVG(resolution_time_seconds),
            {ERROR_PCT},
            {ABSTAINED_PCT}
        FROM \"{table}\"
        GROUP BY agent_version
        ORDER BY agent_version ASC"
    );
    collect(conn, &sql, |row| {
        Ok(VersionMetrics {
            agent_version: row.get(0)?,
            total_tasks: row.get(1)?,
            accuracy_pct: row.get(2)?,
            avg_satisfaction: row.get(3)?,
            avg_resolution_time: row.get(4)?,
            error_rate: row.get(5)?,
            abstention_rate: row.get(6)?,
        })
    })
}

/// Ordered by count descending; equal counts fall back to task type ascending.
pub fn by_task_type(conn: &Connection, table: &str) -> Result<Vec<TaskTypeMetrics>> {
    let sql = format!(
        "SELECT
            task_type,
            COUNT(*) AS total_tasks,
            {ACCEPTED_PCT},
            AVG(user_rating),
            AVG(resolution_time_seconds)
        FROM \"{table}\"
        GROUP BY task_type
        ORDER BY total_tasks DESC, task_type ASC"
    );
    collect(conn, &sql, |row| {
        Ok(TaskTypeMetrics {
            task_type: row.get(0)?,
            total_tasks: row.get(1)?,
            accuracy_pct: row.get(2)?,
            avg_satisfaction: row.get(3)?,
            avg_resolution_time: row.get(4)?,
        })
    })
}

pub fn daily_trend(conn: &Connection, table: &str) -> Result<Vec<DailyTrend>> {
    let sql = format!(
        "SELECT
            date(timestamp) AS day,
            COUNT(*),
            {ACCEPTED_PCT},
            AVG(user_rating),
            COUNT(DISTINCT user_id)
        FROM \"{table}\"
        GROUP BY day
        ORDER BY day ASC"
    );
    collect(conn, &sql, |row| {
        Ok(DailyTrend {
            date: row.get(0)?,
            total_tasks: row.get(1)?,
            accuracy_pct: row.get(2)?,
            avg_satisfaction: row.get(3)?,
            active_users: row.get(4)?,
        })
    })
}

fn collect<T>(conn: &Connection, sql: &str, map: impl FnMut(&Row) -> Result<T>) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], map)?.collect::<Result<Vec<_>>>()?;
    Ok(rows)
}
