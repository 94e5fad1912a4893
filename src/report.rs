/// Rollup snapshot plus its text rendering for the `report` command.
use crate::analytics::{Analytics, AnalyticsError};
use crate::rollup::{DailyTrend, Summary, TaskTypeMetrics, VersionMetrics};
use serde::Serialize;
use std::path::Path;

/// All four rollups from one load.
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub summary: Summary,
    pub by_version: Vec<VersionMetrics>,
    pub by_task_type: Vec<TaskTypeMetrics>,
    pub daily_trend: Vec<DailyTrend>,
}

impl Dashboard {
    pub fn collect(analytics: &Analytics) -> Result<Self, AnalyticsError> {
        Ok(Self {
            summary: analytics.summary()?,
            by_version: analytics.by_version()?,
            by_task_type: analytics.by_task_type()?,
            daily_trend: analytics.daily_trend()?,
        })
    }

    /// Load `source`, collect, and close the store. With `store` set the table
    /// is written to that SQLite file and outlives the call; otherwise a
    /// private in-memory store is used.
    pub fn load(source: &Path, table: &str, store: Option<&Path>) -> Result<Self, AnalyticsError> {
        let mut analytics = match store {
            Some(db) => Analytics::open(db)?,
            None => Analytics::open_in_memory()?,
        };
        let rows = analytics.load_dataset(source, table)?;
        tracing::info!(
            rows,
            table = analytics.loaded_table().unwrap_or(table),
            source = %source.display(),
            "dataset loaded"
        );
        let dashboard = Self::collect(&analytics)?;
        analytics.close()?;
        Ok(dashboard)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let s = &self.summary;

        section(&mut out, "OVERALL SUMMARY STATISTICS");
        out.push_str(&table(
            &[
                "total_runs",
                "unique_users",
                "task_types",
                "avg_resolution_time",
                "acceptance_rate",
                "avg_rating",
                "abstention_rate",
                "error_rate",
            ],
            &[vec![
                s.total_runs.to_string(),
                s.unique_users.to_string(),
                s.task_types.to_string(),
                num(s.avg_resolution_time),
                num(s.acceptance_rate),
                num(s.avg_rating),
                num(s.abstention_rate),
                num(s.error_rate),
            ]],
        ));

        section(&mut out, "A/B TEST COMPARISON (Agent Version)");
        let rows: Vec<_> = self
            .by_version
            .iter()
            .map(|r| {
                vec![
                    r.agent_version.clone().unwrap_or_else(|| "-".to_string()),
                    r.total_tasks.to_string(),
                    num(r.accuracy_pct),
                    num(r.avg_satisfaction),
                    num(r.avg_resolution_time),
                    num(r.error_rate),
                    num(r.abstention_rate),
                ]
            })
            .collect();
        out.push_str(&table(
            &[
                "agent_version",
                "total_tasks",
                "accuracy_pct",
                "avg_satisfaction",
                "avg_resolution_time",
                "error_rate",
                "abstention_rate",
            ],
            &rows,
        ));

        section(&mut out, "METRICS BY TASK TYPE");
        let rows: Vec<_> = self
            .by_task_type
            .iter()
            .map(|r| {
                vec![
                    r.task_type.clone(),
                    r.total_tasks.to_string(),
                    num(r.accuracy_pct),
                    num(r.avg_satisfaction),
                    num(r.avg_resolution_time),
                ]
            })
            .collect();
        out.push_str(&table(
            &[
                "task_type",
                "total_tasks",
                "accuracy_pct",
                "avg_satisfaction",
                "avg_resolution_time",
            ],
            &rows,
        ));

        section(&mut out, "DAILY TRENDS");
        let rows: Vec<_> = self
            .daily_trend
            .iter()
            .map(|r| {
                vec![
                    r.date.clone(),
                    r.total_tasks.to_string(),
                    num(r.accuracy_pct),
                    num(r.avg_satisfaction),
                    r.active_users.to_string(),
                ]
            })
            .collect();
        out.push_str(&table(
            &[
                "date",
                "total_tasks",
                "accuracy_pct",
                "avg_satisfaction",
                "active_users",
            ],
            &rows,
        ));

        out
    }
}

/// Two decimals, or `-` for an empty group.
pub fn num(v: Option<f64>) -> String {
    match v {
        Some(v) => format!("{v:.2}"),
        None => "-".to_string(),
    }
}

fn section(out: &mut String, title: &str) {
    let rule = "=".repeat(70);
    out.push_str(&format!("\n{rule}\n{title}\n{rule}\n"));
}

/// Right-aligned columns sized to the widest cell.
fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let line = |cells: Vec<&str>| -> String {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{c:>w$}"))
            .collect();
        format!("{}\n", padded.join("  "))
    };

    let mut out = line(headers.to_vec());
    if rows.is_empty() {
        out.push_str("(no rows)\n");
    }
    for row in rows {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
    }
    out
}
