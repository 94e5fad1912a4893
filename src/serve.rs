/// Web dashboard: rollups as JSON and HTML, plus agent query and upload
/// endpoints. Each dashboard request loads the CSV into its own in-memory
/// store on a blocking thread.
use crate::agent::{AgentCapability, TaskOutcome, TaskRequest, WEB_USER};
use crate::config::AppConfig;
use crate::data_dir::DataDir;
use crate::report::{num, Dashboard};
use crate::upload;
use axum::{
    extract::{Form, Multipart, State},
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
    pub csv: PathBuf,
    pub table: String,
    pub uploads_dir: PathBuf,
    pub agent: Arc<dyn AgentCapability>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/health", get(health))
        .route("/api/dashboard", get(api_dashboard))
        .route("/api/agent/query", post(agent_query))
        .route("/api/upload", post(upload_file))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

pub async fn run(
    config: &AppConfig,
    agent: Arc<dyn AgentCapability>,
) -> Result<(), Box<dyn std::error::Error>> {
    let dd = DataDir::from_config(&config.data);
    dd.init()?;
    let state = AppState {
        csv: dd.csv(),
        table: config.data.table.clone(),
        uploads_dir: dd.uploads_dir(),
        agent,
    };

    let addr = format!("{}:{}", config.serve.bind, config.serve.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(csv = %state.csv.display(), "serve listening on {local_addr}");

    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({"ok": true}))
}

async fn load_dashboard(state: &AppState) -> Result<Dashboard, String> {
    let csv = state.csv.clone();
    let table = state.table.clone();
    match tokio::task::spawn_blocking(move || Dashboard::load(&csv, &table, None)).await {
        Ok(Ok(d)) => Ok(d),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "dashboard load failed");
            Err(e.to_string())
        }
        Err(e) => Err(format!("dashboard task failed: {e}")),
    }
}

async fn api_dashboard(
    State(state): State<AppState>,
) -> Result<Json<Dashboard>, (StatusCode, Json<Value>)> {
    load_dashboard(&state)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e}))))
}

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(render_html(&load_dashboard(&state).await))
}

async fn run_agent(
    agent: Arc<dyn AgentCapability>,
    request: TaskRequest,
) -> Result<TaskOutcome, String> {
    tracing::info!(task_type = request.task_type(), user_id = %request.user_id, "agent query");
    match tokio::task::spawn_blocking(move || agent.process_task(&request)).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(e) => Err(format!("agent task failed: {e}")),
    }
}

async fn agent_query(
    State(state): State<AppState>,
    Form(mut fields): Form<BTreeMap<String, String>>,
) -> Json<Value> {
    let task_type = fields.remove("task_type").unwrap_or_default();
    let outcome = match TaskRequest::from_form(&task_type, WEB_USER, &fields) {
        Ok(request) => run_agent(state.agent.clone(), request).await,
        Err(e) => Err(e.to_string()),
    };

    match outcome {
        Ok(o) => Json(json!({
            "success": true,
            "response": o.response,
            "confidence": o.confidence,
            "resolution_time": o.resolution_time_seconds,
            "abstained": o.abstained,
        })),
        Err(e) => {
            tracing::warn!(error = %e, "agent query failed");
            Json(json!({"success": false, "error": e}))
        }
    }
}

async fn upload_file(State(state): State<AppState>, multipart: Multipart) -> Json<Value> {
    match handle_upload(&state, multipart).await {
        Ok(v) => Json(v),
        Err(e) => {
            tracing::warn!(error = %e, "upload failed");
            Json(json!({"success": false, "error": e}))
        }
    }
}

async fn handle_upload(state: &AppState, mut multipart: Multipart) -> Result<Value, String> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut task_type: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(|e| e.to_string())?;
                file = Some((name, bytes.to_vec()));
            }
            Some("task_type") => {
                task_type = Some(field.text().await.map_err(|e| e.to_string())?);
            }
            _ => {}
        }
    }

    let (name, bytes) = file.ok_or("missing file field")?;
    let task_type = task_type.ok_or("missing task_type field")?;

    let dir = state.uploads_dir.clone();
    let stored = tokio::task::spawn_blocking(move || {
        upload::store(&dir, &name, &bytes, chrono::Local::now())
    })
    .await
    .map_err(|e| e.to_string())?
    .map_err(|e| e.to_string())?;
    tracing::info!(path = %stored.path.display(), "upload stored");

    let request = upload::request_for(&task_type, &stored.excerpt).map_err(|e| e.to_string())?;
    let outcome = run_agent(state.agent.clone(), request).await?;

    Ok(json!({
        "success": true,
        "filename": stored.filename,
        "result": outcome.response,
        "confidence": outcome.confidence,
        "resolution_time": outcome.resolution_time_seconds,
    }))
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn html_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    let mut out = String::from("<table><tr>");
    for h in headers {
        out.push_str(&format!("<th>{}</th>", escape(h)));
    }
    out.push_str("</tr>");
    for row in rows {
        out.push_str("<tr>");
        for cell in row {
            out.push_str(&format!("<td>{}</td>", escape(&cell)));
        }
        out.push_str("</tr>");
    }
    out.push_str("</table>");
    out
}

fn render_html(result: &Result<Dashboard, String>) -> String {
    let mut body = String::new();
    match result {
        Err(e) => body.push_str(&format!("<p class=\"error\">{}</p>", escape(e))),
        Ok(d) => {
            let s = &d.summary;
            body.push_str("<h2>Summary</h2>");
            body.push_str(&html_table(
                &[
                    "Total runs",
                    "Unique users",
                    "Task types",
                    "Avg resolution (s)",
                    "Acceptance %",
                    "Avg rating",
                    "Abstention %",
                    "Error %",
                ],
                vec![vec![
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

            body.push_str("<h2>A/B comparison</h2>");
            body.push_str(&html_table(
                &[
                    "Version",
                    "Tasks",
                    "Accuracy %",
                    "Satisfaction",
                    "Avg resolution (s)",
                    "Error %",
                    "Abstention %",
                ],
                d.by_version
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
                    .collect(),
            ));

            body.push_str("<h2>By task type</h2>");
            body.push_str(&html_table(
                &[
                    "Task type",
                    "Tasks",
                    "Accuracy %",
                    "Satisfaction",
                    "Avg resolution (s)",
                ],
                d.by_task_type
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
                    .collect(),
            ));

            body.push_str("<h2>Daily trend</h2>");
            body.push_str(&html_table(
                &["Date", "Tasks", "Accuracy %", "Satisfaction", "Active users"],
                d.daily_trend
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
                    .collect(),
            ));
        }
    }

    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>Agent Operations Dashboard</title></head>\
         <body><h1>Agent Operations Dashboard</h1>{body}</body></html>\n"
    )
}
