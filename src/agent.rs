/// The task-processing agent, seen from the outside.
///
/// The agent itself lives elsewhere; this module fixes the request/outcome
/// shapes consumers rely on and provides a subprocess-backed implementation
/// that speaks JSON over stdin/stdout.
use crate::config::AgentConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::process::{Command, Stdio};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadSummary {
    pub lead_name: String,
    pub company_name: String,
    pub industry: String,
    pub source: String,
    pub additional_context: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUp {
    pub customer_name: String,
    pub interaction_date: String,
    pub interaction_type: String,
    pub summary: String,
    pub deal_stage: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAnalysis {
    pub deal_name: String,
    pub deal_stage: String,
    pub last_activity_date: String,
    pub engagement_summary: String,
    pub stakeholders: String,
}

/// User id attached to requests from the web dashboard.
#[cfg(feature = "serve")]
pub const WEB_USER: &str = "web_user";

/// Task-specific fields, tagged by task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task_type", content = "fields", rename_all = "snake_case")]
pub enum TaskFields {
    LeadSummary(LeadSummary),
    FollowUp(FollowUp),
    RiskAnalysis(RiskAnalysis),
}

/// Serializes as `{"user_id": .., "task_type": .., "fields": {..}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRequest {
    pub user_id: String,
    #[serde(flatten)]
    pub task: TaskFields,
}

impl TaskRequest {
    pub fn new(user_id: impl Into<String>, task: TaskFields) -> Self {
        Self {
            user_id: user_id.into(),
            task,
        }
    }

    pub fn task_type(&self) -> &'static str {
        match self.task {
            TaskFields::LeadSummary(_) => "lead_summary",
            TaskFields::FollowUp(_) => "follow_up",
            TaskFields::RiskAnalysis(_) => "risk_analysis",
        }
    }

    /// Decode a flat field mapping from a web form or the CLI. Values are
    /// trimmed; absent or blank fields take their defaults. Fields that do
    /// not belong to the task type are ignored.
    pub fn from_form(
        task_type: &str,
        user_id: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<Self, AgentError> {
        Self::build(task_type, user_id, |key, default| {
            fields
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .to_string()
        })
    }

    /// Decode a field mapping verbatim. Only keys that are missing take their
    /// defaults; empty or padded values reach the agent as given.
    pub fn from_fields(
        task_type: &str,
        user_id: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<Self, AgentError> {
        Self::build(task_type, user_id, |key, default| {
            fields
                .get(key)
                .map(String::as_str)
                .unwrap_or(default)
                .to_string()
        })
    }

    fn build(
        task_type: &str,
        user_id: &str,
        get: impl Fn(&str, &str) -> String,
    ) -> Result<Self, AgentError> {
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();

        let task = match task_type {
            "lead_summary" => TaskFields::LeadSummary(LeadSummary {
                lead_name: get("lead_name", "Unknown"),
                company_name: get("company_name", "Unknown"),
                industry: get("industry", "Unknown"),
                source: get("source", "Manual Entry"),
                additional_context: get("additional_context", "No additional context"),
            }),
            "follow_up" => TaskFields::FollowUp(FollowUp {
                customer_name: get("customer_name", "Unknown"),
                interaction_date: get("interaction_date", &today),
                interaction_type: get("interaction_type", "General"),
                summary: get("summary", "No summary provided"),
                deal_stage: get("deal_stage", "Unknown"),
            }),
            "risk_analysis" => TaskFields::RiskAnalysis(RiskAnalysis {
                deal_name: get("deal_name", "Unknown Deal"),
                deal_stage: get("deal_stage", "Unknown"),
                last_activity_date: get("last_activity_date", &today),
                engagement_summary: get("engagement_summary", "No engagement data"),
                stakeholders: get("stakeholders", "Unknown"),
            }),
            other => {
                return Err(AgentError::UnknownTaskType {
                    task_type: other.to_string(),
                })
            }
        };

        Ok(Self::new(user_id, task))
    }
}

/// What the agent returns for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub response: String,
    pub confidence: f64,
    pub resolution_time_seconds: f64,
    pub abstained: bool,
}

#[derive(Debug)]
pub enum AgentError {
    UnknownTaskType {
        task_type: String,
    },
    Spawn {
        command: String,
        source: std::io::Error,
    },
    Io {
        source: std::io::Error,
    },
    /// The agent process exited unsuccessfully.
    Exit {
        code: Option<i32>,
        stderr: String,
    },
    /// The agent's stdout was not a valid outcome object.
    Parse {
        source: serde_json::Error,
    },
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::UnknownTaskType { task_type } => {
                write!(f, "unknown task type: {task_type}")
            }
            AgentError::Spawn { command, source } => {
                write!(f, "failed to spawn agent {command}: {source}")
            }
            AgentError::Io { source } => write!(f, "I/O error talking to agent: {source}"),
            AgentError::Exit { code, stderr } => match code {
                Some(c) => write!(f, "agent exited with code {c}: {}", stderr.trim()),
                None => write!(f, "agent killed by signal: {}", stderr.trim()),
            },
            AgentError::Parse { source } => write!(f, "invalid agent output: {source}"),
        }
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AgentError::Spawn { source, .. } => Some(source),
            AgentError::Io { source } => Some(source),
            AgentError::Parse { source } => Some(source),
            AgentError::UnknownTaskType { .. } | AgentError::Exit { .. } => None,
        }
    }
}

/// Anything that can process a task request.
pub trait AgentCapability: Send + Sync {
    fn process_task(&self, request: &TaskRequest) -> Result<TaskOutcome, AgentError>;
}

/// Runs the configured agent command once per task: the request goes in as
/// JSON on stdin, a `TaskOutcome` object comes back on stdout.
pub struct CommandAgent {
    command: String,
    args: Vec<String>,
}

impl CommandAgent {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
        }
    }
}

impl AgentCapability for CommandAgent {
    fn process_task(&self, request: &TaskRequest) -> Result<TaskOutcome, AgentError> {
        let payload =
            serde_json::to_vec(request).map_err(|e| AgentError::Parse { source: e })?;

        tracing::debug!(
            command = %self.command,
            task_type = request.task_type(),
            user_id = %request.user_id,
            "dispatching task to agent"
        );

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AgentError::Spawn {
                command: self.command.clone(),
                source: e,
            })?;

        // stdin is written while stdout and stderr are drained.
        let stdin = child.stdin.take();
        let (output, written) = std::thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(&payload),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")));
            (output, written)
        });
        let output = output.map_err(|e| AgentError::Io { source: e })?;

        if !output.status.success() {
            return Err(AgentError::Exit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        if let Err(e) = written {
            // An agent may answer without consuming all of stdin.
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(AgentError::Io { source: e });
            }
            tracing::debug!(error = %e, "agent closed stdin early");
        }

        serde_json::from_slice(&output.stdout).map_err(|e| AgentError::Parse { source: e })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn lead_summary_defaults() {
        let req = TaskRequest::from_form(
            "lead_summary",
            "web_user",
            &form(&[("lead_name", "Ada"), ("industry", "  ")]),
        )
        .unwrap();
        assert_eq!(req.user_id, "web_user");
        assert_eq!(req.task_type(), "lead_summary");
        match req.task {
            TaskFields::LeadSummary(l) => {
                assert_eq!(l.lead_name, "Ada");
                assert_eq!(l.company_name, "Unknown");
                assert_eq!(l.industry, "Unknown");
                assert_eq!(l.source, "Manual Entry");
                assert_eq!(l.additional_context, "No additional context");
            }
            other => panic!("unexpected task: {other:?}"),
        }
    }

    #[test]
    fn follow_up_date_defaults_to_today() {
        let req = TaskRequest::from_form("follow_up", "u", &BTreeMap::new()).unwrap();
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        match req.task {
            TaskFields::FollowUp(f) => {
                assert_eq!(f.interaction_date, today);
                assert_eq!(f.interaction_type, "General");
                assert_eq!(f.summary, "No summary provided");
            }
            other => panic!("unexpected task: {other:?}"),
        }
    }

    #[test]
    fn risk_analysis_ignores_foreign_fields() {
        let req = TaskRequest::from_form(
            "risk_analysis",
            "u",
            &form(&[("deal_name", "Acme renewal"), ("lead_name", "ignored")]),
        )
        .unwrap();
        match req.task {
            TaskFields::RiskAnalysis(r) => {
                assert_eq!(r.deal_name, "Acme renewal");
                assert_eq!(r.engagement_summary, "No engagement data");
                assert_eq!(r.stakeholders, "Unknown");
            }
            other => panic!("unexpected task: {other:?}"),
        }
    }

    #[test]
    fn from_fields_keeps_values_verbatim() {
        let req = TaskRequest::from_fields(
            "lead_summary",
            "qa_runner",
            &form(&[
                ("lead_name", ""),
                ("company_name", " Initech "),
                ("industry", ""),
                ("source", ""),
            ]),
        )
        .unwrap();
        match req.task {
            TaskFields::LeadSummary(l) => {
                assert_eq!(l.lead_name, "");
                assert_eq!(l.company_name, " Initech ");
                assert_eq!(l.industry, "");
                assert_eq!(l.source, "");
                // absent key still defaults
                assert_eq!(l.additional_context, "No additional context");
            }
            other => panic!("unexpected task: {other:?}"),
        }
        assert!(matches!(
            TaskRequest::from_fields("poetry", "u", &BTreeMap::new()),
            Err(AgentError::UnknownTaskType { .. })
        ));
    }

    #[test]
    fn unknown_task_type_rejected() {
        let err = TaskRequest::from_form("poetry", "u", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, AgentError::UnknownTaskType { .. }));
        assert_eq!(err.to_string(), "unknown task type: poetry");
    }

    #[test]
    fn request_wire_shape() {
        let req = TaskRequest::from_form(
            "lead_summary",
            "qa_runner",
            &form(&[("company_name", "Initech")]),
        )
        .unwrap();
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["user_id"], "qa_runner");
        assert_eq!(v["task_type"], "lead_summary");
        assert_eq!(v["fields"]["company_name"], "Initech");
        assert_eq!(v["fields"]["lead_name"], "Unknown");
    }

    #[cfg(unix)]
    fn sh_agent(script: &str) -> CommandAgent {
        CommandAgent::new(&AgentConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        })
    }

    #[cfg(unix)]
    #[test]
    fn command_agent_parses_outcome() {
        let agent = sh_agent(
            r#"cat > /dev/null; echo '{"response":"Lead looks warm","confidence":0.8,"resolution_time_seconds":1.5,"abstained":false}'"#,
        );
        let req = TaskRequest::from_form("lead_summary", "u", &BTreeMap::new()).unwrap();
        let out = agent.process_task(&req).unwrap();
        assert_eq!(out.response, "Lead looks warm");
        assert!(!out.abstained);
        assert_eq!(out.resolution_time_seconds, 1.5);
    }

    #[cfg(unix)]
    #[test]
    fn command_agent_receives_request_on_stdin() {
        // Echo the task type back as the response.
        let agent = sh_agent(
            r#"t=$(sed -n 's/.*"task_type":"\([a-z_]*\)".*/\1/p'); echo "{\"response\":\"$t\",\"confidence\":1,\"resolution_time_seconds\":0,\"abstained\":false}""#,
        );
        let req = TaskRequest::from_form("risk_analysis", "u", &BTreeMap::new()).unwrap();
        assert_eq!(agent.process_task(&req).unwrap().response, "risk_analysis");
    }

    #[cfg(unix)]
    #[test]
    fn command_agent_large_payload_with_chatty_agent() {
        // Fills the stderr pipe before reading any of stdin.
        let agent = sh_agent(
            r#"head -c 200000 /dev/zero | tr '\0' x >&2; cat > /dev/null; echo '{"response":"ok","confidence":1,"resolution_time_seconds":0,"abstained":false}'"#,
        );
        let req = TaskRequest::from_fields(
            "lead_summary",
            "u",
            &form(&[("additional_context", "y".repeat(300_000).as_str())]),
        )
        .unwrap();
        assert_eq!(agent.process_task(&req).unwrap().response, "ok");
    }

    #[cfg(unix)]
    #[test]
    fn command_agent_may_ignore_stdin() {
        let agent = sh_agent(
            r#"echo '{"response":"early","confidence":1,"resolution_time_seconds":0,"abstained":true}'"#,
        );
        let req = TaskRequest::from_fields(
            "lead_summary",
            "u",
            &form(&[("additional_context", "y".repeat(300_000).as_str())]),
        )
        .unwrap();
        let out = agent.process_task(&req).unwrap();
        assert_eq!(out.response, "early");
        assert!(out.abstained);
    }

    #[cfg(unix)]
    #[test]
    fn command_agent_nonzero_exit() {
        let agent = sh_agent("cat > /dev/null; echo boom >&2; exit 3");
        let req = TaskRequest::from_form("follow_up", "u", &BTreeMap::new()).unwrap();
        match agent.process_task(&req).unwrap_err() {
            AgentError::Exit { code, stderr } => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn command_agent_garbage_output() {
        let agent = sh_agent("cat > /dev/null; echo not json");
        let req = TaskRequest::from_form("follow_up", "u", &BTreeMap::new()).unwrap();
        assert!(matches!(
            agent.process_task(&req).unwrap_err(),
            AgentError::Parse { .. }
        ));
    }

    #[test]
    fn missing_command_is_spawn_error() {
        let agent = CommandAgent::new(&AgentConfig {
            command: "/nonexistent/agent-binary".to_string(),
            args: vec![],
        });
        let req = TaskRequest::from_form("follow_up", "u", &BTreeMap::new()).unwrap();
        assert!(matches!(
            agent.process_task(&req).unwrap_err(),
            AgentError::Spawn { .. }
        ));
    }
}
