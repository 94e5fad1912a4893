/// Uploaded inputs: stored raw under a timestamp-prefixed name, then excerpted
/// into an agent request.
use crate::agent::{AgentError, TaskRequest, WEB_USER};
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const EXCERPT_CHARS: usize = 500;

#[derive(Debug)]
pub enum UploadError {
    InvalidFilename { name: String },
    NotUtf8 { source: std::str::Utf8Error },
    Write { path: PathBuf, source: std::io::Error },
    Request(AgentError),
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadError::InvalidFilename { name } => write!(f, "invalid upload filename {name:?}"),
            UploadError::NotUtf8 { source } => write!(f, "uploaded file is not UTF-8: {source}"),
            UploadError::Write { path, source } => {
                write!(f, "failed to store upload {}: {source}", path.display())
            }
            UploadError::Request(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for UploadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UploadError::InvalidFilename { .. } => None,
            UploadError::NotUtf8 { source } => Some(source),
            UploadError::Write { source, .. } => Some(source),
            UploadError::Request(e) => Some(e),
        }
    }
}

/// Keep only the final path component of a client-supplied filename.
pub fn sanitize_filename(name: &str) -> Result<String, UploadError> {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if base.is_empty() || base == "." || base == ".." {
        return Err(UploadError::InvalidFilename {
            name: name.to_string(),
        });
    }
    Ok(base.to_string())
}

/// A stored upload and the text excerpt forwarded to the agent.
#[derive(Debug)]
pub struct StoredUpload {
    pub filename: String,
    pub path: PathBuf,
    pub excerpt: String,
}

/// Decode `bytes` as UTF-8, then write them verbatim to
/// `<dir>/<YYYYMMDD_HHMMSS>_<basename>`. Nothing is written if decoding fails.
pub fn store(
    dir: &Path,
    filename: &str,
    bytes: &[u8],
    now: DateTime<Local>,
) -> Result<StoredUpload, UploadError> {
    let filename = sanitize_filename(filename)?;
    let text = std::str::from_utf8(bytes).map_err(|e| UploadError::NotUtf8 { source: e })?;
    let excerpt: String = text.chars().take(EXCERPT_CHARS).collect();

    let path = dir.join(format!("{}_{}", now.format("%Y%m%d_%H%M%S"), filename));
    std::fs::create_dir_all(dir)
        .and_then(|_| std::fs::write(&path, bytes))
        .map_err(|e| UploadError::Write {
            path: path.clone(),
            source: e,
        })?;

    Ok(StoredUpload {
        filename,
        path,
        excerpt,
    })
}

/// Build the agent request for an upload. The excerpt fills the free-text
/// field of whichever task type was chosen.
pub fn request_for(task_type: &str, excerpt: &str) -> Result<TaskRequest, UploadError> {
    let fields: BTreeMap<String, String> = [
        ("lead_name", "Uploaded Lead"),
        ("company_name", "From File"),
        ("industry", "Unknown"),
        ("source", "File Upload"),
        ("additional_context", excerpt),
        ("summary", excerpt),
        ("engagement_summary", excerpt),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    TaskRequest::from_form(task_type, WEB_USER, &fields).map_err(UploadError::Request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::TaskFields;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()
    }

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_filename("notes.txt").unwrap(), "notes.txt");
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\lead.csv").unwrap(), "lead.csv");
        for bad in ["", "dir/", "..", "a/.."] {
            assert!(sanitize_filename(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn store_writes_timestamped_file() {
        let dir = TempDir::new().unwrap();
        let uploads = dir.path().join("uploaded_inputs");
        let stored = store(&uploads, "lead.txt", b"Ada from Initech wants a demo", at()).unwrap();

        assert_eq!(stored.filename, "lead.txt");
        assert_eq!(stored.path, uploads.join("20240506_070809_lead.txt"));
        assert_eq!(std::fs::read(&stored.path).unwrap(), b"Ada from Initech wants a demo");
        assert_eq!(stored.excerpt, "Ada from Initech wants a demo");
    }

    #[test]
    fn excerpt_is_capped() {
        let dir = TempDir::new().unwrap();
        let body = "ü".repeat(800);
        let stored = store(dir.path(), "big.txt", body.as_bytes(), at()).unwrap();
        assert_eq!(stored.excerpt.chars().count(), EXCERPT_CHARS);
        assert_eq!(std::fs::read(&stored.path).unwrap().len(), body.len());
    }

    #[test]
    fn non_utf8_rejected_before_write() {
        let dir = TempDir::new().unwrap();
        let err = store(dir.path(), "bin.dat", &[0xff, 0xfe, 0x00], at()).unwrap_err();
        assert!(matches!(err, UploadError::NotUtf8 { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn lead_request_from_upload() {
        let req = request_for("lead_summary", "some context").unwrap();
        assert_eq!(req.user_id, WEB_USER);
        assert_eq!(WEB_USER, "web_user");
        match req.task {
            TaskFields::LeadSummary(l) => {
                assert_eq!(l.lead_name, "Uploaded Lead");
                assert_eq!(l.company_name, "From File");
                assert_eq!(l.source, "File Upload");
                assert_eq!(l.additional_context, "some context");
            }
            other => panic!("unexpected task: {other:?}"),
        }
    }

    #[test]
    fn follow_up_request_uses_excerpt_as_summary() {
        match request_for("follow_up", "call notes").unwrap().task {
            TaskFields::FollowUp(f) => assert_eq!(f.summary, "call notes"),
            other => panic!("unexpected task: {other:?}"),
        }
        assert!(matches!(
            request_for("nope", "x"),
            Err(UploadError::Request(AgentError::UnknownTaskType { .. }))
        ));
    }
}
