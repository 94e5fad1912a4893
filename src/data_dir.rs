use crate::config::DataConfig;
use std::path::PathBuf;

/// Manages the `data/` directory layout.
///
/// The run-log CSV, uploaded inputs and QA result files all live under one
/// data directory (default `data/`).
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
    csv_file: PathBuf,
}

impl DataDir {
    pub fn from_config(config: &DataConfig) -> Self {
        Self {
            root: config.dir.clone(),
            csv_file: config.csv_file.clone(),
        }
    }

    /// Path to the run-log CSV. An absolute `csv_file` is used as-is.
    pub fn csv(&self) -> PathBuf {
        self.root.join(&self.csv_file)
    }

    /// Directory holding raw uploaded files.
    #[cfg(feature = "serve")]
    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploaded_inputs")
    }

    /// Directory holding `qa_results_*.json` files.
    pub fn qa_results_dir(&self) -> PathBuf {
        self.root.join("qa_results")
    }

    /// Create the root and its subdirectories.
    #[cfg(feature = "serve")]
    /// Returns Ok(true) if the root was created, Ok(false) if it already existed.
    pub fn init(&self) -> std::io::Result<bool> {
        let created = !self.root.exists();
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.uploads_dir())?;
        std::fs::create_dir_all(self.qa_results_dir())?;
        Ok(created)
    }
}
