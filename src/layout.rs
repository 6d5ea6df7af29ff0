//! Working directory layout.
//!
//! ```text
//! <root>/
//! ├── data/                 task datasets (one JSONL file per task)
//! └── test_data/
//!     ├── reports/          exports
//!     ├── scores/
//!     └── rubrics/
//! ```

use std::path::PathBuf;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("test_data").join("reports")
    }

    pub fn scores_dir(&self) -> PathBuf {
        self.root.join("test_data").join("scores")
    }

    pub fn rubrics_dir(&self) -> PathBuf {
        self.root.join("test_data").join("rubrics")
    }

    /// Creates every directory of the layout. Idempotent.
    pub fn ensure(&self) -> AppResult<()> {
        for dir in [
            self.data_dir(),
            self.reports_dir(),
            self.scores_dir(),
            self.rubrics_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| AppError::io(&dir, e))?;
        }
        Ok(())
    }
}
