//! Lap sources that need the filesystem.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use laptrace_core::lap::{LapDocument, LapSource};
use laptrace_core::{Lap, LapError};

/// A lap document exported to a JSON file
pub struct FileLapSource {
    path: PathBuf,
}

impl FileLapSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LapSource for FileLapSource {
    fn describe(&self) -> String {
        format!("lap file {}", self.path.display())
    }

    fn load(&self) -> Result<Lap, LapError> {
        let file = File::open(&self.path).map_err(|e| {
            LapError::DataUnavailable(format!("{}: {}", self.path.display(), e))
        })?;
        let document = LapDocument::from_reader(BufReader::new(file))?;
        document.into_lap()
    }
}
