//! Export targets
//!
//! Where a sink writes: a file under the export directory, standard output,
//! or a caller supplied writer.

use super::ExportError;
use crate::error::ConfigurationError;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Output destination of a sink.
pub enum ExportTarget {
    Stdout,
    File { path: PathBuf, overwrite: bool },
    Writer(Box<dyn Write + Send>),
}

impl fmt::Debug for ExportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl ExportTarget {
    /// Build a target from the export settings.
    ///
    /// A relative `export_file` is placed under `export_path`; without a file
    /// the target is standard output.
    pub fn from_settings(export_file: Option<&str>, export_path: &Path, overwrite: bool) -> Self {
        match export_file.map(str::trim).filter(|f| !f.is_empty()) {
            Some(file) => {
                let file = Path::new(file);
                let path = if file.is_absolute() {
                    file.to_path_buf()
                } else {
                    export_path.join(file)
                };
                ExportTarget::File { path, overwrite }
            }
            None => ExportTarget::Stdout,
        }
    }

    /// Refuse an existing file unless overwriting is allowed.
    pub fn check(&self) -> Result<(), ConfigurationError> {
        if let ExportTarget::File { path, overwrite } = self
            && path.exists()
            && !overwrite
        {
            return Err(ConfigurationError::Invalid(format!(
                "Export file '{}' exists and export_overwrite is false",
                path.display()
            )));
        }
        Ok(())
    }

    /// Open the target for writing, creating parent directories.
    pub fn open(self) -> Result<Box<dyn Write + Send>, ExportError> {
        match self {
            ExportTarget::Stdout => Ok(Box::new(io::stdout())),
            ExportTarget::Writer(writer) => Ok(writer),
            ExportTarget::File { path, overwrite } => {
                if path.exists() && !overwrite {
                    return Err(ExportError::TargetExists(path));
                }
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        ExportError::IoError(format!("Failed to create directory: {}", e))
                    })?;
                }
                let file = File::create(&path).map_err(|e| {
                    ExportError::IoError(format!("Failed to create {}: {}", path.display(), e))
                })?;
                info!("Exporting to {}", path.display());
                Ok(Box::new(BufWriter::new(file)))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ExportTarget::Stdout => "stdout".to_string(),
            ExportTarget::File { path, .. } => path.display().to_string(),
            ExportTarget::Writer(_) => "writer".to_string(),
        }
    }
}

/// Cloneable in-memory writer, for capturing sink output.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().map(|buf| buf.clone()).unwrap_or_default()
    }

    /// Contents as UTF-8, lossily decoded.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self
            .0
            .lock()
            .map_err(|_| io::Error::other("buffer lock poisoned"))?;
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
