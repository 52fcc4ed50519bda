use crate::determinism::{CanonicalBundle, MANIFEST_FILE, verify_written};
use crate::errors::{EngineError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const STAGING_PREFIX: &str = ".modgraph-staging-";

/// Writer service for the canonical output documents.
///
/// Documents are written into a staging directory next to the output
/// directory, verified there, and only then renamed into place. A failed or
/// cancelled run leaves any previous output untouched.
pub struct WriterService {
    output_directory: PathBuf,
}

/// Results of writing one bundle
#[derive(Debug, Clone)]
pub struct WriterResult {
    pub files_written: Vec<WrittenFile>,
    pub total_bytes: u64,
    pub verified: bool,
    pub writing_duration: Duration,
}

/// Information about a written document
#[derive(Debug, Clone)]
pub struct WrittenFile {
    pub file_path: PathBuf,
    pub file_type: String,
    pub file_size_bytes: u64,
}

impl WriterService {
    pub fn new<P: AsRef<Path>>(output_directory: P) -> Self {
        Self {
            output_directory: output_directory.as_ref().to_path_buf(),
        }
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    pub fn write(
        &self,
        bundle: &CanonicalBundle,
        verify: bool,
        cancellation_token: Option<&CancellationToken>,
    ) -> Result<WriterResult> {
        let start = Instant::now();
        self.check_replaceable()?;

        let parent = match self.output_directory.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| EngineError::io(&parent, e))?;

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&parent)
            .map_err(|e| EngineError::io(&parent, e))?;
        let staged_output = staging.path().join("out");
        fs::create_dir(&staged_output).map_err(|e| EngineError::io(&staged_output, e))?;

        let mut files_written = Vec::new();
        let mut total_bytes = 0;
        for (name, text) in bundle.documents() {
            let path = staged_output.join(name);
            fs::write(&path, text).map_err(|e| EngineError::io(&path, e))?;
            debug!("Staged {} ({} bytes)", name, text.len());

            total_bytes += text.len() as u64;
            files_written.push(WrittenFile {
                file_path: self.output_directory.join(name),
                file_type: name.trim_end_matches(".json").to_string(),
                file_size_bytes: text.len() as u64,
            });
        }

        if verify {
            verify_written(bundle, &staged_output)?;
        }

        if cancellation_token.is_some_and(|token| token.is_cancelled()) {
            return Err(EngineError::cancelled("before output was committed"));
        }

        self.commit(staging)?;

        let writing_duration = start.elapsed();
        info!(
            "Wrote {} documents ({} bytes) to {} in {:?}",
            files_written.len(),
            total_bytes,
            self.output_directory.display(),
            writing_duration
        );

        Ok(WriterResult {
            files_written,
            total_bytes,
            verified: verify,
            writing_duration,
        })
    }

    /// Refuse to replace a directory this writer did not produce
    fn check_replaceable(&self) -> Result<()> {
        let output = &self.output_directory;
        if !output.exists() {
            return Ok(());
        }
        if !output.is_dir() {
            return Err(EngineError::integrity(
                output.display().to_string(),
                "output path exists and is not a directory",
            ));
        }
        let mut entries = fs::read_dir(output).map_err(|e| EngineError::io(output, e))?;
        let is_empty = entries.next().is_none();
        if is_empty || output.join(MANIFEST_FILE).is_file() {
            Ok(())
        } else {
            Err(EngineError::integrity(
                output.display().to_string(),
                "output directory is not empty and holds no previous modgraph output",
            ))
        }
    }

    fn commit(&self, staging: TempDir) -> Result<()> {
        self.commit_with(staging, |from, to| fs::rename(from, to))
    }

    /// Swap the staged output into place. If the previous output cannot be
    /// restored after a failed swap, the staging directory is kept so the
    /// previous output survives under `previous/`.
    fn commit_with<R>(&self, staging: TempDir, rename: R) -> Result<()>
    where
        R: Fn(&Path, &Path) -> std::io::Result<()>,
    {
        let output = &self.output_directory;
        let staged_output = staging.path().join("out");
        let previous = staging.path().join("previous");
        let had_previous = output.exists();

        if had_previous {
            rename(output, &previous).map_err(|e| EngineError::io(output, e))?;
        }
        let Err(e) = rename(&staged_output, output) else {
            return Ok(());
        };

        if had_previous {
            if let Err(restore) = rename(&previous, output) {
                let preserved = staging.keep().join("previous");
                error!(
                    "Failed to restore previous output to {}: {restore}; it is preserved at {}",
                    output.display(),
                    preserved.display()
                );
                return Err(EngineError::integrity(
                    output.display().to_string(),
                    format!(
                        "new output could not be moved into place ({e}) and the previous output \
                         could not be restored ({restore}); previous output preserved at {}",
                        preserved.display()
                    ),
                ));
            }
        }
        Err(EngineError::io(output, e))
    }
}
