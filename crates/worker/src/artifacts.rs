//! Per-task working directories and artifact persistence.

use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};

use plangen_core::artifacts::{LOG_FILE, REPORT_FILE};
use plangen_core::types::DbId;
use plangen_db::repositories::TaskRepo;
use sqlx::PgPool;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

// ---------------------------------------------------------------------------
// WorkDir
// ---------------------------------------------------------------------------

/// A task's working directory. Removed when dropped.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    removed: bool,
}

impl WorkDir {
    /// Create an empty `<run_dir>/<task_id>`, discarding anything a crashed
    /// earlier run left behind.
    pub fn create(run_dir: &Path, task_id: DbId) -> io::Result<Self> {
        let path = run_dir.join(task_id.to_string());
        if path.exists() {
            tracing::warn!(task_id, path = %path.display(), "Removing stale working directory");
            std::fs::remove_dir_all(&path)?;
        }
        std::fs::create_dir_all(&path)?;
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory now, reporting failure.
    pub fn remove(mut self) -> io::Result<()> {
        self.removed = true;
        remove_if_exists(&self.path)
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = remove_if_exists(&self.path) {
            tracing::error!(path = %self.path.display(), error = %e, "Failed to remove working directory");
        }
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// ArtifactStore
// ---------------------------------------------------------------------------

/// What [`ArtifactStore::persist_and_cleanup`] managed to store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistSummary {
    pub report_saved: bool,
    pub snapshot_saved: bool,
}

#[derive(Clone)]
pub struct ArtifactStore {
    pool: PgPool,
}

impl ArtifactStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Store the report and a zip snapshot of the working directory on the
    /// task row, then delete the directory.
    ///
    /// Never fails: a snapshot error stores the report alone, a database
    /// error stores nothing. The directory is removed in every case.
    pub async fn persist_and_cleanup(&self, task_id: DbId, work_dir: WorkDir) -> PersistSummary {
        let summary = self.persist(task_id, work_dir.path()).await;

        if let Err(e) = work_dir.remove() {
            tracing::error!(task_id, error = %e, "Failed to remove working directory");
        }
        summary
    }

    async fn persist(&self, task_id: DbId, dir: &Path) -> PersistSummary {
        let report = match tokio::fs::read(dir.join(REPORT_FILE)).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(task_id, error = %e, "Failed to read report");
                None
            }
        };

        let snapshot_dir = dir.to_path_buf();
        let snapshot = match tokio::task::spawn_blocking(move || zip_directory(&snapshot_dir)).await
        {
            Ok(Ok(bytes)) => Some(bytes),
            Ok(Err(e)) => {
                tracing::warn!(task_id, error = %e, "Failed to build run snapshot");
                None
            }
            Err(e) => {
                tracing::warn!(task_id, error = %e, "Snapshot task panicked");
                None
            }
        };

        match TaskRepo::save_artifacts(&self.pool, task_id, report.as_deref(), snapshot.as_deref())
            .await
        {
            Ok(()) => {
                let summary = PersistSummary {
                    report_saved: report.is_some(),
                    snapshot_saved: snapshot.is_some(),
                };
                tracing::info!(
                    task_id,
                    report_saved = summary.report_saved,
                    snapshot_saved = summary.snapshot_saved,
                    "Artifacts persisted"
                );
                summary
            }
            Err(e) => {
                tracing::error!(task_id, error = %e, "Failed to persist artifacts");
                PersistSummary::default()
            }
        }
    }
}

/// Zip `dir` into memory. The top-level rolling log is left out.
pub fn zip_directory(dir: &Path) -> zip::result::ZipResult<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    add_entries(&mut zip, dir, "", options)?;
    Ok(zip.finish()?.into_inner())
}

fn add_entries(
    zip: &mut ZipWriter<Cursor<Vec<u8>>>,
    dir: &Path,
    prefix: &str,
    options: SimpleFileOptions,
) -> zip::result::ZipResult<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if prefix.is_empty() && name == LOG_FILE {
            continue;
        }
        let entry_name = format!("{prefix}{name}");
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            zip.add_directory(format!("{entry_name}/"), options)?;
            add_entries(zip, &entry.path(), &format!("{entry_name}/"), options)?;
        } else if file_type.is_file() {
            zip.start_file(entry_name, options)?;
            zip.write_all(&std::fs::read(entry.path())?)?;
        }
    }
    Ok(())
}
