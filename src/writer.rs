use crate::{
    config::{CollisionPolicy, Config},
    docx,
    error::{Error, Result},
    pipeline::{BatchStats, DocumentRecord, Failure},
};
use serde::Serialize;
use std::{
    collections::HashSet,
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, PoisonError,
    },
};
use tracing::{debug, info, warn};

/// Characters that are not allowed in file names on common filesystems.
const INVALID_FILE_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Name used when a prompt sanitizes to nothing.
const FALLBACK_FILE_NAME: &str = "untitled";

/// Derives a file name (without extension) from a prompt.
///
/// Removes every character in `< > : " / \ | ? *` and trailing whitespace.
/// The result is idempotent under repeated application.
///
/// # Examples
///
/// ```
/// use prompt_docs::sanitize_file_name;
///
/// assert_eq!(sanitize_file_name("What is TCP/IP? "), "What is TCPIP");
/// ```
#[must_use]
pub fn sanitize_file_name(seed: &str) -> String {
    let cleaned: String = seed
        .chars()
        .filter(|c| !INVALID_FILE_NAME_CHARS.contains(c))
        .collect();
    let trimmed = cleaned.trim_end();

    if trimmed.is_empty() {
        FALLBACK_FILE_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Content of `summary.json`.
#[derive(Debug, Serialize)]
struct WriteSummary<'a> {
    /// Number of prompts dispatched
    total_prompts: usize,

    /// Prompts answered and saved
    succeeded: usize,

    /// Prompts that produced no document
    failed: usize,

    /// Input rows without a prompt
    skipped_rows: usize,

    /// Execution duration in seconds
    duration_secs: f64,

    /// Output directory path
    output_directory: String,

    /// Saved documents in completion order
    documents: &'a [DocumentRecord],

    /// Failed prompts with their diagnostics
    failures: &'a [Failure],

    /// Generation timestamp
    generated_at: String,
}

/// Persists responses as documents in the output directory.
pub struct Writer {
    output_dir: PathBuf,
    policy: CollisionPolicy,
    claimed: Mutex<HashSet<String>>,
    temp_counter: AtomicUsize,
}

impl Writer {
    /// Creates a new writer from configuration.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            policy: config.collision_policy,
            claimed: Mutex::new(HashSet::new()),
            temp_counter: AtomicUsize::new(0),
        }
    }

    /// Path a prompt's document would get, ignoring collisions.
    #[must_use]
    pub fn document_path(&self, seed: &str) -> PathBuf {
        self.path_for(&sanitize_file_name(seed))
    }

    /// Saves `response` as a single-paragraph document named after `seed`.
    ///
    /// Creates the output directory if needed. An existing document at the
    /// target path is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Output directory cannot be created
    /// - The document cannot be encoded or written
    pub fn save(&self, response: &str, seed: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir).map_err(|e| Error::io(&self.output_dir, e))?;

        let (name, fresh) = self.claim(sanitize_file_name(seed));
        let path = self.path_for(&name);
        if let Err(e) = self.write_file_atomic(&path, response) {
            if fresh {
                self.release(&name);
            }
            return Err(e);
        }

        debug!("Saved response to {}", path.display());
        Ok(path)
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.output_dir.join(format!("{name}.{}", docx::EXTENSION))
    }

    /// Reserves a name for this run according to the collision policy.
    ///
    /// The flag is true when the name was not held before this call.
    fn claim(&self, name: String) -> (String, bool) {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);

        if claimed.insert(name.clone()) {
            return (name, true);
        }

        match self.policy {
            CollisionPolicy::Overwrite => {
                warn!("Document name '{name}' already used in this run, overwriting");
                (name, false)
            }
            CollisionPolicy::Suffix => {
                let mut n = 2;
                loop {
                    let candidate = format!("{name} ({n})");
                    if claimed.insert(candidate.clone()) {
                        debug!("Document name '{name}' taken, using '{candidate}'");
                        return (candidate, true);
                    }
                    n += 1;
                }
            }
        }
    }

    /// Gives back a name whose document was never written.
    fn release(&self, name: &str) {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        claimed.remove(name);
        debug!("Released document name '{name}'");
    }

    /// Writes a document atomically.
    ///
    /// # Process
    ///
    /// 1. Encodes the document into a temporary file next to the target
    /// 2. Syncs the temporary file to disk
    /// 3. Renames it over the target path
    fn write_file_atomic(&self, path: &Path, text: &str) -> Result<()> {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let temp_path = self
            .output_dir
            .join(format!(".prompt-docs-{}-{n}.tmp", std::process::id()));

        let result = Self::write_temp(&temp_path, text).and_then(|()| {
            fs::rename(&temp_path, path).map_err(|e| Error::io(path, e))
        });

        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    fn write_temp(temp_path: &Path, text: &str) -> Result<()> {
        let file = fs::File::create(temp_path).map_err(|e| Error::io(temp_path, e))?;

        let mut sink = docx::write_document(BufWriter::new(file), text)?;
        sink.flush().map_err(|e| Error::io(temp_path, e))?;

        let file = sink
            .into_inner()
            .map_err(|e| Error::io(temp_path, e.into_error()))?;
        file.sync_all().map_err(|e| Error::io(temp_path, e))?;
        Ok(())
    }

    /// Writes a summary JSON file describing the run.
    ///
    /// # Errors
    ///
    /// Returns an error if the summary file cannot be written.
    pub fn write_summary(&self, stats: &BatchStats) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir).map_err(|e| Error::io(&self.output_dir, e))?;

        let summary = WriteSummary {
            total_prompts: stats.submitted,
            succeeded: stats.succeeded,
            failed: stats.failed,
            skipped_rows: stats.skipped_rows,
            duration_secs: stats.duration.as_secs_f64(),
            output_directory: self.output_dir.display().to_string(),
            documents: &stats.documents,
            failures: &stats.failures,
            generated_at: chrono::Local::now()
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        };

        let summary_path = self.output_dir.join("summary.json");
        let file = fs::File::create(&summary_path).map_err(|e| Error::io(&summary_path, e))?;

        serde_json::to_writer_pretty(file, &summary).map_err(Error::from)?;

        info!("Wrote summary to {}", summary_path.display());
        Ok(summary_path)
    }
}
