//! Batched script formatting
//!
//! Scripts extracted during a pass are queued in a [`ScriptFormatBatch`]
//! and formatted together at the end of the pass. The external formatter is
//! started once per batch of paths; when starting it fails, the rest of the
//! run falls back to one invocation per file.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::script::ScriptReference;
use crate::tree::Tree;
use crate::types::{FormatterConfig, OperationError};

/// Files handed to one formatter invocation, bounded by command-line length
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// What a formatter run printed
#[derive(Debug, Clone, Default)]
pub struct FormatterOutput {
    /// Exit status was zero. Ignored for batch runs; a single-file run that
    /// fails without output is reported as an error.
    pub success: bool,
    pub stdout: String,
}

#[derive(Debug, thiserror::Error)]
pub enum FormatterError {
    #[error("Failed to run formatter `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Formatter timed out after {0:?}")]
    Timeout(Duration),
}

/// An external code formatter
///
/// `files` are relative to `cwd`. Reported issues are expected on stdout,
/// one per line, each starting with `path:`. A non-zero exit that still
/// produced output means "issues found", not a failure. Output of a
/// single-file run is reported whole, prefixed or not.
#[async_trait]
pub trait Formatter: Send + Sync {
    async fn format(&self, cwd: &Path, files: &[String]) -> Result<FormatterOutput, FormatterError>;
}

/// Formatter backed by a child process
#[derive(Debug, Clone)]
pub struct CommandFormatter {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandFormatter {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &FormatterConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone(), config.timeout())
    }
}

#[async_trait]
impl Formatter for CommandFormatter {
    async fn format(&self, cwd: &Path, files: &[String]) -> Result<FormatterOutput, FormatterError> {
        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .args(files)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FormatterError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| FormatterError::Timeout(self.timeout))?
            .map_err(|source| FormatterError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        Ok(FormatterOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        })
    }
}

/// Progress of a flush: files handled so far and the batch being run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatProgress {
    pub current: usize,
    pub total: usize,
    pub batch: usize,
    pub total_batches: usize,
}

/// Queue of scripts waiting to be written and formatted
///
/// One collector belongs to one pass. A `flush` that starts while another
/// is running on the same collector returns immediately with no work.
pub struct ScriptFormatBatch {
    formatter: Arc<dyn Formatter>,
    batch_size: usize,
    queue: Mutex<Vec<ScriptReference>>,
    processing: AtomicBool,
}

/// Clears the in-flight flag however the flush ends
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ScriptFormatBatch {
    pub fn new(formatter: Arc<dyn Formatter>) -> Self {
        Self {
            formatter,
            batch_size: DEFAULT_BATCH_SIZE,
            queue: Mutex::new(Vec::new()),
            processing: AtomicBool::new(false),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn enqueue(&self, script: ScriptReference) {
        self.lock_queue().push(script);
    }

    pub fn enqueue_all(&self, scripts: impl IntoIterator<Item = ScriptReference>) {
        self.lock_queue().extend(scripts);
    }

    pub fn len(&self) -> usize {
        self.lock_queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of formatter invocations the queued scripts need
    pub fn batch_count(&self) -> usize {
        self.len().div_ceil(self.batch_size)
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, Vec<ScriptReference>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write every queued script into the tree and run the formatter over them
    ///
    /// The queue is always left empty. Returned errors name the script's tree
    /// path in `file`.
    pub async fn flush<F>(&self, tree: &Tree, mut on_progress: F) -> Vec<OperationError>
    where
        F: FnMut(FormatProgress),
    {
        if self.processing.swap(true, Ordering::AcqRel) {
            tracing::debug!("Script batch already being processed");
            return Vec::new();
        }
        let _guard = ProcessingGuard(&self.processing);

        let queued = std::mem::take(&mut *self.lock_queue());
        if queued.is_empty() {
            return Vec::new();
        }

        let total = queued.len();
        let total_batches = total.div_ceil(self.batch_size);
        tracing::info!("Formatting {} scripts in {} batches", total, total_batches);

        let mut errors = Vec::new();
        on_progress(FormatProgress {
            current: 0,
            total,
            batch: 0,
            total_batches,
        });

        // Addresses never collide, so every write targets its own file
        let writes = futures::future::join_all(
            queued
                .iter()
                .map(|script| async move { tree.write(&script.tree_path(), &script.code).await }),
        )
        .await;

        let mut written = Vec::with_capacity(total);
        for (script, result) in queued.into_iter().zip(writes) {
            match result {
                Ok(()) => written.push(script),
                Err(e) => errors.push(OperationError::new(
                    format!("Failed to write script: {}", e),
                    script.tree_path(),
                )),
            }
        }

        let mut degraded = false;
        for (index, chunk) in written.chunks(self.batch_size).enumerate() {
            on_progress(FormatProgress {
                current: index * self.batch_size,
                total,
                batch: index + 1,
                total_batches,
            });

            if !degraded {
                let paths: Vec<String> = chunk
                    .iter()
                    .map(|script| Tree::relative(&script.tree_path()))
                    .collect();

                match self.formatter.format(tree.root(), &paths).await {
                    Ok(output) => {
                        errors.extend(attribute_output(&output.stdout, chunk, &paths));
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("Batch formatting failed, formatting files one by one: {}", e);
                        degraded = true;
                    }
                }
            }

            for script in chunk {
                errors.extend(self.format_one(tree, script).await);
            }
        }

        on_progress(FormatProgress {
            current: total,
            total,
            batch: total_batches,
            total_batches,
        });

        errors
    }

    /// Format a single file; anything it prints is reported against it
    async fn format_one(&self, tree: &Tree, script: &ScriptReference) -> Option<OperationError> {
        let path = Tree::relative(&script.tree_path());
        match self.formatter.format(tree.root(), std::slice::from_ref(&path)).await {
            Ok(output) => {
                let stdout = clean_output(&output.stdout);
                let stdout = stdout.trim();
                if !stdout.is_empty() {
                    Some(OperationError::new(stdout, script.tree_path()))
                } else if !output.success {
                    Some(OperationError::new(
                        format!("Formatter exited with an error for {}", path),
                        script.tree_path(),
                    ))
                } else {
                    None
                }
            }
            Err(e) => Some(OperationError::new(e.to_string(), script.tree_path())),
        }
    }
}

/// Strip the relative-path noise some formatters prefix file names with
fn clean_output(stdout: &str) -> String {
    stdout.replace("../", "")
}

/// Assign each output line to the file whose path prefixes it
fn attribute_output(stdout: &str, scripts: &[ScriptReference], paths: &[String]) -> Vec<OperationError> {
    clean_output(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let line = line.strip_prefix("./").unwrap_or(line);
            scripts
                .iter()
                .zip(paths)
                .find(|(_, path)| {
                    line.strip_prefix(path.as_str())
                        .is_some_and(|rest| rest.starts_with(':'))
                })
                .map(|(script, _)| OperationError::new(line, script.tree_path()))
        })
        .collect()
}
