use crate::{
    client::{ChatClient, Completion},
    config::Config,
    dispatch::{Dispatcher, Outcome, UnitOfWork},
    error::Result,
    input,
    writer::Writer,
};
use serde::Serialize;
use std::{
    path::PathBuf,
    time::{Duration, Instant},
};
use tracing::{error, info, instrument, warn};

/// A document produced by a successful unit of work.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    /// Position of the prompt in the input (0-based)
    pub index: usize,

    /// Originating prompt
    pub prompt: String,

    /// Where the document was written
    pub path: PathBuf,

    /// Length of the response in characters
    pub chars: usize,

    /// Time spent waiting for the completion, in seconds
    pub completion_secs: f64,
}

/// A unit of work that produced no document.
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    /// Position of the prompt in the input (0-based)
    pub index: usize,

    /// Originating prompt
    pub prompt: String,

    /// Diagnostic message
    pub message: String,
}

/// Statistics collected during a batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchStats {
    /// Rows read from the input file
    pub input_rows: usize,

    /// Rows without a prompt
    pub skipped_rows: usize,

    /// Units of work dispatched
    pub submitted: usize,

    /// Units that produced a document
    pub succeeded: usize,

    /// Units that failed
    pub failed: usize,

    /// Documents in completion order
    pub documents: Vec<DocumentRecord>,

    /// Failures in completion order
    pub failures: Vec<Failure>,

    /// Total execution time
    pub duration: Duration,

    /// Time from first dispatch until the last unit finished
    pub dispatch_duration: Duration,

    /// Output directory path
    pub output_directory: String,

    /// Whether this was a dry run
    pub dry_run: bool,
}

impl BatchStats {
    /// Returns true if every dispatched unit produced a document.
    #[must_use]
    pub const fn is_complete_success(&self) -> bool {
        self.failed == 0 && self.succeeded == self.submitted
    }

    /// Prints a human-readable summary to stdout.
    pub fn print_summary(&self) {
        println!("\n╔═══════════════════════════════════════════════════════╗");
        if self.dry_run {
            println!("║                 Dry Run Summary                       ║");
        } else {
            println!("║               Batch Execution Summary                 ║");
        }
        println!("╠═══════════════════════════════════════════════════════╣");
        println!(
            "║ Input rows:           {:>8}                        ║",
            self.input_rows
        );
        println!(
            "║   - Skipped:          {:>8}                        ║",
            self.skipped_rows
        );
        println!(
            "║ Prompts:              {:>8}                        ║",
            self.submitted
        );
        if !self.dry_run {
            println!(
                "║   - Succeeded:        {:>8}                        ║",
                self.succeeded
            );
            println!(
                "║   - Failed:           {:>8}                        ║",
                self.failed
            );
        }
        println!("║ Output directory:                                     ║");
        println!(
            "║   {}                                              ║",
            self.output_directory
        );
        println!("║                                                       ║");
        if self.dry_run {
            println!("║ ⚠ No requests sent, no files written (dry run mode)  ║");
        } else {
            println!(
                "║ Dispatch time:        {:>8.2}s                     ║",
                self.dispatch_duration.as_secs_f64()
            );
            println!(
                "║ Total time:           {:>8.2}s                     ║",
                self.duration.as_secs_f64()
            );
        }
        println!("╚═══════════════════════════════════════════════════════╝\n");

        for failure in &self.failures {
            println!("  ✗ {}: {}", failure.prompt, failure.message);
        }
    }
}

/// Batch orchestrator: reads prompts, dispatches them and saves the answers.
pub struct Pipeline<C = ChatClient> {
    config: Config,
    client: C,
    dispatcher: Dispatcher,
    writer: Writer,
}

impl Pipeline<ChatClient> {
    /// Creates a pipeline talking to the configured completion service.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration validation fails
    /// - The HTTP client cannot be initialized
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let client = ChatClient::new(&config)?;
        Self::with_client(config, client)
    }
}

impl<C: Completion> Pipeline<C> {
    /// Creates a pipeline that uses `client` for completions.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration validation fails.
    pub fn with_client(config: Config, client: C) -> Result<Self> {
        config.validate()?;

        let dispatcher = Dispatcher::new(config.workers);
        let writer = Writer::new(&config);

        Ok(Self {
            config,
            client,
            dispatcher,
            writer,
        })
    }

    /// Executes the batch and returns statistics.
    ///
    /// # Process
    ///
    /// 1. **Read**: Loads prompts and the system instruction
    /// 2. **Dispatch**: Sends every prompt on the worker pool
    /// 3. **Write**: Saves each answer as soon as it arrives
    ///
    /// Unit failures are logged and counted, they never abort the batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the input or instruction file is missing or
    /// malformed, or if the requested summary file cannot be written.
    #[instrument(skip(self), fields(input = %self.config.input_path.display()))]
    pub fn run(self) -> Result<BatchStats> {
        let start_time = Instant::now();
        let mut stats = BatchStats {
            output_directory: self.config.output_dir.display().to_string(),
            dry_run: self.config.dry_run,
            ..BatchStats::default()
        };

        info!("Reading prompts from {}", self.config.input_path.display());
        let rows = input::read_rows(&self.config.input_path)?;
        let prompts = input::prompts_from_rows(&rows);
        stats.input_rows = rows.len();
        stats.skipped_rows = rows.len() - prompts.len();

        info!(
            "Reading system instruction from {}",
            self.config.instruction_path.display()
        );
        let instruction = input::load_instruction(&self.config.instruction_path)?;

        let units = UnitOfWork::batch(prompts, &instruction);
        stats.submitted = units.len();
        info!("✓ Loaded {} prompt(s)", units.len());

        if units.is_empty() {
            warn!("No prompts found in {}", self.config.input_path.display());
        }

        if self.config.dry_run {
            warn!("Dry run mode enabled - skipping requests and file writes");
            for unit in &units {
                info!(
                    "  would write {}",
                    self.writer.document_path(&unit.prompt).display()
                );
            }
            stats.duration = start_time.elapsed();
            return Ok(stats);
        }

        info!(
            "Dispatching {} prompt(s) on {} worker(s)",
            units.len(),
            self.dispatcher.workers()
        );
        let dispatch_start = Instant::now();
        self.dispatcher
            .run(&self.client, units, |outcome| self.handle(outcome, &mut stats));
        stats.dispatch_duration = dispatch_start.elapsed();

        stats.duration = start_time.elapsed();
        if self.config.write_summary {
            self.writer.write_summary(&stats)?;
        }

        info!(
            "✓ Batch finished in {:.2}s: {} succeeded, {} failed",
            stats.duration.as_secs_f64(),
            stats.succeeded,
            stats.failed
        );

        Ok(stats)
    }

    /// Saves a successful answer or records the failure.
    fn handle(&self, outcome: Outcome, stats: &mut BatchStats) {
        let Outcome {
            unit,
            result,
            elapsed,
        } = outcome;

        info!("Processing prompt: {}", unit.prompt);
        let saved = result.and_then(|text| {
            let path = self.writer.save(&text, &unit.prompt)?;
            Ok((path, text.chars().count()))
        });

        match saved {
            Ok((path, chars)) => {
                info!("✓ Prompt processed, saved to {}", path.display());
                stats.succeeded += 1;
                stats.documents.push(DocumentRecord {
                    index: unit.index,
                    prompt: unit.prompt,
                    path,
                    chars,
                    completion_secs: elapsed.as_secs_f64(),
                });
            }
            Err(e) => {
                error!(prompt = %unit.prompt, "Generating output failed: {e}");
                stats.failed += 1;
                stats.failures.push(Failure {
                    index: unit.index,
                    prompt: unit.prompt,
                    message: e.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::CollisionPolicy, error::Error};
    use assert_fs::prelude::*;
    use std::{
        fmt::{self, Write as _},
        fs,
        io::Read,
        path::Path,
        sync::{Arc, Mutex},
    };
    use tracing::field::{Field, Visit};
    use tracing_subscriber::{layer::Context, prelude::*, Layer};

    /// Answers every prompt unless it contains "fail".
    struct FakeClient;

    impl Completion for FakeClient {
        fn complete(&self, prompt: &str, instruction: &str) -> Result<String> {
            if prompt.contains("fail") {
                return Err(Error::upstream("503 Service Unavailable"));
            }
            Ok(format!("[{}] answer to {prompt}", instruction.trim()))
        }
    }

    /// Collects the fields of every ERROR event.
    #[derive(Clone, Default)]
    struct ErrorEvents(Arc<Mutex<Vec<String>>>);

    struct FieldWriter(String);

    impl Visit for FieldWriter {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            let _ = write!(self.0, "{}={value:?} ", field.name());
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for ErrorEvents {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::ERROR {
                let mut fields = FieldWriter(String::new());
                event.record(&mut fields);
                self.0.lock().unwrap().push(fields.0);
            }
        }
    }

    fn setup(temp: &assert_fs::TempDir, csv: &str) -> Config {
        temp.child("input.csv").write_str(csv).unwrap();
        temp.child("system_prompt.txt")
            .write_str("You are a concise assistant.")
            .unwrap();

        Config::builder()
            .input_path(temp.path().join("input.csv"))
            .instruction_path(temp.path().join("system_prompt.txt"))
            .output_dir(temp.path().join("articles"))
            .model("test-model")
            .api_key("sk-test")
            .build()
            .unwrap()
    }

    fn document_text(path: &Path) -> String {
        let mut archive = zip::ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
        let mut part = archive.by_name(crate::docx::DOCUMENT_PART).unwrap();
        let mut xml = String::new();
        part.read_to_string(&mut xml).unwrap();
        xml
    }

    fn docx_count(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .path()
                    .extension()
                    .is_some_and(|ext| ext == "docx")
            })
            .count()
    }

    #[test]
    fn test_pipeline_end_to_end() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = setup(
            &temp,
            "Write a haiku about rain\nExplain TCP in one sentence\n",
        );

        let stats = Pipeline::with_client(config, FakeClient).unwrap().run().unwrap();

        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.succeeded, 2);
        assert!(stats.is_complete_success());

        let articles = temp.child("articles");
        let haiku = articles.child("Write a haiku about rain.docx");
        let tcp = articles.child("Explain TCP in one sentence.docx");
        assert!(haiku.exists());
        assert!(tcp.exists());

        let xml = document_text(haiku.path());
        assert_eq!(xml.matches("<w:p>").count(), 1);
        assert!(xml.contains("[You are a concise assistant.] answer to Write a haiku about rain"));
    }

    #[test]
    fn test_pipeline_isolates_failures() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = setup(&temp, "one\nplease fail\nthree\nfour\n");

        let stats = Pipeline::with_client(config, FakeClient).unwrap().run().unwrap();

        assert_eq!(stats.submitted, 4);
        assert_eq!(stats.succeeded, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.failures.len(), 1);
        assert_eq!(stats.failures[0].prompt, "please fail");
        assert!(stats.failures[0].message.contains("503"));
        assert_eq!(docx_count(&temp.path().join("articles")), 3);
    }

    #[test]
    fn test_pipeline_counts_only_rows_with_fields() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = setup(&temp, "alpha,extra\n\nbeta\n\n");

        let stats = Pipeline::with_client(config, FakeClient).unwrap().run().unwrap();

        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.input_rows, 4);
        assert_eq!(stats.skipped_rows, 2);
    }

    #[test]
    fn test_pipeline_reports_blank_lines_as_skipped() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = setup(&temp, "a\n\n\n\nb\n\n");

        let stats = Pipeline::with_client(config, FakeClient).unwrap().run().unwrap();

        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.skipped_rows, 4);
        assert_eq!(stats.input_rows, 6);
    }

    #[test]
    fn test_pipeline_isolates_write_failures() {
        let temp = assert_fs::TempDir::new().unwrap();
        // Longer than any file name the filesystem accepts.
        let long_prompt = "x".repeat(300);
        let config = setup(&temp, &format!("ok1\n{long_prompt}\nok2\n"));

        let stats = Pipeline::with_client(config, FakeClient).unwrap().run().unwrap();

        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.failures[0].prompt, long_prompt);
        assert_eq!(docx_count(&temp.path().join("articles")), 2);
    }

    #[test]
    fn test_pipeline_logs_one_error_per_failure() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = setup(&temp, "one\nplease fail\nthree\n");

        let events = ErrorEvents::default();
        let subscriber = tracing_subscriber::registry().with(events.clone());
        let stats = tracing::subscriber::with_default(subscriber, || {
            Pipeline::with_client(config, FakeClient).unwrap().run().unwrap()
        });

        assert_eq!(stats.failed, 1);
        let logged = events.0.lock().unwrap();
        assert_eq!(logged.len(), 1, "{logged:?}");
        assert!(logged[0].contains("prompt=please fail"));
        assert!(logged[0].contains("503"));
    }

    #[test]
    fn test_pipeline_collision_overwrites() {
        let temp = assert_fs::TempDir::new().unwrap();
        let mut config = setup(&temp, "What?\nWhat\n");
        config.workers = 1;

        let stats = Pipeline::with_client(config, FakeClient).unwrap().run().unwrap();

        assert_eq!(stats.succeeded, 2);
        let articles = temp.path().join("articles");
        assert_eq!(docx_count(&articles), 1);
        let xml = document_text(&articles.join("What.docx"));
        assert!(xml.contains("answer to What<"));
    }

    #[test]
    fn test_pipeline_collision_suffix() {
        let temp = assert_fs::TempDir::new().unwrap();
        let mut config = setup(&temp, "What?\nWhat\n");
        config.collision_policy = CollisionPolicy::Suffix;

        Pipeline::with_client(config, FakeClient).unwrap().run().unwrap();

        assert_eq!(docx_count(&temp.path().join("articles")), 2);
    }

    #[test]
    fn test_pipeline_missing_input_aborts() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = setup(&temp, "x\n");
        fs::remove_file(temp.path().join("input.csv")).unwrap();

        let err = Pipeline::with_client(config, FakeClient)
            .unwrap()
            .run()
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!temp.child("articles").exists());
    }

    #[test]
    fn test_pipeline_missing_instruction_aborts() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = setup(&temp, "x\n");
        fs::remove_file(temp.path().join("system_prompt.txt")).unwrap();

        let err = Pipeline::with_client(config, FakeClient)
            .unwrap()
            .run()
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!temp.child("articles").exists());
    }

    #[test]
    fn test_pipeline_dry_run() {
        let temp = assert_fs::TempDir::new().unwrap();
        let mut config = setup(&temp, "a\nb\n");
        config.dry_run = true;

        let stats = Pipeline::with_client(config, FakeClient).unwrap().run().unwrap();

        assert!(stats.dry_run);
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.succeeded, 0);
        assert!(!temp.child("articles").exists());
    }

    #[test]
    fn test_pipeline_writes_summary() {
        let temp = assert_fs::TempDir::new().unwrap();
        let mut config = setup(&temp, "ok\nfail here\n");
        config.write_summary = true;

        Pipeline::with_client(config, FakeClient).unwrap().run().unwrap();

        let summary = temp.child("articles").child("summary.json");
        assert!(summary.exists());
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(summary.path()).unwrap()).unwrap();
        assert_eq!(value["succeeded"], 1);
        assert_eq!(value["failed"], 1);
    }

    #[test]
    fn test_pipeline_empty_input() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = setup(&temp, "");

        let stats = Pipeline::with_client(config, FakeClient).unwrap().run().unwrap();
        assert_eq!(stats.submitted, 0);
        assert!(stats.is_complete_success());
    }
}
