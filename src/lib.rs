//! # prompt-docs
//!
//! Sends a batch of prompts to a chat-completion model and saves every
//! answer as a Word document.
//!
//! ## Features
//!
//! - Prompts read from the first column of a CSV file
//! - One shared system instruction for the whole batch
//! - Bounded worker pool, results handled in completion order
//! - Per-prompt failure isolation: one failed request never stops the batch
//! - Atomic document writes with a configurable collision policy
//!
//! ## Quick Start
//!
//! ```no_run
//! use prompt_docs::{Config, Pipeline, Settings};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = Config::builder()
//!     .settings(Settings::load("config.toml")?)
//!     .input_path("input.csv")
//!     .instruction_path("system_prompt.txt")
//!     .output_dir("articles")
//!     .workers(2)
//!     .build()?;
//!
//! let stats = Pipeline::new(config)?.run()?;
//! stats.print_summary();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! 1. **Input**: Reads prompts and the system instruction
//! 2. **Dispatcher**: Runs completion calls on a fixed pool of workers
//! 3. **Client**: Talks to an OpenAI-compatible chat completions API
//! 4. **Writer**: Sanitizes names and persists documents

#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]

mod client;
mod config;
mod dispatch;
mod error;
mod pipeline;
mod writer;

pub mod docx;
pub mod input;

pub use client::{ChatClient, ChatMessage, Completion, Role};
pub use config::{ApiKey, CollisionPolicy, Config, ConfigBuilder, ServiceSettings, Settings};
pub use dispatch::{Dispatcher, Outcome, UnitOfWork};
pub use error::{Error, Result};
pub use pipeline::{BatchStats, DocumentRecord, Failure, Pipeline};
pub use writer::{sanitize_file_name, Writer};

/// Runs a complete batch with the given configuration.
///
/// This is the main entry point for the library.
///
/// # Errors
///
/// Returns an error if:
/// - Configuration is invalid
/// - The input or instruction file is missing or malformed
/// - The summary file cannot be written
///
/// Failures of individual prompts are reported in the returned
/// [`BatchStats`], not as an error.
pub fn run(config: Config) -> Result<BatchStats> {
    Pipeline::new(config)?.run()
}
