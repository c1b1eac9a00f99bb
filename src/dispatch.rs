use crate::{client::Completion, error::Result};
use std::{
    collections::VecDeque,
    sync::{mpsc, Arc, Mutex, PoisonError},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, trace};

/// One prompt paired with the shared instruction.
///
/// The record travels to a worker and comes back inside its [`Outcome`],
/// so no side table is needed to find the prompt a result belongs to.
#[derive(Debug, Clone)]
pub struct UnitOfWork {
    /// Position of the prompt in the input (0-based)
    pub index: usize,

    /// Prompt text, also the seed of the document name
    pub prompt: String,

    /// Shared system instruction
    pub instruction: Arc<str>,
}

impl UnitOfWork {
    /// Pairs every prompt with the same instruction, keeping input order.
    #[must_use]
    pub fn batch(prompts: Vec<String>, instruction: &str) -> Vec<Self> {
        let instruction: Arc<str> = Arc::from(instruction);
        prompts
            .into_iter()
            .enumerate()
            .map(|(index, prompt)| Self {
                index,
                prompt,
                instruction: Arc::clone(&instruction),
            })
            .collect()
    }
}

/// Terminal state of a unit of work.
#[derive(Debug)]
pub struct Outcome {
    /// The unit that was processed
    pub unit: UnitOfWork,

    /// Generated text, or the reason there is none
    pub result: Result<String>,

    /// Time spent in the completion call
    pub elapsed: Duration,
}

/// Runs completion calls on a fixed number of worker threads.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    workers: usize,
}

impl Dispatcher {
    /// Creates a dispatcher with the given pool size (at least one worker).
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Returns the pool size.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Dispatches every unit and hands each outcome to `handle` as soon as
    /// it is ready.
    ///
    /// At most [`workers`](Self::workers) completion calls run at once.
    /// Outcomes arrive in completion order. `handle` runs on the calling
    /// thread, and the call returns only after every unit has reached a
    /// terminal state. A failed unit never stops the others.
    ///
    /// Returns the number of outcomes delivered.
    pub fn run<C, F>(&self, client: &C, units: Vec<UnitOfWork>, mut handle: F) -> usize
    where
        C: Completion + ?Sized,
        F: FnMut(Outcome),
    {
        let total = units.len();
        if total == 0 {
            return 0;
        }

        let pool_size = self.workers.min(total);
        debug!("Dispatching {total} unit(s) on {pool_size} worker(s)");

        let queue = Mutex::new(VecDeque::from(units));
        let (tx, rx) = mpsc::channel::<Outcome>();
        let mut delivered = 0;

        thread::scope(|scope| {
            for worker in 0..pool_size {
                let tx = tx.clone();
                let queue = &queue;
                scope.spawn(move || {
                    loop {
                        let next = queue
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .pop_front();
                        let Some(unit) = next else { break };

                        trace!("Worker {worker} picked unit {}", unit.index);
                        let started = Instant::now();
                        let result = client.complete(&unit.prompt, &unit.instruction);
                        let outcome = Outcome {
                            unit,
                            result,
                            elapsed: started.elapsed(),
                        };

                        if tx.send(outcome).is_err() {
                            break;
                        }
                    }
                    trace!("Worker {worker} finished");
                });
            }

            // Only worker senders remain, so the loop ends once all of them exit.
            drop(tx);
            for outcome in rx {
                delivered += 1;
                handle(outcome);
            }
        });

        debug!("All {delivered} unit(s) reached a terminal state");
        delivered
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(2)
    }
}
