//! Join discipline: accumulates scalar items from a single input channel into
//! size-bounded batches, flushing on size or timeout.
//!
//! See [`Unite`](crate::unite::Unite) for the sibling discipline that
//! accumulates pre-formed batches instead of scalar items.

use crate::batch::Batch;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Error types for join discipline construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JoinError {
    /// No input channel was specified.
    #[error("input channel was not specified")]
    MissingInput,
    /// `join_size` was zero.
    #[error("join size is zero")]
    InvalidJoinSize,
}

/// Options for constructing a [`Join`] discipline.
pub struct JoinConfig<T> {
    /// Input channel of scalar items. Closing the matching `Sender` is
    /// necessary and sufficient to terminate the discipline.
    pub input: Option<mpsc::Receiver<T>>,
    /// Maximum size of an output batch.
    pub join_size: u64,
    /// If `true`, the accumulated buffer is handed to the consumer directly
    /// (wrapped in a [`Batch`] that must be released); if `false`, a clone is
    /// emitted and the buffer is reused immediately.
    pub no_copy: bool,
    /// Maximum time to wait for a batch to fill before flushing a partial
    /// one. `None` (or any duration normalized to it) means wait forever.
    pub timeout: Option<Duration>,
}

impl<T> JoinConfig<T> {
    /// Creates a config with `no_copy = false` and no timeout.
    pub fn new(input: mpsc::Receiver<T>, join_size: u64) -> Self {
        Self {
            input: Some(input),
            join_size,
            no_copy: false,
            timeout: None,
        }
    }

    /// Builder method enabling `no_copy` mode.
    #[must_use]
    pub fn with_no_copy(mut self, no_copy: bool) -> Self {
        self.no_copy = no_copy;
        self
    }

    /// Builder method setting the flush timeout. A non-positive duration
    /// means no timeout, mirrored here by passing `None`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|d| !d.is_zero());
        self
    }

    fn validate(&self) -> Result<(), JoinError> {
        if self.input.is_none() {
            return Err(JoinError::MissingInput);
        }

        if self.join_size == 0 {
            return Err(JoinError::InvalidJoinSize);
        }

        Ok(())
    }
}

/// Join discipline: see the [module docs](self).
pub struct Join<T> {
    output: mpsc::Receiver<Batch<T>>,
    worker: JoinHandle<()>,
}

impl<T: Send + 'static> Join<T> {
    /// Validates `config` and spawns the discipline's worker task.
    pub fn new(config: JoinConfig<T>) -> Result<Self, JoinError> {
        config.validate()?;

        let input = config.input.unwrap();
        let output_capacity = 1 + input.max_capacity();
        let (output_tx, output_rx) = mpsc::channel(output_capacity);

        let state = Worker {
            input,
            join_size: config.join_size,
            no_copy: config.no_copy,
            timeout: config.timeout,
            output: output_tx,
        };

        let worker = tokio::spawn(state.run());

        Ok(Self {
            output: output_rx,
            worker,
        })
    }

    /// Returns the output channel. Iteration ends when `recv()` yields
    /// `None`, which happens once the discipline has terminated.
    pub fn output(&mut self) -> &mut mpsc::Receiver<Batch<T>> {
        &mut self.output
    }

    /// Consumes `self`, returning the output channel by value.
    pub fn into_output(self) -> mpsc::Receiver<Batch<T>> {
        self.output
    }

    /// Waits for the worker task to finish. Mainly useful in tests; normal
    /// callers terminate the discipline by closing the input and draining
    /// [`output`](Join::output) until it closes.
    pub async fn join(self) {
        let _ = self.worker.await;
    }
}

struct Worker<T> {
    input: mpsc::Receiver<T>,
    join_size: u64,
    no_copy: bool,
    timeout: Option<Duration>,
    output: mpsc::Sender<Batch<T>>,
}

impl<T: Send + 'static> Worker<T> {
    async fn run(mut self) {
        let mut buffer: Vec<T> = Vec::with_capacity(self.join_size as usize);
        let mut deadline: Option<Instant> = None;

        loop {
            let received = match deadline {
                Some(dl) => {
                    tokio::select! {
                        item = self.input.recv() => item,
                        () = tokio::time::sleep_until(dl) => {
                            self.flush(&mut buffer).await;
                            deadline = None;
                            continue;
                        }
                    }
                }
                None => self.input.recv().await,
            };

            match received {
                Some(item) => {
                    buffer.push(item);

                    if buffer.len() as u64 >= self.join_size {
                        self.flush(&mut buffer).await;
                        deadline = None;
                    } else if deadline.is_none() {
                        if let Some(timeout) = self.timeout {
                            deadline = Some(Instant::now() + timeout);
                        }
                    }
                }
                None => {
                    self.flush(&mut buffer).await;
                    return;
                }
            }
        }
    }

    async fn flush(&mut self, buffer: &mut Vec<T>) {
        if buffer.is_empty() {
            return;
        }

        let items = std::mem::replace(buffer, Vec::with_capacity(self.join_size as usize));

        let batch = if self.no_copy {
            let (tx, rx) = oneshot::channel();
            let batch = Batch::lent(items, tx);
            if self.output.send(batch).await.is_err() {
                return;
            }
            let _ = rx.await;
            return;
        } else {
            Batch::owned(items)
        };

        let _ = self.output.send(batch).await;
    }
}
