//! Rate limiter: paces a single stream to at most `quantity` items per
//! `interval`.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A pacing target: "at most `quantity` items pass per `interval`".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    pub interval: Duration,
    pub quantity: u64,
}

impl Rate {
    pub fn new(interval: Duration, quantity: u64) -> Self {
        Self { interval, quantity }
    }

    fn validate(self) -> Result<(), RateLimiterError> {
        if self.interval.is_zero() {
            return Err(RateLimiterError::InvalidInterval);
        }

        if self.quantity == 0 {
            return Err(RateLimiterError::InvalidQuantity);
        }

        Ok(())
    }
}

/// Error types for rate limiter construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RateLimiterError {
    /// No input channel was specified.
    #[error("input channel was not specified")]
    MissingInput,
    /// `interval` was zero (negative durations are not representable here,
    /// so only the zero case needs rejecting).
    #[error("rate interval must be positive")]
    InvalidInterval,
    /// `quantity` was zero.
    #[error("rate quantity must be positive")]
    InvalidQuantity,
}

/// Options for constructing a [`RateLimiter`].
pub struct RateLimiterConfig<T> {
    pub input: Option<mpsc::Receiver<T>>,
    pub rate: Rate,
}

impl<T> RateLimiterConfig<T> {
    pub fn new(input: mpsc::Receiver<T>, rate: Rate) -> Self {
        Self {
            input: Some(input),
            rate,
        }
    }

    fn validate(&self) -> Result<(), RateLimiterError> {
        if self.input.is_none() {
            return Err(RateLimiterError::MissingInput);
        }

        self.rate.validate()
    }
}

/// Rate limiter discipline: see the [module docs](self).
pub struct RateLimiter<T> {
    output: mpsc::Receiver<T>,
    worker: JoinHandle<()>,
}

impl<T: Send + 'static> RateLimiter<T> {
    /// Validates `config` and spawns the discipline's worker task.
    pub fn new(config: RateLimiterConfig<T>) -> Result<Self, RateLimiterError> {
        config.validate()?;

        let input = config.input.unwrap();
        let output_capacity = 1 + input.max_capacity();
        let (output_tx, output_rx) = mpsc::channel(output_capacity);

        let worker = tokio::spawn(run(input, config.rate, output_tx));

        Ok(Self {
            output: output_rx,
            worker,
        })
    }

    /// Returns the output channel. Iteration ends when `recv()` yields
    /// `None`, which happens once the input has closed and drained.
    pub fn output(&mut self) -> &mut mpsc::Receiver<T> {
        &mut self.output
    }

    /// Consumes `self`, returning the output channel by value.
    pub fn into_output(self) -> mpsc::Receiver<T> {
        self.output
    }

    /// Waits for the worker task to finish.
    pub async fn join(self) {
        let _ = self.worker.await;
    }
}

async fn run<T: Send + 'static>(
    mut input: mpsc::Receiver<T>,
    rate: Rate,
    output: mpsc::Sender<T>,
) {
    let start = Instant::now();
    let mut count: u64 = 0;

    while let Some(item) = input.recv().await {
        if output.send(item).await.is_err() {
            return;
        }
        count += 1;

        // Only every quantity-th forwarded item carries a post-delay; a
        // trailing partial group (input closes mid-group) is emitted
        // immediately, with no delay for the short group.
        if count % rate.quantity == 0 {
            let multiplier = count / rate.quantity;
            let delay = rate
                .interval
                .checked_mul(u32::try_from(multiplier).unwrap_or(u32::MAX))
                .unwrap_or(Duration::MAX);
            let ideal = start + delay;

            let now = Instant::now();
            if ideal > now {
                tokio::time::sleep_until(ideal).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_zero_interval() {
        let (_tx, rx) = mpsc::channel::<u32>(4);
        let err = RateLimiter::new(RateLimiterConfig::new(rx, Rate::new(Duration::ZERO, 1)))
            .unwrap_err();
        assert_eq!(err, RateLimiterError::InvalidInterval);
    }

    #[tokio::test]
    async fn rejects_zero_quantity() {
        let (_tx, rx) = mpsc::channel::<u32>(4);
        let err = RateLimiter::new(RateLimiterConfig::new(
            rx,
            Rate::new(Duration::from_secs(1), 0),
        ))
        .unwrap_err();
        assert_eq!(err, RateLimiterError::InvalidQuantity);
    }

    #[tokio::test]
    async fn preserves_order_and_length() {
        let (tx, rx) = mpsc::channel(32);
        let mut limiter = RateLimiter::new(RateLimiterConfig::new(
            rx,
            Rate::new(Duration::from_millis(1), 3),
        ))
        .unwrap();

        tokio::spawn(async move {
            for i in 1..=10u32 {
                tx.send(i).await.unwrap();
            }
        });

        let mut out = Vec::new();
        while let Some(item) = limiter.output().recv().await {
            out.push(item);
        }

        assert_eq!(out, (1..=10).collect::<Vec<_>>());
    }

    // Scenario 5: Rate={1s, 1}, input = [1..10] -> total duration in
    // [9.9s, 10.1s].
    #[tokio::test(start_paused = true)]
    async fn paces_one_item_per_second() {
        let (tx, rx) = mpsc::channel(16);
        let mut limiter = RateLimiter::new(RateLimiterConfig::new(
            rx,
            Rate::new(Duration::from_secs(1), 1),
        ))
        .unwrap();

        tokio::spawn(async move {
            for i in 1..=10u32 {
                tx.send(i).await.unwrap();
            }
        });

        let start = Instant::now();
        let mut out = Vec::new();
        while let Some(item) = limiter.output().recv().await {
            out.push(item);
        }
        let elapsed = start.elapsed();

        assert_eq!(out, (1..=10).collect::<Vec<_>>());
        assert!(elapsed >= Duration::from_millis(9_900));
        assert!(elapsed <= Duration::from_millis(10_100));
    }
}
