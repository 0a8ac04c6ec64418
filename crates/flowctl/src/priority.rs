//! Priority discipline: multiplexes several priority-tagged input streams
//! across a fixed pool of handler slots, re-balancing occupancy every round
//! against a target computed by a [`Divider`](crate::divider::Divider).

use crate::divider::{Divider, DividerError};
use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Error types for priority discipline construction and runtime failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PriorityError {
    /// No divider was specified.
    #[error("divider was not specified")]
    DividerMissing,
    /// `handlers_quantity` was zero.
    #[error("handlers quantity is zero")]
    HandlersQuantityZero,
    /// No input channels were specified.
    #[error("no input channels were specified")]
    MissingInput,
    /// An input was registered under priority zero.
    #[error("priority zero is reserved as invalid")]
    ZeroPriority,
    /// Two inputs were registered under the same priority.
    #[error("duplicate priority in input set")]
    DuplicateInput,
    /// The strategic distribution starves at least one priority.
    #[error("handlers quantity is too small to give every priority a slot")]
    HandlersQuantityTooSmall,
    /// A runtime distribution left a useful priority with zero slots.
    #[error("divider produced an incomplete distribution at runtime")]
    DividerBad,
    /// An intermediate sum overflowed during divider arithmetic.
    #[error("arithmetic overflow while dividing")]
    ArithmeticOverflow,
}

impl From<DividerError> for PriorityError {
    fn from(err: DividerError) -> Self {
        match err {
            DividerError::ArithmeticOverflow => PriorityError::ArithmeticOverflow,
        }
    }
}

/// An item paired with the priority of the channel it arrived on.
///
/// On loan from the discipline: the consumer's hold on a handler slot ends
/// when this value is dropped or [`release`](Prioritized::release) is called
/// explicitly, whichever comes first.
pub struct Prioritized<T> {
    item: Option<T>,
    priority: u64,
    release: Option<mpsc::Sender<u64>>,
}

impl<T> Prioritized<T> {
    pub(crate) fn new(item: T, priority: u64, release: mpsc::Sender<u64>) -> Self {
        Self {
            item: Some(item),
            priority,
            release: Some(release),
        }
    }

    /// The priority this item was tagged with.
    pub fn priority(&self) -> u64 {
        self.priority
    }

    /// Marks this item's handler slot as free.
    pub fn release(mut self) {
        self.signal_release();
    }

    /// Unwraps the inner item, still releasing the slot on drop.
    pub fn into_inner(mut self) -> T {
        self.item.take().expect("item present until drop")
    }

    fn signal_release(&mut self) {
        if let Some(tx) = self.release.take() {
            let _ = tx.try_send(self.priority);
        }
    }
}

impl<T> Deref for Prioritized<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.item.as_ref().expect("item present until drop")
    }
}

impl<T> DerefMut for Prioritized<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.item.as_mut().expect("item present until drop")
    }
}

impl<T> Drop for Prioritized<T> {
    fn drop(&mut self) {
        self.signal_release();
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Prioritized<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prioritized")
            .field("item", &self.item)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Options for constructing a [`Priority`] discipline.
pub struct PriorityConfig<T> {
    pub divider: Option<Box<dyn Divider>>,
    pub handlers_quantity: u64,
    pub inputs: Vec<(u64, mpsc::Receiver<T>)>,
}

impl<T> PriorityConfig<T> {
    pub fn new(divider: impl Divider + 'static, handlers_quantity: u64) -> Self {
        Self {
            divider: Some(Box::new(divider)),
            handlers_quantity,
            inputs: Vec::new(),
        }
    }

    /// Builder method registering an input channel under `priority`.
    /// Duplicate or zero priorities are accepted here and rejected by
    /// [`Priority::new`] so that construction failure stays centralized.
    #[must_use]
    pub fn with_input(mut self, priority: u64, input: mpsc::Receiver<T>) -> Self {
        self.inputs.push((priority, input));
        self
    }

    fn validate(&self) -> Result<(), PriorityError> {
        if self.divider.is_none() {
            return Err(PriorityError::DividerMissing);
        }

        if self.handlers_quantity == 0 {
            return Err(PriorityError::HandlersQuantityZero);
        }

        if self.inputs.is_empty() {
            return Err(PriorityError::MissingInput);
        }

        let mut seen = HashSet::with_capacity(self.inputs.len());
        for &(priority, _) in &self.inputs {
            if priority == 0 {
                return Err(PriorityError::ZeroPriority);
            }
            if !seen.insert(priority) {
                return Err(PriorityError::DuplicateInput);
            }
        }

        Ok(())
    }
}

struct InputState<T> {
    receiver: mpsc::Receiver<T>,
    closed: bool,
}

/// Priority discipline: see the [module docs](self).
pub struct Priority<T> {
    output: mpsc::Receiver<Prioritized<T>>,
    err: Option<oneshot::Receiver<PriorityError>>,
    worker: JoinHandle<()>,
}

impl<T: Send + 'static> Priority<T> {
    /// Validates `config`, computes the strategic distribution, and spawns
    /// the discipline's worker task.
    pub fn new(config: PriorityConfig<T>) -> Result<Self, PriorityError> {
        config.validate()?;

        let divider = config.divider.expect("checked by validate");

        let mut priorities: Vec<u64> = config.inputs.iter().map(|(p, _)| *p).collect();
        priorities.sort_unstable_by(|a, b| b.cmp(a));

        let mut strategic = HashMap::with_capacity(priorities.len());
        divider.divide(config.handlers_quantity, &priorities, &mut strategic)?;
        if !priorities
            .iter()
            .all(|p| strategic.get(p).copied().unwrap_or(0) >= 1)
        {
            return Err(PriorityError::HandlersQuantityTooSmall);
        }

        let inputs: HashMap<u64, InputState<T>> = config
            .inputs
            .into_iter()
            .map(|(p, receiver)| {
                (
                    p,
                    InputState {
                        receiver,
                        closed: false,
                    },
                )
            })
            .collect();

        let capacity = config.handlers_quantity as usize;
        let (output_tx, output_rx) = mpsc::channel(capacity);
        let (release_tx, release_rx) = mpsc::channel(capacity);
        let (err_tx, err_rx) = oneshot::channel();

        let state = Worker {
            divider,
            handlers_quantity: config.handlers_quantity,
            priorities,
            inputs,
            strategic,
            actual: HashMap::new(),
            output: output_tx,
            release_tx,
            release_rx,
            err_tx: Some(err_tx),
        };

        let worker = tokio::spawn(state.run());

        Ok(Self {
            output: output_rx,
            err: Some(err_rx),
            worker,
        })
    }

    /// Returns the output channel. Iteration ends when `recv()` yields
    /// `None`, which happens once the discipline has terminated.
    pub fn output(&mut self) -> &mut mpsc::Receiver<Prioritized<T>> {
        &mut self.output
    }

    /// Consumes `self`, returning the output channel by value.
    pub fn into_output(self) -> mpsc::Receiver<Prioritized<T>> {
        self.output
    }

    /// Waits for at most one divider failure. Returns `None` once the error
    /// channel has closed without ever carrying a value (normal
    /// termination). Calling this more than once after it has returned
    /// always yields `None`.
    pub async fn recv_error(&mut self) -> Option<PriorityError> {
        match self.err.take() {
            Some(rx) => rx.await.ok(),
            None => None,
        }
    }

    /// Waits for the worker task to finish.
    pub async fn join(self) {
        let _ = self.worker.await;
    }
}

struct Worker<T> {
    divider: Box<dyn Divider>,
    handlers_quantity: u64,
    priorities: Vec<u64>,
    inputs: HashMap<u64, InputState<T>>,
    strategic: HashMap<u64, u64>,
    actual: HashMap<u64, u64>,
    output: mpsc::Sender<Prioritized<T>>,
    release_tx: mpsc::Sender<u64>,
    release_rx: mpsc::Receiver<u64>,
    err_tx: Option<oneshot::Sender<PriorityError>>,
}

impl<T: Send + 'static> Worker<T> {
    async fn run(self) {
        let Worker {
            divider,
            handlers_quantity,
            priorities,
            mut inputs,
            strategic,
            mut actual,
            output,
            release_tx,
            mut release_rx,
            mut err_tx,
        } = self;

        let mut failure = None;

        loop {
            match run_round(
                divider.as_ref(),
                handlers_quantity,
                &priorities,
                &strategic,
                &mut inputs,
                &mut actual,
                &output,
                &release_tx,
                &mut release_rx,
            )
            .await
            {
                Ok(true) => break,
                Ok(false) => continue,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = failure {
            if let Some(tx) = err_tx.take() {
                let _ = tx.send(err);
            }
        }

        // Close the output before draining so a blocked consumer is freed
        // promptly, then wait out every in-flight item's release.
        drop(output);
        drop(release_tx);

        while actual.values().sum::<u64>() > 0 {
            match release_rx.recv().await {
                Some(p) => release_one(&mut actual, p),
                None => break,
            }
        }
    }
}

/// Runs one scheduling round. `Ok(true)` means the discipline should
/// terminate (idle with every input closed).
#[allow(clippy::too_many_arguments)]
async fn run_round<T: Send + 'static>(
    divider: &dyn Divider,
    handlers_quantity: u64,
    priorities: &[u64],
    strategic: &HashMap<u64, u64>,
    inputs: &mut HashMap<u64, InputState<T>>,
    actual: &mut HashMap<u64, u64>,
    output: &mpsc::Sender<Prioritized<T>>,
    release_tx: &mpsc::Sender<u64>,
    release_rx: &mut mpsc::Receiver<u64>,
) -> Result<bool, PriorityError> {
    let (unachieved, mut tactic) =
        wait_fill(divider, handlers_quantity, priorities, strategic, actual, release_rx).await?;

    let mut transferred =
        transfer(&unachieved, &mut tactic, inputs, actual, output, release_tx).await;

    let useful = compute_useful(priorities, &tactic);

    if !useful.is_empty() {
        let mut operative = HashMap::with_capacity(useful.len());
        divider.divide(handlers_quantity, &useful, &mut operative)?;
        validate_operative(&useful, &operative)?;

        let (unreached, mut tactic2) = wait_fill(
            divider,
            handlers_quantity,
            &useful,
            &operative,
            actual,
            release_rx,
        )
        .await?;

        transferred += transfer(&unreached, &mut tactic2, inputs, actual, output, release_tx).await;
    }

    collect_releases(actual, release_rx);

    if transferred == 0 {
        if inputs.values().all(|input| input.closed) {
            return Ok(true);
        }
        tokio::time::sleep(Duration::from_nanos(1)).await;
    }

    Ok(false)
}

/// Validates that every priority in `useful` received at least one slot in
/// `operative`, the condition whose failure is reported as `DividerBad`.
fn validate_operative(useful: &[u64], operative: &HashMap<u64, u64>) -> Result<(), PriorityError> {
    if useful
        .iter()
        .all(|p| operative.get(p).copied().unwrap_or(0) >= 1)
    {
        Ok(())
    } else {
        Err(PriorityError::DividerBad)
    }
}

fn vacant(handlers_quantity: u64, actual: &HashMap<u64, u64>) -> u64 {
    handlers_quantity.saturating_sub(actual.values().sum())
}

fn below_target(order: &[u64], target: &HashMap<u64, u64>, actual: &HashMap<u64, u64>) -> Vec<u64> {
    order
        .iter()
        .copied()
        .filter(|p| actual.get(p).copied().unwrap_or(0) < target.get(p).copied().unwrap_or(0))
        .collect()
}

fn compute_useful(priorities: &[u64], tactic: &HashMap<u64, u64>) -> Vec<u64> {
    priorities
        .iter()
        .copied()
        .filter(|p| tactic.get(p).copied().unwrap_or(0) == 0)
        .collect()
}

fn release_one(actual: &mut HashMap<u64, u64>, priority: u64) {
    if let Some(count) = actual.get_mut(&priority) {
        *count = count.saturating_sub(1);
    }
}

fn collect_releases(actual: &mut HashMap<u64, u64>, release_rx: &mut mpsc::Receiver<u64>) {
    while let Ok(priority) = release_rx.try_recv() {
        release_one(actual, priority);
    }
}

/// Waits, re-dividing `vacant` handler slots across whichever of `order`'s
/// priorities sit below `target`, until either every candidate has a
/// non-zero allowance or there is nothing left to fill.
async fn wait_fill(
    divider: &dyn Divider,
    handlers_quantity: u64,
    order: &[u64],
    target: &HashMap<u64, u64>,
    actual: &mut HashMap<u64, u64>,
    release_rx: &mut mpsc::Receiver<u64>,
) -> Result<(Vec<u64>, HashMap<u64, u64>), PriorityError> {
    loop {
        let vac = vacant(handlers_quantity, actual);
        let candidates = below_target(order, target, actual);

        if vac == 0 || candidates.is_empty() {
            return Ok((candidates, HashMap::new()));
        }

        let mut tactic = HashMap::with_capacity(candidates.len());
        divider.divide(vac, &candidates, &mut tactic)?;

        if candidates
            .iter()
            .all(|p| tactic.get(p).copied().unwrap_or(0) >= 1)
        {
            return Ok((candidates, tactic));
        }

        match release_rx.recv().await {
            Some(p) => release_one(actual, p),
            None => return Ok((candidates, tactic)),
        }
    }
}

/// Consumes non-blockingly from every priority in `set` up to its `tactic`
/// allowance, emitting each received item and decrementing `tactic` in
/// place. Returns the count of items transferred this call.
async fn transfer<T: Send + 'static>(
    set: &[u64],
    tactic: &mut HashMap<u64, u64>,
    inputs: &mut HashMap<u64, InputState<T>>,
    actual: &mut HashMap<u64, u64>,
    output: &mpsc::Sender<Prioritized<T>>,
    release_tx: &mpsc::Sender<u64>,
) -> u64 {
    let mut transferred = 0u64;

    for &p in set {
        loop {
            let remaining = tactic.get(&p).copied().unwrap_or(0);
            if remaining == 0 {
                break;
            }

            let input = match inputs.get_mut(&p) {
                Some(input) => input,
                None => break,
            };

            if input.closed {
                break;
            }

            match input.receiver.try_recv() {
                Ok(item) => {
                    let prioritized = Prioritized::new(item, p, release_tx.clone());
                    if output.send(prioritized).await.is_err() {
                        return transferred;
                    }
                    *actual.entry(p).or_insert(0) += 1;
                    *tactic.get_mut(&p).expect("just read") -= 1;
                    transferred += 1;
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    input.closed = true;
                    break;
                }
            }
        }
    }

    transferred
}
