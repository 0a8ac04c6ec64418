//! The RAII handle lent to consumers of [`crate::join::Join`] and
//! [`crate::unite::Unite`] batches.
//!
//! When a discipline is configured with `no_copy = false`, batches are plain
//! owned `Vec<T>` wrapped in a [`Batch`] whose release is a no-op — matching
//! the original design's observation that calling `Release()` is harmless
//! even when it isn't required. When `no_copy = true`, dropping (or
//! explicitly [`Batch::release`]ing) the handle is what lets the discipline
//! reuse or reallocate its internal buffer for the next batch.

use std::ops::{Deref, DerefMut};
use tokio::sync::oneshot;

/// A batch of accumulated items, on loan from the discipline that emitted it.
///
/// Dereferences to `Vec<T>`. The loan ends — freeing the discipline to build
/// its next batch — when this value is dropped or [`release`](Batch::release)
/// is called explicitly, whichever happens first.
pub struct Batch<T> {
    items: Vec<T>,
    release: Option<oneshot::Sender<()>>,
}

impl<T> Batch<T> {
    pub(crate) fn owned(items: Vec<T>) -> Self {
        Self {
            items,
            release: None,
        }
    }

    pub(crate) fn lent(items: Vec<T>, release: oneshot::Sender<()>) -> Self {
        Self {
            items,
            release: Some(release),
        }
    }

    /// Marks this batch as no longer in use.
    ///
    /// A no-op if the discipline that produced this batch was not configured
    /// with `no_copy`. Idempotent: calling it again, or letting the value
    /// drop afterward, has no further effect.
    pub fn release(mut self) {
        self.signal_release();
    }

    /// Unwraps the inner `Vec<T>`, still releasing the loan on drop.
    pub fn into_inner(self) -> Vec<T> {
        // Implemented via Deref-friendly field extraction rather than
        // destructuring, since `Batch` implements `Drop`.
        let mut this = self;
        std::mem::take(&mut this.items)
    }

    fn signal_release(&mut self) {
        if let Some(tx) = self.release.take() {
            let _ = tx.send(());
        }
    }
}

impl<T> Deref for Batch<T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Self::Target {
        &self.items
    }
}

impl<T> DerefMut for Batch<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.items
    }
}

impl<T> Drop for Batch<T> {
    fn drop(&mut self) {
        self.signal_release();
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Batch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch").field("items", &self.items).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_batch_releases_as_no_op() {
        let batch = Batch::owned(vec![1, 2, 3]);
        assert_eq!(&*batch, &[1, 2, 3]);
        batch.release();
    }

    #[tokio::test]
    async fn lent_batch_signals_on_drop() {
        let (tx, rx) = oneshot::channel();
        let batch = Batch::lent(vec![1, 2, 3], tx);
        drop(batch);
        rx.await.expect("release signal should arrive on drop");
    }

    #[tokio::test]
    async fn lent_batch_signals_on_explicit_release() {
        let (tx, rx) = oneshot::channel();
        let batch = Batch::lent(vec![1, 2, 3], tx);
        batch.release();
        rx.await.expect("release signal should arrive on explicit release");
    }

    #[tokio::test]
    async fn into_inner_still_releases() {
        let (tx, rx) = oneshot::channel();
        let batch = Batch::lent(vec![1, 2, 3], tx);
        let items = batch.into_inner();
        assert_eq!(items, vec![1, 2, 3]);
        rx.await.expect("release signal should arrive after into_inner");
    }
}
