//! Cooperative, poll-driven operation handles. Nothing here spawns threads:
//! whoever holds a handle drives it by calling `poll` until it is ready.

use crate::models::error::SError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::task::Poll;

/// Errors are shared between every clone of a handle.
pub type OperationError = Arc<SError>;
pub type OperationResult<T> = Result<T, OperationError>;

type Step<T> = Box<dyn FnMut() -> Poll<OperationResult<T>> + Send>;

enum OperationState<T> {
    Pending(Step<T>),
    Finished(OperationResult<T>),
}

/// Clonable handle to one in-flight or finished operation. Clones observe the
/// same state, so a second requester can be handed the handle already running.
pub struct Operation<T>(Arc<Mutex<OperationState<T>>>);

impl<T> Clone for Operation<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Clone + Send + 'static> Operation<T> {
    pub fn completed(value: T) -> Self {
        Self::finished(Ok(value))
    }

    pub fn faulted(error: SError) -> Self {
        Self::finished(Err(Arc::new(error)))
    }

    pub fn finished(result: OperationResult<T>) -> Self {
        Self(Arc::new(Mutex::new(OperationState::Finished(result))))
    }

    /// Wraps a step function; it is called on each `poll` until it returns `Ready`.
    pub fn from_poll<F>(step: F) -> Self
    where
        F: FnMut() -> Poll<OperationResult<T>> + Send + 'static,
    {
        Self(Arc::new(Mutex::new(OperationState::Pending(Box::new(step)))))
    }

    pub fn poll(&self) -> Poll<OperationResult<T>> {
        let mut state = self.0.lock();
        if let OperationState::Pending(step) = &mut *state {
            match step() {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(result) => *state = OperationState::Finished(result),
            }
        }
        match &*state {
            OperationState::Finished(result) => Poll::Ready(result.clone()),
            OperationState::Pending(_) => Poll::Pending,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(*self.0.lock(), OperationState::Finished(_))
    }

    /// Polls until ready, yielding the thread between polls.
    pub fn wait(&self) -> OperationResult<T> {
        loop {
            if let Poll::Ready(result) = self.poll() {
                return result;
            }
            std::thread::yield_now();
        }
    }

    /// Continues with `f` once this operation succeeds.
    pub fn then<U, F>(self, f: F) -> Operation<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> OperationResult<U> + Send + 'static,
    {
        let mut f = Some(f);
        Operation::from_poll(move || match self.poll() {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Ready(Ok(value)) => match f.take() {
                Some(f) => Poll::Ready(f(value)),
                None => Poll::Ready(Err(Arc::new(SError::InvalidState(
                    "continuation already ran".to_string(),
                )))),
            },
        })
    }

    pub fn same_as(&self, other: &Operation<T>) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_runs_until_ready_then_sticks() {
        let mut remaining = 2;
        let op = Operation::from_poll(move || {
            if remaining == 0 {
                Poll::Ready(Ok(7))
            } else {
                remaining -= 1;
                Poll::Pending
            }
        });
        let other = op.clone();
        assert!(op.poll().is_pending());
        assert!(other.poll().is_pending());
        assert!(!op.is_done());
        assert_eq!(op.wait().unwrap(), 7);
        assert!(other.is_done());
        assert!(other.same_as(&op));
        assert_eq!(other.wait().unwrap(), 7);
    }

    #[test]
    fn then_chains_and_propagates_faults() {
        let doubled = Operation::completed(21).then(|v| Ok(v * 2));
        assert_eq!(doubled.wait().unwrap(), 42);

        let failed: Operation<i32> =
            Operation::<i32>::faulted(SError::HostError("boom".into())).then(|v| Ok(v + 1));
        assert!(matches!(*failed.wait().unwrap_err(), SError::HostError(_)));
    }
}
