//! Suspend/resume primitive for procedures that span multiple host ticks
//!
//! A procedure that has to wait for a condition cannot block the tick thread,
//! so it returns a [`Continuation`] capturing its resume point instead. The
//! caller re-runs the continuation on a later tick. Each run either completes
//! or hands back a single replacement continuation; the original is consumed
//! either way.

use anyhow::Result;

/// Outcome of running a continuation: either a terminal result or a
/// replacement continuation that takes over the remaining work.
pub enum Step<T> {
    Done(T),
    Yield(Continuation<T>),
}

/// A resumable unit of work. Wraps a function plus the arguments it needs to
/// resume, captured by value at construction time. Running consumes the
/// continuation, so completed work can never be re-executed.
pub struct Continuation<T> {
    f: Box<dyn FnOnce() -> Result<Step<T>> + Send>,
}

/// Continuation for procedures that produce no value.
pub type VoidContinuation = Continuation<()>;

impl<T> Continuation<T> {
    pub fn new(f: impl FnOnce() -> Result<Step<T>> + Send + 'static) -> Self {
        Self { f: Box::new(f) }
    }

    /// Convenience constructor for a continuation that completes immediately.
    pub fn done(value: T) -> Self
    where
        T: Send + 'static,
    {
        Self::new(move || Ok(Step::Done(value)))
    }

    /// Runs the captured function once. `Ok(Step::Yield(next))` transfers
    /// ownership of the remaining work to `next`.
    pub fn run(self) -> Result<Step<T>> {
        (self.f)()
    }
}

impl<T> std::fmt::Debug for Continuation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Continuation")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sum_step(n: u32, sum: u32, calls: Arc<AtomicUsize>) -> Result<Step<u32>> {
        calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            Ok(Step::Done(sum))
        } else {
            Ok(Step::Yield(Continuation::new(move || {
                sum_step(n - 1, sum + n, calls)
            })))
        }
    }

    #[test]
    fn completes_immediately() {
        let c = Continuation::done(42);
        match c.run().unwrap() {
            Step::Done(v) => assert_eq!(v, 42),
            Step::Yield(_) => panic!("expected completion"),
        }
    }

    #[test]
    fn yields_until_done() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let mut c = Continuation::new(move || sum_step(10, 0, calls2));
        let result = loop {
            match c.run().unwrap() {
                Step::Done(v) => break v,
                Step::Yield(next) => c = next,
            }
        };
        assert_eq!(result, 55);
        // One call per yield plus the final completing call
        assert_eq!(calls.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn void_shape() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let c: VoidContinuation = Continuation::new(move || {
            let ran3 = ran2.clone();
            Ok(Step::Yield(Continuation::new(move || {
                ran3.fetch_add(1, Ordering::SeqCst);
                Ok(Step::Done(()))
            })))
        });
        let Step::Yield(next) = c.run().unwrap() else {
            panic!("expected yield");
        };
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        let Step::Done(()) = next.run().unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn propagates_errors() {
        let c: Continuation<()> = Continuation::new(|| anyhow::bail!("step failed"));
        assert_eq!(c.run().err().unwrap().to_string(), "step failed");
    }
}
