//! Utilities related to destructors and drop.

/// Drop guard returned by [`defer`].
#[must_use = "`Defer` should be assigned to a variable, or it will be dropped immediately"]
pub struct Defer<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for Defer<F> {
    fn drop(&mut self) {
        if let Some(cb) = self.0.take() {
            cb();
        }
    }
}

/// Returns a value that runs `cb` when dropped, including during unwinding.
pub fn defer<F: FnOnce()>(cb: F) -> Defer<F> {
    Defer(Some(cb))
}

#[cfg(test)]
mod tests {
    use std::{
        panic,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[test]
    fn runs_on_scope_exit() {
        let count = AtomicUsize::new(0);
        {
            let _guard = defer(|| {
                count.fetch_add(1, Ordering::Relaxed);
            });
            assert_eq!(count.load(Ordering::Relaxed), 0);
        }
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn runs_on_unwind() {
        let count = AtomicUsize::new(0);
        let result = panic::catch_unwind(|| {
            let _guard = defer(|| {
                count.fetch_add(1, Ordering::Relaxed);
            });
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
