//! Ambient, thread-scoped log properties.
//!
//! ```ignore
//! let _guard = LogContext::push_property("RequestId", "r-118");
//! logger.information("Handling request", values![]); // carries RequestId
//! ```
//!
//! Events capture the calling thread's stack when they are created. The
//! `FromLogContext` enricher later copies those captures into the event's
//! properties on the dispatcher thread.

use std::cell::RefCell;
use std::marker::PhantomData;

use crate::value::Value;

thread_local! {
    static STACK: RefCell<Vec<(String, Value)>> = const { RefCell::new(Vec::new()) };
}

/// Entry point for pushing ambient properties.
pub struct LogContext;

impl LogContext {
    /// Push a property for the current thread until the guard is dropped.
    pub fn push_property(name: impl Into<String>, value: impl Into<Value>) -> ContextGuard {
        let depth = STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push((name.into(), value.into()));
            stack.len() - 1
        });
        ContextGuard {
            depth,
            _not_send: PhantomData,
        }
    }

    /// Copy of the current thread's properties, outermost first.
    pub fn snapshot() -> Vec<(String, Value)> {
        STACK
            .try_with(|stack| stack.borrow().clone())
            .unwrap_or_default()
    }
}

/// Pops its property (and anything pushed after it) when dropped.
///
/// Guards are tied to the thread that created them.
#[must_use = "the property is removed as soon as the guard is dropped"]
pub struct ContextGuard {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let _ = STACK.try_with(|stack| stack.borrow_mut().truncate(self.depth));
    }
}
