//! Scoped version overrides.
//!
//! Each thread owns a stack of `(component, version)` overrides. A manager
//! resolving its current version looks here first, innermost entry wins, and
//! only falls back to its process-wide active version when no entry names its
//! component. Entries are pushed by [`VersionGuard`] construction and removed by
//! its `Drop`, so they never outlive the scope that created them and never
//! become visible to another thread.
//!
//! Async code cannot rely on the thread's stack: a task may hop threads between
//! polls and several tasks share one worker thread. [`OverrideScope`] gives a
//! future its own stack and installs it into the thread slot only while that
//! future is being polled.

use pin_project_lite::pin_project;
use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tracing::warn;

thread_local! {
    static OVERRIDES: RefCell<OverrideStack> = RefCell::new(OverrideStack::default());
}

static NEXT_OVERRIDE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
struct OverrideEntry {
    id: u64,
    component: String,
    version: String,
}

#[derive(Debug, Clone, Default)]
struct OverrideStack {
    entries: Vec<OverrideEntry>,
}

impl OverrideStack {
    fn push(&mut self, component: &str, version: &str) -> u64 {
        let id = NEXT_OVERRIDE_ID.fetch_add(1, Ordering::Relaxed);
        self.entries.push(OverrideEntry {
            id,
            component: component.to_string(),
            version: version.to_string(),
        });
        id
    }

    /// Remove the entry with `id`, wherever it sits.
    fn remove(&mut self, id: u64) -> bool {
        match self.entries.iter().rposition(|e| e.id == id) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    fn lookup(&self, component: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.component == component)
            .map(|e| e.version.as_str())
    }
}

/// The innermost override for `component` on the calling thread or task.
pub fn active_override(component: &str) -> Option<String> {
    OVERRIDES.with(|stack| stack.borrow().lookup(component).map(str::to_string))
}

/// Number of overrides currently in effect on the calling thread or task.
pub fn override_depth() -> usize {
    OVERRIDES.with(|stack| stack.borrow().entries.len())
}

/// Releases a temporary override when dropped.
///
/// Not `Send`: the entry lives on the creating thread's stack and must be
/// removed there.
#[must_use = "the override is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct VersionGuard {
    id: u64,
    component: String,
    version: String,
    _not_send: PhantomData<*const ()>,
}

impl VersionGuard {
    pub(crate) fn enter(component: &str, version: &str) -> Self {
        let id = OVERRIDES.with(|stack| stack.borrow_mut().push(component, version));
        Self {
            id,
            component: component.to_string(),
            version: version.to_string(),
            _not_send: PhantomData,
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl Drop for VersionGuard {
    fn drop(&mut self) {
        // try_with: the guard may be dropped while thread-locals are torn down.
        let removed = OVERRIDES
            .try_with(|stack| stack.borrow_mut().remove(self.id))
            .unwrap_or(true);
        if !removed {
            warn!(
                "Override {}={} released outside the context it was entered in",
                self.component, self.version
            );
        }
    }
}

pin_project! {
    /// A future that runs with its own override stack.
    ///
    /// The stack starts as a copy of the overrides in effect where the scope was
    /// created, plus the scope's own entry. Overrides entered while the future
    /// is polled stay with the future across polls and threads.
    #[must_use = "futures do nothing unless polled"]
    pub struct OverrideScope<F> {
        #[pin]
        inner: F,
        stack: OverrideStack,
    }
}

impl<F> OverrideScope<F> {
    pub(crate) fn new(component: &str, version: &str, inner: F) -> Self {
        let mut stack = OVERRIDES.with(|s| s.borrow().clone());
        stack.push(component, version);
        Self { inner, stack }
    }
}

impl<F: Future> Future for OverrideScope<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _installed = InstalledStack::install(this.stack);
        this.inner.poll(cx)
    }
}

/// Swaps a task's stack into the thread slot, and back out on drop.
struct InstalledStack<'a> {
    slot: &'a mut OverrideStack,
}

impl<'a> InstalledStack<'a> {
    fn install(slot: &'a mut OverrideStack) -> Self {
        OVERRIDES.with(|stack| std::mem::swap(&mut *stack.borrow_mut(), slot));
        Self { slot }
    }
}

impl Drop for InstalledStack<'_> {
    fn drop(&mut self) {
        let _ = OVERRIDES.try_with(|stack| std::mem::swap(&mut *stack.borrow_mut(), self.slot));
    }
}
