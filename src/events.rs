use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;

use crate::context::ExecutionContext;
use crate::error::Error;
use crate::outcome::Outcome;
use crate::scheduler::Scheduler;

/// Snapshot handed to listener callbacks.
#[derive(Debug, Clone)]
pub struct Event<T, E> {
    pub result: Option<T>,
    pub failure: Option<Error<E>>,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl<T: Clone, E: Clone> Event<T, E> {
    pub(crate) fn new(
        outcome: &Outcome<T, E>,
        ctx: &ExecutionContext<T, E>,
        elapsed: Duration,
    ) -> Self {
        Self {
            result: outcome.value().cloned(),
            failure: outcome.failure().cloned(),
            attempts: ctx.attempts(),
            elapsed,
        }
    }
}

pub(crate) type Callback<T, E> = Arc<dyn Fn(&Event<T, E>) + Send + Sync>;

/// How a listener runs relative to the thread publishing the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Inline,
    Scheduled,
}

#[derive(Clone)]
pub(crate) struct Entry<T, E> {
    callback: Callback<T, E>,
    dispatch: Dispatch,
}

impl<T, E> Entry<T, E> {
    pub(crate) fn new(callback: Callback<T, E>, dispatch: Dispatch) -> Self {
        Self { callback, dispatch }
    }

    pub(crate) fn inline(callback: impl Fn(&Event<T, E>) + Send + Sync + 'static) -> Self {
        Self::new(Arc::new(callback), Dispatch::Inline)
    }

    pub(crate) fn scheduled(callback: impl Fn(&Event<T, E>) + Send + Sync + 'static) -> Self {
        Self::new(Arc::new(callback), Dispatch::Scheduled)
    }
}

/// Terminal classification of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Terminal {
    Success,
    Failure,
}

/// Listener callbacks configured on a pipeline, per category.
#[derive(Clone)]
pub(crate) struct ListenerSet<T, E> {
    pub(crate) complete: Vec<Entry<T, E>>,
    pub(crate) success: Vec<Entry<T, E>>,
    pub(crate) failure: Vec<Entry<T, E>>,
    pub(crate) failed_attempt: Vec<Entry<T, E>>,
    pub(crate) retry: Vec<Entry<T, E>>,
}

impl<T, E> ListenerSet<T, E> {
    pub(crate) fn new() -> Self {
        Self {
            complete: Vec::new(),
            success: Vec::new(),
            failure: Vec::new(),
            failed_attempt: Vec::new(),
            retry: Vec::new(),
        }
    }
}

struct RegistryInner<T, E> {
    set: ListenerSet<T, E>,
    /// Stored on first terminal publication; later terminal
    /// registrations fire immediately against it.
    terminal: Option<(Terminal, Event<T, E>)>,
}

/// Per-execution listener registry.
///
/// Terminal listeners fire exactly once per execution; the terminal
/// event is stored before any callback snapshot is taken so a
/// registration racing the publication either gets snapshotted or sees
/// the stored event, never neither.
pub(crate) struct Listeners<T, E> {
    inner: Mutex<RegistryInner<T, E>>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl<T, E> Listeners<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(set: ListenerSet<T, E>, scheduler: Option<Arc<dyn Scheduler>>) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                set,
                terminal: None,
            }),
            scheduler,
        }
    }

    fn dispatch(&self, entries: &[Entry<T, E>], event: &Event<T, E>) {
        for entry in entries {
            match (entry.dispatch, &self.scheduler) {
                (Dispatch::Scheduled, Some(scheduler)) => {
                    let callback = entry.callback.clone();
                    let event = event.clone();
                    scheduler.schedule(
                        Duration::ZERO,
                        async move { callback(&event) }.boxed(),
                    );
                }
                // without a scheduler (sync mode) deferral degrades to inline
                _ => (entry.callback)(event),
            }
        }
    }

    pub(crate) fn failed_attempt(&self, event: &Event<T, E>) {
        let entries = self.inner.lock().set.failed_attempt.clone();
        self.dispatch(&entries, event);
    }

    pub(crate) fn retry(&self, event: &Event<T, E>) {
        let entries = self.inner.lock().set.retry.clone();
        self.dispatch(&entries, event);
    }

    /// Publishes the terminal classification; only the first call fires.
    pub(crate) fn terminal(&self, kind: Terminal, event: Event<T, E>) {
        let (specific, complete) = {
            let mut inner = self.inner.lock();
            if inner.terminal.is_some() {
                return;
            }
            inner.terminal = Some((kind, event.clone()));
            let specific = match kind {
                Terminal::Success => inner.set.success.clone(),
                Terminal::Failure => inner.set.failure.clone(),
            };
            (specific, inner.set.complete.clone())
        };
        self.dispatch(&specific, &event);
        self.dispatch(&complete, &event);
    }

    /// Registers a terminal listener after the execution started. Fires
    /// immediately when the matching terminal outcome was already
    /// published (`kind` of `None` matches either classification).
    pub(crate) fn add_terminal(&self, kind: Option<Terminal>, entry: Entry<T, E>) {
        let fire = {
            let mut inner = self.inner.lock();
            match &inner.terminal {
                Some((published, event)) => {
                    if kind.is_none_or(|k| k == *published) {
                        Some(event.clone())
                    } else {
                        None
                    }
                }
                None => {
                    match kind {
                        None => inner.set.complete.push(entry.clone()),
                        Some(Terminal::Success) => inner.set.success.push(entry.clone()),
                        Some(Terminal::Failure) => inner.set.failure.push(entry.clone()),
                    }
                    return;
                }
            }
        };
        if let Some(event) = fire {
            self.dispatch(std::slice::from_ref(&entry), &event);
        }
    }
}
