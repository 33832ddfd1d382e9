//! Action-keyed listener registry.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde_json::Value;

/// Error type listeners may return to report a failure.
pub type ListenerError = Box<dyn StdError + Send + Sync + 'static>;

type Listener = Arc<dyn Fn(Option<&Value>) -> Result<(), ListenerError> + Send + Sync>;

/// Return types accepted from listener closures.
///
/// Listeners may return `()` or any `Result<(), E>` whose error converts into
/// [`ListenerError`].
pub trait ListenerOutcome {
    fn into_outcome(self) -> Result<(), ListenerError>;
}

impl ListenerOutcome for () {
    fn into_outcome(self) -> Result<(), ListenerError> {
        Ok(())
    }
}

impl<E: Into<ListenerError>> ListenerOutcome for Result<(), E> {
    fn into_outcome(self) -> Result<(), ListenerError> {
        self.map_err(Into::into)
    }
}

/// Summary of one [`Registry::dispatch`] call.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dispatch {
    /// Listeners that were invoked
    pub invoked: usize,
    /// Listeners that returned an error or panicked
    pub failed: usize,
}

/// Maps action names to listeners, invoked in registration order.
#[derive(Default)]
pub struct Registry {
    listeners: HashMap<String, Vec<Listener>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `listener` to the listeners of `action`.
    pub fn register<A, F, R>(&mut self, action: A, listener: F)
    where
        A: Into<String>,
        F: Fn(Option<&Value>) -> R + Send + Sync + 'static,
        R: ListenerOutcome,
    {
        let listener: Listener =
            Arc::new(move |payload: Option<&Value>| listener(payload).into_outcome());
        self.listeners
            .entry(action.into())
            .or_default()
            .push(listener);
    }

    #[must_use]
    pub fn has_listeners(&self, action: &str) -> bool {
        self.listeners.get(action).is_some_and(|l| !l.is_empty())
    }

    /// Invoke every listener of `action` with `payload`.
    ///
    /// A listener that fails or panics is logged and skipped; the remaining
    /// listeners still run.
    pub fn dispatch(&self, action: &str, payload: Option<&Value>) -> Dispatch {
        let mut outcome = Dispatch::default();
        let Some(listeners) = self.listeners.get(action) else {
            return outcome;
        };

        for (index, listener) in listeners.iter().enumerate() {
            outcome.invoked += 1;

            match catch_unwind(AssertUnwindSafe(|| listener(payload))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    outcome.failed += 1;
                    #[cfg(feature = "tracing")]
                    tracing::warn!(action, index, error = %e, "Listener returned an error");
                    #[cfg(not(feature = "tracing"))]
                    let _ = (index, &e);
                }
                Err(_) => {
                    outcome.failed += 1;
                    #[cfg(feature = "tracing")]
                    tracing::warn!(action, index, "Listener panicked");
                }
            }
        }

        outcome
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (action, listeners) in &self.listeners {
            map.entry(action, &listeners.len());
        }
        map.finish()
    }
}
