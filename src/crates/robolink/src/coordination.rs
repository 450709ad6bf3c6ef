//! Coordination between workers that each hold their own [`Link`].
//!
//! Links cannot be shared, so cooperating workers exchange item handles
//! through a [`SharedQueue`] and signal each other through station
//! parameters with [`ParamSignal`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{LinkError, LinkResult};
use crate::link::Link;

/// FIFO shared between threads. Cloning yields another handle to the same
/// queue.
pub struct SharedQueue<T> {
    inner: Arc<Mutex<VecDeque<T>>>,
}

impl<T> SharedQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    // A panic while holding the lock cannot leave the deque half-updated.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_back(&self, value: T) {
        self.lock().push_back(value);
    }

    pub fn pop_front(&self) -> Option<T> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Remove and return everything, head first.
    pub fn drain(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }
}

impl<T: Clone> SharedQueue<T> {
    pub fn peek_front(&self) -> Option<T> {
        self.lock().front().cloned()
    }

    pub fn peek_back(&self) -> Option<T> {
        self.lock().back().cloned()
    }
}

impl<T> Clone for SharedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for SharedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.lock().iter()).finish()
    }
}

/// Default interval between parameter polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A station parameter used as a flag between links.
///
/// The engine offers no compare-and-set and no notifications: waiting polls
/// the parameter, and two writers racing on the same name simply overwrite
/// each other.
#[derive(Debug, Clone)]
pub struct ParamSignal {
    name: String,
    poll_interval: Duration,
}

impl ParamSignal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raise(&self, link: &Link, value: &str) -> LinkResult<()> {
        link.set_param(&self.name, value)
    }

    /// Current value, `None` while the parameter was never set.
    pub fn read(&self, link: &Link) -> LinkResult<Option<String>> {
        link.param(&self.name)
    }

    /// Poll until the parameter equals `value`.
    pub fn wait_until(&self, link: &Link, value: &str, timeout: Duration) -> LinkResult<()> {
        self.poll(link, timeout, |current| current == Some(value))
    }

    /// Poll until the parameter no longer equals `value`.
    pub fn wait_while(&self, link: &Link, value: &str, timeout: Duration) -> LinkResult<()> {
        self.poll(link, timeout, |current| current != Some(value))
    }

    fn poll(
        &self,
        link: &Link,
        timeout: Duration,
        done: impl Fn(Option<&str>) -> bool,
    ) -> LinkResult<()> {
        let start = Instant::now();
        loop {
            let current = self.read(link)?;
            trace!(name = %self.name, value = ?current, "polled signal");
            if done(current.as_deref()) {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(LinkError::SignalTimeout {
                    name: self.name.clone(),
                    timeout,
                });
            }
            thread::sleep(self.poll_interval);
        }
    }
}
