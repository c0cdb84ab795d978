use std::fmt;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::kernel::error::{Error, Result};
use crate::service::types::ServiceName;

const NOT_HELD: &str = "NOT-HELD";

/// Exclusive per-service lock.
///
/// Unlike a plain mutex it is tagged with the name of the operation holding it,
/// refuses re-entry from the holding thread (reporting both operation names
/// instead of deadlocking), gives up after a bounded wait, and carries the
/// signal used by conditions to wake a start/stop that is waiting on them.
pub struct ServiceLock {
    service_name: ServiceName,
    timeout: Duration,
    state: Mutex<LockState>,
    released: Condvar,
    signalled: Condvar,
}

struct LockState {
    holder: Option<ThreadId>,
    operation: &'static str,
    // bumped by every condition signal
    generation: u64,
    // bumped by every interrupt
    interrupts: u64,
    // value of `interrupts` when the current holder took the lock
    holder_interrupts: u64,
}

impl ServiceLock {
    pub fn new(service_name: ServiceName, timeout: Duration) -> Self {
        Self {
            service_name,
            timeout,
            state: Mutex::new(LockState {
                holder: None,
                operation: NOT_HELD,
                generation: 0,
                interrupts: 0,
                holder_interrupts: 0,
            }),
            released: Condvar::new(),
            signalled: Condvar::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire the lock for `operation`.
    pub fn lock(&self, operation: &'static str) -> Result<ServiceLockGuard<'_>> {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.holder == Some(me) {
            return Err(Error::illegal_state(
                &self.service_name,
                format!(
                    "Current thread holds the lock for operation '{}' and cannot also {}",
                    state.operation, operation
                ),
            ));
        }

        let deadline = Instant::now() + self.timeout;
        let interrupts = state.interrupts;
        while state.holder.is_some() {
            let timed_out = self.released.wait_until(&mut state, deadline).timed_out();
            if state.interrupts != interrupts {
                return Err(Error::KernelOperationInterrupted {
                    name: self.service_name.clone(),
                    operation: operation.to_string(),
                });
            }
            if timed_out && state.holder.is_some() {
                return Err(Error::KernelOperationTimeout {
                    name: self.service_name.clone(),
                    operation: operation.to_string(),
                    holder: state.operation.to_string(),
                    timeout: self.timeout,
                });
            }
        }

        state.holder = Some(me);
        state.operation = operation;
        state.holder_interrupts = state.interrupts;
        log::trace!("Lock of service '{}' acquired for {}", self.service_name, operation);
        Ok(ServiceLockGuard { lock: self })
    }

    /// Operation currently holding the lock, or `NOT-HELD`.
    pub fn holder_operation(&self) -> &'static str {
        self.state.lock().operation
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.state.lock().holder == Some(thread::current().id())
    }

    /// Current signal generation. Read it *before* evaluating conditions and
    /// pass it to [`ServiceLock::await_signal`] so a signal raised in between
    /// is not lost.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Wake every waiter parked in [`ServiceLock::await_signal`].
    pub fn signal(&self) {
        let mut state = self.state.lock();
        state.generation = state.generation.wrapping_add(1);
        self.signalled.notify_all();
    }

    /// Wake every thread waiting on this lock or its signal with an
    /// interruption error.
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupts = state.interrupts.wrapping_add(1);
        self.released.notify_all();
        self.signalled.notify_all();
    }

    /// Release the lock held by `_guard`, wait until the signal generation moves
    /// past `since` (or `wait` elapses), then take the lock back.
    ///
    /// Any interrupt raised since the lock was acquired fails the wait. The
    /// lock is always held again when this returns, even on interruption.
    pub fn await_signal(&self, _guard: &ServiceLockGuard<'_>, since: u64, wait: Duration) -> Result<()> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        let operation = state.operation;
        let interrupts = state.holder_interrupts;
        let interrupted_error = || Error::KernelOperationInterrupted {
            name: self.service_name.clone(),
            operation: operation.to_string(),
        };

        if state.interrupts != interrupts {
            return Err(interrupted_error());
        }

        state.holder = None;
        state.operation = NOT_HELD;
        self.released.notify_all();

        let deadline = Instant::now() + wait;
        while state.generation == since && state.interrupts == interrupts {
            if self.signalled.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        let interrupted = state.interrupts != interrupts;

        while state.holder.is_some() {
            self.released.wait(&mut state);
        }
        state.holder = Some(me);
        state.operation = operation;
        state.holder_interrupts = interrupts;

        if interrupted {
            return Err(interrupted_error());
        }
        Ok(())
    }

    fn unlock(&self) {
        let mut state = self.state.lock();
        log::trace!("Lock of service '{}' released by {}", self.service_name, state.operation);
        state.holder = None;
        state.operation = NOT_HELD;
        self.released.notify_all();
    }
}

impl fmt::Debug for ServiceLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceLock")
            .field("service_name", &self.service_name)
            .field("timeout", &self.timeout)
            .field("operation", &self.holder_operation())
            .finish()
    }
}

/// Holds a [`ServiceLock`]; released on drop.
pub struct ServiceLockGuard<'a> {
    lock: &'a ServiceLock,
}

impl ServiceLockGuard<'_> {
    pub fn operation(&self) -> &'static str {
        self.lock.holder_operation()
    }
}

impl Drop for ServiceLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
