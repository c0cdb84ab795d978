use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::kernel::error::{catch_callback, BoxError, ConditionPhase, Error, Result};
use crate::kernel::standalone::KernelRef;
use crate::monitor::{MonitorResult, ServiceEvent, ServiceMonitor};
use crate::service::factory::ServiceFactory;
use crate::service::lock::{ServiceLock, ServiceLockGuard};
use crate::service::types::{ServiceName, ServiceState};

/// A predicate that must hold before a start or stop transition can complete.
///
/// `initialize` is called once per transition attempt, before the first
/// `is_satisfied`; `destroy` is called when the transition finishes or is
/// abandoned. A condition that becomes satisfied asynchronously should call
/// [`ConditionContext::set_satisfied`] so a blocked transition re-evaluates.
pub trait ServiceCondition: Send + Sync + fmt::Debug {
    fn initialize(&self, _context: ConditionContext) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    fn is_satisfied(&self) -> bool;

    fn destroy(&self) -> std::result::Result<(), BoxError> {
        Ok(())
    }
}

/// Handed to a condition when it is initialized.
#[derive(Clone)]
pub struct ConditionContext {
    service_name: ServiceName,
    kernel: KernelRef,
    lock: Arc<ServiceLock>,
}

impl ConditionContext {
    pub(crate) fn new(service_name: ServiceName, kernel: KernelRef, lock: Arc<ServiceLock>) -> Self {
        Self { service_name, kernel, lock }
    }

    /// Name of the service owning the condition.
    pub fn service_name(&self) -> &ServiceName {
        &self.service_name
    }

    pub fn kernel(&self) -> &KernelRef {
        &self.kernel
    }

    /// Wake the owning service if it is waiting on its conditions.
    pub fn set_satisfied(&self) {
        self.lock.signal();
    }
}

impl fmt::Debug for ConditionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionContext")
            .field("service_name", &self.service_name)
            .finish_non_exhaustive()
    }
}

pub(crate) fn same_condition(a: &Arc<dyn ServiceCondition>, b: &Arc<dyn ServiceCondition>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

pub(crate) fn describe(conditions: &[Arc<dyn ServiceCondition>]) -> Vec<String> {
    conditions.iter().map(|c| format!("{:?}", c)).collect()
}

struct ConditionHandle {
    condition: Arc<dyn ServiceCondition>,
    initialized: bool,
}

enum ConditionSource {
    Fixed,
    // re-read the factory's stop conditions on every evaluation
    Factory(Arc<dyn ServiceFactory>),
}

/// The set of conditions gating one transition of one service.
pub struct AggregateCondition {
    service_name: ServiceName,
    kernel: KernelRef,
    lock: Arc<ServiceLock>,
    source: ConditionSource,
    handles: Mutex<Vec<ConditionHandle>>,
}

impl AggregateCondition {
    pub fn new(
        kernel: KernelRef,
        service_name: ServiceName,
        lock: Arc<ServiceLock>,
        conditions: Vec<Arc<dyn ServiceCondition>>,
    ) -> Self {
        let mut handles: Vec<ConditionHandle> = Vec::with_capacity(conditions.len());
        for condition in conditions {
            if !handles.iter().any(|h| same_condition(&h.condition, &condition)) {
                handles.push(ConditionHandle { condition, initialized: false });
            }
        }
        Self {
            service_name,
            kernel,
            lock,
            source: ConditionSource::Fixed,
            handles: Mutex::new(handles),
        }
    }

    /// Stop condition of a non-restartable service: starts empty and picks up
    /// whatever stop conditions the factory declares, including ones added
    /// while the service was being created.
    pub fn tracking(
        kernel: KernelRef,
        service_name: ServiceName,
        lock: Arc<ServiceLock>,
        factory: Arc<dyn ServiceFactory>,
    ) -> Self {
        Self {
            service_name,
            kernel,
            lock,
            source: ConditionSource::Factory(factory),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn refresh(&self) {
        if let ConditionSource::Factory(factory) = &self.source {
            let declared = factory.stop_conditions();
            let mut handles = self.handles.lock();
            for condition in declared {
                if !handles.iter().any(|h| same_condition(&h.condition, &condition)) {
                    handles.push(ConditionHandle { condition, initialized: false });
                }
            }
        }
    }

    /// Initialize any condition seen for the first time, then return the ones
    /// not yet satisfied.
    ///
    /// Condition callbacks run without the internal table locked so they may
    /// call back into the kernel.
    pub fn unsatisfied(&self) -> Result<Vec<Arc<dyn ServiceCondition>>> {
        self.refresh();

        let pending: Vec<Arc<dyn ServiceCondition>> = self
            .handles
            .lock()
            .iter()
            .filter(|h| !h.initialized)
            .map(|h| Arc::clone(&h.condition))
            .collect();

        for condition in pending {
            let context = ConditionContext::new(self.service_name.clone(), self.kernel.clone(), Arc::clone(&self.lock));
            catch_callback(|| condition.initialize(context)).map_err(|source| Error::ConditionFailed {
                name: self.service_name.clone(),
                condition: format!("{:?}", condition),
                phase: ConditionPhase::Initialize,
                source,
            })?;
            let mut handles = self.handles.lock();
            if let Some(handle) = handles.iter_mut().find(|h| same_condition(&h.condition, &condition)) {
                handle.initialized = true;
            }
        }

        let initialized: Vec<Arc<dyn ServiceCondition>> = self
            .handles
            .lock()
            .iter()
            .filter(|h| h.initialized)
            .map(|h| Arc::clone(&h.condition))
            .collect();

        let mut unsatisfied = Vec::new();
        for condition in initialized {
            let satisfied = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| condition.is_satisfied()))
                .unwrap_or(false);
            if !satisfied {
                unsatisfied.push(condition);
            }
        }
        Ok(unsatisfied)
    }

    /// Block until some condition signals a change, at most `wait`. The
    /// caller's lock is released for the duration of the wait.
    pub fn await_satisfaction(&self, guard: &ServiceLockGuard<'_>, since: u64, wait: Duration) -> Result<()> {
        self.lock.await_signal(guard, since, wait)
    }

    /// Destroy every initialized condition. Never stops early; the errors are
    /// returned in order.
    pub fn destroy(&self) -> Vec<Error> {
        let handles: Vec<ConditionHandle> = std::mem::take(&mut *self.handles.lock());
        let mut errors = Vec::new();
        for handle in handles.into_iter().filter(|h| h.initialized) {
            if let Err(source) = catch_callback(|| handle.condition.destroy()) {
                errors.push(Error::ConditionFailed {
                    name: self.service_name.clone(),
                    condition: format!("{:?}", handle.condition),
                    phase: ConditionPhase::Destroy,
                    source,
                });
            }
        }
        errors
    }
}

impl fmt::Debug for AggregateCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let conditions: Vec<String> = self.handles.lock().iter().map(|h| format!("{:?}", h.condition)).collect();
        f.debug_struct("AggregateCondition")
            .field("service_name", &self.service_name)
            .field("conditions", &conditions)
            .finish()
    }
}

/// A condition backed by a flag that any thread can flip.
pub struct SimpleCondition {
    name: String,
    satisfied: AtomicBool,
    context: Mutex<Option<ConditionContext>>,
}

impl SimpleCondition {
    pub fn new(name: impl Into<String>, satisfied: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            satisfied: AtomicBool::new(satisfied),
            context: Mutex::new(None),
        })
    }

    pub fn set(&self, satisfied: bool) {
        self.satisfied.store(satisfied, Ordering::SeqCst);
        if satisfied {
            if let Some(context) = self.context.lock().as_ref() {
                context.set_satisfied();
            }
        }
    }
}

impl ServiceCondition for SimpleCondition {
    fn initialize(&self, context: ConditionContext) -> std::result::Result<(), BoxError> {
        *self.context.lock() = Some(context);
        Ok(())
    }

    fn is_satisfied(&self) -> bool {
        self.satisfied.load(Ordering::SeqCst)
    }

    fn destroy(&self) -> std::result::Result<(), BoxError> {
        self.context.lock().take();
        Ok(())
    }
}

impl fmt::Debug for SimpleCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SimpleCondition({}, satisfied={})", self.name, self.is_satisfied())
    }
}

/// Which state of the watched service satisfies a [`ServiceStateCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Awaited {
    Running,
    Stopped,
}

struct StateConditionShared {
    dependency: ServiceName,
    awaited: Awaited,
    satisfied: AtomicBool,
    context: Mutex<Option<ConditionContext>>,
}

impl StateConditionShared {
    fn update(&self, satisfied: bool) {
        let was = self.satisfied.swap(satisfied, Ordering::SeqCst);
        if satisfied && !was {
            if let Some(context) = self.context.lock().as_ref() {
                context.set_satisfied();
            }
        }
    }
}

/// Monitor registered for the watched service while the condition is live.
struct DependencyMonitor {
    shared: Arc<StateConditionShared>,
}

impl ServiceMonitor for DependencyMonitor {
    fn service_running(&self, _event: &ServiceEvent) -> MonitorResult {
        self.shared.update(self.shared.awaited == Awaited::Running);
        Ok(())
    }

    fn service_stopping(&self, _event: &ServiceEvent) -> MonitorResult {
        if self.shared.awaited == Awaited::Running {
            self.shared.update(false);
        }
        Ok(())
    }

    fn service_starting(&self, _event: &ServiceEvent) -> MonitorResult {
        if self.shared.awaited == Awaited::Stopped {
            self.shared.update(false);
        }
        Ok(())
    }

    fn service_stopped(&self, _event: &ServiceEvent) -> MonitorResult {
        self.shared.update(self.shared.awaited == Awaited::Stopped);
        Ok(())
    }

    fn service_unregistered(&self, _event: &ServiceEvent) -> MonitorResult {
        self.shared.update(self.shared.awaited == Awaited::Stopped);
        Ok(())
    }
}

/// Condition tied to the lifecycle state of another service.
struct ServiceStateCondition {
    shared: Arc<StateConditionShared>,
    monitor: Mutex<Option<Arc<dyn ServiceMonitor>>>,
}

impl ServiceStateCondition {
    fn new(dependency: ServiceName, awaited: Awaited) -> Self {
        Self {
            shared: Arc::new(StateConditionShared {
                dependency,
                awaited,
                satisfied: AtomicBool::new(false),
                context: Mutex::new(None),
            }),
            monitor: Mutex::new(None),
        }
    }

    fn initialize(&self, context: ConditionContext) -> std::result::Result<(), BoxError> {
        let kernel = context
            .kernel()
            .upgrade()
            .ok_or_else(|| BoxError::from(format!("kernel is gone, cannot watch '{}'", self.shared.dependency)))?;

        *self.shared.context.lock() = Some(context);

        let monitor: Arc<dyn ServiceMonitor> = Arc::new(DependencyMonitor {
            shared: Arc::clone(&self.shared),
        });
        kernel.add_service_monitor_for(Arc::clone(&monitor), &self.shared.dependency);
        *self.monitor.lock() = Some(monitor);

        // the monitor only sees future transitions
        let current = match kernel.service_state(&self.shared.dependency) {
            Ok(state) => Some(state),
            Err(Error::ServiceNotFound { .. }) => None,
            Err(e) => return Err(Box::new(e)),
        };
        let satisfied = match self.shared.awaited {
            Awaited::Running => current == Some(ServiceState::Running),
            Awaited::Stopped => matches!(current, None | Some(ServiceState::Stopped)),
        };
        self.shared.update(satisfied);
        Ok(())
    }

    fn destroy(&self) -> std::result::Result<(), BoxError> {
        let context = self.shared.context.lock().take();
        if let Some(monitor) = self.monitor.lock().take() {
            if let Some(kernel) = context.as_ref().and_then(|c| c.kernel().upgrade()) {
                kernel.remove_service_monitor(&monitor);
            }
        }
        self.shared.satisfied.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Satisfied while the named service is RUNNING.
pub struct RunningServiceCondition(ServiceStateCondition);

impl RunningServiceCondition {
    pub fn new(dependency: impl Into<ServiceName>) -> Arc<Self> {
        Arc::new(Self(ServiceStateCondition::new(dependency.into(), Awaited::Running)))
    }

    pub fn dependency(&self) -> &ServiceName {
        &self.0.shared.dependency
    }
}

impl ServiceCondition for RunningServiceCondition {
    fn initialize(&self, context: ConditionContext) -> std::result::Result<(), BoxError> {
        self.0.initialize(context)
    }

    fn is_satisfied(&self) -> bool {
        self.0.shared.satisfied.load(Ordering::SeqCst)
    }

    fn destroy(&self) -> std::result::Result<(), BoxError> {
        self.0.destroy()
    }
}

impl fmt::Debug for RunningServiceCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RunningServiceCondition({})", self.0.shared.dependency)
    }
}

/// Satisfied while the named service is STOPPED or not registered at all.
pub struct StoppedServiceCondition(ServiceStateCondition);

impl StoppedServiceCondition {
    pub fn new(dependency: impl Into<ServiceName>) -> Arc<Self> {
        Arc::new(Self(ServiceStateCondition::new(dependency.into(), Awaited::Stopped)))
    }

    pub fn dependency(&self) -> &ServiceName {
        &self.0.shared.dependency
    }
}

impl ServiceCondition for StoppedServiceCondition {
    fn initialize(&self, context: ConditionContext) -> std::result::Result<(), BoxError> {
        self.0.initialize(context)
    }

    fn is_satisfied(&self) -> bool {
        self.0.shared.satisfied.load(Ordering::SeqCst)
    }

    fn destroy(&self) -> std::result::Result<(), BoxError> {
        self.0.destroy()
    }
}

impl fmt::Debug for StoppedServiceCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoppedServiceCondition({})", self.0.shared.dependency)
    }
}
