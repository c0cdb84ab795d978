use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use parking_lot::{Mutex, RwLock};

use crate::kernel::error::{catch_callback, Error, Result};
use crate::kernel::standalone::KernelRef;
use crate::monitor::{dispatch, EventIdGenerator, ServiceEvent, ServiceEventKind, ServiceMonitor};
use crate::service::condition::AggregateCondition;
use crate::service::factory::{ServiceContext, ServiceFactory};
use crate::service::lock::{ServiceLock, ServiceLockGuard};
use crate::service::strategy::{StartStrategies, StartStrategy, StopStrategy, WaitDecision};
use crate::service::types::{ServiceId, ServiceInstance, ServiceName, ServiceState};

/// How the locked part of a start ended.
enum StartOutcome {
    Running,
    Waiting,
    // a concurrent stop won while this start was waiting on its conditions
    Cancelled,
}

/// Lifecycle controller of one registered service.
///
/// Created once when the service is registered and destroyed once when it is
/// unregistered. A restartable service cycles between STOPPED and RUNNING any
/// number of times in between; a non-restartable one is started by
/// [`ServiceManager::initialize`] and only torn down by
/// [`ServiceManager::destroy`].
///
/// State, start time and the service instance are only written while the
/// service lock is held. They may be read at any time.
pub struct ServiceManager {
    kernel: KernelRef,
    service_id: ServiceId,
    service_name: ServiceName,
    factory: Arc<dyn ServiceFactory>,
    monitor: Arc<dyn ServiceMonitor>,
    events: Arc<EventIdGenerator>,
    lock: Arc<ServiceLock>,
    condition_wait: Duration,
    state: AtomicU8,
    start_time: AtomicU64,
    service: RwLock<Option<ServiceInstance>>,
    start_condition: Mutex<Option<Arc<AggregateCondition>>>,
    stop_condition: Mutex<Option<Arc<AggregateCondition>>>,
}

impl ServiceManager {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        kernel: KernelRef,
        service_id: ServiceId,
        service_name: ServiceName,
        factory: Arc<dyn ServiceFactory>,
        monitor: Arc<dyn ServiceMonitor>,
        events: Arc<EventIdGenerator>,
        lock_timeout: Duration,
        condition_wait: Duration,
    ) -> Self {
        let lock = Arc::new(ServiceLock::new(service_name.clone(), lock_timeout));
        Self {
            kernel,
            service_id,
            service_name,
            factory,
            monitor,
            events,
            lock,
            condition_wait,
            state: AtomicU8::new(ServiceState::Stopped as u8),
            start_time: AtomicU64::new(0),
            service: RwLock::new(None),
            start_condition: Mutex::new(None),
            stop_condition: Mutex::new(None),
        }
    }

    pub fn service_id(&self) -> ServiceId {
        self.service_id
    }

    pub fn service_name(&self) -> &ServiceName {
        &self.service_name
    }

    pub fn service_factory(&self) -> &Arc<dyn ServiceFactory> {
        &self.factory
    }

    pub fn state(&self) -> ServiceState {
        ServiceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Milliseconds since the epoch at which the service became RUNNING, or 0.
    pub fn start_time(&self) -> u64 {
        self.start_time.load(Ordering::SeqCst)
    }

    /// The live instance while RUNNING.
    pub fn service(&self) -> Option<ServiceInstance> {
        self.service.read().clone()
    }

    pub fn is_restartable(&self) -> bool {
        self.factory.is_restartable()
    }

    /// Wake every thread blocked on this service's lock or conditions; each
    /// fails with [`Error::KernelOperationInterrupted`].
    pub fn interrupt(&self) {
        self.lock.interrupt();
    }

    /// Announce the registration. A non-restartable service is started right
    /// away and a failure to start is returned after an unregistered event.
    pub fn initialize(&self) -> Result<()> {
        self.notify(ServiceEventKind::Registered, self.event());

        if !self.factory.is_restartable() {
            *self.stop_condition.lock() = Some(Arc::new(AggregateCondition::tracking(
                self.kernel.clone(),
                self.service_name.clone(),
                Arc::clone(&self.lock),
                Arc::clone(&self.factory),
            )));

            if let Err(e) = self.start(false, &StartStrategies::Unregister) {
                if let Some(condition) = self.stop_condition.lock().take() {
                    for error in condition.destroy() {
                        warn!("{}", error);
                    }
                }
                self.notify(ServiceEventKind::Unregistered, self.event());
                return Err(e);
            }
        }
        Ok(())
    }

    /// Check the current state allows a start. `Ok(false)` means the service
    /// is already RUNNING.
    fn verify_startable(&self, state: ServiceState) -> Result<bool> {
        match state {
            ServiceState::Running => Ok(false),
            ServiceState::Stopping => Err(Error::illegal_state(
                &self.service_name,
                "A stopping service can not be started",
            )),
            ServiceState::Stopped if !self.factory.is_enabled() => Err(Error::illegal_state(
                &self.service_name,
                "A disabled service can not be started",
            )),
            _ => Ok(true),
        }
    }

    /// Start the service, consulting `strategy` if start conditions are not
    /// satisfied. With `recursive`, owned services are started afterwards.
    ///
    /// Returns `Ok` when the service is RUNNING or the strategy chose to leave
    /// it STARTING.
    pub fn start(&self, recursive: bool, strategy: &dyn StartStrategy) -> Result<()> {
        let mut visited = HashSet::new();
        self.start_with(recursive, strategy, &mut visited)
    }

    pub(crate) fn start_with(
        &self,
        recursive: bool,
        strategy: &dyn StartStrategy,
        visited: &mut HashSet<ServiceName>,
    ) -> Result<()> {
        if !visited.insert(self.service_name.clone()) {
            return Ok(());
        }

        if !self.verify_startable(self.state())? {
            if recursive {
                self.start_owned_services(strategy, visited)?;
            }
            return Ok(());
        }

        let guard = self.lock.lock("start")?;

        // the state may have moved while we waited for the lock
        if !self.verify_startable(self.state())? {
            drop(guard);
            if recursive {
                self.start_owned_services(strategy, visited)?;
            }
            return Ok(());
        }

        if self.state() == ServiceState::Stopped {
            self.set_state(ServiceState::Starting);
            self.notify(ServiceEventKind::Starting, self.event());
            *self.start_condition.lock() = Some(Arc::new(AggregateCondition::new(
                self.kernel.clone(),
                self.service_name.clone(),
                Arc::clone(&self.lock),
                self.factory.start_conditions(),
            )));
        }

        match self.complete_start(&guard, strategy) {
            Ok(StartOutcome::Running) => {}
            Ok(StartOutcome::Waiting) => return Ok(()),
            Ok(StartOutcome::Cancelled) => {
                return Err(Error::illegal_state(
                    &self.service_name,
                    "Start was cancelled by a stop while waiting on start conditions",
                ));
            }
            Err(e) => {
                self.rollback_start(&e);
                drop(guard);
                return strategy.start_error(&self.service_name, e);
            }
        }
        drop(guard);

        // never recurse while holding our own lock
        if recursive {
            self.start_owned_services(strategy, visited)?;
        }
        Ok(())
    }

    fn complete_start(&self, guard: &ServiceLockGuard<'_>, strategy: &dyn StartStrategy) -> Result<StartOutcome> {
        let condition = self.start_condition.lock().clone();
        if let Some(condition) = condition {
            loop {
                match self.state() {
                    ServiceState::Starting if is_current(&self.start_condition, &condition) => {}
                    // finished by a concurrent start while we were waiting
                    ServiceState::Running => return Ok(StartOutcome::Running),
                    _ => return Ok(StartOutcome::Cancelled),
                }
                let since = self.lock.generation();
                let unsatisfied = condition.unsatisfied()?;
                if unsatisfied.is_empty() {
                    break;
                }
                match strategy.wait_for_unsatisfied_conditions(&self.service_name, &unsatisfied)? {
                    WaitDecision::Wait => condition.await_satisfaction(guard, since, self.condition_wait)?,
                    WaitDecision::Abort => {
                        self.notify(
                            ServiceEventKind::WaitingToStart,
                            self.event().with_unsatisfied_conditions(unsatisfied),
                        );
                        return Ok(StartOutcome::Waiting);
                    }
                    WaitDecision::Force => break,
                }
            }
        }

        let context = self.context();
        let service = catch_callback(|| self.factory.create_service(&context)).map_err(|source| {
            Error::ServiceCreation {
                name: self.service_name.clone(),
                source,
            }
        })?;
        for declared in self.factory.types() {
            if !service.is_assignable_to(&declared) {
                let error = Error::InvalidServiceType {
                    name: self.service_name.clone(),
                    expected: declared.name().to_string(),
                    actual: service.type_name().to_string(),
                };
                if let Err(e) = self.destroy_instance(service) {
                    self.notify(ServiceEventKind::StopError, self.event().with_cause(e));
                }
                return Err(error);
            }
        }
        *self.service.write() = Some(service);

        if let Some(condition) = self.start_condition.lock().take() {
            for error in condition.destroy() {
                warn!("{}", error);
            }
        }

        self.start_time.store(now_millis(), Ordering::SeqCst);
        self.set_state(ServiceState::Running);
        self.notify(ServiceEventKind::Running, self.event());
        debug!("Service '{}' ({}) is running", self.service_name, self.service_id);
        Ok(StartOutcome::Running)
    }

    /// Drive a failed start back to STOPPED. Secondary failures are reported
    /// as stop errors so they never mask `cause`.
    fn rollback_start(&self, cause: &Error) {
        self.notify(ServiceEventKind::StartError, self.event().with_cause(cause.clone()));
        self.set_state(ServiceState::Stopping);
        self.notify(ServiceEventKind::Stopping, self.event());

        let created = self.service.write().take();
        if let Some(service) = created {
            if let Err(e) = self.destroy_instance(service) {
                self.notify(ServiceEventKind::StopError, self.event().with_cause(e));
            }
        }

        if let Some(condition) = self.start_condition.lock().take() {
            for error in condition.destroy() {
                self.notify(ServiceEventKind::StopError, self.event().with_cause(error));
            }
        }

        self.start_time.store(0, Ordering::SeqCst);
        self.set_state(ServiceState::Stopped);
        self.notify(ServiceEventKind::Stopped, self.event());
    }

    fn start_owned_services(&self, strategy: &dyn StartStrategy, visited: &mut HashSet<ServiceName>) -> Result<()> {
        let owned = self.factory.owned_services();
        if owned.is_empty() {
            return Ok(());
        }
        let Some(kernel) = self.kernel.upgrade() else {
            return Ok(());
        };
        for name in owned {
            let manager = match kernel.service_manager(&name) {
                Ok(manager) => manager,
                Err(Error::ServiceNotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            match manager.start_with(true, strategy, visited) {
                Ok(()) | Err(Error::ServiceNotFound { .. }) | Err(Error::IllegalServiceState { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Stop the service, consulting `strategy` if stop conditions are not
    /// satisfied.
    ///
    /// Returns `Ok(false)` if the strategy chose to leave the service STOPPING.
    /// A non-restartable service stays STOPPING once its conditions are met;
    /// only [`ServiceManager::destroy`] finishes it.
    pub fn stop(&self, strategy: &dyn StopStrategy) -> Result<bool> {
        if self.state() == ServiceState::Stopped {
            return Ok(true);
        }

        let guard = self.lock.lock("stop")?;
        let restartable = self.factory.is_restartable();

        match self.state() {
            ServiceState::Stopped => return Ok(true),
            ServiceState::Starting => {
                self.abort_start();
                return Ok(true);
            }
            ServiceState::Running => {
                self.set_state(ServiceState::Stopping);
                self.notify(ServiceEventKind::Stopping, self.event());
                if restartable {
                    *self.stop_condition.lock() = Some(Arc::new(AggregateCondition::new(
                        self.kernel.clone(),
                        self.service_name.clone(),
                        Arc::clone(&self.lock),
                        self.factory.stop_conditions(),
                    )));
                }
            }
            ServiceState::Stopping => {}
        }

        let condition = self.stop_condition.lock().clone();
        if let Some(condition) = condition {
            loop {
                match self.state() {
                    ServiceState::Stopping if is_current(&self.stop_condition, &condition) => {}
                    // resolved by a concurrent stop while we were waiting
                    state => return Ok(state == ServiceState::Stopped),
                }
                let since = self.lock.generation();
                let unsatisfied = match condition.unsatisfied() {
                    Ok(unsatisfied) => unsatisfied,
                    Err(e) => {
                        self.notify(ServiceEventKind::StopError, self.event().with_cause(e));
                        break;
                    }
                };
                if unsatisfied.is_empty() {
                    break;
                }
                let decision = match strategy.wait_for_unsatisfied_conditions(&self.service_name, &unsatisfied) {
                    Ok(decision) => decision,
                    Err(e) => {
                        self.resume_running(restartable);
                        return Err(e);
                    }
                };
                match decision {
                    WaitDecision::Wait => condition.await_satisfaction(&guard, since, self.condition_wait)?,
                    WaitDecision::Abort => {
                        self.notify(
                            ServiceEventKind::WaitingToStop,
                            self.event().with_unsatisfied_conditions(unsatisfied),
                        );
                        return Ok(false);
                    }
                    WaitDecision::Force => break,
                }
            }
        }

        if restartable {
            self.finish_stop();
        }
        Ok(true)
    }

    /// A stop refused by its strategy: the instance is untouched, so go back
    /// to RUNNING. A non-restartable service keeps its tracking condition.
    fn resume_running(&self, restartable: bool) {
        if restartable {
            if let Some(condition) = self.stop_condition.lock().take() {
                for error in condition.destroy() {
                    self.notify(ServiceEventKind::StopError, self.event().with_cause(error));
                }
            }
        }
        self.set_state(ServiceState::Running);
        self.notify(ServiceEventKind::Running, self.event());
    }

    /// A stop that caught the service STARTING: nothing was created yet.
    fn abort_start(&self) {
        self.set_state(ServiceState::Stopping);
        self.notify(ServiceEventKind::Stopping, self.event());
        if let Some(condition) = self.start_condition.lock().take() {
            for error in condition.destroy() {
                self.notify(ServiceEventKind::StopError, self.event().with_cause(error));
            }
        }
        self.start_time.store(0, Ordering::SeqCst);
        self.set_state(ServiceState::Stopped);
        self.notify(ServiceEventKind::Stopped, self.event());
    }

    /// Destroy the instance and the stop conditions and reset to STOPPED.
    /// Failures are reported to monitors; the reset always happens.
    fn finish_stop(&self) {
        let service = self.service.write().take();
        if let Some(service) = service {
            if let Err(e) = self.destroy_instance(service) {
                self.notify(ServiceEventKind::StopError, self.event().with_cause(e));
            }
        }
        if let Some(condition) = self.stop_condition.lock().take() {
            for error in condition.destroy() {
                self.notify(ServiceEventKind::StopError, self.event().with_cause(error));
            }
        }
        self.start_time.store(0, Ordering::SeqCst);
        self.set_state(ServiceState::Stopped);
        self.notify(ServiceEventKind::Stopped, self.event());
        debug!("Service '{}' ({}) is stopped", self.service_name, self.service_id);
    }

    /// Stop the service for good. Ends with an unregistered event.
    ///
    /// Fails if the stop fails or leaves the service STOPPING, in which case
    /// the service stays registered.
    pub fn destroy(&self, strategy: &dyn StopStrategy) -> Result<()> {
        if !self.stop(strategy)? {
            return Err(Error::illegal_state(
                &self.service_name,
                format!("Service did not stop; it is {}", self.state()),
            ));
        }

        if !self.factory.is_restartable() {
            let _guard = self.lock.lock("destroy")?;
            if self.state() != ServiceState::Stopped {
                if self.state() == ServiceState::Running {
                    self.set_state(ServiceState::Stopping);
                    self.notify(ServiceEventKind::Stopping, self.event());
                }
                self.finish_stop();
            }
        }

        self.notify(ServiceEventKind::Unregistered, self.event());
        Ok(())
    }

    fn destroy_instance(&self, service: ServiceInstance) -> Result<()> {
        let context = self.context();
        catch_callback(|| self.factory.destroy_service(&context, service)).map_err(|source| {
            Error::ServiceDestruction {
                name: self.service_name.clone(),
                source,
            }
        })
    }

    fn context(&self) -> ServiceContext {
        ServiceContext::new(self.kernel.clone(), self.service_name.clone())
    }

    fn set_state(&self, state: ServiceState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn event(&self) -> ServiceEvent {
        ServiceEvent::new(
            self.events.next_id(),
            self.kernel.clone(),
            self.service_name.clone(),
            Arc::clone(&self.factory),
            self.service.read().clone(),
        )
    }

    fn notify(&self, kind: ServiceEventKind, event: ServiceEvent) {
        if let Err(e) = dispatch(self.monitor.as_ref(), kind, &event) {
            warn!("Failed to deliver {} for service '{}': {}", kind, self.service_name, e);
        }
    }
}

fn is_current(slot: &Mutex<Option<Arc<AggregateCondition>>>, condition: &Arc<AggregateCondition>) -> bool {
    slot.lock().as_ref().is_some_and(|current| Arc::ptr_eq(current, condition))
}

fn now_millis() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    millis.max(1)
}

impl PartialEq for ServiceManager {
    fn eq(&self, other: &Self) -> bool {
        self.service_id == other.service_id
    }
}

impl Eq for ServiceManager {}

impl Hash for ServiceManager {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.service_id.hash(state);
    }
}

impl PartialOrd for ServiceManager {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServiceManager {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.service_id.cmp(&other.service_id)
    }
}

impl fmt::Debug for ServiceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceManager")
            .field("service_id", &self.service_id)
            .field("service_name", &self.service_name)
            .field("state", &self.state())
            .field("start_time", &self.start_time())
            .finish_non_exhaustive()
    }
}
