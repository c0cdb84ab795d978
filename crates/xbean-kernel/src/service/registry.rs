use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};

use crate::kernel::error::{Error, Result};
use crate::service::factory::ServiceFactory;
use crate::service::manager::ServiceManager;
use crate::service::manager_factory::ServiceManagerFactory;
use crate::service::strategy::{StopStrategies, StopStrategy};
use crate::service::types::{ServiceId, ServiceName, ServiceType};

enum TaskKind {
    Register,
    Unregister { registration: Arc<RegistryFutureTask> },
}

enum TaskOutcome {
    Pending,
    Succeeded,
    Failed(Error),
}

/// One register or unregister of one service, run on the calling thread.
///
/// While it runs it sits in the registry's name table so concurrent callers
/// for the same name wait for it to finish instead of racing it. Identity,
/// ordering and hashing use the service id only.
pub struct RegistryFutureTask {
    service_id: ServiceId,
    service_name: ServiceName,
    kind: TaskKind,
    manager: Arc<ServiceManager>,
    runner: ThreadId,
    outcome: Mutex<TaskOutcome>,
    completed: Condvar,
}

impl RegistryFutureTask {
    fn register(manager: Arc<ServiceManager>) -> Self {
        Self {
            service_id: manager.service_id(),
            service_name: manager.service_name().clone(),
            kind: TaskKind::Register,
            manager,
            runner: thread::current().id(),
            outcome: Mutex::new(TaskOutcome::Pending),
            completed: Condvar::new(),
        }
    }

    fn unregister(registration: Arc<RegistryFutureTask>) -> Self {
        Self {
            service_id: registration.service_id,
            service_name: registration.service_name.clone(),
            manager: Arc::clone(&registration.manager),
            kind: TaskKind::Unregister { registration },
            runner: thread::current().id(),
            outcome: Mutex::new(TaskOutcome::Pending),
            completed: Condvar::new(),
        }
    }

    pub fn service_id(&self) -> ServiceId {
        self.service_id
    }

    pub fn service_name(&self) -> &ServiceName {
        &self.service_name
    }

    pub fn is_registration(&self) -> bool {
        matches!(self.kind, TaskKind::Register)
    }

    pub fn is_done(&self) -> bool {
        !matches!(*self.outcome.lock(), TaskOutcome::Pending)
    }

    fn succeeded(&self) -> bool {
        matches!(*self.outcome.lock(), TaskOutcome::Succeeded)
    }

    fn is_live_registration(&self) -> bool {
        self.is_registration() && self.succeeded()
    }

    fn is_run_by_current_thread(&self) -> bool {
        self.runner == thread::current().id()
    }

    /// Block until the task has finished. Returns its failure, if any.
    pub fn wait(&self) -> Result<()> {
        let mut outcome = self.outcome.lock();
        while matches!(*outcome, TaskOutcome::Pending) {
            self.completed.wait(&mut outcome);
        }
        match &*outcome {
            TaskOutcome::Failed(e) => Err(e.clone()),
            _ => Ok(()),
        }
    }

    fn complete(&self, result: &Result<()>) {
        let mut outcome = self.outcome.lock();
        *outcome = match result {
            Ok(()) => TaskOutcome::Succeeded,
            Err(e) => TaskOutcome::Failed(e.clone()),
        };
        self.completed.notify_all();
    }
}

impl PartialEq for RegistryFutureTask {
    fn eq(&self, other: &Self) -> bool {
        self.service_id == other.service_id
    }
}

impl Eq for RegistryFutureTask {}

impl Hash for RegistryFutureTask {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.service_id.hash(state);
    }
}

impl PartialOrd for RegistryFutureTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for RegistryFutureTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.service_id.cmp(&other.service_id)
    }
}

impl fmt::Debug for RegistryFutureTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            TaskKind::Register => "register",
            TaskKind::Unregister { .. } => "unregister",
        };
        f.debug_struct("RegistryFutureTask")
            .field("service_id", &self.service_id)
            .field("service_name", &self.service_name)
            .field("kind", &kind)
            .field("done", &self.is_done())
            .finish()
    }
}

#[derive(Default)]
struct RegistryTables {
    destroyed: bool,
    by_name: HashMap<ServiceName, Arc<RegistryFutureTask>>,
    // registration tasks only, ordered by service id
    by_type: HashMap<ServiceType, BTreeSet<Arc<RegistryFutureTask>>>,
}

impl RegistryTables {
    fn index(&mut self, task: &Arc<RegistryFutureTask>, types: &[ServiceType]) {
        for declared in types {
            for service_type in declared.closure() {
                self.by_type.entry(service_type).or_default().insert(Arc::clone(task));
            }
        }
    }

    fn unindex(&mut self, task: &Arc<RegistryFutureTask>) {
        for bucket in self.by_type.values_mut() {
            bucket.remove(task);
        }
        self.by_type.retain(|_, bucket| !bucket.is_empty());
    }

    fn remove_name_if(&mut self, name: &ServiceName, task: &Arc<RegistryFutureTask>) {
        if self.by_name.get(name).is_some_and(|current| Arc::ptr_eq(current, task)) {
            self.by_name.remove(name);
        }
    }
}

/// Name and type index over every registered [`ServiceManager`].
///
/// Register and unregister for one name are strictly serialized by a claim
/// loop: a caller either finds a finished registration, waits (outside the
/// table lock) for an unfinished one and retries, or claims the slot. The
/// table lock is never held while a service lock is taken.
pub struct ServiceManagerRegistry {
    kernel_name: String,
    manager_factory: ServiceManagerFactory,
    next_service_id: AtomicU64,
    tables: Mutex<RegistryTables>,
}

impl ServiceManagerRegistry {
    pub fn new(kernel_name: impl Into<String>, manager_factory: ServiceManagerFactory) -> Self {
        Self {
            kernel_name: kernel_name.into(),
            manager_factory,
            next_service_id: AtomicU64::new(0),
            tables: Mutex::new(RegistryTables::default()),
        }
    }

    fn not_running(&self) -> Error {
        Error::KernelNotRunning {
            kernel: self.kernel_name.clone(),
        }
    }

    /// Register `factory` under `name` and initialize its manager.
    ///
    /// On failure the registry is left exactly as it was and the cause is
    /// wrapped in [`Error::ServiceRegistration`].
    pub fn register_service(
        &self,
        name: ServiceName,
        factory: Arc<dyn ServiceFactory>,
    ) -> Result<Arc<ServiceManager>> {
        if !factory.is_restartable() && !factory.is_enabled() {
            return Err(Error::illegal_state(
                &name,
                "A disabled non-restartable service factory can not be registered",
            ));
        }

        let task = loop {
            let existing = {
                let mut tables = self.tables.lock();
                if tables.destroyed {
                    return Err(self.not_running());
                }
                match tables.by_name.get(&name) {
                    Some(existing) => Arc::clone(existing),
                    None => {
                        let service_id = ServiceId(self.next_service_id.fetch_add(1, Ordering::SeqCst) + 1);
                        let manager =
                            self.manager_factory
                                .create_service_manager(service_id, name.clone(), Arc::clone(&factory));
                        let task = Arc::new(RegistryFutureTask::register(manager));
                        tables.by_name.insert(name.clone(), Arc::clone(&task));
                        tables.index(&task, &factory.types());
                        break task;
                    }
                }
            };

            if existing.is_done() || existing.is_run_by_current_thread() {
                return Err(Error::ServiceAlreadyExists { name });
            }
            // the outcome is read from the table on the next pass
            let _ = existing.wait();
        };

        debug!("Registering service '{}' as {}", name, task.service_id);
        let result = task.manager.initialize();
        if result.is_err() {
            let mut tables = self.tables.lock();
            tables.remove_name_if(&name, &task);
            tables.unindex(&task);
        }
        task.complete(&result);

        match result {
            Ok(()) => Ok(Arc::clone(&task.manager)),
            Err(e) => Err(Error::ServiceRegistration {
                name,
                source: Box::new(e),
            }),
        }
    }

    /// Stop and destroy the service under `name` and drop it from both
    /// indexes. If the destroy fails the service stays registered and the
    /// cause is returned.
    pub fn unregister_service(&self, name: &ServiceName, strategy: &dyn StopStrategy) -> Result<()> {
        let (task, registration) = loop {
            let existing = {
                let mut tables = self.tables.lock();
                let existing = match tables.by_name.get(name) {
                    Some(existing) => Arc::clone(existing),
                    None => return Err(Error::ServiceNotFound { name: name.clone() }),
                };
                if existing.is_live_registration() {
                    let task = Arc::new(RegistryFutureTask::unregister(Arc::clone(&existing)));
                    tables.by_name.insert(name.clone(), Arc::clone(&task));
                    break (task, existing);
                }
                existing
            };

            if existing.is_run_by_current_thread() {
                return Err(Error::illegal_state(
                    name,
                    "Service is being registered or unregistered by the current thread",
                ));
            }
            let _ = existing.wait();
        };

        debug!("Unregistering service '{}'", name);
        let result = task.manager.destroy(strategy);
        {
            let mut tables = self.tables.lock();
            match &result {
                Ok(()) => {
                    tables.remove_name_if(name, &task);
                    tables.unindex(&registration);
                }
                Err(_) => {
                    if !tables.destroyed {
                        tables.by_name.insert(name.clone(), Arc::clone(&registration));
                    }
                }
            }
        }
        task.complete(&result);
        result
    }

    pub fn is_registered(&self, name: &ServiceName) -> bool {
        let tables = self.tables.lock();
        tables
            .by_name
            .get(name)
            .is_some_and(|task| task.is_live_registration() || !task.is_registration())
    }

    /// The manager registered under `name`, waiting for an unfinished
    /// register or unregister of that name by another thread.
    pub fn get_service_manager(&self, name: &ServiceName) -> Result<Arc<ServiceManager>> {
        loop {
            let existing = {
                let tables = self.tables.lock();
                match tables.by_name.get(name) {
                    Some(existing) => Arc::clone(existing),
                    None => return Err(Error::ServiceNotFound { name: name.clone() }),
                }
            };
            if existing.is_done() || existing.is_run_by_current_thread() {
                return Ok(Arc::clone(&existing.manager));
            }
            let _ = existing.wait();
        }
    }

    /// Every registered manager whose service provides `service_type`, in
    /// registration order.
    pub fn get_service_managers(&self, service_type: &ServiceType) -> Vec<Arc<ServiceManager>> {
        let tables = self.tables.lock();
        tables
            .by_type
            .get(service_type)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|task| task.is_live_registration())
                    .map(|task| Arc::clone(&task.manager))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The earliest registered manager providing `service_type`.
    pub fn get_service_manager_by_type(&self, service_type: &ServiceType) -> Option<Arc<ServiceManager>> {
        self.get_service_managers(service_type).into_iter().next()
    }

    /// Names of every registered service, in registration order.
    pub fn service_names(&self) -> Vec<ServiceName> {
        let tables = self.tables.lock();
        let mut tasks: Vec<&Arc<RegistryFutureTask>> = tables
            .by_name
            .values()
            .filter(|task| task.is_live_registration() || !task.is_registration())
            .collect();
        tasks.sort();
        tasks.into_iter().map(|task| task.service_name.clone()).collect()
    }

    /// Every type that currently has at least one registered service filed
    /// under it.
    pub fn registered_types(&self) -> Vec<ServiceType> {
        let tables = self.tables.lock();
        let mut types: Vec<ServiceType> = tables
            .by_type
            .iter()
            .filter(|(_, bucket)| bucket.iter().any(|task| task.is_live_registration()))
            .map(|(service_type, _)| service_type.clone())
            .collect();
        types.sort();
        types
    }

    pub fn is_destroyed(&self) -> bool {
        self.tables.lock().destroyed
    }

    /// Shut down every service.
    ///
    /// Newest first: two cooperative stop passes, one forced stop pass, then a
    /// forced destroy of each manager. Every error is collected and the sweep
    /// always runs to the end; the errors are returned together as
    /// [`Error::KernelErrors`].
    pub fn destroy(&self) -> Result<()> {
        let tasks: Vec<Arc<RegistryFutureTask>> = {
            let mut tables = self.tables.lock();
            if tables.destroyed {
                return Ok(());
            }
            tables.destroyed = true;
            tables.by_type.clear();
            tables.by_name.drain().map(|(_, task)| task).collect()
        };
        info!("Destroying {} service(s) of kernel '{}'", tasks.len(), self.kernel_name);

        let mut managers: Vec<Arc<ServiceManager>> = Vec::new();
        for task in tasks {
            if !task.is_done() && !task.is_run_by_current_thread() {
                // wake it if it is parked on a lock or condition wait
                task.manager.interrupt();
                let _ = task.wait();
            }
            let live = match &task.kind {
                TaskKind::Register => task.succeeded(),
                // a failed unregister leaves the service in place
                TaskKind::Unregister { registration } => task.is_done() && !task.succeeded() && registration.succeeded(),
            };
            if live {
                managers.push(Arc::clone(&task.manager));
            }
        }
        managers.sort_by(|a, b| b.cmp(a));
        managers.dedup_by(|a, b| a.service_id() == b.service_id());

        let mut errors = Vec::new();
        for _ in 0..2 {
            for manager in &managers {
                if let Err(e) = manager.stop(&StopStrategies::Asynchronous) {
                    errors.push(e);
                }
            }
        }
        for manager in &managers {
            if let Err(e) = manager.stop(&StopStrategies::Force) {
                errors.push(e);
            }
        }
        for manager in &managers {
            if let Err(e) = manager.destroy(&StopStrategies::Force) {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            warn!("Kernel '{}' shut down with {} error(s)", self.kernel_name, errors.len());
            Err(Error::KernelErrors(errors))
        }
    }
}

impl fmt::Debug for ServiceManagerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables.lock();
        f.debug_struct("ServiceManagerRegistry")
            .field("kernel_name", &self.kernel_name)
            .field("services", &tables.by_name.len())
            .field("types", &tables.by_type.len())
            .field("destroyed", &tables.destroyed)
            .finish()
    }
}
