use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use log::info;

use crate::kernel::config::KernelConfig;
use crate::kernel::error::{Error, Result};
use crate::monitor::{
    EventIdGenerator, KernelMonitor, LoggingKernelMonitor, LoggingServiceMonitor, ServiceMonitor,
    ServiceMonitorBroadcaster,
};
use crate::service::factory::ServiceFactory;
use crate::service::manager::ServiceManager;
use crate::service::manager_factory::ServiceManagerFactory;
use crate::service::registry::ServiceManagerRegistry;
use crate::service::strategy::{StartStrategies, StartStrategy, StopStrategies, StopStrategy};
use crate::service::types::{ServiceInstance, ServiceName, ServiceState, ServiceType};

struct KernelInner {
    config: KernelConfig,
    running: AtomicBool,
    registry: ServiceManagerRegistry,
    broadcaster: Arc<ServiceMonitorBroadcaster>,
}

/// A kernel: the service registry plus the monitor broadcaster, behind one
/// handle. Cloning is cheap and shares the kernel.
///
/// Services never hold the kernel strongly; they get a [`KernelRef`].
/// Dropping every handle without calling [`StandaloneKernel::destroy`] leaves
/// running services undestroyed.
#[derive(Clone)]
pub struct StandaloneKernel {
    inner: Arc<KernelInner>,
}

/// Weak handle to a [`StandaloneKernel`], held by services, conditions and
/// events.
#[derive(Clone)]
pub struct KernelRef(Weak<KernelInner>);

impl KernelRef {
    /// A handle that never resolves; for objects used outside any kernel.
    pub fn detached() -> Self {
        KernelRef(Weak::new())
    }

    pub fn upgrade(&self) -> Option<StandaloneKernel> {
        self.0.upgrade().map(|inner| StandaloneKernel { inner })
    }
}

impl fmt::Debug for KernelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.upgrade() {
            Some(inner) => write!(f, "KernelRef({})", inner.config.kernel_name),
            None => f.write_str("KernelRef(<gone>)"),
        }
    }
}

impl StandaloneKernel {
    /// Boot a kernel that logs monitor failures.
    pub fn new(config: KernelConfig) -> Self {
        Self::with_kernel_monitor(config, Arc::new(LoggingKernelMonitor))
    }

    pub fn with_kernel_monitor(config: KernelConfig, kernel_monitor: Arc<dyn KernelMonitor>) -> Self {
        let broadcaster = Arc::new(ServiceMonitorBroadcaster::new(kernel_monitor));
        if config.log_transitions {
            broadcaster.add_service_monitor(Arc::new(LoggingServiceMonitor::verbose()), None);
        }
        let events = Arc::new(EventIdGenerator::new());

        let inner = Arc::new_cyclic(|weak: &Weak<KernelInner>| {
            let monitor: Arc<dyn ServiceMonitor> = broadcaster.clone();
            let manager_factory = ServiceManagerFactory::new(
                KernelRef(weak.clone()),
                monitor,
                events,
                config.lock_timeout(),
                config.condition_wait(),
            );
            KernelInner {
                registry: ServiceManagerRegistry::new(config.kernel_name.clone(), manager_factory),
                running: AtomicBool::new(true),
                broadcaster,
                config,
            }
        });
        info!("Kernel '{}' started", inner.config.kernel_name);
        Self { inner }
    }

    pub fn kernel_ref(&self) -> KernelRef {
        KernelRef(Arc::downgrade(&self.inner))
    }

    pub fn kernel_name(&self) -> &str {
        &self.inner.config.kernel_name
    }

    pub fn config(&self) -> &KernelConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::KernelNotRunning {
                kernel: self.kernel_name().to_string(),
            })
        }
    }

    /// Stop and destroy every service. Runs to completion and reports every
    /// failure at the end as [`Error::KernelErrors`]. Later calls do nothing.
    pub fn destroy(&self) -> Result<()> {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Kernel '{}' shutting down", self.kernel_name());
        let result = self.inner.registry.destroy();
        info!("Kernel '{}' stopped", self.kernel_name());
        result
    }

    pub fn register_service(&self, name: impl Into<ServiceName>, factory: Arc<dyn ServiceFactory>) -> Result<()> {
        self.ensure_running()?;
        self.inner.registry.register_service(name.into(), factory).map(|_| ())
    }

    pub fn unregister_service(&self, name: &ServiceName) -> Result<()> {
        self.unregister_service_with(name, &StopStrategies::Synchronous)
    }

    pub fn unregister_service_with(&self, name: &ServiceName, strategy: &dyn StopStrategy) -> Result<()> {
        self.ensure_running()?;
        self.inner.registry.unregister_service(name, strategy)
    }

    pub fn is_registered(&self, name: &ServiceName) -> bool {
        self.is_running() && self.inner.registry.is_registered(name)
    }

    pub fn service_manager(&self, name: &ServiceName) -> Result<Arc<ServiceManager>> {
        self.inner.registry.get_service_manager(name)
    }

    pub fn service_state(&self, name: &ServiceName) -> Result<ServiceState> {
        Ok(self.service_manager(name)?.state())
    }

    pub fn service_start_time(&self, name: &ServiceName) -> Result<u64> {
        Ok(self.service_manager(name)?.start_time())
    }

    /// Start `name`, failing if its start conditions are not satisfied.
    pub fn start_service(&self, name: &ServiceName) -> Result<()> {
        self.start_service_with(name, &StartStrategies::Synchronous)
    }

    pub fn start_service_with(&self, name: &ServiceName, strategy: &dyn StartStrategy) -> Result<()> {
        self.ensure_running()?;
        self.service_manager(name)?.start(false, strategy)
    }

    /// Start `name`, then every service it owns, transitively.
    pub fn start_service_recursive(&self, name: &ServiceName, strategy: &dyn StartStrategy) -> Result<()> {
        self.ensure_running()?;
        self.service_manager(name)?.start(true, strategy)
    }

    /// Stop `name`, failing if its stop conditions are not satisfied.
    pub fn stop_service(&self, name: &ServiceName) -> Result<()> {
        self.stop_service_with(name, &StopStrategies::Synchronous).map(|_| ())
    }

    /// Returns `Ok(false)` if the strategy left the service STOPPING.
    pub fn stop_service_with(&self, name: &ServiceName, strategy: &dyn StopStrategy) -> Result<bool> {
        self.ensure_running()?;
        let manager = self.service_manager(name)?;
        if !manager.is_restartable() {
            return Err(Error::illegal_state(
                name,
                "A non-restartable service can only be stopped by unregistering it",
            ));
        }
        manager.stop(strategy)
    }

    /// The live instance of `name`, if it is RUNNING.
    pub fn service(&self, name: &ServiceName) -> Result<Option<ServiceInstance>> {
        Ok(self.service_manager(name)?.service())
    }

    pub fn service_factory(&self, name: &ServiceName) -> Result<Arc<dyn ServiceFactory>> {
        Ok(Arc::clone(self.service_manager(name)?.service_factory()))
    }

    /// Names of every registered service, in registration order.
    pub fn service_names(&self) -> Vec<ServiceName> {
        self.inner.registry.service_names()
    }

    /// The running instance of the earliest registered service providing
    /// `service_type`.
    pub fn service_by_type(&self, service_type: &ServiceType) -> Option<ServiceInstance> {
        self.inner
            .registry
            .get_service_managers(service_type)
            .into_iter()
            .find_map(|manager| manager.service())
    }

    /// Every running instance providing `service_type`, in registration order.
    pub fn services_by_type(&self, service_type: &ServiceType) -> Vec<ServiceInstance> {
        self.inner
            .registry
            .get_service_managers(service_type)
            .into_iter()
            .filter_map(|manager| manager.service())
            .collect()
    }

    /// Names of every registered service providing `service_type`, running or not.
    pub fn service_names_by_type(&self, service_type: &ServiceType) -> Vec<ServiceName> {
        self.inner
            .registry
            .get_service_managers(service_type)
            .iter()
            .map(|manager| manager.service_name().clone())
            .collect()
    }

    /// Types that currently have at least one registered service.
    pub fn registered_types(&self) -> Vec<ServiceType> {
        self.inner.registry.registered_types()
    }

    /// Watch every service.
    pub fn add_service_monitor(&self, monitor: Arc<dyn ServiceMonitor>) {
        self.inner.broadcaster.add_service_monitor(monitor, None);
    }

    /// Watch only `name`.
    pub fn add_service_monitor_for(&self, monitor: Arc<dyn ServiceMonitor>, name: &ServiceName) {
        self.inner.broadcaster.add_service_monitor(monitor, Some(name));
    }

    pub fn remove_service_monitor(&self, monitor: &Arc<dyn ServiceMonitor>) -> bool {
        self.inner.broadcaster.remove_service_monitor(monitor)
    }

    /// Wake every thread blocked on `name`'s lock or conditions.
    pub fn interrupt_service(&self, name: &ServiceName) -> Result<()> {
        self.service_manager(name)?.interrupt();
        Ok(())
    }
}

impl fmt::Debug for StandaloneKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandaloneKernel")
            .field("kernel_name", &self.kernel_name())
            .field("running", &self.is_running())
            .field("registry", &self.inner.registry)
            .finish()
    }
}
