use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::kernel::error::BoxError;
use crate::kernel::standalone::KernelRef;
use crate::service::condition::ServiceCondition;
use crate::service::types::{ServiceInstance, ServiceName, ServiceType};

/// Handed to a factory when its service is created or destroyed.
#[derive(Clone)]
pub struct ServiceContext {
    kernel: KernelRef,
    service_name: ServiceName,
}

impl ServiceContext {
    pub fn new(kernel: KernelRef, service_name: ServiceName) -> Self {
        Self { kernel, service_name }
    }

    pub fn kernel(&self) -> &KernelRef {
        &self.kernel
    }

    pub fn service_name(&self) -> &ServiceName {
        &self.service_name
    }
}

impl fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContext")
            .field("service_name", &self.service_name)
            .finish_non_exhaustive()
    }
}

/// User supplied recipe for a service.
///
/// The kernel owns lifecycle; the factory only says what the service needs
/// and how to build and tear down one instance.
pub trait ServiceFactory: Send + Sync {
    /// A disabled factory cannot be started.
    fn is_enabled(&self) -> bool {
        true
    }

    /// A restartable service is created on start and destroyed on stop. A
    /// non-restartable one is started on registration and lives until it is
    /// unregistered.
    fn is_restartable(&self) -> bool {
        true
    }

    /// Types the created instance is declared to provide.
    fn types(&self) -> Vec<ServiceType> {
        Vec::new()
    }

    fn start_conditions(&self) -> Vec<Arc<dyn ServiceCondition>> {
        Vec::new()
    }

    fn stop_conditions(&self) -> Vec<Arc<dyn ServiceCondition>> {
        Vec::new()
    }

    /// Services started along with this one by a recursive start.
    fn owned_services(&self) -> Vec<ServiceName> {
        Vec::new()
    }

    fn create_service(&self, context: &ServiceContext) -> Result<ServiceInstance, BoxError>;

    fn destroy_service(&self, _context: &ServiceContext, _service: ServiceInstance) -> Result<(), BoxError> {
        Ok(())
    }
}

type CreateFn = dyn Fn(&ServiceContext) -> Result<ServiceInstance, BoxError> + Send + Sync;
type DestroyFn = dyn Fn(&ServiceContext, ServiceInstance) -> Result<(), BoxError> + Send + Sync;

/// Closure backed factory with mutable conditions.
pub struct SimpleServiceFactory {
    create: Box<CreateFn>,
    destroy: Option<Box<DestroyFn>>,
    enabled: AtomicBool,
    restartable: bool,
    types: Vec<ServiceType>,
    owned: Vec<ServiceName>,
    start_conditions: Mutex<Vec<Arc<dyn ServiceCondition>>>,
    stop_conditions: Mutex<Vec<Arc<dyn ServiceCondition>>>,
}

impl SimpleServiceFactory {
    pub fn new<F>(create: F) -> Self
    where
        F: Fn(&ServiceContext) -> Result<ServiceInstance, BoxError> + Send + Sync + 'static,
    {
        Self {
            create: Box::new(create),
            destroy: None,
            enabled: AtomicBool::new(true),
            restartable: true,
            types: Vec::new(),
            owned: Vec::new(),
            start_conditions: Mutex::new(Vec::new()),
            stop_conditions: Mutex::new(Vec::new()),
        }
    }

    pub fn on_destroy<F>(mut self, destroy: F) -> Self
    where
        F: Fn(&ServiceContext, ServiceInstance) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.destroy = Some(Box::new(destroy));
        self
    }

    pub fn restartable(mut self, restartable: bool) -> Self {
        self.restartable = restartable;
        self
    }

    pub fn enabled(self, enabled: bool) -> Self {
        self.enabled.store(enabled, Ordering::SeqCst);
        self
    }

    pub fn with_type(mut self, service_type: ServiceType) -> Self {
        self.types.push(service_type);
        self
    }

    pub fn owns(mut self, service: impl Into<ServiceName>) -> Self {
        self.owned.push(service.into());
        self
    }

    pub fn start_condition(self, condition: Arc<dyn ServiceCondition>) -> Self {
        self.start_conditions.lock().push(condition);
        self
    }

    pub fn stop_condition(self, condition: Arc<dyn ServiceCondition>) -> Self {
        self.stop_conditions.lock().push(condition);
        self
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn add_start_condition(&self, condition: Arc<dyn ServiceCondition>) {
        self.start_conditions.lock().push(condition);
    }

    /// Stop conditions added after a non-restartable service was created are
    /// still honoured when it is destroyed.
    pub fn add_stop_condition(&self, condition: Arc<dyn ServiceCondition>) {
        self.stop_conditions.lock().push(condition);
    }
}

impl ServiceFactory for SimpleServiceFactory {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn is_restartable(&self) -> bool {
        self.restartable
    }

    fn types(&self) -> Vec<ServiceType> {
        self.types.clone()
    }

    fn start_conditions(&self) -> Vec<Arc<dyn ServiceCondition>> {
        self.start_conditions.lock().clone()
    }

    fn stop_conditions(&self) -> Vec<Arc<dyn ServiceCondition>> {
        self.stop_conditions.lock().clone()
    }

    fn owned_services(&self) -> Vec<ServiceName> {
        self.owned.clone()
    }

    fn create_service(&self, context: &ServiceContext) -> Result<ServiceInstance, BoxError> {
        (self.create)(context)
    }

    fn destroy_service(&self, context: &ServiceContext, service: ServiceInstance) -> Result<(), BoxError> {
        match &self.destroy {
            Some(destroy) => destroy(context, service),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for SimpleServiceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleServiceFactory")
            .field("enabled", &self.is_enabled())
            .field("restartable", &self.restartable)
            .field("types", &self.types)
            .field("owned", &self.owned)
            .finish_non_exhaustive()
    }
}

/// Registers an already constructed object. It is never restarted; the
/// instance is handed out as is and dropping it is left to its owner.
#[derive(Debug, Clone)]
pub struct StaticServiceFactory {
    service: ServiceInstance,
}

impl StaticServiceFactory {
    pub fn new(service: ServiceInstance) -> Self {
        Self { service }
    }
}

impl ServiceFactory for StaticServiceFactory {
    fn is_restartable(&self) -> bool {
        false
    }

    fn types(&self) -> Vec<ServiceType> {
        self.service.provided_types().to_vec()
    }

    fn create_service(&self, _context: &ServiceContext) -> Result<ServiceInstance, BoxError> {
        Ok(self.service.clone())
    }
}
