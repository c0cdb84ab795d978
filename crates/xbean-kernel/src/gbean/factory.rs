use std::fmt;
use std::sync::Arc;

use crate::gbean::error::GBeanError;
use crate::gbean::instance::GBeanInstance;
use crate::kernel::error::BoxError;
use crate::service::condition::{RunningServiceCondition, ServiceCondition};
use crate::service::factory::{ServiceContext, ServiceFactory};
use crate::service::types::{ServiceInstance, ServiceName, ServiceType};

/// Exposes a [`GBeanInstance`] as a kernel service: starting the service
/// starts the GBean, stopping it stops the GBean.
///
/// The service instance is the `GBeanInstance` itself, so callers reach
/// attributes and operations through
/// `kernel.service(name)?.and_then(|s| s.downcast::<GBeanInstance>())`.
pub struct GBeanServiceFactory {
    instance: Arc<GBeanInstance>,
    types: Vec<ServiceType>,
    start_conditions: Vec<Arc<dyn ServiceCondition>>,
}

impl GBeanServiceFactory {
    pub fn new(instance: Arc<GBeanInstance>) -> Self {
        Self {
            instance,
            types: vec![ServiceType::of::<GBeanInstance>()],
            start_conditions: Vec::new(),
        }
    }

    /// Also file the service under `service_type`.
    pub fn with_type(mut self, service_type: ServiceType) -> Self {
        self.types.push(service_type);
        self
    }

    /// Hold the start until `service` is RUNNING, so the GBean's matching
    /// [`ServiceDependency`](crate::gbean::dependency::ServiceDependency)
    /// is satisfied when it is constructed.
    pub fn waits_for(mut self, service: impl Into<ServiceName>) -> Self {
        self.start_conditions.push(RunningServiceCondition::new(service));
        self
    }

    pub fn instance(&self) -> &Arc<GBeanInstance> {
        &self.instance
    }
}

impl ServiceFactory for GBeanServiceFactory {
    fn types(&self) -> Vec<ServiceType> {
        self.types.clone()
    }

    fn start_conditions(&self) -> Vec<Arc<dyn ServiceCondition>> {
        self.start_conditions.clone()
    }

    fn create_service(&self, _context: &ServiceContext) -> Result<ServiceInstance, BoxError> {
        if !self.instance.start()? {
            return Err(Box::new(GBeanError::DependencyUnavailable {
                bean: self.instance.name().to_string(),
                dependency: self.instance.dependency_descriptions().join(", "),
            }));
        }
        let service = self
            .types
            .iter()
            .skip(1)
            .fold(ServiceInstance::from_arc(Arc::clone(&self.instance)), |service, t| {
                service.with_type(t.clone())
            });
        Ok(service)
    }

    fn destroy_service(&self, _context: &ServiceContext, _service: ServiceInstance) -> Result<(), BoxError> {
        self.instance.stop()?;
        Ok(())
    }
}

impl fmt::Debug for GBeanServiceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GBeanServiceFactory")
            .field("instance", &self.instance)
            .field("types", &self.types)
            .finish()
    }
}
