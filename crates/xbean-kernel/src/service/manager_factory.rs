use std::sync::Arc;
use std::time::Duration;

use crate::kernel::standalone::KernelRef;
use crate::monitor::{EventIdGenerator, ServiceMonitor};
use crate::service::factory::ServiceFactory;
use crate::service::manager::ServiceManager;
use crate::service::types::{ServiceId, ServiceName};

/// Builds the [`ServiceManager`] for each new registration, wiring in the
/// kernel's monitor, event id source and lock settings.
pub struct ServiceManagerFactory {
    kernel: KernelRef,
    monitor: Arc<dyn ServiceMonitor>,
    events: Arc<EventIdGenerator>,
    lock_timeout: Duration,
    condition_wait: Duration,
}

impl ServiceManagerFactory {
    pub fn new(
        kernel: KernelRef,
        monitor: Arc<dyn ServiceMonitor>,
        events: Arc<EventIdGenerator>,
        lock_timeout: Duration,
        condition_wait: Duration,
    ) -> Self {
        Self {
            kernel,
            monitor,
            events,
            lock_timeout,
            condition_wait,
        }
    }

    pub fn create_service_manager(
        &self,
        service_id: ServiceId,
        service_name: ServiceName,
        factory: Arc<dyn ServiceFactory>,
    ) -> Arc<ServiceManager> {
        Arc::new(ServiceManager::new(
            self.kernel.clone(),
            service_id,
            service_name,
            factory,
            Arc::clone(&self.monitor),
            Arc::clone(&self.events),
            self.lock_timeout,
            self.condition_wait,
        ))
    }
}
