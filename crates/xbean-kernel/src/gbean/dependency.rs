use std::fmt;

use crate::kernel::standalone::KernelRef;
use crate::service::types::{ServiceName, ServiceState};

/// Something a GBean needs before it can be constructed.
///
/// `start` is asked once per GBean start and must not block; `stop` releases
/// whatever `start` acquired and is called in reverse order.
pub trait GBeanDependency: Send + Sync {
    fn description(&self) -> String;

    /// True once the dependency is available.
    fn start(&self) -> bool;

    fn stop(&self) {}
}

/// Satisfied while a kernel service is RUNNING.
#[derive(Clone)]
pub struct ServiceDependency {
    kernel: KernelRef,
    service: ServiceName,
}

impl ServiceDependency {
    pub fn new(kernel: KernelRef, service: impl Into<ServiceName>) -> Self {
        Self {
            kernel,
            service: service.into(),
        }
    }

    pub fn service(&self) -> &ServiceName {
        &self.service
    }
}

impl GBeanDependency for ServiceDependency {
    fn description(&self) -> String {
        format!("service '{}'", self.service)
    }

    fn start(&self) -> bool {
        self.kernel
            .upgrade()
            .and_then(|kernel| kernel.service_state(&self.service).ok())
            == Some(ServiceState::Running)
    }
}

impl fmt::Debug for ServiceDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDependency")
            .field("service", &self.service)
            .finish()
    }
}
