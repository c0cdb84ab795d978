pub mod gbean;
pub mod kernel;
pub mod monitor;
pub mod service;

// Re-export the types applications touch most
pub use kernel::error::Error as KernelError;
pub use kernel::{KernelConfig, KernelRef, StandaloneKernel};
pub use monitor::{KernelMonitor, ServiceEvent, ServiceEventKind, ServiceMonitor};
pub use service::{
    ServiceCondition, ServiceContext, ServiceFactory, ServiceInstance, ServiceName, ServiceState, ServiceType,
    SimpleServiceFactory, StartStrategies, StopStrategies,
};
