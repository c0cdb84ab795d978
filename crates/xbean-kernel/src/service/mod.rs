//! # Service Lifecycle
//!
//! Everything needed to register, start, stop and look up services:
//!
//! - [`types`]: names, ids, lifecycle states, service types and instances.
//! - [`factory`]: the [`ServiceFactory`] contract plus stock factories.
//! - [`condition`]: start/stop gate predicates and their aggregation.
//! - [`strategy`]: what to do when a condition is unsatisfied.
//! - [`lock`]: the per-service operation lock.
//! - [`manager`]: the per-service state machine ([`ServiceManager`]).
//! - [`registry`]: name and type lookup with serialized register/unregister.
pub mod condition;
pub mod factory;
pub mod lock;
pub mod manager;
pub mod manager_factory;
pub mod registry;
pub mod strategy;
pub mod types;

pub use condition::{
    AggregateCondition, ConditionContext, RunningServiceCondition, ServiceCondition, SimpleCondition,
    StoppedServiceCondition,
};
pub use factory::{ServiceContext, ServiceFactory, SimpleServiceFactory, StaticServiceFactory};
pub use lock::{ServiceLock, ServiceLockGuard};
pub use manager::ServiceManager;
pub use manager_factory::ServiceManagerFactory;
pub use registry::{RegistryFutureTask, ServiceManagerRegistry};
pub use strategy::{StartStrategies, StartStrategy, StopStrategies, StopStrategy, WaitDecision};
pub use types::{ServiceId, ServiceInstance, ServiceName, ServiceState, ServiceType};

// Test module declaration
#[cfg(test)]
mod tests;
