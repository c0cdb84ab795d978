//! # GBeans
//!
//! A GBean wraps an arbitrary target object behind an index of attributes and
//! operations built from its [`GBeanInfo`], so it can be configured while
//! stopped and driven by name or by position while running.
//!
//! - [`info`]: the method table and [`GBeanInfoBuilder`].
//! - [`index`]: attribute and operation discovery ([`create_index`]).
//! - [`instance`]: the [`GBeanInstance`] lifecycle and dispatch.
//! - [`dependency`]: what must be available before construction.
//! - [`factory`]: [`GBeanServiceFactory`], running a GBean as a kernel service.
pub mod dependency;
pub mod error;
pub mod factory;
pub mod index;
pub mod info;
pub mod instance;

pub use dependency::{GBeanDependency, ServiceDependency};
pub use error::GBeanError;
pub use factory::GBeanServiceFactory;
pub use index::{create_index, GAttributeInfo, GBeanIndex, GOperationInfo, OperationSignature};
pub use info::{DynamicGBean, GBeanInfo, GBeanInfoBuilder, GBeanLifecycle, MethodInfo, Target, ValueType};
pub use instance::{GBeanContext, GBeanInstance, GBeanState, RawInvoker};

// Test module declaration
#[cfg(test)]
mod tests;
