use std::sync::Arc;

use crate::kernel::error::{Error, Result};
use crate::service::condition::{describe, ServiceCondition};
use crate::service::types::ServiceName;

/// What a start or stop should do about conditions that are not satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitDecision {
    /// Release the lock, wait for a condition to signal, then re-evaluate.
    Wait,
    /// Leave the service where it is (STARTING or STOPPING) and return.
    Abort,
    /// Carry on as if every condition were satisfied.
    Force,
}

/// Policy consulted by a start when conditions are unsatisfied.
pub trait StartStrategy: Send + Sync {
    /// Returning an error rolls the start back to STOPPED.
    fn wait_for_unsatisfied_conditions(
        &self,
        service_name: &ServiceName,
        conditions: &[Arc<dyn ServiceCondition>],
    ) -> Result<WaitDecision>;

    /// Called after a start has been rolled back to STOPPED. Returning `Ok`
    /// swallows the failure.
    fn start_error(&self, _service_name: &ServiceName, error: Error) -> Result<()> {
        Err(error)
    }
}

/// Policy consulted by a stop when conditions are unsatisfied.
pub trait StopStrategy: Send + Sync {
    /// Returning an error puts the service back to RUNNING.
    fn wait_for_unsatisfied_conditions(
        &self,
        service_name: &ServiceName,
        conditions: &[Arc<dyn ServiceCondition>],
    ) -> Result<WaitDecision>;
}

/// Built-in start policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStrategies {
    /// Leave the service STARTING; it completes once conditions are met and
    /// the service is started again.
    Asynchronous,
    /// Fail with [`Error::UnsatisfiedConditions`], rolling back to STOPPED.
    Synchronous,
    /// Like `Synchronous`; used when a failed start should also drop the
    /// registration, as for non-restartable services.
    Unregister,
    /// Wait until the conditions are satisfied.
    Block,
}

impl StartStrategy for StartStrategies {
    fn wait_for_unsatisfied_conditions(
        &self,
        service_name: &ServiceName,
        conditions: &[Arc<dyn ServiceCondition>],
    ) -> Result<WaitDecision> {
        match self {
            StartStrategies::Asynchronous => Ok(WaitDecision::Abort),
            StartStrategies::Synchronous | StartStrategies::Unregister => Err(Error::UnsatisfiedConditions {
                name: service_name.clone(),
                conditions: describe(conditions),
            }),
            StartStrategies::Block => Ok(WaitDecision::Wait),
        }
    }
}

/// Built-in stop policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStrategies {
    /// Leave the service STOPPING.
    Asynchronous,
    /// Fail with [`Error::UnsatisfiedConditions`], leaving the service RUNNING.
    Synchronous,
    /// Wait until the conditions are satisfied.
    Block,
    /// Stop regardless of conditions.
    Force,
}

impl StopStrategy for StopStrategies {
    fn wait_for_unsatisfied_conditions(
        &self,
        service_name: &ServiceName,
        conditions: &[Arc<dyn ServiceCondition>],
    ) -> Result<WaitDecision> {
        match self {
            StopStrategies::Asynchronous => Ok(WaitDecision::Abort),
            StopStrategies::Synchronous => Err(Error::UnsatisfiedConditions {
                name: service_name.clone(),
                conditions: describe(conditions),
            }),
            StopStrategies::Block => Ok(WaitDecision::Wait),
            StopStrategies::Force => Ok(WaitDecision::Force),
        }
    }
}
