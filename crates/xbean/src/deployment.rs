//! Deployment files: a `[kernel]` table plus the services to run.
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use xbean_kernel::kernel::ConfigFormat;
use xbean_kernel::service::RunningServiceCondition;
use xbean_kernel::{KernelConfig, KernelError, ServiceInstance, ServiceType, SimpleServiceFactory};

fn enabled_by_default() -> bool {
    true
}

/// One `[[services]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceDescriptor {
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub restartable: bool,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Services that must be RUNNING before this one starts
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Services started along with this one
    #[serde(default)]
    pub owns: Vec<String>,
    /// Extra type names the service is filed under
    #[serde(default)]
    pub types: Vec<String>,
}

/// What a deployed service is at run time: its own descriptor.
#[derive(Debug)]
pub struct DeployedService {
    pub name: String,
}

impl ServiceDescriptor {
    /// Factory building a [`DeployedService`] gated on `depends_on`.
    pub fn factory(&self) -> Arc<SimpleServiceFactory> {
        let types: Vec<ServiceType> = self.types.iter().map(ServiceType::named).collect();
        let name = self.name.clone();
        let provided = types.clone();
        let mut factory = SimpleServiceFactory::new(move |_| {
            let service = provided.iter().fold(
                ServiceInstance::new(DeployedService { name: name.clone() }),
                |service, t| service.with_type(t.clone()),
            );
            Ok(service)
        })
        .restartable(self.restartable)
        .enabled(self.enabled);
        for service_type in types {
            factory = factory.with_type(service_type);
        }
        for owned in &self.owns {
            factory = factory.owns(owned.as_str());
        }
        for dependency in &self.depends_on {
            factory = factory.start_condition(RunningServiceCondition::new(dependency.as_str()));
        }
        Arc::new(factory)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Deployment {
    pub kernel: KernelConfig,
    pub services: Vec<ServiceDescriptor>,
}

impl Deployment {
    /// Read and validate a deployment, picking JSON, YAML or TOML from the
    /// file extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KernelError> {
        let path = path.as_ref();
        let invalid = |message: String| KernelError::Config {
            path: path.to_path_buf(),
            message,
        };
        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| invalid("Unsupported deployment file extension".to_string()))?;
        let data = fs::read_to_string(path).map_err(|e| invalid(format!("Failed to read file: {}", e)))?;
        let deployment: Deployment = format.parse(&data).map_err(invalid)?;
        deployment.validate(path)?;
        Ok(deployment)
    }

    /// Reject duplicate names and references to undeclared services.
    pub fn validate(&self, path: &Path) -> Result<(), KernelError> {
        self.kernel.validate(path)?;
        let invalid = |message: String| KernelError::Config {
            path: PathBuf::from(path),
            message,
        };

        let mut names = HashSet::new();
        for service in &self.services {
            if service.name.trim().is_empty() {
                return Err(invalid("service names must not be empty".to_string()));
            }
            if !names.insert(service.name.as_str()) {
                return Err(invalid(format!("service '{}' is declared twice", service.name)));
            }
        }
        for service in &self.services {
            for dependency in &service.depends_on {
                if dependency == &service.name {
                    return Err(invalid(format!("service '{}' depends on itself", service.name)));
                }
                if !names.contains(dependency.as_str()) {
                    return Err(invalid(format!(
                        "service '{}' depends on undeclared service '{}'",
                        service.name, dependency
                    )));
                }
            }
            if let Some(owned) = service.owns.iter().find(|o| !names.contains(o.as_str())) {
                return Err(invalid(format!(
                    "service '{}' owns undeclared service '{}'",
                    service.name, owned
                )));
            }
        }
        Ok(())
    }
}
