use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use log::{debug, warn};
use parking_lot::Mutex;
use serde_json::Value;

use crate::gbean::dependency::GBeanDependency;
use crate::gbean::error::GBeanError;
use crate::gbean::index::{create_index, GAttributeInfo, GBeanIndex, OperationSignature};
use crate::gbean::info::{GBeanInfo, Target, ValueType};
use crate::kernel::error::{catch_callback, SharedError};
use crate::kernel::standalone::KernelRef;

/// Lifecycle phase of a [`GBeanInstance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GBeanState {
    Destroyed,
    Creating,
    Running,
    Destroying,
}

impl fmt::Display for GBeanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GBeanState::Destroyed => "DESTROYED",
            GBeanState::Creating => "CREATING",
            GBeanState::Running => "RUNNING",
            GBeanState::Destroying => "DESTROYING",
        };
        f.write_str(s)
    }
}

/// Passed to a GBean constructor: which bean is being built and in which
/// kernel.
#[derive(Debug, Clone)]
pub struct GBeanContext {
    bean_name: String,
    kernel: Option<KernelRef>,
}

impl GBeanContext {
    pub fn new(bean_name: impl Into<String>, kernel: Option<KernelRef>) -> Self {
        Self {
            bean_name: bean_name.into(),
            kernel,
        }
    }

    pub fn bean_name(&self) -> &str {
        &self.bean_name
    }

    pub fn kernel(&self) -> Option<&KernelRef> {
        self.kernel.as_ref()
    }
}

struct InstanceState {
    state: GBeanState,
    // thread currently inside a target callback
    caller: Option<ThreadId>,
}

/// A GBean: an index over a target object's attributes and operations, plus
/// the lifecycle that builds and tears the target down.
///
/// While DESTROYED, attributes live in a property table; while RUNNING they
/// are read and written through the target. Operations can only be invoked
/// while RUNNING.
///
/// Calls into the target are serialized. A target callback that calls back
/// into its own bean gets [`GBeanError::IllegalState`].
pub struct GBeanInstance {
    name: String,
    info: Arc<GBeanInfo>,
    index: GBeanIndex,
    kernel: Option<KernelRef>,
    dependencies: Vec<Arc<dyn GBeanDependency>>,
    inner: Mutex<InstanceState>,
    // lock order: target before inner
    target: Mutex<Option<Box<Target>>>,
    properties: Mutex<HashMap<String, Value>>,
}

impl GBeanInstance {
    pub fn new(name: impl Into<String>, info: Arc<GBeanInfo>) -> Result<Self, GBeanError> {
        let name = name.into();
        let index = create_index(&name, &info)?;
        Ok(Self {
            name,
            info,
            index,
            kernel: None,
            dependencies: Vec::new(),
            inner: Mutex::new(InstanceState {
                state: GBeanState::Destroyed,
                caller: None,
            }),
            target: Mutex::new(None),
            properties: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_kernel(mut self, kernel: KernelRef) -> Self {
        self.kernel = Some(kernel);
        self
    }

    pub fn with_dependency(mut self, dependency: Arc<dyn GBeanDependency>) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Seed the property table. Fails on unknown attributes or ill-typed values.
    pub fn with_property(self, attribute: &str, value: Value) -> Result<Self, GBeanError> {
        let index = self.attribute_position(attribute)?;
        self.check_value(&self.index.attributes()[index], &value)?;
        self.properties.lock().insert(attribute.to_string(), value);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self) -> &GBeanInfo {
        &self.info
    }

    pub fn index(&self) -> &GBeanIndex {
        &self.index
    }

    pub fn state(&self) -> GBeanState {
        self.inner.lock().state
    }

    pub fn dependency_descriptions(&self) -> Vec<String> {
        self.dependencies.iter().map(|d| d.description()).collect()
    }

    /// Snapshot of the property table.
    pub fn properties(&self) -> HashMap<String, Value> {
        self.properties.lock().clone()
    }

    fn illegal_state(&self, message: impl Into<String>) -> GBeanError {
        GBeanError::IllegalState {
            bean: self.name.clone(),
            message: message.into(),
        }
    }

    fn attribute_position(&self, attribute: &str) -> Result<usize, GBeanError> {
        self.index.attribute_index(attribute).ok_or_else(|| GBeanError::NoSuchAttribute {
            bean: self.name.clone(),
            attribute: attribute.to_string(),
        })
    }

    fn attribute_info(&self, index: usize) -> Result<&GAttributeInfo, GBeanError> {
        self.index.attribute(index).ok_or_else(|| GBeanError::NoSuchAttribute {
            bean: self.name.clone(),
            attribute: format!("#{}", index),
        })
    }

    fn check_value(&self, attribute: &GAttributeInfo, value: &Value) -> Result<(), GBeanError> {
        if attribute.value_type.accepts(value) {
            Ok(())
        } else {
            Err(GBeanError::InvalidArgument {
                bean: self.name.clone(),
                target: format!("attribute '{}'", attribute.name),
                message: format!("expected {}, got {}", attribute.value_type, value),
            })
        }
    }

    fn invocation_error(&self, target: impl Into<String>, source: SharedError) -> GBeanError {
        GBeanError::Invocation {
            bean: self.name.clone(),
            target: target.into(),
            source,
        }
    }

    /// Resolve dependencies, construct the target, inject attributes and run
    /// `do_start`.
    ///
    /// Returns `Ok(false)` without constructing anything when a dependency is
    /// not started yet. Any failure rolls back to DESTROYED with every
    /// dependency released.
    pub fn start(&self) -> Result<bool, GBeanError> {
        {
            let mut inner = self.inner.lock();
            let state = inner.state;
            match state {
                GBeanState::Running => return Ok(true),
                GBeanState::Destroyed => inner.state = GBeanState::Creating,
                other => return Err(self.illegal_state(format!("can not start while {}", other))),
            }
        }

        let mut started: Vec<&Arc<dyn GBeanDependency>> = Vec::new();
        for dependency in &self.dependencies {
            if dependency.start() {
                started.push(dependency);
            } else {
                debug!(
                    "GBean '{}' waiting for dependency {}",
                    self.name,
                    dependency.description()
                );
                release(&started);
                self.inner.lock().state = GBeanState::Destroyed;
                return Ok(false);
            }
        }

        match self.create_target() {
            Ok(target) => {
                *self.target.lock() = Some(target);
                self.inner.lock().state = GBeanState::Running;
                debug!("GBean '{}' is running", self.name);
                Ok(true)
            }
            Err(e) => {
                release(&started);
                self.inner.lock().state = GBeanState::Destroyed;
                Err(e)
            }
        }
    }

    fn create_target(&self) -> Result<Box<Target>, GBeanError> {
        let construction = |source: SharedError| GBeanError::Construction {
            bean: self.name.clone(),
            source,
        };

        let constructor = self
            .info
            .constructor
            .as_ref()
            .ok_or_else(|| self.illegal_state("no constructor is declared"))?;

        let properties = self.properties();
        let arguments: Vec<Value> = constructor
            .arguments
            .iter()
            .map(|name| properties.get(name).cloned().unwrap_or(Value::Null))
            .collect();
        let context = GBeanContext::new(self.name.clone(), self.kernel.clone());
        let mut target = catch_callback(|| (constructor.construct)(&context, &arguments)).map_err(construction)?;

        let injected = self.inject(target.as_mut(), &properties, &constructor.arguments).and_then(|()| {
            match &self.info.lifecycle {
                Some(hooks) => catch_callback(|| (hooks.do_start)(target.as_mut())),
                None => Ok(()),
            }
        });
        if let Err(source) = injected {
            if let Some(hooks) = &self.info.lifecycle {
                let _ = catch_callback(|| {
                    (hooks.do_fail)(target.as_mut());
                    Ok(())
                });
            }
            return Err(construction(source));
        }
        Ok(target)
    }

    /// Apply every stored property not consumed by the constructor.
    fn inject(
        &self,
        target: &mut Target,
        properties: &HashMap<String, Value>,
        consumed: &[String],
    ) -> Result<(), SharedError> {
        for attribute in self.index.attributes() {
            if consumed.contains(&attribute.name) {
                continue;
            }
            let Some(value) = properties.get(&attribute.name) else {
                continue;
            };
            if let Some(setter) = attribute.setter {
                let invoker = &self.info.methods()[setter].invoker;
                catch_callback(|| invoker(target, std::slice::from_ref(value)))?;
            } else if let Some(dynamic) = &self.info.dynamic {
                catch_callback(|| (dynamic.set_attribute)(target, &attribute.name, value.clone()))?;
            }
        }
        Ok(())
    }

    /// Run `do_stop`, save persistent attributes to the property table, drop
    /// the target and release every dependency.
    pub fn stop(&self) -> Result<(), GBeanError> {
        {
            let mut inner = self.inner.lock();
            if inner.caller == Some(thread::current().id()) {
                return Err(self.illegal_state("can not stop from a callback of this bean"));
            }
            let state = inner.state;
            match state {
                GBeanState::Destroyed => return Ok(()),
                GBeanState::Running => inner.state = GBeanState::Destroying,
                other => return Err(self.illegal_state(format!("can not stop while {}", other))),
            }
        }
        // waits for a call in progress on another thread
        let mut target = self.target.lock().take();

        let mut failure = None;
        if let Some(target) = target.as_mut() {
            if let Some(hooks) = &self.info.lifecycle {
                if let Err(source) = catch_callback(|| (hooks.do_stop)(target.as_mut())) {
                    warn!("GBean '{}' failed to stop cleanly: {}", self.name, source);
                    let _ = catch_callback(|| {
                        (hooks.do_fail)(target.as_mut());
                        Ok(())
                    });
                    failure = Some(self.invocation_error("doStop", source));
                }
            }
            self.save_persistent(target.as_mut());
        }
        drop(target);

        let all: Vec<&Arc<dyn GBeanDependency>> = self.dependencies.iter().collect();
        release(&all);
        self.inner.lock().state = GBeanState::Destroyed;
        debug!("GBean '{}' is destroyed", self.name);

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn save_persistent(&self, target: &mut Target) {
        for attribute in self.index.attributes().iter().filter(|a| a.persistent) {
            let read = match (attribute.getter, &self.info.dynamic) {
                (Some(getter), _) => {
                    let invoker = &self.info.methods()[getter].invoker;
                    catch_callback(|| invoker(target, &[]))
                }
                (None, Some(dynamic)) => catch_callback(|| (dynamic.get_attribute)(target, &attribute.name)),
                (None, None) => continue,
            };
            match read {
                Ok(value) => {
                    self.properties.lock().insert(attribute.name.clone(), value);
                }
                Err(e) => warn!(
                    "GBean '{}' could not save persistent attribute '{}': {}",
                    self.name, attribute.name, e
                ),
            }
        }
    }

    /// Read attribute `name`. Unknown names are passed to a dynamic target
    /// while RUNNING.
    pub fn get_attribute(&self, name: &str) -> Result<Value, GBeanError> {
        match self.index.attribute_index(name) {
            Some(index) => self.get_attribute_by_index(index),
            None => self.dynamic_get(name),
        }
    }

    pub fn get_attribute_by_index(&self, index: usize) -> Result<Value, GBeanError> {
        let attribute = self.attribute_info(index)?;
        let stored = || self.properties.lock().get(&attribute.name).cloned().unwrap_or(Value::Null);
        let what = format!("read '{}'", attribute.name);
        match self.state() {
            GBeanState::Destroyed => Ok(stored()),
            GBeanState::Running => {
                if let Some(getter) = attribute.getter {
                    let invoker = &self.info.methods()[getter].invoker;
                    self.with_target(&what, |target| {
                        catch_callback(|| invoker(target, &[]))
                            .map_err(|e| self.invocation_error(format!("getter of '{}'", attribute.name), e))
                    })
                } else if let Some(dynamic) = &self.info.dynamic {
                    self.with_target(&what, |target| {
                        catch_callback(|| (dynamic.get_attribute)(target, &attribute.name))
                            .map_err(|e| self.invocation_error(format!("attribute '{}'", attribute.name), e))
                    })
                } else {
                    Ok(stored())
                }
            }
            other => Err(self.illegal_state(format!("can not {} while {}", what, other))),
        }
    }

    /// Write attribute `name`. Unknown names are passed to a dynamic target
    /// while RUNNING.
    pub fn set_attribute(&self, name: &str, value: Value) -> Result<(), GBeanError> {
        match self.index.attribute_index(name) {
            Some(index) => self.set_attribute_by_index(index, value),
            None => self.dynamic_set(name, value),
        }
    }

    pub fn set_attribute_by_index(&self, index: usize, value: Value) -> Result<(), GBeanError> {
        let attribute = self.attribute_info(index)?;
        self.check_value(attribute, &value)?;
        let what = format!("write '{}'", attribute.name);
        match self.state() {
            GBeanState::Destroyed => {
                self.properties.lock().insert(attribute.name.clone(), value);
                Ok(())
            }
            GBeanState::Running => {
                let written = self.with_target(&what, |target| {
                    let result = if let Some(setter) = attribute.setter {
                        let invoker = &self.info.methods()[setter].invoker;
                        catch_callback(|| invoker(target, std::slice::from_ref(&value)).map(|_| ()))
                    } else if let Some(dynamic) = &self.info.dynamic {
                        catch_callback(|| (dynamic.set_attribute)(target, &attribute.name, value.clone()))
                    } else {
                        return Err(self.illegal_state(format!(
                            "attribute '{}' is not writable while running",
                            attribute.name
                        )));
                    };
                    result.map_err(|e| self.invocation_error(format!("setter of '{}'", attribute.name), e))
                });
                written?;
                if attribute.persistent {
                    self.properties.lock().insert(attribute.name.clone(), value);
                }
                Ok(())
            }
            other => Err(self.illegal_state(format!("can not {} while {}", what, other))),
        }
    }

    /// Run `call` against the live target, one caller at a time.
    fn with_target<T>(
        &self,
        what: &str,
        call: impl FnOnce(&mut Target) -> Result<T, GBeanError>,
    ) -> Result<T, GBeanError> {
        let me = thread::current().id();
        {
            let inner = self.inner.lock();
            if inner.caller == Some(me) {
                return Err(self.illegal_state(format!("can not {} from a callback of this bean", what)));
            }
            if inner.state != GBeanState::Running {
                return Err(self.illegal_state(format!("can not {} while {}", what, inner.state)));
            }
        }

        let mut slot = self.target.lock();
        let Some(target) = slot.as_mut() else {
            // stopped while we waited for the previous caller
            return Err(self.illegal_state(format!("can not {} while {}", what, self.state())));
        };
        self.inner.lock().caller = Some(me);
        let result = call(target.as_mut());
        self.inner.lock().caller = None;
        result
    }

    fn no_such_attribute(&self, name: &str) -> GBeanError {
        GBeanError::NoSuchAttribute {
            bean: self.name.clone(),
            attribute: name.to_string(),
        }
    }

    fn dynamic_get(&self, name: &str) -> Result<Value, GBeanError> {
        let Some(dynamic) = &self.info.dynamic else {
            return Err(self.no_such_attribute(name));
        };
        if self.state() != GBeanState::Running {
            return Err(self.no_such_attribute(name));
        }
        self.with_target(&format!("read '{}'", name), |target| {
            catch_callback(|| (dynamic.get_attribute)(target, name))
                .map_err(|e| self.invocation_error(format!("attribute '{}'", name), e))
        })
    }

    fn dynamic_set(&self, name: &str, value: Value) -> Result<(), GBeanError> {
        let Some(dynamic) = &self.info.dynamic else {
            return Err(self.no_such_attribute(name));
        };
        if self.state() != GBeanState::Running {
            return Err(self.no_such_attribute(name));
        }
        self.with_target(&format!("write '{}'", name), |target| {
            catch_callback(|| (dynamic.set_attribute)(target, name, value))
                .map_err(|e| self.invocation_error(format!("attribute '{}'", name), e))
        })
    }

    /// Invoke the operation with exactly this signature.
    pub fn invoke(&self, signature: &OperationSignature, arguments: &[Value]) -> Result<Value, GBeanError> {
        match self.index.operation_index(signature) {
            Some(index) => self.invoke_by_index(index, arguments),
            None if self.info.dynamic.is_some() => self.dynamic_invoke(signature.name(), arguments),
            None => Err(GBeanError::NoSuchOperation {
                bean: self.name.clone(),
                operation: signature.to_string(),
            }),
        }
    }

    /// Invoke the single operation called `name` whose parameters accept
    /// `arguments`.
    pub fn invoke_by_name(&self, name: &str, arguments: &[Value]) -> Result<Value, GBeanError> {
        let candidates: Vec<usize> = self
            .index
            .operations_named(name)
            .into_iter()
            .filter(|&i| {
                self.index.operations()[i].signature.parameter_types().len() == arguments.len()
                    && self.index.operations()[i]
                        .signature
                        .parameter_types()
                        .iter()
                        .zip(arguments)
                        .all(|(t, v)| t.accepts(v))
            })
            .collect();
        match candidates.as_slice() {
            [index] => self.invoke_by_index(*index, arguments),
            [] if self.info.dynamic.is_some() => self.dynamic_invoke(name, arguments),
            [] => Err(GBeanError::NoSuchOperation {
                bean: self.name.clone(),
                operation: format!("{}/{}", name, arguments.len()),
            }),
            _ => Err(GBeanError::InvalidArgument {
                bean: self.name.clone(),
                target: format!("operation '{}'", name),
                message: "arguments match more than one overload".to_string(),
            }),
        }
    }

    pub fn invoke_by_index(&self, index: usize, arguments: &[Value]) -> Result<Value, GBeanError> {
        let operation = self.index.operation(index).ok_or_else(|| GBeanError::NoSuchOperation {
            bean: self.name.clone(),
            operation: format!("#{}", index),
        })?;
        let signature = &operation.signature;
        let types = signature.parameter_types();
        if types.len() != arguments.len() || !types.iter().zip(arguments).all(|(t, v)| t.accepts(v)) {
            return Err(GBeanError::InvalidArgument {
                bean: self.name.clone(),
                target: format!("operation {}", signature),
                message: format!("arguments {:?} do not match", arguments),
            });
        }

        let invoker = &self.info.methods()[operation.method].invoker;
        self.with_target(&format!("invoke {}", signature), |target| {
            catch_callback(|| invoker(target, arguments))
                .map_err(|e| self.invocation_error(format!("operation {}", signature), e))
        })
    }

    fn dynamic_invoke(&self, name: &str, arguments: &[Value]) -> Result<Value, GBeanError> {
        let Some(dynamic) = &self.info.dynamic else {
            return Err(GBeanError::NoSuchOperation {
                bean: self.name.clone(),
                operation: name.to_string(),
            });
        };
        self.with_target(&format!("invoke '{}'", name), |target| {
            catch_callback(|| (dynamic.invoke)(target, name, arguments))
                .map_err(|e| self.invocation_error(format!("operation '{}'", name), e))
        })
    }

    /// Positional access handle, bypassing name lookups.
    pub fn raw_invoker(self: &Arc<Self>) -> RawInvoker {
        RawInvoker {
            instance: Arc::clone(self),
        }
    }
}

fn release(dependencies: &[&Arc<dyn GBeanDependency>]) {
    for dependency in dependencies.iter().rev() {
        dependency.stop();
    }
}

impl fmt::Debug for GBeanInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GBeanInstance")
            .field("name", &self.name)
            .field("class_name", &self.info.class_name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Index-based access to a [`GBeanInstance`], for callers that resolved
/// positions once up front.
#[derive(Clone)]
pub struct RawInvoker {
    instance: Arc<GBeanInstance>,
}

impl RawInvoker {
    pub fn get_attribute(&self, index: usize) -> Result<Value, GBeanError> {
        self.instance.get_attribute_by_index(index)
    }

    pub fn set_attribute(&self, index: usize, value: Value) -> Result<(), GBeanError> {
        self.instance.set_attribute_by_index(index, value)
    }

    pub fn invoke(&self, index: usize, arguments: &[Value]) -> Result<Value, GBeanError> {
        self.instance.invoke_by_index(index, arguments)
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.instance.index().attribute_index(name)
    }

    pub fn operation_index(&self, name: &str, parameter_types: &[ValueType]) -> Option<usize> {
        self.instance
            .index()
            .operation_index(&OperationSignature::new(name, parameter_types))
    }
}

impl fmt::Debug for RawInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RawInvoker").field(&self.instance.name()).finish()
    }
}
