use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::gbean::instance::GBeanContext;
use crate::kernel::error::BoxError;

/// Target object of a GBean, type erased.
pub type Target = dyn Any + Send;

pub(crate) type Invoker = Arc<dyn Fn(&mut Target, &[Value]) -> Result<Value, BoxError> + Send + Sync>;
pub(crate) type Constructor = Arc<dyn Fn(&GBeanContext, &[Value]) -> Result<Box<Target>, BoxError> + Send + Sync>;
pub(crate) type Hook = Arc<dyn Fn(&mut Target) -> Result<(), BoxError> + Send + Sync>;
pub(crate) type FailHook = Arc<dyn Fn(&mut Target) + Send + Sync>;

/// Shape of an attribute value or operation parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueType {
    Boolean,
    Integer,
    Float,
    String,
    List,
    Map,
    /// No value; the return type of setters.
    Unit,
    /// Accepts anything.
    Any,
}

impl ValueType {
    /// True if `value` can be passed where this type is expected. `null` fits
    /// every type.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ValueType::Any, _) | (_, Value::Null) => true,
            (ValueType::Boolean, Value::Bool(_)) => true,
            (ValueType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (ValueType::Float, Value::Number(_)) => true,
            (ValueType::String, Value::String(_)) => true,
            (ValueType::List, Value::Array(_)) => true,
            (ValueType::Map, Value::Object(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One entry of a GBean's method table.
#[derive(Clone)]
pub struct MethodInfo {
    name: String,
    parameter_types: Vec<ValueType>,
    return_type: ValueType,
    pub(crate) invoker: Invoker,
}

impl MethodInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter_types(&self) -> &[ValueType] {
        &self.parameter_types
    }

    pub fn return_type(&self) -> ValueType {
        self.return_type
    }
}

impl fmt::Debug for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.parameter_types.iter().map(|t| t.to_string()).collect();
        write!(f, "{}({}) -> {}", self.name, params.join(", "), self.return_type)
    }
}

#[derive(Clone)]
pub(crate) struct ConstructorInfo {
    pub(crate) arguments: Vec<String>,
    pub(crate) construct: Constructor,
}

#[derive(Clone)]
pub(crate) struct LifecycleHooks {
    pub(crate) do_start: Hook,
    pub(crate) do_stop: Hook,
    pub(crate) do_fail: FailHook,
}

#[derive(Clone)]
pub(crate) struct DynamicHooks {
    pub(crate) get_attribute: Arc<dyn Fn(&mut Target, &str) -> Result<Value, BoxError> + Send + Sync>,
    pub(crate) set_attribute: Arc<dyn Fn(&mut Target, &str, Value) -> Result<(), BoxError> + Send + Sync>,
    pub(crate) invoke: Arc<dyn Fn(&mut Target, &str, &[Value]) -> Result<Value, BoxError> + Send + Sync>,
}

/// Callbacks a GBean target can implement to follow its own lifecycle.
pub trait GBeanLifecycle {
    /// Called after construction and attribute injection.
    fn do_start(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called before the target is dropped on a normal stop.
    fn do_stop(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called when start or stop failed.
    fn do_fail(&mut self) {}
}

/// A target that resolves attributes and operations by name at run time,
/// for members absent from its method table.
pub trait DynamicGBean {
    fn get_attribute(&self, name: &str) -> Result<Value, BoxError>;

    fn set_attribute(&mut self, name: &str, value: Value) -> Result<(), BoxError>;

    fn invoke(&mut self, operation: &str, arguments: &[Value]) -> Result<Value, BoxError>;
}

/// Static description of a GBean class: its method table and how to build,
/// start and stop one.
#[derive(Clone)]
pub struct GBeanInfo {
    class_name: String,
    methods: Vec<MethodInfo>,
    pub(crate) constructor: Option<ConstructorInfo>,
    persistent: Vec<String>,
    pub(crate) lifecycle: Option<LifecycleHooks>,
    pub(crate) dynamic: Option<DynamicHooks>,
}

impl GBeanInfo {
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn methods(&self) -> &[MethodInfo] {
        &self.methods
    }

    /// Attribute names read by the constructor, in argument order.
    pub fn constructor_arguments(&self) -> &[String] {
        self.constructor.as_ref().map(|c| c.arguments.as_slice()).unwrap_or(&[])
    }

    /// Attributes written back to the property table when the bean stops.
    pub fn persistent_attributes(&self) -> &[String] {
        &self.persistent
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic.is_some()
    }
}

impl fmt::Debug for GBeanInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GBeanInfo")
            .field("class_name", &self.class_name)
            .field("methods", &self.methods)
            .field("constructor", &self.constructor_arguments())
            .field("persistent", &self.persistent)
            .field("lifecycle", &self.lifecycle.is_some())
            .field("dynamic", &self.dynamic.is_some())
            .finish()
    }
}

fn downcast<T: Any>(target: &mut Target) -> Result<&mut T, BoxError> {
    target
        .downcast_mut::<T>()
        .ok_or_else(|| BoxError::from(format!("target is not a {}", std::any::type_name::<T>())))
}

/// Builds the [`GBeanInfo`] of target type `T`.
///
/// Methods are registered under their accessor-style names (`getName`,
/// `isActive`, `setName`); the index derives attributes from those names.
pub struct GBeanInfoBuilder<T> {
    info: GBeanInfo,
    _target: PhantomData<fn() -> T>,
}

impl<T: Any + Send> GBeanInfoBuilder<T> {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            info: GBeanInfo {
                class_name: class_name.into(),
                methods: Vec::new(),
                constructor: None,
                persistent: Vec::new(),
                lifecycle: None,
                dynamic: None,
            },
            _target: PhantomData,
        }
    }

    /// Add a method taking `parameter_types` and returning `return_type`.
    pub fn method<F>(mut self, name: &str, parameter_types: &[ValueType], return_type: ValueType, f: F) -> Self
    where
        F: Fn(&mut T, &[Value]) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        let invoker: Invoker = Arc::new(move |target: &mut Target, args: &[Value]| f(downcast::<T>(target)?, args));
        self.info.methods.push(MethodInfo {
            name: name.to_string(),
            parameter_types: parameter_types.to_vec(),
            return_type,
            invoker,
        });
        self
    }

    /// Add a no-argument accessor, e.g. `getName` or `isActive`.
    pub fn getter<F>(self, name: &str, value_type: ValueType, f: F) -> Self
    where
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        self.method(name, &[], value_type, move |target, _| Ok(f(target)))
    }

    /// Add a one-argument mutator, e.g. `setName`.
    pub fn setter<F>(self, name: &str, value_type: ValueType, f: F) -> Self
    where
        F: Fn(&mut T, Value) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.method(name, &[value_type], ValueType::Unit, move |target, args| {
            let value = args.first().cloned().unwrap_or(Value::Null);
            f(target, value)?;
            Ok(Value::Null)
        })
    }

    /// How to build the target. `arguments` name the attributes whose values
    /// are passed, in order.
    pub fn constructor<F>(mut self, arguments: &[&str], f: F) -> Self
    where
        F: Fn(&GBeanContext, &[Value]) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        let construct: Constructor = Arc::new(move |context: &GBeanContext, args: &[Value]| {
            let target: Box<Target> = Box::new(f(context, args)?);
            Ok(target)
        });
        self.info.constructor = Some(ConstructorInfo {
            arguments: arguments.iter().map(|a| a.to_string()).collect(),
            construct,
        });
        self
    }

    pub fn persistent(mut self, attribute: &str) -> Self {
        if !self.info.persistent.iter().any(|a| a == attribute) {
            self.info.persistent.push(attribute.to_string());
        }
        self
    }

    pub fn build(self) -> GBeanInfo {
        self.info
    }
}

impl<T: Any + Send + GBeanLifecycle> GBeanInfoBuilder<T> {
    /// Call the target's [`GBeanLifecycle`] hooks.
    pub fn lifecycle(mut self) -> Self {
        self.info.lifecycle = Some(LifecycleHooks {
            do_start: Arc::new(|target: &mut Target| downcast::<T>(target)?.do_start()),
            do_stop: Arc::new(|target: &mut Target| downcast::<T>(target)?.do_stop()),
            do_fail: Arc::new(|target: &mut Target| {
                if let Some(target) = target.downcast_mut::<T>() {
                    target.do_fail();
                }
            }),
        });
        self
    }
}

impl<T: Any + Send + DynamicGBean> GBeanInfoBuilder<T> {
    /// Route unknown attributes and operations through [`DynamicGBean`].
    pub fn dynamic(mut self) -> Self {
        self.info.dynamic = Some(DynamicHooks {
            get_attribute: Arc::new(|target: &mut Target, name: &str| downcast::<T>(target)?.get_attribute(name)),
            set_attribute: Arc::new(|target: &mut Target, name: &str, value: Value| {
                downcast::<T>(target)?.set_attribute(name, value)
            }),
            invoke: Arc::new(|target: &mut Target, name: &str, args: &[Value]| {
                downcast::<T>(target)?.invoke(name, args)
            }),
        });
        self
    }
}
