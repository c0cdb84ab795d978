use std::any::{self, Any};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Unique, immutable identity of a service registration.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceName(Arc<str>);

impl ServiceName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceName({})", &self.0)
    }
}

impl From<&str> for ServiceName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ServiceName {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<&ServiceName> for ServiceName {
    fn from(name: &ServiceName) -> Self {
        name.clone()
    }
}

/// Registration sequence number. Assigned once, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(pub(crate) u64);

impl ServiceId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle phase of a managed service.
///
/// `Stopped` and `Running` are stable; `Starting` and `Stopping` only exist
/// while a start or stop is in progress (or parked waiting on conditions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServiceState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl ServiceState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => ServiceState::Starting,
            2 => ServiceState::Running,
            3 => ServiceState::Stopping,
            _ => ServiceState::Stopped,
        }
    }

    /// True for `Stopped` and `Running`.
    pub fn is_stable(&self) -> bool {
        matches!(self, ServiceState::Stopped | ServiceState::Running)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Stopped => "STOPPED",
            ServiceState::Starting => "STARTING",
            ServiceState::Running => "RUNNING",
            ServiceState::Stopping => "STOPPING",
        };
        f.write_str(s)
    }
}

/// A type a service can be looked up by.
///
/// Types form a hierarchy through [`ServiceType::extends`]; the registry's type
/// index files a service under the full transitive closure of its declared
/// types. Equality, hashing and ordering only consider the name.
#[derive(Clone)]
pub struct ServiceType {
    name: Cow<'static, str>,
    supertypes: Vec<ServiceType>,
}

impl ServiceType {
    /// The type named after a Rust type. Works for trait objects too, e.g.
    /// `ServiceType::of::<dyn Greeter>()`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            name: Cow::Borrowed(any::type_name::<T>()),
            supertypes: Vec::new(),
        }
    }

    /// An abstract type identified only by name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            supertypes: Vec::new(),
        }
    }

    /// Declare `parent` as a supertype of this type.
    pub fn extends(mut self, parent: ServiceType) -> Self {
        self.supertypes.push(parent);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supertypes(&self) -> &[ServiceType] {
        &self.supertypes
    }

    /// This type followed by every ancestor, breadth first, without duplicates.
    pub fn closure(&self) -> Vec<ServiceType> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut result = Vec::new();
        let mut queue: std::collections::VecDeque<&ServiceType> = std::collections::VecDeque::new();
        queue.push_back(self);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.name()) {
                continue;
            }
            result.push(current.clone());
            for parent in &current.supertypes {
                queue.push_back(parent);
            }
        }
        result
    }

    /// True if a value of type `other` can be used where `self` is expected.
    pub fn is_assignable_from(&self, other: &ServiceType) -> bool {
        other.closure().iter().any(|t| t == self)
    }
}

impl PartialEq for ServiceType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ServiceType {}

impl Hash for ServiceType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for ServiceType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServiceType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl fmt::Debug for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.supertypes.is_empty() {
            write!(f, "ServiceType({})", self.name)
        } else {
            let parents: Vec<&str> = self.supertypes.iter().map(|t| t.name()).collect();
            write!(f, "ServiceType({} : {})", self.name, parents.join(" + "))
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The live object produced by a [`ServiceFactory`](crate::service::factory::ServiceFactory).
///
/// Carries the concrete type plus any extra types (usually trait objects) the
/// factory says the value provides. Cloning is cheap and shares the value.
#[derive(Clone)]
pub struct ServiceInstance {
    value: Arc<dyn Any + Send + Sync>,
    provided: Vec<ServiceType>,
}

impl ServiceInstance {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            value,
            provided: vec![ServiceType::of::<T>()],
        }
    }

    /// Declare that this instance also satisfies `service_type`.
    pub fn with_type(mut self, service_type: ServiceType) -> Self {
        if !self.provided.contains(&service_type) {
            self.provided.push(service_type);
        }
        self
    }

    /// Name of the concrete type.
    pub fn type_name(&self) -> &str {
        self.provided.first().map(|t| t.name()).unwrap_or("<unknown>")
    }

    pub fn provided_types(&self) -> &[ServiceType] {
        &self.provided
    }

    pub fn is_assignable_to(&self, service_type: &ServiceType) -> bool {
        self.provided.iter().any(|t| service_type.is_assignable_from(t))
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// True if both handles share the same underlying value.
    pub fn same_instance(&self, other: &ServiceInstance) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.value) as *const (),
            Arc::as_ptr(&other.value) as *const (),
        )
    }
}

impl fmt::Debug for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceInstance")
            .field("type", &self.type_name())
            .field("provided", &self.provided)
            .finish()
    }
}
