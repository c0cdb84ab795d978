use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::gbean::error::GBeanError;
use crate::gbean::info::{GBeanInfo, ValueType};

/// Name plus parameter types; the identity of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationSignature {
    name: String,
    parameter_types: Vec<ValueType>,
}

impl OperationSignature {
    pub fn new(name: impl Into<String>, parameter_types: &[ValueType]) -> Self {
        Self {
            name: name.into(),
            parameter_types: parameter_types.to_vec(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter_types(&self) -> &[ValueType] {
        &self.parameter_types
    }
}

impl fmt::Display for OperationSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.parameter_types.iter().map(|t| t.to_string()).collect();
        write!(f, "{}({})", self.name, params.join(", "))
    }
}

/// An attribute derived from accessor methods, or declared by the
/// constructor or as persistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GAttributeInfo {
    pub name: String,
    pub value_type: ValueType,
    /// Method table position of the getter
    pub getter: Option<usize>,
    /// Method table position of the setter
    pub setter: Option<usize>,
    pub persistent: bool,
}

impl GAttributeInfo {
    pub fn is_readable(&self) -> bool {
        self.getter.is_some()
    }

    pub fn is_writable(&self) -> bool {
        self.setter.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct GOperationInfo {
    pub signature: OperationSignature,
    pub return_type: ValueType,
    /// Method table position
    pub method: usize,
}

/// Attribute and operation tables of one GBean, addressable by position or
/// by name.
#[derive(Debug, Clone, Default)]
pub struct GBeanIndex {
    attributes: Vec<GAttributeInfo>,
    attribute_index: HashMap<String, usize>,
    operations: Vec<GOperationInfo>,
    operation_index: HashMap<OperationSignature, usize>,
}

impl GBeanIndex {
    pub fn attributes(&self) -> &[GAttributeInfo] {
        &self.attributes
    }

    pub fn operations(&self) -> &[GOperationInfo] {
        &self.operations
    }

    pub fn attribute(&self, index: usize) -> Option<&GAttributeInfo> {
        self.attributes.get(index)
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attribute_index.get(name).copied()
    }

    pub fn operation(&self, index: usize) -> Option<&GOperationInfo> {
        self.operations.get(index)
    }

    pub fn operation_index(&self, signature: &OperationSignature) -> Option<usize> {
        self.operation_index.get(signature).copied()
    }

    /// Positions of every operation called `name`.
    pub fn operations_named(&self, name: &str) -> Vec<usize> {
        self.operations
            .iter()
            .enumerate()
            .filter(|(_, op)| op.signature.name() == name)
            .map(|(i, _)| i)
            .collect()
    }
}

/// JavaBeans style property name: `Name` -> `name`, but `URL` stays `URL`.
pub fn decapitalize(name: &str) -> String {
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(first), Some(second)) if first.is_uppercase() && second.is_uppercase() => name.to_string(),
        (Some(first), _) => first.to_lowercase().chain(name[first.len_utf8()..].chars()).collect(),
        (None, _) => String::new(),
    }
}

fn accessor_property(name: &str, prefix: &str) -> Option<String> {
    name.strip_prefix(prefix).filter(|rest| !rest.is_empty()).map(decapitalize)
}

/// Build the attribute and operation index of `info`.
///
/// - `getX()` and `isX()` (only when returning Boolean) are getters; two
///   getters of one property must agree on type.
/// - `setX(v)` returning Unit is a setter. A property with setters of
///   different types is left out of the attributes.
/// - A getter and setter of one property must agree on type.
/// - Every method is also an operation keyed by name and parameter types.
pub fn create_index(bean: &str, info: &GBeanInfo) -> Result<GBeanIndex, GBeanError> {
    let invalid = |message: String| GBeanError::InvalidConfiguration {
        bean: bean.to_string(),
        message,
    };

    let mut getters: BTreeMap<String, (ValueType, usize)> = BTreeMap::new();
    let mut setters: BTreeMap<String, Vec<(ValueType, usize)>> = BTreeMap::new();

    for (position, method) in info.methods().iter().enumerate() {
        let params = method.parameter_types();
        let returns = method.return_type();

        let getter = if params.is_empty() && returns != ValueType::Unit {
            accessor_property(method.name(), "get").or_else(|| {
                if returns == ValueType::Boolean {
                    accessor_property(method.name(), "is")
                } else {
                    None
                }
            })
        } else {
            None
        };
        if let Some(property) = getter {
            match getters.get(&property) {
                Some((existing, _)) if *existing != returns => {
                    return Err(invalid(format!(
                        "Getters for property '{}' disagree on its type: {} and {}",
                        property, existing, returns
                    )));
                }
                Some(_) => {}
                None => {
                    getters.insert(property, (returns, position));
                }
            }
            continue;
        }

        if params.len() == 1 && returns == ValueType::Unit {
            if let Some(property) = accessor_property(method.name(), "set") {
                setters.entry(property).or_default().push((params[0], position));
            }
        }
    }

    let mut properties: BTreeMap<String, GAttributeInfo> = BTreeMap::new();
    for (property, (value_type, position)) in &getters {
        properties.insert(
            property.clone(),
            GAttributeInfo {
                name: property.clone(),
                value_type: *value_type,
                getter: Some(*position),
                setter: None,
                persistent: false,
            },
        );
    }

    for (property, overloads) in &setters {
        let (value_type, position) = overloads[0];
        if overloads.iter().any(|(t, _)| *t != value_type) {
            log::debug!(
                "GBean '{}': property '{}' has setters of different types and is only exposed as operations",
                bean,
                property
            );
            properties.remove(property);
            continue;
        }
        match properties.get_mut(property) {
            Some(attribute) if attribute.value_type != value_type => {
                return Err(invalid(format!(
                    "Getter and setter of property '{}' disagree on its type: {} and {}",
                    property, attribute.value_type, value_type
                )));
            }
            Some(attribute) => attribute.setter = Some(position),
            None => {
                properties.insert(
                    property.clone(),
                    GAttributeInfo {
                        name: property.clone(),
                        value_type,
                        getter: None,
                        setter: Some(position),
                        persistent: false,
                    },
                );
            }
        }
    }

    // attributes only known through the constructor or as persistent state
    for declared in info.constructor_arguments().iter().chain(info.persistent_attributes()) {
        properties.entry(declared.clone()).or_insert_with(|| GAttributeInfo {
            name: declared.clone(),
            value_type: ValueType::Any,
            getter: None,
            setter: None,
            persistent: false,
        });
    }
    for persistent in info.persistent_attributes() {
        if let Some(attribute) = properties.get_mut(persistent) {
            attribute.persistent = true;
        }
    }

    let mut index = GBeanIndex::default();
    for (position, attribute) in properties.into_values().enumerate() {
        index.attribute_index.insert(attribute.name.clone(), position);
        index.attributes.push(attribute);
    }

    for (position, method) in info.methods().iter().enumerate() {
        let signature = OperationSignature::new(method.name(), method.parameter_types());
        if index.operation_index.contains_key(&signature) {
            return Err(invalid(format!("Operation {} is declared twice", signature)));
        }
        index.operation_index.insert(signature.clone(), index.operations.len());
        index.operations.push(GOperationInfo {
            signature,
            return_type: method.return_type(),
            method: position,
        });
    }

    Ok(index)
}
