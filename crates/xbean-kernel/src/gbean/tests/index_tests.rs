use serde_json::Value;

use super::{counter_info, Journal};
use crate::gbean::error::GBeanError;
use crate::gbean::index::{create_index, decapitalize, OperationSignature};
use crate::gbean::info::{GBeanInfoBuilder, ValueType};

struct Bean;

fn builder() -> GBeanInfoBuilder<Bean> {
    GBeanInfoBuilder::<Bean>::new("Bean")
}

fn noop(_: &mut Bean, _: &[Value]) -> Result<Value, crate::kernel::error::BoxError> {
    Ok(Value::Null)
}

#[test]
fn test_decapitalize() {
    assert_eq!(decapitalize("Name"), "name");
    assert_eq!(decapitalize("URL"), "URL");
    assert_eq!(decapitalize("X"), "x");
    assert_eq!(decapitalize("maxSize"), "maxSize");
    assert_eq!(decapitalize(""), "");
}

#[test]
fn test_accessors_become_attributes() {
    let info = builder()
        .method("getName", &[], ValueType::String, noop)
        .method("setName", &[ValueType::String], ValueType::Unit, noop)
        .method("isActive", &[], ValueType::Boolean, noop)
        .method("getURL", &[], ValueType::String, noop)
        .method("setTimeout", &[ValueType::Integer], ValueType::Unit, noop)
        .build();
    let index = create_index("bean", &info).unwrap();

    let names: Vec<&str> = index.attributes().iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["URL", "active", "name", "timeout"]);

    let name = index.attribute(index.attribute_index("name").unwrap()).unwrap();
    assert_eq!(name.value_type, ValueType::String);
    assert!(name.is_readable() && name.is_writable());

    let timeout = index.attribute(index.attribute_index("timeout").unwrap()).unwrap();
    assert!(!timeout.is_readable());
    assert!(timeout.is_writable());

    // every method is still an operation
    assert_eq!(index.operations().len(), 5);
    assert!(index
        .operation_index(&OperationSignature::new("setName", &[ValueType::String]))
        .is_some());
}

#[test]
fn test_is_prefix_requires_boolean() {
    let info = builder()
        .method("isReady", &[], ValueType::String, noop)
        .method("get", &[], ValueType::String, noop)
        .method("getWith", &[ValueType::String], ValueType::String, noop)
        .build();
    let index = create_index("bean", &info).unwrap();

    assert!(index.attributes().is_empty());
    assert_eq!(index.operations_named("isReady").len(), 1);
}

#[test]
fn test_getters_must_agree_on_type() {
    let info = builder()
        .method("getEnabled", &[], ValueType::String, noop)
        .method("isEnabled", &[], ValueType::Boolean, noop)
        .build();
    match create_index("bean", &info) {
        Err(GBeanError::InvalidConfiguration { bean, message }) => {
            assert_eq!(bean, "bean");
            assert!(message.contains("enabled"), "{}", message);
        }
        other => panic!("expected InvalidConfiguration, got {:?}", other),
    }
}

#[test]
fn test_getter_and_setter_must_agree_on_type() {
    let info = builder()
        .method("getPort", &[], ValueType::Integer, noop)
        .method("setPort", &[ValueType::String], ValueType::Unit, noop)
        .build();
    assert!(matches!(
        create_index("bean", &info),
        Err(GBeanError::InvalidConfiguration { .. })
    ));
}

#[test]
fn test_ambiguous_setters_are_operations_only() {
    let info = builder()
        .method("getValue", &[], ValueType::Integer, noop)
        .method("setValue", &[ValueType::Integer], ValueType::Unit, noop)
        .method("setValue", &[ValueType::String], ValueType::Unit, noop)
        .build();
    let index = create_index("bean", &info).unwrap();

    assert!(index.attribute_index("value").is_none());
    assert_eq!(index.operations_named("setValue").len(), 2);
}

#[test]
fn test_duplicate_operation_is_rejected() {
    let info = builder()
        .method("reset", &[ValueType::Integer], ValueType::Unit, noop)
        .method("reset", &[ValueType::Integer], ValueType::Unit, noop)
        .build();
    match create_index("bean", &info) {
        Err(GBeanError::InvalidConfiguration { message, .. }) => {
            assert!(message.contains("reset(Integer)"), "{}", message)
        }
        other => panic!("expected InvalidConfiguration, got {:?}", other),
    }
}

#[test]
fn test_declared_attributes_and_persistence() {
    let journal = Journal::default();
    let info = counter_info(&journal);
    let index = create_index("counter", &info).unwrap();

    // constructor-only attribute
    let name = index.attribute(index.attribute_index("name").unwrap()).unwrap();
    assert_eq!(name.value_type, ValueType::String);
    assert!(!name.persistent);

    let count = index.attribute(index.attribute_index("count").unwrap()).unwrap();
    assert!(count.persistent);
    assert!(count.is_readable() && count.is_writable());

    let info = builder().constructor(&["path"], |_, _| Ok(Bean)).persistent("state").build();
    let index = create_index("bean", &info).unwrap();
    for declared in ["path", "state"] {
        let attribute = index.attribute(index.attribute_index(declared).unwrap()).unwrap();
        assert_eq!(attribute.value_type, ValueType::Any);
        assert!(!attribute.is_readable());
    }
}
