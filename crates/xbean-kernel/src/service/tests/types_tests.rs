use std::collections::HashSet;

use crate::service::types::{ServiceInstance, ServiceName, ServiceState, ServiceType};

trait Greeter {}

#[derive(Debug, PartialEq)]
struct English(&'static str);

#[test]
fn test_service_name_conversions() {
    let from_str = ServiceName::from("web");
    let from_string = ServiceName::from(String::from("web"));
    assert_eq!(from_str, from_string);
    assert_eq!(from_str.as_str(), "web");
    assert_eq!(from_str.to_string(), "web");
    assert_eq!(format!("{:?}", from_str), "ServiceName(web)");
}

#[test]
fn test_service_state_round_trips_through_u8() {
    for state in [
        ServiceState::Stopped,
        ServiceState::Starting,
        ServiceState::Running,
        ServiceState::Stopping,
    ] {
        assert_eq!(ServiceState::from_u8(state as u8), state);
    }
    assert_eq!(ServiceState::from_u8(42), ServiceState::Stopped);
}

#[test]
fn test_stable_states() {
    assert!(ServiceState::Stopped.is_stable());
    assert!(ServiceState::Running.is_stable());
    assert!(!ServiceState::Starting.is_stable());
    assert!(!ServiceState::Stopping.is_stable());
    assert_eq!(ServiceState::Stopping.to_string(), "STOPPING");
}

#[test]
fn test_type_closure_is_breadth_first_without_duplicates() {
    let base = ServiceType::named("base");
    let left = ServiceType::named("left").extends(base.clone());
    let right = ServiceType::named("right").extends(base.clone());
    let leaf = ServiceType::named("leaf").extends(left).extends(right);

    let names: Vec<String> = leaf.closure().iter().map(|t| t.name().to_string()).collect();
    assert_eq!(names, vec!["leaf", "left", "right", "base"]);

    assert!(base.is_assignable_from(&leaf));
    assert!(!leaf.is_assignable_from(&base));
}

#[test]
fn test_type_identity_is_by_name() {
    let plain = ServiceType::named("x");
    let with_parent = ServiceType::named("x").extends(ServiceType::named("y"));
    assert_eq!(plain, with_parent);

    let set: HashSet<ServiceType> = [plain, with_parent].into_iter().collect();
    assert_eq!(set.len(), 1);
    assert_eq!(ServiceType::of::<dyn Greeter>(), ServiceType::of::<dyn Greeter>());
}

#[test]
fn test_instance_downcast_and_types() {
    let greeter = ServiceType::of::<dyn Greeter>();
    let instance = ServiceInstance::new(English("hello")).with_type(greeter.clone());

    assert_eq!(instance.downcast_ref::<English>(), Some(&English("hello")));
    assert!(instance.downcast::<String>().is_none());
    assert!(instance.is_assignable_to(&greeter));
    assert!(instance.is_assignable_to(&ServiceType::of::<English>()));
    assert!(!instance.is_assignable_to(&ServiceType::named("other")));
    assert_eq!(instance.provided_types().len(), 2);
}

#[test]
fn test_instance_identity_survives_clone() {
    let a = ServiceInstance::new(English("a"));
    let b = a.clone();
    let c = ServiceInstance::new(English("a"));
    assert!(a.same_instance(&b));
    assert!(!a.same_instance(&c));
}
