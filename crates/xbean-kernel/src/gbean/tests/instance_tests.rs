use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use serde_json::{json, Value};

use super::{counter_info, Journal};
use crate::gbean::dependency::GBeanDependency;
use crate::gbean::error::GBeanError;
use crate::gbean::index::OperationSignature;
use crate::gbean::info::{DynamicGBean, GBeanInfoBuilder, ValueType};
use crate::gbean::instance::{GBeanInstance, GBeanState};
use crate::kernel::error::BoxError;

fn counter(name: &str, journal: &Journal) -> GBeanInstance {
    GBeanInstance::new("counter", counter_info(journal))
        .unwrap()
        .with_property("name", json!(name))
        .unwrap()
}

/// Dependency toggled by the test; counts start and stop calls.
#[derive(Default)]
struct Switch {
    available: AtomicBool,
    started: AtomicUsize,
    stopped: AtomicUsize,
    journal: Option<Journal>,
    label: &'static str,
}

impl Switch {
    fn new(label: &'static str, available: bool, journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            available: AtomicBool::new(available),
            journal: Some(Arc::clone(journal)),
            label,
            ..Default::default()
        })
    }
}

impl GBeanDependency for Switch {
    fn description(&self) -> String {
        format!("switch '{}'", self.label)
    }

    fn start(&self) -> bool {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.available.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        if let Some(journal) = &self.journal {
            journal.lock().push(format!("release {}", self.label));
        }
    }
}

#[test]
fn test_attributes_while_destroyed_use_property_table() {
    let journal = Journal::default();
    let bean = counter("c", &journal);
    assert_eq!(bean.state(), GBeanState::Destroyed);

    bean.set_attribute("count", json!(5)).unwrap();
    assert_eq!(bean.get_attribute("count").unwrap(), json!(5));
    assert_eq!(bean.get_attribute("name").unwrap(), json!("c"));
    assert_eq!(bean.properties().get("count"), Some(&json!(5)));
    // nothing was constructed
    assert!(journal.lock().is_empty());

    assert!(matches!(
        bean.set_attribute("count", json!("five")),
        Err(GBeanError::InvalidArgument { .. })
    ));
    assert!(matches!(
        bean.get_attribute("missing"),
        Err(GBeanError::NoSuchAttribute { .. })
    ));
    assert!(matches!(
        GBeanInstance::new("x", counter_info(&journal)).unwrap().with_property("nope", json!(1)),
        Err(GBeanError::NoSuchAttribute { .. })
    ));
}

#[test]
fn test_operations_require_running() {
    let journal = Journal::default();
    let bean = counter("c", &journal);
    assert!(matches!(
        bean.invoke_by_name("increment", &[]),
        Err(GBeanError::IllegalState { .. })
    ));
}

#[test]
fn test_start_constructs_injects_and_starts() {
    let journal = Journal::default();
    let bean = counter("c", &journal).with_property("count", json!(10)).unwrap();

    assert!(bean.start().unwrap());
    assert_eq!(bean.state(), GBeanState::Running);
    assert_eq!(*journal.lock(), vec!["construct", "setCount(10)", "doStart"]);

    // read through the target now
    assert_eq!(bean.get_attribute("name").unwrap(), json!("c"));
    assert_eq!(bean.invoke_by_name("increment", &[]).unwrap(), json!(11));
    assert_eq!(bean.invoke_by_name("increment", &[json!(4)]).unwrap(), json!(15));
    assert_eq!(
        bean.invoke(&OperationSignature::new("increment", &[ValueType::Integer]), &[json!(5)])
            .unwrap(),
        json!(20)
    );
    // starting again is a no-op
    assert!(bean.start().unwrap());
    assert_eq!(journal.lock().len(), 3);
}

#[test]
fn test_stop_saves_persistent_attributes() {
    let journal = Journal::default();
    let bean = counter("c", &journal);
    bean.start().unwrap();
    bean.invoke_by_name("increment", &[json!(7)]).unwrap();

    bean.stop().unwrap();
    assert_eq!(bean.state(), GBeanState::Destroyed);
    assert_eq!(journal.lock().last().map(String::as_str), Some("doStop"));
    assert_eq!(bean.get_attribute("count").unwrap(), json!(7));

    // a restart builds a fresh target seeded with the saved value
    bean.start().unwrap();
    assert_eq!(bean.get_attribute("count").unwrap(), json!(7));
    bean.stop().unwrap();
    // stopping twice is harmless
    bean.stop().unwrap();
}

#[test]
fn test_running_write_of_persistent_attribute_updates_properties() {
    let journal = Journal::default();
    let bean = counter("c", &journal);
    bean.start().unwrap();
    bean.set_attribute("count", json!(3)).unwrap();
    assert_eq!(bean.properties().get("count"), Some(&json!(3)));
    bean.stop().unwrap();
}

#[test]
fn test_failed_start_rolls_back() {
    let journal = Journal::default();
    let switch = Switch::new("db", true, &journal);
    let bean = counter("broken", &journal).with_dependency(switch.clone());

    match bean.start() {
        Err(GBeanError::Construction { bean, source }) => {
            assert_eq!(bean, "counter");
            assert!(source.to_string().contains("refusing to start"));
        }
        other => panic!("expected Construction error, got {:?}", other),
    }
    assert_eq!(bean.state(), GBeanState::Destroyed);
    assert_eq!(
        *journal.lock(),
        vec!["construct", "doStart", "doFail", "release db"]
    );
    assert_eq!(switch.stopped.load(Ordering::SeqCst), 1);
}

#[test]
fn test_missing_constructor_is_illegal_state() {
    struct Empty;
    let info = GBeanInfoBuilder::<Empty>::new("Empty").build();
    let bean = GBeanInstance::new("empty", Arc::new(info)).unwrap();
    assert!(matches!(bean.start(), Err(GBeanError::IllegalState { .. })));
    assert_eq!(bean.state(), GBeanState::Destroyed);
}

#[test]
fn test_unavailable_dependency_defers_start() {
    let journal = Journal::default();
    let first = Switch::new("first", true, &journal);
    let second = Switch::new("second", false, &journal);
    let bean = counter("c", &journal)
        .with_dependency(first.clone())
        .with_dependency(second.clone());

    assert!(!bean.start().unwrap());
    assert_eq!(bean.state(), GBeanState::Destroyed);
    // only the dependency that was acquired is released
    assert_eq!(*journal.lock(), vec!["release first"]);
    assert_eq!(second.stopped.load(Ordering::SeqCst), 0);

    second.available.store(true, Ordering::SeqCst);
    assert!(bean.start().unwrap());
    bean.stop().unwrap();
    assert_eq!(
        journal.lock().iter().rev().take(2).cloned().collect::<Vec<_>>(),
        vec!["release first", "release second"]
    );
    assert_eq!(
        bean.dependency_descriptions(),
        vec!["switch 'first'".to_string(), "switch 'second'".to_string()]
    );
}

#[test]
fn test_ambiguous_overloads() {
    struct Sink;
    let info = GBeanInfoBuilder::<Sink>::new("Sink")
        .constructor(&[], |_, _| Ok(Sink))
        .method("put", &[ValueType::Integer], ValueType::String, |_, _| Ok(json!("int")))
        .method("put", &[ValueType::Float], ValueType::String, |_, _| Ok(json!("float")))
        .build();
    let bean = GBeanInstance::new("sink", Arc::new(info)).unwrap();
    bean.start().unwrap();

    assert_eq!(bean.invoke_by_name("put", &[json!(1.5)]).unwrap(), json!("float"));
    assert!(matches!(
        bean.invoke_by_name("put", &[json!(1)]),
        Err(GBeanError::InvalidArgument { .. })
    ));
    assert!(matches!(
        bean.invoke_by_name("put", &[json!("text")]),
        Err(GBeanError::NoSuchOperation { .. })
    ));
    assert!(matches!(
        bean.invoke(&OperationSignature::new("put", &[ValueType::String]), &[json!("x")]),
        Err(GBeanError::NoSuchOperation { .. })
    ));
}

#[test]
fn test_operation_errors_and_panics_are_invocation_errors() {
    struct Fragile;
    let info = GBeanInfoBuilder::<Fragile>::new("Fragile")
        .constructor(&[], |_, _| Ok(Fragile))
        .method("fail", &[], ValueType::Unit, |_, _| Err("nope".into()))
        .method("explode", &[], ValueType::Unit, |_, _| panic!("boom"))
        .build();
    let bean = GBeanInstance::new("fragile", Arc::new(info)).unwrap();
    bean.start().unwrap();

    assert!(matches!(
        bean.invoke_by_name("fail", &[]),
        Err(GBeanError::Invocation { .. })
    ));
    match bean.invoke_by_name("explode", &[]) {
        Err(GBeanError::Invocation { source, .. }) => assert!(source.to_string().contains("boom")),
        other => panic!("expected Invocation error, got {:?}", other),
    }
    // the bean survives
    assert_eq!(bean.state(), GBeanState::Running);
}

/// Property bag resolving everything at run time.
#[derive(Default)]
struct Bag {
    values: HashMap<String, Value>,
}

impl DynamicGBean for Bag {
    fn get_attribute(&self, name: &str) -> Result<Value, BoxError> {
        Ok(self.values.get(name).cloned().unwrap_or(Value::Null))
    }

    fn set_attribute(&mut self, name: &str, value: Value) -> Result<(), BoxError> {
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    fn invoke(&mut self, operation: &str, _arguments: &[Value]) -> Result<Value, BoxError> {
        match operation {
            "size" => Ok(json!(self.values.len())),
            other => Err(format!("unknown operation {}", other).into()),
        }
    }
}

#[test]
fn test_dynamic_gbean() {
    let info = GBeanInfoBuilder::<Bag>::new("Bag")
        .constructor(&[], |_, _| Ok(Bag::default()))
        .persistent("color")
        .dynamic()
        .build();
    assert!(info.is_dynamic());
    let bean = GBeanInstance::new("bag", Arc::new(info))
        .unwrap()
        .with_property("color", json!("red"))
        .unwrap();

    // undeclared names need a running target
    assert!(matches!(
        bean.set_attribute("shape", json!("round")),
        Err(GBeanError::NoSuchAttribute { .. })
    ));

    bean.start().unwrap();
    // declared attribute injected through the dynamic setter
    assert_eq!(bean.get_attribute("color").unwrap(), json!("red"));
    bean.set_attribute("shape", json!("round")).unwrap();
    assert_eq!(bean.get_attribute("shape").unwrap(), json!("round"));
    assert_eq!(bean.invoke_by_name("size", &[]).unwrap(), json!(2));
    assert!(matches!(
        bean.invoke_by_name("shrink", &[]),
        Err(GBeanError::Invocation { .. })
    ));

    bean.set_attribute("color", json!("blue")).unwrap();
    bean.stop().unwrap();
    assert_eq!(bean.properties().get("color"), Some(&json!("blue")));
}

#[test]
fn test_raw_invoker_uses_positions() {
    let journal = Journal::default();
    let bean = Arc::new(counter("c", &journal));
    let raw = bean.raw_invoker();

    let count = raw.attribute_index("count").unwrap();
    let increment = raw.operation_index("increment", &[ValueType::Integer]).unwrap();
    assert!(raw.operation_index("increment", &[ValueType::String]).is_none());

    raw.set_attribute(count, json!(2)).unwrap();
    assert!(matches!(raw.invoke(increment, &[json!(1)]), Err(GBeanError::IllegalState { .. })));

    bean.start().unwrap();
    assert_eq!(raw.invoke(increment, &[json!(3)]).unwrap(), json!(5));
    assert_eq!(raw.get_attribute(count).unwrap(), json!(5));
    assert!(matches!(
        raw.invoke(increment, &[json!("three")]),
        Err(GBeanError::InvalidArgument { .. })
    ));
    assert!(matches!(raw.get_attribute(99), Err(GBeanError::NoSuchAttribute { .. })));
    bean.stop().unwrap();
}

#[test]
fn test_concurrent_operations_are_serialized() {
    let journal = Journal::default();
    let bean = Arc::new(counter("c", &journal));
    bean.start().unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let bean = Arc::clone(&bean);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    bean.invoke_by_name("increment", &[]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(bean.get_attribute("count").unwrap(), json!(400));
    bean.stop().unwrap();
}

/// Target whose operations call back into the bean hosting it.
struct Looper;

fn looper() -> Arc<GBeanInstance> {
    let host: Arc<parking_lot::Mutex<Weak<GBeanInstance>>> = Arc::default();
    let (calling, stopping) = (Arc::clone(&host), Arc::clone(&host));
    let info = GBeanInfoBuilder::<Looper>::new("Looper")
        .constructor(&[], |_, _| Ok(Looper))
        .method("ping", &[], ValueType::String, |_, _| Ok(json!("pong")))
        .method("callSelf", &[], ValueType::String, move |_, _| {
            let bean = calling.lock().upgrade().ok_or("host is gone")?;
            match bean.invoke_by_name("ping", &[]) {
                Ok(value) => Ok(value),
                Err(e) => Ok(json!(e.to_string())),
            }
        })
        .method("stopSelf", &[], ValueType::String, move |_, _| {
            let bean = stopping.lock().upgrade().ok_or("host is gone")?;
            match bean.stop() {
                Ok(()) => Ok(json!("stopped")),
                Err(e) => Ok(json!(e.to_string())),
            }
        })
        .build();
    let bean = Arc::new(GBeanInstance::new("looper", Arc::new(info)).unwrap());
    *host.lock() = Arc::downgrade(&bean);
    bean
}

#[test]
fn test_callbacks_can_not_reenter_their_own_bean() {
    let bean = looper();
    assert!(bean.start().unwrap());

    let answer = bean.invoke_by_name("callSelf", &[]).unwrap();
    let message = answer.as_str().unwrap_or_default();
    assert!(message.contains("from a callback of this bean"), "{}", message);

    let answer = bean.invoke_by_name("stopSelf", &[]).unwrap();
    let message = answer.as_str().unwrap_or_default();
    assert!(message.contains("can not stop from a callback"), "{}", message);
    assert_eq!(bean.state(), GBeanState::Running);

    // the refused calls left the bean usable
    assert_eq!(bean.invoke_by_name("ping", &[]).unwrap(), json!("pong"));
    bean.stop().unwrap();
    assert_eq!(bean.state(), GBeanState::Destroyed);
}
