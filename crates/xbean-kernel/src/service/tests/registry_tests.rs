use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use super::{counting_factory, RecordingMonitor, Widget};
use crate::kernel::error::Error;
use crate::kernel::standalone::KernelRef;
use crate::monitor::{EventIdGenerator, ServiceEventKind, ServiceMonitor};
use crate::service::condition::SimpleCondition;
use crate::service::factory::{ServiceFactory, SimpleServiceFactory, StaticServiceFactory};
use crate::service::manager_factory::ServiceManagerFactory;
use crate::service::registry::ServiceManagerRegistry;
use crate::service::strategy::{StartStrategies, StopStrategies};
use crate::service::types::{ServiceInstance, ServiceName, ServiceState, ServiceType};

fn registry_with(monitor: Arc<dyn ServiceMonitor>) -> ServiceManagerRegistry {
    let manager_factory = ServiceManagerFactory::new(
        KernelRef::detached(),
        monitor,
        Arc::new(EventIdGenerator::new()),
        Duration::from_secs(5),
        Duration::from_millis(50),
    );
    ServiceManagerRegistry::new("registry-test", manager_factory)
}

fn registry() -> ServiceManagerRegistry {
    registry_with(Arc::new(RecordingMonitor::default()))
}

fn widget_factory() -> Arc<dyn ServiceFactory> {
    Arc::new(SimpleServiceFactory::new(|_| Ok(ServiceInstance::new(Widget(0)))))
}

fn typed_factory(service_type: ServiceType) -> Arc<dyn ServiceFactory> {
    let provided = service_type.clone();
    Arc::new(
        SimpleServiceFactory::new(move |_| Ok(ServiceInstance::new(Widget(0)).with_type(provided.clone())))
            .with_type(ServiceType::of::<Widget>())
            .with_type(service_type),
    )
}

#[test]
fn test_register_and_lookup() {
    let registry = registry();
    let name = ServiceName::from("alpha");
    let manager = registry.register_service(name.clone(), widget_factory()).unwrap();

    assert!(registry.is_registered(&name));
    assert_eq!(manager.state(), ServiceState::Stopped);
    let found = registry.get_service_manager(&name).unwrap();
    assert!(Arc::ptr_eq(&manager, &found));
    assert_eq!(registry.service_names(), vec![name.clone()]);

    assert!(matches!(
        registry.register_service(name.clone(), widget_factory()),
        Err(Error::ServiceAlreadyExists { .. })
    ));
    assert!(matches!(
        registry.get_service_manager(&ServiceName::from("beta")),
        Err(Error::ServiceNotFound { .. })
    ));
}

#[test]
fn test_service_ids_follow_registration_order() {
    let registry = registry();
    let ids: Vec<u64> = ["c", "a", "b"]
        .iter()
        .map(|name| {
            registry
                .register_service(ServiceName::from(*name), widget_factory())
                .unwrap()
                .service_id()
                .value()
        })
        .collect();
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));

    let names: Vec<String> = registry.service_names().iter().map(|n| n.to_string()).collect();
    assert_eq!(names, vec!["c", "a", "b"]);
}

#[test]
fn test_type_index_orders_by_registration_and_prunes_buckets() {
    let registry = registry();
    let greeter = ServiceType::named("Greeter");
    registry
        .register_service(ServiceName::from("first"), typed_factory(greeter.clone()))
        .unwrap();
    registry
        .register_service(ServiceName::from("second"), typed_factory(greeter.clone()))
        .unwrap();
    registry
        .register_service(ServiceName::from("plain"), widget_factory())
        .unwrap();

    let names: Vec<String> = registry
        .get_service_managers(&greeter)
        .iter()
        .map(|m| m.service_name().to_string())
        .collect();
    assert_eq!(names, vec!["first", "second"]);
    assert_eq!(
        registry.get_service_manager_by_type(&greeter).unwrap().service_name().as_str(),
        "first"
    );

    registry
        .unregister_service(&ServiceName::from("first"), &StopStrategies::Synchronous)
        .unwrap();
    assert_eq!(
        registry.get_service_manager_by_type(&greeter).unwrap().service_name().as_str(),
        "second"
    );

    registry
        .unregister_service(&ServiceName::from("second"), &StopStrategies::Synchronous)
        .unwrap();
    assert!(registry.get_service_managers(&greeter).is_empty());
    assert!(!registry.registered_types().contains(&greeter));
    assert!(!registry.registered_types().contains(&ServiceType::of::<Widget>()));
}

#[test]
fn test_type_index_includes_supertypes() {
    let registry = registry();
    let base = ServiceType::named("Base");
    let derived = ServiceType::named("Derived").extends(base.clone());
    registry
        .register_service(ServiceName::from("impl"), typed_factory(derived.clone()))
        .unwrap();

    assert_eq!(registry.get_service_managers(&base).len(), 1);
    assert_eq!(registry.get_service_managers(&derived).len(), 1);
    let types = registry.registered_types();
    assert!(types.contains(&base) && types.contains(&derived));
}

#[test]
fn test_pending_registration_is_not_visible_by_type() {
    let registry = Arc::new(registry());
    let pending = ServiceType::named("Pending");
    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let (inside, gate, provided) = (Arc::clone(&entered), Arc::clone(&release), pending.clone());
    let factory: Arc<dyn ServiceFactory> = Arc::new(
        SimpleServiceFactory::new(move |_| {
            inside.wait();
            gate.wait();
            Ok(ServiceInstance::new(Widget(0)).with_type(provided.clone()))
        })
        .restartable(false)
        .with_type(pending.clone()),
    );

    // a non-restartable service is created while it registers
    let registering = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || registry.register_service(ServiceName::from("eager"), factory).map(|_| ()))
    };
    entered.wait();
    assert!(!registry.registered_types().contains(&pending));
    assert!(registry.get_service_managers(&pending).is_empty());
    release.wait();
    registering.join().unwrap().unwrap();

    assert!(registry.registered_types().contains(&pending));
    assert_eq!(registry.get_service_managers(&pending).len(), 1);
}

#[test]
fn test_failed_registration_leaves_registry_unchanged() {
    let monitor = Arc::new(RecordingMonitor::default());
    let registry = registry_with(monitor.clone());
    let name = ServiceName::from("broken");
    let factory: Arc<dyn ServiceFactory> = Arc::new(
        SimpleServiceFactory::new(|_| Err("no resources".into()))
            .restartable(false)
            .with_type(ServiceType::named("Broken")),
    );

    for _ in 0..2 {
        match registry.register_service(name.clone(), Arc::clone(&factory)) {
            Err(Error::ServiceRegistration { name: failed, source }) => {
                assert_eq!(failed, name);
                assert!(matches!(*source, Error::ServiceCreation { .. }));
            }
            other => panic!("expected ServiceRegistration, got {:?}", other.map(|_| ())),
        }
        assert!(!registry.is_registered(&name));
        assert!(registry.service_names().is_empty());
        assert!(registry.registered_types().is_empty());
    }
    let kinds = monitor.kinds_for("broken");
    assert_eq!(kinds.first(), Some(&ServiceEventKind::Registered));
    assert_eq!(kinds.last(), Some(&ServiceEventKind::Unregistered));
}

#[test]
fn test_disabled_non_restartable_factory_is_rejected() {
    let registry = registry();
    let factory: Arc<dyn ServiceFactory> = Arc::new(
        SimpleServiceFactory::new(|_| Ok(ServiceInstance::new(Widget(0))))
            .restartable(false)
            .enabled(false),
    );
    assert!(matches!(
        registry.register_service(ServiceName::from("off"), factory),
        Err(Error::IllegalServiceState { .. })
    ));
    assert!(registry.service_names().is_empty());
}

#[test]
fn test_unregister_unknown_service() {
    let registry = registry();
    assert!(matches!(
        registry.unregister_service(&ServiceName::from("ghost"), &StopStrategies::Synchronous),
        Err(Error::ServiceNotFound { .. })
    ));
}

#[test]
fn test_failed_unregister_keeps_service_registered() {
    let registry = registry();
    let name = ServiceName::from("sticky");
    let greeter = ServiceType::named("Greeter");
    let provided = greeter.clone();
    let factory: Arc<dyn ServiceFactory> = Arc::new(
        SimpleServiceFactory::new(move |_| Ok(ServiceInstance::new(Widget(0)).with_type(provided.clone())))
            .with_type(greeter.clone())
            .stop_condition(SimpleCondition::new("never", false)),
    );
    let manager = registry.register_service(name.clone(), factory).unwrap();
    manager.start(false, &StartStrategies::Synchronous).unwrap();

    assert!(matches!(
        registry.unregister_service(&name, &StopStrategies::Synchronous),
        Err(Error::UnsatisfiedConditions { .. })
    ));
    assert!(registry.is_registered(&name));
    assert_eq!(registry.get_service_managers(&greeter).len(), 1);
    // still running on the same instance, and still usable
    assert_eq!(manager.state(), ServiceState::Running);
    assert!(manager.service().is_some());
    assert_ne!(manager.start_time(), 0);
    manager.start(false, &StartStrategies::Synchronous).unwrap();
    assert_eq!(manager.state(), ServiceState::Running);

    registry.unregister_service(&name, &StopStrategies::Force).unwrap();
    assert!(!registry.is_registered(&name));
    assert!(registry.get_service_managers(&greeter).is_empty());
}

#[test]
fn test_concurrent_registration_of_one_name() {
    let registry = Arc::new(registry());
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let workers: Vec<_> = (0..threads)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry.register_service(ServiceName::from("contested"), widget_factory())
            })
        })
        .collect();

    let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    let losers = results
        .iter()
        .filter(|r| matches!(r, Err(Error::ServiceAlreadyExists { .. })))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(losers, threads - 1);
}

#[test]
fn test_destroy_stops_everything_despite_unsatisfied_stop_conditions() {
    let registry = registry();
    let created = Arc::new(AtomicUsize::new(0));
    let destroyed = Arc::new(AtomicUsize::new(0));

    for i in 0..3 {
        let factory = counting_factory(&created, &destroyed).stop_condition(SimpleCondition::new("never", false));
        let manager = registry
            .register_service(ServiceName::from(format!("svc-{}", i)), Arc::new(factory))
            .unwrap();
        manager.start(false, &StartStrategies::Synchronous).unwrap();
    }
    let pinned = registry
        .register_service(
            ServiceName::from("pinned"),
            Arc::new(StaticServiceFactory::new(ServiceInstance::new(Widget(99)))),
        )
        .unwrap();
    assert_eq!(pinned.state(), ServiceState::Running);

    registry.destroy().unwrap();

    assert!(registry.is_destroyed());
    assert_eq!(destroyed.load(Ordering::SeqCst), 3);
    assert_eq!(pinned.state(), ServiceState::Stopped);
    assert!(registry.service_names().is_empty());
    assert!(matches!(
        registry.register_service(ServiceName::from("late"), widget_factory()),
        Err(Error::KernelNotRunning { .. })
    ));
    // a second destroy is a no-op
    registry.destroy().unwrap();
}

#[test]
fn test_destroy_reports_stop_failures_without_stopping_early() {
    let registry = registry();
    let broken_destroyed = Arc::new(AtomicUsize::new(0));
    let healthy_destroyed = Arc::new(AtomicUsize::new(0));

    // destroy callbacks that fail are reported to monitors; the sweep continues
    let seen = Arc::clone(&broken_destroyed);
    let broken: Arc<dyn ServiceFactory> = Arc::new(
        SimpleServiceFactory::new(|_| Ok(ServiceInstance::new(Widget(0)))).on_destroy(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Err("destroy failed".into())
        }),
    );
    let seen = Arc::clone(&healthy_destroyed);
    let healthy: Arc<dyn ServiceFactory> = Arc::new(
        SimpleServiceFactory::new(|_| Ok(ServiceInstance::new(Widget(1)))).on_destroy(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );
    registry
        .register_service(ServiceName::from("healthy"), healthy)
        .unwrap()
        .start(false, &StartStrategies::Synchronous)
        .unwrap();
    registry
        .register_service(ServiceName::from("broken"), broken)
        .unwrap()
        .start(false, &StartStrategies::Synchronous)
        .unwrap();

    registry.destroy().unwrap();
    assert_eq!(broken_destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(healthy_destroyed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_destroy_interrupts_a_blocked_unregister() {
    let registry = Arc::new(registry());
    let name = ServiceName::from("slow");
    let factory: Arc<dyn ServiceFactory> = Arc::new(
        SimpleServiceFactory::new(|_| Ok(ServiceInstance::new(Widget(0))))
            .stop_condition(SimpleCondition::new("never", false)),
    );
    let manager = registry.register_service(name.clone(), factory).unwrap();
    manager.start(false, &StartStrategies::Synchronous).unwrap();

    let unregistering = {
        let registry = Arc::clone(&registry);
        let name = name.clone();
        thread::spawn(move || registry.unregister_service(&name, &StopStrategies::Block))
    };
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while manager.state() != ServiceState::Stopping {
        assert!(std::time::Instant::now() < deadline, "unregister never started stopping");
        thread::sleep(Duration::from_millis(5));
    }

    registry.destroy().unwrap();

    assert!(matches!(
        unregistering.join().unwrap(),
        Err(Error::KernelOperationInterrupted { .. })
    ));
    assert_eq!(manager.state(), ServiceState::Stopped);
    assert!(!registry.is_registered(&name));
}
