//! Integration tests for the variable registry and its event bus.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use calx_core::{
    Event, EventKind, NameError, Registry, RegistryError, Scope, VariableId, VariableKind,
};
use pretty_assertions::assert_eq;

#[test]
fn test_unnamed_creates_get_distinct_names() {
    let registry = Registry::new();
    let ids: Vec<VariableId> = (0..5).map(|_| registry.create(None).unwrap()).collect();

    let names: BTreeSet<String> = ids.iter().map(|id| registry.name(*id).unwrap()).collect();
    assert_eq!(names.len(), 5);
    assert!(names.contains("var1"));
    assert!(names.contains("var5"));
}

#[test]
fn test_unnamed_create_skips_taken_names() {
    let registry = Registry::new();
    registry.create(Some("var1")).unwrap();
    registry.create(Some("var3")).unwrap();
    let first = registry.create(None).unwrap();
    let second = registry.create(None).unwrap();
    assert_eq!(registry.name(first).unwrap(), "var2");
    assert_eq!(registry.name(second).unwrap(), "var4");
}

#[test]
fn test_create_rejects_invalid_and_duplicate_names() {
    let registry = Registry::new();
    registry.create(Some("total")).unwrap();

    assert_eq!(
        registry.create(Some("total")),
        Err(RegistryError::NameTaken("total".to_string()))
    );
    assert_eq!(
        registry.create(Some("1abc")),
        Err(RegistryError::InvalidName(NameError::InvalidFirst { ch: '1' }))
    );
    assert_eq!(
        registry.create(Some("")),
        Err(RegistryError::InvalidName(NameError::Empty))
    );
    assert_eq!(registry.count(), 1);
}

#[test]
fn test_rename_to_taken_name_leaves_name_unchanged() {
    let registry = Registry::new();
    let a = registry.create(Some("a")).unwrap();
    registry.create(Some("b")).unwrap();

    assert_eq!(
        registry.rename(a, "b"),
        Err(RegistryError::NameTaken("b".to_string()))
    );
    assert_eq!(registry.name(a).unwrap(), "a");
    assert_eq!(registry.lookup("a"), Some(a));
}

#[test]
fn test_rename_frees_old_name() {
    let registry = Registry::new();
    let a = registry.create(Some("a")).unwrap();
    registry.rename(a, "alpha").unwrap();

    assert_eq!(registry.lookup("a"), None);
    assert_eq!(registry.lookup("alpha"), Some(a));
    let again = registry.create(Some("a")).unwrap();
    assert_ne!(again, a);
}

#[test]
fn test_delete_severs_edges() {
    let registry = Registry::new();
    let a = registry.create(Some("a")).unwrap();
    let b = registry.create(Some("b")).unwrap();
    let c = registry.create(Some("c")).unwrap();
    registry.add_dependency(b, a).unwrap();
    registry.add_dependency(c, b).unwrap();

    registry.delete(b).unwrap();

    assert!(registry.dependents(a).unwrap().is_empty());
    assert!(registry.dependencies(c).unwrap().is_empty());
    assert_eq!(registry.name(b), Err(RegistryError::NotFound(b)));
    assert_eq!(registry.lookup("b"), None);
    assert_eq!(registry.list(), vec![a, c]);
}

#[test]
fn test_dependency_errors() {
    let registry = Registry::new();
    let a = registry.create(Some("a")).unwrap();
    let input = registry.create_input(Some("rate"), "0.5").unwrap();
    let gone = registry.create(None).unwrap();
    registry.delete(gone).unwrap();

    assert_eq!(
        registry.add_dependency(a, a),
        Err(RegistryError::SelfDependency(a))
    );
    assert_eq!(
        registry.add_dependency(a, gone),
        Err(RegistryError::NotFound(gone))
    );
    assert_eq!(
        registry.add_dependency(gone, a),
        Err(RegistryError::NotFound(gone))
    );
    assert_eq!(
        registry.add_dependency(input, a),
        Err(RegistryError::NotConsumer(input))
    );
    assert_eq!(registry.kind(input).unwrap(), VariableKind::Input);
    assert!(registry.dependencies(a).unwrap().is_empty());
}

#[test]
fn test_add_and_remove_dependency_are_symmetric() {
    let registry = Registry::new();
    let a = registry.create(Some("a")).unwrap();
    let b = registry.create(Some("b")).unwrap();

    registry.add_dependency(b, a).unwrap();
    registry.add_dependency(b, a).unwrap();
    assert_eq!(registry.dependencies(b).unwrap(), vec![a]);
    assert_eq!(registry.dependents(a).unwrap(), vec![b]);

    registry.remove_dependency(b, a).unwrap();
    assert!(registry.dependencies(b).unwrap().is_empty());
    assert!(registry.dependents(a).unwrap().is_empty());

    registry.remove_dependency(b, a).unwrap();
}

#[test]
fn test_selection_resolves_dependency_names() {
    let registry = Registry::new();
    let a = registry.create_input(Some("a"), "2").unwrap();
    let b = registry.create(Some("b")).unwrap();
    registry.set_code(b, "a * 3").unwrap();
    registry.add_dependency(b, a).unwrap();

    let selection = registry.selection();
    assert_eq!(selection.len(), 2);
    assert_eq!(selection["a"].code, "2");
    assert_eq!(selection["b"].code, "a * 3");
    assert_eq!(selection["b"].dependencies, vec!["a".to_string()]);
}

#[test]
fn test_global_listener_sees_every_create() {
    let registry = Registry::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    registry.subscribe(EventKind::Created, Scope::Global, move |event| {
        sink.lock().unwrap().push((event.id(), event.name().to_string()));
    });

    let ids: Vec<VariableId> = ["x", "y", "z"]
        .iter()
        .map(|name| registry.create(Some(*name)).unwrap())
        .collect();

    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![
            (ids[0], "x".to_string()),
            (ids[1], "y".to_string()),
            (ids[2], "z".to_string()),
        ]
    );
}

#[test]
fn test_scoped_listener_only_sees_its_variable() {
    let registry = Registry::new();
    let a = registry.create(Some("a")).unwrap();
    let b = registry.create(Some("b")).unwrap();
    let renames = Arc::new(Mutex::new(Vec::new()));
    let sink = renames.clone();
    registry.subscribe(EventKind::Renamed, Scope::Variable(a), move |event| {
        if let Event::Renamed {
            old_name, new_name, ..
        } = event
        {
            sink.lock().unwrap().push(format!("{} -> {}", old_name, new_name));
        }
    });

    registry.rename(b, "bee").unwrap();
    registry.rename(a, "a").unwrap();
    registry.rename(a, "ay").unwrap();

    assert_eq!(*renames.lock().unwrap(), vec!["a -> ay".to_string()]);
}

#[test]
fn test_delete_drops_scoped_subscriptions() {
    let registry = Registry::new();
    let a = registry.create(Some("a")).unwrap();
    let deleted = Arc::new(AtomicUsize::new(0));
    let counter = deleted.clone();
    let scoped = registry.subscribe(EventKind::Deleted, Scope::Variable(a), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let global = registry.subscribe(EventKind::Deleted, Scope::Global, |_| {});

    registry.delete(a).unwrap();

    assert_eq!(deleted.load(Ordering::SeqCst), 1);
    assert!(!registry.unsubscribe(scoped));
    assert!(registry.unsubscribe(global));
    assert!(!registry.unsubscribe(global));
}

#[test]
fn test_listener_may_call_back_into_registry() {
    let registry = Arc::new(Registry::new());
    let weak: Weak<Registry> = Arc::downgrade(&registry);
    registry.subscribe(EventKind::Created, Scope::Global, move |event| {
        if let Some(registry) = weak.upgrade() {
            if event.name().starts_with("tmp") {
                registry.delete(event.id()).unwrap();
            }
        }
    });

    let tmp = registry.create(Some("tmp1")).unwrap();
    let kept = registry.create(Some("kept")).unwrap();

    assert_eq!(registry.name(tmp), Err(RegistryError::NotFound(tmp)));
    assert_eq!(registry.list(), vec![kept]);
}

#[test]
fn test_concurrent_creates_are_unique() {
    let registry = Arc::new(Registry::new());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let registry = registry.clone();
            thread::spawn(move || {
                (0..25)
                    .map(|_| registry.create(None).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let ids: BTreeSet<VariableId> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    let names: BTreeSet<String> = ids.iter().map(|id| registry.name(*id).unwrap()).collect();

    assert_eq!(ids.len(), 100);
    assert_eq!(names.len(), 100);
    assert_eq!(registry.count(), 100);
}

#[test]
fn test_set_output_records_result() {
    let registry = Registry::new();
    let a = registry.create(Some("a")).unwrap();

    registry.set_output(a, Ok("42".to_string())).unwrap();
    assert_eq!(registry.output(a).unwrap(), Some("42".to_string()));
    assert_eq!(registry.error(a).unwrap(), None);

    registry.set_output(a, Err("a: boom".to_string())).unwrap();
    assert_eq!(registry.output(a).unwrap(), None);
    assert_eq!(registry.error(a).unwrap(), Some("a: boom".to_string()));
}

#[test]
fn test_created_is_delivered_before_deleted_under_contention() {
    let registry = Arc::new(Registry::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    for kind in [EventKind::Created, EventKind::Deleted] {
        let sink = events.clone();
        registry.subscribe(kind, Scope::Global, move |event| {
            sink.lock().unwrap().push((event.kind(), event.id()));
        });
    }

    let creator = {
        let registry = registry.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                registry.create(None).unwrap();
            }
        })
    };
    let deleter = {
        let registry = registry.clone();
        thread::spawn(move || {
            let mut deleted = 0;
            while deleted < 200 {
                for id in registry.list() {
                    if registry.delete(id).is_ok() {
                        deleted += 1;
                    }
                }
            }
        })
    };
    creator.join().unwrap();
    deleter.join().unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 400);
    for (position, (kind, id)) in events.iter().enumerate() {
        if *kind == EventKind::Deleted {
            let created = events
                .iter()
                .position(|(k, i)| *k == EventKind::Created && i == id)
                .unwrap();
            assert!(created < position, "{} deleted before created", id);
        }
    }
}
