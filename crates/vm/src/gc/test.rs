use pretty_assertions::assert_eq;
use test_env_log::test;

use super::Heap;
use crate::config::VmOptions;
use crate::object::{Obj, ObjList};
use crate::value::Value;

#[test]
fn interning_returns_the_same_object() {
    let mut heap = Heap::default();
    let a = heap.intern("hello");
    let b = heap.intern(&["hel", "lo"].concat());
    let c = heap.intern("world");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(heap.object_count(), 2);
    assert_eq!(heap.str(a), "hello");
}

#[test]
fn collect_without_roots_frees_everything() {
    let mut heap = Heap::default();
    heap.intern("a");
    heap.insert(Obj::List(ObjList::default()));
    let stats = heap.collect(|_| {});
    assert_eq!(stats.objects_freed, 2);
    assert_eq!(heap.object_count(), 0);
    assert_eq!(heap.total_mem_allocated(), 0);
    assert_eq!(stats.bytes_after, 0);
}

#[test]
fn reachable_objects_survive() {
    let mut heap = Heap::default();
    let kept = heap.intern("kept");
    let list = heap.insert(Obj::List(ObjList {
        items: vec![Value::Obj(kept), Value::Number(1.0)],
    }));
    let dropped = heap.intern("dropped");

    heap.collect(|tracer| tracer.mark_object(list));

    assert!(heap.try_get(list).is_some());
    assert!(heap.try_get(kept).is_some());
    assert!(heap.try_get(dropped).is_none());
    assert_eq!(heap.object_count(), 2);
}

#[test]
fn intern_table_is_weak() {
    let mut heap = Heap::default();
    heap.intern("temporary");
    heap.collect(|_| {});
    assert_eq!(heap.find_interned("temporary"), None);

    // Interning again makes a fresh object instead of reviving a stale one
    let again = heap.intern("temporary");
    assert_eq!(heap.str(again), "temporary");
    assert_eq!(heap.object_count(), 1);
}

#[test]
fn cycles_are_collected() {
    let mut heap = Heap::default();
    let list = heap.insert(Obj::List(ObjList::default()));
    if let Obj::List(l) = heap.get_mut(list) {
        l.items.push(Value::Obj(list));
    }

    heap.collect(|tracer| tracer.mark_value(Value::Obj(list)));
    assert!(heap.try_get(list).is_some());

    heap.collect(|_| {});
    assert!(heap.try_get(list).is_none());
}

#[test]
fn memory_returns_to_baseline() {
    let mut heap = Heap::default();
    let root = heap.intern("root");
    heap.collect(|tracer| tracer.mark_object(root));
    let baseline = heap.total_mem_allocated();

    for i in 0..100 {
        heap.intern(&format!("garbage {}", i));
    }
    assert!(heap.total_mem_allocated() > baseline);

    heap.collect(|tracer| tracer.mark_object(root));
    assert_eq!(heap.total_mem_allocated(), baseline);
}

#[test]
fn threshold_follows_live_size() {
    let options = VmOptions {
        initial_gc_threshold: 64,
        gc_grow_factor: 3,
        ..VmOptions::default()
    };
    let mut heap = Heap::new(&options);
    assert!(!heap.should_collect());
    let big = heap.intern(&"x".repeat(4096));
    assert!(heap.should_collect());

    let stats = heap.collect(|tracer| tracer.mark_object(big));
    assert_eq!(stats.next_threshold, heap.total_mem_allocated() * 3);
    assert!(!heap.should_collect());

    // A tiny live heap still gets a floor
    let stats = heap.collect(|_| {});
    assert_eq!(stats.next_threshold, 1024);
}

#[test]
fn stress_mode_always_collects() {
    let options = VmOptions {
        stress_gc: true,
        ..VmOptions::default()
    };
    let heap = Heap::new(&options);
    assert!(heap.should_collect());
}

#[test]
fn resized_objects_are_recharged() {
    let mut heap = Heap::default();
    let list = heap.insert(Obj::List(ObjList::default()));
    let small = heap.total_mem_allocated();

    if let Obj::List(l) = heap.get_mut(list) {
        l.items.extend((0..100).map(|i| Value::Number(i as f64)));
    }
    heap.resize(list);
    let grown = heap.total_mem_allocated();
    assert!(grown >= small + 100 * std::mem::size_of::<Value>());

    // Resizing without a change is a no-op
    heap.resize(list);
    assert_eq!(heap.total_mem_allocated(), grown);

    let stats = heap.collect(|_| {});
    assert_eq!(stats.bytes_before, grown);
    assert_eq!(heap.total_mem_allocated(), 0);
}
