use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use proptest::prelude::*;

use crate::{heap::counters, ExpiredObservation, SharedHandle, WeakHandle};

struct Probe {
    drops: Rc<Cell<usize>>,
    value: i32,
}

impl Probe {
    fn new(drops: &Rc<Cell<usize>>, value: i32) -> Self {
        Probe {
            drops: drops.clone(),
            value,
        }
    }
}

impl Drop for Probe {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

#[test]
fn scenario_weak_outlives_only_owner() {
    let drops = Rc::new(Cell::new(0));
    let live = counters::live();

    let mut a = SharedHandle::new(Probe::new(&drops, 42));
    assert_eq!(SharedHandle::use_count(&a), 1);
    assert_eq!(SharedHandle::weak_count(&a), 0);

    let b = SharedHandle::demote(&a);
    assert_eq!((b.use_count(), b.weak_count()), (1, 1));

    SharedHandle::reset(&mut a);
    assert_eq!(drops.get(), 1);
    assert_eq!((b.use_count(), b.weak_count()), (0, 1));
    assert_eq!(counters::live(), live + 1);

    let locked = b.lock();
    assert!(!SharedHandle::is_some(&locked));
    assert!(SharedHandle::get(&locked).is_none());

    drop(b);
    assert_eq!(drops.get(), 1);
    assert_eq!(counters::live(), live);
}

#[test]
fn scenario_copy_then_release_in_turn() {
    let live = counters::live();

    let mut a = SharedHandle::new(String::from("x"));
    let mut c = a.clone();
    assert_eq!(SharedHandle::use_count(&c), 2);

    SharedHandle::reset(&mut a);
    assert_eq!(SharedHandle::use_count(&c), 1);
    assert_eq!(c.as_str(), "x");

    let d = SharedHandle::demote(&c);
    assert_eq!(d.weak_count(), 1);

    SharedHandle::reset(&mut c);
    assert!(d.expired());
    assert!(!SharedHandle::is_some(&d.lock()));

    drop(d);
    assert_eq!(counters::live(), live);
}

#[test]
fn destructor_runs_once_at_last_strong_release() {
    let drops = Rc::new(Cell::new(0));
    let a = SharedHandle::adopt(Box::new(Probe::new(&drops, 1)));
    let b = a.clone();
    let c = b.clone();
    assert_eq!(SharedHandle::use_count(&a), 3);

    drop(a);
    drop(c);
    assert_eq!(drops.get(), 0);
    assert_eq!(b.value, 1);
    drop(b);
    assert_eq!(drops.get(), 1);
}

#[test]
fn each_creation_allocates_one_block() {
    let before = counters::allocations();
    let owned = SharedHandle::new(5u64);
    assert_eq!(counters::allocations(), before + 1);

    let adopted = SharedHandle::adopt(Box::new(5u64));
    assert_eq!(counters::allocations(), before + 2);

    let _copies = (owned.clone(), SharedHandle::demote(&adopted), adopted.clone());
    assert_eq!(counters::allocations(), before + 2);
}

#[test]
fn take_moves_without_touching_counts() {
    let mut a = SharedHandle::new(3);
    let weak = SharedHandle::demote(&a);
    let b = SharedHandle::take(&mut a);
    assert!(!SharedHandle::is_some(&a));
    assert_eq!(SharedHandle::use_count(&a), 0);
    assert_eq!(SharedHandle::use_count(&b), 1);

    let mut w1 = weak.clone();
    let w2 = w1.take();
    assert!(w1.expired());
    assert_eq!(w2.weak_count(), 2);
}

#[test]
fn aliasing_keeps_parent_alive() {
    struct Parent {
        _probe: Probe,
        name: String,
    }

    let drops = Rc::new(Cell::new(0));
    let parent = SharedHandle::new(Parent {
        _probe: Probe::new(&drops, 0),
        name: String::from("child"),
    });
    let name = SharedHandle::map(&parent, |p| &p.name);
    assert_eq!(SharedHandle::use_count(&parent), 2);

    drop(parent);
    assert_eq!(drops.get(), 0);
    assert_eq!(name.as_str(), "child");
    assert_eq!(SharedHandle::use_count(&name), 1);

    let weak_name = SharedHandle::demote(&name);
    drop(name);
    assert_eq!(drops.get(), 1);
    assert!(weak_name.expired());
}

#[test]
fn mapping_an_empty_handle_is_empty() {
    let empty: SharedHandle<(u8, u8)> = SharedHandle::default();
    let part = SharedHandle::map(&empty, |pair| &pair.0);
    assert!(!SharedHandle::is_some(&part));
}

#[test]
fn promotion_paths_agree() {
    let a = SharedHandle::new(9);
    let weak = SharedHandle::demote(&a);

    let locked = weak.lock();
    let promoted = SharedHandle::<i32>::try_from(&weak).unwrap();
    assert_eq!(SharedHandle::use_count(&a), 3);
    assert!(SharedHandle::ptr_eq(&locked, &promoted));

    drop((a, locked, promoted));
    assert!(weak.expired());
    assert!(!SharedHandle::is_some(&weak.lock()));
    assert_eq!(SharedHandle::from_weak(&weak).err(), Some(ExpiredObservation));

    let empty: WeakHandle<i32> = WeakHandle::new();
    assert!(empty.expired());
    assert!(SharedHandle::from_weak(&empty).is_err());
}

#[test]
fn demoting_an_empty_handle_gives_an_expired_observer() {
    let empty: SharedHandle<String> = SharedHandle::empty();
    let weak = SharedHandle::demote(&empty);
    assert!(weak.expired());
    assert_eq!(weak.weak_count(), 0);
}

#[test]
fn reset_to_adopts_a_fresh_block() {
    let drops = Rc::new(Cell::new(0));
    let mut a = SharedHandle::new(Probe::new(&drops, 1));
    let old = SharedHandle::demote(&a);

    SharedHandle::reset_to(&mut a, Box::new(Probe::new(&drops, 2)));
    assert_eq!(drops.get(), 1);
    assert!(old.expired());
    assert_eq!(a.value, 2);
    assert_eq!(SharedHandle::use_count(&a), 1);
    assert_eq!(SharedHandle::weak_count(&a), 0);
}

#[test]
fn clone_from_same_object_keeps_counts() {
    let a = SharedHandle::new(1);
    let mut b = a.clone();
    b.clone_from(&a);
    assert_eq!(SharedHandle::use_count(&a), 2);

    let c = SharedHandle::new(2);
    b.clone_from(&c);
    assert_eq!(SharedHandle::use_count(&a), 1);
    assert_eq!(SharedHandle::use_count(&c), 2);
}

#[test]
fn clone_from_distinct_blocks_at_one_address_shares_the_source() {
    let live = counters::live();

    let a = SharedHandle::adopt(Box::new(()));
    let mut b = SharedHandle::adopt(Box::new(()));
    assert!(SharedHandle::ptr_eq(&a, &b));
    assert_eq!(counters::live(), live + 2);

    b.clone_from(&a);
    assert_eq!(SharedHandle::use_count(&a), 2);
    assert_eq!(counters::live(), live + 1);

    let mut stale = SharedHandle::demote(&SharedHandle::adopt(Box::new(())));
    assert!(stale.expired());
    let fresh = SharedHandle::demote(&a);
    assert!(stale.ptr_eq(&fresh));

    stale.clone_from(&fresh);
    assert!(!stale.expired());
    assert_eq!(fresh.weak_count(), 2);
    assert_eq!(counters::live(), live + 1);

    drop((a, b, stale, fresh));
    assert_eq!(counters::live(), live);
}

#[test]
fn mapping_a_static_borrow_outlives_the_source() {
    static GREETING: &str = "hello";

    let outer = SharedHandle::new(GREETING);
    let inner: SharedHandle<str> = SharedHandle::map(&outer, |r| *r);
    drop(outer);
    assert_eq!(&*inner, "hello");
    assert_eq!(SharedHandle::use_count(&inner), 1);
}

#[test]
fn swap_and_equality_use_addresses() {
    let mut a = SharedHandle::new(1);
    let mut b = SharedHandle::new(1);
    assert_ne!(a, b);

    let a_copy = a.clone();
    SharedHandle::swap(&mut a, &mut b);
    assert_eq!(b, a_copy);
    assert_eq!(SharedHandle::use_count(&b), 2);
    assert_eq!(SharedHandle::use_count(&a), 1);

    let mut w1 = SharedHandle::demote(&a);
    let mut w2 = WeakHandle::new();
    w1.swap(&mut w2);
    assert!(w1.expired());
    assert!(w2.ptr_eq(&SharedHandle::demote(&a)));
}

#[test]
fn formatting() {
    let a = SharedHandle::new(7);
    assert_eq!(format!("{a} {a:?}"), "7 7");

    let empty: SharedHandle<i32> = SharedHandle::empty();
    assert_eq!(format!("{empty:?}"), "(empty)");
    assert_eq!(format!("{:?}", SharedHandle::demote(&a)), "(WeakHandle)");
}

#[test]
#[should_panic(expected = "empty SharedHandle")]
fn deref_of_empty_handle_panics() {
    let empty: SharedHandle<i32> = SharedHandle::empty();
    let _value: i32 = *empty;
}

#[test]
fn unsized_objects() {
    let boxed: Box<dyn std::fmt::Display> = Box::new(12);
    let shown = SharedHandle::adopt(boxed);
    assert_eq!(shown.to_string(), "12");

    let bytes: Box<[u8]> = Box::from(&b"abc"[..]);
    let slice = SharedHandle::adopt(bytes);
    let weak = SharedHandle::demote(&slice);
    assert_eq!(&*weak.lock(), b"abc");
}

struct SelfObserver {
    me: RefCell<WeakHandle<SelfObserver>>,
    drops: Rc<Cell<usize>>,
    locked_during_drop: Rc<Cell<Option<bool>>>,
}

impl Drop for SelfObserver {
    fn drop(&mut self) {
        let me = self.me.borrow();
        self.locked_during_drop
            .set(Some(SharedHandle::is_some(&me.lock())));
        self.drops.set(self.drops.get() + 1);
    }
}

#[test]
fn destructor_dropping_the_last_weak_handle_to_itself() {
    let live = counters::live();
    let drops = Rc::new(Cell::new(0));
    let locked = Rc::new(Cell::new(None));

    let handle = SharedHandle::new(SelfObserver {
        me: RefCell::new(WeakHandle::new()),
        drops: drops.clone(),
        locked_during_drop: locked.clone(),
    });
    *handle.me.borrow_mut() = SharedHandle::demote(&handle);
    assert_eq!(SharedHandle::weak_count(&handle), 1);

    drop(handle);
    assert_eq!(drops.get(), 1);
    assert_eq!(locked.get(), Some(false));
    assert_eq!(counters::live(), live);
}

struct Link {
    _probe: Probe,
    next: SharedHandle<Link>,
}

#[test]
fn nested_releases_finish_before_outer_free() {
    let live = counters::live();
    let drops = Rc::new(Cell::new(0));

    let tail = SharedHandle::new(Link {
        _probe: Probe::new(&drops, 3),
        next: SharedHandle::empty(),
    });
    let tail_observer = SharedHandle::demote(&tail);
    let middle = SharedHandle::adopt(Box::new(Link {
        _probe: Probe::new(&drops, 2),
        next: tail,
    }));
    let head = SharedHandle::new(Link {
        _probe: Probe::new(&drops, 1),
        next: middle,
    });
    assert_eq!(counters::live(), live + 3);

    drop(head);
    assert_eq!(drops.get(), 3);
    assert!(tail_observer.expired());
    assert_eq!(counters::live(), live + 1);

    drop(tail_observer);
    assert_eq!(counters::live(), live);
}

#[derive(Debug, Clone)]
enum Op {
    Clone(usize),
    Drop(usize),
    Demote(usize),
    CloneWeak(usize),
    DropWeak(usize),
    Lock(usize),
    Promote(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<usize>().prop_map(Op::Clone),
        any::<usize>().prop_map(Op::Drop),
        any::<usize>().prop_map(Op::Demote),
        any::<usize>().prop_map(Op::CloneWeak),
        any::<usize>().prop_map(Op::DropWeak),
        any::<usize>().prop_map(Op::Lock),
        any::<usize>().prop_map(Op::Promote),
    ]
}

proptest! {
    #[test]
    fn object_destroyed_and_block_freed_exactly_once(
        in_place in any::<bool>(),
        ops in proptest::collection::vec(arb_op(), 0..64),
    ) {
        let drops = Rc::new(Cell::new(0));
        let live = counters::live();
        let first = if in_place {
            SharedHandle::new(Probe::new(&drops, 0))
        } else {
            SharedHandle::adopt(Box::new(Probe::new(&drops, 0)))
        };
        let mut strong = vec![first];
        let mut weak: Vec<WeakHandle<Probe>> = Vec::new();

        for op in ops {
            match op {
                Op::Clone(i) if !strong.is_empty() => {
                    let copy = strong[i % strong.len()].clone();
                    strong.push(copy);
                }
                Op::Drop(i) if !strong.is_empty() => {
                    let len = strong.len();
                    strong.swap_remove(i % len);
                }
                Op::Demote(i) if !strong.is_empty() => {
                    weak.push(SharedHandle::demote(&strong[i % strong.len()]));
                }
                Op::CloneWeak(i) if !weak.is_empty() => {
                    let copy = weak[i % weak.len()].clone();
                    weak.push(copy);
                }
                Op::DropWeak(i) if !weak.is_empty() => {
                    let len = weak.len();
                    weak.swap_remove(i % len);
                }
                Op::Lock(i) if !weak.is_empty() => {
                    let locked = weak[i % weak.len()].lock();
                    prop_assert_eq!(SharedHandle::is_some(&locked), !strong.is_empty());
                    if SharedHandle::is_some(&locked) {
                        strong.push(locked);
                    }
                }
                Op::Promote(i) if !weak.is_empty() => {
                    match SharedHandle::from_weak(&weak[i % weak.len()]) {
                        Ok(promoted) => {
                            prop_assert!(!strong.is_empty());
                            strong.push(promoted);
                        }
                        Err(ExpiredObservation) => prop_assert!(strong.is_empty()),
                    }
                }
                _ => {}
            }

            let expected_drops = if strong.is_empty() { 1 } else { 0 };
            prop_assert_eq!(drops.get(), expected_drops);
            if let Some(handle) = strong.first() {
                prop_assert_eq!(SharedHandle::use_count(handle), strong.len());
                prop_assert_eq!(SharedHandle::weak_count(handle), weak.len());
                prop_assert_eq!(handle.value, 0);
            }
            for observer in &weak {
                prop_assert_eq!(observer.use_count(), strong.len());
                prop_assert_eq!(observer.weak_count(), weak.len());
                prop_assert_eq!(observer.expired(), strong.is_empty());
            }
            let blocks = if strong.is_empty() && weak.is_empty() { 0 } else { 1 };
            prop_assert_eq!(counters::live(), live + blocks);
        }

        drop(strong);
        drop(weak);
        prop_assert_eq!(drops.get(), 1);
        prop_assert_eq!(counters::live(), live);
    }
}
