use std::{ops::Deref, rc::Rc, time::Instant};

use dualrc::SharedHandle;

fn test_new_shared(n: f64) -> f64 {
    let start = Instant::now();
    for i in 0..(n as u64) {
        std::hint::black_box(SharedHandle::new(i));
    }
    let end = Instant::now();
    (end - start).as_nanos() as f64 / n
}

fn test_adopt_shared(n: f64) -> f64 {
    let start = Instant::now();
    for i in 0..(n as u64) {
        std::hint::black_box(SharedHandle::adopt(Box::new(i)));
    }
    let end = Instant::now();
    (end - start).as_nanos() as f64 / n
}

fn test_new_rc(n: f64) -> f64 {
    let start = Instant::now();
    for i in 0..(n as u64) {
        std::hint::black_box(Rc::new(i));
    }
    let end = Instant::now();
    (end - start).as_nanos() as f64 / n
}

fn test_clone_shared(n: f64) -> f64 {
    let shared = SharedHandle::new(100);

    let start = Instant::now();
    for _ in 0..(n as u64) {
        std::hint::black_box(shared.clone());
    }
    let end = Instant::now();
    (end - start).as_nanos() as f64 / n
}

fn test_clone_rc(n: f64) -> f64 {
    let rc = Rc::new(100);

    let start = Instant::now();
    for _ in 0..(n as u64) {
        std::hint::black_box(rc.clone());
    }
    let end = Instant::now();
    (end - start).as_nanos() as f64 / n
}

fn test_deref_shared(n: f64) -> f64 {
    let shared = SharedHandle::new(100);

    let start = Instant::now();
    for _ in 0..(n as u64) {
        std::hint::black_box(shared.deref());
    }
    let end = Instant::now();
    (end - start).as_nanos() as f64 / n
}

fn test_deref_rc(n: f64) -> f64 {
    let rc = Rc::new(100);

    let start = Instant::now();
    for _ in 0..(n as u64) {
        std::hint::black_box(rc.deref());
    }
    let end = Instant::now();
    (end - start).as_nanos() as f64 / n
}

fn test_lock_weak(n: f64) -> f64 {
    let shared = SharedHandle::new(100);
    let weak = SharedHandle::demote(&shared);

    let start = Instant::now();
    for _ in 0..(n as u64) {
        std::hint::black_box(weak.lock());
    }
    let end = Instant::now();
    (end - start).as_nanos() as f64 / n
}

fn test_upgrade_rc(n: f64) -> f64 {
    let rc = Rc::new(100);
    let weak = Rc::downgrade(&rc);

    let start = Instant::now();
    for _ in 0..(n as u64) {
        std::hint::black_box(weak.upgrade());
    }
    let end = Instant::now();
    (end - start).as_nanos() as f64 / n
}

fn main() {
    let n = 10e6;

    println!("New test SharedHandle ({}x): {}ns avg", n, test_new_shared(n));
    println!("Adopt test SharedHandle ({}x): {}ns avg", n, test_adopt_shared(n));
    println!("New test Rc ({}x): {}ns avg", n, test_new_rc(n));

    println!("Clone test SharedHandle ({}x): {}ns avg", n, test_clone_shared(n));
    println!("Clone test Rc ({}x): {}ns avg", n, test_clone_rc(n));

    println!("Deref test SharedHandle ({}x): {}ns avg", n, test_deref_shared(n));
    println!("Deref test Rc ({}x): {}ns avg", n, test_deref_rc(n));

    println!("Lock test WeakHandle ({}x): {}ns avg", n, test_lock_weak(n));
    println!("Upgrade test rc::Weak ({}x): {}ns avg", n, test_upgrade_rc(n));
}
