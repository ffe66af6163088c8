//! Concurrency tests: parallel writers, mixed workloads, overload
//! backpressure, chain integrity.
//!
//! The workload tests run on the system clock: rotation and vacuum race for
//! real, and the rotation timeout is set generously so an unlucky scheduler
//! stall cannot fail an add. The overload test instead pins a rotation
//! mid-flight with a stalling clock, so the rejection path is deterministic.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tempora::{Clock, Config, Store, SystemClock};

fn concurrent_config() -> Config {
    Config::default()
        .with_block_size_ms(20)
        .with_vacuum_delay_ms(50)
        .with_rotation_lock_timeout_ms(2_000)
}

#[test]
fn disjoint_writers_land_every_item() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 250;

    let store: Arc<Store<String, u64>> = Arc::new(Store::new(concurrent_config()));
    let expiry = SystemClock.now_millis() + 60_000;

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    store
                        .add(format!("t{}-k{}", t, i), expiry, i as u64)
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.len(), THREADS * PER_THREAD);
    let all = store.get_range(i64::MIN, i64::MAX).unwrap();
    assert_eq!(all.len(), THREADS * PER_THREAD);

    // every id readable individually
    for t in 0..THREADS {
        for i in 0..PER_THREAD {
            assert!(store.get(&format!("t{}-k{}", t, i)).unwrap().is_some());
        }
    }

    let ids = store.chain_block_ids();
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "chain ids not sorted: {:?}", ids);
}

#[test]
fn writers_and_removers_agree_on_the_survivors() {
    const KEYS: usize = 500;

    let store: Arc<Store<String, u64>> = Arc::new(Store::new(concurrent_config()));
    let expiry = SystemClock.now_millis() + 60_000;

    // writer fills even and odd keys, remover deletes the odd ones behind it
    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 0..KEYS {
                store.add(format!("k{}", i), expiry, i as u64).unwrap();
            }
        })
    };
    writer.join().unwrap();

    let removers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                // overlapping removers: idempotency keeps this safe
                for i in (1..KEYS).step_by(2) {
                    store.remove(&format!("k{}", i)).unwrap();
                }
            })
        })
        .collect();
    for handle in removers {
        handle.join().unwrap();
    }

    assert_eq!(store.len(), KEYS / 2);
    for i in (0..KEYS).step_by(2) {
        assert!(store.get(&format!("k{}", i)).unwrap().is_some());
    }
    for i in (1..KEYS).step_by(2) {
        assert!(store.get(&format!("k{}", i)).unwrap().is_none());
    }
}

#[test]
fn mixed_add_remove_vacuum_keeps_the_chain_intact() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 400;

    let store: Arc<Store<String, u64>> = Arc::new(Store::new(concurrent_config()));

    let mut handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let id = format!("t{}-k{}", t, i);
                    let expiry = SystemClock.now_millis() + 25;
                    store.add(id.clone(), expiry, i as u64).unwrap();
                    if i % 3 == 0 {
                        store.remove(&id).unwrap();
                    }
                }
            })
        })
        .collect();

    // vacuum racing the writers: single-flight, must never corrupt the chain
    handles.push({
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for _ in 0..200 {
                store.vacuum();
                thread::yield_now();
            }
        })
    });

    for handle in handles {
        handle.join().unwrap();
    }

    let ids = store.chain_block_ids();
    assert!(
        ids.windows(2).all(|w| w[0] < w[1]),
        "chain lost ordering or gained a cycle: {:?}",
        ids
    );

    // the block index and the chain agree on reachability of the ends
    assert!(ids.len() <= store.block_count());
    assert!(store.block_count() >= 1);
}

/// Clock that parks a designated thread from its second sample onward, so a
/// rotation in progress can be held mid-flight while a competitor waits on
/// the rotation lock.
struct StallClock {
    now: AtomicI64,
    victim: Mutex<Option<thread::ThreadId>>,
    victim_calls: AtomicUsize,
    parked: AtomicBool,
    released: AtomicBool,
}

impl StallClock {
    fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
            victim: Mutex::new(None),
            victim_calls: AtomicUsize::new(0),
            parked: AtomicBool::new(false),
            released: AtomicBool::new(false),
        }
    }

    fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    /// Mark the calling thread as the one to stall.
    fn stall_me(&self) {
        *self.victim.lock() = Some(thread::current().id());
    }

    fn wait_until_parked(&self) {
        while !self.parked.load(Ordering::SeqCst) {
            thread::yield_now();
        }
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

impl Clock for StallClock {
    fn now_millis(&self) -> i64 {
        let stalling = *self.victim.lock() == Some(thread::current().id());
        // the victim's first sample is the lock-free fast path; from the
        // second sample on it holds the rotation lock
        if stalling && self.victim_calls.fetch_add(1, Ordering::SeqCst) >= 1 {
            self.parked.store(true, Ordering::SeqCst);
            while !self.released.load(Ordering::SeqCst) {
                thread::yield_now();
            }
        }
        self.now.load(Ordering::SeqCst)
    }
}

#[test]
fn contended_rotation_rejects_with_overload() {
    let clock = Arc::new(StallClock::new(50));
    let config = Config::default()
        .with_block_size_ms(100)
        .with_rotation_lock_timeout_ms(40);
    let store: Arc<Store<&'static str, u32>> =
        Arc::new(Store::with_clock(config, clock.clone()));
    store.add("a", 99_999, 1).unwrap();

    // cross the window; the rotator thread stalls mid-rotation while
    // holding the rotation lock
    clock.set(250);
    let rotator = {
        let store = Arc::clone(&store);
        let clock = Arc::clone(&clock);
        thread::spawn(move || {
            clock.stall_me();
            store.add("b", 99_999, 2).unwrap();
        })
    };
    clock.wait_until_parked();

    // a competing add can neither rotate nor wait out the holder
    let err = store.add("c", 99_999, 3).unwrap_err();
    assert!(err.is_overload());
    assert!(err.is_retryable());

    clock.release();
    rotator.join().unwrap();

    // the rejected write never landed; the held-up rotation finished normally
    assert!(store.get(&"c").unwrap().is_none());
    assert!(store.get(&"b").unwrap().is_some());
    assert_eq!(store.len(), 2);
    assert_eq!(store.block_count(), 2);
}

#[test]
fn concurrent_vacuums_do_not_double_count() {
    let store: Arc<Store<String, u64>> = Arc::new(Store::new(concurrent_config()));
    let expiry = SystemClock.now_millis() + 5;

    for i in 0..200 {
        store.add(format!("k{}", i), expiry, i).unwrap();
        if i % 40 == 0 {
            thread::sleep(std::time::Duration::from_millis(21));
        }
    }
    // everything expired and aged past the 50ms delay
    thread::sleep(std::time::Duration::from_millis(120));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.vacuum())
        })
        .collect();
    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    // single-flight plus fixed-point: the reclaim total can never exceed the
    // number of blocks that ever existed
    let ids = store.chain_block_ids();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert!(total + store.chain_block_ids().len() <= 64);
    assert_eq!(store.vacuum(), 0, "post-quiescence vacuum must be a fixed point");
}
