//! Writers, readers and the daemon working on one tree at the same time.

mod common;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use common::*;

const WRITERS: u8 = 4;
const OPS_PER_WRITER: usize = 3_000;
const KEYS_PER_WRITER: u8 = 96;

#[test]
fn test_concurrent_writers_with_daemon() {
    let store = daemon_store(2);
    let tree = open_tree(&store, 6);
    let stop = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..WRITERS)
        .map(|w| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(0x5eed + w as u64);
                let mut live = BTreeSet::new();
                for _ in 0..OPS_PER_WRITER {
                    let key = vec![w, rng.gen_range(0..KEYS_PER_WRITER)];
                    if rng.gen_bool(0.55) {
                        tree.insert(&key, &key).unwrap();
                        live.insert(key);
                    } else {
                        let removed = tree.remove(&key).unwrap();
                        assert_eq!(removed, live.remove(&key));
                    }
                }
                live
            })
        })
        .collect();

    // A reader runs alongside the writers
    let reader = {
        let tree = Arc::clone(&tree);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(0xfeed);
            let mut reads = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let key = vec![rng.gen_range(0..WRITERS), rng.gen_range(0..KEYS_PER_WRITER)];
                if let Some(value) = tree.get(&key).unwrap() {
                    assert_eq!(value, key);
                }
                reads += 1;
            }
            reads
        })
    };

    let models: Vec<BTreeSet<Vec<u8>>> = writers.into_iter().map(|h| h.join().unwrap()).collect();
    stop.store(true, Ordering::Relaxed);
    assert!(reader.join().unwrap() > 0);

    // Drain whatever the daemon has not reached yet. A pass that found the
    // queue empty ran while no other pass was in flight.
    assert!(wait_until(|| store.run_pass().unwrap().records == 0));
    assert_eq!(store.compressor().queue_len(), 0);
    assert!(store.daemon_running());
    assert!(!store.env().is_invalid());

    let expected: usize = models.iter().map(|m| m.len()).sum();
    let shape = tree.shape().unwrap();
    assert_eq!(shape.live_records, expected);
    for (w, model) in models.iter().enumerate() {
        for k in 0..KEYS_PER_WRITER {
            let key = vec![w as u8, k];
            assert_eq!(tree.get(&key).unwrap().is_some(), model.contains(&key), "key {:?}", key);
        }
    }

    let stats = store.stats();
    assert!(stats.woken_up > 0);
    assert_eq!(stats.cursors_bins, 0);
}

#[test]
fn test_concurrent_passes_are_serialized() {
    let store = Arc::new(manual_store());
    let tree = open_tree(&store, 4);
    for k in 0..200u8 {
        tree.insert(&[k], &[k]).unwrap();
    }
    for k in (0..200u8).filter(|k| k % 3 != 0) {
        tree.remove(&[k]).unwrap();
    }

    let passes: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.run_pass().unwrap())
        })
        .collect();
    let summaries: Vec<_> = passes.into_iter().map(|h| h.join().unwrap()).collect();

    // Exactly one pass saw the queue; the others found it empty
    assert_eq!(summaries.iter().filter(|s| s.records > 0).count(), 1);
    let shape = tree.shape().unwrap();
    assert_eq!(shape.deleted_slots, 0);
    assert_eq!(shape.live_records, 67);
}
