//! Cross-thread access to the store

use crate::common::*;
use nirva::Error;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn unrelated_bundles_written_in_parallel() {
    let rt = runtime();
    rt.blueprints().register("NODE", &node_bundledef()).unwrap();
    let ids: Vec<_> = (0..8).map(|_| rt.store().create("NODE").unwrap()).collect();
    let barrier = Arc::new(Barrier::new(ids.len()));
    let handles: Vec<_> = ids
        .iter()
        .copied()
        .enumerate()
        .map(|(n, id)| {
            let store = Arc::clone(rt.store());
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..200 {
                    store.set_value(id, ".weight", (n * 1000 + i) as i32).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    for (n, id) in ids.into_iter().enumerate() {
        assert_eq!(
            rt.store().get_value(id, ".weight").unwrap(),
            StrandValue::Int((n * 1000 + 199) as i32)
        );
    }
}

#[test]
fn racing_unrefs_destroy_once() {
    let rt = runtime();
    rt.blueprints().register("NODE", &node_bundledef()).unwrap();
    let store = Arc::clone(rt.store());
    let id = store.create("NODE").unwrap();
    for _ in 0..7 {
        store.ref_bundle(id).unwrap();
    }
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let (store, barrier) = (Arc::clone(&store), Arc::clone(&barrier));
            thread::spawn(move || {
                barrier.wait();
                store.unref_bundle(id)
            })
        })
        .collect();
    let destroyed = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|r| matches!(r, Ok(true)))
        .count();
    assert_eq!(destroyed, 1);
    assert!(matches!(store.ref_bundle(id), Err(Error::Zombie(_))));
}

#[test]
fn random_writers_leave_valid_values() {
    let rt = runtime();
    rt.blueprints().register("NODE", &node_bundledef()).unwrap();
    let ids: Arc<Vec<_>> = Arc::new((0..16).map(|_| rt.store().create("NODE").unwrap()).collect());
    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let (store, ids) = (Arc::clone(rt.store()), Arc::clone(&ids));
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(0x5eed + t);
                for _ in 0..300 {
                    let id = ids[rng.gen_range(0..ids.len())];
                    let w: i32 = rng.gen_range(100..1000);
                    store.set_value(id, ".weight", w).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    for &id in ids.iter() {
        match rt.store().get_value(id, ".weight").unwrap() {
            StrandValue::Int(w) => assert!(w == 5 || (100..1000).contains(&w)),
            other => panic!("weight changed type: {:?}", other),
        }
    }
}
