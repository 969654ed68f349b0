//! Property tests: no deleted slot outlives the passes that follow it, and
//! no live record is ever lost.

mod common;

use std::collections::BTreeMap;

use proptest::prelude::*;

use common::*;

#[derive(Debug, Clone)]
enum Op {
    Insert(u8),
    Remove(u8),
    Pass,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..48).prop_map(Op::Insert),
        3 => (0u8..48).prop_map(Op::Remove),
        1 => Just(Op::Pass),
    ]
}

fn key(k: u8) -> Vec<u8> {
    vec![b'k', k]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_deleted_slots_reclaimed(ops in prop::collection::vec(op(), 1..300), capacity in 2usize..6) {
        let store = manual_store();
        let tree = open_tree(&store, capacity);
        let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(k) => {
                    tree.insert(&key(k), &[k]).unwrap();
                    model.insert(key(k), vec![k]);
                }
                Op::Remove(k) => {
                    let removed = tree.remove(&key(k)).unwrap();
                    prop_assert_eq!(removed, model.remove(&key(k)).is_some());
                }
                Op::Pass => {
                    store.run_pass().unwrap();
                }
            }
        }

        store.run_pass().unwrap();
        prop_assert_eq!(store.compressor().queue_len(), 0);

        let shape = tree.shape().unwrap();
        prop_assert_eq!(shape.deleted_slots, 0);
        prop_assert_eq!(shape.live_records, model.len());
        for k in 0u8..48 {
            prop_assert_eq!(tree.get(&key(k)).unwrap(), model.get(&key(k)).cloned());
        }
    }

    #[test]
    fn prop_duplicates_survive_passes(dups in prop::collection::btree_set(0u8..32, 1..24), drop_mask in any::<u32>()) {
        let store = manual_store();
        let tree = open_tree(&store, 3);
        insert_all(&tree, &["j", "l"]);
        for d in &dups {
            tree.insert_duplicate(b"k", &[*d]).unwrap();
        }

        let mut kept = Vec::new();
        for d in &dups {
            if drop_mask & (1 << (d % 32)) != 0 {
                prop_assert!(tree.remove_duplicate(b"k", &[*d]).unwrap());
            } else {
                kept.push(vec![*d]);
            }
        }

        store.run_pass().unwrap();
        prop_assert_eq!(tree.get_duplicates(b"k").unwrap(), kept.clone());
        let shape = tree.shape().unwrap();
        prop_assert_eq!(shape.deleted_slots, 0);
        prop_assert_eq!(shape.duplicate_roots, usize::from(!kept.is_empty()));
        prop_assert_eq!(tree.get(b"j").unwrap(), Some(b"j".to_vec()));
    }
}
