use std::sync::Arc;
use std::thread;

use kwire::dispatch::DescriptorCache;
use kwire::{BuiltinTag, CallConvention};

#[test]
fn concurrent_interns_collapse_to_one_instance() {
    let cache = Arc::new(DescriptorCache::new());
    let reference = cache
        .intern(
            BuiltinTag::Int,
            &[BuiltinTag::Int, BuiltinTag::Int],
            CallConvention::C,
        )
        .expect("intern reference descriptor");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let reference = Arc::clone(&reference);
            thread::spawn(move || {
                for _ in 0..1000 {
                    let interned = cache
                        .intern(
                            BuiltinTag::Int,
                            &[BuiltinTag::Int, BuiltinTag::Int],
                            CallConvention::C,
                        )
                        .expect("intern in worker");
                    assert!(Arc::ptr_eq(&interned, &reference));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker thread");
    }
    assert_eq!(cache.len(), 1);
}

#[test]
fn concurrent_interns_of_distinct_shapes_stay_distinct() {
    let cache = Arc::new(DescriptorCache::new());
    let shapes: Vec<(BuiltinTag, Vec<BuiltinTag>)> = vec![
        (BuiltinTag::Void, vec![]),
        (BuiltinTag::Int, vec![BuiltinTag::Int]),
        (BuiltinTag::Double, vec![BuiltinTag::Double, BuiltinTag::Double]),
        (BuiltinTag::Address, vec![BuiltinTag::Address, BuiltinTag::UInt]),
    ];

    let handles: Vec<_> = (0..8usize)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            let shapes = shapes.clone();
            thread::spawn(move || {
                for round in 0..250usize {
                    let (ret, params) = &shapes[(worker + round) % shapes.len()];
                    cache
                        .intern(*ret, params, CallConvention::C)
                        .expect("intern shape");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker thread");
    }
    assert_eq!(cache.len(), shapes.len());
}
