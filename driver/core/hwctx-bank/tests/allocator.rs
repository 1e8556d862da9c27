use hwctx_addresses::{ObjectClass, ObjectId};
use hwctx_bank::{BankError, ResourceBankAllocator};
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

/// Small deterministic generator so the interleavings are reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }
}

#[test]
fn live_identifiers_are_unique_across_churn() {
    let alloc = ResourceBankAllocator::new(ObjectClass::CompletionQueue, 256, 8, 4).unwrap();
    let mut live = BTreeSet::new();
    let mut rng = Lcg(7);

    for _ in 0..5_000 {
        if rng.next() % 3 == 0 && !live.is_empty() {
            let victim = *live.iter().nth((rng.next() as usize) % live.len()).unwrap();
            assert!(alloc.release(victim));
            live.remove(&victim);
        } else {
            match alloc.allocate() {
                Ok(id) => {
                    assert!(id.as_u32() >= 8, "reserved id {id} handed out");
                    assert!(live.insert(id), "duplicate live id {id}");
                }
                Err(BankError::Exhausted) => assert_eq!(live.len(), 248),
                Err(e) => panic!("unexpected {e}"),
            }
        }
        assert_eq!(alloc.total_in_use() as usize, live.len());
    }
}

#[test]
fn load_stays_within_one_of_the_minimum() {
    let alloc = ResourceBankAllocator::new(ObjectClass::QueuePair, 1024, 0, 4).unwrap();
    for n in 1..1024 {
        alloc.allocate().unwrap();
        let load = alloc.load();
        let min = *load.iter().min().unwrap();
        let max = *load.iter().max().unwrap();
        assert!(max - min <= 1, "after {n} allocations load is {load:?}");
    }
}

#[test]
fn released_identifier_is_reused_lowest_first() {
    let alloc = ResourceBankAllocator::new(ObjectClass::MemoryRegion, 64, 0, 1).unwrap();
    let ids: Vec<_> = (0..5).map(|_| alloc.allocate().unwrap()).collect();
    assert_eq!(ids.iter().map(|i| i.as_u32()).collect::<Vec<_>>(), [0, 1, 2, 3, 4]);
    assert!(alloc.release(ObjectId::new(2)));
    assert!(alloc.release(ObjectId::new(1)));
    assert_eq!(alloc.allocate().unwrap().as_u32(), 1);
    assert_eq!(alloc.allocate().unwrap().as_u32(), 2);
    assert_eq!(alloc.allocate().unwrap().as_u32(), 5);
}

#[test]
fn repeated_release_is_a_no_op() {
    let alloc = ResourceBankAllocator::new(ObjectClass::SharedReceiveQueue, 16, 0, 2).unwrap();
    let id = alloc.allocate().unwrap();
    assert!(alloc.release(id));
    assert!(!alloc.release(id));
    assert_eq!(alloc.total_in_use(), 0);
    assert!(!alloc.is_allocated(id));
}

#[test]
fn exhaustion_is_reported_not_blocked() {
    let alloc = ResourceBankAllocator::new(ObjectClass::CompletionQueue, 8, 0, 4).unwrap();
    for _ in 0..8 {
        alloc.allocate().unwrap();
    }
    assert_eq!(alloc.allocate(), Err(BankError::Exhausted));
    assert_eq!(alloc.capacity(), 8);
}

#[test]
fn concurrent_allocators_never_share_an_identifier() {
    let threads = 4;
    let per_thread = 200;
    let alloc = Arc::new(
        ResourceBankAllocator::new(ObjectClass::QueuePair, 4096, 0, 8).unwrap(),
    );
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let alloc = Arc::clone(&alloc);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                let mut mine = Vec::with_capacity(per_thread);
                for i in 0..per_thread {
                    let id = alloc.allocate().unwrap();
                    mine.push(id);
                    if i % 4 == 3 {
                        let back = mine.swap_remove(0);
                        assert!(alloc.release(back));
                    }
                }
                mine
            })
        })
        .collect();

    let mut all = BTreeSet::new();
    for h in handles {
        for id in h.join().unwrap() {
            assert!(all.insert(id), "{id} owned by two threads");
        }
    }
    assert_eq!(alloc.total_in_use() as usize, all.len());
}
