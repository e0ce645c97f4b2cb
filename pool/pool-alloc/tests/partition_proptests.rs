//! Property-based tests for the block partition.
//!
//! Random alloc/free sequences are replayed against every allocator; after
//! each step the blocks must still tile the pool, live allocations must sit in
//! distinct used blocks, and payload bytes written by one allocation must
//! survive every other allocation's traffic.

mod common;

use common::{Arena, Pool, assert_live_blocks_used, assert_partition};
use pool_alloc::{AutoLinAlloc, HalfFitAllocator, LinearAllocator, SequentialFitAllocator, WORD};
use proptest::prelude::*;
use std::ptr::NonNull;

const REGION: usize = 256 * WORD;

// ============================================================================
//  Strategies
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Alloc(usize),
    /// Index into the live allocations, modulo their count.
    Free(usize),
}

fn ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![
            3 => (0..40 * WORD).prop_map(Op::Alloc),
            2 => any::<usize>().prop_map(Op::Free),
        ],
        1..150,
    )
}

// ============================================================================
//  Driver
// ============================================================================

struct Live {
    ptr: NonNull<u8>,
    len: usize,
    tag: u8,
}

fn fill(live: &Live) {
    unsafe { live.ptr.as_ptr().write_bytes(live.tag, live.len) };
}

fn intact(live: &Live) -> bool {
    let bytes = unsafe { std::slice::from_raw_parts(live.ptr.as_ptr(), live.len) };
    bytes.iter().all(|&b| b == live.tag)
}

fn replay<P: Pool>(pool: &P, base: usize, ops: &[Op]) -> Result<(), TestCaseError> {
    let mut live: Vec<Live> = Vec::new();
    let mut tag = 0_u8;
    for op in ops {
        match *op {
            Op::Alloc(size) => {
                if let Some(ptr) = pool.try_alloc(size) {
                    tag = tag.wrapping_add(1);
                    let l = Live {
                        ptr,
                        len: size,
                        tag,
                    };
                    fill(&l);
                    live.push(l);
                }
            }
            Op::Free(i) if !live.is_empty() => {
                let l = live.swap_remove(i % live.len());
                prop_assert!(intact(&l), "payload of {:p} was overwritten", l.ptr);
                unsafe { pool.release(l.ptr) };
            }
            Op::Free(_) => {}
        }

        let blocks = pool.blocks();
        assert_partition(&blocks, REGION, pool.total());
        let payloads: Vec<_> = live.iter().map(|l| l.ptr.as_ptr().addr() - base).collect();
        assert_live_blocks_used(&blocks, &payloads, P::PAYLOAD_OFFSET);
    }
    for l in live.drain(..) {
        prop_assert!(intact(&l));
        unsafe { pool.release(l.ptr) };
    }
    Ok(())
}

// ============================================================================
//  Partition Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn linear_keeps_the_partition(script in ops()) {
        let mut arena = Arena::<REGION>::boxed();
        let base = arena.0.as_ptr().addr();
        let pool = LinearAllocator::new();
        pool.initialize(&mut arena.0);
        replay(&pool, base, &script)?;
        prop_assert_eq!(pool.used_size(), 0);
    }

    #[test]
    fn sequential_fit_keeps_the_partition(script in ops()) {
        let mut arena = Arena::<REGION>::boxed();
        let base = arena.0.as_ptr().addr();
        let pool = SequentialFitAllocator::new();
        pool.initialize(&mut arena.0);
        replay(&pool, base, &script)?;
        prop_assert_eq!(pool.used_size(), 0);
    }

    #[test]
    fn half_fit_keeps_the_partition(script in ops()) {
        let mut arena = Arena::<REGION>::boxed();
        let base = arena.0.as_ptr().addr();
        let pool = HalfFitAllocator::new();
        pool.initialize(&mut arena.0);
        replay(&pool, base, &script)?;
        prop_assert_eq!(pool.unused_size(), pool.total_size());
    }

    /// Free lists hold exactly the free blocks, each in the list for its size,
    /// and eager coalescing never leaves two free blocks side by side.
    #[test]
    fn half_fit_lists_are_segregated(script in ops()) {
        let mut arena = Arena::<REGION>::boxed();
        let pool = HalfFitAllocator::new();
        pool.initialize(&mut arena.0);
        let mut live = Vec::new();
        for op in script {
            match op {
                Op::Alloc(size) => live.extend(pool.alloc(size).ok()),
                Op::Free(i) if !live.is_empty() => {
                    let p = live.swap_remove(i % live.len());
                    unsafe { pool.free(p) };
                }
                Op::Free(_) => {}
            }

            let mut listed = Vec::new();
            pool.for_each_free_block(|order, b| {
                let low = 1 << (order + HalfFitAllocator::MIN_ORDER);
                assert!(low <= b.size && b.size < 2 * low, "{b:?} in list {order}");
                assert!(b.is_free());
                listed.push(b.offset);
            });
            listed.sort_unstable();

            let blocks = pool.blocks();
            let free: Vec<_> = blocks.iter().filter(|b| b.is_free()).map(|b| b.offset).collect();
            prop_assert_eq!(listed, free);
            for pair in blocks.windows(2) {
                prop_assert!(!(pair[0].is_free() && pair[1].is_free()), "{:?} not merged", pair);
            }
        }
    }

    /// Handles keep their blocks used; everything dropped is reclaimable.
    #[test]
    fn auto_lin_keeps_the_partition(script in ops()) {
        let mut arena = Arena::<REGION>::boxed();
        let base = arena.0.as_ptr().addr();
        let pool = AutoLinAlloc::new();
        pool.initialize(&mut arena.0);
        let mut live = Vec::new();
        for op in script {
            match op {
                Op::Alloc(size) => live.extend(pool.alloc(size).ok()),
                // Alternate between dropping and cloning a handle.
                Op::Free(i) if !live.is_empty() => {
                    let k = i % live.len();
                    if i % 2 == 0 {
                        drop(live.swap_remove(k));
                    } else {
                        let c = live[k].clone();
                        live.push(c);
                    }
                }
                Op::Free(_) => {}
            }

            let mut blocks = Vec::new();
            pool.for_each_block(|b| blocks.push(b));
            assert_partition(&blocks, REGION, REGION);
            for h in &live {
                let payload = h.as_ptr().addr() - base;
                let block = blocks
                    .iter()
                    .find(|b| b.offset + AutoLinAlloc::HEADER_SIZE == payload)
                    .expect("handle without a block");
                let holders = live.iter().filter(|o| *o == h).count();
                prop_assert_eq!(block.ref_count, holders);
            }
        }
        drop(live);
        prop_assert_eq!(pool.unused_size(), REGION);
    }
}
