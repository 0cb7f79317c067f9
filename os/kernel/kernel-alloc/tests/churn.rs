mod common;

use common::{Lcg, MIB, TOP_BLOCK, allocator_with_metadata_at, clean_normal_zone};
use kernel_alloc::{AllocError, BuddyAllocator};
use kernel_info::memory::{MAX_ORDER, PAGE_SIZE};
use kernel_memory_addresses::PhysicalAddress;

fn assert_accounting(buddy: &BuddyAllocator<'_>) {
    for zone in buddy.stats().iter() {
        let listed: usize = zone
            .free_blocks
            .iter()
            .enumerate()
            .map(|(order, n)| n << order)
            .sum();
        assert_eq!(listed, zone.free_frames);
        assert_eq!(
            zone.free_frames + zone.allocated_frames + zone.reserved_frames,
            zone.total_frames
        );
    }
    buddy.verify().unwrap();
}

fn churn(buddy: &mut BuddyAllocator<'_>, seed: u64, steps: usize) {
    let mut rng = Lcg::new(seed);
    let mut held: Vec<(PhysicalAddress, usize)> = Vec::new();

    for step in 0..steps {
        let free_something = !held.is_empty() && rng.below(3) == 0;
        if free_something {
            let i = rng.below(held.len() as u64) as usize;
            let (addr, order) = held.swap_remove(i);
            buddy.free_pages(addr, order).unwrap();
        } else {
            // mostly small blocks, occasionally large ones
            let order = match rng.below(10) {
                0..=5 => rng.below(2),
                6..=8 => rng.below(5),
                _ => rng.below(MAX_ORDER as u64),
            } as usize;
            match buddy.alloc_pages(order) {
                Ok(addr) => held.push((addr, order)),
                Err(AllocError::OutOfMemory(o)) => assert_eq!(o, order),
                Err(e) => panic!("step {step}: {e}"),
            }
        }
        if step % 16 == 0 {
            assert_accounting(buddy);
        }
    }

    // no two live blocks overlap
    let mut spans: Vec<(u32, u32)> = held
        .iter()
        .map(|&(a, o)| (a.as_u32(), a.as_u32() + (PAGE_SIZE << o)))
        .collect();
    spans.sort_unstable();
    for w in spans.windows(2) {
        assert!(w[0].1 <= w[1].0, "{w:x?} overlap");
    }

    for (addr, order) in held {
        buddy.free_pages(addr, order).unwrap();
    }
    assert_accounting(buddy);
}

#[test]
fn random_churn_on_a_clean_zone_returns_to_whole_blocks() {
    let mut buddy = clean_normal_zone(4);
    let before = buddy.stats();
    churn(&mut buddy, 0x5EED, 2_000);
    assert_eq!(buddy.stats(), before);
}

#[test]
fn random_churn_with_reserved_frames_keeps_invariants() {
    let start = 16 * MIB;
    let mut buddy = allocator_with_metadata_at(start, start, 3 * TOP_BLOCK);
    let before = buddy.stats();
    assert!(before.reserved_frames() > 0);
    churn(&mut buddy, 42, 2_000);
    assert_eq!(buddy.stats(), before);
}
