//! # Kernel Physical Memory Management
//!
//! This crate owns every physical page frame of the machine. It is built in
//! two stages during boot and afterwards is the only source of frames for page
//! tables, slab caches, VMAs and DMA buffers.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               PhysicalMemory (memory)               │
//! │    • Interrupt-safe lock around the allocator       │
//! │    • Boot glue from the memory survey               │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │             BuddyAllocator (buddy)                  │
//! │    • DMA / Normal zones (zone)                      │
//! │    • One free area per order (free_area)            │
//! │    • Split on allocate, coalesce on free            │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ carved at init
//! ┌─────────────────▼───────────────────────────────────┐
//! │               BootMem (bootmem)                     │
//! │    • Bump allocator, no free                        │
//! │    • Holds the frame table and bitmaps              │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Bootstrap Allocator ([`bootmem`])
//!
//! A monotonic bump allocator over `[start, limit)`. It seeds the allocator's
//! own data structures before any general allocator exists. Whatever it
//! consumed inside the managed range is later marked reserved.
//!
//! ### Page Frame Table ([`frame`])
//!
//! One [`PageFrame`] per physical page: flags (`RESERVED`, `ALLOCATED`,
//! `HEAD`), a reference count, the owning zone and the free-list links. Lookup
//! from an address is bounds-checked index arithmetic.
//!
//! ### Buddy Allocator ([`buddy`], [`zone`], [`free_area`], [`bitmap`])
//!
//! Each zone holds `MAX_ORDER` free areas. A free area keeps two views of the
//! same set of free blocks that must never diverge:
//! * an address-ordered intrusive list, so the lowest block is handed out first;
//! * a bitmap with one bit per block, clear exactly when the block is listed.
//!
//! The bitmap makes the buddy check on free O(1). [`BuddyAllocator::verify`]
//! proves frame by frame that every page is covered exactly once, by a free
//! block, an allocated block, or a reservation.
//!
//! ### Physical Mapper ([`phys_mapper`])
//!
//! Metadata carved at a physical address is written through a [`PhysMapper`],
//! identity before paging, [`KERNEL_BASE`](kernel_info::memory::KERNEL_BASE)
//! offset in the higher-half kernel, or an arbitrary offset in host tests.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kernel_alloc::{PhysicalMemory, phys_mapper::OffsetPhysMapper};
//! use kernel_info::boot::BootMemoryInfo;
//!
//! let info = BootMemoryInfo::new(64 * 1024 * 1024, 0x0030_0000);
//! let mapper = OffsetPhysMapper::higher_half();
//! let memory = unsafe { PhysicalMemory::from_boot_info(&info, &mapper) }
//!     .expect("physical memory manager");
//!
//! let pages = memory.alloc_pages(2).expect("four pages");
//! memory.free_pages(pages, 2).expect("valid free");
//! ```
//!
//! ## Concurrency
//!
//! A single CPU with preemption and interrupts. Every allocator operation runs
//! under one spin lock taken with interrupts disabled
//! ([`kernel_sync::Mutex::lock_irq`]). Bootmem is single-threaded early-boot
//! state and is not locked.
//!
//! ## Features
//!
//! * `strict`: panic on contract violations (invalid order, foreign address,
//!   double free) in release builds too. Debug builds always panic on them;
//!   release builds otherwise log and refuse.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod bitmap;
pub mod bootmem;
pub mod buddy;
pub mod frame;
pub mod frame_alloc;
pub mod free_area;
pub mod memory;
pub mod phys_mapper;
pub mod zone;

#[cfg(test)]
pub(crate) mod test_support;

pub use bootmem::{BootMem, BootMemError};
pub use buddy::{
    AllocError, BuddyAllocator, InitError, MemoryStats, order_bytes, order_for_bytes,
};
pub use frame::{FrameError, FrameFlags, FrameTable, PageFrame};
pub use frame_alloc::{FrameAlloc, FrameFree};
pub use memory::PhysicalMemory;
pub use phys_mapper::{IdentityPhysMapper, OffsetPhysMapper, PhysMapper};
pub use zone::{ConsistencyError, Zone, ZoneKind, ZoneLayout, ZoneSpan, ZoneStats};
