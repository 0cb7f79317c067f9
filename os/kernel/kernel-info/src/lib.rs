//! # Kernel Configuration and Boot Interface
//!
//! This crate defines the memory layout constants and the boot hand-off
//! contract that the physical memory manager is configured with. It is the
//! single source of truth for values shared between the boot stub, the
//! kernel and its allocators.
//!
//! ## Architecture
//!
//! ### Boot Information ([`boot`])
//! * **Memory Survey**: the [`MemorySurvey`](boot::MemorySurvey) trait, the
//!   narrow interface through which the kernel learns how much physical
//!   memory exists.
//! * **Boot Data**: [`BootMemoryInfo`](boot::BootMemoryInfo), a `#[repr(C)]`
//!   record filled by the boot stub.
//!
//! ### Memory Layout ([`memory`])
//! * **Page geometry**: `PAGE_SIZE`, `MAX_ORDER` and the 512-frame top-order
//!   block every zone is a multiple of.
//! * **Zones**: `DMA_ZONE_LIMIT` separates ISA-DMA-capable memory.
//! * **Kernel placement**: the higher-half `KERNEL_BASE`.
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │     Low Memory (< 1MiB)         │
//!             ├─────────────────────────────────┤ 0x0010_0000 (1 MiB)
//!             │       Kernel Image              │
//! kernel_end  ├─────────────────────────────────┤
//!             │  bootmem: frame table, bitmaps  │
//!             ├─────────────────────────────────┤
//!             │    Available RAM                │
//!             │  (Managed by the page allocator)│
//!             └─────────────────────────────────┘
//! ```
//!
//! All layout constants are `const` values checked with compile-time
//! assertions.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
