//! # Kernel Boot Information

use kernel_memory_addresses::PhysicalAddress;

/// Whatever enumerated physical memory during boot.
///
/// The physical memory manager consumes exactly one value from it, once,
/// before the page allocator is built.
pub trait MemorySurvey {
    /// Total usable physical memory in bytes, i.e. the highest usable
    /// physical address when memory is contiguous from zero.
    fn usable_bytes(&self) -> u64;
}

/// Memory facts handed from the boot stub to the kernel.
/// Keep this `#[repr(C)]` and prefer fixed-size integers at the ABI boundary.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BootMemoryInfo {
    /// Usable bytes reported by the firmware memory map (E820 / multiboot).
    pub usable_bytes: u64,

    /// First physical byte after the loaded kernel image.
    pub kernel_end: u32,
}

impl BootMemoryInfo {
    #[must_use]
    pub const fn new(usable_bytes: u64, kernel_end: u32) -> Self {
        Self {
            usable_bytes,
            kernel_end,
        }
    }

    #[must_use]
    pub const fn kernel_end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.kernel_end)
    }
}

impl MemorySurvey for BootMemoryInfo {
    fn usable_bytes(&self) -> u64 {
        self.usable_bytes
    }
}
