//! Chunk-sized, chunk-aligned memory straight from the OS.
//!
//! Chunks must be aligned to their own size so that the chunk owning any
//! address can be recovered by masking off the low bits.

use once_cell::sync::Lazy;

use crate::error::{RemsetError, Result};

use super::{align_up, is_aligned};

pub struct VirtualMemory {
    address: *mut u8,
    size: usize,
}

// The mapping is plain memory owned by this value. All concurrent access goes
// through `ChunkMemory`, which uses atomics where writers may race.
unsafe impl Send for VirtualMemory {}
unsafe impl Sync for VirtualMemory {}

impl VirtualMemory {
    pub fn start(&self) -> usize {
        self.address as usize
    }

    pub fn end(&self) -> usize {
        self.start() + self.size
    }

    pub fn address(&self) -> *mut u8 {
        self.address
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn contains(&self, address: usize) -> bool {
        address >= self.start() && address < self.end()
    }

    /// Maps `size` bytes of zeroed read-write memory aligned to `alignment`.
    pub fn allocate_aligned(size: usize, alignment: usize, name: &'static str) -> Result<Self> {
        debug_assert!(alignment.is_power_of_two());
        debug_assert!(is_aligned(size, page_size()));

        let alignment = alignment.max(page_size());
        let address = unsafe { vm::map_aligned(size, alignment) }.ok_or(RemsetError::MapFailed {
            size,
            errno: errno::errno().0,
        })?;

        debug_assert!(is_aligned(address as usize, alignment));
        log::trace!(target: "gc", "mapped {} at {:p} ({})", super::utils::formatted_size(size), address, name);

        Ok(Self { address, size })
    }
}

impl Drop for VirtualMemory {
    fn drop(&mut self) {
        unsafe {
            vm::unmap(self.address, self.size);
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod vm {
            use super::{align_up, page_size};

            /// Over-maps by `alignment` and trims both ends so the remaining
            /// mapping starts on an aligned address.
            pub unsafe fn map_aligned(size: usize, alignment: usize) -> Option<*mut u8> {
                let allocated_size = size + alignment - page_size();
                let addr = libc::mmap(
                    std::ptr::null_mut(),
                    allocated_size,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                );

                if addr == libc::MAP_FAILED {
                    return None;
                }

                let base = addr as usize;
                let aligned_base = align_up(base, alignment);

                unmap_range(base, aligned_base);
                unmap_range(aligned_base + size, base + allocated_size);

                Some(aligned_base as *mut u8)
            }

            unsafe fn unmap_range(start: usize, end: usize) {
                if end > start && libc::munmap(start as _, end - start) != 0 {
                    log::error!(target: "gc", "munmap({:#x}, {:#x}) failed: {}", start, end - start, errno::errno());
                }
            }

            pub unsafe fn unmap(address: *mut u8, size: usize) {
                unmap_range(address as usize, address as usize + size);
            }

            pub fn determine_page_size() -> usize {
                let val = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

                if val <= 0 {
                    4096
                } else {
                    val as usize
                }
            }
        }
    } else if #[cfg(windows)] {
        mod vm {
            use winapi::um::memoryapi::{VirtualAlloc, VirtualFree};
            use winapi::um::winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_NOACCESS, PAGE_READWRITE};

            use super::align_up;

            /// Reserves an oversized range to find an aligned address, releases it and
            /// maps again at that address. Another thread may steal the range in
            /// between, so this retries a few times.
            pub unsafe fn map_aligned(size: usize, alignment: usize) -> Option<*mut u8> {
                for _ in 0..8 {
                    let probe = VirtualAlloc(std::ptr::null_mut(), size + alignment, MEM_RESERVE, PAGE_NOACCESS);
                    if probe.is_null() {
                        return None;
                    }

                    let aligned_base = align_up(probe as usize, alignment);
                    VirtualFree(probe, 0, MEM_RELEASE);

                    let address = VirtualAlloc(aligned_base as _, size, MEM_RESERVE | MEM_COMMIT, PAGE_READWRITE);
                    if !address.is_null() {
                        return Some(address as *mut u8);
                    }
                }

                None
            }

            pub unsafe fn unmap(address: *mut u8, _size: usize) {
                VirtualFree(address as _, 0, MEM_RELEASE);
            }

            pub fn determine_page_size() -> usize {
                use winapi::um::sysinfoapi::{GetSystemInfo, LPSYSTEM_INFO, SYSTEM_INFO};

                unsafe {
                    let mut system_info: SYSTEM_INFO = std::mem::zeroed();
                    GetSystemInfo(&mut system_info as LPSYSTEM_INFO);

                    system_info.dwPageSize as usize
                }
            }
        }
    }
}

static PAGE_SIZE: Lazy<usize> = Lazy::new(|| {
    let size = vm::determine_page_size();
    assert!(size.is_power_of_two());
    size
});

pub fn page_size() -> usize {
    *PAGE_SIZE
}
