//! Zeroed, cache-line aligned memory for the dataset and scratchpads,
//! optionally backed by huge pages.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::slice;

use super::flags::Flags;
use error::{Result, RxError};

const ALIGN: usize = 64;
#[cfg(target_os = "linux")]
const HUGE_PAGE_2M: usize = 2 * 1024 * 1024;
#[cfg(target_os = "linux")]
const HUGE_PAGE_1G: usize = 1024 * 1024 * 1024;

enum Backing {
    Heap(Layout),
    #[cfg(target_os = "linux")]
    Mapped(usize),
}

/// Owned, zero-initialised buffer. Contents are only reachable through
/// slices, the raw pointer is handed out for the compiled program.
pub struct PageBuffer {
    ptr: NonNull<u8>,
    len: usize,
    backing: Backing,
}

//the buffer is plain memory with a single owner
unsafe impl Send for PageBuffer {}
unsafe impl Sync for PageBuffer {}

impl PageBuffer {
    /// Allocates `len` zeroed bytes. With `LARGE_PAGES` the memory must come
    /// from huge pages, anything else is an allocation failure.
    pub fn allocate(len: usize, flags: Flags, what: &'static str) -> Result<PageBuffer> {
        let failure = RxError::AllocationFailure { what, size: len };
        if len == 0 {
            return Err(failure);
        }
        if flags.contains(Flags::LARGE_PAGES) {
            return PageBuffer::allocate_huge(len, flags.contains(Flags::ONE_GB_PAGES), failure);
        }

        let layout = Layout::from_size_align(len, ALIGN).map_err(|_| failure)?;
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        match NonNull::new(raw) {
            Some(ptr) => Ok(PageBuffer {
                ptr,
                len,
                backing: Backing::Heap(layout),
            }),
            None => Err(RxError::AllocationFailure { what, size: len }),
        }
    }

    #[cfg(target_os = "linux")]
    fn allocate_huge(len: usize, one_gb: bool, failure: RxError) -> Result<PageBuffer> {
        let (page, extra) = if one_gb {
            (HUGE_PAGE_1G, libc::MAP_HUGE_1GB)
        } else {
            (HUGE_PAGE_2M, 0)
        };
        let mapped = (len + page - 1) & !(page - 1);
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mapped,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_HUGETLB | extra,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(failure);
        }
        match NonNull::new(raw as *mut u8) {
            Some(ptr) => Ok(PageBuffer {
                ptr,
                len,
                backing: Backing::Mapped(mapped),
            }),
            None => Err(failure),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn allocate_huge(_len: usize, _one_gb: bool, failure: RxError) -> Result<PageBuffer> {
        Err(failure)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_large_pages(&self) -> bool {
        match self.backing {
            Backing::Heap(_) => false,
            #[cfg(target_os = "linux")]
            Backing::Mapped(_) => true,
        }
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Word view of the buffer; the base is 64-byte aligned.
    pub fn as_u64_slice(&self) -> &[u64] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr() as *const u64, self.len / 8) }
    }

    pub fn as_u64_mut_slice(&mut self) -> &mut [u64] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr() as *mut u64, self.len / 8) }
    }
}

impl Drop for PageBuffer {
    fn drop(&mut self) {
        match self.backing {
            Backing::Heap(layout) => unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) },
            #[cfg(target_os = "linux")]
            Backing::Mapped(mapped) => unsafe {
                libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, mapped);
            },
        }
    }
}
