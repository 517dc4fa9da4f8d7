//! Private code pages. The mapping is never writable and executable at
//! the same time: `install` flips it to read/write, copies, then flips it
//! back to read/execute.

use std::ptr::{self, NonNull};

use error::{Result, RxError};

const PAGE_SIZE: usize = 4096;

pub struct ExecutableBuffer {
    ptr: NonNull<u8>,
    len: usize,
    capacity: usize,
}

unsafe impl Send for ExecutableBuffer {}

impl ExecutableBuffer {
    pub fn new(capacity: usize) -> Result<ExecutableBuffer> {
        let capacity = (capacity + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                capacity,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(RxError::AllocationFailure {
                what: "code buffer",
                size: capacity,
            });
        }
        match NonNull::new(raw as *mut u8) {
            Some(ptr) => Ok(ExecutableBuffer {
                ptr,
                len: 0,
                capacity,
            }),
            None => Err(RxError::AllocationFailure {
                what: "code buffer",
                size: capacity,
            }),
        }
    }

    fn protect(&mut self, prot: libc::c_int) -> Result<()> {
        let rc = unsafe { libc::mprotect(self.ptr.as_ptr() as *mut libc::c_void, self.capacity, prot) };
        if rc != 0 {
            return Err(RxError::AllocationFailure {
                what: "code buffer protection",
                size: self.capacity,
            });
        }
        Ok(())
    }

    /// Replaces the buffer contents with `code` and leaves the pages
    /// read/execute.
    pub fn install(&mut self, code: &[u8]) -> Result<()> {
        if code.len() > self.capacity {
            return Err(RxError::AllocationFailure {
                what: "code buffer",
                size: code.len(),
            });
        }
        self.protect(libc::PROT_READ | libc::PROT_WRITE)?;
        unsafe {
            ptr::copy_nonoverlapping(code.as_ptr(), self.ptr.as_ptr(), code.len());
        }
        self.len = code.len();
        self.protect(libc::PROT_READ | libc::PROT_EXEC)
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for ExecutableBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.capacity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_and_call() {
        let mut buf = ExecutableBuffer::new(100).unwrap();
        assert!(buf.is_empty());
        //mov eax, 42; ret
        buf.install(&[0xB8, 42, 0, 0, 0, 0xC3]).unwrap();
        assert_eq!(buf.len(), 6);
        let f: extern "sysv64" fn() -> u32 = unsafe { ::std::mem::transmute(buf.as_ptr()) };
        assert_eq!(f(), 42);

        //reinstalling flips the pages back to writable first
        buf.install(&[0xB8, 7, 0, 0, 0, 0xC3]).unwrap();
        let f: extern "sysv64" fn() -> u32 = unsafe { ::std::mem::transmute(buf.as_ptr()) };
        assert_eq!(f(), 7);
    }

    #[test]
    fn test_oversized_code_rejected() {
        let mut buf = ExecutableBuffer::new(PAGE_SIZE).unwrap();
        match buf.install(&vec![0xC3; PAGE_SIZE + 1]) {
            Err(RxError::AllocationFailure { .. }) => {}
            _ => panic!("expected allocation failure"),
        }
    }
}
