//! Raw anonymous shared memory, mirroring `StateKeyValue`'s direct
//! `mmap`/`mremap`/`munmap` calls in `original_source/src/state/StateKeyValue.cpp`.
//! This is the one place in this crate where `unsafe` is intrinsic to the
//! problem rather than a convenience.

use std::ptr;

use faas_types::error::StateError;

/// The host's native page size, queried once via `sysconf`.
pub fn host_page_size() -> usize {
    use std::sync::OnceLock;
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size <= 0 {
            4096
        } else {
            size as usize
        }
    })
}

pub fn is_page_aligned(addr: usize) -> bool {
    addr & (host_page_size() - 1) == 0
}

pub fn round_up_to_page(n: usize) -> usize {
    let page = host_page_size();
    n.div_ceil(page) * page
}

/// An anonymous, writable, shared mapping of `len` bytes.
///
/// `len` is always a whole number of host pages. The mapping is released on
/// drop. Not `Copy`/`Clone` — ownership of the region is unique.
pub struct MappedRegion {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the mapping is anonymous process memory; nothing here is tied to
// the thread that created it, and all access is mediated by the owning
// `StateKeyValue`'s lock.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Map `len` bytes of fresh, zeroed, anonymous shared memory.
    pub fn new(len: usize) -> Result<Self, StateError> {
        debug_assert!(len > 0 && len % host_page_size() == 0);
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(StateError::MapFailed {
                key: String::new(),
                reason: std::io::Error::last_os_error().to_string(),
            });
        }
        Ok(Self { ptr: ptr as *mut u8, len })
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Remap this region onto `new_addr`, which must be page-aligned.
    /// On success the region's own pointer is updated to `new_addr`; the
    /// caller is now responsible for that address's lifetime (the region
    /// still frees it on drop).
    pub fn remap_onto(&mut self, new_addr: *mut u8) -> Result<(), StateError> {
        if !is_page_aligned(new_addr as usize) {
            return Err(StateError::Misaligned {
                key: String::new(),
                addr: new_addr as usize,
            });
        }
        let result = unsafe {
            libc::mremap(
                self.ptr as *mut libc::c_void,
                self.len,
                self.len,
                libc::MREMAP_FIXED | libc::MREMAP_MAYMOVE,
                new_addr as *mut libc::c_void,
            )
        };
        if result == libc::MAP_FAILED {
            return Err(StateError::MapFailed {
                key: String::new(),
                reason: std::io::Error::last_os_error().to_string(),
            });
        }
        if result as *mut u8 != new_addr {
            return Err(StateError::Misaligned {
                key: String::new(),
                addr: new_addr as usize,
            });
        }
        self.ptr = new_addr;
        Ok(())
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.len);
            }
        }
    }
}

/// Unmap `len` bytes at `addr` without taking ownership of a [`MappedRegion`].
/// Used for callers unmapping a shared view they obtained via
/// `StateKeyValue::map_shared_memory`, not the canonical owned region.
pub fn unmap_at(addr: *mut u8, len: usize) -> Result<(), StateError> {
    if !is_page_aligned(addr as usize) {
        return Err(StateError::Misaligned {
            key: String::new(),
            addr: addr as usize,
        });
    }
    let result = unsafe { libc::munmap(addr as *mut libc::c_void, len) };
    if result == -1 {
        return Err(StateError::MapFailed {
            key: String::new(),
            reason: std::io::Error::last_os_error().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_a_power_of_two_and_cached() {
        let a = host_page_size();
        let b = host_page_size();
        assert_eq!(a, b);
        assert!(a.is_power_of_two());
    }

    #[test]
    fn round_up_rounds_to_whole_pages() {
        let page = host_page_size();
        assert_eq!(round_up_to_page(1), page);
        assert_eq!(round_up_to_page(page), page);
        assert_eq!(round_up_to_page(page + 1), page * 2);
    }

    #[test]
    fn new_region_is_zeroed_and_writable() {
        let page = host_page_size();
        let mut region = MappedRegion::new(page).unwrap();
        assert!(region.as_slice().iter().all(|&b| b == 0));
        region.as_mut_slice()[0] = 42;
        assert_eq!(region.as_slice()[0], 42);
    }

    #[test]
    fn is_page_aligned_checks_low_bits() {
        let page = host_page_size();
        assert!(is_page_aligned(0));
        assert!(is_page_aligned(page));
        assert!(!is_page_aligned(page + 1));
    }
}
