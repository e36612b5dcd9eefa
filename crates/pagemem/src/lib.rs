//! Page-protected memory regions.
//!
//! A [`ProtectedRegion`] is a page-aligned, zero-initialized block of 16-bit words that is mapped
//! read-only. Writing requires an [`Unprotected`] guard, which restores the read-only protection
//! when dropped.
use easyerr::{Error, ResultExt};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

#[cfg(target_family = "unix")]
use rustix::mm::{self as mman, MapFlags, MprotectFlags, ProtFlags};
#[cfg(target_family = "windows")]
use windows::Win32::System::Memory;

const PAGE_LEN: usize = 1 << 12;

#[derive(Debug, Error)]
pub enum RegionError {
    #[error("region must contain at least one word")]
    Empty,
    #[error(transparent)]
    Map { source: std::io::Error },
    #[error(transparent)]
    Protect { source: std::io::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protection {
    Read,
    ReadWrite,
}

/// A memory mapped block of pages.
struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl Mapping {
    fn new(len: usize) -> Result<Self, RegionError> {
        #[cfg(target_family = "unix")]
        let ptr = unsafe {
            mman::mmap_anonymous(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::PRIVATE,
            )
        }
        .map_err(std::io::Error::from)
        .context(RegionCtx::Map)?;

        #[cfg(target_family = "windows")]
        let ptr = unsafe {
            Memory::VirtualAlloc(
                None,
                len,
                Memory::MEM_RESERVE | Memory::MEM_COMMIT,
                Memory::PAGE_READWRITE,
            )
        };

        let Some(ptr) = NonNull::new(ptr.cast::<u8>()) else {
            return Err(std::io::Error::last_os_error()).context(RegionCtx::Map);
        };

        Ok(Self { ptr, len })
    }

    fn protect(&self, protection: Protection) -> Result<(), RegionError> {
        #[cfg(target_family = "unix")]
        unsafe {
            let flags = match protection {
                Protection::Read => MprotectFlags::READ,
                Protection::ReadWrite => MprotectFlags::READ | MprotectFlags::WRITE,
            };

            mman::mprotect(self.ptr.as_ptr().cast(), self.len, flags)
                .map_err(std::io::Error::from)
                .context(RegionCtx::Protect)
        }

        #[cfg(target_family = "windows")]
        unsafe {
            let mut previous = Memory::PAGE_PROTECTION_FLAGS(0);
            let flags = match protection {
                Protection::Read => Memory::PAGE_READONLY,
                Protection::ReadWrite => Memory::PAGE_READWRITE,
            };

            Memory::VirtualProtect(self.ptr.as_ptr().cast(), self.len, flags, &raw mut previous)
                .map_err(std::io::Error::from)
                .context(RegionCtx::Protect)
        }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        #[cfg(target_family = "unix")]
        let result = unsafe { mman::munmap(self.ptr.as_ptr().cast(), self.len) }
            .map_err(std::io::Error::from);

        #[cfg(target_family = "windows")]
        let result = unsafe {
            Memory::VirtualFree(self.ptr.as_ptr().cast(), 0, Memory::MEM_RELEASE)
                .map_err(std::io::Error::from)
        };

        if let Err(e) = result {
            tracing::error!("failed to unmap region of {} bytes: {e}", self.len);
        }
    }
}

/// A read-only region of 16-bit words.
pub struct ProtectedRegion {
    mapping: Mapping,
    words: usize,
}

// SAFETY: the mapping is uniquely owned and changing the protection can be done from any thread
unsafe impl Send for ProtectedRegion {}

impl ProtectedRegion {
    /// Maps a zeroed region able to hold `words` words and protects it.
    pub fn new(words: usize) -> Result<Self, RegionError> {
        if words == 0 {
            return Err(RegionError::Empty);
        }

        let len = (words * size_of::<u16>()).next_multiple_of(PAGE_LEN);
        let mapping = Mapping::new(len)?;
        mapping.protect(Protection::Read)?;

        Ok(Self { mapping, words })
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.words
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[u16] {
        // SAFETY: the mapping is at least `words * 2` bytes long, page aligned and always readable
        unsafe { std::slice::from_raw_parts(self.mapping.ptr.as_ptr().cast(), self.words) }
    }

    /// Makes the region writable until the returned guard is dropped.
    pub fn unprotect(&mut self) -> Result<Unprotected<'_>, RegionError> {
        self.mapping.protect(Protection::ReadWrite)?;
        Ok(Unprotected { region: self })
    }
}

impl std::fmt::Debug for ProtectedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectedRegion")
            .field("words", &self.words)
            .field("bytes", &self.mapping.len)
            .finish()
    }
}

/// Write access to a [`ProtectedRegion`]. Protection is restored on drop.
pub struct Unprotected<'a> {
    region: &'a mut ProtectedRegion,
}

impl Deref for Unprotected<'_> {
    type Target = [u16];

    fn deref(&self) -> &Self::Target {
        self.region.as_slice()
    }
}

impl DerefMut for Unprotected<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: the guard holds the only reference to the region and the pages are writable
        // while it is alive
        unsafe {
            std::slice::from_raw_parts_mut(
                self.region.mapping.ptr.as_ptr().cast(),
                self.region.words,
            )
        }
    }
}

impl Drop for Unprotected<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.region.mapping.protect(Protection::Read) {
            tracing::error!("failed to reprotect region: {e}");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn starts_zeroed() {
        let region = ProtectedRegion::new(0x1000).unwrap();
        assert_eq!(region.len(), 0x1000);
        assert!(region.as_slice().iter().all(|w| *w == 0));
    }

    #[test]
    fn writes_through_guard() {
        let mut region = ProtectedRegion::new(0x1000).unwrap();

        {
            let mut guard = region.unprotect().unwrap();
            guard[0] = 0x0021;
            guard[0xFFF] = 0xBEEF;
        }

        assert_eq!(region.as_slice()[0], 0x0021);
        assert_eq!(region.as_slice()[0xFFF], 0xBEEF);
    }

    #[test]
    fn guard_reprotects_on_early_exit() {
        fn fill(region: &mut ProtectedRegion, fail_at: usize) -> Result<(), usize> {
            let mut guard = region.unprotect().unwrap();
            for (i, word) in guard.iter_mut().enumerate() {
                if i == fail_at {
                    return Err(i);
                }

                *word = i as u16;
            }

            Ok(())
        }

        let mut region = ProtectedRegion::new(16).unwrap();
        assert_eq!(fill(&mut region, 4), Err(4));
        assert_eq!(&region.as_slice()[..5], &[0, 1, 2, 3, 0]);

        // a second guard can be taken once the first one is gone
        assert!(fill(&mut region, usize::MAX).is_ok());
        assert_eq!(region.as_slice()[15], 15);
    }

    #[test]
    fn empty_region_is_rejected() {
        assert!(matches!(ProtectedRegion::new(0), Err(RegionError::Empty)));
    }
}
