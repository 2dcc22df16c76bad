/*!
 * Backing Stores and Mappings
 *
 * An area's memory lives in an anonymous shared-memory file (`memfd`).
 * Every clone maps the same file with `MAP_SHARED`, so a store written
 * through one mapping is visible through all of them without a flush.
 */

use super::types::Protection;
use crate::core::errors::{KernelResult, Status};
use crate::core::limits::FALLBACK_PAGE_SIZE;
use crate::core::types::{Address, Size};
use nix::libc::{c_void, off_t};
#[cfg(test)]
use nix::fcntl::{fcntl, FcntlArg, SealFlag};
use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
use nix::sys::mman::{mmap, mprotect, munmap, MapFlags, ProtFlags};
use nix::unistd::{ftruncate, sysconf, SysconfVar};
use parking_lot::Mutex;
use std::ffi::CString;
use std::num::NonZeroUsize;
use std::os::fd::{AsFd, OwnedFd};
#[cfg(test)]
use std::os::fd::AsRawFd;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Host page size
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => size as usize,
        _ => FALLBACK_PAGE_SIZE,
    })
}

/// Round `size` up to a whole number of pages; `None` on overflow
pub fn round_to_pages(size: Size) -> Option<Size> {
    let page = page_size();
    size.checked_add(page - 1).map(|s| s / page * page)
}

fn prot_flags(protection: Protection) -> ProtFlags {
    let mut flags = ProtFlags::PROT_NONE;
    if protection.contains(Protection::READ) {
        flags |= ProtFlags::PROT_READ;
    }
    if protection.contains(Protection::WRITE) {
        flags |= ProtFlags::PROT_WRITE;
    }
    if protection.contains(Protection::EXEC) {
        flags |= ProtFlags::PROT_EXEC;
    }
    flags
}

/// Shared-memory file backing one or more areas
pub(crate) struct BackingStore {
    fd: OwnedFd,
    size: AtomicUsize,
    /// Serializes resizes of every area sharing this store
    resize: Mutex<()>,
}

impl BackingStore {
    pub fn create(name: &str, size: Size) -> KernelResult<Self> {
        let label = CString::new(format!("nexus-area:{}", name.replace('\0', "")))
            .map_err(|_| Status::BadValue)?;
        let fd = memfd_create(
            label.as_c_str(),
            MemFdCreateFlag::MFD_CLOEXEC | MemFdCreateFlag::MFD_ALLOW_SEALING,
        ).map_err(|errno| {
            warn!(%errno, "memfd_create failed");
            Status::NoMemory
        })?;
        let store = Self {
            fd,
            size: AtomicUsize::new(0),
            resize: Mutex::new(()),
        };
        store.truncate(size)?;
        Ok(store)
    }

    #[inline]
    pub fn size(&self) -> Size {
        self.size.load(Ordering::Acquire)
    }

    pub fn resize_lock(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.resize.lock()
    }

    pub fn truncate(&self, size: Size) -> KernelResult<()> {
        let len = off_t::try_from(size).map_err(|_| Status::NoMemory)?;
        ftruncate(self.fd.as_fd(), len).map_err(|errno| {
            warn!(%errno, size, "ftruncate of backing store failed");
            Status::NoMemory
        })?;
        self.size.store(size, Ordering::Release);
        Ok(())
    }

    /// Shrink to `size`; returns whether the file itself shrank
    ///
    /// The logical size follows either way. Bytes the host kept past it
    /// are unreachable through any mapping.
    pub fn shrink(&self, size: Size) -> bool {
        let shrunk = self.truncate(size).is_ok();
        if !shrunk {
            self.size.store(size, Ordering::Release);
        }
        shrunk
    }

    #[cfg(test)]
    pub fn forbid_shrink(&self) -> KernelResult<()> {
        fcntl(self.fd.as_raw_fd(), FcntlArg::F_ADD_SEALS(SealFlag::F_SEAL_SHRINK))
            .map(|_| ())
            .map_err(|_| Status::NotAllowed)
    }

    /// Map `len` bytes of the store, preferring `hint` when given
    ///
    /// With `exact`, a mapping that did not land on `hint` is released and
    /// the call fails with `NoMemory`.
    pub fn map(
        &self,
        hint: Option<Address>,
        exact: bool,
        len: Size,
        protection: Protection,
    ) -> KernelResult<Mapping> {
        let length = NonZeroUsize::new(len).ok_or(Status::BadValue)?;
        let addr = hint.and_then(NonZeroUsize::new);

        // SAFETY: no MAP_FIXED, so the host never replaces an existing
        // mapping; the file outlives the mapping through the entry's Arc.
        let ptr = unsafe {
            mmap(
                addr,
                length,
                prot_flags(protection),
                MapFlags::MAP_SHARED,
                self.fd.as_fd(),
                0,
            )
        }
        .map_err(|errno| {
            warn!(%errno, len, "mmap of backing store failed");
            Status::NoMemory
        })?;

        let mapping = Mapping { ptr, len };
        if exact && hint != Some(mapping.address()) {
            debug!(
                wanted = ?hint,
                got = mapping.address(),
                "exact address unavailable"
            );
            return Err(Status::NoMemory);
        }
        Ok(mapping)
    }
}

/// One live mapping; unmapped on drop
pub(crate) struct Mapping {
    ptr: NonNull<c_void>,
    len: Size,
}

// SAFETY: the mapping is plain shared memory; all access goes through the
// owning table slot's lock.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    #[inline]
    pub fn address(&self) -> Address {
        self.ptr.as_ptr() as Address
    }

    #[inline]
    pub fn len(&self) -> Size {
        self.len
    }

    pub fn protect(&self, protection: Protection) -> KernelResult<()> {
        // SAFETY: the range is exactly the one this mapping owns.
        unsafe { mprotect(self.ptr, self.len, prot_flags(protection)) }.map_err(|errno| {
            warn!(%errno, "mprotect failed");
            Status::NoMemory
        })
    }

    /// Copy out of the mapping; the caller has checked bounds and protection
    pub fn read(&self, offset: usize, buf: &mut [u8]) {
        debug_assert!(offset + buf.len() <= self.len);
        // SAFETY: bounds checked by the caller against `len`.
        unsafe {
            let src = (self.ptr.as_ptr() as *const u8).add(offset);
            std::ptr::copy_nonoverlapping(src, buf.as_mut_ptr(), buf.len());
        }
    }

    /// Copy into the mapping; the caller has checked bounds and protection
    pub fn write(&self, offset: usize, data: &[u8]) {
        debug_assert!(offset + data.len() <= self.len);
        // SAFETY: bounds checked by the caller against `len`.
        unsafe {
            let dst = (self.ptr.as_ptr() as *mut u8).add(offset);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe a mapping this value created and owns.
        if let Err(errno) = unsafe { munmap(self.ptr, self.len) } {
            warn!(%errno, address = self.address(), "munmap failed");
        }
    }
}
