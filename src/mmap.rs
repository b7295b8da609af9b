use crate::errors::Error;
use crate::utils::usize_is_multiple_of_host_page_size;
use core::ops::Range;
use core::ptr::NonNull;
use core::{ptr, slice};
use rustix::mm::MprotectFlags;

/// A raw anonymous virtual-memory reservation.
///
/// Reservations start inaccessible; committed spans are opened with
/// [`Mmap::make_accessible`]. The mapping never moves for its lifetime, which
/// is what lets linear memories grow under concurrent readers.
#[derive(Debug)]
pub(crate) struct Mmap {
    memory: NonNull<[u8]>,
}

// SAFETY: the mapping is plain anonymous memory; synchronisation of access
// is the responsibility of the owning object.
unsafe impl Send for Mmap {}
// SAFETY: see above.
unsafe impl Sync for Mmap {}

impl Mmap {
    /// Reserves `size` bytes of address space with no access rights.
    pub fn with_reserve(size: usize) -> crate::Result<Self> {
        assert!(usize_is_multiple_of_host_page_size(size));
        // SAFETY: requesting a fresh anonymous mapping.
        let ptr = unsafe {
            rustix::mm::mmap_anonymous(
                ptr::null_mut(),
                size,
                rustix::mm::ProtFlags::empty(),
                rustix::mm::MapFlags::PRIVATE,
            )
            .map_err(|_| Error::OutOfMemory)?
        };

        // SAFETY: mmap returned a valid mapping of `size` bytes.
        let memory = unsafe { slice::from_raw_parts_mut(ptr.cast(), size) };
        Ok(Mmap {
            memory: NonNull::new(memory).expect("mmap returned null"),
        })
    }

    #[inline]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.memory.as_ptr().cast()
    }

    #[inline]
    pub fn len(&self) -> usize {
        // SAFETY: the fat-pointer metadata is valid for the mapping lifetime.
        unsafe { (&*self.memory.as_ptr()).len() }
    }

    /// Opens `range` for reads and writes.
    pub fn make_accessible(&self, range: Range<usize>) -> crate::Result<()> {
        assert!(range.start <= range.end);
        assert!(range.end <= self.len());
        assert!(usize_is_multiple_of_host_page_size(range.start));

        // SAFETY: the range lies inside our own reservation.
        unsafe {
            rustix::mm::mprotect(
                self.memory.as_ptr().cast::<u8>().add(range.start).cast(),
                range.end - range.start,
                MprotectFlags::READ | MprotectFlags::WRITE,
            )
            .map_err(|_| Error::OutOfMemory)?;
        }
        Ok(())
    }

}

impl Drop for Mmap {
    fn drop(&mut self) {
        let len = self.len();
        if len == 0 {
            return;
        }
        // SAFETY: unmapping our own reservation exactly once.
        unsafe {
            rustix::mm::munmap(self.memory.as_ptr().cast(), len).expect("munmap failed");
        }
    }
}
