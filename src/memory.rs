use crate::compartment::{Compartment, Stored};
use crate::errors::Error;
use crate::mmap::Mmap;
use crate::parking::ParkingSpot;
use crate::trap::{Trap, TrapKind};
use crate::types::MemoryType;
use crate::utils::round_usize_up_to_host_pages;
use crate::{DEFAULT_OFFSET_GUARD_SIZE, WASM_PAGE_SIZE};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

// One reservation per memory: the whole 32-bit-addressable span (clamped by
// the declared maximum) plus a guard region, so the base address never moves
// when the memory grows. Growth only commits pages.
fn reserve(ty: &MemoryType) -> crate::Result<(Mmap, usize, usize)> {
    let min_bytes = ty
        .minimum_byte_size()
        .and_then(|bytes| usize::try_from(bytes).ok())
        .ok_or(Error::OutOfMemory)?;
    let maximum = usize::try_from(ty.maximum_byte_size()).map_err(|_| Error::OutOfMemory)?;

    let guard = round_usize_up_to_host_pages(
        usize::try_from(DEFAULT_OFFSET_GUARD_SIZE).unwrap_or(usize::MAX / 2),
    );
    let reserve_bytes = round_usize_up_to_host_pages(maximum)
        .checked_add(guard)
        .ok_or(Error::OutOfMemory)?;

    let mmap = Mmap::with_reserve(reserve_bytes)?;
    if min_bytes > 0 {
        mmap.make_accessible(0..round_usize_up_to_host_pages(min_bytes))?;
    }
    Ok((mmap, min_bytes, maximum))
}

#[derive(Debug)]
struct OwnedMemory {
    mmap: Mmap,
    len: usize,
    maximum: usize,
}

#[derive(Debug)]
pub(crate) struct SharedMemoryInner {
    ty: MemoryType,
    mmap: Mmap,
    len: AtomicUsize,
    maximum: usize,
    grow_lock: Mutex<()>,
    parking: ParkingSpot,
}

/// A linear memory shareable across threads (and compartments).
///
/// The full maximum is reserved up front and growth only commits pages, so
/// concurrent readers never observe the base address move.
#[derive(Debug, Clone)]
pub struct SharedMemory(Arc<SharedMemoryInner>);

impl SharedMemory {
    pub fn new(ty: MemoryType) -> crate::Result<Self> {
        if !ty.shared {
            return Err(Error::validation("memory type is not shared"));
        }
        if !ty.limits.is_bounded() {
            return Err(Error::validation("shared memories must be bounded"));
        }
        let (mmap, len, maximum) = reserve(&ty)?;
        Ok(Self(Arc::new(SharedMemoryInner {
            ty,
            mmap,
            len: AtomicUsize::new(len),
            maximum,
            grow_lock: Mutex::new(()),
            parking: ParkingSpot::default(),
        })))
    }

    pub fn ty(&self) -> MemoryType {
        self.0.ty
    }

    /// Current size in pages.
    pub fn size(&self) -> u64 {
        (self.0.len.load(Ordering::SeqCst) / WASM_PAGE_SIZE as usize) as u64
    }

    pub fn grow(&self, delta_pages: u64) -> Option<u64> {
        let _guard = self.0.grow_lock.lock().unwrap();
        let old_len = self.0.len.load(Ordering::SeqCst);
        let new_len = delta_pages
            .checked_mul(u64::from(WASM_PAGE_SIZE))
            .and_then(|delta| u64::try_from(old_len).ok()?.checked_add(delta))?;
        let new_len = usize::try_from(new_len).ok()?;
        if new_len > self.0.maximum {
            return None;
        }
        let start = round_usize_up_to_host_pages(old_len);
        let end = round_usize_up_to_host_pages(new_len);
        if start < end {
            self.0.mmap.make_accessible(start..end).ok()?;
        }
        self.0.len.store(new_len, Ordering::SeqCst);
        Some((old_len / WASM_PAGE_SIZE as usize) as u64)
    }

    pub(crate) fn parking(&self) -> &ParkingSpot {
        &self.0.parking
    }

    fn base_ptr(&self) -> *mut u8 {
        self.0.mmap.as_mut_ptr()
    }

    fn byte_size(&self) -> usize {
        self.0.len.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
enum MemoryStorage {
    Owned(OwnedMemory),
    Shared(SharedMemory),
}

/// The storage of one linear memory inside a compartment: either owned by
/// this compartment alone or a handle onto a [`SharedMemory`].
#[derive(Debug)]
pub(crate) struct MemoryData {
    ty: MemoryType,
    storage: MemoryStorage,
}

impl MemoryData {
    pub fn new(ty: MemoryType) -> crate::Result<Self> {
        if ty.shared {
            return Ok(Self::from_shared(SharedMemory::new(ty)?));
        }
        let (mmap, len, maximum) = reserve(&ty)?;
        Ok(Self {
            ty,
            storage: MemoryStorage::Owned(OwnedMemory { mmap, len, maximum }),
        })
    }

    pub fn from_shared(shared: SharedMemory) -> Self {
        Self {
            ty: shared.ty(),
            storage: MemoryStorage::Shared(shared),
        }
    }

    pub fn ty(&self) -> MemoryType {
        self.ty
    }

    pub fn byte_size(&self) -> usize {
        match &self.storage {
            MemoryStorage::Owned(owned) => owned.len,
            MemoryStorage::Shared(shared) => shared.byte_size(),
        }
    }

    pub fn size_pages(&self) -> u64 {
        (self.byte_size() / WASM_PAGE_SIZE as usize) as u64
    }

    pub fn base_ptr(&self) -> *mut u8 {
        match &self.storage {
            MemoryStorage::Owned(owned) => owned.mmap.as_mut_ptr(),
            MemoryStorage::Shared(shared) => shared.base_ptr(),
        }
    }

    pub fn shared(&self) -> Option<&SharedMemory> {
        match &self.storage {
            MemoryStorage::Owned(_) => None,
            MemoryStorage::Shared(shared) => Some(shared),
        }
    }

    /// Grows by `delta_pages`, returning the old page count, or `None` when
    /// the maximum (or the reservation) would be exceeded.
    pub fn grow_pages(&mut self, delta_pages: u64) -> Option<u64> {
        match &mut self.storage {
            MemoryStorage::Owned(owned) => {
                let new_len = delta_pages
                    .checked_mul(u64::from(WASM_PAGE_SIZE))
                    .and_then(|delta| u64::try_from(owned.len).ok()?.checked_add(delta))?;
                let new_len = usize::try_from(new_len).ok()?;
                if new_len > owned.maximum {
                    return None;
                }
                let start = round_usize_up_to_host_pages(owned.len);
                let end = round_usize_up_to_host_pages(new_len);
                if start < end {
                    owned.mmap.make_accessible(start..end).ok()?;
                }
                let old = owned.len / WASM_PAGE_SIZE as usize;
                owned.len = new_len;
                Some(old as u64)
            }
            MemoryStorage::Shared(shared) => shared.grow(delta_pages),
        }
    }

    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> bool {
        let Some(end) = offset.checked_add(bytes.len()) else {
            return false;
        };
        if end > self.byte_size() {
            return false;
        }
        // SAFETY: the span was just bounds-checked against the committed
        // length and we hold exclusive access to the compartment.
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), self.base_ptr().add(offset), bytes.len());
        }
        true
    }

    pub fn read(&self, offset: usize, buf: &mut [u8]) -> bool {
        let Some(end) = offset.checked_add(buf.len()) else {
            return false;
        };
        if end > self.byte_size() {
            return false;
        }
        // SAFETY: bounds-checked above.
        unsafe {
            core::ptr::copy_nonoverlapping(self.base_ptr().add(offset), buf.as_mut_ptr(), buf.len());
        }
        true
    }
}

/// A linear memory owned by a [`Compartment`].
#[derive(Debug, Clone, Copy)]
pub struct Memory(pub(crate) Stored<MemoryData>);

impl Memory {
    pub fn new(compartment: &mut Compartment, ty: MemoryType) -> crate::Result<Memory> {
        Ok(Memory(compartment.push_memory(MemoryData::new(ty)?)))
    }

    /// Binds an existing [`SharedMemory`] into this compartment so it can be
    /// used to satisfy imports.
    pub fn from_shared(compartment: &mut Compartment, shared: SharedMemory) -> Memory {
        Memory(compartment.push_memory(MemoryData::from_shared(shared)))
    }

    pub fn ty(&self, compartment: &Compartment) -> MemoryType {
        compartment[self.0].ty()
    }

    /// Current size in pages.
    pub fn size(&self, compartment: &Compartment) -> u64 {
        compartment[self.0].size_pages()
    }

    pub fn grow(&self, compartment: &mut Compartment, delta_pages: u64) -> crate::Result<u64> {
        compartment[self.0]
            .grow_pages(delta_pages)
            .ok_or(Error::OutOfMemory)
    }

    pub fn read(&self, compartment: &Compartment, offset: usize, buf: &mut [u8]) -> crate::Result<()> {
        if compartment[self.0].read(offset, buf) {
            Ok(())
        } else {
            Err(Error::Trap(Trap::new(
                TrapKind::AccessViolation,
                "out of bounds memory read",
            )))
        }
    }

    pub fn write(&self, compartment: &mut Compartment, offset: usize, bytes: &[u8]) -> crate::Result<()> {
        if compartment[self.0].write(offset, bytes) {
            Ok(())
        } else {
            Err(Error::Trap(Trap::new(
                TrapKind::AccessViolation,
                "out of bounds memory write",
            )))
        }
    }
}
