use address::{IAddressBase, IAlignableAddress, VirtualAddress};
use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};
use allocation_abstractions::{FrameDesc, IFrameAllocator};
use hermit_sync::SpinMutex;
use mmu_abstractions::{GenericMappingFlags, PageSize, IMMU};

use crate::LoadError;

/// Provides the destination memory for loadable segments.
///
/// Memory handed out by `reserve` must read as zero until written; the loader only
/// copies the file-backed part of each segment and relies on this for the rest.
pub trait ISegmentMemory {
    fn reserve(
        &mut self,
        vaddr: VirtualAddress,
        len: usize,
        flags: GenericMappingFlags,
    ) -> Result<(), LoadError>;

    fn write(&mut self, vaddr: VirtualAddress, data: &[u8]) -> Result<(), LoadError>;

    /// Called once after every segment has been written.
    fn seal(&mut self) -> Result<(), LoadError> {
        Ok(())
    }
}

/// Bare mode: every segment lives at its own virtual address.
pub struct IdentitySegmentMemory {
    _private: (),
}

impl IdentitySegmentMemory {
    /// # Safety
    ///
    /// Every range the loader reserves through this hook is written directly.
    /// The caller must ensure the image's segments target memory that is owned by
    /// the process being loaded and not otherwise in use.
    pub unsafe fn new() -> Self {
        IdentitySegmentMemory { _private: () }
    }
}

impl ISegmentMemory for IdentitySegmentMemory {
    fn reserve(
        &mut self,
        vaddr: VirtualAddress,
        len: usize,
        _flags: GenericMappingFlags,
    ) -> Result<(), LoadError> {
        // SAFETY: guaranteed by the contract of `IdentitySegmentMemory::new`.
        unsafe { core::ptr::write_bytes(vaddr.as_mut_ptr::<u8>(), 0, len) };

        Ok(())
    }

    fn write(&mut self, vaddr: VirtualAddress, data: &[u8]) -> Result<(), LoadError> {
        // SAFETY: guaranteed by the contract of `IdentitySegmentMemory::new`.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), vaddr.as_mut_ptr::<u8>(), data.len())
        };

        Ok(())
    }
}

struct SegmentPage {
    frame: FrameDesc,
    flags: GenericMappingFlags,
}

/// Backs segments with freshly allocated frames mapped into a user page table.
///
/// Pages stay writable while the image is copied in; `seal` drops them to the
/// permissions the segments asked for. A page shared by two segments gets the union.
pub struct MappedSegmentMemory {
    mmu: Arc<SpinMutex<dyn IMMU>>,
    alloc: Arc<SpinMutex<dyn IFrameAllocator>>,
    pages: BTreeMap<VirtualAddress, SegmentPage>,
}

impl MappedSegmentMemory {
    pub fn new(mmu: Arc<SpinMutex<dyn IMMU>>, alloc: Arc<SpinMutex<dyn IFrameAllocator>>) -> Self {
        MappedSegmentMemory {
            mmu,
            alloc,
            pages: BTreeMap::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Hands the mapped frames over to the address space that now owns them.
    pub fn into_frames(mut self) -> Vec<(VirtualAddress, FrameDesc)> {
        core::mem::take(&mut self.pages)
            .into_iter()
            .map(|(vaddr, page)| (vaddr, page.frame))
            .collect()
    }

    fn loading_flags(flags: GenericMappingFlags) -> GenericMappingFlags {
        flags
            | GenericMappingFlags::User
            | GenericMappingFlags::Readable
            | GenericMappingFlags::Writable
    }
}

impl ISegmentMemory for MappedSegmentMemory {
    fn reserve(
        &mut self,
        vaddr: VirtualAddress,
        len: usize,
        flags: GenericMappingFlags,
    ) -> Result<(), LoadError> {
        if len == 0 {
            return Ok(());
        }

        let start = vaddr.page_down();
        let end = vaddr
            .checked_add(len)
            .and_then(|end| end.checked_page_up())
            .ok_or_else(|| {
                log::error!("Segment at {vaddr} with {len:#x} bytes reaches past the last mappable page");
                LoadError::AddressOverflow
            })?;

        let mut page = start;
        while page < end {
            if let Some(existing) = self.pages.get_mut(&page) {
                existing.flags |= flags;
            } else {
                let frame = self
                    .alloc
                    .lock()
                    .alloc_frame()
                    .ok_or(LoadError::InsufficientMemory)?;

                let mapped = self.mmu.lock().map_single(
                    page,
                    frame.0,
                    PageSize::_4K,
                    Self::loading_flags(flags),
                );

                if let Err(e) = mapped {
                    log::error!("Failed to map segment page {page}: {e:?}");
                    self.alloc.lock().dealloc(frame);
                    return Err(LoadError::FailedToLoad);
                }

                log::trace!("Mapped segment page {page} -> {}", frame.0);

                self.pages.insert(page, SegmentPage { frame, flags });
            }

            page += constants::PAGE_SIZE;
        }

        Ok(())
    }

    fn write(&mut self, vaddr: VirtualAddress, data: &[u8]) -> Result<(), LoadError> {
        self.mmu.lock().write_bytes(vaddr, data).map_err(|e| {
            log::error!("Failed to write segment data at {vaddr}: {e:?}");
            LoadError::FailedToLoad
        })
    }

    fn seal(&mut self) -> Result<(), LoadError> {
        let mut mmu = self.mmu.lock();

        for (vaddr, page) in self.pages.iter() {
            mmu.remap_single(*vaddr, page.frame.0, page.flags | GenericMappingFlags::User)
                .map_err(|_| LoadError::FailedToLoad)?;
        }

        Ok(())
    }
}

impl Drop for MappedSegmentMemory {
    fn drop(&mut self) {
        // Only reached with pages left when loading failed halfway
        for (vaddr, page) in core::mem::take(&mut self.pages) {
            if let Err(e) = self.mmu.lock().unmap_single(vaddr) {
                log::warn!("Failed to unmap segment page {vaddr}: {e:?}");
            }

            self.alloc.lock().dealloc(page.frame);
        }
    }
}
