use std::sync::Arc;

use address::{IAddressBase, IAlignableAddress, PhysicalAddress, VirtualAddress};
use hermit_sync::SpinMutex;
use mmu_abstractions::{GenericMappingFlags, MMUError, PageSize, PagingError, PagingResult, IMMU};

use crate::allocation::ITestFrameAllocator;

/// A page table kept as a flat list of mappings onto host-backed frames.
///
/// Reads and writes go through the recorded mappings and are checked the way
/// user-mode accesses would be: the page must be `User` and `Readable`, and
/// `Writable` for writes.
pub struct TestMMU {
    alloc: Arc<SpinMutex<dyn ITestFrameAllocator>>,
    mappings: Vec<MappingRecord>,
}

struct MappingRecord {
    phys: PhysicalAddress,
    virt: VirtualAddress,
    flags: GenericMappingFlags,
    len: usize,
}

impl TestMMU {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(alloc: Arc<SpinMutex<dyn ITestFrameAllocator>>) -> Arc<SpinMutex<dyn IMMU>> {
        Arc::new(SpinMutex::new(Self {
            alloc,
            mappings: Vec::new(),
        }))
    }

    fn query_mapping(&self, vaddr: VirtualAddress) -> Option<&MappingRecord> {
        self.mappings
            .iter()
            .find(|mapping| mapping.virt <= vaddr && vaddr < mapping.virt + mapping.len)
    }

    /// Visits the host memory behind `[vaddr, vaddr + len)` one mapping at a time.
    fn walk(
        &self,
        vaddr: VirtualAddress,
        len: usize,
        mutable: bool,
        callback: &mut dyn FnMut(*mut u8, usize, usize),
    ) -> Result<(), MMUError> {
        if vaddr.is_null() {
            return Err(MMUError::InvalidAddress);
        }

        let mut done = 0;

        while done < len {
            let current = vaddr + done;
            let mapping = self
                .query_mapping(current)
                .ok_or(MMUError::InvalidAddress)?;

            ensure_permission(current, mapping.flags, mutable)?;

            let offset = current - mapping.virt;
            let chunk = (mapping.len - offset).min(len - done);
            let target = mapping.phys + offset;

            if !self.alloc.lock().check_paddr(target, chunk) {
                return Err(MMUError::AccessFault);
            }

            callback(target.as_mut_ptr::<u8>(), done, chunk);

            done += chunk;
        }

        Ok(())
    }
}

impl IMMU for TestMMU {
    fn map_single(
        &mut self,
        vaddr: VirtualAddress,
        target: PhysicalAddress,
        size: PageSize,
        flags: GenericMappingFlags,
    ) -> PagingResult<()> {
        ensure_page_aligned(vaddr)?;
        ensure_page_aligned(target)?;

        if self.query_mapping(vaddr).is_some() {
            return Err(PagingError::AlreadyMapped);
        }

        log::trace!("TestMMU: map {vaddr} -> {target} ({flags:?})");

        self.mappings.push(MappingRecord {
            phys: target,
            virt: vaddr,
            flags,
            len: size.as_usize(),
        });

        Ok(())
    }

    fn remap_single(
        &mut self,
        vaddr: VirtualAddress,
        new_target: PhysicalAddress,
        flags: GenericMappingFlags,
    ) -> PagingResult<PageSize> {
        ensure_page_aligned(vaddr)?;
        ensure_page_aligned(new_target)?;

        let mapping = self
            .mappings
            .iter_mut()
            .find(|mapping| mapping.virt == vaddr)
            .ok_or(PagingError::NotMapped)?;

        mapping.phys = new_target;
        mapping.flags = flags;

        Ok(PageSize::from(mapping.len))
    }

    fn unmap_single(&mut self, vaddr: VirtualAddress) -> PagingResult<(PhysicalAddress, PageSize)> {
        let idx = self
            .mappings
            .iter()
            .position(|mapping| mapping.virt == vaddr)
            .ok_or(PagingError::NotMapped)?;

        let mapping = self.mappings.swap_remove(idx);

        Ok((mapping.phys, PageSize::from(mapping.len)))
    }

    fn query_virtual(
        &self,
        vaddr: VirtualAddress,
    ) -> PagingResult<(PhysicalAddress, GenericMappingFlags, PageSize)> {
        let mapping = self.query_mapping(vaddr).ok_or(PagingError::NotMapped)?;
        let offset = vaddr - mapping.virt;

        Ok((
            mapping.phys + offset,
            mapping.flags,
            PageSize::from(mapping.len),
        ))
    }

    fn read_bytes(&self, vaddr: VirtualAddress, buf: &mut [u8]) -> Result<(), MMUError> {
        self.walk(vaddr, buf.len(), false, &mut |src, offset, len| unsafe {
            std::ptr::copy_nonoverlapping(src, buf[offset..].as_mut_ptr(), len)
        })
    }

    fn write_bytes(&self, vaddr: VirtualAddress, buf: &[u8]) -> Result<(), MMUError> {
        self.walk(vaddr, buf.len(), true, &mut |dst, offset, len| unsafe {
            std::ptr::copy_nonoverlapping(buf[offset..].as_ptr(), dst, len)
        })
    }
}

fn ensure_page_aligned<T: IAlignableAddress>(addr: T) -> PagingResult<()> {
    if !addr.is_page_aligned() {
        return Err(PagingError::NotAligned);
    }

    Ok(())
}

fn ensure_permission(
    vaddr: VirtualAddress,
    flags: GenericMappingFlags,
    mutable: bool,
) -> Result<(), MMUError> {
    if !flags.contains(GenericMappingFlags::User) {
        return Err(MMUError::PrivilegeError);
    }

    if !flags.contains(GenericMappingFlags::Readable) {
        return Err(MMUError::PageNotReadable { vaddr });
    }

    if mutable && !flags.contains(GenericMappingFlags::Writable) {
        return Err(MMUError::PageNotWritable { vaddr });
    }

    Ok(())
}
