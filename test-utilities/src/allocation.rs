use std::{alloc::Layout, collections::BTreeMap, ptr::NonNull, sync::Arc};

use abstractions::IUsizeAlias;
use address::PhysicalAddress;
use allocation_abstractions::{FrameDesc, IFrameAllocator};
use hermit_sync::SpinMutex;
use mmu_abstractions::IMMU;

use crate::memory::TestMMU;

pub trait ITestFrameAllocator: IFrameAllocator {
    /// Whether `[paddr, paddr + len)` lies inside one frame handed out by this allocator.
    fn check_paddr(&self, paddr: PhysicalAddress, len: usize) -> bool;
}

/// Hands out zeroed, page-aligned host allocations as physical frames.
pub struct TestFrameAllocator {
    records: BTreeMap<PhysicalAddress, HostPage>,
    limit: Option<usize>,
}

impl TestFrameAllocator {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Arc<SpinMutex<TestFrameAllocator>> {
        Arc::new(SpinMutex::new(TestFrameAllocator {
            records: BTreeMap::new(),
            limit: None,
        }))
    }

    /// An allocator that runs dry after `frames` live frames.
    pub fn with_limit(frames: usize) -> Arc<SpinMutex<TestFrameAllocator>> {
        Arc::new(SpinMutex::new(TestFrameAllocator {
            records: BTreeMap::new(),
            limit: Some(frames),
        }))
    }

    pub fn new_with_mmu() -> (
        Arc<SpinMutex<dyn IFrameAllocator>>,
        Arc<SpinMutex<dyn IMMU>>,
    ) {
        let alloc = TestFrameAllocator::new();

        (alloc.clone(), TestMMU::new(alloc))
    }

    /// Frames currently allocated and not yet returned.
    pub fn in_use(&self) -> usize {
        self.records.len()
    }
}

impl ITestFrameAllocator for TestFrameAllocator {
    fn check_paddr(&self, paddr: PhysicalAddress, len: usize) -> bool {
        match self.records.range(..=paddr).next_back() {
            Some((start, _)) => {
                let offset = paddr.as_usize() - start.as_usize();
                offset + len <= constants::PAGE_SIZE
            }
            None => false,
        }
    }
}

impl IFrameAllocator for TestFrameAllocator {
    fn alloc_frame(&mut self) -> Option<FrameDesc> {
        if self.limit.is_some_and(|limit| self.records.len() >= limit) {
            return None;
        }

        let page = HostPage::alloc()?;
        let pa = page.paddr();

        self.records.insert(pa, page);

        Some(unsafe { FrameDesc::new(pa) })
    }

    fn dealloc(&mut self, frame: FrameDesc) {
        let removed = self.records.remove(&frame.0);
        assert!(removed.is_some(), "{} was not allocated here", frame.0);

        core::mem::forget(frame);
    }
}

struct HostPage {
    ptr: NonNull<u8>,
}

impl HostPage {
    const LAYOUT: Layout =
        unsafe { Layout::from_size_align_unchecked(constants::PAGE_SIZE, constants::PAGE_SIZE) };

    fn alloc() -> Option<Self> {
        let ptr = unsafe { std::alloc::alloc_zeroed(Self::LAYOUT) };

        NonNull::new(ptr).map(|ptr| HostPage { ptr })
    }

    fn paddr(&self) -> PhysicalAddress {
        PhysicalAddress::from_usize(self.ptr.as_ptr() as usize)
    }
}

impl Drop for HostPage {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.ptr.as_ptr(), Self::LAYOUT) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_are_zeroed_and_aligned() {
        let alloc = TestFrameAllocator::new();
        let frame = alloc.lock().alloc_frame().unwrap();

        assert_eq!(frame.0.as_usize() % constants::PAGE_SIZE, 0);

        let bytes = unsafe {
            std::slice::from_raw_parts(frame.0.as_usize() as *const u8, constants::PAGE_SIZE)
        };
        assert!(bytes.iter().all(|b| *b == 0));

        assert!(alloc.lock().check_paddr(frame.0 + 8, 16));
        assert!(!alloc.lock().check_paddr(frame.0 + 8, constants::PAGE_SIZE));

        alloc.lock().dealloc(frame);
        assert_eq!(alloc.lock().in_use(), 0);
    }

    #[test]
    fn test_limit() {
        let alloc = TestFrameAllocator::with_limit(1);

        let frame = alloc.lock().alloc_frame().unwrap();
        assert!(alloc.lock().alloc_frame().is_none());

        alloc.lock().dealloc(frame);
        let frame = alloc.lock().alloc_frame().unwrap();
        alloc.lock().dealloc(frame);
    }
}
