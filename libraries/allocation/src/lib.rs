#![cfg_attr(not(any(test, feature = "std")), no_std)]

use address::{IAlignableAddress, PhysicalAddress};
use alloc::vec::Vec;
use allocation_abstractions::{FrameDesc, IFrameAllocator};

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

/// Hands out the pages of `[bottom, top)` one at a time.
///
/// Freed pages go to a sorted recycle list that collapses back into the bump
/// pointer whenever the highest recycled page sits right below it.
pub struct FrameAllocator {
    top: PhysicalAddress,
    bottom: PhysicalAddress,
    // everything in [bottom, current) has been handed out at least once
    current: PhysicalAddress,
    recycled: Vec<PhysicalAddress>,
}

impl FrameAllocator {
    pub fn new(bottom: PhysicalAddress, top: PhysicalAddress) -> Self {
        let bottom = bottom.page_up();
        let top = top.page_down();

        debug_assert!(bottom <= top);

        FrameAllocator {
            top,
            bottom,
            current: bottom,
            recycled: Vec::new(),
        }
    }

    pub fn top(&self) -> PhysicalAddress {
        self.top
    }

    pub fn bottom(&self) -> PhysicalAddress {
        self.bottom
    }

    pub fn available(&self) -> usize {
        self.recycled.len() + (self.top - self.current) / constants::PAGE_SIZE
    }
}

impl IFrameAllocator for FrameAllocator {
    fn alloc_frame(&mut self) -> Option<FrameDesc> {
        match self.recycled.pop() {
            Some(pa) => Some(unsafe { FrameDesc::new(pa) }),
            None => match self.current {
                pa if pa < self.top => {
                    self.current = pa + constants::PAGE_SIZE;
                    Some(unsafe { FrameDesc::new(pa) })
                }
                _ => {
                    log::warn!("Physical frames exhausted: {}..{}", self.bottom, self.top);
                    None
                }
            },
        }
    }

    fn alloc_frames(&mut self, count: usize) -> Option<Vec<FrameDesc>> {
        // Refuse up front so a partial allocation never has to be rolled back
        if count > self.available() {
            return None;
        }

        let mut frames = Vec::with_capacity(count);

        for _ in 0..count {
            frames.push(self.alloc_frame()?);
        }

        Some(frames)
    }

    fn dealloc(&mut self, frame: FrameDesc) {
        debug_assert!(frame.0 >= self.bottom && frame.0 < self.current);
        debug_assert!(self.recycled.iter().all(|pa| *pa != frame.0));

        let pa = frame.0;
        core::mem::forget(frame);

        self.recycled.push(pa);
        self.recycled.sort();

        while let Some(&last) = self.recycled.last() {
            if last + constants::PAGE_SIZE != self.current {
                break;
            }

            self.recycled.pop();
            self.current = last;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator(pages: usize) -> FrameAllocator {
        FrameAllocator::new(
            PhysicalAddress::new(0x8040_0000),
            PhysicalAddress::new(0x8040_0000 + pages * constants::PAGE_SIZE),
        )
    }

    #[test]
    fn test_bump_allocation() {
        let mut alloc = allocator(2);

        let first = alloc.alloc_frame().unwrap();
        let second = alloc.alloc_frame().unwrap();

        assert_eq!(first.0, PhysicalAddress::new(0x8040_0000));
        assert_eq!(second.0, PhysicalAddress::new(0x8040_1000));
        assert!(alloc.alloc_frame().is_none());

        alloc.dealloc(first);
        alloc.dealloc(second);
    }

    #[test]
    fn test_dealloc_collapses_into_bump_pointer() {
        let mut alloc = allocator(4);

        let frames = alloc.alloc_frames(3).unwrap();
        assert_eq!(alloc.available(), 1);

        for frame in frames {
            alloc.dealloc(frame);
        }

        assert_eq!(alloc.available(), 4);
        assert!(alloc.recycled.is_empty());
        assert_eq!(alloc.current, alloc.bottom());
    }

    #[test]
    fn test_recycled_frame_is_reused() {
        let mut alloc = allocator(4);

        let a = alloc.alloc_frame().unwrap();
        let b = alloc.alloc_frame().unwrap();
        let reused_pa = a.0;

        alloc.dealloc(a);
        let again = alloc.alloc_frame().unwrap();

        assert_eq!(again.0, reused_pa);

        alloc.dealloc(again);
        alloc.dealloc(b);
    }

    #[test]
    fn test_alloc_frames_refuses_overcommit() {
        let mut alloc = allocator(2);

        assert!(alloc.alloc_frames(3).is_none());
        assert_eq!(alloc.available(), 2);
    }

    #[test]
    fn test_bounds_are_page_aligned() {
        let alloc = FrameAllocator::new(
            PhysicalAddress::new(0x8040_0010),
            PhysicalAddress::new(0x8040_3010),
        );

        assert_eq!(alloc.bottom(), PhysicalAddress::new(0x8040_1000));
        assert_eq!(alloc.top(), PhysicalAddress::new(0x8040_3000));
        assert_eq!(alloc.available(), 2);
    }
}
