use alloc::vec::Vec;
use core::ops::Deref;

use address::PhysicalAddress;

/// A single allocated physical page.
///
/// Frames must be handed back through [`IFrameAllocator::dealloc`]; dropping one is a bug.
#[derive(Debug)]
pub struct FrameDesc(pub PhysicalAddress);

impl FrameDesc {
    /// Create a new frame descriptor
    ///
    /// # Safety
    ///
    /// The caller must ensure that the frame is allocated.
    ///
    /// The caller is responsible for deallocating the frame.
    pub unsafe fn new(addr: PhysicalAddress) -> Self {
        FrameDesc(addr)
    }
}

impl Deref for FrameDesc {
    type Target = PhysicalAddress;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for FrameDesc {
    fn drop(&mut self) {
        panic!("You must manually deallocate frames")
    }
}

/// The physical-page allocator consumed by the loader and the user heap.
pub trait IFrameAllocator {
    fn alloc_frame(&mut self) -> Option<FrameDesc>;

    /// Allocates `count` frames, or none at all.
    fn alloc_frames(&mut self, count: usize) -> Option<Vec<FrameDesc>> {
        let mut frames = Vec::with_capacity(count);

        for _ in 0..count {
            match self.alloc_frame() {
                Some(frame) => frames.push(frame),
                None => {
                    for frame in frames {
                        self.dealloc(frame);
                    }

                    return None;
                }
            }
        }

        Some(frames)
    }

    fn dealloc(&mut self, frame: FrameDesc);
}
