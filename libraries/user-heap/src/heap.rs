use address::{IAlignableAddress, PhysicalAddress, VirtualAddress};
use alloc::{sync::Arc, vec::Vec};
use allocation_abstractions::{FrameDesc, IFrameAllocator};
use constants::{BLOCK_HEADER_SIZE, HEAP_ALIGNMENT, MAX_HEAP_REQUEST, PAGE_SIZE};
use core::fmt::{self, Display};
use hermit_sync::SpinMutex;
use mmu_abstractions::{GenericMappingFlags, PageSize, PagingError, IMMU};

use crate::block::{BlockArena, BlockId, BlockInfo, BlockNode};

/// A first-fit heap over a process's user address space.
///
/// Free blocks form a singly linked list in increasing address order in which no
/// two blocks are adjacent; used blocks form a second list, most recent first.
/// Every block is preceded by a `BLOCK_HEADER_SIZE` header, so two blocks `a` and
/// `b` are adjacent when `a.va + a.size + BLOCK_HEADER_SIZE == b.va`, and merging
/// them gives the header of `b` back to `a`.
///
/// The heap grows upwards from `start`, one page per allocation at most. Pages are
/// never returned while the heap is alive.
pub struct UserHeap {
    mmu: Arc<SpinMutex<dyn IMMU>>,
    alloc: Arc<SpinMutex<dyn IFrameAllocator>>,
    blocks: BlockArena,
    free_head: Option<BlockId>,
    used_head: Option<BlockId>,
    start: VirtualAddress,
    frontier: VirtualAddress,
    frames: Vec<(VirtualAddress, FrameDesc)>,
}

impl UserHeap {
    /// An empty heap whose first page will be mapped at `start`, rounded up to a page.
    pub fn new(
        start: VirtualAddress,
        mmu: Arc<SpinMutex<dyn IMMU>>,
        alloc: Arc<SpinMutex<dyn IFrameAllocator>>,
    ) -> Self {
        let start = start.page_up();

        UserHeap {
            mmu,
            alloc,
            blocks: BlockArena::default(),
            free_head: None,
            used_head: None,
            start,
            frontier: start,
            frames: Vec::new(),
        }
    }

    /// Hands out a block of at least `requested` bytes, rounded up to `HEAP_ALIGNMENT`.
    ///
    /// Maps one more page at the frontier when no free block is large enough.
    /// Requests larger than `MAX_HEAP_REQUEST` fail without touching the heap.
    pub fn allocate(&mut self, requested: usize) -> Result<VirtualAddress, HeapError> {
        let size = round_request(requested)?;

        let (prev, id) = match self.find_fit(size) {
            Some(found) => found,
            None => self.grow()?,
        };

        let chosen = self.blocks[id];

        if chosen.size - size >= BLOCK_HEADER_SIZE + HEAP_ALIGNMENT {
            let rest_va = chosen.va + size + BLOCK_HEADER_SIZE;
            let rest_pa = self.translate(rest_va)?;

            let rest = self.blocks.insert(BlockNode {
                pa: rest_pa,
                va: rest_va,
                size: chosen.size - size - BLOCK_HEADER_SIZE,
                next: chosen.next,
            });

            self.relink_free(prev, Some(rest));
            self.blocks[id].size = size;
        } else {
            self.relink_free(prev, chosen.next);
        }

        self.blocks[id].next = self.used_head;
        self.used_head = Some(id);

        log::trace!(
            "Allocated {} bytes at {} for a request of {requested}",
            self.blocks[id].size,
            chosen.va
        );

        Ok(chosen.va)
    }

    /// Returns the used block containing `addr` to the free list, merging it with
    /// whichever free neighbours it touches.
    pub fn release(&mut self, addr: VirtualAddress) -> Result<(), HeapError> {
        let Some((prev_used, id)) = self.find_used(addr) else {
            log::warn!("Release of {addr}, which is not an allocated block");
            return Err(HeapError::UnknownAddress(addr));
        };

        let next_used = self.blocks[id].next;
        match prev_used {
            Some(prev) => self.blocks[prev].next = next_used,
            None => self.used_head = next_used,
        }

        let node = self.blocks[id];

        let mut pred = None;
        let mut succ = self.free_head;

        while let Some(current) = succ {
            if self.blocks[current].va > node.va {
                break;
            }

            pred = Some(current);
            succ = self.blocks[current].next;
        }

        let merge_prev = pred.is_some_and(|p| self.blocks[p].precedes(&node));
        let merge_next = succ.is_some_and(|s| node.precedes(&self.blocks[s]));

        match (pred, succ) {
            (Some(p), Some(s)) if merge_prev && merge_next => {
                let after = self.blocks.retire(s);
                self.blocks.retire(id);

                let pred = &mut self.blocks[p];
                pred.size += BLOCK_HEADER_SIZE + node.size + BLOCK_HEADER_SIZE + after.size;
                pred.next = after.next;
            }
            (_, Some(s)) if merge_next => {
                let after = self.blocks.retire(s);

                let released = &mut self.blocks[id];
                released.size += BLOCK_HEADER_SIZE + after.size;
                released.next = after.next;

                self.relink_free(pred, Some(id));
            }
            (Some(p), _) if merge_prev => {
                self.blocks.retire(id);
                self.blocks[p].size += BLOCK_HEADER_SIZE + node.size;
            }
            _ => {
                self.blocks[id].next = succ;
                self.relink_free(pred, Some(id));
            }
        }

        debug_assert_eq!(
            self.blocks.len(),
            self.free_blocks().count() + self.used_blocks().count()
        );

        log::trace!(
            "Released {} bytes at {} (merged with previous: {merge_prev}, next: {merge_next})",
            node.size,
            node.va
        );

        Ok(())
    }

    /// The next page the heap will map.
    pub fn frontier(&self) -> VirtualAddress {
        self.frontier
    }

    pub fn start(&self) -> VirtualAddress {
        self.start
    }

    pub fn mapped_pages(&self) -> usize {
        self.frames.len()
    }

    /// Total bytes available in free blocks, headers excluded.
    pub fn free_capacity(&self) -> usize {
        self.free_blocks().map(|block| block.size).sum()
    }

    /// Free blocks in address order.
    pub fn free_blocks(&self) -> BlockIter<'_> {
        BlockIter {
            blocks: &self.blocks,
            next: self.free_head,
        }
    }

    /// Used blocks, most recently allocated first.
    pub fn used_blocks(&self) -> BlockIter<'_> {
        BlockIter {
            blocks: &self.blocks,
            next: self.used_head,
        }
    }

    fn find_fit(&self, size: usize) -> Option<(Option<BlockId>, BlockId)> {
        let mut prev = None;
        let mut current = self.free_head;

        while let Some(id) = current {
            if self.blocks[id].size >= size {
                return Some((prev, id));
            }

            prev = Some(id);
            current = self.blocks[id].next;
        }

        None
    }

    fn find_used(&self, addr: VirtualAddress) -> Option<(Option<BlockId>, BlockId)> {
        let mut prev = None;
        let mut current = self.used_head;

        while let Some(id) = current {
            if self.blocks[id].contains(addr) {
                return Some((prev, id));
            }

            prev = Some(id);
            current = self.blocks[id].next;
        }

        None
    }

    /// Points `prev`'s link, or the free list head, at `next`.
    fn relink_free(&mut self, prev: Option<BlockId>, next: Option<BlockId>) {
        match prev {
            Some(prev) => self.blocks[prev].next = next,
            None => self.free_head = next,
        }
    }

    fn free_tail(&self) -> Option<BlockId> {
        let mut tail = self.free_head?;

        while let Some(next) = self.blocks[tail].next {
            tail = next;
        }

        Some(tail)
    }

    /// Maps one page at the frontier and makes it available as free space.
    ///
    /// The page is folded into the last free block when that block runs right up to
    /// it; otherwise it becomes a new block at the end of the free list. Returns the
    /// block holding the new space together with its predecessor in the free list.
    fn grow(&mut self) -> Result<(Option<BlockId>, BlockId), HeapError> {
        let page = self.frontier;

        let frame = self
            .alloc
            .lock()
            .alloc_frame()
            .ok_or(HeapError::OutOfFrames)?;

        let mapped = self.mmu.lock().map_single(
            page,
            frame.0,
            PageSize::_4K,
            GenericMappingFlags::user_data(),
        );

        if let Err(e) = mapped {
            log::error!("Failed to map heap page {page}: {e:?}");
            self.alloc.lock().dealloc(frame);
            return Err(HeapError::MappingFailed(e));
        }

        let pa = frame.0;
        self.frames.push((page, frame));
        self.frontier += PAGE_SIZE;

        log::debug!("Heap grew by one page: {page} -> {pa}");

        // the free list is address ordered and every block lies below the frontier
        let tail = self.free_tail();
        let prev = match tail {
            Some(tail) if self.blocks[tail].end() == page => {
                self.blocks[tail].size += PAGE_SIZE;
                return Ok((self.free_predecessor(tail), tail));
            }
            prev => prev,
        };

        let id = self.blocks.insert(BlockNode {
            pa: pa + BLOCK_HEADER_SIZE,
            va: page + BLOCK_HEADER_SIZE,
            size: PAGE_SIZE - BLOCK_HEADER_SIZE,
            next: None,
        });

        self.relink_free(prev, Some(id));

        Ok((prev, id))
    }

    fn free_predecessor(&self, target: BlockId) -> Option<BlockId> {
        let mut prev = None;
        let mut current = self.free_head;

        while let Some(id) = current {
            if id == target {
                break;
            }

            prev = Some(id);
            current = self.blocks[id].next;
        }

        prev
    }

    fn translate(&self, vaddr: VirtualAddress) -> Result<PhysicalAddress, HeapError> {
        self.mmu
            .lock()
            .query_virtual(vaddr)
            .map(|(pa, _, _)| pa)
            .map_err(HeapError::MappingFailed)
    }
}

impl Drop for UserHeap {
    fn drop(&mut self) {
        let mut mmu = self.mmu.lock();
        let mut alloc = self.alloc.lock();

        for (vaddr, frame) in self.frames.drain(..) {
            if let Err(e) = mmu.unmap_single(vaddr) {
                log::warn!("Failed to unmap heap page {vaddr}: {e:?}");
            }

            alloc.dealloc(frame);
        }
    }
}

pub struct BlockIter<'a> {
    blocks: &'a BlockArena,
    next: Option<BlockId>,
}

impl Iterator for BlockIter<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let node = &self.blocks[self.next?];
        self.next = node.next;

        Some(node.info())
    }
}

fn round_request(requested: usize) -> Result<usize, HeapError> {
    let too_large = HeapError::RequestTooLarge {
        requested,
        limit: MAX_HEAP_REQUEST,
    };

    let size = requested
        .max(1)
        .checked_next_multiple_of(HEAP_ALIGNMENT)
        .ok_or(too_large)?;

    if size > MAX_HEAP_REQUEST {
        log::warn!("Heap request of {requested} bytes exceeds the {MAX_HEAP_REQUEST} byte limit");
        return Err(too_large);
    }

    Ok(size)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// The rounded request does not fit in a single page's usable space.
    RequestTooLarge { requested: usize, limit: usize },
    /// The address does not belong to any allocated block.
    UnknownAddress(VirtualAddress),
    /// The frame allocator has no page left for the heap to grow into.
    OutOfFrames,
    MappingFailed(PagingError),
}

impl Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::RequestTooLarge { requested, limit } => write!(
                f,
                "heap request of {requested} bytes exceeds the {limit} byte limit"
            ),
            HeapError::UnknownAddress(addr) => write!(f, "{addr} is not an allocated block"),
            HeapError::OutOfFrames => f.write_str("out of physical frames"),
            HeapError::MappingFailed(e) => write!(f, "failed to map a heap page: {e:?}"),
        }
    }
}
