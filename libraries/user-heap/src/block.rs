use address::{PhysicalAddress, VirtualAddress};
use alloc::vec::Vec;
use core::ops::{Index, IndexMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockId(usize);

/// Bookkeeping for one heap block. `va` is the first byte handed to the
/// application; the block's header sits in the `BLOCK_HEADER_SIZE` bytes below it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockNode {
    pub pa: PhysicalAddress,
    pub va: VirtualAddress,
    pub size: usize,
    pub next: Option<BlockId>,
}

impl BlockNode {
    pub fn end(&self) -> VirtualAddress {
        self.va + self.size
    }

    pub fn contains(&self, addr: VirtualAddress) -> bool {
        self.va <= addr && addr < self.end()
    }

    pub fn info(&self) -> BlockInfo {
        BlockInfo {
            va: self.va,
            pa: self.pa,
            size: self.size,
        }
    }

    /// Whether `other`'s header starts right where this block ends.
    pub fn precedes(&self, other: &BlockNode) -> bool {
        self.end() + constants::BLOCK_HEADER_SIZE == other.va
    }
}

/// A snapshot of one block, as reported by the heap's block iterators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub va: VirtualAddress,
    pub pa: PhysicalAddress,
    pub size: usize,
}

/// Slot storage for block nodes. A retired slot is reused by the next insert;
/// ids are never handed out for retired slots.
#[derive(Default)]
pub(crate) struct BlockArena {
    slots: Vec<BlockNode>,
    vacant: Vec<usize>,
}

impl BlockArena {
    pub fn insert(&mut self, node: BlockNode) -> BlockId {
        match self.vacant.pop() {
            Some(idx) => {
                self.slots[idx] = node;
                BlockId(idx)
            }
            None => {
                self.slots.push(node);
                BlockId(self.slots.len() - 1)
            }
        }
    }

    pub fn retire(&mut self, id: BlockId) -> BlockNode {
        debug_assert!(!self.vacant.contains(&id.0));

        self.vacant.push(id.0);
        self.slots[id.0]
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.vacant.len()
    }
}

impl Index<BlockId> for BlockArena {
    type Output = BlockNode;

    fn index(&self, id: BlockId) -> &BlockNode {
        &self.slots[id.0]
    }
}

impl IndexMut<BlockId> for BlockArena {
    fn index_mut(&mut self, id: BlockId) -> &mut BlockNode {
        &mut self.slots[id.0]
    }
}

#[cfg(test)]
mod tests {
    use abstractions::IUsizeAlias;

    use super::*;

    fn node(va: usize, size: usize) -> BlockNode {
        BlockNode {
            pa: PhysicalAddress::from_usize(va),
            va: VirtualAddress::from_usize(va),
            size,
            next: None,
        }
    }

    #[test]
    fn test_adjacency_accounts_for_header() {
        let a = node(0x1018, 0x40);

        assert!(a.precedes(&node(0x1018 + 0x40 + 24, 8)));
        assert!(!a.precedes(&node(0x1018 + 0x40, 8)));
        assert!(!a.precedes(&node(0x1018 + 0x40 + 32, 8)));
    }

    #[test]
    fn test_contains_is_half_open() {
        let a = node(0x1018, 0x40);

        assert!(a.contains(VirtualAddress::from_usize(0x1018)));
        assert!(a.contains(VirtualAddress::from_usize(0x1057)));
        assert!(!a.contains(VirtualAddress::from_usize(0x1058)));
        assert!(!a.contains(VirtualAddress::from_usize(0x1000)));
    }

    #[test]
    fn test_arena_reuses_slots() {
        let mut arena = BlockArena::default();

        let a = arena.insert(node(0x1000, 8));
        let b = arena.insert(node(0x2000, 8));
        assert_eq!(arena.len(), 2);

        assert_eq!(arena.retire(a).size, 8);
        assert_eq!(arena.len(), 1);

        let c = arena.insert(node(0x3000, 16));
        assert_eq!(c, a);
        assert_eq!(arena[c].size, 16);
        assert_eq!(arena[b].va, VirtualAddress::from_usize(0x2000));

        arena[b].size = 32;
        assert_eq!(arena[b].size, 32);
        assert_eq!(arena.len(), 2);
    }
}
