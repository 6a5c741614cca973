//! Per-class intrusive free lists.
//!
//! Each class keeps a singly linked LIFO stack threaded through the payloads
//! of its free blocks; only the heads and lengths live outside the arena.

use crate::arena::Arena;
use crate::block::{BlockOffset, BlockState};
use crate::error::{AllocError, AllocResult};

#[derive(Debug, Clone)]
pub struct FreeLists {
    heads: Vec<Option<BlockOffset>>,
    lens: Vec<usize>,
}

impl FreeLists {
    #[must_use]
    pub fn new(class_count: usize) -> Self {
        Self {
            heads: vec![None; class_count],
            lens: vec![0; class_count],
        }
    }

    /// Parks `offset` on top of `class`'s list.
    pub fn push(&mut self, arena: &Arena, class: usize, offset: BlockOffset) {
        let Some(head) = self.heads.get_mut(class) else {
            debug_assert!(false, "push to unknown class {class}");
            return;
        };
        arena.write_block(
            offset,
            BlockState::Free {
                class,
                next: *head,
            },
        );
        *head = Some(offset);
        self.lens[class] += 1;
    }

    /// Takes the most recently freed block of `class`, if any.
    ///
    /// A head that does not decode as a free block of this class means the
    /// list was overwritten from outside; the list is left as it was.
    pub fn pop(&mut self, arena: &Arena, class: usize) -> AllocResult<Option<BlockOffset>> {
        let Some(head) = self.heads.get(class).copied().flatten() else {
            return Ok(None);
        };
        match arena.read_block(head) {
            Some(BlockState::Free { class: found, next }) if found == class => {
                self.heads[class] = next;
                self.lens[class] -= 1;
                Ok(Some(head))
            }
            _ => Err(AllocError::Corrupted {
                offset: head.get(),
            }),
        }
    }

    /// Blocks parked on `class`'s list.
    #[must_use]
    pub fn len(&self, class: usize) -> usize {
        self.lens.get(class).copied().unwrap_or(0)
    }

    /// Blocks parked across all classes.
    #[must_use]
    pub fn total(&self) -> usize {
        self.lens.iter().sum()
    }

    #[must_use]
    pub fn lengths(&self) -> &[usize] {
        &self.lens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena_with_blocks(n: usize) -> (Arena, Vec<BlockOffset>) {
        let arena = Arena::reserve(64 * 1024, 256).unwrap();
        let blocks = (0..n).map(|_| arena.carve(256).unwrap()).collect();
        (arena, blocks)
    }

    #[test]
    fn test_lifo_order() {
        let (arena, blocks) = arena_with_blocks(3);
        let mut lists = FreeLists::new(2);
        for &b in &blocks {
            lists.push(&arena, 0, b);
        }
        assert_eq!(lists.len(0), 3);
        assert_eq!(lists.pop(&arena, 0).unwrap(), Some(blocks[2]));
        assert_eq!(lists.pop(&arena, 0).unwrap(), Some(blocks[1]));
        assert_eq!(lists.pop(&arena, 0).unwrap(), Some(blocks[0]));
        assert_eq!(lists.pop(&arena, 0).unwrap(), None);
        assert_eq!(lists.total(), 0);
    }

    #[test]
    fn test_classes_are_independent() {
        let (arena, blocks) = arena_with_blocks(2);
        let mut lists = FreeLists::new(2);
        lists.push(&arena, 0, blocks[0]);
        lists.push(&arena, 1, blocks[1]);
        assert_eq!(lists.lengths(), &[1, 1]);
        assert_eq!(lists.pop(&arena, 1).unwrap(), Some(blocks[1]));
        assert_eq!(lists.len(0), 1);
        assert_eq!(lists.pop(&arena, 1).unwrap(), None);
    }

    #[test]
    fn test_pushed_block_reads_back_free() {
        let (arena, blocks) = arena_with_blocks(2);
        let mut lists = FreeLists::new(1);
        lists.push(&arena, 0, blocks[0]);
        lists.push(&arena, 0, blocks[1]);
        assert_eq!(
            arena.read_block(blocks[1]),
            Some(BlockState::Free {
                class: 0,
                next: Some(blocks[0]),
            })
        );
    }

    #[test]
    fn test_overwritten_head_reports_corruption() {
        let (arena, blocks) = arena_with_blocks(1);
        let mut lists = FreeLists::new(1);
        lists.push(&arena, 0, blocks[0]);
        arena.write_block(
            blocks[0],
            BlockState::Allocated {
                class: 0,
                requested: 8,
            },
        );
        let err = lists.pop(&arena, 0).unwrap_err();
        assert_eq!(
            err,
            AllocError::Corrupted {
                offset: blocks[0].get()
            }
        );
        assert_eq!(lists.len(0), 1);
    }

    #[test]
    fn test_unknown_class_is_empty() {
        let (arena, _) = arena_with_blocks(0);
        let mut lists = FreeLists::new(1);
        assert_eq!(lists.pop(&arena, 5).unwrap(), None);
        assert_eq!(lists.len(5), 0);
    }
}
