//! Compiled blocks and the map which caches them.
use crate::emitter::{Emitter, Label, Op};
use rustc_hash::FxHashMap;

/// A compiled sequence of guest instructions.
#[derive(Debug)]
pub struct Block {
    start: u16,
    len: u16,
    instructions: u32,
    ops: Vec<Op>,
    targets: Vec<usize>,
}

impl Block {
    /// Finishes `em` into a block starting at `start` which spans `len` words and executes at most
    /// `instructions` guest instructions.
    pub fn new(start: u16, len: u16, instructions: u32, em: Emitter) -> Self {
        let (ops, targets) = em.finish();
        Self {
            start,
            len,
            instructions,
            ops,
            targets,
        }
    }

    #[inline(always)]
    pub fn start(&self) -> u16 {
        self.start
    }

    /// Length in words of the guest code the block was compiled from.
    #[inline(always)]
    pub fn len(&self) -> u16 {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Upper bound on the guest instructions a single run executes.
    #[inline(always)]
    pub fn instructions(&self) -> u32 {
        self.instructions
    }

    #[inline(always)]
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    #[inline(always)]
    pub fn target(&self, label: Label) -> usize {
        self.targets[label.index()]
    }
}

/// Compiled blocks, keyed by start address.
#[derive(Debug, Default)]
pub struct Blocks {
    map: FxHashMap<u16, Block>,
}

impl Blocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, addr: u16) -> Option<&Block> {
        self.map.get(&addr)
    }

    pub fn insert(&mut self, block: Block) {
        self.map.insert(block.start, block);
    }

    /// Returns the block starting at `addr`, compiling it with `compile` if needed.
    pub fn get_or_compile(&mut self, addr: u16, compile: impl FnOnce() -> Block) -> &Block {
        self.map.entry(addr).or_insert_with(|| {
            let block = compile();
            debug_assert_eq!(block.start, addr);
            block
        })
    }

    /// Drops every block. Needed whenever instruction memory changes.
    pub fn clear(&mut self) {
        if !self.map.is_empty() {
            tracing::debug!("dropping {} compiled blocks", self.map.len());
        }

        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
