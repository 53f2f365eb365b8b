//! Loop back-edge detection.
//!
//! A back edge is a retreating edge of a depth-first traversal of the control-flow graph:
//! an edge `from -> to` where `to` is still on the DFS stack when the edge is followed. Its
//! target is a loop header. The engine bounds loops by counting traversals of these edges.

use rustc_hash::FxHashSet;

use crate::ir::{BlockId, Function, Instruction};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Color {
    White, // Unvisited
    Gray,  // On the DFS stack
    Black, // Finished
}

/// Back edges and loop headers of one function.
#[derive(Debug, Clone, Default)]
pub struct LoopInfo {
    back_edges: FxHashSet<(BlockId, BlockId)>,
    headers: FxHashSet<BlockId>,
}

impl LoopInfo {
    /// Analyzes `function`.
    ///
    /// The traversal starts at the entry block; catch handlers, which are only reachable by
    /// unwinding, are used as additional roots.
    #[must_use]
    pub fn analyze(function: &Function) -> Self {
        let count = function.blocks.len();
        let mut color = vec![Color::White; count];
        let mut info = LoopInfo::default();

        let handlers = function.blocks.iter().flat_map(|block| {
            block.instructions.iter().flat_map(|inst| match inst {
                Instruction::TryBegin { handlers } => {
                    handlers.iter().map(|h| h.handler).collect::<Vec<_>>()
                }
                _ => Vec::new(),
            })
        });
        let roots: Vec<BlockId> = std::iter::once(function.entry()).chain(handlers).collect();

        for root in roots {
            if (root.0 as usize) >= count || color[root.0 as usize] != Color::White {
                continue;
            }
            // (block, successors, next successor index)
            let mut stack: Vec<(BlockId, Vec<BlockId>, usize)> = Vec::new();
            color[root.0 as usize] = Color::Gray;
            stack.push((root, successors(function, root), 0));

            while let Some((block, succs, next)) = stack.last_mut() {
                let Some(&target) = succs.get(*next) else {
                    color[block.0 as usize] = Color::Black;
                    stack.pop();
                    continue;
                };
                *next += 1;
                let from = *block;
                match color.get(target.0 as usize) {
                    Some(Color::White) => {
                        color[target.0 as usize] = Color::Gray;
                        stack.push((target, successors(function, target), 0));
                    }
                    Some(Color::Gray) => {
                        info.back_edges.insert((from, target));
                        info.headers.insert(target);
                    }
                    _ => {}
                }
            }
        }
        info
    }

    /// Returns `true` if `from -> to` closes a loop.
    #[must_use]
    pub fn is_back_edge(&self, from: BlockId, to: BlockId) -> bool {
        self.back_edges.contains(&(from, to))
    }

    /// Returns `true` if `block` is the target of a back edge.
    #[must_use]
    pub fn is_header(&self, block: BlockId) -> bool {
        self.headers.contains(&block)
    }

    /// Number of back edges.
    #[must_use]
    pub fn back_edge_count(&self) -> usize {
        self.back_edges.len()
    }
}

fn successors(function: &Function, block: BlockId) -> Vec<BlockId> {
    function
        .block(block)
        .map(|b| b.terminator.successors())
        .unwrap_or_default()
}
