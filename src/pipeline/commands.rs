//! Draw-command arena and ordered command list.
//!
//! Commands live in a generational arena and are threaded into one global
//! doubly linked list whose order always equals a depth-first
//! pre-order-then-post-order walk of the scene tree: each node contributes
//! an opening run, optionally followed, after all descendants, by a closing
//! run of pop-style commands. Owner and neighbor fields are arena indices,
//! never references (no ownership cycles, O(1) splice).

use crate::geometry::Rect;
use crate::pipeline::device::BufferRegion;
use crate::scene::{NodeId, SceneTree};

/// Identifier of a draw material understood by the executor stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialId(pub u32);

/// Identifier of a texture bound by the executor stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// Identifier of an offscreen render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetId(pub u32);

/// Opaque payload forwarded verbatim to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustomCommand {
    pub tag: u32,
    pub data: [u32; 4],
}

/// One executable command, ready for sequential execution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandKind {
    /// Draw an index range out of a buffer region.
    Draw {
        region: BufferRegion,
        index_start: u32,
        index_count: u32,
        material: MaterialId,
        texture: Option<TextureId>,
        stencil_ref: u8,
    },
    /// Draw the mask shape into the stencil buffer, raising the mask depth.
    RegisterMask {
        region: BufferRegion,
        index_start: u32,
        index_count: u32,
        stencil_ref: u8,
    },
    /// Draw the mask shape again to release the stencil level.
    UnregisterMask {
        region: BufferRegion,
        index_start: u32,
        index_count: u32,
        stencil_ref: u8,
    },
    /// Restrict rasterization to a rectangle.
    SetScissor(Rect),
    ClearScissor,
    PushRenderTarget(RenderTargetId),
    PopRenderTarget,
    PushMaterial(MaterialId),
    PopMaterial,
    Custom(CustomCommand),
}

/// Stable handle into the command arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandId {
    index: u32,
    generation: u32,
}

/// A command plus its list links and owning node.
#[derive(Debug)]
pub struct Command {
    pub kind: CommandKind,
    pub owner: NodeId,
    prev: Option<CommandId>,
    next: Option<CommandId>,
}

struct Slot {
    generation: u32,
    command: Option<Command>,
}

/// The global ordered command list.
#[derive(Default)]
pub struct CommandList {
    slots: Vec<Slot>,
    free_indices: Vec<u32>,
    head: Option<CommandId>,
    tail: Option<CommandId>,
    len: usize,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, id: CommandId) -> Option<&Command> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.command.as_ref())
    }

    fn get_mut(&mut self, id: CommandId) -> Option<&mut Command> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.command.as_mut())
    }

    fn alloc(&mut self, command: Command) -> CommandId {
        if let Some(index) = self.free_indices.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.command = Some(command);
            CommandId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                command: Some(command),
            });
            CommandId {
                index,
                generation: 0,
            }
        }
    }

    /// Splice a new command after `anchor` (or at the list head when
    /// `anchor` is `None`). O(1).
    pub fn insert_after(
        &mut self,
        anchor: Option<CommandId>,
        owner: NodeId,
        kind: CommandKind,
    ) -> CommandId {
        let next = match anchor {
            Some(a) => {
                debug_assert!(self.get(a).is_some(), "stale splice anchor");
                self.get(a).and_then(|c| c.next)
            }
            None => self.head,
        };

        let id = self.alloc(Command {
            kind,
            owner,
            prev: anchor,
            next,
        });

        match anchor {
            Some(a) => {
                if let Some(c) = self.get_mut(a) {
                    c.next = Some(id);
                }
            }
            None => self.head = Some(id),
        }
        match next {
            Some(n) => {
                if let Some(c) = self.get_mut(n) {
                    c.prev = Some(id);
                }
            }
            None => self.tail = Some(id),
        }

        self.len += 1;
        crate::pipeline_stats::record_command_spliced();
        id
    }

    /// Unlink and free the inclusive run `first..=last` in one pass.
    ///
    /// The run must be contiguous in list order (a node's opening or
    /// closing run always is).
    pub fn unlink_run(&mut self, first: CommandId, last: CommandId) {
        let before = self.get(first).and_then(|c| c.prev);
        let after = self.get(last).and_then(|c| c.next);

        match before {
            Some(b) => {
                if let Some(c) = self.get_mut(b) {
                    c.next = after;
                }
            }
            None => self.head = after,
        }
        match after {
            Some(a) => {
                if let Some(c) = self.get_mut(a) {
                    c.prev = before;
                }
            }
            None => self.tail = before,
        }

        let mut current = Some(first);
        while let Some(id) = current {
            let next = self.get(id).and_then(|c| c.next);
            self.slots[id.index as usize].command = None;
            self.free_indices.push(id.index);
            self.len -= 1;
            if id == last {
                break;
            }
            current = next;
        }
    }

    /// Commands in execution order.
    pub fn iter(&self) -> CommandIter<'_> {
        CommandIter {
            list: self,
            current: self.head,
        }
    }
}

pub struct CommandIter<'a> {
    list: &'a CommandList,
    current: Option<CommandId>,
}

impl<'a> Iterator for CommandIter<'a> {
    type Item = (CommandId, &'a Command);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        let command = self.list.get(id)?;
        self.current = command.next;
        Some((id, command))
    }
}

/// Find the command after which a node's opening run belongs, walking
/// outward along the flattened paint-order `prev` links instead of
/// re-deriving tree position. Returns `None` when the run belongs at the
/// list head.
///
/// For each paint-order predecessor the correct anchor is the latest of:
/// the closing runs of its ancestors below the common ancestor with `node`
/// (closings nest outward, so the highest such ancestor closes last), or
/// its own opening run.
pub fn find_insertion_point(tree: &SceneTree, node: NodeId) -> Option<CommandId> {
    let mut cursor = tree.paint_prev(node);
    while let Some(candidate) = cursor {
        if tree.is_ancestor(candidate, node) {
            // An ancestor's opening run ends right before its first child's
            // commands; its closing run comes after `node` and never counts.
            if let Some(last) = tree.get(candidate).and_then(|n| n.render.last_command) {
                return Some(last);
            }
        } else {
            let lca = tree.lowest_common_ancestor(candidate, node);
            let mut best = None;
            let mut walk = Some(candidate);
            while let Some(w) = walk {
                if Some(w) == lca {
                    break;
                }
                if let Some(closing) = tree.get(w).and_then(|n| n.render.last_closing_command) {
                    best = Some(closing);
                }
                walk = tree.parent(w);
            }
            if best.is_some() {
                return best;
            }
            if let Some(last) = tree.get(candidate).and_then(|n| n.render.last_command) {
                return Some(last);
            }
        }
        cursor = tree.paint_prev(candidate);
    }
    None
}

/// Find the command after which a node's closing run belongs: the last
/// command anywhere in the node's subtree, falling back to the node's
/// opening insertion point when the whole subtree is empty.
pub fn find_closing_insertion_point(tree: &SceneTree, node: NodeId) -> Option<CommandId> {
    let mut cursor = Some(tree.subtree_tail(node));
    while let Some(candidate) = cursor {
        if candidate == node {
            if let Some(last) = tree.get(node).and_then(|n| n.render.last_command) {
                return Some(last);
            }
            return find_insertion_point(tree, node);
        }

        // candidate is a strict descendant; its ancestors' closing runs up
        // to (exclusive) `node` also precede our closing run.
        let mut best = None;
        let mut walk = Some(candidate);
        while let Some(w) = walk {
            if w == node {
                break;
            }
            if let Some(closing) = tree.get(w).and_then(|n| n.render.last_closing_command) {
                best = Some(closing);
            }
            walk = tree.parent(w);
        }
        if best.is_some() {
            return best;
        }
        if let Some(last) = tree.get(candidate).and_then(|n| n.render.last_command) {
            return Some(last);
        }
        cursor = tree.paint_prev(candidate);
    }
    None
}

/// Unlink and free a node's entire opening and closing runs.
pub fn reset_commands(list: &mut CommandList, tree: &mut SceneTree, node: NodeId) {
    let (opening, closing) = match tree.get(node) {
        Some(n) => (
            n.render.first_command.zip(n.render.last_command),
            n.render
                .first_closing_command
                .zip(n.render.last_closing_command),
        ),
        None => return,
    };

    if let Some((first, last)) = opening {
        list.unlink_run(first, last);
    }
    if let Some((first, last)) = closing {
        list.unlink_run(first, last);
    }

    if let Some(n) = tree.get_mut(node) {
        n.render.first_command = None;
        n.render.last_command = None;
        n.render.first_closing_command = None;
        n.render.last_closing_command = None;
    }
}
