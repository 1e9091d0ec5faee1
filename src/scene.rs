//! Arena-based scene graph storage for the rendering pipeline.
//!
//! Nodes are addressed by generational ids (index + generation) so stale
//! ids from removed nodes can never alias a reused slot. Alongside the
//! parent/children hierarchy, the arena maintains a flattened doubly linked
//! paint-order sequence (`prev`/`next` in depth-first pre-order) that the
//! command-list splicer walks to find insertion points without re-deriving
//! tree positions.

use crate::pipeline::dirty::DirtyFlags;
use crate::pipeline::node::NodeRenderData;
use crate::pipeline::painter::PaintContent;
use crate::style::NodeInputs;

/// Unique identifier for a scene node.
///
/// Uses a generational index design:
/// - `index`: Position in the slot array (reusable after removal)
/// - `generation`: Version counter that increments when a slot is reused
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Convert to a u64 for external use (e.g. command-buffer debugging).
    /// Combines generation (high bits) with index (low bits).
    pub fn as_u64(self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64)
    }
}

/// A node in the scene graph: external inputs, the visual-content callback,
/// render-derived state, and hierarchy/paint-order links.
pub struct SceneNode {
    /// Resolved inputs from the external style/layout system.
    pub inputs: NodeInputs,
    /// Visual-content callback. Taken out while painting to avoid aliasing
    /// the rest of the node.
    pub content: Option<Box<dyn PaintContent>>,
    /// Render-derived state, owned by the propagation engine and generator.
    pub render: NodeRenderData,
    /// Pending dirty categories, consumed by the propagation passes.
    pub dirty: DirtyFlags,

    parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// Paint-order predecessor (depth-first pre-order).
    prev: Option<NodeId>,
    /// Paint-order successor.
    next: Option<NodeId>,
    depth: u32,
}

struct Slot {
    generation: u32,
    node: Option<SceneNode>,
}

/// Scene graph arena with generational slot reuse.
#[derive(Default)]
pub struct SceneTree {
    slots: Vec<Slot>,
    free_indices: Vec<u32>,
    roots: Vec<NodeId>,
}

impl SceneTree {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_indices: Vec::new(),
            roots: Vec::new(),
        }
    }

    fn alloc(&mut self, node: SceneNode) -> NodeId {
        if let Some(index) = self.free_indices.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.node = Some(node);
            NodeId::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeId::new(index, 0)
        }
    }

    fn slot(&self, id: NodeId) -> Option<&SceneNode> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_ref())
    }

    fn slot_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_mut())
    }

    /// Check if a node id is live.
    pub fn contains(&self, id: NodeId) -> bool {
        self.slot(id).is_some()
    }

    pub fn get(&self, id: NodeId) -> Option<&SceneNode> {
        self.slot(id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.slot_mut(id)
    }

    /// Root nodes in paint order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slot(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.slot(id).map(|n| n.children.clone()).unwrap_or_default()
    }

    pub fn depth(&self, id: NodeId) -> u32 {
        self.slot(id).map(|n| n.depth).unwrap_or(0)
    }

    /// Paint-order predecessor of a node.
    pub fn paint_prev(&self, id: NodeId) -> Option<NodeId> {
        self.slot(id).and_then(|n| n.prev)
    }

    /// Paint-order successor of a node.
    pub fn paint_next(&self, id: NodeId) -> Option<NodeId> {
        self.slot(id).and_then(|n| n.next)
    }

    /// Add a root node at the end of the root sequence.
    pub fn insert_root(&mut self, inputs: NodeInputs) -> NodeId {
        let prev = self
            .roots
            .last()
            .copied()
            .map(|last| self.subtree_tail(last));
        let id = self.alloc(SceneNode {
            inputs,
            content: None,
            render: NodeRenderData::default(),
            dirty: DirtyFlags::all(),
            parent: None,
            children: Vec::new(),
            prev,
            next: None,
            depth: 0,
        });
        if let Some(p) = prev {
            if let Some(n) = self.slot_mut(p) {
                n.next = Some(id);
            }
        }
        self.roots.push(id);
        id
    }

    /// Add a child at the end of `parent`'s child list.
    ///
    /// Returns `None` when `parent` is stale.
    pub fn insert_child(&mut self, parent: NodeId, inputs: NodeInputs) -> Option<NodeId> {
        let index = self.slot(parent)?.children.len();
        self.insert_child_at(parent, index, inputs)
    }

    /// Add a child at the given sibling index.
    pub fn insert_child_at(
        &mut self,
        parent: NodeId,
        index: usize,
        inputs: NodeInputs,
    ) -> Option<NodeId> {
        let parent_node = self.slot(parent)?;
        if index > parent_node.children.len() {
            return None;
        }
        let depth = parent_node.depth + 1;

        // Paint-order predecessor: the parent itself for the first child,
        // otherwise the tail of the previous sibling's subtree.
        let prev = if index == 0 {
            parent
        } else {
            self.subtree_tail(parent_node.children[index - 1])
        };
        let next = self.slot(prev).and_then(|n| n.next);

        let id = self.alloc(SceneNode {
            inputs,
            content: None,
            render: NodeRenderData::default(),
            dirty: DirtyFlags::all(),
            parent: Some(parent),
            children: Vec::new(),
            prev: Some(prev),
            next,
            depth,
        });

        if let Some(n) = self.slot_mut(prev) {
            n.next = Some(id);
        }
        if let Some(nx) = next {
            if let Some(n) = self.slot_mut(nx) {
                n.prev = Some(id);
            }
        }
        if let Some(p) = self.slot_mut(parent) {
            p.children.insert(index, id);
        }
        Some(id)
    }

    /// The last node of a subtree in paint order (deepest last descendant,
    /// or the node itself when it is a leaf).
    pub fn subtree_tail(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(node) = self.slot(current) {
            match node.children.last() {
                Some(&last) => current = last,
                None => break,
            }
        }
        current
    }

    /// All nodes of a subtree in paint (pre-)order.
    pub fn collect_subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.slot(current) {
                out.push(current);
                for &child in node.children.iter().rev() {
                    stack.push(child);
                }
            }
        }
        out
    }

    /// Whether `ancestor` is a strict ancestor of `id`.
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = self.parent(id);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = self.parent(c);
        }
        false
    }

    /// Lowest common ancestor of two nodes, if they share one.
    pub fn lowest_common_ancestor(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        let (mut a, mut b) = (a, b);
        let (mut da, mut db) = (self.depth(a), self.depth(b));
        while da > db {
            a = self.parent(a)?;
            da -= 1;
        }
        while db > da {
            b = self.parent(b)?;
            db -= 1;
        }
        while a != b {
            a = self.parent(a)?;
            b = self.parent(b)?;
        }
        Some(a)
    }

    /// Detach a subtree from the hierarchy and the paint-order sequence,
    /// then drop its nodes. The caller must have released render resources
    /// (commands, buffers, property slots) for every node first.
    pub fn remove_subtree(&mut self, id: NodeId) {
        if !self.contains(id) {
            return;
        }

        // Unlink the contiguous paint-order run [id ..= tail].
        let tail = self.subtree_tail(id);
        let before = self.slot(id).and_then(|n| n.prev);
        let after = self.slot(tail).and_then(|n| n.next);
        if let Some(b) = before {
            if let Some(n) = self.slot_mut(b) {
                n.next = after;
            }
        }
        if let Some(a) = after {
            if let Some(n) = self.slot_mut(a) {
                n.prev = before;
            }
        }

        // Detach from parent or root list.
        match self.parent(id) {
            Some(parent) => {
                if let Some(p) = self.slot_mut(parent) {
                    p.children.retain(|&c| c != id);
                }
            }
            None => self.roots.retain(|&r| r != id),
        }

        for removed in self.collect_subtree(id) {
            let slot = &mut self.slots[removed.index as usize];
            slot.node = None;
            self.free_indices.push(removed.index);
        }
    }

    /// Take a node's content callback out for painting.
    pub fn take_content(&mut self, id: NodeId) -> Option<Box<dyn PaintContent>> {
        self.slot_mut(id).and_then(|n| n.content.take())
    }

    /// Restore a content callback after painting.
    pub fn put_content(&mut self, id: NodeId, content: Box<dyn PaintContent>) {
        if let Some(n) = self.slot_mut(id) {
            n.content = Some(content);
        }
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }
}
