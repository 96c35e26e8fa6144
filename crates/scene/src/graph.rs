//! Arena-backed scene hierarchy.
//!
//! Nodes live in one `Vec` and refer to each other by [`NodeId`]. A parent
//! link is a plain index, not ownership, so the graph has no reference
//! cycles to break and no weak pointers to upgrade. Nodes are never removed;
//! a detached node simply becomes a root.

use glam::Mat4;
use thiserror::Error;

use crate::transform::{Transform, normal_matrix};

/// Stable index of a node in its [`SceneGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SceneError {
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    #[error("parenting {child:?} under {parent:?} would create a cycle")]
    Cycle { child: NodeId, parent: NodeId },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub local: Transform,
    /// Valid after the last [`SceneGraph::update_world_transforms`].
    world: Mat4,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    fn new(name: impl Into<String>, local: Transform, parent: Option<NodeId>) -> Self {
        Self {
            name: name.into(),
            local,
            world: local.local_matrix(),
            parent,
            children: Vec::new(),
        }
    }

    pub fn world(&self) -> Mat4 {
        self.world
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

#[derive(Debug, Default, Clone)]
pub struct SceneGraph {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(&mut self, name: impl Into<String>, local: Transform) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(name, local, None));
        self.roots.push(id);
        id
    }

    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        local: Transform,
    ) -> Result<NodeId, SceneError> {
        self.check(parent)?;
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(name, local, Some(parent)));
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    /// Moves `child` (with its subtree) under `parent`.
    ///
    /// Fails if `parent` is `child` itself or one of its descendants.
    pub fn set_parent(&mut self, child: NodeId, parent: NodeId) -> Result<(), SceneError> {
        self.check(child)?;
        self.check(parent)?;
        if self.is_ancestor_or_self(child, parent) {
            return Err(SceneError::Cycle { child, parent });
        }

        self.unlink(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
        Ok(())
    }

    /// Makes `node` a root. Its subtree stays attached to it.
    pub fn detach(&mut self, node: NodeId) -> Result<(), SceneError> {
        self.check(node)?;
        if self.nodes[node.0].parent.is_some() {
            self.unlink(node);
            self.nodes[node.0].parent = None;
            self.roots.push(node);
        }
        Ok(())
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0).and_then(|n| n.parent)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node.0)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, node: NodeId) -> Option<&Node> {
        self.nodes.get(node.0)
    }

    pub fn node_mut(&mut self, node: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(node.0)
    }

    /// Recomputes every world matrix, parents before children.
    pub fn update_world_transforms(&mut self) {
        let mut stack: Vec<(NodeId, Mat4)> = self
            .roots
            .iter()
            .rev()
            .map(|&root| (root, Mat4::IDENTITY))
            .collect();

        while let Some((id, parent_world)) = stack.pop() {
            let node = &mut self.nodes[id.0];
            node.world = parent_world * node.local.local_matrix();
            let world = node.world;
            stack.extend(node.children.iter().rev().map(|&child| (child, world)));
        }
    }

    pub fn world_matrix(&self, node: NodeId) -> Option<Mat4> {
        self.nodes.get(node.0).map(|n| n.world)
    }

    pub fn normal_matrix(&self, node: NodeId) -> Option<Mat4> {
        self.world_matrix(node).map(normal_matrix)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn check(&self, node: NodeId) -> Result<(), SceneError> {
        if node.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(SceneError::UnknownNode(node))
        }
    }

    /// Whether `ancestor` is `node` or lies on its parent chain.
    fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes[id.0].parent;
        }
        false
    }

    /// Removes `node` from its parent's child list or from the roots.
    fn unlink(&mut self, node: NodeId) {
        match self.nodes[node.0].parent {
            Some(parent) => self.nodes[parent.0].children.retain(|&c| c != node),
            None => self.roots.retain(|&r| r != node),
        }
    }
}
