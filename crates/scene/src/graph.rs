//! Arena scene graph.
//!
//! Nodes live in one `Vec` and refer to each other by [`NodeId`]. Node 0 is
//! always the root. Every node caches its world matrix; changing a local
//! matrix refreshes the cached world matrices of that node's subtree.
//!
//! [`SceneGraph::draw`] walks the tree from the root and turns every mesh node
//! into one [`RenderObject`] per surface.

use std::sync::Arc;

use glam::Mat4;
use tracing::debug;

use crate::mesh::MeshAsset;
use crate::render_object::{DrawContext, RenderObject};

/// Index of a node inside its [`SceneGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// What a node contributes when drawn.
#[derive(Clone, Debug)]
pub enum NodeKind {
    /// The single top node of a graph.
    Root,
    /// A transform-only node.
    Group,
    /// A node that draws every surface of a mesh.
    Mesh(Arc<MeshAsset>),
}

#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub local_transform: Mat4,
    pub world_transform: Mat4,
}

#[derive(Clone, Debug)]
pub struct SceneGraph {
    nodes: Vec<Node>,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph {
    pub const ROOT: NodeId = NodeId(0);

    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Root,
                name: "root".to_string(),
                parent: None,
                children: Vec::new(),
                local_transform: Mat4::IDENTITY,
                world_transform: Mat4::IDENTITY,
            }],
        }
    }

    /// Append a node under `parent` and compute its world matrix.
    ///
    /// Returns `None`, leaving the graph unchanged, when `parent` does not
    /// name a node.
    pub fn add_node(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        kind: NodeKind,
        local_transform: Mat4,
    ) -> Option<NodeId> {
        let id = NodeId(self.nodes.len());
        let world_transform = self.nodes.get(parent.0)?.world_transform * local_transform;
        self.nodes.push(Node {
            kind,
            name: name.into(),
            parent: Some(parent),
            children: Vec::new(),
            local_transform,
            world_transform,
        });
        self.nodes[parent.0].children.push(id);
        Some(id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn root(&self) -> &Node {
        &self.nodes[Self::ROOT.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        // The root is always present.
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }

    /// Replace a node's local matrix and refresh its subtree.
    ///
    /// Returns `false` when `id` does not name a node.
    pub fn set_local_transform(&mut self, id: NodeId, local: Mat4) -> bool {
        let Some(node) = self.nodes.get_mut(id.0) else {
            return false;
        };
        node.local_transform = local;
        let parent = node.parent;
        let parent_world = parent.map_or(Mat4::IDENTITY, |p| self.nodes[p.0].world_transform);
        self.refresh_subtree(id, parent_world);
        true
    }

    /// Recompute every world matrix from the root down.
    pub fn refresh_transforms(&mut self) {
        self.refresh_subtree(Self::ROOT, Mat4::IDENTITY);
    }

    fn refresh_subtree(&mut self, start: NodeId, parent_world: Mat4) {
        let mut stack = vec![(start, parent_world)];
        while let Some((id, parent_world)) = stack.pop() {
            let node = &mut self.nodes[id.0];
            node.world_transform = parent_world * node.local_transform;
            let world = node.world_transform;
            stack.extend(node.children.iter().map(|&child| (child, world)));
        }
    }

    /// Emit render objects for every mesh surface, in depth-first order.
    pub fn draw(&self, top_matrix: Mat4, ctx: &mut DrawContext) {
        self.draw_node(Self::ROOT, top_matrix, ctx);
    }

    fn draw_node(&self, id: NodeId, top_matrix: Mat4, ctx: &mut DrawContext) {
        let node = &self.nodes[id.0];
        match &node.kind {
            NodeKind::Mesh(mesh) => {
                let node_matrix = top_matrix * node.world_transform;
                for surface in &mesh.surfaces {
                    ctx.push(RenderObject {
                        index_count: surface.count,
                        first_index: surface.start_index,
                        index_buffer: mesh.buffers.index_buffer.buffer,
                        material: Arc::clone(&surface.material),
                        bounds: surface.bounds,
                        transform: node_matrix,
                        vertex_buffer_address: mesh.buffers.vertex_buffer_address,
                    });
                }
            }
            NodeKind::Root | NodeKind::Group => {}
        }

        for &child in &node.children {
            self.draw_node(child, top_matrix, ctx);
        }
    }

    /// Mesh assets referenced by this graph, without duplicates.
    pub fn meshes(&self) -> Vec<Arc<MeshAsset>> {
        let mut meshes: Vec<Arc<MeshAsset>> = Vec::new();
        for node in &self.nodes {
            if let NodeKind::Mesh(mesh) = &node.kind
                && !meshes.iter().any(|m| Arc::ptr_eq(m, mesh))
            {
                meshes.push(Arc::clone(mesh));
            }
        }
        debug!("Scene graph references {} mesh asset(s)", meshes.len());
        meshes
    }
}
