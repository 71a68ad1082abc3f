//! Point cloud octrees placed in a scene.

use glam::DVec3;

use crate::geometry::{LoadRequest, OctreeGeometry};
use crate::node::{
    Cullable, Loadable, NodeId, NodeKey, NodePayload, OctreeId, OctreeNode, Renderable,
};

/// A node selected for rendering in the current frame.
#[derive(Debug, Clone, Copy)]
pub(crate) struct VisibleEntry {
    pub(crate) node: NodeId,
    pub(crate) projected_size: f64,
}

/// Read-only view of a visible node, handed to the renderer.
#[derive(Debug, Clone, Copy)]
pub struct VisibleNode<'a> {
    /// Key of the node.
    pub key: NodeKey,
    /// The node.
    pub node: &'a OctreeNode,
    /// Decoded buffers, if the node is loaded.
    pub payload: Option<&'a NodePayload>,
    /// World position of the octree-local origin.
    pub world_offset: DVec3,
    /// Projected radius in pixels this frame.
    pub projected_size: f64,
}

/// One point cloud: its geometry placed at a world position.
#[derive(Debug, Clone)]
pub struct PointCloudOctree {
    id: OctreeId,
    name: String,
    geometry: OctreeGeometry,
    position: DVec3,
    pub(crate) visible: Vec<VisibleEntry>,
    pub(crate) visible_points: u64,
}

impl PointCloudOctree {
    /// Identifier within the scene.
    #[must_use]
    pub fn id(&self) -> OctreeId {
        self.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The node arena.
    #[must_use]
    pub fn geometry(&self) -> &OctreeGeometry {
        &self.geometry
    }

    pub(crate) fn geometry_mut(&mut self) -> &mut OctreeGeometry {
        &mut self.geometry
    }

    /// World position of the octree-local origin. Starts at the geometry
    /// offset, placing the cloud at its source coordinates.
    #[must_use]
    pub fn position(&self) -> DVec3 {
        self.position
    }

    /// Move the cloud.
    pub fn set_position(&mut self, position: DVec3) {
        self.position = position;
    }

    /// Key of a node of this octree.
    #[must_use]
    pub fn key(&self, node: NodeId) -> NodeKey {
        NodeKey::new(self.id, node)
    }

    /// Look up a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&OctreeNode> {
        self.geometry.node(id)
    }

    /// Sum of the point counts of the visible nodes this frame.
    #[must_use]
    pub fn visible_points(&self) -> u64 {
        self.visible_points
    }

    /// Nodes selected in the last frame, in visit order.
    pub fn visible_nodes(&self) -> impl Iterator<Item = VisibleNode<'_>> {
        self.visible.iter().filter_map(move |entry| {
            let node = self.geometry.node(entry.node)?;
            Some(VisibleNode {
                key: self.key(entry.node),
                node,
                payload: node.payload(),
                world_offset: self.position,
                projected_size: entry.projected_size,
            })
        })
    }

    /// Number of visible nodes that are loaded and drawable.
    #[must_use]
    pub fn drawable_count(&self) -> usize {
        self.visible_nodes().filter(|v| v.node.is_loaded()).count()
    }

    /// World-space bounding sphere of a node.
    pub(crate) fn bounding_sphere(&self, node: &OctreeNode) -> (DVec3, f64) {
        node.bounding_sphere(self.position)
    }

    pub(crate) fn begin_load(&mut self, node: NodeId) -> Option<LoadRequest> {
        let key = self.key(node);
        self.geometry.begin_load(key)
    }

    pub(crate) fn clear_visible(&mut self) {
        self.visible.clear();
        self.visible_points = 0;
    }
}

/// All point clouds streamed together under one budget.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    octrees: Vec<PointCloudOctree>,
    pub(crate) visit_order: Vec<NodeKey>,
}

impl Scene {
    /// Create an empty scene.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a point cloud.
    pub fn add(&mut self, name: impl Into<String>, geometry: OctreeGeometry) -> OctreeId {
        // Scenes hold a handful of clouds; the count always fits.
        let id = OctreeId(u32::try_from(self.octrees.len()).unwrap_or(u32::MAX));
        let position = geometry.offset();
        self.octrees.push(PointCloudOctree {
            id,
            name: name.into(),
            geometry,
            position,
            visible: Vec::new(),
            visible_points: 0,
        });
        id
    }

    /// Number of point clouds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.octrees.len()
    }

    /// Check if the scene has no point clouds.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.octrees.is_empty()
    }

    /// Look up a point cloud.
    #[must_use]
    pub fn get(&self, id: OctreeId) -> Option<&PointCloudOctree> {
        self.octrees.get(id.index())
    }

    /// Look up a point cloud for modification.
    pub fn get_mut(&mut self, id: OctreeId) -> Option<&mut PointCloudOctree> {
        self.octrees.get_mut(id.index())
    }

    /// Iterate over the point clouds in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &PointCloudOctree> {
        self.octrees.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut PointCloudOctree> {
        self.octrees.iter_mut()
    }

    /// Look up a node by key.
    #[must_use]
    pub fn node(&self, key: NodeKey) -> Option<&OctreeNode> {
        self.get(key.octree)?.node(key.node)
    }

    pub(crate) fn node_mut(&mut self, key: NodeKey) -> Option<&mut OctreeNode> {
        self.get_mut(key.octree)?.geometry_mut().node_mut(key.node)
    }

    /// Visible nodes of every point cloud, grouped by point cloud.
    pub fn visible_nodes(&self) -> impl Iterator<Item = VisibleNode<'_>> {
        self.octrees.iter().flat_map(PointCloudOctree::visible_nodes)
    }

    /// Nodes selected in the last frame across all point clouds, in the
    /// order the traversal admitted them.
    #[must_use]
    pub fn visit_order(&self) -> &[NodeKey] {
        &self.visit_order
    }

    pub(crate) fn clear_visible(&mut self) {
        self.visit_order.clear();
        for octree in &mut self.octrees {
            octree.clear_visible();
        }
    }
}
