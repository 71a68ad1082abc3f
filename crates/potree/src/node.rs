//! Octree nodes and their load state.

use glam::DVec3;
use potree_format::{Aabb, AttributeBuffer, DecodedNode};

/// Index of a node in its geometry's arena. Stable for the lifetime of the
/// geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of an octree in a [`Scene`](crate::Scene).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OctreeId(pub(crate) u32);

impl OctreeId {
    /// Scene index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifies a node across all octrees of a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    /// Octree holding the node.
    pub octree: OctreeId,
    /// Node within the octree.
    pub node: NodeId,
}

impl NodeKey {
    /// Create a key.
    #[must_use]
    pub const fn new(octree: OctreeId, node: NodeId) -> Self {
        Self { octree, node }
    }
}

/// What is known about a node's point count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PointCount {
    /// Nothing is known yet.
    #[default]
    Unknown,
    /// Taken from hierarchy metadata before the node was loaded.
    Estimated(u64),
    /// Counted while decoding.
    Exact(u64),
}

impl PointCount {
    /// Points charged against the frame budget. Unknown counts cost nothing.
    #[must_use]
    pub fn budget_points(self) -> u64 {
        match self {
            Self::Unknown => 0,
            Self::Estimated(n) | Self::Exact(n) => n,
        }
    }

    /// The count, if it was measured.
    #[must_use]
    pub fn exact(self) -> Option<u64> {
        match self {
            Self::Exact(n) => Some(n),
            _ => None,
        }
    }
}

/// Decoded data of a loaded node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodePayload {
    /// Attribute buffers.
    pub buffers: Vec<AttributeBuffer>,
    /// Box fitted to the points, octree-local.
    pub tight_bounding_box: Aabb,
    /// Positions are stored relative to this point, octree-local.
    pub mean: DVec3,
    /// Spacing estimated by the decoder.
    pub estimated_spacing: Option<f64>,
}

impl From<DecodedNode> for NodePayload {
    fn from(decoded: DecodedNode) -> Self {
        Self {
            buffers: decoded.buffers,
            tight_bounding_box: decoded.tight_bounding_box,
            mean: decoded.mean,
            estimated_spacing: decoded.estimated_spacing,
        }
    }
}

/// Load state of a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum NodeState {
    /// Not requested, or evicted.
    #[default]
    Unloaded,
    /// A load request is in flight.
    Loading,
    /// Decoded and resident.
    Loaded(Box<NodePayload>),
    /// The last load failed; stays failed until retried.
    Failed,
}

/// A child slot that is known from hierarchy metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildSlot {
    /// Octant index.
    pub index: u8,
    /// The child node, if it has been instantiated.
    pub node: Option<NodeId>,
}

/// A node of an octree.
#[derive(Debug, Clone)]
pub struct OctreeNode {
    pub(crate) name: String,
    pub(crate) level: u32,
    pub(crate) bounding_box: Aabb,
    pub(crate) spacing: f64,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: [Option<NodeId>; 8],
    pub(crate) child_mask: u8,
    pub(crate) num_points: PointCount,
    pub(crate) state: NodeState,
    pub(crate) hierarchy_loaded: bool,
    pub(crate) last_visible_frame: Option<u64>,
}

impl OctreeNode {
    pub(crate) fn new(
        name: String,
        bounding_box: Aabb,
        spacing: f64,
        parent: Option<NodeId>,
    ) -> Self {
        Self {
            level: potree_format::name::level_of(&name),
            name,
            bounding_box,
            spacing,
            parent,
            children: [None; 8],
            child_mask: 0,
            num_points: PointCount::Unknown,
            state: NodeState::Unloaded,
            hierarchy_loaded: false,
            last_visible_frame: None,
        }
    }

    /// Node name, e.g. `"r042"`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Depth, the root being 0.
    #[must_use]
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Nominal spacing between points at this level.
    #[must_use]
    pub fn spacing(&self) -> f64 {
        self.spacing
    }

    /// Parent node, `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// True for the root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Bit `i` set means child `i` exists.
    #[must_use]
    pub fn child_mask(&self) -> u8 {
        self.child_mask
    }

    /// True if hierarchy metadata lists at least one child.
    #[must_use]
    pub fn has_children(&self) -> bool {
        self.child_mask != 0
    }

    /// Known child slots: flagged in the mask or already instantiated.
    pub fn child_slots(&self) -> impl Iterator<Item = ChildSlot> + '_ {
        (0..8u8).filter_map(move |index| {
            let node = self.children[usize::from(index)];
            (node.is_some() || self.child_mask & (1 << index) != 0)
                .then_some(ChildSlot { index, node })
        })
    }

    /// Frame in which the node was last marked visible.
    #[must_use]
    pub fn last_visible_frame(&self) -> Option<u64> {
        self.last_visible_frame
    }

    /// Whether the hierarchy chunk rooted at this node has been applied.
    #[must_use]
    pub fn hierarchy_loaded(&self) -> bool {
        self.hierarchy_loaded
    }

    /// True while a load is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self.state, NodeState::Loading)
    }

    /// True if the last load failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.state, NodeState::Failed)
    }

    /// Drop the payload and return to unloaded. Returns the number of points
    /// released, or `None` if the node was not loaded.
    pub(crate) fn unload(&mut self) -> Option<u64> {
        if !self.is_loaded() {
            return None;
        }
        self.state = NodeState::Unloaded;
        Some(self.num_points.budget_points())
    }

    pub(crate) fn set_loaded(&mut self, payload: NodePayload, num_points: u64) {
        self.num_points = PointCount::Exact(num_points);
        self.state = NodeState::Loaded(Box::new(payload));
    }
}

/// Access to load state.
pub trait Loadable {
    /// Current state.
    fn state(&self) -> &NodeState;

    /// What is known about the point count.
    fn num_points(&self) -> PointCount;

    /// True if decoded and resident.
    fn is_loaded(&self) -> bool {
        matches!(self.state(), NodeState::Loaded(_))
    }
}

/// Bounds used for frustum culling and LOD.
pub trait Cullable {
    /// Nominal box, octree-local.
    fn bounding_box(&self) -> &Aabb;

    /// Bounding sphere in world space for an octree placed at `position`.
    fn bounding_sphere(&self, position: DVec3) -> (DVec3, f64) {
        let aabb = self.bounding_box();
        (aabb.center() + position, aabb.radius())
    }

    /// Nominal box in world space for an octree placed at `position`.
    fn world_box(&self, position: DVec3) -> Aabb {
        self.bounding_box().translated(position)
    }
}

/// Read access to data a renderer draws.
pub trait Renderable {
    /// Decoded buffers, if loaded.
    fn payload(&self) -> Option<&NodePayload>;

    /// Nominal point spacing, for point sizing.
    fn spacing(&self) -> f64;
}

impl Loadable for OctreeNode {
    fn state(&self) -> &NodeState {
        &self.state
    }

    fn num_points(&self) -> PointCount {
        self.num_points
    }
}

impl Cullable for OctreeNode {
    fn bounding_box(&self) -> &Aabb {
        &self.bounding_box
    }
}

impl Renderable for OctreeNode {
    fn payload(&self) -> Option<&NodePayload> {
        match &self.state {
            NodeState::Loaded(payload) => Some(&**payload),
            _ => None,
        }
    }

    fn spacing(&self) -> f64 {
        self.spacing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> OctreeNode {
        OctreeNode::new(
            "r05".to_string(),
            Aabb::new(DVec3::ZERO, DVec3::splat(2.0)),
            0.25,
            Some(NodeId(1)),
        )
    }

    fn payload() -> NodePayload {
        NodePayload {
            buffers: Vec::new(),
            tight_bounding_box: Aabb::new(DVec3::ZERO, DVec3::ONE),
            mean: DVec3::splat(0.5),
            estimated_spacing: None,
        }
    }

    #[test]
    fn test_new_node() {
        let node = node();
        assert_eq!(node.level(), 2);
        assert!(!node.is_root());
        assert!(!node.is_loaded());
        assert_eq!(node.num_points(), PointCount::Unknown);
        assert_eq!(node.child_slots().count(), 0);
    }

    #[test]
    fn test_point_count_budget() {
        assert_eq!(PointCount::Unknown.budget_points(), 0);
        assert_eq!(PointCount::Estimated(7).budget_points(), 7);
        assert_eq!(PointCount::Estimated(7).exact(), None);
        assert_eq!(PointCount::Exact(7).exact(), Some(7));
    }

    #[test]
    fn test_unload_only_when_loaded() {
        let mut node = node();
        assert_eq!(node.unload(), None);

        node.state = NodeState::Loading;
        assert_eq!(node.unload(), None);
        assert!(node.is_loading());

        node.set_loaded(payload(), 42);
        assert!(node.payload().is_some());
        assert_eq!(node.num_points().exact(), Some(42));
        assert_eq!(node.unload(), Some(42));
        assert_eq!(node.state(), &NodeState::Unloaded);
        assert!(node.payload().is_none());
    }

    #[test]
    fn test_child_slots() {
        let mut node = node();
        node.child_mask = 0b1000_0010;
        node.children[1] = Some(NodeId(9));
        let slots: Vec<ChildSlot> = node.child_slots().collect();
        assert_eq!(
            slots,
            vec![
                ChildSlot {
                    index: 1,
                    node: Some(NodeId(9))
                },
                ChildSlot {
                    index: 7,
                    node: None
                },
            ]
        );
    }

    #[test]
    fn test_bounding_sphere() {
        let node = node();
        let (center, radius) = node.bounding_sphere(DVec3::new(10.0, 0.0, 0.0));
        assert_eq!(center, DVec3::new(11.0, 1.0, 1.0));
        assert!((radius - 3f64.sqrt()).abs() < 1e-12);
    }
}
