//! The node arena of one octree and the rules for locating its files.

use std::collections::HashMap;

use glam::DVec3;
use potree_format::name::{self, ROOT_NAME};
use potree_format::{
    Aabb, CloudMetadata, DecodeParams, DecoderKind, HierarchyEntry, PointLayout, Version,
};

use crate::error::{Error, Result};
use crate::node::{ChildSlot, NodeId, NodeKey, NodeState, OctreeNode, PointCount};

/// Node files carry an extension from this version on.
const EXTENSION_VERSION: Version = Version::new(1, 4);
/// Node files live in hierarchy directories from this version on.
const HIERARCHY_DIR_VERSION: Version = Version::new(1, 5);

/// Everything needed to fetch and decode one node.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    /// Node being loaded.
    pub key: NodeKey,
    /// Scheduler generation the request belongs to.
    pub generation: u64,
    /// Octree directory named in `cloud.js`.
    pub octree_dir: String,
    /// Node file, relative to the octree directory.
    pub node_path: String,
    /// Hierarchy chunk to fetch before the node file, relative to the octree
    /// directory.
    pub hierarchy_path: Option<String>,
    /// Decoder lane.
    pub decoder: DecoderKind,
    /// Decode parameters.
    pub params: DecodeParams,
}

/// Static description and node arena of one octree.
///
/// Node boxes are rebased so the root box starts at the origin; the removed
/// offset is kept in [`offset`](Self::offset).
#[derive(Debug, Clone)]
pub struct OctreeGeometry {
    version: Version,
    octree_dir: String,
    layout: PointLayout,
    scale: f64,
    spacing: f64,
    hierarchy_step_size: u32,
    offset: DVec3,
    bounding_box: Aabb,
    tight_bounding_box: Option<Aabb>,
    projection: Option<String>,
    nodes: Vec<OctreeNode>,
    by_name: HashMap<String, NodeId>,
}

impl OctreeGeometry {
    /// Create a geometry holding only the root node.
    #[must_use]
    pub fn from_metadata(metadata: &CloudMetadata) -> Self {
        let offset = metadata.bounding_box.min;
        let bounding_box = metadata.bounding_box.translated(-offset);
        let root = OctreeNode::new(ROOT_NAME.to_string(), bounding_box, metadata.spacing, None);

        Self {
            version: metadata.version,
            octree_dir: metadata.octree_dir.clone(),
            layout: metadata.point_layout.clone(),
            scale: metadata.scale,
            spacing: metadata.spacing,
            hierarchy_step_size: metadata.hierarchy_step_size.max(1),
            offset,
            bounding_box,
            tight_bounding_box: metadata.tight_bounding_box.map(|b| b.translated(-offset)),
            projection: metadata.projection.clone(),
            nodes: vec![root],
            by_name: HashMap::from([(ROOT_NAME.to_string(), NodeId(0))]),
        }
    }

    /// Format version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Octree directory named in `cloud.js`.
    #[must_use]
    pub fn octree_dir(&self) -> &str {
        &self.octree_dir
    }

    /// Point storage layout.
    #[must_use]
    pub fn layout(&self) -> &PointLayout {
        &self.layout
    }

    /// Root spacing.
    #[must_use]
    pub fn spacing(&self) -> f64 {
        self.spacing
    }

    /// Levels per hierarchy chunk.
    #[must_use]
    pub fn hierarchy_step_size(&self) -> u32 {
        self.hierarchy_step_size
    }

    /// Source-coordinate position of the octree-local origin.
    #[must_use]
    pub fn offset(&self) -> DVec3 {
        self.offset
    }

    /// Root box, octree-local.
    #[must_use]
    pub fn bounding_box(&self) -> Aabb {
        self.bounding_box
    }

    /// Box fitted to all points, octree-local.
    #[must_use]
    pub fn tight_bounding_box(&self) -> Option<Aabb> {
        self.tight_bounding_box
    }

    /// Spatial reference, if any.
    #[must_use]
    pub fn projection(&self) -> Option<&str> {
        self.projection.as_deref()
    }

    /// The root node.
    #[must_use]
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of instantiated nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false; the root exists from construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&OctreeNode> {
        self.nodes.get(id.index())
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut OctreeNode> {
        self.nodes.get_mut(id.index())
    }

    /// Find a node by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    /// Iterate over all instantiated nodes.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &OctreeNode)> {
        self.nodes.iter().zip(0u32..).map(|(node, i)| (NodeId(i), node))
    }

    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = &mut OctreeNode> {
        self.nodes.iter_mut()
    }

    /// Known child slots of `id`, some possibly not yet instantiated.
    #[must_use]
    pub fn children(&self, id: NodeId) -> Vec<ChildSlot> {
        self.node(id)
            .map(|node| node.child_slots().collect())
            .unwrap_or_default()
    }

    /// Ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut cursor = self.node(id).and_then(OctreeNode::parent);
        std::iter::from_fn(move || {
            let current = cursor?;
            cursor = self.node(current).and_then(OctreeNode::parent);
            Some(current)
        })
    }

    /// Instantiated descendants of `id`, depth first.
    #[must_use]
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self
            .node(id)
            .map(|n| n.children.iter().rev().flatten().copied().collect())
            .unwrap_or_default();
        while let Some(current) = stack.pop() {
            out.push(current);
            if let Some(node) = self.node(current) {
                stack.extend(node.children.iter().rev().flatten().copied());
            }
        }
        out
    }

    /// Instantiate child `index` of `parent`, or return it if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if `parent` does not exist or `index` is not an octant.
    pub fn insert_child(&mut self, parent: NodeId, index: u8) -> Result<NodeId> {
        let parent_node = self.node(parent).ok_or_else(|| Error::InvalidData {
            context: "octree node",
            detail: format!("no node with id {}", parent.index()),
        })?;
        let name = name::child_name(&parent_node.name, index)?;
        if let Some(existing) = parent_node.children[usize::from(index)] {
            return Ok(existing);
        }

        let bounding_box = parent_node.bounding_box.child(index);
        let spacing = parent_node.spacing / 2.0;
        let id = NodeId(u32::try_from(self.nodes.len()).map_err(|_| Error::InvalidData {
            context: "octree node",
            detail: "too many nodes".to_string(),
        })?);

        self.nodes
            .push(OctreeNode::new(name.clone(), bounding_box, spacing, Some(parent)));
        self.by_name.insert(name, id);
        if let Some(parent_node) = self.node_mut(parent) {
            parent_node.children[usize::from(index)] = Some(id);
            parent_node.child_mask |= 1 << index;
        }
        Ok(id)
    }

    /// Whether loading `id` must fetch its hierarchy chunk first.
    #[must_use]
    pub fn needs_hierarchy(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(|node| {
            node.level.is_multiple_of(self.hierarchy_step_size) && !node.hierarchy_loaded
        })
    }

    /// Apply a parsed hierarchy chunk rooted at `id`, instantiating the nodes
    /// it describes. Returns the number of newly created nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk does not start at `id` or describes a
    /// node whose parent is unknown.
    pub fn apply_hierarchy(&mut self, id: NodeId, entries: &[HierarchyEntry]) -> Result<usize> {
        let root_name = self.node(id).map(|n| n.name.clone()).unwrap_or_default();
        if entries.first().map(|e| e.name.as_str()) != Some(root_name.as_str()) {
            return Err(Error::InvalidData {
                context: "hierarchy chunk",
                detail: format!("chunk does not start at node '{root_name}'"),
            });
        }

        let before = self.nodes.len();
        for entry in entries {
            let target = if entry.name == root_name {
                id
            } else {
                let (Some(parent_name), Some(index)) =
                    (name::parent_name(&entry.name), name::child_index(&entry.name))
                else {
                    return Err(Error::InvalidData {
                        context: "hierarchy chunk",
                        detail: format!("invalid node name '{}'", entry.name),
                    });
                };
                let parent = self.find(parent_name).ok_or_else(|| Error::InvalidData {
                    context: "hierarchy chunk",
                    detail: format!("node '{}' has no known parent", entry.name),
                })?;
                self.insert_child(parent, index)?
            };

            if let Some(node) = self.node_mut(target) {
                node.child_mask |= entry.child_mask;
                if node.num_points.exact().is_none() {
                    node.num_points = PointCount::Estimated(u64::from(entry.num_points));
                }
            }
        }
        if let Some(node) = self.node_mut(id) {
            node.hierarchy_loaded = true;
        }

        let created = self.nodes.len() - before;
        tracing::debug!(node = %root_name, entries = entries.len(), created, "applied hierarchy");
        Ok(created)
    }

    /// Node file of `id`, relative to the octree directory.
    #[must_use]
    pub fn node_path(&self, id: NodeId) -> Option<String> {
        let node = self.node(id)?;
        let mut path = if self.version.equal_or_higher(HIERARCHY_DIR_VERSION) {
            format!(
                "{}/{}",
                name::hierarchy_path(&node.name, self.hierarchy_step_size),
                node.name
            )
        } else {
            node.name.clone()
        };
        if self.version.equal_or_higher(EXTENSION_VERSION) {
            path.push_str(self.layout.extension());
        }
        Some(path)
    }

    /// Hierarchy chunk file of `id`, relative to the octree directory.
    #[must_use]
    pub fn hierarchy_file(&self, id: NodeId) -> Option<String> {
        let node = self.node(id)?;
        Some(format!(
            "{}/{}.hrc",
            name::hierarchy_path(&node.name, self.hierarchy_step_size),
            node.name
        ))
    }

    /// Move an unloaded node to loading and describe the request.
    ///
    /// Returns `None`, changing nothing, if the node is loading, loaded or
    /// failed, so calling it twice yields exactly one request.
    pub fn begin_load(&mut self, key: NodeKey) -> Option<LoadRequest> {
        let id = key.node;
        let node = self.node(id)?;
        if !matches!(node.state, NodeState::Unloaded) {
            return None;
        }

        let params = DecodeParams {
            name: node.name.clone(),
            layout: self.layout.clone(),
            version: self.version,
            scale: self.scale,
            offset: self.offset,
            bounding_box: node.bounding_box,
            spacing: node.spacing,
            has_children: node.has_children(),
        };
        let node_path = self.node_path(id)?;
        let hierarchy_path = if self.needs_hierarchy(id) {
            self.hierarchy_file(id)
        } else {
            None
        };

        self.node_mut(id)?.state = NodeState::Loading;

        Some(LoadRequest {
            key,
            generation: 0,
            octree_dir: self.octree_dir.clone(),
            node_path,
            hierarchy_path,
            decoder: self.layout.decoder_kind(),
            params,
        })
    }
}
