//! Per-frame visibility, LOD and residency decisions.
//!
//! Each frame, [`Scheduler::update`] walks the visible nodes of every octree
//! in priority order (largest projected size first) until the point budget
//! is reached, requests unloaded nodes up to the concurrent-load cap and
//! evicts least recently used nodes that are not pinned by the current
//! selection. Load results are applied between frames by
//! [`Scheduler::apply_completion`] or [`Scheduler::drain_completions`].

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::config::StreamingConfig;
use crate::error::Error;
use crate::loader::{LoadCompletion, LoadDispatch};
use crate::lru::LruCache;
use crate::node::{Cullable, Loadable, NodeId, NodeKey, NodePayload, NodeState, OctreeNode};
use crate::octree::{PointCloudOctree, Scene, VisibleEntry};
use crate::types::CameraView;

/// Counters owned by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerState {
    /// Number of the last frame, starting at 1.
    pub frame: u64,
    /// Loads dispatched and not yet completed.
    pub in_flight: usize,
    /// Incremented by [`Scheduler::reset`]; completions of older requests
    /// are ignored.
    pub generation: u64,
}

/// Why traversal ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every candidate was visited.
    QueueEmpty,
    /// The point budget was reached; remaining candidates were deferred.
    BudgetExhausted,
}

/// Statistics of one [`Scheduler::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    /// Frame number.
    pub frame: u64,
    /// Nodes selected for rendering, loaded or not.
    pub visible_nodes: usize,
    /// Points charged against the budget.
    pub visible_points: u64,
    /// Loads dispatched this frame.
    pub requested: usize,
    /// Visible unloaded nodes not requested because of the load cap.
    pub deferred_loads: usize,
    /// Nodes rejected by the frustum.
    pub culled: usize,
    /// Why traversal ended.
    pub stop: StopReason,
    /// Nodes unloaded by the eviction sweep.
    pub evicted: usize,
    /// Points resident after eviction.
    pub resident_points: u64,
    /// Loads in flight after dispatch.
    pub in_flight: usize,
}

/// Result of applying one load completion.
#[derive(Debug)]
pub enum LoadEvent {
    /// The node is now resident.
    Loaded {
        /// The node.
        key: NodeKey,
        /// Exact point count.
        num_points: u64,
    },
    /// The load failed; the node stays failed until [`Scheduler::retry`].
    Failed {
        /// The node.
        key: NodeKey,
        /// What went wrong.
        error: Error,
    },
    /// The result was dropped: its parent was evicted meanwhile, the node
    /// was not loading, or the request predates a reset.
    Discarded {
        /// The node.
        key: NodeKey,
    },
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    priority: f64,
    distance: f64,
    seq: u64,
    key: NodeKey,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    // Max-heap order: larger projected size, then nearer, then pushed earlier.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.distance.total_cmp(&self.distance))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Drives streaming for a [`Scene`].
#[derive(Debug)]
pub struct Scheduler {
    config: StreamingConfig,
    state: SchedulerState,
    lru: LruCache<NodeKey>,
}

impl Scheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new(config: StreamingConfig) -> Self {
        Self {
            config,
            state: SchedulerState::default(),
            lru: LruCache::new(),
        }
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Frame and load counters.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Resident nodes in recency order.
    #[must_use]
    pub fn lru(&self) -> &LruCache<NodeKey> {
        &self.lru
    }

    fn candidate(
        view: &CameraView,
        octree: &PointCloudOctree,
        id: NodeId,
        node: &OctreeNode,
        seq: &mut u64,
    ) -> Candidate {
        let (center, radius) = octree.bounding_sphere(node);
        *seq += 1;
        Candidate {
            priority: view.lod.projected_size(center, radius),
            distance: view.lod.distance(center),
            seq: *seq,
            key: octree.key(id),
        }
    }

    /// Run one frame: select visible nodes, request loads and evict.
    pub fn update<D: LoadDispatch + ?Sized>(
        &mut self,
        view: &CameraView,
        scene: &mut Scene,
        dispatch: &mut D,
    ) -> FrameReport {
        self.state.frame += 1;
        let frame = self.state.frame;
        let budget = self.config.point_budget;

        scene.clear_visible();

        let mut seq = 0;
        let mut heap = BinaryHeap::new();
        for octree in scene.iter() {
            let root = octree.geometry().root();
            if let Some(node) = octree.node(root) {
                heap.push(Self::candidate(view, octree, root, node, &mut seq));
            }
        }

        let mut running: u64 = 0;
        let mut visible = Vec::new();
        let mut pending = Vec::new();
        let mut culled = 0;
        let mut stop = StopReason::QueueEmpty;

        while let Some(candidate) = heap.pop() {
            if running >= budget {
                stop = StopReason::BudgetExhausted;
                break;
            }

            let key = candidate.key;
            let Some(octree) = scene.get(key.octree) else {
                continue;
            };
            let Some(node) = octree.node(key.node) else {
                continue;
            };
            if node.is_failed() || self.config.max_level.is_some_and(|max| node.level() > max) {
                continue;
            }
            if !view.frustum.intersects_aabb(&node.world_box(octree.position())) {
                culled += 1;
                continue;
            }

            // The first node of a frame is admitted even if it alone
            // exceeds the budget.
            let points = node.num_points().budget_points();
            if running > 0 && running.saturating_add(points) > budget {
                stop = StopReason::BudgetExhausted;
                break;
            }
            running = running.saturating_add(points);

            let loaded = node.is_loaded();
            if loaded && running < budget {
                for slot in node.child_slots() {
                    let Some(child_id) = slot.node else {
                        continue;
                    };
                    let Some(child) = octree.node(child_id) else {
                        continue;
                    };
                    if child.is_failed() {
                        continue;
                    }
                    let child = Self::candidate(view, octree, child_id, child, &mut seq);
                    if child.priority >= self.config.min_node_pixel_size {
                        heap.push(child);
                    }
                }
            }
            let unloaded = matches!(node.state(), NodeState::Unloaded);

            if let Some(octree) = scene.get_mut(key.octree) {
                octree.visible.push(VisibleEntry {
                    node: key.node,
                    projected_size: candidate.priority,
                });
                octree.visible_points += points;
            }
            if let Some(node) = scene.node_mut(key) {
                node.last_visible_frame = Some(frame);
            }
            scene.visit_order.push(key);
            visible.push(key);

            if loaded {
                self.lru.touch(key);
            } else if unloaded {
                pending.push(key);
            }
        }

        let (requested, deferred_loads) = self.dispatch_loads(scene, &pending, dispatch);
        let evicted = self.evict(scene, &visible);

        let report = FrameReport {
            frame,
            visible_nodes: visible.len(),
            visible_points: running,
            requested,
            deferred_loads,
            culled,
            stop,
            evicted,
            resident_points: self.lru.num_points(),
            in_flight: self.state.in_flight,
        };
        tracing::trace!(?report, "frame updated");
        report
    }

    fn dispatch_loads<D: LoadDispatch + ?Sized>(
        &mut self,
        scene: &mut Scene,
        pending: &[NodeKey],
        dispatch: &mut D,
    ) -> (usize, usize) {
        let mut requested = 0;
        let mut deferred = 0;

        for &key in pending {
            if self.state.in_flight >= self.config.max_concurrent_loads {
                deferred += 1;
                continue;
            }
            if !parent_loaded(scene, key) {
                continue;
            }
            let Some(octree) = scene.get_mut(key.octree) else {
                continue;
            };
            if let Some(mut request) = octree.begin_load(key.node) {
                request.generation = self.state.generation;
                self.state.in_flight += 1;
                requested += 1;
                dispatch.dispatch(request);
            }
        }

        (requested, deferred)
    }

    /// Evict until the resident budget holds, sparing visible nodes and
    /// their ancestors. Returns the number of nodes unloaded.
    fn evict(&mut self, scene: &mut Scene, visible: &[NodeKey]) -> usize {
        let limit = self.config.resident_limit();
        if self.lru.num_points() <= limit {
            return 0;
        }

        let mut pinned = HashSet::new();
        for &key in visible {
            pinned.insert(key);
            if let Some(octree) = scene.get(key.octree) {
                for ancestor in octree.geometry().ancestors(key.node) {
                    if !pinned.insert(octree.key(ancestor)) {
                        break;
                    }
                }
            }
        }

        let mut evicted = 0;
        while self.lru.num_points() > limit {
            let Some((key, _)) = self.lru.pop_least_recent(|k| pinned.contains(&k)) else {
                tracing::debug!(
                    resident = self.lru.num_points(),
                    limit,
                    "every resident node is pinned, accepting overrun"
                );
                break;
            };
            evicted += self.unload_subtree(scene, key);
        }
        evicted
    }

    /// Unload `key` and every loaded descendant. Returns the number of nodes
    /// unloaded.
    fn unload_subtree(&mut self, scene: &mut Scene, key: NodeKey) -> usize {
        let Some(octree) = scene.get_mut(key.octree) else {
            return 0;
        };
        let geometry = octree.geometry_mut();

        let mut ids = vec![key.node];
        ids.extend(geometry.descendants(key.node));

        let mut unloaded = 0;
        for id in ids {
            let Some(node) = geometry.node_mut(id) else {
                continue;
            };
            if let Some(points) = node.unload() {
                tracing::debug!(node = %node.name(), points, "evicted");
                self.lru.remove(NodeKey::new(key.octree, id));
                unloaded += 1;
            }
        }
        unloaded
    }

    /// Apply one load result.
    pub fn apply_completion(&mut self, scene: &mut Scene, completion: LoadCompletion) -> LoadEvent {
        let LoadCompletion {
            key,
            generation,
            result,
        } = completion;

        if generation != self.state.generation {
            tracing::debug!(?key, generation, "ignoring completion from before reset");
            return LoadEvent::Discarded { key };
        }
        self.state.in_flight = self.state.in_flight.saturating_sub(1);

        let Some(octree) = scene.get_mut(key.octree) else {
            tracing::warn!(?key, "completion for unknown octree");
            return LoadEvent::Discarded { key };
        };
        let geometry = octree.geometry_mut();
        if !geometry.node(key.node).is_some_and(OctreeNode::is_loading) {
            tracing::warn!(?key, "completion for node that is not loading");
            return LoadEvent::Discarded { key };
        }

        let loaded = match result {
            Ok(loaded) => loaded,
            Err(error) => return fail(geometry.node_mut(key.node), key, error),
        };
        if let Some(entries) = &loaded.hierarchy
            && let Err(error) = geometry.apply_hierarchy(key.node, entries)
        {
            return fail(geometry.node_mut(key.node), key, error);
        }

        let parent_loaded = geometry
            .node(key.node)
            .and_then(OctreeNode::parent)
            .is_none_or(|parent| geometry.node(parent).is_some_and(|p| p.is_loaded()));
        let Some(node) = geometry.node_mut(key.node) else {
            return LoadEvent::Discarded { key };
        };

        if !parent_loaded {
            tracing::warn!(node = %node.name(), "parent evicted while loading, discarding");
            node.state = NodeState::Unloaded;
            return LoadEvent::Discarded { key };
        }

        let num_points = loaded.decoded.num_points;
        node.set_loaded(NodePayload::from(loaded.decoded), num_points);
        self.lru.insert(key, num_points);
        tracing::debug!(node = %node.name(), num_points, "loaded");

        LoadEvent::Loaded { key, num_points }
    }

    /// Apply every completion waiting on `rx`.
    pub fn drain_completions(
        &mut self,
        scene: &mut Scene,
        rx: &async_channel::Receiver<LoadCompletion>,
    ) -> Vec<LoadEvent> {
        let mut events = Vec::new();
        while let Ok(completion) = rx.try_recv() {
            events.push(self.apply_completion(scene, completion));
        }
        events
    }

    /// Make a failed node requestable again. Returns `false` if it was not
    /// failed.
    pub fn retry(&mut self, scene: &mut Scene, key: NodeKey) -> bool {
        match scene.node_mut(key) {
            Some(node) if node.is_failed() => {
                node.state = NodeState::Unloaded;
                true
            }
            _ => false,
        }
    }

    /// Unload a node and its loaded descendants.
    ///
    /// Refused, returning `false`, if the node is not loaded or it or a
    /// descendant was visible in the current frame.
    pub fn unload_node(&mut self, scene: &mut Scene, key: NodeKey) -> bool {
        let frame = Some(self.state.frame);
        let Some(octree) = scene.get(key.octree) else {
            return false;
        };
        let geometry = octree.geometry();
        let Some(node) = geometry.node(key.node) else {
            return false;
        };
        if !node.is_loaded() {
            return false;
        }

        let visible_now = std::iter::once(key.node)
            .chain(geometry.descendants(key.node))
            .any(|id| geometry.node(id).is_some_and(|n| n.last_visible_frame == frame));
        if visible_now {
            return false;
        }

        self.unload_subtree(scene, key) > 0
    }

    /// Drop all resident data and start over. In-flight loads are ignored
    /// when they complete.
    pub fn reset(&mut self, scene: &mut Scene) {
        scene.clear_visible();
        for octree in scene.iter_mut() {
            for node in octree.geometry_mut().nodes_mut() {
                node.state = NodeState::Unloaded;
                node.last_visible_frame = None;
            }
        }
        self.lru.clear();
        self.state = SchedulerState {
            frame: 0,
            in_flight: 0,
            generation: self.state.generation + 1,
        };
        tracing::info!(generation = self.state.generation, "streaming state reset");
    }
}

fn parent_loaded(scene: &Scene, key: NodeKey) -> bool {
    let Some(octree) = scene.get(key.octree) else {
        return false;
    };
    octree
        .node(key.node)
        .and_then(OctreeNode::parent)
        .is_none_or(|parent| octree.node(parent).is_some_and(|p| p.is_loaded()))
}

fn fail(node: Option<&mut OctreeNode>, key: NodeKey, error: Error) -> LoadEvent {
    if let Some(node) = node {
        tracing::warn!(node = %node.name(), %error, "load failed");
        node.state = NodeState::Failed;
    }
    LoadEvent::Failed { key, error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{LoadRequest, OctreeGeometry, tests::metadata};
    use crate::loader::{LoadedNode, completion_channel};
    use crate::node::{OctreeId, PointCount};
    use glam::DVec3;
    use potree_format::{DecodedNode, HierarchyEntry, Version};
    use std::f64::consts::FRAC_PI_3;

    #[derive(Default)]
    struct Recorder(Vec<LoadRequest>);

    impl LoadDispatch for Recorder {
        fn dispatch(&mut self, request: LoadRequest) {
            self.0.push(request);
        }
    }

    fn config() -> StreamingConfig {
        StreamingConfig {
            min_node_pixel_size: 1.0,
            ..StreamingConfig::default()
        }
    }

    /// `n` identical octrees spanning 0..64 on every axis.
    fn scene(n: usize) -> (Scene, Vec<OctreeId>) {
        let mut scene = Scene::new();
        let ids = (0..n)
            .map(|i| {
                let id = scene.add(
                    format!("cloud{i}"),
                    OctreeGeometry::from_metadata(&metadata(Version::new(1, 7))),
                );
                scene.get_mut(id).unwrap().set_position(DVec3::ZERO);
                id
            })
            .collect();
        (scene, ids)
    }

    fn view() -> CameraView {
        CameraView::look_at(
            DVec3::new(32.0, -200.0, 32.0),
            DVec3::splat(32.0),
            FRAC_PI_3,
            1.0,
            1000.0,
        )
    }

    fn view_away() -> CameraView {
        CameraView::look_at(
            DVec3::new(32.0, -200.0, 32.0),
            DVec3::new(32.0, -400.0, 32.0),
            FRAC_PI_3,
            1.0,
            1000.0,
        )
    }

    fn root_key(scene: &Scene, id: OctreeId) -> NodeKey {
        let octree = scene.get(id).unwrap();
        octree.key(octree.geometry().root())
    }

    fn child_key(scene: &Scene, id: OctreeId, name: &str) -> NodeKey {
        let octree = scene.get(id).unwrap();
        octree.key(octree.geometry().find(name).unwrap())
    }

    /// Hierarchy chunk of the root with one leaf child per set bit.
    fn root_chunk(mask: u8, root_points: u32, child_points: u32) -> Vec<HierarchyEntry> {
        let mut entries = vec![HierarchyEntry {
            name: "r".to_string(),
            child_mask: mask,
            num_points: root_points,
        }];
        for i in 0..8 {
            if mask & (1 << i) != 0 {
                entries.push(HierarchyEntry {
                    name: format!("r{i}"),
                    child_mask: 0,
                    num_points: child_points,
                });
            }
        }
        entries
    }

    fn success(
        request: &LoadRequest,
        num_points: u64,
        hierarchy: Option<Vec<HierarchyEntry>>,
    ) -> LoadCompletion {
        LoadCompletion {
            key: request.key,
            generation: request.generation,
            result: Ok(LoadedNode {
                decoded: DecodedNode {
                    buffers: Vec::new(),
                    num_points,
                    tight_bounding_box: request.params.bounding_box,
                    mean: request.params.bounding_box.center(),
                    estimated_spacing: None,
                },
                hierarchy,
            }),
        }
    }

    fn visit_order(scene: &Scene) -> Vec<NodeKey> {
        scene.visit_order().to_vec()
    }

    /// Load the root of `id` with the given chunk and return its key.
    fn load_root(
        scheduler: &mut Scheduler,
        scene: &mut Scene,
        id: OctreeId,
        chunk: Vec<HierarchyEntry>,
    ) -> NodeKey {
        let mut recorder = Recorder::default();
        scheduler.update(&view(), scene, &mut recorder);
        let request = recorder
            .0
            .iter()
            .find(|r| r.key.octree == id)
            .expect("root requested");
        let points = u64::from(chunk[0].num_points);
        let event = scheduler.apply_completion(scene, success(request, points, Some(chunk)));
        assert!(matches!(event, LoadEvent::Loaded { .. }));
        request.key
    }

    #[test]
    fn test_first_frame_requests_root() {
        let (mut scene, ids) = scene(1);
        let mut scheduler = Scheduler::new(config());
        let mut recorder = Recorder::default();

        let report = scheduler.update(&view(), &mut scene, &mut recorder);
        assert_eq!(report.frame, 1);
        assert_eq!(report.visible_nodes, 1);
        assert_eq!(report.requested, 1);
        assert_eq!(report.in_flight, 1);
        assert_eq!(report.stop, StopReason::QueueEmpty);

        let request = &recorder.0[0];
        assert_eq!(request.key, root_key(&scene, ids[0]));
        assert_eq!(request.hierarchy_path.as_deref(), Some("r/r.hrc"));
        assert!(scene.node(request.key).unwrap().is_loading());
    }

    #[test]
    fn test_repeated_frames_are_idempotent() {
        let (mut scene, _) = scene(1);
        let mut scheduler = Scheduler::new(config());
        let mut recorder = Recorder::default();

        scheduler.update(&view(), &mut scene, &mut recorder);
        let second = scheduler.update(&view(), &mut scene, &mut recorder);
        assert_eq!(second.requested, 0);
        assert_eq!(second.visible_nodes, 1);
        assert_eq!(recorder.0.len(), 1, "one transport request per node");
        assert_eq!(scheduler.state().in_flight, 1);
    }

    #[test]
    fn test_same_camera_same_order() {
        let (mut scene, ids) = scene(2);
        let mut scheduler = Scheduler::new(config());
        load_root(&mut scheduler, &mut scene, ids[0], root_chunk(0xFF, 100, 10));
        let mut recorder = Recorder::default();

        scheduler.update(&view(), &mut scene, &mut recorder);
        let first = visit_order(&scene);
        scheduler.update(&view(), &mut scene, &mut recorder);
        let second = visit_order(&scene);

        assert_eq!(first.len(), 10);
        assert_eq!(first, second);
    }

    #[test]
    fn test_ties_across_octrees_follow_octree_then_child_order() {
        let (mut scene, ids) = scene(2);
        let mut scheduler = Scheduler::new(config());
        let mut recorder = Recorder::default();
        scheduler.update(&view(), &mut scene, &mut recorder);
        assert_eq!(recorder.0.len(), 2);
        for request in &recorder.0 {
            let completion = success(request, 100, Some(root_chunk(0xFF, 100, 10)));
            let event = scheduler.apply_completion(&mut scene, completion);
            assert!(matches!(event, LoadEvent::Loaded { .. }));
        }

        let report = scheduler.update(&view(), &mut scene, &mut recorder);
        assert_eq!(report.visible_nodes, 18);

        // Both clouds sit at the same place, so every candidate ties with its
        // twin in the other cloud. Children facing the camera (bit 1 clear)
        // tie with each other on size and distance and keep index order.
        let mut expected = vec![root_key(&scene, ids[0]), root_key(&scene, ids[1])];
        for group in [["r0", "r1", "r4", "r5"], ["r2", "r3", "r6", "r7"]] {
            for &id in &ids {
                expected.extend(group.iter().map(|name| child_key(&scene, id, name)));
            }
        }
        assert_eq!(scene.visit_order(), expected.as_slice());

        // The renderer view groups the same nodes per cloud.
        let grouped: Vec<NodeKey> = scene.visible_nodes().map(|v| v.key).collect();
        assert_eq!(grouped.len(), 18);
        assert!(grouped[..9].iter().all(|k| k.octree == ids[0]));
    }

    #[test]
    fn test_budget_stops_traversal() {
        let (mut scene, ids) = scene(1);
        let mut scheduler = Scheduler::new(StreamingConfig {
            point_budget: 1000,
            ..config()
        });
        load_root(&mut scheduler, &mut scene, ids[0], root_chunk(0xFF, 600, 300));

        let mut recorder = Recorder::default();
        let report = scheduler.update(&view(), &mut scene, &mut recorder);
        assert_eq!(report.stop, StopReason::BudgetExhausted);
        assert_eq!(report.visible_nodes, 2);
        assert_eq!(report.visible_points, 900);
        assert!(report.visible_points <= 1000);
        assert_eq!(report.requested, 1);
        assert_eq!(scene.get(ids[0]).unwrap().visible_points(), 900);
    }

    #[test]
    fn test_oversized_root_is_requested_but_not_refined() {
        let (mut scene, ids) = scene(1);
        let root = root_key(&scene, ids[0]);
        scene
            .get_mut(ids[0])
            .unwrap()
            .geometry_mut()
            .apply_hierarchy(root.node, &root_chunk(0xFF, 2_000_000, 10))
            .unwrap();
        assert_eq!(
            scene.node(root).unwrap().num_points(),
            PointCount::Estimated(2_000_000)
        );

        let mut scheduler = Scheduler::new(StreamingConfig {
            point_budget: 1_000_000,
            ..config()
        });
        let mut recorder = Recorder::default();
        let report = scheduler.update(&view(), &mut scene, &mut recorder);
        assert_eq!(report.requested, 1);
        assert_eq!(report.visible_nodes, 1);
        assert_eq!(report.visible_points, 2_000_000);
        // Already applied, so only the node file is fetched.
        assert_eq!(recorder.0[0].hierarchy_path, None);

        let completion = success(&recorder.0[0], 2_000_000, None);
        let event = scheduler.apply_completion(&mut scene, completion);
        assert!(matches!(event, LoadEvent::Loaded { num_points: 2_000_000, .. }));

        let report = scheduler.update(&view(), &mut scene, &mut recorder);
        assert_eq!(report.visible_nodes, 1);
        assert_eq!(report.requested, 0);
        assert_eq!(scene.get(ids[0]).unwrap().drawable_count(), 1);
        // Over the resident budget, but the root is visible.
        assert_eq!(report.evicted, 0);
        assert_eq!(report.resident_points, 2_000_000);
    }

    #[test]
    fn test_load_cap_defers_requests() {
        let (mut scene, ids) = scene(2);
        let mut scheduler = Scheduler::new(config());

        let mut recorder = Recorder::default();
        let report = scheduler.update(&view(), &mut scene, &mut recorder);
        assert_eq!(report.requested, 2);
        let roots = std::mem::take(&mut recorder.0);
        let first = success(&roots[0], 100, Some(root_chunk(0xFF, 100, 10)));
        let second = success(&roots[1], 100, Some(root_chunk(0b11, 100, 10)));
        scheduler.apply_completion(&mut scene, first);
        scheduler.apply_completion(&mut scene, second);
        assert_eq!(scheduler.state().in_flight, 0);

        // Ten never-loaded children become visible at once.
        let report = scheduler.update(&view(), &mut scene, &mut recorder);
        assert_eq!(report.visible_nodes, 12);
        assert_eq!(report.requested, 4);
        assert_eq!(report.deferred_loads, 6);
        assert_eq!(report.in_flight, 4);

        let report = scheduler.update(&view(), &mut scene, &mut recorder);
        assert_eq!(report.requested, 0);
        assert_eq!(report.deferred_loads, 6);

        let first_batch = std::mem::take(&mut recorder.0);
        for request in &first_batch[..2] {
            scheduler.apply_completion(&mut scene, success(request, 10, None));
        }
        let report = scheduler.update(&view(), &mut scene, &mut recorder);
        assert_eq!(report.requested, 2);
        assert_eq!(report.deferred_loads, 4);
        assert!(report.in_flight <= 4);
        assert!(scene.node(child_key(&scene, ids[1], "r1")).is_some());
    }

    #[test]
    fn test_children_only_requested_under_loaded_parent() {
        let (mut scene, ids) = scene(1);
        let mut scheduler = Scheduler::new(config());
        load_root(&mut scheduler, &mut scene, ids[0], root_chunk(0xFF, 100, 10));

        let mut recorder = Recorder::default();
        scheduler.update(&view(), &mut scene, &mut recorder);
        for request in &recorder.0 {
            let parent = scene.node(request.key).unwrap().parent().unwrap();
            let octree = scene.get(request.key.octree).unwrap();
            assert!(octree.node(parent).unwrap().is_loaded());
        }
    }

    #[test]
    fn test_completion_after_parent_eviction_is_discarded() {
        let (mut scene, ids) = scene(1);
        let mut scheduler = Scheduler::new(StreamingConfig {
            resident_point_budget: Some(0),
            ..config()
        });
        let root = load_root(&mut scheduler, &mut scene, ids[0], root_chunk(0b1, 100, 10));

        let mut recorder = Recorder::default();
        let report = scheduler.update(&view(), &mut scene, &mut recorder);
        assert_eq!(report.requested, 1);
        assert_eq!(report.evicted, 0, "visible root is pinned");
        let child_request = recorder.0.pop().unwrap();

        // Nothing visible: the root is evicted while its child is loading.
        let report = scheduler.update(&view_away(), &mut scene, &mut recorder);
        assert_eq!(report.visible_nodes, 0);
        assert_eq!(report.culled, 1);
        assert_eq!(report.evicted, 1);
        assert!(!scene.node(root).unwrap().is_loaded());

        let event = scheduler.apply_completion(&mut scene, success(&child_request, 10, None));
        assert!(matches!(event, LoadEvent::Discarded { .. }));
        let child = scene.node(child_request.key).unwrap();
        assert_eq!(child.state(), &NodeState::Unloaded);
        assert!(!scheduler.lru().contains(child_request.key));
        assert_eq!(scheduler.state().in_flight, 0);
    }

    #[test]
    fn test_pinned_parent_is_not_evicted() {
        let (mut scene, ids) = scene(1);
        let mut scheduler = Scheduler::new(StreamingConfig {
            resident_point_budget: Some(0),
            ..config()
        });
        let root = load_root(&mut scheduler, &mut scene, ids[0], root_chunk(0b1, 100, 50));

        let mut recorder = Recorder::default();
        scheduler.update(&view(), &mut scene, &mut recorder);
        let leaf = recorder.0[0].key;
        scheduler.apply_completion(&mut scene, success(&recorder.0[0], 50, None));

        let report = scheduler.update(&view(), &mut scene, &mut recorder);
        assert_eq!(report.visible_nodes, 2);
        assert_eq!(report.evicted, 0);
        assert_eq!(report.resident_points, 150, "overrun accepted");
        assert!(!scheduler.unload_node(&mut scene, root));
        assert!(!scheduler.unload_node(&mut scene, leaf));
        assert!(scene.node(root).unwrap().is_loaded());

        let report = scheduler.update(&view_away(), &mut scene, &mut recorder);
        assert_eq!(report.evicted, 2);
        assert_eq!(report.resident_points, 0);
        assert!(!scene.node(leaf).unwrap().is_loaded());
    }

    #[test]
    fn test_unload_node_takes_subtree() {
        let (mut scene, ids) = scene(1);
        let mut scheduler = Scheduler::new(config());
        let root = load_root(&mut scheduler, &mut scene, ids[0], root_chunk(0b1, 100, 50));
        let mut recorder = Recorder::default();
        scheduler.update(&view(), &mut scene, &mut recorder);
        scheduler.apply_completion(&mut scene, success(&recorder.0[0], 50, None));

        scheduler.update(&view_away(), &mut scene, &mut recorder);
        assert_eq!(scheduler.lru().len(), 2);
        assert!(scheduler.unload_node(&mut scene, root));
        assert!(scheduler.lru().is_empty());
        assert!(!scheduler.unload_node(&mut scene, root), "already unloaded");
    }

    #[test]
    fn test_failure_is_terminal_until_retry() {
        let (mut scene, ids) = scene(2);
        let mut scheduler = Scheduler::new(config());
        let mut recorder = Recorder::default();
        scheduler.update(&view(), &mut scene, &mut recorder);

        let broken = &recorder.0[0];
        let event = scheduler.apply_completion(
            &mut scene,
            LoadCompletion {
                key: broken.key,
                generation: broken.generation,
                result: Err(Error::HttpStatus {
                    url: "http://host/data/r/r.bin".to_string(),
                    status: 404,
                }),
            },
        );
        let LoadEvent::Failed { key, error } = event else {
            panic!("expected failure");
        };
        assert_eq!(key, broken.key);
        assert!(error.is_transport());
        let sibling = success(&recorder.0[1], 100, Some(root_chunk(0, 100, 0)));
        scheduler.apply_completion(&mut scene, sibling);
        assert_eq!(scheduler.state().in_flight, 0);

        let mut later = Recorder::default();
        let report = scheduler.update(&view(), &mut scene, &mut later);
        assert_eq!(report.requested, 0);
        assert_eq!(report.visible_nodes, 1, "sibling octree still renders");
        assert_eq!(scene.get(ids[1]).unwrap().drawable_count(), 1);

        assert!(scheduler.retry(&mut scene, key));
        assert!(!scheduler.retry(&mut scene, key));
        let report = scheduler.update(&view(), &mut scene, &mut later);
        assert_eq!(report.requested, 1);
    }

    #[test]
    fn test_decode_failure_in_hierarchy_marks_failed() {
        let (mut scene, _) = scene(1);
        let mut scheduler = Scheduler::new(config());
        let mut recorder = Recorder::default();
        scheduler.update(&view(), &mut scene, &mut recorder);

        let bad_chunk = vec![HierarchyEntry {
            name: "r5".to_string(),
            child_mask: 0,
            num_points: 1,
        }];
        let event =
            scheduler.apply_completion(&mut scene, success(&recorder.0[0], 10, Some(bad_chunk)));
        assert!(matches!(event, LoadEvent::Failed { .. }));
        assert!(scene.node(recorder.0[0].key).unwrap().is_failed());
    }

    #[test]
    fn test_small_nodes_are_not_refined() {
        let (mut scene, ids) = scene(1);
        let mut scheduler = Scheduler::new(StreamingConfig {
            min_node_pixel_size: 1.0e6,
            ..config()
        });
        load_root(&mut scheduler, &mut scene, ids[0], root_chunk(0xFF, 100, 10));

        let mut recorder = Recorder::default();
        let report = scheduler.update(&view(), &mut scene, &mut recorder);
        assert_eq!(report.visible_nodes, 1);
        assert_eq!(report.requested, 0);
    }

    #[test]
    fn test_max_level_clamps_depth() {
        let (mut scene, ids) = scene(1);
        let mut scheduler = Scheduler::new(StreamingConfig {
            max_level: Some(0),
            ..config()
        });
        load_root(&mut scheduler, &mut scene, ids[0], root_chunk(0xFF, 100, 10));

        let mut recorder = Recorder::default();
        let report = scheduler.update(&view(), &mut scene, &mut recorder);
        assert_eq!(report.visible_nodes, 1);
        assert_eq!(report.requested, 0);
    }

    #[test]
    fn test_nearer_child_visited_first() {
        let (mut scene, ids) = scene(1);
        let mut scheduler = Scheduler::new(config());
        load_root(&mut scheduler, &mut scene, ids[0], root_chunk(0xFF, 100, 10));

        let mut recorder = Recorder::default();
        scheduler.update(&view(), &mut scene, &mut recorder);
        let order = visit_order(&scene);
        // The camera sits at low y: children with bit 1 clear (y lower half)
        // project larger than their bit 1 counterparts.
        let pos = |name: &str| order.iter().position(|&k| k == child_key(&scene, ids[0], name));
        assert!(pos("r0") < pos("r2"));
        assert!(pos("r5") < pos("r7"));
    }

    #[test]
    fn test_reset_ignores_stale_completions() {
        let (mut scene, ids) = scene(1);
        let mut scheduler = Scheduler::new(config());
        let mut recorder = Recorder::default();
        scheduler.update(&view(), &mut scene, &mut recorder);
        let stale = recorder.0.pop().unwrap();

        scheduler.reset(&mut scene);
        assert_eq!(scheduler.state().frame, 0);
        assert_eq!(scheduler.state().in_flight, 0);
        let root = root_key(&scene, ids[0]);
        assert_eq!(scene.node(root).unwrap().state(), &NodeState::Unloaded);

        let report = scheduler.update(&view(), &mut scene, &mut recorder);
        assert_eq!(report.requested, 1);

        let event = scheduler.apply_completion(&mut scene, success(&stale, 100, None));
        assert!(matches!(event, LoadEvent::Discarded { .. }));
        assert_eq!(scheduler.state().in_flight, 1);
        assert!(scene.node(root).unwrap().is_loading());
    }

    #[test]
    fn test_drain_completions() {
        let (mut scene, _) = scene(1);
        let mut scheduler = Scheduler::new(config());
        let mut recorder = Recorder::default();
        scheduler.update(&view(), &mut scene, &mut recorder);

        let (tx, rx) = completion_channel();
        tx.try_send(success(&recorder.0[0], 100, Some(root_chunk(0, 100, 0))))
            .unwrap();
        let events = scheduler.drain_completions(&mut scene, &rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], LoadEvent::Loaded { num_points: 100, .. }));
        assert!(scheduler.drain_completions(&mut scene, &rx).is_empty());
        assert_eq!(scheduler.lru().num_points(), 100);
    }
}
