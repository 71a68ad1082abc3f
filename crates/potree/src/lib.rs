//! Stream Potree point clouds out of core.
//!
//! This crate keeps an in-memory octree per point cloud, decides every frame
//! which nodes to render and load under a global point budget, and fetches
//! and decodes node files in the background.
//!
//! # Design principles
//!
//! - **Frame-driven**: all scene mutation happens in [`Scheduler::update`]
//!   and [`Scheduler::apply_completion`], on the caller's thread
//! - **Runtime-agnostic**: background work goes through a [`Spawner`]
//! - **Sync decoding**: decoders are synchronous and pooled per format
//!
//! # Example
//!
//! ```ignore
//! use potree::{Client, Scene, Scheduler, StreamingConfig, OctreeGeometry};
//!
//! let client = Client::new("https://example.com/cloud/cloud.js")?;
//! let metadata = client.fetch_cloud().await?;
//!
//! let mut scene = Scene::new();
//! let octree = scene.add("cloud", OctreeGeometry::from_metadata(&metadata));
//!
//! let mut scheduler = Scheduler::new(StreamingConfig::default());
//! let (tx, rx) = potree::completion_channel();
//! let mut loader = StreamingLoader::new(potree::byte_layout_decoders(4), spawner, tx);
//! loader.add_source(octree, Arc::new(client));
//!
//! loop {
//!     scheduler.drain_completions(&mut scene, &rx);
//!     let report = scheduler.update(&view, &mut scene, &mut loader);
//!     for node in scene.visible_nodes() { /* draw */ }
//! }
//! ```

pub mod cache;
mod client;
mod config;
mod error;
mod geometry;
mod loader;
pub mod lru;
mod node;
mod octree;
mod scheduler;
pub mod types;
mod worker_pool;

pub use cache::{Cache, CacheStats, MemoryCache, NoCache};
pub use client::{Client, UrlSigner};
pub use config::StreamingConfig;
pub use error::{Error, Result};
pub use geometry::{LoadRequest, OctreeGeometry};
pub use loader::{
    BoxedTask, DecoderPool, LoadCompletion, LoadDispatch, LoadedNode, Spawner, StreamingLoader,
    byte_layout_decoders, completion_channel,
};
pub use lru::LruCache;
pub use node::{
    ChildSlot, Cullable, Loadable, NodeId, NodeKey, NodePayload, NodeState, OctreeId, OctreeNode,
    PointCount, Renderable,
};
pub use octree::{PointCloudOctree, Scene, VisibleNode};
pub use scheduler::{FrameReport, LoadEvent, Scheduler, SchedulerState, StopReason};
pub use types::{CameraView, Frustum, LodMetrics};
pub use worker_pool::{Acquire, PendingWorker, PoolStats, WorkerPool};

// Re-export format types for convenience.
pub use potree_format::{Aabb, CloudMetadata, DecoderKind, HierarchyEntry, Version};
