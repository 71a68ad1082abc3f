//! The asynchronous load pipeline: fetch, decode, report.
//!
//! The scheduler hands [`LoadRequest`]s to a [`LoadDispatch`]. The
//! [`StreamingLoader`] runs each one as a background task that fetches the
//! hierarchy chunk (if any) and node file, decodes on a pooled worker and
//! sends a [`LoadCompletion`] back over a channel. The scheduler applies
//! completions between frames.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use potree_format::{
    ByteLayoutDecoder, DecodeRequest, DecodedNode, Decoder, DecoderKind, HierarchyEntry,
    parse_hierarchy,
};

use crate::cache::Cache;
use crate::client::Client;
use crate::error::{Error, Result};
use crate::geometry::LoadRequest;
use crate::node::{NodeKey, OctreeId};
use crate::worker_pool::WorkerPool;

/// Capacity of the completion channel.
const COMPLETION_CHANNEL_CAPACITY: usize = 100;

/// A boxed background task.
pub type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Runs background tasks on some executor.
pub trait Spawner: Send + Sync {
    /// Spawn a task that runs to completion.
    fn spawn(&self, task: BoxedTask);
}

/// Receives load requests issued by the scheduler.
pub trait LoadDispatch {
    /// Start loading. Must not block; the result arrives later as a
    /// [`LoadCompletion`].
    fn dispatch(&mut self, request: LoadRequest);
}

/// Fetched and decoded data of one node.
#[derive(Debug, Clone)]
pub struct LoadedNode {
    /// Decoder output.
    pub decoded: DecodedNode,
    /// Hierarchy chunk fetched with the node, if it starts one.
    pub hierarchy: Option<Vec<HierarchyEntry>>,
}

/// Outcome of one load request.
#[derive(Debug)]
pub struct LoadCompletion {
    /// Node that was loaded.
    pub key: NodeKey,
    /// Generation of the request.
    pub generation: u64,
    /// Data, or why it could not be produced.
    pub result: Result<LoadedNode>,
}

/// Create the channel load tasks report on.
#[must_use]
pub fn completion_channel() -> (
    async_channel::Sender<LoadCompletion>,
    async_channel::Receiver<LoadCompletion>,
) {
    async_channel::bounded(COMPLETION_CHANNEL_CAPACITY)
}

/// Worker pool of shared decoders.
pub type DecoderPool = WorkerPool<DecoderKind, Arc<dyn Decoder>>;

/// Decoder pool that uses [`ByteLayoutDecoder`] for every kind.
#[must_use]
pub fn byte_layout_decoders(max_workers: usize) -> DecoderPool {
    WorkerPool::new(max_workers, |_| Arc::new(ByteLayoutDecoder) as Arc<dyn Decoder>)
}

/// Loads nodes over HTTP and decodes them on a worker pool.
pub struct StreamingLoader<C: Cache, S: Spawner> {
    sources: HashMap<OctreeId, Arc<Client<C>>>,
    decoders: DecoderPool,
    spawner: S,
    tx: async_channel::Sender<LoadCompletion>,
}

impl<C: Cache + 'static, S: Spawner> StreamingLoader<C, S> {
    /// Create a loader that reports on `tx`.
    #[must_use]
    pub fn new(
        decoders: DecoderPool,
        spawner: S,
        tx: async_channel::Sender<LoadCompletion>,
    ) -> Self {
        Self {
            sources: HashMap::new(),
            decoders,
            spawner,
            tx,
        }
    }

    /// Fetch files of `octree` through `client`.
    pub fn add_source(&mut self, octree: OctreeId, client: Arc<Client<C>>) {
        self.sources.insert(octree, client);
    }

    /// The decoder pool.
    #[must_use]
    pub fn decoders(&self) -> &DecoderPool {
        &self.decoders
    }
}

impl<C: Cache + 'static, S: Spawner> LoadDispatch for StreamingLoader<C, S> {
    fn dispatch(&mut self, request: LoadRequest) {
        let key = request.key;
        let generation = request.generation;
        let tx = self.tx.clone();

        let Some(client) = self.sources.get(&key.octree).cloned() else {
            tracing::warn!(?key, "no source registered for octree");
            let completion = LoadCompletion {
                key,
                generation,
                result: Err(Error::InvalidData {
                    context: "load request",
                    detail: format!("no source for octree {}", key.octree.index()),
                }),
            };
            if tx.try_send(completion).is_err() {
                tracing::warn!(?key, "completion channel full or closed");
            }
            return;
        };

        tracing::debug!(
            node = %request.params.name,
            path = %request.node_path,
            hierarchy = ?request.hierarchy_path,
            "dispatching load"
        );

        let decoders = self.decoders.clone();
        self.spawner.spawn(Box::pin(async move {
            let result = load_node(&client, &decoders, request).await;
            if tx.send(LoadCompletion { key, generation, result }).await.is_err() {
                tracing::debug!(?key, "completion receiver dropped");
            }
        }));
    }
}

async fn load_node<C: Cache>(
    client: &Client<C>,
    decoders: &DecoderPool,
    request: LoadRequest,
) -> Result<LoadedNode> {
    let LoadRequest {
        octree_dir,
        node_path,
        hierarchy_path,
        decoder: kind,
        mut params,
        ..
    } = request;

    let hierarchy = match hierarchy_path {
        Some(path) => {
            let bytes = client.fetch_file(&octree_dir, &path).await?;
            let entries = parse_hierarchy(&params.name, &bytes)?;
            params.has_children = entries.first().is_some_and(HierarchyEntry::has_children);
            Some(entries)
        }
        None => None,
    };

    let bytes = client.fetch_file(&octree_dir, &node_path).await?;

    let decoder = decoders.acquire_async(kind).await?;
    let decoded = decoder.decode(DecodeRequest { params, bytes });
    decoders.release(kind, decoder);

    Ok(LoadedNode {
        decoded: decoded?,
        hierarchy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct InlineSpawner;

    impl Spawner for InlineSpawner {
        fn spawn(&self, _task: BoxedTask) {}
    }

    #[test]
    fn test_completion_channel_capacity() {
        let (tx, _rx) = completion_channel();
        assert_eq!(tx.capacity(), Some(COMPLETION_CHANNEL_CAPACITY));
    }

    #[test]
    fn test_byte_layout_decoders_share_lane_limit() {
        let pool = byte_layout_decoders(2);
        assert_eq!(pool.max_workers(), 2);
        let stats = pool.stats(DecoderKind::Laz);
        assert_eq!(stats.created, 0);
    }

    #[test]
    fn test_dispatch_without_source_fails_fast() {
        use crate::geometry::{OctreeGeometry, tests::metadata};
        use potree_format::Version;

        let (tx, rx) = completion_channel();
        let mut loader: StreamingLoader<crate::cache::NoCache, _> =
            StreamingLoader::new(byte_layout_decoders(1), InlineSpawner, tx);

        let mut geometry = OctreeGeometry::from_metadata(&metadata(Version::new(1, 7)));
        let key = NodeKey::new(OctreeId(3), geometry.root());
        let request = geometry.begin_load(key).unwrap();

        loader.dispatch(request);
        let completion = rx.try_recv().unwrap();
        assert_eq!(completion.key, key);
        assert!(matches!(completion.result, Err(Error::InvalidData { .. })));
    }
}
