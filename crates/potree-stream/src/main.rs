//! Headless streaming driver for Potree point clouds.
//!
//! Loads a `cloud.js` over HTTP and runs the per-frame scheduler against an
//! orbiting camera, logging what would be drawn and what is being streamed.

mod async_runtime;
mod camera;
mod launch_params;

use std::sync::Arc;

use async_runtime::TokioSpawner;
use camera::OrbitCamera;
use potree::{
    Client, LoadEvent, MemoryCache, OctreeGeometry, Scene, Scheduler, StreamingLoader,
    byte_layout_decoders, completion_channel,
};

/// Frames between summary log lines.
const SUMMARY_INTERVAL: u64 = 60;

/// Name a point cloud after the directory holding its `cloud.js`.
fn cloud_name(url: &str) -> &str {
    url.rsplit('/')
        .nth(1)
        .filter(|name| !name.is_empty())
        .unwrap_or("cloud")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    let params = launch_params::parse()?;
    tracing::info!(url = %params.url, config = ?params.config, "starting");

    let cache = MemoryCache::with_max_size(params.cache_bytes);
    let mut client = Client::with_cache(&params.url, cache)?;
    if let Some(signer) = params.signer {
        client = client.with_signer(signer);
    }
    let client = Arc::new(client);
    let metadata = client.fetch_cloud().await?;

    let mut scene = Scene::new();
    let octree = scene.add(cloud_name(&params.url), OctreeGeometry::from_metadata(&metadata));
    let bounds = scene
        .get(octree)
        .map(|o| o.geometry().bounding_box().translated(o.position()))
        .ok_or("point cloud missing from scene")?;

    let (tx, rx) = completion_channel();
    let mut loader = StreamingLoader::new(
        byte_layout_decoders(params.config.max_decode_workers),
        TokioSpawner::current(),
        tx,
    );
    loader.add_source(octree, Arc::clone(&client));

    let mut camera = OrbitCamera::around(&bounds, params.orbit_period);
    let mut scheduler = Scheduler::new(params.config);
    let mut interval = tokio::time::interval(params.frame_interval);

    let mut loaded = 0usize;
    let mut failed = 0usize;
    for _ in 0..params.frames {
        interval.tick().await;

        for event in scheduler.drain_completions(&mut scene, &rx) {
            match event {
                LoadEvent::Loaded { .. } => loaded += 1,
                LoadEvent::Failed { .. } => failed += 1,
                LoadEvent::Discarded { .. } => {}
            }
        }

        camera.advance(params.frame_interval);
        let view = camera.view(params.aspect, params.screen_height);
        let report = scheduler.update(&view, &mut scene, &mut loader);

        if report.frame.is_multiple_of(SUMMARY_INTERVAL) {
            let drawable: usize = scene.iter().map(|o| o.drawable_count()).sum();
            tracing::info!(
                frame = report.frame,
                visible = report.visible_nodes,
                drawable,
                points = report.visible_points,
                resident = report.resident_points,
                in_flight = report.in_flight,
                stop = ?report.stop,
                "frame"
            );
        } else {
            tracing::debug!(?report, "frame");
        }
    }

    let stats = client.cache().stats();
    tracing::info!(
        loaded,
        failed,
        resident_nodes = scheduler.lru().len(),
        resident_points = scheduler.lru().num_points(),
        cache_hits = stats.hits,
        cache_misses = stats.misses,
        "done"
    );
    Ok(())
}
