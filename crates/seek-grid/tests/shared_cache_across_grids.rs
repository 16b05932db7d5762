use seek_grid::synthetic::SyntheticHost;
use seek_grid::{GridConfig, SharedFrameCache, ThumbnailGrid, VideoKey};

fn grid(host: &SyntheticHost, cache: &SharedFrameCache) -> ThumbnailGrid<SyntheticHost> {
    let config = GridConfig {
        columns: 2,
        ..GridConfig::default()
    };
    ThumbnailGrid::new(host.clone(), cache.clone(), config)
}

#[tokio::test(start_paused = true)]
async fn grids_share_one_cache_and_evict_least_recent_video() {
    let cache = SharedFrameCache::new(2);
    let first_host = SyntheticHost::new("a.mp4", 30.0);
    let second_host = SyntheticHost::new("b.mp4", 30.0);
    let first = grid(&first_host, &cache);
    let second = grid(&second_host, &cache);

    first.rebuild().await.expect("a extracted");
    second.rebuild().await.expect("b extracted");
    assert_eq!(cache.video_count(), 2);

    first_host.load("c.mp4", 30.0);
    first.rebuild().await.expect("c extracted");

    assert!(!cache.contains_video(&VideoKey::from("a.mp4")));
    assert!(cache.contains_video(&VideoKey::from("b.mp4")));
    assert!(cache.contains_video(&VideoKey::from("c.mp4")));
    assert_eq!(cache.frame_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn thumbnails_on_screen_survive_eviction_of_their_video() {
    let cache = SharedFrameCache::new(1);
    let host = SyntheticHost::new("a.mp4", 30.0);
    let grid = grid(&host, &cache);

    grid.rebuild().await.expect("a extracted");
    let shown = grid.view();

    host.load("b.mp4", 30.0);
    grid.rebuild().await.expect("b extracted");
    assert!(!cache.contains_video(&VideoKey::from("a.mp4")));

    for cell in &shown.cells {
        let thumbnail = cell.thumbnail.as_ref().expect("thumbnail shown");
        assert!(!thumbnail.is_disposed());
        let text = String::from_utf8_lossy(thumbnail.bytes().expect("bytes")).into_owned();
        assert!(text.starts_with("a.mp4@"));
    }
}

#[tokio::test(start_paused = true)]
async fn destroying_one_grid_keeps_frames_for_the_others() {
    let cache = SharedFrameCache::default();
    let first_host = SyntheticHost::new("a.mp4", 30.0);
    let second_host = SyntheticHost::new("a.mp4", 30.0);
    let first = grid(&first_host, &cache);
    let second = grid(&second_host, &cache);

    first.rebuild().await.expect("extracted");
    first.destroy();

    let stats = second.rebuild().await.expect("served from cache");
    assert_eq!(stats.cache_hits, 2);
    assert_eq!(stats.extracted, 0);
    assert!(second_host.decoder_seeks().is_empty());
}
