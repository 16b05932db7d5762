use std::path::PathBuf;

use seek_grid::synthetic::SyntheticHost;
use seek_grid::{
    GridConfig, GridConfigPatch, GridErrorKind, GridKey, ScrollMode, SharedFrameCache,
    ThumbnailGrid,
};

fn write_config(json: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "seek-grid-config-{}-{}.json",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock must be after unix epoch")
            .as_nanos()
    ));
    std::fs::write(&path, json).expect("temp config must be writable");
    path
}

#[tokio::test(start_paused = true)]
async fn config_file_drives_layout_and_extraction() {
    let path = write_config(
        r#"{
            "columns": 5,
            "seconds_per_cell": 10,
            "thumb_width": 128,
            "thumb_height": 72,
            "parallel_extractors": 2,
            "scroll_mode": "edge"
        }"#,
    );
    let config = GridConfig::load(&path).expect("config loads");
    std::fs::remove_file(&path).ok();

    let host = SyntheticHost::new("clip.mp4", 95.0);
    let grid = ThumbnailGrid::new(host.clone(), SharedFrameCache::default(), config);
    let stats = grid.rebuild().await.expect("extracted");

    let view = grid.view();
    assert_eq!(view.layout.total_cells, 10);
    assert_eq!(view.layout.rows, 2);
    assert_eq!(view.scroll_mode, ScrollMode::Edge);
    assert_eq!(stats.extracted, 10);
    assert_eq!(host.opened_decoders(), 2);
    assert_eq!(grid.cache().frame_count(), 10);
}

#[tokio::test(start_paused = true)]
async fn reconfiguring_regrids_and_reuses_matching_samples() {
    let host = SyntheticHost::new("clip.mp4", 60.0);
    let grid = ThumbnailGrid::new(host.clone(), SharedFrameCache::default(), GridConfig::default());
    let errors = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = std::rc::Rc::clone(&errors);
    grid.on_error(move |event| sink.borrow_mut().push(event.kind));

    let first = grid.rebuild().await.expect("extracted");
    assert_eq!(first.extracted, 4);

    // Same interval, different columns: every sample time is already cached.
    let regridded = grid
        .configure(GridConfigPatch {
            columns: Some(4),
            ..GridConfigPatch::default()
        })
        .await
        .expect("rebuilt");
    assert_eq!(regridded.cache_hits, 4);
    assert_eq!(grid.layout().rows, 1);

    let finer = grid
        .configure(GridConfigPatch {
            seconds_per_cell: Some(-1.0),
            ..GridConfigPatch::default()
        })
        .await
        .expect("rebuilt");
    // Cells 7, 22, 37 and 52 sample 7.5s, 22.5s, 37.5s and 52.5s again.
    assert_eq!(finer.cache_hits, 4);
    assert_eq!(finer.extracted, 56);
    assert_eq!(*errors.borrow(), vec![GridErrorKind::InvalidConfig]);

    assert!(grid.key_down(GridKey::End));
    assert_eq!(grid.current_cell().map(|cell| cell.index), Some(59));
}
