//! Commands arriving while a requested crossfade target is still loading
//!
//! The target's open is held at a gate so the transport sits between the
//! request and the ramp. A requested track must never be lost there.

mod helpers;

use cadenza_ap::playback::Track;
use cadenza_common::events::TransportState;
use helpers::*;
use std::sync::Arc;

struct Fixture {
    t: TestEngine,
    memory: Arc<MemoryOpener>,
    gated: Arc<GatedOpener>,
    queue: Vec<Track>,
}

/// Queue [A, B, C] of 10 s tracks, A playing, every later open gated
async fn playing_first_of_three() -> Fixture {
    let memory = Arc::new(MemoryOpener::new());
    for p in ["/a.flac", "/b.flac", "/c.flac"] {
        memory.add(p, 10.0, RATE, 0.5);
    }
    let gated = Arc::new(GatedOpener::new(memory.clone()));
    let t = TestEngine::start(settings(2.0), gated.clone());
    let queue = vec![
        track("/a.flac", "A"),
        track("/b.flac", "B").with_metadata(10.0, RATE),
        track("/c.flac", "C"),
    ];
    t.handle
        .play_track(queue[0].clone(), queue.clone())
        .await
        .unwrap();
    t.settle().await;
    gated.release(1);
    t.settle().await;
    assert_eq!(t.status().await.state, TransportState::Playing);

    Fixture {
        t,
        memory,
        gated,
        queue,
    }
}

#[tokio::test(start_paused = true)]
async fn test_pause_while_target_loads_lands_on_target() {
    let Fixture {
        mut t,
        memory,
        gated,
        queue,
    } = playing_first_of_three().await;
    t.run_for(1000).await;

    t.handle.next().await.unwrap();
    t.settle().await;
    assert_eq!(gated.started(), 2);
    assert_eq!(t.status().await.current_track_id(), Some(queue[0].id));

    t.handle.pause().await.unwrap();
    let status = t.status().await;
    assert_eq!(status.current_track_id(), Some(queue[1].id));
    assert_eq!(status.current_index, 1);

    t.settle().await;
    gated.release(1);
    t.settle().await;

    let status = t.status().await;
    assert_eq!(status.state, TransportState::Paused);
    assert_eq!(status.current_track_id(), Some(queue[1].id));
    assert_eq!(status.current_index, 1);
    assert_eq!(status.playback_time, 0.0);
    assert_eq!(memory.opens("/b.flac"), 1);
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_repeated_next_counts_from_requested_track() {
    let Fixture {
        mut t,
        memory,
        gated,
        queue,
    } = playing_first_of_three().await;
    t.run_for(1000).await;

    t.handle.next().await.unwrap();
    t.handle.next().await.unwrap();
    t.settle().await;
    gated.release(1);
    t.settle().await;

    let status = t.run_until(3000, |s| !s.is_crossfading).await;
    assert_eq!(status.state, TransportState::Playing);
    assert_eq!(status.current_track_id(), Some(queue[2].id));
    assert_eq!(status.current_index, 2);
    // The first target was superseded before its open was let through
    assert_eq!(memory.opens("/b.flac"), 0);
    assert_eq!(memory.opens("/c.flac"), 1);
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_previous_near_end_beats_natural_advance() {
    let Fixture {
        mut t,
        memory,
        gated,
        queue,
    } = playing_first_of_three().await;
    // The automatic crossfade to B is requested at 8 s and held at the gate
    t.run_for(9800).await;
    assert_eq!(t.status().await.current_track_id(), Some(queue[0].id));

    t.handle.previous().await.unwrap();
    t.run_for(500).await;

    // A ended while the requested track was still loading
    let status = t.status().await;
    assert_eq!(status.state, TransportState::Loading);
    assert_eq!(status.current_track_id(), Some(queue[2].id));
    assert_eq!(status.current_index, 2);

    gated.release(1);
    t.settle().await;

    let status = t.status().await;
    assert_eq!(status.state, TransportState::Playing);
    assert_eq!(status.current_track_id(), Some(queue[2].id));
    assert_eq!(memory.opens("/b.flac"), 0);
    assert_eq!(memory.opens("/c.flac"), 1);
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_target_loads_selects_target() {
    let Fixture {
        mut t,
        memory,
        gated,
        queue,
    } = playing_first_of_three().await;
    t.run_for(1000).await;

    t.handle.next().await.unwrap();
    t.settle().await;
    t.handle.stop().await.unwrap();
    t.settle().await;
    gated.release(1);
    t.settle().await;

    let status = t.status().await;
    assert_eq!(status.state, TransportState::Stopped);
    assert_eq!(status.current_track_id(), Some(queue[1].id));
    assert_eq!(status.current_index, 1);
    assert_eq!(status.playback_time, 0.0);
    assert_eq!(memory.opens("/b.flac"), 0);
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_seek_while_target_loads_applies_to_target() {
    let Fixture {
        mut t,
        gated,
        queue,
        ..
    } = playing_first_of_three().await;
    t.run_for(1000).await;

    t.handle.next().await.unwrap();
    t.settle().await;
    t.handle.seek(3.0).await.unwrap();
    t.settle().await;
    gated.release(1);
    t.settle().await;

    let status = t.status().await;
    assert_eq!(status.state, TransportState::Playing);
    assert_eq!(status.current_track_id(), Some(queue[1].id));
    assert!((status.playback_time - 3.0).abs() < 1e-6, "{}", status.playback_time);
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shuffle_while_target_loads_keeps_target() {
    let Fixture {
        mut t,
        gated,
        queue,
        ..
    } = playing_first_of_three().await;
    t.run_for(1000).await;

    t.handle.next().await.unwrap();
    t.settle().await;
    assert!(t.handle.toggle_shuffle().await.unwrap());
    t.settle().await;
    gated.release(1);
    t.settle().await;

    let status = t.status().await;
    assert_eq!(status.state, TransportState::Playing);
    assert_eq!(status.current_track_id(), Some(queue[1].id));
    assert_eq!(status.queue[status.current_index].id, queue[1].id);
    t.shutdown().await;
}
