//! Crossfade behaviour tests
//!
//! Covers automatic crossfades near track end, user-requested crossfades,
//! rejection while one is running, slot release on completion and the
//! hard-cut fallbacks.

mod helpers;

use cadenza_ap::error::{CrossfadeAbort, Error};
use cadenza_ap::playback::SlotId;
use cadenza_ap::services::SettingsStore;
use cadenza_common::events::{TransportEvent, TransportState};
use helpers::*;
use std::sync::Arc;

fn count(events: &[TransportEvent], event_type: &str) -> usize {
    events.iter().filter(|e| e.event_type() == event_type).count()
}

#[tokio::test(start_paused = true)]
async fn test_automatic_crossfade_near_track_end() {
    let memory = Arc::new(MemoryOpener::new());
    memory.add("/a.flac", 10.0, RATE, 0.5);
    memory.add("/b.flac", 10.0, RATE, 0.5);
    let mut t = TestEngine::start(settings(2.0), memory.clone());

    let a = track("/a.flac", "A");
    let b = track("/b.flac", "B");
    t.handle
        .play_track(a.clone(), vec![a.clone(), b.clone()])
        .await
        .unwrap();
    t.settle().await;

    t.run_for(7900).await;
    let status = t.status().await;
    assert!(!status.is_crossfading);
    assert_eq!(status.current_track_id(), Some(a.id));

    t.run_for(600).await;
    let status = t.status().await;
    assert!(status.is_crossfading, "not crossfading at 8.5s");
    assert_eq!(status.current_track_id(), Some(b.id));
    let events = t.drain_events();
    assert_eq!(count(&events, "CrossfadeStarted"), 1);

    t.run_for(1600).await;
    let status = t.status().await;
    assert!(!status.is_crossfading, "still crossfading at 10.1s");
    assert_eq!(status.current_track_id(), Some(b.id));
    assert_eq!(status.current_index, 1);
    assert_eq!(status.state, TransportState::Playing);
    assert!((status.duration - 10.0).abs() < 1e-9);
    // B started with the ramp at 8.0s
    assert!((status.playback_time - 2.1).abs() < 0.05, "{}", status.playback_time);

    let events = t.drain_events();
    assert_eq!(count(&events, "CrossfadeCompleted"), 1);
    assert_eq!(count(&events, "CrossfadeAborted"), 0);
    // B was opened once, for the crossfade
    assert_eq!(memory.opens("/b.flac"), 1);
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_second_crossfade_is_rejected() {
    let memory = Arc::new(MemoryOpener::new());
    for p in ["/a.flac", "/b.flac", "/c.flac"] {
        memory.add(p, 10.0, RATE, 0.5);
    }
    let mut t = TestEngine::start(settings(2.0), memory.clone());
    let graph = t.engine.render_graph();
    let queue = vec![
        track("/a.flac", "A"),
        track("/b.flac", "B"),
        track("/c.flac", "C"),
    ];
    t.handle
        .play_track(queue[0].clone(), queue.clone())
        .await
        .unwrap();
    t.settle().await;
    t.run_for(1000).await;

    t.handle.crossfade_to(1, Some(2.0)).await.unwrap();
    // Rejected while the target is still loading
    assert!(matches!(
        t.handle.crossfade_to(2, None).await,
        Err(Error::CrossfadeAborted(CrossfadeAbort::AlreadyCrossfading))
    ));

    t.settle().await;
    assert!(t.status().await.is_crossfading);
    // And while ramping
    assert!(matches!(
        t.handle.crossfade_to(2, None).await,
        Err(Error::CrossfadeAborted(CrossfadeAbort::AlreadyCrossfading))
    ));

    let status = t.status().await;
    assert!(status.is_crossfading);
    assert_eq!(status.current_track_id(), Some(queue[1].id));
    assert_eq!(memory.opens("/c.flac"), 0);
    assert!(graph.slot_snapshot(SlotId::A).running);
    assert!(graph.slot_snapshot(SlotId::B).running);

    t.run_for(2100).await;
    assert!(!t.status().await.is_crossfading);
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_crossfade_to_invalid_index() {
    let memory = Arc::new(MemoryOpener::new());
    memory.add("/a.flac", 10.0, RATE, 0.5);
    let t = TestEngine::start(settings(2.0), memory.clone());

    let a = track("/a.flac", "A");
    t.handle.play_track(a.clone(), vec![a]).await.unwrap();
    t.settle().await;

    assert!(matches!(
        t.handle.crossfade_to(3, None).await,
        Err(Error::CrossfadeAborted(CrossfadeAbort::InvalidTarget(3)))
    ));
    assert_eq!(t.status().await.state, TransportState::Playing);
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_completed_crossfade_releases_outgoing_slot() {
    let memory = Arc::new(MemoryOpener::new());
    memory.add("/a.flac", 10.0, RATE, 0.5);
    memory.add("/b.flac", 10.0, RATE, 0.5);
    let mut t = TestEngine::start(settings(2.0), memory.clone());
    let graph = t.engine.render_graph();

    let a = track("/a.flac", "A");
    let b = track("/b.flac", "B");
    t.handle
        .play_track(a.clone(), vec![a.clone(), b.clone()])
        .await
        .unwrap();
    t.settle().await;
    t.run_for(1000).await;

    t.handle.crossfade_to(1, Some(0.5)).await.unwrap();
    t.settle().await;
    assert!(t.status().await.is_crossfading);
    assert_eq!(memory.drops("/a.flac"), 0);

    t.run_for(700).await;
    let status = t.status().await;
    assert!(!status.is_crossfading);
    assert_eq!(status.current_track_id(), Some(b.id));

    assert_eq!(memory.drops("/a.flac"), 1);
    assert_eq!(memory.drops("/b.flac"), 0);
    let outgoing = graph.slot_snapshot(SlotId::A);
    assert!(!outgoing.is_loaded());
    assert!(!outgoing.running);
    let active = graph.slot_snapshot(SlotId::B);
    assert_eq!(active.track_id, Some(b.id));
    assert!(active.running);
    assert_eq!(active.volume, 1.0);
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sample_rate_mismatch_hard_cuts_on_skip() {
    let memory = Arc::new(MemoryOpener::new());
    memory.add("/a.flac", 10.0, RATE, 0.5);
    memory.add("/b.flac", 10.0, 48_000, 0.5);
    let mut t = TestEngine::start(settings(2.0), memory.clone());

    let a = track("/a.flac", "A");
    let b = track("/b.flac", "B");
    t.handle
        .play_track(a.clone(), vec![a.clone(), b.clone()])
        .await
        .unwrap();
    t.settle().await;
    t.run_for(1000).await;
    t.drain_events();

    t.handle.next().await.unwrap();
    t.settle().await;

    let status = t.status().await;
    assert_eq!(status.current_track_id(), Some(b.id));
    assert_eq!(status.state, TransportState::Playing);
    assert!(!status.is_crossfading);

    let events = t.drain_events();
    assert_eq!(count(&events, "CrossfadeStarted"), 0);
    assert!(events.iter().any(|e| matches!(
        e,
        TransportEvent::CrossfadeAborted { target_track_id, .. } if *target_track_id == b.id
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        TransportEvent::OutputReconfigured { sample_rate: 48_000, applied: true, .. }
    )));
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sample_rate_mismatch_hard_cuts_at_track_end() {
    let memory = Arc::new(MemoryOpener::new());
    memory.add("/a.flac", 3.0, RATE, 0.5);
    memory.add("/b.flac", 10.0, 48_000, 0.5);
    let mut t = TestEngine::start(settings(2.0), memory.clone());

    let a = track("/a.flac", "A");
    let b = track("/b.flac", "B");
    t.handle
        .play_track(a.clone(), vec![a.clone(), b.clone()])
        .await
        .unwrap();
    t.settle().await;

    // The attempt at 1.0s is declined; A keeps playing
    t.run_for(1500).await;
    let status = t.status().await;
    assert_eq!(status.current_track_id(), Some(a.id));
    assert!(!status.is_crossfading);
    assert!((status.playback_time - 1.5).abs() < 1e-6);

    let status = t
        .run_until(2500, |s| {
            s.state == TransportState::Playing && s.current_index == 1
        })
        .await;
    assert_eq!(status.current_track_id(), Some(b.id));
    assert!(!status.is_crossfading);
    // Once for the crossfade attempt, once for the hard cut
    assert_eq!(memory.opens("/b.flac"), 2);
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_too_short_crossfade_switches_directly() {
    let memory = Arc::new(MemoryOpener::new());
    memory.add("/a.flac", 10.0, RATE, 0.5);
    memory.add("/b.flac", 10.0, RATE, 0.5);
    let mut t = TestEngine::start(settings(2.0), memory.clone());

    let a = track("/a.flac", "A");
    let b = track("/b.flac", "B");
    t.handle
        .play_track(a.clone(), vec![a.clone(), b.clone()])
        .await
        .unwrap();
    t.settle().await;
    t.run_for(500).await;
    t.drain_events();

    t.handle.crossfade_to(1, Some(0.01)).await.unwrap();
    t.settle().await;

    let status = t.status().await;
    assert_eq!(status.current_track_id(), Some(b.id));
    assert_eq!(status.state, TransportState::Playing);
    let events = t.drain_events();
    assert_eq!(count(&events, "CrossfadeStarted"), 0);
    assert_eq!(memory.drops("/a.flac"), 1);
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_pause_commits_running_crossfade() {
    let memory = Arc::new(MemoryOpener::new());
    memory.add("/a.flac", 10.0, RATE, 0.5);
    memory.add("/b.flac", 10.0, RATE, 0.5);
    let mut t = TestEngine::start(settings(2.0), memory.clone());
    let graph = t.engine.render_graph();

    let a = track("/a.flac", "A");
    let b = track("/b.flac", "B");
    t.handle
        .play_track(a.clone(), vec![a.clone(), b.clone()])
        .await
        .unwrap();
    t.settle().await;
    t.run_for(1000).await;

    t.handle.crossfade_to(1, Some(2.0)).await.unwrap();
    t.settle().await;
    t.run_for(500).await;

    t.handle.pause().await.unwrap();
    let status = t.status().await;
    assert_eq!(status.state, TransportState::Paused);
    assert!(!status.is_crossfading);
    assert_eq!(status.current_track_id(), Some(b.id));
    assert!((status.playback_time - 0.5).abs() < 0.05, "{}", status.playback_time);
    assert_eq!(memory.drops("/a.flac"), 1);
    assert!(!graph.slot_snapshot(SlotId::A).is_loaded());

    t.handle.play().await.unwrap();
    t.run_for(100).await;
    let status = t.status().await;
    assert_eq!(status.state, TransportState::Playing);
    assert_eq!(status.current_track_id(), Some(b.id));
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_seek_during_crossfade_targets_incoming_track() {
    let memory = Arc::new(MemoryOpener::new());
    memory.add("/a.flac", 10.0, RATE, 0.5);
    memory.add("/b.flac", 3.0, RATE, 0.5);
    let mut t = TestEngine::start(settings(2.0), memory.clone());

    let a = track("/a.flac", "A");
    let b = track("/b.flac", "B");
    t.handle
        .play_track(a.clone(), vec![a.clone(), b.clone()])
        .await
        .unwrap();
    t.settle().await;
    t.run_for(1000).await;

    t.handle.crossfade_to(1, Some(2.0)).await.unwrap();
    t.settle().await;
    t.run_for(200).await;

    // Valid for A, out of range for B
    assert!(matches!(
        t.handle.seek(5.0).await,
        Err(Error::InvalidSeekPosition { .. })
    ));
    assert!(t.status().await.is_crossfading);

    t.handle.seek(1.0).await.unwrap();
    let status = t.status().await;
    assert!(!status.is_crossfading);
    assert_eq!(status.current_track_id(), Some(b.id));
    assert!((status.playback_time - 1.0).abs() < 1e-6);
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_incoming_failure_restores_previous_track() {
    let memory = Arc::new(MemoryOpener::new());
    memory.add("/a.flac", 3.0, RATE, 0.5);
    memory.add_failing("/b.flac", 5.0, 0.2);
    let mut t = TestEngine::start(settings(2.0), memory.clone());

    let a = track("/a.flac", "A");
    let b = track("/b.flac", "B");
    t.handle
        .play_track(a.clone(), vec![a.clone(), b.clone()])
        .await
        .unwrap();
    t.settle().await;
    t.drain_events();

    t.run_for(1400).await;
    let status = t.status().await;
    assert!(!status.is_crossfading);
    assert_eq!(status.current_track_id(), Some(a.id));
    assert_eq!(status.current_index, 0);
    assert!((status.playback_time - 1.4).abs() < 0.02, "{}", status.playback_time);

    // The switch to B was announced, then reverted
    let events = t.drain_events();
    let changes: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            TransportEvent::TrackChanged { track_id, .. } => *track_id,
            _ => None,
        })
        .collect();
    assert_eq!(changes, vec![b.id, a.id]);
    assert_eq!(count(&events, "CrossfadeAborted"), 1);

    // A plays out, B is tried again with a hard cut and fails for good
    let status = t
        .run_until(3000, |s| s.state == TransportState::Stopped)
        .await;
    assert_eq!(status.state, TransportState::Stopped);
    assert_eq!(status.current_track_id(), Some(b.id));
    let events = t.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        TransportEvent::TrackUnavailable { track_id, .. } if *track_id == b.id
    )));
    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_disabling_crossfade_takes_effect_live() {
    let memory = Arc::new(MemoryOpener::new());
    memory.add("/a.flac", 10.0, RATE, 0.5);
    memory.add("/b.flac", 10.0, RATE, 0.5);
    let store = Arc::new(SettingsStore::new(settings(2.0).crossfade));
    let store_for_engine = Arc::clone(&store);
    let mut t = TestEngine::start_with(settings(2.0), memory.clone(), move |builder| {
        builder.config_store(store_for_engine)
    });

    let a = track("/a.flac", "A");
    let b = track("/b.flac", "B");
    t.handle
        .play_track(a.clone(), vec![a.clone(), b.clone()])
        .await
        .unwrap();
    t.settle().await;
    t.run_for(500).await;
    t.drain_events();

    store.update(|c| c.enabled = false);
    t.handle.next().await.unwrap();
    t.settle().await;

    let status = t.status().await;
    assert_eq!(status.current_track_id(), Some(b.id));
    assert!(!status.is_crossfading);
    let events = t.drain_events();
    assert_eq!(count(&events, "CrossfadeStarted"), 0);
    assert_eq!(count(&events, "CrossfadeAborted"), 0);
    t.shutdown().await;
}
