//! End-to-end playback sync between a host and followers on simulated players

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use watchparty_core::{
    CountdownState, Episode, EpisodeId, InMemoryPartyBackend, PartyBackend, PartyId,
    PlaybackCoordinator, PlaybackUpdate, PlayerEvent, Role, SimulatedPlayer, SyncConfig, UserId,
    VideoPlayer,
};

const SEEK_LATENCY: Duration = Duration::from_millis(100);

struct Fixture {
    backend: Arc<InMemoryPartyBackend>,
    id: PartyId,
    host: UserId,
}

async fn party() -> Fixture {
    let backend = Arc::new(InMemoryPartyBackend::new());
    for (id, number) in [("s1e1", 1), ("s1e2", 2)] {
        backend.insert_episode(Episode {
            id: EpisodeId::new(id),
            series_id: "show".to_string(),
            season_number: 1,
            episode_number: number,
            title: id.to_string(),
        });
    }
    let host = UserId::new("host");
    let created = backend
        .create_party(&host, "Host", Some(EpisodeId::new("s1e1")))
        .await
        .unwrap();
    Fixture {
        backend,
        id: created.id,
        host,
    }
}

async fn coordinator(
    party: &Fixture,
    user: &UserId,
    player: Arc<SimulatedPlayer>,
    events: UnboundedReceiver<PlayerEvent>,
) -> PlaybackCoordinator {
    if user != &party.host {
        party
            .backend
            .join_party(&party.id, user, user.as_str())
            .await
            .unwrap();
    }
    let coordinator = PlaybackCoordinator::new(
        party.backend.clone(),
        party.id.clone(),
        user.clone(),
        player.clone(),
        SyncConfig::default(),
    )
    .await
    .unwrap();
    coordinator.spawn(events).await.unwrap();
    let _ = player.start_clock();
    coordinator
}

async fn follower(
    party: &Fixture,
    name: &str,
    rate: f64,
) -> (Arc<SimulatedPlayer>, PlaybackCoordinator) {
    let (player, events) = SimulatedPlayer::new(rate, SEEK_LATENCY);
    let coordinator = coordinator(party, &UserId::new(name), player.clone(), events).await;
    player.mark_ready();
    (player, coordinator)
}

async fn host(
    party: &Fixture,
    player: Arc<SimulatedPlayer>,
    events: UnboundedReceiver<PlayerEvent>,
) -> PlaybackCoordinator {
    let coordinator = coordinator(party, &party.host, player, events).await;
    assert_eq!(coordinator.role(), Role::Host);
    coordinator
}

fn count_corrections(coordinator: &PlaybackCoordinator) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let mut syncing = coordinator.syncing();
    tokio::spawn(async move {
        while syncing.changed().await.is_ok() {
            if *syncing.borrow() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }
    });
    count
}

#[tokio::test(start_paused = true)]
async fn test_late_joiner_seeks_straight_to_host_position() {
    let party = party().await;
    party
        .backend
        .update_playback(&party.id, &party.host, PlaybackUpdate::position(120.0, true))
        .await
        .unwrap();

    let (player, coordinator) = follower(&party, "viewer", 1.0).await;
    assert_eq!(coordinator.role(), Role::Follower);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(coordinator.is_syncing());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!player.is_paused());
    assert!((player.current_time() - 120.0).abs() < 0.5);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!coordinator.is_syncing());
}

#[tokio::test(start_paused = true)]
async fn test_host_pause_reaches_follower() {
    let party = party().await;
    let (host_player, host_events) = SimulatedPlayer::new(1.0, SEEK_LATENCY);
    let host = host(&party, host_player.clone(), host_events).await;
    host_player.seek(297.0);
    host_player.play().unwrap();

    let (player, _follower) = follower(&party, "viewer", 1.0).await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!player.is_paused());

    host_player.pause();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stored = party.backend.get_party(&party.id).await.unwrap();
    assert!(!stored.is_playing);
    assert!(player.is_paused());
    assert!((player.current_time() - host_player.current_time()).abs() <= 1.5);
    assert!((host_player.current_time() - 300.0).abs() < 0.5);

    host.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_fast_follower_is_pulled_back() {
    let party = party().await;
    let (host_player, host_events) = SimulatedPlayer::new(1.0, SEEK_LATENCY);
    let _host = host(&party, host_player.clone(), host_events).await;
    host_player.play().unwrap();

    let (player, follower) = follower(&party, "fast", 1.15).await;
    let corrections = count_corrections(&follower);

    let mut worst: f64 = 0.0;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        worst = worst.max((player.current_time() - host_player.current_time()).abs());
    }

    assert!(corrections.load(Ordering::SeqCst) >= 2);
    assert!(worst < 2.5, "worst drift {worst}");
}

#[tokio::test(start_paused = true)]
async fn test_follower_never_writes_playback() {
    let party = party().await;
    party
        .backend
        .update_playback(&party.id, &party.host, PlaybackUpdate::position(60.0, false))
        .await
        .unwrap();

    let (player, follower) = follower(&party, "viewer", 1.0).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    follower
        .push_playback(PlaybackUpdate::position(999.0, true))
        .await
        .unwrap();
    player.play().unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    player.seek(500.0);
    tokio::time::sleep(Duration::from_millis(500)).await;

    let stored = party.backend.get_party(&party.id).await.unwrap();
    assert_eq!(stored.current_time_seconds, 60);
    assert!(!stored.is_playing);

    let err = party
        .backend
        .update_playback(
            &party.id,
            &UserId::new("viewer"),
            PlaybackUpdate::position(1.0, true),
        )
        .await
        .unwrap_err();
    assert!(err.is_authority_violation());
}

#[tokio::test(start_paused = true)]
async fn test_auto_advance_expires_once() {
    let party = party().await;
    let (host_player, host_events) = SimulatedPlayer::with_duration(1.0, SEEK_LATENCY, 3.0);
    let host = host(&party, host_player.clone(), host_events).await;
    assert_eq!(host.next_episode().map(|e| e.id), Some(EpisodeId::new("s1e2")));

    let (follower_player, _follower) = follower(&party, "viewer", 1.0).await;

    let mut changes = party.backend.subscribe_party(&party.id).await.unwrap();
    let advances = Arc::new(AtomicUsize::new(0));
    let counter = advances.clone();
    tokio::spawn(async move {
        let mut episode = Some(EpisodeId::new("s1e1"));
        while let Ok(row) = changes.recv().await {
            if row.episode_id != episode {
                counter.fetch_add(1, Ordering::SeqCst);
                episode = row.episode_id;
            }
        }
    });

    host_player.play().unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(matches!(
        host.countdown_state(),
        CountdownState::Running { .. }
    ));

    tokio::time::sleep(Duration::from_secs(10)).await;
    let stored = party.backend.get_party(&party.id).await.unwrap();
    assert_eq!(stored.episode_id, Some(EpisodeId::new("s1e2")));
    assert_eq!(stored.current_time_seconds, 0);
    assert!(!stored.is_playing);
    assert_eq!(advances.load(Ordering::SeqCst), 1);

    assert_eq!(host_player.episode(), Some(EpisodeId::new("s1e2")));
    assert_eq!(follower_player.episode(), Some(EpisodeId::new("s1e2")));
    assert!(host.next_episode().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_countdown_keeps_episode() {
    let party = party().await;
    let (host_player, host_events) = SimulatedPlayer::with_duration(1.0, SEEK_LATENCY, 2.0);
    let host = host(&party, host_player.clone(), host_events).await;

    host_player.play().unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    host.cancel_auto_advance();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(host.countdown_state(), CountdownState::Cancelled);
    let stored = party.backend.get_party(&party.id).await.unwrap();
    assert_eq!(stored.episode_id, Some(EpisodeId::new("s1e1")));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_heartbeat_immediately() {
    let party = party().await;
    let (host_player, host_events) = SimulatedPlayer::new(1.0, SEEK_LATENCY);
    let host = host(&party, host_player.clone(), host_events).await;
    host_player.play().unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;

    host.shutdown();
    let frozen = party.backend.get_party(&party.id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    host_player.pause();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let later = party.backend.get_party(&party.id).await.unwrap();
    assert_eq!(later, frozen);
    assert!(host.is_shut_down());
}

#[tokio::test(start_paused = true)]
async fn test_party_end_pauses_follower_and_ignores_later_rows() {
    let party = party().await;
    party
        .backend
        .update_playback(&party.id, &party.host, PlaybackUpdate::position(30.0, true))
        .await
        .unwrap();

    let (player, follower) = follower(&party, "viewer", 1.0).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!player.is_paused());
    let playing_row = party.backend.get_party(&party.id).await.unwrap();

    party.backend.end_party(&party.id, &party.host).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(follower.has_party_ended());
    assert!(player.is_paused());
    let stopped_at = player.current_time();

    // A redelivered row from before the end must not restart playback
    follower.handle_party_update(playing_row).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(player.is_paused());
    assert_eq!(player.current_time(), stopped_at);
    assert!(!follower.is_syncing());
}

#[tokio::test(start_paused = true)]
async fn test_party_end_aborts_running_countdown() {
    let party = party().await;
    let (host_player, host_events) = SimulatedPlayer::with_duration(1.0, SEEK_LATENCY, 2.0);
    let host = host(&party, host_player.clone(), host_events).await;

    host_player.play().unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(matches!(
        host.countdown_state(),
        CountdownState::Running { .. }
    ));

    party.backend.end_party(&party.id, &party.host).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(host.has_party_ended());
    assert_eq!(host.countdown_state(), CountdownState::Idle);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(host.countdown_state(), CountdownState::Idle);
    let stored = party.backend.get_party(&party.id).await.unwrap();
    assert_eq!(stored.episode_id, Some(EpisodeId::new("s1e1")));
    assert_eq!(host_player.episode(), Some(EpisodeId::new("s1e1")));
}

#[tokio::test(start_paused = true)]
async fn test_skip_to_next_is_host_only_and_advances_once() {
    let party = party().await;
    let (host_player, host_events) = SimulatedPlayer::with_duration(1.0, SEEK_LATENCY, 2.0);
    let host = host(&party, host_player.clone(), host_events).await;
    let (follower_player, follower) = follower(&party, "viewer", 1.0).await;

    let mut changes = party.backend.subscribe_party(&party.id).await.unwrap();
    let advances = Arc::new(AtomicUsize::new(0));
    let counter = advances.clone();
    tokio::spawn(async move {
        let mut episode = Some(EpisodeId::new("s1e1"));
        while let Ok(row) = changes.recv().await {
            if row.episode_id != episode {
                counter.fetch_add(1, Ordering::SeqCst);
                episode = row.episode_id;
            }
        }
    });

    host_player.play().unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(matches!(
        host.countdown_state(),
        CountdownState::Running { .. }
    ));

    follower.skip_to_next();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(
        host.countdown_state(),
        CountdownState::Running { .. }
    ));
    let stored = party.backend.get_party(&party.id).await.unwrap();
    assert_eq!(stored.episode_id, Some(EpisodeId::new("s1e1")));

    host.skip_to_next();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stored = party.backend.get_party(&party.id).await.unwrap();
    assert_eq!(stored.episode_id, Some(EpisodeId::new("s1e2")));

    host.skip_to_next();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(advances.load(Ordering::SeqCst), 1);
    assert_eq!(host_player.episode(), Some(EpisodeId::new("s1e2")));
    assert_eq!(follower_player.episode(), Some(EpisodeId::new("s1e2")));
}

#[tokio::test(start_paused = true)]
async fn test_follower_recovers_from_lagged_change_feed() {
    let party = party().await;
    let (player, _follower) = follower(&party, "viewer", 1.0).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    // More rows than the feed buffers, written without yielding
    for step in 1..=200 {
        party
            .backend
            .update_playback(
                &party.id,
                &party.host,
                PlaybackUpdate::position(step as f64 * 5.0, false),
            )
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(player.is_paused());
    assert!((player.current_time() - 1000.0).abs() < 0.5);

    party
        .backend
        .update_playback(&party.id, &party.host, PlaybackUpdate::position(1000.0, true))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!player.is_paused());
    assert!((player.current_time() - 1002.0).abs() < 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_players_are_loaded_with_current_episode() {
    let party = party().await;
    let (host_player, host_events) = SimulatedPlayer::new(1.0, SEEK_LATENCY);
    let _host = host(&party, host_player.clone(), host_events).await;
    assert_eq!(host_player.episode(), Some(EpisodeId::new("s1e1")));

    let (player, _follower) = follower(&party, "viewer", 1.0).await;
    assert_eq!(player.episode(), Some(EpisodeId::new("s1e1")));
}
