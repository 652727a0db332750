mod common;
use common::*;

use lobby_room::backend::memory::Variant;
use lobby_room::*;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;

const TICK: Duration = Duration::from_secs(1);

fn countdowns(events: &[LobbyEvent]) -> Vec<CountdownDisplay> {
    events
        .iter()
        .filter_map(|event| match event {
            LobbyEvent::Countdown(display) => Some(*display),
            _ => None,
        })
        .collect()
}

async fn full_launch(variant: Variant) -> anyhow::Result<()> {
    let mut lobby = setup_lobby(variant, &["guest"]).await?;
    drain(&mut lobby.host.events);
    ready_all(&[&lobby.host, &lobby.guests[0]]).await;
    assert_eq!(lobby.host.room.countdown().await?, CountdownState::Running(3));
    assert_eq!(
        lobby.guests[0].room.countdown().await?,
        CountdownState::Running(3)
    );

    let started = await_matching(&mut lobby.host.events, |e| {
        matches!(e, LobbyEvent::SessionStarted { .. })
    })
    .await?;
    assert_eq!(
        started,
        LobbyEvent::SessionStarted {
            address: "relay-1".to_string()
        }
    );

    let joined = await_matching(&mut lobby.guests[0].events, |e| {
        matches!(e, LobbyEvent::SessionJoined { .. })
    })
    .await?;
    assert_eq!(
        joined,
        LobbyEvent::SessionJoined {
            address: "relay-1".to_string()
        }
    );

    let server = lobby.backend.lobby(&lobby.lobby_id).expect("lobby exists");
    assert_eq!(server.status, LobbyStatus::InGame);
    assert_eq!(server.launch_address(), Some("relay-1"));
    assert_eq!(lobby.relay.hosted(), 1);
    assert_eq!(lobby.relay.joined(), vec!["relay-1".to_string()]);
    assert_eq!(
        lobby.host.room.snapshot().await?.status,
        LobbyStatus::InGame
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_full_launch_push() -> anyhow::Result<()> {
    full_launch(Variant::Push).await
}

#[tokio::test(start_paused = true)]
async fn test_full_launch_diff() -> anyhow::Result<()> {
    full_launch(Variant::Diff).await
}

#[tokio::test(start_paused = true)]
async fn test_countdown_displays_every_tick() -> anyhow::Result<()> {
    let mut lobby = setup_lobby(Variant::Push, &["guest"]).await?;
    ready_all(&[&lobby.host]).await;
    drain(&mut lobby.host.events);
    assert!(lobby.guests[0].room.set_ready(true).await);

    sleep(TICK * 2 + Duration::from_millis(500)).await;
    let shown = countdowns(&drain(&mut lobby.host.events));
    assert_eq!(
        shown,
        vec![
            CountdownDisplay::Remaining(3),
            CountdownDisplay::Remaining(2),
            CountdownDisplay::Remaining(1),
        ]
    );
    assert_eq!(shown[0].prompt(), "Game starting in 3..");

    sleep(TICK).await;
    let last = drain(&mut lobby.host.events);
    assert_eq!(countdowns(&last), vec![CountdownDisplay::Remaining(0)]);
    assert!(
        last.iter()
            .any(|e| matches!(e, LobbyEvent::SessionStarted { .. }))
    );
    assert_eq!(lobby.host.room.countdown().await?, CountdownState::Idle);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unready_player_blocks_countdown() -> anyhow::Result<()> {
    let lobby = setup_lobby(Variant::Push, &["guest1", "guest2"]).await?;
    ready_all(&[&lobby.host, &lobby.guests[0]]).await;
    assert_eq!(lobby.host.room.countdown().await?, CountdownState::Idle);

    sleep(TICK * 5).await;
    assert_eq!(lobby.relay.hosted(), 0);
    let readiness = lobby.host.room.readiness().await?;
    assert_eq!(readiness.len(), 3);
    assert!(!readiness.should_launch());
    assert!(readiness.is_ready(&PlayerId::from("host")));
    assert!(!readiness.is_ready(&PlayerId::from("guest2")));
    Ok(())
}

async fn join_aborts_countdown(variant: Variant) -> anyhow::Result<()> {
    let mut lobby = setup_lobby(variant, &["guest1", "guest2"]).await?;
    ready_all(&[&lobby.host, &lobby.guests[0], &lobby.guests[1]]).await;
    assert_eq!(lobby.host.room.countdown().await?, CountdownState::Running(3));

    sleep(TICK + Duration::from_millis(100)).await;
    assert_eq!(lobby.host.room.countdown().await?, CountdownState::Running(2));
    drain(&mut lobby.host.events);

    let late = join_client(&lobby.backend, &lobby.relay, &lobby.lobby_id, "late").await?;
    settle().await;
    let seen = drain(&mut lobby.host.events);
    assert!(countdowns(&seen).contains(&CountdownDisplay::Idle));

    let mut clients = vec![&lobby.host, &late];
    clients.extend(lobby.guests.iter());
    for client in clients {
        assert_eq!(client.room.countdown().await?, CountdownState::Idle);
    }

    sleep(TICK * 5).await;
    assert_eq!(lobby.relay.hosted(), 0);
    let server = lobby.backend.lobby(&lobby.lobby_id).expect("lobby exists");
    assert_eq!(server.launch_address(), None);
    assert_eq!(server.status, LobbyStatus::Active);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_join_aborts_countdown_push() -> anyhow::Result<()> {
    join_aborts_countdown(Variant::Push).await
}

#[tokio::test(start_paused = true)]
async fn test_join_aborts_countdown_diff() -> anyhow::Result<()> {
    join_aborts_countdown(Variant::Diff).await
}

#[tokio::test(start_paused = true)]
async fn test_unready_cancels_countdown() -> anyhow::Result<()> {
    let mut lobby = setup_lobby(Variant::Diff, &["guest"]).await?;
    ready_all(&[&lobby.host, &lobby.guests[0]]).await;
    assert_eq!(lobby.host.room.countdown().await?, CountdownState::Running(3));

    assert!(lobby.guests[0].room.set_ready(false).await);
    settle().await;
    assert_eq!(lobby.host.room.countdown().await?, CountdownState::Idle);
    assert_eq!(
        lobby.guests[0].room.countdown().await?,
        CountdownState::Idle
    );
    assert!(
        drain(&mut lobby.host.events).contains(&LobbyEvent::Countdown(CountdownDisplay::Idle))
    );

    sleep(TICK * 5).await;
    assert_eq!(lobby.relay.hosted(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_repeated_ready_runs_one_countdown() -> anyhow::Result<()> {
    let mut lobby = setup_lobby(Variant::Push, &["guest"]).await?;
    ready_all(&[&lobby.host, &lobby.guests[0]]).await;
    assert!(lobby.guests[0].room.set_ready(true).await);
    assert!(lobby.host.room.set_ready(true).await);
    settle().await;
    assert_eq!(lobby.host.room.countdown().await?, CountdownState::Running(3));

    sleep(TICK * 4).await;
    let started: Vec<_> = drain(&mut lobby.host.events)
        .into_iter()
        .filter(|e| matches!(e, LobbyEvent::SessionStarted { .. }))
        .collect();
    assert_eq!(started.len(), 1);
    assert_eq!(lobby.relay.hosted(), 1);
    assert_eq!(lobby.relay.joined().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_launch_consumed_once() -> anyhow::Result<()> {
    let mut lobby = setup_lobby(Variant::Push, &["guest"]).await?;
    ready_all(&[&lobby.host, &lobby.guests[0]]).await;
    await_matching(&mut lobby.guests[0].events, |e| {
        matches!(e, LobbyEvent::SessionJoined { .. })
    })
    .await?;

    // More lobby updates after launch must not trigger another join.
    let extra = HashMap::from([(KEY_GAME_NAME.to_string(), "rematch".to_string())]);
    lobby
        .host
        .provider
        .update_lobby_data(&lobby.lobby_id, extra.clone())
        .await?;
    lobby
        .host
        .provider
        .update_lobby_data(&lobby.lobby_id, extra)
        .await?;
    settle().await;

    let updates = drain(&mut lobby.guests[0].events);
    assert!(
        updates
            .iter()
            .any(|e| matches!(e, LobbyEvent::LobbyUpdated(s) if s.launch_address().is_some()))
    );
    assert!(
        !updates
            .iter()
            .any(|e| matches!(e, LobbyEvent::SessionJoined { .. }))
    );
    assert_eq!(lobby.relay.joined(), vec!["relay-1".to_string()]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_ready_read_counts_as_not_ready() -> anyhow::Result<()> {
    let lobby = setup_lobby(Variant::Push, &["guest"]).await?;
    let guest = &lobby.guests[0];
    guest.provider.set_failing(true);

    assert!(lobby.host.room.set_ready(true).await);
    settle().await;

    let readiness = guest.room.readiness().await?;
    assert!(!readiness.is_ready(&PlayerId::from("host")));
    assert!(!guest.room.set_ready(true).await);

    guest.provider.set_failing(false);
    assert!(guest.room.set_ready(true).await);
    settle().await;
    assert_eq!(lobby.host.room.countdown().await?, CountdownState::Running(3));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_publish_leaves_launch_key_absent() -> anyhow::Result<()> {
    let mut lobby = setup_lobby(Variant::Push, &[]).await?;
    assert!(lobby.host.room.set_ready(true).await);
    settle().await;
    assert_eq!(lobby.host.room.countdown().await?, CountdownState::Running(3));

    lobby.host.provider.set_failing(true);
    let failed = await_matching(&mut lobby.host.events, |e| {
        matches!(e, LobbyEvent::Error(_))
    })
    .await?;
    println!("Launch failed: {failed:?}");

    let server = lobby.backend.lobby(&lobby.lobby_id).expect("lobby exists");
    assert_eq!(server.launch_address(), None);
    assert_eq!(server.status, LobbyStatus::Active);
    assert_eq!(lobby.host.room.snapshot().await?.status, LobbyStatus::Active);

    // The relay from the failed attempt is reused.
    lobby.host.provider.set_failing(false);
    lobby.host.room.request_launch().await;
    let started = await_matching(&mut lobby.host.events, |e| {
        matches!(e, LobbyEvent::SessionStarted { .. })
    })
    .await?;
    assert_eq!(
        started,
        LobbyEvent::SessionStarted {
            address: "relay-1".to_string()
        }
    );
    assert_eq!(lobby.relay.hosted(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_relay_failure_publishes_nothing() -> anyhow::Result<()> {
    let mut lobby = setup_lobby(Variant::Diff, &[]).await?;
    lobby.relay.set_fail_host(true);
    lobby.host.room.request_launch().await;
    await_matching(&mut lobby.host.events, |e| matches!(e, LobbyEvent::Error(_))).await?;

    let server = lobby.backend.lobby(&lobby.lobby_id).expect("lobby exists");
    assert_eq!(server.launch_address(), None);
    assert_eq!(server.status, LobbyStatus::Active);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_guest_cannot_launch() -> anyhow::Result<()> {
    let lobby = setup_lobby(Variant::Push, &["guest"]).await?;
    lobby.guests[0].room.request_launch().await;
    settle().await;
    assert_eq!(lobby.relay.hosted(), 0);
    let server = lobby.backend.lobby(&lobby.lobby_id).expect("lobby exists");
    assert_eq!(server.launch_address(), None);
    Ok(())
}
