use std::time::Duration;
use telemetry_hub::config::HubConfig;
use telemetry_hub::hub::Hub;
use telemetry_hub::network::{ClientEvent, ServerEvent, TelemetryCar, TelemetryPos};
use uuid::Uuid;

fn fast_reap_config() -> HubConfig {
    let mut config = HubConfig::default();
    config.server.stale_threshold_ms = 50;
    config.server.reap_interval_ms = 10;
    config
}

async fn join_room(hub: &Hub, connection: Uuid, session_id: &str) {
    hub.handle_event(
        connection,
        ClientEvent::RoomJoin {
            session_id: session_id.to_string(),
        },
    )
    .await;
}

/// S3 — binary telemetry fan-out reaches a joined consumer as a `timing:update`.
#[tokio::test]
async fn binary_telemetry_fans_out_as_timing_update() {
    let hub = Hub::new(HubConfig::default());
    let producer = Uuid::new_v4();
    let consumer = Uuid::new_v4();
    let mut producer_rx = hub.accept_connection(producer).await;
    let mut consumer_rx = hub.accept_connection(consumer).await;

    hub.handle_event(
        producer,
        ClientEvent::SessionMetadata {
            session_id: "S1".into(),
            track_name: "Silverstone".into(),
            session_type: "race".into(),
        },
    )
    .await;
    let _ = producer_rx.recv().await; // session:active
    let _ = producer_rx.recv().await; // ack
    let _ = consumer_rx.recv().await; // session:active

    join_room(&hub, consumer, "S1").await;
    let _ = consumer_rx.recv().await; // session:state
    let _ = consumer_rx.recv().await; // broadcast:delay
    let _ = consumer_rx.recv().await; // room:joined

    let mut payload = Vec::new();
    payload.extend_from_slice(&1700000000000.0f64.to_le_bytes());
    payload.push(1); // car count
    payload.extend_from_slice(&7u16.to_le_bytes()); // carId
    payload.extend_from_slice(&0.25f32.to_le_bytes()); // lapDistPct
    payload.extend_from_slice(&80.0f32.to_le_bytes()); // speed
    payload.extend_from_slice(&3u16.to_le_bytes()); // lap
    payload.push(2); // position
    payload.push(0); // padding

    hub.handle_event(
        producer,
        ClientEvent::TelemetryBinary {
            session_id: "S1".into(),
            payload,
        },
    )
    .await;

    let timing = tokio::time::timeout(Duration::from_secs(2), consumer_rx.recv())
        .await
        .unwrap()
        .unwrap();
    match timing {
        ServerEvent::TimingUpdate {
            session_id,
            session_time_ms,
            timing,
        } => {
            assert_eq!(session_id, "S1");
            assert_eq!(session_time_ms, 1700000000000.0);
            assert_eq!(timing.entries.len(), 1);
            let entry = &timing.entries[0];
            assert_eq!(entry.driver_id, "7");
            assert_eq!(entry.driver_name, "Car 7");
            assert_eq!(entry.car_number, "7");
            assert_eq!(entry.position, Some(2));
            assert_eq!(entry.lap_number, Some(3));
            assert_eq!(entry.last_lap_time, 0.0);
            assert_eq!(entry.best_lap_time, 0.0);
            assert_eq!(entry.gap_to_leader, 0.0);
            assert_eq!(entry.lap_dist_pct, 0.25);
            assert_eq!(entry.speed, 80.0);
        }
        other => panic!("expected timing:update, got {other:?}"),
    }
}

/// S5 — an incident report synthesizes both an `incident:new` and an `event:log`
/// for the room, plus a success ack to the reporting producer.
#[tokio::test]
async fn incident_synthesizes_incident_new_and_event_log() {
    let hub = Hub::new(HubConfig::default());
    let producer = Uuid::new_v4();
    let consumer = Uuid::new_v4();
    let mut producer_rx = hub.accept_connection(producer).await;
    let mut consumer_rx = hub.accept_connection(consumer).await;

    hub.handle_event(
        producer,
        ClientEvent::SessionMetadata {
            session_id: "S1".into(),
            track_name: "Silverstone".into(),
            session_type: "race".into(),
        },
    )
    .await;
    let _ = producer_rx.recv().await;
    let _ = producer_rx.recv().await;
    let _ = consumer_rx.recv().await;

    join_room(&hub, consumer, "S1").await;
    let _ = consumer_rx.recv().await;
    let _ = consumer_rx.recv().await;
    let _ = consumer_rx.recv().await;

    hub.handle_event(
        producer,
        ClientEvent::Incident {
            session_id: "S1".into(),
            kind: "contact".into(),
            severity: Some("high".into()),
            lap: Some(4),
            corner_name: Some("Copse".into()),
            cars: vec![7, 9],
            driver_names: Some(vec!["A".into(), "B".into()]),
            track_position: None,
        },
    )
    .await;

    let incident_new = consumer_rx.recv().await.unwrap();
    match incident_new {
        ServerEvent::IncidentNew(payload) => {
            assert_eq!(payload.kind, "contact");
            assert_eq!(payload.severity, "high");
            assert_eq!(payload.lap_number, Some(4));
            assert_eq!(payload.corner_name.as_deref(), Some("Copse"));
            assert_eq!(payload.status, "pending");
            assert_eq!(payload.involved_drivers.len(), 2);
            assert_eq!(payload.involved_drivers[0].driver_id, "7");
            assert_eq!(payload.involved_drivers[0].driver_name, "A");
            assert_eq!(payload.involved_drivers[0].role, "involved");
            assert_eq!(payload.involved_drivers[1].driver_name, "B");
        }
        other => panic!("expected incident:new, got {other:?}"),
    }

    let event_log = consumer_rx.recv().await.unwrap();
    match event_log {
        ServerEvent::EventLog {
            category,
            importance,
            message,
            ..
        } => {
            assert_eq!(category, "warning");
            assert_eq!(importance, "critical");
            assert_eq!(message, "Incident: Copse - A, B");
        }
        other => panic!("expected event:log, got {other:?}"),
    }

    let ack = producer_rx.recv().await.unwrap();
    assert!(matches!(ack, ServerEvent::Ack { success: true, .. }));
}

/// S6 — a producer learns when it should raise or lower its capture rate as
/// viewers join and leave its room.
#[tokio::test]
async fn viewer_join_and_leave_toggles_relay_viewers() {
    let hub = Hub::new(HubConfig::default());
    let producer = Uuid::new_v4();
    let consumer = Uuid::new_v4();
    let mut producer_rx = hub.accept_connection(producer).await;
    let _consumer_rx = hub.accept_connection(consumer).await;

    hub.handle_event(
        producer,
        ClientEvent::SessionMetadata {
            session_id: "S1".into(),
            track_name: "Silverstone".into(),
            session_type: "race".into(),
        },
    )
    .await;
    let _ = producer_rx.recv().await;
    let _ = producer_rx.recv().await;

    hub.handle_event(
        producer,
        ClientEvent::RelayRegister {
            session_id: "S1".into(),
        },
    )
    .await;
    let _ = producer_rx.recv().await; // relay:register ack/reply

    join_room(&hub, consumer, "S1").await;
    let joined = producer_rx.recv().await.unwrap();
    match joined {
        ServerEvent::RelayViewers {
            session_id,
            viewer_count,
            request_controls,
        } => {
            assert_eq!(session_id, "S1");
            assert_eq!(viewer_count, 1);
            assert!(request_controls);
        }
        other => panic!("expected relay:viewers, got {other:?}"),
    }

    hub.handle_event(
        consumer,
        ClientEvent::RoomLeave {
            session_id: "S1".into(),
        },
    )
    .await;
    let left = producer_rx.recv().await.unwrap();
    match left {
        ServerEvent::RelayViewers {
            viewer_count,
            request_controls,
            ..
        } => {
            assert_eq!(viewer_count, 0);
            assert!(!request_controls);
        }
        other => panic!("expected relay:viewers, got {other:?}"),
    }
}

/// S7 — a session with no traffic for longer than its stale threshold is
/// reaped, and rejoining afterward starts from a fresh implicit state rather
/// than resurrecting prior driver records.
#[tokio::test]
async fn stale_session_is_reaped_and_does_not_resurrect_driver_state() {
    let hub = Hub::new(fast_reap_config());
    let producer = Uuid::new_v4();
    let mut producer_rx = hub.accept_connection(producer).await;

    hub.handle_event(
        producer,
        ClientEvent::Telemetry {
            session_id: "S1".into(),
            session_time_ms: Some(0.0),
            cars: vec![TelemetryCar {
                car_id: 7,
                driver_id: None,
                driver_name: Some("A".into()),
                position: Some(1),
                lap: Some(2),
                pos: TelemetryPos { s: 0.5 },
                speed: Some(90.0),
            }],
        },
    )
    .await;
    let _ = producer_rx.recv().await; // timing:update

    assert!(hub.sessions.get(&"S1".to_string()).await.is_some());

    tokio::time::sleep(Duration::from_millis(150)).await;
    hub.reap().await;

    assert!(hub.sessions.get(&"S1".to_string()).await.is_none());

    hub.handle_event(
        producer,
        ClientEvent::Telemetry {
            session_id: "S1".into(),
            session_time_ms: Some(1.0),
            cars: vec![TelemetryCar {
                car_id: 7,
                driver_id: None,
                driver_name: None,
                position: None,
                lap: None,
                pos: TelemetryPos { s: 0.1 },
                speed: Some(10.0),
            }],
        },
    )
    .await;

    let session = hub.sessions.get(&"S1".to_string()).await.unwrap();
    let driver = session.drivers.get("7").expect("driver re-created implicitly");
    assert_ne!(
        driver.speed,
        Some(90.0),
        "prior driver record should not have survived the reap"
    );
}
