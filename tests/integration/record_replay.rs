//! Integration tests for the capture flow
//!
//! Tests the flow: MockBusClient deliveries -> Recorder -> event store ->
//! Replayer -> MockBusClient publishes.

use std::sync::Arc;
use std::time::Duration;

use mqtt_logger::bus::mock::MockBusClient;
use mqtt_logger::capture::RecorderState;
use mqtt_logger::{
    PlaybackReport, Recorder, RecorderConfig, ReplayError, Replayer, ReplayerConfig, RunId,
};
use tokio::time::Instant;

use super::common::fixtures::TestStore;

fn recorder_config(store: &TestStore, topics: &[&str]) -> RecorderConfig {
    RecorderConfig {
        database_path: store.path.clone(),
        topics: topics.iter().map(|t| t.to_string()).collect(),
    }
}

fn replayer_config(store: &TestStore, topics: Option<&[&str]>) -> ReplayerConfig {
    ReplayerConfig {
        database_path: store.path.clone(),
        topics: topics.map(|topics| topics.iter().map(|t| t.to_string()).collect()),
        run: None,
    }
}

/// Messages recorded by the recorder come back out of the replayer unchanged
#[tokio::test]
async fn test_recorded_messages_replay_in_order() {
    let store = TestStore::empty();
    let capture_bus = Arc::new(MockBusClient::new());
    let recorder = Recorder::new(&recorder_config(&store, &["sensors/#"]), capture_bus.clone())
        .await
        .expect("Failed to create recorder");

    let run_id = recorder.start().unwrap();
    assert!(capture_bus.deliver("sensors/temp", b"21.5".to_vec()).await);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(capture_bus.deliver("sensors/raw", vec![0u8, 159, 255]).await);
    // Not subscribed, never delivered
    assert!(!capture_bus.deliver("other/topic", b"x".to_vec()).await);
    recorder.stop().await.unwrap();
    assert_eq!(recorder.state(), RecorderState::Stopped);

    assert_eq!(store.topics_for_run(run_id), vec!["sensors/temp", "sensors/raw"]);

    let replay_bus = Arc::new(MockBusClient::new());
    let replayer = Replayer::new(&replayer_config(&store, None), replay_bus.clone())
        .await
        .expect("Failed to create replayer");

    let schedule = replayer.schedule(2.0).unwrap();
    let gap = replayer.entries()[1].unix_time - replayer.entries()[0].unix_time;
    assert!(gap > 0.0);
    assert_eq!(schedule[0].offset, Duration::ZERO);
    assert_eq!(schedule[1].offset, Duration::from_secs_f64(gap / 2.0));

    let report = replayer.play(2.0).await.unwrap();
    assert_eq!(report, PlaybackReport { published: 2, failed: 0, cancelled: 0 });

    let published = replay_bus.published();
    assert_eq!(published[0].message.topic, "sensors/temp");
    assert_eq!(published[0].message.payload, b"21.5".to_vec());
    assert_eq!(published[1].message.payload, vec![0u8, 159, 255]);
}

/// Each recorder session appends a new run to the same store
#[tokio::test]
async fn test_sessions_append_runs() {
    let store = TestStore::empty();

    for (expected, topic) in [(1, "a/1"), (2, "a/2")] {
        let bus = Arc::new(MockBusClient::new());
        let recorder = Recorder::new(&recorder_config(&store, &["a/#"]), bus.clone())
            .await
            .unwrap();
        assert_eq!(recorder.start().unwrap(), RunId(expected));
        assert!(bus.deliver(topic, b"v".to_vec()).await);
        recorder.stop().await.unwrap();
    }

    assert_eq!(store.topics_for_run(RunId(1)), vec!["a/1"]);
    assert_eq!(store.topics_for_run(RunId(2)), vec!["a/2"]);

    let bus = Arc::new(MockBusClient::new());
    let config = ReplayerConfig {
        run: Some(RunId(2)),
        ..replayer_config(&store, None)
    };
    let replayer = Replayer::new(&config, bus).await.unwrap();
    assert_eq!(replayer.len(), 1);
    assert_eq!(replayer.entries()[0].topic, "a/2");
}

/// Entries captured 5 seconds apart replay 1 second apart at 5x
#[tokio::test(start_paused = true)]
async fn test_replay_timing_from_store() {
    let store = TestStore::with_runs(&[&[(1000.0, "t/1", "one"), (1005.0, "t/2", "two")]]);
    let bus = Arc::new(MockBusClient::new());
    let replayer = Replayer::new(&replayer_config(&store, Some(&["t/#"])), bus.clone())
        .await
        .unwrap();

    let start = Instant::now();
    replayer.play(5.0).await.unwrap();

    let published = bus.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].at - start, Duration::ZERO);
    let second = published[1].at - start;
    assert!(
        second >= Duration::from_millis(995) && second <= Duration::from_millis(1005),
        "second message published after {second:?}"
    );
}

/// Topic filters select the replay set, and the epoch follows the filtered set
#[tokio::test(start_paused = true)]
async fn test_replay_filters_by_topic() {
    let store = TestStore::with_runs(&[
        &[(10.0, "home/kitchen/temp", "20"), (12.0, "office/temp", "22")],
        &[(20.0, "home/garage/door", "open")],
    ]);
    let bus = Arc::new(MockBusClient::new());
    let replayer = Replayer::new(&replayer_config(&store, Some(&["home/+/temp"])), bus.clone())
        .await
        .unwrap();
    assert_eq!(replayer.len(), 1);
    assert_eq!(replayer.epoch(), Some(10.0));

    let config = replayer_config(&store, Some(&["office/#", "home/garage/#"]));
    let replayer = Replayer::new(&config, bus.clone()).await.unwrap();
    assert_eq!(replayer.epoch(), Some(12.0));

    let start = Instant::now();
    replayer.play(1.0).await.unwrap();
    let published = bus.published();
    assert_eq!(published[0].message.topic, "office/temp");
    assert_eq!(published[1].message.topic, "home/garage/door");
    assert_eq!(published[1].at - start, Duration::from_secs(8));
}

#[tokio::test]
async fn test_replay_with_no_matches_publishes_nothing() {
    let store = TestStore::with_runs(&[&[(1.0, "a/b", "x")]]);
    let bus = Arc::new(MockBusClient::new());
    let replayer = Replayer::new(&replayer_config(&store, Some(&["nothing/#"])), bus.clone())
        .await
        .unwrap();

    assert!(matches!(replayer.play(1.0).await, Err(ReplayError::EmptyReplaySet)));
    assert!(bus.published().is_empty());
}

#[tokio::test]
async fn test_replay_from_empty_or_missing_store() {
    let store = TestStore::with_runs(&[]);
    let bus = Arc::new(MockBusClient::new());

    // Tables exist but hold nothing
    let replayer = Replayer::new(&replayer_config(&store, None), bus.clone())
        .await
        .unwrap();
    assert!(replayer.is_empty());

    let missing = TestStore::empty();
    let result = Replayer::new(&replayer_config(&missing, None), bus).await;
    assert!(matches!(result, Err(ReplayError::Database(_))));
}
