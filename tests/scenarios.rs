// tests/scenarios.rs
//! End-to-end storage and upload scenarios

use event_pipeline::event::FeatureKind;
use event_pipeline::storage::config::{FilePersistenceConfig, PayloadDecoration};
use event_pipeline::storage::consent::{ConsentProvider, TrackingConsent};
use event_pipeline::storage::consent_aware::ConsentAwareStorage;
use event_pipeline::storage::migrator::RevocationPolicy;
use event_pipeline::storage::orchestrator::BatchFileOrchestrator;
use event_pipeline::storage::reader::{Batch, BatchFileReader};
use event_pipeline::storage::writer::BatchFileWriter;
use event_pipeline::upload::{AlwaysReady, DataUploader, UploadRunner, UploadStatus};
use event_pipeline::utils::config::UploadConfig;
use event_pipeline::utils::time::FakeTimeProvider;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Store {
    _dir: TempDir,
    clock: Arc<FakeTimeProvider>,
    writer: BatchFileWriter,
    reader: BatchFileReader,
}

fn store(config: FilePersistenceConfig, decoration: PayloadDecoration) -> Store {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(FakeTimeProvider::default());
    let orchestrator = Arc::new(BatchFileOrchestrator::new(
        dir.path().join("store"),
        config,
        clock.clone(),
        "scenario",
    ));
    Store {
        writer: BatchFileWriter::new(Arc::clone(&orchestrator), &decoration),
        reader: BatchFileReader::new(orchestrator, decoration),
        clock,
        _dir: dir,
    }
}

fn granted_storage(dir: &TempDir, clock: Arc<FakeTimeProvider>) -> Arc<ConsentAwareStorage> {
    ConsentAwareStorage::new(
        dir.path(),
        FeatureKind::Logs,
        FilePersistenceConfig {
            recent_delay_ms: 1_000,
            ..Default::default()
        },
        clock,
        Arc::new(ConsentProvider::new(TrackingConsent::Granted)),
        RevocationPolicy::Retain,
    )
    .unwrap()
}

fn runner(storage: &Arc<ConsentAwareStorage>, uploader: Arc<dyn DataUploader>) -> UploadRunner {
    UploadRunner::new(
        Arc::clone(storage),
        uploader,
        Arc::new(AlwaysReady),
        Arc::new(AlwaysReady),
        UploadConfig::default(),
    )
}

#[test]
fn scenario_a_rotation_by_item_count() {
    let s = store(
        FilePersistenceConfig {
            max_items_per_batch: 32,
            recent_delay_ms: 1_000,
            ..Default::default()
        },
        PayloadDecoration::json_array(),
    );

    for i in 0..96 {
        assert!(s.writer.write_event(&i));
    }
    s.clock.advance(2_000);

    let mut expected = 0;
    for _ in 0..3 {
        let batch = s.reader.read_next_batch().unwrap();
        let items: Vec<i32> = serde_json::from_slice(&batch.payload).unwrap();
        assert_eq!(items, (expected..expected + 32).collect::<Vec<_>>());
        expected += 32;
        s.reader.drop_batch(&batch.id);
    }
    assert!(s.reader.read_next_batch().is_none());
}

#[test]
fn scenario_b_oversized_item_is_never_persisted() {
    let s = store(
        FilePersistenceConfig {
            max_batch_size_bytes: 128,
            max_disk_space_bytes: 1024,
            recent_delay_ms: 1_000,
            ..Default::default()
        },
        PayloadDecoration::newline(),
    );

    assert!(!s.writer.write_bytes(&[b'x'; 129]));
    s.clock.advance(2_000);

    assert!(s.reader.read_next_batch().is_none());
}

#[test]
fn scenario_c_dropped_batch_is_gone() {
    let s = store(
        FilePersistenceConfig {
            recent_delay_ms: 1_000,
            ..Default::default()
        },
        PayloadDecoration::newline(),
    );
    s.writer.write_bytes(b"only");
    s.clock.advance(2_000);

    let batch = s.reader.read_next_batch().unwrap();
    s.reader.drop_batch(&batch.id);

    assert!(s.reader.read_next_batch().is_none());
}

#[test]
fn scenario_d_success_drops_and_speeds_up() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(FakeTimeProvider::default());
    let storage = granted_storage(&dir, clock.clone());
    storage.write_bytes(b"{}");
    clock.advance(2_000);

    let runner = runner(
        &storage,
        Arc::new(|_: &Batch| UploadStatus::from_http_code(200)),
    );
    runner.run_once();

    assert!(storage.authorized_store().get_all_files().is_empty());
    assert_eq!(runner.current_delay(), Duration::from_millis(4_500));
}

#[test]
fn scenario_e_failures_release_and_slow_down() {
    for status in [UploadStatus::from_http_code(500), UploadStatus::NetworkError] {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FakeTimeProvider::default());
        let storage = granted_storage(&dir, clock.clone());
        storage.write_bytes(b"{}");
        clock.advance(2_000);

        let runner = runner(&storage, Arc::new(move |_: &Batch| status));
        runner.run_once();

        assert_eq!(storage.authorized_store().get_all_files().len(), 1);
        assert_eq!(runner.current_delay(), Duration::from_millis(5_500));

        for _ in 0..50 {
            runner.run_once();
        }
        assert_eq!(runner.current_delay(), Duration::from_millis(20_000));
    }
}

#[test]
fn scenario_f_grant_moves_pending_to_authorized() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(FakeTimeProvider::default());
    let consent = Arc::new(ConsentProvider::new(TrackingConsent::Pending));
    let storage = ConsentAwareStorage::new(
        dir.path(),
        FeatureKind::Rum,
        FilePersistenceConfig {
            max_items_per_batch: 2,
            recent_delay_ms: 1_000,
            ..Default::default()
        },
        clock.clone(),
        consent.clone(),
        RevocationPolicy::Retain,
    )
    .unwrap();
    for i in 0..5 {
        storage.write_bytes(format!("event{}", i).as_bytes());
    }
    assert_eq!(storage.pending_store().get_all_files().len(), 3);

    consent.set_consent(TrackingConsent::Granted);
    storage.wait_for_migrations();
    clock.advance(2_000);

    assert!(storage.pending_store().get_all_files().is_empty());
    let mut lines = Vec::new();
    while let Some(batch) = storage.read_next_batch() {
        let text = String::from_utf8(batch.payload.to_vec()).unwrap();
        lines.extend(text.split('\n').map(str::to_string));
        storage.drop_batch(&batch.id);
    }
    assert_eq!(lines, ["event0", "event1", "event2", "event3", "event4"]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn round_trip_preserves_items_and_order(
        items in prop::collection::vec("[a-zA-Z0-9 ]{1,24}", 1..32)
    ) {
        let s = store(
            FilePersistenceConfig {
                max_items_per_batch: 32,
                recent_delay_ms: 1_000,
                ..Default::default()
            },
            PayloadDecoration::json_array(),
        );
        for item in &items {
            prop_assert!(s.writer.write_event(item));
        }
        s.clock.advance(2_000);

        let batch = s.reader.read_next_batch().unwrap();
        let read: Vec<String> = serde_json::from_slice(&batch.payload).unwrap();
        prop_assert_eq!(read, items);
        s.reader.drop_batch(&batch.id);
        prop_assert!(s.reader.read_next_batch().is_none());
    }

    #[test]
    fn disk_quota_holds_after_every_write(
        sizes in prop::collection::vec(1usize..200, 1..80),
        tick_ms in 0i64..400,
    ) {
        let s = store(
            FilePersistenceConfig {
                max_batch_size_bytes: 256,
                max_items_per_batch: 4,
                max_item_size_bytes: 256,
                max_disk_space_bytes: 1_024,
                recent_delay_ms: 1_000,
                cleanup_frequency_ms: 0,
                ..Default::default()
            },
            PayloadDecoration::newline(),
        );
        let orchestrator = s.reader.orchestrator();

        for size in sizes {
            s.writer.write_bytes(&vec![b'x'; size]);
            prop_assert!(orchestrator.disk_usage() <= 1_024);
            s.clock.advance(tick_ms);
        }
    }
}
