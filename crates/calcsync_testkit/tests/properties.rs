//! Properties that hold for any generated input.

use calcsync_core::{
    CalculationRecord, Clock, ConflictStrategy, EntityType, NewQueueItem, ParameterSet,
    QueueOperation,
};
use calcsync_engine::{OfflineQueueManager, QueueConfig, SyncConfig};
use calcsync_protocol::conflict::{resolve, MergePolicy, Winner};
use calcsync_protocol::Syncable;
use calcsync_testkit::prelude::*;
use proptest::prelude::*;
use std::time::Duration;

proptest! {
    #[test]
    fn saved_calculation_reads_back_equal(record in calculation_strategy()) {
        let store = TestStore::memory();
        let id = store.save_calculation(&record).unwrap();
        let loaded = store.find_calculation(&record.client_id).unwrap().unwrap();
        prop_assert_eq!(loaded, CalculationRecord { id: Some(id), ..record });
    }

    #[test]
    fn saved_parameter_set_reads_back_equal(set in parameter_set_strategy()) {
        let store = TestStore::memory();
        let id = store.save_parameter_set(&set).unwrap();
        let loaded = store.find_parameter_set(&set.client_id).unwrap().unwrap();
        prop_assert_eq!(loaded, ParameterSet { id: Some(id), ..set });
    }

    #[test]
    fn keep_newest_keeps_the_later_content((local, remote) in divergent_snapshots_strategy()) {
        let policy = MergePolicy::for_entity(EntityType::Calculation);
        let forward = resolve(&local, &remote, ConflictStrategy::KeepNewest, &policy);
        let backward = resolve(&remote, &local, ConflictStrategy::KeepNewest, &policy);

        if local.effective_timestamp() != remote.effective_timestamp() {
            let newest = if local.effective_timestamp() > remote.effective_timestamp() {
                &local
            } else {
                &remote
            };
            prop_assert_eq!(&forward.record.data, &newest.data);
            prop_assert_eq!(&backward.record.data, &newest.data);
        } else {
            // Ties go to the local side.
            prop_assert_eq!(forward.winner, Winner::Local);
            prop_assert_eq!(backward.winner, Winner::Local);
        }
    }

    #[test]
    fn resolution_always_adopts_the_server_version(
        (local, mut remote) in divergent_snapshots_strategy(),
        strategy in conflict_strategy_strategy(),
        server_at in timestamp_strategy(),
    ) {
        remote.server_id = Some("srv-1".into());
        remote.server_timestamp = Some(server_at);
        let policy = MergePolicy::for_entity(EntityType::Calculation);
        let resolution = resolve(&local, &remote, strategy, &policy);
        prop_assert_eq!(resolution.record.server_timestamp, Some(server_at));
        prop_assert_eq!(resolution.record.server_id.as_deref(), Some("srv-1"));
        prop_assert_eq!(resolution.record.client_id, local.client_id);
    }

    #[test]
    fn queue_drains_by_priority_then_age(
        priorities in prop::collection::vec(queue_priority_strategy(), 1..12),
    ) {
        let store = TestStore::memory();
        let queue =
            OfflineQueueManager::new(store.shared(), QueueConfig::new().with_batch_size(50));
        let mut enqueued = Vec::new();
        for (n, priority) in priorities.iter().enumerate() {
            let id = queue
                .enqueue(
                    NewQueueItem::new(
                        QueueOperation::Sync,
                        EntityType::Calculation,
                        format!("rec-{n}"),
                    )
                    .with_priority(*priority),
                )
                .unwrap();
            enqueued.push((priority.rank(), n, id));
            store.clock.advance(Duration::from_millis(10));
        }
        enqueued.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        let expected: Vec<_> = enqueued.into_iter().map(|(_, _, id)| id).collect();

        let order = parking_lot::Mutex::new(Vec::new());
        let executor = |item: &calcsync_core::OfflineQueueItem| {
            order.lock().push(item.id);
            Ok::<(), calcsync_engine::SyncError>(())
        };
        queue.drain(&executor).unwrap();
        prop_assert_eq!(order.into_inner(), expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn offline_edits_converge_on_the_later_write(
        gap_secs in 1u64..120,
        phone_first in any::<bool>(),
    ) {
        let fleet = Fleet::new();
        let phone = fleet.device("phone");
        let tablet = fleet.device("tablet");
        let (first, second) = if phone_first { (&phone, &tablet) } else { (&tablet, &phone) };

        let shared = sample_calculation("phone", &fleet.clock);
        let client_id = shared.client_id;
        let mut early = shared.clone();
        early.device_id = first.info.device_id.clone();
        early.notes = Some("early".into());
        first.writer.save_calculation(early).unwrap();

        fleet.tick(Duration::from_secs(gap_secs));
        let mut late = shared.with_updated_at(fleet.clock.now());
        late.device_id = second.info.device_id.clone();
        late.notes = Some("late".into());
        second.writer.save_calculation(late).unwrap();
        fleet.tick(Duration::from_secs(60));

        fleet.sync_all(&[&phone, &tablet, &tablet, &phone]);

        for device in [&phone, &tablet] {
            let row = device.store.find_calculation(&client_id).unwrap().unwrap();
            prop_assert_eq!(row.notes.as_deref(), Some("late"));
        }
        prop_assert_eq!(fleet.server_records(), 1);
    }
}

#[test]
fn generated_records_survive_the_wire_form() {
    let mut runner = proptest::test_runner::TestRunner::default();
    runner
        .run(&calculation_strategy(), |record| {
            let back = CalculationRecord::from_snapshot(&record.to_snapshot()).unwrap();
            prop_assert_eq!(back.parameters, record.parameters);
            prop_assert_eq!(back.notes, record.notes);
            Ok(())
        })
        .unwrap();
}

#[test]
fn default_sync_config_keeps_newest() {
    assert_eq!(SyncConfig::new().strategy, ConflictStrategy::KeepNewest);
}
