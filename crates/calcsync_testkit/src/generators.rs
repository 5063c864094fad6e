//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records that pass validation, plus
//! the raw pieces they are built from.

use crate::fixtures::EPOCH_MILLIS;
use calcsync_core::{
    CalculationRecord, CalculationType, ClientId, ConflictStrategy, DeviceId, ParameterSet,
    QueuePriority, Timestamp,
};
use calcsync_protocol::{RecordSnapshot, Syncable};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Strategy for generating client IDs.
pub fn client_id_strategy() -> impl Strategy<Value = ClientId> {
    any::<u128>().prop_map(|bits| ClientId::from_uuid(Uuid::from_u128(bits)))
}

/// Strategy for generating device IDs.
pub fn device_id_strategy() -> impl Strategy<Value = DeviceId> {
    prop::string::string_regex("[a-z][a-z0-9-]{2,15}")
        .expect("Invalid regex")
        .prop_map(DeviceId::new)
}

/// Strategy for millisecond timestamps within a year of [`EPOCH_MILLIS`].
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    (0i64..31_536_000_000).prop_map(|offset| {
        Utc.timestamp_millis_opt(EPOCH_MILLIS + offset)
            .single()
            .expect("timestamp in range")
    })
}

/// Strategy for calculation types.
pub fn calculation_type_strategy() -> impl Strategy<Value = CalculationType> {
    prop::sample::select(CalculationType::ALL.to_vec())
}

/// Strategy for queue priorities.
pub fn queue_priority_strategy() -> impl Strategy<Value = QueuePriority> {
    prop::sample::select(QueuePriority::ALL.to_vec())
}

/// Strategy for conflict strategies.
pub fn conflict_strategy_strategy() -> impl Strategy<Value = ConflictStrategy> {
    prop::sample::select(ConflictStrategy::ALL.to_vec())
}

/// Strategy for JSON scalars that survive a text round trip exactly.
pub fn json_scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::from),
        Just(Value::Null),
    ]
}

/// Strategy for parameter payloads: a flat JSON object.
pub fn parameters_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-z][a-z_]{0,11}", json_scalar_strategy(), 1..6)
        .prop_map(|fields| Value::Object(fields.into_iter().collect::<Map<_, _>>()))
}

/// Strategy for optional free text.
pub fn optional_text_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of("[a-zA-Z0-9 ,.-]{1,40}")
}

/// Strategy for pending calculation records.
pub fn calculation_strategy() -> impl Strategy<Value = CalculationRecord> {
    (
        client_id_strategy(),
        calculation_type_strategy(),
        parameters_strategy(),
        parameters_strategy(),
        device_id_strategy(),
        timestamp_strategy(),
        optional_text_strategy(),
        optional_text_strategy(),
    )
        .prop_map(
            |(client_id, kind, parameters, result, device, created_at, project, notes)| {
                let mut record =
                    CalculationRecord::new(kind, parameters, result, device, created_at)
                        .with_client_id(client_id);
                record.project_name = project;
                record.notes = notes;
                record
            },
        )
}

/// Strategy for pending, non-preset parameter sets.
pub fn parameter_set_strategy() -> impl Strategy<Value = ParameterSet> {
    (
        client_id_strategy(),
        "[A-Z][a-zA-Z0-9 ]{0,23}",
        calculation_type_strategy(),
        parameters_strategy(),
        device_id_strategy(),
        timestamp_strategy(),
        prop::collection::vec("[a-z]{1,8}", 0..4),
    )
        .prop_map(|(client_id, name, kind, parameters, device, created_at, tags)| {
            let mut set =
                ParameterSet::new(name, kind, parameters, device, created_at).with_tags(tags);
            set.client_id = client_id;
            set
        })
}

/// Strategy for two versions of the same calculation, as seen from two
/// devices: each side has its own content, device and edit time.
pub fn divergent_snapshots_strategy() -> impl Strategy<Value = (RecordSnapshot, RecordSnapshot)> {
    (
        calculation_strategy(),
        parameters_strategy(),
        device_id_strategy(),
        timestamp_strategy(),
        timestamp_strategy(),
    )
        .prop_map(|(record, other_result, other_device, local_at, remote_at)| {
            let local = record.clone().with_updated_at(local_at.max(record.created_at));
            let mut remote = record.with_updated_at(remote_at.max(local.created_at));
            remote.result = other_result;
            remote.device_id = other_device;
            (local.to_snapshot(), remote.to_snapshot())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_calculations_validate(record in calculation_strategy()) {
            prop_assert!(record.validate().is_ok());
        }

        #[test]
        fn generated_parameter_sets_validate(set in parameter_set_strategy()) {
            prop_assert!(set.validate().is_ok());
        }

        #[test]
        fn divergent_snapshots_share_identity((local, remote) in divergent_snapshots_strategy()) {
            prop_assert_eq!(local.client_id, remote.client_id);
            prop_assert_eq!(local.entity_type, remote.entity_type);
        }
    }
}
