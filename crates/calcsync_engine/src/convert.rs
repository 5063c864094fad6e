//! Conversions between stored records and wire snapshots.

use crate::error::SyncResult;
use calcsync_core::{CalculationRecord, EntityType, ParameterSet, SyncStatus};
use calcsync_protocol::{RecordSnapshot, Syncable};
use calcsync_store::StoredRecord;

/// Wire form of a stored record.
pub(crate) fn snapshot_of(record: &StoredRecord) -> RecordSnapshot {
    match record {
        StoredRecord::Calculation(r) => r.to_snapshot(),
        StoredRecord::ParameterSet(r) => r.to_snapshot(),
    }
}

/// Builds a record to store from a snapshot, in the given sync status.
pub(crate) fn record_from(
    snapshot: &RecordSnapshot,
    status: SyncStatus,
) -> SyncResult<StoredRecord> {
    Ok(match snapshot.entity_type {
        EntityType::Calculation => {
            let mut record = CalculationRecord::from_snapshot(snapshot)?;
            record.sync_status = status;
            StoredRecord::Calculation(record)
        }
        EntityType::ParameterSet => {
            let mut set = ParameterSet::from_snapshot(snapshot)?;
            set.sync_status = status;
            StoredRecord::ParameterSet(set)
        }
    })
}

/// Runs model validation on a stored record.
pub(crate) fn validate(record: &StoredRecord) -> SyncResult<()> {
    match record {
        StoredRecord::Calculation(r) => r.validate()?,
        StoredRecord::ParameterSet(r) => r.validate()?,
    }
    Ok(())
}
