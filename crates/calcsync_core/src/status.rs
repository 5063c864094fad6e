//! Sync status and entity types.

text_enum! {
    /// Synchronization state of a locally persisted record.
    ///
    /// ```text
    /// pending ──► syncing ──► synced
    ///    ▲           │
    ///    │           ├──► failed ───┐
    ///    │           └──► conflict ─┤
    ///    └──────────────────────────┘  (explicit retry or resolution)
    /// ```
    ///
    /// A synced record goes back to pending when it is edited locally.
    pub enum SyncStatus {
        /// Waiting to be uploaded.
        Pending => "pending",
        /// Upload in flight.
        Syncing => "syncing",
        /// Remote side holds this version.
        Synced => "synced",
        /// Diverged from the remote version and awaiting resolution.
        Conflict => "conflict",
        /// Upload rejected; needs manual retry.
        Failed => "failed",
    }
}

impl SyncStatus {
    /// Returns true if the state machine allows moving to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: SyncStatus) -> bool {
        use SyncStatus::*;
        match (self, next) {
            (Pending, Syncing) => true,
            (Syncing, Synced | Failed | Conflict | Pending) => true,
            (Conflict | Failed, Pending) => true,
            (Synced, Pending) => true,
            // Applying a remote version or resolving a conflict settles a row directly.
            (Pending | Conflict, Synced) => true,
            (Pending, Conflict) => true,
            (a, b) => a == b,
        }
    }

    /// Returns true if the row holds local changes the remote side lacks.
    #[must_use]
    pub fn has_local_changes(self) -> bool {
        matches!(
            self,
            SyncStatus::Pending | SyncStatus::Syncing | SyncStatus::Failed | SyncStatus::Conflict
        )
    }
}

text_enum! {
    /// Kind of synchronized entity.
    pub enum EntityType {
        /// A persisted calculation result.
        Calculation => "calculation",
        /// A named parameter set.
        ParameterSet => "parameter_set",
    }
}

impl EntityType {
    /// Path segment used by the REST surface.
    #[must_use]
    pub const fn path_segment(self) -> &'static str {
        match self {
            EntityType::Calculation => "calculations",
            EntityType::ParameterSet => "parameter_sets",
        }
    }

    /// Parses a REST path segment.
    #[must_use]
    pub fn from_path_segment(segment: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|entity| entity.path_segment() == segment)
    }

    /// Local table holding this entity.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            EntityType::Calculation => "calculations",
            EntityType::ParameterSet => "parameter_sets",
        }
    }
}
