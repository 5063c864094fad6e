//! Remote store client.

use crate::error::{SyncError, SyncResult};
use crate::http::HttpClient;
use calcsync_core::{format_timestamp, ClientId, DeviceInfo, EntityType, Timestamp};
use calcsync_protocol::{
    headers, ConflictResponse, Credentials, DeviceRegistration, DownloadResponse, Endpoint,
    HttpRequest, HttpResponse, RecordSnapshot, UploadRequest, UploadResponse,
};
use std::sync::Arc;
use std::time::Duration;

/// Acknowledgement of a stored upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadAck {
    /// Server-assigned id.
    pub server_id: String,
    /// New server version of the record.
    pub server_timestamp: Timestamp,
    /// True when the upload created the remote row.
    pub created: bool,
}

/// Records changed on the server since a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadBatch {
    /// Changed records, tombstones included.
    pub records: Vec<RecordSnapshot>,
    /// Server time of the listing; the next checkpoint.
    pub server_time: Timestamp,
}

/// The authoritative remote store.
///
/// Implementations must be idempotent on retry: uploading the same client
/// id twice never creates two remote rows.
pub trait RemoteStore: Send + Sync {
    /// Uploads a record based on the server version `base` the client last
    /// saw.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Conflict`] with the server's version when the
    /// server row has moved on, and network, auth, server or timeout errors
    /// otherwise.
    fn upload(
        &self,
        entity_type: EntityType,
        record: &RecordSnapshot,
        base: Option<Timestamp>,
        credentials: &Credentials,
    ) -> SyncResult<UploadAck>;

    /// Lists records changed strictly after `since`.
    ///
    /// # Errors
    ///
    /// Returns network, auth, server or timeout errors.
    fn download(
        &self,
        entity_type: EntityType,
        since: Option<Timestamp>,
        credentials: &Credentials,
    ) -> SyncResult<DownloadBatch>;

    /// Deletes a record. Deleting an unknown record succeeds.
    ///
    /// # Errors
    ///
    /// Returns network, auth, server or timeout errors.
    fn delete(
        &self,
        entity_type: EntityType,
        client_id: &ClientId,
        credentials: &Credentials,
    ) -> SyncResult<()>;

    /// Registers or refreshes this device.
    ///
    /// # Errors
    ///
    /// Returns network, auth, server or timeout errors.
    fn register_device(&self, info: &DeviceInfo, credentials: &Credentials) -> SyncResult<()>;
}

impl<R: RemoteStore + ?Sized> RemoteStore for Arc<R> {
    fn upload(
        &self,
        entity_type: EntityType,
        record: &RecordSnapshot,
        base: Option<Timestamp>,
        credentials: &Credentials,
    ) -> SyncResult<UploadAck> {
        (**self).upload(entity_type, record, base, credentials)
    }

    fn download(
        &self,
        entity_type: EntityType,
        since: Option<Timestamp>,
        credentials: &Credentials,
    ) -> SyncResult<DownloadBatch> {
        (**self).download(entity_type, since, credentials)
    }

    fn delete(
        &self,
        entity_type: EntityType,
        client_id: &ClientId,
        credentials: &Credentials,
    ) -> SyncResult<()> {
        (**self).delete(entity_type, client_id, credentials)
    }

    fn register_device(&self, info: &DeviceInfo, credentials: &Credentials) -> SyncResult<()> {
        (**self).register_device(info, credentials)
    }
}

/// Whether a remote store is available.
///
/// The orchestrator checks this before any network operation instead of
/// probing an optional collaborator.
pub enum RemoteState<R> {
    /// Remote sync is switched off.
    Disabled {
        /// Why, for status displays.
        reason: String,
    },
    /// Remote sync is available.
    Ready(Arc<R>),
}

impl<R> RemoteState<R> {
    /// Creates a ready state.
    pub fn ready(remote: R) -> Self {
        RemoteState::Ready(Arc::new(remote))
    }

    /// Creates a disabled state.
    pub fn disabled(reason: impl Into<String>) -> Self {
        RemoteState::Disabled {
            reason: reason.into(),
        }
    }

    /// The remote store, if ready.
    pub fn remote(&self) -> Option<&Arc<R>> {
        match self {
            RemoteState::Ready(remote) => Some(remote),
            RemoteState::Disabled { .. } => None,
        }
    }

    /// Returns true if a remote store is available.
    pub fn is_ready(&self) -> bool {
        matches!(self, RemoteState::Ready(_))
    }
}

impl<R> std::fmt::Debug for RemoteState<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteState::Disabled { reason } => {
                f.debug_struct("Disabled").field("reason", reason).finish()
            }
            RemoteState::Ready(_) => f.write_str("Ready"),
        }
    }
}

/// [`RemoteStore`] over the REST surface.
pub struct HttpRemoteStore<C: HttpClient> {
    client: C,
    timeout: Duration,
}

impl<C: HttpClient> HttpRemoteStore<C> {
    /// Creates a remote store sending through `client`.
    pub fn new(client: C, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// The underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn send(&self, request: HttpRequest, credentials: &Credentials) -> SyncResult<HttpResponse> {
        let request = match credentials.authorization() {
            Some(value) => request.with_header(headers::AUTHORIZATION, value),
            None => request,
        };
        tracing::trace!(method = %request.method, path = %request.path, "remote request");
        self.client.send(&request, self.timeout)
    }
}

/// Maps a non-success response to an error.
fn status_error(response: &HttpResponse) -> SyncError {
    let message = response
        .error_body()
        .map(|body| body.message)
        .unwrap_or_else(|| response.body.clone());
    match response.status {
        401 | 403 => SyncError::Auth(message),
        400 | 422 => SyncError::Validation(message),
        408 | 504 => SyncError::Timeout,
        status => SyncError::Server { status, message },
    }
}

impl<C: HttpClient> RemoteStore for HttpRemoteStore<C> {
    fn upload(
        &self,
        entity_type: EntityType,
        record: &RecordSnapshot,
        base: Option<Timestamp>,
        credentials: &Credentials,
    ) -> SyncResult<UploadAck> {
        let body = UploadRequest {
            record: record.clone(),
            base_server_timestamp: base,
        };
        let request = HttpRequest::new(
            Endpoint::Upload(entity_type).method(),
            Endpoint::Upload(entity_type).path(),
        )
        .with_header(headers::IDEMPOTENCY_KEY, record.client_id.to_string())
        .with_json(&body)?;

        let response = self.send(request, credentials)?;
        if response.status == 409 {
            let conflict: ConflictResponse = response.json_body()?;
            return Err(SyncError::Conflict(Box::new(conflict.current)));
        }
        if !response.is_success() {
            return Err(status_error(&response));
        }
        let ack: UploadResponse = response.json_body()?;
        Ok(UploadAck {
            server_id: ack.server_id,
            server_timestamp: ack.server_timestamp,
            created: ack.created,
        })
    }

    fn download(
        &self,
        entity_type: EntityType,
        since: Option<Timestamp>,
        credentials: &Credentials,
    ) -> SyncResult<DownloadBatch> {
        let endpoint = Endpoint::Download(entity_type);
        let mut request = HttpRequest::new(endpoint.method(), endpoint.path());
        if let Some(since) = since {
            request = request.with_query("since", format_timestamp(&since));
        }

        let response = self.send(request, credentials)?;
        if !response.is_success() {
            return Err(status_error(&response));
        }
        let body: DownloadResponse = response.json_body()?;
        Ok(DownloadBatch {
            records: body.records,
            server_time: body.server_time,
        })
    }

    fn delete(
        &self,
        entity_type: EntityType,
        client_id: &ClientId,
        credentials: &Credentials,
    ) -> SyncResult<()> {
        let endpoint = Endpoint::Delete(entity_type, *client_id);
        let request = HttpRequest::new(endpoint.method(), endpoint.path());
        let response = self.send(request, credentials)?;
        if response.is_success() || response.status == 404 {
            Ok(())
        } else {
            Err(status_error(&response))
        }
    }

    fn register_device(&self, info: &DeviceInfo, credentials: &Credentials) -> SyncResult<()> {
        let endpoint = Endpoint::RegisterDevice;
        let request = HttpRequest::new(endpoint.method(), endpoint.path())
            .with_json(&DeviceRegistration::from(info))?;
        let response = self.send(request, credentials)?;
        if response.is_success() {
            Ok(())
        } else {
            Err(status_error(&response))
        }
    }
}
