//! REST routes.

use crate::error::{ProtocolError, ProtocolResult};
use crate::http::Method;
use crate::API_PREFIX;
use calcsync_core::{ClientId, EntityType};

/// A REST operation, independent of its textual path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `POST /api/sync/{entityType}`
    Upload(EntityType),
    /// `GET /api/sync/{entityType}`
    Download(EntityType),
    /// `DELETE /api/sync/{entityType}/{clientId}`
    Delete(EntityType, ClientId),
    /// `POST /api/devices`
    RegisterDevice,
}

impl Endpoint {
    /// Request method.
    #[must_use]
    pub const fn method(&self) -> Method {
        match self {
            Endpoint::Upload(_) | Endpoint::RegisterDevice => Method::Post,
            Endpoint::Download(_) => Method::Get,
            Endpoint::Delete(..) => Method::Delete,
        }
    }

    /// Request path.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Endpoint::Upload(entity) | Endpoint::Download(entity) => {
                format!("{API_PREFIX}/sync/{}", entity.path_segment())
            }
            Endpoint::Delete(entity, client_id) => {
                format!("{API_PREFIX}/sync/{}/{client_id}", entity.path_segment())
            }
            Endpoint::RegisterDevice => format!("{API_PREFIX}/devices"),
        }
    }

    /// Maps a method and path to an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownRoute`] if nothing matches, including
    /// unknown entity segments and malformed client ids.
    pub fn parse(method: Method, path: &str) -> ProtocolResult<Self> {
        let unknown = || ProtocolError::UnknownRoute {
            method: method.to_string(),
            path: path.to_string(),
        };
        let rest = path
            .strip_prefix(API_PREFIX)
            .ok_or_else(unknown)?
            .trim_end_matches('/');
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

        match (method, segments.as_slice()) {
            (Method::Post, ["devices"]) => Ok(Endpoint::RegisterDevice),
            (Method::Post, ["sync", entity]) => {
                entity_of(entity).map(Endpoint::Upload).ok_or_else(unknown)
            }
            (Method::Get, ["sync", entity]) => {
                entity_of(entity).map(Endpoint::Download).ok_or_else(unknown)
            }
            (Method::Delete, ["sync", entity, id]) => {
                let entity = entity_of(entity).ok_or_else(unknown)?;
                let client_id: ClientId = id.parse().map_err(|_| unknown())?;
                Ok(Endpoint::Delete(entity, client_id))
            }
            _ => Err(unknown()),
        }
    }
}

fn entity_of(segment: &str) -> Option<EntityType> {
    EntityType::from_path_segment(segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_endpoint_parses_back() {
        let id = ClientId::new();
        for endpoint in [
            Endpoint::Upload(EntityType::Calculation),
            Endpoint::Download(EntityType::ParameterSet),
            Endpoint::Delete(EntityType::Calculation, id),
            Endpoint::RegisterDevice,
        ] {
            assert_eq!(Endpoint::parse(endpoint.method(), &endpoint.path()).unwrap(), endpoint);
        }
    }

    #[test]
    fn paths_use_plural_segments() {
        assert_eq!(
            Endpoint::Upload(EntityType::ParameterSet).path(),
            "/api/sync/parameter_sets"
        );
    }

    #[test]
    fn unknown_routes_are_rejected() {
        for (method, path) in [
            (Method::Get, "/api/sync/widgets"),
            (Method::Delete, "/api/sync/calculations/not-a-uuid"),
            (Method::Get, "/api/devices"),
            (Method::Post, "/sync/calculations"),
        ] {
            assert!(matches!(
                Endpoint::parse(method, path),
                Err(ProtocolError::UnknownRoute { .. })
            ));
        }
    }
}
