use axum::{extract::FromRequestParts, http::request::Parts};
use hearth_core::{Actor, ActorRole};
use uuid::Uuid;

use crate::error::AppError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// The caller as asserted by the gateway in front of this service.
///
/// Token verification happens upstream; by the time a request arrives here
/// the actor headers are trusted.
#[derive(Debug, Clone, Copy)]
pub struct CurrentActor(pub Actor);

impl CurrentActor {
    /// The actor's id, if it acts in `role`.
    pub fn require(&self, role: ActorRole) -> Result<Uuid, AppError> {
        match (self.0.role == role, self.0.id) {
            (true, Some(id)) => Ok(id),
            _ => Err(AppError::AuthorizationError(format!(
                "{} role required",
                role.as_str()
            ))),
        }
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|h| h.to_str().ok())
}

impl<S> FromRequestParts<S> for CurrentActor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let role = header(parts, ACTOR_ROLE_HEADER)
            .ok_or_else(|| AppError::AuthenticationError("Missing actor role".into()))?;
        let role = ActorRole::parse(role)
            .filter(|r| *r != ActorRole::System)
            .ok_or_else(|| AppError::AuthenticationError("Unknown actor role".into()))?;

        let id = header(parts, ACTOR_ID_HEADER)
            .ok_or_else(|| AppError::AuthenticationError("Missing actor id".into()))?;
        let id = Uuid::parse_str(id)
            .map_err(|_| AppError::AuthenticationError("Malformed actor id".into()))?;

        Ok(CurrentActor(Actor { id: Some(id), role }))
    }
}
