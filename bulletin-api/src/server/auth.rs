use crate::server::ServerError;
use axum::{
    extract::{FromRef, FromRequestParts, OptionalFromRequestParts},
    http::request::Parts,
};
use axum_extra::TypedHeader;
use bulletin_common::{
    model::{
        Id,
        auth::AuthToken,
        user::{UserMarker, UserRole},
    },
    permission::Requester,
};
use bulletin_db::client::DbClient;
use headers::{Authorization, authorization::Bearer};
use std::sync::Arc;
use time::UtcDateTime;
use tracing::debug;

type AuthorizationHeader = TypedHeader<Authorization<Bearer>>;

/// Without an `Authorization` header the extractor yields `None`.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct AuthenticatedUser {
    id: Id<UserMarker>,
    role: UserRole,
}

impl AuthenticatedUser {
    #[must_use]
    pub fn requester(self) -> Requester {
        Requester {
            id: self.id,
            role: self.role,
        }
    }

    async fn from_token(token: &str, db: &DbClient) -> Result<Self, ServerError> {
        let request_token: AuthToken = token.parse()?;
        let token_hash = request_token.hash()?;

        let authentication = db
            .fetch_auth(&token_hash)
            .await?
            .ok_or(ServerError::InvalidToken)?;

        if authentication.user != request_token.user_id
            || authentication.is_expired_at(UtcDateTime::now())
        {
            debug!(user_id = %request_token.user_id, "Rejecting stale or mismatched token");
            return Err(ServerError::InvalidToken);
        }

        Ok(Self {
            id: authentication.user,
            role: authentication.role,
        })
    }
}

impl<S> OptionalFromRequestParts<S> for AuthenticatedUser
where
    Arc<DbClient>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        match <AuthorizationHeader as FromRequestParts<S>>::from_request_parts(parts, state).await
        {
            Ok(header) => Self::from_token(header.token(), &Arc::<DbClient>::from_ref(state))
                .await
                .map(Some),
            Err(rejection) if rejection.is_missing() => Ok(None),
            Err(rejection) => Err(ServerError::InvalidAuthorizationHeader(rejection)),
        }
    }
}
