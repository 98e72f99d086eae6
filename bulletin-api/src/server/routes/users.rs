use crate::server::{
    Result, ServerError, ServerRouter, Settings, auth::AuthenticatedUser, json::Json,
};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use bulletin_common::{
    model::{
        Id,
        auth::AuthToken,
        user::{CreateUser, Credentials, UpdateUser, User, UserListEntry, UserMarker},
    },
    permission::{Action, Resource, authorize_role_assignment},
};
use bulletin_db::client::DbClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_users)
        .typed_get(get_user)
        .typed_post(create_user)
        .typed_patch(update_user)
        .typed_delete(delete_user)
        .typed_post(create_token)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/", rejection(ServerError))]
struct UsersPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{id}/", rejection(ServerError))]
struct UserPath {
    id: Id<UserMarker>,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/create/", rejection(ServerError))]
struct CreateUserPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{id}/update/", rejection(ServerError))]
struct UpdateUserPath {
    id: Id<UserMarker>,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{id}/delete/", rejection(ServerError))]
struct DeleteUserPath {
    id: Id<UserMarker>,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/token/", rejection(ServerError))]
struct TokenPath();

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct TokenResponse {
    token: String,
}

async fn list_users(
    UsersPath(): UsersPath,
    State(db): State<Arc<DbClient>>,
    user: Option<AuthenticatedUser>,
) -> Result<Json<Vec<UserListEntry>>> {
    Resource::User.authorize(Action::List, user.map(AuthenticatedUser::requester))?;

    let users = db.list_users().await?;

    Ok(Json(users))
}

async fn get_user(
    UserPath { id }: UserPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<User>> {
    let user = db
        .fetch_user(id)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    Ok(Json(user))
}

async fn create_user(
    CreateUserPath(): CreateUserPath,
    State(db): State<Arc<DbClient>>,
    user: Option<AuthenticatedUser>,
    Json(new_user): Json<CreateUser>,
) -> Result<(StatusCode, Json<User>)> {
    let requester = user.map(AuthenticatedUser::requester);
    Resource::User.authorize(Action::Create, requester)?;
    authorize_role_assignment(requester, new_user.role)?;

    let password_hash = new_user.password.hash()?;
    let created = db.create_user(&new_user, &password_hash).await?;

    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_user(
    UpdateUserPath { id }: UpdateUserPath,
    State(db): State<Arc<DbClient>>,
    user: Option<AuthenticatedUser>,
    Json(update): Json<UpdateUser>,
) -> Result<Json<User>> {
    let requester = user.map(AuthenticatedUser::requester);
    Resource::User.authorize(Action::PartialUpdate, requester)?;
    Resource::User.authorize_object(Action::PartialUpdate, requester, id)?;

    let current = db
        .fetch_user(id)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;
    if let Some(role) = update.role
        && role != current.role
    {
        authorize_role_assignment(requester, role)?;
    }

    let updated = db
        .update_user(id, &update)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    Ok(Json(updated))
}

async fn delete_user(
    DeleteUserPath { id }: DeleteUserPath,
    State(db): State<Arc<DbClient>>,
    user: Option<AuthenticatedUser>,
) -> Result<StatusCode> {
    let requester = user.map(AuthenticatedUser::requester);
    Resource::User.authorize(Action::Destroy, requester)?;
    Resource::User.authorize_object(Action::Destroy, requester, id)?;

    if !db.delete_user(id).await? {
        return Err(ServerError::UserByIdNotFound(id));
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn create_token(
    TokenPath(): TokenPath,
    State(db): State<Arc<DbClient>>,
    State(settings): State<Arc<Settings>>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<TokenResponse>> {
    let (user_id, password_hash) = db
        .fetch_credentials(&credentials.username)
        .await?
        .ok_or(ServerError::InvalidCredentials)?;

    if !credentials.password.verify(&password_hash)? {
        return Err(ServerError::InvalidCredentials);
    }

    let token = AuthToken::generate_random(user_id);
    db.create_auth(user_id, &token.hash()?, settings.auth_token_lifetime)
        .await?;

    info!(%user_id, "Issued auth token");

    Ok(Json(TokenResponse {
        token: token.as_token_str(),
    }))
}
