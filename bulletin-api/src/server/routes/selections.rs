use crate::server::{Result, ServerError, ServerRouter, auth::AuthenticatedUser, json::Json};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use bulletin_common::{
    model::{
        Id,
        selection::{
            Selection, SelectionContent, SelectionDetail, SelectionListEntry, SelectionMarker,
            SelectionPatch,
        },
    },
    permission::{Action, PermissionError, Requester, Resource},
};
use bulletin_db::client::DbClient;
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_selections)
        .typed_post(create_selection)
        .typed_get(get_selection)
        .typed_put(update_selection)
        .typed_patch(patch_selection)
        .typed_delete(delete_selection)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/selections/", rejection(ServerError))]
struct SelectionsPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/selections/{id}/", rejection(ServerError))]
struct SelectionPath {
    id: Id<SelectionMarker>,
}

async fn list_selections(
    SelectionsPath(): SelectionsPath,
    State(db): State<Arc<DbClient>>,
    user: Option<AuthenticatedUser>,
) -> Result<Json<Vec<SelectionListEntry>>> {
    Resource::Selection.authorize(Action::List, user.map(AuthenticatedUser::requester))?;

    let selections = db.list_selections().await?;

    Ok(Json(selections))
}

async fn create_selection(
    SelectionsPath(): SelectionsPath,
    State(db): State<Arc<DbClient>>,
    user: Option<AuthenticatedUser>,
    Json(selection): Json<SelectionContent>,
) -> Result<(StatusCode, Json<Selection>)> {
    let requester = user.map(AuthenticatedUser::requester);
    Resource::Selection.authorize(Action::Create, requester)?;
    let owner = requester.ok_or(PermissionError::NotAuthenticated)?;

    let selection = db.create_selection(owner.id, &selection).await?;

    Ok((StatusCode::CREATED, Json(selection)))
}

async fn get_selection(
    SelectionPath { id }: SelectionPath,
    State(db): State<Arc<DbClient>>,
    user: Option<AuthenticatedUser>,
) -> Result<Json<SelectionDetail>> {
    Resource::Selection.authorize(Action::Retrieve, user.map(AuthenticatedUser::requester))?;

    let selection = db
        .fetch_selection_detail(id)
        .await?
        .ok_or(ServerError::SelectionByIdNotFound(id))?;

    Ok(Json(selection))
}

async fn update_selection(
    SelectionPath { id }: SelectionPath,
    State(db): State<Arc<DbClient>>,
    user: Option<AuthenticatedUser>,
    Json(content): Json<SelectionContent>,
) -> Result<Json<Selection>> {
    let requester = user.map(AuthenticatedUser::requester);
    fetch_authorized(&db, id, Action::Update, requester).await?;

    let selection = db
        .update_selection(id, &content)
        .await?
        .ok_or(ServerError::SelectionByIdNotFound(id))?;

    Ok(Json(selection))
}

async fn patch_selection(
    SelectionPath { id }: SelectionPath,
    State(db): State<Arc<DbClient>>,
    user: Option<AuthenticatedUser>,
    Json(patch): Json<SelectionPatch>,
) -> Result<Json<Selection>> {
    let requester = user.map(AuthenticatedUser::requester);
    let current = fetch_authorized(&db, id, Action::PartialUpdate, requester).await?;
    let content = patch.apply(current.into_content());

    let selection = db
        .update_selection(id, &content)
        .await?
        .ok_or(ServerError::SelectionByIdNotFound(id))?;

    Ok(Json(selection))
}

async fn delete_selection(
    SelectionPath { id }: SelectionPath,
    State(db): State<Arc<DbClient>>,
    user: Option<AuthenticatedUser>,
) -> Result<StatusCode> {
    let requester = user.map(AuthenticatedUser::requester);
    fetch_authorized(&db, id, Action::Destroy, requester).await?;

    if !db.delete_selection(id).await? {
        return Err(ServerError::SelectionByIdNotFound(id));
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_authorized(
    db: &DbClient,
    id: Id<SelectionMarker>,
    action: Action,
    requester: Option<Requester>,
) -> Result<Selection> {
    Resource::Selection.authorize(action, requester)?;

    let selection = db
        .fetch_selection(id)
        .await?
        .ok_or(ServerError::SelectionByIdNotFound(id))?;
    Resource::Selection.authorize_object(action, requester, selection.owner_id)?;

    Ok(selection)
}
