use crate::server::{Result, ServerError, ServerRouter, json::Json};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use bulletin_common::model::{
    Id,
    location::{Location, LocationContent, LocationMarker, LocationPatch},
};
use bulletin_db::client::DbClient;
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_locations)
        .typed_post(create_location)
        .typed_get(get_location)
        .typed_put(update_location)
        .typed_patch(patch_location)
        .typed_delete(delete_location)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/location/", rejection(ServerError))]
struct LocationsPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/location/{id}/", rejection(ServerError))]
struct LocationPath {
    id: Id<LocationMarker>,
}

async fn list_locations(
    LocationsPath(): LocationsPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Vec<Location>>> {
    let locations = db.list_locations().await?;

    Ok(Json(locations))
}

async fn create_location(
    LocationsPath(): LocationsPath,
    State(db): State<Arc<DbClient>>,
    Json(location): Json<LocationContent>,
) -> Result<(StatusCode, Json<Location>)> {
    let location = db.create_location(&location).await?;

    Ok((StatusCode::CREATED, Json(location)))
}

async fn get_location(
    LocationPath { id }: LocationPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Location>> {
    let location = db
        .fetch_location(id)
        .await?
        .ok_or(ServerError::LocationByIdNotFound(id))?;

    Ok(Json(location))
}

async fn update_location(
    LocationPath { id }: LocationPath,
    State(db): State<Arc<DbClient>>,
    Json(location): Json<LocationContent>,
) -> Result<Json<Location>> {
    let location = db
        .update_location(id, &location)
        .await?
        .ok_or(ServerError::LocationByIdNotFound(id))?;

    Ok(Json(location))
}

async fn patch_location(
    LocationPath { id }: LocationPath,
    State(db): State<Arc<DbClient>>,
    Json(patch): Json<LocationPatch>,
) -> Result<Json<Location>> {
    let current = db
        .fetch_location(id)
        .await?
        .ok_or(ServerError::LocationByIdNotFound(id))?;

    let location = db
        .update_location(id, &patch.apply(current))
        .await?
        .ok_or(ServerError::LocationByIdNotFound(id))?;

    Ok(Json(location))
}

async fn delete_location(
    LocationPath { id }: LocationPath,
    State(db): State<Arc<DbClient>>,
) -> Result<StatusCode> {
    if !db.delete_location(id).await? {
        return Err(ServerError::LocationByIdNotFound(id));
    }

    Ok(StatusCode::NO_CONTENT)
}
