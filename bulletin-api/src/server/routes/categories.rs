use crate::server::{Result, ServerError, ServerRouter, json::Json};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use bulletin_common::model::{
    Id,
    category::{Category, CategoryContent, CategoryMarker, DeletedCategory},
};
use bulletin_db::client::DbClient;
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_categories)
        .typed_get(get_category)
        .typed_post(create_category)
        .typed_patch(update_category)
        .typed_delete(delete_category)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/cat/", rejection(ServerError))]
struct CategoriesPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/cat/{id}", rejection(ServerError))]
struct CategoryPath {
    id: Id<CategoryMarker>,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/cat/create/", rejection(ServerError))]
struct CreateCategoryPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/cat/{id}/update/", rejection(ServerError))]
struct UpdateCategoryPath {
    id: Id<CategoryMarker>,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/cat/{id}/delete/", rejection(ServerError))]
struct DeleteCategoryPath {
    id: Id<CategoryMarker>,
}

async fn list_categories(
    CategoriesPath(): CategoriesPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Vec<Category>>> {
    let categories = db.list_categories().await?;

    Ok(Json(categories))
}

async fn get_category(
    CategoryPath { id }: CategoryPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Category>> {
    let category = db
        .fetch_category(id)
        .await?
        .ok_or(ServerError::CategoryByIdNotFound(id))?;

    Ok(Json(category))
}

async fn create_category(
    CreateCategoryPath(): CreateCategoryPath,
    State(db): State<Arc<DbClient>>,
    Json(category): Json<CategoryContent>,
) -> Result<(StatusCode, Json<Category>)> {
    let category = db.create_category(&category).await?;

    Ok((StatusCode::CREATED, Json(category)))
}

async fn update_category(
    UpdateCategoryPath { id }: UpdateCategoryPath,
    State(db): State<Arc<DbClient>>,
    Json(category): Json<CategoryContent>,
) -> Result<Json<Category>> {
    let category = db
        .update_category(id, &category)
        .await?
        .ok_or(ServerError::CategoryByIdNotFound(id))?;

    Ok(Json(category))
}

async fn delete_category(
    DeleteCategoryPath { id }: DeleteCategoryPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<DeletedCategory>> {
    if !db.delete_category(id).await? {
        return Err(ServerError::CategoryByIdNotFound(id));
    }

    Ok(Json(DeletedCategory { id }))
}
