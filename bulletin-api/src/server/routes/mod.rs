use crate::server::{Result, ServerError, ServerRouter, json::Json};
use axum::extract::DefaultBodyLimit;
use axum_extra::routing::{RouterExt, TypedPath};
use serde::{Deserialize, Serialize};

mod ads;
mod categories;
mod locations;
mod selections;
mod users;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(get_status)
        .merge(ads::routes())
        .merge(categories::routes())
        .merge(locations::routes())
        .merge(selections::routes())
        .merge(users::routes())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/", rejection(ServerError))]
struct StatusPath();

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct Status {
    status: &'static str,
}

async fn get_status(StatusPath(): StatusPath) -> Result<Json<Status>> {
    Ok(Json(Status { status: "Ok" }))
}
