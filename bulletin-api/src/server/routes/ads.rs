use crate::server::{
    Result, ServerError, ServerRouter, Settings,
    auth::AuthenticatedUser,
    json::Json,
    media,
    query::{Query, empty_as_none, non_empty_values},
};
use axum::{
    extract::{Multipart, State, multipart::MultipartRejection},
    http::StatusCode,
};
use axum_extra::routing::{RouterExt, TypedPath};
use bulletin_common::{
    model::{
        Id,
        ad::{Ad, AdContent, AdDetail, AdFilter, AdImage, AdListEntry, AdMarker, AdPatch},
        category::CategoryMarker,
    },
    permission::{Action, Requester, Resource},
};
use bulletin_db::client::DbClient;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

const IMAGE_FIELD: &str = "image";

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_ads)
        .typed_post(create_ad)
        .typed_get(get_ad)
        .typed_put(update_ad)
        .typed_patch(patch_ad)
        .typed_delete(delete_ad)
        .typed_post(upload_ad_image)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/ads/", rejection(ServerError))]
struct AdsPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/ads/{id}/", rejection(ServerError))]
struct AdPath {
    id: Id<AdMarker>,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/ads/{id}/upload-image/", rejection(ServerError))]
struct AdImagePath {
    id: Id<AdMarker>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
struct AdListQuery {
    #[serde(default, deserialize_with = "non_empty_values")]
    cat: Vec<i64>,
    #[serde(default, deserialize_with = "empty_as_none")]
    text: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    location: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    price_from: Option<i32>,
    #[serde(default, deserialize_with = "empty_as_none")]
    price_to: Option<i32>,
}

impl From<AdListQuery> for AdFilter {
    fn from(query: AdListQuery) -> Self {
        Self {
            categories: query.cat.into_iter().map(Id::<CategoryMarker>::new).collect(),
            text: query.text,
            location: query.location,
            price_from: query.price_from,
            price_to: query.price_to,
        }
    }
}

async fn list_ads(
    AdsPath(): AdsPath,
    State(db): State<Arc<DbClient>>,
    user: Option<AuthenticatedUser>,
    Query(query): Query<AdListQuery>,
) -> Result<Json<Vec<AdListEntry>>> {
    Resource::Ad.authorize(Action::List, requester(user))?;

    let filter = AdFilter::from(query);
    if !filter.is_empty() {
        debug!(?filter, "Filtering ads");
    }

    let ads = db.list_ads(&filter).await?;

    Ok(Json(ads))
}

async fn create_ad(
    AdsPath(): AdsPath,
    State(db): State<Arc<DbClient>>,
    user: Option<AuthenticatedUser>,
    Json(ad): Json<AdContent>,
) -> Result<(StatusCode, Json<Ad>)> {
    Resource::Ad.authorize(Action::Create, requester(user))?;

    let ad = db.create_ad(&ad).await?;

    Ok((StatusCode::CREATED, Json(ad)))
}

async fn get_ad(
    AdPath { id }: AdPath,
    State(db): State<Arc<DbClient>>,
    user: Option<AuthenticatedUser>,
) -> Result<Json<AdDetail>> {
    Resource::Ad.authorize(Action::Retrieve, requester(user))?;

    let ad = db
        .fetch_ad_detail(id)
        .await?
        .ok_or(ServerError::AdByIdNotFound(id))?;

    Ok(Json(ad))
}

async fn update_ad(
    AdPath { id }: AdPath,
    State(db): State<Arc<DbClient>>,
    user: Option<AuthenticatedUser>,
    Json(content): Json<AdContent>,
) -> Result<Json<Ad>> {
    fetch_authorized(&db, id, Action::Update, requester(user)).await?;

    let ad = db
        .update_ad(id, &content)
        .await?
        .ok_or(ServerError::AdByIdNotFound(id))?;

    Ok(Json(ad))
}

async fn patch_ad(
    AdPath { id }: AdPath,
    State(db): State<Arc<DbClient>>,
    user: Option<AuthenticatedUser>,
    Json(patch): Json<AdPatch>,
) -> Result<Json<Ad>> {
    let current = fetch_authorized(&db, id, Action::PartialUpdate, requester(user)).await?;
    let content = patch.apply(current.into_content());

    let ad = db
        .update_ad(id, &content)
        .await?
        .ok_or(ServerError::AdByIdNotFound(id))?;

    Ok(Json(ad))
}

async fn delete_ad(
    AdPath { id }: AdPath,
    State(db): State<Arc<DbClient>>,
    State(settings): State<Arc<Settings>>,
    user: Option<AuthenticatedUser>,
) -> Result<StatusCode> {
    let ad = fetch_authorized(&db, id, Action::Destroy, requester(user)).await?;

    if !db.delete_ad(id).await? {
        return Err(ServerError::AdByIdNotFound(id));
    }
    if let Some(url) = ad.image {
        discard_image(&settings, &url).await;
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Without an `image` field in the form the image is cleared.
async fn upload_ad_image(
    AdImagePath { id }: AdImagePath,
    State(db): State<Arc<DbClient>>,
    State(settings): State<Arc<Settings>>,
    user: Option<AuthenticatedUser>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AdImage>> {
    let current = fetch_authorized(&db, id, Action::UploadImage, requester(user)).await?;

    let mut multipart = multipart?;
    let mut image_url = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }

        let file_name = field.file_name().map(ToOwned::to_owned);
        let contents = field.bytes().await?;
        let url = media::store_ad_image(&settings, id, file_name.as_deref(), &contents)
            .await
            .map_err(ServerError::Media)?;
        image_url = Some(url);
        break;
    }

    let image = match db.set_ad_image(id, image_url.as_deref()).await {
        Ok(Some(image)) => image,
        result => {
            if let Some(url) = &image_url {
                discard_image(&settings, url).await;
            }
            let err = result.map_or_else(ServerError::from, |_| ServerError::AdByIdNotFound(id));
            return Err(err);
        }
    };

    if let Some(previous) = current.image
        && image.image.as_deref() != Some(previous.as_str())
    {
        discard_image(&settings, &previous).await;
    }

    Ok(Json(image))
}

async fn discard_image(settings: &Settings, url: &str) {
    if let Err(err) = media::remove_ad_image(settings, url).await {
        warn!(%err, url, "Failed to remove ad image");
    }
}

fn requester(user: Option<AuthenticatedUser>) -> Option<Requester> {
    user.map(AuthenticatedUser::requester)
}

async fn fetch_authorized(
    db: &DbClient,
    id: Id<AdMarker>,
    action: Action,
    requester: Option<Requester>,
) -> Result<Ad> {
    Resource::Ad.authorize(action, requester)?;

    let ad = db
        .fetch_ad(id)
        .await?
        .ok_or(ServerError::AdByIdNotFound(id))?;
    Resource::Ad.authorize_object(action, requester, ad.author_id)?;

    Ok(ad)
}
