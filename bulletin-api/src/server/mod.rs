use axum::{
    Router,
    extract::{
        FromRef, Request,
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection},
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use axum_extra::{extract::QueryRejection, typed_header::TypedHeaderRejection};
use bulletin_common::{
    model::{
        Id,
        ad::AdMarker,
        auth::{AuthTokenDecodeError, AuthTokenHashError, PasswordHashError, TokenLifetime},
        category::CategoryMarker,
        location::LocationMarker,
        selection::SelectionMarker,
        user::UserMarker,
    },
    permission::PermissionError,
};
use bulletin_db::client::{DbClient, DbError};
use json::Json;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::Arc};
use thiserror::Error;
use tracing::error;

mod auth;
mod json;
mod media;
mod query;
mod routes;

pub type ServerRouter = Router<ServerState>;

#[derive(Clone, Debug, FromRef)]
pub struct ServerState {
    pub db_client: Arc<DbClient>,
    pub settings: Arc<Settings>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Settings {
    pub media_root: PathBuf,
    /// Starts with '/', no trailing slash.
    pub media_url: String,
    /// `None` means tokens never expire.
    pub auth_token_lifetime: Option<TokenLifetime>,
}

pub fn routes() -> ServerRouter {
    routes::routes().fallback(fallback)
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Incoming JSON rejected: {0}")]
    JsonRejection(#[from] JsonRejection),
    #[error("Query string rejected: {0}")]
    QueryRejection(#[from] QueryRejection),
    #[error("Multipart body rejected: {0}")]
    MultipartRejection(#[from] MultipartRejection),
    #[error("Multipart body could not be read: {0}")]
    Multipart(#[from] MultipartError),
    #[error("JSON response could not be serialized: {0}")]
    JsonResponse(#[from] serde_json::Error),
    #[error("Authorization header was missing or invalid: {0}")]
    InvalidAuthorizationHeader(TypedHeaderRejection),
    #[error("The provided auth token could not be decoded: {0}")]
    InvalidAuthToken(#[from] AuthTokenDecodeError),
    #[error("The auth token could not be hashed: {0}")]
    AuthTokenHash(#[from] AuthTokenHashError),
    #[error(transparent)]
    PasswordHash(#[from] PasswordHashError),
    #[error("Provided token was invalid")]
    InvalidToken,
    #[error("Username or password was incorrect")]
    InvalidCredentials,
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error("Uploaded file could not be stored: {0}")]
    Media(std::io::Error),
    #[error(transparent)]
    Database(#[from] DbError),
    #[error("Ad with id {0} was not found.")]
    AdByIdNotFound(Id<AdMarker>),
    #[error("Category with id {0} was not found.")]
    CategoryByIdNotFound(Id<CategoryMarker>),
    #[error("Location with id {0} was not found.")]
    LocationByIdNotFound(Id<LocationMarker>),
    #[error("Selection with id {0} was not found.")]
    SelectionByIdNotFound(Id<SelectionMarker>),
    #[error("User with id {0} was not found.")]
    UserByIdNotFound(Id<UserMarker>),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_)
            | ServerError::PathRejection(_)
            | ServerError::AdByIdNotFound(_)
            | ServerError::CategoryByIdNotFound(_)
            | ServerError::LocationByIdNotFound(_)
            | ServerError::SelectionByIdNotFound(_)
            | ServerError::UserByIdNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::InvalidAuthorizationHeader(rejection) if rejection.is_missing() => {
                StatusCode::UNAUTHORIZED
            }
            ServerError::InvalidToken
            | ServerError::InvalidCredentials
            | ServerError::Permission(PermissionError::NotAuthenticated) => {
                StatusCode::UNAUTHORIZED
            }
            ServerError::Permission(PermissionError::Denied(_)) => StatusCode::FORBIDDEN,
            ServerError::MultipartRejection(rejection) => rejection.status(),
            ServerError::Multipart(err) => err.status(),
            ServerError::JsonRejection(_)
            | ServerError::QueryRejection(_)
            | ServerError::InvalidAuthorizationHeader(_)
            | ServerError::InvalidAuthToken(_)
            | ServerError::Database(DbError::UnknownReference { .. }) => StatusCode::BAD_REQUEST,
            ServerError::Database(DbError::Conflict { .. }) => StatusCode::CONFLICT,
            ServerError::JsonResponse(_)
            | ServerError::Database(_)
            | ServerError::AuthTokenHash(_)
            | ServerError::PasswordHash(_)
            | ServerError::Media(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self, status: StatusCode) -> String {
        if status.is_server_error() {
            "Internal server error".to_owned()
        } else {
            self.to_string()
        }
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize, Deserialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        error!(error = %self, %status, "Replying with error");

        let error_response = ErrorResponse {
            status: status.as_u16(),
            detail: self.detail(status),
        };
        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use crate::server::{ServerState, Settings, routes};
    use axum::{
        Router,
        body::Body,
        http::{Method, Request, StatusCode, header},
    };
    use bulletin_common::{
        model::{
            auth::{AuthToken, HashedPassword},
            user::{CreateUser, User},
        },
        permission::{AD_AUTHOR_OR_STAFF_MESSAGE, ROLE_ASSIGNMENT_MESSAGE, SELECTION_OWNER_MESSAGE},
    };
    use bulletin_db::client::DbClient;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn settings() -> Settings {
        Settings {
            media_root: "media".into(),
            media_url: "/media".to_owned(),
            auth_token_lifetime: None,
        }
    }

    fn with_client(db_client: Arc<DbClient>) -> Router {
        routes().with_state(ServerState {
            db_client,
            settings: Arc::new(settings()),
        })
    }

    /// Router over a pool that never connects; requests must be decided before any query runs.
    fn app() -> Router {
        let db_client = DbClient::connect_lazy("postgres://bulletin@localhost:1/bulletin").unwrap();

        with_client(Arc::new(db_client))
    }

    /// Router over the migrated `DATABASE_URL` database, or `None` when none is configured.
    async fn database_app() -> Option<(Router, Arc<DbClient>)> {
        let Ok(database_url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL is not set, skipping database test");
            return None;
        };

        let db_client = Arc::new(DbClient::connect(&database_url, 4).await.unwrap());
        db_client.migrate().await.unwrap();

        Some((with_client(Arc::clone(&db_client)), db_client))
    }

    async fn send(request: Request<Body>) -> (StatusCode, Value) {
        send_to(&app(), request).await
    }

    async fn send_to(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        (status, body)
    }

    fn unique(prefix: &str) -> String {
        format!("{prefix}-{:08x}", rand::random::<u32>())
    }

    /// Creates an account with `role` and returns it with a ready `Authorization` header value.
    async fn account(db: &DbClient, role: &str) -> (User, String) {
        let new_user: CreateUser = serde_json::from_value(json!({
            "username": unique(role),
            "password": "unused",
            "role": role,
        }))
        .unwrap();
        let user = db
            .create_user(&new_user, &HashedPassword::from_phc("unused".to_owned()))
            .await
            .unwrap();

        let token = AuthToken::generate_random(user.id);
        db.create_auth(user.id, &token.hash().unwrap(), None)
            .await
            .unwrap();

        (user, format!("Bearer {}", token.as_token_str()))
    }

    fn authorized(mut request: Request<Body>, authorization: &str) -> Request<Body> {
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, authorization.parse().unwrap());
        request
    }

    fn json_request(method: Method, uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn root_reports_ok() {
        let (status, body) = send(empty_request(Method::GET, "/")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "Ok"}));
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let (status, body) = send(empty_request(Method::GET, "/nowhere")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 404);
    }

    #[tokio::test]
    async fn malformed_id_is_not_found() {
        let (status, _) = send(empty_request(Method::GET, "/ads/abc/")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn anonymous_requests_are_unauthorized() {
        let (status, _) = send(empty_request(Method::GET, "/ads/1/")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(json_request(Method::PATCH, "/ads/1/", &json!({"price": 10}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(empty_request(Method::DELETE, "/selections/1/")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(json_request(
            Method::POST,
            "/selections/",
            &json!({"name": "Mine", "items": []}),
        ))
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(empty_request(Method::DELETE, "/users/1/delete/")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_token_is_bad_request() {
        let request = Request::builder()
            .method(Method::GET)
            .uri("/ads/1/")
            .header(header::AUTHORIZATION, "Bearer garbage")
            .body(Body::empty())
            .unwrap();

        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn category_body_fails_closed() {
        let (status, body) = send(json_request(
            Method::POST,
            "/cat/create/",
            &json!({"name": "Books", "slug": "books"}),
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/cat/create/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"name\": "))
            .unwrap();
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn anonymous_admin_signup_is_forbidden() {
        let (status, body) = send(json_request(
            Method::POST,
            "/users/create/",
            &json!({"username": "eve", "password": "hunter2", "role": "admin"}),
        ))
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["detail"], ROLE_ASSIGNMENT_MESSAGE);
    }

    #[tokio::test]
    async fn password_cannot_be_updated() {
        let (status, _) = send(json_request(
            Method::PATCH,
            "/users/1/update/",
            &json!({"password": "new"}),
        ))
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_list_query_is_bad_request() {
        let (status, _) = send(empty_request(Method::GET, "/ads/?price_from=cheap")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ad_mutation_is_limited_to_author_and_staff() {
        let Some((app, db)) = database_app().await else { return };
        let (author, author_auth) = account(&db, "member").await;
        let (_, stranger_auth) = account(&db, "member").await;
        let (_, moderator_auth) = account(&db, "moderator").await;

        let (status, ad) = send_to(
            &app,
            authorized(
                json_request(
                    Method::POST,
                    "/ads/",
                    &json!({"name": "Lamp", "author_id": author.id, "price": 100}),
                ),
                &author_auth,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let uri = format!("/ads/{}/", ad["id"]);

        let (status, body) = send_to(
            &app,
            authorized(
                json_request(Method::PATCH, &uri, &json!({"price": 1})),
                &stranger_auth,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["detail"], AD_AUTHOR_OR_STAFF_MESSAGE);

        let (status, body) = send_to(
            &app,
            authorized(
                json_request(Method::PATCH, &uri, &json!({"price": 90})),
                &moderator_auth,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["price"], 90);
        assert_eq!(body["name"], "Lamp");

        let (status, body) =
            send_to(&app, authorized(empty_request(Method::GET, &uri), &stranger_auth)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["author"]["username"], json!(author.username));

        let (status, _) =
            send_to(&app, authorized(empty_request(Method::DELETE, &uri), &stranger_auth)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) =
            send_to(&app, authorized(empty_request(Method::DELETE, &uri), &author_auth)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) =
            send_to(&app, authorized(empty_request(Method::GET, &uri), &author_auth)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn selection_mutation_is_limited_to_owner() {
        let Some((app, db)) = database_app().await else { return };
        let (owner, owner_auth) = account(&db, "member").await;
        let (_, stranger_auth) = account(&db, "admin").await;

        let (status, selection) = send_to(
            &app,
            authorized(
                json_request(Method::POST, "/selections/", &json!({"name": "Mine", "items": []})),
                &owner_auth,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(selection["owner_id"], json!(owner.id));
        let uri = format!("/selections/{}/", selection["id"]);

        let (status, body) = send_to(
            &app,
            authorized(
                json_request(Method::PATCH, &uri, &json!({"name": "Ours"})),
                &stranger_auth,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["detail"], SELECTION_OWNER_MESSAGE);

        let (status, body) =
            send_to(&app, authorized(empty_request(Method::GET, &uri), &stranger_auth)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Mine");
        assert_eq!(body["owner"], json!(owner.username));

        let (status, body) = send_to(
            &app,
            authorized(
                json_request(Method::PATCH, &uri, &json!({"name": "Renamed"})),
                &owner_auth,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Renamed");
    }

    #[tokio::test]
    async fn lists_are_open_to_anonymous_requests() {
        let Some((app, _db)) = database_app().await else { return };

        for uri in ["/ads/", "/selections/", "/users/", "/cat/", "/location/"] {
            let (status, body) = send_to(&app, empty_request(Method::GET, uri)).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert!(body.is_array(), "{uri}");
        }
    }

    #[tokio::test]
    async fn created_category_can_be_fetched() {
        let Some((app, _db)) = database_app().await else { return };
        let name = unique("Books");

        let (status, created) = send_to(
            &app,
            json_request(Method::POST, "/cat/create/", &json!({"name": name})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["name"], json!(name));

        let uri = format!("/cat/{}", created["id"]);
        let (status, fetched) = send_to(&app, empty_request(Method::GET, &uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);
        assert_eq!(fetched.as_object().unwrap().len(), 2);

        let uri = format!("/cat/{}/delete/", created["id"]);
        let (status, deleted) = send_to(&app, empty_request(Method::DELETE, &uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deleted, json!({"id": created["id"]}));
    }

    #[tokio::test]
    async fn location_resource() {
        let Some((app, _db)) = database_app().await else { return };
        let name = unique("Omsk");

        let (status, created) =
            send_to(&app, json_request(Method::POST, "/location/", &json!({"name": name}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let (_, again) =
            send_to(&app, json_request(Method::POST, "/location/", &json!({"name": name}))).await;
        assert_eq!(again, created);

        let uri = format!("/location/{}/", created["id"]);
        let (status, patched) =
            send_to(&app, json_request(Method::PATCH, &uri, &json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(patched, created);

        let other = unique("Tomsk");
        send_to(&app, json_request(Method::POST, "/location/", &json!({"name": other}))).await;
        let (status, _) = send_to(&app, json_request(Method::PUT, &uri, &json!({"name": other}))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send_to(&app, empty_request(Method::DELETE, &uri)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send_to(&app, empty_request(Method::GET, &uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn issued_token_authenticates() {
        let Some((app, _db)) = database_app().await else { return };
        let username = unique("dasha");

        let (status, user) = send_to(
            &app,
            json_request(
                Method::POST,
                "/users/create/",
                &json!({"username": username, "password": "s3cret", "locations": ["Moscow"]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(user.get("password").is_none());

        let (status, _) = send_to(
            &app,
            json_request(
                Method::POST,
                "/users/token/",
                &json!({"username": username, "password": "wrong"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, token) = send_to(
            &app,
            json_request(
                Method::POST,
                "/users/token/",
                &json!({"username": username, "password": "s3cret"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let authorization = format!("Bearer {}", token["token"].as_str().unwrap());

        let uri = format!("/users/{}/update/", user["id"]);
        let (status, updated) = send_to(
            &app,
            authorized(
                json_request(Method::PATCH, &uri, &json!({"age": 30})),
                &authorization,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["age"], 30);
        assert_eq!(updated["locations"], json!(["Moscow"]));
    }
}
