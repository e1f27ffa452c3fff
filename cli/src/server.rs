use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    Extension, Json, Router,
    extract::{FromRequest, Path, Request, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use larder_core::db::is_unique_violation;
use larder_core::models::{
    Label, LabelKind, NameRef, NewRecipe, Price, Recipe, RecipeChanges, RecipeDetail, User,
    validate_label_name, validate_new_recipe, validate_recipe_changes,
};
use larder_core::service::LarderService;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

#[derive(Clone)]
struct AppState {
    service: Arc<Mutex<LarderService>>,
}

impl AppState {
    fn service(&self) -> MutexGuard<'_, LarderService> {
        self.service
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// The user resolved from the bearer token, set by [`require_auth`].
#[derive(Clone)]
struct AuthUser(User);

// --- Request / Response types ---

/// Body of `PUT /api/recipes/{id}`: the scalars are mandatory, the
/// association lists keep their "absent means untouched" meaning.
#[derive(Deserialize)]
struct ReplaceRecipeRequest {
    title: String,
    time_minutes: i64,
    price: Price,
    link: Option<String>,
    description: Option<String>,
    tags: Option<Vec<NameRef>>,
    ingredients: Option<Vec<NameRef>>,
}

impl From<ReplaceRecipeRequest> for RecipeChanges {
    fn from(req: ReplaceRecipeRequest) -> Self {
        RecipeChanges {
            title: Some(req.title),
            time_minutes: Some(req.time_minutes),
            price: Some(req.price),
            link: req.link,
            description: req.description,
            tags: req.tags,
            ingredients: req.ingredients,
        }
    }
}

#[derive(Deserialize)]
struct RenameLabelRequest {
    name: String,
}

/// `Json` whose rejections are reported as [`ApiError`] JSON bodies.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
struct ApiJson<T>(T);

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    PayloadTooLarge(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            Self::Internal(err) => {
                error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return Self::PayloadTooLarge(rejection.body_text());
        }
        Self::BadRequest(rejection.body_text())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if is_unique_violation(&err) {
            warn!("unique constraint violation: {err:#}");
            return Self::Conflict("A record with these values already exists".to_string());
        }
        Self::Internal(err)
    }
}

fn bad_request(err: &anyhow::Error) -> ApiError {
    ApiError::BadRequest(err.to_string())
}

fn recipe_not_found(id: i64) -> ApiError {
    ApiError::NotFound(format!("Recipe {id} not found"))
}

fn label_not_found(kind: LabelKind, id: i64) -> ApiError {
    ApiError::NotFound(format!("{} {id} not found", kind.noun()))
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or_default();

    let user = match state.service().authenticate(token) {
        Ok(user) => user,
        Err(err) => return ApiError::Internal(err).into_response(),
    };

    let Some(user) = user else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Invalid or missing API key".to_string(),
            }),
        )
            .into_response();
    };

    request.extensions_mut().insert(AuthUser(user));
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- User handlers ---

async fn get_me(Extension(AuthUser(user)): Extension<AuthUser>) -> Json<User> {
    Json(user)
}

// --- Recipe handlers ---

async fn list_recipes(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Vec<Recipe>>, ApiError> {
    let recipes = state.service().list_recipes(&user)?;
    Ok(Json(recipes))
}

async fn create_recipe(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    ApiJson(req): ApiJson<NewRecipe>,
) -> Result<(StatusCode, Json<RecipeDetail>), ApiError> {
    validate_new_recipe(&req).map_err(|e| bad_request(&e))?;
    let detail = state.service().create_recipe(&user, &req)?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn get_recipe(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<RecipeDetail>, ApiError> {
    let detail = state
        .service()
        .get_recipe(&user, id)?
        .ok_or_else(|| recipe_not_found(id))?;
    Ok(Json(detail))
}

async fn replace_recipe(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<i64>,
    ApiJson(req): ApiJson<ReplaceRecipeRequest>,
) -> Result<Json<RecipeDetail>, ApiError> {
    apply_recipe_changes(&state, &user, id, &RecipeChanges::from(req))
}

async fn update_recipe(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<i64>,
    ApiJson(changes): ApiJson<RecipeChanges>,
) -> Result<Json<RecipeDetail>, ApiError> {
    apply_recipe_changes(&state, &user, id, &changes)
}

fn apply_recipe_changes(
    state: &AppState,
    user: &User,
    id: i64,
    changes: &RecipeChanges,
) -> Result<Json<RecipeDetail>, ApiError> {
    validate_recipe_changes(changes).map_err(|e| bad_request(&e))?;
    let detail = state
        .service()
        .update_recipe(user, id, changes)?
        .ok_or_else(|| recipe_not_found(id))?;
    Ok(Json(detail))
}

async fn delete_recipe(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.service().delete_recipe(&user, id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(recipe_not_found(id))
    }
}

// --- Tag / ingredient handlers ---

fn list_labels(state: &AppState, user: &User, kind: LabelKind) -> Result<Json<Vec<Label>>, ApiError> {
    let labels = state.service().list_labels(user, kind)?;
    Ok(Json(labels))
}

fn rename_label(
    state: &AppState,
    user: &User,
    kind: LabelKind,
    id: i64,
    req: &RenameLabelRequest,
) -> Result<Json<Label>, ApiError> {
    validate_label_name(kind, &req.name).map_err(|e| bad_request(&e))?;
    let label = state
        .service()
        .rename_label(user, kind, id, &req.name)?
        .ok_or_else(|| label_not_found(kind, id))?;
    Ok(Json(label))
}

fn delete_label(
    state: &AppState,
    user: &User,
    kind: LabelKind,
    id: i64,
) -> Result<StatusCode, ApiError> {
    if state.service().delete_label(user, kind, id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(label_not_found(kind, id))
    }
}

async fn list_tags(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Vec<Label>>, ApiError> {
    list_labels(&state, &user, LabelKind::Tag)
}

async fn rename_tag(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<i64>,
    ApiJson(req): ApiJson<RenameLabelRequest>,
) -> Result<Json<Label>, ApiError> {
    rename_label(&state, &user, LabelKind::Tag, id, &req)
}

async fn delete_tag(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    delete_label(&state, &user, LabelKind::Tag, id)
}

async fn list_ingredients(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Vec<Label>>, ApiError> {
    list_labels(&state, &user, LabelKind::Ingredient)
}

async fn rename_ingredient(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<i64>,
    ApiJson(req): ApiJson<RenameLabelRequest>,
) -> Result<Json<Label>, ApiError> {
    rename_label(&state, &user, LabelKind::Ingredient, id, &req)
}

async fn delete_ingredient(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    delete_label(&state, &user, LabelKind::Ingredient, id)
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/user/me", get(get_me))
        .route("/api/recipes", get(list_recipes).post(create_recipe))
        .route(
            "/api/recipes/{id}",
            get(get_recipe)
                .put(replace_recipe)
                .patch(update_recipe)
                .delete(delete_recipe),
        )
        .route("/api/tags", get(list_tags))
        .route(
            "/api/tags/{id}",
            put(rename_tag).patch(rename_tag).delete(delete_tag),
        )
        .route("/api/ingredients", get(list_ingredients))
        .route(
            "/api/ingredients/{id}",
            put(rename_ingredient)
                .patch(rename_ingredient)
                .delete(delete_ingredient),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(service: LarderService, port: u16, bind: &str) -> anyhow::Result<()> {
    if service.list_users()?.is_empty() {
        warn!("No users yet. Create one with: larder user create <email>");
    }

    let state = AppState {
        service: Arc::new(Mutex::new(service)),
    };
    let app = build_router(state);

    if bind != "127.0.0.1" && bind != "localhost" {
        warn!("Listening on {bind}. Any device that can reach this address can use the API with a valid token.");
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    info!("Listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        alice: String,
        bob: String,
    }

    fn test_app() -> TestApp {
        let service = LarderService::new_in_memory().unwrap();
        let (_, alice) = service.create_user("alice@example.com", "Alice").unwrap();
        let (_, bob) = service.create_user("bob@example.com", "Bob").unwrap();
        let state = AppState {
            service: Arc::new(Mutex::new(service)),
        };
        TestApp {
            router: build_router(state),
            alice,
            bob,
        }
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn tag_names(recipe: &Value) -> Vec<&str> {
        recipe["tags"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn auth_missing_key_returns_401() {
        let app = test_app();
        let (status, body) = send(&app.router, "GET", "/api/recipes", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid or missing API key");
    }

    #[tokio::test]
    async fn auth_wrong_key_returns_401() {
        let app = test_app();
        for uri in ["/api/recipes", "/api/tags", "/api/ingredients", "/api/user/me"] {
            let (status, _) = send(&app.router, "GET", uri, Some("wrong-key"), None).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[tokio::test]
    async fn me_returns_token_owner() {
        let app = test_app();
        let (status, body) = send(&app.router, "GET", "/api/user/me", Some(&app.bob), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "bob@example.com");
        assert_eq!(body["name"], "Bob");
        assert!(body.get("token_hash").is_none());
    }

    #[tokio::test]
    async fn security_headers_present() {
        let app = test_app();
        let response = app
            .router
            .clone()
            .oneshot(
                axum::http::Request::get("/api/recipes")
                    .header("Authorization", format!("Bearer {}", app.alice))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
        assert_eq!(
            response.headers().get("content-security-policy").unwrap(),
            "default-src 'none'"
        );
    }

    #[tokio::test]
    async fn security_headers_on_auth_failure() {
        let app = test_app();
        let response = app
            .router
            .clone()
            .oneshot(
                axum::http::Request::get("/api/recipes")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
    }

    #[tokio::test]
    async fn create_recipe_without_associations() {
        let app = test_app();
        let (status, body) = send(
            &app.router,
            "POST",
            "/api/recipes",
            Some(&app.alice),
            Some(json!({"title": "Toast", "time_minutes": 5, "price": "1.25"})),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["title"], "Toast");
        assert_eq!(body["price"], "1.25");
        assert_eq!(body["link"], "");
        assert_eq!(body["description"], "");
        assert_eq!(body["tags"], json!([]));
        assert_eq!(body["ingredients"], json!([]));
        assert!(body.get("user_id").is_none());
    }

    #[tokio::test]
    async fn soup_scenario_reuses_vegan_and_adds_quick() {
        let app = test_app();
        let (status, created) = send(
            &app.router,
            "POST",
            "/api/recipes",
            Some(&app.alice),
            Some(json!({
                "title": "Soup",
                "time_minutes": 20,
                "price": 5.50,
                "tags": [{"name": "Vegan"}]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["price"], "5.50");
        assert_eq!(tag_names(&created), vec!["Vegan"]);
        let vegan_id = created["tags"][0]["id"].clone();
        let id = created["id"].as_i64().unwrap();

        let (status, updated) = send(
            &app.router,
            "PATCH",
            &format!("/api/recipes/{id}"),
            Some(&app.alice),
            Some(json!({"tags": [{"name": "Vegan"}, {"name": "Quick"}]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(tag_names(&updated), vec!["Vegan", "Quick"]);
        assert_eq!(updated["tags"][0]["id"], vegan_id);
        assert_eq!(updated["title"], "Soup");

        let (_, tags) = send(&app.router, "GET", "/api/tags", Some(&app.alice), None).await;
        assert_eq!(tags.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn patch_absent_keeps_and_empty_clears() {
        let app = test_app();
        let (_, created) = send(
            &app.router,
            "POST",
            "/api/recipes",
            Some(&app.alice),
            Some(json!({
                "title": "Salad",
                "time_minutes": 10,
                "price": "4.00",
                "tags": [{"name": "Fresh"}],
                "ingredients": [{"name": "Lettuce"}]
            })),
        )
        .await;
        let uri = format!("/api/recipes/{}", created["id"]);

        let (_, kept) = send(
            &app.router,
            "PATCH",
            &uri,
            Some(&app.alice),
            Some(json!({"title": "Green Salad"})),
        )
        .await;
        assert_eq!(kept["title"], "Green Salad");
        assert_eq!(tag_names(&kept), vec!["Fresh"]);
        assert_eq!(kept["ingredients"][0]["name"], "Lettuce");

        let (_, cleared) = send(
            &app.router,
            "PATCH",
            &uri,
            Some(&app.alice),
            Some(json!({"ingredients": []})),
        )
        .await;
        assert_eq!(cleared["ingredients"], json!([]));
        assert_eq!(tag_names(&cleared), vec!["Fresh"]);
    }

    #[tokio::test]
    async fn put_requires_scalars_and_replaces_them() {
        let app = test_app();
        let (_, created) = send(
            &app.router,
            "POST",
            "/api/recipes",
            Some(&app.alice),
            Some(json!({
                "title": "Chili",
                "time_minutes": 60,
                "price": "8.00",
                "description": "Spicy",
                "tags": [{"name": "Hearty"}]
            })),
        )
        .await;
        let uri = format!("/api/recipes/{}", created["id"]);

        let (status, body) = send(
            &app.router,
            "PUT",
            &uri,
            Some(&app.alice),
            Some(json!({"title": "Only a title"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("time_minutes"));

        let (status, replaced) = send(
            &app.router,
            "PUT",
            &uri,
            Some(&app.alice),
            Some(json!({"title": "Mild Chili", "time_minutes": 45, "price": "7.50"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(replaced["title"], "Mild Chili");
        assert_eq!(replaced["time_minutes"], 45);
        assert_eq!(replaced["price"], "7.50");
        assert_eq!(replaced["description"], "Spicy");
        assert_eq!(tag_names(&replaced), vec!["Hearty"]);
    }

    #[tokio::test]
    async fn list_is_short_form_newest_first_and_scoped() {
        let app = test_app();
        for title in ["First", "Second"] {
            send(
                &app.router,
                "POST",
                "/api/recipes",
                Some(&app.alice),
                Some(json!({"title": title, "time_minutes": 1, "price": "1.00", "description": "x"})),
            )
            .await;
        }
        send(
            &app.router,
            "POST",
            "/api/recipes",
            Some(&app.bob),
            Some(json!({"title": "Bob's", "time_minutes": 1, "price": "1.00"})),
        )
        .await;

        let (status, list) = send(&app.router, "GET", "/api/recipes", Some(&app.alice), None).await;
        assert_eq!(status, StatusCode::OK);
        let list = list.as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["title"], "Second");
        assert_eq!(list[1]["title"], "First");
        assert!(list[0].get("description").is_none());

        let (_, detail) = send(
            &app.router,
            "GET",
            &format!("/api/recipes/{}", list[0]["id"]),
            Some(&app.alice),
            None,
        )
        .await;
        assert_eq!(detail["description"], "x");
    }

    #[tokio::test]
    async fn other_users_recipe_is_404() {
        let app = test_app();
        let (_, created) = send(
            &app.router,
            "POST",
            "/api/recipes",
            Some(&app.alice),
            Some(json!({"title": "Secret", "time_minutes": 1, "price": "1.00"})),
        )
        .await;
        let uri = format!("/api/recipes/{}", created["id"]);

        let (status, body) = send(&app.router, "GET", &uri, Some(&app.bob), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));

        let (status, _) = send(
            &app.router,
            "PATCH",
            &uri,
            Some(&app.bob),
            Some(json!({"title": "Hijacked"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app.router, "DELETE", &uri, Some(&app.bob), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app.router, "GET", &uri, Some(&app.alice), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Secret");
    }

    #[tokio::test]
    async fn delete_recipe_returns_204() {
        let app = test_app();
        let (_, created) = send(
            &app.router,
            "POST",
            "/api/recipes",
            Some(&app.alice),
            Some(json!({"title": "Gone", "time_minutes": 1, "price": "1.00", "tags": [{"name": "Kept"}]})),
        )
        .await;
        let uri = format!("/api/recipes/{}", created["id"]);

        let (status, body) = send(&app.router, "DELETE", &uri, Some(&app.alice), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);

        let (status, _) = send(&app.router, "GET", &uri, Some(&app.alice), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, tags) = send(&app.router, "GET", "/api/tags", Some(&app.alice), None).await;
        assert_eq!(tags[0]["name"], "Kept");
    }

    #[tokio::test]
    async fn validation_errors_return_400() {
        let app = test_app();
        let (status, body) = send(
            &app.router,
            "POST",
            "/api/recipes",
            Some(&app.alice),
            Some(json!({"title": "  ", "time_minutes": 1, "price": "1.00"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "title must not be empty");

        let (status, _) = send(
            &app.router,
            "POST",
            "/api/recipes",
            Some(&app.alice),
            Some(json!({"title": "Soup", "time_minutes": 1, "price": "1.00", "tags": [{"name": ""}]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app.router,
            "POST",
            "/api/recipes",
            Some(&app.alice),
            Some(json!({"title": "Soup", "time_minutes": 1, "price": "1.234"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("decimal places"));

        let (status, body) = send(
            &app.router,
            "POST",
            "/api/recipes",
            Some(&app.alice),
            Some(json!({"title": "Soup"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("missing field `time_minutes`"));

        let (_, list) = send(&app.router, "GET", "/api/recipes", Some(&app.alice), None).await;
        assert_eq!(list, json!([]));
    }

    #[tokio::test]
    async fn ingredients_limited_to_user_and_ordered_desc() {
        let app = test_app();
        send(
            &app.router,
            "POST",
            "/api/recipes",
            Some(&app.alice),
            Some(json!({
                "title": "Pudding", "time_minutes": 30, "price": "3.00",
                "ingredients": [{"name": "Kale"}, {"name": "Vanilla"}]
            })),
        )
        .await;
        send(
            &app.router,
            "POST",
            "/api/recipes",
            Some(&app.bob),
            Some(json!({
                "title": "Fries", "time_minutes": 15, "price": "2.00",
                "ingredients": [{"name": "Salt"}]
            })),
        )
        .await;

        let (status, list) =
            send(&app.router, "GET", "/api/ingredients", Some(&app.alice), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            list,
            json!([
                {"id": list[0]["id"], "name": "Vanilla"},
                {"id": list[1]["id"], "name": "Kale"}
            ])
        );
    }

    #[tokio::test]
    async fn rename_and_delete_ingredient() {
        let app = test_app();
        let (_, created) = send(
            &app.router,
            "POST",
            "/api/recipes",
            Some(&app.alice),
            Some(json!({
                "title": "Salsa", "time_minutes": 10, "price": "2.00",
                "ingredients": [{"name": "Cilantro"}, {"name": "Lettuce"}]
            })),
        )
        .await;
        let cilantro = created["ingredients"][0]["id"].as_i64().unwrap();
        let lettuce = created["ingredients"][1]["id"].as_i64().unwrap();

        let (status, renamed) = send(
            &app.router,
            "PATCH",
            &format!("/api/ingredients/{cilantro}"),
            Some(&app.alice),
            Some(json!({"name": "Coriander"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(renamed["name"], "Coriander");

        let (status, _) = send(
            &app.router,
            "PUT",
            &format!("/api/ingredients/{cilantro}"),
            Some(&app.bob),
            Some(json!({"name": "Nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app.router,
            "DELETE",
            &format!("/api/ingredients/{lettuce}"),
            Some(&app.alice),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, list) = send(&app.router, "GET", "/api/ingredients", Some(&app.alice), None).await;
        let names: Vec<&str> = list
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Coriander"]);

        let (_, recipe) = send(
            &app.router,
            "GET",
            &format!("/api/recipes/{}", created["id"]),
            Some(&app.alice),
            None,
        )
        .await;
        assert_eq!(recipe["ingredients"], json!([{"id": cilantro, "name": "Coriander"}]));
    }

    #[tokio::test]
    async fn rename_tag_conflict_returns_409() {
        let app = test_app();
        let (_, created) = send(
            &app.router,
            "POST",
            "/api/recipes",
            Some(&app.alice),
            Some(json!({
                "title": "Wrap", "time_minutes": 5, "price": "3.50",
                "tags": [{"name": "Lunch"}, {"name": "Dinner"}]
            })),
        )
        .await;
        let lunch = created["tags"][0]["id"].as_i64().unwrap();

        let (status, body) = send(
            &app.router,
            "PUT",
            &format!("/api/tags/{lunch}"),
            Some(&app.alice),
            Some(json!({"name": "Dinner"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(!body["error"].as_str().unwrap().contains("UNIQUE"));

        let (status, _) = send(
            &app.router,
            "PATCH",
            &format!("/api/tags/{lunch}"),
            Some(&app.alice),
            Some(json!({"name": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_missing_tag_returns_404() {
        let app = test_app();
        let (status, body) = send(&app.router, "DELETE", "/api/tags/999", Some(&app.alice), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Tag 999 not found");
    }

    #[tokio::test]
    async fn body_size_limit_rejects_oversized() {
        let app = test_app();
        let big_body = vec![b' '; BODY_LIMIT + 1];
        let response = app
            .router
            .clone()
            .oneshot(
                axum::http::Request::post("/api/recipes")
                    .header("Authorization", format!("Bearer {}", app.alice))
                    .header("content-type", "application/json")
                    .body(Body::from(big_body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn malformed_json_returns_400_with_error_body() {
        let app = test_app();
        let response = app
            .router
            .clone()
            .oneshot(
                axum::http::Request::patch("/api/tags/1")
                    .header("Authorization", format!("Bearer {}", app.alice))
                    .header("content-type", "application/json")
                    .body(Body::from("{\"name\": "))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn non_unique_constraint_failure_is_500_not_409() {
        let db = larder_core::db::Database::open_in_memory().unwrap();
        let user = db.insert_user("chef@example.com", "Chef", "hash").unwrap();
        let recipe = NewRecipe {
            title: "Soup".to_string(),
            time_minutes: -1,
            price: Price::from_cents(100),
            ..NewRecipe::default()
        };
        let err = db.insert_recipe(user.id, &recipe).unwrap_err();

        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn internal_error_does_not_leak_details() {
        let error = ApiError::Internal(anyhow::anyhow!("secret database path /home/user/.larder/db"));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Internal server error");
        assert!(!json["error"].as_str().unwrap().contains("secret"));
    }

    #[test]
    fn replace_request_keeps_absent_lists_absent() {
        let req: ReplaceRecipeRequest =
            serde_json::from_value(json!({"title": "A", "time_minutes": 1, "price": "1.00"}))
                .unwrap();
        let changes = RecipeChanges::from(req);
        assert_eq!(changes.title.as_deref(), Some("A"));
        assert!(changes.tags.is_none());
        assert!(changes.link.is_none());
    }
}
