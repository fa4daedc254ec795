//! Hosted Backend Adapter Tests
//!
//! Runs the GoTrue and PostgREST adapters against a mock Supabase project
//! served by axum, and checks what goes over the wire.

use axum::body::Bytes;
use axum::extract::{Path, Query as UrlQuery, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use classifieds_client::ServiceError;
use classifieds_client::config::SupabaseConfig;
use classifieds_client::data::{DataService, PostgrestDataService, Resource};
use classifieds_client::identity::{
    AuthEvent, IdentityError, IdentityService, SupabaseIdentityService,
};
use classifieds_client::model::Listing;
use classifieds_client::observer::Subscription;
use classifieds_client::query::{CollectionRequest, ListingFilters};
use classifieds_client::supabase::SupabaseClient;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

mod common;

const ANON_KEY: &str = "anon-key";

/// A request as the mock saw it
#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: String,
    params: Vec<(String, String)>,
    apikey: Option<String>,
    authorization: Option<String>,
    prefer: Option<String>,
    body: Value,
}

#[derive(Clone, Default)]
struct MockState {
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockState {
    fn record(
        &self,
        method: Method,
        path: String,
        params: Vec<(String, String)>,
        headers: &HeaderMap,
        body: &Bytes,
    ) -> Value {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let body: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
        self.requests.lock().unwrap().push(Recorded {
            method,
            path,
            params,
            apikey: header("apikey"),
            authorization: header("authorization"),
            prefer: header("prefer"),
            body: body.clone(),
        });
        body
    }

    fn last(&self) -> Recorded {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }

    fn find(&self, path: &str) -> Option<Recorded> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.path == path)
            .cloned()
    }
}

fn token_response(user_id: &str, email: &str, token: &str) -> Value {
    json!({
        "access_token": token,
        "token_type": "bearer",
        "expires_in": 3600,
        "refresh_token": format!("refresh-{token}"),
        "user": {
            "id": user_id,
            "email": email,
            "user_metadata": {"full_name": "Jane Doe"},
        },
    })
}

/// Tokens that are already expired when issued
fn expired_token_response(token: &str, refresh_token: Option<&str>) -> Value {
    let mut body = token_response("u-1", "jane@x.com", token);
    body["expires_in"] = json!(0);
    match refresh_token {
        Some(refresh_token) => body["refresh_token"] = json!(refresh_token),
        None => {
            body.as_object_mut().unwrap().remove("refresh_token");
        }
    }
    body
}

fn error(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

async fn signup(State(mock): State<MockState>, headers: HeaderMap, body: Bytes) -> Response {
    let body = mock.record(Method::POST, "/auth/v1/signup".into(), Vec::new(), &headers, &body);
    match body["email"].as_str() {
        Some("taken@x.com") => error(
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({"code": 422, "msg": "User already registered"}),
        ),
        Some("confirm@x.com") => Json(json!({"id": "u-confirm", "email": "confirm@x.com"}))
            .into_response(),
        Some(email) => Json(token_response("u-1", email, "access-1")).into_response(),
        None => error(StatusCode::BAD_REQUEST, json!({"msg": "email required"})),
    }
}

async fn token(
    State(mock): State<MockState>,
    UrlQuery(params): UrlQuery<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body = mock.record(Method::POST, "/auth/v1/token".into(), params.clone(), &headers, &body);
    let grant = params
        .iter()
        .find(|(k, _)| k == "grant_type")
        .map(|(_, v)| v.as_str());
    match grant {
        Some("password") => match body["password"].as_str() {
            Some("hunter22") => Json(token_response("u-1", "jane@x.com", "access-1")).into_response(),
            Some("expiring") => {
                Json(expired_token_response("stale-1", Some("refresh-stale-1"))).into_response()
            }
            Some("revoked") => {
                Json(expired_token_response("stale-2", Some("revoked-2"))).into_response()
            }
            Some("no-refresh") => Json(expired_token_response("stale-3", None)).into_response(),
            _ => error(
                StatusCode::BAD_REQUEST,
                json!({"error": "invalid_grant", "error_description": "Invalid login credentials"}),
            ),
        },
        Some("refresh_token") if body["refresh_token"] == "refresh-stale-1" => {
            Json(token_response("u-1", "jane@x.com", "access-2")).into_response()
        }
        Some("refresh_token") => error(
            StatusCode::BAD_REQUEST,
            json!({
                "error": "invalid_grant",
                "error_description": "Invalid Refresh Token: Refresh Token Not Found"
            }),
        ),
        _ => error(
            StatusCode::BAD_REQUEST,
            json!({"error": "unsupported_grant_type"}),
        ),
    }
}

async fn logout(State(mock): State<MockState>, headers: HeaderMap) -> StatusCode {
    mock.record(Method::POST, "/auth/v1/logout".into(), Vec::new(), &headers, &Bytes::new());
    StatusCode::NO_CONTENT
}

async fn select_rows(
    State(mock): State<MockState>,
    Path(table): Path<String>,
    UrlQuery(params): UrlQuery<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Response {
    mock.record(Method::GET, format!("/rest/v1/{table}"), params, &headers, &Bytes::new());
    match table.as_str() {
        "listings" => Json(json!([{
            "id": "1",
            "seller_id": "u-1",
            "title": "Toyota Camry 2015",
            "price": 150,
            "category_id": "cars",
            "status": "active",
            "created_at": "2026-01-01T00:00:00Z",
            "profiles": {"id": "u-1", "full_name": "Jane Doe", "rating": 4.8, "is_verified": true},
            "categories": {"id": "cars", "name": "Cars", "slug": "cars"},
            "subcategories": null,
            "cities": {"id": "pune", "name": "Pune", "slug": "pune", "state": "MH"},
            "areas": null,
        }]))
        .into_response(),
        "categories" => error(
            StatusCode::UNAUTHORIZED,
            json!({"message": "JWT expired", "code": "PGRST301"}),
        ),
        _ => Json(json!([])).into_response(),
    }
}

async fn insert_row(
    State(mock): State<MockState>,
    Path(table): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut row = mock.record(Method::POST, format!("/rest/v1/{table}"), Vec::new(), &headers, &body);
    if headers.get("prefer").is_none() {
        return StatusCode::CREATED.into_response();
    }
    row["id"] = json!("new-1");
    (StatusCode::CREATED, Json(json!([row]))).into_response()
}

async fn update_rows(
    State(mock): State<MockState>,
    Path(table): Path<String>,
    UrlQuery(params): UrlQuery<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    mock.record(Method::PATCH, format!("/rest/v1/{table}"), params, &headers, &body);
    // Nothing matches
    Json(json!([])).into_response()
}

async fn delete_rows(
    State(mock): State<MockState>,
    Path(table): Path<String>,
    UrlQuery(params): UrlQuery<Vec<(String, String)>>,
    headers: HeaderMap,
) -> StatusCode {
    mock.record(Method::DELETE, format!("/rest/v1/{table}"), params, &headers, &Bytes::new());
    StatusCode::NO_CONTENT
}

async fn rpc(
    State(mock): State<MockState>,
    Path(function): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    mock.record(Method::POST, format!("/rest/v1/rpc/{function}"), Vec::new(), &headers, &body);
    match function.as_str() {
        "increment_listing_views" => StatusCode::NO_CONTENT.into_response(),
        _ => error(
            StatusCode::NOT_FOUND,
            json!({"message": format!("Could not find the function public.{function}")}),
        ),
    }
}

/// Start a mock Supabase project on a random port
async fn start_mock_backend() -> (SocketAddr, MockState, tokio::task::JoinHandle<()>) {
    common::init_test_logging();
    let state = MockState::default();

    let app = Router::new()
        .route("/auth/v1/signup", post(signup))
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/logout", post(logout))
        .route("/rest/v1/rpc/:function", post(rpc))
        .route(
            "/rest/v1/:table",
            get(select_rows)
                .post(insert_row)
                .patch(update_rows)
                .delete(delete_rows),
        )
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state, handle)
}

fn adapters(addr: SocketAddr) -> (SupabaseIdentityService, PostgrestDataService) {
    let client = SupabaseClient::new(&SupabaseConfig {
        url: format!("http://{addr}/"),
        anon_key: ANON_KEY.to_string(),
        request_timeout: Duration::from_secs(5),
    })
    .unwrap();
    (
        SupabaseIdentityService::new(client.clone()),
        PostgrestDataService::new(client),
    )
}

fn record_events(identity: &SupabaseIdentityService) -> (Arc<Mutex<Vec<&'static str>>>, Subscription) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let subscription = identity.subscribe(Box::new(move |event: &AuthEvent| {
        sink.lock().unwrap().push(event.kind());
    }));
    (events, subscription)
}

// ============================================================================
// GoTrue
// ============================================================================

mod gotrue {
    use super::*;

    #[tokio::test]
    async fn test_sign_up_sends_attributes_and_signs_in() {
        let (addr, mock, server) = start_mock_backend().await;
        let (identity, _) = adapters(addr);
        let (events, _subscription) = record_events(&identity);

        let outcome = identity
            .sign_up("jane@x.com", "hunter22", json!({"full_name": "Jane Doe"}))
            .await
            .unwrap();
        assert_eq!(outcome.user.id, "u-1");
        assert!(outcome.session.is_some());
        assert_eq!(*events.lock().unwrap(), vec!["signed_in"]);

        let request = mock.last();
        assert_eq!(request.apikey.as_deref(), Some(ANON_KEY));
        assert_eq!(request.authorization.as_deref(), Some("Bearer anon-key"));
        assert_eq!(request.body["data"]["full_name"], "Jane Doe");

        let session = identity.current_session().await.unwrap().unwrap();
        assert_eq!(session.access_token, "access-1");
        assert!(session.expires_at.is_some());

        server.abort();
    }

    #[tokio::test]
    async fn test_sign_up_pending_confirmation_has_no_session() {
        let (addr, _mock, server) = start_mock_backend().await;
        let (identity, _) = adapters(addr);
        let (events, _subscription) = record_events(&identity);

        let outcome = identity
            .sign_up("confirm@x.com", "hunter22", json!({}))
            .await
            .unwrap();
        assert_eq!(outcome.user.id, "u-confirm");
        assert!(outcome.session.is_none());
        assert!(events.lock().unwrap().is_empty());

        server.abort();
    }

    #[tokio::test]
    async fn test_duplicate_sign_up_is_rejected_with_message() {
        let (addr, _mock, server) = start_mock_backend().await;
        let (identity, _) = adapters(addr);

        let err = identity
            .sign_up("taken@x.com", "hunter22", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err, IdentityError::Rejected("User already registered".into()));

        server.abort();
    }

    #[tokio::test]
    async fn test_sign_in_with_wrong_password() {
        let (addr, mock, server) = start_mock_backend().await;
        let (identity, _) = adapters(addr);
        let (events, _subscription) = record_events(&identity);

        let err = identity.sign_in("jane@x.com", "wrong").await.unwrap_err();
        assert_eq!(err, IdentityError::InvalidCredentials);
        assert!(events.lock().unwrap().is_empty());

        let request = mock.last();
        assert_eq!(request.path, "/auth/v1/token");
        assert!(request.params.contains(&("grant_type".into(), "password".into())));

        server.abort();
    }

    #[tokio::test]
    async fn test_sign_out_revokes_user_token() {
        let (addr, mock, server) = start_mock_backend().await;
        let (identity, _) = adapters(addr);
        let (events, _subscription) = record_events(&identity);

        identity.sign_in("jane@x.com", "hunter22").await.unwrap();
        identity.sign_out().await.unwrap();

        let request = mock.find("/auth/v1/logout").unwrap();
        assert_eq!(request.authorization.as_deref(), Some("Bearer access-1"));
        assert_eq!(*events.lock().unwrap(), vec!["signed_in", "signed_out"]);
        assert!(identity.current_session().await.unwrap().is_none());

        server.abort();
    }

    #[tokio::test]
    async fn test_expired_session_is_refreshed() {
        let (addr, mock, server) = start_mock_backend().await;
        let (identity, _) = adapters(addr);
        let (events, _subscription) = record_events(&identity);

        identity.sign_in("jane@x.com", "expiring").await.unwrap();
        let session = identity.current_session().await.unwrap().unwrap();
        assert_eq!(session.access_token, "access-2");
        assert_eq!(*events.lock().unwrap(), vec!["signed_in", "token_refreshed"]);

        let request = mock.last();
        assert!(request.params.contains(&("grant_type".into(), "refresh_token".into())));
        assert_eq!(request.body["refresh_token"], "refresh-stale-1");
        assert_eq!(request.authorization.as_deref(), Some("Bearer anon-key"));

        // The refreshed token is good for an hour: no second grant
        let again = identity.current_session().await.unwrap().unwrap();
        assert_eq!(again.access_token, "access-2");
        assert_eq!(events.lock().unwrap().len(), 2);

        server.abort();
    }

    #[tokio::test]
    async fn test_refused_refresh_signs_out() {
        let (addr, mock, server) = start_mock_backend().await;
        let (identity, _) = adapters(addr);
        let (events, _subscription) = record_events(&identity);

        identity.sign_in("jane@x.com", "revoked").await.unwrap();
        assert!(identity.current_session().await.unwrap().is_none());
        assert_eq!(*events.lock().unwrap(), vec!["signed_in", "signed_out"]);
        assert_eq!(mock.last().body["refresh_token"], "revoked-2");

        assert!(identity.current_session().await.unwrap().is_none());
        assert_eq!(events.lock().unwrap().len(), 2);

        server.abort();
    }

    #[tokio::test]
    async fn test_expired_session_without_refresh_token_signs_out() {
        let (addr, mock, server) = start_mock_backend().await;
        let (identity, _) = adapters(addr);
        let (events, _subscription) = record_events(&identity);

        identity.sign_in("jane@x.com", "no-refresh").await.unwrap();
        assert!(identity.current_session().await.unwrap().is_none());
        assert_eq!(*events.lock().unwrap(), vec!["signed_in", "signed_out"]);

        // Only the password grant went out
        let request = mock.last();
        assert!(request.params.contains(&("grant_type".into(), "password".into())));

        server.abort();
    }

    #[tokio::test]
    async fn test_sign_out_refreshes_before_revoking() {
        let (addr, mock, server) = start_mock_backend().await;
        let (identity, _) = adapters(addr);
        let (events, _subscription) = record_events(&identity);

        identity.sign_in("jane@x.com", "expiring").await.unwrap();
        identity.sign_out().await.unwrap();

        let request = mock.find("/auth/v1/logout").unwrap();
        assert_eq!(request.authorization.as_deref(), Some("Bearer access-2"));
        assert_eq!(
            *events.lock().unwrap(),
            vec!["signed_in", "token_refreshed", "signed_out"]
        );

        server.abort();
    }

    #[tokio::test]
    async fn test_sign_out_after_refused_refresh_signs_out_once() {
        let (addr, mock, server) = start_mock_backend().await;
        let (identity, _) = adapters(addr);
        let (events, _subscription) = record_events(&identity);

        identity.sign_in("jane@x.com", "revoked").await.unwrap();
        identity.sign_out().await.unwrap();

        assert!(mock.find("/auth/v1/logout").is_none());
        assert_eq!(*events.lock().unwrap(), vec!["signed_in", "signed_out"]);

        server.abort();
    }
}

// ============================================================================
// PostgREST
// ============================================================================

mod postgrest {
    use super::*;

    #[tokio::test]
    async fn test_select_renders_filters_as_params() {
        let (addr, mock, server) = start_mock_backend().await;
        let (_, data) = adapters(addr);

        let request = CollectionRequest::Listings(
            ListingFilters::default()
                .category("cars")
                .price_between(Some(100.0), Some(200.0))
                .search("camry"),
        );
        let rows = data.select(&request.query()).await.unwrap();
        assert_eq!(rows.len(), 1);

        let recorded = mock.last();
        assert_eq!(recorded.method, Method::GET);
        assert_eq!(recorded.path, "/rest/v1/listings");
        let params = &recorded.params;
        for expected in [
            (
                "select",
                "*,profiles:seller_id(id,full_name,avatar_url,rating,total_reviews,is_verified),\
                 categories:category_id(id,name,slug),\
                 subcategories:subcategory_id(id,name,slug),\
                 cities:city_id(id,name,slug,state),\
                 areas:area_id(id,name,slug)",
            ),
            ("category_id", "eq.cars"),
            ("price", "gte.100"),
            ("price", "lte.200"),
            ("status", "eq.active"),
        ] {
            assert!(
                params.contains(&(expected.0.to_string(), expected.1.to_string())),
                "missing {expected:?} in {params:?}"
            );
        }
        assert!(params.iter().any(|(k, v)| k == "or" && v.contains("ilike")));
        assert!(params.iter().any(|(k, _)| k == "order"));

        let listing: Listing = serde_json::from_value(rows[0].clone()).unwrap();
        let seller = listing.seller.unwrap();
        assert_eq!(seller.full_name.as_deref(), Some("Jane Doe"));
        assert!(seller.is_verified);
        assert_eq!(listing.category.unwrap().name, "Cars");
        assert_eq!(listing.city.unwrap().state.as_deref(), Some("MH"));
        assert!(listing.area.is_none());

        server.abort();
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_before_request() {
        let (addr, mock, server) = start_mock_backend().await;
        let (identity, data) = adapters(addr);
        let (events, _subscription) = record_events(&identity);

        identity.sign_in("jane@x.com", "expiring").await.unwrap();
        data.select(&CollectionRequest::Cities.query()).await.unwrap();

        let recorded = mock.last();
        assert_eq!(recorded.path, "/rest/v1/cities");
        assert_eq!(recorded.authorization.as_deref(), Some("Bearer access-2"));
        assert_eq!(*events.lock().unwrap(), vec!["signed_in", "token_refreshed"]);

        server.abort();
    }

    #[tokio::test]
    async fn test_refused_refresh_falls_back_to_anon() {
        let (addr, mock, server) = start_mock_backend().await;
        let (identity, data) = adapters(addr);
        let (events, _subscription) = record_events(&identity);

        identity.sign_in("jane@x.com", "revoked").await.unwrap();
        data.select(&CollectionRequest::Cities.query()).await.unwrap();

        assert_eq!(mock.last().authorization.as_deref(), Some("Bearer anon-key"));
        assert_eq!(*events.lock().unwrap(), vec!["signed_in", "signed_out"]);

        server.abort();
    }

    #[tokio::test]
    async fn test_requests_carry_the_signed_in_token() {
        let (addr, mock, server) = start_mock_backend().await;
        let (identity, data) = adapters(addr);

        data.select(&CollectionRequest::Cities.query()).await.unwrap();
        assert_eq!(mock.last().authorization.as_deref(), Some("Bearer anon-key"));

        identity.sign_in("jane@x.com", "hunter22").await.unwrap();
        data.select(&CollectionRequest::Cities.query()).await.unwrap();
        let recorded = mock.last();
        assert_eq!(recorded.authorization.as_deref(), Some("Bearer access-1"));
        assert_eq!(recorded.apikey.as_deref(), Some(ANON_KEY));

        server.abort();
    }

    #[tokio::test]
    async fn test_insert_asks_for_the_stored_row() {
        let (addr, mock, server) = start_mock_backend().await;
        let (_, data) = adapters(addr);

        let stored = data
            .insert(Resource::Profiles, json!({"id": "u-1", "full_name": "Jane"}))
            .await
            .unwrap();
        assert_eq!(stored["full_name"], "Jane");
        assert_eq!(mock.last().prefer.as_deref(), Some("return=representation"));

        server.abort();
    }

    #[tokio::test]
    async fn test_update_without_match_is_not_found() {
        let (addr, mock, server) = start_mock_backend().await;
        let (_, data) = adapters(addr);

        let err = data
            .update(Resource::Listings, "42", json!({"price": 10}))
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::NotFound("listings/42".into()));
        assert!(mock.last().params.contains(&("id".into(), "eq.42".into())));

        data.delete(Resource::Listings, "42").await.unwrap();
        assert_eq!(mock.last().method, Method::DELETE);

        server.abort();
    }

    #[tokio::test]
    async fn test_rpc_and_upstream_messages() {
        let (addr, mock, server) = start_mock_backend().await;
        let (_, data) = adapters(addr);

        let value = data
            .rpc("increment_listing_views", json!({"listing_id": "1"}))
            .await
            .unwrap();
        assert_eq!(value, Value::Null);
        assert_eq!(mock.last().body["listing_id"], "1");

        let err = data.rpc("missing_fn", json!({})).await.unwrap_err();
        assert_eq!(
            err,
            ServiceError::Upstream {
                status: 404,
                message: "Could not find the function public.missing_fn".into(),
            }
        );

        let err = data
            .select(&CollectionRequest::Categories.query())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ServiceError::Upstream {
                status: 401,
                message: "JWT expired".into(),
            }
        );

        server.abort();
    }
}
