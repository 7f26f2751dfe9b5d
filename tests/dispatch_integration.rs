use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use opengsync_server::api::routes::create_router;
use opengsync_server::api::{
    AppState, Blueprint, CacheType, DispatchSettings, LimitExempt, ParamType, RouteError,
    RouteOptions, ServerError, SharedState, Signature,
};
use opengsync_server::model::{ApiToken, Library, User, UserRole};
use opengsync_server::store::{MemoryDatabase, MemoryWorkflowStore, UnitOfWork, WorkflowStore};

const ADMIN: i64 = 1;
const TECH: i64 = 2;
const CLIENT: i64 = 3;
const OTHER_CLIENT: i64 = 4;

struct TestApp {
    db: Arc<MemoryDatabase>,
    workflows: Arc<MemoryWorkflowStore>,
    state: SharedState,
}

impl TestApp {
    fn new() -> Self {
        Self::with_settings(DispatchSettings::default())
    }

    fn with_settings(settings: DispatchSettings) -> Self {
        let db = Arc::new(MemoryDatabase::new());
        db.insert_user(User::new(ADMIN, "admin@lab.org", "Admin", UserRole::Admin));
        db.insert_user(User::new(TECH, "tech@lab.org", "Tech", UserRole::Technician));
        db.insert_user(User::new(CLIENT, "client@uni.edu", "Client", UserRole::Client));
        db.insert_user(User::new(OTHER_CLIENT, "other@uni.edu", "Other", UserRole::Client));

        db.insert_api_token(ApiToken::new("valid-token", ADMIN, None));
        db.insert_api_token(ApiToken::new(
            "expired-token",
            ADMIN,
            Some(Utc::now() - ChronoDuration::days(1)),
        ));

        for (id, name) in [(1, "lib_a"), (2, "lib_b")] {
            let mut library = Library::new(id, name);
            library.seq_request_id = Some(7);
            db.insert_library(library);
        }

        let workflows = Arc::new(MemoryWorkflowStore::new());
        let state = AppState::new(db.clone(), workflows.clone(), settings).shared();
        Self {
            db,
            workflows,
            state,
        }
    }

    fn router(&self, bp: Blueprint) -> Router {
        Router::new().merge(bp.into_router()).with_state(self.state.clone())
    }

    fn app(&self) -> Router {
        create_router(self.state.clone(), "static").unwrap()
    }
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn get(uri: &str, user: Option<i64>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(id) = user {
        builder = builder.header("x-user-id", id.to_string());
    }
    builder.body(Body::empty()).unwrap()
}

fn post_form(uri: &str, user: Option<i64>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header(header::COOKIE, "session=wizard-session");
    if let Some(id) = user {
        builder = builder.header("x-user-id", id.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn data_uuid(html: &str) -> String {
    let start = html.find("data-uuid=\"").expect("wizard markup") + "data-uuid=\"".len();
    let end = html[start..].find('"').unwrap() + start;
    html[start..end].to_string()
}

fn data_step(html: &str) -> String {
    let start = html.find("data-step=\"").expect("wizard markup") + "data-step=\"".len();
    let end = html[start..].find('"').unwrap() + start;
    html[start..end].to_string()
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new().app();
    let response = send(&app, get("/health", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("healthy"));
}

#[tokio::test]
async fn test_short_route_uses_declared_default() {
    let test = TestApp::new();
    let mut bp = Blueprint::new("/experiments");
    bp.add(
        Signature::new("get_experiment")
            .current_user()
            .param("experiment_id", ParamType::Int)
            .param_default("page", ParamType::Int, 0),
        RouteOptions::htmx(),
        |_ctx, args| async move {
            Ok::<_, ServerError>(format!("{}:{}", args.int("experiment_id")?, args.int("page")?))
        },
    )
    .unwrap();
    let app = test.router(bp);

    let short = send(&app, get("/experiments/get_experiment/7", Some(TECH))).await;
    let long = send(&app, get("/experiments/get_experiment/7/0", Some(TECH))).await;
    assert_eq!(short.status(), StatusCode::OK);
    assert_eq!(long.status(), StatusCode::OK);
    assert_eq!(body_text(short).await, body_text(long).await);

    let paged = send(&app, get("/experiments/get_experiment/7/3", Some(TECH))).await;
    assert_eq!(body_text(paged).await, "7:3");

    // an int converter never matches text
    let mismatch = send(&app, get("/experiments/get_experiment/seven", Some(TECH))).await;
    assert_eq!(mismatch.status(), StatusCode::OK);
    assert!(body_text(mismatch).await.contains("does not exist"));
}

#[tokio::test]
async fn test_missing_api_token_never_reaches_handler() {
    let test = TestApp::new();
    let hits = counter();
    let mut bp = Blueprint::new("/api/samples");
    let calls = hits.clone();
    bp.add(
        Signature::new("create").param("name", ParamType::Str),
        RouteOptions::api()
            .methods([Method::POST])
            .json(["name"])
            .api_token_required(),
        move |ctx, args| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                assert!(ctx.api_token().is_some());
                Ok::<_, ServerError>(format!("created {}", args.str("name")?))
            }
        },
    )
    .unwrap();
    let app = test.router(bp);

    let response = send(&app, post_json("/api/samples/create", serde_json::json!({"name": "s1"}))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_text(response).await, "API token is required but not provided.");

    let response = send(
        &app,
        post_json("/api/samples/create", serde_json::json!({"name": "s1", "api_token": "nope"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_text(response).await, "Invalid API token.");

    let response = send(
        &app,
        post_json(
            "/api/samples/create",
            serde_json::json!({"name": "s1", "api_token": "expired-token"}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_text(response).await, "API token has expired.");
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    let response = send(
        &app,
        post_json(
            "/api/samples/create",
            serde_json::json!({"name": "s1", "api_token": "valid-token"}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "created s1");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reindex_wizard_back_purges_later_tables() {
    let test = TestApp::new();
    let app = test.app();
    let base = "/api/workflows/reindex";

    let response = send(&app, get(&format!("{}/begin?seq_request_id=7", base), Some(TECH))).await;
    let html = body_text(response).await;
    assert_eq!(data_step(&html), "select_libraries");
    assert!(html.contains("lib_a") && html.contains("lib_b"));

    let response = send(
        &app,
        post_form(&format!("{}/select?seq_request_id=7", base), Some(TECH), "library_ids=1&library_ids=2"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert_eq!(data_step(&html), "barcode_input");
    let uuid = data_uuid(&html);
    assert!(!uuid.is_empty());

    let upload = format!("{}/upload_barcode_form/{}", base, uuid);
    let response = send(
        &app,
        post_form(&upload, Some(TECH), "barcodes=1%2CACGTACGT%2CTTGGCCAA%0A2%2CGGCCTTAA"),
    )
    .await;
    let html = body_text(response).await;
    // no index kit named, so the kit mapping step is skipped
    assert_eq!(data_step(&html), "complete_reindex");
    assert!(html.contains("ACGTACGT"));

    let session = test.workflows.load("reindex", &uuid).await.unwrap().unwrap();
    assert!(session.tables().contains_key("barcode_table"));

    let response = send(&app, get(&format!("{}/previous/{}", base, uuid), Some(TECH))).await;
    let html = body_text(response).await;
    assert_eq!(data_step(&html), "barcode_input");
    assert!(!html.contains("ACGTACGT"));

    let session = test.workflows.load("reindex", &uuid).await.unwrap().unwrap();
    assert_eq!(session.step_names(), vec!["select_libraries"]);
    assert!(!session.tables().contains_key("barcode_table"));
    assert!(session.tables().contains_key("library_table"));

    let response = send(
        &app,
        post_form(&upload, Some(TECH), "barcodes=1%2CCCCCAAAA%0A2%2CGGGGTTTT"),
    )
    .await;
    let html = body_text(response).await;
    assert_eq!(data_step(&html), "complete_reindex");
    assert!(html.contains("CCCCAAAA"));
    assert!(!html.contains("ACGTACGT"));

    let response = send(
        &app,
        post_form(&format!("{}/complete_reindex/{}", base, uuid), Some(TECH), ""),
    )
    .await;
    assert!(body_text(response).await.contains("Re-indexing complete."));
    assert_eq!(test.db.library(1).unwrap().sequence_i7.as_deref(), Some("CCCCAAAA"));
    assert_eq!(test.db.library(2).unwrap().sequence_i7.as_deref(), Some("GGGGTTTT"));

    let flashes = Request::builder()
        .uri("/htmx/flashes")
        .header(header::COOKIE, "session=wizard-session")
        .body(Body::empty())
        .unwrap();
    assert!(body_text(send(&app, flashes).await).await.contains("Re-indexed 2 libraries."));

    // completed sessions reject further transitions
    let response = send(&app, post_form(&upload, Some(TECH), "barcodes=1%2CAAAA")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("is already completed"));
}

#[tokio::test]
async fn test_reindex_is_insider_only() {
    let app = TestApp::new().app();
    let response = send(&app, get("/api/workflows/reindex/begin", Some(CLIENT))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("You do not have permissions"));
    assert!(!html.contains("reindex-workflow"));
}

#[tokio::test]
async fn test_current_user_without_login_is_rejected_at_registration() {
    let mut bp = Blueprint::new("/htmx/projects");
    let result = bp.add(
        Signature::new("get_project").current_user().param("project_id", ParamType::Int),
        RouteOptions::htmx().login_required(false),
        |_ctx, _args| async move { Ok::<_, ServerError>("unreachable") },
    );
    assert_eq!(result, Err(RouteError::CurrentUserWithoutLogin("get_project".to_string())));
    assert!(bp.endpoints().is_empty());
}

#[tokio::test]
async fn test_rate_limit_exempts_insiders() {
    let test = TestApp::new();
    let mut bp = Blueprint::new("/api");
    bp.add(
        Signature::new("status").optional_current_user(),
        RouteOptions::api().limit("3/second", LimitExempt::Insider),
        |_ctx, _args| async move { Ok::<_, ServerError>("ok") },
    )
    .unwrap();
    let app = test.router(bp);

    let request = |user: i64, ip: &str| {
        Request::builder()
            .uri("/api/status")
            .header("x-user-id", user.to_string())
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    };

    for _ in 0..3 {
        let response = send(&app, request(CLIENT, "10.0.0.9")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = send(&app, request(CLIENT, "10.0.0.9")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    for _ in 0..4 {
        let response = send(&app, request(TECH, "10.0.0.10")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_parameter_precedence() {
    let test = TestApp::new();
    let mut bp = Blueprint::new("/api");
    bp.add(
        Signature::new("echo").param("sort", ParamType::Str),
        RouteOptions::api()
            .methods([Method::POST])
            .without_db()
            .args(["sort"]),
        |_ctx, args| async move { Ok::<_, ServerError>(args.str("sort")?.to_string()) },
    )
    .unwrap();
    let app = test.router(bp);

    let response = send(&app, post_form("/api/echo?sort=query", None, "sort=form")).await;
    assert_eq!(body_text(response).await, "query");

    let response = send(&app, post_form("/api/echo", None, "sort=form")).await;
    assert_eq!(body_text(response).await, "form");

    let response = send(&app, post_json("/api/echo?sort=query", serde_json::json!({"sort": "json"}))).await;
    assert_eq!(body_text(response).await, "query");

    let response = send(&app, post_json("/api/echo", serde_json::json!({"sort": "json"}))).await;
    assert_eq!(body_text(response).await, "json");

    let response = send(&app, post_json("/api/echo", serde_json::json!({}))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&app, get("/api/echo?sort=query", None)).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_htmx_errors_are_always_200() {
    let test = TestApp::new();
    let mut bp = Blueprint::new("/htmx");
    bp.add(
        Signature::new("missing").current_user(),
        RouteOptions::htmx(),
        |_ctx, _args| async move { Err::<&'static str, _>(ServerError::not_found()) },
    )
    .unwrap();
    bp.add(
        Signature::new("gone").current_user(),
        RouteOptions::page(),
        |_ctx, _args| async move { Err::<&'static str, _>(ServerError::not_found()) },
    )
    .unwrap();
    let app = test.router(bp);

    let response = send(&app, get("/htmx/missing", Some(TECH))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["HX-Retarget"], "#alert-container");
    assert!(body_text(response).await.contains("The requested resource does not exist."));

    // unauthenticated htmx callers still get 200
    let response = send(&app, get("/htmx/missing", None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, get("/htmx/gone", Some(TECH))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app, get("/htmx/gone", None)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/auth/login?next=%2Fhtmx%2Fgone");
}

#[tokio::test]
async fn test_commit_and_rollback() {
    let test = TestApp::new();
    let mut bp = Blueprint::new("/api");
    bp.add(
        Signature::new("read_then_fail"),
        RouteOptions::api(),
        |ctx, _args| async move {
            ctx.db()?.get_library(1).await?;
            Err::<&'static str, _>(ServerError::not_found())
        },
    )
    .unwrap();
    bp.add(
        Signature::new("write_then_fail"),
        RouteOptions::api(),
        |ctx, _args| async move {
            let uow = ctx.db()?;
            let mut library = uow.get_library(1).await?.ok_or_else(ServerError::not_found)?;
            library.sequence_i7 = Some("AAAAAAAA".to_string());
            uow.update_library(library).await?;
            Err::<&'static str, _>(ServerError::bad_request())
        },
    )
    .unwrap();
    bp.add(
        Signature::new("write"),
        RouteOptions::api(),
        |ctx, _args| async move {
            let uow = ctx.db()?;
            let mut library = uow.get_library(2).await?.ok_or_else(ServerError::not_found)?;
            library.index_well = Some("H12".to_string());
            uow.update_library(library).await?;
            Ok::<_, ServerError>("written")
        },
    )
    .unwrap();
    let app = test.router(bp);

    let response = send(&app, get("/api/read_then_fail", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let stats = test.db.stats();
    assert_eq!((stats.committed, stats.rolled_back), (1, 0));

    let response = send(&app, get("/api/write_then_fail", None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let stats = test.db.stats();
    assert_eq!((stats.committed, stats.rolled_back), (1, 1));
    assert_eq!(test.db.library(1).unwrap().sequence_i7, None);

    let response = send(&app, get("/api/write", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(test.db.stats().committed, 2);
    assert_eq!(test.db.library(2).unwrap().index_well.as_deref(), Some("H12"));
}

fn counting_blueprint(hits: Arc<AtomicUsize>) -> Blueprint {
    let mut bp = Blueprint::new("/api");
    bp.add(
        Signature::new("report").optional_current_user(),
        RouteOptions::api().cache(Duration::from_secs(60), CacheType::Insider),
        move |_ctx, _args| {
            let hits = hits.clone();
            async move { Ok::<_, ServerError>(format!("render {}", hits.fetch_add(1, Ordering::SeqCst) + 1)) }
        },
    )
    .unwrap();
    bp
}

#[tokio::test]
async fn test_insider_cache_partition() {
    let test = TestApp::new();
    let hits = counter();
    let app = test.router(counting_blueprint(hits.clone()));

    let admin = body_text(send(&app, get("/api/report", Some(ADMIN))).await).await;
    let tech = body_text(send(&app, get("/api/report", Some(TECH))).await).await;
    assert_eq!(admin, "render 1");
    assert_eq!(tech, "render 1");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let client = body_text(send(&app, get("/api/report", Some(CLIENT))).await).await;
    let other = body_text(send(&app, get("/api/report", Some(OTHER_CLIENT))).await).await;
    assert_ne!(client, other);
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    // per-caller entries still hit on repeat
    let again = body_text(send(&app, get("/api/report", Some(CLIENT))).await).await;
    assert_eq!(again, client);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_debug_mode_disables_cache() {
    let test = TestApp::with_settings(DispatchSettings {
        debug: true,
        ..DispatchSettings::default()
    });
    let hits = counter();
    let app = test.router(counting_blueprint(hits.clone()));

    for _ in 0..3 {
        let response = send(&app, get("/api/report", Some(ADMIN))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert!(test.state.route_cache.is_empty());
}

#[tokio::test]
async fn test_going_back_to_selection_keeps_session() {
    let test = TestApp::new();
    let app = test.app();
    let base = "/api/workflows/reindex";

    let response = send(
        &app,
        post_form(&format!("{}/select?seq_request_id=7", base), Some(TECH), "library_ids=1"),
    )
    .await;
    let uuid = data_uuid(&body_text(response).await);

    let response = send(&app, get(&format!("{}/previous/{}?seq_request_id=7", base, uuid), Some(TECH))).await;
    let html = body_text(response).await;
    assert_eq!(data_step(&html), "select_libraries");
    assert_eq!(data_uuid(&html), uuid);
    assert!(html.contains(&format!("<input type=\"hidden\" name=\"uuid\" value=\"{}\">", uuid)));
    assert!(html.contains("value=\"1\" checked>"));
    assert!(!html.contains("value=\"2\" checked>"));

    let response = send(
        &app,
        post_form(
            &format!("{}/select?seq_request_id=7", base),
            Some(TECH),
            &format!("uuid={}&library_ids=1&library_ids=2", uuid),
        ),
    )
    .await;
    let html = body_text(response).await;
    assert_eq!(data_step(&html), "barcode_input");
    assert_eq!(data_uuid(&html), uuid);

    let session = test.workflows.load("reindex", &uuid).await.unwrap().unwrap();
    assert_eq!(session.step_names(), vec!["select_libraries"]);
    assert_eq!(session.tables()["library_table"].len(), 2);
    assert_eq!(test.workflows.len(), 1);
}

#[tokio::test]
async fn test_two_defaulted_path_params_expand_to_four_routes() {
    let test = TestApp::new();
    let mut bp = Blueprint::new("/api");
    bp.add(
        Signature::new("pick")
            .param_default("a", ParamType::Int, 1)
            .param_default("b", ParamType::Int, 2),
        RouteOptions::api().without_db(),
        |_ctx, args| async move { Ok::<_, ServerError>(format!("{}:{}", args.int("a")?, args.int("b")?)) },
    )
    .unwrap();
    assert_eq!(bp.endpoints()[0].patterns().len(), 4);
    let app = test.router(bp);

    assert_eq!(body_text(send(&app, get("/api/pick/3/4", None)).await).await, "3:4");
    assert_eq!(body_text(send(&app, get("/api/pick", None)).await).await, "1:2");
    // both single-segment shapes share a path; the first mounted omits `a`
    assert_eq!(body_text(send(&app, get("/api/pick/5", None)).await).await, "1:5");
    assert_eq!(body_text(send(&app, get("/api/pick/1/5", None)).await).await, "1:5");
}

#[tokio::test]
async fn test_parameter_coercion_over_http() {
    let test = TestApp::new();
    let mut bp = Blueprint::new("/api");
    bp.add(
        Signature::new("sorted").param("order", ParamType::literal(["asc", "desc"])),
        RouteOptions::api().without_db().args(["order"]),
        |_ctx, args| async move { Ok::<_, ServerError>(args.str("order")?.to_string()) },
    )
    .unwrap();
    bp.add(
        Signature::new("filter").optional("filters", ParamType::Dict),
        RouteOptions::api()
            .methods([Method::POST])
            .without_db()
            .form(["filters"]),
        |_ctx, args| async move {
            let filters = match args.dict("filters")? {
                Some(map) => serde_json::Value::Object(map.clone()).to_string(),
                None => "none".to_string(),
            };
            Ok::<_, ServerError>(filters)
        },
    )
    .unwrap();
    let app = test.router(bp);

    let response = send(&app, get("/api/sorted?order=desc", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "desc");

    let response = send(&app, get("/api/sorted?order=sideways", None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "Invalid query parameters");

    let response = send(
        &app,
        post_form("/api/filter", None, "filters=%7B%22status%22%3A%22pooled%22%7D"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, r#"{"status":"pooled"}"#);

    let response = send(&app, post_form("/api/filter", None, "")).await;
    assert_eq!(body_text(response).await, "none");

    let response = send(&app, post_form("/api/filter", None, "filters=not-json")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_resource_errors_render_html_pages() {
    let test = TestApp::new();
    let mut bp = Blueprint::new("/files");
    bp.add(
        Signature::new("download").current_user(),
        RouteOptions::resource(),
        |_ctx, _args| async move { Err::<&'static str, _>(ServerError::not_found()) },
    )
    .unwrap();
    let app = test.router(bp);

    let response = send(&app, get("/files/download", Some(TECH))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    let html = body_text(response).await;
    assert!(html.starts_with("<!DOCTYPE html>"));
    assert!(html.contains("<h1>404</h1>"));
    assert!(html.contains("The requested resource does not exist."));
}

#[tokio::test]
async fn test_global_cache_is_shared_by_all_callers() {
    let test = TestApp::new();
    let hits = counter();
    let mut bp = Blueprint::new("/api");
    let calls = hits.clone();
    bp.add(
        Signature::new("summary").optional_current_user(),
        RouteOptions::api().cache(Duration::from_secs(60), CacheType::Global),
        move |_ctx, _args| {
            let calls = calls.clone();
            async move { Ok::<_, ServerError>(format!("render {}", calls.fetch_add(1, Ordering::SeqCst) + 1)) }
        },
    )
    .unwrap();
    let app = test.router(bp);

    for user in [Some(CLIENT), Some(OTHER_CLIENT), Some(ADMIN), None] {
        let response = send(&app, get("/api/summary", user)).await;
        assert_eq!(body_text(response).await, "render 1");
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rate_limits_are_per_blueprint() {
    let test = TestApp::new();
    let limited = |prefix: &str| {
        let mut bp = Blueprint::new(prefix);
        bp.add(
            Signature::new("get"),
            RouteOptions::api().without_db().limit("1/second", LimitExempt::Never),
            |_ctx, _args| async move { Ok::<_, ServerError>("ok") },
        )
        .unwrap();
        bp
    };
    let app = Router::new()
        .merge(limited("/a").into_router())
        .merge(limited("/b").into_router())
        .with_state(test.state.clone());

    let request = |uri: &str| {
        Request::builder()
            .uri(uri)
            .header("x-forwarded-for", "10.0.0.20")
            .body(Body::empty())
            .unwrap()
    };

    assert_eq!(send(&app, request("/a/get")).await.status(), StatusCode::OK);
    assert_eq!(send(&app, request("/b/get")).await.status(), StatusCode::OK);
    assert_eq!(send(&app, request("/a/get")).await.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_after_commit_hooks_run_only_after_successful_commit() {
    let test = TestApp::new();
    let ran = counter();
    let mut bp = Blueprint::new("/api");
    let (db, calls) = (test.db.clone(), ran.clone());
    bp.add(
        Signature::new("write"),
        RouteOptions::api(),
        move |ctx, _args| {
            let (db, calls) = (db.clone(), calls.clone());
            async move {
                let uow = ctx.db()?;
                let mut library = uow.get_library(1).await?.ok_or_else(ServerError::not_found)?;
                library.sequence_i7 = Some("TTTTTTTT".to_string());
                uow.update_library(library).await?;
                ctx.after_commit(move || async move {
                    assert_eq!(db.library(1).unwrap().sequence_i7.as_deref(), Some("TTTTTTTT"));
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
                Ok::<_, ServerError>("written")
            }
        },
    )
    .unwrap();
    let calls = ran.clone();
    bp.add(
        Signature::new("fail"),
        RouteOptions::api(),
        move |ctx, _args| {
            let calls = calls.clone();
            async move {
                ctx.after_commit(move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
                Err::<&'static str, _>(ServerError::bad_request())
            }
        },
    )
    .unwrap();
    let app = test.router(bp);

    let response = send(&app, get("/api/fail", None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    let response = send(&app, get("/api/write", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}
