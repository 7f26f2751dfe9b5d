use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::api::cache::{CacheType, CachedResponse};
use crate::api::context::{CallArgs, RequestContext};
use crate::api::error::{ErrorKind, RouteError, ServerError};
use crate::api::flavor::{ErrorRendering, RouteFlavor};
use crate::api::identity::resolve_caller;
use crate::api::log_buffer::LogBuffer;
use crate::api::params::{
    bind_path_values, infer_route, CurrentUser, ParamValue, RouteInference, RouteSpec, Signature,
};
use crate::api::rate_limit::{LimitExempt, RateLimit};
use crate::api::request::RequestData;
use crate::api::state::SharedState;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response, ServerError>> + Send>>;
pub type Handler = Arc<dyn Fn(RequestContext, CallArgs) -> HandlerFuture + Send + Sync>;

/// Leftover field carrying the json-api token
pub const API_TOKEN_FIELD: &str = "api_token";

/// Registration options of one dispatched route
#[derive(Debug, Clone)]
pub struct RouteOptions {
    pub flavor: RouteFlavor,
    /// Base path; defaults to the handler name
    pub route: Option<String>,
    pub methods: Vec<Method>,
    pub login_required: bool,
    /// Open a unit-of-work for every request
    pub uses_db: bool,
    pub arg_params: Vec<String>,
    pub form_params: Vec<String>,
    pub json_params: Vec<String>,
    pub cache_timeout: Option<Duration>,
    pub cache_query_string: bool,
    pub cache_type: CacheType,
    pub strict_slashes: bool,
    pub limit: Option<String>,
    pub limit_exempt: LimitExempt,
    /// Route limits replace the configured defaults instead of adding to them
    pub limit_override: bool,
    pub api_token_required: bool,
}

impl RouteOptions {
    pub fn new(flavor: RouteFlavor) -> Self {
        Self {
            flavor,
            route: None,
            methods: vec![Method::GET],
            login_required: flavor.default_login_required(),
            uses_db: true,
            arg_params: Vec::new(),
            form_params: Vec::new(),
            json_params: Vec::new(),
            cache_timeout: None,
            cache_query_string: true,
            cache_type: CacheType::User,
            strict_slashes: true,
            limit: None,
            limit_exempt: LimitExempt::Insider,
            limit_override: false,
            api_token_required: false,
        }
    }

    pub fn page() -> Self {
        Self::new(RouteFlavor::Page)
    }

    pub fn htmx() -> Self {
        Self::new(RouteFlavor::Htmx)
    }

    pub fn api() -> Self {
        Self::new(RouteFlavor::Api)
    }

    pub fn resource() -> Self {
        Self::new(RouteFlavor::Resource)
    }

    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn login_required(mut self, login_required: bool) -> Self {
        self.login_required = login_required;
        self
    }

    pub fn without_db(mut self) -> Self {
        self.uses_db = false;
        self
    }

    pub fn args<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arg_params = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn form<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.form_params = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn json<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.json_params = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn cache(mut self, timeout: Duration, cache_type: CacheType) -> Self {
        self.cache_timeout = Some(timeout);
        self.cache_type = cache_type;
        self
    }

    pub fn cache_query_string(mut self, include: bool) -> Self {
        self.cache_query_string = include;
        self
    }

    pub fn strict_slashes(mut self, strict: bool) -> Self {
        self.strict_slashes = strict;
        self
    }

    pub fn limit(mut self, expr: impl Into<String>, exempt: LimitExempt) -> Self {
        self.limit = Some(expr.into());
        self.limit_exempt = exempt;
        self
    }

    pub fn limit_exempt(mut self, exempt: LimitExempt) -> Self {
        self.limit_exempt = exempt;
        self
    }

    pub fn limit_override(mut self, limit_override: bool) -> Self {
        self.limit_override = limit_override;
        self
    }

    pub fn api_token_required(mut self) -> Self {
        self.api_token_required = true;
        self
    }

    /// Reject option combinations that can never serve a request correctly
    fn check(&self, name: &str, inference: &RouteInference) -> Result<Vec<RateLimit>, RouteError> {
        match inference.current_user {
            CurrentUser::Required if !self.login_required => {
                return Err(RouteError::CurrentUserWithoutLogin(name.to_string()));
            }
            CurrentUser::Optional if self.login_required => {
                log::error!(
                    "Route {} current_user is optional but login_required is True.",
                    name
                );
            }
            _ => {}
        }

        if self.login_required && !self.uses_db {
            return Err(RouteError::LoginWithoutDatabase(name.to_string()));
        }

        if self.api_token_required && (self.flavor != RouteFlavor::Api || !self.uses_db) {
            return Err(RouteError::TokenOutsideApi(name.to_string()));
        }

        if let Some(method) = self.methods.iter().find(|m| !self.flavor.allows_method(m)) {
            return Err(RouteError::UnsupportedMethod {
                route: name.to_string(),
                method: method.to_string(),
                flavor: self.flavor.name(),
            });
        }

        if self.cache_timeout.is_some() && !self.flavor.supports_cache_type(self.cache_type) {
            return Err(RouteError::UnsupportedCacheType {
                route: name.to_string(),
                cache_type: self.cache_type.as_str(),
                flavor: self.flavor.name(),
            });
        }

        match &self.limit {
            Some(expr) => RateLimit::parse_many(expr).map_err(|_| RouteError::InvalidLimit {
                route: name.to_string(),
                expr: expr.clone(),
            }),
            None => Ok(Vec::new()),
        }
    }

    fn allows(&self, method: &Method) -> bool {
        self.methods.contains(method) || (method == Method::HEAD && self.methods.contains(&Method::GET))
    }
}

/// Ordered request pipeline; every request walks these stages in turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CheckMethod,
    Authenticate,
    ValidateParameters,
    CheckApiToken,
    RateLimit,
    CacheLookup,
    Invoke,
}

pub const PIPELINE: [Stage; 7] = [
    Stage::CheckMethod,
    Stage::Authenticate,
    Stage::ValidateParameters,
    Stage::CheckApiToken,
    Stage::RateLimit,
    Stage::CacheLookup,
    Stage::Invoke,
];

enum Flow {
    Continue,
    Respond(Response),
}

/// Per-request state threaded through the pipeline
struct Exchange {
    ctx: RequestContext,
    path_values: Option<BTreeMap<String, ParamValue>>,
    args: CallArgs,
    cache_key: Option<String>,
}

/// A registered handler with everything needed to serve it
pub struct Endpoint {
    name: Arc<str>,
    /// Blueprint prefix plus route name; unique across blueprints
    scope: String,
    options: RouteOptions,
    inference: RouteInference,
    patterns: Vec<String>,
    limits: Vec<RateLimit>,
    handler: Handler,
}

impl Endpoint {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &RouteOptions {
        &self.options
    }

    /// Typed patterns of every shape, including the blueprint prefix
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    async fn handle(
        &self,
        state: SharedState,
        request: RequestData,
        path_values: Option<BTreeMap<String, ParamValue>>,
    ) -> Response {
        let log = if state.settings.debug {
            LogBuffer::with_prefix(self.name.to_string())
        } else {
            LogBuffer::new()
        };
        let ctx = RequestContext::new(state.clone(), self.name.clone(), Arc::new(request), Arc::new(log));
        let mut exchange = Exchange {
            ctx,
            path_values,
            args: CallArgs::default(),
            cache_key: None,
        };

        let outcome = match self.open_session(&mut exchange).await {
            Ok(()) => match self.run_pipeline(&mut exchange).await {
                Ok(response) => self.store_in_cache(&exchange, response).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        let mut rollback = false;
        let succeeded = outcome.is_ok();
        let mut response = match outcome {
            Ok(response) => response,
            Err(err) => {
                rollback = exchange
                    .ctx
                    .uow
                    .as_ref()
                    .map(|uow| uow.needs_commit())
                    .unwrap_or(false);
                self.log_error(&exchange, &err);
                self.render_error(&exchange, &err)
            }
        };

        if let Err(err) = self.close_session(&exchange, rollback, succeeded).await {
            self.log_error(&exchange, &err);
            response = self.render_error(&exchange, &err);
        }
        self.finish(&exchange);
        response
    }

    async fn open_session(&self, exchange: &mut Exchange) -> Result<(), ServerError> {
        if self.options.uses_db {
            let uow = exchange.ctx.state.db.open_session().await?;
            exchange.ctx.uow = Some(uow);
        }
        Ok(())
    }

    async fn run_pipeline(&self, exchange: &mut Exchange) -> Result<Response, ServerError> {
        for stage in PIPELINE {
            if let Flow::Respond(response) = self.run_stage(stage, exchange).await? {
                return Ok(response);
            }
        }
        Err(ServerError::InternalServerError(format!(
            "route '{}' produced no response",
            self.name
        )))
    }

    async fn run_stage(&self, stage: Stage, exchange: &mut Exchange) -> Result<Flow, ServerError> {
        match stage {
            Stage::CheckMethod => self.check_method(exchange),
            Stage::Authenticate => self.authenticate(exchange).await,
            Stage::ValidateParameters => self.validate(exchange),
            Stage::CheckApiToken => self.check_api_token(exchange).await,
            Stage::RateLimit => self.rate_limit(exchange),
            Stage::CacheLookup => self.cache_lookup(exchange),
            Stage::Invoke => {
                let args = std::mem::take(&mut exchange.args);
                let response = (self.handler)(exchange.ctx.clone(), args).await?;
                Ok(Flow::Respond(response))
            }
        }
    }

    fn check_method(&self, exchange: &mut Exchange) -> Result<Flow, ServerError> {
        if exchange.path_values.is_none() {
            return Err(ServerError::not_found());
        }
        if !self.options.allows(&exchange.ctx.request.method) {
            return Err(ServerError::new(ErrorKind::MethodNotAllowed));
        }
        Ok(Flow::Continue)
    }

    async fn authenticate(&self, exchange: &mut Exchange) -> Result<Flow, ServerError> {
        if let Some(uow) = &exchange.ctx.uow {
            exchange.ctx.user = resolve_caller(&exchange.ctx.request.headers, uow.as_ref()).await?;
        }
        if self.options.login_required && exchange.ctx.user.is_none() {
            return Err(ServerError::new(ErrorKind::Unauthorized));
        }
        if self.inference.current_user == CurrentUser::Absent {
            exchange.ctx.log.debug(format!("route {} ignores current_user", self.name));
        }
        Ok(Flow::Continue)
    }

    fn validate(&self, exchange: &mut Exchange) -> Result<Flow, ServerError> {
        let resolved = exchange.path_values.take().unwrap_or_default();
        match crate::api::params::validate_parameters(
            &self.inference.params,
            &exchange.ctx.request,
            resolved,
        ) {
            Ok(validated) => {
                exchange.args = CallArgs::new(validated.values);
                exchange.ctx.leftovers = Arc::new(validated.leftovers);
                Ok(Flow::Continue)
            }
            Err(e) => {
                exchange.ctx.log.warn(format!("route {}: {}", self.name, e));
                Err(e.into())
            }
        }
    }

    async fn check_api_token(&self, exchange: &mut Exchange) -> Result<Flow, ServerError> {
        if !self.options.api_token_required {
            return Ok(Flow::Continue);
        }

        let token = match exchange.ctx.leftover(API_TOKEN_FIELD) {
            Some(serde_json::Value::String(token)) if !token.is_empty() => token.clone(),
            _ => {
                return Err(ServerError::Unauthorized(
                    "API token is required but not provided.".to_string(),
                ))
            }
        };

        let uow = exchange.ctx.db()?.clone();
        let Some(api_token) = uow.get_api_token(&token).await? else {
            return Err(ServerError::NoPermissions("Invalid API token.".to_string()));
        };
        if api_token.is_expired() {
            return Err(ServerError::NoPermissions("API token has expired.".to_string()));
        }

        exchange
            .ctx
            .state
            .limiter
            .reset(&self.limit_key(&exchange.ctx.request));
        exchange.ctx.api_token = Some(api_token);
        Ok(Flow::Continue)
    }

    fn limit_key(&self, request: &RequestData) -> String {
        format!("{}:{}", self.scope, request.client)
    }

    fn rate_limit(&self, exchange: &mut Exchange) -> Result<Flow, ServerError> {
        let settings = &exchange.ctx.state.settings;
        if settings.debug || self.options.limit_exempt == LimitExempt::All {
            return Ok(Flow::Continue);
        }
        if self.options.limit_exempt.is_exempt(exchange.ctx.user.as_ref()) {
            return Ok(Flow::Continue);
        }

        let mut limits = self.limits.clone();
        if !self.options.limit_override || limits.is_empty() {
            limits.extend(settings.default_limits.iter().copied());
        }
        if limits.is_empty() {
            return Ok(Flow::Continue);
        }

        let key = self.limit_key(&exchange.ctx.request);
        if !exchange.ctx.state.limiter.hit(&key, &limits) {
            return Err(ServerError::new(ErrorKind::TooManyRequests));
        }
        Ok(Flow::Continue)
    }

    fn cache_lookup(&self, exchange: &mut Exchange) -> Result<Flow, ServerError> {
        if self.options.cache_timeout.is_none() {
            return Ok(Flow::Continue);
        }
        let request = &exchange.ctx.request;
        if exchange.ctx.state.settings.debug
            || !(request.method == Method::GET || request.method == Method::HEAD)
        {
            return Ok(Flow::Continue);
        }

        let key = self.options.cache_type.key(
            request,
            exchange.ctx.user.as_ref(),
            self.options.cache_query_string,
        );
        if let Some(cached) = exchange.ctx.state.route_cache.get(&key) {
            exchange.ctx.log.debug(format!("cache hit: {}", key));
            return Ok(Flow::Respond(cached.to_response()));
        }
        exchange.cache_key = Some(key);
        Ok(Flow::Continue)
    }

    async fn store_in_cache(&self, exchange: &Exchange, response: Response) -> Result<Response, ServerError> {
        let (Some(key), Some(timeout)) = (&exchange.cache_key, self.options.cache_timeout) else {
            return Ok(response);
        };
        if !response.status().is_success() {
            return Ok(response);
        }
        let captured = CachedResponse::capture(response)
            .await
            .map_err(|e| ServerError::Unexpected(anyhow::anyhow!("failed to buffer response: {}", e)))?;
        let cached = exchange
            .ctx
            .state
            .route_cache
            .insert(key.clone(), captured, timeout);
        Ok(cached.to_response())
    }

    /// Commit unless an erroring request left writes pending, then run
    /// the after-commit hooks of a successful request
    async fn close_session(
        &self,
        exchange: &Exchange,
        rollback: bool,
        succeeded: bool,
    ) -> Result<(), ServerError> {
        let hooks = exchange.ctx.after_commit.drain();
        if let Some(uow) = &exchange.ctx.uow {
            if uow.close(true, rollback).await? {
                exchange.ctx.state.route_cache.clear();
            }
        }
        if !succeeded {
            if !hooks.is_empty() {
                exchange.ctx.log.debug(format!("dropping {} after-commit hook(s)", hooks.len()));
            }
            return Ok(());
        }
        for hook in hooks {
            hook().await?;
        }
        Ok(())
    }

    fn finish(&self, exchange: &Exchange) {
        let pending = exchange.ctx.flashes.drain();
        if !pending.is_empty() {
            match exchange.ctx.request.session_id() {
                Some(sid) => exchange.ctx.state.flash_cache.add(&sid, pending),
                None => exchange
                    .ctx
                    .log
                    .debug(format!("dropping {} flash message(s) without a session", pending.len())),
            }
        }
        exchange.ctx.log.flush();
    }

    fn render_error(&self, exchange: &Exchange, err: &ServerError) -> Response {
        let settings = &exchange.ctx.state.settings;
        self.options.flavor.render_error(
            err,
            &ErrorRendering {
                debug: settings.debug,
                login_url: &settings.login_url,
                request: &exchange.ctx.request,
                flashes: &exchange.ctx.flashes,
            },
        )
    }

    fn log_error(&self, exchange: &Exchange, err: &ServerError) {
        let log = &exchange.ctx.log;
        if err.kind() == ErrorKind::TooManyRequests {
            log.warn(format!(
                "Rate limit exceeded on route {:?} for IP {}",
                self.patterns, exchange.ctx.request.client
            ));
            return;
        }
        log.error(format!(
            "\n-------- {} --------\n\tRoute: {} {:?}\n\tMethod: {}\n\tPath: {}\n\targs: {}\n\tError: {:?}\n\tMessage: {}\n-------- END ERROR --------",
            err.log_label(),
            self.name,
            self.patterns,
            exchange.ctx.request.method,
            exchange.ctx.request.path,
            exchange.args,
            err,
            err,
        ));
    }
}

/// Handlers sharing one router path; the first that matches serves the request
#[derive(Clone)]
struct Mount {
    path: String,
    candidates: Vec<(Arc<Endpoint>, RouteSpec)>,
}

/// Groups dispatched routes under a common URL prefix
pub struct Blueprint {
    prefix: String,
    endpoints: Vec<Arc<Endpoint>>,
    mounts: Vec<Mount>,
}

impl Blueprint {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let prefix = prefix.trim_matches('/');
        Self {
            prefix: if prefix.is_empty() {
                String::new()
            } else {
                format!("/{}", prefix)
            },
            endpoints: Vec::new(),
            mounts: Vec::new(),
        }
    }

    /// Register `handler` under every URL shape its signature produces
    pub fn add<F, Fut, R>(
        &mut self,
        signature: Signature,
        options: RouteOptions,
        handler: F,
    ) -> Result<(), RouteError>
    where
        F: Fn(RequestContext, CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ServerError>> + Send + 'static,
        R: IntoResponse,
    {
        let inference = infer_route(
            &signature,
            options.route.as_deref(),
            &options.arg_params,
            &options.form_params,
            &options.json_params,
        )?;
        let limits = options.check(&signature.name, &inference)?;

        let base = options
            .route
            .as_deref()
            .unwrap_or(&signature.name)
            .trim_matches('/')
            .to_string();

        let handler: Handler = Arc::new(move |ctx, args| {
            let fut = handler(ctx, args);
            Box::pin(async move { fut.await.map(IntoResponse::into_response) })
        });

        let endpoint = Arc::new(Endpoint {
            name: Arc::from(signature.name.as_str()),
            scope: format!("{}/{}", self.prefix, signature.name),
            patterns: inference
                .routes
                .iter()
                .map(|spec| self.prefixed(&spec.pattern))
                .collect(),
            options,
            limits,
            handler,
            inference,
        });

        log::debug!("{} -> {:?}", endpoint.name, endpoint.patterns);

        let mut mounted: Vec<String> = Vec::new();
        for spec in &endpoint.inference.routes {
            let path = self.prefixed(&spec.router_path(&base));
            if mounted.contains(&path) {
                // same shape as an earlier spec of this handler
                continue;
            }
            mounted.push(path.clone());
            self.mount(path.clone(), endpoint.clone(), spec.clone());

            if !endpoint.options.strict_slashes && !path.ends_with('/') && !path.contains('*') {
                self.mount(format!("{}/", path), endpoint.clone(), spec.clone());
            }
        }

        self.endpoints.push(endpoint);
        Ok(())
    }

    fn prefixed(&self, path: &str) -> String {
        match (self.prefix.is_empty(), path) {
            (true, _) => path.to_string(),
            (false, "/") => self.prefix.clone(),
            (false, _) => format!("{}{}", self.prefix, path),
        }
    }

    fn mount(&mut self, path: String, endpoint: Arc<Endpoint>, spec: RouteSpec) {
        match self.mounts.iter_mut().find(|m| m.path == path) {
            Some(mount) => mount.candidates.push((endpoint, spec)),
            None => self.mounts.push(Mount {
                path,
                candidates: vec![(endpoint, spec)],
            }),
        }
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    /// Router paths in mount order
    pub fn mounted_paths(&self) -> Vec<&str> {
        self.mounts.iter().map(|m| m.path.as_str()).collect()
    }

    pub fn into_router(self) -> Router<SharedState> {
        let mut router = Router::new();
        for mount in self.mounts {
            let path = mount.path.clone();
            let candidates = Arc::new(mount.candidates);
            router = router.route(
                &path,
                any(
                    move |State(state): State<SharedState>,
                          connect: Option<ConnectInfo<SocketAddr>>,
                          captures: Option<Path<HashMap<String, String>>>,
                          request: Request| {
                        let candidates = candidates.clone();
                        async move {
                            let captures = captures.map(|Path(c)| c).unwrap_or_default();
                            let remote = connect.map(|ConnectInfo(addr)| addr);
                            dispatch(state, &candidates, captures, remote, request).await
                        }
                    },
                ),
            );
        }
        router
    }
}

async fn dispatch(
    state: SharedState,
    candidates: &[(Arc<Endpoint>, RouteSpec)],
    captures: HashMap<String, String>,
    remote: Option<SocketAddr>,
    request: Request,
) -> Response {
    let method = request.method().clone();
    let fallback = RequestData::new(method.clone(), request.uri().path());

    let bound: Vec<_> = candidates
        .iter()
        .filter_map(|(endpoint, spec)| {
            bind_path_values(spec, &endpoint.inference.params, &captures)
                .map(|values| (endpoint, values))
        })
        .collect();

    let (endpoint, path_values) = match bound
        .iter()
        .position(|(endpoint, _)| endpoint.options.allows(&method))
        .or(if bound.is_empty() { None } else { Some(0) })
    {
        Some(i) => {
            let (endpoint, values) = &bound[i];
            (*endpoint, Some(values.clone()))
        }
        None => match candidates.first() {
            Some((endpoint, _)) => (endpoint, None),
            None => return ServerError::not_found().status().into_response(),
        },
    };

    match RequestData::from_request(request, remote).await {
        Ok(data) => endpoint.handle(state, data, path_values).await,
        Err(err) => endpoint.handle_unreadable(state, fallback, err),
    }
}

impl Endpoint {
    fn handle_unreadable(&self, state: SharedState, request: RequestData, err: ServerError) -> Response {
        let ctx = RequestContext::new(state, self.name.clone(), Arc::new(request), Arc::new(LogBuffer::new()));
        let exchange = Exchange {
            ctx,
            path_values: None,
            args: CallArgs::default(),
            cache_key: None,
        };
        self.log_error(&exchange, &err);
        let response = self.render_error(&exchange, &err);
        self.finish(&exchange);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::params::ParamType;

    async fn ok(_ctx: RequestContext, _args: CallArgs) -> Result<&'static str, ServerError> {
        Ok("ok")
    }

    #[test]
    fn test_scenario_a_registers_both_shapes() {
        let mut bp = Blueprint::new("/experiments/");
        bp.add(
            Signature::new("get_experiment")
                .current_user()
                .param("experiment_id", ParamType::Int)
                .param_default("page", ParamType::Int, 0),
            RouteOptions::htmx(),
            ok,
        )
        .unwrap();

        let endpoint = &bp.endpoints()[0];
        assert_eq!(
            endpoint.patterns(),
            &[
                "/experiments/get_experiment/{experiment_id:int}/{page:int}".to_string(),
                "/experiments/get_experiment/{experiment_id:int}".to_string(),
            ]
        );
        assert_eq!(
            bp.mounted_paths(),
            vec![
                "/experiments/get_experiment/:p0/:p1",
                "/experiments/get_experiment/:p0"
            ]
        );
    }

    #[test]
    fn test_duplicate_shapes_mount_once() {
        let mut bp = Blueprint::new("");
        bp.add(
            Signature::new("pick")
                .param_default("a", ParamType::Int, 1)
                .param_default("b", ParamType::Int, 2),
            RouteOptions::api(),
            ok,
        )
        .unwrap();

        assert_eq!(bp.endpoints()[0].patterns().len(), 4);
        assert_eq!(bp.mounted_paths(), vec!["/pick/:p0/:p1", "/pick/:p0", "/pick"]);
    }

    #[test]
    fn test_non_strict_slashes_mount_trailing_variant() {
        let mut bp = Blueprint::new("/lims");
        bp.add(
            Signature::new("index"),
            RouteOptions::api().strict_slashes(false),
            ok,
        )
        .unwrap();
        assert_eq!(bp.mounted_paths(), vec!["/lims/index", "/lims/index/"]);
    }

    #[test]
    fn test_registration_rules() {
        let mut bp = Blueprint::new("/x");

        let err = bp
            .add(
                Signature::new("needs_user").current_user(),
                RouteOptions::htmx().login_required(false),
                ok,
            )
            .unwrap_err();
        assert_eq!(err, RouteError::CurrentUserWithoutLogin("needs_user".into()));

        let err = bp
            .add(Signature::new("no_db"), RouteOptions::page().without_db(), ok)
            .unwrap_err();
        assert_eq!(err, RouteError::LoginWithoutDatabase("no_db".into()));

        let propfind = Method::from_bytes(b"PROPFIND").unwrap();
        assert!(matches!(
            bp.add(Signature::new("dav"), RouteOptions::htmx().methods([propfind.clone()]), ok),
            Err(RouteError::UnsupportedMethod { .. })
        ));
        assert!(bp
            .add(Signature::new("dav"), RouteOptions::api().methods([propfind]), ok)
            .is_ok());

        assert!(matches!(
            bp.add(
                Signature::new("cached"),
                RouteOptions::page().cache(Duration::from_secs(5), CacheType::Insider),
                ok
            ),
            Err(RouteError::UnsupportedCacheType { .. })
        ));

        assert!(matches!(
            bp.add(
                Signature::new("limited"),
                RouteOptions::api().limit("lots/second", LimitExempt::Never),
                ok
            ),
            Err(RouteError::InvalidLimit { .. })
        ));

        assert!(matches!(
            bp.add(Signature::new("tok"), RouteOptions::htmx().api_token_required(), ok),
            Err(RouteError::TokenOutsideApi(_))
        ));

        // optional identity with login only logs
        assert!(bp
            .add(Signature::new("maybe").optional_current_user(), RouteOptions::htmx(), ok)
            .is_ok());
    }

    #[test]
    fn test_pipeline_order() {
        let position = |stage| PIPELINE.iter().position(|s| *s == stage).unwrap();
        assert!(position(Stage::Authenticate) < position(Stage::ValidateParameters));
        assert!(position(Stage::CheckApiToken) < position(Stage::CacheLookup));
        assert!(position(Stage::RateLimit) < position(Stage::Invoke));
        assert_eq!(PIPELINE.last(), Some(&Stage::Invoke));
    }
}
