use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};

use crate::api::cache::CacheType;
use crate::api::context::FlashQueue;
use crate::api::error::{ErrorKind, ServerError};
use crate::api::render;
use crate::api::request::RequestData;
use crate::model::Flash;

const BROWSER_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE"];
const API_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PROPFIND", "OPTIONS", "HEAD"];

/// Response shape of a dispatched route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteFlavor {
    /// Full HTML page
    Page,
    /// HTML fragment swapped in place by htmx
    Htmx,
    /// Plain text or JSON
    Api,
    /// Standalone HTML without navigation chrome
    Resource,
}

/// What an error renderer may look at
pub struct ErrorRendering<'a> {
    pub debug: bool,
    pub login_url: &'a str,
    pub request: &'a RequestData,
    pub flashes: &'a FlashQueue,
}

impl RouteFlavor {
    pub fn name(&self) -> &'static str {
        match self {
            RouteFlavor::Page => "page",
            RouteFlavor::Htmx => "htmx",
            RouteFlavor::Api => "api",
            RouteFlavor::Resource => "resource",
        }
    }

    pub fn allowed_methods(&self) -> &'static [&'static str] {
        match self {
            RouteFlavor::Api => API_METHODS,
            _ => BROWSER_METHODS,
        }
    }

    pub fn allows_method(&self, method: &Method) -> bool {
        self.allowed_methods().contains(&method.as_str())
    }

    pub fn default_login_required(&self) -> bool {
        !matches!(self, RouteFlavor::Api)
    }

    pub fn supports_cache_type(&self, cache_type: CacheType) -> bool {
        !(matches!(self, RouteFlavor::Page) && cache_type == CacheType::Insider)
    }

    /// Turn `err` into this flavor's error response
    pub fn render_error(&self, err: &ServerError, env: &ErrorRendering<'_>) -> Response {
        let message = err.user_message();
        let status = err.status();
        let detail = (env.debug && !err.is_recognised() && *self != RouteFlavor::Htmx)
            .then(|| format!("{:?}", err));

        match self {
            RouteFlavor::Page if err.kind() == ErrorKind::Unauthorized => {
                env.flashes.push(Flash::error(message));
                login_redirect(env.login_url, &env.request.full_path())
            }
            RouteFlavor::Page => {
                env.flashes.push(Flash::error(message.clone()));
                let flashes = env.flashes.drain();
                let body = render::error_page(status.as_u16(), &message, &flashes, detail.as_deref());
                (status, Html(body)).into_response()
            }
            RouteFlavor::Resource => {
                env.flashes.push(Flash::error(message.clone()));
                let flashes = env.flashes.drain();
                let body =
                    render::error_resource(status.as_u16(), &message, &flashes, detail.as_deref());
                (status, Html(body)).into_response()
            }
            RouteFlavor::Htmx => {
                env.flashes.push(Flash::error(message));
                let flashes = env.flashes.drain();
                (
                    StatusCode::OK,
                    [("HX-Retarget", "#alert-container")],
                    Html(render::alert_fragment(&flashes)),
                )
                    .into_response()
            }
            RouteFlavor::Api => (status, detail.unwrap_or(message)).into_response(),
        }
    }
}

/// 302 to the login page carrying the original target in `next`
pub fn login_redirect(login_url: &str, next: &str) -> Response {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("next", next)
        .finish();
    let location = format!("{}?{}", login_url, query);

    let mut response = StatusCode::FOUND.into_response();
    if let Ok(value) = HeaderValue::from_str(&location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(flavor: RouteFlavor, err: ServerError, debug: bool) -> (Response, FlashQueue) {
        let mut request = RequestData::new(Method::GET, "/experiments/7");
        request.query = RequestData::parse_pairs("tab=pools");
        let flashes = FlashQueue::default();
        let response = flavor.render_error(
            &err,
            &ErrorRendering {
                debug,
                login_url: "/auth/login",
                request: &request,
                flashes: &flashes,
            },
        );
        (response, flashes)
    }

    #[test]
    fn test_statuses_per_flavor() {
        for kind in ErrorKind::ALL {
            if kind == ErrorKind::Unauthorized {
                continue;
            }
            for flavor in [RouteFlavor::Page, RouteFlavor::Resource, RouteFlavor::Api] {
                let (response, _) = render(flavor, ServerError::new(kind), false);
                assert_eq!(response.status(), kind.status());
            }
            let (response, _) = render(RouteFlavor::Htmx, ServerError::new(kind), false);
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()["HX-Retarget"], "#alert-container");
        }
    }

    #[test]
    fn test_page_unauthorized_redirects_to_login() {
        let (response, flashes) = render(RouteFlavor::Page, ServerError::new(ErrorKind::Unauthorized), false);
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "/auth/login?next=%2Fexperiments%2F7%3Ftab%3Dpools"
        );
        // the flash survives the redirect through the flash cache
        assert_eq!(flashes.len(), 1);

        let (response, _) = render(RouteFlavor::Api, ServerError::new(ErrorKind::Unauthorized), false);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_method_sets() {
        let propfind = Method::from_bytes(b"PROPFIND").unwrap();
        assert!(RouteFlavor::Api.allows_method(&propfind));
        assert!(!RouteFlavor::Page.allows_method(&propfind));
        assert!(!RouteFlavor::Htmx.allows_method(&Method::HEAD));
        assert!(!RouteFlavor::Page.supports_cache_type(CacheType::Insider));
        assert!(RouteFlavor::Htmx.supports_cache_type(CacheType::Insider));
    }
}
