pub mod cache;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod flavor;
pub mod handlers;
pub mod identity;
pub mod log_buffer;
pub mod params;
pub mod rate_limit;
pub mod render;
pub mod request;
pub mod routes;
pub mod state;
pub mod workflow_handlers;

pub use cache::{CacheType, FlashCache, RouteCache};
pub use context::{CallArgs, FlashQueue, RequestContext};
pub use dispatch::{Blueprint, RouteOptions, Stage, PIPELINE};
pub use error::{CoercionError, ErrorKind, RouteError, ServerError};
pub use flavor::RouteFlavor;
pub use params::{ParamType, ParamValue, Signature};
pub use rate_limit::{LimitExempt, RateLimit};
pub use routes::create_router;
pub use state::{AppState, DispatchSettings, SharedState};
