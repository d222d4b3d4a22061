use std::future::Future;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;
use drop_store::DropService;
use tokio::net::{TcpListener, ToSocketAddrs};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::routes;
use crate::DropAxumState;

/// Room for multipart framing around a full-size file part
const FORM_OVERHEAD: usize = 1024 * 1024;

pub struct DropApp {
    pub state: DropAxumState,
    pub router: Router<()>,
}

impl DropApp {
    pub fn new(service: DropService, public_url: &str) -> Self {
        let state = DropAxumState::new(service, public_url);
        Self {
            router: router(state.clone()),
            state,
        }
    }

    pub async fn listen<A, S>(self, addr: A, shutdown: S) -> anyhow::Result<()>
    where
        A: ToSocketAddrs,
        S: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "listening");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

/// Every drop route, with tracing and request ids
pub fn router(state: DropAxumState) -> Router<()> {
    let body_limit = usize::try_from(state.service.config().max_bytes_per_file)
        .unwrap_or(usize::MAX)
        .saturating_add(FORM_OVERHEAD);

    Router::new()
        .route("/", post(routes::upload))
        .route("/health", get(routes::health))
        .route("/info/{id}", get(routes::info))
        .route("/delete/{id}", get(routes::delete_object))
        .route("/exists/{id}/{name}", get(routes::exists))
        .route("/1/{id}/{name}", get(routes::download_raw))
        .route(
            "/{id}",
            get(routes::redirect_to_object)
                .put(routes::put_file)
                .delete(routes::delete_object),
        )
        .route("/{id}/{name}", get(routes::download).put(routes::put_file))
        .route("/{id}/{name}/{*rest}", put(routes::put_file))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}
