//! Storefront API Library
//!
//! Carts for signed-in and anonymous shoppers, gateway checkout, and
//! reconciliation of payment confirmations into orders.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod payments;
pub mod services;
pub mod session;
pub mod tracing;
pub mod webhooks;

use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::Key;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::{
    config::AppConfig, errors::ServiceError, events::EventSender, payments::PaymentGateway,
    session::SessionResolver,
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub event_sender: EventSender,
    pub services: handlers::AppServices,
    pub session: Arc<SessionResolver>,
    pub cookie_key: Key,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: AppConfig,
        event_sender: EventSender,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Result<Self, ServiceError> {
        let cookie_key = SessionResolver::cookie_key(&config)?;
        let session = Arc::new(SessionResolver::from_config(&config));
        let services = handlers::AppServices::new(
            db.clone(),
            Arc::new(event_sender.clone()),
            gateway,
            &config,
        );

        Ok(Self {
            db,
            config: Arc::new(config),
            event_sender,
            services,
            session,
            cookie_key,
        })
    }
}

// Lets `SignedCookieJar` extract its key from the state
impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .nest("/cart", handlers::commerce::carts_routes())
        .nest("/checkout", handlers::commerce::checkout_routes())
        .route(
            "/payments/webhook",
            post(handlers::payment_webhooks::payment_webhook),
        )
        .nest("/orders", handlers::orders::orders_routes())
}

/// Full application router with request ids and HTTP tracing. CORS and
/// timeouts are layered on by the binary.
pub fn app_router(state: AppState) -> Router {
    Router::<AppState>::new()
        .route("/", get(|| async { "storefront-api up" }))
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}
