#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{header, Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use storefront_api::{
    config::AppConfig,
    db,
    entities::product,
    errors::ServiceError,
    events::{self, EventSender},
    payments::{CreateGatewayOrder, GatewayOrder, PaymentGateway},
    session::cookie::SESSION_COOKIE,
    webhooks::{signature::sign_hex, SIGNATURE_HEADER},
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test_jwt_secret_for_integration_tests_0123456789";
pub const KEY_ID: &str = "rzp_test_key";
pub const KEY_SECRET: &str = "test_gateway_key_secret";
pub const WEBHOOK_SECRET: &str = "test_gateway_webhook_secret";

fn cookie_secret() -> String {
    "c".repeat(64)
}

/// In-process gateway double. Records every order request and can be told
/// to fail.
#[derive(Default)]
pub struct StubGateway {
    requests: Mutex<Vec<CreateGatewayOrder>>,
    counter: AtomicU64,
    fail: AtomicBool,
}

impl StubGateway {
    pub fn fail_next_calls(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<CreateGatewayOrder> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> CreateGatewayOrder {
        self.requests().pop().expect("no gateway order requested")
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    fn key_id(&self) -> &str {
        KEY_ID
    }

    async fn create_order(
        &self,
        request: CreateGatewayOrder,
    ) -> Result<GatewayOrder, ServiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::PaymentGatewayError(
                "gateway returned 500".into(),
            ));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request.clone());
        Ok(GatewayOrder {
            id: format!("order_test_{}", n),
            amount: request.amount,
            currency: request.currency,
            receipt: Some(request.receipt),
            status: Some("created".into()),
        })
    }
}

/// Who a test request is sent as.
#[derive(Clone, Debug, Default)]
pub struct Caller {
    pub bearer: Option<String>,
    /// `storefront_session=<signed value>` as captured from a response
    pub cookie: Option<String>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer: Some(token.into()),
            cookie: None,
        }
    }

    pub fn with_cookie(mut self, cookie: Option<String>) -> Self {
        self.cookie = cookie;
        self
    }
}

/// Application over an in-memory SQLite database with a stub gateway.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<StubGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            cookie_secret(),
            KEY_ID.to_string(),
            KEY_SECRET.to_string(),
            WEBHOOK_SECRET.to_string(),
            "development".to_string(),
        );
        // One connection keeps the in-memory database alive and shared.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(StubGateway::default());
        let state = AppState::new(Arc::new(pool), cfg, event_sender, gateway.clone())
            .expect("valid app state");

        Self {
            router: storefront_api::app_router(state.clone()),
            state,
            gateway,
            _event_task: event_task,
        }
    }

    pub fn user_token(&self, user_id: Uuid) -> String {
        self.state
            .session
            .issue_token(user_id, 3600)
            .expect("sign test token")
    }

    pub async fn seed_product(
        &self,
        name: &str,
        price: Decimal,
        discounted_price: Option<Decimal>,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            slug: Set(format!("{}-{}", name.to_lowercase().replace(' ', "-"), Uuid::new_v4())),
            price: Set(price),
            discounted_price: Set(discounted_price),
            image_url: Set(None),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        caller: &Caller,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = &caller.bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(cookie) = &caller.cookie {
            builder = builder.header(header::COOKIE, cookie.as_str());
        }

        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };

        self.send(builder.body(body).expect("build request")).await
    }

    /// Posts a webhook body, signed with the webhook secret unless a
    /// signature is given.
    pub async fn post_webhook(&self, body: &[u8], signature: Option<Option<&str>>) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header(header::CONTENT_TYPE, "application/json");

        let computed = sign_webhook(body);
        let signature = match signature {
            None => Some(computed.as_str()),
            Some(explicit) => explicit,
        };
        if let Some(sig) = signature {
            builder = builder.header(SIGNATURE_HEADER, sig);
        }

        self.send(builder.body(Body::from(body.to_vec())).expect("build request"))
            .await
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// `name=value` pair of the session cookie set by a response, if any.
pub fn session_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{}=", SESSION_COOKIE)))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

pub fn sign_webhook(body: &[u8]) -> String {
    sign_hex(body, WEBHOOK_SECRET).expect("hmac")
}

pub fn client_signature(order_id: &str, payment_id: &str) -> String {
    sign_hex(format!("{}|{}", order_id, payment_id).as_bytes(), KEY_SECRET).expect("hmac")
}

pub fn shipping_json() -> Value {
    serde_json::json!({
        "email": "asha@example.com",
        "first_name": "Asha",
        "last_name": "Rao",
        "address": "12 MG Road",
        "city": "Bengaluru",
        "state": "Karnataka",
        "pin_code": "560001",
        "phone": "9876543210"
    })
}

/// Gateway webhook body for a captured payment, carrying the notes the
/// payment order was created with.
pub fn captured_webhook(
    event: &str,
    order: &CreateGatewayOrder,
    gateway_order_id: &str,
    payment_id: &str,
    amount: i64,
) -> Vec<u8> {
    serde_json::json!({
        "entity": "event",
        "event": event,
        "contains": ["payment"],
        "payload": {
            "payment": {
                "entity": {
                    "id": payment_id,
                    "entity": "payment",
                    "amount": amount,
                    "currency": order.currency,
                    "status": "captured",
                    "order_id": gateway_order_id,
                    "method": "upi",
                    "notes": order.notes,
                }
            }
        },
        "created_at": Utc::now().timestamp()
    })
    .to_string()
    .into_bytes()
}
