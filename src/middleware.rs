//! Admission-Control Middleware
//!
//! Sits in front of write endpoints and composes identity resolution, the
//! fixed-window rate limiter, and ban bookkeeping. Admitted responses carry
//! the remaining budget in `X-RateLimit-*` headers; rejections are 429 with
//! `Retry-After` and record one strike on a detached task.

use std::future::{ready, Future, Ready};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use actix_web::body::EitherBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::{Error, ResponseError};
use tracing::warn;

use crate::error::AppError;
use crate::services::{
    BanRecorder, IdentityResolver, RateLimitError, RateLimitStatus, RateLimiterService,
};

/// Admission-control middleware factory.
///
/// Wrap it around the scopes whose endpoints mutate state; read-only routes
/// stay outside it.
#[derive(Clone)]
pub struct AdmissionControl {
    limiter: RateLimiterService,
    bans: BanRecorder,
    identity: IdentityResolver,
}

impl AdmissionControl {
    pub fn new(
        limiter: RateLimiterService,
        bans: BanRecorder,
        identity: IdentityResolver,
    ) -> Self {
        Self {
            limiter,
            bans,
            identity,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AdmissionControl
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = AdmissionControlMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AdmissionControlMiddleware {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
            bans: self.bans.clone(),
            identity: self.identity.clone(),
        }))
    }
}

/// The middleware service produced by [`AdmissionControl`]
pub struct AdmissionControlMiddleware<S> {
    service: Rc<S>,
    limiter: RateLimiterService,
    bans: BanRecorder,
    identity: IdentityResolver,
}

impl<S, B> Service<ServiceRequest> for AdmissionControlMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let limiter = self.limiter.clone();
        let bans = self.bans.clone();
        let resolver = self.identity.clone();

        Box::pin(async move {
            // Budgets protect mutations; reads pass through uncounted.
            if req.method().is_safe() {
                let res = service.call(req).await?;
                return Ok(res.map_into_left_body());
            }

            // A request with a credential attached that fails to parse is
            // rejected outright; only the absence of a credential falls
            // back to the address-keyed bucket.
            let identity = match resolver.resolve(&req) {
                Ok(identity) => identity,
                Err(e) => {
                    let response = AppError::Unauthorized(e.to_string()).error_response();
                    return Ok(req.into_response(response).map_into_right_body());
                }
            };

            // Key on the matched route pattern so all ids of one endpoint
            // share a budget.
            let route = req
                .match_pattern()
                .unwrap_or_else(|| req.path().to_string());

            match limiter.check(&route, &identity).await {
                Ok(status) => {
                    let mut res = service.call(req).await?;
                    insert_budget_headers(res.headers_mut(), &status);
                    Ok(res.map_into_left_body())
                }
                Err(RateLimitError::LimitExceeded {
                    limit,
                    count,
                    retry_after,
                    ..
                }) => {
                    // Strike recording is fire-and-forget; its failure must
                    // never change the admission decision.
                    tokio::spawn(async move {
                        if let Err(e) = bans.record(&route, &identity, count).await {
                            warn!("Failed to record ban strike: {e}");
                        }
                    });

                    let response = AppError::RateLimited { limit, retry_after }.error_response();
                    Ok(req.into_response(response).map_into_right_body())
                }
                // Counter-store failure fails closed
                Err(RateLimitError::Store(e)) => {
                    warn!("Counter store unavailable, rejecting request: {e}");
                    let response =
                        AppError::Internal("admission control unavailable".into()).error_response();
                    Ok(req.into_response(response).map_into_right_body())
                }
            }
        })
    }
}

fn insert_budget_headers(
    headers: &mut actix_web::http::header::HeaderMap,
    status: &RateLimitStatus,
) {
    let pairs = [
        ("x-ratelimit-limit", status.limit),
        ("x-ratelimit-remaining", status.remaining),
        ("x-ratelimit-reset", status.reset_secs),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use actix_web::{test, web, App, HttpResponse};
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};

    use crate::services::counter_store::MemoryCounterStore;
    use crate::services::{Claims, RateLimitConfig};

    const SECRET: &str = "test-secret";

    fn middleware(
        store: Arc<MemoryCounterStore>,
        max_requests: u64,
    ) -> (AdmissionControl, BanRecorder) {
        let limiter = RateLimiterService::new(
            store.clone(),
            RateLimitConfig {
                max_requests,
                window: Duration::from_secs(60),
            },
        );
        let bans = BanRecorder::new(store);
        (
            AdmissionControl::new(limiter, bans.clone(), IdentityResolver::new(SECRET)),
            bans,
        )
    }

    fn token_for(sub: &str) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp: (Utc::now().timestamp() + 3600) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .expect("token encoding failed")
    }

    #[actix_web::test]
    async fn test_admitted_requests_carry_budget_headers() {
        let store = Arc::new(MemoryCounterStore::new());
        let (mw, _) = middleware(store, 2);
        let app = test::init_service(
            App::new()
                .wrap(mw)
                .route("/widgets", web::post().to(HttpResponse::Ok)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/widgets")
            .insert_header(("Authorization", format!("Bearer {}", token_for("alice"))))
            .to_request();
        let res = test::call_service(&app, req).await;

        assert!(res.status().is_success());
        let headers = res.headers();
        assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "2");
        assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "1");
        let reset: u64 = headers
            .get("x-ratelimit-reset")
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(reset > 0 && reset <= 60);
    }

    #[actix_web::test]
    async fn test_budget_exhaustion_returns_429_with_retry_after() {
        let store = Arc::new(MemoryCounterStore::new());
        let (mw, _) = middleware(store, 2);
        let app = test::init_service(
            App::new()
                .wrap(mw)
                .route("/widgets", web::post().to(HttpResponse::Ok)),
        )
        .await;

        let token = token_for("alice");
        for _ in 0..2 {
            let req = test::TestRequest::post()
                .uri("/widgets")
                .insert_header(("Authorization", format!("Bearer {token}")))
                .to_request();
            let res = test::call_service(&app, req).await;
            assert!(res.status().is_success());
        }

        let req = test::TestRequest::post()
            .uri("/widgets")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.status().as_u16(), 429);
        assert!(res.headers().get("retry-after").is_some());
        assert_eq!(res.headers().get("x-ratelimit-remaining").unwrap(), "0");
    }

    #[actix_web::test]
    async fn test_rejection_records_one_strike() {
        let store = Arc::new(MemoryCounterStore::new());
        let (mw, bans) = middleware(store, 1);
        let app = test::init_service(
            App::new()
                .wrap(mw)
                .route("/widgets", web::post().to(HttpResponse::Ok)),
        )
        .await;

        let token = token_for("alice");
        for _ in 0..2 {
            let req = test::TestRequest::post()
                .uri("/widgets")
                .insert_header(("Authorization", format!("Bearer {token}")))
                .to_request();
            let _ = test::call_service(&app, req).await;
        }

        // Strike recording is spawned; give the task a beat to land
        tokio::task::yield_now().await;

        let events = bans.drain_day(Utc::now().date_naive()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].identity, "user:alice");
        assert_eq!(events[0].route, "/widgets");
        assert_eq!(events[0].strikes, 2);
    }

    #[actix_web::test]
    async fn test_malformed_credential_is_401_not_ip_fallback() {
        let store = Arc::new(MemoryCounterStore::new());
        let (mw, _) = middleware(store, 10);
        let app = test::init_service(
            App::new()
                .wrap(mw)
                .route("/widgets", web::post().to(HttpResponse::Ok)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/widgets")
            .insert_header(("Authorization", "Bearer garbage"))
            .to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.status().as_u16(), 401);
    }

    #[actix_web::test]
    async fn test_reads_are_not_counted() {
        let store = Arc::new(MemoryCounterStore::new());
        let (mw, _) = middleware(store, 1);
        let app = test::init_service(
            App::new().wrap(mw).service(
                web::resource("/widgets")
                    .route(web::get().to(HttpResponse::Ok))
                    .route(web::post().to(HttpResponse::Ok)),
            ),
        )
        .await;

        let token = token_for("alice");
        for _ in 0..3 {
            let req = test::TestRequest::get()
                .uri("/widgets")
                .insert_header(("Authorization", format!("Bearer {token}")))
                .to_request();
            let res = test::call_service(&app, req).await;
            assert!(res.status().is_success());
            assert!(res.headers().get("x-ratelimit-limit").is_none());
        }

        // The write budget is still untouched
        let req = test::TestRequest::post()
            .uri("/widgets")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert!(res.status().is_success());
    }

    #[actix_web::test]
    async fn test_rotating_forwarded_header_cannot_mint_budgets() {
        let store = Arc::new(MemoryCounterStore::new());
        let (mw, _) = middleware(store, 1);
        let app = test::init_service(
            App::new()
                .wrap(mw)
                .route("/widgets", web::post().to(HttpResponse::Ok)),
        )
        .await;

        // All requests come from one peer; the forwarded header must not
        // give each of them a fresh budget.
        let mut statuses = Vec::new();
        for i in 0..3 {
            let req = test::TestRequest::post()
                .uri("/widgets")
                .peer_addr("10.0.0.9:51234".parse().unwrap())
                .insert_header(("X-Forwarded-For", format!("1.2.3.{i}")))
                .to_request();
            let res = test::call_service(&app, req).await;
            statuses.push(res.status().as_u16());
        }

        assert_eq!(statuses, vec![200, 429, 429]);
    }

    #[actix_web::test]
    async fn test_anonymous_requests_use_address_identity() {
        let store = Arc::new(MemoryCounterStore::new());
        let (mw, bans) = middleware(store, 1);
        let app = test::init_service(
            App::new()
                .wrap(mw)
                .route("/widgets", web::post().to(HttpResponse::Ok)),
        )
        .await;

        for _ in 0..2 {
            let req = test::TestRequest::post()
                .uri("/widgets")
                .peer_addr("10.0.0.9:51234".parse().unwrap())
                .to_request();
            let _ = test::call_service(&app, req).await;
        }
        tokio::task::yield_now().await;

        let events = bans.drain_day(Utc::now().date_naive()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].identity, "ip:10.0.0.9");
    }
}
