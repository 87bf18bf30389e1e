//! axum service for batch token checks.
//!
//! [`TokenService`] owns one [`TokenChecker`] keyed by client IP address and
//! exposes it over HTTP:
//!
//! - `POST /api/check-tokens` - verify a batch, one report per token in input
//!   order.
//! - `GET /health` - serving status, tracked clients, and free gate permits.
//!
//! Once [`begin_shutdown`](TokenService::begin_shutdown) is called, new checks
//! are refused with `503` while requests already running finish normally.

use crate::server::{
    authority::HttpAuthority,
    config::ServerConfig,
    service::{
        error::ApiError,
        wire::{CheckTokensRequest, HealthReport, ServingStatus, TokenReport},
    },
    telemetry::{
        increment_oversized_batches, increment_rate_limited, increment_requests,
        record_batch_duration, record_tokens_per_request, record_tokens_verified,
    },
};
use axum::{
    Json, Router,
    extract::{ConnectInfo, State},
    http::StatusCode,
    routing::{get, post},
};
use std::{
    net::{IpAddr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};
use tokengate::{AdmissionController, Authority, BatchValidator, TokenChecker};
use tokio_util::sync::CancellationToken;

/// Shared state behind every route. Cloning is cheap.
pub struct TokenService<A = HttpAuthority> {
    inner: Arc<Inner<A>>,
}

struct Inner<A> {
    checker: TokenChecker<IpAddr, A>,
    shutting_down: AtomicBool,
    reclaim_shutdown: CancellationToken,
}

impl<A> Clone for TokenService<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Authority> TokenService<A> {
    /// Builds the admission controller, validator, and checker described by
    /// `config` around `authority`.
    pub fn new(config: &ServerConfig, authority: A) -> anyhow::Result<Self> {
        let admission = Arc::new(AdmissionController::new(config.admission.clone())?);
        let validator = BatchValidator::new(authority, config.validator.clone())?;
        let checker = TokenChecker::new(admission, validator, config.max_tokens_per_request)?;

        Ok(Self::with_checker(checker))
    }

    /// Wraps an existing checker and starts its bucket reclaimer, if its
    /// reclaim policy uses one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_checker(checker: TokenChecker<IpAddr, A>) -> Self {
        let reclaim_shutdown = CancellationToken::new();
        // Detached; stopped through `reclaim_shutdown`.
        let _ = checker
            .admission()
            .spawn_reclaimer(reclaim_shutdown.clone());

        Self {
            inner: Arc::new(Inner {
                checker,
                shutting_down: AtomicBool::new(false),
                reclaim_shutdown,
            }),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/check-tokens", post(check_tokens::<A>))
            .route("/health", get(health::<A>))
            .with_state(self.clone())
    }

    /// Stops accepting checks and stops the bucket reclaimer. Idempotent.
    pub fn begin_shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.reclaim_shutdown.cancel();

        #[cfg(feature = "tracing")]
        tracing::info!("Service is shutting down, refusing new checks");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// Runs one batch check for `client`.
    ///
    /// If `metrics` is enabled, emits telemetry for:
    /// - request rate
    /// - rate-limited and oversized requests
    /// - tokens per request and their outcomes
    /// - batch duration
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(client = %client, tokens = tokens.len())))]
    pub async fn check(&self, client: IpAddr, tokens: &[String]) -> Result<Vec<TokenReport>, ApiError> {
        if self.is_shutting_down() {
            return Err(ApiError::unavailable());
        }

        increment_requests();
        let start = Instant::now();

        let outcome = match self.inner.checker.check(&client, tokens).await {
            Ok(outcome) => outcome,
            Err(err) => {
                match err {
                    tokengate::Error::RateLimited => increment_rate_limited(),
                    tokengate::Error::BatchTooLarge { .. } => increment_oversized_batches(),
                    tokengate::Error::InvalidConfig { .. } => {}
                }

                #[cfg(feature = "tracing")]
                tracing::debug!("Request refused: {err}");

                return Err(err.into());
            }
        };

        let valid = outcome.valid_count();
        record_tokens_per_request(outcome.len() as f64);
        record_tokens_verified(valid as u64, (outcome.len() - valid) as u64);
        record_batch_duration(start.elapsed().as_secs_f64() * 1000.0);

        #[cfg(feature = "tracing")]
        tracing::info!("Checked {} tokens, {valid} valid", outcome.len());

        Ok(outcome.into_iter().map(TokenReport::from).collect())
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: if self.is_shutting_down() {
                ServingStatus::ShuttingDown
            } else {
                ServingStatus::Serving
            },
            tracked_clients: self.inner.checker.admission().tracked_clients(),
            available_permits: self.inner.checker.validator().available_permits(),
        }
    }
}

async fn check_tokens<A: Authority>(
    State(service): State<TokenService<A>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<CheckTokensRequest>,
) -> Result<Json<Vec<TokenReport>>, ApiError> {
    let reports = service.check(addr.ip(), &request.tokens).await?;
    Ok(Json(reports))
}

async fn health<A: Authority>(State(service): State<TokenService<A>>) -> (StatusCode, Json<HealthReport>) {
    let report = service.health();
    let status = match report.status {
        ServingStatus::Serving => StatusCode::OK,
        ServingStatus::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}
