// src/monitoring.rs
use actix_web::{HttpResponse, web};
use serde::Serialize;
use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
use chrono::Utc;
use sqlx::SqlitePool;
use tokio::time::{interval, sleep, Duration};

#[derive(Debug, Clone)]
pub struct Metrics {
    pub request_count: Arc<AtomicU64>,
    pub error_count: Arc<AtomicU64>,
    pub response_times: Arc<std::sync::Mutex<Vec<u64>>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            request_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            response_times: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn increment_requests(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_errors(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response_time(&self, time_ms: u64) {
        if let Ok(mut times) = self.response_times.lock() {
            times.push(time_ms);
            if times.len() > 1000 {
                times.remove(0);
            }
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub requests_total: u64,
    pub errors_total: u64,
    pub avg_response_time_ms: f64,
}

pub async fn readiness_check(pool: web::Data<SqlitePool>) -> HttpResponse {
    match sqlx::query("SELECT 1").fetch_one(pool.get_ref()).await {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ready",
            "database": "connected"
        })),
        Err(_) => HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "status": "not ready",
            "database": "disconnected"
        })),
    }
}

pub async fn liveness_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "alive",
        "timestamp": Utc::now()
    }))
}

// Registered as web::Data::from(Arc<Metrics>), which yields Data<Metrics>
pub async fn metrics_endpoint(metrics: web::Data<Metrics>) -> HttpResponse {
    let request_count = metrics.request_count.load(Ordering::Relaxed);
    let error_count = metrics.error_count.load(Ordering::Relaxed);

    let avg_response_time = if let Ok(times) = metrics.response_times.lock() {
        if times.is_empty() { 0.0 } else { times.iter().sum::<u64>() as f64 / times.len() as f64 }
    } else { 0.0 };

    HttpResponse::Ok().json(MetricsResponse {
        requests_total: request_count,
        errors_total: error_count,
        avg_response_time_ms: avg_response_time,
    })
}

pub struct RequestLogger {
    metrics: Arc<Metrics>,
}

impl RequestLogger {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl<S, B> actix_web::dev::Transform<S, actix_web::dev::ServiceRequest> for RequestLogger
where
    S: actix_web::dev::Service<
        actix_web::dev::ServiceRequest,
        Response = actix_web::dev::ServiceResponse<B>,
        Error = actix_web::Error,
    >,
    S::Future: 'static,
    B: 'static,
{
    type Response = actix_web::dev::ServiceResponse<B>;
    type Error = actix_web::Error;
    type InitError = ();
    type Transform = RequestLoggerMiddleware<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(RequestLoggerMiddleware {
            service,
            metrics: self.metrics.clone(),
        }))
    }
}

pub struct RequestLoggerMiddleware<S> {
    service: S,
    metrics: Arc<Metrics>,
}

impl<S, B> actix_web::dev::Service<actix_web::dev::ServiceRequest> for RequestLoggerMiddleware<S>
where
    S: actix_web::dev::Service<
        actix_web::dev::ServiceRequest,
        Response = actix_web::dev::ServiceResponse<B>,
        Error = actix_web::Error,
    >,
    S::Future: 'static,
    B: 'static,
{
    type Response = actix_web::dev::ServiceResponse<B>;
    type Error = actix_web::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, ctx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: actix_web::dev::ServiceRequest) -> Self::Future {
        let start_time = std::time::Instant::now();
        let metrics = self.metrics.clone();
        let fut = self.service.call(req);

        Box::pin(async move {
            metrics.increment_requests();
            let res = fut.await;
            let elapsed = start_time.elapsed().as_millis() as u64;
            metrics.record_response_time(elapsed);

            if let Ok(ref response) = res {
                if response.status().is_client_error() || response.status().is_server_error() {
                    metrics.increment_errors();
                }
            }
            res
        })
    }
}

// ==================== MAINTENANCE TASKS ====================

pub async fn start_maintenance_tasks(pool: SqlitePool) {
    tokio::spawn(cleanup_old_activity_logs(pool.clone()));
    tokio::spawn(prune_read_notifications(pool));
}

/// Daily chunked cleanup of activity log entries older than 90 days.
async fn cleanup_old_activity_logs(pool: SqlitePool) {
    let mut interval = interval(Duration::from_secs(24 * 3600));

    loop {
        interval.tick().await;
        let mut total_deleted = 0;

        loop {
            let result = sqlx::query(
                "DELETE FROM activity_logs
                 WHERE id IN (
                     SELECT id FROM activity_logs
                     WHERE created_at < datetime('now', '-90 days')
                     LIMIT 1000
                 )"
            )
            .execute(&pool)
            .await;

            match result {
                Ok(res) => {
                    let count = res.rows_affected();
                    total_deleted += count;
                    if count < 1000 { break; }
                    sleep(Duration::from_millis(50)).await;
                },
                Err(e) => {
                    log::error!("Failed to cleanup activity logs chunk: {}", e);
                    break;
                }
            }
        }
        if total_deleted > 0 {
            log::info!("Cleaned up {} old activity log entries", total_deleted);
        }
    }
}

/// Daily cleanup of read notifications older than 30 days, so the bell
/// history does not grow without bound.
async fn prune_read_notifications(pool: SqlitePool) {
    let mut interval = interval(Duration::from_secs(24 * 3600));

    loop {
        interval.tick().await;
        match sqlx::query(
            "DELETE FROM notifications WHERE is_read = 1 AND created_at < datetime('now', '-30 days')"
        )
            .execute(&pool)
            .await
        {
            Ok(res) if res.rows_affected() > 0 => {
                log::info!("Pruned {} read notifications", res.rows_affected());
            }
            Ok(_) => {}
            Err(e) => log::error!("Failed to prune notifications: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_metrics_endpoint_serves_registered_counters() {
        let metrics_arc = Arc::new(Metrics::new());
        metrics_arc.increment_requests();
        metrics_arc.increment_requests();
        metrics_arc.increment_errors();
        metrics_arc.record_response_time(10);
        metrics_arc.record_response_time(30);

        // Same registration shape as the server bootstrap
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(metrics_arc.clone()))
                .route("/health/metrics", web::get().to(metrics_endpoint)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health/metrics").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["requests_total"], 2);
        assert_eq!(body["errors_total"], 1);
        assert_eq!(body["avg_response_time_ms"], 20.0);
    }

    #[::core::prelude::v1::test]
    fn test_metrics_response_time_window_is_bounded() {
        let metrics = Metrics::new();
        for i in 0..1100 {
            metrics.record_response_time(i);
        }
        let times = metrics.response_times.lock().unwrap();
        assert_eq!(times.len(), 1000);
        assert_eq!(times[0], 100);
    }
}
