// src/handlers.rs
use actix_web::{web, HttpResponse, HttpRequest};
use std::sync::Arc;
use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};
use crate::AppState;
use crate::error::ApiResult;
use crate::auth::get_current_user;

// ==================== COMMON STRUCTURES ====================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub category: Option<String>,
    pub owner_role: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl PaginationQuery {
    pub fn normalize(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self.per_page.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * per_page;
        (page, per_page, offset)
    }
}

// ==================== DASHBOARD STATISTICS ====================

pub async fn get_dashboard_stats(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    #[derive(Debug, Serialize)]
    struct DashboardStats {
        total_patients: i64,
        total_children: i64,
        total_inventory_items: i64,
        low_stock: i64,
        critical_stock: i64,
        expiring_soon: i64,
        upcoming_appointments: i64,
        unread_notifications: i64,
    }

    let claims = get_current_user(&http_request)?;

    let total_patients: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM patients")
        .fetch_one(&app_state.db_pool)
        .await?;

    let total_children: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM children")
        .fetch_one(&app_state.db_pool)
        .await?;

    let total_inventory_items: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM inventory_items WHERE deleted_at IS NULL"
    )
        .fetch_one(&app_state.db_pool)
        .await?;

    let low_stock: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM inventory_items WHERE status = 'low' AND deleted_at IS NULL"
    )
        .fetch_one(&app_state.db_pool)
        .await?;

    let critical_stock: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM inventory_items WHERE status = 'critical' AND deleted_at IS NULL"
    )
        .fetch_one(&app_state.db_pool)
        .await?;

    let expiring_soon: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM inventory_items WHERE expiry_date IS NOT NULL AND expiry_date <= date('now', '+30 days') AND deleted_at IS NULL"
    )
        .fetch_one(&app_state.db_pool)
        .await?;

    let upcoming_appointments: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM appointments WHERE status = 'scheduled' AND scheduled_at >= datetime('now') AND scheduled_at <= datetime('now', '+7 days')"
    )
        .fetch_one(&app_state.db_pool)
        .await?;

    let unread_notifications: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0"
    )
        .bind(&claims.sub)
        .fetch_one(&app_state.db_pool)
        .await?;

    let stats = DashboardStats {
        total_patients: total_patients.0,
        total_children: total_children.0,
        total_inventory_items: total_inventory_items.0,
        low_stock: low_stock.0,
        critical_stock: critical_stock.0,
        expiring_soon: expiring_soon.0,
        upcoming_appointments: upcoming_appointments.0,
        unread_notifications: unread_notifications.0,
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(stats)))
}

pub async fn get_recent_activity(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;

    // Admins see center-wide activity, everyone else sees their own
    let entries: Vec<crate::models::ActivityLogEntry> = if claims.role.can_view_activity_log() {
        sqlx::query_as("SELECT * FROM activity_logs ORDER BY created_at DESC LIMIT 10")
            .fetch_all(&app_state.db_pool)
            .await?
    } else {
        sqlx::query_as(
            "SELECT * FROM activity_logs WHERE user_id = ? ORDER BY created_at DESC LIMIT 10"
        )
            .bind(&claims.sub)
            .fetch_all(&app_state.db_pool)
            .await?
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(entries)))
}

// ==================== HEALTH CHECK ====================

pub async fn health_check(
    app_state: web::Data<Arc<AppState>>,
) -> ApiResult<HttpResponse> {
    #[derive(Serialize)]
    struct HealthStatus {
        status: &'static str,
        database: &'static str,
        version: &'static str,
    }

    let database = match sqlx::query("SELECT 1").execute(&app_state.db_pool).await {
        Ok(_) => "ok",
        Err(e) => {
            log::error!("Health check database probe failed: {}", e);
            "unavailable"
        }
    };

    let status = HealthStatus {
        status: if database == "ok" { "healthy" } else { "degraded" },
        database,
        version: env!("CARGO_PKG_VERSION"),
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(status)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_normalize_defaults() {
        let query = PaginationQuery {
            page: None,
            per_page: None,
            search: None,
            status: None,
            category: None,
            owner_role: None,
            sort_by: None,
            sort_order: None,
            date_from: None,
            date_to: None,
        };
        assert_eq!(query.normalize(), (1, 20, 0));
    }

    #[test]
    fn test_pagination_normalize_clamps() {
        let query = PaginationQuery {
            page: Some(-3),
            per_page: Some(500),
            search: None,
            status: None,
            category: None,
            owner_role: None,
            sort_by: None,
            sort_order: None,
            date_from: None,
            date_to: None,
        };
        let (page, per_page, offset) = query.normalize();
        assert_eq!(page, 1);
        assert_eq!(per_page, 100);
        assert_eq!(offset, 0);
    }
}
