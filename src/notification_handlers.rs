// src/notification_handlers.rs - Bell-icon notifications and transient toasts

use actix_web::{web, HttpResponse, HttpRequest};
use std::sync::Arc;
use serde::Serialize;

use crate::AppState;
use crate::auth::get_current_user;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{ApiResponse, PaginatedResponse, PaginationQuery};
use crate::models::Notification;

// ==================== NOTIFICATIONS ====================

pub async fn list_notifications(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let (page, per_page, offset) = query.normalize();

    let unread_only = matches!(query.status.as_deref(), Some("unread"));

    let (count_sql, list_sql) = if unread_only {
        (
            "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0",
            "SELECT * FROM notifications WHERE user_id = ? AND is_read = 0 ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
    } else {
        (
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?",
            "SELECT * FROM notifications WHERE user_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
    };

    let total: (i64,) = sqlx::query_as(count_sql)
        .bind(&claims.sub)
        .fetch_one(&app_state.db_pool)
        .await?;

    let notifications: Vec<Notification> = sqlx::query_as(list_sql)
        .bind(&claims.sub)
        .bind(per_page)
        .bind(offset)
        .fetch_all(&app_state.db_pool)
        .await?;

    let total_pages = (total.0 + per_page - 1) / per_page;
    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse {
        data: notifications,
        total: total.0,
        page,
        per_page,
        total_pages,
    })))
}

pub async fn get_unread_count(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    #[derive(Serialize)]
    struct UnreadCount {
        unread: i64,
    }

    let claims = get_current_user(&http_request)?;
    let count: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0"
    )
        .bind(&claims.sub)
        .fetch_one(&app_state.db_pool)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(UnreadCount { unread: count.0 })))
}

pub async fn mark_notification_read(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let notification_id = path.into_inner();

    let result = sqlx::query(
        "UPDATE notifications SET is_read = 1 WHERE id = ? AND user_id = ?"
    )
        .bind(&notification_id)
        .bind(&claims.sub)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::notification_not_found(&notification_id));
    }

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        notification_id,
        "Notification marked as read".to_string(),
    )))
}

pub async fn mark_all_read(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    #[derive(Serialize)]
    struct MarkAllResult {
        marked: u64,
    }

    let claims = get_current_user(&http_request)?;
    let result = sqlx::query(
        "UPDATE notifications SET is_read = 1 WHERE user_id = ? AND is_read = 0"
    )
        .bind(&claims.sub)
        .execute(&app_state.db_pool)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(MarkAllResult {
        marked: result.rows_affected(),
    })))
}

pub async fn delete_notification(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let notification_id = path.into_inner();

    let result = sqlx::query(
        "DELETE FROM notifications WHERE id = ? AND user_id = ?"
    )
        .bind(&notification_id)
        .bind(&claims.sub)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::notification_not_found(&notification_id));
    }

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        notification_id,
        "Notification deleted".to_string(),
    )))
}

pub async fn delete_read_notifications(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    #[derive(Serialize)]
    struct DeleteReadResult {
        deleted: u64,
    }

    let claims = get_current_user(&http_request)?;
    let result = sqlx::query(
        "DELETE FROM notifications WHERE user_id = ? AND is_read = 1"
    )
        .bind(&claims.sub)
        .execute(&app_state.db_pool)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        DeleteReadResult { deleted: result.rows_affected() },
        "Read notifications cleared".to_string(),
    )))
}

// ==================== TOASTS ====================

pub async fn list_toasts(
    app_state: web::Data<Arc<AppState>>,
) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(ApiResponse::success(app_state.alert_bus.active())))
}

pub async fn dismiss_toast(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let toast_id = path.into_inner();
    if app_state.alert_bus.dismiss(&toast_id) {
        Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
            toast_id,
            "Toast dismissed".to_string(),
        )))
    } else {
        Err(ApiError::NotFound(format!("Toast '{}' is not active", toast_id)))
    }
}
