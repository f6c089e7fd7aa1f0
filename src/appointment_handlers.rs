// src/appointment_handlers.rs - Prenatal and immunization appointments
//
// Includes the reminder sweeper that runs in the background and turns
// appointments inside the 24-hour window into bell-icon notifications.

use actix_web::{web, HttpResponse, HttpRequest};
use std::sync::Arc;
use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::activity::record;
use crate::auth::{check_permission, get_current_user};
use crate::error::{ApiError, ApiResult};
use crate::handlers::{ApiResponse, PaginatedResponse, PaginationQuery};
use crate::models::{
    Appointment, AppointmentStatus, CreateAppointmentRequest, NotificationType,
    UpdateAppointmentRequest,
};

async fn fetch_appointment(app_state: &AppState, id: &str) -> ApiResult<Appointment> {
    sqlx::query_as::<_, Appointment>("SELECT * FROM appointments WHERE id = ?")
        .bind(id)
        .fetch_one(&app_state.db_pool)
        .await
        .map_err(|_| ApiError::appointment_not_found(id))
}

// ==================== CRUD ====================

pub async fn list_appointments(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_view_appointments())?;
    let (page, per_page, offset) = query.normalize();

    let mut conditions = vec!["1 = 1".to_string()];
    let mut params: Vec<String> = Vec::new();

    if let Some(status) = &query.status {
        conditions.push("a.status = ?".to_string());
        params.push(status.to_lowercase());
    }
    if let Some(from) = &query.date_from {
        conditions.push("a.scheduled_at >= ?".to_string());
        params.push(from.to_rfc3339());
    }
    if let Some(to) = &query.date_to {
        conditions.push("a.scheduled_at <= ?".to_string());
        params.push(to.to_rfc3339());
    }

    let where_clause = conditions.join(" AND ");

    let count_sql = format!("SELECT COUNT(*) FROM appointments a WHERE {}", where_clause);
    let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
    for param in &params {
        count_query = count_query.bind(param);
    }
    let total: (i64,) = count_query.fetch_one(&app_state.db_pool).await?;

    let list_sql = format!(
        "SELECT a.* FROM appointments a WHERE {} ORDER BY a.scheduled_at ASC LIMIT ? OFFSET ?",
        where_clause
    );
    let mut list_query = sqlx::query_as::<_, Appointment>(&list_sql);
    for param in &params {
        list_query = list_query.bind(param);
    }
    let appointments = list_query
        .bind(per_page)
        .bind(offset)
        .fetch_all(&app_state.db_pool)
        .await?;

    let total_pages = (total.0 + per_page - 1) / per_page;
    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse {
        data: appointments,
        total: total.0,
        page,
        per_page,
        total_pages,
    })))
}

pub async fn get_appointment(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_view_appointments())?;
    let appointment = fetch_appointment(&app_state, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(appointment)))
}

pub async fn create_appointment(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateAppointmentRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    if !claims.role.can_manage_appointments() {
        return Err(ApiError::Forbidden(format!(
            "Role '{}' cannot manage appointments", claims.role
        )));
    }
    request.validate()
        .map_err(|e| ApiError::ValidationError(format!("Invalid appointment: {}", e)))?;

    if request.scheduled_at <= Utc::now() {
        return Err(ApiError::ValidationError(
            "Appointments must be scheduled in the future".to_string()
        ));
    }

    let patient: Option<(String,)> = sqlx::query_as("SELECT id FROM patients WHERE id = ?")
        .bind(&request.patient_id)
        .fetch_optional(&app_state.db_pool)
        .await?;
    if patient.is_none() {
        return Err(ApiError::patient_not_found(&request.patient_id));
    }

    let now = Utc::now();
    let appointment = Appointment {
        id: Uuid::new_v4().to_string(),
        patient_id: request.patient_id.clone(),
        scheduled_at: request.scheduled_at,
        purpose: request.purpose.clone(),
        status: AppointmentStatus::Scheduled,
        notes: request.notes.clone(),
        reminder_sent: false,
        created_by: Some(claims.sub.clone()),
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"INSERT INTO appointments (
            id, patient_id, scheduled_at, purpose, status, notes,
            reminder_sent, created_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?)"#
    )
        .bind(&appointment.id)
        .bind(&appointment.patient_id)
        .bind(appointment.scheduled_at)
        .bind(&appointment.purpose)
        .bind(appointment.status.as_str())
        .bind(&appointment.notes)
        .bind(&appointment.created_by)
        .bind(appointment.created_at)
        .bind(appointment.updated_at)
        .execute(&app_state.db_pool)
        .await?;

    record(
        &app_state.db_pool,
        &claims.sub,
        "appointment_create",
        &format!("Scheduled '{}' for {}", appointment.purpose, appointment.scheduled_at),
        &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success(appointment)))
}

pub async fn update_appointment(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateAppointmentRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    if !claims.role.can_manage_appointments() {
        return Err(ApiError::Forbidden(format!(
            "Role '{}' cannot manage appointments", claims.role
        )));
    }
    let appointment_id = path.into_inner();
    request.validate()
        .map_err(|e| ApiError::ValidationError(format!("Invalid appointment: {}", e)))?;

    let existing = fetch_appointment(&app_state, &appointment_id).await?;
    if existing.status != AppointmentStatus::Scheduled {
        return Err(ApiError::BadRequest(format!(
            "Only scheduled appointments can be edited (status is '{}')",
            existing.status
        )));
    }

    let scheduled_at = request.scheduled_at.unwrap_or(existing.scheduled_at);
    let purpose = request.purpose.clone().unwrap_or_else(|| existing.purpose.clone());
    let notes = request.notes.clone().or_else(|| existing.notes.clone());

    // Rescheduling re-arms the reminder
    let reminder_sent = existing.reminder_sent && scheduled_at == existing.scheduled_at;

    sqlx::query(
        r#"UPDATE appointments
           SET scheduled_at = ?, purpose = ?, notes = ?, reminder_sent = ?,
               updated_at = datetime('now')
           WHERE id = ?"#
    )
        .bind(scheduled_at)
        .bind(&purpose)
        .bind(&notes)
        .bind(reminder_sent as i32)
        .bind(&appointment_id)
        .execute(&app_state.db_pool)
        .await?;

    record(
        &app_state.db_pool,
        &claims.sub,
        "appointment_update",
        &format!("Updated appointment '{}'", purpose),
        &http_request,
    ).await;

    let updated = fetch_appointment(&app_state, &appointment_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(updated)))
}

// ==================== STATE TRANSITIONS ====================

async fn transition_appointment(
    app_state: &Arc<AppState>,
    http_request: &HttpRequest,
    appointment_id: &str,
    target: AppointmentStatus,
) -> ApiResult<Appointment> {
    let claims = get_current_user(http_request)?;
    if !claims.role.can_manage_appointments() {
        return Err(ApiError::Forbidden(format!(
            "Role '{}' cannot manage appointments", claims.role
        )));
    }

    let existing = fetch_appointment(app_state, appointment_id).await?;
    if existing.status != AppointmentStatus::Scheduled {
        return Err(ApiError::BadRequest(format!(
            "Appointment is already '{}'", existing.status
        )));
    }

    sqlx::query(
        "UPDATE appointments SET status = ?, updated_at = datetime('now') WHERE id = ?"
    )
        .bind(target.as_str())
        .bind(appointment_id)
        .execute(&app_state.db_pool)
        .await?;

    record(
        &app_state.db_pool,
        &claims.sub,
        &format!("appointment_{}", target.as_str()),
        &format!("Marked '{}' as {}", existing.purpose, target),
        http_request,
    ).await;

    fetch_appointment(app_state, appointment_id).await
}

pub async fn complete_appointment(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let appointment = transition_appointment(
        &app_state, &http_request, &path.into_inner(), AppointmentStatus::Completed,
    ).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(appointment)))
}

pub async fn cancel_appointment(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let appointment = transition_appointment(
        &app_state, &http_request, &path.into_inner(), AppointmentStatus::Cancelled,
    ).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(appointment)))
}

// ==================== REMINDER SWEEPER ====================

/// One sweep: find scheduled appointments inside the 24-hour window whose
/// reminder has not gone out, notify the staff member who created them,
/// and mark overdue scheduled appointments as missed.
pub async fn sweep_reminders(pool: &sqlx::SqlitePool) -> ApiResult<usize> {
    #[derive(sqlx::FromRow)]
    struct DueAppointment {
        id: String,
        purpose: String,
        scheduled_at: chrono::DateTime<Utc>,
        created_by: Option<String>,
        patient_name: String,
    }

    let due: Vec<DueAppointment> = sqlx::query_as(
        r#"SELECT a.id, a.purpose, a.scheduled_at, a.created_by,
                  p.first_name || ' ' || p.last_name AS patient_name
           FROM appointments a
           JOIN patients p ON p.id = a.patient_id
           WHERE a.status = 'scheduled'
             AND a.reminder_sent = 0
             AND a.scheduled_at > datetime('now')
             AND a.scheduled_at <= datetime('now', '+1 day')"#
    )
        .fetch_all(pool)
        .await?;

    let mut sent = 0;
    for appointment in &due {
        if let Some(user_id) = &appointment.created_by {
            let message = format!(
                "Reminder: {} for {} is scheduled at {}.",
                appointment.purpose,
                appointment.patient_name,
                appointment.scheduled_at.format("%Y-%m-%d %H:%M"),
            );
            let inserted = sqlx::query(
                r#"INSERT INTO notifications (id, user_id, notif_type, message, is_read, created_at)
                   VALUES (?, ?, ?, ?, 0, ?)"#
            )
                .bind(Uuid::new_v4().to_string())
                .bind(user_id)
                .bind(NotificationType::AppointmentReminder.as_str())
                .bind(&message)
                .bind(Utc::now())
                .execute(pool)
                .await;
            if let Err(e) = inserted {
                log::error!("Failed to insert reminder for appointment {}: {}", appointment.id, e);
                continue;
            }
        }

        sqlx::query("UPDATE appointments SET reminder_sent = 1 WHERE id = ?")
            .bind(&appointment.id)
            .execute(pool)
            .await?;
        sent += 1;
    }

    // Scheduled appointments whose time slipped by without completion
    let missed = sqlx::query(
        "UPDATE appointments SET status = 'missed', updated_at = datetime('now')
         WHERE status = 'scheduled' AND scheduled_at < datetime('now', '-1 day')"
    )
        .execute(pool)
        .await?;
    if missed.rows_affected() > 0 {
        log::info!("Marked {} appointment(s) as missed", missed.rows_affected());
    }

    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_migrations;
    use sqlx::SqlitePool;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    async fn seed_basics(pool: &SqlitePool) {
        sqlx::query(
            r#"INSERT INTO users (id, username, email, password_hash, role, is_active,
               created_at, updated_at, failed_login_attempts)
               VALUES ('u1', 'bhw1', 'bhw1@test.local', 'x', 'bhw', 1,
               datetime('now'), datetime('now'), 0)"#
        ).execute(pool).await.unwrap();
        sqlx::query(
            r#"INSERT INTO patients (id, first_name, last_name, birth_date, created_at, updated_at)
               VALUES ('p1', 'Maria', 'Santos', '1995-04-12', datetime('now'), datetime('now'))"#
        ).execute(pool).await.unwrap();
    }

    async fn seed_appointment(pool: &SqlitePool, id: &str, offset: &str, status: &str, reminder_sent: i32) {
        sqlx::query(
            r#"INSERT INTO appointments (id, patient_id, scheduled_at, purpose, status,
               reminder_sent, created_by, created_at, updated_at)
               VALUES (?, 'p1', datetime('now', ?), 'Prenatal checkup', ?, ?, 'u1',
               datetime('now'), datetime('now'))"#
        )
            .bind(id)
            .bind(offset)
            .bind(status)
            .bind(reminder_sent)
            .execute(pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_sends_reminders_once() {
        let pool = test_pool().await;
        seed_basics(&pool).await;
        seed_appointment(&pool, "a1", "+6 hours", "scheduled", 0).await;
        seed_appointment(&pool, "a2", "+3 days", "scheduled", 0).await;

        let sent = sweep_reminders(&pool).await.unwrap();
        assert_eq!(sent, 1);

        let notifs: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM notifications WHERE notif_type = 'appointment_reminder'"
        ).fetch_one(&pool).await.unwrap();
        assert_eq!(notifs.0, 1);

        // Second sweep is a no-op for the same appointment
        let sent = sweep_reminders(&pool).await.unwrap();
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn test_sweep_marks_overdue_as_missed() {
        let pool = test_pool().await;
        seed_basics(&pool).await;
        seed_appointment(&pool, "a1", "-2 days", "scheduled", 1).await;

        sweep_reminders(&pool).await.unwrap();

        let status: (String,) = sqlx::query_as(
            "SELECT status FROM appointments WHERE id = 'a1'"
        ).fetch_one(&pool).await.unwrap();
        assert_eq!(status.0, "missed");
    }
}
