// src/patient_handlers.rs - Maternal program patient records

use actix_web::{web, HttpResponse, HttpRequest};
use std::sync::Arc;
use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::activity::{record, ChangeSet};
use crate::auth::{check_permission, get_current_user};
use crate::error::{ApiError, ApiResult};
use crate::handlers::{ApiResponse, PaginatedResponse, PaginationQuery};
use crate::models::{CreatePatientRequest, Patient, UpdatePatientRequest};

async fn fetch_patient(app_state: &AppState, id: &str) -> ApiResult<Patient> {
    sqlx::query_as::<_, Patient>("SELECT * FROM patients WHERE id = ?")
        .bind(id)
        .fetch_one(&app_state.db_pool)
        .await
        .map_err(|_| ApiError::patient_not_found(id))
}

pub async fn list_patients(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_view_patients())?;
    let (page, per_page, offset) = query.normalize();

    let mut conditions = vec!["1 = 1".to_string()];
    let mut params: Vec<String> = Vec::new();

    if let Some(search) = &query.search {
        let trimmed = search.trim();
        if !trimmed.is_empty() {
            conditions.push("(first_name LIKE ? OR last_name LIKE ?)".to_string());
            let pattern = format!("%{}%", trimmed);
            params.push(pattern.clone());
            params.push(pattern);
        }
    }

    let where_clause = conditions.join(" AND ");

    let count_sql = format!("SELECT COUNT(*) FROM patients WHERE {}", where_clause);
    let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
    for param in &params {
        count_query = count_query.bind(param);
    }
    let total: (i64,) = count_query.fetch_one(&app_state.db_pool).await?;

    let list_sql = format!(
        "SELECT * FROM patients WHERE {} ORDER BY last_name COLLATE NOCASE, first_name COLLATE NOCASE LIMIT ? OFFSET ?",
        where_clause
    );
    let mut list_query = sqlx::query_as::<_, Patient>(&list_sql);
    for param in &params {
        list_query = list_query.bind(param);
    }
    let patients = list_query
        .bind(per_page)
        .bind(offset)
        .fetch_all(&app_state.db_pool)
        .await?;

    let total_pages = (total.0 + per_page - 1) / per_page;
    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse {
        data: patients,
        total: total.0,
        page,
        per_page,
        total_pages,
    })))
}

pub async fn get_patient(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_view_patients())?;
    let patient = fetch_patient(&app_state, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(patient)))
}

pub async fn create_patient(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreatePatientRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    if !claims.role.can_manage_patients() {
        return Err(ApiError::Forbidden(format!(
            "Role '{}' cannot manage patient records", claims.role
        )));
    }
    request.validate()
        .map_err(|e| ApiError::ValidationError(format!("Invalid patient data: {}", e)))?;

    let now = Utc::now();
    let patient = Patient {
        id: Uuid::new_v4().to_string(),
        first_name: request.first_name.clone(),
        last_name: request.last_name.clone(),
        birth_date: request.birth_date,
        address: request.address.clone(),
        contact_number: request.contact_number.clone(),
        created_by: Some(claims.sub.clone()),
        updated_by: None,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"INSERT INTO patients (
            id, first_name, last_name, birth_date, address, contact_number,
            created_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#
    )
        .bind(&patient.id)
        .bind(&patient.first_name)
        .bind(&patient.last_name)
        .bind(patient.birth_date)
        .bind(&patient.address)
        .bind(&patient.contact_number)
        .bind(&patient.created_by)
        .bind(patient.created_at)
        .bind(patient.updated_at)
        .execute(&app_state.db_pool)
        .await?;

    record(
        &app_state.db_pool,
        &claims.sub,
        "patient_create",
        &format!("Registered patient '{} {}'", patient.first_name, patient.last_name),
        &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success(patient)))
}

pub async fn update_patient(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdatePatientRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    if !claims.role.can_manage_patients() {
        return Err(ApiError::Forbidden(format!(
            "Role '{}' cannot manage patient records", claims.role
        )));
    }
    let patient_id = path.into_inner();
    request.validate()
        .map_err(|e| ApiError::ValidationError(format!("Invalid patient data: {}", e)))?;

    let existing = fetch_patient(&app_state, &patient_id).await?;

    let first_name = request.first_name.clone().unwrap_or_else(|| existing.first_name.clone());
    let last_name = request.last_name.clone().unwrap_or_else(|| existing.last_name.clone());
    let birth_date = request.birth_date.unwrap_or(existing.birth_date);
    let address = request.address.clone().or_else(|| existing.address.clone());
    let contact_number = request.contact_number.clone().or_else(|| existing.contact_number.clone());

    let mut changes = ChangeSet::new();
    changes.add("first_name", &existing.first_name, &first_name);
    changes.add("last_name", &existing.last_name, &last_name);
    changes.add_opt("address", &existing.address, &address);
    changes.add_opt("contact_number", &existing.contact_number, &contact_number);

    sqlx::query(
        r#"UPDATE patients
           SET first_name = ?, last_name = ?, birth_date = ?, address = ?,
               contact_number = ?, updated_by = ?, updated_at = datetime('now')
           WHERE id = ?"#
    )
        .bind(&first_name)
        .bind(&last_name)
        .bind(birth_date)
        .bind(&address)
        .bind(&contact_number)
        .bind(&claims.sub)
        .bind(&patient_id)
        .execute(&app_state.db_pool)
        .await?;

    if changes.has_changes() {
        record(
            &app_state.db_pool,
            &claims.sub,
            "patient_update",
            &format!("Updated patient '{} {}': {}", first_name, last_name, changes.to_description()),
            &http_request,
        ).await;
    }

    let updated = fetch_patient(&app_state, &patient_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(updated)))
}

pub async fn delete_patient(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    if !claims.role.can_manage_patients() {
        return Err(ApiError::Forbidden(format!(
            "Role '{}' cannot manage patient records", claims.role
        )));
    }
    let patient_id = path.into_inner();

    let existing = fetch_patient(&app_state, &patient_id).await?;

    // Children and appointments cascade with the patient row
    sqlx::query("DELETE FROM patients WHERE id = ?")
        .bind(&patient_id)
        .execute(&app_state.db_pool)
        .await?;

    record(
        &app_state.db_pool,
        &claims.sub,
        "patient_delete",
        &format!("Deleted patient '{} {}'", existing.first_name, existing.last_name),
        &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        patient_id,
        "Patient record deleted".to_string(),
    )))
}
