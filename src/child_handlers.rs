// src/child_handlers.rs - Child nutrition records (BNS program)

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
use crate::models::{ChildRecord, CreateChildRequest, UpdateChildRequest};

async fn fetch_child(app_state: &AppState, id: &str) -> ApiResult<ChildRecord> {
    sqlx::query_as::<_, ChildRecord>("SELECT * FROM children WHERE id = ?")
        .bind(id)
        .fetch_one(&app_state.db_pool)
        .await
        .map_err(|_| ApiError::child_not_found(id))
}

fn normalize_sex(value: &str) -> ApiResult<String> {
    match value.to_lowercase().as_str() {
        "m" | "male" => Ok("male".to_string()),
        "f" | "female" => Ok("female".to_string()),
        other => Err(ApiError::ValidationError(format!(
            "Sex must be 'male' or 'female', got '{}'", other
        ))),
    }
}

pub async fn list_children(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_view_children())?;
    let (page, per_page, offset) = query.normalize();

    let mut conditions = vec!["1 = 1".to_string()];
    let mut params: Vec<String> = Vec::new();

    if let Some(search) = &query.search {
        let trimmed = search.trim();
        if !trimmed.is_empty() {
            conditions.push("name LIKE ?".to_string());
            params.push(format!("%{}%", trimmed));
        }
    }

    let where_clause = conditions.join(" AND ");

    let count_sql = format!("SELECT COUNT(*) FROM children WHERE {}", where_clause);
    let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
    for param in &params {
        count_query = count_query.bind(param);
    }
    let total: (i64,) = count_query.fetch_one(&app_state.db_pool).await?;

    let list_sql = format!(
        "SELECT * FROM children WHERE {} ORDER BY name COLLATE NOCASE LIMIT ? OFFSET ?",
        where_clause
    );
    let mut list_query = sqlx::query_as::<_, ChildRecord>(&list_sql);
    for param in &params {
        list_query = list_query.bind(param);
    }
    let children = list_query
        .bind(per_page)
        .bind(offset)
        .fetch_all(&app_state.db_pool)
        .await?;

    let total_pages = (total.0 + per_page - 1) / per_page;
    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse {
        data: children,
        total: total.0,
        page,
        per_page,
        total_pages,
    })))
}

pub async fn get_child(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_view_children())?;
    let child = fetch_child(&app_state, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(child)))
}

pub async fn list_children_for_patient(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_view_children())?;
    let patient_id = path.into_inner();

    let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM patients WHERE id = ?")
        .bind(&patient_id)
        .fetch_optional(&app_state.db_pool)
        .await?;
    if exists.is_none() {
        return Err(ApiError::patient_not_found(&patient_id));
    }

    let children: Vec<ChildRecord> = sqlx::query_as(
        "SELECT * FROM children WHERE patient_id = ? ORDER BY birth_date DESC"
    )
        .bind(&patient_id)
        .fetch_all(&app_state.db_pool)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(children)))
}

pub async fn create_child(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateChildRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    if !claims.role.can_manage_children() {
        return Err(ApiError::Forbidden(format!(
            "Role '{}' cannot manage child records", claims.role
        )));
    }
    request.validate()
        .map_err(|e| ApiError::ValidationError(format!("Invalid child record: {}", e)))?;
    let sex = normalize_sex(&request.sex)?;

    let mother: Option<(String,)> = sqlx::query_as("SELECT id FROM patients WHERE id = ?")
        .bind(&request.patient_id)
        .fetch_optional(&app_state.db_pool)
        .await?;
    if mother.is_none() {
        return Err(ApiError::patient_not_found(&request.patient_id));
    }

    let now = Utc::now();
    let child = ChildRecord {
        id: Uuid::new_v4().to_string(),
        patient_id: request.patient_id.clone(),
        name: request.name.clone(),
        sex,
        birth_date: request.birth_date,
        weight_kg: request.weight_kg,
        height_cm: request.height_cm,
        nutrition_notes: request.nutrition_notes.clone(),
        created_by: Some(claims.sub.clone()),
        updated_by: None,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"INSERT INTO children (
            id, patient_id, name, sex, birth_date, weight_kg, height_cm,
            nutrition_notes, created_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
    )
        .bind(&child.id)
        .bind(&child.patient_id)
        .bind(&child.name)
        .bind(&child.sex)
        .bind(child.birth_date)
        .bind(child.weight_kg)
        .bind(child.height_cm)
        .bind(&child.nutrition_notes)
        .bind(&child.created_by)
        .bind(child.created_at)
        .bind(child.updated_at)
        .execute(&app_state.db_pool)
        .await?;

    record(
        &app_state.db_pool,
        &claims.sub,
        "child_create",
        &format!("Registered child record '{}'", child.name),
        &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success(child)))
}

pub async fn update_child(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateChildRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    if !claims.role.can_manage_children() {
        return Err(ApiError::Forbidden(format!(
            "Role '{}' cannot manage child records", claims.role
        )));
    }
    let child_id = path.into_inner();
    request.validate()
        .map_err(|e| ApiError::ValidationError(format!("Invalid child record: {}", e)))?;

    let existing = fetch_child(&app_state, &child_id).await?;

    let name = request.name.clone().unwrap_or_else(|| existing.name.clone());
    let sex = match &request.sex {
        Some(value) => normalize_sex(value)?,
        None => existing.sex.clone(),
    };
    let birth_date = request.birth_date.unwrap_or(existing.birth_date);
    let weight_kg = request.weight_kg.or(existing.weight_kg);
    let height_cm = request.height_cm.or(existing.height_cm);
    let nutrition_notes = request.nutrition_notes.clone().or_else(|| existing.nutrition_notes.clone());

    let mut changes = ChangeSet::new();
    changes.add("name", &existing.name, &name);
    changes.add("sex", &existing.sex, &sex);
    changes.add_opt_f64("weight_kg", existing.weight_kg, weight_kg);
    changes.add_opt_f64("height_cm", existing.height_cm, height_cm);

    sqlx::query(
        r#"UPDATE children
           SET name = ?, sex = ?, birth_date = ?, weight_kg = ?, height_cm = ?,
               nutrition_notes = ?, updated_by = ?, updated_at = datetime('now')
           WHERE id = ?"#
    )
        .bind(&name)
        .bind(&sex)
        .bind(birth_date)
        .bind(weight_kg)
        .bind(height_cm)
        .bind(&nutrition_notes)
        .bind(&claims.sub)
        .bind(&child_id)
        .execute(&app_state.db_pool)
        .await?;

    if changes.has_changes() {
        record(
            &app_state.db_pool,
            &claims.sub,
            "child_update",
            &format!("Updated child record '{}': {}", name, changes.to_description()),
            &http_request,
        ).await;
    }

    let updated = fetch_child(&app_state, &child_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(updated)))
}

pub async fn delete_child(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    if !claims.role.can_manage_children() {
        return Err(ApiError::Forbidden(format!(
            "Role '{}' cannot manage child records", claims.role
        )));
    }
    let child_id = path.into_inner();

    let existing = fetch_child(&app_state, &child_id).await?;

    sqlx::query("DELETE FROM children WHERE id = ?")
        .bind(&child_id)
        .execute(&app_state.db_pool)
        .await?;

    record(
        &app_state.db_pool,
        &claims.sub,
        "child_delete",
        &format!("Deleted child record '{}'", existing.name),
        &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        child_id,
        "Child record deleted".to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_sex() {
        assert_eq!(normalize_sex("M").unwrap(), "male");
        assert_eq!(normalize_sex("female").unwrap(), "female");
        assert!(normalize_sex("x").is_err());
    }
}
