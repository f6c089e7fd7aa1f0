// src/inventory_handlers.rs - Medicine and vaccine inventory endpoints
//
// Both program collections (BHW medicines, BNS supplements) share one table
// split by owner_role. Every list fetch runs the stock status pipeline so
// stale statuses are reconciled and alerts fan out before the rows render.

use actix_web::{web, HttpResponse, HttpRequest};
use std::sync::Arc;
use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::activity::{record, ChangeSet};
use crate::auth::{check_permission, get_current_user};
use crate::error::{ApiError, ApiResult, validate_quantity, validate_unit};
use crate::handlers::{ApiResponse, PaginatedResponse, PaginationQuery};
use crate::models::{
    CreateInventoryItemRequest, InventoryItem, IssuanceLog, OwnerRole,
    StockMovementRequest, UpdateInventoryItemRequest,
};
use crate::stock::{classify, run_pipeline, StockThresholds};

fn parse_owner_role(value: &str) -> ApiResult<OwnerRole> {
    match value.to_lowercase().as_str() {
        "bhw" => Ok(OwnerRole::Bhw),
        "bns" => Ok(OwnerRole::Bns),
        other => Err(ApiError::BadRequest(format!(
            "Unknown inventory collection '{}', expected 'bhw' or 'bns'", other
        ))),
    }
}

async fn fetch_item(app_state: &AppState, id: &str) -> ApiResult<InventoryItem> {
    sqlx::query_as::<_, InventoryItem>("SELECT * FROM inventory_items WHERE id = ?")
        .bind(id)
        .fetch_one(&app_state.db_pool)
        .await
        .map_err(|_| ApiError::item_not_found(id))
}

// ==================== LIST (WITH PIPELINE PASS) ====================

pub async fn list_inventory(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_view_inventory())?;
    let (page, per_page, offset) = query.normalize();

    let mut conditions = vec!["deleted_at IS NULL".to_string()];
    let mut params: Vec<String> = Vec::new();

    if let Some(owner) = &query.owner_role {
        let owner = parse_owner_role(owner)?;
        conditions.push("owner_role = ?".to_string());
        params.push(owner.as_str().to_string());
    }
    if let Some(status) = &query.status {
        conditions.push("status = ?".to_string());
        params.push(status.to_lowercase());
    }
    if let Some(category) = &query.category {
        conditions.push("category = ?".to_string());
        params.push(category.clone());
    }
    if let Some(search) = &query.search {
        let trimmed = search.trim();
        if !trimmed.is_empty() {
            conditions.push("(item_name LIKE ? OR supplier LIKE ?)".to_string());
            let pattern = format!("%{}%", trimmed);
            params.push(pattern.clone());
            params.push(pattern);
        }
    }

    let where_clause = conditions.join(" AND ");

    let count_sql = format!("SELECT COUNT(*) FROM inventory_items WHERE {}", where_clause);
    let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
    for param in &params {
        count_query = count_query.bind(param);
    }
    let total: (i64,) = count_query.fetch_one(&app_state.db_pool).await?;

    let list_sql = format!(
        "SELECT * FROM inventory_items WHERE {} ORDER BY item_name COLLATE NOCASE LIMIT ? OFFSET ?",
        where_clause
    );
    let mut list_query = sqlx::query_as::<_, InventoryItem>(&list_sql);
    for param in &params {
        list_query = list_query.bind(param);
    }
    let mut items = list_query
        .bind(per_page)
        .bind(offset)
        .fetch_all(&app_state.db_pool)
        .await?;

    // Reconcile stale statuses and fan out alerts before rendering
    let thresholds = StockThresholds::from(&app_state.config.inventory);
    let report = run_pipeline(
        &app_state.db_pool,
        &app_state.alert_bus,
        &thresholds,
        Some(&claims.sub),
        &mut items,
    ).await;
    if report.transitions > 0 {
        log::info!(
            "Stock pipeline: {} transition(s), {} failed write(s), {} toast(s)",
            report.transitions, report.failed_writes.len(), report.toasts_shown
        );
    }

    let total_pages = (total.0 + per_page - 1) / per_page;
    let response = PaginatedResponse {
        data: items,
        total: total.0,
        page,
        per_page,
        total_pages,
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

pub async fn get_inventory_item(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_view_inventory())?;
    let item_id = path.into_inner();
    let item = fetch_item(&app_state, &item_id).await?;
    if item.deleted_at.is_some() {
        return Err(ApiError::item_deleted(&item_id));
    }
    Ok(HttpResponse::Ok().json(ApiResponse::success(item)))
}

// ==================== CREATE / UPDATE / SOFT DELETE ====================

pub async fn create_inventory_item(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateInventoryItemRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    request.validate()
        .map_err(|e| ApiError::ValidationError(format!("Invalid inventory data: {}", e)))?;
    validate_quantity(request.quantity)?;
    validate_unit(&request.unit)?;

    if !claims.role.can_manage_inventory(request.owner_role) {
        return Err(ApiError::Forbidden(format!(
            "Role '{}' cannot manage the {} inventory",
            claims.role, request.owner_role
        )));
    }

    let duplicate: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM inventory_items WHERE item_name = ? AND owner_role = ? AND deleted_at IS NULL"
    )
        .bind(&request.item_name)
        .bind(request.owner_role.as_str())
        .fetch_optional(&app_state.db_pool)
        .await?;
    if duplicate.is_some() {
        return Err(ApiError::item_already_exists(&request.item_name, request.owner_role.as_str()));
    }

    let thresholds = StockThresholds::from(&app_state.config.inventory);
    let now = Utc::now();
    let item = InventoryItem {
        id: Uuid::new_v4().to_string(),
        item_name: request.item_name.clone(),
        category: request.category.clone(),
        quantity: request.quantity,
        unit: request.unit.clone(),
        status: classify(request.quantity, &thresholds),
        owner_role: request.owner_role,
        expiry_date: request.expiry_date,
        supplier: request.supplier.clone(),
        deleted_at: None,
        created_by: Some(claims.sub.clone()),
        updated_by: None,
        created_at: now,
        updated_at: now,
        unsynced: false,
    };

    sqlx::query(
        r#"INSERT INTO inventory_items (
            id, item_name, category, quantity, unit, status, owner_role,
            expiry_date, supplier, created_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
    )
        .bind(&item.id)
        .bind(&item.item_name)
        .bind(&item.category)
        .bind(item.quantity)
        .bind(&item.unit)
        .bind(item.status.as_str())
        .bind(item.owner_role.as_str())
        .bind(item.expiry_date)
        .bind(&item.supplier)
        .bind(&item.created_by)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&app_state.db_pool)
        .await?;

    record(
        &app_state.db_pool,
        &claims.sub,
        "inventory_create",
        &format!("Added '{}' ({} {}) to the {} inventory",
            item.item_name, item.quantity, item.unit, item.owner_role),
        &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success(item)))
}

pub async fn update_inventory_item(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateInventoryItemRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let item_id = path.into_inner();
    request.validate()
        .map_err(|e| ApiError::ValidationError(format!("Invalid inventory data: {}", e)))?;

    let existing = fetch_item(&app_state, &item_id).await?;
    if existing.deleted_at.is_some() {
        return Err(ApiError::item_deleted(&item_id));
    }
    if !claims.role.can_manage_inventory(existing.owner_role) {
        return Err(ApiError::Forbidden(format!(
            "Role '{}' cannot manage the {} inventory",
            claims.role, existing.owner_role
        )));
    }

    let item_name = request.item_name.clone().unwrap_or_else(|| existing.item_name.clone());
    let category = request.category.clone().unwrap_or_else(|| existing.category.clone());
    let quantity = request.quantity.unwrap_or(existing.quantity);
    let unit = request.unit.clone().unwrap_or_else(|| existing.unit.clone());
    // Double-Option fields: absent keeps the stored value, explicit null clears
    let expiry_date = match request.expiry_date {
        Some(value) => value,
        None => existing.expiry_date,
    };
    let supplier = match &request.supplier {
        Some(value) => value.clone(),
        None => existing.supplier.clone(),
    };

    validate_quantity(quantity)?;
    validate_unit(&unit)?;

    if item_name != existing.item_name {
        let duplicate: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM inventory_items WHERE item_name = ? AND owner_role = ? AND id != ? AND deleted_at IS NULL"
        )
            .bind(&item_name)
            .bind(existing.owner_role.as_str())
            .bind(&item_id)
            .fetch_optional(&app_state.db_pool)
            .await?;
        if duplicate.is_some() {
            return Err(ApiError::item_already_exists(&item_name, existing.owner_role.as_str()));
        }
    }

    let mut changes = ChangeSet::new();
    changes.add("item_name", &existing.item_name, &item_name);
    changes.add("category", &existing.category, &category);
    changes.add_i64("quantity", existing.quantity, quantity);
    changes.add("unit", &existing.unit, &unit);
    changes.add_opt("supplier", &existing.supplier, &supplier);

    sqlx::query(
        r#"UPDATE inventory_items
           SET item_name = ?, category = ?, quantity = ?, unit = ?,
               expiry_date = ?, supplier = ?, updated_by = ?, updated_at = datetime('now')
           WHERE id = ?"#
    )
        .bind(&item_name)
        .bind(&category)
        .bind(quantity)
        .bind(&unit)
        .bind(expiry_date)
        .bind(&supplier)
        .bind(&claims.sub)
        .bind(&item_id)
        .execute(&app_state.db_pool)
        .await?;

    // A quantity edit may cross a threshold, so run the pipeline on this row
    let mut updated = fetch_item(&app_state, &item_id).await?;
    let thresholds = StockThresholds::from(&app_state.config.inventory);
    run_pipeline(
        &app_state.db_pool,
        &app_state.alert_bus,
        &thresholds,
        Some(&claims.sub),
        std::slice::from_mut(&mut updated),
    ).await;

    if changes.has_changes() {
        record(
            &app_state.db_pool,
            &claims.sub,
            "inventory_update",
            &format!("Updated '{}': {}", updated.item_name, changes.to_description()),
            &http_request,
        ).await;
    }

    Ok(HttpResponse::Ok().json(ApiResponse::success(updated)))
}

pub async fn delete_inventory_item(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let item_id = path.into_inner();

    let existing = fetch_item(&app_state, &item_id).await?;
    if existing.deleted_at.is_some() {
        return Err(ApiError::item_deleted(&item_id));
    }
    if !claims.role.can_manage_inventory(existing.owner_role) {
        return Err(ApiError::Forbidden(format!(
            "Role '{}' cannot manage the {} inventory",
            claims.role, existing.owner_role
        )));
    }

    sqlx::query(
        "UPDATE inventory_items SET deleted_at = datetime('now'), updated_by = ? WHERE id = ?"
    )
        .bind(&claims.sub)
        .bind(&item_id)
        .execute(&app_state.db_pool)
        .await?;

    record(
        &app_state.db_pool,
        &claims.sub,
        "inventory_delete",
        &format!("Moved '{}' to the recycle bin", existing.item_name),
        &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        existing.id,
        "Item moved to recycle bin".to_string(),
    )))
}

// ==================== REFILL / ISSUE ====================

async fn apply_stock_movement(
    app_state: &Arc<AppState>,
    http_request: &HttpRequest,
    item_id: &str,
    request: &StockMovementRequest,
    movement: &str,
) -> ApiResult<InventoryItem> {
    let claims = get_current_user(http_request)?;
    request.validate()
        .map_err(|e| ApiError::ValidationError(format!("Invalid stock movement: {}", e)))?;

    let mut tx = app_state.db_pool.begin().await?;

    let existing: InventoryItem = sqlx::query_as(
        "SELECT * FROM inventory_items WHERE id = ?"
    )
        .bind(item_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|_| ApiError::item_not_found(item_id))?;

    if existing.deleted_at.is_some() {
        return Err(ApiError::item_deleted(item_id));
    }
    if !claims.role.can_adjust_stock(existing.owner_role) {
        return Err(ApiError::Forbidden(format!(
            "Role '{}' cannot adjust stock in the {} inventory",
            claims.role, existing.owner_role
        )));
    }

    let new_quantity = match movement {
        "issue" => {
            if request.quantity > existing.quantity {
                return Err(ApiError::insufficient_stock(existing.quantity, request.quantity));
            }
            existing.quantity - request.quantity
        }
        _ => existing.quantity + request.quantity,
    };
    validate_quantity(new_quantity)?;

    sqlx::query(
        "UPDATE inventory_items SET quantity = ?, updated_by = ?, updated_at = datetime('now') WHERE id = ?"
    )
        .bind(new_quantity)
        .bind(&claims.sub)
        .bind(item_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"INSERT INTO issuance_logs (id, item_id, user_id, quantity, movement, issued_to, purpose, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#
    )
        .bind(Uuid::new_v4().to_string())
        .bind(item_id)
        .bind(&claims.sub)
        .bind(request.quantity)
        .bind(movement)
        .bind(&request.issued_to)
        .bind(&request.purpose)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    // Reclassify the mutated row; a refill may clear an alert, an issue
    // may trigger one.
    let mut updated = fetch_item(app_state, item_id).await?;
    let thresholds = StockThresholds::from(&app_state.config.inventory);
    run_pipeline(
        &app_state.db_pool,
        &app_state.alert_bus,
        &thresholds,
        Some(&claims.sub),
        std::slice::from_mut(&mut updated),
    ).await;

    record(
        &app_state.db_pool,
        &claims.sub,
        &format!("inventory_{}", movement),
        &format!(
            "{} {} {} of '{}' (now {} {})",
            if movement == "issue" { "Issued" } else { "Refilled" },
            request.quantity, existing.unit, existing.item_name,
            new_quantity, existing.unit
        ),
        http_request,
    ).await;

    Ok(updated)
}

pub async fn refill_item(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<StockMovementRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let item = apply_stock_movement(&app_state, &http_request, &path.into_inner(), &request, "refill").await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(item)))
}

pub async fn issue_item(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<StockMovementRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let item = apply_stock_movement(&app_state, &http_request, &path.into_inner(), &request, "issue").await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(item)))
}

// ==================== ISSUANCE HISTORY ====================

pub async fn list_issuances(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    query: web::Query<PaginationQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_view_inventory())?;
    let item_id = path.into_inner();
    let (page, per_page, offset) = query.normalize();

    // Ensure the item exists before paging its history
    fetch_item(&app_state, &item_id).await?;

    let total: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM issuance_logs WHERE item_id = ?"
    )
        .bind(&item_id)
        .fetch_one(&app_state.db_pool)
        .await?;

    let logs: Vec<IssuanceLog> = sqlx::query_as(
        "SELECT * FROM issuance_logs WHERE item_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?"
    )
        .bind(&item_id)
        .bind(per_page)
        .bind(offset)
        .fetch_all(&app_state.db_pool)
        .await?;

    let total_pages = (total.0 + per_page - 1) / per_page;
    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse {
        data: logs,
        total: total.0,
        page,
        per_page,
        total_pages,
    })))
}

// ==================== LOW STOCK ====================

pub async fn list_low_stock(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_view_inventory())?;
    let mut sql = String::from(
        "SELECT * FROM inventory_items WHERE status IN ('low', 'critical') AND deleted_at IS NULL"
    );
    let owner = match &query.owner_role {
        Some(value) => Some(parse_owner_role(value)?),
        None => None,
    };
    if owner.is_some() {
        sql.push_str(" AND owner_role = ?");
    }
    sql.push_str(" ORDER BY quantity ASC");

    let mut list_query = sqlx::query_as::<_, InventoryItem>(&sql);
    if let Some(owner) = owner {
        list_query = list_query.bind(owner.as_str().to_string());
    }
    let items = list_query.fetch_all(&app_state.db_pool).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(items)))
}

// ==================== RECYCLE BIN ====================

pub async fn list_recycle_bin(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;

    let items: Vec<InventoryItem> = sqlx::query_as(
        "SELECT * FROM inventory_items WHERE deleted_at IS NOT NULL ORDER BY deleted_at DESC"
    )
        .fetch_all(&app_state.db_pool)
        .await?;

    // Non-admins only see the bin of collections they manage
    let items: Vec<InventoryItem> = items
        .into_iter()
        .filter(|item| claims.role.can_manage_inventory(item.owner_role))
        .collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(items)))
}

pub async fn restore_inventory_item(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let item_id = path.into_inner();

    let existing = fetch_item(&app_state, &item_id).await?;
    if existing.deleted_at.is_none() {
        return Err(ApiError::BadRequest(format!(
            "Inventory item '{}' is not in the recycle bin", item_id
        )));
    }
    if !claims.role.can_manage_inventory(existing.owner_role) {
        return Err(ApiError::Forbidden(format!(
            "Role '{}' cannot manage the {} inventory",
            claims.role, existing.owner_role
        )));
    }

    // A live item may have taken the name while this one sat in the bin
    let conflict: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM inventory_items WHERE item_name = ? AND owner_role = ? AND id != ? AND deleted_at IS NULL"
    )
        .bind(&existing.item_name)
        .bind(existing.owner_role.as_str())
        .bind(&item_id)
        .fetch_optional(&app_state.db_pool)
        .await?;
    if conflict.is_some() {
        return Err(ApiError::item_already_exists(&existing.item_name, existing.owner_role.as_str()));
    }

    sqlx::query(
        "UPDATE inventory_items SET deleted_at = NULL, updated_by = ?, updated_at = datetime('now') WHERE id = ?"
    )
        .bind(&claims.sub)
        .bind(&item_id)
        .execute(&app_state.db_pool)
        .await?;

    record(
        &app_state.db_pool,
        &claims.sub,
        "inventory_restore",
        &format!("Restored '{}' from the recycle bin", existing.item_name),
        &http_request,
    ).await;

    let restored = fetch_item(&app_state, &item_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(restored)))
}

pub async fn purge_inventory_item(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let item_id = path.into_inner();

    if !claims.role.can_purge_inventory() {
        return Err(ApiError::Forbidden(
            "Only administrators can permanently delete inventory items".to_string()
        ));
    }

    let existing = fetch_item(&app_state, &item_id).await?;
    if existing.deleted_at.is_none() {
        return Err(ApiError::BadRequest(format!(
            "Inventory item '{}' must be in the recycle bin before purging", item_id
        )));
    }

    sqlx::query("DELETE FROM inventory_items WHERE id = ?")
        .bind(&item_id)
        .execute(&app_state.db_pool)
        .await?;

    record(
        &app_state.db_pool,
        &claims.sub,
        "inventory_purge",
        &format!("Permanently deleted '{}'", existing.item_name),
        &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        existing.id,
        "Item permanently deleted".to_string(),
    )))
}
