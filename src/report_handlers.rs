// src/report_handlers.rs - CSV exports for barangay reporting

use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use chrono::Utc;

use crate::AppState;
use crate::auth::{check_permission, get_current_user};
use crate::error::{ApiError, ApiResult};
use crate::handlers::PaginationQuery;
use crate::models::{Appointment, InventoryItem};

fn escape_csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn csv_response(filename_prefix: &str, csv_content: String) -> HttpResponse {
    let filename = format!(
        "{}_{}.csv",
        filename_prefix,
        Utc::now().format("%Y%m%d_%H%M%S")
    );
    HttpResponse::Ok()
        .insert_header(("Content-Type", "text/csv; charset=utf-8"))
        .insert_header(("Content-Disposition", format!("attachment; filename=\"{}\"", filename)))
        .body(csv_content)
}

// ==================== INVENTORY EXPORT ====================

pub async fn export_inventory(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_export_reports())?;
    let mut sql = String::from(
        "SELECT * FROM inventory_items WHERE deleted_at IS NULL"
    );
    let mut params: Vec<String> = Vec::new();

    if let Some(owner) = &query.owner_role {
        match owner.to_lowercase().as_str() {
            "bhw" | "bns" => {
                sql.push_str(" AND owner_role = ?");
                params.push(owner.to_lowercase());
            }
            other => {
                return Err(ApiError::BadRequest(format!(
                    "Unknown inventory collection '{}', expected 'bhw' or 'bns'", other
                )));
            }
        }
    }
    if let Some(status) = &query.status {
        sql.push_str(" AND status = ?");
        params.push(status.to_lowercase());
    }
    sql.push_str(" ORDER BY owner_role, item_name COLLATE NOCASE");

    let mut data_query = sqlx::query_as::<_, InventoryItem>(&sql);
    for param in &params {
        data_query = data_query.bind(param);
    }
    let items = data_query.fetch_all(&app_state.db_pool).await?;

    let mut csv_content = String::new();
    // BOM so Excel renders UTF-8 correctly
    csv_content.push('\u{FEFF}');
    csv_content.push_str("Item,Category,Quantity,Unit,Status,Collection,Expiry Date,Supplier\n");

    for item in &items {
        csv_content.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            escape_csv_field(&item.item_name),
            escape_csv_field(&item.category),
            item.quantity,
            escape_csv_field(&item.unit),
            item.status.as_str(),
            item.owner_role.as_str(),
            item.expiry_date.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default(),
            escape_csv_field(item.supplier.as_deref().unwrap_or("")),
        ));
    }

    Ok(csv_response("inventory", csv_content))
}

// ==================== ISSUANCE EXPORT ====================

pub async fn export_issuances(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_export_reports())?;

    #[derive(sqlx::FromRow)]
    struct IssuanceRow {
        item_name: String,
        movement: String,
        quantity: i64,
        unit: String,
        issued_to: Option<String>,
        purpose: Option<String>,
        username: Option<String>,
        created_at: chrono::DateTime<Utc>,
    }

    let mut sql = String::from(
        r#"SELECT i.item_name, l.movement, l.quantity, i.unit, l.issued_to, l.purpose,
                  u.username, l.created_at
           FROM issuance_logs l
           JOIN inventory_items i ON i.id = l.item_id
           LEFT JOIN users u ON u.id = l.user_id
           WHERE 1 = 1"#
    );
    let mut params: Vec<String> = Vec::new();

    if let Some(from) = &query.date_from {
        sql.push_str(" AND l.created_at >= ?");
        params.push(from.to_rfc3339());
    }
    if let Some(to) = &query.date_to {
        sql.push_str(" AND l.created_at <= ?");
        params.push(to.to_rfc3339());
    }
    sql.push_str(" ORDER BY l.created_at DESC");

    let mut data_query = sqlx::query_as::<_, IssuanceRow>(&sql);
    for param in &params {
        data_query = data_query.bind(param);
    }
    let rows = data_query.fetch_all(&app_state.db_pool).await?;

    let mut csv_content = String::new();
    csv_content.push('\u{FEFF}');
    csv_content.push_str("Date,Item,Movement,Quantity,Unit,Issued To,Purpose,Recorded By\n");

    for row in &rows {
        csv_content.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            row.created_at.format("%Y-%m-%d %H:%M"),
            escape_csv_field(&row.item_name),
            escape_csv_field(&row.movement),
            row.quantity,
            escape_csv_field(&row.unit),
            escape_csv_field(row.issued_to.as_deref().unwrap_or("")),
            escape_csv_field(row.purpose.as_deref().unwrap_or("")),
            escape_csv_field(row.username.as_deref().unwrap_or("")),
        ));
    }

    Ok(csv_response("issuances", csv_content))
}

// ==================== APPOINTMENT EXPORT ====================

pub async fn export_appointments(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_export_reports())?;
    let mut sql = String::from("SELECT * FROM appointments WHERE 1 = 1");
    let mut params: Vec<String> = Vec::new();

    if let Some(status) = &query.status {
        sql.push_str(" AND status = ?");
        params.push(status.to_lowercase());
    }
    if let Some(from) = &query.date_from {
        sql.push_str(" AND scheduled_at >= ?");
        params.push(from.to_rfc3339());
    }
    if let Some(to) = &query.date_to {
        sql.push_str(" AND scheduled_at <= ?");
        params.push(to.to_rfc3339());
    }
    sql.push_str(" ORDER BY scheduled_at ASC");

    let mut data_query = sqlx::query_as::<_, Appointment>(&sql);
    for param in &params {
        data_query = data_query.bind(param);
    }
    let appointments = data_query.fetch_all(&app_state.db_pool).await?;

    let mut csv_content = String::new();
    csv_content.push('\u{FEFF}');
    csv_content.push_str("Scheduled At,Purpose,Status,Notes\n");

    for appointment in &appointments {
        csv_content.push_str(&format!(
            "{},{},{},{}\n",
            appointment.scheduled_at.format("%Y-%m-%d %H:%M"),
            escape_csv_field(&appointment.purpose),
            appointment.status.as_str(),
            escape_csv_field(appointment.notes.as_deref().unwrap_or("")),
        ));
    }

    Ok(csv_response("appointments", csv_content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_csv_field() {
        assert_eq!(escape_csv_field("simple"), "simple");
        assert_eq!(escape_csv_field("with,comma"), "\"with,comma\"");
        assert_eq!(escape_csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_csv_field("line\nbreak"), "\"line\nbreak\"");
    }
}
