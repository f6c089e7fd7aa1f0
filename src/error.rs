use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    InternalServerError(String),
    ValidationError(String),
    DatabaseError(sqlx::Error),
    AuthError(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::InternalServerError(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
            ApiError::DatabaseError(err) => write!(f, "Database Error: {}", err),
            ApiError::AuthError(msg) => write!(f, "Auth Error: {}", msg),
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let error_response = ErrorResponse {
            success: false,
            message: self.to_string(),
        };

        match self {
            ApiError::BadRequest(_) => HttpResponse::BadRequest().json(error_response),
            ApiError::NotFound(_) => HttpResponse::NotFound().json(error_response),
            ApiError::Unauthorized(_) => HttpResponse::Unauthorized().json(error_response),
            ApiError::Forbidden(_) => HttpResponse::Forbidden().json(error_response),
            ApiError::ValidationError(_) => HttpResponse::UnprocessableEntity().json(error_response),
            ApiError::DatabaseError(_) => HttpResponse::InternalServerError().json(error_response),
            ApiError::AuthError(_) => HttpResponse::Unauthorized().json(error_response),
            ApiError::InternalServerError(_) => HttpResponse::InternalServerError().json(error_response),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

// Domain-specific errors
impl ApiError {
    pub fn item_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Inventory item with ID '{}' not found", id))
    }

    pub fn patient_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Patient with ID '{}' not found", id))
    }

    pub fn child_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Child record with ID '{}' not found", id))
    }

    pub fn appointment_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Appointment with ID '{}' not found", id))
    }

    pub fn notification_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Notification with ID '{}' not found", id))
    }

    pub fn item_already_exists(name: &str, owner: &str) -> Self {
        ApiError::BadRequest(format!(
            "Inventory item '{}' already exists in the {} collection",
            name, owner
        ))
    }

    pub fn insufficient_stock(available: i64, requested: i64) -> Self {
        ApiError::BadRequest(format!(
            "Insufficient stock. Available: {}, Requested: {}",
            available, requested
        ))
    }

    pub fn item_deleted(id: &str) -> Self {
        ApiError::BadRequest(format!(
            "Inventory item '{}' is in the recycle bin and cannot be modified",
            id
        ))
    }
}

// Field validation helpers
pub fn validate_quantity(quantity: i64) -> Result<(), ApiError> {
    if quantity < 0 {
        return Err(ApiError::ValidationError("Quantity cannot be negative".to_string()));
    }
    if quantity > 1_000_000 {
        return Err(ApiError::ValidationError("Quantity too large".to_string()));
    }
    Ok(())
}

pub fn validate_unit(unit: &str) -> Result<(), ApiError> {
    let valid_units = ["pcs", "bottles", "boxes", "vials", "sachets", "tablets", "ampoules", "packs"];
    if !valid_units.contains(&unit) {
        return Err(ApiError::ValidationError(format!(
            "Invalid unit '{}'. Valid units: {}",
            unit,
            valid_units.join(", ")
        )));
    }
    Ok(())
}
