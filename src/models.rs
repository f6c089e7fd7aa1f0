// src/models.rs
//! Data models for the barangay health center service.
//!
//! Every record fetched from the database decodes into one of these typed
//! structs, so the stock pipeline and handlers never operate on loosely
//! shaped rows.

use serde::{Serialize, Deserialize};
use validator::Validate;
use chrono::{DateTime, NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use strum::{Display, EnumString};

lazy_static! {
    /// Philippine mobile numbers: 09XXXXXXXXX or +639XXXXXXXXX.
    pub static ref CONTACT_NUMBER_RE: Regex = Regex::new(r"^(09|\+639)\d{9}$").unwrap();
}

// ==================== STOCK STATUS ====================

/// Stock level classification for an inventory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Display, EnumString)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StockStatus {
    Normal,
    Low,
    Critical,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::Normal => "normal",
            StockStatus::Low => "low",
            StockStatus::Critical => "critical",
        }
    }

    /// Ordering used by the alert rules: Critical > Low > Normal.
    pub fn severity(&self) -> u8 {
        match self {
            StockStatus::Normal => 0,
            StockStatus::Low => 1,
            StockStatus::Critical => 2,
        }
    }

    /// Only Low and Critical raise alerts.
    pub fn is_degraded(&self) -> bool {
        matches!(self, StockStatus::Low | StockStatus::Critical)
    }
}

// ==================== OWNER ROLE ====================

/// Which program an inventory row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Display, EnumString)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OwnerRole {
    Bhw,
    Bns,
}

impl OwnerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerRole::Bhw => "bhw",
            OwnerRole::Bns => "bns",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            OwnerRole::Bhw => "Barangay Health Worker",
            OwnerRole::Bns => "Barangay Nutrition Scholar",
        }
    }
}

// ==================== NOTIFICATION TYPE ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Display, EnumString)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationType {
    InventoryAlert,
    AppointmentReminder,
    FollowUp,
    UserRequest,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::InventoryAlert => "inventory_alert",
            NotificationType::AppointmentReminder => "appointment_reminder",
            NotificationType::FollowUp => "follow_up",
            NotificationType::UserRequest => "user_request",
        }
    }
}

// ==================== APPOINTMENT STATUS ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Display, EnumString)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
    Missed,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Missed => "missed",
        }
    }
}

// ==================== INVENTORY ITEM ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct InventoryItem {
    pub id: String,
    pub item_name: String,
    pub category: String,
    pub quantity: i64,
    pub unit: String,
    pub status: StockStatus,
    pub owner_role: OwnerRole,
    pub expiry_date: Option<NaiveDate>,
    pub supplier: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// True when the last status write for this row failed, so the
    /// rendered status is ahead of what the database holds.
    #[sqlx(default)]
    #[serde(default)]
    pub unsynced: bool,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateInventoryItemRequest {
    #[validate(length(min = 1, max = 255, message = "Item name must be between 1 and 255 characters"))]
    pub item_name: String,

    #[validate(length(min = 1, max = 100, message = "Category must be between 1 and 100 characters"))]
    pub category: String,

    #[validate(range(min = 0, message = "Quantity must be non-negative"))]
    pub quantity: i64,

    #[validate(length(min = 1, max = 20, message = "Unit must be between 1 and 20 characters"))]
    pub unit: String,

    pub owner_role: OwnerRole,

    pub expiry_date: Option<NaiveDate>,

    #[validate(length(max = 255, message = "Supplier cannot exceed 255 characters"))]
    pub supplier: Option<String>,
}

/// Deserializes a present field (including an explicit null) as `Some`,
/// so updates can tell "leave unchanged" apart from "clear this value".
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    serde::Deserialize::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateInventoryItemRequest {
    #[validate(length(min = 1, max = 255, message = "Item name must be between 1 and 255 characters"))]
    pub item_name: Option<String>,

    #[validate(length(min = 1, max = 100, message = "Category must be between 1 and 100 characters"))]
    pub category: Option<String>,

    #[validate(range(min = 0, message = "Quantity must be non-negative"))]
    pub quantity: Option<i64>,

    #[validate(length(min = 1, max = 20, message = "Unit must be between 1 and 20 characters"))]
    pub unit: Option<String>,

    // Absent keeps the stored value, explicit null clears it
    #[serde(default, deserialize_with = "double_option")]
    pub expiry_date: Option<Option<NaiveDate>>,

    #[serde(default, deserialize_with = "double_option")]
    pub supplier: Option<Option<String>>,
}

/// Quantity delta for refill and issuance operations.
#[derive(Debug, Deserialize, Validate)]
pub struct StockMovementRequest {
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i64,

    #[validate(length(max = 255, message = "Recipient cannot exceed 255 characters"))]
    pub issued_to: Option<String>,

    #[validate(length(max = 500, message = "Purpose cannot exceed 500 characters"))]
    pub purpose: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct IssuanceLog {
    pub id: String,
    pub item_id: String,
    pub user_id: Option<String>,
    pub quantity: i64,
    pub movement: String,
    pub issued_to: Option<String>,
    pub purpose: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ==================== PATIENT ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Patient {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub birth_date: NaiveDate,
    pub address: Option<String>,
    pub contact_number: Option<String>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreatePatientRequest {
    #[validate(length(min = 1, max = 100, message = "First name must be between 1 and 100 characters"))]
    pub first_name: String,

    #[validate(length(min = 1, max = 100, message = "Last name must be between 1 and 100 characters"))]
    pub last_name: String,

    pub birth_date: NaiveDate,

    #[validate(length(max = 500, message = "Address cannot exceed 500 characters"))]
    pub address: Option<String>,

    #[validate(regex(path = *CONTACT_NUMBER_RE, message = "Invalid contact number"))]
    pub contact_number: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePatientRequest {
    #[validate(length(min = 1, max = 100, message = "First name must be between 1 and 100 characters"))]
    pub first_name: Option<String>,

    #[validate(length(min = 1, max = 100, message = "Last name must be between 1 and 100 characters"))]
    pub last_name: Option<String>,

    pub birth_date: Option<NaiveDate>,

    #[validate(length(max = 500, message = "Address cannot exceed 500 characters"))]
    pub address: Option<String>,

    #[validate(regex(path = *CONTACT_NUMBER_RE, message = "Invalid contact number"))]
    pub contact_number: Option<String>,
}

// ==================== CHILD RECORD ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct ChildRecord {
    pub id: String,
    pub patient_id: String,
    pub name: String,
    pub sex: String,
    pub birth_date: NaiveDate,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub nutrition_notes: Option<String>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateChildRequest {
    pub patient_id: String,

    #[validate(length(min = 1, max = 200, message = "Name must be between 1 and 200 characters"))]
    pub name: String,

    #[validate(length(min = 1, max = 10, message = "Sex must be provided"))]
    pub sex: String,

    pub birth_date: NaiveDate,

    #[validate(range(min = 0.0, max = 200.0, message = "Weight must be between 0 and 200 kg"))]
    pub weight_kg: Option<f64>,

    #[validate(range(min = 0.0, max = 250.0, message = "Height must be between 0 and 250 cm"))]
    pub height_cm: Option<f64>,

    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub nutrition_notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateChildRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be between 1 and 200 characters"))]
    pub name: Option<String>,

    #[validate(length(min = 1, max = 10, message = "Sex must be provided"))]
    pub sex: Option<String>,

    pub birth_date: Option<NaiveDate>,

    #[validate(range(min = 0.0, max = 200.0, message = "Weight must be between 0 and 200 kg"))]
    pub weight_kg: Option<f64>,

    #[validate(range(min = 0.0, max = 250.0, message = "Height must be between 0 and 250 cm"))]
    pub height_cm: Option<f64>,

    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub nutrition_notes: Option<String>,
}

// ==================== APPOINTMENT ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Appointment {
    pub id: String,
    pub patient_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub purpose: String,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub reminder_sent: bool,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateAppointmentRequest {
    pub patient_id: String,

    pub scheduled_at: DateTime<Utc>,

    #[validate(length(min = 1, max = 255, message = "Purpose must be between 1 and 255 characters"))]
    pub purpose: String,

    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateAppointmentRequest {
    pub scheduled_at: Option<DateTime<Utc>>,

    #[validate(length(min = 1, max = 255, message = "Purpose must be between 1 and 255 characters"))]
    pub purpose: Option<String>,

    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub notes: Option<String>,
}

// ==================== NOTIFICATION ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub notif_type: NotificationType,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

// ==================== ACTIVITY LOG ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActivityLogEntry {
    pub id: String,
    pub user_id: Option<String>,
    pub action: String,
    pub details: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_status_roundtrip() {
        assert_eq!(StockStatus::Critical.as_str(), "critical");
        assert_eq!(StockStatus::Low.to_string(), "low");
        assert_eq!("normal".parse::<StockStatus>().unwrap(), StockStatus::Normal);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(StockStatus::Critical.severity() > StockStatus::Low.severity());
        assert!(StockStatus::Low.severity() > StockStatus::Normal.severity());
        assert!(StockStatus::Critical.is_degraded());
        assert!(StockStatus::Low.is_degraded());
        assert!(!StockStatus::Normal.is_degraded());
    }

    #[test]
    fn test_update_request_absent_vs_null() {
        let keep: UpdateInventoryItemRequest =
            serde_json::from_str(r#"{"quantity": 5}"#).unwrap();
        assert_eq!(keep.supplier, None);
        assert_eq!(keep.expiry_date, None);

        let clear: UpdateInventoryItemRequest =
            serde_json::from_str(r#"{"supplier": null, "expiry_date": null}"#).unwrap();
        assert_eq!(clear.supplier, Some(None));
        assert_eq!(clear.expiry_date, Some(None));

        let set: UpdateInventoryItemRequest =
            serde_json::from_str(r#"{"supplier": "Provincial DOH"}"#).unwrap();
        assert_eq!(set.supplier, Some(Some("Provincial DOH".to_string())));
    }

    #[test]
    fn test_contact_number_pattern() {
        assert!(CONTACT_NUMBER_RE.is_match("09171234567"));
        assert!(CONTACT_NUMBER_RE.is_match("+639171234567"));
        assert!(!CONTACT_NUMBER_RE.is_match("12345"));
        assert!(!CONTACT_NUMBER_RE.is_match("0917123456"));
    }
}
