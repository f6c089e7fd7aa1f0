// src/activity.rs - Activity (audit) logging helpers

use sqlx::SqlitePool;
use uuid::Uuid;
use chrono::Utc;
use actix_web::HttpRequest;

/// Write an event to activity_logs
pub async fn log_activity(
    pool: &SqlitePool,
    user_id: Option<&str>,
    action: &str,
    details: Option<&str>,
    request: Option<&HttpRequest>,
) -> Result<(), sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    let ip_address = request.and_then(|req| {
        req.connection_info()
            .realip_remote_addr()
            .map(|s| s.to_string())
    });

    let user_agent = request.and_then(|req| {
        req.headers()
            .get("User-Agent")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    });

    sqlx::query(
        r#"INSERT INTO activity_logs
           (id, user_id, action, details, ip_address, user_agent, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#
    )
    .bind(&id)
    .bind(user_id)
    .bind(action)
    .bind(details)
    .bind(&ip_address)
    .bind(&user_agent)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Short version for frequent call sites. Failures are logged, never fatal.
pub async fn record(
    pool: &SqlitePool,
    user_id: &str,
    action: &str,
    details: &str,
    request: &HttpRequest,
) {
    if let Err(e) = log_activity(
        pool,
        Some(user_id),
        action,
        Some(details),
        Some(request),
    ).await {
        log::error!("Failed to write activity log: {}", e);
    }
}

// ==================== CHANGE SET ====================

/// Accumulates field-level changes for a human-readable audit description.
#[derive(Debug, Default)]
pub struct ChangeSet {
    entries: Vec<String>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn created(&mut self, field: &str, value: &str) {
        self.entries.push(format!("{} = '{}'", field, value));
    }

    pub fn deleted(&mut self, field: &str, value: &str) {
        self.entries.push(format!("{} was '{}'", field, value));
    }

    pub fn add(&mut self, field: &str, old: &str, new: &str) {
        if old != new {
            self.entries.push(format!("{}: '{}' -> '{}'", field, old, new));
        }
    }

    pub fn add_opt(&mut self, field: &str, old: &Option<String>, new: &Option<String>) {
        if old != new {
            self.entries.push(format!(
                "{}: '{}' -> '{}'",
                field,
                old.as_deref().unwrap_or("-"),
                new.as_deref().unwrap_or("-"),
            ));
        }
    }

    pub fn add_i64(&mut self, field: &str, old: i64, new: i64) {
        if old != new {
            self.entries.push(format!("{}: {} -> {}", field, old, new));
        }
    }

    pub fn add_opt_f64(&mut self, field: &str, old: Option<f64>, new: Option<f64>) {
        if old != new {
            let fmt = |v: Option<f64>| v.map_or("-".to_string(), |x| format!("{}", x));
            self.entries.push(format!("{}: {} -> {}", field, fmt(old), fmt(new)));
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn to_description(&self) -> String {
        self.entries.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changeset_skips_unchanged() {
        let mut cs = ChangeSet::new();
        cs.add("name", "Paracetamol", "Paracetamol");
        cs.add_i64("quantity", 10, 10);
        assert!(!cs.has_changes());

        cs.add_i64("quantity", 10, 30);
        assert!(cs.has_changes());
        assert_eq!(cs.to_description(), "quantity: 10 -> 30");
    }

    #[test]
    fn test_changeset_description() {
        let mut cs = ChangeSet::new();
        cs.created("item_name", "Amoxicillin");
        cs.add_opt("supplier", &None, &Some("DOH".to_string()));
        assert_eq!(
            cs.to_description(),
            "item_name = 'Amoxicillin', supplier: '-' -> 'DOH'"
        );
    }
}
