// src/stock.rs - Stock status pipeline shared by the BHW and BNS collections
//
// One pass over freshly fetched rows: classify quantity, diff against the
// stored status, patch rows optimistically, persist the diffs concurrently,
// and fan out alerts for rows that just degraded.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::InventoryConfig;
use crate::models::{InventoryItem, NotificationType, StockStatus};

// ==================== THRESHOLD CLASSIFIER ====================

#[derive(Debug, Clone, Copy)]
pub struct StockThresholds {
    pub critical: i64,
    pub low: i64,
}

impl Default for StockThresholds {
    fn default() -> Self {
        Self { critical: 10, low: 20 }
    }
}

impl From<&InventoryConfig> for StockThresholds {
    fn from(cfg: &InventoryConfig) -> Self {
        Self {
            critical: cfg.critical_threshold,
            low: cfg.low_threshold,
        }
    }
}

/// Map a quantity to its stock status. Boundaries are inclusive on the
/// severe side: quantity 10 is critical, 20 is low, 21 is normal.
/// Negative quantities are rejected at input time; here they classify
/// as critical by falling through the first branch.
pub fn classify(quantity: i64, thresholds: &StockThresholds) -> StockStatus {
    if quantity <= thresholds.critical {
        StockStatus::Critical
    } else if quantity <= thresholds.low {
        StockStatus::Low
    } else {
        StockStatus::Normal
    }
}

// ==================== STATUS RECONCILER ====================

#[derive(Debug, Clone)]
pub struct StatusTransition {
    pub item_id: String,
    pub item_name: String,
    pub quantity: i64,
    pub previous: StockStatus,
    pub expected: StockStatus,
}

impl StatusTransition {
    /// A transition alerts only when the row lands in degraded territory.
    /// Rows already sitting at low/critical from a prior pass produce no
    /// transition at all, and recoveries stay silent.
    pub fn is_degrading(&self) -> bool {
        self.expected.is_degraded() && self.expected != self.previous
    }

    pub fn message(&self) -> String {
        format!(
            "{} stock is {} ({} units left).",
            self.item_name,
            self.expected.as_str(),
            self.quantity
        )
    }
}

/// Diff each row's stored status against the classifier and patch the
/// in-memory copy so rendering does not wait on the writes. Returns the
/// rows that need a persisted update.
pub fn reconcile(
    items: &mut [InventoryItem],
    thresholds: &StockThresholds,
) -> Vec<StatusTransition> {
    let mut dirty = Vec::new();

    for item in items.iter_mut() {
        let expected = classify(item.quantity, thresholds);
        if expected != item.status {
            dirty.push(StatusTransition {
                item_id: item.id.clone(),
                item_name: item.item_name.clone(),
                quantity: item.quantity,
                previous: item.status,
                expected,
            });
            item.status = expected;
        }
    }

    dirty
}

// ==================== PERSISTENCE WRITER ====================

/// Persist the recomputed status for every dirty row, one update per row,
/// all in flight at once. Individual failures are logged and returned by
/// id; they never abort the pass.
pub async fn write_statuses(
    pool: &SqlitePool,
    transitions: &[StatusTransition],
) -> Vec<String> {
    let writes = transitions.iter().map(|t| async move {
        let result = sqlx::query(
            "UPDATE inventory_items SET status = ?, updated_at = datetime('now') WHERE id = ?"
        )
            .bind(t.expected.as_str())
            .bind(&t.item_id)
            .execute(pool)
            .await;

        match result {
            Ok(_) => None,
            Err(e) => {
                log::error!(
                    "Failed to persist status {} for item {}: {}",
                    t.expected, t.item_id, e
                );
                Some(t.item_id.clone())
            }
        }
    });

    join_all(writes).await.into_iter().flatten().collect()
}

// ==================== ALERT BUS ====================

#[derive(Debug, Clone, Serialize)]
pub struct Toast {
    pub id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Application-scoped transient toast list. Created at startup, consumed
/// by the toast endpoints, pruned by per-toast auto-dismiss timers.
pub struct AlertBus {
    toasts: Mutex<Vec<Toast>>,
    dismiss_after: Duration,
}

impl AlertBus {
    pub fn new(dismiss_after_seconds: u64) -> Arc<Self> {
        Arc::new(Self {
            toasts: Mutex::new(Vec::new()),
            dismiss_after: Duration::from_secs(dismiss_after_seconds),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Toast>> {
        self.toasts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish a toast unless an identical message is already visible.
    /// Returns false when the duplicate was suppressed.
    pub fn publish(self: &Arc<Self>, message: &str) -> bool {
        let toast = {
            let mut toasts = self.lock();
            if toasts.iter().any(|t| t.message == message) {
                return false;
            }
            let toast = Toast {
                id: Uuid::new_v4().to_string(),
                message: message.to_string(),
                created_at: Utc::now(),
            };
            toasts.push(toast.clone());
            toast
        };

        let bus = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(bus.dismiss_after).await;
            bus.dismiss(&toast.id);
        });

        true
    }

    pub fn dismiss(&self, toast_id: &str) -> bool {
        let mut toasts = self.lock();
        let before = toasts.len();
        toasts.retain(|t| t.id != toast_id);
        toasts.len() < before
    }

    pub fn active(&self) -> Vec<Toast> {
        self.lock().clone()
    }
}

// ==================== ALERT FAN-OUT ====================

#[derive(Debug, Default)]
pub struct FanOutSummary {
    pub toasts_shown: usize,
    pub toasts_deduplicated: usize,
    pub notifications_inserted: usize,
}

/// For every degrading transition: publish a toast (de-duplicated by
/// message text) and, when a user is present, insert a bell-icon
/// Notification record. The notification insert happens even when the
/// matching toast was suppressed as a duplicate.
pub async fn fan_out(
    pool: &SqlitePool,
    bus: &Arc<AlertBus>,
    user_id: Option<&str>,
    transitions: &[StatusTransition],
) -> FanOutSummary {
    let mut summary = FanOutSummary::default();

    for transition in transitions.iter().filter(|t| t.is_degrading()) {
        let message = transition.message();

        if bus.publish(&message) {
            summary.toasts_shown += 1;
        } else {
            summary.toasts_deduplicated += 1;
        }

        if let Some(user_id) = user_id {
            let result = sqlx::query(
                r#"INSERT INTO notifications (id, user_id, notif_type, message, is_read, created_at)
                   VALUES (?, ?, ?, ?, 0, ?)"#
            )
                .bind(Uuid::new_v4().to_string())
                .bind(user_id)
                .bind(NotificationType::InventoryAlert.as_str())
                .bind(&message)
                .bind(Utc::now())
                .execute(pool)
                .await;

            match result {
                Ok(_) => summary.notifications_inserted += 1,
                Err(e) => {
                    log::error!(
                        "Failed to insert inventory alert for item {}: {}",
                        transition.item_id, e
                    );
                }
            }
        }
    }

    summary
}

// ==================== PIPELINE ====================

#[derive(Debug, Default)]
pub struct PipelineReport {
    pub transitions: usize,
    pub failed_writes: Vec<String>,
    pub toasts_shown: usize,
    pub notifications_inserted: usize,
}

/// Run the full pass over a freshly fetched row set: reconcile, persist,
/// fan out. Rows whose write failed keep their optimistic status but are
/// flagged unsynced so callers can render the divergence.
pub async fn run_pipeline(
    pool: &SqlitePool,
    bus: &Arc<AlertBus>,
    thresholds: &StockThresholds,
    user_id: Option<&str>,
    items: &mut [InventoryItem],
) -> PipelineReport {
    let transitions = reconcile(items, thresholds);
    if transitions.is_empty() {
        return PipelineReport::default();
    }

    let failed_writes = write_statuses(pool, &transitions).await;
    for item in items.iter_mut() {
        if failed_writes.contains(&item.id) {
            item.unsynced = true;
        }
    }

    let summary = fan_out(pool, bus, user_id, &transitions).await;

    PipelineReport {
        transitions: transitions.len(),
        failed_writes,
        toasts_shown: summary.toasts_shown,
        notifications_inserted: summary.notifications_inserted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_migrations;
    use crate::models::OwnerRole;

    fn thresholds() -> StockThresholds {
        StockThresholds::default()
    }

    fn item(id: &str, name: &str, quantity: i64, status: StockStatus) -> InventoryItem {
        let now = Utc::now();
        InventoryItem {
            id: id.to_string(),
            item_name: name.to_string(),
            category: "Medicine".to_string(),
            quantity,
            unit: "pcs".to_string(),
            status,
            owner_role: OwnerRole::Bhw,
            expiry_date: None,
            supplier: None,
            deleted_at: None,
            created_by: None,
            updated_by: None,
            created_at: now,
            updated_at: now,
            unsynced: false,
        }
    }

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    async fn seed_user(pool: &SqlitePool, id: &str) {
        sqlx::query(
            r#"INSERT INTO users (id, username, email, password_hash, role, is_active,
               created_at, updated_at, failed_login_attempts)
               VALUES (?, ?, ?, 'x', 'bhw', 1, datetime('now'), datetime('now'), 0)"#
        )
            .bind(id)
            .bind(format!("user_{}", id))
            .bind(format!("{}@test.local", id))
            .execute(pool)
            .await
            .unwrap();
    }

    async fn seed_item(pool: &SqlitePool, row: &InventoryItem) {
        sqlx::query(
            r#"INSERT INTO inventory_items (id, item_name, category, quantity, unit,
               status, owner_role, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#
        )
            .bind(&row.id)
            .bind(&row.item_name)
            .bind(&row.category)
            .bind(row.quantity)
            .bind(&row.unit)
            .bind(row.status.as_str())
            .bind(row.owner_role.as_str())
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(pool)
            .await
            .unwrap();
    }

    async fn notification_count(pool: &SqlitePool) -> i64 {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notifications")
            .fetch_one(pool)
            .await
            .unwrap();
        row.0
    }

    #[test]
    fn test_boundary_exactness() {
        let t = thresholds();
        assert_eq!(classify(10, &t), StockStatus::Critical);
        assert_eq!(classify(11, &t), StockStatus::Low);
        assert_eq!(classify(20, &t), StockStatus::Low);
        assert_eq!(classify(21, &t), StockStatus::Normal);
        assert_eq!(classify(0, &t), StockStatus::Critical);
        assert_eq!(classify(-5, &t), StockStatus::Critical);
    }

    #[test]
    fn test_classify_monotonic() {
        let t = thresholds();
        for q1 in -5..60 {
            for q2 in (q1 + 1)..60 {
                assert!(
                    classify(q1, &t).severity() >= classify(q2, &t).severity(),
                    "severity must not increase with quantity ({} vs {})",
                    q1, q2
                );
            }
        }
    }

    #[test]
    fn test_custom_thresholds() {
        let t = StockThresholds { critical: 5, low: 50 };
        assert_eq!(classify(5, &t), StockStatus::Critical);
        assert_eq!(classify(6, &t), StockStatus::Low);
        assert_eq!(classify(50, &t), StockStatus::Low);
        assert_eq!(classify(51, &t), StockStatus::Normal);
    }

    #[test]
    fn test_reconcile_patches_and_stabilizes() {
        let t = thresholds();
        let mut items = vec![
            item("a", "Paracetamol", 8, StockStatus::Normal),
            item("b", "Amoxicillin", 15, StockStatus::Low),
            item("c", "Vitamin A", 100, StockStatus::Normal),
        ];

        let dirty = reconcile(&mut items, &t);
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].item_id, "a");
        assert_eq!(dirty[0].previous, StockStatus::Normal);
        assert_eq!(dirty[0].expected, StockStatus::Critical);
        // Optimistic local patch
        assert_eq!(items[0].status, StockStatus::Critical);

        // Second pass over the unchanged set is a no-op
        let dirty = reconcile(&mut items, &t);
        assert!(dirty.is_empty());
    }

    #[test]
    fn test_degrading_detection() {
        let degrade = StatusTransition {
            item_id: "a".to_string(),
            item_name: "Paracetamol".to_string(),
            quantity: 8,
            previous: StockStatus::Normal,
            expected: StockStatus::Critical,
        };
        assert!(degrade.is_degrading());
        assert_eq!(
            degrade.message(),
            "Paracetamol stock is critical (8 units left)."
        );

        let recover = StatusTransition {
            item_id: "b".to_string(),
            item_name: "Amoxicillin".to_string(),
            quantity: 25,
            previous: StockStatus::Critical,
            expected: StockStatus::Normal,
        };
        assert!(!recover.is_degrading());
    }

    #[tokio::test]
    async fn test_toast_dedup_and_dismiss() {
        let bus = AlertBus::new(60);
        assert!(bus.publish("Paracetamol stock is critical (8 units left)."));
        assert!(!bus.publish("Paracetamol stock is critical (8 units left)."));
        assert!(bus.publish("Amoxicillin stock is low (15 units left)."));

        let active = bus.active();
        assert_eq!(active.len(), 2);

        assert!(bus.dismiss(&active[0].id));
        assert!(!bus.dismiss(&active[0].id));
        assert_eq!(bus.active().len(), 1);
    }

    #[tokio::test]
    async fn test_toast_auto_dismiss() {
        tokio::time::pause();
        let bus = AlertBus::new(5);
        bus.publish("Paracetamol stock is critical (8 units left).");
        assert_eq!(bus.active().len(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert!(bus.active().is_empty());
    }

    #[tokio::test]
    async fn test_fan_out_dedups_toasts_but_not_notifications() {
        let pool = test_pool().await;
        seed_user(&pool, "u1").await;
        let bus = AlertBus::new(60);

        // Two rows degrading with identical message text
        let transitions = vec![
            StatusTransition {
                item_id: "a".to_string(),
                item_name: "Paracetamol".to_string(),
                quantity: 8,
                previous: StockStatus::Normal,
                expected: StockStatus::Critical,
            },
            StatusTransition {
                item_id: "b".to_string(),
                item_name: "Paracetamol".to_string(),
                quantity: 8,
                previous: StockStatus::Low,
                expected: StockStatus::Critical,
            },
        ];

        let summary = fan_out(&pool, &bus, Some("u1"), &transitions).await;
        assert_eq!(summary.toasts_shown, 1);
        assert_eq!(summary.toasts_deduplicated, 1);
        assert_eq!(summary.notifications_inserted, 2);
        assert_eq!(bus.active().len(), 1);
        assert_eq!(notification_count(&pool).await, 2);
    }

    #[tokio::test]
    async fn test_fan_out_skips_notifications_without_user() {
        let pool = test_pool().await;
        let bus = AlertBus::new(60);

        let transitions = vec![StatusTransition {
            item_id: "a".to_string(),
            item_name: "Paracetamol".to_string(),
            quantity: 8,
            previous: StockStatus::Normal,
            expected: StockStatus::Critical,
        }];

        let summary = fan_out(&pool, &bus, None, &transitions).await;
        assert_eq!(summary.toasts_shown, 1);
        assert_eq!(summary.notifications_inserted, 0);
        assert_eq!(notification_count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_pipeline_degradation_end_to_end() {
        let pool = test_pool().await;
        seed_user(&pool, "u1").await;
        let bus = AlertBus::new(60);
        let t = thresholds();

        let mut items = vec![item("1", "Paracetamol", 8, StockStatus::Normal)];
        seed_item(&pool, &items[0]).await;

        let report = run_pipeline(&pool, &bus, &t, Some("u1"), &mut items).await;
        assert_eq!(report.transitions, 1);
        assert!(report.failed_writes.is_empty());
        assert_eq!(report.toasts_shown, 1);
        assert_eq!(report.notifications_inserted, 1);

        assert_eq!(items[0].status, StockStatus::Critical);
        assert!(!items[0].unsynced);

        let stored: (String,) =
            sqlx::query_as("SELECT status FROM inventory_items WHERE id = '1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(stored.0, "critical");

        let toasts = bus.active();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].message, "Paracetamol stock is critical (8 units left).");

        let notif: (String, String) = sqlx::query_as(
            "SELECT notif_type, message FROM notifications WHERE user_id = 'u1'"
        )
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(notif.0, "inventory_alert");
        assert_eq!(notif.1, "Paracetamol stock is critical (8 units left).");
    }

    #[tokio::test]
    async fn test_pipeline_already_degraded_is_silent() {
        let pool = test_pool().await;
        seed_user(&pool, "u1").await;
        let bus = AlertBus::new(60);
        let t = thresholds();

        let mut items = vec![item("1", "Paracetamol", 5, StockStatus::Critical)];
        seed_item(&pool, &items[0]).await;

        let report = run_pipeline(&pool, &bus, &t, Some("u1"), &mut items).await;
        assert_eq!(report.transitions, 0);
        assert_eq!(report.toasts_shown, 0);
        assert!(bus.active().is_empty());
        assert_eq!(notification_count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_pipeline_recovery_writes_without_alerting() {
        let pool = test_pool().await;
        seed_user(&pool, "u1").await;
        let bus = AlertBus::new(60);
        let t = thresholds();

        let mut items = vec![item("1", "Paracetamol", 25, StockStatus::Critical)];
        seed_item(&pool, &items[0]).await;

        let report = run_pipeline(&pool, &bus, &t, Some("u1"), &mut items).await;
        assert_eq!(report.transitions, 1);
        assert!(report.failed_writes.is_empty());
        assert_eq!(report.toasts_shown, 0);
        assert_eq!(report.notifications_inserted, 0);

        let stored: (String,) =
            sqlx::query_as("SELECT status FROM inventory_items WHERE id = '1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(stored.0, "normal");
        assert!(bus.active().is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_keeps_optimistic_status_on_write_failure() {
        let pool = test_pool().await;
        let bus = AlertBus::new(60);
        let t = thresholds();

        let mut items = vec![item("1", "Paracetamol", 8, StockStatus::Normal)];
        // Row never seeded and pool closed, so the write cannot land
        pool.close().await;

        let report = run_pipeline(&pool, &bus, &t, None, &mut items).await;
        assert_eq!(report.transitions, 1);
        assert_eq!(report.failed_writes, vec!["1".to_string()]);

        // Optimistic patch survives the failed write and is flagged
        assert_eq!(items[0].status, StockStatus::Critical);
        assert!(items[0].unsynced);
        // The toast path still fires
        assert_eq!(bus.active().len(), 1);
    }
}
