// src/db.rs - Database migrations and setup

use sqlx::SqlitePool;
use anyhow::Result;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Enable foreign keys and WAL mode
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await?;

    // Create users table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE CHECK(length(username) >= 3 AND length(username) <= 50),
            email TEXT NOT NULL UNIQUE CHECK(length(email) >= 5 AND length(email) <= 255),
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'bhw' CHECK(
                role IN ('admin', 'bhw', 'bns', 'midwife')
            ),
            is_active INTEGER NOT NULL DEFAULT 1 CHECK(is_active IN (0, 1)),
            last_login DATETIME,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            failed_login_attempts INTEGER NOT NULL DEFAULT 0,
            locked_until DATETIME
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Create patients table (maternal program records)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS patients (
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL CHECK(length(first_name) > 0 AND length(first_name) <= 100),
            last_name TEXT NOT NULL CHECK(length(last_name) > 0 AND length(last_name) <= 100),
            birth_date DATE NOT NULL,
            address TEXT CHECK(address IS NULL OR length(address) <= 500),
            contact_number TEXT CHECK(contact_number IS NULL OR length(contact_number) <= 20),
            created_by TEXT,
            updated_by TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (created_by) REFERENCES users (id),
            FOREIGN KEY (updated_by) REFERENCES users (id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Create children table (nutrition program records)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS children (
            id TEXT PRIMARY KEY,
            patient_id TEXT NOT NULL,
            name TEXT NOT NULL CHECK(length(name) > 0 AND length(name) <= 200),
            sex TEXT NOT NULL CHECK(sex IN ('male', 'female')),
            birth_date DATE NOT NULL,
            weight_kg REAL CHECK(weight_kg IS NULL OR weight_kg >= 0),
            height_cm REAL CHECK(height_cm IS NULL OR height_cm >= 0),
            nutrition_notes TEXT CHECK(nutrition_notes IS NULL OR length(nutrition_notes) <= 1000),
            created_by TEXT,
            updated_by TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (patient_id) REFERENCES patients (id) ON DELETE CASCADE,
            FOREIGN KEY (created_by) REFERENCES users (id),
            FOREIGN KEY (updated_by) REFERENCES users (id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Create inventory_items table (medicines and vaccines, per program)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS inventory_items (
            id TEXT PRIMARY KEY,
            item_name TEXT NOT NULL CHECK(length(item_name) > 0 AND length(item_name) <= 255),
            category TEXT NOT NULL CHECK(length(category) > 0 AND length(category) <= 100),
            quantity INTEGER NOT NULL CHECK(quantity >= 0),
            unit TEXT NOT NULL CHECK(length(unit) > 0 AND length(unit) <= 20),
            status TEXT NOT NULL DEFAULT 'normal' CHECK(
                status IN ('normal', 'low', 'critical')
            ),
            owner_role TEXT NOT NULL CHECK(owner_role IN ('bhw', 'bns')),
            expiry_date DATE,
            supplier TEXT CHECK(supplier IS NULL OR length(supplier) <= 255),
            deleted_at DATETIME,
            created_by TEXT,
            updated_by TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (created_by) REFERENCES users (id),
            FOREIGN KEY (updated_by) REFERENCES users (id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Create issuance_logs table (refill and issuance trail, RIS)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS issuance_logs (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            user_id TEXT,
            quantity INTEGER NOT NULL CHECK(quantity > 0),
            movement TEXT NOT NULL CHECK(movement IN ('refill', 'issue')),
            issued_to TEXT CHECK(issued_to IS NULL OR length(issued_to) <= 255),
            purpose TEXT CHECK(purpose IS NULL OR length(purpose) <= 500),
            created_at DATETIME NOT NULL,
            FOREIGN KEY (item_id) REFERENCES inventory_items (id) ON DELETE CASCADE,
            FOREIGN KEY (user_id) REFERENCES users (id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Create appointments table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS appointments (
            id TEXT PRIMARY KEY,
            patient_id TEXT NOT NULL,
            scheduled_at DATETIME NOT NULL,
            purpose TEXT NOT NULL CHECK(length(purpose) > 0 AND length(purpose) <= 255),
            status TEXT NOT NULL DEFAULT 'scheduled' CHECK(
                status IN ('scheduled', 'completed', 'cancelled', 'missed')
            ),
            notes TEXT CHECK(notes IS NULL OR length(notes) <= 1000),
            reminder_sent INTEGER NOT NULL DEFAULT 0 CHECK(reminder_sent IN (0, 1)),
            created_by TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (patient_id) REFERENCES patients (id) ON DELETE CASCADE,
            FOREIGN KEY (created_by) REFERENCES users (id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Create notifications table (bell-icon history)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notifications (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            notif_type TEXT NOT NULL CHECK(
                notif_type IN ('inventory_alert', 'appointment_reminder', 'follow_up', 'user_request')
            ),
            message TEXT NOT NULL CHECK(length(message) > 0 AND length(message) <= 1000),
            is_read INTEGER NOT NULL DEFAULT 0 CHECK(is_read IN (0, 1)),
            created_at DATETIME NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Create activity_logs table (append-only audit trail)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS activity_logs (
            id TEXT PRIMARY KEY,
            user_id TEXT,
            action TEXT NOT NULL,
            details TEXT,
            ip_address TEXT,
            user_agent TEXT,
            created_at DATETIME NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users (id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    // ==================== CREATE INDEXES ====================

    // Names are unique per collection among live rows only, so the recycle
    // bin never blocks re-creating an item
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_inventory_name_owner_live
         ON inventory_items(item_name, owner_role) WHERE deleted_at IS NULL"
    )
        .execute(pool).await?;

    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_inventory_owner ON inventory_items(owner_role)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_inventory_status ON inventory_items(status)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_inventory_category ON inventory_items(category)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_inventory_deleted ON inventory_items(deleted_at)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_inventory_expiry ON inventory_items(expiry_date)")
        .execute(pool).await;

    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_issuance_item ON issuance_logs(item_id)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_issuance_user ON issuance_logs(user_id)")
        .execute(pool).await;

    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_children_patient ON children(patient_id)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_patients_last_name ON patients(last_name)")
        .execute(pool).await;

    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_appointments_patient ON appointments(patient_id)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_appointments_status ON appointments(status)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_appointments_scheduled ON appointments(scheduled_at)")
        .execute(pool).await;

    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_notifications_read ON notifications(is_read)")
        .execute(pool).await;

    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_activity_user ON activity_logs(user_id)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_activity_created ON activity_logs(created_at)")
        .execute(pool).await;

    // Run migrations for existing tables
    migrate_existing_tables(pool).await?;

    Ok(())
}

// ==================== MIGRATION FOR EXISTING DATABASES ====================

pub async fn migrate_existing_tables(pool: &SqlitePool) -> Result<()> {
    // Add new columns to existing tables if they don't exist
    let migration_queries = [
        // ==================== USERS ====================
        "ALTER TABLE users ADD COLUMN failed_login_attempts INTEGER NOT NULL DEFAULT 0",
        "ALTER TABLE users ADD COLUMN locked_until DATETIME",

        // ==================== INVENTORY ====================
        "ALTER TABLE inventory_items ADD COLUMN supplier TEXT CHECK(supplier IS NULL OR length(supplier) <= 255)",
        "ALTER TABLE inventory_items ADD COLUMN expiry_date DATE",
        "ALTER TABLE inventory_items ADD COLUMN deleted_at DATETIME",
        "ALTER TABLE inventory_items ADD COLUMN created_by TEXT",
        "ALTER TABLE inventory_items ADD COLUMN updated_by TEXT",

        // ==================== APPOINTMENTS ====================
        "ALTER TABLE appointments ADD COLUMN reminder_sent INTEGER NOT NULL DEFAULT 0 CHECK(reminder_sent IN (0, 1))",
        "ALTER TABLE appointments ADD COLUMN notes TEXT CHECK(notes IS NULL OR length(notes) <= 1000)",
    ];

    for query in migration_queries.iter() {
        // Ignore errors for existing columns
        let _ = sqlx::query(query).execute(pool).await;
    }

    Ok(())
}

// ==================== DATABASE RESET (DEVELOPMENT ONLY) ====================

pub async fn reset_database(pool: &SqlitePool) -> Result<()> {
    log::warn!("Resetting database - all data will be lost!");

    let drop_queries = [
        "DROP TABLE IF EXISTS activity_logs",
        "DROP TABLE IF EXISTS notifications",
        "DROP TABLE IF EXISTS appointments",
        "DROP TABLE IF EXISTS issuance_logs",
        "DROP TABLE IF EXISTS inventory_items",
        "DROP TABLE IF EXISTS children",
        "DROP TABLE IF EXISTS patients",
        "DROP TABLE IF EXISTS users",
    ];

    for query in drop_queries.iter() {
        let _ = sqlx::query(query).execute(pool).await;
    }

    // Recreate tables
    run_migrations(pool).await?;

    Ok(())
}
