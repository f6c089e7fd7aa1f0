use actix_web::{
    middleware::{Logger, DefaultHeaders, Compress},
    web, App, HttpServer,
};
use actix_web_httpauth::middleware::HttpAuthentication;
use actix_web::http::header;
use actix_cors::Cors;
use std::env;
use std::sync::Arc;

use rand::{thread_rng, distributions::Alphanumeric};
use rand::distributions::Distribution;
use rand::seq::SliceRandom;
use sqlx::{sqlite::SqliteConnectOptions, migrate::MigrateDatabase, Sqlite, SqlitePool};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod activity;
mod appointment_handlers;
mod auth;
mod auth_handlers;
mod child_handlers;
mod config;
mod db;
mod error;
mod handlers;
mod inventory_handlers;
mod models;
mod monitoring;
mod notification_handlers;
mod patient_handlers;
mod report_handlers;
mod stock;

use crate::auth::{jwt_middleware, AuthService};
use crate::config::{load_config, Config};
use crate::monitoring::{Metrics, RequestLogger, start_maintenance_tasks};
use crate::stock::AlertBus;

pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Config,
    pub alert_bus: Arc<AlertBus>,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    setup_logging(&config)?;
    config.print_startup_info();

    if config.is_production() {
        validate_production_config(&config)?;
    }

    setup_database(&config.database.url).await?;
    let pool = create_database_pool(&config.database).await?;
    db::run_migrations(&pool).await?;

    let auth_service = Arc::new(AuthService::new(
        &config.auth.jwt_secret,
        config.auth.token_expiration_hours,
    ));

    create_default_admin_if_needed(&pool, &auth_service).await?;

    let alert_bus = AlertBus::new(config.inventory.toast_dismiss_seconds);

    let app_state = Arc::new(AppState {
        db_pool: pool.clone(),
        config: config.clone(),
        alert_bus,
    });

    let maintenance_pool = pool.clone();
    tokio::spawn(async move {
        start_maintenance_tasks(maintenance_pool).await;
    });

    // Appointment reminder sweeper: every 15 minutes, turn appointments
    // inside the 24-hour window into bell-icon notifications.
    let reminder_pool = pool.clone();
    tokio::spawn(async move {
        use tokio::time::{interval, sleep, Duration};

        sleep(Duration::from_secs(5)).await; // let the server come up first
        log::info!("Appointment reminder sweeper started (15 minute interval)");

        let mut ticker = interval(Duration::from_secs(15 * 60));
        loop {
            ticker.tick().await;
            match appointment_handlers::sweep_reminders(&reminder_pool).await {
                Ok(sent) if sent > 0 => log::info!("Sent {} appointment reminder(s)", sent),
                Ok(_) => {}
                Err(e) => log::error!("Reminder sweep failed: {}", e),
            }
        }
    });

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    log::info!("Starting server at http://{}", bind_address);

    let metrics_arc = Arc::new(Metrics::new());
    let metrics = web::Data::from(metrics_arc.clone());
    let workers = config.server.workers;

    let server = HttpServer::new(move || {
        let cors = setup_cors(&config.security.allowed_origins, config.is_production());
        let auth_middleware = HttpAuthentication::bearer(jwt_middleware);
        let security_headers = setup_security_headers(&config.security);

        App::new()
            .wrap(cors)
            .wrap(security_headers)
            .wrap(Logger::default())
            .wrap(Compress::default())
            .wrap(RequestLogger::new(metrics_arc.clone()))
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(pool.clone()))
            .app_data(metrics.clone())

            // Health and metrics (no auth)
            .service(
                web::scope("/health")
                    .route("", web::get().to(handlers::health_check))
                    .route("/ready", web::get().to(monitoring::readiness_check))
                    .route("/live", web::get().to(monitoring::liveness_check))
                    .route("/metrics", web::get().to(monitoring::metrics_endpoint))
            )

            // Login (no auth)
            .service(
                web::scope("/auth")
                    .route("/login", web::post().to(auth_handlers::login))
            )

            // Protected API
            .service(
                web::scope("/api/v1")
                    .wrap(auth_middleware)

                    // Auth and user management
                    .service(
                        web::scope("/auth")
                            .route("/profile", web::get().to(auth_handlers::get_profile))
                            .route("/change-password", web::post().to(auth_handlers::change_password))
                            .route("/roles", web::get().to(auth_handlers::get_roles))
                            .route("/users", web::get().to(auth_handlers::list_users))
                            .route("/users", web::post().to(auth_handlers::create_user))
                            .route("/users/{id}", web::put().to(auth_handlers::update_user))
                            .route("/users/{id}/reset-password", web::post().to(auth_handlers::reset_password))
                            .route("/users/{id}", web::delete().to(auth_handlers::delete_user))
                            .route("/activity-log", web::get().to(auth_handlers::list_activity_log))
                    )

                    // Dashboard
                    .service(
                        web::scope("/dashboard")
                            .route("/stats", web::get().to(handlers::get_dashboard_stats))
                            .route("/recent-activity", web::get().to(handlers::get_recent_activity))
                    )

                    // Inventory (both program collections)
                    .service(
                        web::scope("/inventory")
                            .route("/low-stock", web::get().to(inventory_handlers::list_low_stock))
                            .route("/recycle-bin", web::get().to(inventory_handlers::list_recycle_bin))
                            .route("/recycle-bin/{id}/restore", web::post().to(inventory_handlers::restore_inventory_item))
                            .route("/recycle-bin/{id}", web::delete().to(inventory_handlers::purge_inventory_item))
                            .route("", web::get().to(inventory_handlers::list_inventory))
                            .route("", web::post().to(inventory_handlers::create_inventory_item))
                            .route("/{id}", web::get().to(inventory_handlers::get_inventory_item))
                            .route("/{id}", web::put().to(inventory_handlers::update_inventory_item))
                            .route("/{id}", web::delete().to(inventory_handlers::delete_inventory_item))
                            .route("/{id}/refill", web::post().to(inventory_handlers::refill_item))
                            .route("/{id}/issue", web::post().to(inventory_handlers::issue_item))
                            .route("/{id}/issuances", web::get().to(inventory_handlers::list_issuances))
                    )

                    // Maternal patient records
                    .service(
                        web::scope("/patients")
                            .route("", web::get().to(patient_handlers::list_patients))
                            .route("", web::post().to(patient_handlers::create_patient))
                            .route("/{id}", web::get().to(patient_handlers::get_patient))
                            .route("/{id}", web::put().to(patient_handlers::update_patient))
                            .route("/{id}", web::delete().to(patient_handlers::delete_patient))
                            .route("/{id}/children", web::get().to(child_handlers::list_children_for_patient))
                    )

                    // Child nutrition records
                    .service(
                        web::scope("/children")
                            .route("", web::get().to(child_handlers::list_children))
                            .route("", web::post().to(child_handlers::create_child))
                            .route("/{id}", web::get().to(child_handlers::get_child))
                            .route("/{id}", web::put().to(child_handlers::update_child))
                            .route("/{id}", web::delete().to(child_handlers::delete_child))
                    )

                    // Appointments
                    .service(
                        web::scope("/appointments")
                            .route("", web::get().to(appointment_handlers::list_appointments))
                            .route("", web::post().to(appointment_handlers::create_appointment))
                            .route("/{id}", web::get().to(appointment_handlers::get_appointment))
                            .route("/{id}", web::put().to(appointment_handlers::update_appointment))
                            .route("/{id}/complete", web::post().to(appointment_handlers::complete_appointment))
                            .route("/{id}/cancel", web::post().to(appointment_handlers::cancel_appointment))
                    )

                    // Bell-icon notifications
                    .service(
                        web::scope("/notifications")
                            .route("", web::get().to(notification_handlers::list_notifications))
                            .route("/unread-count", web::get().to(notification_handlers::get_unread_count))
                            .route("/read-all", web::post().to(notification_handlers::mark_all_read))
                            .route("/read", web::delete().to(notification_handlers::delete_read_notifications))
                            .route("/{id}/read", web::post().to(notification_handlers::mark_notification_read))
                            .route("/{id}", web::delete().to(notification_handlers::delete_notification))
                    )

                    // Transient toasts
                    .service(
                        web::scope("/alerts")
                            .route("/toasts", web::get().to(notification_handlers::list_toasts))
                            .route("/toasts/{id}", web::delete().to(notification_handlers::dismiss_toast))
                    )

                    // CSV reports
                    .service(
                        web::scope("/reports")
                            .route("/inventory.csv", web::get().to(report_handlers::export_inventory))
                            .route("/issuances.csv", web::get().to(report_handlers::export_issuances))
                            .route("/appointments.csv", web::get().to(report_handlers::export_appointments))
                    )
            )
    })
    .bind(&bind_address)?;

    let server = match workers {
        Some(workers) => server.workers(workers),
        None => server,
    };

    server.run().await?;
    Ok(())
}

// ==================== SETUP HELPERS ====================

pub fn setup_cors(allowed_origins: &[String], is_production: bool) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ])
        .expose_headers(vec![header::CONTENT_LENGTH, header::CONTENT_DISPOSITION])
        .max_age(3600);

    if allowed_origins.contains(&"*".to_string()) {
        if is_production {
            panic!("Wildcard CORS origin (*) is not allowed in production");
        }
        log::warn!("Using wildcard CORS (*) in development mode");
        cors = cors.allow_any_origin().allow_any_header().allow_any_method();
    } else {
        for origin in allowed_origins {
            if origin.is_empty() {
                continue;
            }
            cors = cors.allowed_origin(origin);
        }
    }

    cors
}

fn setup_logging(config: &Config) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.as_str()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn validate_production_config(config: &Config) -> anyhow::Result<()> {
    if config.auth.jwt_secret.len() < 32 {
        anyhow::bail!("Insecure JWT secret in production! Must be at least 32 characters.");
    }

    if config.security.allowed_origins.contains(&"*".to_string()) {
        anyhow::bail!("Wildcard CORS origins not allowed in production!");
    }

    Ok(())
}

async fn setup_database(database_url: &str) -> anyhow::Result<()> {
    if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
        log::info!("Creating database: {}", database_url);
        Sqlite::create_database(database_url).await?;
    }
    Ok(())
}

async fn create_database_pool(db_config: &crate::config::DatabaseConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(&db_config.url)
        .create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(db_config.max_connections)
        .min_connections(db_config.min_connections)
        .acquire_timeout(std::time::Duration::from_secs(db_config.connect_timeout))
        .idle_timeout(std::time::Duration::from_secs(db_config.idle_timeout))
        .connect_with(options)
        .await?;
    Ok(pool)
}

fn setup_security_headers(config: &crate::config::SecurityConfig) -> DefaultHeaders {
    let mut headers = DefaultHeaders::new()
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Frame-Options", "DENY"))
        .add(("X-XSS-Protection", "1; mode=block"))
        .add(("Referrer-Policy", "strict-origin-when-cross-origin"));

    if config.require_https {
        headers = headers.add((
            "Strict-Transport-Security",
            "max-age=31536000; includeSubDomains; preload"
        ));
    }

    headers
}

async fn create_default_admin_if_needed(
    pool: &SqlitePool,
    auth_service: &AuthService,
) -> anyhow::Result<()> {
    let user_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;

    if user_count.0 > 0 {
        return Ok(());
    }

    use crate::auth::{RegisterRequest, UserRole};

    let password = env::var("DEFAULT_ADMIN_PASSWORD").unwrap_or_else(|_| {
        let mut rng = thread_rng();
        let digits: Vec<char> = "0123456789".chars().collect();
        let specials: Vec<char> = "!@#$%^&*_-".chars().collect();
        let uppercase: Vec<char> = "ABCDEFGHIJKLMNOPQRSTUVWXYZ".chars().collect();
        let lowercase: Vec<char> = "abcdefghijklmnopqrstuvwxyz".chars().collect();

        let mut pwd_chars: Vec<char> = Vec::new();
        pwd_chars.push(*digits.choose(&mut rng).unwrap());
        pwd_chars.push(*specials.choose(&mut rng).unwrap());
        pwd_chars.push(*uppercase.choose(&mut rng).unwrap());
        pwd_chars.push(*lowercase.choose(&mut rng).unwrap());
        for _ in 0..10 {
            let sampled = Alphanumeric.sample(&mut rng);
            pwd_chars.push(char::from(sampled));
        }
        pwd_chars.shuffle(&mut rng);

        let pwd: String = pwd_chars.into_iter().collect();
        log::warn!("Generated admin password: {}", pwd);
        pwd
    });

    let admin_request = RegisterRequest {
        username: "admin".to_string(),
        email: "admin@bhcms.local".to_string(),
        password,
        role: None,
    };

    let user = crate::auth::User::create(pool, admin_request, UserRole::Admin, auth_service)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create default admin user: {}", e))?;

    log::info!("Created default admin user '{}'", user.username);
    Ok(())
}
