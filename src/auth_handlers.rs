// src/auth_handlers.rs - Authentication and user management routes

use actix_web::{web, HttpRequest, HttpResponse};
use validator::Validate;
use std::sync::Arc;
use chrono::Duration;
use serde::{Serialize, Deserialize};

use crate::handlers::ApiResponse;
use crate::activity::record;
use crate::auth::{
    AuthService, User, LoginRequest, RegisterRequest, ChangePasswordRequest,
    LoginResponse, UserInfo, UserRole, get_current_user, check_permission,
    validate_password_strength,
};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

// ======== REQUEST STRUCTS ========

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub new_password: String,
}

// ======== LOGIN ========

pub async fn login(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<LoginRequest>,
) -> ApiResult<HttpResponse> {
    request.validate()?;

    let mut user = User::find_by_username(&app_state.db_pool, &request.username).await
        .map_err(|_| ApiError::BadRequest("Invalid username or password".to_string()))?;

    if user.is_locked() {
        return Err(ApiError::AuthError("Account is temporarily locked. Try again later.".to_string()));
    }
    if !user.is_active {
        return Err(ApiError::AuthError("Account is deactivated".to_string()));
    }

    if !auth_service.verify_password(&request.password, &user.password_hash)
        .map_err(|_| ApiError::InternalServerError("Password verification failed".to_string()))? {

        user.increment_failed_attempts(&app_state.db_pool).await?;

        // Lock for 15 minutes after 5 failed attempts
        if user.failed_login_attempts >= 5 {
            user.lock_for_duration(&app_state.db_pool, Duration::minutes(15)).await?;
            return Err(ApiError::AuthError(
                "Account locked due to too many failed attempts. Try again in 15 minutes.".to_string()
            ));
        }

        return Err(ApiError::BadRequest("Invalid username or password".to_string()));
    }

    user.reset_failed_attempts(&app_state.db_pool).await?;
    user.update_last_login(&app_state.db_pool).await?;

    let token = auth_service.generate_token(&user)?;
    let expires_in = app_state.config.auth.token_expiration_hours * 3600;

    let response = LoginResponse {
        token,
        expires_in,
        user: user.clone().into(),
    };

    log::info!("User {} logged in successfully", user.username);

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        response,
        "Login successful".to_string(),
    )))
}

// ======== PROFILE ========

pub async fn get_profile(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let user = User::find_by_id(&app_state.db_pool, &claims.sub).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(UserInfo::from(user))))
}

pub async fn change_password(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<ChangePasswordRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    let claims = get_current_user(&http_request)?;

    let user = User::find_by_id(&app_state.db_pool, &claims.sub).await?;
    user.change_password(
        &app_state.db_pool,
        &request.current_password,
        &request.new_password,
        &auth_service,
    ).await?;

    record(
        &app_state.db_pool,
        &claims.sub,
        "password_change",
        "Changed own password",
        &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        claims.sub,
        "Password changed successfully".to_string(),
    )))
}

// ======== USER MANAGEMENT (ADMIN) ========

pub async fn create_user(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<RegisterRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;

    let role = match &request.role {
        Some(role_str) => UserRole::from_str(role_str)
            .ok_or_else(|| ApiError::BadRequest(format!(
                "Invalid role '{}', expected one of: {}",
                role_str,
                UserRole::all_role_strings().join(", ")
            )))?,
        None => UserRole::Bhw,
    };

    let existing: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM users WHERE username = ? OR email = ?"
    )
        .bind(&request.username)
        .bind(&request.email)
        .fetch_optional(&app_state.db_pool)
        .await?;
    if existing.is_some() {
        return Err(ApiError::BadRequest("Username or email is already taken".to_string()));
    }

    let user = User::create(&app_state.db_pool, request.into_inner(), role, &auth_service).await?;

    record(
        &app_state.db_pool,
        &claims.sub,
        "user_create",
        &format!("Created user '{}' with role '{}'", user.username, user.role),
        &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success(UserInfo::from(user))))
}

pub async fn list_users(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_view_users())?;

    let users: Vec<User> = sqlx::query_as(
        "SELECT * FROM users ORDER BY username COLLATE NOCASE"
    )
        .fetch_all(&app_state.db_pool)
        .await?;

    let users: Vec<UserInfo> = users.into_iter().map(UserInfo::from).collect();
    Ok(HttpResponse::Ok().json(ApiResponse::success(users)))
}

pub async fn update_user(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateUserRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;
    let user_id = path.into_inner();

    let user = User::find_by_id(&app_state.db_pool, &user_id).await?;

    let role = match &request.role {
        Some(role_str) => UserRole::from_str(role_str)
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid role '{}'", role_str)))?
            .as_str()
            .to_string(),
        None => user.role.clone(),
    };
    let is_active = request.is_active.unwrap_or(user.is_active);

    // Admins cannot deactivate or demote themselves
    if user.id == claims.sub && (!is_active || role != "admin") {
        return Err(ApiError::BadRequest(
            "You cannot deactivate or demote your own account".to_string()
        ));
    }

    sqlx::query(
        "UPDATE users SET role = ?, is_active = ?, updated_at = datetime('now') WHERE id = ?"
    )
        .bind(&role)
        .bind(is_active as i32)
        .bind(&user_id)
        .execute(&app_state.db_pool)
        .await?;

    record(
        &app_state.db_pool,
        &claims.sub,
        "user_update",
        &format!("Updated user '{}' (role: {}, active: {})", user.username, role, is_active),
        &http_request,
    ).await;

    let updated = User::find_by_id(&app_state.db_pool, &user_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(UserInfo::from(updated))))
}

pub async fn reset_password(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    path: web::Path<String>,
    request: web::Json<ResetPasswordRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;
    let user_id = path.into_inner();

    let user = User::find_by_id(&app_state.db_pool, &user_id).await?;

    validate_password_strength(&request.new_password)?;
    let new_hash = auth_service.hash_password(&request.new_password)
        .map_err(|_| ApiError::InternalServerError("Failed to hash password".to_string()))?;

    // Clear any lockout in the same statement so the user can sign in right away
    sqlx::query(
        r#"UPDATE users
           SET password_hash = ?, failed_login_attempts = 0, locked_until = NULL,
               updated_at = datetime('now')
           WHERE id = ?"#
    )
        .bind(&new_hash)
        .bind(&user_id)
        .execute(&app_state.db_pool)
        .await?;

    record(
        &app_state.db_pool,
        &claims.sub,
        "password_reset",
        &format!("Reset password for user '{}'", user.username),
        &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        user_id,
        "Password reset successfully".to_string(),
    )))
}

pub async fn delete_user(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;
    let user_id = path.into_inner();

    if user_id == claims.sub {
        return Err(ApiError::BadRequest("You cannot delete your own account".to_string()));
    }

    let user = User::find_by_id(&app_state.db_pool, &user_id).await?;

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(&user_id)
        .execute(&app_state.db_pool)
        .await?;

    record(
        &app_state.db_pool,
        &claims.sub,
        "user_delete",
        &format!("Deleted user '{}'", user.username),
        &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        user_id,
        "User deleted".to_string(),
    )))
}

pub async fn get_roles(http_request: HttpRequest) -> ApiResult<HttpResponse> {
    #[derive(Serialize)]
    struct RoleInfo {
        value: &'static str,
        display_name: &'static str,
        description: &'static str,
    }

    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_view_users())?;

    let roles: Vec<RoleInfo> = UserRole::all_roles()
        .into_iter()
        .map(|role| RoleInfo {
            value: role.as_str(),
            display_name: role.display_name(),
            description: role.description(),
        })
        .collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(roles)))
}

// ======== ACTIVITY LOG (ADMIN) ========

pub async fn list_activity_log(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<crate::handlers::PaginationQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_view_activity_log())?;

    let (page, per_page, offset) = query.normalize();

    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM activity_logs")
        .fetch_one(&app_state.db_pool)
        .await?;

    let entries: Vec<crate::models::ActivityLogEntry> = sqlx::query_as(
        "SELECT * FROM activity_logs ORDER BY created_at DESC LIMIT ? OFFSET ?"
    )
        .bind(per_page)
        .bind(offset)
        .fetch_all(&app_state.db_pool)
        .await?;

    let total_pages = (total.0 + per_page - 1) / per_page;
    Ok(HttpResponse::Ok().json(ApiResponse::success(crate::handlers::PaginatedResponse {
        data: entries,
        total: total.0,
        page,
        per_page,
        total_pages,
    })))
}
