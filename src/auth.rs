use bcrypt::{hash, verify};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;
use actix_web::web;
use actix_web::HttpMessage;
use validator::Validate;
use actix_web::{HttpRequest, dev::ServiceRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use crate::error::{ApiError, ApiResult};
use crate::models::OwnerRole;

// ======== USER MODEL ========

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

// ======== USER ROLE ========

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum UserRole {
    Admin,
    Bhw,
    Bns,
    Midwife,
}

impl UserRole {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(UserRole::Admin),
            "bhw" => Some(UserRole::Bhw),
            "bns" => Some(UserRole::Bns),
            "midwife" => Some(UserRole::Midwife),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Bhw => "bhw",
            UserRole::Bns => "bns",
            UserRole::Midwife => "midwife",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            UserRole::Admin => "Administrator",
            UserRole::Bhw => "Barangay Health Worker",
            UserRole::Bns => "Barangay Nutrition Scholar",
            UserRole::Midwife => "Midwife",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            UserRole::Admin => "Full access to all health center records, inventories, and user accounts",
            UserRole::Bhw => "Maternal records, appointments and the BHW medicine inventory",
            UserRole::Bns => "Child nutrition records and the BNS inventory",
            UserRole::Midwife => "Patient care with refill and issuance-slip privileges",
        }
    }

    // ======== USER MANAGEMENT ========
    pub fn can_manage_users(&self) -> bool {
        matches!(self, UserRole::Admin)
    }

    pub fn can_view_users(&self) -> bool {
        matches!(self, UserRole::Admin)
    }

    // ======== PATIENT PERMISSIONS ========
    pub fn can_manage_patients(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Bhw | UserRole::Midwife)
    }

    pub fn can_view_patients(&self) -> bool {
        true // All roles can view
    }

    // ======== CHILD RECORD PERMISSIONS ========
    pub fn can_manage_children(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Bns)
    }

    pub fn can_view_children(&self) -> bool {
        true // All roles can view
    }

    // ======== APPOINTMENT PERMISSIONS ========
    pub fn can_manage_appointments(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Bhw | UserRole::Midwife)
    }

    pub fn can_view_appointments(&self) -> bool {
        true // All roles can view
    }

    // ======== INVENTORY PERMISSIONS ========

    /// Create/edit/soft-delete items in a program's collection.
    pub fn can_manage_inventory(&self, owner: OwnerRole) -> bool {
        match self {
            UserRole::Admin => true,
            UserRole::Bhw => owner == OwnerRole::Bhw,
            UserRole::Bns => owner == OwnerRole::Bns,
            UserRole::Midwife => false,
        }
    }

    /// Refill and issue stock. Midwives hold issuance-slip privileges
    /// across both collections.
    pub fn can_adjust_stock(&self, owner: OwnerRole) -> bool {
        match self {
            UserRole::Admin | UserRole::Midwife => true,
            UserRole::Bhw => owner == OwnerRole::Bhw,
            UserRole::Bns => owner == OwnerRole::Bns,
        }
    }

    /// Hard delete from the recycle bin.
    pub fn can_purge_inventory(&self) -> bool {
        matches!(self, UserRole::Admin)
    }

    pub fn can_view_inventory(&self) -> bool {
        true // All roles can view
    }

    // ======== REPORT PERMISSIONS ========
    pub fn can_export_reports(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Bhw | UserRole::Bns | UserRole::Midwife)
    }

    // ======== SYSTEM PERMISSIONS ========
    pub fn can_view_activity_log(&self) -> bool {
        matches!(self, UserRole::Admin)
    }

    /// Get all available roles
    pub fn all_roles() -> Vec<Self> {
        vec![UserRole::Admin, UserRole::Bhw, UserRole::Bns, UserRole::Midwife]
    }

    /// Get all valid role strings
    pub fn all_role_strings() -> Vec<&'static str> {
        vec!["admin", "bhw", "bns", "midwife"]
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ======== REQUEST/RESPONSE STRUCTS ========

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 50, message = "Username must be 3-50 characters"))]
    pub username: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,
    #[validate(length(min = 8, message = "New password must be at least 8 characters"))]
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: i64,
    pub user: UserInfo,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            role: UserRole::from_str(&user.role).unwrap_or(UserRole::Bhw),
            is_active: user.is_active,
            last_login: user.last_login,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub exp: i64,
    pub iat: i64,
}

// ======== AUTH SERVICE ========

pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_expiration_hours: i64,
}

impl AuthService {
    pub fn new(jwt_secret: &str, token_expiration_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            token_expiration_hours,
        }
    }

    pub fn hash_password(&self, password: &str) -> Result<String, bcrypt::BcryptError> {
        match validate_password_strength(password) {
            Ok(_) => hash(password, 12),
            Err(e) => Err(bcrypt::BcryptError::InvalidHash(e.to_string())),
        }
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
        verify(password, hash)
    }

    pub fn generate_token(&self, user: &User) -> ApiResult<String> {
        let now = Utc::now();
        let exp = now + Duration::hours(self.token_expiration_hours);

        let claims = Claims {
            sub: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            role: UserRole::from_str(&user.role).unwrap_or(UserRole::Bhw),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|_| ApiError::AuthError("Failed to generate token".to_string()))
    }

    pub fn verify_token(&self, token: &str) -> ApiResult<Claims> {
        let validation = Validation::default();
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|err| {
                match err.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature =>
                        ApiError::AuthError("Token expired".to_string()),
                    jsonwebtoken::errors::ErrorKind::InvalidToken =>
                        ApiError::AuthError("Invalid token".to_string()),
                    _ =>
                        ApiError::AuthError("Token verification failed".to_string()),
                }
            })
    }
}

// ======== PASSWORD VALIDATION ========

pub fn validate_password_strength(password: &str) -> Result<(), ApiError> {
    if password.len() < 8 {
        return Err(ApiError::ValidationError("Password must be at least 8 characters".to_string()));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(ApiError::ValidationError("Password must contain at least one uppercase letter".to_string()));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(ApiError::ValidationError("Password must contain at least one lowercase letter".to_string()));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(ApiError::ValidationError("Password must contain at least one digit".to_string()));
    }
    Ok(())
}

// ======== USER METHODS ========

impl User {
    pub async fn find_by_username(pool: &SqlitePool, username: &str) -> ApiResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(pool)
            .await
            .map_err(|_| ApiError::NotFound("User not found".to_string()))
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> ApiResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(|_| ApiError::NotFound("User not found".to_string()))
    }

    pub async fn create(
        pool: &SqlitePool,
        request: RegisterRequest,
        role: UserRole,
        auth_service: &AuthService,
    ) -> ApiResult<User> {
        validate_password_strength(&request.password)?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let password_hash = auth_service.hash_password(&request.password)
            .map_err(|_| ApiError::InternalServerError("Failed to hash password".to_string()))?;

        let user = User {
            id: id.clone(),
            username: request.username,
            email: request.email,
            password_hash,
            role: role.as_str().to_string(),
            is_active: true,
            last_login: None,
            created_at: now,
            updated_at: now,
            failed_login_attempts: 0,
            locked_until: None,
        };

        sqlx::query(
            r#"INSERT INTO users (
                id, username, email, password_hash, role, is_active,
                created_at, updated_at, failed_login_attempts, locked_until
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
        )
            .bind(&user.id)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.role)
            .bind(user.is_active as i32)
            .bind(&user.created_at)
            .bind(&user.updated_at)
            .bind(user.failed_login_attempts)
            .bind(&user.locked_until)
            .execute(pool)
            .await?;

        Ok(user)
    }

    pub async fn update_last_login(&self, pool: &SqlitePool) -> ApiResult<()> {
        sqlx::query("UPDATE users SET last_login = datetime('now') WHERE id = ?")
            .bind(&self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn change_password(
        &self,
        pool: &SqlitePool,
        current_password: &str,
        new_password: &str,
        auth_service: &AuthService
    ) -> ApiResult<()> {
        if !auth_service.verify_password(current_password, &self.password_hash)
            .map_err(|_| ApiError::InternalServerError("Password verification failed".to_string()))?
        {
            return Err(ApiError::AuthError("Current password is incorrect".to_string()));
        }

        validate_password_strength(new_password)?;

        let new_hash = auth_service.hash_password(new_password)
            .map_err(|_| ApiError::InternalServerError("Failed to hash password".to_string()))?;

        sqlx::query(
            "UPDATE users SET password_hash = ?, updated_at = datetime('now') WHERE id = ?"
        )
            .bind(&new_hash)
            .bind(&self.id)
            .execute(pool)
            .await?;

        Ok(())
    }

    // Methods for lock management
    pub fn is_locked(&self) -> bool {
        if let Some(locked_until) = self.locked_until {
            Utc::now() < locked_until
        } else {
            false
        }
    }

    pub async fn increment_failed_attempts(&mut self, pool: &SqlitePool) -> ApiResult<()> {
        self.failed_login_attempts += 1;
        sqlx::query("UPDATE users SET failed_login_attempts = ? WHERE id = ?")
            .bind(self.failed_login_attempts)
            .bind(&self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn lock_for_duration(&mut self, pool: &SqlitePool, duration: Duration) -> ApiResult<()> {
        self.locked_until = Some(Utc::now() + duration);
        sqlx::query("UPDATE users SET locked_until = ? WHERE id = ?")
            .bind(self.locked_until)
            .bind(&self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn reset_failed_attempts(&mut self, pool: &SqlitePool) -> ApiResult<()> {
        self.failed_login_attempts = 0;
        self.locked_until = None;
        sqlx::query(
            "UPDATE users SET failed_login_attempts = 0, locked_until = NULL WHERE id = ?"
        )
            .bind(&self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Get the UserRole enum from the role string
    pub fn get_role(&self) -> UserRole {
        UserRole::from_str(&self.role).unwrap_or(UserRole::Bhw)
    }
}

// ======== HELPER FUNCTIONS ========

pub fn get_current_user(req: &HttpRequest) -> ApiResult<Claims> {
    req.extensions()
        .get::<Claims>().cloned()
        .ok_or_else(|| ApiError::Unauthorized("No user information found".to_string()))
}

pub fn check_permission<F>(claims: &Claims, check: F) -> ApiResult<()>
where
    F: Fn(&UserRole) -> bool,
{
    if check(&claims.role) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Insufficient permissions".to_string()))
    }
}

// ======== JWT MIDDLEWARE ========

pub async fn jwt_middleware(
    req: ServiceRequest,
    credentials: BearerAuth,
) -> Result<ServiceRequest, (actix_web::Error, ServiceRequest)> {
    let token = credentials.token();

    let auth_service = match req.app_data::<web::Data<std::sync::Arc<AuthService>>>() {
        Some(svc) => svc,
        None => {
            log::error!("AuthService not found in app data");
            return Err((
                ApiError::InternalServerError("Auth service not available".to_string()).into(),
                req,
            ));
        }
    };

    match auth_service.verify_token(token) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            Ok(req)
        }
        Err(err) => {
            log::warn!("JWT verification failed: {}", err);
            Err((err.into(), req))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!(UserRole::from_str("BHW"), Some(UserRole::Bhw));
        assert_eq!(UserRole::from_str("midwife"), Some(UserRole::Midwife));
        assert_eq!(UserRole::from_str("nurse"), None);
    }

    #[test]
    fn test_inventory_permissions() {
        assert!(UserRole::Bhw.can_manage_inventory(OwnerRole::Bhw));
        assert!(!UserRole::Bhw.can_manage_inventory(OwnerRole::Bns));
        assert!(UserRole::Bns.can_manage_inventory(OwnerRole::Bns));
        assert!(!UserRole::Midwife.can_manage_inventory(OwnerRole::Bhw));
        assert!(UserRole::Admin.can_manage_inventory(OwnerRole::Bns));
    }

    #[test]
    fn test_every_role_can_view_shared_records() {
        for role in UserRole::all_roles() {
            assert!(role.can_view_patients());
            assert!(role.can_view_children());
            assert!(role.can_view_appointments());
            assert!(role.can_view_inventory());
            assert!(role.can_export_reports());
        }
        assert!(!UserRole::Bhw.can_view_activity_log());
        assert!(UserRole::Admin.can_view_activity_log());
    }

    #[test]
    fn test_midwife_issuance_privileges() {
        assert!(UserRole::Midwife.can_adjust_stock(OwnerRole::Bhw));
        assert!(UserRole::Midwife.can_adjust_stock(OwnerRole::Bns));
        assert!(!UserRole::Bns.can_adjust_stock(OwnerRole::Bhw));
        assert!(!UserRole::Midwife.can_purge_inventory());
        assert!(UserRole::Admin.can_purge_inventory());
    }

    #[test]
    fn test_password_strength() {
        assert!(validate_password_strength("Str0ngPass").is_ok());
        assert!(validate_password_strength("weakpass").is_err());
        assert!(validate_password_strength("NOLOWER1").is_err());
        assert!(validate_password_strength("NoDigits").is_err());
        assert!(validate_password_strength("Sh0rt").is_err());
    }
}
