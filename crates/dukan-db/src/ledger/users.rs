//! # User Ledger
//!
//! Staff accounts, roles, and permission resolution. Roles carry a JSON
//! permission set; an account resolves to an [`Actor`] by joining its role,
//! and a deactivated account resolves to an empty permission set so every
//! authorization check fails the same way.
//!
//! Passwords are hashed with Argon2id. The hash never leaves this module:
//! `User` skips it during serialization, so audit snapshots are safe.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, instrument, warn};

use dukan_core::validation::{validate_name, validate_username};
use dukan_core::{
    Actor, CoreError, CoreResult, Permission, PermissionSet, Role, User, ValidationError,
};

use crate::audit::AuditTrail;

// ============================================================================
// Actor loading
// ============================================================================

/// Resolves a user id to an [`Actor`] on the given connection.
///
/// Called from inside other ledgers' transactions so that the permission
/// check and the guarded writes observe the same snapshot. An inactive
/// account yields an empty permission set rather than an error; the
/// subsequent `require` produces the uniform `PermissionDenied`.
pub(crate) async fn load_actor(conn: &mut SqliteConnection, actor_id: &str) -> CoreResult<Actor> {
    let row = sqlx::query_as::<_, (String, String, bool, String)>(
        "SELECT u.id, u.username, u.is_active, r.permissions
         FROM users u JOIN roles r ON r.id = u.role_id
         WHERE u.id = ?1",
    )
    .bind(actor_id)
    .fetch_optional(conn)
    .await
    .map_err(crate::DbError::from)?;

    let (id, username, is_active, permissions_json) = match row {
        Some(row) => row,
        None => return Err(CoreError::not_found("user", actor_id)),
    };

    let permissions = if is_active {
        serde_json::from_str::<PermissionSet>(&permissions_json)
            .map_err(|e| CoreError::Storage(format!("corrupt permission set for role: {e}")))?
    } else {
        PermissionSet::empty()
    };

    Ok(Actor {
        user_id: id,
        username,
        permissions,
    })
}

// ============================================================================
// UserLedger
// ============================================================================

/// Manages staff accounts and roles.
#[derive(Clone)]
pub struct UserLedger {
    pool: SqlitePool,
    audit: AuditTrail,
}

impl UserLedger {
    pub fn new(pool: SqlitePool) -> Self {
        let audit = AuditTrail::new(pool.clone());
        Self { pool, audit }
    }

    // ------------------------------------------------------------------
    // Roles
    // ------------------------------------------------------------------

    /// Creates a role with the given permission set. Requires `ManageUsers`.
    #[instrument(skip(self, permissions))]
    pub async fn create_role(
        &self,
        name: &str,
        permissions: PermissionSet,
        actor_id: &str,
    ) -> CoreResult<Role> {
        let result = self.create_role_tx(name, permissions, actor_id).await;
        if let Err(err) = &result {
            self.audit
                .record_failure("role", name, "create_role", actor_id, err)
                .await;
        }
        result
    }

    async fn create_role_tx(
        &self,
        name: &str,
        permissions: PermissionSet,
        actor_id: &str,
    ) -> CoreResult<Role> {
        validate_name("role name", name)?;
        let mut tx = self.pool.begin().await.map_err(crate::DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::ManageUsers)?;

        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM roles WHERE name = ?1")
            .bind(name)
            .fetch_one(&mut *tx)
            .await
            .map_err(crate::DbError::from)?;
        if exists > 0 {
            return Err(ValidationError::Duplicate {
                field: "role name".into(),
                value: name.into(),
            }
            .into());
        }

        let role = Role {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            permissions,
            created_at: Utc::now(),
        };
        let permissions_json = serde_json::to_string(&role.permissions)
            .map_err(|e| CoreError::Storage(e.to_string()))?;

        sqlx::query("INSERT INTO roles (id, name, permissions, created_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(&role.id)
            .bind(&role.name)
            .bind(&permissions_json)
            .bind(role.created_at)
            .execute(&mut *tx)
            .await
            .map_err(crate::DbError::from)?;

        AuditTrail::append(
            &mut tx,
            "role",
            &role.id,
            "create_role",
            actor_id,
            None,
            Some(serde_json::to_value(&role).map_err(|e| CoreError::Storage(e.to_string()))?),
        )
        .await?;

        tx.commit().await.map_err(crate::DbError::from)?;
        info!(role = %role.name, "role created");
        Ok(role)
    }

    /// Fetches a role by id.
    pub async fn get_role(&self, role_id: &str) -> CoreResult<Role> {
        let row = sqlx::query_as::<_, (String, String, String, chrono::DateTime<Utc>)>(
            "SELECT id, name, permissions, created_at FROM roles WHERE id = ?1",
        )
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::DbError::from)?;

        let (id, name, permissions_json, created_at) = match row {
            Some(row) => row,
            None => return Err(CoreError::not_found("role", role_id)),
        };
        let permissions = serde_json::from_str(&permissions_json)
            .map_err(|e| CoreError::Storage(format!("corrupt permission set for role: {e}")))?;
        Ok(Role {
            id,
            name,
            permissions,
            created_at,
        })
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Creates a staff account. Requires `ManageUsers`.
    #[instrument(skip(self, password))]
    pub async fn create_user(
        &self,
        username: &str,
        display_name: &str,
        password: &str,
        role_id: &str,
        actor_id: &str,
    ) -> CoreResult<User> {
        let result = self
            .create_user_tx(username, display_name, password, role_id, actor_id)
            .await;
        if let Err(err) = &result {
            self.audit
                .record_failure("user", username, "create_user", actor_id, err)
                .await;
        }
        result
    }

    async fn create_user_tx(
        &self,
        username: &str,
        display_name: &str,
        password: &str,
        role_id: &str,
        actor_id: &str,
    ) -> CoreResult<User> {
        validate_username(username)?;
        validate_name("display name", display_name)?;

        let mut tx = self.pool.begin().await.map_err(crate::DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::ManageUsers)?;

        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE username = ?1")
            .bind(username)
            .fetch_one(&mut *tx)
            .await
            .map_err(crate::DbError::from)?;
        if exists > 0 {
            return Err(ValidationError::Duplicate {
                field: "username".into(),
                value: username.into(),
            }
            .into());
        }

        // Role must exist before we hash; hashing is the expensive step.
        let role_count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM roles WHERE id = ?1")
            .bind(role_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(crate::DbError::from)?;
        if role_count == 0 {
            return Err(CoreError::not_found("role", role_id));
        }

        let password_hash = hash_password(password)?;
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            display_name: display_name.to_string(),
            password_hash,
            role_id: role_id.to_string(),
            is_active: true,
            last_login_at: None,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO users (id, username, display_name, password_hash, role_id, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(&user.role_id)
        .bind(user.is_active)
        .bind(user.created_at)
        .execute(&mut *tx)
        .await
        .map_err(crate::DbError::from)?;

        AuditTrail::append(
            &mut tx,
            "user",
            &user.id,
            "create_user",
            actor_id,
            None,
            Some(serde_json::to_value(&user).map_err(|e| CoreError::Storage(e.to_string()))?),
        )
        .await?;

        tx.commit().await.map_err(crate::DbError::from)?;
        info!(username = %user.username, "user created");
        Ok(user)
    }

    /// Activates or deactivates an account. Requires `ManageUsers`.
    ///
    /// Deactivation is the only way to retire an account; rows are never
    /// deleted because movements and audit entries reference them.
    #[instrument(skip(self))]
    pub async fn set_user_active(
        &self,
        user_id: &str,
        active: bool,
        actor_id: &str,
    ) -> CoreResult<()> {
        let result = self.set_user_active_tx(user_id, active, actor_id).await;
        if let Err(err) = &result {
            self.audit
                .record_failure("user", user_id, "set_user_active", actor_id, err)
                .await;
        }
        result
    }

    async fn set_user_active_tx(
        &self,
        user_id: &str,
        active: bool,
        actor_id: &str,
    ) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(crate::DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::ManageUsers)?;

        let before = fetch_user(&mut tx, user_id).await?;
        sqlx::query("UPDATE users SET is_active = ?1 WHERE id = ?2")
            .bind(active)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(crate::DbError::from)?;

        let mut after = before.clone();
        after.is_active = active;
        AuditTrail::append(
            &mut tx,
            "user",
            user_id,
            "set_user_active",
            actor_id,
            Some(serde_json::to_value(&before).map_err(|e| CoreError::Storage(e.to_string()))?),
            Some(serde_json::to_value(&after).map_err(|e| CoreError::Storage(e.to_string()))?),
        )
        .await?;

        tx.commit().await.map_err(crate::DbError::from)?;
        info!(user_id, active, "user activation updated");
        Ok(())
    }

    /// Reassigns an account to a different role. Requires `ManageUsers`.
    ///
    /// The change takes effect for any transaction beginning afterwards; an
    /// in-flight transaction keeps the permissions it loaded.
    #[instrument(skip(self))]
    pub async fn assign_role(
        &self,
        user_id: &str,
        role_id: &str,
        actor_id: &str,
    ) -> CoreResult<()> {
        let result = self.assign_role_tx(user_id, role_id, actor_id).await;
        if let Err(err) = &result {
            self.audit
                .record_failure("user", user_id, "assign_role", actor_id, err)
                .await;
        }
        result
    }

    async fn assign_role_tx(&self, user_id: &str, role_id: &str, actor_id: &str) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(crate::DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::ManageUsers)?;

        let before = fetch_user(&mut tx, user_id).await?;
        let role_count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM roles WHERE id = ?1")
            .bind(role_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(crate::DbError::from)?;
        if role_count == 0 {
            return Err(CoreError::not_found("role", role_id));
        }

        sqlx::query("UPDATE users SET role_id = ?1 WHERE id = ?2")
            .bind(role_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(crate::DbError::from)?;

        let mut after = before.clone();
        after.role_id = role_id.to_string();
        AuditTrail::append(
            &mut tx,
            "user",
            user_id,
            "assign_role",
            actor_id,
            Some(serde_json::to_value(&before).map_err(|e| CoreError::Storage(e.to_string()))?),
            Some(serde_json::to_value(&after).map_err(|e| CoreError::Storage(e.to_string()))?),
        )
        .await?;

        tx.commit().await.map_err(crate::DbError::from)?;
        Ok(())
    }

    /// Replaces an account's password. Requires `ManageUsers`.
    #[instrument(skip(self, new_password))]
    pub async fn reset_password(
        &self,
        user_id: &str,
        new_password: &str,
        actor_id: &str,
    ) -> CoreResult<()> {
        let result = self.reset_password_tx(user_id, new_password, actor_id).await;
        if let Err(err) = &result {
            self.audit
                .record_failure("user", user_id, "reset_password", actor_id, err)
                .await;
        }
        result
    }

    async fn reset_password_tx(
        &self,
        user_id: &str,
        new_password: &str,
        actor_id: &str,
    ) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(crate::DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::ManageUsers)?;

        // Existence check keeps the NotFound shape consistent with the rest
        // of the ledger.
        fetch_user(&mut tx, user_id).await?;
        let password_hash = hash_password(new_password)?;
        sqlx::query("UPDATE users SET password_hash = ?1 WHERE id = ?2")
            .bind(&password_hash)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(crate::DbError::from)?;

        AuditTrail::append(&mut tx, "user", user_id, "reset_password", actor_id, None, None)
            .await?;

        tx.commit().await.map_err(crate::DbError::from)?;
        info!(user_id, "password reset");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Authentication
    // ------------------------------------------------------------------

    /// Verifies credentials and returns the resolved [`Actor`].
    ///
    /// Bad username, bad password, and deactivated account all produce the
    /// same `PermissionDenied` so the response does not leak which part
    /// failed. A successful login stamps `last_login_at`.
    #[instrument(skip(self, password))]
    pub async fn authenticate(&self, username: &str, password: &str) -> CoreResult<Actor> {
        let denied = || CoreError::PermissionDenied {
            actor: username.to_string(),
            permission: "login".to_string(),
        };

        let row = sqlx::query_as::<_, (String, String, bool)>(
            "SELECT id, password_hash, is_active FROM users WHERE username = ?1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::DbError::from)?;

        let (user_id, stored_hash, is_active) = match row {
            Some(row) => row,
            None => {
                warn!(username, "login attempt for unknown user");
                return Err(denied());
            }
        };

        let parsed = PasswordHash::new(&stored_hash)
            .map_err(|e| CoreError::Storage(format!("stored hash unparseable: {e}")))?;
        if Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_err()
        {
            warn!(username, "login attempt with bad password");
            return Err(denied());
        }
        if !is_active {
            warn!(username, "login attempt on deactivated account");
            return Err(denied());
        }

        sqlx::query("UPDATE users SET last_login_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(&user_id)
            .execute(&self.pool)
            .await
            .map_err(crate::DbError::from)?;

        let mut conn = self.pool.acquire().await.map_err(crate::DbError::from)?;
        let actor = load_actor(&mut conn, &user_id).await?;
        info!(username, "login succeeded");
        Ok(actor)
    }

    /// Creates the first account with full permissions.
    ///
    /// Only runs against an empty users table, so an installed system can
    /// never grow a second back door.
    pub async fn bootstrap_admin(
        &self,
        username: &str,
        display_name: &str,
        password: &str,
    ) -> CoreResult<User> {
        validate_username(username)?;
        validate_name("display name", display_name)?;

        let mut tx = self.pool.begin().await.map_err(crate::DbError::from)?;
        let user_count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&mut *tx)
            .await
            .map_err(crate::DbError::from)?;
        if user_count > 0 {
            return Err(CoreError::Validation(ValidationError::Duplicate {
                field: "users".into(),
                value: "bootstrap on non-empty table".into(),
            }));
        }

        let role = Role {
            id: uuid::Uuid::new_v4().to_string(),
            name: "admin".to_string(),
            permissions: PermissionSet::all(),
            created_at: Utc::now(),
        };
        let permissions_json = serde_json::to_string(&role.permissions)
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        sqlx::query("INSERT INTO roles (id, name, permissions, created_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(&role.id)
            .bind(&role.name)
            .bind(&permissions_json)
            .bind(role.created_at)
            .execute(&mut *tx)
            .await
            .map_err(crate::DbError::from)?;

        let password_hash = hash_password(password)?;
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            display_name: display_name.to_string(),
            password_hash,
            role_id: role.id.clone(),
            is_active: true,
            last_login_at: None,
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO users (id, username, display_name, password_hash, role_id, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(&user.role_id)
        .bind(user.is_active)
        .bind(user.created_at)
        .execute(&mut *tx)
        .await
        .map_err(crate::DbError::from)?;

        AuditTrail::append(
            &mut tx,
            "user",
            &user.id,
            "bootstrap_admin",
            &user.id,
            None,
            Some(serde_json::to_value(&user).map_err(|e| CoreError::Storage(e.to_string()))?),
        )
        .await?;

        tx.commit().await.map_err(crate::DbError::from)?;
        info!(username, "admin account bootstrapped");
        Ok(user)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Fetches a user by id.
    pub async fn get_user(&self, user_id: &str) -> CoreResult<User> {
        let mut conn = self.pool.acquire().await.map_err(crate::DbError::from)?;
        fetch_user(&mut conn, user_id).await
    }

    /// Lists every account, active and deactivated.
    pub async fn list_users(&self) -> CoreResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            "SELECT id, username, display_name, password_hash, role_id, is_active,
                    last_login_at, created_at
             FROM users ORDER BY username",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(crate::DbError::from)?;
        Ok(users)
    }

    /// Resolves a user id to an [`Actor`] outside any transaction.
    pub async fn actor(&self, user_id: &str) -> CoreResult<Actor> {
        let mut conn = self.pool.acquire().await.map_err(crate::DbError::from)?;
        load_actor(&mut conn, user_id).await
    }
}

async fn fetch_user(conn: &mut SqliteConnection, user_id: &str) -> CoreResult<User> {
    sqlx::query_as::<_, User>(
        "SELECT id, username, display_name, password_hash, role_id, is_active,
                last_login_at, created_at
         FROM users WHERE id = ?1",
    )
    .bind(user_id)
    .fetch_optional(conn)
    .await
    .map_err(crate::DbError::from)?
    .ok_or_else(|| CoreError::not_found("user", user_id))
}

fn hash_password(password: &str) -> CoreResult<String> {
    if password.len() < 6 {
        return Err(ValidationError::InvalidFormat {
            field: "password".into(),
            reason: "must be at least 6 characters".into(),
        }
        .into());
    }
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CoreError::Storage(format!("password hashing failed: {e}")))?
        .to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use crate::pool::{Database, DbConfig};
    use dukan_core::{CoreError, Permission, PermissionSet};

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn bootstrap_creates_admin_with_all_permissions() {
        let db = db().await;
        let admin = db
            .users()
            .bootstrap_admin("admin", "Administrator", "s3cret!")
            .await
            .unwrap();

        let actor = db.users().actor(&admin.id).await.unwrap();
        assert!(actor.authorize(Permission::ManageUsers));
        assert!(actor.authorize(Permission::ViewAudit));
    }

    #[tokio::test]
    async fn bootstrap_refuses_second_run() {
        let db = db().await;
        db.users()
            .bootstrap_admin("admin", "Administrator", "s3cret!")
            .await
            .unwrap();
        let err = db
            .users()
            .bootstrap_admin("admin2", "Second Admin", "s3cret!")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn authenticate_accepts_good_and_rejects_bad_credentials() {
        let db = db().await;
        db.users()
            .bootstrap_admin("admin", "Administrator", "s3cret!")
            .await
            .unwrap();

        let actor = db.users().authenticate("admin", "s3cret!").await.unwrap();
        assert_eq!(actor.username, "admin");

        let err = db
            .users()
            .authenticate("admin", "wrong-password")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied { .. }));

        let err = db.users().authenticate("ghost", "s3cret!").await.unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn deactivated_user_loses_all_permissions() {
        let db = db().await;
        let admin = db
            .users()
            .bootstrap_admin("admin", "Administrator", "s3cret!")
            .await
            .unwrap();
        let role = db
            .users()
            .create_role("cashier", PermissionSet::cashier(), &admin.id)
            .await
            .unwrap();
        let cashier = db
            .users()
            .create_user("sara", "Sara", "p4ssword", &role.id, &admin.id)
            .await
            .unwrap();

        let actor = db.users().actor(&cashier.id).await.unwrap();
        assert!(actor.authorize(Permission::CreateInvoice));

        db.users()
            .set_user_active(&cashier.id, false, &admin.id)
            .await
            .unwrap();

        let actor = db.users().actor(&cashier.id).await.unwrap();
        assert!(!actor.authorize(Permission::CreateInvoice));

        let err = db
            .users()
            .authenticate("sara", "p4ssword")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn create_user_requires_manage_users() {
        let db = db().await;
        let admin = db
            .users()
            .bootstrap_admin("admin", "Administrator", "s3cret!")
            .await
            .unwrap();
        let role = db
            .users()
            .create_role("cashier", PermissionSet::cashier(), &admin.id)
            .await
            .unwrap();
        let cashier = db
            .users()
            .create_user("sara", "Sara", "p4ssword", &role.id, &admin.id)
            .await
            .unwrap();

        let err = db
            .users()
            .create_user("omar", "Omar", "p4ssword", &role.id, &cashier.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let db = db().await;
        let admin = db
            .users()
            .bootstrap_admin("admin", "Administrator", "s3cret!")
            .await
            .unwrap();
        let role = db
            .users()
            .create_role("cashier", PermissionSet::cashier(), &admin.id)
            .await
            .unwrap();
        db.users()
            .create_user("sara", "Sara", "p4ssword", &role.id, &admin.id)
            .await
            .unwrap();
        let err = db
            .users()
            .create_user("sara", "Other Sara", "p4ssword", &role.id, &admin.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
