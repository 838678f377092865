use crate::auth::AuthError;
use crate::error::{validate_not_blank, AppError};
use crate::schema::users;
use crate::tables::{NewUser, Role, User};
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};

pub const USERNAME_MIN_CHARS: usize = 3;
pub const USERNAME_MAX_CHARS: usize = 50;
pub const EMAIL_MAX_CHARS: usize = 100;
pub const PASSWORD_MIN_CHARS: usize = 6;

lazy_static! {
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[^@\s]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*$").unwrap();
}

fn validate_username(username: &str) -> Result<(), AppError> {
    validate_not_blank(username, "username")?;
    let len = username.trim().chars().count();
    if !(USERNAME_MIN_CHARS..=USERNAME_MAX_CHARS).contains(&len) {
        return Err(AppError::Validation(format!(
            "Username must be between {USERNAME_MIN_CHARS} and {USERNAME_MAX_CHARS} characters"
        )));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), AppError> {
    validate_not_blank(email, "email")?;
    let email = email.trim();
    if email.chars().count() > EMAIL_MAX_CHARS {
        return Err(AppError::Validation(format!(
            "Email must not exceed {EMAIL_MAX_CHARS} characters"
        )));
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err(AppError::Validation(format!("'{email}' is not a valid email")));
    }
    Ok(())
}

fn validate_new_password(password: &str, field: &str) -> Result<(), AppError> {
    validate_not_blank(password, field)?;
    if password.chars().count() < PASSWORD_MIN_CHARS {
        return Err(AppError::Validation(format!(
            "{field} must be at least {PASSWORD_MIN_CHARS} characters long"
        )));
    }
    Ok(())
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AppError::Internal(format!("password hashing failed: {err}")))
}

/// False for a wrong password and for a hash that cannot be parsed.
pub fn verify_password(stored_hash: &str, password: &str) -> bool {
    PasswordHash::new(stored_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

fn conflict_on_unique(err: DieselError) -> AppError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            AppError::Conflict("Username or email is already in use".to_string())
        }
        other => AppError::Database(other),
    }
}

/// Rejects a username or email already held by a user other than `except`.
fn ensure_available(
    conn: &mut SqliteConnection,
    username: Option<&str>,
    email: Option<&str>,
    except: Option<i32>,
) -> Result<(), AppError> {
    if let Some(username) = username {
        let holder: Option<i32> = users::table
            .filter(users::username.eq(username))
            .select(users::id)
            .first(conn)
            .optional()?;
        if holder.is_some() && holder != except {
            return Err(AppError::Conflict(format!("Username '{username}' is already taken")));
        }
    }
    if let Some(email) = email {
        let holder: Option<i32> = users::table
            .filter(users::email.eq(email))
            .select(users::id)
            .first(conn)
            .optional()?;
        if holder.is_some() && holder != except {
            return Err(AppError::Conflict(format!("Email '{email}' is already registered")));
        }
    }
    Ok(())
}

/// Creates a `USER` account with an argon2 password hash.
pub fn register(
    conn: &mut SqliteConnection,
    username: &str,
    email: &str,
    password: &str,
) -> Result<User, AppError> {
    validate_username(username)?;
    validate_email(email)?;
    validate_new_password(password, "password")?;

    let (username, email) = (username.trim(), email.trim());
    ensure_available(conn, Some(username), Some(email), None)?;
    let password_hash = hash_password(password)?;

    let user = diesel::insert_into(users::table)
        .values(&NewUser {
            username,
            email,
            password_hash: &password_hash,
            role: Role::User,
            created_at: chrono::Utc::now().naive_utc(),
        })
        .returning(User::as_returning())
        .get_result(conn)
        .map_err(conflict_on_unique)?;

    info!(user_id = user.id, username = %user.username, "user registered");
    Ok(user)
}

pub fn find_by_username(conn: &mut SqliteConnection, username: &str) -> Result<User, AppError> {
    users::table
        .filter(users::username.eq(username))
        .select(User::as_select())
        .first(conn)
        .map_err(AppError::from_query("user"))
}

pub fn find_by_id(conn: &mut SqliteConnection, user_id: i32) -> Result<User, AppError> {
    users::table
        .find(user_id)
        .select(User::as_select())
        .first(conn)
        .map_err(AppError::from_query("user"))
}

/// Checks a username/password pair. Unknown users and wrong passwords are
/// indistinguishable to the caller.
pub fn authenticate(
    conn: &mut SqliteConnection,
    username: &str,
    password: &str,
) -> Result<User, AuthError> {
    let user = match find_by_username(conn, username) {
        Ok(user) => Some(user),
        Err(AppError::NotFound(_)) => None,
        Err(err) => return Err(AuthError::Backend(err.to_string())),
    };

    match user {
        Some(user) if verify_password(&user.password_hash, password) => Ok(user),
        _ => {
            warn!(username, "failed login attempt");
            Err(AuthError::InvalidCredentials)
        }
    }
}

pub fn update_profile(
    conn: &mut SqliteConnection,
    user_id: i32,
    username: Option<&str>,
    email: Option<&str>,
) -> Result<User, AppError> {
    if let Some(username) = username {
        validate_username(username)?;
    }
    if let Some(email) = email {
        validate_email(email)?;
    }
    let username = username.map(str::trim);
    let email = email.map(str::trim);

    conn.transaction::<_, AppError, _>(|conn| {
        let user = find_by_id(conn, user_id)?;
        ensure_available(conn, username, email, Some(user_id))?;

        let user = diesel::update(users::table.find(user_id))
            .set((
                users::username.eq(username.unwrap_or(&user.username)),
                users::email.eq(email.unwrap_or(&user.email)),
            ))
            .returning(User::as_returning())
            .get_result(conn)
            .map_err(conflict_on_unique)?;

        info!(user_id, "profile updated");
        Ok(user)
    })
}

pub fn change_password(
    conn: &mut SqliteConnection,
    user_id: i32,
    current_password: &str,
    new_password: &str,
) -> Result<(), AppError> {
    validate_new_password(new_password, "newPassword")?;

    let user = find_by_id(conn, user_id)?;
    if !verify_password(&user.password_hash, current_password) {
        return Err(AppError::Validation("Current password is incorrect".to_string()));
    }
    if current_password == new_password {
        return Err(AppError::Validation(
            "New password must differ from the current one".to_string(),
        ));
    }

    let password_hash = hash_password(new_password)?;
    diesel::update(users::table.find(user_id))
        .set(users::password_hash.eq(password_hash))
        .execute(conn)?;

    info!(user_id, "password changed");
    Ok(())
}

/// Deletes the account; entries, milestones and tasks go with it.
pub fn delete_user(conn: &mut SqliteConnection, user_id: i32) -> Result<(), AppError> {
    let deleted = diesel::delete(users::table.find(user_id)).execute(conn)?;
    if deleted == 0 {
        return Err(AppError::NotFound("user"));
    }
    info!(user_id, "user deleted");
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;

    /// Inserts a user directly, skipping password hashing.
    pub fn insert_user(conn: &mut SqliteConnection, username: &str) -> User {
        let email = format!("{username}@example.com");
        diesel::insert_into(users::table)
            .values(&NewUser {
                username,
                email: &email,
                password_hash: "not-a-real-hash",
                role: Role::User,
                created_at: chrono::Utc::now().naive_utc(),
            })
            .returning(User::as_returning())
            .get_result(conn)
            .expect("Failed to insert test user")
    }
}
