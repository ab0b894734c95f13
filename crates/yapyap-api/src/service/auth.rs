use anyhow::anyhow;
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use uuid::Uuid;

use yapyap_db::Database;
use yapyap_db::models::{NewUser, OtpPurpose, UserRow};
use yapyap_types::api::SignupRequest;
use yapyap_types::models::User;

use super::views;
use crate::error::ApiError;
use crate::otp;

/// A freshly issued code and the address it must be mailed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedOtp {
    pub email: String,
    pub code: String,
}

pub enum LoginOutcome {
    LoggedIn(User),
    /// Credentials were right but the email is unconfirmed; a new code was
    /// issued.
    NeedsVerification { user_id: Uuid, otp: IssuedOtp },
}

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Server(anyhow!("password hashing failed: {}", e)))
}

pub fn verify_password(user: &UserRow, password: &str) -> Result<bool, ApiError> {
    let parsed = PasswordHash::new(&user.password)
        .map_err(|e| ApiError::Server(anyhow!("stored hash for {} is corrupt: {}", user.id, e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

pub fn validate_username(username: &str) -> Result<(), ApiError> {
    let len = username.chars().count();
    if !(3..=32).contains(&len) {
        return Err(ApiError::bad_request("username must be 3 to 32 characters"));
    }
    if username.chars().any(char::is_whitespace) {
        return Err(ApiError::bad_request("username cannot contain spaces"));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < 8 {
        return Err(ApiError::bad_request("password must be at least 8 characters"));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), ApiError> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(ApiError::bad_request("a valid email is required")),
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Create an unverified account and issue its verification code.
pub fn signup(db: &Database, req: &SignupRequest) -> Result<(User, IssuedOtp), ApiError> {
    let name = req.name.trim();
    let username = req.user_name.trim();
    let email = normalize_email(&req.email);

    if name.is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    validate_username(username)?;
    validate_email(&email)?;
    validate_password(&req.password)?;

    if db.get_user_by_username(username)?.is_some() {
        return Err(ApiError::conflict("Username is already taken"));
    }
    if db.get_user_by_email(&email)?.is_some() {
        return Err(ApiError::conflict("Email is already registered"));
    }

    let id = Uuid::new_v4().to_string();
    let password_hash = hash_password(&req.password)?;
    db.create_user(&NewUser {
        id: &id,
        name,
        username,
        email: &email,
        password_hash: &password_hash,
    })?;

    let code = otp::issue(db, &id, OtpPurpose::Verify, None)?;
    let user = db
        .get_user_by_id(&id)?
        .ok_or_else(|| ApiError::Server(anyhow!("user {} vanished after insert", id)))?;

    Ok((views::user_view(&user), IssuedOtp { email, code }))
}

pub fn verify(db: &Database, user_id: Uuid, code: &str) -> Result<User, ApiError> {
    let id = user_id.to_string();
    let user = db
        .get_user_by_id(&id)?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    if user.is_verified {
        return Err(ApiError::bad_request("Account is already verified"));
    }

    otp::consume(db, &id, OtpPurpose::Verify, code)?;
    db.set_user_verified(&id)?;

    let mut view = views::user_view(&user);
    view.is_verified = true;
    Ok(view)
}

pub fn resend_verification(db: &Database, user_id: Uuid) -> Result<IssuedOtp, ApiError> {
    let id = user_id.to_string();
    let user = db
        .get_user_by_id(&id)?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    if user.is_verified {
        return Err(ApiError::bad_request("Account is already verified"));
    }

    let code = otp::issue(db, &id, OtpPurpose::Verify, None)?;
    Ok(IssuedOtp {
        email: user.email,
        code,
    })
}

pub fn login(db: &Database, identifier: &str, password: &str) -> Result<LoginOutcome, ApiError> {
    let identifier = identifier.trim();
    let user = match db.get_user_by_identifier(identifier)? {
        Some(user) => user,
        None => db
            .get_user_by_email(&normalize_email(identifier))?
            .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?,
    };

    if !verify_password(&user, password)? {
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    if !user.is_verified {
        let code = otp::issue(db, &user.id, OtpPurpose::Verify, None)?;
        return Ok(LoginOutcome::NeedsVerification {
            user_id: views::parse_id(&user.id),
            otp: IssuedOtp {
                email: user.email,
                code,
            },
        });
    }

    Ok(LoginOutcome::LoggedIn(views::user_view(&user)))
}

/// Issue a reset code when the address belongs to someone. Callers answer
/// the same way either way.
pub fn request_password_reset(db: &Database, email: &str) -> Result<Option<IssuedOtp>, ApiError> {
    let email = normalize_email(email);
    let Some(user) = db.get_user_by_email(&email)? else {
        return Ok(None);
    };

    let code = otp::issue(db, &user.id, OtpPurpose::PasswordReset, None)?;
    Ok(Some(IssuedOtp { email, code }))
}

pub fn reset_password(db: &Database, email: &str, code: &str, password: &str) -> Result<(), ApiError> {
    validate_password(password)?;
    let user = db
        .get_user_by_email(&normalize_email(email))?
        .ok_or_else(|| ApiError::bad_request("invalid code"))?;

    otp::consume(db, &user.id, OtpPurpose::PasswordReset, code)?;
    db.update_password(&user.id, &hash_password(password)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::{PASSWORD, seed_user};

    fn signup_req(username: &str) -> SignupRequest {
        SignupRequest {
            name: "Alice".into(),
            user_name: username.into(),
            email: format!("{}@Example.com", username),
            password: "hunter2hunter2".into(),
        }
    }

    #[test]
    fn signup_then_verify() {
        let db = Database::open_in_memory().unwrap();
        let (user, otp) = signup(&db, &signup_req("alice")).unwrap();
        assert!(!user.is_verified);
        assert_eq!(otp.email, "alice@example.com");

        assert!(matches!(
            login(&db, "alice", "hunter2hunter2").unwrap(),
            LoginOutcome::NeedsVerification { .. }
        ));

        let fresh = resend_verification(&db, user.id).unwrap();
        assert!(verify(&db, user.id, &fresh.code).unwrap().is_verified);

        match login(&db, "alice@example.com", "hunter2hunter2").unwrap() {
            LoginOutcome::LoggedIn(u) => assert_eq!(u.id, user.id),
            LoginOutcome::NeedsVerification { .. } => panic!("should be verified"),
        }
    }

    #[test]
    fn signup_validation_and_conflicts() {
        let db = Database::open_in_memory().unwrap();
        signup(&db, &signup_req("alice")).unwrap();

        assert!(matches!(signup(&db, &signup_req("alice")), Err(ApiError::Conflict(_))));
        assert!(matches!(signup(&db, &signup_req("al")), Err(ApiError::BadRequest(_))));

        let short_pw = SignupRequest {
            password: "short".into(),
            ..signup_req("bob")
        };
        assert!(matches!(signup(&db, &short_pw), Err(ApiError::BadRequest(_))));

        let bad_email = SignupRequest {
            email: "not-an-email".into(),
            ..signup_req("carol")
        };
        assert!(matches!(signup(&db, &bad_email), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn wrong_password_is_unauthorized() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "alice");
        assert!(matches!(login(&db, "alice", "nope nope"), Err(ApiError::Unauthorized(_))));
        assert!(matches!(login(&db, "nobody", PASSWORD), Err(ApiError::Unauthorized(_))));
    }

    #[test]
    fn password_reset_round() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "alice");

        assert!(request_password_reset(&db, "ghost@example.com").unwrap().is_none());
        let otp = request_password_reset(&db, "alice@example.com").unwrap().unwrap();

        reset_password(&db, "alice@example.com", &otp.code, "brand new pass").unwrap();
        assert!(matches!(login(&db, "alice", PASSWORD), Err(ApiError::Unauthorized(_))));
        assert!(matches!(
            login(&db, "alice", "brand new pass").unwrap(),
            LoginOutcome::LoggedIn(_)
        ));

        // The code was consumed.
        assert!(reset_password(&db, "alice@example.com", &otp.code, "another pass").is_err());
    }
}
