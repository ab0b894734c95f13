//! One-time codes mailed to users. Only a SHA-256 digest of each code is
//! stored, one live code per (user, purpose), valid for five minutes.

use chrono::{Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

use yapyap_db::models::{OtpPurpose, OtpRow};
use yapyap_db::{Database, parse_timestamp};

use crate::error::ApiError;

pub const OTP_TTL_MINUTES: i64 = 5;

pub fn generate_code() -> String {
    let n: u32 = rand::rng().random_range(0..1_000_000);
    format!("{:06}", n)
}

pub fn hash_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.trim().as_bytes()))
}

/// Store a fresh code for (user, purpose), replacing any earlier one, and
/// return the plaintext for mailing.
pub fn issue(
    db: &Database,
    user_id: &str,
    purpose: OtpPurpose,
    payload: Option<&str>,
) -> Result<String, ApiError> {
    let code = generate_code();
    let expires_at = (Utc::now() + Duration::minutes(OTP_TTL_MINUTES))
        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
    db.upsert_otp(user_id, purpose, &hash_code(&code), payload, &expires_at)?;
    Ok(code)
}

/// Check a submitted code and consume it on success. A wrong code leaves the
/// stored one in place; an expired one is removed.
pub fn consume(
    db: &Database,
    user_id: &str,
    purpose: OtpPurpose,
    code: &str,
) -> Result<OtpRow, ApiError> {
    let otp = db
        .get_otp(user_id, purpose)?
        .ok_or_else(|| ApiError::bad_request("no pending code, request a new one"))?;

    if parse_timestamp(&otp.expires_at) < Utc::now() {
        db.delete_otp(user_id, purpose)?;
        return Err(ApiError::bad_request("code expired, request a new one"));
    }
    if otp.code_hash != hash_code(code) {
        return Err(ApiError::bad_request("invalid code"));
    }

    db.delete_otp(user_id, purpose)?;
    Ok(otp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use yapyap_db::models::NewUser;

    fn setup() -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        db.create_user(&NewUser {
            id: &id,
            name: "Alice",
            username: "alice",
            email: "alice@example.com",
            password_hash: "hash",
        })
        .unwrap();
        (db, id)
    }

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn code_is_single_use() {
        let (db, id) = setup();
        let code = issue(&db, &id, OtpPurpose::Verify, None).unwrap();

        assert!(matches!(
            consume(&db, &id, OtpPurpose::Verify, "not-it"),
            Err(ApiError::BadRequest(_))
        ));
        consume(&db, &id, OtpPurpose::Verify, &code).unwrap();
        assert!(matches!(
            consume(&db, &id, OtpPurpose::Verify, &code),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn expired_code_is_rejected() {
        let (db, id) = setup();
        db.upsert_otp(
            &id,
            OtpPurpose::PasswordReset,
            &hash_code("123456"),
            None,
            "2000-01-01T00:00:00.000000Z",
        )
        .unwrap();

        assert!(matches!(
            consume(&db, &id, OtpPurpose::PasswordReset, "123456"),
            Err(ApiError::BadRequest(_))
        ));
        assert!(db.get_otp(&id, OtpPurpose::PasswordReset).unwrap().is_none());
    }

    #[test]
    fn payload_survives_until_consumed() {
        let (db, id) = setup();
        let code = issue(&db, &id, OtpPurpose::EmailChange, Some("new@example.com")).unwrap();
        let otp = consume(&db, &id, OtpPurpose::EmailChange, &code).unwrap();
        assert_eq!(otp.payload.as_deref(), Some("new@example.com"));
    }
}
