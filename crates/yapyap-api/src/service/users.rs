use tracing::info;
use uuid::Uuid;

use yapyap_db::Database;
use yapyap_db::models::{ChatTeardown, OtpPurpose, UserRow};
use yapyap_types::models::{ChatKind, User};

use super::auth::{IssuedOtp, normalize_email, validate_email, validate_username, verify_password};
use super::chats::{self, Removal};
use super::views;
use crate::error::ApiError;
use crate::otp;

fn load(db: &Database, user_id: Uuid) -> Result<UserRow, ApiError> {
    db.get_user_by_id(&user_id.to_string())?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

fn check_password(user: &UserRow, password: &str) -> Result<(), ApiError> {
    if verify_password(user, password)? {
        Ok(())
    } else {
        Err(ApiError::unauthorized("Incorrect password"))
    }
}

pub fn me(db: &Database, user_id: Uuid) -> Result<User, ApiError> {
    Ok(views::user_view(&load(db, user_id)?))
}

pub fn find_by_username(db: &Database, username: Option<&str>) -> Result<User, ApiError> {
    let username = username
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::bad_request("userName is required"))?;

    db.get_user_by_username(username)?
        .map(|row| views::user_view(&row))
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// Profile fields to change; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
}

pub fn update_profile(db: &Database, user_id: Uuid, update: ProfileUpdate) -> Result<User, ApiError> {
    let name = update.name.as_deref().map(str::trim);
    let username = update.username.as_deref().map(str::trim);
    let avatar = update.avatar_url.as_deref().map(str::trim).filter(|a| !a.is_empty());

    if name.is_some_and(str::is_empty) {
        return Err(ApiError::bad_request("name cannot be empty"));
    }
    if name.is_none() && username.is_none() && avatar.is_none() {
        return Err(ApiError::bad_request("Nothing to update"));
    }

    let user = load(db, user_id)?;
    if let Some(username) = username {
        validate_username(username)?;
        if let Some(owner) = db.get_user_by_username(username)? {
            if owner.id != user.id {
                return Err(ApiError::conflict("Username is already taken"));
            }
        }
    }

    db.update_profile(&user.id, name, username, avatar)?;
    me(db, user_id)
}

/// Start moving the account to a new address. The code goes to the new
/// address and the address rides along as the code's payload.
pub fn request_email_change(
    db: &Database,
    user_id: Uuid,
    new_email: &str,
    password: &str,
) -> Result<IssuedOtp, ApiError> {
    let email = normalize_email(new_email);
    validate_email(&email)?;

    let user = load(db, user_id)?;
    check_password(&user, password)?;
    if email == user.email {
        return Err(ApiError::bad_request("That is already your email"));
    }
    if db.get_user_by_email(&email)?.is_some() {
        return Err(ApiError::conflict("Email is already registered"));
    }

    let code = otp::issue(db, &user.id, OtpPurpose::EmailChange, Some(&email))?;
    Ok(IssuedOtp { email, code })
}

pub fn confirm_email_change(db: &Database, user_id: Uuid, code: &str) -> Result<User, ApiError> {
    let user = load(db, user_id)?;
    let otp = otp::consume(db, &user.id, OtpPurpose::EmailChange, code)?;
    let email = otp
        .payload
        .ok_or_else(|| ApiError::bad_request("No email change in progress"))?;

    // Someone may have registered the address since the request.
    if db.get_user_by_email(&email)?.is_some() {
        return Err(ApiError::conflict("Email is already registered"));
    }

    db.update_email(&user.id, &email)?;
    info!("User {} changed email", user.id);
    me(db, user_id)
}

pub fn resend_email_change(db: &Database, user_id: Uuid) -> Result<IssuedOtp, ApiError> {
    let user = load(db, user_id)?;
    let email = db
        .get_otp(&user.id, OtpPurpose::EmailChange)?
        .and_then(|otp| otp.payload)
        .ok_or_else(|| ApiError::bad_request("No email change in progress"))?;

    let code = otp::issue(db, &user.id, OtpPurpose::EmailChange, Some(&email))?;
    Ok(IssuedOtp { email, code })
}

pub fn request_account_deletion(db: &Database, user_id: Uuid, password: &str) -> Result<IssuedOtp, ApiError> {
    let user = load(db, user_id)?;
    check_password(&user, password)?;

    let code = otp::issue(db, &user.id, OtpPurpose::DeleteAccount, None)?;
    Ok(IssuedOtp {
        email: user.email,
        code,
    })
}

/// Delete the account. One-to-one chats go entirely, groups are left the
/// way `remove_member` leaves them, and any remaining messages by the user
/// are removed, all in one transaction. Returns what happened to each chat
/// so it can be announced.
pub fn confirm_account_deletion(db: &Database, user_id: Uuid, code: &str) -> Result<Vec<Removal>, ApiError> {
    let user = load(db, user_id)?;
    otp::consume(db, &user.id, OtpPurpose::DeleteAccount, code)?;

    let plan: Vec<ChatTeardown> = db
        .all_chats_for_user(&user.id)?
        .into_iter()
        .map(|chat| match (&chat.kind, chats::successor(&chat, &user.id)) {
            (ChatKind::Group { admin, .. }, Some(successor)) => ChatTeardown::Leave {
                new_admin: (*admin == user_id).then(|| successor.clone()),
                chat_id: chat.id.clone(),
            },
            _ => ChatTeardown::Delete {
                chat_id: chat.id.clone(),
            },
        })
        .collect();

    let orphaned = db.delete_account(&user.id, &plan)?;
    info!(
        "Deleted account {} ({} chats touched, {} group messages removed)",
        user.id,
        plan.len(),
        orphaned
    );

    plan.iter()
        .map(|teardown| -> Result<Removal, ApiError> {
            match teardown {
                ChatTeardown::Delete { chat_id } => Ok(Removal::Deleted(views::parse_id(chat_id))),
                ChatTeardown::Leave { chat_id, .. } => {
                    let chat = db
                        .get_chat(chat_id)?
                        .ok_or_else(|| ApiError::not_found("Chat not found"))?;
                    Ok(Removal::Updated(views::chat(db, chat)?))
                }
            }
        })
        .collect()
}
