use std::collections::HashSet;

use tracing::info;
use uuid::Uuid;

use yapyap_db::Database;
use yapyap_db::models::ChatRow;
use yapyap_types::api::{CreateGroupRequest, Page, RenameGroupRequest};
use yapyap_types::models::{Chat, ChatKind};

use super::{Paging, views};
use crate::error::ApiError;

/// Result of taking someone out of a group.
#[derive(Debug, Clone, PartialEq)]
pub enum Removal {
    Updated(Chat),
    /// Nobody was left, so the chat and its messages are gone.
    Deleted(Uuid),
}

fn load(db: &Database, chat_id: Uuid) -> Result<ChatRow, ApiError> {
    db.get_chat(&chat_id.to_string())?
        .ok_or_else(|| ApiError::not_found("Chat not found"))
}

/// Load a group the requester administers.
fn load_admin_group(db: &Database, requester: Uuid, chat_id: Uuid) -> Result<ChatRow, ApiError> {
    let chat = load(db, chat_id)?;
    match chat.kind.admin() {
        None => Err(ApiError::bad_request("This is not a group chat")),
        Some(admin) if admin != requester => {
            Err(ApiError::forbidden("Only the group admin can do that"))
        }
        Some(_) => Ok(chat),
    }
}

/// The one-to-one chat between two users, created on first access. The flag
/// says whether it was just created.
pub fn access(db: &Database, requester: Uuid, other: Option<Uuid>) -> Result<(Chat, bool), ApiError> {
    let other = other.ok_or_else(|| ApiError::bad_request("userId is required"))?;
    if other == requester {
        return Err(ApiError::bad_request("You cannot start a chat with yourself"));
    }

    let (me, them) = (requester.to_string(), other.to_string());
    if db.get_user_by_id(&them)?.is_none() {
        return Err(ApiError::not_found("User not found"));
    }

    if let Some(existing) = db.find_direct_chat(&me, &them)? {
        return Ok((views::chat(db, existing)?, false));
    }

    let id = Uuid::new_v4();
    db.create_chat(&id.to_string(), &ChatKind::OneToOne, &[me, them])?;
    info!("Created direct chat {} between {} and {}", id, requester, other);
    Ok((views::chat(db, load(db, id)?)?, true))
}

pub fn list(db: &Database, requester: Uuid, paging: Paging) -> Result<Page<Chat>, ApiError> {
    let rows = db.list_chats_for_user(&requester.to_string(), paging.offset(), paging.limit)?;
    Ok(Page {
        data: views::chats(db, rows)?,
        page: paging.page,
        limit: paging.limit,
    })
}

pub fn create_group(db: &Database, requester: Uuid, req: &CreateGroupRequest) -> Result<Chat, ApiError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Group name is required"));
    }

    let mut others: Vec<String> = Vec::new();
    for id in req.users.iter().filter(|id| **id != requester).map(Uuid::to_string) {
        if !others.contains(&id) {
            others.push(id);
        }
    }
    // Unknown ids are dropped.
    let known: HashSet<String> = db.get_users_by_ids(&others)?.into_iter().map(|u| u.id).collect();
    others.retain(|id| known.contains(id));
    if others.is_empty() {
        return Err(ApiError::bad_request("A group needs at least one other member"));
    }

    let mut members = vec![requester.to_string()];
    members.extend(others);

    let id = Uuid::new_v4();
    let kind = ChatKind::Group {
        name: name.to_string(),
        avatar: req.group_avatar.clone().filter(|a| !a.trim().is_empty()),
        admin: requester,
    };
    db.create_chat(&id.to_string(), &kind, &members)?;
    info!("Created group {} '{}' with {} members", id, name, members.len());

    views::chat(db, load(db, id)?)
}

pub fn rename(db: &Database, requester: Uuid, req: &RenameGroupRequest) -> Result<Chat, ApiError> {
    let name = req.name.as_deref().map(str::trim);
    if name.is_some_and(str::is_empty) {
        return Err(ApiError::bad_request("Group name cannot be empty"));
    }
    let avatar = req.group_avatar.as_deref().filter(|a| !a.trim().is_empty());
    if name.is_none() && avatar.is_none() {
        return Err(ApiError::bad_request("Nothing to update"));
    }

    let chat = load_admin_group(db, requester, req.chat_id)?;
    db.update_group(&chat.id, name, avatar)?;
    views::chat(db, load(db, req.chat_id)?)
}

/// Adding someone who is already in the group changes nothing.
pub fn add_member(db: &Database, requester: Uuid, chat_id: Uuid, user_id: Uuid) -> Result<Chat, ApiError> {
    let chat = load_admin_group(db, requester, chat_id)?;
    if db.get_user_by_id(&user_id.to_string())?.is_none() {
        return Err(ApiError::not_found("User not found"));
    }

    db.add_chat_member(&chat.id, &user_id.to_string())?;
    views::chat(db, load(db, chat_id)?)
}

/// The admin may remove anyone; everyone else may only remove themselves.
pub fn remove_member(db: &Database, requester: Uuid, chat_id: Uuid, user_id: Uuid) -> Result<Removal, ApiError> {
    let chat = load(db, chat_id)?;
    let Some(admin) = chat.kind.admin() else {
        return Err(ApiError::bad_request("This is not a group chat"));
    };
    if requester != user_id && requester != admin {
        return Err(ApiError::forbidden("Only the group admin can remove other members"));
    }
    if !chat.has_member(&user_id.to_string()) {
        return Err(ApiError::not_found("User is not a member of this chat"));
    }

    leave_group(db, chat, user_id)
}

/// Take a member out of a group. The longest-standing remaining member
/// inherits the admin role; an empty group is deleted with its messages.
pub(crate) fn leave_group(db: &Database, chat: ChatRow, user_id: Uuid) -> Result<Removal, ApiError> {
    let leaving = user_id.to_string();
    db.remove_chat_member(&chat.id, &leaving)?;

    let chat_id = views::parse_id(&chat.id);
    let Some(successor) = successor(&chat, &leaving) else {
        db.delete_messages_for_chat(&chat.id)?;
        db.delete_chat(&chat.id)?;
        info!("Group {} deleted after its last member left", chat.id);
        return Ok(Removal::Deleted(chat_id));
    };

    if chat.kind.admin() == Some(user_id) {
        db.set_chat_admin(&chat.id, successor)?;
        info!("Group {} admin passed from {} to {}", chat.id, leaving, successor);
    }

    Ok(Removal::Updated(views::chat(db, load(db, chat_id)?)?))
}

/// The longest-standing member other than `leaving`.
pub(crate) fn successor<'a>(chat: &'a ChatRow, leaving: &str) -> Option<&'a String> {
    chat.members.iter().find(|m| m.as_str() != leaving)
}

/// One-to-one chats may be deleted by either member, groups only by their
/// admin. Messages go first.
pub fn delete(db: &Database, requester: Uuid, chat_id: Uuid) -> Result<(), ApiError> {
    let chat = load(db, chat_id)?;
    let allowed = match chat.kind.admin() {
        Some(admin) => admin == requester,
        None => chat.has_member(&requester.to_string()),
    };
    if !allowed {
        return Err(ApiError::forbidden("You cannot delete this chat"));
    }

    remove_chat(db, &chat)
}

fn remove_chat(db: &Database, chat: &ChatRow) -> Result<(), ApiError> {
    let removed = db.delete_messages_for_chat(&chat.id)?;
    db.delete_chat(&chat.id)?;
    info!("Deleted chat {} and {} messages", chat.id, removed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::messages::{self, Outgoing};
    use crate::service::testing::{group_chat, seed_user};

    fn group_req(name: &str, users: Vec<Uuid>) -> CreateGroupRequest {
        CreateGroupRequest {
            name: name.into(),
            users,
            group_avatar: None,
        }
    }

    #[test]
    fn access_reuses_the_direct_chat() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let b = seed_user(&db, "bob");

        let (first, created) = access(&db, a, Some(b)).unwrap();
        assert!(created);
        assert_eq!(first.kind, ChatKind::OneToOne);
        assert_eq!(first.members.len(), 2);

        let (again, created) = access(&db, b, Some(a)).unwrap();
        assert!(!created);
        assert_eq!(again.id, first.id);

        assert!(matches!(access(&db, a, Some(a)), Err(ApiError::BadRequest(_))));
        assert!(matches!(access(&db, a, Some(Uuid::new_v4())), Err(ApiError::NotFound(_))));
        assert!(matches!(access(&db, a, None), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn create_group_makes_requester_admin() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let b = seed_user(&db, "bob");
        let c = seed_user(&db, "carol");

        let chat = create_group(&db, a, &group_req("  crew ", vec![b, c, b, a, Uuid::new_v4()])).unwrap();
        assert_eq!(chat.kind.admin(), Some(a));
        assert_eq!(chat.kind.name(), Some("crew"));
        let ids: Vec<Uuid> = chat.members.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![a, b, c]);

        assert!(matches!(create_group(&db, a, &group_req("", vec![b])), Err(ApiError::BadRequest(_))));
        assert!(matches!(create_group(&db, a, &group_req("solo", vec![a])), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn only_admin_manages_the_group() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let b = seed_user(&db, "bob");
        let c = seed_user(&db, "carol");
        let chat = group_chat(&db, a, &[b]);

        let rename_req = RenameGroupRequest {
            chat_id: chat,
            name: Some("renamed".into()),
            group_avatar: None,
        };
        assert!(matches!(rename(&db, b, &rename_req), Err(ApiError::Forbidden(_))));
        assert_eq!(rename(&db, a, &rename_req).unwrap().kind.name(), Some("renamed"));

        assert!(matches!(add_member(&db, b, chat, c), Err(ApiError::Forbidden(_))));
        let grown = add_member(&db, a, chat, c).unwrap();
        assert_eq!(grown.members.len(), 3);
        assert_eq!(add_member(&db, a, chat, c).unwrap().members.len(), 3);

        assert!(matches!(remove_member(&db, b, chat, c), Err(ApiError::Forbidden(_))));
    }

    #[test]
    fn admin_leaving_hands_over_and_last_member_deletes() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let b = seed_user(&db, "bob");
        let c = seed_user(&db, "carol");
        let chat = group_chat(&db, a, &[b, c]);
        messages::send(
            &db,
            Outgoing {
                chat_id: Some(chat),
                sender_id: b,
                content: Some("hey".into()),
                ..Outgoing::default()
            },
            None,
        )
        .unwrap();

        match remove_member(&db, a, chat, a).unwrap() {
            Removal::Updated(updated) => {
                assert_eq!(updated.kind.admin(), Some(b));
                assert!(!updated.has_member(a));
            }
            Removal::Deleted(_) => panic!("group still has members"),
        }

        // Non-admin leaving keeps the admin.
        match remove_member(&db, c, chat, c).unwrap() {
            Removal::Updated(updated) => assert_eq!(updated.kind.admin(), Some(b)),
            Removal::Deleted(_) => panic!("group still has members"),
        }

        assert_eq!(remove_member(&db, b, chat, b).unwrap(), Removal::Deleted(chat));
        assert!(db.get_chat(&chat.to_string()).unwrap().is_none());
    }

    #[test]
    fn delete_permissions_and_cascade() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let b = seed_user(&db, "bob");
        let (direct, _) = access(&db, a, Some(b)).unwrap();
        let group = group_chat(&db, a, &[b]);
        messages::send(
            &db,
            Outgoing {
                chat_id: Some(direct.id),
                sender_id: a,
                content: Some("bye".into()),
                ..Outgoing::default()
            },
            None,
        )
        .unwrap();

        assert!(matches!(delete(&db, b, group), Err(ApiError::Forbidden(_))));
        delete(&db, b, direct.id).unwrap();
        assert!(matches!(delete(&db, b, direct.id), Err(ApiError::NotFound(_))));

        let listed = list(&db, a, Paging::default()).unwrap();
        assert_eq!(listed.data.len(), 1);
        assert_eq!(listed.data[0].id, group);
    }

    #[test]
    fn listing_expands_latest_message() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let b = seed_user(&db, "bob");
        let (direct, _) = access(&db, a, Some(b)).unwrap();
        let sent = messages::send(
            &db,
            Outgoing {
                chat_id: Some(direct.id),
                sender_id: b,
                content: Some("latest".into()),
                ..Outgoing::default()
            },
            None,
        )
        .unwrap();

        let listed = list(&db, a, Paging::default()).unwrap();
        let latest = listed.data[0].latest_message.as_ref().unwrap();
        assert_eq!(latest.id, sent.id);
        assert_eq!(latest.sender.username, "bob");

        // A dangling pointer shows as no latest message.
        messages::delete_one(&db, b, sent.id).unwrap();
        let listed = list(&db, a, Paging::default()).unwrap();
        assert!(listed.data[0].latest_message.is_none());
    }
}
