//! Request-independent business rules. Every function here is synchronous,
//! takes the database directly and is meant to run inside
//! [`crate::tasks::blocking`]. Handlers own HTTP concerns and event
//! publishing; services own validation, permissions and persistence.

pub mod auth;
pub mod chats;
pub mod messages;
pub mod users;
pub mod views;

use yapyap_types::api::PageQuery;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 200;

/// Parsed pagination. Missing, non-numeric or zero values fall back to the
/// defaults; the limit is capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub page: u32,
    pub limit: u32,
    pub ascending: bool,
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
            ascending: true,
        }
    }
}

impl Paging {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page,
            limit,
            ..Self::default()
        }
    }

    pub fn from_query(query: &PageQuery) -> Self {
        Self {
            page: positive_or(query.page.as_deref(), DEFAULT_PAGE),
            limit: positive_or(query.limit.as_deref(), DEFAULT_LIMIT).min(MAX_LIMIT),
            ascending: query.sort.as_deref().is_none_or(|s| s == "asc"),
        }
    }

    pub fn offset(&self) -> u32 {
        (self.page.max(1) - 1).saturating_mul(self.limit)
    }
}

fn positive_or(raw: Option<&str>, default: u32) -> u32 {
    raw.and_then(|s| s.trim().parse::<u32>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(page: Option<&str>, limit: Option<&str>, sort: Option<&str>) -> PageQuery {
        PageQuery {
            page: page.map(String::from),
            limit: limit.map(String::from),
            sort: sort.map(String::from),
        }
    }

    #[test]
    fn defaults_when_absent() {
        assert_eq!(Paging::from_query(&PageQuery::default()), Paging::default());
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let paging = Paging::from_query(&query(Some("abc"), Some("0"), None));
        assert_eq!(paging.page, DEFAULT_PAGE);
        assert_eq!(paging.limit, DEFAULT_LIMIT);
    }

    #[test]
    fn limit_is_capped_and_offset_follows_page() {
        let paging = Paging::from_query(&query(Some("3"), Some("1000"), Some("desc")));
        assert_eq!(paging.limit, MAX_LIMIT);
        assert!(!paging.ascending);
        assert_eq!(paging.offset(), 2 * MAX_LIMIT);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use uuid::Uuid;

    use yapyap_db::Database;
    use yapyap_db::models::NewUser;
    use yapyap_types::models::ChatKind;

    pub const PASSWORD: &str = "correct horse";

    /// A verified user whose password is [`PASSWORD`].
    pub fn seed_user(db: &Database, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        let hash = super::auth::hash_password(PASSWORD).unwrap();
        db.create_user(&NewUser {
            id: &id.to_string(),
            name: username,
            username,
            email: &format!("{}@example.com", username),
            password_hash: &hash,
        })
        .unwrap();
        db.set_user_verified(&id.to_string()).unwrap();
        id
    }

    pub fn direct_chat(db: &Database, a: Uuid, b: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        db.create_chat(&id.to_string(), &ChatKind::OneToOne, &[a.to_string(), b.to_string()])
            .unwrap();
        id
    }

    pub fn group_chat(db: &Database, admin: Uuid, others: &[Uuid]) -> Uuid {
        let id = Uuid::new_v4();
        let mut members = vec![admin.to_string()];
        members.extend(others.iter().map(Uuid::to_string));
        db.create_chat(
            &id.to_string(),
            &ChatKind::Group {
                name: "crew".into(),
                avatar: None,
                admin,
            },
            &members,
        )
        .unwrap();
        id
    }
}
