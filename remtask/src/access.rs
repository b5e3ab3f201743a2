//! One-time access gate, checked before any session is started.
//!
//! `REMTASK_ALLOWED_USERS` holds a comma-separated allow list. When it is unset
//! or empty every user passes.

use crate::error::AuthorizationError;

pub const ALLOWED_USERS_ENV: &str = "REMTASK_ALLOWED_USERS";

pub fn check() -> Result<(), AuthorizationError> {
    let allowed = std::env::var(ALLOWED_USERS_ENV).unwrap_or_default();
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok();
    check_user(&allowed, user.as_deref())
}

pub fn check_user(allowed: &str, user: Option<&str>) -> Result<(), AuthorizationError> {
    let list: Vec<&str> = allowed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if list.is_empty() {
        return Ok(());
    }
    let user = user
        .filter(|u| !u.is_empty())
        .ok_or(AuthorizationError::UnknownUser)?;
    if list.iter().any(|a| a.eq_ignore_ascii_case(user)) {
        Ok(())
    } else {
        Err(AuthorizationError::NotAuthorized {
            user: user.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_allows_everyone() {
        assert!(check_user("", None).is_ok());
        assert!(check_user(" , ", Some("bob")).is_ok());
    }

    #[test]
    fn listed_user_passes_case_insensitively() {
        assert!(check_user("alice, Bob", Some("bob")).is_ok());
    }

    #[test]
    fn unlisted_or_unknown_user_is_refused() {
        assert_eq!(
            check_user("alice", Some("mallory")),
            Err(AuthorizationError::NotAuthorized {
                user: "mallory".into()
            })
        );
        assert_eq!(
            check_user("alice", None),
            Err(AuthorizationError::UnknownUser)
        );
    }
}
