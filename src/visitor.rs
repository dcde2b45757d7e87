//! Identification of anonymous visitors across requests.
//!
//! An anonymous visitor's id lives in the `fluidfeatures_anonymous` cookie so
//! that the same visitor sees the same features on every request. Reading and
//! writing the cookie is the host framework's job; [`resolve_visitor`] only
//! decides what the id is and what should happen to the cookie.

use rand::Rng;

use crate::user::UserIdentity;

pub const ANONYMOUS_COOKIE: &str = "fluidfeatures_anonymous";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieAction {
    /// Leave the cookie as it is.
    Keep,
    /// Write the anonymous id to the cookie.
    Set(String),
    /// The visitor has authenticated; delete the cookie.
    Clear,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Visitor {
    pub user: UserIdentity,
    pub cookie: CookieAction,
}

/// Decide who the current visitor is.
///
/// `known` is what the host application knows about the current user (if
/// anything); `cookie` is the current value of [`ANONYMOUS_COOKIE`].
pub fn resolve_visitor(known: Option<UserIdentity>, cookie: Option<&str>) -> Visitor {
    let cookie = cookie.filter(|c| !c.trim().is_empty());
    let mut user = known.unwrap_or_default();

    if !user.unique_id.is_empty() && !user.anonymous {
        let action = if cookie.is_some() {
            CookieAction::Clear
        } else {
            CookieAction::Keep
        };
        return Visitor {
            user,
            cookie: action,
        };
    }

    user.anonymous = true;
    if user.unique_id.is_empty() {
        user.unique_id = match cookie {
            Some(id) => id.to_string(),
            None => new_anonymous_id(),
        };
    }
    let action = CookieAction::Set(user.unique_id.clone());
    Visitor {
        user,
        cookie: action,
    }
}

/// A fresh id of the form `anon-<random>-<microseconds>`.
pub fn new_anonymous_id() -> String {
    let random: u64 = rand::thread_rng().gen_range(0..9_999_999_999);
    let micros = chrono::Utc::now().timestamp_subsec_micros() % 1_000_000;
    format!("anon-{}-{}", random, micros)
}
