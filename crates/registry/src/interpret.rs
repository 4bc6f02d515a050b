//! Translate store errors into boundary errors, adding kind and name.
//!
//! The kind of an already classified error never changes here.

use vessel_core::{CodecError, Error};
use vessel_store::StoreError;

const MODIFIED: &str = "the object has been modified; please apply your changes to the latest version and try again";

pub fn interpret_store_error(err: StoreError, kind: &str, name: &str) -> Error {
    match err {
        StoreError::NotFound { .. } => Error::not_found(kind, name),
        StoreError::AlreadyExists { .. } => Error::already_exists(kind, name),
        StoreError::Conflict { .. } => Error::conflict(kind, name, MODIFIED),
        StoreError::TooOld { requested, .. } => Error::watch_expired(kind, &requested),
        StoreError::InvalidVersion(v) => Error::BadRequest(format!("{kind} {name}: invalid resource version {v:?}")),
        StoreError::Unavailable(msg) => Error::StoreUnavailable(msg),
    }
}

/// `resource_version` is the token the caller asked to resume from.
pub fn interpret_watch_error(err: StoreError, kind: &str, resource_version: &str) -> Error {
    match err {
        StoreError::TooOld { .. } => Error::watch_expired(kind, resource_version),
        other => interpret_store_error(other, kind, ""),
    }
}

pub fn interpret_codec_error(err: CodecError, kind: &str, name: &str) -> Error {
    Error::Internal(format!("{kind} {name}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_kind_and_id() {
        let e = interpret_store_error(StoreError::NotFound { key: "/routes/ns/foo".into() }, "Route", "foo");
        assert_eq!(e.to_string(), "Route foo not found");
    }

    #[test]
    fn create_collision_is_already_exists() {
        let e = interpret_store_error(StoreError::AlreadyExists { key: "/images/ns/a".into() }, "Image", "a");
        assert!(e.is_already_exists());
        assert_eq!(e.code(), 409);
    }

    #[test]
    fn stale_update_is_conflict() {
        let err = StoreError::Conflict { key: "/k".into(), expected: "1".into(), actual: "2".into() };
        let e = interpret_store_error(err, "BuildConfig", "abc");
        assert!(e.is_conflict());
        assert!(e.to_string().starts_with("BuildConfig abc cannot be updated"));
    }

    #[test]
    fn expired_watch_reports_callers_token() {
        let err = StoreError::TooOld { requested: "5".into(), oldest: "9".into() };
        let e = interpret_watch_error(err, "Route", "4");
        assert_eq!(e.to_string(), "Route watch: resource version 4 is too old");
    }

    #[test]
    fn outages_stay_outages() {
        let e = interpret_store_error(StoreError::Unavailable("down".into()), "Deployment", "x");
        assert_eq!(e, Error::StoreUnavailable("down".into()));
        assert_eq!(interpret_store_error(StoreError::Unavailable("down".into()), "Route", "").code(), 503);
    }
}
