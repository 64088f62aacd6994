//! Permission resolution.
//!
//! The pipeline derives the permission tags a request needs from its
//! method and shape; an external verifier resolves them against
//! session and role policy. The bundled [`DefaultVerifier`] grants the
//! default set.

use crate::error::{CollectionError, CollectionResult};
use crate::request::{Method, Request, Session};
use std::collections::BTreeSet;
use std::fmt;

/// A permission tag a request may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    /// Listing or querying without an id.
    QueryMultiple,
    /// Reading a single document by id.
    QueryById,
    /// Creating a single document.
    Create,
    /// Creating several documents in one request.
    CreateMultiple,
    /// Updating a single document by id.
    UpdateById,
    /// Updating every document matching a query.
    UpdateMultiple,
    /// Removing a single document by id.
    DeleteById,
    /// Removing every document matching a query.
    DeleteMultiple,
}

impl Permission {
    /// The permissions granted when no policy says otherwise.
    pub const DEFAULT_ALLOWED: [Permission; 5] = [
        Permission::QueryMultiple,
        Permission::QueryById,
        Permission::Create,
        Permission::DeleteById,
        Permission::UpdateById,
    ];

    /// Returns the human-readable tag for this permission.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::QueryMultiple => "querying multiple objects",
            Self::QueryById => "querying an object by id",
            Self::Create => "creating an object",
            Self::CreateMultiple => "creating multiple objects",
            Self::UpdateById => "updating an object by id",
            Self::UpdateMultiple => "updating multiple objects",
            Self::DeleteById => "deleting an object by id",
            Self::DeleteMultiple => "deleting multiple objects",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Derives the permission set a request requires.
///
/// The id presence must already be normalized onto the query (see
/// [`Request::normalize_id`]).
#[must_use]
pub fn required_permissions(request: &Request) -> BTreeSet<Permission> {
    let has_id = request.query_id().is_some();

    let required: &[Permission] = match request.method {
        Method::Get if has_id => &[Permission::QueryById],
        Method::Get => &[Permission::QueryMultiple],
        Method::Post if request.body.is_many() => &[Permission::CreateMultiple],
        Method::Post if has_id => &[Permission::UpdateById, Permission::QueryById],
        Method::Post => &[Permission::Create],
        Method::Put if has_id => &[Permission::UpdateById, Permission::QueryById],
        Method::Put => &[Permission::QueryMultiple, Permission::UpdateMultiple],
        Method::Delete if has_id => &[Permission::DeleteById],
        Method::Delete => &[Permission::DeleteMultiple],
    };

    required.iter().copied().collect()
}

/// External policy seam: resolves a required permission set against a
/// session.
pub trait PermissionVerifier: Send + Sync {
    /// Returns `Ok(())` when the session holds every required
    /// permission, `Err(Forbidden)` otherwise.
    fn verify(
        &self,
        session: &Session,
        required: &BTreeSet<Permission>,
    ) -> CollectionResult<()>;
}

/// Grants the default permission set to everyone, and everything to
/// root.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultVerifier;

impl PermissionVerifier for DefaultVerifier {
    fn verify(
        &self,
        session: &Session,
        required: &BTreeSet<Permission>,
    ) -> CollectionResult<()> {
        if session.is_root() {
            return Ok(());
        }
        match required
            .iter()
            .find(|permission| !Permission::DEFAULT_ALLOWED.contains(permission))
        {
            Some(denied) => Err(CollectionError::forbidden(format!(
                "Not allowed: {denied}"
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(method: Method, path: &str) -> Request {
        let mut req = Request::new(method, path);
        req.normalize_id();
        req
    }

    #[test]
    fn get_permissions() {
        let required = required_permissions(&request(Method::Get, "/"));
        assert_eq!(required, BTreeSet::from([Permission::QueryMultiple]));

        let required = required_permissions(&request(Method::Get, "/x"));
        assert_eq!(required, BTreeSet::from([Permission::QueryById]));
    }

    #[test]
    fn post_permissions() {
        let required = required_permissions(&request(Method::Post, "/"));
        assert_eq!(required, BTreeSet::from([Permission::Create]));

        let mut bulk = Request::new(Method::Post, "/").with_body(json!([{"a": 1}]));
        bulk.normalize_id();
        assert_eq!(
            required_permissions(&bulk),
            BTreeSet::from([Permission::CreateMultiple])
        );

        let required = required_permissions(&request(Method::Post, "/x"));
        assert_eq!(
            required,
            BTreeSet::from([Permission::UpdateById, Permission::QueryById])
        );
    }

    #[test]
    fn put_permissions() {
        let required = required_permissions(&request(Method::Put, "/x"));
        assert_eq!(
            required,
            BTreeSet::from([Permission::UpdateById, Permission::QueryById])
        );

        let required = required_permissions(&request(Method::Put, "/"));
        assert_eq!(
            required,
            BTreeSet::from([Permission::QueryMultiple, Permission::UpdateMultiple])
        );
    }

    #[test]
    fn delete_permissions() {
        let required = required_permissions(&request(Method::Delete, "/x"));
        assert_eq!(required, BTreeSet::from([Permission::DeleteById]));

        let required = required_permissions(&request(Method::Delete, "/"));
        assert_eq!(required, BTreeSet::from([Permission::DeleteMultiple]));
    }

    #[test]
    fn body_id_counts_for_post() {
        let mut req = Request::new(Method::Post, "/").with_body(json!({"id": "x"}));
        req.normalize_id();
        assert_eq!(
            required_permissions(&req),
            BTreeSet::from([Permission::UpdateById, Permission::QueryById])
        );
    }

    #[test]
    fn default_verifier_grants_default_set() {
        let verifier = DefaultVerifier;
        let session = Session::anonymous();

        let allowed = BTreeSet::from([Permission::Create, Permission::QueryById]);
        assert!(verifier.verify(&session, &allowed).is_ok());

        let denied = BTreeSet::from([Permission::DeleteMultiple]);
        let err = verifier.verify(&session, &denied).unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert!(err.to_string().contains("deleting multiple objects"));
    }

    #[test]
    fn default_verifier_grants_everything_to_root() {
        let verifier = DefaultVerifier;
        let denied = BTreeSet::from([Permission::UpdateMultiple]);
        assert!(verifier.verify(&Session::root(), &denied).is_ok());
    }
}
