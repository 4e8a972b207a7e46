//! ACL resolution shared by the bucket, object, and multipart handlers.
//!
//! Three ways a request can carry an ACL, in priority order: a canned
//! `x-amz-acl` header, explicit `x-amz-grant-*` headers, or (for the ACL
//! PUT operations) an `AccessControlPolicy` XML body. Canned and grant
//! headers are mutually exclusive.

use axum::http::HeaderMap;

use crate::errors::S3Error;
use crate::metadata::store::{Acl, AclGrant, AclGrantee};

const ALL_USERS_URI: &str = "http://acs.amazonaws.com/groups/global/AllUsers";
const AUTHENTICATED_USERS_URI: &str =
    "http://acs.amazonaws.com/groups/global/AuthenticatedUsers";

const GRANT_HEADERS: &[(&str, &str)] = &[
    ("x-amz-grant-full-control", "FULL_CONTROL"),
    ("x-amz-grant-read", "READ"),
    ("x-amz-grant-read-acp", "READ_ACP"),
    ("x-amz-grant-write", "WRITE"),
    ("x-amz-grant-write-acp", "WRITE_ACP"),
];

/// Reject requests carrying both a canned ACL and explicit grants.
pub fn check_exclusive_acl_headers(headers: &HeaderMap) -> Result<(), S3Error> {
    if headers.contains_key("x-amz-acl") && has_grant_headers(headers) {
        return Err(S3Error::InvalidArgument {
            message: "Specifying both a canned ACL and x-amz-grant headers is not allowed"
                .to_string(),
        });
    }
    Ok(())
}

fn has_grant_headers(headers: &HeaderMap) -> bool {
    GRANT_HEADERS
        .iter()
        .any(|(name, _)| headers.contains_key(*name))
}

/// Expand a canned ACL name into grants.
pub fn canned_acl(name: &str, owner_id: &str, owner_display: &str) -> Result<Acl, S3Error> {
    let mut acl = Acl::full_control(owner_id, owner_display);
    match name {
        "private" => {}
        "public-read" => {
            acl.grants.push(group_grant(ALL_USERS_URI, "READ"));
        }
        "public-read-write" => {
            acl.grants.push(group_grant(ALL_USERS_URI, "READ"));
            acl.grants.push(group_grant(ALL_USERS_URI, "WRITE"));
        }
        "authenticated-read" => {
            acl.grants.push(group_grant(AUTHENTICATED_USERS_URI, "READ"));
        }
        other => {
            return Err(S3Error::InvalidArgument {
                message: format!("Invalid canned ACL: {other}"),
            });
        }
    }
    Ok(acl)
}

fn group_grant(uri: &str, permission: &str) -> AclGrant {
    AclGrant {
        grantee: AclGrantee::Group {
            uri: uri.to_string(),
        },
        permission: permission.to_string(),
    }
}

/// Parse `x-amz-grant-*` headers. Each value is a comma-separated list of
/// `id="canonical-id"` or `uri="group-uri"` grantees. Returns `None` when
/// no grant header is present.
pub fn acl_from_grant_headers(
    headers: &HeaderMap,
    owner_id: &str,
    owner_display: &str,
) -> Option<Acl> {
    if !has_grant_headers(headers) {
        return None;
    }
    let mut acl = Acl::full_control(owner_id, owner_display);
    for (header, permission) in GRANT_HEADERS {
        let Some(value) = headers.get(*header).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        for grantee in value.split(',') {
            if let Some(grant) = parse_grantee(grantee.trim(), permission) {
                acl.grants.push(grant);
            }
        }
    }
    Some(acl)
}

fn parse_grantee(spec: &str, permission: &str) -> Option<AclGrant> {
    if let Some(rest) = spec.strip_prefix("id=") {
        let id = rest.trim_matches('"').trim_matches('\'').to_string();
        Some(AclGrant {
            grantee: AclGrantee::CanonicalUser {
                id: id.clone(),
                display_name: id,
            },
            permission: permission.to_string(),
        })
    } else if let Some(rest) = spec.strip_prefix("uri=") {
        Some(AclGrant {
            grantee: AclGrantee::Group {
                uri: rest.trim_matches('"').trim_matches('\'').to_string(),
            },
            permission: permission.to_string(),
        })
    } else {
        None
    }
}

/// Resolve the ACL for a create-style operation (PutObject, CreateBucket,
/// CreateMultipartUpload): canned header, then grant headers, then the
/// owner-only default. Returns the serialized JSON form for storage.
pub fn resolve_request_acl(
    headers: &HeaderMap,
    owner_id: &str,
    owner_display: &str,
) -> Result<String, S3Error> {
    check_exclusive_acl_headers(headers)?;
    let acl = if let Some(canned) = headers.get("x-amz-acl").and_then(|v| v.to_str().ok()) {
        canned_acl(canned, owner_id, owner_display)?
    } else if let Some(acl) = acl_from_grant_headers(headers, owner_id, owner_display) {
        acl
    } else {
        Acl::full_control(owner_id, owner_display)
    };
    Ok(acl.to_json())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn canned_private_is_owner_only() {
        let acl = canned_acl("private", "o", "O").unwrap();
        assert_eq!(acl.grants.len(), 1);
        assert_eq!(acl.grants[0].permission, "FULL_CONTROL");
    }

    #[test]
    fn canned_public_read_write_adds_group_grants() {
        let acl = canned_acl("public-read-write", "o", "O").unwrap();
        let permissions: Vec<&str> = acl.grants.iter().map(|g| g.permission.as_str()).collect();
        assert_eq!(permissions, vec!["FULL_CONTROL", "READ", "WRITE"]);
    }

    #[test]
    fn canned_unknown_is_invalid_argument() {
        assert!(matches!(
            canned_acl("sideways-read", "o", "O"),
            Err(S3Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn exclusive_check_rejects_mixed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-amz-acl", HeaderValue::from_static("private"));
        headers.insert("x-amz-grant-read", HeaderValue::from_static("id=\"abc\""));
        assert!(check_exclusive_acl_headers(&headers).is_err());
    }

    #[test]
    fn grant_headers_parse_ids_and_uris() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-amz-grant-read",
            HeaderValue::from_static(
                "id=\"user-1\", uri=\"http://acs.amazonaws.com/groups/global/AllUsers\"",
            ),
        );
        let acl = acl_from_grant_headers(&headers, "o", "O").unwrap();
        // Owner FULL_CONTROL plus the two READ grants.
        assert_eq!(acl.grants.len(), 3);
        assert!(acl
            .grants
            .iter()
            .any(|g| matches!(&g.grantee, AclGrantee::Group { uri } if uri.contains("AllUsers"))));
    }

    #[test]
    fn resolve_defaults_to_full_control() {
        let json = resolve_request_acl(&HeaderMap::new(), "o", "O").unwrap();
        let acl: Acl = serde_json::from_str(&json).unwrap();
        assert_eq!(acl.owner.id, "o");
        assert_eq!(acl.grants.len(), 1);
    }
}
