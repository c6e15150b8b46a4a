//! Permission vocabulary: role-level permission strings and the per-document
//! grants carried by shares.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const USER_MANAGE: &str = "user:manage";
pub const DEPARTMENT_MANAGE: &str = "department:manage";
pub const ROLE_MANAGE: &str = "role:manage";
pub const LOGS_VIEW: &str = "logs:view";
pub const DOCUMENT_SEND_DEPARTMENT: &str = "document:send:department";
pub const DOCUMENT_SEND_COMPANY: &str = "document:send:company";

/// Every role permission the application checks somewhere.
pub const ROLE_PERMISSIONS: &[&str] = &[
    USER_MANAGE,
    DEPARTMENT_MANAGE,
    ROLE_MANAGE,
    LOGS_VIEW,
    DOCUMENT_SEND_DEPARTMENT,
    DOCUMENT_SEND_COMPANY,
];

pub const ROLE_DIRECTOR: &str = "Director";
pub const ROLE_HEAD_OF_DEPARTMENT: &str = "Head of Department";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentPermission {
    View,
    Download,
    Comment,
    EditMetadata,
    Resend,
}

impl DocumentPermission {
    pub const ALL: [DocumentPermission; 5] = [
        DocumentPermission::View,
        DocumentPermission::Download,
        DocumentPermission::Comment,
        DocumentPermission::EditMetadata,
        DocumentPermission::Resend,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentPermission::View => "view",
            DocumentPermission::Download => "download",
            DocumentPermission::Comment => "comment",
            DocumentPermission::EditMetadata => "edit_metadata",
            DocumentPermission::Resend => "resend",
        }
    }
}

impl fmt::Display for DocumentPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPermission(pub String);

impl fmt::Display for UnknownPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown document permission '{}'", self.0)
    }
}

impl std::error::Error for UnknownPermission {}

impl FromStr for DocumentPermission {
    type Err = UnknownPermission;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        DocumentPermission::ALL
            .into_iter()
            .find(|permission| permission.as_str() == value)
            .ok_or_else(|| UnknownPermission(value.to_string()))
    }
}

/// Ordered set of document grants. Serializes as a plain list of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<DocumentPermission>);

impl PermissionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn full() -> Self {
        DocumentPermission::ALL.into_iter().collect()
    }

    pub fn view_only() -> Self {
        [DocumentPermission::View].into_iter().collect()
    }

    /// Parses a stored grant. Unrecognized strings are dropped rather than
    /// widening or failing the evaluation.
    pub fn from_stored(values: &[String]) -> Self {
        values
            .iter()
            .filter_map(|value| match value.parse::<DocumentPermission>() {
                Ok(permission) => Some(permission),
                Err(err) => {
                    tracing::warn!(error = %err, "ignoring unrecognized stored permission");
                    None
                }
            })
            .collect()
    }

    /// Parses caller input, rejecting anything outside the vocabulary.
    pub fn parse_strict<S: AsRef<str>>(values: &[S]) -> Result<Self, UnknownPermission> {
        values
            .iter()
            .map(|value| value.as_ref().trim().parse::<DocumentPermission>())
            .collect()
    }

    pub fn contains(&self, permission: DocumentPermission) -> bool {
        self.0.contains(&permission)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = DocumentPermission> + '_ {
        self.0.iter().copied()
    }

    pub fn to_stored(&self) -> Vec<String> {
        self.0.iter().map(|p| p.as_str().to_string()).collect()
    }
}

impl FromIterator<DocumentPermission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = DocumentPermission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
