//! Authorization core: who the caller is, what their role allows, what they
//! may do with a given document, and the share/distribution ledgers that
//! change those answers.

pub mod audit;
pub mod distribution;
pub mod error;
pub mod evaluator;
pub mod gate;
pub mod permissions;
pub mod principal;
pub mod sharing;

pub use error::{AccessError, AccessResult};
pub use evaluator::{AccessSource, DocumentAccess};
pub use gate::{require_permissions, PermissionGate, Requirement};
pub use permissions::{DocumentPermission, PermissionSet};
pub use principal::Principal;
