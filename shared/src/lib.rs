pub mod filters;
pub mod permissions;
pub mod types;

pub use filters::{FilterError, IssueFilterParams, IssueFilters, IssueSort, PersonFilter};
pub use permissions::{Permission, PermissionSet};
pub use types::*;
