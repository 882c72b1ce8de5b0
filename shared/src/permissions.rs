//! Permission matrix for organization roles.
//!
//! Roles store a list of [`Permission`]s. The system `Admin` role implicitly
//! holds every permission and cannot be edited.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ParseEnumError;

pub const ADMIN_ROLE: &str = "Admin";
pub const MEMBER_ROLE: &str = "Member";
pub const GUEST_ROLE: &str = "Guest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "issue:view")]
    IssueView,
    #[serde(rename = "issue:create")]
    IssueCreate,
    #[serde(rename = "issue:edit")]
    IssueEdit,
    #[serde(rename = "issue:assign")]
    IssueAssign,
    #[serde(rename = "issue:delete")]
    IssueDelete,
    #[serde(rename = "comment:create")]
    CommentCreate,
    #[serde(rename = "comment:delete_any")]
    CommentDeleteAny,
    #[serde(rename = "machine:edit")]
    MachineEdit,
    #[serde(rename = "machine:delete")]
    MachineDelete,
    #[serde(rename = "location:edit")]
    LocationEdit,
    #[serde(rename = "location:delete")]
    LocationDelete,
    #[serde(rename = "collection:manage")]
    CollectionManage,
    #[serde(rename = "organization:manage")]
    OrganizationManage,
    #[serde(rename = "user:manage")]
    UserManage,
    #[serde(rename = "role:manage")]
    RoleManage,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::IssueView => "issue:view",
            Permission::IssueCreate => "issue:create",
            Permission::IssueEdit => "issue:edit",
            Permission::IssueAssign => "issue:assign",
            Permission::IssueDelete => "issue:delete",
            Permission::CommentCreate => "comment:create",
            Permission::CommentDeleteAny => "comment:delete_any",
            Permission::MachineEdit => "machine:edit",
            Permission::MachineDelete => "machine:delete",
            Permission::LocationEdit => "location:edit",
            Permission::LocationDelete => "location:delete",
            Permission::CollectionManage => "collection:manage",
            Permission::OrganizationManage => "organization:manage",
            Permission::UserManage => "user:manage",
            Permission::RoleManage => "role:manage",
        }
    }

    pub fn all() -> &'static [Permission] {
        &[
            Permission::IssueView,
            Permission::IssueCreate,
            Permission::IssueEdit,
            Permission::IssueAssign,
            Permission::IssueDelete,
            Permission::CommentCreate,
            Permission::CommentDeleteAny,
            Permission::MachineEdit,
            Permission::MachineDelete,
            Permission::LocationEdit,
            Permission::LocationDelete,
            Permission::CollectionManage,
            Permission::OrganizationManage,
            Permission::UserManage,
            Permission::RoleManage,
        ]
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::all()
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ParseEnumError {
                kind: "permission",
                value: s.to_string(),
            })
    }
}

/// Permissions granted to the seeded `Member` role.
pub fn default_member_permissions() -> Vec<Permission> {
    vec![
        Permission::IssueView,
        Permission::IssueCreate,
        Permission::IssueEdit,
        Permission::IssueAssign,
        Permission::CommentCreate,
        Permission::MachineEdit,
        Permission::LocationEdit,
        Permission::CollectionManage,
    ]
}

/// Permissions granted to the seeded `Guest` role.
pub fn guest_permissions() -> Vec<Permission> {
    vec![
        Permission::IssueView,
        Permission::IssueCreate,
        Permission::CommentCreate,
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("missing permission '{0}'")]
pub struct PermissionDenied(pub Permission);

/// The ownership facts about an issue that the rules below need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssueAccess {
    pub reporter_id: Option<i32>,
    pub assignee_id: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommentAccess {
    pub author_id: i32,
    pub deleted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    pub is_admin: bool,
    pub permissions: BTreeSet<Permission>,
}

impl PermissionSet {
    pub fn admin() -> Self {
        Self {
            is_admin: true,
            permissions: Permission::all().iter().copied().collect(),
        }
    }

    pub fn from_permissions(perms: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            is_admin: false,
            permissions: perms.into_iter().collect(),
        }
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.is_admin || self.permissions.contains(&permission)
    }

    pub fn require(&self, permission: Permission) -> Result<(), PermissionDenied> {
        if self.has(permission) {
            Ok(())
        } else {
            Err(PermissionDenied(permission))
        }
    }

    /// Editors may change any issue; reporters may change their own.
    pub fn can_edit_issue(&self, user_id: i32, issue: &IssueAccess) -> bool {
        self.has(Permission::IssueEdit)
            || (issue.reporter_id == Some(user_id) && self.has(Permission::IssueCreate))
    }

    /// The assignee may move an issue through its workflow even without edit rights.
    pub fn can_change_status(&self, user_id: i32, issue: &IssueAccess) -> bool {
        self.has(Permission::IssueEdit) || issue.assignee_id == Some(user_id)
    }

    pub fn can_assign(&self) -> bool {
        self.has(Permission::IssueAssign)
    }

    pub fn can_edit_comment(&self, user_id: i32, comment: &CommentAccess) -> bool {
        !comment.deleted && comment.author_id == user_id
    }

    pub fn can_delete_comment(&self, user_id: i32, comment: &CommentAccess) -> bool {
        !comment.deleted
            && (comment.author_id == user_id || self.has(Permission::CommentDeleteAny))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member() -> PermissionSet {
        PermissionSet::from_permissions(default_member_permissions())
    }

    fn guest() -> PermissionSet {
        PermissionSet::from_permissions(guest_permissions())
    }

    #[test]
    fn admin_has_everything() {
        let admin = PermissionSet::admin();
        assert!(Permission::all().iter().all(|p| admin.has(*p)));

        // is_admin wins even when the stored list is empty
        let bare = PermissionSet {
            is_admin: true,
            permissions: BTreeSet::new(),
        };
        assert!(bare.has(Permission::RoleManage));
    }

    #[test]
    fn require_reports_missing_permission() {
        let err = guest().require(Permission::IssueDelete).unwrap_err();
        assert_eq!(err, PermissionDenied(Permission::IssueDelete));
        assert_eq!(err.to_string(), "missing permission 'issue:delete'");
        assert!(guest().require(Permission::IssueCreate).is_ok());
    }

    #[test]
    fn guests_edit_only_their_own_issues() {
        let own = IssueAccess {
            reporter_id: Some(7),
            assignee_id: None,
        };
        let other = IssueAccess {
            reporter_id: Some(8),
            assignee_id: None,
        };
        assert!(guest().can_edit_issue(7, &own));
        assert!(!guest().can_edit_issue(7, &other));
        assert!(member().can_edit_issue(7, &other));
    }

    #[test]
    fn anonymous_issue_is_not_owned_by_anyone() {
        let anon = IssueAccess {
            reporter_id: None,
            assignee_id: None,
        };
        assert!(!guest().can_edit_issue(7, &anon));
    }

    #[test]
    fn assignee_can_change_status_without_edit() {
        let issue = IssueAccess {
            reporter_id: None,
            assignee_id: Some(3),
        };
        assert!(guest().can_change_status(3, &issue));
        assert!(!guest().can_change_status(4, &issue));
        assert!(member().can_change_status(4, &issue));
    }

    #[test]
    fn comment_rules() {
        let mine = CommentAccess {
            author_id: 1,
            deleted: false,
        };
        let theirs = CommentAccess {
            author_id: 2,
            deleted: false,
        };
        let gone = CommentAccess {
            author_id: 1,
            deleted: true,
        };

        assert!(member().can_edit_comment(1, &mine));
        assert!(!member().can_edit_comment(1, &theirs));
        assert!(!member().can_edit_comment(1, &gone));

        assert!(member().can_delete_comment(1, &mine));
        assert!(!member().can_delete_comment(1, &theirs));
        assert!(PermissionSet::admin().can_delete_comment(1, &theirs));
        assert!(!PermissionSet::admin().can_delete_comment(1, &gone));
    }

    #[test]
    fn permission_wire_form() {
        let json = serde_json::to_string(&Permission::CommentDeleteAny).unwrap();
        assert_eq!(json, "\"comment:delete_any\"");
        assert_eq!("role:manage".parse::<Permission>(), Ok(Permission::RoleManage));
        assert!("role:destroy".parse::<Permission>().is_err());
    }
}
