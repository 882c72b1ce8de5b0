use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::db::schema::*;

// ============================================================================
// Organization
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = organizations)]
pub struct Organization {
    pub id: i32,
    pub name: String,
    pub subdomain: String,
    pub logo_url: Option<String>,
    pub allow_anonymous_issues: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = organizations)]
pub struct UpdateOrganization {
    pub name: Option<String>,
    pub logo_url: Option<Option<String>>,
    pub allow_anonymous_issues: Option<bool>,
    pub updated_at: Option<DateTime<Utc>>,
}

// ============================================================================
// User
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub email: String,
    pub name: String,
    pub initials: Option<String>,
    pub email_notifications_enabled: bool,
    pub in_app_notifications_enabled: bool,
    pub email_on_new_issue: bool,
    pub email_on_assigned: bool,
    pub email_on_status_change: bool,
    pub email_on_comment: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn preferences(&self) -> shared::NotificationPreferences {
        shared::NotificationPreferences {
            email_notifications_enabled: self.email_notifications_enabled,
            in_app_notifications_enabled: self.in_app_notifications_enabled,
            email_on_new_issue: self.email_on_new_issue,
            email_on_assigned: self.email_on_assigned,
            email_on_status_change: self.email_on_status_change,
            email_on_comment: self.email_on_comment,
        }
    }

    pub fn summary(&self) -> shared::UserSummary {
        shared::UserSummary {
            id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
            initials: self.initials.clone(),
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub initials: Option<String>,
}

#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = users)]
pub struct UpdatePreferences {
    pub email_notifications_enabled: Option<bool>,
    pub in_app_notifications_enabled: Option<bool>,
    pub email_on_new_issue: Option<bool>,
    pub email_on_assigned: Option<bool>,
    pub email_on_status_change: Option<bool>,
    pub email_on_comment: Option<bool>,
}

impl UpdatePreferences {
    pub fn is_empty(&self) -> bool {
        self.email_notifications_enabled.is_none()
            && self.in_app_notifications_enabled.is_none()
            && self.email_on_new_issue.is_none()
            && self.email_on_assigned.is_none()
            && self.email_on_status_change.is_none()
            && self.email_on_comment.is_none()
    }
}

// ============================================================================
// Role / Membership
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = roles)]
pub struct Role {
    pub id: i32,
    pub organization_id: i32,
    pub name: String,
    pub is_system: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = roles)]
pub struct NewRole {
    pub organization_id: i32,
    pub name: String,
    pub is_system: bool,
    pub is_default: bool,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = roles)]
pub struct UpdateRole {
    pub name: Option<String>,
    pub is_default: Option<bool>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = role_permissions)]
pub struct NewRolePermission {
    pub role_id: i32,
    pub permission: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = memberships)]
pub struct Membership {
    pub id: i32,
    pub user_id: i32,
    pub organization_id: i32,
    pub role_id: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = memberships)]
pub struct NewMembership {
    pub user_id: i32,
    pub organization_id: i32,
    pub role_id: i32,
}

// ============================================================================
// Location
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = locations)]
pub struct Location {
    pub id: i32,
    pub organization_id: i32,
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pinballmap_id: Option<i32>,
    pub sync_enabled: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = locations)]
pub struct NewLocation {
    pub organization_id: i32,
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pinballmap_id: Option<i32>,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = locations)]
pub struct UpdateLocation {
    pub name: Option<String>,
    pub address: Option<Option<String>>,
    pub city: Option<Option<String>>,
    pub state: Option<Option<String>>,
    pub pinballmap_id: Option<Option<i32>>,
    pub sync_enabled: Option<bool>,
    pub updated_at: Option<DateTime<Utc>>,
}

// ============================================================================
// MachineModel
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = machine_models)]
pub struct MachineModel {
    pub id: i32,
    pub organization_id: Option<i32>,
    pub name: String,
    pub manufacturer: Option<String>,
    pub year: Option<i32>,
    pub opdb_id: Option<String>,
    pub pinballmap_id: Option<i32>,
    pub ipdb_id: Option<i32>,
    pub is_custom: bool,
    pub created_at: DateTime<Utc>,
}

impl MachineModel {
    pub fn to_response(&self) -> shared::MachineModelResponse {
        shared::MachineModelResponse {
            id: self.id,
            name: self.name.clone(),
            manufacturer: self.manufacturer.clone(),
            year: self.year,
            opdb_id: self.opdb_id.clone(),
            pinballmap_id: self.pinballmap_id,
            is_custom: self.is_custom,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = machine_models)]
pub struct NewMachineModel {
    pub organization_id: Option<i32>,
    pub name: String,
    pub manufacturer: Option<String>,
    pub year: Option<i32>,
    pub opdb_id: Option<String>,
    pub pinballmap_id: Option<i32>,
    pub ipdb_id: Option<i32>,
    pub is_custom: bool,
}

// ============================================================================
// Machine
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = machines)]
pub struct Machine {
    pub id: i32,
    pub organization_id: i32,
    pub location_id: i32,
    pub model_id: i32,
    pub name: String,
    pub initials: String,
    pub next_issue_number: i32,
    pub owner_id: Option<i32>,
    pub qr_code_id: String,
    pub qr_code_generated_at: DateTime<Utc>,
    pub owner_notifications_enabled: bool,
    pub notify_on_new_issues: bool,
    pub notify_on_status_changes: bool,
    pub notify_on_comments: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = machines)]
pub struct NewMachine {
    pub organization_id: i32,
    pub location_id: i32,
    pub model_id: i32,
    pub name: String,
    pub initials: String,
    pub owner_id: Option<i32>,
    pub qr_code_id: String,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = machines)]
pub struct UpdateMachine {
    pub name: Option<String>,
    pub location_id: Option<i32>,
    pub owner_id: Option<Option<i32>>,
    pub owner_notifications_enabled: Option<bool>,
    pub notify_on_new_issues: Option<bool>,
    pub notify_on_status_changes: Option<bool>,
    pub notify_on_comments: Option<bool>,
    pub updated_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Issue
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = issues)]
pub struct Issue {
    pub id: i32,
    pub organization_id: i32,
    pub machine_id: i32,
    pub number: i32,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub severity: String,
    pub priority: String,
    pub reporter_id: Option<i32>,
    pub reporter_name: Option<String>,
    pub reporter_email: Option<String>,
    pub assignee_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Issue {
    pub fn access(&self) -> shared::permissions::IssueAccess {
        shared::permissions::IssueAccess {
            reporter_id: self.reporter_id,
            assignee_id: self.assignee_id,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = issues)]
pub struct NewIssue {
    pub organization_id: i32,
    pub machine_id: i32,
    pub number: i32,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub severity: String,
    pub priority: String,
    pub reporter_id: Option<i32>,
    pub reporter_name: Option<String>,
    pub reporter_email: Option<String>,
    pub assignee_id: Option<i32>,
}

#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = issues)]
pub struct UpdateIssue {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<String>,
    pub severity: Option<String>,
    pub priority: Option<String>,
    pub assignee_id: Option<Option<i32>>,
    pub resolved_at: Option<Option<DateTime<Utc>>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = issue_watchers)]
pub struct NewIssueWatcher {
    pub issue_id: i32,
    pub user_id: i32,
}

// ============================================================================
// Comment
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = comments)]
pub struct Comment {
    pub id: i32,
    pub organization_id: i32,
    pub issue_id: i32,
    pub author_id: i32,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by_id: Option<i32>,
}

impl Comment {
    pub fn access(&self) -> shared::permissions::CommentAccess {
        shared::permissions::CommentAccess {
            author_id: self.author_id,
            deleted: self.deleted_at.is_some(),
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = comments)]
pub struct NewComment {
    pub organization_id: i32,
    pub issue_id: i32,
    pub author_id: i32,
    pub content: String,
}

// ============================================================================
// IssueHistory
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = issue_history)]
pub struct IssueHistory {
    pub id: i32,
    pub organization_id: i32,
    pub issue_id: i32,
    pub actor_id: Option<i32>,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = issue_history)]
pub struct NewIssueHistory {
    pub organization_id: i32,
    pub issue_id: i32,
    pub actor_id: Option<i32>,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

// ============================================================================
// Notification
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: i32,
    pub organization_id: i32,
    pub user_id: i32,
    pub kind: String,
    pub issue_id: Option<i32>,
    pub machine_id: Option<i32>,
    pub message: String,
    pub action_url: Option<String>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub organization_id: i32,
    pub user_id: i32,
    pub kind: String,
    pub issue_id: Option<i32>,
    pub machine_id: Option<i32>,
    pub message: String,
    pub action_url: Option<String>,
}

// ============================================================================
// Collection
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = collections)]
pub struct Collection {
    pub id: i32,
    pub organization_id: i32,
    pub location_id: Option<i32>,
    pub name: String,
    pub description: Option<String>,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = collections)]
pub struct NewCollection {
    pub organization_id: i32,
    pub location_id: Option<i32>,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = collections)]
pub struct UpdateCollection {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = collection_machines)]
pub struct NewCollectionMachine {
    pub collection_id: i32,
    pub machine_id: i32,
}
