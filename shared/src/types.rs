use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::permissions::Permission;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    New,
    InProgress,
    NeedsParts,
    Fixed,
    WontFix,
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusGroup {
    Open,
    Closed,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::New => "new",
            IssueStatus::InProgress => "in_progress",
            IssueStatus::NeedsParts => "needs_parts",
            IssueStatus::Fixed => "fixed",
            IssueStatus::WontFix => "wont_fix",
            IssueStatus::Duplicate => "duplicate",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            IssueStatus::New => "New",
            IssueStatus::InProgress => "In Progress",
            IssueStatus::NeedsParts => "Needs Parts",
            IssueStatus::Fixed => "Fixed",
            IssueStatus::WontFix => "Won't Fix",
            IssueStatus::Duplicate => "Duplicate",
        }
    }

    pub fn group(&self) -> StatusGroup {
        match self {
            IssueStatus::New | IssueStatus::InProgress | IssueStatus::NeedsParts => {
                StatusGroup::Open
            }
            IssueStatus::Fixed | IssueStatus::WontFix | IssueStatus::Duplicate => {
                StatusGroup::Closed
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.group() == StatusGroup::Open
    }

    pub fn all() -> &'static [IssueStatus] {
        &[
            IssueStatus::New,
            IssueStatus::InProgress,
            IssueStatus::NeedsParts,
            IssueStatus::Fixed,
            IssueStatus::WontFix,
            IssueStatus::Duplicate,
        ]
    }
}

impl StatusGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusGroup::Open => "open",
            StatusGroup::Closed => "closed",
        }
    }

    pub fn statuses(&self) -> Vec<IssueStatus> {
        IssueStatus::all()
            .iter()
            .copied()
            .filter(|s| s.group() == *self)
            .collect()
    }
}

impl FromStr for IssueStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IssueStatus::all()
            .iter()
            .copied()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("status", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Minor,
    Playable,
    Unplayable,
}

impl IssueSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSeverity::Minor => "minor",
            IssueSeverity::Playable => "playable",
            IssueSeverity::Unplayable => "unplayable",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            IssueSeverity::Minor => "Minor",
            IssueSeverity::Playable => "Playable",
            IssueSeverity::Unplayable => "Unplayable",
        }
    }

    pub fn all() -> &'static [IssueSeverity] {
        &[
            IssueSeverity::Minor,
            IssueSeverity::Playable,
            IssueSeverity::Unplayable,
        ]
    }
}

impl FromStr for IssueSeverity {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IssueSeverity::all()
            .iter()
            .copied()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("severity", s))
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum IssuePriority {
    Low,
    #[default]
    Medium,
    High,
}

impl IssuePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssuePriority::Low => "low",
            IssuePriority::Medium => "medium",
            IssuePriority::High => "high",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            IssuePriority::Low => "Low",
            IssuePriority::Medium => "Medium",
            IssuePriority::High => "High",
        }
    }

    pub fn all() -> &'static [IssuePriority] {
        &[IssuePriority::Low, IssuePriority::Medium, IssuePriority::High]
    }
}

impl FromStr for IssuePriority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IssuePriority::all()
            .iter()
            .copied()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("priority", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    IssueCreated,
    IssueAssigned,
    StatusChanged,
    CommentAdded,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::IssueCreated => "issue_created",
            NotificationKind::IssueAssigned => "issue_assigned",
            NotificationKind::StatusChanged => "status_changed",
            NotificationKind::CommentAdded => "comment_added",
        }
    }

    pub fn all() -> &'static [NotificationKind] {
        &[
            NotificationKind::IssueCreated,
            NotificationKind::IssueAssigned,
            NotificationKind::StatusChanged,
            NotificationKind::CommentAdded,
        ]
    }
}

impl FromStr for NotificationKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationKind::all()
            .iter()
            .copied()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("notification kind", s))
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl fmt::Display for IssuePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Human reference for an issue, e.g. `MM-07`.
pub fn issue_reference(machine_initials: &str, number: i32) -> String {
    format!("{}-{:02}", machine_initials, number)
}

/// Machine initials are 2-4 uppercase ASCII letters or digits.
pub fn is_valid_machine_initials(initials: &str) -> bool {
    (2..=4).contains(&initials.len())
        && initials
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Splits `MM-07` back into `("MM", 7)`.
pub fn parse_issue_reference(reference: &str) -> Option<(String, i32)> {
    let (initials, number) = reference.trim().rsplit_once('-')?;
    if initials.is_empty() {
        return None;
    }
    let number = number.parse().ok()?;
    Some((initials.to_ascii_uppercase(), number))
}

// ============================================================================
// Domain Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: i32,
    pub name: String,
    pub subdomain: String,
    pub logo_url: Option<String>,
    pub allow_anonymous_issues: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationStats {
    pub open_issues: i64,
    pub open_by_severity: Vec<CountBy<IssueSeverity>>,
    pub by_status: Vec<CountBy<IssueStatus>>,
    pub machine_count: i64,
    pub location_count: i64,
    pub resolved_last_7_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountBy<T> {
    pub key: T,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i32,
    pub email: String,
    pub name: String,
    pub initials: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipSummary {
    pub organization_id: i32,
    pub organization_name: String,
    pub subdomain: String,
    pub role_id: i32,
    pub role_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberResponse {
    pub user: UserSummary,
    pub role_id: i32,
    pub role_name: String,
    pub is_admin: bool,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleResponse {
    pub id: i32,
    pub name: String,
    pub is_system: bool,
    pub is_default: bool,
    pub permissions: Vec<Permission>,
    pub member_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationResponse {
    pub id: i32,
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pinballmap_id: Option<i32>,
    pub sync_enabled: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub machine_count: i64,
    pub open_issue_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineModelResponse {
    pub id: i32,
    pub name: String,
    pub manufacturer: Option<String>,
    pub year: Option<i32>,
    pub opdb_id: Option<String>,
    pub pinballmap_id: Option<i32>,
    pub is_custom: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineResponse {
    pub id: i32,
    pub name: String,
    pub initials: String,
    pub location_id: i32,
    pub location_name: String,
    pub model: MachineModelResponse,
    pub owner_id: Option<i32>,
    pub owner_name: Option<String>,
    pub qr_code_id: String,
    pub qr_code_url: String,
    pub owner_notifications_enabled: bool,
    pub notify_on_new_issues: bool,
    pub notify_on_status_changes: bool,
    pub notify_on_comments: bool,
    pub open_issue_count: i64,
    pub worst_open_severity: Option<IssueSeverity>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueResponse {
    pub id: i32,
    pub reference: String,
    pub number: i32,
    pub machine_id: i32,
    pub machine_name: String,
    pub location_id: i32,
    pub location_name: String,
    pub title: String,
    pub description: Option<String>,
    pub status: IssueStatus,
    pub severity: IssueSeverity,
    pub priority: IssuePriority,
    pub reporter_id: Option<i32>,
    pub reporter_name: Option<String>,
    pub assignee_id: Option<i32>,
    pub assignee_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueListResponse {
    pub issues: Vec<IssueResponse>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentResponse {
    pub id: i32,
    pub issue_id: i32,
    pub author_id: i32,
    pub author_name: String,
    /// `None` once the comment has been deleted.
    pub content: Option<String>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueHistoryResponse {
    pub id: i32,
    pub issue_id: i32,
    pub actor_id: Option<i32>,
    pub actor_name: Option<String>,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationResponse {
    pub id: i32,
    pub kind: NotificationKind,
    pub message: String,
    pub issue_id: Option<i32>,
    pub machine_id: Option<i32>,
    pub action_url: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub email_notifications_enabled: bool,
    pub in_app_notifications_enabled: bool,
    pub email_on_new_issue: bool,
    pub email_on_assigned: bool,
    pub email_on_status_change: bool,
    pub email_on_comment: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            email_notifications_enabled: true,
            in_app_notifications_enabled: true,
            email_on_new_issue: true,
            email_on_assigned: true,
            email_on_status_change: true,
            email_on_comment: false,
        }
    }
}

impl NotificationPreferences {
    /// Whether `kind` should go out by email under these preferences.
    pub fn wants_email(&self, kind: NotificationKind) -> bool {
        if !self.email_notifications_enabled {
            return false;
        }
        match kind {
            NotificationKind::IssueCreated => self.email_on_new_issue,
            NotificationKind::IssueAssigned => self.email_on_assigned,
            NotificationKind::StatusChanged => self.email_on_status_change,
            NotificationKind::CommentAdded => self.email_on_comment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CollectionResponse {
    Manual {
        id: i32,
        name: String,
        description: Option<String>,
        location_id: Option<i32>,
        machine_ids: Vec<i32>,
    },
    Manufacturer {
        name: String,
        machine_ids: Vec<i32>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicMachineInfo {
    pub machine_name: String,
    pub location_name: String,
    pub organization_name: String,
    pub allow_anonymous_issues: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub dry_run: bool,
    pub added: Vec<String>,
    pub unchanged: Vec<String>,
    pub removed: Vec<String>,
    /// Machines missing from PinballMap that were kept locally.
    pub stale: Vec<String>,
    pub created_models: Vec<String>,
    /// Remote machines left out because no initials could be derived.
    #[serde(default)]
    pub skipped: Vec<String>,
}

// ============================================================================
// API Request Types
// ============================================================================

/// Distinguishes an absent field (`None`) from an explicit `null`
/// (`Some(None)`) in PATCH bodies.
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOrganization {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<Option<String>>,
    pub allow_anonymous_issues: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InviteMember {
    pub email: String,
    pub name: Option<String>,
    pub role_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateMember {
    pub role_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRole {
    pub name: String,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRole {
    pub name: Option<String>,
    pub permissions: Option<Vec<Permission>>,
    pub is_default: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateLocation {
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pinballmap_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateLocation {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub city: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub state: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub pinballmap_id: Option<Option<i32>>,
    pub sync_enabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMachineModel {
    pub name: String,
    pub manufacturer: Option<String>,
    pub year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMachine {
    pub model_id: i32,
    pub location_id: i32,
    pub initials: String,
    pub name: Option<String>,
    pub owner_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateMachine {
    pub name: Option<String>,
    pub location_id: Option<i32>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<Option<i32>>,
    pub owner_notifications_enabled: Option<bool>,
    pub notify_on_new_issues: Option<bool>,
    pub notify_on_status_changes: Option<bool>,
    pub notify_on_comments: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateIssue {
    pub machine_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub severity: IssueSeverity,
    pub priority: Option<IssuePriority>,
    pub assignee_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePublicIssue {
    pub title: String,
    pub description: Option<String>,
    pub severity: IssueSeverity,
    pub reporter_name: Option<String>,
    pub reporter_email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateIssue {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    pub severity: Option<IssueSeverity>,
    pub priority: Option<IssuePriority>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeStatus {
    pub status: IssueStatus,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignIssue {
    pub assignee_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateComment {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateComment {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateNotificationPreferences {
    pub email_notifications_enabled: Option<bool>,
    pub in_app_notifications_enabled: Option<bool>,
    pub email_on_new_issue: Option<bool>,
    pub email_on_assigned: Option<bool>,
    pub email_on_status_change: Option<bool>,
    pub email_on_comment: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateCollection {
    pub name: String,
    pub description: Option<String>,
    pub location_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateCollection {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetCollectionMachines {
    pub machine_ids: Vec<i32>,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorBody {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new("BAD_GATEWAY", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentUserResponse {
    pub user_id: i32,
    pub email: String,
    pub name: String,
    pub memberships: Vec<MembershipSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnreadCountResponse {
    pub unread: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityEventType {
    CommentAdded,
    IssueChanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub issue_id: i32,
    pub issue_reference: String,
    pub issue_title: String,
    pub actor_name: String,
    pub event_type: ActivityEventType,
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_groups_partition_all_statuses() {
        let open = StatusGroup::Open.statuses();
        let closed = StatusGroup::Closed.statuses();
        assert_eq!(open.len() + closed.len(), IssueStatus::all().len());
        assert!(open.contains(&IssueStatus::NeedsParts));
        assert!(closed.contains(&IssueStatus::WontFix));
        assert!(!IssueStatus::Duplicate.is_open());
    }

    #[test]
    fn status_parses_from_wire_form_only() {
        assert_eq!("in_progress".parse::<IssueStatus>(), Ok(IssueStatus::InProgress));
        let err = "In Progress".parse::<IssueStatus>().unwrap_err();
        assert_eq!(err.kind, "status");
        assert_eq!(err.to_string(), "unknown status 'In Progress'");
    }

    #[test]
    fn serde_form_matches_as_str() {
        for s in IssueSeverity::all() {
            let json = serde_json::to_string(s).unwrap();
            assert_eq!(json, format!("\"{}\"", s.as_str()));
        }
    }

    #[test]
    fn issue_reference_is_zero_padded() {
        assert_eq!(issue_reference("MM", 7), "MM-07");
        assert_eq!(issue_reference("AFM", 123), "AFM-123");
    }

    #[test]
    fn machine_initials_rules() {
        assert!(is_valid_machine_initials("MM"));
        assert!(is_valid_machine_initials("T2"));
        assert!(is_valid_machine_initials("TAF9"));
        assert!(!is_valid_machine_initials("M"));
        assert!(!is_valid_machine_initials("mm"));
        assert!(!is_valid_machine_initials("ABCDE"));
        assert!(!is_valid_machine_initials("M-M"));
    }

    #[test]
    fn parse_issue_reference_accepts_lowercase() {
        assert_eq!(parse_issue_reference("mm-07"), Some(("MM".to_string(), 7)));
        assert_eq!(parse_issue_reference("-07"), None);
        assert_eq!(parse_issue_reference("MM07"), None);
        assert_eq!(parse_issue_reference("MM-x"), None);
    }

    #[test]
    fn email_preferences_respect_master_switch() {
        let mut prefs = NotificationPreferences::default();
        assert!(prefs.wants_email(NotificationKind::IssueAssigned));
        assert!(!prefs.wants_email(NotificationKind::CommentAdded));
        prefs.email_notifications_enabled = false;
        assert!(!prefs.wants_email(NotificationKind::IssueAssigned));
    }

    #[test]
    fn patch_null_differs_from_absent() {
        let absent: UpdateIssue = serde_json::from_str(r#"{"title":"x"}"#).unwrap();
        assert_eq!(absent.description, None);
        let cleared: UpdateIssue = serde_json::from_str(r#"{"description":null}"#).unwrap();
        assert_eq!(cleared.description, Some(None));
        let set: UpdateIssue = serde_json::from_str(r#"{"description":"y"}"#).unwrap();
        assert_eq!(set.description, Some(Some("y".to_string())));
    }

    #[test]
    fn collection_response_is_tagged() {
        let c = CollectionResponse::Manufacturer {
            name: "Williams".to_string(),
            machine_ids: vec![1, 2],
        };
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["kind"], "manufacturer");
        assert_eq!(v["name"], "Williams");
    }
}
