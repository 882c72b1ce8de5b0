//! Notification fan-out for issue events.
//!
//! Recipient selection is pure; [`dispatch`] loads the inputs, writes
//! in-app rows and hands emails to the configured sender. Nothing in here
//! fails the request that triggered the event.

use std::collections::{BTreeSet, HashSet};

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared::{issue_reference, IssueStatus, NotificationKind};

use crate::db::schema::{issue_watchers, memberships, notifications, users};
use crate::models::{Issue, Machine, NewNotification, User};
use crate::services::email::EmailMessage;
use crate::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueEvent {
    Created,
    Assigned { assignee_id: i32 },
    StatusChanged { from: IssueStatus, to: IssueStatus },
    CommentAdded,
}

impl IssueEvent {
    pub fn kind(&self) -> NotificationKind {
        match self {
            IssueEvent::Created => NotificationKind::IssueCreated,
            IssueEvent::Assigned { .. } => NotificationKind::IssueAssigned,
            IssueEvent::StatusChanged { .. } => NotificationKind::StatusChanged,
            IssueEvent::CommentAdded => NotificationKind::CommentAdded,
        }
    }
}

/// Who should hear about `event`, before preferences are applied.
///
/// The actor is never included, each user appears once, and only
/// organization members (per `is_member`) qualify.
pub fn select_recipients(
    event: &IssueEvent,
    issue: &Issue,
    machine: &Machine,
    watchers: &[i32],
    actor_id: Option<i32>,
    is_member: impl Fn(i32) -> bool,
) -> Vec<i32> {
    let owner = machine
        .owner_id
        .filter(|_| machine.owner_notifications_enabled);

    let mut candidates: Vec<i32> = Vec::new();
    match event {
        IssueEvent::Created => {
            if machine.notify_on_new_issues {
                candidates.extend(owner);
            }
        }
        IssueEvent::Assigned { assignee_id } => candidates.push(*assignee_id),
        IssueEvent::StatusChanged { .. } | IssueEvent::CommentAdded => {
            candidates.extend(issue.reporter_id);
            candidates.extend(issue.assignee_id);
            candidates.extend(watchers.iter().copied());
            let owner_flag = match event {
                IssueEvent::StatusChanged { .. } => machine.notify_on_status_changes,
                _ => machine.notify_on_comments,
            };
            if owner_flag {
                candidates.extend(owner);
            }
        }
    }

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|id| Some(*id) != actor_id)
        .filter(|id| seen.insert(*id))
        .filter(|id| is_member(*id))
        .collect()
}

/// `(in-app message, email subject)` for an event.
pub fn compose(event: &IssueEvent, reference: &str, machine_name: &str, title: &str) -> (String, String) {
    match event {
        IssueEvent::Created => (
            format!("New issue {reference} on {machine_name}: {title}"),
            format!("[PinPoint] New issue on {machine_name}: {title}"),
        ),
        IssueEvent::Assigned { .. } => (
            format!("You were assigned {reference}: {title}"),
            format!("[PinPoint] Assigned to you: {reference} {title}"),
        ),
        IssueEvent::StatusChanged { from, to } => (
            format!("{reference} moved from {} to {}", from.label(), to.label()),
            format!("[PinPoint] {reference} is now {}", to.label()),
        ),
        IssueEvent::CommentAdded => (
            format!("New comment on {reference}: {title}"),
            format!("[PinPoint] New comment on {reference}"),
        ),
    }
}

/// Fan out `event`. Errors are logged and swallowed.
pub async fn dispatch(
    state: &AppState,
    conn: &mut AsyncPgConnection,
    event: IssueEvent,
    issue: &Issue,
    machine: &Machine,
    actor_id: Option<i32>,
) {
    if let Err(e) = try_dispatch(state, conn, &event, issue, machine, actor_id).await {
        tracing::error!(issue_id = issue.id, kind = event.kind().as_str(), "notification fan-out failed: {e}");
    }
}

async fn try_dispatch(
    state: &AppState,
    conn: &mut AsyncPgConnection,
    event: &IssueEvent,
    issue: &Issue,
    machine: &Machine,
    actor_id: Option<i32>,
) -> Result<(), diesel::result::Error> {
    let watchers: Vec<i32> = issue_watchers::table
        .filter(issue_watchers::issue_id.eq(issue.id))
        .select(issue_watchers::user_id)
        .load(conn)
        .await?;

    let members: BTreeSet<i32> = memberships::table
        .filter(memberships::organization_id.eq(issue.organization_id))
        .select(memberships::user_id)
        .load::<i32>(conn)
        .await?
        .into_iter()
        .collect();

    let recipients = select_recipients(event, issue, machine, &watchers, actor_id, |id| {
        members.contains(&id)
    });
    if recipients.is_empty() {
        return Ok(());
    }

    let recipients: Vec<User> = users::table
        .filter(users::id.eq_any(&recipients))
        .select(User::as_select())
        .load(conn)
        .await?;

    let kind = event.kind();
    let reference = issue_reference(&machine.initials, issue.number);
    let (message, subject) = compose(event, &reference, &machine.name, &issue.title);
    let action_url = format!("/issues/{reference}");

    let mut rows = Vec::new();
    let mut emails = Vec::new();
    for user in &recipients {
        let prefs = user.preferences();
        if prefs.in_app_notifications_enabled {
            rows.push(NewNotification {
                organization_id: issue.organization_id,
                user_id: user.id,
                kind: kind.as_str().to_string(),
                issue_id: Some(issue.id),
                machine_id: Some(machine.id),
                message: message.clone(),
                action_url: Some(action_url.clone()),
            });
        }
        if prefs.wants_email(kind) {
            emails.push(EmailMessage {
                to: user.email.clone(),
                subject: subject.clone(),
                text: format!(
                    "{message}\n\n{}{action_url}",
                    state.config.public_url
                ),
            });
        }
    }

    if !rows.is_empty() {
        diesel::insert_into(notifications::table)
            .values(&rows)
            .execute(conn)
            .await?;
    }
    tracing::debug!(
        issue_id = issue.id,
        kind = kind.as_str(),
        in_app = rows.len(),
        email = emails.len(),
        "notifications dispatched"
    );

    if !emails.is_empty() {
        let sender = state.email.clone();
        tokio::spawn(async move {
            for email in emails {
                if let Err(e) = sender.send(&email).await {
                    tracing::warn!(to = %email.to, "failed to send notification email: {e}");
                }
            }
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn machine(owner_id: Option<i32>) -> Machine {
        let now = Utc::now();
        Machine {
            id: 10,
            organization_id: 1,
            location_id: 2,
            model_id: 3,
            name: "Medieval Madness".into(),
            initials: "MM".into(),
            next_issue_number: 8,
            owner_id,
            qr_code_id: "abc".into(),
            qr_code_generated_at: now,
            owner_notifications_enabled: true,
            notify_on_new_issues: true,
            notify_on_status_changes: true,
            notify_on_comments: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn issue(reporter_id: Option<i32>, assignee_id: Option<i32>) -> Issue {
        let now = Utc::now();
        Issue {
            id: 100,
            organization_id: 1,
            machine_id: 10,
            number: 7,
            title: "Left flipper weak".into(),
            description: None,
            status: "new".into(),
            severity: "playable".into(),
            priority: "medium".into(),
            reporter_id,
            reporter_name: None,
            reporter_email: None,
            assignee_id,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    fn everyone(_: i32) -> bool {
        true
    }

    #[test]
    fn created_notifies_owner_only_when_flags_on() {
        let m = machine(Some(5));
        let i = issue(Some(2), None);
        assert_eq!(select_recipients(&IssueEvent::Created, &i, &m, &[], Some(2), everyone), vec![5]);

        let mut quiet = machine(Some(5));
        quiet.notify_on_new_issues = false;
        assert!(select_recipients(&IssueEvent::Created, &i, &quiet, &[], Some(2), everyone).is_empty());

        let mut muted = machine(Some(5));
        muted.owner_notifications_enabled = false;
        assert!(select_recipients(&IssueEvent::Created, &i, &muted, &[], Some(2), everyone).is_empty());
    }

    #[test]
    fn owner_reporting_own_machine_is_not_notified() {
        let m = machine(Some(5));
        let i = issue(Some(5), None);
        assert!(select_recipients(&IssueEvent::Created, &i, &m, &[], Some(5), everyone).is_empty());
    }

    #[test]
    fn assigned_notifies_new_assignee() {
        let m = machine(Some(5));
        let i = issue(Some(2), Some(3));
        let event = IssueEvent::Assigned { assignee_id: 3 };
        assert_eq!(select_recipients(&event, &i, &m, &[4], Some(1), everyone), vec![3]);
        // Self-assignment is silent.
        assert!(select_recipients(&event, &i, &m, &[4], Some(3), everyone).is_empty());
    }

    #[test]
    fn status_change_fans_out_and_dedupes() {
        let m = machine(Some(5));
        let i = issue(Some(2), Some(3));
        let event = IssueEvent::StatusChanged {
            from: IssueStatus::New,
            to: IssueStatus::Fixed,
        };
        let got = select_recipients(&event, &i, &m, &[2, 3, 4, 5], Some(3), everyone);
        assert_eq!(got, vec![2, 4, 5]);
    }

    #[test]
    fn comment_respects_owner_comment_flag() {
        let m = machine(Some(5));
        let i = issue(Some(2), None);
        let got = select_recipients(&IssueEvent::CommentAdded, &i, &m, &[], Some(9), everyone);
        assert_eq!(got, vec![2]);

        let mut chatty = machine(Some(5));
        chatty.notify_on_comments = true;
        let got = select_recipients(&IssueEvent::CommentAdded, &i, &chatty, &[], Some(9), everyone);
        assert_eq!(got, vec![2, 5]);
    }

    #[test]
    fn non_members_are_dropped() {
        let m = machine(Some(5));
        let i = issue(Some(2), Some(3));
        let got = select_recipients(&IssueEvent::CommentAdded, &i, &m, &[4], None, |id| id != 3);
        assert_eq!(got, vec![2, 4]);
    }

    #[test]
    fn anonymous_reporter_is_skipped() {
        let m = machine(None);
        let i = issue(None, None);
        let event = IssueEvent::StatusChanged {
            from: IssueStatus::New,
            to: IssueStatus::InProgress,
        };
        assert!(select_recipients(&event, &i, &m, &[], Some(1), everyone).is_empty());
    }

    #[test]
    fn compose_status_message_uses_labels() {
        let event = IssueEvent::StatusChanged {
            from: IssueStatus::New,
            to: IssueStatus::NeedsParts,
        };
        let (message, subject) = compose(&event, "MM-07", "Medieval Madness", "Left flipper weak");
        assert!(message.starts_with("MM-07 moved from"));
        assert!(subject.contains("MM-07"));
    }
}
