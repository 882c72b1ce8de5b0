use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Int4, Nullable, Timestamptz, Varchar};
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use shared::{issue_reference, ActivityEntry, ActivityEventType, Permission};
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::AppState;

use super::OrgContext;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;
const DETAIL_CHARS: usize = 120;

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub since: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, QueryableByName)]
struct RawActivityRow {
    #[diesel(sql_type = Timestamptz)]
    timestamp: DateTime<Utc>,
    #[diesel(sql_type = Int4)]
    issue_id: i32,
    #[diesel(sql_type = Int4)]
    issue_number: i32,
    #[diesel(sql_type = Varchar)]
    machine_initials: String,
    #[diesel(sql_type = Varchar)]
    issue_title: String,
    #[diesel(sql_type = Varchar)]
    actor_name: String,
    #[diesel(sql_type = Varchar)]
    event_type: String,
    #[diesel(sql_type = Varchar)]
    field: String,
    #[diesel(sql_type = Nullable<Varchar>)]
    detail: Option<String>,
}

const ACTIVITY_SQL: &str = r#"
    (
        SELECT
            c.created_at AS timestamp,
            i.id AS issue_id,
            i.number AS issue_number,
            m.initials AS machine_initials,
            i.title AS issue_title,
            u.name AS actor_name,
            'comment' AS event_type,
            '' AS field,
            LEFT(c.content, 121) AS detail
        FROM comments c
        INNER JOIN users u ON u.id = c.author_id
        INNER JOIN issues i ON i.id = c.issue_id
        INNER JOIN machines m ON m.id = i.machine_id
        WHERE c.organization_id = $1
          AND c.author_id != $2
          AND c.deleted_at IS NULL
          AND c.created_at > $3
    )
    UNION ALL
    (
        SELECT
            h.changed_at AS timestamp,
            i.id AS issue_id,
            i.number AS issue_number,
            m.initials AS machine_initials,
            i.title AS issue_title,
            u.name AS actor_name,
            'history' AS event_type,
            h.field AS field,
            h.new_value AS detail
        FROM issue_history h
        INNER JOIN users u ON u.id = h.actor_id
        INNER JOIN issues i ON i.id = h.issue_id
        INNER JOIN machines m ON m.id = i.machine_id
        WHERE h.organization_id = $1
          AND h.actor_id != $2
          AND h.changed_at > $3
    )
    ORDER BY timestamp DESC
    LIMIT $4
"#;

fn parse_since(since: Option<&str>) -> AppResult<DateTime<Utc>> {
    match since {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| AppError::Validation(format!("since must be an RFC 3339 timestamp, got {s}"))),
        None => Ok(DateTime::<Utc>::UNIX_EPOCH),
    }
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

fn describe(row: RawActivityRow) -> ActivityEntry {
    let (event_type, detail) = if row.event_type == "comment" {
        let text = row.detail.unwrap_or_default();
        let detail = if text.chars().count() > DETAIL_CHARS {
            let cut: String = text.chars().take(DETAIL_CHARS).collect();
            format!("{cut}...")
        } else {
            text
        };
        (ActivityEventType::CommentAdded, detail)
    } else {
        let detail = match (row.field.as_str(), row.detail) {
            ("created", _) => "created the issue".to_string(),
            (field, Some(value)) => format!("{field} → {value}"),
            (field, None) => format!("cleared {field}"),
        };
        (ActivityEventType::IssueChanged, detail)
    };

    ActivityEntry {
        timestamp: row.timestamp,
        issue_id: row.issue_id,
        issue_reference: issue_reference(&row.machine_initials, row.issue_number),
        issue_title: row.issue_title,
        actor_name: row.actor_name,
        event_type,
        detail,
    }
}

/// Recent comments and issue changes by other members, newest first.
pub async fn activity(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ActivityQuery>,
    ctx: OrgContext,
) -> AppResult<Json<Vec<ActivityEntry>>> {
    ctx.require(Permission::IssueView)?;
    let since = parse_since(query.since.as_deref())?;
    let limit = clamp_limit(query.limit);

    let mut conn = ctx.conn(&state).await?;
    let rows: Vec<RawActivityRow> = diesel::sql_query(ACTIVITY_SQL)
        .bind::<Int4, _>(ctx.org_id())
        .bind::<Int4, _>(ctx.user_id())
        .bind::<Timestamptz, _>(since)
        .bind::<BigInt, _>(limit)
        .load(&mut conn)
        .await?;

    Ok(Json(rows.into_iter().map(describe).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(event_type: &str, field: &str, detail: Option<&str>) -> RawActivityRow {
        RawActivityRow {
            timestamp: Utc::now(),
            issue_id: 5,
            issue_number: 7,
            machine_initials: "AFM".into(),
            issue_title: "Saucer kicks weak".into(),
            actor_name: "Sam".into(),
            event_type: event_type.into(),
            field: field.into(),
            detail: detail.map(str::to_string),
        }
    }

    #[test]
    fn limit_defaults_and_caps() {
        assert_eq!(clamp_limit(None), 50);
        assert_eq!(clamp_limit(Some(1000)), 200);
        assert_eq!(clamp_limit(Some(0)), 1);
    }

    #[test]
    fn since_must_be_rfc3339() {
        assert!(parse_since(Some("yesterday")).is_err());
        assert_eq!(parse_since(None).unwrap(), DateTime::<Utc>::UNIX_EPOCH);
        assert!(parse_since(Some("2024-06-01T12:00:00Z")).is_ok());
    }

    #[test]
    fn long_comments_are_truncated() {
        let long = "a".repeat(121);
        let entry = describe(row("comment", "", Some(&long)));
        assert_eq!(entry.event_type, ActivityEventType::CommentAdded);
        assert_eq!(entry.detail.len(), 123);
        assert_eq!(entry.issue_reference, "AFM-07");
    }

    #[test]
    fn history_rows_describe_the_change() {
        assert_eq!(describe(row("history", "status", Some("fixed"))).detail, "status → fixed");
        assert_eq!(describe(row("history", "assignee", None)).detail, "cleared assignee");
        assert_eq!(describe(row("history", "created", Some("x"))).detail, "created the issue");
    }
}
