//! Translates [`IssueFilters`] into a boxed diesel query over
//! `issues JOIN machines JOIN locations`.

use chrono::{Days, NaiveDate, NaiveTime, TimeZone, Utc};
use diesel::dsl::{sql, InnerJoin, IntoBoxed};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use shared::{IssueFilters, IssueSort, PersonFilter};

use super::schema::{issues, locations, machines};

pub type IssueSource = InnerJoin<issues::table, InnerJoin<machines::table, locations::table>>;
pub type BoxedIssueQuery<'a> = IntoBoxed<'a, IssueSource, Pg>;

const PRIORITY_RANK: &str =
    "CASE issues.priority WHEN 'high' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END";
const SEVERITY_RANK: &str =
    "CASE issues.severity WHEN 'unplayable' THEN 0 WHEN 'playable' THEN 1 ELSE 2 END";

pub fn issue_source() -> IssueSource {
    issues::table.inner_join(machines::table.inner_join(locations::table))
}

/// Escapes `%`, `_` and `\` so user text matches literally inside ILIKE.
pub fn like_pattern(search: &str) -> String {
    let mut escaped = String::with_capacity(search.len() + 2);
    escaped.push('%');
    for c in search.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn start_of_day(date: NaiveDate) -> chrono::DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

/// Issues of one organization matching `filters`, unordered and unpaged.
/// `user_id` resolves the `me` tokens.
pub fn filtered(
    organization_id: i32,
    filters: &IssueFilters,
    user_id: i32,
) -> BoxedIssueQuery<'static> {
    let mut query = issue_source()
        .filter(issues::organization_id.eq(organization_id))
        .into_boxed();

    if let Some(statuses) = &filters.statuses {
        let values: Vec<&'static str> = statuses.iter().map(|s| s.as_str()).collect();
        query = query.filter(issues::status.eq_any(values));
    }
    if !filters.severities.is_empty() {
        let values: Vec<&'static str> = filters.severities.iter().map(|s| s.as_str()).collect();
        query = query.filter(issues::severity.eq_any(values));
    }
    if !filters.priorities.is_empty() {
        let values: Vec<&'static str> = filters.priorities.iter().map(|p| p.as_str()).collect();
        query = query.filter(issues::priority.eq_any(values));
    }
    if !filters.machine_ids.is_empty() {
        query = query.filter(issues::machine_id.eq_any(filters.machine_ids.clone()));
    }
    if let Some(location_id) = filters.location_id {
        query = query.filter(machines::location_id.eq(location_id));
    }

    match filters.assignee {
        Some(PersonFilter::Me) => query = query.filter(issues::assignee_id.eq(user_id)),
        Some(PersonFilter::User(id)) => query = query.filter(issues::assignee_id.eq(id)),
        Some(PersonFilter::Nobody) => query = query.filter(issues::assignee_id.is_null()),
        None => {}
    }
    match filters.reporter {
        Some(PersonFilter::Me) => query = query.filter(issues::reporter_id.eq(user_id)),
        Some(PersonFilter::User(id)) => query = query.filter(issues::reporter_id.eq(id)),
        Some(PersonFilter::Nobody) => query = query.filter(issues::reporter_id.is_null()),
        None => {}
    }

    if let Some(search) = &filters.search {
        let pattern = like_pattern(search);
        query = query.filter(
            issues::title
                .ilike(pattern.clone())
                .or(issues::description.ilike(pattern.clone()))
                .or(machines::name.ilike(pattern)),
        );
    }

    if let Some(after) = filters.created_after {
        query = query.filter(issues::created_at.ge(start_of_day(after)));
    }
    if let Some(before) = filters.created_before {
        // Inclusive of the whole `before` day.
        if let Some(next) = before.checked_add_days(Days::new(1)) {
            query = query.filter(issues::created_at.lt(start_of_day(next)));
        }
    }

    query
}

pub fn sorted(query: BoxedIssueQuery<'static>, sort: IssueSort) -> BoxedIssueQuery<'static> {
    match sort {
        IssueSort::Newest => query.order((issues::created_at.desc(), issues::id.desc())),
        IssueSort::Oldest => query.order((issues::created_at.asc(), issues::id.asc())),
        IssueSort::Updated => query.order((issues::updated_at.desc(), issues::id.desc())),
        IssueSort::Priority => query.order((
            sql::<Integer>(PRIORITY_RANK).asc(),
            issues::created_at.desc(),
        )),
        IssueSort::Severity => query.order((
            sql::<Integer>(SEVERITY_RANK).asc(),
            issues::created_at.desc(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("flipper"), "%flipper%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }

    #[test]
    fn start_of_day_is_midnight_utc() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(start_of_day(date).to_rfc3339(), "2024-03-09T00:00:00+00:00");
    }

    #[test]
    fn filtered_query_renders_organization_and_status() {
        let filters = IssueFilters::default();
        let query = filtered(7, &filters, 1);
        let sql = diesel::debug_query::<Pg, _>(&query).to_string();
        assert!(sql.contains("\"issues\".\"organization_id\" = $1"));
        assert!(sql.contains("\"issues\".\"status\" = ANY($2)"));
    }
}
