//! Issue list filters.
//!
//! The issue list accepts its filters as plain query-string parameters.
//! [`IssueFilterParams`] is the raw shape axum deserializes; [`IssueFilters`]
//! is the validated form the server turns into SQL predicates and the
//! frontend renders back into a URL.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{IssuePriority, IssueSeverity, IssueStatus, StatusGroup};

pub const DEFAULT_PAGE_SIZE: u32 = 25;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const MAX_SEARCH_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("invalid value '{value}' for '{field}'")]
    InvalidValue { field: &'static str, value: String },
    #[error("invalid date '{value}' for '{field}', expected YYYY-MM-DD")]
    InvalidDate { field: &'static str, value: String },
    #[error("search text must be at most {MAX_SEARCH_LEN} characters")]
    SearchTooLong,
    #[error("created_after must not be later than created_before")]
    DateRange,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueFilterParams {
    pub status: Option<String>,
    pub severity: Option<String>,
    pub priority: Option<String>,
    pub machine: Option<String>,
    pub location: Option<String>,
    pub assignee: Option<String>,
    pub reporter: Option<String>,
    pub q: Option<String>,
    pub created_after: Option<String>,
    pub created_before: Option<String>,
    pub sort: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

/// Filter on a user column. `Nobody` means the column is NULL
/// (unassigned issues, anonymous reports).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersonFilter {
    Me,
    Nobody,
    User(i32),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSort {
    #[default]
    Newest,
    Oldest,
    Updated,
    Priority,
    Severity,
}

impl IssueSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSort::Newest => "newest",
            IssueSort::Oldest => "oldest",
            IssueSort::Updated => "updated",
            IssueSort::Priority => "priority",
            IssueSort::Severity => "severity",
        }
    }
}

impl FromStr for IssueSort {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newest" => Ok(IssueSort::Newest),
            "oldest" => Ok(IssueSort::Oldest),
            "updated" => Ok(IssueSort::Updated),
            "priority" => Ok(IssueSort::Priority),
            "severity" => Ok(IssueSort::Severity),
            other => Err(FilterError::InvalidValue {
                field: "sort",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueFilters {
    /// `None` means every status.
    pub statuses: Option<Vec<IssueStatus>>,
    pub severities: Vec<IssueSeverity>,
    pub priorities: Vec<IssuePriority>,
    pub machine_ids: Vec<i32>,
    pub location_id: Option<i32>,
    pub assignee: Option<PersonFilter>,
    pub reporter: Option<PersonFilter>,
    pub search: Option<String>,
    pub created_after: Option<NaiveDate>,
    pub created_before: Option<NaiveDate>,
    pub sort: IssueSort,
    pub page: u32,
    pub page_size: u32,
}

impl Default for IssueFilters {
    fn default() -> Self {
        Self {
            statuses: Some(StatusGroup::Open.statuses()),
            severities: Vec::new(),
            priorities: Vec::new(),
            machine_ids: Vec::new(),
            location_id: None,
            assignee: None,
            reporter: None,
            search: None,
            created_after: None,
            created_before: None,
            sort: IssueSort::Newest,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Comma-separated tokens with blanks dropped.
fn tokens(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|t| !t.is_empty())
}

fn parse_list<T: FromStr + Ord>(field: &'static str, raw: Option<&str>) -> Result<Vec<T>, FilterError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let set = tokens(raw)
        .map(|t| {
            t.parse::<T>().map_err(|_| FilterError::InvalidValue {
                field,
                value: t.to_string(),
            })
        })
        .collect::<Result<BTreeSet<T>, _>>()?;
    Ok(set.into_iter().collect())
}

fn parse_statuses(raw: Option<&str>) -> Result<Option<Vec<IssueStatus>>, FilterError> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(Some(StatusGroup::Open.statuses())),
        Some(r) => r,
    };

    let mut set = BTreeSet::new();
    for token in tokens(raw) {
        match token {
            "all" => return Ok(None),
            "open" => set.extend(StatusGroup::Open.statuses()),
            "closed" => set.extend(StatusGroup::Closed.statuses()),
            other => {
                let status = other.parse().map_err(|_| FilterError::InvalidValue {
                    field: "status",
                    value: other.to_string(),
                })?;
                set.insert(status);
            }
        }
    }

    if set.is_empty() {
        return Ok(Some(StatusGroup::Open.statuses()));
    }
    Ok(Some(set.into_iter().collect()))
}

fn parse_person(
    field: &'static str,
    nobody_token: &str,
    raw: Option<&str>,
) -> Result<Option<PersonFilter>, FilterError> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(r) => r,
    };
    if raw == "me" {
        return Ok(Some(PersonFilter::Me));
    }
    if raw == nobody_token {
        return Ok(Some(PersonFilter::Nobody));
    }
    raw.parse()
        .map(|id| Some(PersonFilter::User(id)))
        .map_err(|_| FilterError::InvalidValue {
            field,
            value: raw.to_string(),
        })
}

fn parse_date(field: &'static str, raw: Option<&str>) -> Result<Option<NaiveDate>, FilterError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(r) => NaiveDate::parse_from_str(r, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| FilterError::InvalidDate {
                field,
                value: r.to_string(),
            }),
    }
}

fn parse_u32(field: &'static str, raw: Option<&str>) -> Result<Option<u32>, FilterError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(r) => r.parse().map(Some).map_err(|_| FilterError::InvalidValue {
            field,
            value: r.to_string(),
        }),
    }
}

fn person_token(person: &PersonFilter, nobody_token: &str) -> String {
    match person {
        PersonFilter::Me => "me".to_string(),
        PersonFilter::Nobody => nobody_token.to_string(),
        PersonFilter::User(id) => id.to_string(),
    }
}

fn join<T>(items: &[T], f: impl Fn(&T) -> String) -> String {
    items.iter().map(f).collect::<Vec<_>>().join(",")
}

impl IssueFilters {
    pub fn parse(params: &IssueFilterParams) -> Result<Self, FilterError> {
        let statuses = parse_statuses(params.status.as_deref())?;
        let severities = parse_list("severity", params.severity.as_deref())?;
        let priorities = parse_list("priority", params.priority.as_deref())?;
        let machine_ids = parse_list("machine", params.machine.as_deref())?;

        let location_id = match params.location.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(r) => Some(r.parse().map_err(|_| FilterError::InvalidValue {
                field: "location",
                value: r.to_string(),
            })?),
        };

        let assignee = parse_person("assignee", "unassigned", params.assignee.as_deref())?;
        let reporter = parse_person("reporter", "anonymous", params.reporter.as_deref())?;

        let search = match params.q.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(q) if q.chars().count() > MAX_SEARCH_LEN => {
                return Err(FilterError::SearchTooLong)
            }
            Some(q) => Some(q.to_string()),
        };

        let created_after = parse_date("created_after", params.created_after.as_deref())?;
        let created_before = parse_date("created_before", params.created_before.as_deref())?;
        if let (Some(after), Some(before)) = (created_after, created_before) {
            if after > before {
                return Err(FilterError::DateRange);
            }
        }

        let sort = match params.sort.as_deref().map(str::trim) {
            None | Some("") => IssueSort::default(),
            Some(s) => s.parse()?,
        };

        let page = parse_u32("page", params.page.as_deref())?.unwrap_or(1).max(1);
        let page_size = parse_u32("page_size", params.page_size.as_deref())?
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        Ok(Self {
            statuses,
            severities,
            priorities,
            machine_ids,
            location_id,
            assignee,
            reporter,
            search,
            created_after,
            created_before,
            sort,
            page,
            page_size,
        })
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.page_size)
    }

    /// Canonical query string (without the leading `?`).
    pub fn to_query_string(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        let status = match &self.statuses {
            None => "all".to_string(),
            Some(list) if *list == StatusGroup::Open.statuses() => "open".to_string(),
            Some(list) if *list == StatusGroup::Closed.statuses() => "closed".to_string(),
            Some(list) => join(list, |s| s.as_str().to_string()),
        };
        parts.push(format!("status={}", status));

        if !self.severities.is_empty() {
            parts.push(format!(
                "severity={}",
                join(&self.severities, |s| s.as_str().to_string())
            ));
        }
        if !self.priorities.is_empty() {
            parts.push(format!(
                "priority={}",
                join(&self.priorities, |p| p.as_str().to_string())
            ));
        }
        if !self.machine_ids.is_empty() {
            parts.push(format!("machine={}", join(&self.machine_ids, i32::to_string)));
        }
        if let Some(location) = self.location_id {
            parts.push(format!("location={}", location));
        }
        if let Some(ref assignee) = self.assignee {
            parts.push(format!("assignee={}", person_token(assignee, "unassigned")));
        }
        if let Some(ref reporter) = self.reporter {
            parts.push(format!("reporter={}", person_token(reporter, "anonymous")));
        }
        if let Some(ref q) = self.search {
            parts.push(format!("q={}", urlencoding::encode(q)));
        }
        if let Some(d) = self.created_after {
            parts.push(format!("created_after={}", d.format("%Y-%m-%d")));
        }
        if let Some(d) = self.created_before {
            parts.push(format!("created_before={}", d.format("%Y-%m-%d")));
        }
        if self.sort != IssueSort::Newest {
            parts.push(format!("sort={}", self.sort.as_str()));
        }
        if self.page != 1 {
            parts.push(format!("page={}", self.page));
        }
        if self.page_size != DEFAULT_PAGE_SIZE {
            parts.push(format!("page_size={}", self.page_size));
        }

        parts.join("&")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> IssueFilterParams {
        IssueFilterParams::default()
    }

    #[test]
    fn defaults_to_open_issues_newest_first() {
        let f = IssueFilters::parse(&params()).unwrap();
        assert_eq!(f, IssueFilters::default());
        assert_eq!(
            f.statuses,
            Some(vec![
                IssueStatus::New,
                IssueStatus::InProgress,
                IssueStatus::NeedsParts
            ])
        );
        assert_eq!(f.offset(), 0);
    }

    #[test]
    fn status_groups_expand_and_deduplicate() {
        let p = IssueFilterParams {
            status: Some("closed, fixed,new".to_string()),
            ..params()
        };
        let f = IssueFilters::parse(&p).unwrap();
        assert_eq!(
            f.statuses,
            Some(vec![
                IssueStatus::New,
                IssueStatus::Fixed,
                IssueStatus::WontFix,
                IssueStatus::Duplicate
            ])
        );
    }

    #[test]
    fn status_all_disables_filter() {
        let p = IssueFilterParams {
            status: Some("open,all".to_string()),
            ..params()
        };
        assert_eq!(IssueFilters::parse(&p).unwrap().statuses, None);
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        let p = IssueFilterParams {
            severity: Some("minor,catastrophic".to_string()),
            ..params()
        };
        assert_eq!(
            IssueFilters::parse(&p),
            Err(FilterError::InvalidValue {
                field: "severity",
                value: "catastrophic".to_string()
            })
        );

        let p = IssueFilterParams {
            status: Some("resolved".to_string()),
            ..params()
        };
        assert!(matches!(
            IssueFilters::parse(&p),
            Err(FilterError::InvalidValue { field: "status", .. })
        ));
    }

    #[test]
    fn people_filters() {
        let p = IssueFilterParams {
            assignee: Some("unassigned".to_string()),
            reporter: Some("me".to_string()),
            ..params()
        };
        let f = IssueFilters::parse(&p).unwrap();
        assert_eq!(f.assignee, Some(PersonFilter::Nobody));
        assert_eq!(f.reporter, Some(PersonFilter::Me));

        let p = IssueFilterParams {
            assignee: Some("42".to_string()),
            reporter: Some("anonymous".to_string()),
            ..params()
        };
        let f = IssueFilters::parse(&p).unwrap();
        assert_eq!(f.assignee, Some(PersonFilter::User(42)));
        assert_eq!(f.reporter, Some(PersonFilter::Nobody));

        // "anonymous" only means nobody for the reporter
        let p = IssueFilterParams {
            assignee: Some("anonymous".to_string()),
            ..params()
        };
        assert!(IssueFilters::parse(&p).is_err());
    }

    #[test]
    fn search_is_trimmed_and_bounded() {
        let p = IssueFilterParams {
            q: Some("  flipper  ".to_string()),
            ..params()
        };
        assert_eq!(
            IssueFilters::parse(&p).unwrap().search.as_deref(),
            Some("flipper")
        );

        let p = IssueFilterParams {
            q: Some("   ".to_string()),
            ..params()
        };
        assert_eq!(IssueFilters::parse(&p).unwrap().search, None);

        let p = IssueFilterParams {
            q: Some("x".repeat(MAX_SEARCH_LEN + 1)),
            ..params()
        };
        assert_eq!(IssueFilters::parse(&p), Err(FilterError::SearchTooLong));
    }

    #[test]
    fn date_range_must_be_ordered() {
        let p = IssueFilterParams {
            created_after: Some("2024-05-02".to_string()),
            created_before: Some("2024-05-01".to_string()),
            ..params()
        };
        assert_eq!(IssueFilters::parse(&p), Err(FilterError::DateRange));

        let p = IssueFilterParams {
            created_after: Some("05/01/2024".to_string()),
            ..params()
        };
        assert!(matches!(
            IssueFilters::parse(&p),
            Err(FilterError::InvalidDate { field: "created_after", .. })
        ));
    }

    #[test]
    fn paging_is_clamped() {
        let p = IssueFilterParams {
            page: Some("0".to_string()),
            page_size: Some("500".to_string()),
            ..params()
        };
        let f = IssueFilters::parse(&p).unwrap();
        assert_eq!(f.page, 1);
        assert_eq!(f.page_size, MAX_PAGE_SIZE);

        let p = IssueFilterParams {
            page: Some("3".to_string()),
            page_size: Some("10".to_string()),
            ..params()
        };
        assert_eq!(IssueFilters::parse(&p).unwrap().offset(), 20);

        let p = IssueFilterParams {
            page: Some("-1".to_string()),
            ..params()
        };
        assert!(IssueFilters::parse(&p).is_err());
    }

    #[test]
    fn query_string_parses_back_to_the_same_filters() {
        let p = IssueFilterParams {
            status: Some("closed".to_string()),
            severity: Some("unplayable,minor".to_string()),
            machine: Some("4,2".to_string()),
            assignee: Some("me".to_string()),
            q: Some("left flipper & coil".to_string()),
            sort: Some("priority".to_string()),
            page: Some("2".to_string()),
            ..params()
        };
        let f = IssueFilters::parse(&p).unwrap();
        let qs = f.to_query_string();
        assert_eq!(
            qs,
            "status=closed&severity=minor,unplayable&machine=2,4&assignee=me\
             &q=left%20flipper%20%26%20coil&sort=priority&page=2"
        );

        let mut reparsed = IssueFilterParams::default();
        for pair in qs.split('&') {
            let (k, v) = pair.split_once('=').unwrap();
            let v = urlencoding::decode(v).unwrap().into_owned();
            match k {
                "status" => reparsed.status = Some(v),
                "severity" => reparsed.severity = Some(v),
                "machine" => reparsed.machine = Some(v),
                "assignee" => reparsed.assignee = Some(v),
                "q" => reparsed.q = Some(v),
                "sort" => reparsed.sort = Some(v),
                "page" => reparsed.page = Some(v),
                other => panic!("unexpected key {other}"),
            }
        }
        assert_eq!(IssueFilters::parse(&reparsed).unwrap(), f);
    }
}
