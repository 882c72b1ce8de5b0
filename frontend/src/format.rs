use chrono::{DateTime, Utc};
use js_sys::{Date, Object, Reflect};
use regex::Regex;
use shared::{IssuePriority, IssueSeverity, IssueStatus};
use wasm_bindgen::JsValue;
use yew::prelude::*;

fn locale_string(dt: &DateTime<Utc>, fields: &[(&str, &str)], fallback: &str) -> String {
    let js_date = Date::new(&JsValue::from_f64(dt.timestamp_millis() as f64));
    let options = Object::new();
    for (key, value) in fields {
        let _ = Reflect::set(&options, &(*key).into(), &(*value).into());
    }
    js_date
        .to_locale_string("default", &options)
        .as_string()
        .unwrap_or_else(|| dt.format(fallback).to_string())
}

/// Locale-aware date and time in the browser's timezone.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    locale_string(
        dt,
        &[
            ("year", "numeric"),
            ("month", "short"),
            ("day", "numeric"),
            ("hour", "2-digit"),
            ("minute", "2-digit"),
        ],
        "%b %d, %Y %H:%M",
    )
}

pub fn format_short(dt: &DateTime<Utc>) -> String {
    locale_string(
        dt,
        &[
            ("month", "short"),
            ("day", "numeric"),
            ("hour", "2-digit"),
            ("minute", "2-digit"),
        ],
        "%b %d %H:%M",
    )
}

pub fn linkify_text(text: &str) -> Html {
    let Ok(url_regex) = Regex::new(r"(https?://[^\s<>\[\]()]+)") else {
        return html! { <>{ text }</> };
    };
    let mut result = Vec::new();
    let mut last_end = 0;

    for m in url_regex.find_iter(text) {
        if m.start() > last_end {
            result.push(html! { <>{ &text[last_end..m.start()] }</> });
        }
        let url = m.as_str();
        result.push(html! {
            <a href={url.to_string()} target="_blank" rel="noopener noreferrer" class="auto-link">{ url }</a>
        });
        last_end = m.end();
    }
    if last_end < text.len() {
        result.push(html! { <>{ &text[last_end..] }</> });
    }
    html! { <>{ for result }</> }
}

pub fn name_to_color(name: &str) -> String {
    let hash: u32 = name
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    format!("hsl({}, 65%, 45%)", hash % 360)
}

pub fn initials(name: &str) -> String {
    name.split_whitespace()
        .filter_map(|word| word.chars().next())
        .take(2)
        .collect::<String>()
        .to_uppercase()
}

pub fn status_class(status: IssueStatus) -> &'static str {
    match status {
        IssueStatus::New => "status-new",
        IssueStatus::InProgress => "status-in-progress",
        IssueStatus::NeedsParts => "status-needs-parts",
        IssueStatus::Fixed => "status-fixed",
        IssueStatus::WontFix => "status-wont-fix",
        IssueStatus::Duplicate => "status-duplicate",
    }
}

pub fn severity_class(severity: IssueSeverity) -> &'static str {
    match severity {
        IssueSeverity::Minor => "severity-minor",
        IssueSeverity::Playable => "severity-playable",
        IssueSeverity::Unplayable => "severity-unplayable",
    }
}

pub fn priority_class(priority: IssuePriority) -> &'static str {
    match priority {
        IssuePriority::Low => "priority-low",
        IssuePriority::Medium => "priority-medium",
        IssuePriority::High => "priority-high",
    }
}
