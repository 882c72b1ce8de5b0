use chrono::{DateTime, Utc};
use shared::{
    AssignIssue, ChangeStatus, CommentResponse, CreateComment, IssueHistoryResponse,
    IssueResponse, IssueStatus, MemberResponse, UpdateIssue,
};
use web_sys::{HtmlInputElement, HtmlSelectElement, HtmlTextAreaElement};
use yew::prelude::*;

use crate::api;
use crate::format::{format_datetime, linkify_text, priority_class, severity_class, status_class};
use crate::CurrentUser;

#[derive(Debug, Clone, PartialEq)]
enum TimelineEntry {
    Comment(CommentResponse),
    Change(IssueHistoryResponse),
}

impl TimelineEntry {
    fn at(&self) -> DateTime<Utc> {
        match self {
            TimelineEntry::Comment(c) => c.created_at,
            TimelineEntry::Change(h) => h.changed_at,
        }
    }
}

/// Newest first.
fn timeline(comments: Vec<CommentResponse>, history: Vec<IssueHistoryResponse>) -> Vec<TimelineEntry> {
    let mut entries: Vec<TimelineEntry> = comments
        .into_iter()
        .map(TimelineEntry::Comment)
        .chain(history.into_iter().map(TimelineEntry::Change))
        .collect();
    entries.sort_by_key(|e| std::cmp::Reverse(e.at()));
    entries
}

fn describe_change(h: &IssueHistoryResponse) -> String {
    if h.field == "created" {
        return "created the issue".to_string();
    }
    match (&h.old_value, &h.new_value) {
        (Some(old), Some(new)) => format!("changed {} from {} to {}", h.field, old, new),
        (None, Some(new)) => format!("set {} to {}", h.field, new),
        (Some(_), None) => format!("cleared {}", h.field),
        (None, None) => format!("changed {}", h.field),
    }
}

#[derive(Properties, PartialEq)]
pub struct IssueDetailModalProps {
    /// Issue id or reference such as `MM-07`.
    pub reference: String,
    pub on_close: Callback<()>,
}

#[function_component(IssueDetailModal)]
pub fn issue_detail_modal(props: &IssueDetailModalProps) -> Html {
    let me = use_context::<CurrentUser>();
    let issue = use_state(|| None::<IssueResponse>);
    let entries = use_state(Vec::<TimelineEntry>::new);
    let members = use_state(Vec::<MemberResponse>::new);
    let loading = use_state(|| true);
    let error = use_state(|| None::<String>);
    let action_error = use_state(|| None::<String>);
    let refresh_trigger = use_state(|| 0u32);

    let new_comment = use_state(String::new);
    let status_comment = use_state(String::new);
    let submitting = use_state(|| false);
    let editing_title = use_state(|| false);
    let edit_title_value = use_state(String::new);

    let reference = props.reference.clone();

    {
        let issue = issue.clone();
        let entries = entries.clone();
        let loading = loading.clone();
        let error = error.clone();

        use_effect_with((reference.clone(), *refresh_trigger), move |(key, _)| {
            let key = urlencoding::encode(key).into_owned();
            wasm_bindgen_futures::spawn_local(async move {
                match api::get::<IssueResponse>(&format!("/api/issues/{}", key)).await {
                    Ok(data) => issue.set(Some(data)),
                    Err(e) => error.set(Some(e)),
                }

                let comments = api::get::<Vec<CommentResponse>>(&format!("/api/issues/{}/comments", key))
                    .await
                    .unwrap_or_default();
                let history = api::get::<Vec<IssueHistoryResponse>>(&format!("/api/issues/{}/history", key))
                    .await
                    .unwrap_or_default();
                entries.set(timeline(comments, history));

                loading.set(false);
            });
            || ()
        });
    }

    {
        let members = members.clone();
        use_effect_with((), move |_| {
            wasm_bindgen_futures::spawn_local(async move {
                if let Ok(data) = api::get::<Vec<MemberResponse>>("/api/members").await {
                    members.set(data);
                }
            });
            || ()
        });
    }

    let issue_url = |suffix: &str| {
        format!("/api/issues/{}{}", urlencoding::encode(&props.reference), suffix)
    };

    let on_backdrop_click = {
        let on_close = props.on_close.clone();
        Callback::from(move |_| on_close.emit(()))
    };

    let on_modal_click = Callback::from(|e: MouseEvent| e.stop_propagation());

    let on_close_btn = {
        let on_close = props.on_close.clone();
        Callback::from(move |_| on_close.emit(()))
    };

    let on_title_click = {
        let editing_title = editing_title.clone();
        let edit_title_value = edit_title_value.clone();
        let issue = issue.clone();
        Callback::from(move |_| {
            if let Some(ref i) = *issue {
                edit_title_value.set(i.title.clone());
                editing_title.set(true);
            }
        })
    };

    let on_title_input = {
        let edit_title_value = edit_title_value.clone();
        Callback::from(move |e: InputEvent| {
            edit_title_value.set(e.target_unchecked_into::<HtmlInputElement>().value());
        })
    };

    let save_title = {
        let editing_title = editing_title.clone();
        let edit_title_value = edit_title_value.clone();
        let issue = issue.clone();
        let refresh_trigger = refresh_trigger.clone();
        let action_error = action_error.clone();
        let url = issue_url("");
        Callback::from(move |_: ()| {
            let new_title = edit_title_value.trim().to_string();
            let unchanged = (*issue).as_ref().map(|i| i.title == new_title).unwrap_or(true);
            if new_title.is_empty() || unchanged {
                editing_title.set(false);
                return;
            }

            let editing_title = editing_title.clone();
            let refresh_trigger = refresh_trigger.clone();
            let action_error = action_error.clone();
            let url = url.clone();
            wasm_bindgen_futures::spawn_local(async move {
                let body = UpdateIssue {
                    title: Some(new_title),
                    ..Default::default()
                };
                match api::patch::<_, IssueResponse>(&url, &body).await {
                    Ok(_) => refresh_trigger.set(*refresh_trigger + 1),
                    Err(e) => action_error.set(Some(e)),
                }
                editing_title.set(false);
            });
        })
    };

    let on_title_blur = {
        let save_title = save_title.clone();
        Callback::from(move |_: FocusEvent| save_title.emit(()))
    };

    let on_title_keydown = {
        let editing_title = editing_title.clone();
        Callback::from(move |e: KeyboardEvent| {
            if e.key() == "Enter" {
                e.prevent_default();
                save_title.emit(());
            } else if e.key() == "Escape" {
                editing_title.set(false);
            }
        })
    };

    let on_status_comment_input = {
        let status_comment = status_comment.clone();
        Callback::from(move |e: InputEvent| {
            status_comment.set(e.target_unchecked_into::<HtmlInputElement>().value());
        })
    };

    let on_status_change = {
        let issue = issue.clone();
        let status_comment = status_comment.clone();
        let submitting = submitting.clone();
        let refresh_trigger = refresh_trigger.clone();
        let action_error = action_error.clone();
        let url = issue_url("/status");
        Callback::from(move |e: Event| {
            let value = e.target_unchecked_into::<HtmlSelectElement>().value();
            let Ok(status) = value.parse::<IssueStatus>() else {
                return;
            };
            if (*issue).as_ref().map(|i| i.status) == Some(status) {
                return;
            }

            let comment = status_comment.trim().to_string();
            let status_comment = status_comment.clone();
            let submitting = submitting.clone();
            let refresh_trigger = refresh_trigger.clone();
            let action_error = action_error.clone();
            let url = url.clone();
            submitting.set(true);
            wasm_bindgen_futures::spawn_local(async move {
                let body = ChangeStatus {
                    status,
                    comment: (!comment.is_empty()).then_some(comment),
                };
                match api::post::<_, IssueResponse>(&url, &body).await {
                    Ok(_) => {
                        status_comment.set(String::new());
                        refresh_trigger.set(*refresh_trigger + 1);
                    }
                    Err(e) => action_error.set(Some(e)),
                }
                submitting.set(false);
            });
        })
    };

    let on_assignee_change = {
        let refresh_trigger = refresh_trigger.clone();
        let action_error = action_error.clone();
        let url = issue_url("/assign");
        Callback::from(move |e: Event| {
            let value = e.target_unchecked_into::<HtmlSelectElement>().value();
            let body = AssignIssue {
                assignee_id: value.parse().ok(),
            };
            let refresh_trigger = refresh_trigger.clone();
            let action_error = action_error.clone();
            let url = url.clone();
            wasm_bindgen_futures::spawn_local(async move {
                match api::post::<_, IssueResponse>(&url, &body).await {
                    Ok(_) => refresh_trigger.set(*refresh_trigger + 1),
                    Err(e) => action_error.set(Some(e)),
                }
            });
        })
    };

    let watch_button = |watch: bool| {
        let action_error = action_error.clone();
        let url = issue_url("/watch");
        let onclick = Callback::from(move |_: MouseEvent| {
            let action_error = action_error.clone();
            let url = url.clone();
            wasm_bindgen_futures::spawn_local(async move {
                let result = if watch {
                    api::post_empty(&url).await
                } else {
                    api::delete(&url).await
                };
                if let Err(e) = result {
                    action_error.set(Some(e));
                }
            });
        });
        html! {
            <button type="button" class="btn btn-small" {onclick}>
                { if watch { "Watch" } else { "Unwatch" } }
            </button>
        }
    };

    let on_comment_input = {
        let new_comment = new_comment.clone();
        Callback::from(move |e: InputEvent| {
            new_comment.set(e.target_unchecked_into::<HtmlTextAreaElement>().value());
        })
    };

    let on_add_comment = {
        let new_comment = new_comment.clone();
        let submitting = submitting.clone();
        let refresh_trigger = refresh_trigger.clone();
        let action_error = action_error.clone();
        let url = issue_url("/comments");

        Callback::from(move |e: SubmitEvent| {
            e.prevent_default();
            let content = new_comment.trim().to_string();
            if content.is_empty() {
                return;
            }

            let new_comment = new_comment.clone();
            let submitting = submitting.clone();
            let refresh_trigger = refresh_trigger.clone();
            let action_error = action_error.clone();
            let url = url.clone();
            submitting.set(true);
            wasm_bindgen_futures::spawn_local(async move {
                match api::post::<_, CommentResponse>(&url, &CreateComment { content }).await {
                    Ok(_) => {
                        new_comment.set(String::new());
                        refresh_trigger.set(*refresh_trigger + 1);
                    }
                    Err(e) => action_error.set(Some(e)),
                }
                submitting.set(false);
            });
        })
    };

    let delete_comment = |comment_id: i32| {
        let refresh_trigger = refresh_trigger.clone();
        let action_error = action_error.clone();
        Callback::from(move |_: MouseEvent| {
            let refresh_trigger = refresh_trigger.clone();
            let action_error = action_error.clone();
            wasm_bindgen_futures::spawn_local(async move {
                match api::delete(&format!("/api/comments/{}", comment_id)).await {
                    Ok(()) => refresh_trigger.set(*refresh_trigger + 1),
                    Err(e) => action_error.set(Some(e)),
                }
            });
        })
    };

    let my_id = me.as_ref().map(|m| m.user_id);

    html! {
        <div class="modal-backdrop" onclick={on_backdrop_click}>
            <div class="modal modal-large" onclick={on_modal_click}>
                if *loading {
                    <div class="modal-header">
                        <h2>{ "Loading..." }</h2>
                    </div>
                } else if let Some(err) = (*error).clone() {
                    <div class="modal-header">
                        <h2>{ "Error" }</h2>
                        <button type="button" class="modal-close" onclick={on_close_btn.clone()}>{ "×" }</button>
                    </div>
                    <div class="modal-body">
                        <p class="error">{ err }</p>
                    </div>
                } else if let Some(i) = (*issue).clone() {
                    <div class="modal-header">
                        <div class="title-container">
                            <span class="item-id-badge">{ &i.reference }</span>
                            if *editing_title {
                                <input
                                    type="text"
                                    class="title-edit-input"
                                    value={(*edit_title_value).clone()}
                                    oninput={on_title_input}
                                    onblur={on_title_blur}
                                    onkeydown={on_title_keydown}
                                    autofocus=true
                                />
                            } else {
                                <h2 class="editable-title" onclick={on_title_click} title="Click to edit">
                                    { &i.title }
                                </h2>
                            }
                        </div>
                        <button type="button" class="modal-close" onclick={on_close_btn}>{ "×" }</button>
                    </div>
                    <div class="modal-body">
                        if let Some(err) = (*action_error).clone() {
                            <p class="error">{ err }</p>
                        }
                        <div class="item-meta">
                            <span class="meta-item">
                                <strong>{ "Machine: " }</strong>{ format!("{} @ {}", i.machine_name, i.location_name) }
                            </span>
                            <span class="meta-item">
                                <strong>{ "Reported: " }</strong>
                                { format!("{} by {}", format_datetime(&i.created_at), i.reporter_name.clone().unwrap_or_else(|| "Anonymous".to_string())) }
                            </span>
                            <span class={classes!("meta-item", severity_class(i.severity))}>
                                <strong>{ "Severity: " }</strong>{ i.severity.label() }
                            </span>
                            <span class={classes!("meta-item", priority_class(i.priority))}>
                                <strong>{ "Priority: " }</strong>{ i.priority.label() }
                            </span>
                            if let Some(resolved) = i.resolved_at {
                                <span class="meta-item">
                                    <strong>{ "Resolved: " }</strong>{ format_datetime(&resolved) }
                                </span>
                            }
                        </div>

                        <div class="item-meta">
                            <span class="meta-item">
                                <strong>{ "Status: " }</strong>
                                <select
                                    class={classes!("status-select", status_class(i.status))}
                                    onchange={on_status_change}
                                    disabled={*submitting}
                                >
                                    { for IssueStatus::all().iter().map(|s| html! {
                                        <option value={s.as_str()} selected={*s == i.status}>{ s.label() }</option>
                                    })}
                                </select>
                                <input
                                    type="text"
                                    class="status-comment-input"
                                    placeholder="Optional comment for the status change"
                                    value={(*status_comment).clone()}
                                    oninput={on_status_comment_input}
                                />
                            </span>
                            <span class="meta-item">
                                <strong>{ "Assignee: " }</strong>
                                <select onchange={on_assignee_change}>
                                    <option value="" selected={i.assignee_id.is_none()}>{ "Unassigned" }</option>
                                    { for members.iter().map(|m| html! {
                                        <option value={m.user.id.to_string()} selected={i.assignee_id == Some(m.user.id)}>
                                            { &m.user.name }
                                        </option>
                                    })}
                                </select>
                            </span>
                            <span class="meta-item">
                                { watch_button(true) }
                                { watch_button(false) }
                            </span>
                        </div>

                        <div class="description-section">
                            <h3>{ "Description" }</h3>
                            <div class="description-content">
                                { match i.description.as_deref() {
                                    Some(desc) if !desc.is_empty() => linkify_text(desc),
                                    _ => html! { <span class="placeholder">{ "No description." }</span> },
                                } }
                            </div>
                        </div>

                        <h3>{ "Activity" }</h3>

                        <form class="add-update-form" onsubmit={on_add_comment}>
                            <textarea
                                placeholder="Add a comment..."
                                value={(*new_comment).clone()}
                                oninput={on_comment_input}
                                rows="3"
                            />
                            <button type="submit" class="btn btn-primary" disabled={*submitting || new_comment.trim().is_empty()}>
                                { if *submitting { "Adding..." } else { "Add Comment" } }
                            </button>
                        </form>

                        <div class="history-scroll">
                            if entries.is_empty() {
                                <p class="no-updates">{ "No activity yet." }</p>
                            } else {
                                <ul class="updates-list">
                                    { for entries.iter().map(|entry| match entry {
                                        TimelineEntry::Comment(c) => html! {
                                            <li class={classes!("update-item", c.deleted.then_some("comment-deleted"))}>
                                                <div class="update-header">
                                                    <span class="update-author">{ &c.author_name }</span>
                                                    <span class="update-date">{ format_datetime(&c.created_at) }</span>
                                                    if !c.deleted && my_id == Some(c.author_id) {
                                                        <button type="button" class="btn-link" onclick={delete_comment(c.id)}>
                                                            { "Delete" }
                                                        </button>
                                                    }
                                                </div>
                                                <div class="update-content">
                                                    { match c.content.as_deref() {
                                                        Some(text) => linkify_text(text),
                                                        None => html! { <em>{ "Comment deleted" }</em> },
                                                    } }
                                                </div>
                                            </li>
                                        },
                                        TimelineEntry::Change(h) => html! {
                                            <li class="update-item status-change-item">
                                                <div class="update-header">
                                                    <span class="status-change-label">
                                                        { format!(
                                                            "{} {}",
                                                            h.actor_name.clone().unwrap_or_else(|| "Anonymous".to_string()),
                                                            describe_change(h),
                                                        ) }
                                                    </span>
                                                    <span class="update-date">{ format_datetime(&h.changed_at) }</span>
                                                </div>
                                            </li>
                                        },
                                    })}
                                </ul>
                            }
                        </div>
                    </div>
                } else {
                    <div class="modal-header">
                        <h2>{ "Issue not found" }</h2>
                        <button type="button" class="modal-close" onclick={on_close_btn}>{ "×" }</button>
                    </div>
                }
            </div>
        </div>
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn change(field: &str, old: Option<&str>, new: Option<&str>) -> IssueHistoryResponse {
        IssueHistoryResponse {
            id: 1,
            issue_id: 1,
            actor_id: Some(1),
            actor_name: Some("Sam".to_string()),
            field: field.to_string(),
            old_value: old.map(str::to_string),
            new_value: new.map(str::to_string),
            changed_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn history_rows_read_as_sentences() {
        assert_eq!(describe_change(&change("created", None, None)), "created the issue");
        assert_eq!(
            describe_change(&change("status", Some("new"), Some("fixed"))),
            "changed status from new to fixed"
        );
        assert_eq!(describe_change(&change("assignee", Some("Sam"), None)), "cleared assignee");
    }

    #[test]
    fn timeline_is_newest_first() {
        let mut older = change("status", Some("new"), Some("in_progress"));
        older.changed_at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let newer = change("priority", Some("low"), Some("high"));
        let entries = timeline(Vec::new(), vec![older, newer.clone()]);
        assert_eq!(entries.first(), Some(&TimelineEntry::Change(newer)));
    }
}
