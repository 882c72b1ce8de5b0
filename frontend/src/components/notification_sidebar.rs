use chrono::Utc;
use gloo_storage::{LocalStorage, Storage};
use shared::{ActivityEntry, ActivityEventType, NotificationResponse};
use yew::prelude::*;

use crate::api;
use crate::format::format_short;

const ACTIVITY_SEEN_KEY: &str = "activity_last_viewed";

/// `/issues/MM-07` -> `MM-07`
fn reference_from_url(url: &str) -> Option<String> {
    url.strip_prefix("/issues/")
        .filter(|r| !r.is_empty())
        .map(str::to_string)
}

#[derive(Properties, PartialEq)]
pub struct NotificationSidebarProps {
    pub on_select_issue: Callback<String>,
    pub refresh_trigger: u32,
    /// Called after anything is marked read so the header badge can refresh.
    pub on_changed: Callback<()>,
}

#[function_component(NotificationSidebar)]
pub fn notification_sidebar(props: &NotificationSidebarProps) -> Html {
    let notifications = use_state(Vec::<NotificationResponse>::new);
    let activity = use_state(Vec::<ActivityEntry>::new);
    let loading = use_state(|| true);
    let local_refresh = use_state(|| 0u32);

    {
        let notifications = notifications.clone();
        let activity = activity.clone();
        let loading = loading.clone();

        use_effect_with((props.refresh_trigger, *local_refresh), move |_| {
            wasm_bindgen_futures::spawn_local(async move {
                if let Ok(data) =
                    api::get::<Vec<NotificationResponse>>("/api/notifications?limit=50").await
                {
                    notifications.set(data);
                }

                let since: String = LocalStorage::get(ACTIVITY_SEEN_KEY).unwrap_or_default();
                let url = if since.is_empty() {
                    "/api/activity?limit=50".to_string()
                } else {
                    format!("/api/activity?since={}&limit=50", urlencoding::encode(&since))
                };
                if let Ok(data) = api::get::<Vec<ActivityEntry>>(&url).await {
                    activity.set(data);
                }
                let _ = LocalStorage::set(ACTIVITY_SEEN_KEY, Utc::now().to_rfc3339());

                loading.set(false);
            });
            || ()
        });
    }

    let on_mark_all = {
        let local_refresh = local_refresh.clone();
        let on_changed = props.on_changed.clone();
        Callback::from(move |_: MouseEvent| {
            let local_refresh = local_refresh.clone();
            let on_changed = on_changed.clone();
            wasm_bindgen_futures::spawn_local(async move {
                if api::post_empty("/api/notifications/read-all").await.is_ok() {
                    local_refresh.set(*local_refresh + 1);
                    on_changed.emit(());
                }
            });
        })
    };

    let unread_count = notifications.iter().filter(|n| !n.read).count();

    let notification_list = if *loading {
        html! { <p class="activity-empty">{ "Loading..." }</p> }
    } else if notifications.is_empty() {
        html! { <p class="activity-empty">{ "No notifications." }</p> }
    } else {
        html! {
            <ul class="activity-list">
                { for notifications.iter().map(|n| {
                    let on_click = {
                        let on_select = props.on_select_issue.clone();
                        let on_changed = props.on_changed.clone();
                        let local_refresh = local_refresh.clone();
                        let id = n.id;
                        let was_read = n.read;
                        let reference = n.action_url.as_deref().and_then(reference_from_url);
                        Callback::from(move |_: MouseEvent| {
                            if let Some(reference) = reference.clone() {
                                on_select.emit(reference);
                            }
                            if !was_read {
                                let on_changed = on_changed.clone();
                                let local_refresh = local_refresh.clone();
                                wasm_bindgen_futures::spawn_local(async move {
                                    if api::post_empty(&format!("/api/notifications/{}/read", id)).await.is_ok() {
                                        local_refresh.set(*local_refresh + 1);
                                        on_changed.emit(());
                                    }
                                });
                            }
                        })
                    };
                    html! {
                        <li
                            class={classes!("activity-entry", (!n.read).then_some("notification-unread"))}
                            onclick={on_click}
                        >
                            <div class="activity-entry-header">
                                <span class="activity-time">{ format_short(&n.created_at) }</span>
                            </div>
                            <div class="activity-detail">{ &n.message }</div>
                        </li>
                    }
                })}
            </ul>
        }
    };

    let activity_list = if activity.is_empty() {
        html! { <p class="activity-empty">{ "No new activity." }</p> }
    } else {
        html! {
            <ul class="activity-list">
                { for activity.iter().map(|entry| {
                    let on_click = {
                        let on_select = props.on_select_issue.clone();
                        let reference = entry.issue_reference.clone();
                        Callback::from(move |_: MouseEvent| on_select.emit(reference.clone()))
                    };
                    let (type_class, type_label) = match entry.event_type {
                        ActivityEventType::CommentAdded => ("activity-type-comment", "commented"),
                        ActivityEventType::IssueChanged => ("activity-type-change", "updated"),
                    };
                    html! {
                        <li class={classes!("activity-entry", type_class)} onclick={on_click}>
                            <div class="activity-entry-header">
                                <span class="activity-item-id">{ &entry.issue_reference }</span>
                                <span class="activity-time">{ format_short(&entry.timestamp) }</span>
                            </div>
                            <div class="activity-actor">
                                { &entry.actor_name }{ " " }{ type_label }
                            </div>
                            <div class="activity-detail">{ &entry.detail }</div>
                        </li>
                    }
                })}
            </ul>
        }
    };

    html! {
        <aside class="activity-sidebar">
            <div class="sidebar-section">
                <h3>
                    { "Notifications" }
                    if unread_count > 0 {
                        <span class="activity-count">{ unread_count }</span>
                        <button type="button" class="btn-link" onclick={on_mark_all}>
                            { "Mark all read" }
                        </button>
                    }
                </h3>
                { notification_list }
            </div>
            <details class="sidebar-section" open=true>
                <summary>{ "Recent Activity" }</summary>
                { activity_list }
            </details>
        </aside>
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_comes_from_action_url() {
        assert_eq!(reference_from_url("/issues/MM-07").as_deref(), Some("MM-07"));
        assert_eq!(reference_from_url("/issues/"), None);
        assert_eq!(reference_from_url("/machines/4"), None);
    }
}
