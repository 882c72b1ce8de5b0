use shared::{IssueFilters, IssueListResponse, MachineResponse};
use yew::prelude::*;
use yew_router::prelude::*;

use crate::api;
use crate::components::{Header, IssueFilterBar, NotificationSidebar};
use crate::format::{format_short, initials, name_to_color, priority_class, severity_class, status_class};
use crate::pages::issue_detail::IssueDetailModal;
use crate::pages::issue_form::NewIssueModal;
use crate::Route;

fn page_count(total: i64, page_size: u32) -> u32 {
    let size = i64::from(page_size.max(1));
    ((total + size - 1) / size).max(1) as u32
}

#[derive(Properties, PartialEq)]
pub struct HomeProps {
    /// Issue to open on first render, from `/issues/:reference`.
    #[prop_or_default]
    pub initial_reference: Option<String>,
}

#[function_component(Home)]
pub fn home(props: &HomeProps) -> Html {
    let navigator = use_navigator();
    let list = use_state(|| None::<IssueListResponse>);
    let machines = use_state(Vec::<MachineResponse>::new);
    let filters = use_state(IssueFilters::default);
    let loading = use_state(|| true);
    let error = use_state(|| None::<String>);
    let show_new_issue_modal = use_state(|| false);
    let show_sidebar = use_state(|| true);
    let selected_reference = use_state(|| props.initial_reference.clone());
    let refresh_trigger = use_state(|| 0u32);

    {
        let selected_reference = selected_reference.clone();
        use_effect_with(props.initial_reference.clone(), move |reference| {
            selected_reference.set(reference.clone());
            || ()
        });
    }

    {
        let list = list.clone();
        let loading = loading.clone();
        let error = error.clone();

        use_effect_with(((*filters).clone(), *refresh_trigger), move |(filters, _)| {
            let url = format!("/api/issues?{}", filters.to_query_string());
            wasm_bindgen_futures::spawn_local(async move {
                match api::get::<IssueListResponse>(&url).await {
                    Ok(data) => {
                        list.set(Some(data));
                        error.set(None);
                    }
                    Err(e) => error.set(Some(e)),
                }
                loading.set(false);
            });
            || ()
        });
    }

    {
        let machines = machines.clone();
        use_effect_with((), move |_| {
            wasm_bindgen_futures::spawn_local(async move {
                if let Ok(data) = api::get::<Vec<MachineResponse>>("/api/machines").await {
                    machines.set(data);
                }
            });
            || ()
        });
    }

    let on_filters_change = {
        let filters = filters.clone();
        Callback::from(move |next: IssueFilters| filters.set(next))
    };

    let go_to_page = |page: u32| {
        let filters = filters.clone();
        Callback::from(move |_: MouseEvent| {
            let mut next = (*filters).clone();
            next.page = page;
            filters.set(next);
        })
    };

    let on_new_issue_click = {
        let show_new_issue_modal = show_new_issue_modal.clone();
        Callback::from(move |_| show_new_issue_modal.set(true))
    };

    let on_new_issue_modal_close = {
        let show_new_issue_modal = show_new_issue_modal.clone();
        Callback::from(move |_| show_new_issue_modal.set(false))
    };

    let open_issue = {
        let selected_reference = selected_reference.clone();
        let navigator = navigator.clone();
        Callback::from(move |reference: String| {
            if let Some(nav) = &navigator {
                nav.push(&Route::Issue {
                    reference: reference.clone(),
                });
            }
            selected_reference.set(Some(reference));
        })
    };

    let on_issue_created = {
        let show_new_issue_modal = show_new_issue_modal.clone();
        let refresh_trigger = refresh_trigger.clone();
        let open_issue = open_issue.clone();
        Callback::from(move |reference: String| {
            show_new_issue_modal.set(false);
            refresh_trigger.set(*refresh_trigger + 1);
            open_issue.emit(reference);
        })
    };

    let on_issue_detail_close = {
        let selected_reference = selected_reference.clone();
        let refresh_trigger = refresh_trigger.clone();
        Callback::from(move |_| {
            if let Some(nav) = &navigator {
                nav.push(&Route::Home);
            }
            selected_reference.set(None);
            refresh_trigger.set(*refresh_trigger + 1);
        })
    };

    let on_toggle_sidebar = {
        let show_sidebar = show_sidebar.clone();
        Callback::from(move |_: ()| show_sidebar.set(!*show_sidebar))
    };

    let on_notifications_changed = {
        let refresh_trigger = refresh_trigger.clone();
        Callback::from(move |_: ()| refresh_trigger.set(*refresh_trigger + 1))
    };

    let table = match (*list).as_ref() {
        _ if *loading => html! { <p>{ "Loading..." }</p> },
        None => html! {},
        Some(data) if data.issues.is_empty() => html! {
            <p>{ "No issues match the current filters." }</p>
        },
        Some(data) => {
            let pages = page_count(data.total, data.page_size);
            html! {
                <>
                    <table class="table items-table">
                        <thead>
                            <tr>
                                <th>{ "ID" }</th>
                                <th>{ "Title" }</th>
                                <th>{ "Machine" }</th>
                                <th>{ "Assignee" }</th>
                                <th>{ "Severity" }</th>
                                <th>{ "Priority" }</th>
                                <th>{ "Status" }</th>
                                <th>{ "Updated" }</th>
                            </tr>
                        </thead>
                        <tbody>
                            { for data.issues.iter().map(|issue| {
                                let on_row_click = {
                                    let open_issue = open_issue.clone();
                                    let reference = issue.reference.clone();
                                    Callback::from(move |_| open_issue.emit(reference.clone()))
                                };
                                html! {
                                    <tr class="clickable-row" onclick={on_row_click}>
                                        <td><span class="item-id">{ &issue.reference }</span></td>
                                        <td class="item-title">{ &issue.title }</td>
                                        <td>{ &issue.machine_name }</td>
                                        <td>
                                            if let Some(name) = &issue.assignee_name {
                                                <span
                                                    class="user-avatar"
                                                    style={format!("background-color: {}", name_to_color(name))}
                                                    title={name.clone()}
                                                >
                                                    { initials(name) }
                                                </span>
                                            } else {
                                                { "-" }
                                            }
                                        </td>
                                        <td class={severity_class(issue.severity)}>{ issue.severity.label() }</td>
                                        <td class={priority_class(issue.priority)}>{ issue.priority.label() }</td>
                                        <td class={status_class(issue.status)}>{ issue.status.label() }</td>
                                        <td>{ format_short(&issue.updated_at) }</td>
                                    </tr>
                                }
                            })}
                        </tbody>
                    </table>
                    <div class="pagination">
                        <button
                            type="button"
                            class="btn btn-small"
                            disabled={data.page <= 1}
                            onclick={go_to_page(data.page.saturating_sub(1).max(1))}
                        >
                            { "Previous" }
                        </button>
                        <span>{ format!("Page {} of {} ({} issues)", data.page, pages, data.total) }</span>
                        <button
                            type="button"
                            class="btn btn-small"
                            disabled={data.page >= pages}
                            onclick={go_to_page(data.page + 1)}
                        >
                            { "Next" }
                        </button>
                    </div>
                </>
            }
        }
    };

    html! {
        <>
            <Header refresh_trigger={*refresh_trigger} on_toggle_notifications={on_toggle_sidebar} />
            <div class="main-layout">
                <main>
                    <div class="page-header">
                        <h2>{ "Issues" }</h2>
                        <div class="header-actions">
                            <button
                                type="button"
                                class="btn btn-primary"
                                onclick={on_new_issue_click}
                                disabled={machines.is_empty()}
                            >
                                { "+ New Issue" }
                            </button>
                        </div>
                    </div>

                    <IssueFilterBar
                        filters={(*filters).clone()}
                        machines={(*machines).clone()}
                        on_change={on_filters_change}
                    />

                    if *show_new_issue_modal {
                        <NewIssueModal
                            machines={(*machines).clone()}
                            on_close={on_new_issue_modal_close}
                            on_created={on_issue_created}
                        />
                    }

                    if let Some(reference) = (*selected_reference).clone() {
                        <IssueDetailModal {reference} on_close={on_issue_detail_close} />
                    }

                    if let Some(err) = (*error).clone() {
                        <p class="error">{ err }</p>
                    }
                    { table }
                </main>
                if *show_sidebar {
                    <NotificationSidebar
                        on_select_issue={open_issue.clone()}
                        refresh_trigger={*refresh_trigger}
                        on_changed={on_notifications_changed}
                    />
                }
            </div>
        </>
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_count_rounds_up_and_never_hits_zero() {
        assert_eq!(page_count(0, 25), 1);
        assert_eq!(page_count(25, 25), 1);
        assert_eq!(page_count(26, 25), 2);
        assert_eq!(page_count(10, 0), 10);
    }
}
