use shared::{
    IssueFilters, IssuePriority, IssueSeverity, IssueSort, MachineResponse, PersonFilter,
    StatusGroup,
};
use web_sys::{HtmlInputElement, HtmlSelectElement};
use yew::prelude::*;

#[derive(Clone, Copy, PartialEq)]
enum StatusTab {
    Open,
    Closed,
    All,
}

impl StatusTab {
    fn of(filters: &IssueFilters) -> Option<StatusTab> {
        match &filters.statuses {
            None => Some(StatusTab::All),
            Some(list) if *list == StatusGroup::Open.statuses() => Some(StatusTab::Open),
            Some(list) if *list == StatusGroup::Closed.statuses() => Some(StatusTab::Closed),
            Some(_) => None,
        }
    }

    fn apply(self, filters: &mut IssueFilters) {
        filters.statuses = match self {
            StatusTab::Open => Some(StatusGroup::Open.statuses()),
            StatusTab::Closed => Some(StatusGroup::Closed.statuses()),
            StatusTab::All => None,
        };
    }
}

#[derive(Properties, PartialEq)]
pub struct IssueFiltersProps {
    pub filters: IssueFilters,
    pub machines: Vec<MachineResponse>,
    pub on_change: Callback<IssueFilters>,
}

#[function_component(IssueFilterBar)]
pub fn issue_filter_bar(props: &IssueFiltersProps) -> Html {
    let search = use_state(|| props.filters.search.clone().unwrap_or_default());
    let active_tab = StatusTab::of(&props.filters);

    let status_button = |tab: StatusTab, label: &'static str| {
        let filters = props.filters.clone();
        let on_change = props.on_change.clone();
        let onclick = Callback::from(move |_: MouseEvent| {
            let mut next = filters.clone();
            tab.apply(&mut next);
            next.page = 1;
            on_change.emit(next);
        });
        let selected = active_tab == Some(tab);
        html! {
            <button
                type="button"
                class={classes!("status-tab", selected.then_some("active"))}
                aria-pressed={selected.to_string()}
                {onclick}
            >
                { label }
            </button>
        }
    };

    let on_severity = {
        let filters = props.filters.clone();
        let on_change = props.on_change.clone();
        Callback::from(move |e: Event| {
            let value = e.target_unchecked_into::<HtmlSelectElement>().value();
            let mut next = filters.clone();
            next.severities = value.parse::<IssueSeverity>().into_iter().collect();
            next.page = 1;
            on_change.emit(next);
        })
    };

    let on_priority = {
        let filters = props.filters.clone();
        let on_change = props.on_change.clone();
        Callback::from(move |e: Event| {
            let value = e.target_unchecked_into::<HtmlSelectElement>().value();
            let mut next = filters.clone();
            next.priorities = value.parse::<IssuePriority>().into_iter().collect();
            next.page = 1;
            on_change.emit(next);
        })
    };

    let on_machine = {
        let filters = props.filters.clone();
        let on_change = props.on_change.clone();
        Callback::from(move |e: Event| {
            let value = e.target_unchecked_into::<HtmlSelectElement>().value();
            let mut next = filters.clone();
            next.machine_ids = value.parse::<i32>().into_iter().collect();
            next.page = 1;
            on_change.emit(next);
        })
    };

    let on_assignee = {
        let filters = props.filters.clone();
        let on_change = props.on_change.clone();
        Callback::from(move |e: Event| {
            let value = e.target_unchecked_into::<HtmlSelectElement>().value();
            let mut next = filters.clone();
            next.assignee = match value.as_str() {
                "me" => Some(PersonFilter::Me),
                "unassigned" => Some(PersonFilter::Nobody),
                _ => None,
            };
            next.page = 1;
            on_change.emit(next);
        })
    };

    let on_sort = {
        let filters = props.filters.clone();
        let on_change = props.on_change.clone();
        Callback::from(move |e: Event| {
            let value = e.target_unchecked_into::<HtmlSelectElement>().value();
            let mut next = filters.clone();
            next.sort = value.parse::<IssueSort>().unwrap_or_default();
            on_change.emit(next);
        })
    };

    let on_search_input = {
        let search = search.clone();
        Callback::from(move |e: InputEvent| {
            search.set(e.target_unchecked_into::<HtmlInputElement>().value());
        })
    };

    let on_search_submit = {
        let filters = props.filters.clone();
        let on_change = props.on_change.clone();
        let search = search.clone();
        Callback::from(move |e: SubmitEvent| {
            e.prevent_default();
            let mut next = filters.clone();
            let text = search.trim();
            next.search = (!text.is_empty()).then(|| text.to_string());
            next.page = 1;
            on_change.emit(next);
        })
    };

    let selected_severity = props.filters.severities.first().copied();
    let selected_priority = props.filters.priorities.first().copied();
    let selected_machine = props.filters.machine_ids.first().copied();
    let selected_assignee = match props.filters.assignee {
        Some(PersonFilter::Me) => "me",
        Some(PersonFilter::Nobody) => "unassigned",
        _ => "",
    };

    html! {
        <div class="issue-filters">
            <div class="status-tabs" role="group" aria-label="Filter by status">
                { status_button(StatusTab::Open, "Open") }
                { status_button(StatusTab::Closed, "Closed") }
                { status_button(StatusTab::All, "All") }
            </div>

            <select aria-label="Severity" onchange={on_severity}>
                <option value="" selected={selected_severity.is_none()}>{ "Any severity" }</option>
                { for IssueSeverity::all().iter().map(|s| html! {
                    <option value={s.as_str()} selected={selected_severity == Some(*s)}>
                        { s.label() }
                    </option>
                })}
            </select>

            <select aria-label="Priority" onchange={on_priority}>
                <option value="" selected={selected_priority.is_none()}>{ "Any priority" }</option>
                { for IssuePriority::all().iter().map(|p| html! {
                    <option value={p.as_str()} selected={selected_priority == Some(*p)}>
                        { p.label() }
                    </option>
                })}
            </select>

            <select aria-label="Machine" onchange={on_machine}>
                <option value="" selected={selected_machine.is_none()}>{ "All machines" }</option>
                { for props.machines.iter().map(|m| html! {
                    <option value={m.id.to_string()} selected={selected_machine == Some(m.id)}>
                        { format!("{} ({})", m.name, m.initials) }
                    </option>
                })}
            </select>

            <select aria-label="Assignee" onchange={on_assignee}>
                <option value="" selected={selected_assignee.is_empty()}>{ "Anyone" }</option>
                <option value="me" selected={selected_assignee == "me"}>{ "Assigned to me" }</option>
                <option value="unassigned" selected={selected_assignee == "unassigned"}>{ "Unassigned" }</option>
            </select>

            <select aria-label="Sort" onchange={on_sort}>
                { for [
                    (IssueSort::Newest, "Newest"),
                    (IssueSort::Oldest, "Oldest"),
                    (IssueSort::Updated, "Recently updated"),
                    (IssueSort::Priority, "Priority"),
                    (IssueSort::Severity, "Severity"),
                ].into_iter().map(|(sort, label)| html! {
                    <option value={sort.as_str()} selected={props.filters.sort == sort}>{ label }</option>
                })}
            </select>

            <form class="search-form" onsubmit={on_search_submit}>
                <input
                    type="search"
                    placeholder="Search issues..."
                    value={(*search).clone()}
                    oninput={on_search_input}
                />
            </form>
        </div>
    }
}
