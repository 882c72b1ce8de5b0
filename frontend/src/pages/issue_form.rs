use shared::{CreateIssue, IssuePriority, IssueResponse, IssueSeverity, MachineResponse};
use web_sys::{HtmlInputElement, HtmlSelectElement, HtmlTextAreaElement};
use yew::prelude::*;

use crate::api;

#[derive(Properties, PartialEq)]
pub struct NewIssueModalProps {
    pub machines: Vec<MachineResponse>,
    pub on_close: Callback<()>,
    /// Receives the reference of the new issue.
    pub on_created: Callback<String>,
}

#[function_component(NewIssueModal)]
pub fn new_issue_modal(props: &NewIssueModalProps) -> Html {
    let machine_id = use_state(|| props.machines.first().map(|m| m.id).unwrap_or(0));
    let title = use_state(String::new);
    let description = use_state(String::new);
    let severity = use_state(|| IssueSeverity::Playable);
    let priority = use_state(|| IssuePriority::Medium);
    let error = use_state(|| None::<String>);
    let submitting = use_state(|| false);

    let on_machine_change = {
        let machine_id = machine_id.clone();
        Callback::from(move |e: Event| {
            if let Ok(id) = e.target_unchecked_into::<HtmlSelectElement>().value().parse() {
                machine_id.set(id);
            }
        })
    };

    let on_title_change = {
        let title = title.clone();
        Callback::from(move |e: InputEvent| {
            title.set(e.target_unchecked_into::<HtmlInputElement>().value());
        })
    };

    let on_description_change = {
        let description = description.clone();
        Callback::from(move |e: InputEvent| {
            description.set(e.target_unchecked_into::<HtmlTextAreaElement>().value());
        })
    };

    let on_severity_change = {
        let severity = severity.clone();
        Callback::from(move |e: Event| {
            if let Ok(s) = e.target_unchecked_into::<HtmlSelectElement>().value().parse() {
                severity.set(s);
            }
        })
    };

    let on_priority_change = {
        let priority = priority.clone();
        Callback::from(move |e: Event| {
            if let Ok(p) = e.target_unchecked_into::<HtmlSelectElement>().value().parse() {
                priority.set(p);
            }
        })
    };

    let on_backdrop_click = {
        let on_close = props.on_close.clone();
        Callback::from(move |_| on_close.emit(()))
    };

    let on_modal_click = Callback::from(|e: MouseEvent| e.stop_propagation());

    let on_submit = {
        let machine_id = machine_id.clone();
        let title = title.clone();
        let description = description.clone();
        let severity = severity.clone();
        let priority = priority.clone();
        let error = error.clone();
        let submitting = submitting.clone();
        let on_created = props.on_created.clone();

        Callback::from(move |e: SubmitEvent| {
            e.prevent_default();

            if *machine_id == 0 {
                error.set(Some("Please select a machine".to_string()));
                return;
            }
            let title_val = title.trim().to_string();
            if title_val.is_empty() {
                error.set(Some("Title is required".to_string()));
                return;
            }
            let description_val = description.trim().to_string();

            let body = CreateIssue {
                machine_id: *machine_id,
                title: title_val,
                description: (!description_val.is_empty()).then_some(description_val),
                severity: *severity,
                priority: Some(*priority),
                assignee_id: None,
            };
            let error = error.clone();
            let submitting = submitting.clone();
            let on_created = on_created.clone();

            submitting.set(true);
            wasm_bindgen_futures::spawn_local(async move {
                match api::post::<_, IssueResponse>("/api/issues", &body).await {
                    Ok(issue) => on_created.emit(issue.reference),
                    Err(e) => {
                        error.set(Some(e));
                        submitting.set(false);
                    }
                }
            });
        })
    };

    let on_cancel = {
        let on_close = props.on_close.clone();
        Callback::from(move |_| on_close.emit(()))
    };

    html! {
        <div class="modal-backdrop" onclick={on_backdrop_click}>
            <div class="modal" onclick={on_modal_click}>
                <div class="modal-header">
                    <h2>{ "Report an Issue" }</h2>
                </div>

                if let Some(err) = (*error).clone() {
                    <p class="error">{ err }</p>
                }

                <form onsubmit={on_submit}>
                    <div class="form-group">
                        <label for="machine">{ "Machine" }</label>
                        <select id="machine" onchange={on_machine_change} required=true>
                            { for props.machines.iter().map(|m| html! {
                                <option value={m.id.to_string()} selected={*machine_id == m.id}>
                                    { format!("{} ({}) @ {}", m.name, m.initials, m.location_name) }
                                </option>
                            })}
                        </select>
                    </div>

                    <div class="form-group">
                        <label for="title">{ "Title" }</label>
                        <input
                            type="text"
                            id="title"
                            maxlength="200"
                            value={(*title).clone()}
                            oninput={on_title_change}
                            required=true
                        />
                    </div>

                    <div class="form-group">
                        <label for="description">{ "Description (optional)" }</label>
                        <textarea
                            id="description"
                            rows="4"
                            value={(*description).clone()}
                            oninput={on_description_change}
                        />
                    </div>

                    <div class="form-group">
                        <label for="severity">{ "Severity" }</label>
                        <select id="severity" onchange={on_severity_change}>
                            { for IssueSeverity::all().iter().map(|s| html! {
                                <option value={s.as_str()} selected={*severity == *s}>{ s.label() }</option>
                            })}
                        </select>
                    </div>

                    <div class="form-group">
                        <label for="priority">{ "Priority" }</label>
                        <select id="priority" onchange={on_priority_change}>
                            { for IssuePriority::all().iter().map(|p| html! {
                                <option value={p.as_str()} selected={*priority == *p}>{ p.label() }</option>
                            })}
                        </select>
                    </div>

                    <div class="form-actions">
                        <button type="submit" class="btn btn-primary" disabled={*submitting}>
                            { if *submitting { "Creating..." } else { "Create Issue" } }
                        </button>
                        <button type="button" class="btn" onclick={on_cancel}>
                            { "Cancel" }
                        </button>
                    </div>
                </form>
            </div>
        </div>
    }
}
