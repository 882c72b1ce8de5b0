use shared::{CreatePublicIssue, IssueResponse, IssueSeverity, PublicMachineInfo};
use web_sys::{HtmlInputElement, HtmlSelectElement, HtmlTextAreaElement};
use yew::prelude::*;

use crate::api;

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[derive(Properties, PartialEq)]
pub struct ReportProps {
    /// QR code printed on the machine.
    pub code: String,
}

/// Public page reached by scanning a machine's QR code. No sign-in needed.
#[function_component(Report)]
pub fn report(props: &ReportProps) -> Html {
    let machine = use_state(|| None::<PublicMachineInfo>);
    let loading = use_state(|| true);
    let load_error = use_state(|| None::<String>);

    let title = use_state(String::new);
    let description = use_state(String::new);
    let severity = use_state(|| IssueSeverity::Playable);
    let reporter_name = use_state(String::new);
    let reporter_email = use_state(String::new);
    let error = use_state(|| None::<String>);
    let submitting = use_state(|| false);
    let submitted = use_state(|| None::<String>);

    let code = urlencoding::encode(&props.code).into_owned();

    {
        let machine = machine.clone();
        let loading = loading.clone();
        let load_error = load_error.clone();
        use_effect_with(code.clone(), move |code| {
            let url = format!("/api/public/qr/{}", code);
            wasm_bindgen_futures::spawn_local(async move {
                match api::get::<PublicMachineInfo>(&url).await {
                    Ok(info) => machine.set(Some(info)),
                    Err(e) => load_error.set(Some(e)),
                }
                loading.set(false);
            });
            || ()
        });
    }

    let text_input = |state: &UseStateHandle<String>| {
        let state = state.clone();
        Callback::from(move |e: InputEvent| {
            state.set(e.target_unchecked_into::<HtmlInputElement>().value());
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

    let on_submit = {
        let title = title.clone();
        let description = description.clone();
        let severity = severity.clone();
        let reporter_name = reporter_name.clone();
        let reporter_email = reporter_email.clone();
        let error = error.clone();
        let submitting = submitting.clone();
        let submitted = submitted.clone();
        let url = format!("/api/public/qr/{}/issues", code);

        Callback::from(move |e: SubmitEvent| {
            e.prevent_default();
            let Some(title_val) = non_empty(&title) else {
                error.set(Some("Please describe the problem in the title".to_string()));
                return;
            };
            let body = CreatePublicIssue {
                title: title_val,
                description: non_empty(&description),
                severity: *severity,
                reporter_name: non_empty(&reporter_name),
                reporter_email: non_empty(&reporter_email),
            };

            let error = error.clone();
            let submitting = submitting.clone();
            let submitted = submitted.clone();
            let url = url.clone();
            submitting.set(true);
            wasm_bindgen_futures::spawn_local(async move {
                match api::post::<_, IssueResponse>(&url, &body).await {
                    Ok(issue) => submitted.set(Some(issue.reference)),
                    Err(e) => error.set(Some(e)),
                }
                submitting.set(false);
            });
        })
    };

    let body = if *loading {
        html! { <p>{ "Loading..." }</p> }
    } else if let Some(err) = (*load_error).clone() {
        html! { <p class="error">{ err }</p> }
    } else if let Some(reference) = (*submitted).clone() {
        html! {
            <>
                <h2>{ "Thanks!" }</h2>
                <p>{ format!("Your report was filed as {}. The machine's caretakers have been notified.", reference) }</p>
            </>
        }
    } else if let Some(info) = (*machine).clone() {
        if !info.allow_anonymous_issues {
            html! {
                <>
                    <h2>{ &info.machine_name }</h2>
                    <p>{ format!("{} does not accept public reports. Please tell the staff at {}.", info.organization_name, info.location_name) }</p>
                </>
            }
        } else {
            html! {
                <>
                    <h2>{ format!("Report a problem with {}", info.machine_name) }</h2>
                    <p class="login-subtitle">{ format!("{} · {}", info.location_name, info.organization_name) }</p>

                    if let Some(err) = (*error).clone() {
                        <p class="error">{ err }</p>
                    }

                    <form onsubmit={on_submit}>
                        <div class="form-group">
                            <label for="title">{ "What's wrong?" }</label>
                            <input
                                type="text"
                                id="title"
                                maxlength="200"
                                value={(*title).clone()}
                                oninput={text_input(&title)}
                                required=true
                            />
                        </div>
                        <div class="form-group">
                            <label for="description">{ "Details (optional)" }</label>
                            <textarea
                                id="description"
                                rows="4"
                                value={(*description).clone()}
                                oninput={on_description_change}
                            />
                        </div>
                        <div class="form-group">
                            <label for="severity">{ "How bad is it?" }</label>
                            <select id="severity" onchange={on_severity_change}>
                                { for IssueSeverity::all().iter().map(|s| html! {
                                    <option value={s.as_str()} selected={*severity == *s}>{ s.label() }</option>
                                })}
                            </select>
                        </div>
                        <div class="form-group">
                            <label for="reporter_name">{ "Your name (optional)" }</label>
                            <input
                                type="text"
                                id="reporter_name"
                                value={(*reporter_name).clone()}
                                oninput={text_input(&reporter_name)}
                            />
                        </div>
                        <div class="form-group">
                            <label for="reporter_email">{ "Email for updates (optional)" }</label>
                            <input
                                type="email"
                                id="reporter_email"
                                value={(*reporter_email).clone()}
                                oninput={text_input(&reporter_email)}
                            />
                        </div>
                        <div class="form-actions">
                            <button type="submit" class="btn btn-primary" disabled={*submitting}>
                                { if *submitting { "Sending..." } else { "Send Report" } }
                            </button>
                        </div>
                    </form>
                </>
            }
        }
    } else {
        html! { <p>{ "Machine not found." }</p> }
    };

    html! {
        <div class="login-container">
            <div class="login-card report-card">
                { body }
            </div>
        </div>
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_fields_are_omitted() {
        assert_eq!(non_empty("   "), None);
        assert_eq!(non_empty(" Flipper stuck "), Some("Flipper stuck".to_string()));
    }
}
