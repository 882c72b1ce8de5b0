use shared::{CreateLocation, LocationResponse, SyncReport};
use web_sys::HtmlInputElement;
use yew::prelude::*;

use crate::api;
use crate::components::Header;
use crate::format::format_datetime;

fn sync_url(location_id: i32, dry_run: bool) -> String {
    format!("/api/locations/{}/sync?dry_run={}", location_id, dry_run)
}

fn summarize(report: &SyncReport) -> String {
    let verb = if report.dry_run { "would add" } else { "added" };
    let mut parts = vec![format!("{} {}", verb, report.added.len())];
    parts.push(format!("{} unchanged", report.unchanged.len()));
    if !report.removed.is_empty() {
        parts.push(format!("{} removed", report.removed.len()));
    }
    if !report.stale.is_empty() {
        parts.push(format!("{} no longer listed", report.stale.len()));
    }
    if !report.created_models.is_empty() {
        parts.push(format!("{} new models", report.created_models.len()));
    }
    if !report.skipped.is_empty() {
        parts.push(format!("{} skipped", report.skipped.len()));
    }
    parts.join(", ")
}

#[function_component(ManageLocations)]
pub fn manage_locations() -> Html {
    let locations = use_state(Vec::<LocationResponse>::new);
    let loading = use_state(|| true);
    let error = use_state(|| None::<String>);
    let refresh_trigger = use_state(|| 0u32);
    let sync_result = use_state(|| None::<(i32, SyncReport)>);
    let syncing = use_state(|| None::<i32>);

    let new_name = use_state(String::new);
    let new_city = use_state(String::new);
    let new_pinballmap_id = use_state(String::new);
    let submitting = use_state(|| false);

    {
        let locations = locations.clone();
        let loading = loading.clone();
        let error = error.clone();
        use_effect_with(*refresh_trigger, move |_| {
            wasm_bindgen_futures::spawn_local(async move {
                match api::get::<Vec<LocationResponse>>("/api/locations").await {
                    Ok(data) => locations.set(data),
                    Err(e) => error.set(Some(e)),
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

    let on_create = {
        let new_name = new_name.clone();
        let new_city = new_city.clone();
        let new_pinballmap_id = new_pinballmap_id.clone();
        let submitting = submitting.clone();
        let error = error.clone();
        let refresh_trigger = refresh_trigger.clone();

        Callback::from(move |e: SubmitEvent| {
            e.prevent_default();
            let name = new_name.trim().to_string();
            if name.is_empty() {
                return;
            }
            let pinballmap_id = match new_pinballmap_id.trim() {
                "" => None,
                raw => match raw.parse::<i32>() {
                    Ok(id) => Some(id),
                    Err(_) => {
                        error.set(Some("PinballMap ID must be a number".to_string()));
                        return;
                    }
                },
            };
            let city = new_city.trim().to_string();
            let body = CreateLocation {
                name,
                address: None,
                city: (!city.is_empty()).then_some(city),
                state: None,
                pinballmap_id,
            };

            let new_name = new_name.clone();
            let new_city = new_city.clone();
            let new_pinballmap_id = new_pinballmap_id.clone();
            let submitting = submitting.clone();
            let error = error.clone();
            let refresh_trigger = refresh_trigger.clone();
            submitting.set(true);
            wasm_bindgen_futures::spawn_local(async move {
                match api::post::<_, LocationResponse>("/api/locations", &body).await {
                    Ok(_) => {
                        new_name.set(String::new());
                        new_city.set(String::new());
                        new_pinballmap_id.set(String::new());
                        error.set(None);
                        refresh_trigger.set(*refresh_trigger + 1);
                    }
                    Err(e) => error.set(Some(e)),
                }
                submitting.set(false);
            });
        })
    };

    let sync_button = |location_id: i32, dry_run: bool| {
        let busy = syncing.is_some();
        let syncing = syncing.clone();
        let sync_result = sync_result.clone();
        let error = error.clone();
        let refresh_trigger = refresh_trigger.clone();
        let onclick = Callback::from(move |_: MouseEvent| {
            let syncing = syncing.clone();
            let sync_result = sync_result.clone();
            let error = error.clone();
            let refresh_trigger = refresh_trigger.clone();
            syncing.set(Some(location_id));
            wasm_bindgen_futures::spawn_local(async move {
                match api::post_for::<SyncReport>(&sync_url(location_id, dry_run)).await {
                    Ok(report) => {
                        let applied = !report.dry_run;
                        sync_result.set(Some((location_id, report)));
                        if applied {
                            refresh_trigger.set(*refresh_trigger + 1);
                        }
                    }
                    Err(e) => error.set(Some(e)),
                }
                syncing.set(None);
            });
        });
        html! {
            <button
                type="button"
                class={classes!("btn", "btn-small", (!dry_run).then_some("btn-primary"))}
                disabled={busy}
                {onclick}
            >
                { if dry_run { "Preview" } else { "Sync" } }
            </button>
        }
    };

    html! {
        <>
            <Header />
            <main>
                <div class="page-header">
                    <h2>{ "Locations" }</h2>
                </div>

                if let Some(err) = (*error).clone() {
                    <p class="error">{ err }</p>
                }

                <form class="add-location-form" onsubmit={on_create}>
                    <h3>{ "Add Location" }</h3>
                    <div class="form-row">
                        <input
                            type="text"
                            placeholder="Name"
                            value={(*new_name).clone()}
                            oninput={text_input(&new_name)}
                            required=true
                        />
                        <input
                            type="text"
                            placeholder="City (optional)"
                            value={(*new_city).clone()}
                            oninput={text_input(&new_city)}
                        />
                        <input
                            type="text"
                            placeholder="PinballMap ID (optional)"
                            value={(*new_pinballmap_id).clone()}
                            oninput={text_input(&new_pinballmap_id)}
                        />
                        <button type="submit" class="btn btn-primary" disabled={*submitting}>
                            { if *submitting { "Adding..." } else { "Add" } }
                        </button>
                    </div>
                </form>

                if *loading {
                    <p>{ "Loading..." }</p>
                } else if locations.is_empty() {
                    <p>{ "No locations yet." }</p>
                } else {
                    <table class="table">
                        <thead>
                            <tr>
                                <th>{ "Name" }</th>
                                <th>{ "City" }</th>
                                <th>{ "Machines" }</th>
                                <th>{ "Open Issues" }</th>
                                <th>{ "PinballMap" }</th>
                                <th>{ "Last Synced" }</th>
                                <th></th>
                            </tr>
                        </thead>
                        <tbody>
                            { for locations.iter().map(|loc| html! {
                                <>
                                    <tr>
                                        <td>{ &loc.name }</td>
                                        <td>{ loc.city.clone().unwrap_or_default() }</td>
                                        <td>{ loc.machine_count }</td>
                                        <td>{ loc.open_issue_count }</td>
                                        <td>{ loc.pinballmap_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()) }</td>
                                        <td>{ loc.last_synced_at.as_ref().map(format_datetime).unwrap_or_else(|| "Never".to_string()) }</td>
                                        <td>
                                            if loc.pinballmap_id.is_some() {
                                                { sync_button(loc.id, true) }
                                                { sync_button(loc.id, false) }
                                                if *syncing == Some(loc.id) {
                                                    <span class="saving-indicator">{ " syncing..." }</span>
                                                }
                                            }
                                        </td>
                                    </tr>
                                    if let Some((_, report)) = (*sync_result).as_ref().filter(|(id, _)| *id == loc.id) {
                                        <tr class="sync-report">
                                            <td colspan="7">
                                                <strong>{ summarize(report) }</strong>
                                                if !report.added.is_empty() {
                                                    <div>{ format!("New: {}", report.added.join(", ")) }</div>
                                                }
                                                if !report.stale.is_empty() {
                                                    <div>{ format!("Not on PinballMap: {}", report.stale.join(", ")) }</div>
                                                }
                                                if !report.skipped.is_empty() {
                                                    <div>{ format!("Skipped (no initials): {}", report.skipped.join(", ")) }</div>
                                                }
                                            </td>
                                        </tr>
                                    }
                                </>
                            })}
                        </tbody>
                    </table>
                }
            </main>
        </>
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_run_summary_uses_conditional_wording() {
        let report = SyncReport {
            dry_run: true,
            added: vec!["Medieval Madness".to_string()],
            unchanged: vec!["Twilight Zone".to_string(), "Attack from Mars".to_string()],
            ..Default::default()
        };
        assert_eq!(summarize(&report), "would add 1, 2 unchanged");
    }

    #[test]
    fn summary_counts_skipped_machines() {
        let report = SyncReport {
            added: vec!["Godzilla".to_string()],
            skipped: vec!["\u{3a9}".to_string()],
            ..Default::default()
        };
        assert_eq!(summarize(&report), "added 1, 0 unchanged, 1 skipped");
    }

    #[test]
    fn sync_url_carries_dry_run_flag() {
        assert_eq!(sync_url(7, true), "/api/locations/7/sync?dry_run=true");
    }
}
