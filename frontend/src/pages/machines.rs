use std::collections::BTreeMap;

use shared::MachineResponse;
use yew::prelude::*;

use crate::api;
use crate::components::Header;
use crate::format::severity_class;

/// Machines grouped under their location, keeping the server's ordering.
fn by_location(machines: &[MachineResponse]) -> BTreeMap<String, Vec<&MachineResponse>> {
    let mut groups: BTreeMap<String, Vec<&MachineResponse>> = BTreeMap::new();
    for machine in machines {
        groups
            .entry(machine.location_name.clone())
            .or_default()
            .push(machine);
    }
    groups
}

#[function_component(Machines)]
pub fn machines() -> Html {
    let machines = use_state(Vec::<MachineResponse>::new);
    let loading = use_state(|| true);
    let error = use_state(|| None::<String>);

    {
        let machines = machines.clone();
        let loading = loading.clone();
        let error = error.clone();
        use_effect_with((), move |_| {
            wasm_bindgen_futures::spawn_local(async move {
                match api::get::<Vec<MachineResponse>>("/api/machines").await {
                    Ok(data) => machines.set(data),
                    Err(e) => error.set(Some(e)),
                }
                loading.set(false);
            });
            || ()
        });
    }

    html! {
        <>
            <Header />
            <main>
                <div class="page-header">
                    <h2>{ "Machines" }</h2>
                </div>

                if *loading {
                    <p>{ "Loading..." }</p>
                } else if let Some(err) = (*error).clone() {
                    <p class="error">{ err }</p>
                } else if machines.is_empty() {
                    <p>{ "No machines yet. Import them with the CLI or sync a location from PinballMap." }</p>
                } else {
                    { for by_location(&machines).into_iter().map(|(location, list)| html! {
                        <section class="machine-group">
                            <h3>{ location }</h3>
                            <table class="table">
                                <thead>
                                    <tr>
                                        <th>{ "Initials" }</th>
                                        <th>{ "Name" }</th>
                                        <th>{ "Model" }</th>
                                        <th>{ "Owner" }</th>
                                        <th>{ "Open Issues" }</th>
                                        <th>{ "QR" }</th>
                                    </tr>
                                </thead>
                                <tbody>
                                    { for list.into_iter().map(|m| {
                                        let model = match (&m.model.manufacturer, m.model.year) {
                                            (Some(maker), Some(year)) => format!("{} ({} {})", m.model.name, maker, year),
                                            (Some(maker), None) => format!("{} ({})", m.model.name, maker),
                                            _ => m.model.name.clone(),
                                        };
                                        html! {
                                            <tr>
                                                <td><span class="item-id">{ &m.initials }</span></td>
                                                <td>{ &m.name }</td>
                                                <td>{ model }</td>
                                                <td>{ m.owner_name.clone().unwrap_or_else(|| "-".to_string()) }</td>
                                                <td class={classes!(m.worst_open_severity.map(severity_class))}>
                                                    { m.open_issue_count }
                                                </td>
                                                <td>
                                                    <a href={m.qr_code_url.clone()} target="_blank" rel="noopener noreferrer">
                                                        { &m.qr_code_id }
                                                    </a>
                                                </td>
                                            </tr>
                                        }
                                    })}
                                </tbody>
                            </table>
                        </section>
                    })}
                }
            </main>
        </>
    }
}
