use gloo_net::http::Request;
use shared::{Organization, UnreadCountResponse};
use web_sys::window;
use yew::prelude::*;
use yew_router::prelude::*;

use crate::{api, Route};

#[derive(Properties, PartialEq)]
pub struct HeaderProps {
    /// Bumped by the page whenever notifications may have changed.
    #[prop_or_default]
    pub refresh_trigger: u32,
    #[prop_or_default]
    pub on_toggle_notifications: Option<Callback<()>>,
}

#[function_component(Header)]
pub fn header(props: &HeaderProps) -> Html {
    let logging_out = use_state(|| false);
    let organization = use_state(|| None::<Organization>);
    let unread = use_state(|| 0i64);

    {
        let organization = organization.clone();
        use_effect_with((), move |_| {
            wasm_bindgen_futures::spawn_local(async move {
                if let Ok(org) = api::get::<Organization>("/api/organization").await {
                    if let Some(doc) = window().and_then(|w| w.document()) {
                        doc.set_title(&format!("{} · PinPoint", org.name));
                    }
                    organization.set(Some(org));
                }
            });
            || ()
        });
    }

    {
        let unread = unread.clone();
        use_effect_with(props.refresh_trigger, move |_| {
            wasm_bindgen_futures::spawn_local(async move {
                if let Ok(count) =
                    api::get::<UnreadCountResponse>("/api/notifications/unread-count").await
                {
                    unread.set(count.unread);
                }
            });
            || ()
        });
    }

    let on_logout = {
        let logging_out = logging_out.clone();
        Callback::from(move |_: MouseEvent| {
            let logging_out = logging_out.clone();
            logging_out.set(true);
            wasm_bindgen_futures::spawn_local(async move {
                let _ = Request::post("/auth/logout").send().await;
                if let Some(w) = window() {
                    let _ = w.location().reload();
                }
            });
        })
    };

    let on_bell = props.on_toggle_notifications.clone().map(|cb| {
        Callback::from(move |_: MouseEvent| cb.emit(()))
    });

    let org_name = (*organization)
        .as_ref()
        .map(|o| o.name.clone())
        .unwrap_or_else(|| "PinPoint".to_string());

    html! {
        <header class="header">
            <nav>
                <Link<Route> to={Route::Home}>
                    if let Some(logo) = (*organization).as_ref().and_then(|o| o.logo_url.clone()) {
                        <img class="org-logo" src={logo} alt="" />
                    }
                    <h1>{ org_name }</h1>
                </Link<Route>>
                <div class="nav-links">
                    <Link<Route> to={Route::Home}>{ "Issues" }</Link<Route>>
                    <Link<Route> to={Route::Machines}>{ "Machines" }</Link<Route>>
                    <Link<Route> to={Route::Locations}>{ "Locations" }</Link<Route>>
                </div>
                <div class="header-actions">
                    if let Some(on_bell) = on_bell {
                        <button
                            type="button"
                            class="btn-notifications"
                            aria-label="Notifications"
                            onclick={on_bell}
                        >
                            { "🔔" }
                            if *unread > 0 {
                                <span class="notification-badge">{ *unread }</span>
                            }
                        </button>
                    }
                    <button class="btn-logout" onclick={on_logout} disabled={*logging_out}>
                        { if *logging_out { "Logging out..." } else { "Logout" } }
                    </button>
                </div>
            </nav>
        </header>
    }
}
