use std::rc::Rc;

use shared::CurrentUserResponse;
use yew::prelude::*;
use yew_router::prelude::*;

mod api;
mod components;
mod format;
mod pages;

#[derive(Clone, Routable, PartialEq)]
pub enum Route {
    #[at("/")]
    Home,
    #[at("/issues/:reference")]
    Issue { reference: String },
    #[at("/machines")]
    Machines,
    #[at("/locations")]
    Locations,
    #[at("/report/:code")]
    Report { code: String },
    #[not_found]
    #[at("/404")]
    NotFound,
}

/// The signed-in user, provided to every page behind [`Authenticated`].
pub type CurrentUser = Rc<CurrentUserResponse>;

#[derive(Properties, PartialEq)]
struct AuthenticatedProps {
    children: Html,
}

#[function_component(Authenticated)]
fn authenticated(props: &AuthenticatedProps) -> Html {
    // None = still checking, Some(None) = signed out
    let user = use_state(|| None::<Option<CurrentUser>>);

    {
        let user = user.clone();
        use_effect_with((), move |_| {
            wasm_bindgen_futures::spawn_local(async move {
                match api::get::<CurrentUserResponse>("/auth/me").await {
                    Ok(me) => user.set(Some(Some(Rc::new(me)))),
                    Err(_) => user.set(Some(None)),
                }
            });
            || ()
        });
    }

    match (*user).clone() {
        None => html! {
            <div class="login-container">
                <div class="login-card">
                    <p>{ "Loading..." }</p>
                </div>
            </div>
        },
        Some(None) => html! { <pages::login::Login /> },
        Some(Some(me)) => html! {
            <ContextProvider<CurrentUser> context={me}>
                { props.children.clone() }
            </ContextProvider<CurrentUser>>
        },
    }
}

fn switch(routes: Route) -> Html {
    match routes {
        Route::Report { code } => html! { <pages::report::Report {code} /> },
        Route::Home | Route::NotFound => html! {
            <Authenticated><pages::home::Home /></Authenticated>
        },
        Route::Issue { reference } => html! {
            <Authenticated><pages::home::Home initial_reference={reference} /></Authenticated>
        },
        Route::Machines => html! {
            <Authenticated><pages::machines::Machines /></Authenticated>
        },
        Route::Locations => html! {
            <Authenticated><pages::manage_locations::ManageLocations /></Authenticated>
        },
    }
}

#[function_component(App)]
fn app() -> Html {
    html! {
        <BrowserRouter>
            <div class="container">
                <Switch<Route> render={switch} />
            </div>
        </BrowserRouter>
    }
}

fn main() {
    wasm_logger::init(wasm_logger::Config::default());
    yew::Renderer::<App>::new().render();
}
