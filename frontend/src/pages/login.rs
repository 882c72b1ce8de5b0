use yew::prelude::*;

#[function_component(Login)]
pub fn login() -> Html {
    html! {
        <div class="login-container">
            <div class="login-card">
                <h1 class="login-title">{ "PinPoint" }</h1>
                <p class="login-subtitle">{ "Pinball maintenance tracking" }</p>
                <p>{ "Sign in to see your machines and issues" }</p>
                <a href="/auth/login" class="login-button">
                    { "Sign in with Google" }
                </a>
            </div>
        </div>
    }
}
