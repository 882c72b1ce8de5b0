//! Thin wrappers over `gloo_net` that turn error bodies into messages.

use gloo_net::http::{Request, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::ApiError;

async fn error_message(resp: Response) -> String {
    match resp.json::<ApiError>().await {
        Ok(err) => err.error.message,
        Err(_) => format!("Request failed: {}", resp.status()),
    }
}

async fn finish<T: DeserializeOwned>(req: Result<Response, gloo_net::Error>) -> Result<T, String> {
    match req {
        Ok(resp) if resp.ok() => resp
            .json::<T>()
            .await
            .map_err(|e| format!("Failed to parse response: {}", e)),
        Ok(resp) => Err(error_message(resp).await),
        Err(e) => {
            log::warn!("request failed: {}", e);
            Err(format!("Request error: {}", e))
        }
    }
}

pub async fn get<T: DeserializeOwned>(url: &str) -> Result<T, String> {
    finish(Request::get(url).send().await).await
}

async fn send_json<B: Serialize, T: DeserializeOwned>(
    builder: RequestBuilder,
    body: &B,
) -> Result<T, String> {
    let req = builder
        .json(body)
        .map_err(|e| format!("Failed to encode request: {}", e))?;
    finish(req.send().await).await
}

pub async fn post<B: Serialize, T: DeserializeOwned>(url: &str, body: &B) -> Result<T, String> {
    send_json(Request::post(url), body).await
}

pub async fn patch<B: Serialize, T: DeserializeOwned>(url: &str, body: &B) -> Result<T, String> {
    send_json(Request::patch(url), body).await
}

/// POST without a request body, decoding the response.
pub async fn post_for<T: DeserializeOwned>(url: &str) -> Result<T, String> {
    finish(Request::post(url).send().await).await
}

/// POST/DELETE with no response body expected.
pub async fn post_empty(url: &str) -> Result<(), String> {
    match Request::post(url).send().await {
        Ok(resp) if resp.ok() => Ok(()),
        Ok(resp) => Err(error_message(resp).await),
        Err(e) => Err(format!("Request error: {}", e)),
    }
}

pub async fn delete(url: &str) -> Result<(), String> {
    match Request::delete(url).send().await {
        Ok(resp) if resp.ok() => Ok(()),
        Ok(resp) => Err(error_message(resp).await),
        Err(e) => Err(format!("Request error: {}", e)),
    }
}
