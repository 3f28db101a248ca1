use crate::util::api_request;

/// `GET /health`, or the orchestrator detail view with counters.
pub async fn run(api_url: &str, detailed: bool) -> i32 {
    let path = if detailed {
        "/v1/orchestrator/health"
    } else {
        "/health"
    };
    api_request(api_url, reqwest::Method::GET, path, None, &[], false).await
}
