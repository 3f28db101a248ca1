use clap::Args;

use crate::util::api_request;

#[derive(Args)]
pub struct EscalationArgs {
    /// Only escalations still awaiting clinician review
    #[arg(long)]
    pub pending: bool,
    /// Skip pretty-printing (raw JSON for piping)
    #[arg(long)]
    pub raw: bool,
}

pub async fn run(api_url: &str, args: EscalationArgs) -> i32 {
    let query = if args.pending {
        vec![("pending_only".to_string(), "true".to_string())]
    } else {
        Vec::new()
    };
    api_request(
        api_url,
        reqwest::Method::GET,
        "/v1/audit/escalations",
        None,
        &query,
        args.raw,
    )
    .await
}
