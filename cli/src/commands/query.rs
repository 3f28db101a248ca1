use clap::Args;
use serde_json::{Value, json};

use crate::util::{api_request, exit_error, parse_pairs, read_json_from_file};

#[derive(Args)]
pub struct QueryArgs {
    /// Request text (e.g. "What are the side effects of ibuprofen?")
    #[arg(required_unless_present = "file")]
    pub text: Option<String>,

    /// Caller identifier recorded (as a digest) in the audit trail
    #[arg(long, env = "MEDROUTE_USER_ID")]
    pub user_id: Option<String>,

    /// Declared role: patient, clinician or admin
    #[arg(long, default_value = "patient")]
    pub role: String,

    /// Context entries (repeatable: key=value, e.g. -c age=34)
    #[arg(long, short = 'c')]
    pub context: Vec<String>,

    /// Attachment references (repeatable)
    #[arg(long, short = 'a')]
    pub attachment: Vec<String>,

    /// Read the whole request body from a JSON file (use '-' for stdin)
    #[arg(long, short = 'f', conflicts_with_all = ["text", "context", "attachment"])]
    pub file: Option<String>,

    /// Skip pretty-printing (raw JSON for piping)
    #[arg(long)]
    pub raw: bool,
}

fn build_body(args: &QueryArgs) -> Result<Value, String> {
    if let Some(path) = &args.file {
        return read_json_from_file(path);
    }
    let user_id = args
        .user_id
        .as_deref()
        .ok_or("user_id is required (--user-id or MEDROUTE_USER_ID)")?;
    let context = parse_pairs(&args.context)?;
    Ok(json!({
        "user_id": user_id,
        "text": args.text.clone().unwrap_or_default(),
        "role": args.role.to_lowercase(),
        "context": context,
        "attachments": args.attachment,
    }))
}

pub async fn run(api_url: &str, args: QueryArgs) -> i32 {
    let body = match build_body(&args) {
        Ok(body) => body,
        Err(e) => exit_error(
            &e,
            Some("Example: medroute query --user-id u1 -c age=34 'fever and cough for 3 days'"),
        ),
    };
    api_request(
        api_url,
        reqwest::Method::POST,
        "/v1/orchestrator/query",
        Some(body),
        &[],
        args.raw,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(text: &str) -> QueryArgs {
        QueryArgs {
            text: Some(text.to_string()),
            user_id: Some("u1".to_string()),
            role: "Clinician".to_string(),
            context: vec!["age=34".to_string()],
            attachment: vec!["scan.png".to_string()],
            file: None,
            raw: false,
        }
    }

    #[test]
    fn body_carries_context_and_attachments() {
        let body = build_body(&args("rash on my arm")).unwrap();
        assert_eq!(body["user_id"], "u1");
        assert_eq!(body["text"], "rash on my arm");
        assert_eq!(body["role"], "clinician");
        assert_eq!(body["context"]["age"], 34);
        assert_eq!(body["attachments"][0], "scan.png");
    }

    #[test]
    fn user_id_is_required_without_file() {
        let mut args = args("headache");
        args.user_id = None;
        assert!(build_body(&args).is_err());
    }
}
