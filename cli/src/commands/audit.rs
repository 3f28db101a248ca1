use clap::Subcommand;
use serde_json::json;

use crate::util::{api_request, exit_error, query_pairs};

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Fetch one audit record
    Get {
        /// Audit record id (from a query response)
        audit_id: String,
    },
    /// List audit records, newest first
    List {
        /// Filter by capability name
        #[arg(long)]
        agent: Option<String>,
        /// Minimum post-wrapper confidence (0..1)
        #[arg(long)]
        min_confidence: Option<f64>,
        /// Only records at or after this timestamp (RFC3339)
        #[arg(long)]
        since: Option<String>,
        /// Only records at or before this timestamp (RFC3339)
        #[arg(long)]
        until: Option<String>,
        /// Only escalated (true) or non-escalated (false) records
        #[arg(long)]
        escalated: Option<bool>,
        /// Outcome kind (completed, timed_out, safety_violation, ...)
        #[arg(long)]
        kind: Option<String>,
        /// Maximum number of records to return
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Record a clinician review on an audit record
    Review {
        audit_id: String,
        /// Reviewer identifier (stored as a digest)
        #[arg(long, env = "MEDROUTE_REVIEWER_ID")]
        reviewer_id: String,
        /// Free-text review notes
        #[arg(long)]
        notes: Option<String>,
        /// Mark the capability output as overridden
        #[arg(long = "override", requires = "reason")]
        override_decision: bool,
        /// Why the output was overridden
        #[arg(long)]
        reason: Option<String>,
    },
    /// Per-agent outcome statistics
    Stats {
        /// Capability name
        agent_name: String,
    },
}

pub async fn run(api_url: &str, raw: bool, command: AuditCommands) -> i32 {
    match command {
        AuditCommands::Get { audit_id } => {
            api_request(
                api_url,
                reqwest::Method::GET,
                &format!("/v1/audit/logs/{audit_id}"),
                None,
                &[],
                raw,
            )
            .await
        }
        AuditCommands::List {
            agent,
            min_confidence,
            since,
            until,
            escalated,
            kind,
            limit,
        } => {
            if min_confidence.is_some_and(|c| !(0.0..=1.0).contains(&c)) {
                exit_error("--min-confidence must be between 0 and 1", None);
            }
            let query = query_pairs(&[
                ("agent_name", agent),
                ("min_confidence", min_confidence.map(|c| c.to_string())),
                ("since", since),
                ("until", until),
                ("escalated", escalated.map(|e| e.to_string())),
                ("kind", kind),
                ("limit", limit.map(|l| l.to_string())),
            ]);
            api_request(
                api_url,
                reqwest::Method::GET,
                "/v1/audit/logs",
                None,
                &query,
                raw,
            )
            .await
        }
        AuditCommands::Review {
            audit_id,
            reviewer_id,
            notes,
            override_decision,
            reason,
        } => {
            let body = json!({
                "reviewer_id": reviewer_id,
                "notes": notes,
                "override": override_decision,
                "override_reason": reason,
            });
            api_request(
                api_url,
                reqwest::Method::POST,
                &format!("/v1/audit/logs/{audit_id}/review"),
                Some(body),
                &[],
                raw,
            )
            .await
        }
        AuditCommands::Stats { agent_name } => {
            api_request(
                api_url,
                reqwest::Method::GET,
                &format!("/v1/audit/stats/{agent_name}"),
                None,
                &[],
                raw,
            )
            .await
        }
    }
}
