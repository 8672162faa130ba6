// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User approval gate.
//!
//! Every routed request is shown to the user before its signer runs. The
//! bridge only sees the decision.

use std::str::FromStr;

use async_trait::async_trait;

use crate::models::SessionRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

#[async_trait]
pub trait UserApproval: Send + Sync {
    /// Ask the user whether `request` may be signed by `account`.
    async fn review(&self, request: &SessionRequest, account: &str) -> Decision;
}

/// Static approval policy, selected with `APPROVAL_POLICY`.
///
/// Defaults to [`ApprovalPolicy::Deny`]: nothing is signed unless the
/// operator opts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApprovalPolicy {
    /// Approve everything. Only suitable when an upstream UI already gated
    /// the request.
    AutoApprove,
    /// Reject everything.
    #[default]
    Deny,
}

impl FromStr for ApprovalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" | "approve" => Ok(ApprovalPolicy::AutoApprove),
            "deny" | "reject" => Ok(ApprovalPolicy::Deny),
            other => Err(format!("unknown approval policy: {other}")),
        }
    }
}

#[async_trait]
impl UserApproval for ApprovalPolicy {
    async fn review(&self, request: &SessionRequest, account: &str) -> Decision {
        let decision = match self {
            ApprovalPolicy::AutoApprove => Decision::Approve,
            ApprovalPolicy::Deny => Decision::Reject,
        };
        tracing::debug!(
            topic = %request.topic,
            id = request.id,
            method = %request.method,
            account = %account,
            ?decision,
            "Approval policy applied"
        );
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> SessionRequest {
        SessionRequest {
            topic: "t".into(),
            id: 1,
            chain_id: "eip155:1".into(),
            method: "personal_sign".into(),
            params: json!([]),
        }
    }

    #[test]
    fn policy_parses_from_env_values() {
        assert_eq!("auto".parse(), Ok(ApprovalPolicy::AutoApprove));
        assert_eq!("DENY".parse(), Ok(ApprovalPolicy::Deny));
        assert!("maybe".parse::<ApprovalPolicy>().is_err());
    }

    #[tokio::test]
    async fn unset_policy_rejects() {
        let policy = ApprovalPolicy::default();
        assert_eq!(policy, ApprovalPolicy::Deny);
        assert_eq!(policy.review(&request(), "eip155:1:0xA").await, Decision::Reject);
    }

    #[tokio::test]
    async fn policy_decides_statically() {
        assert_eq!(
            ApprovalPolicy::AutoApprove.review(&request(), "eip155:1:0xA").await,
            Decision::Approve
        );
        assert_eq!(
            ApprovalPolicy::Deny.review(&request(), "eip155:1:0xA").await,
            Decision::Reject
        );
    }
}
