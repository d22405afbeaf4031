use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Terminal processing state written on a comment by the pipeline.
///
/// An unset status is represented as `Option::<ProcessingStatus>::None`;
/// both variants here are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Processed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Processed => "processed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processed" => Ok(ProcessingStatus::Processed),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(format!("unknown processing status `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Author {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Comment document as delivered by the create trigger.
///
/// Every field except `id` is optional on the wire: the classifier decides
/// what a missing field means, not the decoder.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_option_proposal: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_status: Option<ProcessingStatus>,
}

/// A voteable option embedded in a proposal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProposalOption {
    pub id: String,
    pub text: String,
    pub votes: i64,
    pub proposer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposer_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Proposal {
    pub id: String,
    pub title: String,
    pub options: Vec<ProposalOption>,
}

impl Proposal {
    pub fn has_option(&self, option_id: &str) -> bool {
        self.options.iter().any(|o| o.id == option_id)
    }
}

/// One delivery of the comment-created trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    pub proposal_id: String,
    pub comment_id: String,
    pub payload: Comment,
}

impl Invocation {
    pub fn new(proposal_id: &str, payload: Comment) -> Self {
        Self {
            proposal_id: proposal_id.to_string(),
            comment_id: payload.id.clone(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_camel_case_trigger_payload() {
        let raw = r#"{
            "id": "c1",
            "content": "Adopt policy A",
            "author": {"uid": "u1", "name": "Ana"},
            "isOptionProposal": true
        }"#;
        let comment: Comment = serde_json::from_str(raw).unwrap();
        assert_eq!(comment.id, "c1");
        assert_eq!(comment.is_option_proposal, Some(true));
        assert_eq!(comment.author.unwrap().uid.as_deref(), Some("u1"));
        assert_eq!(comment.processing_status, None);
    }

    #[test]
    fn tolerates_missing_optional_fields() {
        let comment: Comment = serde_json::from_str(r#"{"id": "c9"}"#).unwrap();
        assert!(comment.content.is_none());
        assert!(comment.author.is_none());
        assert!(comment.is_option_proposal.is_none());
    }

    #[test]
    fn status_parses_only_terminal_values() {
        assert_eq!(
            "processed".parse::<ProcessingStatus>().unwrap(),
            ProcessingStatus::Processed
        );
        assert!("pending".parse::<ProcessingStatus>().is_err());
    }
}
