use crate::model::{Comment, ProposalOption};
use sha2::{Digest, Sha256};

pub const OPTION_ID_PREFIX: &str = "opc_";
const OPTION_ID_DOMAIN: &str = "promoter/option/v1:";
const OPTION_ID_HEX_LEN: usize = 24;

/// Option id for a source comment. Stable across redeliveries and processes.
pub fn derive_option_id(comment_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(OPTION_ID_DOMAIN.as_bytes());
    hasher.update(comment_id.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    format!("{OPTION_ID_PREFIX}{}", &hex[..OPTION_ID_HEX_LEN])
}

/// Builds the option record for an eligible comment. The id derives from
/// `comment_id`, the key its status is stored under.
///
/// Returns `None` when the comment lacks `content` or `author.uid`; callers
/// classify first, so that only happens on a classifier/builder mismatch.
pub fn build_option(comment_id: &str, comment: &Comment) -> Option<ProposalOption> {
    let text = comment.content.clone()?;
    let author = comment.author.as_ref()?;
    let proposer_id = author.uid.clone()?;
    Some(ProposalOption {
        id: derive_option_id(comment_id),
        text,
        votes: 0,
        proposer_id,
        proposer_name: author.name.clone(),
    })
}
