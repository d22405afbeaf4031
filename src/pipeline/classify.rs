use crate::model::Comment;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Eligible,
    /// Ordinary comment; nothing to promote.
    Skip,
    /// Flagged for promotion but missing required data. Never becomes valid.
    Invalid(String),
}

pub fn classify(comment: &Comment) -> Classification {
    if comment.is_option_proposal != Some(true) {
        return Classification::Skip;
    }

    let mut missing = Vec::new();
    if comment
        .content
        .as_deref()
        .map(str::trim)
        .unwrap_or("")
        .is_empty()
    {
        missing.push("content");
    }
    if comment
        .author
        .as_ref()
        .and_then(|a| a.uid.as_deref())
        .map(str::trim)
        .unwrap_or("")
        .is_empty()
    {
        missing.push("author.uid");
    }

    if missing.is_empty() {
        Classification::Eligible
    } else {
        Classification::Invalid(format!("missing required field(s): {}", missing.join(", ")))
    }
}
