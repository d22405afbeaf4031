use crate::model::{Comment, ProcessingStatus, Proposal, ProposalOption};
use crate::store::{
    AppendResult, DocumentStore, InvocationRow, NewInvocation, StatusWrite, StoreError, schema,
};
use anyhow::{Context, Result, bail};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// SQLite-backed document store.
///
/// One handle wraps one connection. Concurrent workers each open their own
/// handle on the same path; WAL mode plus immediate write transactions keep
/// their inserts from clobbering one another.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create db parent dir {}", parent.display()))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
        schema::migrate(&conn, busy_timeout)
            .with_context(|| format!("migrate sqlite db {}", path.display()))?;
        Ok(Self { conn })
    }

    fn write_tx(&self) -> rusqlite::Result<Transaction<'_>> {
        Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
    }

    pub fn create_proposal(&self, id: &str, title: &str) -> Result<()> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO proposals (id, title, created_at) VALUES (?1, ?2, ?3)",
            params![id, title, Utc::now().to_rfc3339()],
        )?;
        if inserted == 0 {
            bail!("proposal already exists: {id}");
        }
        Ok(())
    }

    /// Stores a newly created comment. Returns `false` when a comment with the
    /// same id already carries a payload under this proposal.
    pub fn insert_comment(&self, proposal_id: &str, comment: &Comment) -> Result<bool> {
        let mut payload = comment.clone();
        payload.processing_status = None;
        let payload_json = serde_json::to_string(&payload)?;
        let changed = self.conn.execute(
            "INSERT INTO comments (proposal_id, id, payload_json, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(proposal_id, id) DO UPDATE SET payload_json = excluded.payload_json
             WHERE comments.payload_json IS NULL",
            params![
                proposal_id,
                comment.id,
                payload_json,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_comment(&self, proposal_id: &str, comment_id: &str) -> Result<Option<Comment>> {
        self.conn
            .query_row(
                "SELECT id, payload_json, processing_status FROM comments
                 WHERE proposal_id = ?1 AND id = ?2",
                params![proposal_id, comment_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?
            .map(|(id, payload, status)| decode_comment(id, payload, status))
            .transpose()
    }

    pub fn list_comments(&self, proposal_id: &str) -> Result<Vec<Comment>> {
        self.query_comments(
            "SELECT id, payload_json, processing_status FROM comments
             WHERE proposal_id = ?1 ORDER BY created_at ASC, id ASC",
            proposal_id,
        )
    }

    /// Stored comments whose status was never written, oldest first.
    pub fn list_unprocessed_comments(&self, proposal_id: &str) -> Result<Vec<Comment>> {
        self.query_comments(
            "SELECT id, payload_json, processing_status FROM comments
             WHERE proposal_id = ?1 AND processing_status IS NULL AND payload_json IS NOT NULL
             ORDER BY created_at ASC, id ASC",
            proposal_id,
        )
    }

    fn query_comments(&self, sql: &str, proposal_id: &str) -> Result<Vec<Comment>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![proposal_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, payload, status)| decode_comment(id, payload, status))
            .collect()
    }

    /// Increments the vote counter of a single option in place.
    pub fn record_vote(&self, proposal_id: &str, option_id: &str) -> Result<i64> {
        let votes = self
            .conn
            .query_row(
                "UPDATE options SET votes = votes + 1
                 WHERE proposal_id = ?1 AND option_id = ?2
                 RETURNING votes",
                params![proposal_id, option_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        votes.ok_or_else(|| anyhow::anyhow!("option {option_id} not found on proposal {proposal_id}"))
    }

    pub fn record_invocation(&self, inv: &NewInvocation) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO invocations (ts, proposal_id, comment_id, outcome, option_id, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Utc::now().to_rfc3339(),
                inv.proposal_id,
                inv.comment_id,
                inv.outcome,
                inv.option_id,
                inv.reason
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_invocations(&self, proposal_id: &str) -> Result<Vec<InvocationRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, ts, proposal_id, comment_id, outcome, option_id, reason
             FROM invocations WHERE proposal_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt
            .query_map(params![proposal_id], |row| {
                Ok(InvocationRow {
                    seq: row.get(0)?,
                    ts: row.get(1)?,
                    proposal_id: row.get(2)?,
                    comment_id: row.get(3)?,
                    outcome: row.get(4)?,
                    option_id: row.get(5)?,
                    reason: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn read_status(
        conn: &Connection,
        proposal_id: &str,
        comment_id: &str,
    ) -> Result<Option<ProcessingStatus>, StoreError> {
        let raw = conn
            .query_row(
                "SELECT processing_status FROM comments WHERE proposal_id = ?1 AND id = ?2",
                params![proposal_id, comment_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        raw.map(|s| s.parse::<ProcessingStatus>().map_err(StoreError::Corrupt))
            .transpose()
    }
}

fn decode_comment(id: String, payload: Option<String>, status: Option<String>) -> Result<Comment> {
    let mut comment = match payload {
        Some(raw) => serde_json::from_str::<Comment>(&raw)
            .with_context(|| format!("decode stored comment {id}"))?,
        None => Comment {
            id: id.clone(),
            ..Comment::default()
        },
    };
    comment.processing_status = status
        .map(|s| s.parse::<ProcessingStatus>())
        .transpose()
        .map_err(|e| anyhow::anyhow!("comment {id}: {e}"))?;
    Ok(comment)
}

impl DocumentStore for SqliteStore {
    fn get_proposal(&self, proposal_id: &str) -> Result<Proposal, StoreError> {
        let title = self
            .conn
            .query_row(
                "SELECT title FROM proposals WHERE id = ?1",
                params![proposal_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(proposal_id.to_string()))?;

        let mut stmt = self.conn.prepare(
            "SELECT option_id, text, votes, proposer_id, proposer_name
             FROM options WHERE proposal_id = ?1 ORDER BY created_at ASC, option_id ASC",
        )?;
        let options = stmt
            .query_map(params![proposal_id], |row| {
                Ok(ProposalOption {
                    id: row.get(0)?,
                    text: row.get(1)?,
                    votes: row.get(2)?,
                    proposer_id: row.get(3)?,
                    proposer_name: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Proposal {
            id: proposal_id.to_string(),
            title,
            options,
        })
    }

    fn append_option(
        &self,
        proposal_id: &str,
        option: &ProposalOption,
    ) -> Result<AppendResult, StoreError> {
        let tx = self.write_tx()?;
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM proposals WHERE id = ?1)",
            params![proposal_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::NotFound(proposal_id.to_string()));
        }
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO options (proposal_id, option_id, text, votes, proposer_id, proposer_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                proposal_id,
                option.id,
                option.text,
                option.votes,
                option.proposer_id,
                option.proposer_name,
                Utc::now().to_rfc3339()
            ],
        )?;
        tx.commit()?;
        Ok(if inserted == 0 {
            AppendResult::AlreadyPresent
        } else {
            AppendResult::Appended
        })
    }

    fn set_comment_status(
        &self,
        proposal_id: &str,
        comment_id: &str,
        status: ProcessingStatus,
        reason: Option<&str>,
    ) -> Result<StatusWrite, StoreError> {
        let now = Utc::now().to_rfc3339();
        let tx = self.write_tx()?;
        let changed = tx.execute(
            "INSERT INTO comments (proposal_id, id, processing_status, status_reason, status_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(proposal_id, id) DO UPDATE SET
                processing_status = excluded.processing_status,
                status_reason = excluded.status_reason,
                status_at = excluded.status_at
             WHERE comments.processing_status IS NULL",
            params![proposal_id, comment_id, status.as_str(), reason, now],
        )?;
        let result = if changed > 0 {
            StatusWrite::Written
        } else {
            let existing = Self::read_status(&tx, proposal_id, comment_id)?.ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "comment {comment_id} status write ignored but no terminal status stored"
                ))
            })?;
            StatusWrite::AlreadyTerminal(existing)
        };
        tx.commit()?;
        Ok(result)
    }

    fn comment_status(
        &self,
        proposal_id: &str,
        comment_id: &str,
    ) -> Result<Option<ProcessingStatus>, StoreError> {
        Self::read_status(&self.conn, proposal_id, comment_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Author;
    use tempfile::tempdir;

    fn option(id: &str, text: &str) -> ProposalOption {
        ProposalOption {
            id: id.to_string(),
            text: text.to_string(),
            votes: 0,
            proposer_id: "u1".to_string(),
            proposer_name: Some("Ana".to_string()),
        }
    }

    #[test]
    fn append_is_insert_if_absent() {
        let tmp = tempdir().unwrap();
        let store = SqliteStore::open(&tmp.path().join("store.db"), DEFAULT_BUSY_TIMEOUT).unwrap();
        store.create_proposal("p1", "Budget").unwrap();

        let first = store.append_option("p1", &option("opc_a", "A")).unwrap();
        let second = store.append_option("p1", &option("opc_a", "A")).unwrap();
        assert_eq!(first, AppendResult::Appended);
        assert_eq!(second, AppendResult::AlreadyPresent);
        assert_eq!(store.get_proposal("p1").unwrap().options.len(), 1);
    }

    #[test]
    fn append_to_missing_proposal_is_not_found() {
        let tmp = tempdir().unwrap();
        let store = SqliteStore::open(&tmp.path().join("store.db"), DEFAULT_BUSY_TIMEOUT).unwrap();
        let err = store.append_option("nope", &option("opc_a", "A")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "nope"));
    }

    #[test]
    fn append_does_not_reset_votes_on_other_options() {
        let tmp = tempdir().unwrap();
        let store = SqliteStore::open(&tmp.path().join("store.db"), DEFAULT_BUSY_TIMEOUT).unwrap();
        store.create_proposal("p1", "Budget").unwrap();
        store.append_option("p1", &option("opc_a", "A")).unwrap();
        assert_eq!(store.record_vote("p1", "opc_a").unwrap(), 1);
        assert_eq!(store.record_vote("p1", "opc_a").unwrap(), 2);

        store.append_option("p1", &option("opc_b", "B")).unwrap();
        store.append_option("p1", &option("opc_a", "A")).unwrap();

        let proposal = store.get_proposal("p1").unwrap();
        let a = proposal.options.iter().find(|o| o.id == "opc_a").unwrap();
        assert_eq!(a.votes, 2);
        assert_eq!(proposal.options.len(), 2);
    }

    #[test]
    fn status_write_is_monotonic() {
        let tmp = tempdir().unwrap();
        let store = SqliteStore::open(&tmp.path().join("store.db"), DEFAULT_BUSY_TIMEOUT).unwrap();

        let first = store
            .set_comment_status("p1", "c1", ProcessingStatus::Processed, None)
            .unwrap();
        let second = store
            .set_comment_status("p1", "c1", ProcessingStatus::Failed, Some("late"))
            .unwrap();
        assert_eq!(first, StatusWrite::Written);
        assert_eq!(
            second,
            StatusWrite::AlreadyTerminal(ProcessingStatus::Processed)
        );
        assert_eq!(
            store.comment_status("p1", "c1").unwrap(),
            Some(ProcessingStatus::Processed)
        );
    }

    #[test]
    fn comment_payload_survives_status_only_row() {
        let tmp = tempdir().unwrap();
        let store = SqliteStore::open(&tmp.path().join("store.db"), DEFAULT_BUSY_TIMEOUT).unwrap();
        store
            .set_comment_status("p1", "c1", ProcessingStatus::Failed, Some("invalid"))
            .unwrap();
        let comment = Comment {
            id: "c1".to_string(),
            content: Some("late payload".to_string()),
            author: Some(Author {
                uid: Some("u1".to_string()),
                name: None,
            }),
            is_option_proposal: Some(true),
            processing_status: None,
        };
        assert!(store.insert_comment("p1", &comment).unwrap());
        assert!(!store.insert_comment("p1", &comment).unwrap());

        let stored = store.get_comment("p1", "c1").unwrap().unwrap();
        assert_eq!(stored.content.as_deref(), Some("late payload"));
        assert_eq!(stored.processing_status, Some(ProcessingStatus::Failed));
        assert!(store.list_unprocessed_comments("p1").unwrap().is_empty());
    }

    #[test]
    fn vote_on_unknown_option_errors() {
        let tmp = tempdir().unwrap();
        let store = SqliteStore::open(&tmp.path().join("store.db"), DEFAULT_BUSY_TIMEOUT).unwrap();
        store.create_proposal("p1", "Budget").unwrap();
        let err = store.record_vote("p1", "opc_missing").unwrap_err();
        assert!(format!("{err}").contains("not found"));
    }
}
