use rusqlite::{Connection, Result};
use std::time::Duration;

pub fn migrate(conn: &Connection, busy_timeout: Duration) -> Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS proposals (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS options (
            proposal_id TEXT NOT NULL REFERENCES proposals(id),
            option_id TEXT NOT NULL,
            text TEXT NOT NULL,
            votes INTEGER NOT NULL DEFAULT 0,
            proposer_id TEXT NOT NULL,
            proposer_name TEXT,
            created_at TEXT NOT NULL,
            PRIMARY KEY(proposal_id, option_id)
        );

        CREATE TABLE IF NOT EXISTS comments (
            proposal_id TEXT NOT NULL,
            id TEXT NOT NULL,
            payload_json TEXT,
            processing_status TEXT CHECK(processing_status IN ('processed','failed')),
            status_reason TEXT,
            status_at TEXT,
            created_at TEXT NOT NULL,
            PRIMARY KEY(proposal_id, id)
        );

        CREATE TABLE IF NOT EXISTS invocations (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            ts TEXT NOT NULL,
            proposal_id TEXT NOT NULL,
            comment_id TEXT NOT NULL,
            outcome TEXT NOT NULL CHECK(outcome IN ('skipped','processed','failed','retry')),
            option_id TEXT,
            reason TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_comments_unset ON comments(proposal_id) WHERE processing_status IS NULL;
        CREATE INDEX IF NOT EXISTS idx_invocations_proposal_seq ON invocations(proposal_id, seq);
        ",
    )?;

    Ok(())
}
