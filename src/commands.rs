use crate::config::{self, PipelineConfig};
use crate::model::{Author, Comment, Invocation};
use crate::pipeline::coordinator::CoordinatorOptions;
use crate::pipeline::dispatch::{self, Report};
use crate::store::DocumentStore;
use crate::store::sqlite::SqliteStore;
use anyhow::{Context, Result, bail};
use serde_json::json;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Process-wide settings: CLI flags layered over `.promoter/config.toml`.
#[derive(Debug, Clone)]
pub struct Settings {
    pub state_db: PathBuf,
    pub ndjson_log: Option<PathBuf>,
    pub pipeline: PipelineConfig,
}

impl Settings {
    pub fn resolve(
        repo_root: &Path,
        state_db: Option<PathBuf>,
        log: Option<PathBuf>,
        timeout_secs: Option<u64>,
    ) -> Result<Self> {
        let repo_cfg = config::load_repo_config(repo_root)?;
        let mut pipeline = repo_cfg
            .as_ref()
            .map(|cfg| cfg.pipeline.clone())
            .unwrap_or_default();
        if let Some(secs) = timeout_secs {
            if secs == 0 {
                bail!("--timeout-secs must be positive");
            }
            pipeline.invocation_timeout_secs = secs;
        }
        let ndjson_log = log.or_else(|| {
            repo_cfg
                .as_ref()
                .and_then(|cfg| cfg.log.as_ref())
                .and_then(|log| log.ndjson.clone())
                .map(|p| if p.is_absolute() { p } else { repo_root.join(p) })
        });
        Ok(Self {
            state_db: state_db.unwrap_or_else(default_state_db),
            ndjson_log,
            pipeline,
        })
    }

    pub fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.state_db, self.pipeline.busy_timeout())
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            timeout: self.pipeline.invocation_timeout(),
        }
    }
}

fn default_state_db() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("promoter").join("store.db");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("state")
            .join("promoter")
            .join("store.db");
    }
    PathBuf::from(".promoter/store.db")
}

pub fn create_proposal(settings: &Settings, id: Option<String>, title: &str) -> Result<String> {
    let store = settings.open_store()?;
    let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
    store.create_proposal(&id, title)?;
    info!(proposal_id = %id, "proposal created");
    Ok(id)
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub proposal_id: String,
    pub id: Option<String>,
    pub content: String,
    pub author_uid: String,
    pub author_name: Option<String>,
    pub option_proposal: bool,
}

/// Stores a new comment and fires the create trigger for it once.
pub fn add_comment(settings: &Settings, new: NewComment) -> Result<Report> {
    let store = settings.open_store()?;
    let comment = Comment {
        id: new.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        content: Some(new.content),
        author: Some(Author {
            uid: Some(new.author_uid),
            name: new.author_name,
        }),
        is_option_proposal: Some(new.option_proposal),
        processing_status: None,
    };
    if !store.insert_comment(&new.proposal_id, &comment)? {
        bail!(
            "comment {} already exists on proposal {}",
            comment.id,
            new.proposal_id
        );
    }
    let inv = Invocation::new(&new.proposal_id, comment);
    Ok(dispatch::run_invocation(
        &store,
        settings.coordinator_options(),
        settings.ndjson_log.as_deref(),
        &inv,
    ))
}

/// Delivers (or redelivers) a raw trigger event. `payload` of `-` reads stdin.
pub fn deliver(
    settings: &Settings,
    proposal_id: &str,
    comment_id: &str,
    payload: &Path,
) -> Result<Report> {
    let raw = if payload == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read trigger payload from stdin")?;
        buf
    } else {
        std::fs::read_to_string(payload)
            .with_context(|| format!("read trigger payload {}", payload.display()))?
    };
    let comment = parse_payload(&raw, comment_id)?;
    let store = settings.open_store()?;
    store.insert_comment(proposal_id, &comment)?;

    let inv = Invocation::new(proposal_id, comment);
    let report = dispatch::run_invocation(
        &store,
        settings.coordinator_options(),
        settings.ndjson_log.as_deref(),
        &inv,
    );
    if report.needs_redelivery() {
        bail!(
            "delivery of comment {comment_id} must be retried: {}",
            report.reason.as_deref().unwrap_or("transient failure")
        );
    }
    Ok(report)
}

fn parse_payload(raw: &str, comment_id: &str) -> Result<Comment> {
    let mut value: serde_json::Value =
        serde_json::from_str(raw).context("parse trigger payload JSON")?;
    let obj = value
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("trigger payload must be a JSON object"))?;
    match obj.get("id").and_then(|v| v.as_str()) {
        Some(id) if id != comment_id => {
            bail!("payload id `{id}` does not match comment id `{comment_id}`")
        }
        Some(_) => {}
        None => {
            obj.insert("id".to_string(), json!(comment_id));
        }
    }
    serde_json::from_value(value).context("decode trigger payload")
}

/// Manually replays every stored comment under the proposal that never
/// reached a terminal status.
pub fn replay(settings: &Settings, proposal_id: &str, workers: Option<usize>) -> Result<Vec<Report>> {
    let store = settings.open_store()?;
    let invocations = store
        .list_unprocessed_comments(proposal_id)?
        .into_iter()
        .map(|comment| Invocation::new(proposal_id, comment))
        .collect::<Vec<_>>();
    drop(store);
    info!(
        proposal_id,
        pending = invocations.len(),
        "replaying unprocessed comments"
    );
    dispatch::run_batch(
        &settings.state_db,
        settings.pipeline.busy_timeout(),
        settings.coordinator_options(),
        workers.unwrap_or(settings.pipeline.workers),
        settings.ndjson_log.as_deref(),
        &invocations,
    )
}

pub fn vote(settings: &Settings, proposal_id: &str, option_id: &str) -> Result<i64> {
    settings.open_store()?.record_vote(proposal_id, option_id)
}

pub fn inspect(settings: &Settings, proposal_id: &str) -> Result<serde_json::Value> {
    let store = settings.open_store()?;
    let proposal = store
        .get_proposal(proposal_id)
        .with_context(|| format!("load proposal {proposal_id}"))?;
    let comments = store
        .list_comments(proposal_id)?
        .into_iter()
        .map(|c| {
            json!({
                "id": c.id,
                "isOptionProposal": c.is_option_proposal.unwrap_or(false),
                "processingStatus": c.processing_status.map(|s| s.as_str()).unwrap_or("unset")
            })
        })
        .collect::<Vec<_>>();
    let invocations = store.list_invocations(proposal_id)?;
    Ok(json!({
        "proposal": proposal,
        "comments": comments,
        "invocations": invocations
    }))
}
