//! The `persistence` module contains the optional [PersistenceSink] the watcher writes observed
//! edges and assertions to, for consumption by an external read API. Writes are best effort:
//! a failed write is logged and never affects the challenge.

use crate::chain::AssertionCreationInfo;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bold_challenger_solvers::bold::Edge;
use parking_lot::Mutex;
use postgres::{Client, GenericClient, NoTls};
use std::sync::Arc;

/// A flat row describing an edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRecord {
    pub id: String,
    pub level: i16,
    pub origin_id: String,
    pub mutual_id: String,
    pub claim_id: Option<String>,
    pub start_height: i64,
    pub start_root: String,
    pub end_height: i64,
    pub end_root: String,
    pub created_at_block: i64,
    pub status: String,
    pub assertion_hash: String,
    pub is_royal: bool,
}

impl EdgeRecord {
    /// Flattens an edge snapshot.
    pub fn from_edge(edge: &Edge, is_royal: bool) -> Self {
        Self {
            id: edge.id.to_string(),
            level: edge.level.0 as i16,
            origin_id: edge.origin_id.to_string(),
            mutual_id: edge.mutual_id.to_string(),
            claim_id: edge.claim_id.map(|c| c.to_string()),
            start_height: edge.start_height as i64,
            start_root: format!("{:#x}", edge.start_root),
            end_height: edge.end_height as i64,
            end_root: format!("{:#x}", edge.end_root),
            created_at_block: edge.created_at_block as i64,
            status: edge.status.to_string(),
            assertion_hash: edge.assertion_hash.to_string(),
            is_royal,
        }
    }
}

/// A flat row describing an assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionRecord {
    pub hash: String,
    pub parent_hash: String,
    pub inbox_max_count: i64,
    pub creation_parent_block: i64,
    pub confirm_period_blocks: i64,
    pub after_batch: i64,
}

impl From<&AssertionCreationInfo> for AssertionRecord {
    fn from(info: &AssertionCreationInfo) -> Self {
        Self {
            hash: info.assertion_hash.to_string(),
            parent_hash: info.parent_assertion_hash.to_string(),
            inbox_max_count: info.inbox_max_count as i64,
            creation_parent_block: info.creation_parent_block as i64,
            confirm_period_blocks: info.confirm_period_blocks as i64,
            after_batch: info.after_state.global_state.batch as i64,
        }
    }
}

/// A write-only store for challenge data.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn insert_edge(&self, edge: EdgeRecord) -> Result<()>;

    /// Upserts a batch of edges, e.g. after their status changed.
    async fn update_edges(&self, edges: Vec<EdgeRecord>) -> Result<()>;

    async fn insert_assertion(&self, assertion: AssertionRecord) -> Result<()>;
}

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS edges (
    id TEXT PRIMARY KEY,
    level SMALLINT NOT NULL,
    origin_id TEXT NOT NULL,
    mutual_id TEXT NOT NULL,
    claim_id TEXT,
    start_height BIGINT NOT NULL,
    start_root TEXT NOT NULL,
    end_height BIGINT NOT NULL,
    end_root TEXT NOT NULL,
    created_at_block BIGINT NOT NULL,
    status TEXT NOT NULL,
    assertion_hash TEXT NOT NULL,
    is_royal BOOLEAN NOT NULL
);
CREATE TABLE IF NOT EXISTS assertions (
    hash TEXT PRIMARY KEY,
    parent_hash TEXT NOT NULL,
    inbox_max_count BIGINT NOT NULL,
    creation_parent_block BIGINT NOT NULL,
    confirm_period_blocks BIGINT NOT NULL,
    after_batch BIGINT NOT NULL
);";

const UPSERT_EDGE: &str = "INSERT INTO edges (\
    id, level, origin_id, mutual_id, claim_id, start_height, start_root,\
    end_height, end_root, created_at_block, status, assertion_hash, is_royal)\
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)\
    ON CONFLICT (id)\
    DO UPDATE SET status = EXCLUDED.status, is_royal = EXCLUDED.is_royal";

const UPSERT_ASSERTION: &str = "INSERT INTO assertions (\
    hash, parent_hash, inbox_max_count, creation_parent_block, confirm_period_blocks, after_batch)\
    VALUES ($1, $2, $3, $4, $5, $6)\
    ON CONFLICT (hash) DO NOTHING";

/// The [PostgresSink] writes to a Postgres database through the blocking `postgres` client,
/// always off the async runtime.
#[derive(Clone)]
pub struct PostgresSink {
    client: Arc<Mutex<Client>>,
}

impl std::fmt::Debug for PostgresSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSink").finish_non_exhaustive()
    }
}

impl PostgresSink {
    /// Connects to `connection_string` and creates the tables if they do not exist.
    pub async fn connect(connection_string: String) -> Result<Self> {
        let client = tokio::task::spawn_blocking(move || -> Result<Client> {
            let mut client = Client::connect(&connection_string, NoTls)?;
            client.batch_execute(CREATE_TABLES)?;
            Ok(client)
        })
        .await
        .map_err(|e| anyhow!("postgres connect task failed: {}", e))??;
        tracing::info!(target: "persistence", "Connected to postgres persistence sink");
        Ok(Self {
            client: Arc::new(Mutex::new(client)),
        })
    }

    async fn with_client<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Client) -> Result<()> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || f(&mut client.lock()))
            .await
            .map_err(|e| anyhow!("postgres task failed: {}", e))?
    }
}

fn upsert_edge<C: GenericClient>(client: &mut C, edge: &EdgeRecord) -> Result<()> {
    client.execute(
        UPSERT_EDGE,
        &[
            &edge.id,
            &edge.level,
            &edge.origin_id,
            &edge.mutual_id,
            &edge.claim_id,
            &edge.start_height,
            &edge.start_root,
            &edge.end_height,
            &edge.end_root,
            &edge.created_at_block,
            &edge.status,
            &edge.assertion_hash,
            &edge.is_royal,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl PersistenceSink for PostgresSink {
    async fn insert_edge(&self, edge: EdgeRecord) -> Result<()> {
        self.with_client(move |client| upsert_edge(client, &edge))
            .await
    }

    async fn update_edges(&self, edges: Vec<EdgeRecord>) -> Result<()> {
        self.with_client(move |client| {
            let mut tx = client.transaction()?;
            for edge in &edges {
                upsert_edge(&mut tx, edge)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn insert_assertion(&self, assertion: AssertionRecord) -> Result<()> {
        self.with_client(move |client| {
            client.execute(
                UPSERT_ASSERTION,
                &[
                    &assertion.hash,
                    &assertion.parent_hash,
                    &assertion.inbox_max_count,
                    &assertion.creation_parent_block,
                    &assertion.confirm_period_blocks,
                    &assertion.after_batch,
                ],
            )?;
            Ok(())
        })
        .await
    }
}
