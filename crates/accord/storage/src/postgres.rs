//! PostgreSQL adapter for negotiation storage.
//!
//! This adapter is the transactional source of truth. `lock_item` takes a
//! row lock with `SELECT ... FOR UPDATE`, and a partial unique index allows
//! at most one pending proposal per item.

use crate::traits::{
    ItemStore, NegotiationStore, NegotiationTx, OwnershipStore, ProposalStore, QueryWindow,
};
use crate::{StorageError, StorageResult};
use accord_types::{
    Decimal, Item, ItemId, OwnerSet, OwnershipRecord, PartyId, PaymentRatio, PaymentType, Proposal,
    ProposalId, ProposalStatus, RatioResponse, ShareStatus, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::collections::HashMap;

/// PostgreSQL-backed negotiation store.
#[derive(Clone)]
pub struct PostgresNegotiationStore {
    pool: PgPool,
}

impl PostgresNegotiationStore {
    /// Connect to PostgreSQL and initialize required schema.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect postgres: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS accord_items (
                item_id TEXT PRIMARY KEY,
                seq BIGSERIAL NOT NULL,
                name TEXT NOT NULL,
                share_status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS accord_ownerships (
                item_id TEXT NOT NULL REFERENCES accord_items (item_id),
                party_id TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (item_id, party_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS accord_proposals (
                proposal_id TEXT PRIMARY KEY,
                seq BIGSERIAL NOT NULL,
                item_id TEXT NOT NULL REFERENCES accord_items (item_id),
                author_id TEXT NOT NULL,
                author_party TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                comment TEXT,
                status TEXT NOT NULL,
                counter_to TEXT
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS accord_proposals_one_pending
                ON accord_proposals (item_id) WHERE status = 'pending'
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS accord_payment_ratios (
                proposal_id TEXT NOT NULL REFERENCES accord_proposals (proposal_id) ON DELETE CASCADE,
                party_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                payment_type TEXT NOT NULL,
                amount NUMERIC NOT NULL,
                response TEXT NOT NULL,
                responded_by TEXT,
                PRIMARY KEY (proposal_id, party_id)
            )
            "#,
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl NegotiationStore for PostgresNegotiationStore {
    async fn begin(&self) -> StorageResult<Box<dyn NegotiationTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(Box::new(PostgresTx { tx }))
    }
}

/// Transaction over [`PostgresNegotiationStore`]. Rolled back on drop.
pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

impl PostgresTx {
    async fn load_ratios(
        &mut self,
        proposal_ids: Vec<String>,
    ) -> StorageResult<HashMap<String, Vec<PaymentRatio>>> {
        let rows = sqlx::query(
            r#"
            SELECT proposal_id, party_id, payment_type, amount, response, responded_by
              FROM accord_payment_ratios
             WHERE proposal_id = ANY($1)
             ORDER BY proposal_id, position
            "#,
        )
        .bind(proposal_ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        let mut grouped: HashMap<String, Vec<PaymentRatio>> = HashMap::new();
        for row in rows {
            let proposal_id: String = row
                .try_get("proposal_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            grouped
                .entry(proposal_id)
                .or_default()
                .push(ratio_row_to_ratio(&row)?);
        }
        Ok(grouped)
    }

    async fn hydrate(&mut self, rows: Vec<PgRow>) -> StorageResult<Vec<Proposal>> {
        let mut proposals = rows
            .iter()
            .map(proposal_row_to_proposal)
            .collect::<StorageResult<Vec<_>>>()?;
        let ids = proposals.iter().map(|p| p.id.0.clone()).collect::<Vec<_>>();
        let mut ratios = self.load_ratios(ids).await?;
        for proposal in proposals.iter_mut() {
            proposal.ratios = ratios.remove(proposal.id.as_str()).unwrap_or_default();
        }
        Ok(proposals)
    }
}

#[async_trait]
impl NegotiationTx for PostgresTx {
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    }
}

#[async_trait]
impl ItemStore for PostgresTx {
    async fn insert_item(&mut self, item: &Item) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accord_items (item_id, name, share_status, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(item.id.0.clone())
        .bind(item.name.clone())
        .bind(share_status_to_str(item.share_status))
        .bind(item.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_item(&mut self, item_id: &ItemId) -> StorageResult<Option<Item>> {
        let row = sqlx::query(
            "SELECT item_id, name, share_status, created_at FROM accord_items WHERE item_id = $1",
        )
        .bind(item_id.0.clone())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        row.as_ref().map(item_row_to_item).transpose()
    }

    async fn lock_item(&mut self, item_id: &ItemId) -> StorageResult<Option<Item>> {
        let row = sqlx::query(
            r#"
            SELECT item_id, name, share_status, created_at
              FROM accord_items
             WHERE item_id = $1
               FOR UPDATE
            "#,
        )
        .bind(item_id.0.clone())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        row.as_ref().map(item_row_to_item).transpose()
    }

    async fn set_share_status(
        &mut self,
        item_id: &ItemId,
        status: ShareStatus,
    ) -> StorageResult<()> {
        let result = sqlx::query("UPDATE accord_items SET share_status = $1 WHERE item_id = $2")
            .bind(share_status_to_str(status))
            .bind(item_id.0.clone())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("item {item_id} not found")));
        }
        Ok(())
    }

    async fn list_items(&mut self, window: QueryWindow) -> StorageResult<Vec<Item>> {
        let rows = if window.limit == 0 {
            sqlx::query(
                r#"
                SELECT item_id, name, share_status, created_at
                  FROM accord_items
                 ORDER BY seq ASC
                OFFSET $1
                "#,
            )
            .bind(to_i64(window.offset)?)
            .fetch_all(&mut *self.tx)
            .await
        } else {
            sqlx::query(
                r#"
                SELECT item_id, name, share_status, created_at
                  FROM accord_items
                 ORDER BY seq ASC
                 LIMIT $1 OFFSET $2
                "#,
            )
            .bind(to_i64(window.limit)?)
            .bind(to_i64(window.offset)?)
            .fetch_all(&mut *self.tx)
            .await
        }
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.iter().map(item_row_to_item).collect()
    }
}

#[async_trait]
impl OwnershipStore for PostgresTx {
    async fn list_owners(&mut self, item_id: &ItemId) -> StorageResult<OwnerSet> {
        let rows = sqlx::query("SELECT party_id FROM accord_ownerships WHERE item_id = $1")
            .bind(item_id.0.clone())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("party_id")
                    .map(PartyId::new)
                    .map_err(|e| StorageError::Backend(e.to_string()))
            })
            .collect()
    }

    async fn get_ownership(
        &mut self,
        item_id: &ItemId,
        party_id: &PartyId,
    ) -> StorageResult<Option<OwnershipRecord>> {
        let row = sqlx::query(
            r#"
            SELECT created_at FROM accord_ownerships
             WHERE item_id = $1 AND party_id = $2
            "#,
        )
        .bind(item_id.0.clone())
        .bind(party_id.0.clone())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(|row| {
            let created_at: DateTime<Utc> = row
                .try_get("created_at")
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok(OwnershipRecord {
                item_id: item_id.clone(),
                party_id: party_id.clone(),
                created_at,
            })
        })
        .transpose()
    }

    async fn insert_ownership(&mut self, record: &OwnershipRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accord_ownerships (item_id, party_id, created_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(record.item_id.0.clone())
        .bind(record.party_id.0.clone())
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn delete_ownership(
        &mut self,
        item_id: &ItemId,
        party_id: &PartyId,
    ) -> StorageResult<bool> {
        let result =
            sqlx::query("DELETE FROM accord_ownerships WHERE item_id = $1 AND party_id = $2")
                .bind(item_id.0.clone())
                .bind(party_id.0.clone())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ProposalStore for PostgresTx {
    async fn insert_proposal(&mut self, proposal: &Proposal) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accord_proposals
                (proposal_id, item_id, author_id, author_party, created_at, comment, status, counter_to)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(proposal.id.0.clone())
        .bind(proposal.item_id.0.clone())
        .bind(proposal.author_id.0.clone())
        .bind(proposal.author_party.0.clone())
        .bind(proposal.created_at)
        .bind(proposal.comment.clone())
        .bind(proposal_status_to_str(proposal.status))
        .bind(proposal.counter_to.as_ref().map(|id| id.0.clone()))
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        for (position, ratio) in proposal.ratios.iter().enumerate() {
            let position = i32::try_from(position)
                .map_err(|_| StorageError::InvalidInput("too many payment ratios".to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO accord_payment_ratios
                    (proposal_id, party_id, position, payment_type, amount, response, responded_by)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(proposal.id.0.clone())
            .bind(ratio.party_id.0.clone())
            .bind(position)
            .bind(payment_type_to_str(ratio.payment_type))
            .bind(ratio.amount)
            .bind(ratio_response_to_str(ratio.response))
            .bind(ratio.responded_by.as_ref().map(|id| id.0.clone()))
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        }
        Ok(())
    }

    async fn get_proposal(&mut self, proposal_id: &ProposalId) -> StorageResult<Option<Proposal>> {
        let row = sqlx::query(
            r#"
            SELECT proposal_id, item_id, author_id, author_party, created_at, comment, status, counter_to
              FROM accord_proposals
             WHERE proposal_id = $1
            "#,
        )
        .bind(proposal_id.0.clone())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_proposals_for_item(&mut self, item_id: &ItemId) -> StorageResult<Vec<Proposal>> {
        let rows = sqlx::query(
            r#"
            SELECT proposal_id, item_id, author_id, author_party, created_at, comment, status, counter_to
              FROM accord_proposals
             WHERE item_id = $1
             ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(item_id.0.clone())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        self.hydrate(rows).await
    }

    async fn transition_status(
        &mut self,
        proposal_id: &ProposalId,
        expected_from: ProposalStatus,
        to: ProposalStatus,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE accord_proposals
               SET status = $1
             WHERE proposal_id = $2 AND status = $3
            "#,
        )
        .bind(proposal_status_to_str(to))
        .bind(proposal_id.0.clone())
        .bind(proposal_status_to_str(expected_from))
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            let current = sqlx::query("SELECT status FROM accord_proposals WHERE proposal_id = $1")
                .bind(proposal_id.0.clone())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            return Err(match current {
                Some(row) => {
                    let raw: String = row
                        .try_get("status")
                        .map_err(|e| StorageError::Backend(e.to_string()))?;
                    StorageError::StatusMismatch {
                        proposal_id: proposal_id.clone(),
                        expected: expected_from,
                        found: parse_proposal_status(&raw)?,
                    }
                }
                None => StorageError::NotFound(format!("proposal {proposal_id} not found")),
            });
        }
        Ok(())
    }

    async fn set_ratio_response(
        &mut self,
        proposal_id: &ProposalId,
        party_id: &PartyId,
        response: RatioResponse,
        responder: &UserId,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE accord_payment_ratios
               SET response = $1, responded_by = $2
             WHERE proposal_id = $3 AND party_id = $4
            "#,
        )
        .bind(ratio_response_to_str(response))
        .bind(responder.0.clone())
        .bind(proposal_id.0.clone())
        .bind(party_id.0.clone())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "proposal {proposal_id} has no ratio for party {party_id}"
            )));
        }
        Ok(())
    }

    async fn delete_proposal(&mut self, proposal_id: &ProposalId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM accord_proposals WHERE proposal_id = $1")
            .bind(proposal_id.0.clone())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_proposals(&mut self, window: QueryWindow) -> StorageResult<Vec<Proposal>> {
        let rows = if window.limit == 0 {
            sqlx::query(
                r#"
                SELECT proposal_id, item_id, author_id, author_party, created_at, comment, status, counter_to
                  FROM accord_proposals
                 ORDER BY created_at DESC, seq DESC
                OFFSET $1
                "#,
            )
            .bind(to_i64(window.offset)?)
            .fetch_all(&mut *self.tx)
            .await
        } else {
            sqlx::query(
                r#"
                SELECT proposal_id, item_id, author_id, author_party, created_at, comment, status, counter_to
                  FROM accord_proposals
                 ORDER BY created_at DESC, seq DESC
                 LIMIT $1 OFFSET $2
                "#,
            )
            .bind(to_i64(window.limit)?)
            .bind(to_i64(window.offset)?)
            .fetch_all(&mut *self.tx)
            .await
        }
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        self.hydrate(rows).await
    }
}

fn item_row_to_item(row: &PgRow) -> StorageResult<Item> {
    let share_status: String = row
        .try_get("share_status")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    Ok(Item {
        id: ItemId::new(
            row.try_get::<String, _>("item_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        name: row
            .try_get("name")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        share_status: parse_share_status(&share_status)?,
    })
}

fn proposal_row_to_proposal(row: &PgRow) -> StorageResult<Proposal> {
    let status: String = row
        .try_get("status")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let counter_to: Option<String> = row
        .try_get("counter_to")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    Ok(Proposal {
        id: ProposalId::new(
            row.try_get::<String, _>("proposal_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        item_id: ItemId::new(
            row.try_get::<String, _>("item_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        author_id: UserId::new(
            row.try_get::<String, _>("author_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        author_party: PartyId::new(
            row.try_get::<String, _>("author_party")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        created_at: row
            .try_get("created_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        comment: row
            .try_get("comment")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        status: parse_proposal_status(&status)?,
        counter_to: counter_to.map(ProposalId::new),
        ratios: Vec::new(),
    })
}

fn ratio_row_to_ratio(row: &PgRow) -> StorageResult<PaymentRatio> {
    let payment_type: String = row
        .try_get("payment_type")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let response: String = row
        .try_get("response")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let amount: Decimal = row
        .try_get("amount")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let responded_by: Option<String> = row
        .try_get("responded_by")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    Ok(PaymentRatio {
        party_id: PartyId::new(
            row.try_get::<String, _>("party_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        payment_type: parse_payment_type(&payment_type)?,
        amount,
        response: parse_ratio_response(&response)?,
        responded_by: responded_by.map(UserId::new),
    })
}

fn share_status_to_str(status: ShareStatus) -> &'static str {
    match status {
        ShareStatus::NotShared => "not_shared",
        ShareStatus::Shared => "shared",
    }
}

fn parse_share_status(raw: &str) -> StorageResult<ShareStatus> {
    match raw {
        "not_shared" => Ok(ShareStatus::NotShared),
        "shared" => Ok(ShareStatus::Shared),
        _ => Err(StorageError::CorruptRow(format!(
            "unknown share status `{raw}`"
        ))),
    }
}

fn proposal_status_to_str(status: ProposalStatus) -> &'static str {
    match status {
        ProposalStatus::Pending => "pending",
        ProposalStatus::Accepted => "accepted",
        ProposalStatus::Rejected => "rejected",
    }
}

fn parse_proposal_status(raw: &str) -> StorageResult<ProposalStatus> {
    match raw {
        "pending" => Ok(ProposalStatus::Pending),
        "accepted" => Ok(ProposalStatus::Accepted),
        "rejected" => Ok(ProposalStatus::Rejected),
        _ => Err(StorageError::CorruptRow(format!(
            "unknown proposal status `{raw}`"
        ))),
    }
}

fn ratio_response_to_str(response: RatioResponse) -> &'static str {
    match response {
        RatioResponse::Pending => "pending",
        RatioResponse::Accepted => "accepted",
        RatioResponse::Rejected => "rejected",
    }
}

fn parse_ratio_response(raw: &str) -> StorageResult<RatioResponse> {
    match raw {
        "pending" => Ok(RatioResponse::Pending),
        "accepted" => Ok(RatioResponse::Accepted),
        "rejected" => Ok(RatioResponse::Rejected),
        _ => Err(StorageError::CorruptRow(format!(
            "unknown ratio response `{raw}`"
        ))),
    }
}

fn payment_type_to_str(payment_type: PaymentType) -> &'static str {
    match payment_type {
        PaymentType::Percentage => "percentage",
        PaymentType::Fixed => "fixed",
    }
}

fn parse_payment_type(raw: &str) -> StorageResult<PaymentType> {
    match raw {
        "percentage" => Ok(PaymentType::Percentage),
        "fixed" => Ok(PaymentType::Fixed),
        _ => Err(StorageError::CorruptRow(format!(
            "unknown payment type `{raw}`"
        ))),
    }
}

/// Unique violations become `Conflict`, foreign-key violations `NotFound`.
fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some("23505") => return StorageError::Conflict(db_err.message().to_string()),
            Some("23503") => return StorageError::NotFound(db_err.message().to_string()),
            _ => {}
        }
    }
    StorageError::Backend(err.to_string())
}

fn to_i64(value: usize) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::InvalidInput("window value too large".to_string()))
}
