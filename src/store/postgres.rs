//! PostgreSQL-backed [`Store`]. The schema is owned by the platform's
//! migration tooling; the service only expects these tables:
//!
//! ```sql
//! CREATE TABLE wallets (
//!     address                  TEXT PRIMARY KEY,
//!     balance                  NUMERIC NOT NULL DEFAULT 0,
//!     tier                     TEXT NOT NULL DEFAULT 'base',
//!     parent_wallet            TEXT,
//!     team_size                BIGINT NOT NULL DEFAULT 0,
//!     total_earnings           NUMERIC NOT NULL DEFAULT 0,
//!     distributable_commission NUMERIC NOT NULL DEFAULT 0,
//!     distributed_commission   NUMERIC NOT NULL DEFAULT 0,
//!     withdrawn_total          NUMERIC NOT NULL DEFAULT 0,
//!     created_at               TIMESTAMPTZ NOT NULL
//! );
//! CREATE UNIQUE INDEX wallets_address_ci ON wallets (LOWER(address));
//! CREATE TABLE hierarchy_edges (
//!     wallet        TEXT PRIMARY KEY,
//!     parent_wallet TEXT NOT NULL,
//!     depth         INTEGER NOT NULL
//! );
//! CREATE TABLE commissions (
//!     id               UUID PRIMARY KEY,
//!     beneficiary      TEXT NOT NULL,
//!     source_wallet    TEXT NOT NULL,
//!     amount           NUMERIC NOT NULL,
//!     level            SMALLINT NOT NULL,
//!     transaction_type TEXT NOT NULL,
//!     source_node_id   UUID,
//!     created_at       TIMESTAMPTZ NOT NULL
//! );
//! CREATE TABLE nodes (
//!     id UUID PRIMARY KEY, owner TEXT NOT NULL, node_type TEXT NOT NULL,
//!     status TEXT NOT NULL, purchase_price NUMERIC NOT NULL, tx_hash TEXT,
//!     earnings NUMERIC NOT NULL, created_at TIMESTAMPTZ NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//! CREATE TABLE listings (
//!     id UUID PRIMARY KEY, node_id UUID NOT NULL, seller TEXT NOT NULL,
//!     price NUMERIC NOT NULL, status TEXT NOT NULL, buyer TEXT,
//!     created_at TIMESTAMPTZ NOT NULL, updated_at TIMESTAMPTZ NOT NULL
//! );
//! CREATE TABLE withdrawals (
//!     id UUID PRIMARY KEY, wallet TEXT NOT NULL, amount NUMERIC NOT NULL,
//!     status TEXT NOT NULL, note TEXT, requested_at TIMESTAMPTZ NOT NULL,
//!     processed_at TIMESTAMPTZ
//! );
//! ```
//!
//! Address columns compare through `LOWER()`, so rows written with mixed
//! case by older clients still match.

use std::time::Duration;

use async_trait::async_trait;
use referral_module::{
    forest::{HierarchyEdge, ParentLink},
    MembershipTier, WalletAddress,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use super::{Store, StoreError, TimeWindow};
use crate::ledger::{
    Amount, CommissionRecord, Listing, ListingStatus, Node, Wallet, Withdrawal, WithdrawalStatus,
};

const WALLET_COLUMNS: &str = "address, balance, tier, parent_wallet, team_size, total_earnings, \
     distributable_commission, distributed_commission, withdrawn_total, created_at";
const COMMISSION_COLUMNS: &str =
    "id, beneficiary, source_wallet, amount, level, transaction_type, source_node_id, created_at";
const NODE_COLUMNS: &str =
    "id, owner, node_type, status, purchase_price, tx_hash, earnings, created_at, updated_at";
const LISTING_COLUMNS: &str = "id, node_id, seller, price, status, buyer, created_at, updated_at";
const WITHDRAWAL_COLUMNS: &str = "id, wallet, amount, status, note, requested_at, processed_at";

const BY_ADDRESS: &str = "LOWER(address) = LOWER($1)";

// Payouts draw on distributable commission first, capped at what is left.
const BOOK_PAYOUT: &str = "UPDATE wallets SET withdrawn_total = withdrawn_total + $2, \
     distributed_commission = distributed_commission + LEAST($2, distributable_commission), \
     distributable_commission = distributable_commission - LEAST($2, distributable_commission) \
     WHERE LOWER(address) = LOWER($1)";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }
}

fn wallet_update(assignments: &str) -> String {
    format!("UPDATE wallets SET {assignments} WHERE {BY_ADDRESS}")
}

fn wallet_query<'q>(sql: &'q str, wallet: &'q Wallet) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(sql)
        .bind(&wallet.address)
        .bind(wallet.balance)
        .bind(wallet.tier.as_str())
        .bind(&wallet.parent_wallet)
        .bind(wallet.team_size)
        .bind(wallet.total_earnings)
        .bind(wallet.distributable_commission)
        .bind(wallet.distributed_commission)
        .bind(wallet.withdrawn_total)
        .bind(wallet.created_at)
}

fn edge_from_row(wallet: String, parent: String, depth: i32) -> Result<HierarchyEdge, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        entity: "hierarchy edge",
        reason,
    };
    Ok(HierarchyEdge {
        wallet: WalletAddress::parse(&wallet).map_err(|e| corrupt(e.to_string()))?,
        parent: WalletAddress::parse(&parent).map_err(|e| corrupt(e.to_string()))?,
        depth: u32::try_from(depth).map_err(|e| corrupt(e.to_string()))?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn get_wallet(&self, address: &str) -> Result<Option<Wallet>, StoreError> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE {BY_ADDRESS}");
        Ok(sqlx::query_as::<_, Wallet>(&sql)
            .bind(address)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn insert_wallet(&self, wallet: &Wallet) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO wallets ({WALLET_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT DO NOTHING"
        );
        let result = wallet_query(&sql, wallet).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate {
                entity: "wallet",
                key: wallet.address.clone(),
            });
        }
        Ok(())
    }

    async fn list_wallets(&self) -> Result<Vec<Wallet>, StoreError> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets ORDER BY address");
        Ok(sqlx::query_as::<_, Wallet>(&sql).fetch_all(&self.pool).await?)
    }

    async fn parent_links(&self) -> Result<Vec<ParentLink>, StoreError> {
        let rows: Vec<(String, Option<String>)> =
            sqlx::query_as("SELECT address, parent_wallet FROM wallets ORDER BY address")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(wallet, parent)| ParentLink { wallet, parent })
            .collect())
    }

    async fn set_team_size(&self, address: &str, size: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(&wallet_update("team_size = $2"))
            .bind(address)
            .bind(size)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_parent(&self, address: &str, parent: Option<&str>) -> Result<bool, StoreError> {
        let result = sqlx::query(&wallet_update("parent_wallet = $2"))
            .bind(address)
            .bind(parent)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_tier(&self, address: &str, tier: MembershipTier) -> Result<bool, StoreError> {
        let result = sqlx::query(&wallet_update("tier = $2"))
            .bind(address)
            .bind(tier.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_balance(
        &self,
        address: &str,
        balance: Amount,
        tier: MembershipTier,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(&wallet_update("balance = $2, tier = $3"))
            .bind(address)
            .bind(balance)
            .bind(tier.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn credit_commission(&self, address: &str, amount: Amount) -> Result<bool, StoreError> {
        let sql = wallet_update(
            "total_earnings = total_earnings + $2, \
             distributable_commission = distributable_commission + $2",
        );
        let result = sqlx::query(&sql)
            .bind(address)
            .bind(amount)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn credit_node_income(&self, address: &str, amount: Amount) -> Result<bool, StoreError> {
        let result = sqlx::query(&wallet_update("total_earnings = total_earnings + $2"))
            .bind(address)
            .bind(amount)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn direct_referrals(&self, address: &str) -> Result<Vec<Wallet>, StoreError> {
        let sql = format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE LOWER(parent_wallet) = LOWER($1) ORDER BY address"
        );
        Ok(sqlx::query_as::<_, Wallet>(&sql)
            .bind(address)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn replace_hierarchy_edges(&self, edges: &[HierarchyEdge]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM hierarchy_edges")
            .execute(&mut *tx)
            .await?;
        for edge in edges {
            sqlx::query("INSERT INTO hierarchy_edges (wallet, parent_wallet, depth) VALUES ($1, $2, $3)")
                .bind(edge.wallet.as_str())
                .bind(edge.parent.as_str())
                .bind(i32::try_from(edge.depth).unwrap_or(i32::MAX))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn hierarchy_edges(&self) -> Result<Vec<HierarchyEdge>, StoreError> {
        let rows: Vec<(String, String, i32)> = sqlx::query_as(
            "SELECT wallet, parent_wallet, depth FROM hierarchy_edges ORDER BY depth, wallet",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(wallet, parent, depth)| edge_from_row(wallet, parent, depth))
            .collect()
    }

    async fn append_commission(&self, record: &CommissionRecord) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO commissions ({COMMISSION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        );
        sqlx::query(&sql)
            .bind(record.id)
            .bind(&record.beneficiary)
            .bind(&record.source_wallet)
            .bind(record.amount)
            .bind(record.level)
            .bind(record.transaction_type.as_str())
            .bind(record.source_node_id)
            .bind(record.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn commissions_for(
        &self,
        beneficiary: &str,
        window: TimeWindow,
    ) -> Result<Vec<CommissionRecord>, StoreError> {
        let sql = format!(
            "SELECT {COMMISSION_COLUMNS} FROM commissions WHERE LOWER(beneficiary) = LOWER($1) \
             AND ($2::timestamptz IS NULL OR created_at >= $2) \
             AND ($3::timestamptz IS NULL OR created_at < $3) \
             ORDER BY created_at"
        );
        Ok(sqlx::query_as::<_, CommissionRecord>(&sql)
            .bind(beneficiary)
            .bind(window.from)
            .bind(window.to)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_node(&self, id: Uuid) -> Result<Option<Node>, StoreError> {
        let sql = format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = $1");
        Ok(sqlx::query_as::<_, Node>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn save_node(&self, node: &Node) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO nodes ({NODE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (id) DO UPDATE SET owner = EXCLUDED.owner, status = EXCLUDED.status, \
             earnings = EXCLUDED.earnings, updated_at = EXCLUDED.updated_at"
        );
        sqlx::query(&sql)
            .bind(node.id)
            .bind(&node.owner)
            .bind(node.node_type.as_str())
            .bind(node.status.as_str())
            .bind(node.purchase_price)
            .bind(&node.tx_hash)
            .bind(node.earnings)
            .bind(node.created_at)
            .bind(node.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_nodes(&self, owner: Option<&str>) -> Result<Vec<Node>, StoreError> {
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE ($1::text IS NULL OR LOWER(owner) = LOWER($1)) \
             ORDER BY created_at, id"
        );
        Ok(sqlx::query_as::<_, Node>(&sql)
            .bind(owner)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_listing(&self, id: Uuid) -> Result<Option<Listing>, StoreError> {
        let sql = format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1");
        Ok(sqlx::query_as::<_, Listing>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn save_listing(&self, listing: &Listing) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO listings ({LISTING_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, buyer = EXCLUDED.buyer, \
             updated_at = EXCLUDED.updated_at"
        );
        sqlx::query(&sql)
            .bind(listing.id)
            .bind(listing.node_id)
            .bind(&listing.seller)
            .bind(listing.price)
            .bind(listing.status.as_str())
            .bind(&listing.buyer)
            .bind(listing.created_at)
            .bind(listing.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_listings(&self, status: Option<ListingStatus>) -> Result<Vec<Listing>, StoreError> {
        let sql = format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY created_at, id"
        );
        Ok(sqlx::query_as::<_, Listing>(&sql)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_withdrawal(&self, id: Uuid) -> Result<Option<Withdrawal>, StoreError> {
        let sql = format!("SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE id = $1");
        Ok(sqlx::query_as::<_, Withdrawal>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn save_withdrawal(&self, withdrawal: &Withdrawal) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO withdrawals ({WITHDRAWAL_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, note = EXCLUDED.note, \
             processed_at = EXCLUDED.processed_at"
        );
        sqlx::query(&sql)
            .bind(withdrawal.id)
            .bind(&withdrawal.wallet)
            .bind(withdrawal.amount)
            .bind(withdrawal.status.as_str())
            .bind(&withdrawal.note)
            .bind(withdrawal.requested_at)
            .bind(withdrawal.processed_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn settle_withdrawal(&self, withdrawal: &Withdrawal) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let settled = sqlx::query(
            "UPDATE withdrawals SET status = $2, note = $3, processed_at = $4 \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(withdrawal.id)
        .bind(withdrawal.status.as_str())
        .bind(&withdrawal.note)
        .bind(withdrawal.processed_at)
        .execute(&mut *tx)
        .await?;
        if settled.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        if withdrawal.status == WithdrawalStatus::Approved {
            sqlx::query(BOOK_PAYOUT)
                .bind(&withdrawal.wallet)
                .bind(withdrawal.amount)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn list_withdrawals(
        &self,
        wallet: Option<&str>,
        status: Option<WithdrawalStatus>,
    ) -> Result<Vec<Withdrawal>, StoreError> {
        let sql = format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals \
             WHERE ($1::text IS NULL OR LOWER(wallet) = LOWER($1)) AND ($2::text IS NULL OR status = $2) \
             ORDER BY requested_at, id"
        );
        Ok(sqlx::query_as::<_, Withdrawal>(&sql)
            .bind(wallet)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?)
    }
}
