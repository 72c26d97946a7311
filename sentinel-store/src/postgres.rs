//! A Postgres-backed [`Persistence`] implementation, via `sqlx` (grounded on
//! `examples/other_examples/manifests/estuary-flow`'s `sqlx` dependency — the
//! teacher workspace has no relational-database client of its own).

use std::net::SocketAddr;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sentinel_chain::{extract_address, Block, Transaction};
use sqlx::{PgPool, Row};

use crate::error::StoreError;
use crate::persistence::Persistence;
use crate::types::{
    ConflictOutcome, GeoInfo, MetricTotals, Observation, ObservationOutcome, PeerVersionInfo, PropagationEvent,
};

/// A connected Postgres pool, with `migrations/` applied. Cheap to clone —
/// `PgPool` is itself a handle around a shared connection pool.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects to `database_url` and applies pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(StoreError::from)?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(PostgresStore { pool })
    }

    /// Closes the pool. Called during shutdown (§4.8).
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_lossy_decimal(value: f64) -> Decimal {
    Decimal::from_str(&format!("{value:.6}")).unwrap_or(Decimal::ZERO)
}

#[async_trait]
impl Persistence for PostgresStore {
    async fn record_peer_connection(
        &self,
        endpoint: SocketAddr,
        version: &PeerVersionInfo,
    ) -> Result<(), StoreError> {
        let address = endpoint.to_string();
        sqlx::query(
            r#"
            INSERT INTO peers (address, protocol_version, services, user_agent, first_seen, last_seen, connection_count)
            VALUES ($1, $2, $3, $4, now(), now(), 1)
            ON CONFLICT (address) DO UPDATE SET
                protocol_version = EXCLUDED.protocol_version,
                services = EXCLUDED.services,
                user_agent = EXCLUDED.user_agent,
                last_seen = now(),
                connection_count = peers.connection_count + 1
            "#,
        )
        .bind(address)
        .bind(version.protocol_version)
        .bind(version.services.bits() as i64)
        .bind(&version.user_agent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_peer_geo_info(&self, endpoint: SocketAddr, geo: &GeoInfo) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE peers SET
                country_code = $2,
                city = $3,
                latitude = $4,
                longitude = $5,
                asn = $6,
                organization = $7
            WHERE address = $1
            "#,
        )
        .bind(endpoint.to_string())
        .bind(&geo.country_code)
        .bind(&geo.city)
        .bind(to_lossy_decimal(geo.latitude))
        .bind(to_lossy_decimal(geo.longitude))
        .bind(geo.asn.map(|v| v as i64))
        .bind(&geo.organization)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_peer_announcements(
        &self,
        endpoint: SocketAddr,
        delta_tx: i64,
        delta_block: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE peers SET
                tx_announcements = tx_announcements + $2,
                block_announcements = block_announcements + $3,
                last_seen = now()
            WHERE address = $1
            "#,
        )
        .bind(endpoint.to_string())
        .bind(delta_tx)
        .bind(delta_block)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_peer_latency(&self, endpoint: SocketAddr, latency_ms: f64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE peers SET
                latency_ms = CASE WHEN latency_ms IS NULL THEN $2 ELSE (latency_ms + $2) / 2.0 END
            WHERE address = $1
            "#,
        )
        .bind(endpoint.to_string())
        .bind(latency_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_observation(
        &self,
        tx_hash: [u8; 32],
        peer: SocketAddr,
    ) -> Result<ObservationOutcome, StoreError> {
        let mut txn = self.pool.begin().await?;
        let peer_str = peer.to_string();

        let existing = sqlx::query("SELECT first_seen FROM observations WHERE tx_hash = $1 FOR UPDATE")
            .bind(tx_hash.as_slice())
            .fetch_optional(&mut *txn)
            .await?;

        let (first_seen, newly_created) = match existing {
            Some(row) => (row.try_get::<DateTime<Utc>, _>("first_seen")?, false),
            None => {
                let now = Utc::now();
                sqlx::query(
                    r#"
                    INSERT INTO observations (tx_hash, first_seen, first_peer, peer_count)
                    VALUES ($1, $2, $3, 1)
                    "#,
                )
                .bind(tx_hash.as_slice())
                .bind(now)
                .bind(&peer_str)
                .execute(&mut *txn)
                .await?;
                (now, true)
            }
        };

        if !newly_created {
            sqlx::query("UPDATE observations SET peer_count = peer_count + 1 WHERE tx_hash = $1")
                .bind(tx_hash.as_slice())
                .execute(&mut *txn)
                .await?;
        }

        let announced_at = Utc::now();
        let delay_from_first_ms = if newly_created {
            0
        } else {
            (announced_at - first_seen).num_milliseconds().max(0)
        };

        sqlx::query(
            r#"
            INSERT INTO propagation_events (tx_hash, peer, announced_at, delay_from_first_ms)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(tx_hash.as_slice())
        .bind(&peer_str)
        .bind(announced_at)
        .bind(delay_from_first_ms)
        .execute(&mut *txn)
        .await?;

        txn.commit().await?;

        Ok(ObservationOutcome {
            propagation_event: PropagationEvent {
                tx_hash,
                peer,
                announced_at,
                delay_from_first_ms,
            },
            newly_created,
        })
    }

    async fn record_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        let mut txn = self.pool.begin().await?;

        let already_present = sqlx::query("SELECT 1 FROM transactions WHERE tx_hash = $1")
            .bind(tx.txid.as_slice())
            .fetch_optional(&mut *txn)
            .await?
            .is_some();
        if already_present {
            txn.commit().await?;
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO transactions (tx_hash, version, lock_time, witness_present, fee)
            VALUES ($1, $2, $3, $4, NULL)
            ON CONFLICT (tx_hash) DO NOTHING
            "#,
        )
        .bind(tx.txid.as_slice())
        .bind(tx.version)
        .bind(tx.lock_time as i64)
        .bind(tx.witness_present)
        .execute(&mut *txn)
        .await?;

        let mut total_input_value: i64 = 0;
        let mut all_inputs_resolved = true;
        for (index, input) in tx.inputs.iter().enumerate() {
            let resolved_value = sqlx::query(
                "SELECT value FROM tx_outputs WHERE tx_hash = $1 AND output_index = $2",
            )
            .bind(input.previous_output.hash.as_slice())
            .bind(input.previous_output.index as i32)
            .fetch_optional(&mut *txn)
            .await?
            .map(|row| row.get::<i64, _>("value"));

            match resolved_value {
                Some(value) => total_input_value += value,
                None => all_inputs_resolved = false,
            }

            sqlx::query(
                r#"
                UPDATE tx_outputs SET spent_by = $3
                WHERE tx_hash = $1 AND output_index = $2 AND spent_by IS NULL
                "#,
            )
            .bind(input.previous_output.hash.as_slice())
            .bind(input.previous_output.index as i32)
            .bind(tx.txid.as_slice())
            .execute(&mut *txn)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO tx_inputs (tx_hash, input_index, previous_tx_hash, previous_output_index, sequence)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(tx.txid.as_slice())
            .bind(index as i32)
            .bind(input.previous_output.hash.as_slice())
            .bind(input.previous_output.index as i64)
            .bind(input.sequence as i64)
            .execute(&mut *txn)
            .await?;
        }

        let mut total_output_value: i64 = 0;
        for (index, output) in tx.outputs.iter().enumerate() {
            total_output_value += output.value;
            sqlx::query(
                r#"
                INSERT INTO tx_outputs (tx_hash, output_index, value, address)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (tx_hash, output_index) DO NOTHING
                "#,
            )
            .bind(tx.txid.as_slice())
            .bind(index as i32)
            .bind(output.value)
            .bind(extract_address(&output.script_pubkey))
            .execute(&mut *txn)
            .await?;
        }

        let fee = all_inputs_resolved.then_some(total_input_value - total_output_value);

        sqlx::query("UPDATE transactions SET fee = $2 WHERE tx_hash = $1")
            .bind(tx.txid.as_slice())
            .bind(fee)
            .execute(&mut *txn)
            .await?;

        txn.commit().await?;
        Ok(())
    }

    async fn record_block(&self, block: &Block, peer: SocketAddr) -> Result<(), StoreError> {
        let header_timestamp = DateTime::from_timestamp(block.header.timestamp as i64, 0)
            .unwrap_or_else(Utc::now);
        sqlx::query(
            r#"
            INSERT INTO blocks (
                block_hash, version, previous_block_hash, merkle_root, header_timestamp,
                bits, nonce, height, difficulty, first_seen, first_peer
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now(), $10)
            ON CONFLICT (block_hash) DO NOTHING
            "#,
        )
        .bind(block.hash.as_slice())
        .bind(block.header.version)
        .bind(block.header.previous_block_hash.as_slice())
        .bind(block.header.merkle_root.as_slice())
        .bind(header_timestamp)
        .bind(block.header.bits as i64)
        .bind(block.header.nonce as i64)
        .bind(block.height as i64)
        .bind(to_lossy_decimal(block.header.difficulty()))
        .bind(peer.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn confirm_transactions(
        &self,
        block_hash: [u8; 32],
        height: u32,
        block_time: DateTime<Utc>,
        tx_hashes: &[[u8; 32]],
    ) -> Result<(), StoreError> {
        let mut txn = self.pool.begin().await?;
        for hash in tx_hashes {
            sqlx::query(
                r#"
                UPDATE transactions SET block_hash = $2, height = $3
                WHERE tx_hash = $1 AND block_hash IS NULL
                "#,
            )
            .bind(hash.as_slice())
            .bind(block_hash.as_slice())
            .bind(height as i64)
            .execute(&mut *txn)
            .await?;

            sqlx::query(
                r#"
                UPDATE observations SET confirming_block_hash = $2, confirmed_at = $3
                WHERE tx_hash = $1 AND confirming_block_hash IS NULL
                "#,
            )
            .bind(hash.as_slice())
            .bind(block_hash.as_slice())
            .bind(block_time)
            .execute(&mut *txn)
            .await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn detect_input_conflicts(&self, tx: &Transaction) -> Result<ConflictOutcome, StoreError> {
        let mut txn = self.pool.begin().await?;

        let mut conflicting = std::collections::HashSet::new();
        for input in &tx.inputs {
            if input.previous_output.is_coinbase() {
                continue;
            }
            let rows = sqlx::query(
                r#"
                SELECT DISTINCT i.tx_hash FROM tx_inputs i
                JOIN transactions t ON t.tx_hash = i.tx_hash
                WHERE i.previous_tx_hash = $1
                  AND i.previous_output_index = $2
                  AND t.block_hash IS NULL
                  AND i.tx_hash != $3
                "#,
            )
            .bind(input.previous_output.hash.as_slice())
            .bind(input.previous_output.index as i64)
            .bind(tx.txid.as_slice())
            .fetch_all(&mut *txn)
            .await?;

            for row in rows {
                let hash: Vec<u8> = row.get("tx_hash");
                let mut array = [0u8; 32];
                array.copy_from_slice(&hash);
                conflicting.insert(array);
            }
        }

        if !conflicting.is_empty() {
            for hash in &conflicting {
                sqlx::query(
                    "UPDATE observations SET replaced_by = $2, double_spend_flag = TRUE WHERE tx_hash = $1",
                )
                .bind(hash.as_slice())
                .bind(tx.txid.as_slice())
                .execute(&mut *txn)
                .await?;
            }
            sqlx::query("UPDATE observations SET double_spend_flag = TRUE WHERE tx_hash = $1")
                .bind(tx.txid.as_slice())
                .execute(&mut *txn)
                .await?;
        }

        txn.commit().await?;
        Ok(ConflictOutcome {
            conflicting_tx_hashes: conflicting.into_iter().collect(),
        })
    }

    async fn startup_metric_totals(&self) -> Result<MetricTotals, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM transactions) AS tx_count,
                (SELECT COUNT(*) FROM blocks) AS block_count,
                (SELECT COALESCE(SUM(connection_count), 0) FROM peers) AS conn_count,
                (SELECT COALESCE(SUM(tx_announcements), 0) FROM peers) AS tx_ann,
                (SELECT COALESCE(SUM(block_announcements), 0) FROM peers) AS block_ann
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(MetricTotals {
            transactions_recorded: row.get::<i64, _>("tx_count") as u64,
            blocks_received: row.get::<i64, _>("block_count") as u64,
            peer_connections: row.get::<i64, _>("conn_count") as u64,
            inv_tx_announcements: row.get::<i64, _>("tx_ann") as u64,
            inv_block_announcements: row.get::<i64, _>("block_ann") as u64,
        })
    }
}
