use crate::database::error::DatabaseError;
use crate::database::repository::{PaymentStore, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::BigDecimal, FromRow, PgPool};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a gateway bill as recorded locally.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// Status only moves forward: pending -> success | failed.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Success)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "success" => Ok(PaymentStatus::Success),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

/// A gateway transaction as stored locally
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PaymentRecord {
    pub id: i64,
    pub reference_no: String,
    pub bill_code: Option<String>,
    pub status: String,
    pub amount: BigDecimal,
    pub package_type: Option<String>,
    pub location_id: Option<i64>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub user_external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl PaymentRecord {
    /// Unknown stored values are treated as still pending.
    pub fn payment_status(&self) -> PaymentStatus {
        self.status.parse().unwrap_or(PaymentStatus::Pending)
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PaymentStatusCounts {
    pub pending: i64,
    pub success: i64,
    pub failed: i64,
}

/// Repository for payment records
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PaymentRepository {
    async fn find_by_reference(&self, reference_no: &str) -> StoreResult<Option<PaymentRecord>> {
        sqlx::query_as::<_, PaymentRecord>(
            "SELECT id, reference_no, bill_code, status, amount, package_type, location_id,
                    customer_name, customer_email, user_external_id, created_at, paid_at
             FROM payments
             WHERE reference_no = $1",
        )
        .bind(reference_no)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_bill_code(&self, bill_code: &str) -> StoreResult<Option<PaymentRecord>> {
        sqlx::query_as::<_, PaymentRecord>(
            "SELECT id, reference_no, bill_code, status, amount, package_type, location_id,
                    customer_name, customer_email, user_external_id, created_at, paid_at
             FROM payments
             WHERE bill_code = $1
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(bill_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_pending_for_polling(
        &self,
        created_after: DateTime<Utc>,
        created_before: DateTime<Utc>,
        after_id: i64,
        limit: i64,
    ) -> StoreResult<Vec<PaymentRecord>> {
        sqlx::query_as::<_, PaymentRecord>(
            "SELECT id, reference_no, bill_code, status, amount, package_type, location_id,
                    customer_name, customer_email, user_external_id, created_at, paid_at
             FROM payments
             WHERE status = 'pending'
               AND bill_code IS NOT NULL
               AND created_at > $1
               AND created_at < $2
               AND id > $3
             ORDER BY id ASC
             LIMIT $4",
        )
        .bind(created_after)
        .bind(created_before)
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn settle(
        &self,
        reference_no: &str,
        status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<PaymentRecord>> {
        sqlx::query_as::<_, PaymentRecord>(
            "UPDATE payments
             SET status = $2, paid_at = COALESCE($3, paid_at), updated_at = NOW()
             WHERE reference_no = $1 AND status = 'pending'
             RETURNING id, reference_no, bill_code, status, amount, package_type, location_id,
                       customer_name, customer_email, user_external_id, created_at, paid_at",
        )
        .bind(reference_no)
        .bind(status.as_str())
        .bind(paid_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_orphaned_successes(
        &self,
        after_id: i64,
        limit: i64,
    ) -> StoreResult<Vec<PaymentRecord>> {
        sqlx::query_as::<_, PaymentRecord>(
            "SELECT p.id, p.reference_no, p.bill_code, p.status, p.amount, p.package_type,
                    p.location_id, p.customer_name, p.customer_email, p.user_external_id,
                    p.created_at, p.paid_at
             FROM payments p
             LEFT JOIN adoptions a ON a.payment_reference_no = p.reference_no
             WHERE p.status = 'success' AND a.id IS NULL AND p.id > $1
             ORDER BY p.id ASC
             LIMIT $2",
        )
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn status_counts(&self) -> StoreResult<PaymentStatusCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM payments GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;

        let mut counts = PaymentStatusCounts::default();
        for (status, count) in rows {
            match status.parse::<PaymentStatus>() {
                Ok(PaymentStatus::Pending) => counts.pending += count,
                Ok(PaymentStatus::Success) => counts.success += count,
                Ok(PaymentStatus::Failed) => counts.failed += count,
                Err(_) => {}
            }
        }
        Ok(counts)
    }
}
