//! Persistence port.
//!
//! Only store backends touch storage; engine components call through
//! [`BillingStore`] and never hold a connection themselves.

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use chrono::NaiveDate;
use thiserror::Error;

use crate::types::{
    Customer, CustomerId, Installment, InstallmentId, InstallmentStatus, Loan, LoanId,
    LoanStatus, Payment,
};

#[derive(Error, Debug)]
pub enum StoreError {
    /// a uniqueness rule rejected the write
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    /// a stored value could not be decoded back into a domain type
    #[error("corrupt {column} value {value:?}: {message}")]
    Corrupt {
        column: &'static str,
        value: String,
        message: String,
    },

    /// the id cannot be represented by the backend
    #[error("id {0} is out of range for this store")]
    IdOutOfRange(u64),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store unavailable: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// storage operations the billing engine relies on
///
/// Implementations must reject a second DISBURSED loan for the same customer
/// with [`StoreError::Conflict`], and must run [`BillingStore::unit_of_work`]
/// atomically: either every write inside the closure lands or none does.
pub trait BillingStore {
    // ── customers ───────────────────────────────────────────────

    fn insert_customer(&self, customer: &Customer) -> StoreResult<()>;

    fn list_customers(&self) -> StoreResult<Vec<Customer>>;

    fn find_customer(&self, id: CustomerId) -> StoreResult<Option<Customer>>;

    fn customer_exists(&self, id: CustomerId) -> StoreResult<bool> {
        Ok(self.find_customer(id)?.is_some())
    }

    // ── loans ───────────────────────────────────────────────────

    fn insert_loan(&self, loan: &Loan) -> StoreResult<()>;

    fn find_loan(&self, id: LoanId) -> StoreResult<Option<Loan>>;

    fn has_disbursed_loan(&self, customer_id: CustomerId) -> StoreResult<bool>;

    fn update_loan_status(&self, id: LoanId, status: LoanStatus) -> StoreResult<()>;

    // ── installments ────────────────────────────────────────────

    fn insert_installments(&self, installments: &[Installment]) -> StoreResult<()>;

    /// all installments of a loan, ascending by week number
    fn installments_for_loan(&self, loan_id: LoanId) -> StoreResult<Vec<Installment>>;

    fn find_installment(&self, loan_id: LoanId, week_number: u32) -> StoreResult<Option<Installment>>;

    fn update_installment_status(
        &self,
        id: InstallmentId,
        status: InstallmentStatus,
    ) -> StoreResult<()>;

    /// week numbers of the most recent MISSED installments, descending,
    /// at most `limit` of them
    fn latest_missed_weeks(&self, loan_id: LoanId, limit: usize) -> StoreResult<Vec<u32>>;

    fn count_unpaid_installments(&self, loan_id: LoanId) -> StoreResult<u32>;

    /// flip PENDING installments due strictly before `as_of` to MISSED,
    /// returning how many changed
    fn mark_overdue_installments(&self, loan_id: LoanId, as_of: NaiveDate) -> StoreResult<usize>;

    // ── payments ────────────────────────────────────────────────

    fn insert_payment(&self, payment: &Payment) -> StoreResult<()>;

    fn find_payment_for_installment(
        &self,
        installment_id: InstallmentId,
    ) -> StoreResult<Option<Payment>>;

    // ── transactions ────────────────────────────────────────────

    /// run `work` as one atomic unit; any `Err` rolls every write back
    ///
    /// Units of work do not nest.
    fn unit_of_work<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<StoreError>;
}
