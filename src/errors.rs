use thiserror::Error;

use crate::decimal::Money;
use crate::store::StoreError;
use crate::types::{CustomerId, LoanId};

/// broad class of a failure, so callers can map it to a response without
/// matching every variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// malformed input
    Validation,
    /// domain rule violation or persistence failure
    Business,
}

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("invalid input: {field} {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("customer not found")]
    CustomerNotFound {
        customer_id: CustomerId,
    },

    #[error("customer has non paid loan")]
    ActiveLoanExists {
        customer_id: CustomerId,
    },

    #[error("loan not found")]
    LoanNotFound {
        loan_id: LoanId,
    },

    #[error("loan not found or does not belong to customer")]
    LoanNotOwned {
        customer_id: CustomerId,
        loan_id: LoanId,
    },

    #[error("installment not found for loan {loan_id} week {week_number}")]
    InstallmentNotFound {
        loan_id: LoanId,
        week_number: u32,
    },

    #[error("payment amount {submitted} does not match amount due {amount_due}")]
    AmountMismatch {
        submitted: String,
        amount_due: Money,
    },

    #[error("installment for loan {loan_id} week {week_number} is already paid")]
    AlreadyPaid {
        loan_id: LoanId,
        week_number: u32,
    },

    #[error("failed to create installment from loan: expected {expected}, generated {generated}")]
    IncompleteSchedule {
        expected: u32,
        generated: usize,
    },

    #[error("repayable amount of loan {loan_id} is out of range")]
    AmountOverflow {
        loan_id: LoanId,
    },

    #[error("invalid loan policy: {message}")]
    InvalidPolicy {
        message: String,
    },

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl BillingError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        BillingError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BillingError::Validation { .. } => ErrorKind::Validation,
            _ => ErrorKind::Business,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }
}

pub type Result<T> = std::result::Result<T, BillingError>;
