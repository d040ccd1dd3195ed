use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::decimal::{Money, Rate};
use crate::errors::{self, BillingError};

/// unique identifier for a customer
pub type CustomerId = u64;

/// unique identifier for a loan
pub type LoanId = u64;

/// unique identifier for an installment
pub type InstallmentId = u64;

/// unique identifier for a payment
pub type PaymentId = u64;

/// loan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    /// funds handed out, repayment in progress
    Disbursed,
    /// every installment paid
    Paid,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Disbursed => "DISBURSED",
            LoanStatus::Paid => "PAID",
        }
    }

    /// PAID is terminal
    pub fn can_transition_to(&self, next: LoanStatus) -> bool {
        matches!((self, next), (LoanStatus::Disbursed, LoanStatus::Paid))
    }
}

/// installment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallmentStatus {
    /// not yet due, or due today
    Pending,
    /// settled by exactly one payment
    Paid,
    /// due date passed without payment
    Missed,
}

impl InstallmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallmentStatus::Pending => "PENDING",
            InstallmentStatus::Paid => "PAID",
            InstallmentStatus::Missed => "MISSED",
        }
    }

    /// pending and missed installments still count towards the outstanding balance
    pub fn is_unresolved(&self) -> bool {
        !matches!(self, InstallmentStatus::Paid)
    }

    pub fn can_transition_to(&self, next: InstallmentStatus) -> bool {
        matches!(
            (self, next),
            (InstallmentStatus::Pending, InstallmentStatus::Paid)
                | (InstallmentStatus::Pending, InstallmentStatus::Missed)
                | (InstallmentStatus::Missed, InstallmentStatus::Paid)
        )
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for InstallmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// error returned when a stored status string is not recognised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for LoanStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DISBURSED" => Ok(LoanStatus::Disbursed),
            "PAID" => Ok(LoanStatus::Paid),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl FromStr for InstallmentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(InstallmentStatus::Pending),
            "PAID" => Ok(InstallmentStatus::Paid),
            "MISSED" => Ok(InstallmentStatus::Missed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub customer_id: CustomerId,
    pub principal: Money,
    pub interest_rate: Rate,
    pub term_weeks: u32,
    pub start_date: DateTime<Utc>,
    pub status: LoanStatus,
}

impl Loan {
    /// total repayable over the whole term, `principal * (1 + rate)`
    pub fn total_repayable(&self) -> errors::Result<Money> {
        self.interest_rate
            .uplift()
            .and_then(|uplift| self.principal.checked_mul(uplift))
            .ok_or(BillingError::AmountOverflow { loan_id: self.id })
    }

    pub fn is_disbursed(&self) -> bool {
        self.status == LoanStatus::Disbursed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installment {
    pub id: InstallmentId,
    pub loan_id: LoanId,
    pub week_number: u32,
    pub due_date: NaiveDate,
    pub amount_due: Money,
    pub status: InstallmentStatus,
}

impl Installment {
    /// overdue when the due date lies strictly before `today`
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status == InstallmentStatus::Pending && self.due_date < today
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub installment_id: InstallmentId,
    pub paid_at: DateTime<Utc>,
    pub amount_paid: Money,
}

/// secondary detail attached to a primary result; degraded when the read
/// behind it failed but the primary result still stands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Detail<T> {
    Available(T),
    Degraded { reason: String },
}

impl<T> Detail<T> {
    pub fn degraded(reason: impl fmt::Display) -> Self {
        Detail::Degraded {
            reason: reason.to_string(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Detail::Degraded { .. })
    }

    pub fn available(&self) -> Option<&T> {
        match self {
            Detail::Available(value) => Some(value),
            Detail::Degraded { .. } => None,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Detail::Available(value) => Some(value),
            Detail::Degraded { .. } => None,
        }
    }
}
