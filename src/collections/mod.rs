//! Read-side collections logic: lazy overdue refresh, delinquency and
//! outstanding balances.

pub mod delinquency;
pub mod outstanding;

use chrono::NaiveDate;
use log::info;

use crate::errors::Result;
use crate::store::BillingStore;
use crate::types::LoanId;

pub use delinquency::{is_delinquent, DelinquencyEvaluator};
pub use outstanding::{InstallmentTotals, OutstandingAggregator};

/// flip a loan's PENDING installments due strictly before `today` to MISSED
///
/// Idempotent; returns how many installments changed on this call.
pub fn refresh_overdue<S: BillingStore>(store: &S, loan_id: LoanId, today: NaiveDate) -> Result<usize> {
    let changed = store.mark_overdue_installments(loan_id, today)?;
    if changed > 0 {
        info!("loan {loan_id}: {changed} installment(s) marked missed as of {today}");
    }
    Ok(changed)
}
