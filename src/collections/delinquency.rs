use hourglass_rs::SafeTimeProvider;
use log::{info, warn};

use super::refresh_overdue;
use crate::errors::{BillingError, Result};
use crate::store::{BillingStore, StoreResult};
use crate::types::{Detail, InstallmentStatus, LoanId};
use crate::views::{DelinquencyReport, MissedSummary};

const DELINQUENT_MESSAGE: &str = "Customer is delinquent - has 2 or more consecutive missed payments";
const NOT_DELINQUENT_MESSAGE: &str = "Customer is not delinquent";

/// delinquent when the two most recent misses sit in consecutive weeks
///
/// `latest_missed` is descending by week number, as returned by the store.
pub fn is_delinquent(latest_missed: &[u32]) -> bool {
    match latest_missed {
        [latest, previous, ..] => previous.checked_add(1) == Some(*latest),
        _ => false,
    }
}

pub struct DelinquencyEvaluator<'a, S: BillingStore> {
    store: &'a S,
    time: &'a SafeTimeProvider,
}

impl<'a, S: BillingStore> DelinquencyEvaluator<'a, S> {
    pub fn new(store: &'a S, time: &'a SafeTimeProvider) -> Self {
        Self { store, time }
    }

    /// verdict for a loan; the missed-week detail is best effort
    pub fn execute(&self, loan_id: LoanId) -> Result<DelinquencyReport> {
        if self.store.find_loan(loan_id)?.is_none() {
            warn!("delinquency check on unknown loan {loan_id}");
            return Err(BillingError::LoanNotFound { loan_id });
        }
        refresh_overdue(self.store, loan_id, self.time.now().date_naive())?;

        let latest = self.store.latest_missed_weeks(loan_id, 2)?;
        let delinquent = is_delinquent(&latest);

        let details = match self.missed_summary(loan_id) {
            Ok(summary) => Detail::Available(summary),
            Err(e) => {
                warn!("loan {loan_id}: missed-payment history unavailable: {e}");
                Detail::degraded(e)
            }
        };

        if delinquent {
            info!("loan {loan_id} is delinquent, latest missed weeks {latest:?}");
        }

        Ok(DelinquencyReport {
            loan_id,
            is_delinquent: delinquent,
            message: if delinquent {
                DELINQUENT_MESSAGE
            } else {
                NOT_DELINQUENT_MESSAGE
            }
            .to_string(),
            details,
        })
    }

    fn missed_summary(&self, loan_id: LoanId) -> StoreResult<MissedSummary> {
        let missed_weeks: Vec<u32> = self
            .store
            .installments_for_loan(loan_id)?
            .iter()
            .filter(|i| i.status == InstallmentStatus::Missed)
            .map(|i| i.week_number)
            .collect();

        Ok(MissedSummary {
            total_missed: missed_weeks.len(),
            missed_weeks,
        })
    }
}
