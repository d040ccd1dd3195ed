use hourglass_rs::SafeTimeProvider;
use log::{debug, warn};

use super::refresh_overdue;
use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::store::BillingStore;
use crate::types::{CustomerId, Installment, InstallmentStatus, Loan, LoanId};
use crate::views::{InstallmentView, OutstandingSummary};

/// amounts due partitioned by installment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstallmentTotals {
    pub paid: Money,
    pub missed: Money,
    pub pending: Money,
}

impl InstallmentTotals {
    pub fn from_installments<'a>(installments: impl IntoIterator<Item = &'a Installment>) -> Self {
        installments
            .into_iter()
            .fold(Self::default(), |mut totals, installment| {
                match installment.status {
                    InstallmentStatus::Paid => totals.paid += installment.amount_due,
                    InstallmentStatus::Missed => totals.missed += installment.amount_due,
                    InstallmentStatus::Pending => totals.pending += installment.amount_due,
                }
                totals
            })
    }

    /// everything not yet paid
    pub fn outstanding(&self) -> Money {
        self.missed + self.pending
    }

    /// equals the schedule total at every point in a loan's life
    pub fn scheduled(&self) -> Money {
        self.paid + self.missed + self.pending
    }
}

/// loan lookup restricted to the owning customer
pub(crate) fn owned_loan<S: BillingStore>(
    store: &S,
    customer_id: CustomerId,
    loan_id: LoanId,
) -> Result<Loan> {
    if !store.customer_exists(customer_id)? {
        warn!("customer {customer_id} not found");
        return Err(BillingError::CustomerNotFound { customer_id });
    }

    match store.find_loan(loan_id)? {
        Some(loan) if loan.customer_id == customer_id => Ok(loan),
        _ => {
            warn!("loan {loan_id} not found for customer {customer_id}");
            Err(BillingError::LoanNotOwned {
                customer_id,
                loan_id,
            })
        }
    }
}

pub struct OutstandingAggregator<'a, S: BillingStore> {
    store: &'a S,
    time: &'a SafeTimeProvider,
}

impl<'a, S: BillingStore> OutstandingAggregator<'a, S> {
    pub fn new(store: &'a S, time: &'a SafeTimeProvider) -> Self {
        Self { store, time }
    }

    pub fn execute(&self, customer_id: CustomerId, loan_id: LoanId) -> Result<OutstandingSummary> {
        let loan = owned_loan(self.store, customer_id, loan_id)?;
        refresh_overdue(self.store, loan.id, self.time.now().date_naive())?;

        let installments = self.store.installments_for_loan(loan.id)?;
        let totals = InstallmentTotals::from_installments(&installments);
        debug!(
            "loan {loan_id}: outstanding {} (paid {}, missed {}, pending {})",
            totals.outstanding(),
            totals.paid,
            totals.missed,
            totals.pending
        );

        Ok(OutstandingSummary {
            customer_id,
            loan_id: loan.id,
            total_outstanding: totals.outstanding(),
            total_paid: totals.paid,
            total_missed: totals.missed,
            total_pending: totals.pending,
            installments: installments.iter().map(InstallmentView::from).collect(),
        })
    }
}
