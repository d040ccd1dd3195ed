use hourglass_rs::SafeTimeProvider;
use log::{info, warn};

use super::PaymentRequest;
use crate::collections::outstanding::owned_loan;
use crate::collections::InstallmentTotals;
use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::ids::IdGenerator;
use crate::store::BillingStore;
use crate::types::{Detail, InstallmentStatus, LoanId, LoanStatus, Payment};
use crate::views::PaymentConfirmation;

/// validates a payment against its installment and records it
pub struct PaymentApplier<'a, S: BillingStore> {
    store: &'a S,
    ids: &'a dyn IdGenerator,
    time: &'a SafeTimeProvider,
}

impl<'a, S: BillingStore> PaymentApplier<'a, S> {
    pub fn new(store: &'a S, ids: &'a dyn IdGenerator, time: &'a SafeTimeProvider) -> Self {
        Self { store, ids, time }
    }

    /// apply a payment
    ///
    /// Checks run in order and stop at the first failure: customer exists,
    /// loan belongs to the customer, installment exists, amount matches the
    /// amount due exactly, installment not already paid. The payment, the
    /// installment update and the loan settlement land in one unit of work.
    pub fn execute(&self, request: &PaymentRequest) -> Result<PaymentConfirmation> {
        let amount_paid = request.validate()?;
        let loan = owned_loan(self.store, request.customer_id, request.loan_id)?;

        let installment = self
            .store
            .find_installment(loan.id, request.week_number)?
            .ok_or_else(|| {
                warn!(
                    "payment rejected: no installment for loan {} week {}",
                    loan.id, request.week_number
                );
                BillingError::InstallmentNotFound {
                    loan_id: loan.id,
                    week_number: request.week_number,
                }
            })?;

        if request.amount != installment.amount_due.to_string() {
            warn!(
                "payment rejected: loan {} week {} submitted {} but {} is due",
                loan.id, installment.week_number, request.amount, installment.amount_due
            );
            return Err(BillingError::AmountMismatch {
                submitted: request.amount.clone(),
                amount_due: installment.amount_due,
            });
        }

        let already_paid = || BillingError::AlreadyPaid {
            loan_id: loan.id,
            week_number: installment.week_number,
        };
        if !installment.status.can_transition_to(InstallmentStatus::Paid) {
            warn!(
                "payment rejected: loan {} week {} is already paid",
                loan.id, installment.week_number
            );
            return Err(already_paid());
        }

        let payment = Payment {
            id: self.ids.next_id(),
            installment_id: installment.id,
            paid_at: self.time.now(),
            amount_paid,
        };

        let loan_status = self.store.unit_of_work(|tx| -> Result<LoanStatus> {
            // a concurrent payment for the same installment loses here
            tx.insert_payment(&payment).map_err(|e| {
                if e.is_conflict() {
                    already_paid()
                } else {
                    BillingError::from(e)
                }
            })?;
            tx.update_installment_status(installment.id, InstallmentStatus::Paid)?;

            if tx.count_unpaid_installments(loan.id)? == 0
                && loan.status.can_transition_to(LoanStatus::Paid)
            {
                tx.update_loan_status(loan.id, LoanStatus::Paid)?;
                return Ok(LoanStatus::Paid);
            }
            Ok(loan.status)
        })?;

        info!(
            "payment {} of {} applied to loan {} week {}",
            payment.id, payment.amount_paid, loan.id, installment.week_number
        );
        if loan_status == LoanStatus::Paid {
            info!("loan {} fully repaid", loan.id);
        }

        let outstanding = self.outstanding_after_payment(loan.id);
        let mut paid_installment = installment;
        paid_installment.status = InstallmentStatus::Paid;

        Ok(PaymentConfirmation::from_payment(
            &payment,
            request.customer_id,
            &paid_installment,
            loan_status,
            outstanding,
        ))
    }

    /// best effort: the payment is already committed
    fn outstanding_after_payment(&self, loan_id: LoanId) -> Detail<Money> {
        match self.store.installments_for_loan(loan_id) {
            Ok(installments) => {
                Detail::Available(InstallmentTotals::from_installments(&installments).outstanding())
            }
            Err(e) => {
                warn!("loan {loan_id}: outstanding balance unavailable after payment: {e}");
                Detail::degraded(e)
            }
        }
    }
}
