use std::cell::RefCell;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use parking_lot::ReentrantMutex;

use super::{BillingStore, StoreError, StoreResult};
use crate::types::{
    Customer, CustomerId, Installment, InstallmentId, InstallmentStatus, Loan, LoanId,
    LoanStatus, Payment, PaymentId,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    customers: BTreeMap<CustomerId, Customer>,
    loans: BTreeMap<LoanId, Loan>,
    installments: BTreeMap<InstallmentId, Installment>,
    payments: BTreeMap<PaymentId, Payment>,
}

impl MemoryState {
    fn loan_installments(&self, loan_id: LoanId) -> impl Iterator<Item = &Installment> {
        self.installments.values().filter(move |i| i.loan_id == loan_id)
    }
}

/// process-local store; a unit of work holds the lock for its whole duration
/// and restores a snapshot when the work fails
#[derive(Default)]
pub struct InMemoryStore {
    state: ReentrantMutex<RefCell<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&MemoryState) -> T) -> T {
        let guard = self.state.lock();
        let state = guard.borrow();
        f(&state)
    }

    fn write<T>(&self, f: impl FnOnce(&mut MemoryState) -> StoreResult<T>) -> StoreResult<T> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }
}

impl BillingStore for InMemoryStore {
    fn insert_customer(&self, customer: &Customer) -> StoreResult<()> {
        self.write(|state| {
            if state.customers.contains_key(&customer.id) {
                return Err(StoreError::Conflict(format!("customer {} already exists", customer.id)));
            }
            state.customers.insert(customer.id, customer.clone());
            Ok(())
        })
    }

    fn list_customers(&self) -> StoreResult<Vec<Customer>> {
        Ok(self.read(|state| state.customers.values().cloned().collect()))
    }

    fn find_customer(&self, id: CustomerId) -> StoreResult<Option<Customer>> {
        Ok(self.read(|state| state.customers.get(&id).cloned()))
    }

    fn insert_loan(&self, loan: &Loan) -> StoreResult<()> {
        self.write(|state| {
            if !state.customers.contains_key(&loan.customer_id) {
                return Err(StoreError::NotFound {
                    entity: "customer",
                    id: loan.customer_id,
                });
            }
            if state.loans.contains_key(&loan.id) {
                return Err(StoreError::Conflict(format!("loan {} already exists", loan.id)));
            }
            let has_disbursed = state
                .loans
                .values()
                .any(|l| l.customer_id == loan.customer_id && l.status == LoanStatus::Disbursed);
            if loan.status == LoanStatus::Disbursed && has_disbursed {
                return Err(StoreError::Conflict(format!(
                    "customer {} already has a disbursed loan",
                    loan.customer_id
                )));
            }
            state.loans.insert(loan.id, loan.clone());
            Ok(())
        })
    }

    fn find_loan(&self, id: LoanId) -> StoreResult<Option<Loan>> {
        Ok(self.read(|state| state.loans.get(&id).cloned()))
    }

    fn has_disbursed_loan(&self, customer_id: CustomerId) -> StoreResult<bool> {
        Ok(self.read(|state| {
            state
                .loans
                .values()
                .any(|l| l.customer_id == customer_id && l.status == LoanStatus::Disbursed)
        }))
    }

    fn update_loan_status(&self, id: LoanId, status: LoanStatus) -> StoreResult<()> {
        self.write(|state| {
            let loan = state
                .loans
                .get_mut(&id)
                .ok_or(StoreError::NotFound { entity: "loan", id })?;
            loan.status = status;
            Ok(())
        })
    }

    fn insert_installments(&self, installments: &[Installment]) -> StoreResult<()> {
        self.write(|state| {
            // validate the whole batch before touching state
            for (idx, installment) in installments.iter().enumerate() {
                if !state.loans.contains_key(&installment.loan_id) {
                    return Err(StoreError::NotFound {
                        entity: "loan",
                        id: installment.loan_id,
                    });
                }
                let clashes_stored = state.installments.contains_key(&installment.id)
                    || state.loan_installments(installment.loan_id).any(|i| {
                        i.week_number == installment.week_number
                    });
                let clashes_batch = installments[..idx].iter().any(|other| {
                    other.id == installment.id
                        || (other.loan_id == installment.loan_id
                            && other.week_number == installment.week_number)
                });
                if clashes_stored || clashes_batch {
                    return Err(StoreError::Conflict(format!(
                        "installment {} (loan {} week {}) already exists",
                        installment.id, installment.loan_id, installment.week_number
                    )));
                }
            }

            for installment in installments {
                state.installments.insert(installment.id, installment.clone());
            }
            Ok(())
        })
    }

    fn installments_for_loan(&self, loan_id: LoanId) -> StoreResult<Vec<Installment>> {
        Ok(self.read(|state| {
            let mut rows: Vec<Installment> = state.loan_installments(loan_id).cloned().collect();
            rows.sort_by_key(|i| i.week_number);
            rows
        }))
    }

    fn find_installment(&self, loan_id: LoanId, week_number: u32) -> StoreResult<Option<Installment>> {
        Ok(self.read(|state| {
            state
                .loan_installments(loan_id)
                .find(|i| i.week_number == week_number)
                .cloned()
        }))
    }

    fn update_installment_status(
        &self,
        id: InstallmentId,
        status: InstallmentStatus,
    ) -> StoreResult<()> {
        self.write(|state| {
            let installment = state
                .installments
                .get_mut(&id)
                .ok_or(StoreError::NotFound { entity: "installment", id })?;
            installment.status = status;
            Ok(())
        })
    }

    fn latest_missed_weeks(&self, loan_id: LoanId, limit: usize) -> StoreResult<Vec<u32>> {
        Ok(self.read(|state| {
            let mut weeks: Vec<u32> = state
                .loan_installments(loan_id)
                .filter(|i| i.status == InstallmentStatus::Missed)
                .map(|i| i.week_number)
                .collect();
            weeks.sort_unstable_by(|a, b| b.cmp(a));
            weeks.truncate(limit);
            weeks
        }))
    }

    fn count_unpaid_installments(&self, loan_id: LoanId) -> StoreResult<u32> {
        Ok(self.read(|state| {
            state
                .loan_installments(loan_id)
                .filter(|i| i.status != InstallmentStatus::Paid)
                .count() as u32
        }))
    }

    fn mark_overdue_installments(&self, loan_id: LoanId, as_of: NaiveDate) -> StoreResult<usize> {
        self.write(|state| {
            let mut changed = 0;
            for installment in state.installments.values_mut() {
                if installment.loan_id == loan_id && installment.is_overdue(as_of) {
                    installment.status = InstallmentStatus::Missed;
                    changed += 1;
                }
            }
            Ok(changed)
        })
    }

    fn insert_payment(&self, payment: &Payment) -> StoreResult<()> {
        self.write(|state| {
            if !state.installments.contains_key(&payment.installment_id) {
                return Err(StoreError::NotFound {
                    entity: "installment",
                    id: payment.installment_id,
                });
            }
            let duplicate = state.payments.contains_key(&payment.id)
                || state
                    .payments
                    .values()
                    .any(|p| p.installment_id == payment.installment_id);
            if duplicate {
                return Err(StoreError::Conflict(format!(
                    "installment {} already has a payment",
                    payment.installment_id
                )));
            }
            state.payments.insert(payment.id, payment.clone());
            Ok(())
        })
    }

    fn find_payment_for_installment(
        &self,
        installment_id: InstallmentId,
    ) -> StoreResult<Option<Payment>> {
        Ok(self.read(|state| {
            state
                .payments
                .values()
                .find(|p| p.installment_id == installment_id)
                .cloned()
        }))
    }

    fn unit_of_work<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<StoreError>,
    {
        // other threads wait here until the unit completes
        let guard = self.state.lock();
        let snapshot = guard.borrow().clone();

        let result = work(self);
        if result.is_err() {
            *guard.borrow_mut() = snapshot;
        }
        result
    }
}
