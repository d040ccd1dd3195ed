use hourglass_rs::SafeTimeProvider;
use log::{info, warn};

use crate::config::LoanPolicy;
use crate::errors::{BillingError, Result};
use crate::ids::IdGenerator;
use crate::schedule::ScheduleGenerator;
use crate::store::BillingStore;
use crate::types::{CustomerId, Loan, LoanStatus};
use crate::views::LoanView;

/// creates loans while holding every customer to one unpaid loan
pub struct OriginationGate<'a, S: BillingStore> {
    store: &'a S,
    ids: &'a dyn IdGenerator,
    policy: &'a LoanPolicy,
    time: &'a SafeTimeProvider,
}

impl<'a, S: BillingStore> OriginationGate<'a, S> {
    pub fn new(
        store: &'a S,
        ids: &'a dyn IdGenerator,
        policy: &'a LoanPolicy,
        time: &'a SafeTimeProvider,
    ) -> Self {
        Self {
            store,
            ids,
            policy,
            time,
        }
    }

    /// originate a loan on the injected policy and persist its schedule
    ///
    /// The loan and its installments are written in one unit of work, so a
    /// failed schedule write leaves no loan behind.
    pub fn execute(&self, customer_id: CustomerId) -> Result<LoanView> {
        if !self.store.customer_exists(customer_id)? {
            warn!("origination rejected: customer {customer_id} not found");
            return Err(BillingError::CustomerNotFound { customer_id });
        }

        if self.store.has_disbursed_loan(customer_id)? {
            warn!("origination rejected: customer {customer_id} has an unpaid loan");
            return Err(BillingError::ActiveLoanExists { customer_id });
        }

        let loan = Loan {
            id: self.ids.next_id(),
            customer_id,
            principal: self.policy.principal,
            interest_rate: self.policy.interest_rate,
            term_weeks: self.policy.term_weeks,
            start_date: self.time.now(),
            status: LoanStatus::Disbursed,
        };

        let schedule = ScheduleGenerator::new(self.policy.amount_scale).generate(&loan, self.ids)?;
        if schedule.len() != loan.term_weeks as usize {
            return Err(BillingError::IncompleteSchedule {
                expected: loan.term_weeks,
                generated: schedule.len(),
            });
        }

        self.store.unit_of_work(|tx| -> Result<()> {
            // the store's uniqueness rule closes the gap since the check above
            tx.insert_loan(&loan).map_err(|e| {
                if e.is_conflict() {
                    warn!("origination lost a race: customer {customer_id} already has an unpaid loan");
                    BillingError::ActiveLoanExists { customer_id }
                } else {
                    BillingError::from(e)
                }
            })?;
            tx.insert_installments(&schedule.installments)?;
            Ok(())
        })?;

        info!(
            "loan {} disbursed to customer {}: {} at {} over {} weeks, {} repayable",
            loan.id,
            customer_id,
            loan.principal,
            loan.interest_rate,
            loan.term_weeks,
            schedule.total_due,
        );

        Ok(LoanView::from_loan(&loan, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::{Money, Rate};
    use crate::ids::SequentialIdGenerator;
    use crate::store::{InMemoryStore, StoreError, StoreResult};
    use crate::types::{
        Customer, Installment, InstallmentId, InstallmentStatus, LoanId, Payment,
    };
    use chrono::{NaiveDate, TimeZone, Utc};
    use hourglass_rs::TimeSource;

    fn setup() -> (InMemoryStore, SequentialIdGenerator, SafeTimeProvider) {
        let store = InMemoryStore::new();
        store
            .insert_customer(&Customer {
                id: 1,
                name: "Ayu".to_string(),
                email: "ayu@example.com".to_string(),
            })
            .unwrap();
        let time = SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
        ));
        (store, SequentialIdGenerator::starting_at(1000), time)
    }

    #[test]
    fn test_originate_standard_loan() {
        let (store, ids, time) = setup();
        let policy = LoanPolicy::standard();

        let view = OriginationGate::new(&store, &ids, &policy, &time).execute(1).unwrap();
        assert_eq!(view.customer_id, 1);
        assert_eq!(view.status, LoanStatus::Disbursed);
        assert_eq!(view.principal, Money::from_major(5_000_000));
        assert_eq!(view.term_weeks, 50);
        assert_eq!(view.start_date, time.now());
        assert!(view.schedule_created);

        let installments = store.installments_for_loan(view.id).unwrap();
        assert_eq!(installments.len(), 50);
        assert!(installments.iter().all(|i| i.amount_due.to_string() == "110000"));
        assert_eq!(installments[0].due_date, NaiveDate::from_ymd_opt(2024, 1, 8).unwrap());
    }

    #[test]
    fn test_unknown_customer() {
        let (store, ids, time) = setup();
        let policy = LoanPolicy::standard();

        let err = OriginationGate::new(&store, &ids, &policy, &time).execute(2).unwrap_err();
        assert_eq!(err.to_string(), "customer not found");
    }

    #[test]
    fn test_second_loan_rejected_until_paid() {
        let (store, ids, time) = setup();
        let policy = LoanPolicy::new(Money::from_major(1_000), Rate::from_percentage(10), 4).unwrap();
        let gate = OriginationGate::new(&store, &ids, &policy, &time);

        let first = gate.execute(1).unwrap();
        let err = gate.execute(1).unwrap_err();
        assert_eq!(err.to_string(), "customer has non paid loan");

        store.update_loan_status(first.id, LoanStatus::Paid).unwrap();
        let second = gate.execute(1).unwrap();
        assert_ne!(first.id, second.id);
    }

    /// reports no disbursed loan so the store's uniqueness rule is what rejects
    struct StaleReads(InMemoryStore);

    impl BillingStore for StaleReads {
        fn insert_customer(&self, c: &Customer) -> StoreResult<()> {
            self.0.insert_customer(c)
        }
        fn list_customers(&self) -> StoreResult<Vec<Customer>> {
            self.0.list_customers()
        }
        fn find_customer(&self, id: u64) -> StoreResult<Option<Customer>> {
            self.0.find_customer(id)
        }
        fn insert_loan(&self, loan: &Loan) -> StoreResult<()> {
            self.0.insert_loan(loan)
        }
        fn find_loan(&self, id: LoanId) -> StoreResult<Option<Loan>> {
            self.0.find_loan(id)
        }
        fn has_disbursed_loan(&self, _: u64) -> StoreResult<bool> {
            Ok(false)
        }
        fn update_loan_status(&self, id: LoanId, s: LoanStatus) -> StoreResult<()> {
            self.0.update_loan_status(id, s)
        }
        fn insert_installments(&self, rows: &[Installment]) -> StoreResult<()> {
            self.0.insert_installments(rows)
        }
        fn installments_for_loan(&self, id: LoanId) -> StoreResult<Vec<Installment>> {
            self.0.installments_for_loan(id)
        }
        fn find_installment(&self, id: LoanId, week: u32) -> StoreResult<Option<Installment>> {
            self.0.find_installment(id, week)
        }
        fn update_installment_status(
            &self,
            id: InstallmentId,
            s: InstallmentStatus,
        ) -> StoreResult<()> {
            self.0.update_installment_status(id, s)
        }
        fn latest_missed_weeks(&self, id: LoanId, limit: usize) -> StoreResult<Vec<u32>> {
            self.0.latest_missed_weeks(id, limit)
        }
        fn count_unpaid_installments(&self, id: LoanId) -> StoreResult<u32> {
            self.0.count_unpaid_installments(id)
        }
        fn mark_overdue_installments(&self, id: LoanId, as_of: NaiveDate) -> StoreResult<usize> {
            self.0.mark_overdue_installments(id, as_of)
        }
        fn insert_payment(&self, p: &Payment) -> StoreResult<()> {
            self.0.insert_payment(p)
        }
        fn find_payment_for_installment(&self, id: InstallmentId) -> StoreResult<Option<Payment>> {
            self.0.find_payment_for_installment(id)
        }
        fn unit_of_work<T, E, F>(&self, work: F) -> std::result::Result<T, E>
        where
            F: FnOnce(&Self) -> std::result::Result<T, E>,
            E: From<StoreError>,
        {
            self.0.unit_of_work(|_| work(self))
        }
    }

    #[test]
    fn test_conflict_translated_to_active_loan() {
        let (inner, ids, time) = setup();
        let store = StaleReads(inner);
        let policy = LoanPolicy::standard();
        let gate = OriginationGate::new(&store, &ids, &policy, &time);

        gate.execute(1).unwrap();
        let err = gate.execute(1).unwrap_err();
        assert!(matches!(err, BillingError::ActiveLoanExists { customer_id: 1 }));
    }

    #[test]
    fn test_failed_schedule_write_leaves_no_loan() {
        let (store, ids, time) = setup();
        let policy = LoanPolicy::new(Money::from_major(1_000), Rate::from_percentage(10), 4).unwrap();

        // the blocker's installments take ids 1002..=1005, which the next schedule reuses
        store
            .insert_customer(&Customer {
                id: 2,
                name: "Budi".to_string(),
                email: "budi@example.com".to_string(),
            })
            .unwrap();
        let blocker = OriginationGate::new(&store, &SequentialIdGenerator::starting_at(1001), &policy, &time)
            .execute(2)
            .unwrap();
        assert_eq!(blocker.id, 1001);

        let err = OriginationGate::new(&store, &ids, &policy, &time).execute(1).unwrap_err();
        assert!(matches!(err, BillingError::Persistence(StoreError::Conflict(_))));
        assert!(store.find_loan(1000).unwrap().is_none());
        assert!(!store.has_disbursed_loan(1).unwrap());
    }

    #[test]
    fn test_unrepresentable_repayable_leaves_no_loan() {
        let (store, ids, time) = setup();
        // built directly so validation never sees it
        let policy = LoanPolicy {
            principal: Money::from_str_exact("79228162514264337593543950335").unwrap(),
            interest_rate: Rate::from_percentage(10),
            term_weeks: 50,
            amount_scale: 2,
        };

        let err = OriginationGate::new(&store, &ids, &policy, &time).execute(1).unwrap_err();
        assert!(matches!(err, BillingError::AmountOverflow { loan_id: 1000 }));
        assert!(store.find_loan(1000).unwrap().is_none());
        assert!(!store.has_disbursed_loan(1).unwrap());
    }
}
