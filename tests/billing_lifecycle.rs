//! End-to-end billing flows against both store backends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use loan_billing::{
    BillingEngine, BillingError, BillingStore, Customer, CustomerId, Detail, InMemoryStore,
    Installment, InstallmentId, InstallmentStatus, JsonView, Loan, LoanId, LoanPolicy,
    LoanStatus, Money, Payment, PaymentRequest, SafeTimeProvider, SequentialIdGenerator,
    SqliteStore, StoreError, StoreResult, TimeSource,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn test_time() -> SafeTimeProvider {
    SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
    ))
}

fn build<S: BillingStore>(store: S) -> BillingEngine<S> {
    init_logging();
    BillingEngine::new(
        store,
        Arc::new(SequentialIdGenerator::new()),
        LoanPolicy::standard(),
        test_time(),
    )
    .expect("standard policy is valid")
}

fn sqlite() -> SqliteStore {
    let store = SqliteStore::in_memory().expect("open sqlite");
    store.migrate().expect("migrate");
    store
}

fn pay<S: BillingStore>(
    engine: &BillingEngine<S>,
    customer_id: CustomerId,
    loan_id: LoanId,
    week: u32,
    amount: &str,
) -> loan_billing::Result<loan_billing::PaymentConfirmation> {
    engine.make_payment(&PaymentRequest::new(customer_id, loan_id, week, amount))
}

// ── full lifecycle ──────────────────────────────────────────────

fn full_payoff<S: BillingStore>(engine: BillingEngine<S>) {
    let customer = engine.create_customer("Siti", "siti@example.com").unwrap();
    let loan = engine.create_loan(customer.id).unwrap();
    assert!(loan.schedule_created);

    let err = engine.create_loan(customer.id).unwrap_err();
    assert_eq!(err.to_string(), "customer has non paid loan");

    let schedule = engine.list_installments(loan.id).unwrap();
    assert_eq!(schedule.len(), 50);
    assert_eq!(schedule[0].due_date, NaiveDate::from_ymd_opt(2024, 1, 8).unwrap());
    assert_eq!(schedule[49].due_date, NaiveDate::from_ymd_opt(2024, 12, 16).unwrap());

    // pay every week on its due date
    let control = engine.time_provider().test_control().unwrap();
    for week in 1..=50u32 {
        control.advance(Duration::days(7));
        let confirmation = pay(&engine, customer.id, loan.id, week, "110000").unwrap();

        let expected_outstanding = Money::from_major(110_000 * i64::from(50 - week));
        assert_eq!(confirmation.outstanding, Detail::Available(expected_outstanding));
        if week < 50 {
            assert_eq!(confirmation.loan_status, LoanStatus::Disbursed);
        } else {
            assert_eq!(confirmation.loan_status, LoanStatus::Paid);
            assert_eq!(confirmation.message, "Payment processed successfully");
        }
    }

    let summary = engine.get_outstanding(customer.id, loan.id).unwrap();
    assert_eq!(summary.total_outstanding, Money::ZERO);
    assert_eq!(summary.total_paid, Money::from_major(5_500_000));
    assert!(!engine.check_delinquency(loan.id).unwrap().is_delinquent);

    // paid stays paid, and the customer may borrow again
    let err = pay(&engine, customer.id, loan.id, 50, "110000").unwrap_err();
    assert!(matches!(err, BillingError::AlreadyPaid { week_number: 50, .. }));
    let next = engine.create_loan(customer.id).unwrap();
    assert_ne!(next.id, loan.id);
    assert_eq!(
        engine.store().find_loan(loan.id).unwrap().unwrap().status,
        LoanStatus::Paid
    );
}

#[test]
fn full_payoff_in_memory() {
    full_payoff(build(InMemoryStore::new()));
}

#[test]
fn full_payoff_sqlite() {
    full_payoff(build(sqlite()));
}

// ── collections ─────────────────────────────────────────────────

fn missed_payments_become_delinquent<S: BillingStore>(engine: BillingEngine<S>) {
    let customer = engine.create_customer("Tono", "tono@example.com").unwrap();
    let loan = engine.create_loan(customer.id).unwrap();
    let control = engine.time_provider().test_control().unwrap();

    // week 1 paid, week 2 lapses
    pay(&engine, customer.id, loan.id, 1, "110000").unwrap();
    control.advance(Duration::days(16));
    let report = engine.check_delinquency(loan.id).unwrap();
    assert!(!report.is_delinquent);
    assert_eq!(report.message, "Customer is not delinquent");

    // week 3 lapses too
    control.advance(Duration::days(7));
    let report = engine.check_delinquency(loan.id).unwrap();
    assert!(report.is_delinquent);
    assert_eq!(
        report.message,
        "Customer is delinquent - has 2 or more consecutive missed payments"
    );
    assert_eq!(report.details.available().unwrap().missed_weeks, vec![2, 3]);

    let summary = engine.get_outstanding(customer.id, loan.id).unwrap();
    assert_eq!(summary.total_paid, Money::from_major(110_000));
    assert_eq!(summary.total_missed, Money::from_major(220_000));
    assert_eq!(summary.total_pending, Money::from_major(110_000 * 47));
    assert_eq!(
        summary.total_paid + summary.total_outstanding,
        Money::from_major(5_500_000)
    );

    // settling week 3 leaves the single miss at week 2
    pay(&engine, customer.id, loan.id, 3, "110000").unwrap();
    assert!(!engine.check_delinquency(loan.id).unwrap().is_delinquent);

    let json = engine.get_outstanding(customer.id, loan.id).unwrap().to_json_pretty().unwrap();
    assert!(json.contains("\"total_missed\": \"110000\""));
}

#[test]
fn missed_payments_become_delinquent_in_memory() {
    missed_payments_become_delinquent(build(InMemoryStore::new()));
}

#[test]
fn missed_payments_become_delinquent_sqlite() {
    missed_payments_become_delinquent(build(sqlite()));
}

#[test]
fn unknown_loan_has_no_delinquency_verdict() {
    let engine = build(InMemoryStore::new());
    let err = engine.check_delinquency(77).unwrap_err();
    assert_eq!(err.to_string(), "loan not found");
    assert!(!err.is_validation());
}

#[test]
fn sqlite_refuses_ids_it_cannot_store() {
    init_logging();
    let engine = BillingEngine::new(
        sqlite(),
        Arc::new(SequentialIdGenerator::starting_at(1 << 63)),
        LoanPolicy::standard(),
        test_time(),
    )
    .unwrap();

    let err = engine.create_customer("Rina", "rina@example.com").unwrap_err();
    assert!(matches!(
        err,
        BillingError::Persistence(StoreError::IdOutOfRange(9_223_372_036_854_775_808))
    ));
    assert!(engine.list_customers().unwrap().is_empty());
}

// ── degraded and failing store ──────────────────────────────────

/// store wrapper that fails selected operations on demand
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryStore,
    fail_history: AtomicBool,
    fail_status_updates: AtomicBool,
}

impl FlakyStore {
    fn offline(&self, flag: &AtomicBool) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("connection reset".to_string()));
        }
        Ok(())
    }
}

impl BillingStore for FlakyStore {
    fn insert_customer(&self, customer: &Customer) -> StoreResult<()> {
        self.inner.insert_customer(customer)
    }

    fn list_customers(&self) -> StoreResult<Vec<Customer>> {
        self.inner.list_customers()
    }

    fn find_customer(&self, id: CustomerId) -> StoreResult<Option<Customer>> {
        self.inner.find_customer(id)
    }

    fn insert_loan(&self, loan: &Loan) -> StoreResult<()> {
        self.inner.insert_loan(loan)
    }

    fn find_loan(&self, id: LoanId) -> StoreResult<Option<Loan>> {
        self.inner.find_loan(id)
    }

    fn has_disbursed_loan(&self, customer_id: CustomerId) -> StoreResult<bool> {
        self.inner.has_disbursed_loan(customer_id)
    }

    fn update_loan_status(&self, id: LoanId, status: LoanStatus) -> StoreResult<()> {
        self.inner.update_loan_status(id, status)
    }

    fn insert_installments(&self, installments: &[Installment]) -> StoreResult<()> {
        self.inner.insert_installments(installments)
    }

    fn installments_for_loan(&self, loan_id: LoanId) -> StoreResult<Vec<Installment>> {
        self.offline(&self.fail_history)?;
        self.inner.installments_for_loan(loan_id)
    }

    fn find_installment(&self, loan_id: LoanId, week_number: u32) -> StoreResult<Option<Installment>> {
        self.inner.find_installment(loan_id, week_number)
    }

    fn update_installment_status(
        &self,
        id: InstallmentId,
        status: InstallmentStatus,
    ) -> StoreResult<()> {
        self.offline(&self.fail_status_updates)?;
        self.inner.update_installment_status(id, status)
    }

    fn latest_missed_weeks(&self, loan_id: LoanId, limit: usize) -> StoreResult<Vec<u32>> {
        self.inner.latest_missed_weeks(loan_id, limit)
    }

    fn count_unpaid_installments(&self, loan_id: LoanId) -> StoreResult<u32> {
        self.inner.count_unpaid_installments(loan_id)
    }

    fn mark_overdue_installments(&self, loan_id: LoanId, as_of: NaiveDate) -> StoreResult<usize> {
        self.inner.mark_overdue_installments(loan_id, as_of)
    }

    fn insert_payment(&self, payment: &Payment) -> StoreResult<()> {
        self.inner.insert_payment(payment)
    }

    fn find_payment_for_installment(
        &self,
        installment_id: InstallmentId,
    ) -> StoreResult<Option<Payment>> {
        self.inner.find_payment_for_installment(installment_id)
    }

    fn unit_of_work<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.inner.unit_of_work(|_| work(self))
    }
}

#[test]
fn payment_survives_unavailable_outstanding() {
    let engine = build(FlakyStore::default());
    let customer = engine.create_customer("Umar", "umar@example.com").unwrap();
    let loan = engine.create_loan(customer.id).unwrap();

    engine.store().fail_history.store(true, Ordering::SeqCst);
    let confirmation = pay(&engine, customer.id, loan.id, 1, "110000").unwrap();
    assert!(confirmation.outstanding.is_degraded());
    assert_eq!(confirmation.message, "Payment processed successfully");

    let installment = engine.store().find_installment(loan.id, 1).unwrap().unwrap();
    assert_eq!(installment.status, InstallmentStatus::Paid);
}

#[test]
fn delinquency_verdict_survives_unavailable_history() {
    let engine = build(FlakyStore::default());
    let customer = engine.create_customer("Vina", "vina@example.com").unwrap();
    let loan = engine.create_loan(customer.id).unwrap();
    engine.time_provider().test_control().unwrap().advance(Duration::days(20));

    engine.store().fail_history.store(true, Ordering::SeqCst);
    let report = engine.check_delinquency(loan.id).unwrap();
    assert!(report.is_delinquent);
    match report.details {
        Detail::Degraded { reason } => assert!(reason.contains("connection reset")),
        other => panic!("expected degraded detail, got {other:?}"),
    }
}

#[test]
fn failed_payment_write_rolls_back() {
    let engine = build(FlakyStore::default());
    let customer = engine.create_customer("Wati", "wati@example.com").unwrap();
    let loan = engine.create_loan(customer.id).unwrap();
    let installment = engine.store().find_installment(loan.id, 1).unwrap().unwrap();

    engine.store().fail_status_updates.store(true, Ordering::SeqCst);
    let err = pay(&engine, customer.id, loan.id, 1, "110000").unwrap_err();
    assert!(matches!(err, BillingError::Persistence(StoreError::Backend(_))));
    assert!(engine
        .store()
        .find_payment_for_installment(installment.id)
        .unwrap()
        .is_none());

    // once the store recovers the same payment goes through
    engine.store().fail_status_updates.store(false, Ordering::SeqCst);
    pay(&engine, customer.id, loan.id, 1, "110000").unwrap();
}

// ── file-backed sqlite ──────────────────────────────────────────

#[test]
fn sqlite_file_persists_across_engines() {
    init_logging();
    let path = std::env::temp_dir().join(format!("loan-billing-it-{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let config = loan_billing::EngineConfig::new(LoanPolicy::standard())
        .with_time_source(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()));
    let config = loan_billing::EngineConfig {
        database_path: Some(path.to_string_lossy().to_string()),
        ..config
    };

    let (customer_id, loan_id) = {
        let engine = BillingEngine::open(&config).unwrap();
        let customer = engine.create_customer("Yudi", "yudi@example.com").unwrap();
        let loan = engine.create_loan(customer.id).unwrap();
        pay(&engine, customer.id, loan.id, 1, "110000").unwrap();
        (customer.id, loan.id)
    };

    let engine = BillingEngine::open(&config).unwrap();
    assert_eq!(engine.list_customers().unwrap().len(), 1);
    let err = engine.create_loan(customer_id).unwrap_err();
    assert!(matches!(err, BillingError::ActiveLoanExists { .. }));

    let summary = engine.get_outstanding(customer_id, loan_id).unwrap();
    assert_eq!(summary.total_paid, Money::from_major(110_000));
    assert_eq!(summary.installments[0].status, InstallmentStatus::Paid);

    drop(engine);
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
    }
}
