use std::sync::Arc;

use hourglass_rs::SafeTimeProvider;
use log::{debug, info, warn};

use crate::collections::{refresh_overdue, DelinquencyEvaluator, OutstandingAggregator};
use crate::config::{EngineConfig, LoanPolicy};
use crate::errors::{BillingError, Result};
use crate::ids::{IdGenerator, SnowflakeGenerator};
use crate::origination::OriginationGate;
use crate::payments::{PaymentApplier, PaymentRequest};
use crate::store::{BillingStore, InMemoryStore, SqliteStore};
use crate::types::{Customer, CustomerId, LoanId};
use crate::views::{
    CustomerView, DelinquencyReport, InstallmentView, LoanView, OutstandingSummary,
    PaymentConfirmation,
};

/// entry point for every billing operation
///
/// Holds no mutable state of its own; the store is the single source of truth.
pub struct BillingEngine<S: BillingStore> {
    store: S,
    ids: Arc<dyn IdGenerator>,
    policy: LoanPolicy,
    time: SafeTimeProvider,
}

impl<S: BillingStore> BillingEngine<S> {
    pub fn new(
        store: S,
        ids: Arc<dyn IdGenerator>,
        policy: LoanPolicy,
        time: SafeTimeProvider,
    ) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            store,
            ids,
            policy,
            time,
        })
    }

    /// wire an engine around `store` from configuration
    pub fn with_store(store: S, config: &EngineConfig) -> Result<Self> {
        let time = SafeTimeProvider::new(config.time_source.clone());
        let ids = Arc::new(SnowflakeGenerator::new(config.node_id, time.clone()));
        Self::new(store, ids, config.policy.clone(), time)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &LoanPolicy {
        &self.policy
    }

    pub fn time_provider(&self) -> &SafeTimeProvider {
        &self.time
    }

    // ── customers ───────────────────────────────────────────────

    pub fn create_customer(&self, name: &str, email: &str) -> Result<CustomerView> {
        let name = name.trim();
        let email = email.trim();
        if name.is_empty() {
            return Err(BillingError::validation("name", "is required"));
        }
        if email.is_empty() {
            return Err(BillingError::validation("email", "is required"));
        }
        if !is_valid_email(email) {
            return Err(BillingError::validation("email", "must be a valid email address"));
        }

        let customer = Customer {
            id: self.ids.next_id(),
            name: name.to_string(),
            email: email.to_string(),
        };
        self.store.insert_customer(&customer)?;
        info!("customer {} created", customer.id);

        Ok(CustomerView::from(&customer))
    }

    pub fn list_customers(&self) -> Result<Vec<CustomerView>> {
        let customers = self.store.list_customers()?;
        debug!("listing {} customers", customers.len());
        Ok(customers.iter().map(CustomerView::from).collect())
    }

    // ── loans ───────────────────────────────────────────────────

    pub fn create_loan(&self, customer_id: CustomerId) -> Result<LoanView> {
        require_id("customer_id", customer_id)?;
        OriginationGate::new(&self.store, self.ids.as_ref(), &self.policy, &self.time)
            .execute(customer_id)
    }

    /// installments of a loan in ascending week order, overdue ones marked missed
    pub fn list_installments(&self, loan_id: LoanId) -> Result<Vec<InstallmentView>> {
        require_id("loan_id", loan_id)?;
        self.require_loan(loan_id)?;
        refresh_overdue(&self.store, loan_id, self.today())?;

        let installments = self.store.installments_for_loan(loan_id)?;
        Ok(installments.iter().map(InstallmentView::from).collect())
    }

    // ── payments ────────────────────────────────────────────────

    pub fn make_payment(&self, request: &PaymentRequest) -> Result<PaymentConfirmation> {
        PaymentApplier::new(&self.store, self.ids.as_ref(), &self.time).execute(request)
    }

    // ── collections ─────────────────────────────────────────────

    pub fn check_delinquency(&self, loan_id: LoanId) -> Result<DelinquencyReport> {
        require_id("loan_id", loan_id)?;
        DelinquencyEvaluator::new(&self.store, &self.time).execute(loan_id)
    }

    pub fn get_outstanding(
        &self,
        customer_id: CustomerId,
        loan_id: LoanId,
    ) -> Result<OutstandingSummary> {
        require_id("customer_id", customer_id)?;
        require_id("loan_id", loan_id)?;
        OutstandingAggregator::new(&self.store, &self.time).execute(customer_id, loan_id)
    }

    /// mark every overdue installment of a loan as missed; safe to call on
    /// any schedule, returns how many changed
    pub fn mark_overdue(&self, loan_id: LoanId) -> Result<usize> {
        require_id("loan_id", loan_id)?;
        self.require_loan(loan_id)?;
        refresh_overdue(&self.store, loan_id, self.today())
    }

    fn require_loan(&self, loan_id: LoanId) -> Result<()> {
        if self.store.find_loan(loan_id)?.is_none() {
            warn!("loan {loan_id} not found");
            return Err(BillingError::LoanNotFound { loan_id });
        }
        Ok(())
    }

    fn today(&self) -> chrono::NaiveDate {
        self.time.now().date_naive()
    }
}

impl BillingEngine<InMemoryStore> {
    pub fn in_memory(config: &EngineConfig) -> Result<Self> {
        Self::with_store(InMemoryStore::new(), config)
    }
}

impl BillingEngine<SqliteStore> {
    /// open the configured sqlite database (in memory when no path is set)
    /// and apply migrations
    pub fn open(config: &EngineConfig) -> Result<Self> {
        let store = match &config.database_path {
            Some(path) => SqliteStore::open(path)?,
            None => SqliteStore::in_memory()?,
        };
        store.migrate()?;
        info!(
            "billing store ready at {}",
            config.database_path.as_deref().unwrap_or(":memory:")
        );
        Self::with_store(store, config)
    }
}

fn require_id(field: &'static str, id: u64) -> Result<()> {
    if id == 0 {
        return Err(BillingError::validation(field, "is required"));
    }
    Ok(())
}

/// `local@domain.tld` with no whitespace and a dotted domain
fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}
