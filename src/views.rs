//! Serializable outputs of the billing engine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::types::{
    Customer, CustomerId, Detail, Installment, InstallmentId, InstallmentStatus, Loan, LoanId,
    LoanStatus, Payment, PaymentId,
};

/// pretty json rendering shared by every view
pub trait JsonView: Serialize {
    fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerView {
    pub id: CustomerId,
    pub name: String,
    pub email: String,
}

impl From<&Customer> for CustomerView {
    fn from(customer: &Customer) -> Self {
        CustomerView {
            id: customer.id,
            name: customer.name.clone(),
            email: customer.email.clone(),
        }
    }
}

/// a loan as returned by origination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanView {
    pub id: LoanId,
    pub customer_id: CustomerId,
    pub principal: Money,
    pub interest_rate: Rate,
    pub term_weeks: u32,
    pub start_date: DateTime<Utc>,
    pub status: LoanStatus,
    /// true once the full installment schedule has been persisted
    pub schedule_created: bool,
}

impl LoanView {
    pub fn from_loan(loan: &Loan, schedule_created: bool) -> Self {
        LoanView {
            id: loan.id,
            customer_id: loan.customer_id,
            principal: loan.principal,
            interest_rate: loan.interest_rate,
            term_weeks: loan.term_weeks,
            start_date: loan.start_date,
            status: loan.status,
            schedule_created,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentView {
    pub id: InstallmentId,
    pub loan_id: LoanId,
    pub week_number: u32,
    pub due_date: NaiveDate,
    pub amount_due: Money,
    pub status: InstallmentStatus,
}

impl From<&Installment> for InstallmentView {
    fn from(installment: &Installment) -> Self {
        InstallmentView {
            id: installment.id,
            loan_id: installment.loan_id,
            week_number: installment.week_number,
            due_date: installment.due_date,
            amount_due: installment.amount_due,
            status: installment.status,
        }
    }
}

/// result of a successful payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub payment_id: PaymentId,
    pub customer_id: CustomerId,
    pub loan_id: LoanId,
    pub installment_id: InstallmentId,
    pub week_number: u32,
    pub amount_paid: Money,
    pub paid_at: DateTime<Utc>,
    pub loan_status: LoanStatus,
    /// balance still owed after this payment; degraded when it could not be read
    pub outstanding: Detail<Money>,
    pub message: String,
}

impl PaymentConfirmation {
    pub fn from_payment(
        payment: &Payment,
        customer_id: CustomerId,
        installment: &Installment,
        loan_status: LoanStatus,
        outstanding: Detail<Money>,
    ) -> Self {
        let message = match outstanding.available() {
            Some(amount) if !amount.is_zero() => {
                format!("Payment processed successfully. Outstanding amount: {amount}")
            }
            _ => "Payment processed successfully".to_string(),
        };

        PaymentConfirmation {
            payment_id: payment.id,
            customer_id,
            loan_id: installment.loan_id,
            installment_id: payment.installment_id,
            week_number: installment.week_number,
            amount_paid: payment.amount_paid,
            paid_at: payment.paid_at,
            loan_status,
            outstanding,
            message,
        }
    }
}

/// missed-payment history behind a delinquency verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissedSummary {
    /// ascending
    pub missed_weeks: Vec<u32>,
    pub total_missed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelinquencyReport {
    pub loan_id: LoanId,
    pub is_delinquent: bool,
    pub message: String,
    pub details: Detail<MissedSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutstandingSummary {
    pub customer_id: CustomerId,
    pub loan_id: LoanId,
    /// pending plus missed
    pub total_outstanding: Money,
    pub total_paid: Money,
    pub total_missed: Money,
    pub total_pending: Money,
    /// ascending by week
    pub installments: Vec<InstallmentView>,
}

impl JsonView for CustomerView {}
impl JsonView for LoanView {}
impl JsonView for InstallmentView {}
impl JsonView for PaymentConfirmation {}
impl JsonView for DelinquencyReport {}
impl JsonView for OutstandingSummary {}
