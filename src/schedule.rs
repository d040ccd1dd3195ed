use chrono::{Duration, NaiveDate};

use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::ids::IdGenerator;
use crate::types::{Installment, InstallmentStatus, Loan, LoanId};

const DAYS_PER_WEEK: i64 = 7;

/// weekly installment schedule for one loan
#[derive(Debug, Clone, PartialEq)]
pub struct InstallmentSchedule {
    pub loan_id: LoanId,
    pub installments: Vec<Installment>,
    /// sum of every installment amount
    pub total_due: Money,
}

impl InstallmentSchedule {
    pub fn len(&self) -> usize {
        self.installments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installments.is_empty()
    }

    /// get installment for a specific week
    pub fn week(&self, week_number: u32) -> Option<&Installment> {
        week_number
            .checked_sub(1)
            .and_then(|idx| self.installments.get(idx as usize))
    }

    /// difference between the rounded schedule and `principal * (1 + rate)`
    pub fn rounding_drift(&self, loan: &Loan) -> Result<Money> {
        Ok((self.total_due - loan.total_repayable()?).abs())
    }
}

/// equal weekly installments: `principal * (1 + rate) / term`, rounded to
/// `amount_scale` places
#[derive(Debug, Clone, Copy)]
pub struct ScheduleGenerator {
    amount_scale: u32,
}

impl ScheduleGenerator {
    pub fn new(amount_scale: u32) -> Self {
        Self { amount_scale }
    }

    /// per-week amount for a loan
    pub fn weekly_amount(&self, loan: &Loan) -> Result<Money> {
        loan.total_repayable()?
            .checked_split(loan.term_weeks)
            .map(|amount| amount.round_dp(self.amount_scale))
            .ok_or(BillingError::IncompleteSchedule {
                expected: loan.term_weeks,
                generated: 0,
            })
    }

    /// due date of week `n`: start date plus `7 * n` days, None past the
    /// end of the calendar
    pub fn due_date(start: NaiveDate, week_number: u32) -> Option<NaiveDate> {
        start.checked_add_signed(Duration::days(DAYS_PER_WEEK * i64::from(week_number)))
    }

    /// generate the full schedule; every installment starts PENDING
    pub fn generate(&self, loan: &Loan, ids: &dyn IdGenerator) -> Result<InstallmentSchedule> {
        let amount_due = self.weekly_amount(loan)?;
        let start = loan.start_date.date_naive();

        let mut installments = Vec::with_capacity(loan.term_weeks as usize);
        for week_number in 1..=loan.term_weeks {
            let Some(due_date) = Self::due_date(start, week_number) else {
                break;
            };
            installments.push(Installment {
                id: ids.next_id(),
                loan_id: loan.id,
                week_number,
                due_date,
                amount_due,
                status: InstallmentStatus::Pending,
            });
        }

        if installments.len() != loan.term_weeks as usize {
            return Err(BillingError::IncompleteSchedule {
                expected: loan.term_weeks,
                generated: installments.len(),
            });
        }

        let total_due = installments.iter().map(|i| i.amount_due).sum();

        Ok(InstallmentSchedule {
            loan_id: loan.id,
            installments,
            total_due,
        })
    }
}

impl Default for ScheduleGenerator {
    fn default() -> Self {
        Self::new(2)
    }
}
