pub mod applier;

use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::types::{CustomerId, LoanId};

pub use applier::PaymentApplier;

/// payment request for one installment
///
/// The amount stays a string: it must match the installment's amount due
/// character for character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub customer_id: CustomerId,
    pub loan_id: LoanId,
    pub week_number: u32,
    pub amount: String,
}

impl PaymentRequest {
    pub fn new(
        customer_id: CustomerId,
        loan_id: LoanId,
        week_number: u32,
        amount: impl Into<String>,
    ) -> Self {
        Self {
            customer_id,
            loan_id,
            week_number,
            amount: amount.into(),
        }
    }

    /// reject malformed input before any lookup happens
    pub fn validate(&self) -> Result<Money> {
        if self.customer_id == 0 {
            return Err(BillingError::validation("customer_id", "is required"));
        }
        if self.loan_id == 0 {
            return Err(BillingError::validation("loan_id", "is required"));
        }
        if self.week_number == 0 {
            return Err(BillingError::validation("week_number", "must be at least 1"));
        }
        if self.amount.trim().is_empty() {
            return Err(BillingError::validation("amount", "is required"));
        }

        let amount = Money::from_str_exact(&self.amount)
            .map_err(|_| BillingError::validation("amount", "must be a decimal number"))?;
        if !amount.is_positive() {
            return Err(BillingError::validation("amount", "must be positive"));
        }
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_request() {
        let amount = PaymentRequest::new(1, 2, 3, "110000").validate().unwrap();
        assert_eq!(amount, Money::from_major(110_000));
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            (PaymentRequest::new(0, 2, 3, "1"), "customer_id"),
            (PaymentRequest::new(1, 0, 3, "1"), "loan_id"),
            (PaymentRequest::new(1, 2, 0, "1"), "week_number"),
            (PaymentRequest::new(1, 2, 3, "  "), "amount"),
            (PaymentRequest::new(1, 2, 3, "abc"), "amount"),
            (PaymentRequest::new(1, 2, 3, "-5"), "amount"),
            (PaymentRequest::new(1, 2, 3, "0"), "amount"),
        ];

        for (request, expected_field) in cases {
            match request.validate() {
                Err(BillingError::Validation { field, .. }) => assert_eq!(field, expected_field),
                other => panic!("expected validation error on {expected_field}, got {other:?}"),
            }
        }
    }
}
