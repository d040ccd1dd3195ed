//! quick start - originate the standard loan and pay its first week

use loan_billing::chrono::{TimeZone, Utc};
use loan_billing::{BillingEngine, EngineConfig, JsonView, LoanPolicy, PaymentRequest, TimeSource};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 5,000,000 over 50 weeks at a flat 10%, on a frozen clock
    let config = EngineConfig::new(LoanPolicy::standard()).with_time_source(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
    ));
    let engine = BillingEngine::in_memory(&config)?;

    let customer = engine.create_customer("John Doe", "john.doe@example.com")?;
    let loan = engine.create_loan(customer.id)?;
    println!("{}", loan.to_json_pretty()?);

    let first_week = &engine.list_installments(loan.id)?[0];
    println!(
        "week {} due {}: {}",
        first_week.week_number, first_week.due_date, first_week.amount_due
    );

    // the amount must match the amount due exactly
    let confirmation = engine.make_payment(&PaymentRequest::new(
        customer.id,
        loan.id,
        first_week.week_number,
        first_week.amount_due.to_string(),
    ))?;
    println!("{}", confirmation.message);

    Ok(())
}
