//! payoff lifecycle - origination, missed weeks, delinquency, catch-up and settlement

use loan_billing::chrono::{Duration, TimeZone, Utc};
use loan_billing::{
    BillingEngine, EngineConfig, LoanPolicy, LoanStatus, Money, PaymentRequest, Rate, TimeSource,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== loan payoff lifecycle ===\n");

    // a short loan keeps the output readable: 1,000 at 10% over 4 weeks
    let policy = LoanPolicy::new(Money::from_major(1_000), Rate::from_percentage(10), 4)?;
    let config = EngineConfig::new(policy).with_time_source(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    ));
    // no database path, so sqlite runs in memory
    let engine = BillingEngine::open(&config)?;
    let controller = engine.time_provider().test_control().unwrap();

    // 1. origination
    println!("1. origination");
    let customer = engine.create_customer("Siti", "siti@example.com")?;
    let loan = engine.create_loan(customer.id)?;
    println!("  loan {} disbursed on {}", loan.id, loan.start_date.format("%Y-%m-%d"));
    for installment in engine.list_installments(loan.id)? {
        println!(
            "  week {}: {} due {}",
            installment.week_number, installment.amount_due, installment.due_date
        );
    }
    if let Err(e) = engine.create_loan(customer.id) {
        println!("  second loan refused: {e}");
    }

    // 2. two weeks pass without a payment
    println!("\n2. missed weeks");
    controller.advance(Duration::days(16));
    let report = engine.check_delinquency(loan.id)?;
    println!(
        "  {}: delinquent = {}",
        engine.time_provider().now().format("%Y-%m-%d"),
        report.is_delinquent
    );
    println!("  {}", report.message);

    let outstanding = engine.get_outstanding(customer.id, loan.id)?;
    println!(
        "  outstanding {} (missed {}, pending {})",
        outstanding.total_outstanding, outstanding.total_missed, outstanding.total_pending
    );

    // 3. catch up, missed installments can still be paid
    println!("\n3. catch-up and settlement");
    for installment in engine.list_installments(loan.id)? {
        let confirmation = engine.make_payment(&PaymentRequest::new(
            customer.id,
            loan.id,
            installment.week_number,
            installment.amount_due.to_string(),
        ))?;
        println!("  week {}: {}", installment.week_number, confirmation.message);

        if confirmation.loan_status == LoanStatus::Paid {
            println!("  loan {} settled", loan.id);
        }
    }

    let summary = engine.get_outstanding(customer.id, loan.id)?;
    println!("  total paid {}, outstanding {}", summary.total_paid, summary.total_outstanding);

    // 4. a settled customer may borrow again
    println!("\n4. next loan");
    let next = engine.create_loan(customer.id)?;
    println!("  loan {} disbursed", next.id);

    Ok(())
}
