pub mod collections;
pub mod config;
pub mod decimal;
pub mod engine;
pub mod errors;
pub mod ids;
pub mod origination;
pub mod payments;
pub mod schedule;
pub mod store;
pub mod types;
pub mod views;

// re-export key types
pub use collections::{is_delinquent, DelinquencyEvaluator, InstallmentTotals, OutstandingAggregator};
pub use config::{EngineConfig, LoanPolicy};
pub use decimal::{Money, Rate};
pub use engine::BillingEngine;
pub use errors::{BillingError, ErrorKind, Result};
pub use ids::{IdGenerator, SequentialIdGenerator, SnowflakeGenerator};
pub use origination::OriginationGate;
pub use payments::{PaymentApplier, PaymentRequest};
pub use schedule::{InstallmentSchedule, ScheduleGenerator};
pub use store::{BillingStore, InMemoryStore, SqliteStore, StoreError, StoreResult};
pub use types::{
    Customer, CustomerId, Detail, Installment, InstallmentId, InstallmentStatus, Loan, LoanId,
    LoanStatus, Payment, PaymentId,
};
pub use views::{
    CustomerView, DelinquencyReport, InstallmentView, JsonView, LoanView, MissedSummary,
    OutstandingSummary, PaymentConfirmation,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
