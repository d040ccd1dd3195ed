use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{ffi, params, Connection, ErrorCode, OptionalExtension};

use super::{BillingStore, StoreError, StoreResult};
use crate::decimal::{Money, Rate};
use crate::types::{
    Customer, CustomerId, Installment, InstallmentId, InstallmentStatus, Loan, LoanId,
    LoanStatus, Payment,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

const INSTALLMENT_COLUMNS: &str = "id, loan_id, week_number, due_date, amount_due, status";

/// sqlite-backed store
///
/// A connection is not shareable across threads; open one store per worker.
pub struct SqliteStore {
    conn: Connection,
    path: Option<String>,
}

impl SqliteStore {
    /// open (or create) the database at `path`
    pub fn open(path: &str) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        // WAL is ignored by :memory: databases, so its result is not checked
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// open an in-memory database (used in tests)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// another connection to the same file; in-memory stores get a fresh,
    /// isolated database
    pub fn reopen(&self) -> StoreResult<Self> {
        let store = match &self.path {
            Some(p) => Self::open(p)?,
            None => Self::in_memory()?,
        };
        store.migrate()?;
        Ok(store)
    }

    /// apply schema migrations in order
    pub fn migrate(&self) -> StoreResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_billing.sql"))?;
        Ok(())
    }

    fn map_installment(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawInstallment> {
        Ok(RawInstallment {
            id: row.get(0)?,
            loan_id: row.get(1)?,
            week_number: row.get(2)?,
            due_date: row.get(3)?,
            amount_due: row.get(4)?,
            status: row.get(5)?,
        })
    }
}

/// unique and primary-key violations become conflicts, anything else stays a
/// database error
fn classify(err: rusqlite::Error, describe: impl FnOnce() -> String) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &err {
        if failure.code == ErrorCode::ConstraintViolation
            && matches!(
                failure.extended_code,
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            )
        {
            return StoreError::Conflict(describe());
        }
    }
    StoreError::Database(err)
}

fn corrupt(column: &'static str, value: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt {
        column,
        value: value.to_string(),
        message: err.to_string(),
    }
}

fn parse_money(column: &'static str, value: &str) -> StoreResult<Money> {
    Money::from_str_exact(value).map_err(|e| corrupt(column, value, e))
}

fn parse_status<T>(column: &'static str, value: &str) -> StoreResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e| corrupt(column, value, e))
}

fn parse_timestamp(column: &'static str, value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| corrupt(column, value, e))
}

fn parse_id(column: &'static str, value: i64) -> StoreResult<u64> {
    u64::try_from(value).map_err(|e| corrupt(column, &value.to_string(), e))
}

/// sqlite integers are signed, so ids at or above 2^63 are refused before
/// they can wrap
fn to_sql_id(id: u64) -> StoreResult<i64> {
    i64::try_from(id).map_err(|_| StoreError::IdOutOfRange(id))
}

struct RawLoan {
    id: i64,
    customer_id: i64,
    principal: String,
    interest_rate: String,
    term_weeks: i64,
    start_date: String,
    status: String,
}

impl RawLoan {
    fn decode(self) -> StoreResult<Loan> {
        Ok(Loan {
            id: parse_id("loans.id", self.id)?,
            customer_id: parse_id("loans.customer_id", self.customer_id)?,
            principal: parse_money("loans.principal", &self.principal)?,
            interest_rate: Rate::from_str_exact(&self.interest_rate)
                .map_err(|e| corrupt("loans.interest_rate", &self.interest_rate, e))?,
            term_weeks: u32::try_from(self.term_weeks)
                .map_err(|e| corrupt("loans.term_weeks", &self.term_weeks.to_string(), e))?,
            start_date: parse_timestamp("loans.start_date", &self.start_date)?,
            status: parse_status("loans.status", &self.status)?,
        })
    }
}

struct RawInstallment {
    id: i64,
    loan_id: i64,
    week_number: i64,
    due_date: String,
    amount_due: String,
    status: String,
}

impl RawInstallment {
    fn decode(self) -> StoreResult<Installment> {
        Ok(Installment {
            id: parse_id("installments.id", self.id)?,
            loan_id: parse_id("installments.loan_id", self.loan_id)?,
            week_number: u32::try_from(self.week_number).map_err(|e| {
                corrupt("installments.week_number", &self.week_number.to_string(), e)
            })?,
            due_date: NaiveDate::parse_from_str(&self.due_date, DATE_FORMAT)
                .map_err(|e| corrupt("installments.due_date", &self.due_date, e))?,
            amount_due: parse_money("installments.amount_due", &self.amount_due)?,
            status: parse_status("installments.status", &self.status)?,
        })
    }
}

/// rolls the open transaction back unless it was committed
struct TxGuard<'a> {
    conn: &'a Connection,
    finished: bool,
}

impl<'a> TxGuard<'a> {
    fn begin(conn: &'a Connection) -> StoreResult<Self> {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Self {
            conn,
            finished: false,
        })
    }

    fn commit(mut self) -> StoreResult<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for TxGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                log::error!("rollback failed: {e}");
            }
        }
    }
}

impl BillingStore for SqliteStore {
    fn insert_customer(&self, customer: &Customer) -> StoreResult<()> {
        self.conn
            .execute(
                "INSERT INTO customers (id, name, email) VALUES (?1, ?2, ?3)",
                params![to_sql_id(customer.id)?, customer.name, customer.email],
            )
            .map_err(|e| classify(e, || format!("customer {} already exists", customer.id)))?;
        Ok(())
    }

    fn list_customers(&self) -> StoreResult<Vec<Customer>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, email FROM customers ORDER BY id ASC")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, name, email)| {
                Ok(Customer {
                    id: parse_id("customers.id", id)?,
                    name,
                    email,
                })
            })
            .collect()
    }

    fn find_customer(&self, id: CustomerId) -> StoreResult<Option<Customer>> {
        let row = self
            .conn
            .query_row(
                "SELECT name, email FROM customers WHERE id = ?1",
                params![to_sql_id(id)?],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(name, email)| Customer { id, name, email }))
    }

    fn insert_loan(&self, loan: &Loan) -> StoreResult<()> {
        self.conn
            .execute(
                "INSERT INTO loans (id, customer_id, principal, interest_rate, term_weeks, start_date, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    to_sql_id(loan.id)?,
                    to_sql_id(loan.customer_id)?,
                    loan.principal.to_string(),
                    loan.interest_rate.to_string(),
                    i64::from(loan.term_weeks),
                    loan.start_date.to_rfc3339(),
                    loan.status.as_str(),
                ],
            )
            .map_err(|e| {
                classify(e, || {
                    format!(
                        "loan {} rejected: customer {} already has a disbursed loan or the id is taken",
                        loan.id, loan.customer_id
                    )
                })
            })?;
        Ok(())
    }

    fn find_loan(&self, id: LoanId) -> StoreResult<Option<Loan>> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, customer_id, principal, interest_rate, term_weeks, start_date, status
                 FROM loans WHERE id = ?1",
                params![to_sql_id(id)?],
                |row| {
                    Ok(RawLoan {
                        id: row.get(0)?,
                        customer_id: row.get(1)?,
                        principal: row.get(2)?,
                        interest_rate: row.get(3)?,
                        term_weeks: row.get(4)?,
                        start_date: row.get(5)?,
                        status: row.get(6)?,
                    })
                },
            )
            .optional()?;
        raw.map(RawLoan::decode).transpose()
    }

    fn has_disbursed_loan(&self, customer_id: CustomerId) -> StoreResult<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM loans WHERE customer_id = ?1 AND status = 'DISBURSED' LIMIT 1",
                params![to_sql_id(customer_id)?],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn update_loan_status(&self, id: LoanId, status: LoanStatus) -> StoreResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE loans SET status = ?1 WHERE id = ?2",
                params![status.as_str(), to_sql_id(id)?],
            )
            .map_err(|e| classify(e, || format!("loan {id} cannot become {status}")))?;
        if changed == 0 {
            return Err(StoreError::NotFound { entity: "loan", id });
        }
        Ok(())
    }

    fn insert_installments(&self, installments: &[Installment]) -> StoreResult<()> {
        // the savepoint keeps the batch atomic inside or outside a unit of work
        self.conn.execute_batch("SAVEPOINT insert_installments")?;

        let inserted = (|| -> StoreResult<()> {
            let mut stmt = self.conn.prepare(
                "INSERT INTO installments (id, loan_id, week_number, due_date, amount_due, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for installment in installments {
                stmt.execute(params![
                    to_sql_id(installment.id)?,
                    to_sql_id(installment.loan_id)?,
                    i64::from(installment.week_number),
                    installment.due_date.format(DATE_FORMAT).to_string(),
                    installment.amount_due.to_string(),
                    installment.status.as_str(),
                ])
                .map_err(|e| {
                    classify(e, || {
                        format!(
                            "installment {} (loan {} week {}) already exists",
                            installment.id, installment.loan_id, installment.week_number
                        )
                    })
                })?;
            }
            Ok(())
        })();

        match inserted {
            Ok(()) => {
                self.conn.execute_batch("RELEASE insert_installments")?;
                Ok(())
            }
            Err(e) => {
                self.conn.execute_batch(
                    "ROLLBACK TO insert_installments; RELEASE insert_installments",
                )?;
                Err(e)
            }
        }
    }

    fn installments_for_loan(&self, loan_id: LoanId) -> StoreResult<Vec<Installment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INSTALLMENT_COLUMNS} FROM installments
             WHERE loan_id = ?1 ORDER BY week_number ASC"
        ))?;
        let raw = stmt
            .query_map(params![to_sql_id(loan_id)?], Self::map_installment)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawInstallment::decode).collect()
    }

    fn find_installment(&self, loan_id: LoanId, week_number: u32) -> StoreResult<Option<Installment>> {
        let raw = self
            .conn
            .query_row(
                &format!(
                    "SELECT {INSTALLMENT_COLUMNS} FROM installments
                     WHERE loan_id = ?1 AND week_number = ?2"
                ),
                params![to_sql_id(loan_id)?, i64::from(week_number)],
                Self::map_installment,
            )
            .optional()?;
        raw.map(RawInstallment::decode).transpose()
    }

    fn update_installment_status(
        &self,
        id: InstallmentId,
        status: InstallmentStatus,
    ) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE installments SET status = ?1 WHERE id = ?2",
            params![status.as_str(), to_sql_id(id)?],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound { entity: "installment", id });
        }
        Ok(())
    }

    fn latest_missed_weeks(&self, loan_id: LoanId, limit: usize) -> StoreResult<Vec<u32>> {
        let mut stmt = self.conn.prepare(
            "SELECT week_number FROM installments
             WHERE loan_id = ?1 AND status = 'MISSED'
             ORDER BY week_number DESC LIMIT ?2",
        )?;
        let weeks = stmt
            .query_map(params![to_sql_id(loan_id)?, limit as i64], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        weeks
            .into_iter()
            .map(|w| {
                u32::try_from(w).map_err(|e| corrupt("installments.week_number", &w.to_string(), e))
            })
            .collect()
    }

    fn count_unpaid_installments(&self, loan_id: LoanId) -> StoreResult<u32> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM installments WHERE loan_id = ?1 AND status != 'PAID'",
            params![to_sql_id(loan_id)?],
            |row| row.get(0),
        )?;
        u32::try_from(count).map_err(|e| corrupt("installments.count", &count.to_string(), e))
    }

    fn mark_overdue_installments(&self, loan_id: LoanId, as_of: NaiveDate) -> StoreResult<usize> {
        let changed = self.conn.execute(
            "UPDATE installments SET status = 'MISSED'
             WHERE loan_id = ?1 AND status = 'PENDING' AND due_date < ?2",
            params![to_sql_id(loan_id)?, as_of.format(DATE_FORMAT).to_string()],
        )?;
        Ok(changed)
    }

    fn insert_payment(&self, payment: &Payment) -> StoreResult<()> {
        self.conn
            .execute(
                "INSERT INTO payments (id, installment_id, paid_at, amount_paid)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    to_sql_id(payment.id)?,
                    to_sql_id(payment.installment_id)?,
                    payment.paid_at.to_rfc3339(),
                    payment.amount_paid.to_string(),
                ],
            )
            .map_err(|e| {
                classify(e, || {
                    format!("installment {} already has a payment", payment.installment_id)
                })
            })?;
        Ok(())
    }

    fn find_payment_for_installment(
        &self,
        installment_id: InstallmentId,
    ) -> StoreResult<Option<Payment>> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, paid_at, amount_paid FROM payments WHERE installment_id = ?1",
                params![to_sql_id(installment_id)?],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        raw.map(|(id, paid_at, amount_paid)| {
            Ok(Payment {
                id: parse_id("payments.id", id)?,
                installment_id,
                paid_at: parse_timestamp("payments.paid_at", &paid_at)?,
                amount_paid: parse_money("payments.amount_paid", &amount_paid)?,
            })
        })
        .transpose()
    }

    fn unit_of_work<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<StoreError>,
    {
        // IMMEDIATE takes the write lock up front so check-then-write
        // sequences inside `work` cannot interleave with another writer
        let tx = TxGuard::begin(&self.conn).map_err(E::from)?;
        let value = work(self)?;
        tx.commit().map_err(E::from)?;
        Ok(value)
    }
}
