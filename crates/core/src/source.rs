use async_trait::async_trait;
use chrono::NaiveDate;

use crate::budget::{BudgetTransaction, Payee, TransactionUpdate};
use crate::error::SourceError;
use crate::order::{Item, Order, RetailTransaction};

/// Read access to the retail account. Implementations must already be signed in.
#[async_trait]
pub trait RetailSource: Send + Sync {
    /// All orders placed in `year`.
    async fn fetch_orders(&self, year: i32) -> Result<Vec<Order>, SourceError>;

    /// Items of an order with price and quantity filled in where the details
    /// page exposes them.
    async fn fetch_order_items(&self, order: &Order) -> Result<Vec<Item>, SourceError>;

    /// Payment transactions completed on or after `since`.
    async fn fetch_transactions(&self, since: NaiveDate) -> Result<Vec<RetailTransaction>, SourceError>;
}

/// The budgeting service, scoped to one budget.
#[async_trait]
pub trait BudgetSource: Send + Sync {
    async fn payees(&self) -> Result<Vec<Payee>, SourceError>;

    async fn transactions_by_payee(&self, payee_id: &str) -> Result<Vec<BudgetTransaction>, SourceError>;

    async fn update_transaction(&self, update: &TransactionUpdate) -> Result<(), SourceError>;
}

/// Supplies a one-time password when the retail login asks for a second factor.
pub trait OtpPrompt: Send + Sync {
    fn one_time_password(&self) -> Result<String, SourceError>;
}

// ── Fixed prompt (tests and non-interactive use) ─────────────────────────────

/// Always answers with the same code.
pub struct FixedOtp {
    pub code: String,
}

impl FixedOtp {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

impl OtpPrompt for FixedOtp {
    fn one_time_password(&self) -> Result<String, SourceError> {
        Ok(self.code.clone())
    }
}

/// Refuses every second-factor challenge; used when no console is attached.
pub struct NoOtp;

impl OtpPrompt for NoOtp {
    fn one_time_password(&self) -> Result<String, SourceError> {
        Err(SourceError::Authentication(
            "two-factor code required but no prompt is available".to_string(),
        ))
    }
}
