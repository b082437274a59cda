pub mod budget;
pub mod client;
pub mod models;

pub use budget::{fetch_pending, BudgetUpdater, PendingTransactions};
pub use client::{YnabClient, YnabConfig, DEFAULT_BASE_URL};
