pub mod budget;
pub mod error;
pub mod money;
pub mod order;
pub mod source;

pub use budget::{find_payee_by_name, BudgetTransaction, Payee, TransactionUpdate};
pub use error::SourceError;
pub use money::{Money, ParseMoneyError};
pub use order::{group_by_order, Item, Order, OrderedTransaction, RetailTransaction};
pub use source::{BudgetSource, FixedOtp, NoOtp, OtpPrompt, RetailSource};
