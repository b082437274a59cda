//! Wire types of the YNAB v1 API, limited to the fields this tool reads or writes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ynamazon_core::{BudgetTransaction, Payee, TransactionUpdate};

#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub struct PayeesData {
    pub payees: Vec<PayeeDto>,
}

#[derive(Debug, Deserialize)]
pub struct PayeeDto {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub deleted: bool,
}

impl From<PayeeDto> for Payee {
    fn from(p: PayeeDto) -> Self {
        Payee {
            id: p.id,
            name: p.name,
            deleted: p.deleted,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TransactionsData {
    pub transactions: Vec<HybridTransactionDto>,
}

/// Shape returned by the per-payee transactions endpoint.
#[derive(Debug, Deserialize)]
pub struct HybridTransactionDto {
    pub id: String,
    pub date: NaiveDate,
    pub amount: i64,
    pub memo: Option<String>,
    pub account_id: String,
    pub payee_id: Option<String>,
    pub payee_name: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

impl From<HybridTransactionDto> for BudgetTransaction {
    fn from(t: HybridTransactionDto) -> Self {
        BudgetTransaction {
            id: t.id,
            account_id: t.account_id,
            date: t.date,
            amount_milliunits: t.amount,
            payee_id: t.payee_id,
            payee_name: t.payee_name,
            memo: t.memo.filter(|m| !m.is_empty()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PutTransactionWrapper<'a> {
    pub transaction: ExistingTransactionDto<'a>,
}

#[derive(Debug, Serialize)]
pub struct ExistingTransactionDto<'a> {
    pub account_id: &'a str,
    pub date: NaiveDate,
    pub amount: i64,
    pub payee_id: &'a str,
    pub memo: &'a str,
}

impl<'a> From<&'a TransactionUpdate> for PutTransactionWrapper<'a> {
    fn from(u: &'a TransactionUpdate) -> Self {
        PutTransactionWrapper {
            transaction: ExistingTransactionDto {
                account_id: &u.account_id,
                date: u.date,
                amount: u.amount_milliunits,
                payee_id: &u.payee_id,
                memo: &u.memo,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    pub id: String,
    pub name: String,
    pub detail: String,
}
