pub mod client;
pub mod fetch;
pub mod parse;
pub mod session;

pub use client::{session_file, AmazonClient, AmazonConfig, DEFAULT_BASE_URL};
pub use fetch::{fetch_ordered_transactions, normalize_year, order_years, window_start, FetchOptions};
pub use session::AmazonSession;
