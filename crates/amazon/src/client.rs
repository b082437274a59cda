use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use ynamazon_core::{Item, Order, OtpPrompt, RetailSource, RetailTransaction, SourceError};

use crate::parse;
use crate::session::AmazonSession;

pub const DEFAULT_BASE_URL: &str = "https://www.amazon.com";

const TRANSACTIONS_PATH: &str = "/cpe/yourpayments/transactions";

/// Upper bound on followed "next" links per listing.
const MAX_PAGES: usize = 100;

#[derive(Debug, Clone)]
pub struct AmazonConfig {
    pub username: String,
    pub password: String,
    pub base_url: String,
    /// Sign out (and drop the saved session) before signing in.
    pub force_logout: bool,
    /// Directory holding one saved session per account; `None` keeps cookies in memory only.
    pub session_dir: Option<PathBuf>,
}

impl AmazonConfig {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            force_logout: false,
            session_dir: None,
        }
    }
}

/// Where the cookies of `username` are kept inside `dir`.
pub fn session_file(dir: &Path, username: &str) -> PathBuf {
    let key: String = username
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    dir.join(format!("amazon-session-{key}.json"))
}

/// Signed-in scraping client for orders, order details and payments.
pub struct AmazonClient {
    session: AmazonSession,
    max_pages: usize,
}

impl AmazonClient {
    pub async fn connect(config: &AmazonConfig, otp: &dyn OtpPrompt) -> Result<Self, SourceError> {
        let file = config
            .session_dir
            .as_deref()
            .map(|dir| session_file(dir, &config.username));
        let mut session = AmazonSession::new(&config.base_url, file)?;
        if config.force_logout {
            session.logout().await?;
        }
        session.login(&config.username, &config.password, otp).await?;
        Ok(Self {
            session,
            max_pages: MAX_PAGES,
        })
    }

    fn ensure_signed_in(&self) -> Result<(), SourceError> {
        if self.session.is_authenticated() {
            Ok(())
        } else {
            Err(SourceError::Authentication("not signed in to Amazon".to_string()))
        }
    }
}

#[async_trait]
impl RetailSource for AmazonClient {
    async fn fetch_orders(&self, year: i32) -> Result<Vec<Order>, SourceError> {
        self.ensure_signed_in()?;
        let mut url = self
            .session
            .url(&format!("/your-orders/orders?timeFilter=year-{year}&startIndex=0"))?;
        let mut orders = Vec::new();
        let mut pages = 0;

        loop {
            let page = self.session.get_signed_in(url).await?;
            pages += 1;
            let parsed = parse::parse_order_history(&page.body, &page.url);
            tracing::debug!("Order history {year}: {} order(s) on page", parsed.orders.len());
            orders.extend(parsed.orders);
            let Some(next) = parsed.next_page else {
                break;
            };
            if pages == self.max_pages {
                tracing::warn!("Stopped reading {year} order history after {pages} pages; older orders are missing");
                break;
            }
            url = next;
        }

        tracing::info!("Fetched {} Amazon order(s) for {year}", orders.len());
        Ok(orders)
    }

    async fn fetch_order_items(&self, order: &Order) -> Result<Vec<Item>, SourceError> {
        self.ensure_signed_in()?;
        let url = match order.details_link.as_deref() {
            Some(link) => self.session.url(link)?,
            None => self
                .session
                .url(&format!("/gp/your-account/order-details?orderID={}", order.number))?,
        };
        let page = self.session.get_signed_in(url).await?;
        let items = parse::parse_order_items(&page.body, &page.url);
        if items.is_empty() {
            return Err(SourceError::Parse(format!("no items on details page of order {}", order.number)));
        }
        Ok(items)
    }

    async fn fetch_transactions(&self, since: NaiveDate) -> Result<Vec<RetailTransaction>, SourceError> {
        self.ensure_signed_in()?;
        let mut page = self.session.get_signed_in(self.session.url(TRANSACTIONS_PATH)?).await?;
        let mut transactions = Vec::new();
        let mut pages = 1;

        loop {
            let parsed = parse::parse_transactions(&page.body, &page.url);
            transactions.extend(parsed.transactions.into_iter().filter(|t| t.completed_date >= since));

            let reached_start = parsed.oldest.is_some_and(|oldest| oldest < since);
            let Some(form) = parsed.next_page.filter(|_| !reached_start) else {
                break;
            };
            if pages == self.max_pages {
                tracing::warn!("Stopped reading payments after {pages} pages; transactions before {since} may be missing");
                break;
            }
            page = self.session.submit(&page.url, &form).await?;
            pages += 1;
        }

        tracing::info!("Fetched {} Amazon transaction(s) since {since}", transactions.len());
        Ok(transactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Query, State};
    use axum::response::{Html, Redirect};
    use axum::routing::get;
    use axum::Router;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use ynamazon_core::{Money, NoOtp};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    async fn sign_in_page() -> Html<&'static str> {
        Html(r#"<a id="nav-item-signout" href="/gp/flex/sign-out.html">Sign Out</a>"#)
    }

    fn order_card(number: &str, date: &str, total: &str) -> String {
        format!(
            r#"<div class="order-card">
                 <li class="order-header__header-list-item"><span class="a-text-caps">Order placed</span><span class="a-size-base">{date}</span></li>
                 <li class="order-header__header-list-item"><span class="a-text-caps">Total</span><span class="a-size-base">{total}</span></li>
                 <div class="yohtmlc-order-id"><span dir="ltr">{number}</span></div>
                 <a href="/gp/your-account/order-details?orderID={number}">View order details</a>
                 <div class="yohtmlc-product-title"><a href="/dp/B0{number}">Item of {number}</a></div>
               </div>"#
        )
    }

    async fn orders(Query(q): Query<HashMap<String, String>>) -> Html<String> {
        let start = q.get("startIndex").map(String::as_str).unwrap_or("0");
        let year = q.get("timeFilter").cloned().unwrap_or_default();
        assert_eq!(year, "year-2024");
        let body = if start == "0" {
            format!(
                "{}<ul class=\"a-pagination\"><li class=\"a-last\"><a href=\"/your-orders/orders?timeFilter=year-2024&startIndex=10\">Next</a></li></ul>",
                order_card("113-0000000-0000001", "June 1, 2024", "$42.00")
            )
        } else {
            format!(
                "{}<ul class=\"a-pagination\"><li class=\"a-last a-disabled\">Next</li></ul>",
                order_card("113-0000000-0000002", "May 20, 2024", "$35.00")
            )
        };
        Html(body)
    }

    async fn details() -> Html<&'static str> {
        Html(
            r#"<div class="yohtmlc-item">
                 <div class="yohtmlc-product-title"><a href="/dp/B01">Lamp</a></div>
                 <span class="item-view-qty">3</span>
                 <span class="a-color-price">$14.00</span>
               </div>"#,
        )
    }

    fn transactions_page(date: &str, number: &str, amount: &str, next: bool) -> String {
        let pager = if next {
            r#"<input type="submit" name="ppw-widgetEvent:DefaultNextPageNavigationEvent:{}">"#
        } else {
            ""
        };
        format!(
            r#"<form method="post" action="/cpe/yourpayments/transactions">
                 <input type="hidden" name="ppw-widgetState" value="s">
                 <div class="apx-transaction-date-container"><span>{date}</span></div>
                 <div class="apx-transactions-line-item-component-container">
                   <div class="a-span3"><span class="a-size-base-plus">{amount}</span></div>
                   <a href="/gp/css/summary/edit.html?orderID={number}">Order #{number}</a>
                 </div>
                 {pager}
               </form>"#
        )
    }

    async fn transactions_first() -> Html<String> {
        Html(transactions_page("June 2, 2024", "113-0000000-0000001", "-$42.00", true))
    }

    async fn transactions_next(State(posts): State<Arc<AtomicUsize>>) -> Html<String> {
        let n = posts.fetch_add(1, Ordering::SeqCst);
        let body = match n {
            0 => transactions_page("May 25, 2024", "113-0000000-0000002", "-$35.00", true),
            _ => transactions_page("April 1, 2024", "113-0000000-0000003", "-$9.00", true),
        };
        Html(body)
    }

    async fn serve() -> (String, Arc<AtomicUsize>) {
        let posts = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/ap/signin", get(sign_in_page))
            .route("/your-orders/orders", get(orders))
            .route("/gp/your-account/order-details", get(details))
            .route(
                "/cpe/yourpayments/transactions",
                get(transactions_first).post(transactions_next),
            )
            .with_state(posts.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        (format!("http://{addr}"), posts)
    }

    async fn connect(base: &str) -> AmazonClient {
        let config = AmazonConfig {
            base_url: base.to_string(),
            ..AmazonConfig::new("me@example.com", "hunter2")
        };
        AmazonClient::connect(&config, &NoOtp).await.unwrap()
    }

    #[tokio::test]
    async fn follows_order_history_pages() {
        let (base, _) = serve().await;
        let client = connect(&base).await;
        let orders = client.fetch_orders(2024).await.unwrap();
        let numbers: Vec<&str> = orders.iter().map(|o| o.number.as_str()).collect();
        assert_eq!(numbers, vec!["113-0000000-0000001", "113-0000000-0000002"]);
        assert_eq!(orders[1].grand_total, Money::from_cents(3500));
    }

    #[tokio::test]
    async fn order_items_come_from_details_page() {
        let (base, _) = serve().await;
        let client = connect(&base).await;
        let orders = client.fetch_orders(2024).await.unwrap();
        let items = client.fetch_order_items(&orders[0]).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Lamp");
        assert_eq!(items[0].quantity, Some(3));
        assert_eq!(items[0].price, Some(Money::from_cents(1400)));
    }

    #[tokio::test]
    async fn transactions_stop_once_window_start_is_passed() {
        let (base, posts) = serve().await;
        let client = connect(&base).await;
        let txs = client.fetch_transactions(d(2024, 5, 1)).await.unwrap();

        let numbers: Vec<&str> = txs.iter().map(|t| t.order_number.as_str()).collect();
        assert_eq!(numbers, vec!["113-0000000-0000001", "113-0000000-0000002"]);
        assert_eq!(posts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn page_limit_truncates_listings() {
        let (base, posts) = serve().await;
        let mut client = connect(&base).await;
        client.max_pages = 1;

        let orders = client.fetch_orders(2024).await.unwrap();
        assert_eq!(orders.len(), 1);

        let txs = client.fetch_transactions(d(2024, 5, 1)).await.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(posts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn bounce_to_sign_in_is_an_expired_session() {
        let app = Router::new()
            .route("/ap/signin", get(sign_in_page))
            .route("/your-orders/orders", get(|| async { Redirect::to("/ap/signin?expired=1") }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        let client = connect(&format!("http://{addr}")).await;
        let err = client.fetch_orders(2024).await.unwrap_err();
        assert!(matches!(err, SourceError::Authentication(ref m) if m.contains("expired")), "{err:?}");
    }

    #[test]
    fn session_files_are_keyed_by_account() {
        let dir = Path::new("/tmp/yna");
        assert_eq!(
            session_file(dir, "Me@Example.com"),
            dir.join("amazon-session-me_example_com.json")
        );
        assert_ne!(session_file(dir, "a@example.com"), session_file(dir, "b@example.com"));
    }
}
