//! HTML parsers for the account pages. Everything here is synchronous and
//! works on a `&str`, so no parsed document is ever held across an await.

use chrono::NaiveDate;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;
use ynamazon_core::{Item, Money, Order, RetailTransaction};

macro_rules! selector {
    ($name:ident, $css:expr) => {
        fn $name() -> &'static Selector {
            static SEL: OnceLock<Selector> = OnceLock::new();
            SEL.get_or_init(|| Selector::parse($css).expect(concat!("invalid selector ", $css)))
        }
    };
}

selector!(input_sel, "input[name]");
selector!(captcha_sel, "form[action*=\"validateCaptcha\"], #auth-captcha-image, #captchacharacters");
selector!(auth_error_sel, "#auth-error-message-box");
selector!(alert_text_sel, ".a-list-item, .a-alert-content");
selector!(mfa_form_sel, "form#auth-mfa-form");
selector!(sign_in_form_sel, "form[name=\"signIn\"]");
selector!(signed_in_sel, "#nav-item-signout, a[href*=\"sign-out\"]");

selector!(order_card_sel, ".order-card, .js-order-card");
selector!(order_id_sel, ".yohtmlc-order-id");
selector!(header_item_sel, ".order-header__header-list-item");
selector!(caps_label_sel, ".a-text-caps");
selector!(header_value_sel, ".a-size-base");
selector!(details_link_sel, "a[href*=\"order-details\"]");
selector!(product_title_sel, ".yohtmlc-product-title");
selector!(anchor_sel, "a[href]");
selector!(next_page_sel, "ul.a-pagination li.a-last:not(.a-disabled) a[href]");

selector!(item_block_sel, ".yohtmlc-item, [data-component=\"purchasedItems\"] .a-fixed-left-grid");
selector!(item_title_sel, "[data-component=\"itemTitle\"] a, .yohtmlc-product-title a, .yohtmlc-product-title");
selector!(unit_price_sel, "[data-component=\"unitPrice\"] .a-offscreen, .a-price .a-offscreen, .a-color-price");
selector!(quantity_sel, ".od-item-view-qty, .item-view-qty");

selector!(
    transaction_row_sel,
    ".apx-transaction-date-container, .apx-transactions-line-item-component-container"
);
selector!(payment_method_sel, ".a-span9 .a-text-bold");
selector!(transaction_amount_sel, ".a-span3 .a-size-base-plus, .a-text-right .a-size-base-plus");
selector!(order_anchor_sel, "a[href*=\"orderID=\"], a[href*=\"orderId=\"]");
selector!(seller_sel, ".a-span12 span.a-size-base");
selector!(form_sel, "form");
selector!(next_transactions_input_sel, "input[name*=\"NextPageNavigationEvent\"]");

fn order_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Z0-9]{3}-\d{7}-\d{7}").expect("invalid order number regex"))
}

fn quantity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("invalid quantity regex"))
}

// ── Forms ────────────────────────────────────────────────────────────────────

/// A form scraped from a page, ready to be filled in and submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form {
    pub action: String,
    pub method: String,
    pub fields: Vec<(String, String)>,
}

impl Form {
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    /// Replaces the value of `name`, adding the field when the form lacks it.
    pub fn set(&mut self, name: &str, value: &str) {
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value.to_string(),
            None => self.fields.push((name.to_string(), value.to_string())),
        }
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("get")
    }
}

fn form_from(el: ElementRef<'_>) -> Form {
    let fields = el
        .select(input_sel())
        .filter(|input| {
            let kind = input.value().attr("type").unwrap_or("text").to_ascii_lowercase();
            match kind.as_str() {
                "submit" | "button" | "image" => false,
                "checkbox" | "radio" => input.value().attr("checked").is_some(),
                _ => true,
            }
        })
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            let value = input.value().attr("value").unwrap_or_default();
            Some((name.to_string(), value.to_string()))
        })
        .collect();
    Form {
        action: el.value().attr("action").unwrap_or_default().to_string(),
        method: el.value().attr("method").unwrap_or("post").to_string(),
        fields,
    }
}

// ── Sign-in ──────────────────────────────────────────────────────────────────

/// What a page returned during sign-in asks for next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInPage {
    Authenticated,
    /// Email and/or password form.
    Credentials(Form),
    OneTimePassword(Form),
    Captcha,
    Error(String),
    Unrecognized,
}

pub fn classify_sign_in(html: &str) -> SignInPage {
    let doc = Html::parse_document(html);

    if doc.select(captcha_sel()).next().is_some() {
        return SignInPage::Captcha;
    }
    if let Some(error) = doc.select(auth_error_sel()).next() {
        let message = error
            .select(alert_text_sel())
            .map(collapsed_text)
            .find(|t| !t.is_empty())
            .unwrap_or_else(|| collapsed_text(error));
        return SignInPage::Error(message);
    }
    if let Some(form) = doc.select(mfa_form_sel()).next() {
        return SignInPage::OneTimePassword(form_from(form));
    }
    if let Some(form) = doc.select(sign_in_form_sel()).next() {
        return SignInPage::Credentials(form_from(form));
    }
    if doc.select(signed_in_sel()).next().is_some() {
        return SignInPage::Authenticated;
    }
    SignInPage::Unrecognized
}

// ── Order history ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct OrderHistoryPage {
    pub orders: Vec<Order>,
    pub next_page: Option<Url>,
}

pub fn parse_order_history(html: &str, page_url: &Url) -> OrderHistoryPage {
    let doc = Html::parse_document(html);

    let orders = doc
        .select(order_card_sel())
        .filter_map(|card| parse_order_card(card, page_url))
        .collect();

    let next_page = doc
        .select(next_page_sel())
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| page_url.join(href).ok());

    OrderHistoryPage { orders, next_page }
}

fn parse_order_card(card: ElementRef<'_>, page_url: &Url) -> Option<Order> {
    let id_text = card
        .select(order_id_sel())
        .next()
        .map(collapsed_text)
        .unwrap_or_else(|| collapsed_text(card));
    let Some(number) = order_number_re().find(&id_text).map(|m| m.as_str().to_string()) else {
        tracing::debug!("Skipping order card without an order number");
        return None;
    };

    let mut placed_date = None;
    let mut grand_total = None;
    for entry in card.select(header_item_sel()) {
        let label = entry
            .select(caps_label_sel())
            .next()
            .map(collapsed_text)
            .unwrap_or_default()
            .to_lowercase();
        let value = entry.select(header_value_sel()).next().map(collapsed_text).unwrap_or_default();
        if label.contains("placed") {
            placed_date = parse_date(&value);
        } else if label.contains("total") {
            grand_total = Money::parse_currency(&value).ok();
        }
    }
    let (Some(placed_date), Some(grand_total)) = (placed_date, grand_total) else {
        tracing::warn!("Order {number}: could not read order date or total, skipping");
        return None;
    };

    let details_link = card
        .select(details_link_sel())
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| absolute(page_url, href));

    let items = card
        .select(product_title_sel())
        .filter_map(|el| {
            let title = collapsed_text(el);
            if title.is_empty() {
                return None;
            }
            let link = el
                .select(anchor_sel())
                .next()
                .and_then(|a| a.value().attr("href"))
                .and_then(|href| absolute(page_url, href));
            Some(Item {
                link,
                ..Item::new(&title)
            })
        })
        .collect();

    Some(Order {
        number,
        placed_date,
        grand_total,
        details_link,
        items,
    })
}

// ── Order details ────────────────────────────────────────────────────────────

/// Items on an order details page, with unit price and quantity when shown.
pub fn parse_order_items(html: &str, page_url: &Url) -> Vec<Item> {
    let doc = Html::parse_document(html);
    doc.select(item_block_sel())
        .filter_map(|block| {
            let title_el = block.select(item_title_sel()).next()?;
            let title = collapsed_text(title_el);
            if title.is_empty() {
                return None;
            }
            let link = title_el
                .value()
                .attr("href")
                .and_then(|href| absolute(page_url, href));
            let price = block
                .select(unit_price_sel())
                .map(collapsed_text)
                .find_map(|t| Money::parse_currency(&t).ok());
            let quantity = block
                .select(quantity_sel())
                .map(collapsed_text)
                .find_map(|t| quantity_re().find(&t).and_then(|m| m.as_str().parse().ok()));
            Some(Item {
                title,
                link,
                price,
                quantity,
            })
        })
        .collect()
}

// ── Payment transactions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct TransactionsPage {
    pub transactions: Vec<RetailTransaction>,
    /// Oldest date heading on the page, including rows that were skipped.
    pub oldest: Option<NaiveDate>,
    pub next_page: Option<Form>,
}

pub fn parse_transactions(html: &str, page_url: &Url) -> TransactionsPage {
    let doc = Html::parse_document(html);
    let mut page = TransactionsPage::default();
    let mut current_date: Option<NaiveDate> = None;

    for row in doc.select(transaction_row_sel()) {
        if row.value().classes().any(|c| c == "apx-transaction-date-container") {
            current_date = parse_date(&collapsed_text(row));
            if let Some(date) = current_date {
                page.oldest = Some(page.oldest.map_or(date, |o| o.min(date)));
            }
            continue;
        }
        let Some(date) = current_date else {
            tracing::debug!("Transaction row before any date heading, skipping");
            continue;
        };
        if let Some(tx) = parse_transaction_row(row, date, page_url) {
            page.transactions.push(tx);
        }
    }

    // The pager is a submit button whose name carries the event, so it has to
    // be posted along with the hidden widget state.
    page.next_page = doc.select(form_sel()).find_map(|form| {
        let trigger = form.select(next_transactions_input_sel()).next()?;
        let mut next = form_from(form);
        if let Some(name) = trigger.value().attr("name") {
            next.set(name, trigger.value().attr("value").unwrap_or_default());
        }
        Some(next)
    });

    page
}

fn parse_transaction_row(row: ElementRef<'_>, date: NaiveDate, page_url: &Url) -> Option<RetailTransaction> {
    let amount_text = row.select(transaction_amount_sel()).next().map(collapsed_text)?;
    let amount = match Money::parse_currency(&amount_text) {
        Ok(amount) => amount,
        Err(e) => {
            tracing::debug!("Unreadable transaction amount {amount_text:?}: {e}");
            return None;
        }
    };

    let anchor = row.select(order_anchor_sel()).next();
    let anchor_text = anchor.map(collapsed_text).unwrap_or_default();
    let Some(order_number) = order_number_re().find(&anchor_text).map(|m| m.as_str().to_string()) else {
        tracing::debug!("Transaction on {date} for {amount_text} has no order number, skipping");
        return None;
    };

    let is_refund = anchor_text.to_lowercase().contains("refund") || amount_text.trim_start().starts_with('+');

    Some(RetailTransaction {
        completed_date: date,
        grand_total: amount.abs(),
        is_refund,
        order_number,
        details_link: anchor
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| absolute(page_url, href)),
        payment_method: row
            .select(payment_method_sel())
            .next()
            .map(collapsed_text)
            .filter(|t| !t.is_empty()),
        seller: row
            .select(seller_sel())
            .last()
            .map(collapsed_text)
            .filter(|t| !t.is_empty()),
    })
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn collapsed_text(el: ElementRef<'_>) -> String {
    el.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

fn absolute(base: &Url, href: &str) -> Option<String> {
    base.join(href.trim()).ok().map(|u| u.to_string())
}

pub fn parse_date(text: &str) -> Option<NaiveDate> {
    const FORMATS: [&str; 4] = ["%B %d, %Y", "%b %d, %Y", "%d %B %Y", "%Y-%m-%d"];
    let text = text.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://www.amazon.com/your-orders/orders?timeFilter=year-2024").unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    const SIGN_IN: &str = r#"
        <html><body>
          <form name="signIn" method="post" action="https://www.amazon.com/ap/signin">
            <input type="hidden" name="appActionToken" value="tok123">
            <input type="hidden" name="workflowState" value="wf">
            <input type="email" name="email" value="">
            <input type="password" name="password">
            <input type="checkbox" name="rememberMe" value="true">
            <input type="submit" id="signInSubmit" value="Sign in">
          </form>
        </body></html>"#;

    #[test]
    fn sign_in_form_keeps_hidden_fields() {
        let SignInPage::Credentials(form) = classify_sign_in(SIGN_IN) else {
            panic!("expected credentials form");
        };
        assert_eq!(form.action, "https://www.amazon.com/ap/signin");
        assert_eq!(form.value("appActionToken"), Some("tok123"));
        assert!(form.has_field("email"));
        assert!(form.has_field("password"));
        assert!(!form.has_field("rememberMe"));
        assert!(!form.is_get());
    }

    #[test]
    fn form_set_replaces_then_appends() {
        let SignInPage::Credentials(mut form) = classify_sign_in(SIGN_IN) else {
            panic!("expected credentials form");
        };
        form.set("email", "me@example.com");
        form.set("rememberMe", "true");
        assert_eq!(form.value("email"), Some("me@example.com"));
        assert_eq!(form.fields.last().unwrap().0, "rememberMe");
    }

    #[test]
    fn classifies_mfa_captcha_error_and_home() {
        let mfa = r#"<form id="auth-mfa-form" action="/ap/signin"><input name="otpCode"><input type="hidden" name="mfaSession" value="s"></form>"#;
        assert!(matches!(classify_sign_in(mfa), SignInPage::OneTimePassword(f) if f.value("mfaSession") == Some("s")));

        let captcha = r#"<form action="/errors/validateCaptcha"><img src="captcha.jpg"><input name="field-keywords"></form>"#;
        assert_eq!(classify_sign_in(captcha), SignInPage::Captcha);

        let error = r#"<div id="auth-error-message-box"><div class="a-alert-content"><ul><li><span class="a-list-item">
            Your password is incorrect
        </span></li></ul></div></div><form name="signIn"></form>"#;
        assert_eq!(classify_sign_in(error), SignInPage::Error("Your password is incorrect".to_string()));

        let home = r#"<div id="nav-tools"><a id="nav-item-signout" href="/gp/flex/sign-out.html">Sign Out</a></div>"#;
        assert_eq!(classify_sign_in(home), SignInPage::Authenticated);

        assert_eq!(classify_sign_in("<html><body>Hello</body></html>"), SignInPage::Unrecognized);
    }

    const ORDER_HISTORY: &str = r#"
        <div class="your-orders-content-container">
          <div class="order-card js-order-card">
            <div class="order-header">
              <ul>
                <li class="order-header__header-list-item">
                  <div class="a-row a-size-mini"><span class="a-color-secondary a-text-caps">Order placed</span></div>
                  <div class="a-row"><span class="a-size-base a-color-secondary">June 1, 2024</span></div>
                </li>
                <li class="order-header__header-list-item">
                  <div class="a-row a-size-mini"><span class="a-color-secondary a-text-caps">Total</span></div>
                  <div class="a-row"><span class="a-size-base a-color-secondary">$1,042.00</span></div>
                </li>
              </ul>
              <div class="yohtmlc-order-id"><span class="a-text-caps">Order #</span> <span dir="ltr">113-2607970-8010001</span></div>
              <a class="a-link-normal" href="/gp/your-account/order-details?orderID=113-2607970-8010001">View order details</a>
            </div>
            <div class="yohtmlc-product-title"><a class="a-link-normal" href="/dp/B000000001">USB cable</a></div>
            <div class="yohtmlc-product-title"><a class="a-link-normal" href="/dp/B000000002">  Desk
                lamp </a></div>
          </div>
          <div class="order-card js-order-card">
            <div class="yohtmlc-order-id"><span dir="ltr">114-0000000-0000002</span></div>
          </div>
        </div>
        <ul class="a-pagination">
          <li class="a-normal"><a href="/your-orders/orders?timeFilter=year-2024&startIndex=0">1</a></li>
          <li class="a-last"><a href="/your-orders/orders?timeFilter=year-2024&startIndex=10">Next</a></li>
        </ul>"#;

    #[test]
    fn order_history_cards_and_next_link() {
        let page = parse_order_history(ORDER_HISTORY, &base());
        assert_eq!(page.orders.len(), 1);

        let order = &page.orders[0];
        assert_eq!(order.number, "113-2607970-8010001");
        assert_eq!(order.placed_date, d(2024, 6, 1));
        assert_eq!(order.grand_total, Money::from_cents(104_200));
        assert_eq!(
            order.details_link.as_deref(),
            Some("https://www.amazon.com/gp/your-account/order-details?orderID=113-2607970-8010001")
        );
        let titles: Vec<&str> = order.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["USB cable", "Desk lamp"]);
        assert_eq!(order.items[0].link.as_deref(), Some("https://www.amazon.com/dp/B000000001"));

        assert_eq!(
            page.next_page.unwrap().as_str(),
            "https://www.amazon.com/your-orders/orders?timeFilter=year-2024&startIndex=10"
        );
    }

    #[test]
    fn disabled_next_link_ends_pagination() {
        let html = r#"<ul class="a-pagination"><li class="a-last a-disabled">Next</li></ul>"#;
        let page = parse_order_history(html, &base());
        assert!(page.orders.is_empty());
        assert!(page.next_page.is_none());
    }

    #[test]
    fn order_details_price_and_quantity() {
        let html = r#"
            <div data-component="purchasedItems">
              <div class="a-fixed-left-grid">
                <div class="a-fixed-left-grid-col a-col-left"><span class="od-item-view-qty"><span>2</span></span></div>
                <div class="a-fixed-left-grid-col a-col-right">
                  <div data-component="itemTitle"><a class="a-link-normal" href="/dp/B000000001">USB cable</a></div>
                  <div data-component="unitPrice"><span class="a-price"><span class="a-offscreen">$9.99</span></span></div>
                </div>
              </div>
              <div class="a-fixed-left-grid">
                <div class="a-fixed-left-grid-col a-col-right">
                  <div data-component="itemTitle"><a class="a-link-normal" href="/dp/B000000002">Desk lamp</a></div>
                  <div data-component="unitPrice"><span class="a-price"><span class="a-offscreen">$22.02</span></span></div>
                </div>
              </div>
            </div>"#;
        let items = parse_order_items(html, &base());
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "USB cable");
        assert_eq!(items[0].quantity, Some(2));
        assert_eq!(items[0].price, Some(Money::from_cents(999)));
        assert_eq!(items[0].link.as_deref(), Some("https://www.amazon.com/dp/B000000001"));
        assert_eq!(items[1].quantity, None);
        assert_eq!(items[1].price, Some(Money::from_cents(2202)));
    }

    const TRANSACTIONS: &str = r#"
        <form method="post" action="/cpe/yourpayments/transactions">
          <input type="hidden" name="ppw-widgetState" value="state-1">
          <div class="apx-transaction-date-container"><span>June 5, 2024</span></div>
          <div class="a-box-group">
            <div class="apx-transactions-line-item-component-container">
              <div class="a-row">
                <div class="a-column a-span9"><span class="a-size-base a-text-bold">Visa ****1234</span></div>
                <div class="a-column a-span3 a-text-right"><span class="a-size-base-plus a-text-bold">-$20.00</span></div>
              </div>
              <div class="a-row"><div class="a-column a-span12">
                <a class="a-link-normal" href="https://www.amazon.com/gp/css/summary/edit.html?orderID=113-2607970-8010001">Order #113-2607970-8010001</a>
              </div></div>
              <div class="a-row"><div class="a-column a-span12"><span class="a-size-base">AMZN Mktp US</span></div></div>
            </div>
            <div class="apx-transactions-line-item-component-container">
              <div class="a-row">
                <div class="a-column a-span9"><span class="a-size-base a-text-bold">Visa ****1234</span></div>
                <div class="a-column a-span3 a-text-right"><span class="a-size-base-plus a-text-bold">+$5.00</span></div>
              </div>
              <div class="a-row"><div class="a-column a-span12">
                <a class="a-link-normal" href="/gp/css/summary/edit.html?orderID=114-0000000-0000002">Refund: Order #114-0000000-0000002</a>
              </div></div>
            </div>
          </div>
          <div class="apx-transaction-date-container"><span>June 1, 2024</span></div>
          <div class="a-box-group">
            <div class="apx-transactions-line-item-component-container">
              <div class="a-row">
                <div class="a-column a-span9"><span class="a-size-base a-text-bold">Gift card</span></div>
                <div class="a-column a-span3 a-text-right"><span class="a-size-base-plus a-text-bold">-$15.00</span></div>
              </div>
            </div>
          </div>
          <span class="a-button"><input name="ppw-widgetEvent:DefaultNextPageNavigationEvent:{&quot;nextPageKey&quot;:&quot;k2&quot;}" type="submit"></span>
        </form>"#;

    #[test]
    fn transactions_page_rows_refunds_and_next_form() {
        let url = Url::parse("https://www.amazon.com/cpe/yourpayments/transactions").unwrap();
        let page = parse_transactions(TRANSACTIONS, &url);

        assert_eq!(page.transactions.len(), 2);
        let charge = &page.transactions[0];
        assert_eq!(charge.completed_date, d(2024, 6, 5));
        assert_eq!(charge.grand_total, Money::from_cents(2000));
        assert!(!charge.is_refund);
        assert_eq!(charge.order_number, "113-2607970-8010001");
        assert_eq!(charge.payment_method.as_deref(), Some("Visa ****1234"));
        assert_eq!(charge.seller.as_deref(), Some("AMZN Mktp US"));

        let refund = &page.transactions[1];
        assert!(refund.is_refund);
        assert_eq!(refund.grand_total, Money::from_cents(500));
        assert_eq!(
            refund.details_link.as_deref(),
            Some("https://www.amazon.com/gp/css/summary/edit.html?orderID=114-0000000-0000002")
        );

        assert_eq!(page.oldest, Some(d(2024, 6, 1)));
        let next = page.next_page.unwrap();
        assert_eq!(next.action, "/cpe/yourpayments/transactions");
        assert_eq!(next.value("ppw-widgetState"), Some("state-1"));
        assert!(next
            .fields
            .iter()
            .any(|(name, _)| name.contains("DefaultNextPageNavigationEvent") && name.contains("k2")));
    }

    #[test]
    fn last_transactions_page_has_no_next_form() {
        let html = r#"<form><input type="hidden" name="ppw-widgetState" value="s"></form>"#;
        let url = Url::parse("https://www.amazon.com/cpe/yourpayments/transactions").unwrap();
        assert!(parse_transactions(html, &url).next_page.is_none());
    }

    #[test]
    fn dates_in_long_and_short_month_forms() {
        assert_eq!(parse_date("June 3, 2024"), Some(d(2024, 6, 3)));
        assert_eq!(parse_date(" Sep 30, 2023 "), Some(d(2023, 9, 30)));
        assert_eq!(parse_date("yesterday"), None);
    }
}
