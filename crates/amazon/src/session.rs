use cookie_store::CookieStore;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Url;
use reqwest_cookie_store::CookieStoreMutex;
use std::error::Error;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use ynamazon_core::{OtpPrompt, SourceError};

use crate::parse::{self, Form, SignInPage};

pub const SIGN_IN_PATH: &str = "/ap/signin?openid.pape.max_auth_age=0\
&openid.return_to=https%3A%2F%2Fwww.amazon.com%2F%3Fref_%3Dnav_custrec_signin\
&openid.identity=http%3A%2F%2Fspecs.openid.net%2Fauth%2F2.0%2Fidentifier_select\
&openid.assoc_handle=usflex&openid.mode=checkid_setup\
&openid.claimed_id=http%3A%2F%2Fspecs.openid.net%2Fauth%2F2.0%2Fidentifier_select\
&openid.ns=http%3A%2F%2Fspecs.openid.net%2Fauth%2F2.0";

pub const SIGN_OUT_PATH: &str = "/gp/flex/sign-out.html?path=%2Fgp%2Fyourstore%2Fhome&signIn=1&useRedirectOnSuccess=1&action=sign-out";

/// Sign-in rounds (credentials, password, second factor...) before giving up.
const MAX_FORM_STEPS: usize = 5;

const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:128.0) Gecko/20100101 Firefox/128.0";

/// A fetched page and the URL it was finally served from.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub body: String,
}

/// Cookie-backed browsing session against the retail site.
pub struct AmazonSession {
    http: reqwest::Client,
    jar: Arc<CookieStoreMutex>,
    base: Url,
    /// Persistent cookies are loaded from and saved to this file.
    session_file: Option<PathBuf>,
    authenticated: bool,
}

impl AmazonSession {
    pub fn new(base_url: &str, session_file: Option<PathBuf>) -> Result<Self, SourceError> {
        let base = Url::parse(base_url)
            .map_err(|e| SourceError::Parse(format!("invalid Amazon base URL {base_url:?}: {e}")))?;
        let store = session_file.as_deref().map(load_cookies).unwrap_or_default();
        let jar = Arc::new(CookieStoreMutex::new(store));
        Ok(Self {
            http: build_http(Arc::clone(&jar))?,
            jar,
            base,
            session_file,
            authenticated: false,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn url(&self, path: &str) -> Result<Url, SourceError> {
        self.base
            .join(path)
            .map_err(|e| SourceError::Parse(format!("invalid path {path:?}: {e}")))
    }

    pub async fn get(&self, url: Url) -> Result<Page, SourceError> {
        tracing::debug!("GET {}", url.path());
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;
        read_page(resp).await
    }

    /// Like [`get`](Self::get), but treats a bounce to the sign-in page as an
    /// expired session.
    pub async fn get_signed_in(&self, url: Url) -> Result<Page, SourceError> {
        let page = self.get(url).await?;
        if page.url.path().starts_with("/ap/signin") {
            return Err(SourceError::Authentication(
                "session expired, Amazon asked to sign in again".to_string(),
            ));
        }
        Ok(page)
    }

    /// Submits `form` as found on `page_url`.
    pub async fn submit(&self, page_url: &Url, form: &Form) -> Result<Page, SourceError> {
        let target = if form.action.is_empty() {
            page_url.clone()
        } else {
            page_url
                .join(&form.action)
                .map_err(|e| SourceError::Parse(format!("invalid form action {:?}: {e}", form.action)))?
        };
        tracing::debug!("Submitting form to {}", target.path());

        let request = if form.is_get() {
            self.http.get(target).query(&form.fields)
        } else {
            self.http.post(target).form(&form.fields)
        };
        let resp = request
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;
        read_page(resp).await
    }

    fn has_saved_cookies(&self) -> bool {
        self.jar
            .lock()
            .map(|store| store.iter_unexpired().next().is_some())
            .unwrap_or(false)
    }

    /// True when the cookies loaded from disk still open the account home.
    async fn resume(&mut self) -> Result<bool, SourceError> {
        let page = self.get(self.url("/")?).await?;
        if matches!(parse::classify_sign_in(&page.body), SignInPage::Authenticated) {
            tracing::info!("Reusing saved Amazon session");
            self.authenticated = true;
            return Ok(true);
        }
        tracing::info!("Saved Amazon session is no longer valid");
        Ok(false)
    }

    /// Walks the sign-in pages until the account home is reached. A saved
    /// session that is still valid skips the sign-in entirely.
    pub async fn login(&mut self, username: &str, password: &str, otp: &dyn OtpPrompt) -> Result<(), SourceError> {
        if self.has_saved_cookies() && self.resume().await? {
            return Ok(());
        }

        tracing::info!("Signing in to Amazon");
        let mut page = self.get(self.url(SIGN_IN_PATH)?).await?;

        for step in 1..=MAX_FORM_STEPS {
            match parse::classify_sign_in(&page.body) {
                SignInPage::Authenticated => {
                    self.authenticated = true;
                    tracing::info!("Signed in to Amazon");
                    self.persist();
                    return Ok(());
                }
                SignInPage::Credentials(mut form) => {
                    if form.has_field("email") {
                        form.set("email", username);
                    }
                    if form.has_field("password") {
                        form.set("password", password);
                        form.set("rememberMe", "true");
                    }
                    tracing::debug!("Sign-in step {step}: credentials");
                    page = self.submit(&page.url, &form).await?;
                }
                SignInPage::OneTimePassword(mut form) => {
                    tracing::info!("Amazon asked for a two-factor code");
                    let code = otp.one_time_password()?;
                    form.set("otpCode", code.trim());
                    page = self.submit(&page.url, &form).await?;
                }
                SignInPage::Captcha => {
                    return Err(SourceError::Authentication(
                        "Amazon presented a CAPTCHA; sign in once through a browser and retry".to_string(),
                    ));
                }
                SignInPage::Error(message) => return Err(SourceError::Authentication(message)),
                SignInPage::Unrecognized => {
                    return Err(SourceError::Parse(format!(
                        "unrecognised page during sign-in: {}",
                        page.url
                    )));
                }
            }
        }

        Err(SourceError::Authentication(format!(
            "sign-in did not complete after {MAX_FORM_STEPS} steps"
        )))
    }

    /// Signs out remotely, forgets the saved session and starts over with an
    /// empty cookie jar.
    pub async fn logout(&mut self) -> Result<(), SourceError> {
        tracing::info!("Signing out of Amazon");
        self.get(self.url(SIGN_OUT_PATH)?).await?;
        if let Some(path) = &self.session_file {
            match fs::remove_file(path) {
                Ok(()) => tracing::debug!("Removed saved session {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Could not remove saved session {}: {e}", path.display()),
            }
        }
        self.jar = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        self.http = build_http(Arc::clone(&self.jar))?;
        self.authenticated = false;
        Ok(())
    }

    fn persist(&self) {
        let Some(path) = &self.session_file else {
            return;
        };
        match save_cookies(&self.jar, path) {
            Ok(()) => tracing::debug!("Saved Amazon session to {}", path.display()),
            Err(e) => tracing::warn!("Could not save Amazon session to {}: {e}", path.display()),
        }
    }
}

fn load_cookies(path: &Path) -> CookieStore {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return CookieStore::default(),
        Err(e) => {
            tracing::warn!("Could not open saved session {}: {e}", path.display());
            return CookieStore::default();
        }
    };
    match cookie_store::serde::json::load(BufReader::new(file)) {
        Ok(store) => {
            tracing::debug!("Loaded saved Amazon session from {}", path.display());
            store
        }
        Err(e) => {
            tracing::warn!("Ignoring unreadable session file {}: {e}", path.display());
            CookieStore::default()
        }
    }
}

fn save_cookies(jar: &CookieStoreMutex, path: &Path) -> Result<(), Box<dyn Error + Send + Sync>> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let store = jar.lock().map_err(|e| e.to_string())?;
    let mut writer = BufWriter::new(File::create(path)?);
    cookie_store::serde::json::save(&store, &mut writer)?;
    writer.flush()?;
    Ok(())
}

fn build_http(jar: Arc<CookieStoreMutex>) -> Result<reqwest::Client, SourceError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    reqwest::Client::builder()
        .cookie_provider(jar)
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| SourceError::Network(e.to_string()))
}

async fn read_page(resp: reqwest::Response) -> Result<Page, SourceError> {
    let url = resp.url().clone();
    let status = resp.status();
    if !status.is_success() {
        return Err(SourceError::Network(format!("{} returned {status}", url.path())));
    }
    let body = resp.text().await.map_err(|e| SourceError::Network(e.to_string()))?;
    Ok(Page { url, body })
}
