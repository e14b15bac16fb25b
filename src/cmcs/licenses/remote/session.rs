use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, instrument};
use ureq::ErrorKind;

use crate::cmcs::licenses::error::{Result, ToolError};
use crate::cmcs::licenses::model::{GeometryPayload, LicenseId, ListingRow};
use crate::cmcs::licenses::remote::{
    ClientConfig, Credentials, LicensePortal, PAGE_SIZE, geometry, html,
};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/144.0.0.0 Safari/537.36";
const TOKEN_FIELD: &str = "__RequestVerificationToken";
const CULTURE_COOKIE: (&str, &str) = ("_cmcsCulture", "en-GB");
/// Listing index that holds the currently valid licenses.
const VALID_INDEX_TYPE: &str = "2";
const MAX_REDIRECTS: usize = 10;
const EMPTY_FORM: &[(&str, &str)] = &[];

/// Logged-in portal session. Owns the HTTP agent and the cookie jar; every
/// portal call of a run goes through the same value.
#[derive(Debug)]
pub struct Session {
    agent: ureq::Agent,
    base_url: String,
    origin: String,
    cookies: CookieJar,
}

#[derive(Debug, Deserialize)]
struct GridPage {
    #[serde(default)]
    rows: Vec<ListingRow>,
}

/// A fully read response after redirects were followed.
struct Page {
    status: u16,
    url: String,
    body: String,
}

impl Page {
    fn success(self, what: &str) -> Result<Page> {
        if (200..300).contains(&self.status) {
            Ok(self)
        } else {
            Err(ToolError::Transport(format!(
                "{what}: http status {} from {}",
                self.status, self.url
            )))
        }
    }
}

impl Session {
    /// Creates an anonymous session. Most callers want [`Session::authenticate`].
    pub fn new(config: &ClientConfig) -> Self {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let mut cookies = CookieJar::default();
        cookies.insert(CULTURE_COOKIE.0, CULTURE_COOKIE.1);

        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(config.timeout)
                .timeout_read(config.timeout)
                .timeout_write(config.timeout)
                .redirects(0)
                .user_agent(USER_AGENT)
                .build(),
            origin: origin_of(&base_url),
            base_url,
            cookies,
        }
    }

    /// Runs the two-step login: fetch the form, then post the credentials with
    /// the anti-forgery token found in it.
    #[instrument(level = "info", skip_all, fields(base_url = %config.base_url, user = %credentials.username))]
    pub fn authenticate(config: &ClientConfig, credentials: &Credentials) -> Result<Self> {
        let mut session = Session::new(config);
        let login_url = session.url("Account/Login");

        let form_page = session
            .send("GET", &login_url, None)?
            .success("login page")?;
        let token = html::input_value(&form_page.body, TOKEN_FIELD)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                ToolError::Authentication(format!("login page carries no {TOKEN_FIELD}"))
            })?;
        debug!("obtained anti-forgery token");

        let form = [
            ("UserName", credentials.username.as_str()),
            ("Password", credentials.password.as_str()),
            (TOKEN_FIELD, token.as_str()),
        ];
        let response = session.send("POST", &login_url, Some(&form[..]))?;
        if !(200..300).contains(&response.status) {
            return Err(ToolError::Authentication(format!(
                "login rejected with http status {}",
                response.status
            )));
        }

        info!("logged in to portal");
        Ok(session)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn send(&mut self, method: &str, url: &str, form: Option<&[(&str, &str)]>) -> Result<Page> {
        let mut method = method.to_string();
        let mut url = url.to_string();
        let mut form = form;
        let referer = format!("{}/", self.base_url);

        for _ in 0..=MAX_REDIRECTS {
            let mut request = self
                .agent
                .request(&method, &url)
                .set("X-Requested-With", "XMLHttpRequest")
                .set("Origin", &self.origin)
                .set("Referer", &referer);
            if let Some(cookie) = self.cookies.header() {
                request = request.set("Cookie", &cookie);
            }

            let outcome = match form {
                Some(fields) => request.send_form(fields),
                None => request.call(),
            };
            let response = match outcome {
                Ok(response) => response,
                Err(ureq::Error::Status(_, response)) => response,
                Err(ureq::Error::Transport(transport)) => {
                    return Err(ToolError::Transport(format!(
                        "{method} {url}: {}",
                        summarize_transport_error(&transport)
                    )));
                }
            };

            for set_cookie in response.all("set-cookie") {
                self.cookies.store(set_cookie);
            }

            let status = response.status();
            if (300..400).contains(&status) {
                if let Some(location) = response.header("location") {
                    let next = resolve_location(&url, location);
                    debug!(status, from = %url, to = %next, "following redirect");
                    if !matches!(status, 307 | 308) {
                        method = "GET".to_string();
                        form = None;
                    }
                    url = next;
                    continue;
                }
            }

            let body = response.into_string().map_err(|error| {
                ToolError::Transport(format!("failed to read response from {url}: {error}"))
            })?;
            return Ok(Page { status, url, body });
        }

        Err(ToolError::Transport(format!("too many redirects from {url}")))
    }
}

impl LicensePortal for Session {
    #[instrument(level = "debug", skip(self))]
    fn entity_count(&mut self) -> Result<u64> {
        let url = self.url(&format!(
            "License/IndexCount/{VALID_INDEX_TYPE}?_={}",
            epoch_millis()
        ));
        let page = self.send("GET", &url, None)?.success("license count")?;
        page.body.trim().parse::<u64>().map_err(|_| {
            ToolError::Transport(format!(
                "license count endpoint returned '{}'",
                page.body.trim()
            ))
        })
    }

    #[instrument(level = "debug", skip(self))]
    fn listing_page(&mut self, page: u64) -> Result<Vec<ListingRow>> {
        let url = self.url("License/GridData");
        let nd = epoch_millis().to_string();
        let rows = PAGE_SIZE.to_string();
        let page_number = page.to_string();
        let form = [
            ("indexType", VALID_INDEX_TYPE),
            ("_search", "false"),
            ("nd", nd.as_str()),
            ("rows", rows.as_str()),
            ("page", page_number.as_str()),
            ("sidx", "Id"),
            ("sord", "desc"),
        ];
        let response = self
            .send("POST", &url, Some(&form[..]))?
            .success(&format!("listing page {page}"))?;
        let grid: GridPage = serde_json::from_str(&response.body)?;
        debug!(rows = grid.rows.len(), "received listing page");
        Ok(grid.rows)
    }

    #[instrument(level = "debug", skip(self))]
    fn entity_geometry(&mut self, license_id: LicenseId) -> Result<GeometryPayload> {
        let url = self.url(&format!("License/Details/{license_id}"));
        let page = self
            .send("POST", &url, Some(EMPTY_FORM))?
            .success(&format!("license {license_id} details"))?;
        geometry::geometry_from_page(license_id, &page.body)
    }
}

/// Cookies set by the portal, replayed as one `Cookie` header.
#[derive(Debug, Default, Clone)]
struct CookieJar(BTreeMap<String, String>);

impl CookieJar {
    fn insert(&mut self, name: &str, value: &str) {
        self.0.insert(name.to_string(), value.to_string());
    }

    fn store(&mut self, set_cookie: &str) {
        let mut parts = set_cookie.split(';');
        let Some((name, value)) = parts.next().and_then(|pair| pair.split_once('=')) else {
            return;
        };
        let (name, value) = (name.trim(), value.trim());
        if name.is_empty() {
            return;
        }

        let mut max_age = None;
        let mut expires = None;
        for attribute in parts {
            let Some((key, setting)) = attribute.split_once('=') else {
                continue;
            };
            let (key, setting) = (key.trim(), setting.trim());
            if key.eq_ignore_ascii_case("max-age") {
                max_age = setting.parse::<i64>().ok();
            } else if key.eq_ignore_ascii_case("expires") {
                expires = cookie_date(setting);
            }
        }

        // Max-Age wins over Expires when both are present.
        let expired = match (max_age, expires) {
            (Some(seconds), _) => seconds <= 0,
            (None, Some(expiry)) => expiry <= Utc::now(),
            (None, None) => false,
        };
        if expired || value.is_empty() {
            self.0.remove(name);
        } else {
            self.insert(name, value);
        }
    }

    fn header(&self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        let pairs: Vec<String> = self
            .0
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        Some(pairs.join("; "))
    }
}

fn epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parses an `Expires` date in either the RFC 1123 or the dashed Netscape
/// spelling (`Thu, 01-Jan-1970 00:00:00 GMT`).
fn cookie_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc2822(&value.replace('-', " ")))
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// `scheme://host[:port]` of an absolute URL.
fn origin_of(url: &str) -> String {
    match url.find("://") {
        Some(scheme_end) => {
            let host_start = scheme_end + 3;
            match url[host_start..].find('/') {
                Some(path_start) => url[..host_start + path_start].to_string(),
                None => url.to_string(),
            }
        }
        None => url.to_string(),
    }
}

fn resolve_location(current: &str, location: &str) -> String {
    if location.contains("://") {
        return location.to_string();
    }
    if let Some(rest) = location.strip_prefix("//") {
        let scheme = current.split("://").next().unwrap_or("https");
        return format!("{scheme}://{rest}");
    }
    if location.starts_with('/') {
        return format!("{}{}", origin_of(current), location);
    }
    let origin = origin_of(current);
    let without_query = current.split(['?', '#']).next().unwrap_or(current);
    match without_query.rfind('/') {
        Some(dir_end) if dir_end >= origin.len() => {
            format!("{}{}", &without_query[..=dir_end], location)
        }
        _ => format!("{origin}/{location}"),
    }
}

fn summarize_transport_error(transport: &ureq::Transport) -> String {
    let category = match transport.kind() {
        ErrorKind::ConnectionFailed => "connection refused or host unavailable",
        ErrorKind::Dns => "dns lookup failed",
        ErrorKind::Io => "network i/o error",
        ErrorKind::InvalidUrl => "invalid url",
        ErrorKind::UnknownScheme => "unsupported url scheme",
        ErrorKind::TooManyRedirects => "too many redirects",
        ErrorKind::BadStatus => "bad status line from server",
        ErrorKind::BadHeader => "bad header from server",
        _ => "transport error",
    };

    match transport.message() {
        Some(message) if !message.trim().is_empty() => format!("{category}: {}", message.trim()),
        _ => category.to_string(),
    }
}
