//! Access to the CMCS licensing portal.

pub mod geometry;
pub mod html;
pub mod session;

use std::fmt;
use std::time::Duration;

use crate::cmcs::licenses::error::Result;
use crate::cmcs::licenses::model::{GeometryPayload, LicenseId, ListingRow};

pub use session::Session;

/// Rows requested per listing page.
pub const PAGE_SIZE: u64 = 1000;

/// Portal root used when no override is configured.
pub const DEFAULT_BASE_URL: &str = "https://cmcs.mrpam.gov.mn/CMCS";

/// Connection settings for [`Session::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    /// Applied to connect, read and write of every request.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Portal login.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The three reads a run performs against the portal once logged in.
pub trait LicensePortal {
    /// Number of licenses the listing currently holds.
    fn entity_count(&mut self) -> Result<u64>;

    /// One page of the listing. Pages are 1-based and [`PAGE_SIZE`] rows long.
    fn listing_page(&mut self, page: u64) -> Result<Vec<ListingRow>>;

    /// Boundary geometry of one license.
    fn entity_geometry(&mut self, license_id: LicenseId) -> Result<GeometryPayload>;
}

/// Number of pages needed to list `total` licenses.
pub fn page_count(total: u64) -> u64 {
    total.div_ceil(PAGE_SIZE)
}

/// Lazily fetches listing pages in order. Each item is one page.
pub struct ListingPages<'p, P: LicensePortal + ?Sized> {
    portal: &'p mut P,
    next_page: u64,
    pages: u64,
}

impl<'p, P: LicensePortal + ?Sized> ListingPages<'p, P> {
    pub fn new(portal: &'p mut P, total: u64) -> Self {
        Self {
            portal,
            next_page: 1,
            pages: page_count(total),
        }
    }

    pub fn pages(&self) -> u64 {
        self.pages
    }
}

impl<P: LicensePortal + ?Sized> Iterator for ListingPages<'_, P> {
    type Item = Result<Vec<ListingRow>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_page > self.pages {
            return None;
        }
        let page = self.next_page;
        self.next_page += 1;
        Some(self.portal.listing_page(page))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.pages + 1).saturating_sub(self.next_page) as usize;
        (remaining, Some(remaining))
    }
}
