//! Browser automation module
//!
//! This module defines the narrow session interface the crawler drives,
//! the Chromium implementation behind it, and an in-memory fake.

pub mod controller;
pub mod driver;
pub mod fake;

pub use controller::{BrowserConfig, ChromiumSession, ChromiumSessionFactory};
pub use driver::{
    BrowserSession, Locator, NavigationOutcome, ScrollMetrics, ScrollTarget, SessionFactory,
    SessionLease,
};
pub use fake::{FakePage, FakeSessionFactory};
