//! Crawl mechanics
//!
//! Fetching with retry, lazy-load scrolling, pagination, and the frontier
//! the driving loop consumes.

pub mod frontier;
pub mod lazy_load;
pub mod navigation;
pub mod pagination;

pub use frontier::{Frontier, FrontierEntry, Origin};
pub use lazy_load::{LazyLoadReport, LazyLoader, ScrollStop};
pub use navigation::{FetchAttempt, FetchedPage, Fetcher, UrlValidator};
pub use pagination::{
    looks_like_pagination, numbered_urls, xpath_to_css, ClickLoopReport, ClickStop, NextLinkFinder,
    PaginationResolver, PaginationState,
};
