//! Breadth-first crawl frontier
//!
//! Two queues: the level being processed and the level after it. A URL is
//! either queued or visited, never both, and is never queued again once it
//! has been visited.

use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// How a URL entered the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Configured seed
    Seed,
    /// Discovered anchor
    Link,
    /// Next page of a pagination chain
    Pagination {
        /// Pages followed so far in this chain
        hop: usize,
    },
}

/// A queued URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    /// Absolute URL
    pub url: String,
    /// Depth it was discovered at
    pub depth: usize,
    /// How it got here
    pub origin: Origin,
}

/// Ordered, unique queue of URLs still to fetch
#[derive(Debug, Default)]
pub struct Frontier {
    current: VecDeque<FrontierEntry>,
    next: VecDeque<FrontierEntry>,
    queued: HashSet<String>,
    visited: HashSet<String>,
    depth: usize,
}

impl Frontier {
    /// Frontier seeded at depth 0
    pub fn with_seeds<I, S>(seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut frontier = Self::default();
        for seed in seeds {
            frontier.push_current(seed.into(), Origin::Seed);
        }
        frontier
    }

    /// Queue at the current depth (seeds and pagination hops). Returns false
    /// if the URL is already queued or visited.
    pub fn push_current(&mut self, url: String, origin: Origin) -> bool {
        if !self.admit(&url) {
            return false;
        }
        self.current.push_back(FrontierEntry {
            url,
            depth: self.depth,
            origin,
        });
        true
    }

    /// Queue for the next depth level. Returns false if the URL is already
    /// queued or visited.
    pub fn push_next(&mut self, url: String) -> bool {
        if !self.admit(&url) {
            return false;
        }
        self.next.push_back(FrontierEntry {
            url,
            depth: self.depth + 1,
            origin: Origin::Link,
        });
        true
    }

    fn admit(&mut self, url: &str) -> bool {
        if self.visited.contains(url) || self.queued.contains(url) {
            return false;
        }
        self.queued.insert(url.to_string());
        true
    }

    /// Take the next URL of the current level and mark it visited
    pub fn pop(&mut self) -> Option<FrontierEntry> {
        let entry = self.current.pop_front()?;
        self.queued.remove(&entry.url);
        self.visited.insert(entry.url.clone());
        Some(entry)
    }

    /// Mark a URL visited without queueing it (numbered pages, detail pages).
    /// Returns false if it was already visited.
    pub fn mark_visited(&mut self, url: &str) -> bool {
        if self.queued.contains(url) {
            self.queued.remove(url);
            self.current.retain(|e| e.url != url);
            self.next.retain(|e| e.url != url);
        }
        self.visited.insert(url.to_string())
    }

    /// Move to the next depth level. Returns false when it is empty.
    pub fn advance_depth(&mut self) -> bool {
        if self.next.is_empty() {
            return false;
        }
        debug_assert!(self.current.is_empty());
        self.current = std::mem::take(&mut self.next);
        self.depth += 1;
        debug!("Frontier advanced to depth {} with {} URLs", self.depth, self.current.len());
        true
    }

    /// Current depth
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// URLs left at the current level
    pub fn current_len(&self) -> usize {
        self.current.len()
    }

    /// URLs waiting for the next level
    pub fn next_len(&self) -> usize {
        self.next.len()
    }

    /// URLs waiting for the next level, in order
    pub fn next_urls(&self) -> Vec<String> {
        self.next.iter().map(|e| e.url.clone()).collect()
    }

    /// Whether a URL has been visited
    pub fn is_visited(&self, url: &str) -> bool {
        self.visited.contains(url)
    }

    /// Visited count
    pub fn visited_len(&self) -> usize {
        self.visited.len()
    }

    /// Whether the queued and visited sets are disjoint
    pub fn is_consistent(&self) -> bool {
        self.queued.is_disjoint(&self.visited)
            && self
                .current
                .iter()
                .chain(self.next.iter())
                .all(|e| self.queued.contains(&e.url))
    }

    /// Whether nothing is queued at either level
    pub fn is_exhausted(&self) -> bool {
        self.current.is_empty() && self.next.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_levels_and_visited() {
        let mut f = Frontier::with_seeds(["https://a.test/"]);
        let seed = f.pop().unwrap();
        assert_eq!(seed.origin, Origin::Seed);
        assert!(f.push_next("https://a.test/1".into()));
        assert!(f.push_next("https://a.test/2".into()));
        assert!(!f.push_next("https://a.test/1".into()));
        assert!(!f.push_next("https://a.test/".into()));
        assert!(f.pop().is_none());

        assert!(f.advance_depth());
        assert_eq!(f.depth(), 1);
        assert_eq!(f.pop().unwrap().url, "https://a.test/1");
        assert!(f.push_current("https://a.test/1?page=2".into(), Origin::Pagination { hop: 1 }));
        assert_eq!(f.pop().unwrap().url, "https://a.test/2");
        assert_eq!(f.pop().unwrap().depth, 1);
        assert!(!f.advance_depth());
        assert!(f.is_consistent());
    }

    #[test]
    fn test_mark_visited_dequeues() {
        let mut f = Frontier::with_seeds(["https://a.test/", "https://a.test/x"]);
        assert!(f.mark_visited("https://a.test/x"));
        assert_eq!(f.current_len(), 1);
        assert!(!f.mark_visited("https://a.test/x"));
        assert!(f.is_consistent());
    }

    proptest! {
        #[test]
        fn prop_queued_and_visited_stay_disjoint(ops in proptest::collection::vec((0u8..4, 0usize..8), 0..60)) {
            let mut f = Frontier::with_seeds(["u0"]);
            for (op, n) in ops {
                let url = format!("u{}", n);
                match op {
                    0 => { f.push_next(url); }
                    1 => { f.push_current(url, Origin::Link); }
                    2 => { f.pop(); }
                    _ => {
                        if f.current_len() == 0 {
                            f.advance_depth();
                        }
                    }
                }
                prop_assert!(f.is_consistent());
            }
        }
    }
}
