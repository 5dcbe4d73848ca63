// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Crawl-URL parsing.
//!
//! Thin wrapper over the `url` crate that produces the two hashes the index
//! cares about: the full-URL hash (value for `url` level postings) and the
//! host hash (value for `domain` level postings, key for url→domain lookups).

use url::Url;

use crate::hash::term_key;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    pub host: String,
    /// Hash of the full normalized URL.
    pub hash: u64,
    /// Hash of the host with any leading `www.` removed, so `www.example.com`
    /// and `example.com` collapse to one domain.
    pub host_hash: u64,
}

impl ParsedUrl {
    /// Parse a raw crawl URL. Returns `None` for anything the `url` crate
    /// rejects or that has no host (mailto:, data:, relative paths).
    pub fn parse(raw: &str) -> Option<ParsedUrl> {
        let url = Url::parse(raw.trim()).ok()?;
        let host = url.host_str()?.to_lowercase();
        let domain = host.strip_prefix("www.").unwrap_or(&host);
        Some(ParsedUrl {
            hash: term_key(url.as_str()),
            host_hash: term_key(domain),
            host,
        })
    }
}
