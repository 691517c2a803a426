// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;
use std::time::Duration;

/// A hash-like record: named string fields under one key.
pub type Record = BTreeMap<String, String>;

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
	Missing,
	Persistent,
	Expires(Duration),
}

impl KeyTtl {
	pub fn exists(&self) -> bool {
		!matches!(self, KeyTtl::Missing)
	}

	/// Remaining time, with persistent keys treated as never expiring.
	pub fn remaining(&self) -> Option<Duration> {
		match self {
			KeyTtl::Missing => None,
			KeyTtl::Persistent => Some(Duration::MAX),
			KeyTtl::Expires(d) => Some(*d),
		}
	}
}

/// Matches `key` against a pattern where `*` is any run of characters and
/// `?` is exactly one. No other metacharacters are recognised.
pub fn glob_match(pattern: &str, key: &str) -> bool {
	let p: Vec<char> = pattern.chars().collect();
	let k: Vec<char> = key.chars().collect();

	let (mut pi, mut ki) = (0, 0);
	let mut star: Option<usize> = None;
	let mut mark = 0;

	while ki < k.len() {
		if pi < p.len() && (p[pi] == '?' || p[pi] == k[ki]) {
			pi += 1;
			ki += 1;
		} else if pi < p.len() && p[pi] == '*' {
			star = Some(pi);
			mark = ki;
			pi += 1;
		} else if let Some(s) = star {
			pi = s + 1;
			mark += 1;
			ki = mark;
		} else {
			return false;
		}
	}

	while pi < p.len() && p[pi] == '*' {
		pi += 1;
	}
	pi == p.len()
}
