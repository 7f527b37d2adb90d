/*   Copyright 2024 Perry Lorier
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 *
 *  SPDX-License-Identifier: Apache-2.0
 *
 *  DNS name suffix matching.
 */

use std::collections::HashMap;
use std::sync::Arc;

use crate::authority::Authority;

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    Empty,
    BadLabel(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Empty => write!(f, "Empty domain name"),
            Error::BadLabel(l) => write!(f, "Invalid DNS label: {:?}", l),
        }
    }
}

impl std::error::Error for Error {}

/// A DNS name as a sequence of lowercased labels, root implicit.
///
/// IDNs are expected to arrive already in A-label (punycode) form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainName {
    labels: Vec<String>,
}

impl DomainName {
    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl std::str::FromStr for DomainName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let s = s.strip_suffix('.').unwrap_or(s);
        if s.is_empty() {
            return Err(Error::Empty);
        }
        let labels = s
            .split('.')
            .map(|label| {
                if label.is_empty()
                    || !label
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
                {
                    Err(Error::BadLabel(label.into()))
                } else {
                    Ok(label.to_ascii_lowercase())
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DomainName { labels })
    }
}

impl std::fmt::Display for DomainName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.labels.join("."))
    }
}

#[derive(Default)]
struct SuffixNode {
    value: Option<Arc<Authority>>,
    children: HashMap<String, SuffixNode>,
}

/// Reverse-label trie mapping registered DNS suffixes to authorities.
///
/// A query matches the longest registered suffix its labels end with, so
/// with both `uk` and `co.uk` registered, `example.co.uk` routes via
/// `co.uk`.
#[derive(Default)]
pub struct DomainSuffixMap {
    root: SuffixNode,
    entries: usize,
}

impl DomainSuffixMap {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a suffix, overwriting any authority already at exactly this
    /// suffix. The displaced authority is returned for reporting.
    pub fn insert(
        &mut self,
        suffix: &DomainName,
        authority: Arc<Authority>,
    ) -> Option<Arc<Authority>> {
        let mut node = &mut self.root;
        for label in suffix.labels.iter().rev() {
            node = node.children.entry(label.clone()).or_default();
        }
        let prev = node.value.replace(authority);
        if prev.is_none() {
            self.entries += 1;
        }
        prev
    }

    /// Longest suffix match, walking labels right to left.
    pub fn lookup(&self, name: &DomainName) -> Option<Arc<Authority>> {
        let mut node = &self.root;
        let mut best = node.value.clone();
        for label in name.labels.iter().rev() {
            match node.children.get(label) {
                Some(child) => {
                    node = child;
                    if node.value.is_some() {
                        best = node.value.clone();
                    }
                }
                None => break,
            }
        }
        best
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::authority::Authority;

    fn authority(name: &str) -> Arc<Authority> {
        Arc::new(Authority::for_test(name))
    }

    fn name(s: &str) -> DomainName {
        s.parse().unwrap()
    }

    #[test]
    fn parse_lowercases_and_strips_root_dot() {
        assert_eq!(name("Example.COM."), name("example.com"));
        assert!("".parse::<DomainName>().is_err());
        assert!(".".parse::<DomainName>().is_err());
        assert!("a..b".parse::<DomainName>().is_err());
        assert!("exa mple.com".parse::<DomainName>().is_err());
    }

    #[test]
    fn suffix_match() {
        let a = authority("a");
        let b = authority("b");
        let mut map = DomainSuffixMap::new();
        map.insert(&name("uk"), a);
        map.insert(&name("co.uk"), b);

        assert_eq!(map.lookup(&name("example.co.uk")).unwrap().name(), "b");
        assert_eq!(map.lookup(&name("example.uk")).unwrap().name(), "a");
        assert!(map.lookup(&name("example.com")).is_none());
    }

    #[test]
    fn deeper_registration_wins() {
        let a = authority("a");
        let b = authority("b");
        let mut map = DomainSuffixMap::new();
        map.insert(&name("co.uk"), a);
        map.insert(&name("bbc.co.uk"), b);

        assert_eq!(map.lookup(&name("news.bbc.co.uk")).unwrap().name(), "b");
        assert_eq!(map.lookup(&name("news.itv.co.uk")).unwrap().name(), "a");
    }

    #[test]
    fn matching_is_case_insensitive() {
        let a = authority("a");
        let mut map = DomainSuffixMap::new();
        map.insert(&name("COM"), a);
        assert_eq!(map.lookup(&name("Example.Com")).unwrap().name(), "a");
    }

    #[test]
    fn exact_name_matches_its_own_suffix() {
        let a = authority("a");
        let mut map = DomainSuffixMap::new();
        map.insert(&name("com"), a);
        assert_eq!(map.lookup(&name("com")).unwrap().name(), "a");
    }

    #[test]
    fn overwrite_returns_displaced() {
        let a = authority("a");
        let b = authority("b");
        let mut map = DomainSuffixMap::new();
        assert!(map.insert(&name("com"), a).is_none());
        assert_eq!(map.insert(&name("com"), b).unwrap().name(), "a");
        assert_eq!(map.len(), 1);
    }
}
