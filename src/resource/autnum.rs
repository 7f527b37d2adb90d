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
 *  Autonomous system number ranges.
 */

use std::sync::Arc;

use crate::authority::Authority;

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    BadAsn(String),
    EmptyRange(u32, u32),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::BadAsn(s) => write!(f, "Invalid AS number: {}", s),
            Error::EmptyRange(low, high) => write!(f, "Empty AS range: {}-{}", low, high),
        }
    }
}

impl std::error::Error for Error {}

/// A closed interval of AS numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsnRange {
    low: u32,
    high: u32,
}

impl AsnRange {
    pub fn new(low: u32, high: u32) -> Result<Self, Error> {
        if low > high {
            return Err(Error::EmptyRange(low, high));
        }
        Ok(AsnRange { low, high })
    }

    pub fn single(asn: u32) -> Self {
        AsnRange {
            low: asn,
            high: asn,
        }
    }

    pub fn low(&self) -> u32 {
        self.low
    }

    pub fn high(&self) -> u32 {
        self.high
    }

    pub fn contains(&self, asn: u32) -> bool {
        self.low <= asn && asn <= self.high
    }
}

impl std::str::FromStr for AsnRange {
    type Err = Error;

    /// Parses the bootstrap resource forms `N` and `N-M`.
    fn from_str(s: &str) -> Result<Self, Error> {
        match s.split_once('-') {
            None => {
                let asn = s.trim().parse().map_err(|_| Error::BadAsn(s.into()))?;
                Ok(AsnRange::single(asn))
            }
            Some((low, high)) => {
                let low = low.trim().parse().map_err(|_| Error::BadAsn(s.into()))?;
                let high = high.trim().parse().map_err(|_| Error::BadAsn(s.into()))?;
                AsnRange::new(low, high)
            }
        }
    }
}

impl std::fmt::Display for AsnRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.low == self.high {
            write!(f, "{}", self.low)
        } else {
            write!(f, "{}-{}", self.low, self.high)
        }
    }
}

/// Ordered, non-overlapping AS ranges, each mapped to an authority.
///
/// Invariants after every insert: ranges are sorted by low bound, no two
/// ranges overlap, and adjacent ranges with the same authority have been
/// merged into one.
#[derive(Default)]
pub struct AsnRangeMap {
    ranges: Vec<(AsnRange, Arc<Authority>)>,
}

impl AsnRangeMap {
    pub fn new() -> Self {
        Default::default()
    }

    /// Index of the first stored range whose low bound is <= asn, if any.
    fn candidate(&self, asn: u32) -> Option<usize> {
        match self
            .ranges
            .binary_search_by_key(&asn, |(range, _)| range.low)
        {
            Ok(pos) => Some(pos),
            Err(0) => None,
            Err(pos) => Some(pos - 1),
        }
    }

    /// Inserts a mapping. The new range wins wherever it overlaps existing
    /// ranges; the overlapped parts of existing ranges are trimmed away, and
    /// ranges fully inside the new one are dropped.
    pub fn insert(&mut self, range: AsnRange, authority: Arc<Authority>) {
        let mut rebuilt = Vec::with_capacity(self.ranges.len() + 2);
        let mut inserted = false;
        for (existing, existing_authority) in self.ranges.drain(..) {
            if existing.high < range.low || existing.low > range.high {
                if !inserted && existing.low > range.high {
                    rebuilt.push((range, authority.clone()));
                    inserted = true;
                }
                rebuilt.push((existing, existing_authority));
                continue;
            }
            /* Overlap: keep whatever sticks out either side. */
            if existing.low < range.low {
                rebuilt.push((
                    AsnRange {
                        low: existing.low,
                        high: range.low - 1,
                    },
                    existing_authority.clone(),
                ));
            }
            if !inserted {
                rebuilt.push((range, authority.clone()));
                inserted = true;
            }
            if existing.high > range.high {
                rebuilt.push((
                    AsnRange {
                        low: range.high + 1,
                        high: existing.high,
                    },
                    existing_authority,
                ));
            }
        }
        if !inserted {
            rebuilt.push((range, authority));
        }
        self.ranges = coalesce(rebuilt);
    }

    /// The authority covering a single AS number.
    pub fn lookup(&self, asn: u32) -> Option<Arc<Authority>> {
        let pos = self.candidate(asn)?;
        let (range, authority) = &self.ranges[pos];
        if range.contains(asn) {
            Some(authority.clone())
        } else {
            None
        }
    }

    /// The authority covering the whole queried interval. An interval that
    /// straddles two authorities (or a gap) has no single answer.
    pub fn lookup_range(&self, range: &AsnRange) -> Option<Arc<Authority>> {
        let pos = self.candidate(range.low)?;
        let (stored, authority) = &self.ranges[pos];
        if stored.contains(range.low) && stored.contains(range.high) {
            Some(authority.clone())
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Merges adjacent ranges owned by the same authority. Input must already be
/// sorted and non-overlapping.
fn coalesce(ranges: Vec<(AsnRange, Arc<Authority>)>) -> Vec<(AsnRange, Arc<Authority>)> {
    let mut out: Vec<(AsnRange, Arc<Authority>)> = Vec::with_capacity(ranges.len());
    for (range, authority) in ranges {
        if let Some((last, last_authority)) = out.last_mut() {
            if last.high < u32::MAX
                && last.high + 1 == range.low
                && last_authority.name() == authority.name()
            {
                last.high = range.high;
                continue;
            }
        }
        out.push((range, authority));
    }
    out
}
