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
 *  Longest prefix routing over IPv4 and IPv6 prefixes.
 */

use std::net::IpAddr;
use std::sync::Arc;

use crate::authority::Authority;

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    BadAddress(String),
    BadPrefixLength(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::BadAddress(a) => write!(f, "Invalid IP address: {}", a),
            Error::BadPrefixLength(l) => write!(f, "Invalid prefix length: {}", l),
        }
    }
}

impl std::error::Error for Error {}

/// An IP prefix: a network address plus a prefix length.
///
/// The constructor masks out host bits, so `10.1.2.3/8` normalises to
/// `10.0.0.0/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpPrefix {
    addr: IpAddr,
    len: u8,
}

/// Prefix bits packed into a u128, most significant bit first.
///
/// IPv4 addresses occupy the top 32 bits so that the same descent code
/// serves both families.
fn addr_bits(addr: &IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => (u32::from(*v4) as u128) << 96,
        IpAddr::V6(v6) => u128::from(*v6),
    }
}

fn family_bits(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

impl IpPrefix {
    pub fn new(addr: IpAddr, len: u8) -> Result<Self, Error> {
        let max = family_bits(&addr);
        if len > max {
            return Err(Error::BadPrefixLength(format!("/{} for {}", len, addr)));
        }
        let mask: u128 = if len == 0 {
            0
        } else {
            !0u128 << (128 - len as u32)
        };
        let masked = addr_bits(&addr) & mask;
        let addr = match addr {
            IpAddr::V4(_) => IpAddr::V4(std::net::Ipv4Addr::from((masked >> 96) as u32)),
            IpAddr::V6(_) => IpAddr::V6(std::net::Ipv6Addr::from(masked)),
        };
        Ok(IpPrefix { addr, len })
    }

    /// The host prefix covering exactly one address (/32 or /128).
    pub fn host(addr: IpAddr) -> Self {
        IpPrefix {
            len: family_bits(&addr),
            addr,
        }
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn len(&self) -> u8 {
        self.len
    }

    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }
}

impl std::str::FromStr for IpPrefix {
    type Err = Error;

    /// Parses CIDR notation, or a bare address as a host prefix.
    fn from_str(s: &str) -> Result<Self, Error> {
        match s.split_once('/') {
            None => {
                let addr: IpAddr = s.parse().map_err(|_| Error::BadAddress(s.into()))?;
                Ok(IpPrefix::host(addr))
            }
            Some((addr, len)) => {
                let addr: IpAddr = addr.parse().map_err(|_| Error::BadAddress(addr.into()))?;
                let len: u8 = len
                    .parse()
                    .map_err(|_| Error::BadPrefixLength(len.into()))?;
                IpPrefix::new(addr, len)
            }
        }
    }
}

impl std::fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

#[derive(Default)]
struct Node {
    value: Option<Arc<Authority>>,
    children: [Option<Box<Node>>; 2],
}

#[derive(Default)]
struct Trie {
    root: Node,
    entries: usize,
}

impl Trie {
    /// Places `authority` at the node for the first `len` bits of `bits`.
    /// Returns the authority previously stored there, if any.
    fn insert(&mut self, bits: u128, len: u8, authority: Arc<Authority>) -> Option<Arc<Authority>> {
        let mut node = &mut self.root;
        for depth in 0..len {
            let bit = ((bits >> (127 - depth as u32)) & 1) as usize;
            node = node.children[bit].get_or_insert_with(Default::default);
        }
        let prev = node.value.replace(authority);
        if prev.is_none() {
            self.entries += 1;
        }
        prev
    }

    /// Returns the value of the deepest valued node on the descent path,
    /// stopping after `len` bits.
    fn lookup(&self, bits: u128, len: u8) -> Option<Arc<Authority>> {
        let mut node = &self.root;
        let mut best = node.value.clone();
        for depth in 0..len {
            let bit = ((bits >> (127 - depth as u32)) & 1) as usize;
            match &node.children[bit] {
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
}

/// Longest prefix match over both address families.
///
/// The v4 and v6 tries are independent: a v4 query can never match a v6
/// prefix. Prefixes that nest inside each other all survive insertion, and a
/// lookup answers with the most specific covering prefix.
#[derive(Default)]
pub struct IpRoutingTable {
    v4: Trie,
    v6: Trie,
}

impl IpRoutingTable {
    pub fn new() -> Self {
        Default::default()
    }

    fn trie_for(&self, addr: &IpAddr) -> &Trie {
        match addr {
            IpAddr::V4(_) => &self.v4,
            IpAddr::V6(_) => &self.v6,
        }
    }

    /// Inserts a mapping, overwriting any authority already present at
    /// exactly this prefix. The displaced authority is returned so the
    /// caller can report it; an overwrite is not an error.
    pub fn insert(
        &mut self,
        prefix: &IpPrefix,
        authority: Arc<Authority>,
    ) -> Option<Arc<Authority>> {
        let bits = addr_bits(&prefix.addr);
        match prefix.addr {
            IpAddr::V4(_) => self.v4.insert(bits, prefix.len, authority),
            IpAddr::V6(_) => self.v6.insert(bits, prefix.len, authority),
        }
    }

    /// Most specific authority covering a single address.
    pub fn lookup_addr(&self, addr: IpAddr) -> Option<Arc<Authority>> {
        self.trie_for(&addr)
            .lookup(addr_bits(&addr), family_bits(&addr))
    }

    /// Most specific authority covering a prefix. The descent stops at the
    /// prefix length, so a /16 query does not match a /24 mapping inside it.
    pub fn lookup(&self, prefix: &IpPrefix) -> Option<Arc<Authority>> {
        self.trie_for(&prefix.addr)
            .lookup(addr_bits(&prefix.addr), prefix.len)
    }

    pub fn len(&self) -> usize {
        self.v4.entries + self.v6.entries
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::authority::Authority;

    fn authority(name: &str) -> Arc<Authority> {
        Arc::new(Authority::for_test(name))
    }

    fn prefix(s: &str) -> IpPrefix {
        s.parse().unwrap()
    }

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn v4_longest_prefix() {
        let a = authority("a");
        let b = authority("b");
        let mut table = IpRoutingTable::new();
        assert!(table.insert(&prefix("10.0.0.0/8"), a.clone()).is_none());
        assert!(table.insert(&prefix("10.1.0.0/16"), b.clone()).is_none());

        assert_eq!(table.lookup_addr(addr("10.1.2.3")).unwrap().name(), "b");
        assert_eq!(table.lookup_addr(addr("10.2.0.1")).unwrap().name(), "a");
        assert!(table.lookup_addr(addr("11.0.0.1")).is_none());
    }

    #[test]
    fn v6_lookup() {
        let a = authority("a");
        let mut table = IpRoutingTable::new();
        table.insert(&prefix("2001:db8::/32"), a);

        assert_eq!(table.lookup_addr(addr("2001:db8:1::1")).unwrap().name(), "a");
        assert!(table.lookup_addr(addr("2001:db9::1")).is_none());
    }

    #[test]
    fn families_are_independent() {
        let a = authority("a");
        let mut table = IpRoutingTable::new();
        table.insert(&prefix("0.0.0.0/0"), a);
        assert!(table.lookup_addr(addr("2001:db8::1")).is_none());
        assert!(table.lookup_addr(addr("192.0.2.1")).is_some());
    }

    #[test]
    fn catch_all_defers_to_more_specific() {
        let a = authority("a");
        let b = authority("b");
        let mut table = IpRoutingTable::new();
        table.insert(&prefix("0.0.0.0/0"), a);
        table.insert(&prefix("192.0.2.0/24"), b);

        assert_eq!(table.lookup_addr(addr("192.0.2.7")).unwrap().name(), "b");
        assert_eq!(table.lookup_addr(addr("198.51.100.1")).unwrap().name(), "a");
    }

    #[test]
    fn prefix_lookup_stops_at_prefix_length() {
        let a = authority("a");
        let b = authority("b");
        let mut table = IpRoutingTable::new();
        table.insert(&prefix("10.0.0.0/8"), a);
        table.insert(&prefix("10.1.0.0/16"), b);

        /* The /12 query is inside the /8 but does not reach the /16. */
        assert_eq!(table.lookup(&prefix("10.0.0.0/12")).unwrap().name(), "a");
        assert_eq!(table.lookup(&prefix("10.1.0.0/16")).unwrap().name(), "b");
        assert_eq!(table.lookup(&prefix("10.1.2.0/24")).unwrap().name(), "b");
    }

    #[test]
    fn overwrite_returns_displaced() {
        let a = authority("a");
        let b = authority("b");
        let mut table = IpRoutingTable::new();
        assert!(table.insert(&prefix("10.0.0.0/8"), a).is_none());
        let displaced = table.insert(&prefix("10.0.0.0/8"), b).unwrap();
        assert_eq!(displaced.name(), "a");
        assert_eq!(table.lookup_addr(addr("10.0.0.1")).unwrap().name(), "b");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn parse_masks_host_bits() {
        assert_eq!(prefix("10.1.2.3/8"), prefix("10.0.0.0/8"));
        assert_eq!(prefix("2001:db8::1/32"), prefix("2001:db8::/32"));
    }

    #[test]
    fn parse_bare_address_is_host_prefix() {
        assert_eq!(prefix("192.0.2.1").len(), 32);
        assert_eq!(prefix("2001:db8::1").len(), 128);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("10.0.0.0/33".parse::<IpPrefix>().is_err());
        assert!("2001:db8::/129".parse::<IpPrefix>().is_err());
        assert!("banana/8".parse::<IpPrefix>().is_err());
        assert!("10.0.0.0/banana".parse::<IpPrefix>().is_err());
    }
}
