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
 *  Read side lookups: which authority answers for a resource.
 */

use std::sync::Arc;

use crate::authority::{Authority, AuthorityStore};
use crate::resource::domain::DomainName;
use crate::resource::ip::IpPrefix;
use crate::resource::ResourceStore;

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    NotFound,
    Malformed(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotFound => write!(f, "No authority found for resource"),
            Error::Malformed(why) => write!(f, "Malformed request: {}", why),
        }
    }
}

impl std::error::Error for Error {}

/// Resolves parsed RDAP request parameters to the responsible authority.
///
/// Every lookup runs against a single generation snapshot; lookups are pure
/// CPU work and never block on the refresh path.
#[derive(Clone)]
pub struct Directory {
    store: Arc<ResourceStore>,
    authorities: Arc<AuthorityStore>,
}

impl Directory {
    pub fn new(store: Arc<ResourceStore>, authorities: Arc<AuthorityStore>) -> Self {
        Directory { store, authorities }
    }

    pub fn autnum_authority(&self, asn: u32) -> Result<Arc<Authority>, Error> {
        self.store
            .snapshot()
            .autnum
            .lookup(asn)
            .ok_or(Error::NotFound)
    }

    pub fn ip_authority(&self, prefix: &IpPrefix) -> Result<Arc<Authority>, Error> {
        self.store.snapshot().ip.lookup(prefix).ok_or(Error::NotFound)
    }

    pub fn domain_authority(&self, name: &str) -> Result<Arc<Authority>, Error> {
        let name: DomainName = name
            .parse()
            .map_err(|e: crate::resource::domain::Error| Error::Malformed(e.to_string()))?;
        self.store
            .snapshot()
            .domain
            .lookup(&name)
            .ok_or(Error::NotFound)
    }

    /// Nameservers route like the domain they live under.
    pub fn nameserver_authority(&self, fqdn: &str) -> Result<Arc<Authority>, Error> {
        self.domain_authority(fqdn)
    }

    /// Entity handles carry the issuing registry as a trailing tag
    /// (`FOO-RIPE`); the tag resolves against authority names and aliases.
    /// A handle with no tag is well formed, there is just nobody to route
    /// it to.
    pub fn entity_authority(&self, handle: &str) -> Result<Arc<Authority>, Error> {
        if handle.is_empty() {
            return Err(Error::Malformed("empty entity handle".into()));
        }
        let tag = match handle.rsplit_once('-') {
            Some((_, tag)) if !tag.is_empty() => tag,
            _ => return Err(Error::NotFound),
        };
        self.authorities
            .find_by_name(tag)
            .or_else(|| self.authorities.find_by_name(&tag.to_ascii_lowercase()))
            .ok_or(Error::NotFound)
    }
}
