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
 *  The registry of RDAP serving organisations and their server URIs.
 */

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    InvalidUri(String),
    ServerConflict {
        uri: String,
        owner: String,
        claimant: String,
    },
    AmbiguousAuthority(Vec<String>),
    DuplicateName(String),
    NoSuchAuthority(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidUri(uri) => write!(f, "Invalid server URI: {}", uri),
            Error::ServerConflict {
                uri,
                owner,
                claimant,
            } => write!(
                f,
                "Server URI {} already belongs to {}, cannot be claimed by {}",
                uri, owner, claimant
            ),
            Error::AmbiguousAuthority(names) => write!(
                f,
                "Server URIs are split between multiple authorities: {}",
                names.join(", ")
            ),
            Error::DuplicateName(name) => write!(f, "Authority {} already registered", name),
            Error::NoSuchAuthority(name) => write!(f, "No authority named {}", name),
        }
    }
}

impl std::error::Error for Error {}

/// One RDAP-serving organisation: a name, the base URIs of its servers, and
/// any aliases it is also known by.
///
/// Instances are immutable; the store replaces the whole record when servers
/// or aliases are added, so a holder of an `Arc<Authority>` always sees a
/// consistent snapshot.
#[derive(Debug)]
pub struct Authority {
    name: String,
    servers: Vec<String>,
    aliases: Vec<String>,
}

impl Authority {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonicalised base URIs, sorted.
    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// The server queries are forwarded to.
    pub fn primary_server(&self) -> Option<&str> {
        self.servers.first().map(|s| s.as_str())
    }

    #[cfg(test)]
    pub fn for_test(name: &str) -> Self {
        Authority {
            name: name.into(),
            servers: vec![],
            aliases: vec![],
        }
    }
}

/// Canonical form of a server URI: lowercase scheme and host, default port
/// dropped, path given a trailing slash. Two bootstrap entries that differ
/// only in these respects are the same server.
pub fn canonicalise_uri(raw: &str) -> Result<String, Error> {
    let mut url = url::Url::parse(raw.trim()).map_err(|_| Error::InvalidUri(raw.into()))?;
    match url.scheme() {
        "http" | "https" => (),
        _ => return Err(Error::InvalidUri(raw.into())),
    }
    if url.host_str().is_none() {
        return Err(Error::InvalidUri(raw.into()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url.to_string())
}

#[derive(Default)]
struct Inner {
    by_name: HashMap<String, Arc<Authority>>,
    /* alias -> authority name */
    aliases: HashMap<String, String>,
    /* canonical server URI -> authority name */
    by_server: HashMap<String, String>,
}

/// Owns every `Authority` in the process and enforces that no server URI
/// belongs to more than one of them.
#[derive(Default)]
pub struct AuthorityStore {
    inner: Mutex<Inner>,
}

impl AuthorityStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a named authority (operator configuration). URIs are
    /// canonicalised here; callers pass them as written.
    pub fn register(
        &self,
        name: &str,
        servers: &[String],
        aliases: &[String],
    ) -> Result<Arc<Authority>, Error> {
        let mut canonical = servers
            .iter()
            .map(|s| canonicalise_uri(s))
            .collect::<Result<Vec<_>, _>>()?;
        canonical.sort();
        canonical.dedup();

        let mut inner = self.inner.lock().unwrap();
        if inner.by_name.contains_key(name) || inner.aliases.contains_key(name) {
            return Err(Error::DuplicateName(name.into()));
        }
        for uri in &canonical {
            if let Some(owner) = inner.by_server.get(uri) {
                return Err(Error::ServerConflict {
                    uri: uri.clone(),
                    owner: owner.clone(),
                    claimant: name.into(),
                });
            }
        }
        let authority = Arc::new(Authority {
            name: name.into(),
            servers: canonical.clone(),
            aliases: aliases.to_vec(),
        });
        for uri in canonical {
            inner.by_server.insert(uri, name.into());
        }
        for alias in aliases {
            inner.aliases.insert(alias.clone(), name.into());
        }
        inner.by_name.insert(name.into(), authority.clone());
        Ok(authority)
    }

    /// Looks an authority up by name or alias.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<Authority>> {
        let inner = self.inner.lock().unwrap();
        if let Some(authority) = inner.by_name.get(name) {
            return Some(authority.clone());
        }
        let canonical = inner.aliases.get(name)?;
        inner.by_name.get(canonical).cloned()
    }

    /// Finds the authority whose server set intersects the given canonical
    /// URIs. Fails if the URIs are split between two or more authorities.
    pub fn find_by_server_uris(&self, uris: &[String]) -> Result<Option<Arc<Authority>>, Error> {
        let inner = self.inner.lock().unwrap();
        let mut matches: Vec<&String> = uris
            .iter()
            .filter_map(|uri| inner.by_server.get(uri))
            .collect();
        matches.sort();
        matches.dedup();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(inner.by_name.get(matches[0]).cloned()),
            _ => Err(Error::AmbiguousAuthority(
                matches.into_iter().cloned().collect(),
            )),
        }
    }

    /// Mints an authority for a server set nobody has claimed. The name is
    /// derived from the canonical URI set, so the same bootstrap entry mints
    /// the same authority on every refresh.
    pub fn create_anonymous(&self, uris: &[String]) -> Result<Arc<Authority>, Error> {
        let name = anonymous_name(uris);
        if let Some(existing) = self.find_by_name(&name) {
            return Ok(existing);
        }
        match self.register(&name, uris, &[]) {
            /* Lost a race against another cycle minting the same identity. */
            Err(Error::DuplicateName(_)) => self.add_servers(&name, uris),
            other => other,
        }
    }

    /// Extends an authority's server set. Any URI owned by a *different*
    /// authority is a conflict; re-adding an authority's own URI is a no-op.
    pub fn add_servers(&self, name: &str, uris: &[String]) -> Result<Arc<Authority>, Error> {
        let mut canonical = uris
            .iter()
            .map(|s| canonicalise_uri(s))
            .collect::<Result<Vec<_>, _>>()?;
        canonical.sort();
        canonical.dedup();

        let mut inner = self.inner.lock().unwrap();
        let existing = inner
            .by_name
            .get(name)
            .ok_or_else(|| Error::NoSuchAuthority(name.into()))?
            .clone();
        for uri in &canonical {
            match inner.by_server.get(uri) {
                Some(owner) if owner != name => {
                    return Err(Error::ServerConflict {
                        uri: uri.clone(),
                        owner: owner.clone(),
                        claimant: name.into(),
                    });
                }
                _ => (),
            }
        }
        let mut servers = existing.servers.clone();
        servers.extend(canonical.iter().cloned());
        servers.sort();
        servers.dedup();
        let updated = Arc::new(Authority {
            name: existing.name.clone(),
            servers,
            aliases: existing.aliases.clone(),
        });
        for uri in canonical {
            inner.by_server.insert(uri, name.into());
        }
        inner.by_name.insert(name.into(), updated.clone());
        Ok(updated)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stable synthetic name for an unnamed server set.
fn anonymous_name(uris: &[String]) -> String {
    let mut sorted = uris.to_vec();
    sorted.sort();
    sorted.dedup();
    let mut hasher = DefaultHasher::new();
    sorted.hash(&mut hasher);
    format!("anon-{:016x}", hasher.finish())
}
