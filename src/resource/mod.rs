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
 *  The routing data the gateway answers from, installed a whole generation
 *  at a time.
 */

use std::sync::Arc;

use arc_swap::ArcSwap;

pub mod autnum;
pub mod domain;
pub mod ip;

/// One immutable snapshot of all three routing maps.
///
/// A generation is built offline by a `Builder` and never mutated once
/// installed; queries that hold a generation see consistent data for as long
/// as they keep it, however many refreshes happen meanwhile.
#[derive(Default)]
pub struct Generation {
    pub ip: ip::IpRoutingTable,
    pub autnum: autnum::AsnRangeMap,
    pub domain: domain::DomainSuffixMap,
}

impl Generation {
    pub fn mapping_count(&self) -> usize {
        self.ip.len() + self.autnum.len() + self.domain.len()
    }
}

/// Staging area for the next generation. Dropped without effect if the
/// refresh cycle that created it fails.
#[derive(Default)]
pub struct Builder {
    generation: Generation,
}

impl Builder {
    pub fn ip(&mut self) -> &mut ip::IpRoutingTable {
        &mut self.generation.ip
    }

    pub fn autnum(&mut self) -> &mut autnum::AsnRangeMap {
        &mut self.generation.autnum
    }

    pub fn domain(&mut self) -> &mut domain::DomainSuffixMap {
        &mut self.generation.domain
    }

    pub fn mapping_count(&self) -> usize {
        self.generation.mapping_count()
    }
}

/// Holds the live generation behind an atomic handle.
///
/// Readers load the handle (no lock) and keep the returned `Arc` for the
/// whole request. The committer builds the next generation privately and
/// swaps it in with a single store; concurrent commits serialise on the
/// swap, last committer wins.
pub struct ResourceStore {
    current: ArcSwap<Generation>,
}

impl ResourceStore {
    pub fn new() -> Self {
        ResourceStore {
            current: ArcSwap::from_pointee(Generation::default()),
        }
    }

    /// The generation to answer this query from.
    pub fn snapshot(&self) -> Arc<Generation> {
        self.current.load_full()
    }

    /// A fresh, empty staging builder.
    pub fn stage(&self) -> Builder {
        Builder::default()
    }

    /// Installs the builder's generation as the live one.
    pub fn commit(&self, builder: Builder) {
        self.current.store(Arc::new(builder.generation));
    }
}

impl Default for ResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::authority::Authority;

    fn authority(name: &str) -> Arc<Authority> {
        Arc::new(Authority::for_test(name))
    }

    #[test]
    fn starts_empty() {
        let store = ResourceStore::new();
        assert_eq!(store.snapshot().mapping_count(), 0);
        assert!(store
            .snapshot()
            .ip
            .lookup_addr("192.0.2.1".parse().unwrap())
            .is_none());
    }

    #[test]
    fn commit_replaces_generation() {
        let store = ResourceStore::new();
        let mut builder = store.stage();
        builder
            .ip()
            .insert(&"10.0.0.0/8".parse().unwrap(), authority("a"));
        store.commit(builder);

        let generation = store.snapshot();
        assert_eq!(
            generation
                .ip
                .lookup_addr("10.1.2.3".parse().unwrap())
                .unwrap()
                .name(),
            "a"
        );

        /* An empty commit wipes the previous mappings. */
        store.commit(store.stage());
        assert_eq!(store.snapshot().mapping_count(), 0);
    }

    #[test]
    fn held_snapshot_survives_commit() {
        let store = ResourceStore::new();
        let mut builder = store.stage();
        builder
            .autnum()
            .insert(autnum::AsnRange::new(1000, 2000).unwrap(), authority("a"));
        store.commit(builder);

        let before = store.snapshot();

        let mut builder = store.stage();
        builder
            .autnum()
            .insert(autnum::AsnRange::new(1000, 2000).unwrap(), authority("b"));
        store.commit(builder);

        assert_eq!(before.autnum.lookup(1500).unwrap().name(), "a");
        assert_eq!(store.snapshot().autnum.lookup(1500).unwrap().name(), "b");
    }

    /* A slow build must never be visible to readers until its commit: the
     * reader threads below only ever observe a generation where either no
     * mapping or every mapping of a cycle is present. */
    #[test]
    fn readers_never_observe_partial_generations() {
        let store = Arc::new(ResourceStore::new());
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for round in 0..100u32 {
                    let who = authority(&format!("gen{}", round));
                    let mut builder = store.stage();
                    for octet in 0..10u8 {
                        builder.ip().insert(
                            &format!("10.{}.0.0/16", octet).parse().unwrap(),
                            who.clone(),
                        );
                    }
                    store.commit(builder);
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let generation = store.snapshot();
                        let first = generation.ip.lookup_addr("10.0.0.1".parse().unwrap());
                        let last = generation.ip.lookup_addr("10.9.0.1".parse().unwrap());
                        match (first, last) {
                            (None, None) => (),
                            (Some(a), Some(b)) => assert_eq!(a.name(), b.name()),
                            other => panic!("torn generation: {:?}", other),
                        }
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
