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
 *  Periodic ingestion of routing data.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::authority::AuthorityStore;
use crate::resource::ResourceStore;

pub mod iana;

lazy_static::lazy_static! {
    static ref SCRAPE_CYCLES: prometheus::IntCounterVec =
        prometheus::register_int_counter_vec!("rdap_scrape_cycles",
            "Scrape cycles by outcome",
            &["scraper", "result"])
        .unwrap();

    static ref GENERATION_MAPPINGS: prometheus::IntGauge =
        prometheus::register_int_gauge!("rdap_generation_mappings",
            "Mappings in the most recently installed generation")
        .unwrap();
}

#[derive(Debug)]
pub enum Error {
    Network(String),
    Version {
        found: Option<String>,
        supported: Vec<String>,
    },
    Format(String),
    Authority(crate::authority::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Network(e) => write!(f, "Bootstrap fetch failed: {}", e),
            Error::Version { found, supported } => write!(
                f,
                "Unsupported bootstrap document version {} (supported: {})",
                found.as_deref().unwrap_or("<missing>"),
                supported.join(", ")
            ),
            Error::Format(e) => write!(f, "Malformed bootstrap document: {}", e),
            Error::Authority(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<crate::authority::Error> for Error {
    fn from(e: crate::authority::Error) -> Self {
        Error::Authority(e)
    }
}

/// A source of routing data. A scrape either commits a complete new
/// generation into the store or leaves it untouched.
#[async_trait]
pub trait Scraper: Send + Sync {
    fn name(&self) -> &str;
    async fn scrape(
        &self,
        store: &ResourceStore,
        authorities: &AuthorityStore,
    ) -> Result<(), Error>;
}

/// Runs each registered scraper on a fixed interval.
///
/// The first cycle starts immediately. A scraper gets at most one cycle in
/// flight: ticks that land while a cycle is still running are skipped. On
/// shutdown, in-flight cycles are dropped at their next await point, before
/// they can commit.
pub struct ScraperScheduler {
    scrapers: Vec<(Arc<dyn Scraper>, Arc<AtomicBool>)>,
    store: Arc<ResourceStore>,
    authorities: Arc<AuthorityStore>,
    interval: std::time::Duration,
    shutdown: tokio::sync::watch::Receiver<bool>,
}

impl ScraperScheduler {
    pub fn new(
        store: Arc<ResourceStore>,
        authorities: Arc<AuthorityStore>,
        interval: std::time::Duration,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Self {
        ScraperScheduler {
            scrapers: vec![],
            store,
            authorities,
            interval,
            shutdown,
        }
    }

    pub fn add_scraper(&mut self, scraper: Arc<dyn Scraper>) {
        self.scrapers.push((scraper, Arc::new(AtomicBool::new(false))));
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = ticker.tick() => self.start_due_cycles(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        log::info!("Scraper scheduler shut down");
    }

    fn start_due_cycles(&self) {
        for (scraper, running) in &self.scrapers {
            if running.swap(true, Ordering::SeqCst) {
                log::warn!(
                    "Previous {} cycle still running, skipping this tick",
                    scraper.name()
                );
                SCRAPE_CYCLES
                    .with_label_values(&[scraper.name(), "skipped"])
                    .inc();
                continue;
            }
            let scraper = scraper.clone();
            let running = running.clone();
            let store = self.store.clone();
            let authorities = self.authorities.clone();
            let mut shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                run_cycle(&*scraper, &store, &authorities, &mut shutdown).await;
                running.store(false, Ordering::SeqCst);
            });
        }
    }
}

async fn run_cycle(
    scraper: &dyn Scraper,
    store: &ResourceStore,
    authorities: &AuthorityStore,
    shutdown: &mut tokio::sync::watch::Receiver<bool>,
) {
    let name = scraper.name();
    log::info!("Starting {} cycle", name);
    let started = std::time::Instant::now();
    tokio::select! {
        result = scraper.scrape(store, authorities) => match result {
            Ok(()) => {
                SCRAPE_CYCLES.with_label_values(&[name, "success"]).inc();
                log::info!("{} cycle complete after {:?}", name, started.elapsed());
            }
            Err(e) => {
                SCRAPE_CYCLES.with_label_values(&[name, "failure"]).inc();
                log::warn!("{} cycle failed, previous data kept: {}", name, e);
            }
        },
        _ = wait_for_shutdown(shutdown) => {
            log::info!("{} cycle abandoned by shutdown", name);
        }
    }
}

async fn wait_for_shutdown(shutdown: &mut tokio::sync::watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            /* The sender is gone, so shutdown can never be signalled. */
            futures::future::pending::<()>().await;
        }
    }
}
