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
 *  The RDAP routing gateway daemon.
 */

use std::sync::Arc;

use clap::Parser;
use futures::stream::StreamExt as _;

use rdap_router::authority::AuthorityStore;
use rdap_router::config;
use rdap_router::directory::Directory;
use rdap_router::http;
use rdap_router::resource::ResourceStore;
use rdap_router::scraper::iana::IanaBootstrapScraper;
use rdap_router::scraper::ScraperScheduler;

#[derive(Parser, Debug)]
#[command(name = "rdap-routerd", version, about = "RDAP routing gateway")]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "rdap-router.yaml")]
    config: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let conf = config::load_config_from_path(&args.config).await?;

    let authorities = Arc::new(AuthorityStore::new());
    let mut default_authority = None;
    for authority in &conf.authorities {
        authorities.register(&authority.name, &authority.servers, &authority.aliases)?;
        if authority.default {
            default_authority = Some(authority.name.clone());
        }
    }

    let store = Arc::new(ResourceStore::new());
    let directory = Directory::new(store.clone(), authorities.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut scheduler = ScraperScheduler::new(
        store,
        authorities.clone(),
        conf.bootstrap.interval,
        shutdown_rx,
    );
    scheduler.add_scraper(Arc::new(IanaBootstrapScraper::new(&conf.bootstrap)?));

    let gateway = Arc::new(http::Gateway::new(
        directory,
        authorities,
        default_authority,
        conf.bootstrap.request_timeout,
    )?);

    let mut services = futures::stream::FuturesUnordered::new();
    services.push(tokio::spawn(scheduler.run()));
    http::run(gateway, &conf.listen).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Received interrupt, shutting down");
        }
        Some(service) = services.next() => {
            log::warn!("Service exited unexpectedly: {:?}", service);
        }
    }

    /* Tell in-flight scrape cycles to abandon their work. */
    let _ = shutdown_tx.send(true);
    while services.next().await.is_some() {}

    Ok(())
}
