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
 *  Scraper for the IANA bootstrap registries (RFC 7484).
 */

use async_trait::async_trait;
use serde::Deserialize;

use super::{Error, Scraper};
use crate::authority::{self, AuthorityStore};
use crate::resource::autnum::AsnRange;
use crate::resource::domain::DomainName;
use crate::resource::ip::IpPrefix;
use crate::resource::{Builder, ResourceStore};

/// An RFC 7484 bootstrap document.
///
/// `publication` and `description` are carried for logging only; routing is
/// built from `services`.
#[derive(Debug, Deserialize)]
pub struct BootstrapDocument {
    version: Option<String>,
    #[serde(default)]
    publication: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    description: Option<String>,
    #[serde(default)]
    services: Vec<BootstrapService>,
}

/// One service entry: `[ [resources...], [server URIs...] ]`.
#[derive(Debug, Deserialize)]
pub struct BootstrapService(Vec<Vec<String>>);

impl BootstrapService {
    fn resources(&self) -> Result<&[String], Error> {
        self.0
            .first()
            .map(|v| v.as_slice())
            .ok_or_else(|| Error::Format("service entry missing its resource list".into()))
    }

    fn servers(&self) -> Result<&[String], Error> {
        self.0
            .get(1)
            .map(|v| v.as_slice())
            .ok_or_else(|| Error::Format("service entry missing its server list".into()))
    }
}

fn check_version(document: &BootstrapDocument, supported: &[String]) -> Result<(), Error> {
    match &document.version {
        Some(version) if supported.iter().any(|s| s == version) => Ok(()),
        other => Err(Error::Version {
            found: other.clone(),
            supported: supported.to_vec(),
        }),
    }
}

/// Which registry a document was fetched from; decides how resource strings
/// parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registry {
    Autnum,
    Domain,
    Ipv4,
    Ipv6,
}

impl Registry {
    fn path(&self) -> &'static str {
        match self {
            Registry::Autnum => "asn.json",
            Registry::Domain => "dns.json",
            Registry::Ipv4 => "ipv4.json",
            Registry::Ipv6 => "ipv6.json",
        }
    }
}

/// Folds one parsed document into the staging builder.
///
/// Authorities are deduplicated through the store: a service whose server
/// set intersects a known authority reuses it, anything else mints a stable
/// anonymous authority. Duplicate resource entries are last-seen-wins, with
/// the displaced authority logged.
fn materialise(
    authorities: &AuthorityStore,
    builder: &mut Builder,
    registry: Registry,
    document: &BootstrapDocument,
) -> Result<(), Error> {
    for service in &document.services {
        let canonical = service
            .servers()?
            .iter()
            .map(|uri| authority::canonicalise_uri(uri))
            .collect::<Result<Vec<_>, _>>()?;
        if canonical.is_empty() {
            return Err(Error::Format("service entry with no server URIs".into()));
        }
        let who = match authorities.find_by_server_uris(&canonical)? {
            Some(existing) => authorities.add_servers(existing.name(), &canonical)?,
            None => authorities.create_anonymous(&canonical)?,
        };
        for resource in service.resources()? {
            match registry {
                Registry::Autnum => {
                    let range: AsnRange = resource
                        .parse()
                        .map_err(|e: crate::resource::autnum::Error| Error::Format(e.to_string()))?;
                    builder.autnum().insert(range, who.clone());
                }
                Registry::Domain => {
                    let suffix: DomainName = resource
                        .parse()
                        .map_err(|e: crate::resource::domain::Error| Error::Format(e.to_string()))?;
                    if let Some(displaced) = builder.domain().insert(&suffix, who.clone()) {
                        log::warn!(
                            "Duplicate bootstrap entry for {}: {} replaces {}",
                            resource,
                            who.name(),
                            displaced.name()
                        );
                    }
                }
                Registry::Ipv4 | Registry::Ipv6 => {
                    let prefix: IpPrefix = resource
                        .parse()
                        .map_err(|e: crate::resource::ip::Error| Error::Format(e.to_string()))?;
                    if prefix.is_ipv4() != (registry == Registry::Ipv4) {
                        return Err(Error::Format(format!(
                            "{} does not belong in {}",
                            resource,
                            registry.path()
                        )));
                    }
                    if let Some(displaced) = builder.ip().insert(&prefix, who.clone()) {
                        log::warn!(
                            "Duplicate bootstrap entry for {}: {} replaces {}",
                            resource,
                            who.name(),
                            displaced.name()
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

/// Fetches the four IANA bootstrap registries and installs them as one
/// generation. Any failure leaves the live generation untouched.
pub struct IanaBootstrapScraper {
    client: reqwest::Client,
    base_uri: String,
    supported_versions: Vec<String>,
}

impl IanaBootstrapScraper {
    pub fn new(conf: &crate::config::BootstrapConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(conf.request_timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(IanaBootstrapScraper {
            client,
            base_uri: conf.base_uri.clone(),
            supported_versions: conf.supported_versions.clone(),
        })
    }

    async fn fetch(&self, registry: Registry) -> Result<BootstrapDocument, Error> {
        let uri = format!("{}{}", self.base_uri, registry.path());
        let response = self
            .client
            .get(&uri)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| Error::Network(format!("{}: {}", uri, e)))?;
        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "{}: HTTP {}",
                uri,
                response.status()
            )));
        }
        let document: BootstrapDocument = response
            .json()
            .await
            .map_err(|e| Error::Format(format!("{}: {}", uri, e)))?;
        check_version(&document, &self.supported_versions)?;
        log::debug!(
            "Fetched {} ({} services, published {})",
            uri,
            document.services.len(),
            document.publication.as_deref().unwrap_or("unknown")
        );
        Ok(document)
    }
}

#[async_trait]
impl Scraper for IanaBootstrapScraper {
    fn name(&self) -> &str {
        "iana-bootstrap"
    }

    async fn scrape(
        &self,
        store: &ResourceStore,
        authorities: &AuthorityStore,
    ) -> Result<(), Error> {
        let (asn, dns, ipv4, ipv6) = tokio::try_join!(
            self.fetch(Registry::Autnum),
            self.fetch(Registry::Domain),
            self.fetch(Registry::Ipv4),
            self.fetch(Registry::Ipv6),
        )?;

        let mut builder = store.stage();
        materialise(authorities, &mut builder, Registry::Autnum, &asn)?;
        materialise(authorities, &mut builder, Registry::Domain, &dns)?;
        materialise(authorities, &mut builder, Registry::Ipv4, &ipv4)?;
        materialise(authorities, &mut builder, Registry::Ipv6, &ipv6)?;

        super::GENERATION_MAPPINGS.set(builder.mapping_count() as i64);
        log::info!(
            "Installing bootstrap generation: {} mappings across {} authorities",
            builder.mapping_count(),
            authorities.len()
        );
        store.commit(builder);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    const ASN_JSON: &str = r#"{
        "version": "1.0",
        "publication": "2024-01-09T00:00:00Z",
        "description": "RDAP bootstrap file for Autonomous System numbers",
        "services": [
            [["4608-4865", "9216-10239"], ["https://rdap.apnic.net/"]],
            [["1877-1901"], ["https://rdap.db.ripe.net/"]]
        ]
    }"#;

    const DNS_JSON: &str = r#"{
        "version": "1.0",
        "publication": "2024-01-09T00:00:00Z",
        "description": "RDAP bootstrap file for Domain Name System registrations",
        "services": [
            [["nz", "kiwi"], ["https://rdap.example.nz/"]],
            [["uk"], ["https://rdap.nominet.uk/"]]
        ]
    }"#;

    const IPV4_JSON: &str = r#"{
        "version": "1.0",
        "publication": "2024-01-09T00:00:00Z",
        "description": "RDAP bootstrap file for IPv4 address allocations",
        "services": [
            [["203.0.0.0/10"], ["https://rdap.apnic.net/"]],
            [["193.0.0.0/8"], ["https://rdap.db.ripe.net/"]]
        ]
    }"#;

    const IPV6_JSON: &str = r#"{
        "version": "1.0",
        "publication": "2024-01-09T00:00:00Z",
        "description": "RDAP bootstrap file for IPv6 address allocations",
        "services": [
            [["2001:200::/23"], ["https://rdap.apnic.net/"]]
        ]
    }"#;

    fn parse(json: &str) -> BootstrapDocument {
        serde_json::from_str(json).unwrap()
    }

    fn materialise_all(authorities: &AuthorityStore, store: &ResourceStore) -> Builder {
        let mut builder = store.stage();
        materialise(authorities, &mut builder, Registry::Autnum, &parse(ASN_JSON)).unwrap();
        materialise(authorities, &mut builder, Registry::Domain, &parse(DNS_JSON)).unwrap();
        materialise(authorities, &mut builder, Registry::Ipv4, &parse(IPV4_JSON)).unwrap();
        materialise(authorities, &mut builder, Registry::Ipv6, &parse(IPV6_JSON)).unwrap();
        builder
    }

    #[test]
    fn version_gate() {
        let supported = vec!["1.0".to_string()];
        assert!(check_version(&parse(ASN_JSON), &supported).is_ok());

        let newer: BootstrapDocument =
            serde_json::from_str(r#"{"version": "2.0", "services": []}"#).unwrap();
        assert!(matches!(
            check_version(&newer, &supported),
            Err(Error::Version {
                found: Some(_),
                ..
            })
        ));

        let unversioned: BootstrapDocument =
            serde_json::from_str(r#"{"services": []}"#).unwrap();
        assert!(matches!(
            check_version(&unversioned, &supported),
            Err(Error::Version { found: None, .. })
        ));
    }

    #[test]
    fn materialised_lookups() {
        let authorities = AuthorityStore::new();
        let store = ResourceStore::new();
        store.commit(materialise_all(&authorities, &store));
        let generation = store.snapshot();

        let apnic = generation.autnum.lookup(4700).unwrap();
        assert_eq!(
            apnic.primary_server().unwrap(),
            "https://rdap.apnic.net/"
        );
        /* Both APNIC ranges map to the one authority. */
        assert_eq!(generation.autnum.lookup(9300).unwrap().name(), apnic.name());
        assert!(generation.autnum.lookup(100).is_none());

        let ripe = generation
            .ip
            .lookup_addr("193.0.6.139".parse().unwrap())
            .unwrap();
        assert_eq!(ripe.primary_server().unwrap(), "https://rdap.db.ripe.net/");
        assert_eq!(
            generation
                .ip
                .lookup_addr("2001:200::1".parse().unwrap())
                .unwrap()
                .name(),
            apnic.name()
        );

        assert_eq!(
            generation
                .domain
                .lookup(&"example.co.nz".parse().unwrap())
                .unwrap()
                .primary_server()
                .unwrap(),
            "https://rdap.example.nz/"
        );
    }

    #[test]
    fn services_sharing_a_server_share_an_authority() {
        let authorities = AuthorityStore::new();
        let store = ResourceStore::new();
        store.commit(materialise_all(&authorities, &store));
        let generation = store.snapshot();

        let by_asn = generation.autnum.lookup(4700).unwrap();
        let by_ip = generation
            .ip
            .lookup_addr("203.0.113.1".parse().unwrap())
            .unwrap();
        assert_eq!(by_asn.name(), by_ip.name());
        /* Four registries, but only four distinct server sets between them:
         * apnic, ripe, example.nz, nominet. */
        assert_eq!(authorities.len(), 4);
    }

    #[test]
    fn repeated_materialisation_is_idempotent() {
        let authorities = AuthorityStore::new();
        let store = ResourceStore::new();

        store.commit(materialise_all(&authorities, &store));
        let first = store.snapshot();
        store.commit(materialise_all(&authorities, &store));
        let second = store.snapshot();

        assert_eq!(first.mapping_count(), second.mapping_count());
        assert_eq!(authorities.len(), 4);
        for asn in [4608, 4865, 9216, 1877] {
            assert_eq!(
                first.autnum.lookup(asn).unwrap().name(),
                second.autnum.lookup(asn).unwrap().name()
            );
        }
    }

    #[test]
    fn malformed_resource_abandons_materialisation() {
        let authorities = AuthorityStore::new();
        let store = ResourceStore::new();
        let mut builder = store.stage();
        let bad: BootstrapDocument = serde_json::from_str(
            r#"{"version": "1.0",
                "services": [[["not-an-asn-range"], ["https://rdap.example.net/"]]]}"#,
        )
        .unwrap();
        assert!(matches!(
            materialise(&authorities, &mut builder, Registry::Autnum, &bad),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn wrong_family_is_rejected() {
        let authorities = AuthorityStore::new();
        let store = ResourceStore::new();
        let mut builder = store.stage();
        let v6_in_v4: BootstrapDocument = serde_json::from_str(
            r#"{"version": "1.0",
                "services": [[["2001:db8::/32"], ["https://rdap.example.net/"]]]}"#,
        )
        .unwrap();
        assert!(matches!(
            materialise(&authorities, &mut builder, Registry::Ipv4, &v6_in_v4),
            Err(Error::Format(_))
        ));
    }

    /* End to end over a local socket: four fixture endpoints, then the same
     * cycle again with one endpoint broken. */
    async fn fixture_server(
        break_asn: bool,
    ) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
        use hyper::service::{make_service_fn, service_fn};
        use hyper::{Body, Request, Response, StatusCode};

        let make_svc = make_service_fn(move |_conn| async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| async move {
                let body = match req.uri().path() {
                    "/asn.json" if break_asn => {
                        return Ok::<_, std::convert::Infallible>(
                            Response::builder()
                                .status(StatusCode::INTERNAL_SERVER_ERROR)
                                .body(Body::from("nope"))
                                .unwrap(),
                        )
                    }
                    "/asn.json" => ASN_JSON,
                    "/dns.json" => DNS_JSON,
                    "/ipv4.json" => IPV4_JSON,
                    "/ipv6.json" => IPV6_JSON,
                    _ => {
                        return Ok(Response::builder()
                            .status(StatusCode::NOT_FOUND)
                            .body(Body::from("not found"))
                            .unwrap())
                    }
                };
                Ok(Response::new(Body::from(body)))
            }))
        });
        let server = hyper::Server::bind(&"127.0.0.1:0".parse().unwrap()).serve(make_svc);
        let addr = server.local_addr();
        let handle = tokio::spawn(async move {
            let _ = server.await;
        });
        (addr, handle)
    }

    fn scraper_for(addr: std::net::SocketAddr) -> IanaBootstrapScraper {
        IanaBootstrapScraper::new(&crate::config::BootstrapConfig {
            base_uri: format!("http://{}/", addr),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn scrape_installs_a_generation() {
        let (addr, server) = fixture_server(false).await;
        let authorities = AuthorityStore::new();
        let store = ResourceStore::new();

        scraper_for(addr).scrape(&store, &authorities).await.unwrap();

        let generation = store.snapshot();
        assert_eq!(
            generation
                .domain
                .lookup(&"example.kiwi".parse().unwrap())
                .unwrap()
                .primary_server()
                .unwrap(),
            "https://rdap.example.nz/"
        );
        server.abort();
    }

    #[tokio::test]
    async fn failed_endpoint_leaves_store_untouched() {
        let (good, good_server) = fixture_server(false).await;
        let (bad, bad_server) = fixture_server(true).await;
        let authorities = AuthorityStore::new();
        let store = ResourceStore::new();

        scraper_for(good).scrape(&store, &authorities).await.unwrap();
        let before = store.snapshot();

        let err = scraper_for(bad)
            .scrape(&store, &authorities)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(_)));

        /* Still the very same generation, not merely an equal one. */
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
        good_server.abort();
        bad_server.abort();
    }
}
