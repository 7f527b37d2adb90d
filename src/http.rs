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
 *  HTTP services for the gateway.
 */

use std::convert::Infallible;
use std::sync::Arc;

use hyper::{Body, Method, Request, Response};

use crate::authority::{Authority, AuthorityStore};
use crate::directory::{self, Directory};
use crate::rdap::{RdapError, RequestPath, RequestType, RDAP_MEDIA_TYPE};

lazy_static::lazy_static! {
    static ref QUERIES: prometheus::IntCounterVec =
        prometheus::register_int_counter_vec!("rdap_queries",
            "RDAP queries by request type and outcome",
            &["type", "result"])
        .unwrap();
}

#[derive(Debug)]
pub enum Error {
    ListenError(std::net::SocketAddr, std::io::Error),
    ClientError(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ListenError(addr, err) => write!(f, "Failed to listen on {}: {}", addr, err),
            Error::ClientError(err) => write!(f, "Failed to set up upstream client: {}", err),
        }
    }
}

impl std::error::Error for Error {}

/// The request side of the gateway: parses RDAP paths, asks the directory
/// who is responsible, and relays the upstream answer verbatim.
pub struct Gateway {
    directory: Directory,
    authorities: Arc<AuthorityStore>,
    client: reqwest::Client,
    default_authority: Option<String>,
}

impl Gateway {
    pub fn new(
        directory: Directory,
        authorities: Arc<AuthorityStore>,
        default_authority: Option<String>,
        upstream_timeout: std::time::Duration,
    ) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(upstream_timeout)
            .build()
            .map_err(|e| Error::ClientError(e.to_string()))?;
        Ok(Gateway {
            directory,
            authorities,
            client,
            default_authority,
        })
    }

    /// The authority responsible for a parsed request path.
    fn authority_for(&self, path: &RequestPath) -> Result<Arc<Authority>, directory::Error> {
        let params = path.params();
        let one_param = || -> Result<&str, directory::Error> {
            match params {
                [p] => Ok(p.as_str()),
                _ => Err(directory::Error::Malformed(format!(
                    "{} takes exactly one parameter",
                    path.request_type().as_str()
                ))),
            }
        };
        match path.request_type() {
            RequestType::Help => self
                .default_authority
                .as_deref()
                .and_then(|name| self.authorities.find_by_name(name))
                .ok_or(directory::Error::NotFound),
            RequestType::Autnum => {
                let asn = one_param()?
                    .parse()
                    .map_err(|_| directory::Error::Malformed("invalid AS number".into()))?;
                self.directory.autnum_authority(asn)
            }
            RequestType::Ip => {
                let prefix = match params {
                    [addr] => addr.parse(),
                    [addr, len] => format!("{}/{}", addr, len).parse(),
                    _ => {
                        return Err(directory::Error::Malformed(
                            "ip takes an address and an optional prefix length".into(),
                        ))
                    }
                }
                .map_err(|e: crate::resource::ip::Error| {
                    directory::Error::Malformed(e.to_string())
                })?;
                self.directory.ip_authority(&prefix)
            }
            RequestType::Domain => self.directory.domain_authority(one_param()?),
            RequestType::Nameserver => self.directory.nameserver_authority(one_param()?),
            RequestType::Entity => self.directory.entity_authority(one_param()?),
        }
    }

    /// Relays the query to the authority's first server, copying back the
    /// status, content type, and body.
    async fn forward(
        &self,
        method: Method,
        path: &RequestPath,
        query: Option<&str>,
        authority: &Authority,
    ) -> Result<Response<Body>, String> {
        let server = authority
            .primary_server()
            .ok_or_else(|| format!("Authority {} has no servers", authority.name()))?;
        let mut url = format!("{}{}", server, path.path());
        if let Some(query) = query {
            url.push('?');
            url.push_str(query);
        }
        log::trace!("Forwarding {} to {}", path.path(), url);
        let upstream = self
            .client
            .request(method, &url)
            .send()
            .await
            .map_err(|e| format!("{}: {}", url, e))?;
        let status = upstream.status();
        let content_type = upstream.headers().get(reqwest::header::CONTENT_TYPE).cloned();
        let body = upstream
            .bytes()
            .await
            .map_err(|e| format!("{}: {}", url, e))?;
        let mut response = Response::builder().status(status);
        if let Some(content_type) = content_type {
            response = response.header(hyper::header::CONTENT_TYPE, content_type);
        }
        Ok(response.body(body.into()).unwrap())
    }
}

fn rdap_response(error: &RdapError) -> Response<Body> {
    Response::builder()
        .status(error.error_code())
        .header("Content-type", RDAP_MEDIA_TYPE)
        .body(error.to_json().into())
        .unwrap()
}

/// A help answer of last resort when no default authority is configured.
fn local_help() -> Response<Body> {
    let help = serde_json::json!({
        "rdapConformance": ["rdap_level_0"],
        "notices": [{
            "title": format!("rdap-router {}", env!("CARGO_PKG_VERSION")),
            "description": [
                "This server routes RDAP queries to the responsible registry."
            ]
        }]
    });
    Response::builder()
        .status(200)
        .header("Content-type", RDAP_MEDIA_TYPE)
        .body(help.to_string().into())
        .unwrap()
}

fn metrics_response() -> Response<Body> {
    use prometheus::Encoder as _;

    let encoder = prometheus::TextEncoder::new();
    let mut out = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut out) {
        log::warn!("Failed to encode metrics: {}", e);
        return Response::builder()
            .status(500)
            .body(Body::empty())
            .unwrap();
    }
    Response::builder()
        .status(200)
        .header("Content-type", encoder.format_type())
        .body(out.into())
        .unwrap()
}

async fn serve_rdap(
    req: Request<Body>,
    gateway: Arc<Gateway>,
) -> Result<Response<Body>, Infallible> {
    let path = match RequestPath::parse(req.uri().path()) {
        Ok(path) => path,
        Err(e) => {
            QUERIES.with_label_values(&["unknown", "malformed"]).inc();
            return Ok(rdap_response(&RdapError::not_found(&e.to_string())));
        }
    };
    let request_type = path.request_type().as_str();

    match gateway.authority_for(&path) {
        Ok(authority) => {
            let query = req.uri().query();
            match gateway
                .forward(req.method().clone(), &path, query, &authority)
                .await
            {
                Ok(response) => {
                    QUERIES.with_label_values(&[request_type, "ok"]).inc();
                    Ok(response)
                }
                Err(why) => {
                    QUERIES
                        .with_label_values(&[request_type, "upstream_error"])
                        .inc();
                    log::warn!("Upstream request failed: {}", why);
                    Ok(rdap_response(&RdapError::internal_error()))
                }
            }
        }
        Err(directory::Error::NotFound) if path.request_type() == RequestType::Help => {
            QUERIES.with_label_values(&[request_type, "ok"]).inc();
            Ok(local_help())
        }
        Err(directory::Error::NotFound) => {
            QUERIES.with_label_values(&[request_type, "not_found"]).inc();
            Ok(rdap_response(&RdapError::not_found(req.uri().path())))
        }
        Err(directory::Error::Malformed(why)) => {
            QUERIES.with_label_values(&[request_type, "malformed"]).inc();
            Ok(rdap_response(&RdapError::bad_request(&why)))
        }
    }
}

async fn serve_request(
    req: Request<Body>,
    gateway: Arc<Gateway>,
) -> Result<Response<Body>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => Ok(metrics_response()),
        (&Method::GET, _) | (&Method::HEAD, _) => serve_rdap(req, gateway).await,
        _ => Ok(rdap_response(&RdapError::new(
            405,
            "Method Not Allowed",
            vec![],
        ))),
    }
}

async fn run_listener(gateway: Arc<Gateway>, listener: tokio::net::TcpListener) {
    use hyper::service::service_fn;

    loop {
        match listener.accept().await {
            Ok((stream, _remote)) => {
                let gateway = gateway.clone();
                tokio::task::spawn(async move {
                    let srv = service_fn(move |req| serve_request(req, gateway.clone()));
                    if let Err(http_err) = hyper::server::conn::Http::new()
                        .http1_only(true)
                        .http1_keep_alive(true)
                        .serve_connection(stream, srv)
                        .await
                    {
                        log::warn!("Error while serving HTTP connection: {}", http_err);
                    }
                });
            }
            Err(e) => log::warn!("Failed to accept connection: {}", e),
        }
    }
}

/// Binds every configured listener and serves on it until the process ends.
pub async fn run(
    gateway: Arc<Gateway>,
    listen: &[std::net::SocketAddr],
) -> Result<(), Error> {
    for addr in listen {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::ListenError(*addr, e))?;
        log::info!("Listening for RDAP queries on {}", addr);
        tokio::task::spawn(run_listener(gateway.clone(), listener));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::resource::autnum::AsnRange;
    use crate::resource::ResourceStore;

    fn gateway(upstream: Option<&str>) -> Gateway {
        let authorities = Arc::new(AuthorityStore::new());
        let apnic = authorities
            .register(
                "apnic",
                &[upstream.unwrap_or("https://rdap.apnic.net/").to_string()],
                &[],
            )
            .unwrap();

        let store = Arc::new(ResourceStore::new());
        let mut builder = store.stage();
        builder
            .ip()
            .insert(&"203.0.113.0/24".parse().unwrap(), apnic.clone());
        builder
            .autnum()
            .insert(AsnRange::new(4608, 4865).unwrap(), apnic.clone());
        builder.domain().insert(&"nz".parse().unwrap(), apnic);
        store.commit(builder);

        Gateway::new(
            Directory::new(store, authorities.clone()),
            authorities,
            Some("apnic".to_string()),
            std::time::Duration::from_secs(5),
        )
        .unwrap()
    }

    fn parse_path(raw: &str) -> RequestPath {
        RequestPath::parse(raw).unwrap()
    }

    #[test]
    fn dispatch_by_request_type() {
        let gateway = gateway(None);
        assert_eq!(
            gateway
                .authority_for(&parse_path("/autnum/4700"))
                .unwrap()
                .name(),
            "apnic"
        );
        assert_eq!(
            gateway
                .authority_for(&parse_path("/ip/203.0.113.9"))
                .unwrap()
                .name(),
            "apnic"
        );
        assert_eq!(
            gateway
                .authority_for(&parse_path("/ip/203.0.113.0/24"))
                .unwrap()
                .name(),
            "apnic"
        );
        assert_eq!(
            gateway
                .authority_for(&parse_path("/domain/example.nz"))
                .unwrap()
                .name(),
            "apnic"
        );
        assert_eq!(
            gateway
                .authority_for(&parse_path("/nameserver/ns1.example.nz"))
                .unwrap()
                .name(),
            "apnic"
        );
        assert_eq!(
            gateway
                .authority_for(&parse_path("/help"))
                .unwrap()
                .name(),
            "apnic"
        );
    }

    #[test]
    fn dispatch_errors() {
        let gateway = gateway(None);
        assert!(matches!(
            gateway.authority_for(&parse_path("/autnum/64512")),
            Err(directory::Error::NotFound)
        ));
        assert!(matches!(
            gateway.authority_for(&parse_path("/autnum/banana")),
            Err(directory::Error::Malformed(_))
        ));
        assert!(matches!(
            gateway.authority_for(&parse_path("/autnum/1/2/3")),
            Err(directory::Error::Malformed(_))
        ));
        assert!(matches!(
            gateway.authority_for(&parse_path("/ip/203.0.113.0/24/extra")),
            Err(directory::Error::Malformed(_))
        ));
        assert!(matches!(
            gateway.authority_for(&parse_path("/ip/not-an-address")),
            Err(directory::Error::Malformed(_))
        ));
    }

    async fn stub_upstream() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
        use hyper::service::{make_service_fn, service_fn};

        let make_svc = make_service_fn(|_conn| async {
            Ok::<_, Infallible>(service_fn(|req: Request<Body>| async move {
                let body = format!("{{\"handle\": \"{}\"}}", req.uri());
                Ok::<_, Infallible>(
                    Response::builder()
                        .status(200)
                        .header("Content-type", RDAP_MEDIA_TYPE)
                        .body(Body::from(body))
                        .unwrap(),
                )
            }))
        });
        let server = hyper::Server::bind(&"127.0.0.1:0".parse().unwrap()).serve(make_svc);
        let addr = server.local_addr();
        let handle = tokio::spawn(async move {
            let _ = server.await;
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn forwards_to_the_responsible_authority() {
        let (upstream_addr, upstream) = stub_upstream().await;
        let gateway = Arc::new(gateway(Some(&format!("http://{}/", upstream_addr))));

        let req = Request::builder()
            .method(Method::GET)
            .uri("http://gateway/ip/203.0.113.9")
            .body(Body::empty())
            .unwrap();
        let response = serve_request(req, gateway.clone()).await.unwrap();
        assert_eq!(response.status(), 200);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"{\"handle\": \"/ip/203.0.113.9\"}");

        /* Query strings travel with the request. */
        let req = Request::builder()
            .method(Method::GET)
            .uri("http://gateway/domain/example.nz?jscard=1")
            .body(Body::empty())
            .unwrap();
        let response = serve_request(req, gateway.clone()).await.unwrap();
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"{\"handle\": \"/domain/example.nz?jscard=1\"}");

        upstream.abort();
    }

    #[tokio::test]
    async fn unroutable_queries_get_rdap_errors() {
        let gateway = Arc::new(gateway(None));

        let req = Request::builder()
            .method(Method::GET)
            .uri("http://gateway/domain/example.com")
            .body(Body::empty())
            .unwrap();
        let response = serve_request(req, gateway.clone()).await.unwrap();
        assert_eq!(response.status(), 404);
        assert_eq!(
            response.headers()["Content-type"],
            RDAP_MEDIA_TYPE
        );
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["errorCode"], 404);

        let req = Request::builder()
            .method(Method::GET)
            .uri("http://gateway/autnum/banana")
            .body(Body::empty())
            .unwrap();
        let response = serve_request(req, gateway).await.unwrap();
        assert_eq!(response.status(), 400);
    }
}
