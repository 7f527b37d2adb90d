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
 *  RDAP request paths and the RDAP error object.
 */

use serde::Serialize;

pub const RDAP_MEDIA_TYPE: &str = "application/rdap+json";

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    EmptyPath,
    UnknownRequestType(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::EmptyPath => write!(f, "Request path is empty"),
            Error::UnknownRequestType(t) => write!(f, "Unknown RDAP request type: {}", t),
        }
    }
}

impl std::error::Error for Error {}

/// The RDAP query kinds the gateway routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Autnum,
    Domain,
    Entity,
    Ip,
    Nameserver,
    Help,
}

impl RequestType {
    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "autnum" => Some(RequestType::Autnum),
            "domain" => Some(RequestType::Domain),
            "entity" => Some(RequestType::Entity),
            "ip" => Some(RequestType::Ip),
            "nameserver" => Some(RequestType::Nameserver),
            "help" => Some(RequestType::Help),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Autnum => "autnum",
            RequestType::Domain => "domain",
            RequestType::Entity => "entity",
            RequestType::Ip => "ip",
            RequestType::Nameserver => "nameserver",
            RequestType::Help => "help",
        }
    }
}

/// A request path split into its RDAP request type and parameter segments.
#[derive(Debug)]
pub struct RequestPath {
    request_type: RequestType,
    params: Vec<String>,
    path: String,
}

impl RequestPath {
    /// Splits a raw request path. The leading slash is optional; anything
    /// after the type segment is a parameter.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let trimmed = raw.strip_prefix('/').unwrap_or(raw);
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Err(Error::EmptyPath);
        }
        let mut segments = trimmed.split('/');
        let head = segments.next().unwrap_or("");
        let request_type =
            RequestType::from_segment(head).ok_or_else(|| Error::UnknownRequestType(head.into()))?;
        Ok(RequestPath {
            request_type,
            params: segments.map(|s| s.to_string()).collect(),
            path: trimmed.to_string(),
        })
    }

    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// The path as forwarded upstream, no leading slash.
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// The RDAP error object, RFC 7483 section 6.
#[derive(Debug, Serialize)]
pub struct RdapError {
    #[serde(rename = "rdapConformance")]
    rdap_conformance: Vec<&'static str>,
    #[serde(rename = "errorCode")]
    error_code: u16,
    title: String,
    description: Vec<String>,
}

impl RdapError {
    pub fn new(error_code: u16, title: &str, description: Vec<String>) -> Self {
        RdapError {
            rdap_conformance: vec!["rdap_level_0"],
            error_code,
            title: title.into(),
            description,
        }
    }

    pub fn not_found(context: &str) -> Self {
        Self::new(404, "Not Found", vec![context.into()])
    }

    pub fn bad_request(why: &str) -> Self {
        Self::new(400, "Bad Request", vec![why.into()])
    }

    pub fn internal_error() -> Self {
        Self::new(500, "Internal Server Error", vec![])
    }

    pub fn error_code(&self) -> u16 {
        self.error_code
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap()
    }
}
