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
 *  Gateway configuration parsing.
 */
use tokio::io::AsyncReadExt;
use yaml_rust::yaml;

#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),
    Utf8Error(std::string::FromUtf8Error),
    YamlError(yaml_rust::scanner::ScanError),
    MissingConfig,
    MultipleConfigs,
    InvalidConfig(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(e) => write!(f, "{}", e),
            Error::Utf8Error(e) => write!(f, "Configuration file is not UTF-8: {}", e),
            Error::YamlError(e) => write!(f, "Configuration is not valid YAML: {}", e),
            Error::MissingConfig => write!(f, "Configuration file is empty"),
            Error::MultipleConfigs => {
                write!(f, "Configuration file holds more than one document")
            }
            Error::InvalidConfig(e) => write!(f, "Invalid configuration: {}", e),
        }
    }
}

impl std::error::Error for Error {}

fn yaml_type(fragment: &yaml::Yaml) -> &'static str {
    use yaml_rust::yaml::Yaml;
    match fragment {
        Yaml::Real(_) => "a real",
        Yaml::Integer(_) => "an integer",
        Yaml::String(_) => "a string",
        Yaml::Boolean(_) => "a boolean",
        Yaml::Array(_) => "an array",
        Yaml::Hash(_) => "a hash",
        Yaml::Alias(_) => "an alias",
        Yaml::Null => "null",
        Yaml::BadValue => "an invalid value",
    }
}

fn wrong_type(name: &str, want: &str, fragment: &yaml::Yaml) -> Error {
    Error::InvalidConfig(format!(
        "{} must be {}, not {}",
        name,
        want,
        yaml_type(fragment)
    ))
}

fn want_string(name: &str, fragment: &yaml::Yaml) -> Result<String, Error> {
    fragment
        .as_str()
        .map(String::from)
        .ok_or_else(|| wrong_type(name, "a string", fragment))
}

fn want_string_list(name: &str, fragment: &yaml::Yaml) -> Result<Vec<String>, Error> {
    fragment
        .as_vec()
        .ok_or_else(|| wrong_type(name, "a list of strings", fragment))?
        .iter()
        .map(|item| want_string(name, item))
        .collect()
}

fn want_bool(name: &str, fragment: &yaml::Yaml) -> Result<bool, Error> {
    fragment
        .as_bool()
        .ok_or_else(|| wrong_type(name, "a boolean", fragment))
}

/* Durations are a bare number of seconds, or number/unit pairs ("1d12h"). */
fn want_duration(name: &str, fragment: &yaml::Yaml) -> Result<std::time::Duration, Error> {
    if let Some(seconds) = fragment.as_i64() {
        if seconds < 0 {
            return Err(Error::InvalidConfig(format!(
                "{} cannot be negative",
                name
            )));
        }
        return Ok(std::time::Duration::from_secs(seconds as u64));
    }
    let text = fragment
        .as_str()
        .ok_or_else(|| wrong_type(name, "a duration", fragment))?;
    let mut total = 0u64;
    let mut pending: Option<u64> = None;
    for c in text.chars() {
        if let Some(digit) = c.to_digit(10) {
            pending = Some(pending.unwrap_or(0) * 10 + digit as u64);
            continue;
        }
        let scale = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86400,
            'w' => 7 * 86400,
            x if x.is_whitespace() || x == '_' => continue,
            _ => {
                return Err(Error::InvalidConfig(format!(
                    "Unexpected {} in duration {}",
                    c, name
                )))
            }
        };
        let n = pending.take().ok_or_else(|| {
            Error::InvalidConfig(format!("Missing number before {} in {}", c, name))
        })?;
        total += n * scale;
    }
    /* A trailing bare number counts as seconds. */
    total += pending.unwrap_or(0);
    Ok(std::time::Duration::from_secs(total))
}

/// Where the bootstrap data comes from and how often it is refreshed.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub base_uri: String,
    pub interval: std::time::Duration,
    pub request_timeout: std::time::Duration,
    pub supported_versions: Vec<String>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        BootstrapConfig {
            base_uri: "https://data.iana.org/rdap/".into(),
            interval: std::time::Duration::from_secs(86400),
            request_timeout: std::time::Duration::from_secs(30),
            supported_versions: vec!["1.0".into()],
        }
    }
}

impl BootstrapConfig {
    fn parse(fragment: &yaml::Yaml) -> Result<Self, Error> {
        let mut conf = BootstrapConfig::default();
        let hash = fragment
            .as_hash()
            .ok_or_else(|| wrong_type("bootstrap", "a hash", fragment))?;
        for (k, v) in hash {
            match (k.as_str(), v) {
                (Some("base-uri"), s) => {
                    let uri = want_string("base-uri", s)?;
                    conf.base_uri = if uri.ends_with('/') { uri } else { uri + "/" };
                }
                (Some("interval"), d) => conf.interval = want_duration("interval", d)?,
                (Some("request-timeout"), d) => {
                    conf.request_timeout = want_duration("request-timeout", d)?
                }
                (Some("supported-versions"), s) => {
                    conf.supported_versions = want_string_list("supported-versions", s)?
                }
                (Some(x), _) => {
                    return Err(Error::InvalidConfig(format!(
                        "Unknown bootstrap option {}",
                        x
                    )))
                }
                (None, _) => {
                    return Err(Error::InvalidConfig(format!(
                        "bootstrap should be keyed by String, not {}",
                        yaml_type(k)
                    )))
                }
            }
        }
        Ok(conf)
    }
}

/// An operator provisioned authority, loaded before the first scrape.
#[derive(Debug, Clone, Default)]
pub struct AuthorityConfig {
    pub name: String,
    pub servers: Vec<String>,
    pub aliases: Vec<String>,
    /* The default authority answers help queries. */
    pub default: bool,
}

impl AuthorityConfig {
    fn parse(fragment: &yaml::Yaml) -> Result<Self, Error> {
        let mut conf = AuthorityConfig::default();
        let hash = fragment
            .as_hash()
            .ok_or_else(|| wrong_type("authorities entry", "a hash", fragment))?;
        for (k, v) in hash {
            match (k.as_str(), v) {
                (Some("name"), s) => conf.name = want_string("name", s)?,
                (Some("servers"), s) => conf.servers = want_string_list("servers", s)?,
                (Some("aliases"), s) => conf.aliases = want_string_list("aliases", s)?,
                (Some("default"), b) => conf.default = want_bool("default", b)?,
                (Some(x), _) => {
                    return Err(Error::InvalidConfig(format!(
                        "Unknown authority option {}",
                        x
                    )))
                }
                (None, _) => {
                    return Err(Error::InvalidConfig(format!(
                        "authorities should be keyed by String, not {}",
                        yaml_type(k)
                    )))
                }
            }
        }
        if conf.name.is_empty() {
            return Err(Error::InvalidConfig(
                "authorities entries need a name".into(),
            ));
        }
        if conf.servers.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "authority {} needs at least one server",
                conf.name
            )));
        }
        Ok(conf)
    }
}

#[derive(Debug)]
pub struct Config {
    pub listen: Vec<std::net::SocketAddr>,
    pub bootstrap: BootstrapConfig,
    pub authorities: Vec<AuthorityConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: vec!["[::]:8080".parse().unwrap()],
            bootstrap: Default::default(),
            authorities: vec![],
        }
    }
}

pub type SharedConfig = std::sync::Arc<Config>;

fn load_config_from_string(cfg: &str) -> Result<SharedConfig, Error> {
    let y = yaml::YamlLoader::load_from_str(cfg).map_err(Error::YamlError)?;
    match y.len() {
        0 => return Err(Error::MissingConfig),
        1 => (),
        _ => return Err(Error::MultipleConfigs),
    }
    if let Some(fragment) = y[0].as_hash() {
        let mut conf = Config::default();
        for (k, v) in fragment {
            match (k.as_str(), v) {
                (Some("listen"), s) => {
                    conf.listen = want_string_list("listen", s)?
                        .iter()
                        .map(|addr| {
                            addr.parse().map_err(|e| {
                                Error::InvalidConfig(format!("listen address {}: {}", addr, e))
                            })
                        })
                        .collect::<Result<_, _>>()?
                }
                (Some("bootstrap"), b) => conf.bootstrap = BootstrapConfig::parse(b)?,
                (Some("authorities"), a) => {
                    conf.authorities = a
                        .as_vec()
                        .ok_or_else(|| wrong_type("authorities", "a list", a))?
                        .iter()
                        .map(AuthorityConfig::parse)
                        .collect::<Result<_, _>>()?
                }
                (Some(x), _) => {
                    return Err(Error::InvalidConfig(format!(
                        "Unknown configuration option {}",
                        x
                    )))
                }
                (None, _) => {
                    return Err(Error::InvalidConfig(format!(
                        "Config should be keyed by String, not {}",
                        yaml_type(k)
                    )))
                }
            }
        }
        if conf
            .authorities
            .iter()
            .filter(|authority| authority.default)
            .count()
            > 1
        {
            return Err(Error::InvalidConfig(
                "Only one authority can be the default".into(),
            ));
        }
        Ok(std::sync::Arc::new(conf))
    } else {
        Err(Error::InvalidConfig(
            "Top level configuration should be a Hash".into(),
        ))
    }
}

pub async fn load_config_from_path(path: &std::path::Path) -> Result<SharedConfig, Error> {
    let mut contents = vec![];
    tokio::fs::File::open(path)
        .await
        .map_err(Error::IoError)?
        .read_to_end(&mut contents)
        .await
        .map_err(Error::IoError)?;

    let configdata = String::from_utf8(contents).map_err(Error::Utf8Error)?;
    load_config_from_string(&configdata)
}

#[test]
fn test_config_parse() -> Result<(), Error> {
    let conf = load_config_from_string(
        "---
listen: ['127.0.0.1:8080', '[::1]:8080']
bootstrap:
    base-uri: https://data.iana.org/rdap
    interval: 1d
    request-timeout: 30s
    supported-versions: ['1.0']
authorities:
    - name: apnic
      servers: ['https://rdap.apnic.net/']
      aliases: ['ap']
      default: true
    - name: ripe
      servers: ['https://rdap.db.ripe.net/']
",
    )?;
    assert_eq!(conf.listen.len(), 2);
    /* A base-uri without a trailing slash gets one. */
    assert_eq!(conf.bootstrap.base_uri, "https://data.iana.org/rdap/");
    assert_eq!(
        conf.bootstrap.interval,
        std::time::Duration::from_secs(86400)
    );
    assert_eq!(
        conf.bootstrap.request_timeout,
        std::time::Duration::from_secs(30)
    );
    assert_eq!(conf.authorities.len(), 2);
    assert!(conf.authorities[0].default);
    assert!(!conf.authorities[1].default);
    Ok(())
}

#[test]
fn test_config_defaults() {
    let conf = load_config_from_string("---\nlisten: ['127.0.0.1:8080']\n").unwrap();
    assert_eq!(conf.bootstrap.base_uri, "https://data.iana.org/rdap/");
    assert_eq!(
        conf.bootstrap.interval,
        std::time::Duration::from_secs(86400)
    );
    assert_eq!(conf.bootstrap.supported_versions, vec!["1.0".to_string()]);
    assert!(conf.authorities.is_empty());
}

#[test]
fn test_config_rejects_bad_input() {
    assert!(load_config_from_string("---\nlisten-on: ['127.0.0.1:8080']\n").is_err());
    assert!(load_config_from_string("---\nlisten: ['not-an-address']\n").is_err());
    assert!(load_config_from_string("---\nlisten: 8080\n").is_err());
    assert!(load_config_from_string("---\nbootstrap:\n    uri: x\n").is_err());
    assert!(load_config_from_string(
        "---\nauthorities:\n    - name: a\n      servers: ['https://a.example/']\n      default: true\n    - name: b\n      servers: ['https://b.example/']\n      default: true\n"
    )
    .is_err());
}

#[test]
fn test_duration() {
    assert_eq!(
        want_duration("t", &yaml::Yaml::String("5s".into())).unwrap(),
        std::time::Duration::from_secs(5)
    );
    assert_eq!(
        want_duration("t", &yaml::Yaml::String("1w2d3h4m5s".into())).unwrap(),
        std::time::Duration::from_secs(7 * 86400 + 2 * 86400 + 3 * 3600 + 4 * 60 + 5)
    );
    assert_eq!(
        want_duration("t", &yaml::Yaml::Integer(86400)).unwrap(),
        std::time::Duration::from_secs(86400)
    );
    assert!(want_duration("t", &yaml::Yaml::String("1x".into())).is_err());
    assert!(want_duration("t", &yaml::Yaml::Integer(-1)).is_err());
}
