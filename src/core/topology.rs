//! In-memory topology model.
//!
//! A [`Topology`] is the parsed form of one descriptor file: a named,
//! versioned collection of providers, services, and applications. Topologies
//! are built completely before they are published and are never mutated once
//! shared; a new file version produces a brand-new value.
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::SystemTime,
};

use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{MapAccess, Visitor},
    ser::SerializeMap,
};
use thiserror::Error;

/// Insertion-ordered parameter mapping.
///
/// Re-inserting an existing name replaces the value but keeps its original
/// position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.0.push((name, value));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}

impl Serialize for Params {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Params {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ParamsVisitor;

        impl<'de> Visitor<'de> for ParamsVisitor {
            type Value = Params;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of parameter names to string values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Params, A::Error> {
                let mut params = Params::new();
                while let Some((name, value)) = access.next_entry::<String, String>()? {
                    params.insert(name, value);
                }
                Ok(params)
            }
        }

        deserializer.deserialize_map(ParamsVisitor)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid version '{0}', expected major.minor.patch")]
pub struct VersionParseError(String);

/// Semantic service version. Missing minor/patch components default to 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || VersionParseError(s.to_string());
        let mut parts = s.trim().split('.');
        let mut next = |required: bool| -> Result<u32, VersionParseError> {
            match parts.next() {
                Some(p) => p.parse().map_err(|_| err()),
                None if required => Err(err()),
                None => Ok(0),
            }
        };
        let version = Version::new(next(true)?, next(false)?, next(false)?);
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(version)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Shiro provider parameters that must be presented in this order ahead of
/// every other parameter.
const SHIRO_PARAM_ORDER: &[&str] = &[
    "sessionTimeout",
    "main.ldapRealm",
    "main.ldapContextFactory",
    "main.ldapGroupContextFactory",
    "main.ldapRealm.contextFactory",
    "main.ldapRealm.userDnTemplate",
    "main.ldapRealm.contextFactory.url",
    "main.ldapRealm.contextFactory.authenticationMechanism",
    "urls./**",
];

/// A role-scoped cross-cutting configuration block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub role: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub params: Params,
}

fn default_enabled() -> bool {
    true
}

impl Provider {
    pub fn new(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            name: name.into(),
            enabled: true,
            params: Params::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name, value);
        self
    }

    /// Parameters in display order. The Shiro authentication provider lists
    /// its well-known settings first; every other provider keeps insertion
    /// order.
    pub fn presentation_params(&self) -> Vec<(&str, &str)> {
        let mut params: Vec<(&str, &str)> = self.params.iter().collect();
        if self.name == "ShiroProvider" {
            let position = |name: &str| {
                SHIRO_PARAM_ORDER
                    .iter()
                    .position(|known| *known == name)
                    .unwrap_or(SHIRO_PARAM_ORDER.len())
            };
            // stable sort keeps insertion order for the unknown tail
            params.sort_by_key(|(name, _)| position(name));
        }
        params
    }
}

/// A role-scoped backend endpoint declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub params: Params,
    /// Replaces the default dispatch step for this service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<String>,
}

impl Service {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            name: None,
            version: None,
            urls: Vec::new(),
            params: Params::new(),
            dispatch: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.urls.push(url.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// The primary backend URL.
    pub fn url(&self) -> Option<&str> {
        self.urls.first().map(String::as_str)
    }

    /// Whether a change to the service definition `(role, name, version)`
    /// affects this declaration. Unnamed or unversioned declarations match any
    /// name or version.
    pub fn is_affected_by(&self, role: &str, name: &str, version: Option<&Version>) -> bool {
        if !self.role.eq_ignore_ascii_case(role) {
            return false;
        }
        match &self.name {
            None => true,
            Some(own) => {
                own.eq_ignore_ascii_case(name)
                    && match (&self.version, version) {
                        (None, _) => true,
                        (Some(own), Some(changed)) => own == changed,
                        (Some(_), None) => false,
                    }
            }
        }
    }
}

/// A service-shaped entity whose role is its own name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub params: Params,
}

impl Application {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            urls: Vec::new(),
            params: Params::new(),
        }
    }

    pub fn role(&self) -> &str {
        &self.name
    }

    /// Mount points this application answers on: its URLs, or its name when
    /// it declares none.
    pub fn mount_points(&self) -> Vec<String> {
        if self.urls.is_empty() {
            vec![normalize_application_url(&self.name)]
        } else {
            self.urls
                .iter()
                .map(|u| normalize_application_url(u))
                .collect()
        }
    }
}

fn normalize_application_url(url: &str) -> String {
    if url.starts_with('/') {
        url.to_string()
    } else {
        format!("/{url}")
    }
}

fn unix_epoch() -> SystemTime {
    SystemTime::UNIX_EPOCH
}

/// The parsed, in-memory configuration derived from one descriptor file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    /// Set from the file stem by the loader.
    #[serde(default)]
    pub name: String,
    /// Source file, set by the loader.
    #[serde(skip)]
    pub uri: Option<PathBuf>,
    /// Source file modification time, used as the logical version.
    #[serde(skip, default = "unix_epoch")]
    pub timestamp: SystemTime,
    #[serde(default)]
    pub generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_service_path: Option<String>,
    #[serde(default)]
    pub providers: Vec<Provider>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub applications: Vec<Application>,
}

impl Topology {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: None,
            timestamp: SystemTime::UNIX_EPOCH,
            generated: false,
            default_service_path: None,
            providers: Vec::new(),
            services: Vec::new(),
            applications: Vec::new(),
        }
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_service(mut self, service: Service) -> Self {
        self.services.push(service);
        self
    }

    pub fn with_application(mut self, application: Application) -> Self {
        self.applications.push(application);
        self
    }

    /// Stamp loader-owned attributes: identity, name from the file stem, and
    /// the modification time.
    pub fn located_at(mut self, path: &Path, timestamp: SystemTime) -> Self {
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            self.name = stem.to_string();
        }
        self.uri = Some(path.to_path_buf());
        self.timestamp = timestamp;
        self
    }

    /// Provider by role, and by name when given; otherwise the first one
    /// declared for the role.
    pub fn provider(&self, role: &str, name: Option<&str>) -> Option<&Provider> {
        self.providers
            .iter()
            .filter(|p| p.role == role)
            .find(|p| name.is_none_or(|n| p.name == n))
    }

    pub fn service(&self, role: &str, name: Option<&str>, version: Option<&Version>) -> Option<&Service> {
        self.services.iter().find(|s| {
            s.role == role && s.name.as_deref() == name && s.version.as_ref() == version
        })
    }

    /// Application mounted at `url`; a missing leading `/` is tolerated.
    pub fn application(&self, url: &str) -> Option<&Application> {
        let url = normalize_application_url(url);
        self.applications
            .iter()
            .find(|app| app.mount_points().contains(&url))
    }

    /// Whether any service is affected by a change to the given definition.
    pub fn uses_service_definition(&self, role: &str, name: &str, version: Option<&Version>) -> bool {
        self.services
            .iter()
            .any(|s| s.is_affected_by(role, name, version))
    }
}

/// Content equality: name, default service path, and the provider, service,
/// and application collections compared without regard to order. Source
/// identity and timestamp are not part of a topology's content.
impl PartialEq for Topology {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.generated == other.generated
            && self.default_service_path == other.default_service_path
            && same_elements(&self.providers, &other.providers)
            && same_elements(&self.services, &other.services)
            && same_elements(&self.applications, &other.applications)
    }
}

fn same_elements<T: PartialEq>(a: &[T], b: &[T]) -> bool {
    let count = |items: &[T], item: &T| items.iter().filter(|x| *x == item).count();
    a.len() == b.len() && a.iter().all(|item| count(a, item) == count(b, item))
}
