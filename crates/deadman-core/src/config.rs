//! Endpoint definitions: the raw serde shape read from the config file and
//! the validated, immutable [`Endpoint`] each watchdog is built from.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;
use url::form_urlencoded;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid duration \"{value}\": {reason}")]
    InvalidDuration { value: String, reason: &'static str },
    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("Duplicate endpoint: {0}")]
    DuplicateEndpoint(String),
    #[error("{0}")]
    Invalid(String),
}

/// One `[[endpoints]]` record as written in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDef {
    pub endpoint: String,
    pub timeout: String,
    pub repeat_after: String,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default)]
    pub targets: Vec<TargetDef>,
}

fn default_backoff_factor() -> f64 {
    1.0
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetDef {
    pub get: Option<GetDef>,
    pub post: Option<PostDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetDef {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostDef {
    pub url: String,
    #[serde(default)]
    pub body: Option<toml::Value>,
}

/// A validated watchdog definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    /// Route suffix and metric label.
    pub name: String,
    /// Wait before the first timeout, and after every reset.
    pub timeout: Duration,
    /// Parsed and validated but not consulted by the backoff schedule.
    pub repeat_after: Duration,
    /// Multiplier applied to the previous wait after each expiry.
    pub backoff_factor: f64,
    pub targets: Vec<Target>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            timeout,
            repeat_after: timeout,
            backoff_factor: default_backoff_factor(),
            targets: Vec::new(),
        }
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_repeat_after(mut self, repeat_after: Duration) -> Self {
        self.repeat_after = repeat_after;
        self
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }

    /// The heartbeat route for this endpoint.
    pub fn route(&self) -> String {
        format!("/{}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Get { url: String },
    Post { url: String, body: PostBody },
    /// A record with neither `get` nor `post`. Kept so target indices match
    /// the configured order; skipped on every cycle.
    Unsupported { reason: String },
}

impl Target {
    pub fn get(url: impl Into<String>) -> Self {
        Target::Get { url: url.into() }
    }

    pub fn post(url: impl Into<String>, body: PostBody) -> Self {
        Target::Post {
            url: url.into(),
            body,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Target::Get { url } | Target::Post { url, .. } => Some(url),
            Target::Unsupported { .. } => None,
        }
    }

    /// Value of the `target` metric label.
    pub fn label(&self) -> &str {
        self.url().unwrap_or("")
    }
}

/// POST payload, classified once when the config is loaded.
#[derive(Debug, Clone, PartialEq)]
pub enum PostBody {
    /// Sent verbatim.
    Text(String),
    /// Form-url-encoded, keys in sorted order.
    Form(BTreeMap<String, FormValue>),
    /// Any other TOML type, or no body at all.
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    Integer(i64),
    Unsupported(String),
}

impl From<toml::Value> for FormValue {
    fn from(value: toml::Value) -> Self {
        match value {
            toml::Value::String(s) => FormValue::Text(s),
            toml::Value::Integer(i) => FormValue::Integer(i),
            other => FormValue::Unsupported(other.type_str().to_string()),
        }
    }
}

impl From<Option<toml::Value>> for PostBody {
    fn from(value: Option<toml::Value>) -> Self {
        match value {
            None => PostBody::Unsupported("missing".into()),
            Some(toml::Value::String(s)) => PostBody::Text(s),
            Some(toml::Value::Table(table)) => PostBody::Form(
                table
                    .into_iter()
                    .map(|(k, v)| (k, FormValue::from(v)))
                    .collect(),
            ),
            Some(other) => PostBody::Unsupported(other.type_str().to_string()),
        }
    }
}

impl PostBody {
    /// Render the request body, or explain why this body cannot be sent.
    pub fn encode(&self) -> Result<String, String> {
        match self {
            PostBody::Text(text) => Ok(text.clone()),
            PostBody::Form(fields) => {
                let mut form = form_urlencoded::Serializer::new(String::new());
                for (key, value) in fields {
                    match value {
                        FormValue::Text(s) => {
                            form.append_pair(key, s);
                        }
                        FormValue::Integer(i) => {
                            form.append_pair(key, &i.to_string());
                        }
                        FormValue::Unsupported(kind) => {
                            return Err(format!("field '{}' has unsupported type {}", key, kind));
                        }
                    }
                }
                Ok(form.finish())
            }
            PostBody::Unsupported(kind) => Err(format!("unsupported body type {}", kind)),
        }
    }
}

impl EndpointDef {
    pub fn to_endpoint(&self) -> Result<Endpoint, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            reason,
        };

        validate_route_name(&self.endpoint).map_err(invalid)?;

        let timeout = parse_duration(&self.timeout)?;
        if timeout.is_zero() {
            return Err(invalid("timeout must be greater than zero".into()));
        }
        let repeat_after = parse_duration(&self.repeat_after)?;

        let factor = self.backoff_factor;
        if !factor.is_finite() || factor <= 0.0 {
            return Err(invalid(format!(
                "backoffFactor must be a positive number, got {}",
                factor
            )));
        }
        if factor < 1.0 {
            warn!(
                endpoint = %self.endpoint,
                backoff_factor = factor,
                "backoffFactor below 1.0, notifications will speed up on every repeat"
            );
        }

        let mut targets = Vec::with_capacity(self.targets.len());
        for (i, t) in self.targets.iter().enumerate() {
            let target = match (&t.get, &t.post) {
                (Some(_), Some(_)) => {
                    return Err(invalid(format!(
                        "target {} has both get and post",
                        i
                    )));
                }
                (Some(get), None) => Target::get(&get.url),
                (None, Some(post)) => Target::post(&post.url, PostBody::from(post.body.clone())),
                (None, None) => {
                    warn!(endpoint = %self.endpoint, index = i, "Target has neither get nor post");
                    Target::Unsupported {
                        reason: "neither get nor post".into(),
                    }
                }
            };
            if let Some(u) = target.url() {
                if let Err(e) = url::Url::parse(u) {
                    warn!(endpoint = %self.endpoint, url = u, error = %e, "Target URL does not parse");
                }
            }
            targets.push(target);
        }

        Ok(Endpoint {
            name: self.endpoint.clone(),
            timeout,
            repeat_after,
            backoff_factor: factor,
            targets,
        })
    }
}

/// Check a route without its leading `/`. Endpoint names and the metrics
/// path become axum routes verbatim, so anything the router treats
/// specially is rejected.
pub fn validate_route_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name must not be empty".into());
    }
    if name.starts_with('/') {
        return Err("name must not start with '/'".into());
    }
    if name.contains('{') || name.contains('}') {
        return Err("name must not contain '{' or '}'".into());
    }
    if name
        .split('/')
        .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
    {
        return Err("path segments must not start with ':' or '*'".into());
    }
    Ok(())
}

/// Parse a Go-style duration such as `"30s"`, `"1h30m"` or `"1.5s"`.
///
/// Units: `ns`, `us`/`µs`, `ms`, `s`, `m`, `h`. A bare `"0"` is accepted.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason| ConfigError::InvalidDuration {
        value: input.to_string(),
        reason,
    };

    let s = input.trim();
    if s.is_empty() {
        return Err(invalid("empty duration"));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let is_numeric = |c: char| c.is_ascii_digit() || c == '.';
    let mut rest = s;
    let mut nanos = 0f64;

    while !rest.is_empty() {
        let num_len = rest.find(|c| !is_numeric(c)).unwrap_or(rest.len());
        if num_len == 0 {
            return Err(invalid("expected a number"));
        }
        let (number, tail) = rest.split_at(num_len);
        let value: f64 = number.parse().map_err(|_| invalid("malformed number"))?;

        let unit_len = tail.find(is_numeric).unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(invalid("missing unit")),
            _ => return Err(invalid("unknown unit")),
        };

        nanos += value * scale;
        rest = tail;
    }

    if !nanos.is_finite() || nanos >= u64::MAX as f64 {
        return Err(invalid("duration out of range"));
    }
    Ok(Duration::from_nanos(nanos.round() as u64))
}
