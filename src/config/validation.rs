use std::{collections::HashSet, net::SocketAddr};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{config::models::GatewayConfig, core::topology::Topology};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

static TOPOLOGY_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid regex"));

static PATH_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._~-]+$").expect("valid regex"));

/// Validation error types
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidField {
        field: field.into(),
        message: message.into(),
    }
}

fn collect(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
    if errors.len() <= 1 {
        return errors.pop().map_or(Ok(()), Err);
    }
    let mut message = format!("Found {} validation errors:\n", errors.len());
    for (i, error) in errors.iter().enumerate() {
        message.push_str(&format!("  {}. {}\n", i + 1, error));
    }
    Err(ValidationError::ValidationFailed { message })
}

/// Gateway configuration validator
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the whole configuration, reporting every problem at once.
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if config.listen_addr.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidListenAddress {
                address: config.listen_addr.clone(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:8443')".to_string(),
            });
        }

        let gateway_path = config.gateway_path.trim_matches('/');
        if !gateway_path.is_empty() && !PATH_SEGMENT.is_match(gateway_path) {
            errors.push(invalid(
                "gateway_path",
                "must be a single URL path segment",
            ));
        }

        if config.metrics_enabled && config.metrics_address.parse::<SocketAddr>().is_err() {
            errors.push(invalid(
                "metrics_address",
                format!("'{}' is not an IP:PORT address", config.metrics_address),
            ));
        }

        if config.backend_timeout_ms == 0 {
            errors.push(invalid("backend_timeout_ms", "must be greater than zero"));
        }

        let topology = &config.topology;
        if topology.directory.as_os_str().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "topology.directory".to_string(),
            });
        }
        if topology.extensions.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "topology.extensions".to_string(),
            });
        }
        for ext in &topology.extensions {
            if ext.is_empty() || ext.contains('.') || ext.contains('/') {
                errors.push(invalid(
                    "topology.extensions",
                    format!("'{ext}' must be a bare extension without dots"),
                ));
            }
        }
        if topology.poll_interval_ms == 0 {
            errors.push(invalid("topology.poll_interval_ms", "must be greater than zero"));
        }
        if topology.parse_retry_delay_ms == 0 {
            errors.push(invalid(
                "topology.parse_retry_delay_ms",
                "must be greater than zero",
            ));
        }
        if topology.parse_retry_delay_ms > topology.parse_retry_window_ms {
            errors.push(invalid(
                "topology.parse_retry_delay_ms",
                "must not exceed topology.parse_retry_window_ms",
            ));
        }
        if topology.redeploy_window_ms == 0 {
            errors.push(invalid(
                "topology.redeploy_window_ms",
                "must be greater than zero",
            ));
        }

        collect(errors)
    }
}

/// Structural checks on a topology before it is written or republished.
pub struct TopologyValidator;

impl TopologyValidator {
    /// A topology name doubles as a descriptor file stem, so it must stay a
    /// single path component inside the topology directory.
    pub fn validate_name(name: &str) -> ValidationResult<()> {
        if TOPOLOGY_NAME.is_match(name) {
            return Ok(());
        }
        Err(invalid(
            "name",
            format!(
                "'{name}' must start with a letter or digit and contain only letters, digits, '.', '_' or '-'"
            ),
        ))
    }

    pub fn validate(topology: &Topology) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_name(&topology.name) {
            errors.push(e);
        }

        for (i, provider) in topology.providers.iter().enumerate() {
            if provider.role.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: format!("providers[{i}].role"),
                });
            }
            if provider.name.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: format!("providers[{i}].name"),
                });
            }
        }

        for (i, service) in topology.services.iter().enumerate() {
            if service.role.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: format!("services[{i}].role"),
                });
            }
            for url in &service.urls {
                if let Err(e) = Self::validate_url(url, &format!("services[{i}].urls")) {
                    errors.push(e);
                }
            }
        }

        let mut app_names = HashSet::new();
        for (i, app) in topology.applications.iter().enumerate() {
            if app.name.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: format!("applications[{i}].name"),
                });
            } else if !app_names.insert(app.name.as_str()) {
                errors.push(invalid(
                    format!("applications[{i}].name"),
                    format!("duplicate application '{}'", app.name),
                ));
            }
        }

        collect(errors)
    }

    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(invalid(
                        context,
                        format!("URL scheme must be 'http' or 'https', got '{}'", url.scheme()),
                    ));
                }
                if url.host().is_none() {
                    return Err(invalid(context, "URL must have a valid host"));
                }
                Ok(())
            }
            Err(e) => Err(invalid(context, format!("Invalid URL format '{url_str}': {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::topology::{Application, Provider, Service};

    #[test]
    fn test_topology_names_stay_inside_the_directory() {
        assert!(TopologyValidator::validate_name("sandbox-1.dev").is_ok());
        for name in ["../escaped", "a/b", ".hidden", "", "..", "a\\b"] {
            assert!(TopologyValidator::validate_name(name).is_err(), "{name}");
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(GatewayConfigValidator::validate(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_bad_listen_address() {
        let config = GatewayConfig {
            listen_addr: "localhost".to_string(),
            ..GatewayConfig::default()
        };
        assert!(matches!(
            GatewayConfigValidator::validate(&config),
            Err(ValidationError::InvalidListenAddress { .. })
        ));
    }

    #[test]
    fn test_metrics_address_checked_only_when_enabled() {
        let mut config = GatewayConfig {
            metrics_address: "nowhere".to_string(),
            ..GatewayConfig::default()
        };
        assert!(matches!(
            GatewayConfigValidator::validate(&config),
            Err(ValidationError::InvalidField { field, .. }) if field == "metrics_address"
        ));

        config.metrics_enabled = false;
        assert!(GatewayConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_collects_multiple_errors() {
        let mut config = GatewayConfig::default();
        config.topology.extensions = vec![".json".to_string()];
        config.topology.poll_interval_ms = 0;
        config.topology.parse_retry_delay_ms = 500;

        let err = GatewayConfigValidator::validate(&config).unwrap_err();
        match err {
            ValidationError::ValidationFailed { message } => {
                assert!(message.starts_with("Found 3 validation errors"));
                assert!(message.contains("topology.extensions"));
                assert!(message.contains("poll_interval_ms"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_valid_topology() {
        let topology = Topology::new("sandbox")
            .with_provider(Provider::new("authentication", "ShiroProvider"))
            .with_service(Service::new("WEBHDFS").with_url("http://localhost:50070/webhdfs"))
            .with_application(Application::new("admin-ui"));
        assert!(TopologyValidator::validate(&topology).is_ok());
    }

    #[test]
    fn test_invalid_topology_name_and_url() {
        let topology = Topology::new("../escape")
            .with_service(Service::new("WEBHDFS").with_url("ftp://host/path"));
        let err = TopologyValidator::validate(&topology).unwrap_err();
        assert!(err.to_string().contains("2 validation errors"));
    }

    #[test]
    fn test_duplicate_application_names() {
        let topology = Topology::new("apps")
            .with_application(Application::new("ui"))
            .with_application(Application::new("ui"));
        assert!(matches!(
            TopologyValidator::validate(&topology),
            Err(ValidationError::InvalidField { .. })
        ));
    }
}
