use std::collections::HashSet;

use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_exchange_config(config)?;
    validate_backends(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_exchange_config(config: &AppConfig) -> Result<(), ConfigError> {
    let exchange = &config.exchange;
    if exchange.timeout_secs == 0 {
        return Err(validation_err("exchange.timeout_secs must be greater than 0"));
    }
    if exchange.connect_timeout_secs == 0 {
        return Err(validation_err(
            "exchange.connect_timeout_secs must be greater than 0",
        ));
    }
    validate_http_url("exchange.proxy", exchange.proxy.as_deref())?;
    Ok(())
}

fn validate_backends(config: &AppConfig) -> Result<(), ConfigError> {
    if config.backends.is_empty() {
        return Err(validation_err("backends cannot be empty"));
    }

    let mut names = HashSet::new();
    for backend in &config.backends {
        if backend.name.trim().is_empty() {
            return Err(validation_err("backend name cannot be empty"));
        }
        if !names.insert(backend.name.as_str()) {
            return Err(validation_err(format!(
                "duplicate backend name '{}'",
                backend.name
            )));
        }
        validate_http_url(
            &format!("Backend '{}': base_url", backend.name),
            Some(&backend.base_url),
        )?;
        if backend.api_key.trim().is_empty() {
            return Err(validation_err(format!(
                "Backend '{}': api_key cannot be empty",
                backend.name
            )));
        }
        if backend.model.trim().is_empty() {
            return Err(validation_err(format!(
                "Backend '{}': model cannot be empty",
                backend.name
            )));
        }
        if backend.max_tokens == Some(0) {
            return Err(validation_err(format!(
                "Backend '{}': max_tokens must be greater than 0 when set",
                backend.name
            )));
        }
    }

    let defaults = config
        .backends
        .iter()
        .filter(|backend| backend.is_default)
        .count();
    if defaults > 1 {
        return Err(validation_err(format!(
            "only one backend can be marked is_default, found {defaults}"
        )));
    }
    Ok(())
}

fn validate_http_url(field_name: &str, value: Option<&str>) -> Result<(), ConfigError> {
    let Some(value) = value.map(str::trim) else {
        return Ok(());
    };
    if value.is_empty() {
        return Err(validation_err(format!(
            "{field_name} cannot be empty when set"
        )));
    }
    let parsed = url::Url::parse(value)
        .map_err(|err| validation_err(format!("{field_name} is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "{field_name} must use http:// or https://"
        )));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = [
        "TRACE", "DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL", "DISABLED",
    ];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use crate::protocol::ProviderKind;

    fn backend(name: &str) -> BackendConfig {
        BackendConfig {
            name: name.to_string(),
            provider: ProviderKind::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: "sk-test".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: None,
            temperature: None,
            api_version: None,
            is_default: false,
        }
    }

    fn make_valid_config() -> AppConfig {
        AppConfig {
            backends: vec![backend("openai")],
            exchange: ExchangeConfig::default(),
            features: FeaturesConfig::default(),
        }
    }

    fn error_text(config: &AppConfig) -> String {
        validate_config(config).unwrap_err().to_string()
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&make_valid_config()).is_ok());
    }

    #[test]
    fn test_empty_backends() {
        let mut config = make_valid_config();
        config.backends.clear();
        assert!(error_text(&config).contains("backends cannot be empty"));
    }

    #[test]
    fn test_duplicate_names() {
        let mut config = make_valid_config();
        config.backends.push(backend("openai"));
        assert!(error_text(&config).contains("duplicate backend name"));
    }

    #[test]
    fn test_multiple_defaults() {
        let mut config = make_valid_config();
        config.backends[0].is_default = true;
        let mut second = backend("other");
        second.is_default = true;
        config.backends.push(second);
        assert!(error_text(&config).contains("is_default"));
    }

    #[test]
    fn test_base_url_scheme() {
        let mut config = make_valid_config();
        config.backends[0].base_url = "ftp://example.test".to_string();
        assert!(error_text(&config).contains("http:// or https://"));

        config.backends[0].base_url = "not a url".to_string();
        assert!(error_text(&config).contains("not a valid URL"));
    }

    #[test]
    fn test_empty_api_key_and_model() {
        let mut config = make_valid_config();
        config.backends[0].api_key = "  ".to_string();
        assert!(error_text(&config).contains("api_key cannot be empty"));

        let mut config = make_valid_config();
        config.backends[0].model = String::new();
        assert!(error_text(&config).contains("model cannot be empty"));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let mut config = make_valid_config();
        config.exchange.timeout_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = make_valid_config();
        config.exchange.connect_timeout_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_proxy_url() {
        let mut config = make_valid_config();
        config.exchange.proxy = Some("socks5://127.0.0.1:1080".to_string());
        assert!(error_text(&config).contains("exchange.proxy"));

        config.exchange.proxy = Some("http://127.0.0.1:3128".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_log_level() {
        let mut config = make_valid_config();
        config.features.log_level = "warning".to_string();
        assert!(validate_config(&config).is_ok());
        config.features.log_level = "LOUD".to_string();
        assert!(error_text(&config).contains("log_level"));
    }
}
