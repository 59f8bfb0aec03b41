use crate::eskip;
use crate::models::settings::Settings;

/// Outcome of comprehensive settings validation. Errors prevent startup;
/// warnings are logged and startup proceeds.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Startup-time validation beyond the basic consistency checks of
/// [`Settings::validate`].
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate_comprehensive(settings: &Settings) -> ValidationResult {
        let mut result = ValidationResult::default();

        if let Err(e) = settings.validate() {
            result.errors.push(e);
        }

        if let Some(path) = &settings.routes_file {
            if !std::path::Path::new(path).exists() {
                result.warnings.push(format!(
                    "routes file {} does not exist yet; the table stays empty until it appears",
                    path
                ));
            }
        }

        if let Some(routes) = &settings.routes {
            if let Err(e) = eskip::parse(routes) {
                result.errors.push(format!("inline routes: {}", e));
            }
        }

        for (authority, chain) in &settings.default_filters {
            if let Err(e) = eskip::parse_filters(chain) {
                result
                    .errors
                    .push(format!("default filters for {}: {}", authority, e));
            }
            if !authority.contains(':') {
                result.warnings.push(format!(
                    "default filter key {} has no port; it will never match a backend authority",
                    authority
                ));
            }
        }

        if let Some(breaker) = &settings.breaker {
            if breaker.failure_threshold == 0 || breaker.success_threshold == 0 {
                result
                    .errors
                    .push("breaker thresholds must be greater than 0".to_string());
            }
            if let Some(window) = breaker.window {
                if window < breaker.failure_threshold {
                    result.errors.push(
                        "breaker window must be at least the failure threshold".to_string(),
                    );
                }
            }
        }

        if let Some(factor) = settings.consistent_hash_balance_factor {
            if factor < 1.0 {
                result
                    .errors
                    .push("consistent_hash_balance_factor must be at least 1".to_string());
            }
        }

        if settings.timeout_secs > 300 {
            result.warnings.push(format!(
                "timeout_secs {} is unusually high for a proxy",
                settings.timeout_secs
            ));
        }
        if settings.poll_interval_secs == 1 {
            result
                .warnings
                .push("poll_interval_secs of 1 re-reads route sources every second".to_string());
        }

        result.is_valid = result.errors.is_empty();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_settings() -> Settings {
        Settings {
            routes: Some("r: * -> <shunt>;".to_string()),
            ..Settings::default()
        }
    }

    #[test]
    fn valid_settings_pass() {
        let result = ConfigValidator::validate_comprehensive(&valid_settings());
        assert!(result.is_valid, "errors: {:?}", result.errors);
    }

    #[test]
    fn bad_inline_routes_fail() {
        let mut settings = valid_settings();
        settings.routes = Some("definitely not routes".to_string());
        let result = ConfigValidator::validate_comprehensive(&settings);
        assert!(!result.is_valid);
    }

    #[test]
    fn missing_routes_file_is_a_warning_only() {
        let mut settings = valid_settings();
        settings.routes_file = Some("/nonexistent/routes.eskip".to_string());
        let result = ConfigValidator::validate_comprehensive(&settings);
        assert!(result.is_valid);
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn bad_default_filter_chains_fail() {
        let mut settings = valid_settings();
        settings
            .default_filters
            .insert("svc:8080".to_string(), "not a chain ->".to_string());
        let result = ConfigValidator::validate_comprehensive(&settings);
        assert!(!result.is_valid);
    }

    #[test]
    fn balance_factor_below_one_fails() {
        let mut settings = valid_settings();
        settings.consistent_hash_balance_factor = Some(0.5);
        let result = ConfigValidator::validate_comprehensive(&settings);
        assert!(!result.is_valid);
    }
}
