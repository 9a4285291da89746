use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "conduit_engine" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines on stdout; compact text otherwise.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: true,
        }
    }
}

/// Build an `EnvFilter` directive string such as `info,conduit_llm=debug`.
pub fn filter_directives(base: Level, module_levels: &[(String, Level)]) -> String {
    let mut filter = base.to_string().to_lowercase();
    for (module, level) in module_levels {
        filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter
}

/// Parse a `target=level` override such as `conduit_engine=debug`.
pub fn parse_module_level(directive: &str) -> Result<(String, Level), String> {
    let (module, level) = directive
        .split_once('=')
        .ok_or_else(|| format!("expected target=level, got '{directive}'"))?;
    let module = module.trim();
    if module.is_empty() {
        return Err(format!("missing target in '{directive}'"));
    }
    let level = Level::from_str(level.trim()).map_err(|e| format!("{e} in '{directive}'"))?;
    Ok((module.to_string(), level))
}

/// Initialize the telemetry subsystem. Call once at startup.
///
/// Returns false when a subscriber was already installed (as happens across
/// tests); the first one stays in place.
pub fn init_telemetry(config: TelemetryConfig) -> bool {
    let filter_str = filter_directives(config.log_level, &config.module_levels);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
    });
    let text_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().compact().with_target(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_module_overrides() {
        let levels = vec![
            ("conduit_engine".to_string(), Level::DEBUG),
            ("rmcp".to_string(), Level::WARN),
        ];
        assert_eq!(
            filter_directives(Level::INFO, &levels),
            "info,conduit_engine=debug,rmcp=warn"
        );
        assert_eq!(filter_directives(Level::TRACE, &[]), "trace");
    }

    #[test]
    fn module_level_directives_parse() {
        assert_eq!(
            parse_module_level("conduit_engine=debug").unwrap(),
            ("conduit_engine".to_string(), Level::DEBUG)
        );
        assert_eq!(
            parse_module_level(" rmcp = WARN ").unwrap(),
            ("rmcp".to_string(), Level::WARN)
        );
        assert!(parse_module_level("conduit_engine").is_err());
        assert!(parse_module_level("=debug").is_err());
        assert!(parse_module_level("rmcp=loud").is_err());
    }

    #[test]
    fn repeated_init_does_not_panic() {
        init_telemetry(TelemetryConfig::default());
        assert!(!init_telemetry(TelemetryConfig::default()));
    }
}
