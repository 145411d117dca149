use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, filter::Directive, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Dependencies whose debug output drowns the catalog's own events.
const QUIET_DIRECTIVES: [&str; 2] = ["sqlx=warn", "redis=warn"];

/// Install the process-wide subscriber. Fails if one is already installed.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    tracing_subscriber::registry()
        .with(env_filter(logging))
        .with(ErrorLayer::default())
        .with(output_layer(logging.format))
        .try_init()
        .map_err(|err| InfraError::Telemetry(err.to_string()))
}

/// `RUST_LOG` wins over the configured level; the quiet directives apply
/// only when `RUST_LOG` does not mention those crates.
fn env_filter(logging: &LoggingSettings) -> EnvFilter {
    let mut filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();
    let explicit = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    for directive in QUIET_DIRECTIVES {
        let krate = directive.split('=').next().unwrap_or(directive);
        if !explicit.contains(krate)
            && let Ok(parsed) = directive.parse::<Directive>()
        {
            filter = filter.add_directive(parsed);
        }
    }
    filter
}

fn output_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(false).boxed(),
    }
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "catalog_result_cache_hit_total",
            Unit::Count,
            "Product pages served from the result cache."
        );
        describe_counter!(
            "catalog_result_cache_miss_total",
            Unit::Count,
            "Product page lookups that missed the result cache."
        );
        describe_counter!(
            "catalog_tier_fallback_total",
            Unit::Count,
            "Reads answered by the store because the mirror was unavailable."
        );
        describe_counter!(
            "catalog_rebuild_total",
            Unit::Count,
            "Completed mirror rebuilds."
        );
        describe_histogram!(
            "catalog_rebuild_ms",
            Unit::Milliseconds,
            "Mirror rebuild duration in milliseconds."
        );
    });
}
