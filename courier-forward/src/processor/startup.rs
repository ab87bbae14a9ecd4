//! Startup handshake with the source

use std::time::Duration;

use courier_common::internal;
use tracing::{debug, warn};

use crate::{
    error::{ConfigError, ForwardError},
    source::Source,
};

/// Wait for `source` to come up, then check it can support processing.
///
/// Probes the source up to `max_attempts` times, sleeping `interval` between
/// probes. When `processing` is set the source must overwrite instances in
/// place, or every processed item would be stored twice.
///
/// # Errors
///
/// Returns [`ForwardError::Connectivity`] if the source never answers, or
/// [`ConfigError::IncompatibleSource`] if it reports that it keeps both
/// copies of a modified instance.
#[tracing::instrument(level = "debug", skip(source))]
pub async fn wait_source_started(
    source: &dyn Source,
    max_attempts: u32,
    interval: Duration,
    processing: bool,
) -> Result<(), ForwardError> {
    let attempts = max_attempts.max(1);

    let mut attempt = 1;
    while !source.is_alive().await {
        if attempt >= attempts {
            return Err(ForwardError::Connectivity { attempts });
        }

        debug!(attempt, attempts, "Source not reachable yet");
        tokio::time::sleep(interval).await;
        attempt += 1;
    }

    internal!(level = INFO, "Source reachable after {attempt} attempt(s)");

    if !processing {
        return Ok(());
    }

    match source.capabilities().await {
        Ok(capabilities) => match capabilities.overwrites_instances {
            Some(true) => Ok(()),
            Some(false) => Err(ConfigError::IncompatibleSource(
                "a processor is configured but the source does not overwrite instances".to_string(),
            )
            .into()),
            None => {
                warn!("Source does not report whether it overwrites instances, processed items may be duplicated");
                Ok(())
            }
        },
        Err(e) => {
            warn!(error = %e, "Could not read source capabilities");
            Ok(())
        }
    }
}
