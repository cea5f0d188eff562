use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use catalog::{LoadOrchestrator, LoadResult, ProviderEvent};
use tracing::{debug, warn};

/// Runs one full load, feeding provider completions into the orchestrator
/// until it reports a result.
///
/// A load still running after `timeout` is aborted; if the providers then
/// stay silent for `grace` as well, `Aborted` is returned without waiting for
/// the outstanding requests.
pub fn run_load(
    orchestrator: &mut LoadOrchestrator,
    events: &Receiver<ProviderEvent>,
    timeout: Duration,
    grace: Duration,
) -> LoadResult {
    let results = orchestrator.subscribe();
    if !orchestrator.load() {
        warn!("a catalog load is already running");
    }

    let deadline = Instant::now() + timeout;
    let mut aborted = false;
    loop {
        if let Some(result) = results.try_next() {
            return result;
        }
        let wait = if aborted {
            grace
        } else {
            deadline.saturating_duration_since(Instant::now())
        };
        match events.recv_timeout(wait) {
            Ok(event) => orchestrator.handle_provider_event(event),
            Err(RecvTimeoutError::Timeout) if !aborted => {
                warn!("catalog load timed out after {:?}, aborting", timeout);
                aborted = true;
                orchestrator.abort();
            }
            Err(RecvTimeoutError::Timeout) => {
                debug!("providers silent after abort");
                return results.try_next().unwrap_or(LoadResult::Aborted);
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!("provider channel closed during load");
                orchestrator.abort();
                return results.try_next().unwrap_or(LoadResult::Aborted);
            }
        }
    }
}
