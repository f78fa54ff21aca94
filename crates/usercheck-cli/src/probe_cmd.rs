use anyhow::Result;

use usercheck_core::HarnessConfig;
use usercheck_core::client::UsersEndpoint;
use usercheck_core::probe::HealthProbe;

/// Execute `usercheck probe`: wait for the service and report how long it took.
pub async fn run_probe(config: &HarnessConfig) -> Result<()> {
    let url = match &config.probe_url {
        Some(url) => url.clone(),
        None => UsersEndpoint::parse(&config.base_url)?.collection().to_string(),
    };

    println!("Probing {url} (timeout {:?})...", config.readiness_timeout);
    let ready = HealthProbe::new()
        .wait_until_ready(&url, config.readiness_timeout, config.poll_interval)
        .await
        .map_err(|t| {
            anyhow::anyhow!(
                "{} did not answer within {:?} ({} attempts, last: {})",
                t.url,
                t.waited,
                t.attempts,
                t.last
            )
        })?;

    println!(
        "Ready: HTTP {} after {} attempt(s) in {} ms",
        ready.status,
        ready.attempts,
        ready.elapsed.as_millis()
    );
    Ok(())
}
