use anyhow::{Result, bail};

use usercheck_core::HarnessConfig;
use usercheck_core::client::UsersClient;
use usercheck_core::reconcile::DatasetReconciler;

/// Execute `usercheck reset`: delete every visible user and verify.
pub async fn run_reset(config: &HarnessConfig) -> Result<()> {
    let client = UsersClient::connect(&config.base_url, config.step_timeout)?;
    println!("Resetting {}...", client.endpoint());

    let report = DatasetReconciler::new(client).reset_collection().await?;

    println!("{report}");
    for user in &report.residue {
        println!("  residue: user {} ({}, {})", user.id, user.username, user.email);
    }
    for err in &report.errors {
        println!("  error: {err}");
    }
    if !report.is_clean() {
        bail!("collection is not empty after reset");
    }
    Ok(())
}
