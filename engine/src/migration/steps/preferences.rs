use tracing::{info, instrument};

use crate::migration::progress::{MigrationEvent, MigrationStep, ProgressReporter};
use crate::services::client::transport::PdsTransport;
use crate::services::client::types::ClientSessionCredentials;
use crate::services::errors::MigrationResult;

/// Copies `app.bsky.actor` preferences from source to target verbatim.
#[instrument(skip_all, err)]
pub async fn migrate_preferences(
    transport: &dyn PdsTransport,
    source: &ClientSessionCredentials,
    target: &ClientSessionCredentials,
    reporter: &dyn ProgressReporter,
) -> MigrationResult<()> {
    reporter.report(&MigrationEvent::StepBegun {
        step: MigrationStep::PreferencesMigration,
    });

    let preferences = transport.get_preferences(source).await?;
    transport.put_preferences(target, &preferences).await?;

    let count = preferences
        .get("preferences")
        .and_then(|p| p.as_array())
        .map_or(0, Vec::len);
    info!("[Migration] Copied {} preference entries", count);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::progress::LoggingReporter;
    use crate::migration::test_support::*;

    #[tokio::test]
    async fn preferences_arrive_unchanged() {
        let transport = FakeTransport::new();
        migrate_preferences(&transport, &session(SOURCE), &session(TARGET), &LoggingReporter)
            .await
            .unwrap();
        let state = transport.state();
        assert_eq!(state.stored_preferences.as_ref(), Some(&state.preferences));
    }
}
