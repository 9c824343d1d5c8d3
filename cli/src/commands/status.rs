//! Status and cancel commands - inspect or discard the stored migration

use std::path::Path;

use anyhow::Result;
use clap::Args;
use engine::migration::{load_pending, Clock, SessionStore, SystemClock};

use super::store;
use crate::prompt;

#[derive(Args)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct CancelArgs {
    /// Skip the confirmation prompt
    #[arg(long, short)]
    pub yes: bool,
}

pub async fn execute(args: StatusArgs, state_dir: &Path) -> Result<()> {
    let store = store(state_dir);
    let Some(record) = load_pending(store.as_ref(), SystemClock.now()).await? else {
        if args.json {
            println!("null");
        } else {
            println!("No migration in progress");
        }
        return Ok(());
    };

    if args.json {
        let output = serde_json::json!({
            "details": record.details,
            "progress": record.progress,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let details = &record.details;
    println!("Account:  {}", details.did);
    println!("From:     {}", details.source_server);
    println!("To:       {} as {}", details.target_server, details.new_handle);
    println!("Status:   {}", record.status());
    if let Some(progress) = &record.progress {
        if let Some(resume_from) = progress.resume_from {
            println!("Resumes:  from {}", resume_from);
        }
        if let Some(error) = &progress.error {
            println!("Last error: {}", error);
        }
        println!("Updated:  {}", progress.last_updated.to_rfc3339());
    }
    println!("Expires:  {}", details.expires_at.to_rfc3339());
    Ok(())
}

pub async fn cancel(args: CancelArgs, state_dir: &Path) -> Result<()> {
    let store = store(state_dir);
    let Some(record) = load_pending(store.as_ref(), SystemClock.now()).await? else {
        println!("Nothing to cancel");
        return Ok(());
    };

    if !args.yes
        && !prompt::confirm(
            &format!(
                "Discard the migration of {} at {}? Remote changes are not undone",
                record.details.did,
                record.status()
            ),
            false,
        )?
    {
        return Ok(());
    }

    store.clear().await?;
    println!("Migration record discarded");
    Ok(())
}
