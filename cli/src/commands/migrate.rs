//! Migrate command - start or resume a migration and drive it to completion

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use engine::migration::{
    load_pending, AdvanceOutcome, Clock, CompositeReporter, EngineDeps, IdentityMethod,
    IdentityUpdate, LoggingReporter, MigrationEngine, MigrationEvent, MigrationRequest,
    MigrationStatus, ServerDescriptorResolver, SystemClock,
};
use engine::services::client::{ClientSessionCredentials, PdsClient};
use engine::services::errors::ErrorKind;

use super::{client, load_config, login_source, store};
use crate::prompt;

#[derive(Clone, Copy, ValueEnum)]
pub enum IdentityChoice {
    /// Emailed confirmation code, operation signed by the old server
    Token,
    /// Operation signed locally with your own rotation key
    RotationKey,
}

#[derive(Args)]
pub struct MigrateArgs {
    /// Handle or DID of the account to move
    #[arg(long, env = "TEKTITE_IDENTIFIER")]
    pub identifier: String,

    /// Password on the current server
    #[arg(long, env = "TEKTITE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Server to move to (ignored when resuming)
    #[arg(long)]
    pub target: Option<String>,

    /// Handle on the new server; a bare name gets the server's domain
    #[arg(long)]
    pub handle: Option<String>,

    #[arg(long)]
    pub email: Option<String>,

    #[arg(long)]
    pub invite_code: Option<String>,

    /// Password for the new account
    #[arg(long, env = "TEKTITE_NEW_PASSWORD", hide_env_values = true)]
    pub new_password: Option<String>,

    /// How to update a did:plc identity
    #[arg(long, value_enum)]
    pub identity: Option<IdentityChoice>,

    /// Rotation key (hex or multikey) for --identity rotation-key
    #[arg(long, env = "TEKTITE_ROTATION_KEY", hide_env_values = true)]
    pub rotation_key: Option<String>,
}

fn console_reporter(event: &MigrationEvent) {
    match event {
        MigrationEvent::StepBegun { step } => println!("==> {}", step.describe()),
        MigrationEvent::BlobPassStarted { pass, missing } => {
            println!("    pass {}: {} blobs to copy", pass, missing)
        }
        MigrationEvent::BlobProgress(progress)
            if progress.processed == progress.total || progress.processed % 100 == 0 =>
        {
            println!(
                "    {}/{} blobs ({}%, ~{}s left)",
                progress.processed, progress.total, progress.percent, progress.eta_seconds
            )
        }
        MigrationEvent::Warning { message } => println!("!!  {}", message),
        _ => {}
    }
}

pub async fn execute(args: MigrateArgs, state_dir: &Path) -> Result<()> {
    let config = load_config()?;
    let transport = client(&config)?;
    let store = store(state_dir);
    let reporter = CompositeReporter::new()
        .with(Arc::new(LoggingReporter))
        .with(Arc::new(console_reporter));
    let deps = EngineDeps::new(transport.clone(), store.clone())
        .with_config(config.clone())
        .with_reporter(Arc::new(reporter));

    let password = match &args.password {
        Some(password) => password.clone(),
        None => prompt::secret("Current password")?,
    };
    let source = login_source(transport.as_ref(), &args.identifier, &password).await?;

    let pending = load_pending(store.as_ref(), SystemClock.now()).await?;
    let mut engine = match pending {
        Some(record) => {
            println!(
                "Resuming migration to {} ({})",
                record.details.target_server,
                record.status()
            );
            let new_password = match &args.new_password {
                Some(password) => password.clone(),
                None => prompt::secret("Password for the new account")?,
            };
            MigrationEngine::resume(deps, source, new_password).await?
                .context("The stored migration disappeared while resuming")?
        }
        None => start(deps, transport, source, &args).await?,
    };

    drive(&mut engine, &args).await
}

async fn start(
    deps: EngineDeps,
    transport: Arc<PdsClient>,
    source: ClientSessionCredentials,
    args: &MigrateArgs,
) -> Result<MigrationEngine> {
    let target = match &args.target {
        Some(target) => target.clone(),
        None => prompt::text("New server")?,
    };
    let resolver = ServerDescriptorResolver::new(transport, deps.config.network.clone())
        .with_source_server(&source.pds);
    let descriptor = resolver.resolve(&target).await?;
    println!("Target {} ({})", descriptor.endpoint, descriptor.did);

    let new_handle = match &args.handle {
        Some(handle) => handle.clone(),
        None => prompt::text(&format!(
            "New handle (domains: {})",
            descriptor.available_handle_suffixes.join(", ")
        ))?,
    };
    let new_email = match &args.email {
        Some(email) => email.clone(),
        None => prompt::text("Email")?,
    };
    let invite_code = match &args.invite_code {
        Some(code) => Some(code.clone()),
        None if descriptor.invite_code_required => Some(prompt::text("Invite code")?),
        None => None,
    };
    let new_password = match &args.new_password {
        Some(password) => password.clone(),
        None => {
            let first = prompt::secret("Password for the new account")?;
            if first != prompt::secret("Confirm password")? {
                bail!("Passwords do not match");
            }
            first
        }
    };

    let request = MigrationRequest {
        target_server: descriptor.endpoint.clone(),
        invite_code,
        new_handle,
        new_email,
        new_password,
    };
    Ok(MigrationEngine::start(deps, source, descriptor, request).await?)
}

async fn drive(engine: &mut MigrationEngine, args: &MigrateArgs) -> Result<()> {
    let mut preset_key = args.rotation_key.clone();
    loop {
        match engine.advance().await {
            Ok(AdvanceOutcome::Completed) => {
                println!(
                    "Migration complete. Your account now lives on {}",
                    engine.session().target_server
                );
                return Ok(());
            }
            Ok(AdvanceOutcome::AwaitingDeletionToken) => {
                println!(
                    "An old, deactivated account on the new server has to be deleted first. \
                     Check your email for a confirmation code."
                );
                let token = prompt::text("Deletion code")?;
                if let Err(e) = engine.confirm_target_deletion(&token).await {
                    eprintln!("{}", e);
                }
            }
            Ok(AdvanceOutcome::AwaitingIdentityUpdate { method }) => {
                let update =
                    choose_identity_update(engine, method, args.identity, preset_key.take()).await?;
                engine.set_identity_update(update)?;
            }
            // identity input was wrong; the engine asks again
            Err(e)
                if e.kind() == ErrorKind::InputValidation
                    && engine.session().resume_from == Some(MigrationStatus::DataMigrated) =>
            {
                eprintln!("{}", e);
            }
            Err(e) => {
                eprintln!(
                    "Migration stopped at {}. Run the migrate command again to retry.",
                    engine.status()
                );
                if e.needs_manual_recovery() {
                    eprintln!("Both accounts may need manual attention before retrying.");
                }
                return Err(e.into());
            }
        }
    }
}

async fn choose_identity_update(
    engine: &mut MigrationEngine,
    method: IdentityMethod,
    preset_choice: Option<IdentityChoice>,
    preset_key: Option<String>,
) -> Result<IdentityUpdate> {
    if method == IdentityMethod::Web {
        let document = engine.recommended_did_document().await?;
        println!("Publish this document at https://<your domain>/.well-known/did.json:");
        println!("{}", serde_json::to_string_pretty(&document)?);
        while !prompt::confirm("Have you published it?", false)? {}
        return Ok(IdentityUpdate::ManualDocument);
    }

    let choice = match preset_choice {
        Some(choice) => choice,
        None => match prompt::select(
            "How should the identity be updated?",
            &["Emailed confirmation code", "My own rotation key"],
        )? {
            0 => IdentityChoice::Token,
            _ => IdentityChoice::RotationKey,
        },
    };

    match choice {
        IdentityChoice::Token => {
            if let Err(e) = engine.request_confirmation_token().await {
                eprintln!("{}", e);
            } else {
                println!("A confirmation code has been emailed to you");
            }
            loop {
                match IdentityUpdate::server_mediated(&prompt::text("Confirmation code")?) {
                    Ok(update) => return Ok(update),
                    Err(e) => eprintln!("{}", e),
                }
            }
        }
        IdentityChoice::RotationKey => {
            if let Some(key) = preset_key {
                return Ok(IdentityUpdate::self_signed(&key)?);
            }
            loop {
                match IdentityUpdate::self_signed(&prompt::secret("Rotation key")?) {
                    Ok(update) => return Ok(update),
                    Err(e) => eprintln!("{}", e),
                }
            }
        }
    }
}
