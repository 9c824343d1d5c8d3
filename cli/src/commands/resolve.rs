//! Resolve command - check a prospective target server

use anyhow::Result;
use clap::Args;
use engine::migration::ServerDescriptorResolver;

use super::{client, load_config};

#[derive(Args)]
pub struct ResolveArgs {
    /// Server address, with or without scheme
    pub server: String,

    /// Current server of the account, refused as a target
    #[arg(long)]
    pub source: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: ResolveArgs) -> Result<()> {
    let config = load_config()?;
    let mut resolver = ServerDescriptorResolver::new(client(&config)?, config.network.clone());
    if let Some(source) = &args.source {
        resolver = resolver.with_source_server(source);
    }

    let descriptor = resolver.resolve(&args.server).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&descriptor)?);
        return Ok(());
    }

    println!("Server:      {}", descriptor.endpoint);
    println!("DID:         {}", descriptor.did);
    println!(
        "Handles:     {}",
        if descriptor.available_handle_suffixes.is_empty() {
            "(none offered)".to_string()
        } else {
            descriptor.available_handle_suffixes.join(", ")
        }
    );
    println!(
        "Invite code: {}",
        if descriptor.invite_code_required { "required" } else { "not required" }
    );
    if descriptor.phone_verification_required {
        println!("Phone verification is required on this server");
    }
    if let Some(policy) = &descriptor.links.privacy_policy {
        println!("Privacy:     {}", policy);
    }
    if let Some(terms) = &descriptor.links.terms_of_service {
        println!("Terms:       {}", terms);
    }
    if let Some(email) = &descriptor.contact.email {
        println!("Contact:     {}", email);
    }
    Ok(())
}
