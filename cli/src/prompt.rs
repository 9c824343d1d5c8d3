//! Terminal prompts

use anyhow::{Context, Result};
use dialoguer::{Confirm, Input, Password, Select};

pub fn text(prompt: &str) -> Result<String> {
    Input::new()
        .with_prompt(prompt)
        .interact_text()
        .with_context(|| format!("Failed to read {}", prompt.to_lowercase()))
}

/// Empty input reads as `None`
pub fn optional(prompt: &str) -> Result<Option<String>> {
    let value: String = Input::new()
        .with_prompt(format!("{} (optional, press Enter to skip)", prompt))
        .allow_empty(true)
        .interact_text()
        .with_context(|| format!("Failed to read {}", prompt.to_lowercase()))?;
    Ok(Some(value.trim().to_string()).filter(|v| !v.is_empty()))
}

pub fn secret(prompt: &str) -> Result<String> {
    Password::new()
        .with_prompt(prompt)
        .interact()
        .with_context(|| format!("Failed to read {}", prompt.to_lowercase()))
}

pub fn confirm(prompt: &str, default: bool) -> Result<bool> {
    Confirm::new()
        .with_prompt(prompt)
        .default(default)
        .interact()
        .context("Confirmation failed")
}

pub fn select(prompt: &str, items: &[&str]) -> Result<usize> {
    Select::new()
        .with_prompt(prompt)
        .items(items)
        .default(0)
        .interact()
        .context("Selection failed")
}
