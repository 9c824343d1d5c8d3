//! Client-side checks on user input, run before anything touches the network.

use std::fmt;

use regex::Regex;

use crate::services::errors::MigrationError;

const TOKEN_PATTERN: &str = r"^[A-Za-z0-9]{5}-[A-Za-z0-9]{5}$";
const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";
const HANDLE_LABEL_PATTERN: &str = r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$";

fn compile(pattern: &str) -> Result<Regex, MigrationError> {
    Regex::new(pattern).map_err(|e| MigrationError::fatal(format!("bad pattern {}: {}", pattern, e)))
}

/// Prefixes `https://` when the address carries no scheme.
pub fn ensure_scheme(address: &str) -> String {
    let address = address.trim();
    let lower = address.to_ascii_lowercase();
    if lower.starts_with("https://") || lower.starts_with("http://") {
        address.to_string()
    } else {
        format!("https://{}", address)
    }
}

/// Emailed confirmation code of the form `XXXXX-XXXXX`, used both for PLC
/// operation signatures and account deletion
#[derive(Clone, PartialEq, Eq)]
pub struct ConfirmationToken(String);

impl ConfirmationToken {
    pub fn parse(input: &str) -> Result<Self, MigrationError> {
        let token = input.trim();
        if compile(TOKEN_PATTERN)?.is_match(token) {
            Ok(Self(token.to_string()))
        } else {
            Err(MigrationError::validation(
                "token",
                "Token must look like XXXXX-XXXXX (letters and digits)",
            ))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ConfirmationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConfirmationToken(..)")
    }
}

/// Invite codes are minted as `<host with dots as dashes>-XXXXX-XXXXX`.
pub fn validate_invite_code(code: &str, target_host: &str) -> Result<String, MigrationError> {
    let code = code.trim();
    let prefix = regex::escape(&target_host.to_ascii_lowercase().replace('.', "-"));
    let pattern = compile(&format!(r"^{}-[a-zA-Z0-9]{{5}}-[a-zA-Z0-9]{{5}}$", prefix))?;

    if pattern.is_match(code) {
        Ok(code.to_string())
    } else {
        Err(MigrationError::validation(
            "invite_code",
            format!(
                "Invite code should look like {}-XXXXX-XXXXX",
                target_host.replace('.', "-")
            ),
        ))
    }
}

/// Completes a bare handle with the server's first domain and checks the
/// result sits directly under one of `suffixes`.
pub fn resolve_new_handle(input: &str, suffixes: &[String]) -> Result<String, MigrationError> {
    let handle = input.trim().trim_start_matches('@').to_ascii_lowercase();
    if handle.is_empty() {
        return Err(MigrationError::validation("handle", "Please enter a handle"));
    }

    let normalized: Vec<String> = suffixes
        .iter()
        .map(|suffix| {
            let suffix = suffix.to_ascii_lowercase();
            if suffix.starts_with('.') {
                suffix
            } else {
                format!(".{}", suffix)
            }
        })
        .collect();

    let handle = if handle.contains('.') {
        handle
    } else {
        match normalized.first() {
            Some(suffix) => format!("{}{}", handle, suffix),
            None => {
                return Err(MigrationError::validation(
                    "handle",
                    "Server offers no handle domains; enter a full handle",
                ))
            }
        }
    };

    let label_pattern = compile(HANDLE_LABEL_PATTERN)?;
    let matched = normalized.iter().find_map(|suffix| handle.strip_suffix(suffix.as_str()));
    match matched {
        Some(label) if label_pattern.is_match(label) => Ok(handle),
        Some(_) => Err(MigrationError::validation(
            "handle",
            "Handle may only contain letters, digits and inner hyphens",
        )),
        None => Err(MigrationError::validation(
            "handle",
            format!("Handle must end with one of: {}", normalized.join(", ")),
        )),
    }
}

pub fn validate_email(email: &str) -> Result<String, MigrationError> {
    let email = email.trim();
    if compile(EMAIL_PATTERN)?.is_match(email) {
        Ok(email.to_string())
    } else {
        Err(MigrationError::validation(
            "email",
            "Please enter a valid email address",
        ))
    }
}

pub fn validate_password(password: &str) -> Result<(), MigrationError> {
    if password.is_empty() {
        Err(MigrationError::validation("password", "Please enter a password"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_is_added_only_when_missing() {
        assert_eq!(ensure_scheme("pds.example"), "https://pds.example");
        assert_eq!(ensure_scheme(" http://pds.example "), "http://pds.example");
        assert_eq!(ensure_scheme("HTTPS://pds.example"), "HTTPS://pds.example");
    }

    #[test]
    fn token_shape() {
        assert!(ConfirmationToken::parse("abcde-12345").is_ok());
        assert!(ConfirmationToken::parse(" ABCDE-fGh1j ").is_ok());
        assert!(ConfirmationToken::parse("abcd-12345").is_err());
        assert!(ConfirmationToken::parse("abcde_12345").is_err());
        assert!(ConfirmationToken::parse("abcde-1234!").is_err());
    }

    #[test]
    fn invite_code_tied_to_host() {
        assert!(validate_invite_code("pds-example-com-abcde-12345", "pds.example.com").is_ok());
        assert!(validate_invite_code("other-host-abcde-12345", "pds.example.com").is_err());
        assert!(validate_invite_code("pds-example-com-abcde", "pds.example.com").is_err());
    }

    #[test]
    fn bare_handle_gets_first_suffix() {
        let suffixes = vec![".pds.test".to_string(), "alt.test".to_string()];
        assert_eq!(resolve_new_handle("Alice", &suffixes).unwrap(), "alice.pds.test");
        assert_eq!(
            resolve_new_handle("@bob.alt.test", &suffixes).unwrap(),
            "bob.alt.test"
        );
    }

    #[test]
    fn handle_outside_suffixes_is_rejected() {
        let suffixes = vec![".pds.test".to_string()];
        assert!(resolve_new_handle("alice.example.com", &suffixes).is_err());
        assert!(resolve_new_handle("-alice.pds.test", &suffixes).is_err());
        assert!(resolve_new_handle("a.b.pds.test", &suffixes).is_err());
        assert!(resolve_new_handle("", &suffixes).is_err());
        assert!(resolve_new_handle("alice", &[]).is_err());
    }

    #[test]
    fn email_and_password() {
        assert!(validate_email("alice@example.com").is_ok());
        assert!(validate_email("alice@example").is_err());
        assert!(validate_email("alice example@x.com").is_err());
        assert!(validate_password("").is_err());
        assert!(validate_password("pw").is_ok());
    }
}
