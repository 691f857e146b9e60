use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Keychain item Claude Code stores its OAuth blob under.
const KEYCHAIN_SERVICE: &str = "Claude Code-credentials";

#[derive(Deserialize)]
struct ClaudeCredentialsFile {
    #[serde(rename = "claudeAiOauth")]
    claude_ai_oauth: Option<ClaudeOAuthEntry>,
}

#[derive(Deserialize)]
struct ClaudeOAuthEntry {
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
}

/// Somewhere an OAuth access token for the Claude usage API can come from.
pub trait CredentialSource: Send + Sync {
    fn access_token(&self) -> Result<String>;
}

/// Extract the access token from the JSON blob shared by the keychain item
/// and `~/.claude/.credentials.json`.
pub fn parse_access_token(content: &str) -> Result<String> {
    let file: ClaudeCredentialsFile =
        serde_json::from_str(content).context("Failed to parse Claude credentials JSON")?;
    let oauth = file
        .claude_ai_oauth
        .context("Missing 'claudeAiOauth' in credentials")?;
    let token = oauth
        .access_token
        .context("Missing 'accessToken' in credentials")?;
    if token.is_empty() {
        anyhow::bail!("Empty access token in Claude credentials");
    }
    Ok(token)
}

/// The OS credential store (macOS keychain, Windows credential manager,
/// Linux kernel keyring).
pub struct KeychainCredentials {
    user: String,
}

impl KeychainCredentials {
    pub fn for_current_user() -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();
        Self { user }
    }
}

impl CredentialSource for KeychainCredentials {
    fn access_token(&self) -> Result<String> {
        let entry = keyring::Entry::new(KEYCHAIN_SERVICE, &self.user)
            .context("Failed to open keychain entry")?;
        let blob = entry
            .get_password()
            .context("No Claude credentials in keychain")?;
        parse_access_token(&blob)
    }
}

/// The plain-file credential store Claude Code uses on Linux.
pub struct CredentialsFile {
    path: PathBuf,
}

impl CredentialsFile {
    pub fn in_claude_home(claude_home: PathBuf) -> Self {
        Self {
            path: claude_home.join(".credentials.json"),
        }
    }
}

impl CredentialSource for CredentialsFile {
    fn access_token(&self) -> Result<String> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        parse_access_token(&content)
    }
}

/// Try each source in order, returning the first token found.
pub struct CredentialChain {
    sources: Vec<Box<dyn CredentialSource>>,
}

impl CredentialChain {
    pub fn new(sources: Vec<Box<dyn CredentialSource>>) -> Self {
        Self { sources }
    }

    /// Keychain first, then the credentials file under `claude_home`.
    pub fn claude_default(claude_home: PathBuf) -> Self {
        Self::new(vec![
            Box::new(KeychainCredentials::for_current_user()),
            Box::new(CredentialsFile::in_claude_home(claude_home)),
        ])
    }
}

impl CredentialSource for CredentialChain {
    fn access_token(&self) -> Result<String> {
        let mut last_err = None;
        for source in &self.sources {
            match source.access_token() {
                Ok(token) => return Ok(token),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("No credential sources configured")))
    }
}
