// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the tether hub.
#[derive(Debug, Clone, clap::Args)]
pub struct HubConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "TETHER_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8000, env = "TETHER_PORT")]
    pub port: u16,

    /// Server salt keying the device bootstrap cipher. At most 24 bytes;
    /// shorter values are padded.
    #[arg(long, env = "TETHER_SALT")]
    pub salt: String,

    /// Operator username. Operator auth is disabled unless both user and
    /// password are set.
    #[arg(long, env = "TETHER_AUTH_USER")]
    pub auth_user: Option<String>,

    /// Operator password, interpreted per `--auth-algo`.
    #[arg(long, env = "TETHER_AUTH_PASS")]
    pub auth_pass: Option<String>,

    /// Password algorithm tag: `plain`, `sha256`, or `sha512` (the stored
    /// password is then the hex digest).
    #[arg(long, default_value = "plain", env = "TETHER_AUTH_ALGO")]
    pub auth_algo: String,

    /// Log level seed for the tracing filter.
    #[arg(long, default_value = "info", env = "TETHER_LOG_LEVEL")]
    pub log_level: String,

    /// Path pattern of prebuilt client templates; `{os}` and `{arch}` are
    /// substituted.
    #[arg(long, default_value = "./built/{os}_{arch}", env = "TETHER_BUILT_PATH")]
    pub built_path: String,

    /// Build commit stamp gating client self-update (exact string equality).
    #[arg(long, default_value = "", env = "TETHER_COMMIT")]
    pub commit: String,
}

/// Byte used to pad short salts and to fill the config slot in prebuilt
/// client binaries.
pub const SALT_PAD: u8 = 0x19;

impl HubConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Normalize the configured salt to exactly 24 bytes.
    pub fn salt_bytes(&self) -> Result<[u8; 24], ConfigError> {
        let raw = self.salt.as_bytes();
        if raw.len() > 24 {
            return Err(ConfigError::SaltTooLong(raw.len()));
        }
        let mut salt = [SALT_PAD; 24];
        salt[..raw.len()].copy_from_slice(raw);
        Ok(salt)
    }

    /// Filesystem path of the prebuilt template for an os/arch pair.
    pub fn template_path(&self, os: &str, arch: &str) -> String {
        self.built_path.replace("{os}", os).replace("{arch}", arch)
    }

    pub fn auth_enabled(&self) -> bool {
        matches!((&self.auth_user, &self.auth_pass), (Some(u), Some(p)) if !u.is_empty() && !p.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The salt must fit the 24-byte bootstrap key.
    SaltTooLong(usize),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SaltTooLong(n) => write!(f, "salt is {n} bytes, max is 24"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
