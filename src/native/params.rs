use once_cell::sync::Lazy;
use regex::Regex;

use super::NativeToolError;
use crate::config::PgParams;

const MAX_PARAM_LEN: usize = 128;

static SAFE_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._-]+$").expect("valid parameter pattern"));

/// Connection parameters that passed the argv character-class check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedPgParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: String,
}

pub fn check_param(name: &'static str, value: &str) -> Result<String, NativeToolError> {
    if value.is_empty() {
        return Err(NativeToolError::InvalidParameter {
            name,
            reason: "must not be empty",
        });
    }
    if value.len() > MAX_PARAM_LEN {
        return Err(NativeToolError::InvalidParameter {
            name,
            reason: "exceeds 128 characters",
        });
    }
    if !SAFE_PARAM.is_match(value) {
        return Err(NativeToolError::InvalidParameter {
            name,
            reason: "contains disallowed characters",
        });
    }
    // A leading dash would be parsed as an option by the tool.
    if value.starts_with('-') {
        return Err(NativeToolError::InvalidParameter {
            name,
            reason: "must not start with '-'",
        });
    }
    Ok(value.to_string())
}

pub fn check_port(value: &str) -> Result<u16, NativeToolError> {
    let invalid = NativeToolError::InvalidParameter {
        name: "PG_PORT",
        reason: "must be an integer between 1 and 65535",
    };
    match value.trim().parse::<u32>() {
        Ok(port) if (1..=65_535).contains(&port) => Ok(port as u16),
        _ => Err(invalid),
    }
}

impl PgParams {
    pub fn checked(&self) -> Result<CheckedPgParams, NativeToolError> {
        Ok(CheckedPgParams {
            host: check_param("PG_HOST", &self.host)?,
            port: check_port(&self.port)?,
            user: check_param("PG_USERNAME", &self.user)?,
            database: check_param("PG_DATABASE", &self.database)?,
        })
    }
}

impl CheckedPgParams {
    /// `-h host -p port -U user -d database`
    pub fn connection_args(&self) -> Vec<String> {
        vec![
            "-h".into(),
            self.host.clone(),
            "-p".into(),
            self.port.to_string(),
            "-U".into(),
            self.user.clone(),
            "-d".into(),
            self.database.clone(),
        ]
    }
}
