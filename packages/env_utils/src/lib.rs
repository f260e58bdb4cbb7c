//! Typed environment variable lookups with fallbacks.
//!
//! Every lookup distinguishes a variable that is unset (falls back to the
//! default) from one that is set to something unparseable (an error), so a
//! typo in a deployment surfaces instead of silently using the default.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::str::FromStr;

use thiserror::Error;

/// Error returned when an environment variable is set but cannot be parsed.
#[derive(Debug, Error)]
#[error("Invalid value for environment variable {name}: '{value}' ({reason})")]
pub struct EnvParseError {
    /// Name of the offending variable.
    pub name: String,
    /// Raw value that failed to parse.
    pub value: String,
    /// Parser error message.
    pub reason: String,
}

fn lookup(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_value<T>(name: &str, value: Option<String>) -> Result<Option<T>, EnvParseError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|value| {
            value.trim().parse::<T>().map_err(|e| EnvParseError {
                name: name.to_string(),
                value: value.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

/// Returns the value of `name`, or `default` if it is unset or blank.
#[must_use]
pub fn default_env(name: &str, default: &str) -> String {
    lookup(name).unwrap_or_else(|| default.to_string())
}

/// Parses the value of `name` if it is set.
///
/// # Errors
///
/// * If the variable is set but does not parse as `T`
pub fn option_env_parse<T>(name: &str) -> Result<Option<T>, EnvParseError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(name, lookup(name))
}

/// Parses the value of `name`, or returns `default` if it is unset.
///
/// # Errors
///
/// * If the variable is set but does not parse as `T`
pub fn default_env_parse<T>(name: &str, default: T) -> Result<T, EnvParseError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(option_env_parse(name)?.unwrap_or(default))
}

/// # Errors
///
/// * If the variable is set but is not a valid `u64`
pub fn default_env_u64(name: &str, default: u64) -> Result<u64, EnvParseError> {
    default_env_parse(name, default)
}

/// # Errors
///
/// * If the variable is set but is not a valid `u32`
pub fn default_env_u32(name: &str, default: u32) -> Result<u32, EnvParseError> {
    default_env_parse(name, default)
}
