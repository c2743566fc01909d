//! Configuration management for lifepo4wered-access.
//!
//! The bus number and the microcontroller's address are plain values
//! injected into [`crate::Lifepo4wered`], never literals inside the access
//! code. They are layered, lowest priority first, from built-in defaults,
//! a TOML file and `LIFEPO4WERED_*` environment variables.

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// System-wide configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/lifepo4wered.toml";

/// Prefix of environment variables overriding the file.
pub const ENV_PREFIX: &str = "LIFEPO4WERED_";

/// I2C bus the LiFePO4wered/Pi sits on (the Raspberry Pi header bus).
pub const DEFAULT_BUS: u8 = 1;

/// 7-bit address of the LiFePO4wered microcontroller.
pub const DEFAULT_ADDRESS: u16 = 0x43;

/// Where to find the microcontroller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessConfig {
    /// I2C bus number, as in `/dev/i2c-N`
    #[serde(deserialize_with = "deserialize_number")]
    pub bus: u8,

    /// 7-bit peripheral address
    #[serde(deserialize_with = "deserialize_number")]
    pub address: u16,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            bus: DEFAULT_BUS,
            address: DEFAULT_ADDRESS,
        }
    }
}

impl AccessConfig {
    /// Layered configuration sources with `path` as the file layer.
    ///
    /// A missing file contributes nothing.
    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(AccessConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load from the system-wide file (if present) and the environment.
    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment(DEFAULT_CONFIG_PATH))
    }

    /// Load from `path`, which must exist, and the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::Config(format!(
                "config file {} not found",
                path.display()
            )));
        }
        Self::from_figment(Self::figment(path))
    }

    /// Extract and validate.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: AccessConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject addresses outside the 7-bit range; 10-bit addressing is not
    /// requested from the adapter.
    pub fn validate(&self) -> Result<()> {
        if self.address > 0x7F {
            return Err(Error::Config(format!(
                "address 0x{:x} is not a 7-bit I2C address",
                self.address
            )));
        }
        Ok(())
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal number.
pub fn parse_number<T: TryFrom<u64>>(text: &str) -> Option<T> {
    let text = text.trim();
    let value = match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None => text.parse::<u64>().ok()?,
    };
    T::try_from(value).ok()
}

// Environment variables arrive as strings, and hex reads better for
// addresses, so accept both integers and numeric strings.
fn deserialize_number<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Int(u64),
        Text(String),
    }

    let parsed = match Number::deserialize(deserializer)? {
        Number::Int(value) => T::try_from(value).ok(),
        Number::Text(text) => parse_number(&text),
    };
    parsed.ok_or_else(|| serde::de::Error::custom("expected an in-range decimal or 0x-prefixed number"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use test_case::test_case;

    #[test_case("67", Some(67) ; "decimal")]
    #[test_case("0x43", Some(0x43) ; "hex")]
    #[test_case("0XfF", Some(0xFF) ; "upper prefix")]
    #[test_case(" 5 ", Some(5) ; "padded")]
    #[test_case("256", None ; "out of range")]
    #[test_case("0x", None ; "empty hex")]
    #[test_case("-1", None ; "negative")]
    fn test_parse_number(text: &str, expected: Option<u8>) {
        assert_eq!(parse_number::<u8>(text), expected);
    }

    #[test]
    fn test_defaults() {
        Jail::expect_with(|_jail| {
            let config = AccessConfig::from_figment(AccessConfig::figment("missing.toml"))
                .map_err(|e| e.to_string())?;
            assert_eq!(config, AccessConfig::default());
            assert_eq!(config.bus, 1);
            assert_eq!(config.address, 0x43);
            Ok(())
        });
    }

    #[test]
    fn test_file_then_env_precedence() {
        Jail::expect_with(|jail| {
            jail.create_file("lifepo4wered.toml", "bus = 3\naddress = 0x40\n")?;
            let config = AccessConfig::load_from("lifepo4wered.toml").map_err(|e| e.to_string())?;
            assert_eq!(config, AccessConfig { bus: 3, address: 0x40 });

            jail.set_env("LIFEPO4WERED_ADDRESS", "0x41");
            let config = AccessConfig::load_from("lifepo4wered.toml").map_err(|e| e.to_string())?;
            assert_eq!(config, AccessConfig { bus: 3, address: 0x41 });
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file() {
        Jail::expect_with(|_jail| {
            let err = AccessConfig::load_from("nope.toml").unwrap_err();
            assert!(matches!(err, Error::Config(_)));
            Ok(())
        });
    }

    #[test]
    fn test_rejects_ten_bit_address() {
        Jail::expect_with(|jail| {
            jail.create_file("lifepo4wered.toml", "address = 0x143\n")?;
            let err = AccessConfig::load_from("lifepo4wered.toml").unwrap_err();
            assert!(matches!(err, Error::Config(_)));
            Ok(())
        });
    }
}
