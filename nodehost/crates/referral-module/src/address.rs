use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};

use crate::error::ReferralError;

/// The all-zero address some wallets report as their referrer.
pub const NULL_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Reserved placeholder written for wallets registered without a referrer.
pub const NO_PARENT_PLACEHOLDER: &str = "0x0000000000000000000000000000000000000001";

const MAX_ADDRESS_LEN: usize = 128;

/// Normalized (trimmed, lower-case) wallet address.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn parse(raw: &str) -> Result<Self, ReferralError> {
        let trimmed = raw.trim();
        if trimmed.is_empty()
            || trimmed.len() > MAX_ADDRESS_LEN
            || !trimmed.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ReferralError::InvalidAddress(raw.to_string()));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the null address and the reserved no-parent placeholder.
    pub fn is_sentinel(&self) -> bool {
        self.0 == NULL_ADDRESS || self.0 == NO_PARENT_PLACEHOLDER
    }
}

/// Interprets a stored parent column. Missing, blank, malformed and
/// sentinel values all mean "no parent".
pub fn parent_reference(raw: Option<&str>) -> Option<WalletAddress> {
    let parsed = WalletAddress::parse(raw?).ok()?;
    if parsed.is_sentinel() {
        None
    } else {
        Some(parsed)
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WalletAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for WalletAddress {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = ReferralError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WalletAddress> for String {
    fn from(value: WalletAddress) -> Self {
        value.0
    }
}

impl std::str::FromStr for WalletAddress {
    type Err = ReferralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_case_and_whitespace() {
        let a = WalletAddress::parse("  0xABCdef12  ").unwrap();
        assert_eq!(a.as_str(), "0xabcdef12");
        assert_eq!(a, WalletAddress::parse("0xabcDEF12").unwrap());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(WalletAddress::parse("").is_err());
        assert!(WalletAddress::parse("   ").is_err());
        assert!(WalletAddress::parse("0x12 34").is_err());
        assert!(WalletAddress::parse("0x12-34").is_err());
        assert!(WalletAddress::parse(&"a".repeat(129)).is_err());
    }

    #[test]
    fn sentinels_are_not_parents() {
        assert_eq!(parent_reference(None), None);
        assert_eq!(parent_reference(Some("")), None);
        assert_eq!(parent_reference(Some(NULL_ADDRESS)), None);
        assert_eq!(parent_reference(Some(&NULL_ADDRESS.to_uppercase())), None);
        assert_eq!(parent_reference(Some(NO_PARENT_PLACEHOLDER)), None);
        assert_eq!(parent_reference(Some("not valid!")), None);
        assert_eq!(
            parent_reference(Some("0xAbc")),
            Some(WalletAddress::parse("0xabc").unwrap())
        );
    }

    #[test]
    fn serde_round_trip_validates() {
        let a: WalletAddress = serde_json::from_str("\"0xABC\"").unwrap();
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"0xabc\"");
        assert!(serde_json::from_str::<WalletAddress>("\"not valid!\"").is_err());
    }
}
