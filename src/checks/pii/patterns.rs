//! PII entity catalogue and compiled pattern table.
//!
//! Entity types are heuristic regex matches, not certified detectors. Some
//! patterns extract a capture group rather than the full match (CVV and
//! other contextual patterns require a labeled prefix before the value).

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Supported PII entity types.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    EmailAddress,
    PhoneNumber,
    UsSsn,
    CreditCard,
    Cvv,
    UsBankAccount,
    IbanCode,
    IpAddress,
    UrlAddress,
    CryptoWallet,
    ApiKey,
    UsPassport,
    UsDriverLicense,
    DateOfBirth,
    /// Deprecated: matches any two consecutive words.
    Nrp,
    /// Deprecated: matches any two capitalized words.
    Person,
}

impl EntityType {
    /// Wire label, also used in replacement tokens (`<EMAIL_ADDRESS>`).
    pub fn label(&self) -> &'static str {
        match self {
            EntityType::EmailAddress => "EMAIL_ADDRESS",
            EntityType::PhoneNumber => "PHONE_NUMBER",
            EntityType::UsSsn => "US_SSN",
            EntityType::CreditCard => "CREDIT_CARD",
            EntityType::Cvv => "CVV",
            EntityType::UsBankAccount => "US_BANK_ACCOUNT",
            EntityType::IbanCode => "IBAN_CODE",
            EntityType::IpAddress => "IP_ADDRESS",
            EntityType::UrlAddress => "URL_ADDRESS",
            EntityType::CryptoWallet => "CRYPTO_WALLET",
            EntityType::ApiKey => "API_KEY",
            EntityType::UsPassport => "US_PASSPORT",
            EntityType::UsDriverLicense => "US_DRIVER_LICENSE",
            EntityType::DateOfBirth => "DATE_OF_BIRTH",
            EntityType::Nrp => "NRP",
            EntityType::Person => "PERSON",
        }
    }

    /// Entities excluded from the default set and warned about when
    /// explicitly configured, due to very high false-positive rates.
    pub fn is_deprecated(&self) -> bool {
        matches!(self, EntityType::Nrp | EntityType::Person)
    }

    pub fn deprecation_reason(&self) -> &'static str {
        match self {
            EntityType::Nrp => "NRP matches any two consecutive words",
            EntityType::Person => "PERSON matches any two capitalized words",
            _ => "",
        }
    }

    /// Default entity set: everything except the deprecated heuristics.
    pub fn default_set() -> Vec<EntityType> {
        vec![
            EntityType::EmailAddress,
            EntityType::PhoneNumber,
            EntityType::UsSsn,
            EntityType::CreditCard,
            EntityType::Cvv,
            EntityType::UsBankAccount,
            EntityType::IbanCode,
            EntityType::IpAddress,
            EntityType::UrlAddress,
            EntityType::CryptoWallet,
            EntityType::ApiKey,
            EntityType::UsPassport,
            EntityType::UsDriverLicense,
            EntityType::DateOfBirth,
        ]
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A compiled pattern for one entity. `group` selects which capture group
/// holds the sensitive value (0 = whole match).
pub struct CompiledPattern {
    pub regex: Regex,
    pub group: usize,
}

impl CompiledPattern {
    fn whole(pattern: &str) -> Self {
        Self {
            regex: Regex::new(pattern).expect("static PII pattern compiles"),
            group: 0,
        }
    }

    fn group1(pattern: &str) -> Self {
        Self {
            regex: Regex::new(pattern).expect("static PII pattern compiles"),
            group: 1,
        }
    }
}

static PATTERNS: Lazy<HashMap<EntityType, Vec<CompiledPattern>>> = Lazy::new(|| {
    let mut table = HashMap::new();

    table.insert(
        EntityType::EmailAddress,
        vec![CompiledPattern::whole(
            r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}",
        )],
    );
    table.insert(
        EntityType::PhoneNumber,
        vec![CompiledPattern::whole(
            r"\b(?:\+?\d{1,3}[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b",
        )],
    );
    table.insert(
        EntityType::UsSsn,
        vec![CompiledPattern::whole(r"\b\d{3}[-\s]?\d{2}[-\s]?\d{4}\b")],
    );
    table.insert(
        EntityType::CreditCard,
        vec![CompiledPattern::whole(
            r"\b(?:4\d{12}(?:\d{3})?|5[1-5]\d{14}|3[47]\d{13}|6(?:011|5\d{2})\d{12})\b",
        )],
    );
    table.insert(
        EntityType::Cvv,
        vec![CompiledPattern::group1(
            r"(?i)\b(?:cvv2?|cvc|security\s+code)[:\s]+(\d{3,4})\b",
        )],
    );
    table.insert(
        EntityType::UsBankAccount,
        vec![CompiledPattern::group1(
            r"(?i)\b(?:account|acct)(?:\s*(?:number|no\.?|#))?[:\s]+(\d{8,17})\b",
        )],
    );
    table.insert(
        EntityType::IbanCode,
        vec![CompiledPattern::whole(r"\b[A-Z]{2}\d{2}[A-Z0-9]{11,30}\b")],
    );
    table.insert(
        EntityType::IpAddress,
        vec![
            CompiledPattern::whole(
                r"\b(?:(?:25[0-5]|2[0-4]\d|[01]?\d\d?)\.){3}(?:25[0-5]|2[0-4]\d|[01]?\d\d?)\b",
            ),
            CompiledPattern::whole(r"\b(?:[0-9a-fA-F]{1,4}:){3,7}[0-9a-fA-F]{1,4}\b"),
        ],
    );
    table.insert(
        EntityType::UrlAddress,
        vec![CompiledPattern::whole(r#"https?://[^\s<>"']+"#)],
    );
    table.insert(
        EntityType::CryptoWallet,
        vec![CompiledPattern::whole(
            r"\b(?:0x[a-fA-F0-9]{40}|bc1[a-z0-9]{25,59}|[13][a-km-zA-HJ-NP-Z1-9]{25,34})\b",
        )],
    );
    table.insert(
        EntityType::ApiKey,
        vec![
            CompiledPattern::whole(r"\b(?:sk|pk|rk)-[A-Za-z0-9_-]{16,}\b"),
            CompiledPattern::whole(r"\bAKIA[0-9A-Z]{16}\b"),
            CompiledPattern::whole(r"\bgh[ps]_[A-Za-z0-9]{36}\b"),
            CompiledPattern::whole(r"\bxox[bap]-[A-Za-z0-9-]{10,}\b"),
        ],
    );
    table.insert(
        EntityType::UsPassport,
        vec![CompiledPattern::group1(
            r"(?i)\bpassport(?:\s*(?:number|no\.?|#))?[:\s]+([A-Z0-9]{6,9})\b",
        )],
    );
    table.insert(
        EntityType::UsDriverLicense,
        vec![CompiledPattern::group1(
            r"(?i)\b(?:driver'?s?\s+licen[cs]e|dl)(?:\s*(?:number|no\.?|#))?[:\s]+([A-Z0-9]{5,13})\b",
        )],
    );
    table.insert(
        EntityType::DateOfBirth,
        vec![CompiledPattern::group1(
            r"(?i)\b(?:dob|date\s+of\s+birth|born(?:\s+on)?)[:\s]+(\d{1,2}[/-]\d{1,2}[/-]\d{2,4}|\d{4}-\d{2}-\d{2})\b",
        )],
    );
    table.insert(
        EntityType::Nrp,
        vec![CompiledPattern::whole(r"\b[A-Za-z]+\s+[A-Za-z]+\b")],
    );
    table.insert(
        EntityType::Person,
        vec![CompiledPattern::whole(r"\b[A-Z][a-z]+\s+[A-Z][a-z]+\b")],
    );

    table
});

/// Compiled patterns for an entity type.
pub fn patterns_for(entity: EntityType) -> &'static [CompiledPattern] {
    PATTERNS.get(&entity).map(Vec::as_slice).unwrap_or(&[])
}

/// Luhn checksum over the digits of a candidate card number. Separators are
/// ignored; anything shorter than 12 digits fails outright.
pub fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 12 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_entity_has_patterns() {
        for entity in [
            EntityType::EmailAddress,
            EntityType::PhoneNumber,
            EntityType::UsSsn,
            EntityType::CreditCard,
            EntityType::Cvv,
            EntityType::UsBankAccount,
            EntityType::IbanCode,
            EntityType::IpAddress,
            EntityType::UrlAddress,
            EntityType::CryptoWallet,
            EntityType::ApiKey,
            EntityType::UsPassport,
            EntityType::UsDriverLicense,
            EntityType::DateOfBirth,
            EntityType::Nrp,
            EntityType::Person,
        ] {
            assert!(!patterns_for(entity).is_empty(), "{} has no patterns", entity);
        }
    }

    #[test]
    fn labels_round_trip_through_serde() {
        let json = serde_json::to_string(&EntityType::UsSsn).unwrap();
        assert_eq!(json, "\"US_SSN\"");
        let back: EntityType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EntityType::UsSsn);
    }

    #[test]
    fn cvv_requires_contextual_prefix() {
        let patterns = patterns_for(EntityType::Cvv);
        let re = &patterns[0].regex;
        let caps = re.captures("cvv: 123").unwrap();
        assert_eq!(caps.get(1).unwrap().as_str(), "123");
        assert!(re.captures("just 123").is_none());
    }

    #[test]
    fn luhn_accepts_valid_card_numbers_only() {
        assert!(luhn_valid("4111111111111111"));
        assert!(luhn_valid("5500-0000-0000-0004"));
        assert!(!luhn_valid("4111111111111112"));
        assert!(!luhn_valid("1234"));
    }

    #[test]
    fn default_set_excludes_deprecated() {
        let defaults = EntityType::default_set();
        assert!(!defaults.contains(&EntityType::Nrp));
        assert!(!defaults.contains(&EntityType::Person));
        assert!(defaults.contains(&EntityType::EmailAddress));
    }
}
