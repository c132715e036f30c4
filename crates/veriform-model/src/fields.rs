//! The closed field set: supported keys, canonical types, and alias tables.
//!
//! The alias map is static and immutable; there is no dynamic registration.
//! Schema resolution, routing queries, and excerpt keyword selection all read
//! the same table.

use crate::FieldType;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// One of the seven supported field keys.
///
/// Keys order lexicographically by wire name (not declaration order), so
/// sorted artifact output matches the serialized key strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    FullName,
    Dob,
    Phone,
    Address,
    InsuranceMemberId,
    Allergies,
    Medications,
}

/// Canonical field ordering used for fallback schemas and `max_fields`
/// capping. This is presentation order, distinct from `Ord`.
pub const FIELD_ORDER: [FieldKey; 7] = [
    FieldKey::FullName,
    FieldKey::Dob,
    FieldKey::Phone,
    FieldKey::Address,
    FieldKey::InsuranceMemberId,
    FieldKey::Allergies,
    FieldKey::Medications,
];

impl FieldKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKey::FullName => "full_name",
            FieldKey::Dob => "dob",
            FieldKey::Phone => "phone",
            FieldKey::Address => "address",
            FieldKey::InsuranceMemberId => "insurance_member_id",
            FieldKey::Allergies => "allergies",
            FieldKey::Medications => "medications",
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldKey {
    type Err = UnsupportedKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FIELD_ORDER
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnsupportedKey(s.to_string()))
    }
}

impl PartialOrd for FieldKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FieldKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

/// A key outside the supported set.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unsupported field key: {0}")]
pub struct UnsupportedKey(pub String);

/// Canonical type for a supported key. User-supplied types are ignored in
/// favor of this table, so a key always carries a consistent type.
pub fn field_type(key: FieldKey) -> FieldType {
    match key {
        FieldKey::FullName | FieldKey::Address | FieldKey::InsuranceMemberId => FieldType::String,
        FieldKey::Dob => FieldType::Date,
        FieldKey::Phone => FieldType::Phone,
        FieldKey::Allergies | FieldKey::Medications => FieldType::StringOrList,
    }
}

/// Alias substrings that indicate a key, used by form-field mapping and
/// routing query construction.
pub fn field_aliases(key: FieldKey) -> &'static [&'static str] {
    match key {
        FieldKey::FullName => &["full_name", "name", "patient_name"],
        FieldKey::Dob => &["dob", "date_of_birth", "birthdate"],
        FieldKey::Phone => &["phone", "mobile", "telephone"],
        FieldKey::Address => &["address", "street"],
        FieldKey::InsuranceMemberId => &["insurance_member_id", "member_id", "policy", "insurance_id"],
        FieldKey::Allergies => &["allergies", "allergy"],
        FieldKey::Medications => &["medications", "meds"],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_wire_names() {
        for key in FIELD_ORDER {
            assert_eq!(key.as_str().parse::<FieldKey>().unwrap(), key);
        }
        assert!("ssn".parse::<FieldKey>().is_err());
    }

    #[test]
    fn orders_by_wire_name() {
        let mut keys = FIELD_ORDER.to_vec();
        keys.sort();
        let names: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "address",
                "allergies",
                "dob",
                "full_name",
                "insurance_member_id",
                "medications",
                "phone"
            ]
        );
    }

    #[test]
    fn every_key_has_aliases_containing_its_own_name() {
        for key in FIELD_ORDER {
            assert!(field_aliases(key).contains(&key.as_str()));
        }
    }
}
