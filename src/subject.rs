//! Subject Mapper
//!
//! Maps parsed distinguished name attributes onto the canonical certificate
//! subject. Keys are matched case-insensitively:
//!
//! | Key            | Target                                   |
//! |----------------|------------------------------------------|
//! | `C`            | country                                  |
//! | `CN`           | common name (single)                     |
//! | `L`            | locality                                 |
//! | `O`            | organization                             |
//! | `OU`           | organizational unit                      |
//! | `STREET`       | street address                           |
//! | `SERIALNUMBER` | serial number (single)                   |
//! | `DC`           | extension `0.9.2342.19200300.100.1.25`   |
//! | `E`            | extension `1.2.840.113549.1.9.1`         |
//! | `G`, `GN`      | extension `2.5.4.42`                     |
//! | `SN`           | extension `2.5.4.4`                      |
//! | `ST`           | extension `2.5.4.8`                      |
//! | `T`, `TITLE`   | extension `2.5.4.12`                     |
//! | `UID`          | extension `0.9.2342.19200300.100.1.1`    |
//! | `OID.<oid>`    | extension `<oid>`                        |
//!
//! Any other key is rejected.

use std::fmt;
use std::str::FromStr;

use openssl::error::ErrorStack;
use openssl::nid::Nid;
use openssl::x509::{X509Name, X509NameRef};

use crate::distinguished_name::{parse_distinguished_name, scan_string, DistinguishedName};
use crate::error::{DistinguishedNameError, MappingError};

pub const OID_DOMAIN_COMPONENT: &[u64] = &[0, 9, 2342, 19200300, 100, 1, 25];
pub const OID_EMAIL_ADDRESS: &[u64] = &[1, 2, 840, 113549, 1, 9, 1];
pub const OID_GIVEN_NAME: &[u64] = &[2, 5, 4, 42];
pub const OID_SURNAME: &[u64] = &[2, 5, 4, 4];
pub const OID_STATE_OR_PROVINCE: &[u64] = &[2, 5, 4, 8];
pub const OID_TITLE: &[u64] = &[2, 5, 4, 12];
pub const OID_USER_ID: &[u64] = &[0, 9, 2342, 19200300, 100, 1, 1];

/// A dotted-integer object identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectIdentifier(Vec<u64>);

impl ObjectIdentifier {
    pub fn from_arcs(arcs: &[u64]) -> Self {
        Self(arcs.to_vec())
    }

    pub fn arcs(&self) -> &[u64] {
        &self.0
    }
}

impl FromStr for ObjectIdentifier {
    type Err = ();

    /// Accepts at least two arcs with a first arc of 0, 1 or 2, and a second
    /// arc below 40 unless the first is 2, the minimum that can be DER encoded.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let arcs = s
            .split('.')
            .map(|arc| {
                if arc.is_empty() || !arc.bytes().all(|c| c.is_ascii_digit()) {
                    return Err(());
                }
                arc.parse::<u64>().map_err(|_| ())
            })
            .collect::<Result<Vec<_>, _>>()?;
        match arcs.first() {
            Some(&first) if first <= 2 && arcs.len() >= 2 => {
                if first < 2 && arcs[1] >= 40 {
                    return Err(());
                }
                Ok(Self(arcs))
            }
            _ => Err(()),
        }
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arc) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", arc)?;
        }
        Ok(())
    }
}

/// A subject attribute carried by object identifier instead of a named field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameExtension {
    pub oid: ObjectIdentifier,
    pub value: String,
}

/// Canonical certificate subject
///
/// Multi-valued fields keep the order in which attributes appeared in the
/// distinguished name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    pub country: Vec<String>,
    pub organization: Vec<String>,
    pub organizational_unit: Vec<String>,
    pub locality: Vec<String>,
    pub street_address: Vec<String>,
    pub common_name: Option<String>,
    pub serial_number: Option<String>,
    pub extensions: Vec<NameExtension>,
}

impl Subject {
    /// Parse and map a textual distinguished name in one step
    pub fn parse(dn: &str) -> Result<Self, DistinguishedNameError> {
        let parsed = parse_distinguished_name(dn)?;
        Ok(Self::from_distinguished_name(&parsed)?)
    }

    /// Map every attribute of `dn` onto exactly one subject field or extension
    pub fn from_distinguished_name(dn: &DistinguishedName) -> Result<Self, MappingError> {
        let mut subject = Subject::default();
        for attribute in dn.attributes() {
            let key = attribute.key.to_ascii_uppercase();
            let value = attribute.value.clone();
            match key.as_str() {
                "C" => subject.country.push(value),
                "L" => subject.locality.push(value),
                "O" => subject.organization.push(value),
                "OU" => subject.organizational_unit.push(value),
                "STREET" => subject.street_address.push(value),
                "CN" => set_once(&mut subject.common_name, &attribute.key, value)?,
                "SERIALNUMBER" => set_once(&mut subject.serial_number, &attribute.key, value)?,
                "DC" => subject.push_extension(OID_DOMAIN_COMPONENT, value),
                "E" => subject.push_extension(OID_EMAIL_ADDRESS, value),
                "G" | "GN" => subject.push_extension(OID_GIVEN_NAME, value),
                "SN" => subject.push_extension(OID_SURNAME, value),
                "ST" => subject.push_extension(OID_STATE_OR_PROVINCE, value),
                "T" | "TITLE" => subject.push_extension(OID_TITLE, value),
                "UID" => subject.push_extension(OID_USER_ID, value),
                _ => {
                    let oid = key
                        .strip_prefix("OID.")
                        .and_then(|dotted| dotted.parse::<ObjectIdentifier>().ok())
                        .ok_or_else(|| MappingError::UnrecognizedAttributeKey {
                            key: attribute.key.clone(),
                        })?;
                    subject.extensions.push(NameExtension { oid, value });
                }
            }
        }
        Ok(subject)
    }

    fn push_extension(&mut self, arcs: &[u64], value: String) {
        self.extensions.push(NameExtension {
            oid: ObjectIdentifier::from_arcs(arcs),
            value,
        });
    }

    /// Values of all extensions carrying `oid`, in order
    pub fn extension_values<'a>(&'a self, oid: &'a [u64]) -> impl Iterator<Item = &'a str> + 'a {
        self.extensions
            .iter()
            .filter(move |ext| ext.oid.arcs() == oid)
            .map(|ext| ext.value.as_str())
    }

    /// Render as an X.509 name: C, L, STREET, O, OU, CN, SERIALNUMBER, then
    /// extensions in their original order
    ///
    /// openssl enforces the X.520 size bounds, so a value that maps cleanly can
    /// still fail here with [`MappingError::UnencodableValue`].
    pub fn to_x509_name(&self) -> Result<X509Name, MappingError> {
        let mut builder = X509Name::builder().map_err(|e| unencodable("subject", e))?;
        let named = [
            (Nid::COUNTRYNAME, "C", &self.country),
            (Nid::LOCALITYNAME, "L", &self.locality),
            (Nid::STREETADDRESS, "STREET", &self.street_address),
            (Nid::ORGANIZATIONNAME, "O", &self.organization),
            (Nid::ORGANIZATIONALUNITNAME, "OU", &self.organizational_unit),
        ];
        for (nid, key, values) in named {
            for value in values {
                builder
                    .append_entry_by_nid(nid, value)
                    .map_err(|e| unencodable(key, e))?;
            }
        }
        if let Some(cn) = &self.common_name {
            builder
                .append_entry_by_nid(Nid::COMMONNAME, cn)
                .map_err(|e| unencodable("CN", e))?;
        }
        if let Some(serial) = &self.serial_number {
            builder
                .append_entry_by_nid(Nid::SERIALNUMBER, serial)
                .map_err(|e| unencodable("SERIALNUMBER", e))?;
        }
        for ext in &self.extensions {
            let oid = ext.oid.to_string();
            builder
                .append_entry_by_text(&oid, &ext.value)
                .map_err(|e| unencodable(&format!("OID.{}", oid), e))?;
        }
        Ok(builder.build())
    }
}

/// Render an X.509 name as distinguished name text using the keys this module
/// accepts, so the result parses back into the same subject
///
/// Attribute types without a key here fall back to openssl's short name, or to
/// `OID.<dotted>` when openssl has no name for them.
pub fn format_x509_name(name: &X509NameRef) -> String {
    let mut attributes = Vec::new();
    for entry in name.entries() {
        let object = entry.object();
        let nid = object.nid();
        let key = match nid_key(nid) {
            Some(key) => key.to_string(),
            None if nid == Nid::UNDEF => format!("OID.{}", object),
            None => nid.short_name().map(str::to_string).unwrap_or_else(|_| format!("OID.{}", object)),
        };
        let value = String::from_utf8_lossy(entry.data().as_slice()).into_owned();
        attributes.push(format!("{}={}", key, quote_value(&value)));
    }
    attributes.join(", ")
}

fn nid_key(nid: Nid) -> Option<&'static str> {
    let key = match nid {
        Nid::COUNTRYNAME => "C",
        Nid::LOCALITYNAME => "L",
        Nid::STREETADDRESS => "STREET",
        Nid::ORGANIZATIONNAME => "O",
        Nid::ORGANIZATIONALUNITNAME => "OU",
        Nid::COMMONNAME => "CN",
        Nid::SERIALNUMBER => "SERIALNUMBER",
        Nid::DOMAINCOMPONENT => "DC",
        Nid::PKCS9_EMAILADDRESS => "E",
        Nid::GIVENNAME => "GN",
        Nid::SURNAME => "SN",
        Nid::STATEORPROVINCENAME => "ST",
        Nid::TITLE => "T",
        Nid::USERID => "UID",
        _ => return None,
    };
    Some(key)
}

// Values are kept as the literal text the scanner matched, so they are written
// back untouched unless they would not scan as one string on their own.
fn quote_value(value: &str) -> String {
    let scans_whole = matches!(scan_string(value), Ok((_, width)) if width == value.len());
    if scans_whole && !value.starts_with(' ') {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

fn unencodable(key: &str, err: ErrorStack) -> MappingError {
    MappingError::UnencodableValue {
        key: key.to_string(),
        reason: err.to_string(),
    }
}

fn set_once(slot: &mut Option<String>, key: &str, value: String) -> Result<(), MappingError> {
    if slot.is_some() {
        return Err(MappingError::DuplicateSingleValuedAttribute {
            key: key.to_string(),
        });
    }
    *slot = Some(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseError;

    #[test]
    fn test_full_dn_mapping() {
        let subject = Subject::parse("CN=GOPKI , O=Cryptable , C=BE").unwrap();
        assert_eq!(subject.common_name.as_deref(), Some("GOPKI"));
        assert_eq!(subject.organization, vec!["Cryptable"]);
        assert_eq!(subject.country, vec!["BE"]);
        assert!(subject.extensions.is_empty());
        assert!(subject.organizational_unit.is_empty());
    }

    #[test]
    fn test_email_mapping() {
        let subject = Subject::parse("CN=GOPKI , O=Cryptable , E=test@cryptable.org").unwrap();
        assert_eq!(
            subject.extensions,
            vec![NameExtension {
                oid: ObjectIdentifier::from_arcs(OID_EMAIL_ADDRESS),
                value: "test@cryptable.org".to_string(),
            }]
        );
    }

    #[test]
    fn test_oid_extension_mapping() {
        let subject = Subject::parse("CN=GOPKI , O=Cryptable , OID.1.2.3.4=custom").unwrap();
        assert_eq!(subject.extensions.len(), 1);
        assert_eq!(subject.extensions[0].oid, ObjectIdentifier::from_arcs(&[1, 2, 3, 4]));
        assert_eq!(subject.extensions[0].value, "custom");

        let subject = Subject::parse("oid.2.5.29.99=lower").unwrap();
        assert_eq!(subject.extensions[0].oid.to_string(), "2.5.29.99");
    }

    #[test]
    fn test_well_known_keys() {
        let subject = Subject::parse(
            "dc=example + DC=org, E=a@b.c, G=Ann, GN=Marie, SN=Smith, ST=Antwerp, \
             T=Dr, TITLE=Prof, UID=asmith, STREET=Main 1, L=Ghent, OU=PKI, SERIALNUMBER=42",
        )
        .unwrap();
        let oids: Vec<String> = subject.extensions.iter().map(|e| e.oid.to_string()).collect();
        assert_eq!(
            oids,
            vec![
                "0.9.2342.19200300.100.1.25",
                "0.9.2342.19200300.100.1.25",
                "1.2.840.113549.1.9.1",
                "2.5.4.42",
                "2.5.4.42",
                "2.5.4.4",
                "2.5.4.8",
                "2.5.4.12",
                "2.5.4.12",
                "0.9.2342.19200300.100.1.1",
            ]
        );
        let dcs: Vec<&str> = subject.extension_values(OID_DOMAIN_COMPONENT).collect();
        assert_eq!(dcs, vec!["example", "org"]);
        assert_eq!(subject.street_address, vec!["Main 1"]);
        assert_eq!(subject.locality, vec!["Ghent"]);
        assert_eq!(subject.organizational_unit, vec!["PKI"]);
        assert_eq!(subject.serial_number.as_deref(), Some("42"));
        assert_eq!(subject.common_name, None);
    }

    #[test]
    fn test_multi_valued_order_preserved() {
        let subject = Subject::parse("O=First + O=Second, OU=a, O=Third").unwrap();
        assert_eq!(subject.organization, vec!["First", "Second", "Third"]);
    }

    #[test]
    fn test_unrecognized_key_rejected() {
        assert_eq!(
            Subject::parse("CN=x, FOO=bar"),
            Err(DistinguishedNameError::Mapping(
                MappingError::UnrecognizedAttributeKey { key: "FOO".to_string() }
            ))
        );
        // "S" is not an accepted spelling of the state attribute
        assert!(matches!(
            Subject::parse("S=Antwerp"),
            Err(DistinguishedNameError::Mapping(MappingError::UnrecognizedAttributeKey { .. }))
        ));
        // a bare value has no key to map
        assert!(matches!(
            Subject::parse("CN=x, Bare"),
            Err(DistinguishedNameError::Mapping(MappingError::UnrecognizedAttributeKey { .. }))
        ));
        // OID with a first arc above 2 cannot be encoded
        assert!(matches!(
            Subject::parse("OID.0.40=x"),
            Err(DistinguishedNameError::Mapping(MappingError::UnrecognizedAttributeKey { .. }))
        ));
        assert!(matches!(
            Subject::parse("OID.7.1=x"),
            Err(DistinguishedNameError::Mapping(MappingError::UnrecognizedAttributeKey { .. }))
        ));
    }

    #[test]
    fn test_duplicate_common_name_rejected() {
        assert_eq!(
            Subject::parse("CN=a, cn=b"),
            Err(DistinguishedNameError::Mapping(
                MappingError::DuplicateSingleValuedAttribute { key: "cn".to_string() }
            ))
        );
    }

    #[test]
    fn test_parse_error_passes_through() {
        assert_eq!(
            Subject::parse("CN=\"open"),
            Err(DistinguishedNameError::Parse(ParseError::UnterminatedQuotedValue {
                offset: 3
            }))
        );
    }

    #[test]
    fn test_object_identifier_from_str() {
        assert_eq!(
            "1.2.840.113549".parse::<ObjectIdentifier>(),
            Ok(ObjectIdentifier::from_arcs(&[1, 2, 840, 113549]))
        );
        assert!("1".parse::<ObjectIdentifier>().is_err());
        assert!("0.40".parse::<ObjectIdentifier>().is_err());
        assert!("1.39.5".parse::<ObjectIdentifier>().is_ok());
        assert!("2.999.1".parse::<ObjectIdentifier>().is_ok());
        assert!("1..2".parse::<ObjectIdentifier>().is_err());
        assert!("1.+2".parse::<ObjectIdentifier>().is_err());
        assert!("".parse::<ObjectIdentifier>().is_err());
    }

    #[test]
    fn test_to_x509_name() {
        let subject =
            Subject::parse("CN=GOPKI, O=Cryptable, C=BE, E=pki@cryptable.org, OID.1.2.3.4=custom")
                .unwrap();
        let name = subject.to_x509_name().unwrap();
        let entries: Vec<(String, String)> = name
            .entries()
            .map(|entry| {
                (
                    entry.object().to_string(),
                    String::from_utf8_lossy(entry.data().as_slice()).into_owned(),
                )
            })
            .collect();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].1, "BE");
        assert_eq!(entries[1].1, "Cryptable");
        assert_eq!(entries[2].1, "GOPKI");
        assert_eq!(entries[3].1, "pki@cryptable.org");
        assert_eq!(entries[4], ("1.2.3.4".to_string(), "custom".to_string()));

        let cn = name.entries_by_nid(Nid::COMMONNAME).next().unwrap();
        assert_eq!(String::from_utf8_lossy(cn.data().as_slice()), "GOPKI");
    }

    #[test]
    fn test_to_x509_name_rejects_out_of_bounds_values() {
        let subject = Subject::parse("CN=Test, C=Belgium").unwrap();
        match subject.to_x509_name() {
            Err(MappingError::UnencodableValue { key, .. }) => assert_eq!(key, "C"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }

        let subject = Subject::parse(&format!("CN={}", "x".repeat(70))).unwrap();
        assert!(matches!(
            subject.to_x509_name(),
            Err(MappingError::UnencodableValue { key, .. }) if key == "CN"
        ));

        assert!(Subject::parse("CN=Test, C=BE").unwrap().to_x509_name().is_ok());
    }

    #[test]
    fn test_format_x509_name_reparses() {
        let subject = Subject::parse(
            "CN=\"Smith, John\", O=Cryptable, C=BE, E=pki@cryptable.org, OID.1.2.3.4=custom",
        )
        .unwrap();
        let text = format_x509_name(&subject.to_x509_name().unwrap());
        assert_eq!(
            text,
            "C=BE, O=Cryptable, CN=\"Smith, John\", E=pki@cryptable.org, OID.1.2.3.4=custom"
        );
        assert_eq!(Subject::parse(&text).unwrap(), subject);
    }

    #[test]
    fn test_format_x509_name_non_ascii() {
        let subject = Subject::parse("L=Zürich, CN=Łódź CA").unwrap();
        let text = format_x509_name(&subject.to_x509_name().unwrap());
        assert_eq!(text, "L=Zürich, CN=Łódź CA");
    }

    #[test]
    fn test_format_x509_name_quotes_raw_values() {
        let mut builder = X509Name::builder().unwrap();
        builder.append_entry_by_nid(Nid::COMMONNAME, "a,b").unwrap();
        builder.append_entry_by_nid(Nid::ORGANIZATIONNAME, " padded").unwrap();
        let text = format_x509_name(&builder.build());
        assert_eq!(text, "CN=\"a,b\", O=\" padded\"");
    }
}
