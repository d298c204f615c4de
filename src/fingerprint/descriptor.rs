//! JA3-style fingerprint descriptors.
//!
//! A descriptor is five comma-separated fields:
//! `version,ciphers,extensions,groups,point_formats`, where every list field
//! is a `-`-separated run of decimal code points.

use std::fmt;
use std::str::FromStr;

use super::grease::GREASE_PLACEHOLDER;
use crate::error::{Error, Result};

/// Protocol versions a descriptor may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

/// Version range plus the `supported_versions` payload for that range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionBounds {
    pub max: TlsVersion,
    pub min: TlsVersion,
    pub supported_versions: Vec<u16>,
}

impl TlsVersion {
    /// Map a wire value (769..=772) to a version.
    pub fn from_wire(value: u16) -> Result<Self> {
        match value {
            0x0301 => Ok(Self::Tls10),
            0x0302 => Ok(Self::Tls11),
            0x0303 => Ok(Self::Tls12),
            0x0304 => Ok(Self::Tls13),
            other => Err(Error::UnsupportedVersion(other)),
        }
    }

    /// Wire value of this version.
    pub fn wire(self) -> u16 {
        match self {
            Self::Tls10 => 0x0301,
            Self::Tls11 => 0x0302,
            Self::Tls12 => 0x0303,
            Self::Tls13 => 0x0304,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tls10 => "TLSv1",
            Self::Tls11 => "TLSv1.1",
            Self::Tls12 => "TLSv1.2",
            Self::Tls13 => "TLSv1.3",
        }
    }

    /// Version range a client announcing this version offers.
    pub fn bounds(self) -> VersionBounds {
        let (max, min) = match self {
            Self::Tls13 => (Self::Tls13, Self::Tls12),
            Self::Tls12 => (Self::Tls12, Self::Tls11),
            Self::Tls11 => (Self::Tls11, Self::Tls10),
            Self::Tls10 => (Self::Tls10, Self::Tls10),
        };
        let supported_versions = if max == min {
            vec![max.wire()]
        } else {
            vec![GREASE_PLACEHOLDER, max.wire(), min.wire()]
        };
        VersionBounds {
            max,
            min,
            supported_versions,
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed fingerprint descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintDescriptor {
    version: TlsVersion,
    cipher_suites: Vec<u16>,
    extension_ids: Vec<u16>,
    supported_groups: Vec<u16>,
    point_formats: Vec<u8>,
}

impl FingerprintDescriptor {
    /// Parse a descriptor string.
    ///
    /// Fails with [`Error::Format`] on a wrong field count or a bad token and
    /// with [`Error::UnsupportedVersion`] when the version is not 769..=772.
    pub fn parse(input: &str) -> Result<Self> {
        let fields: Vec<&str> = input.trim().split(',').collect();
        if fields.len() != 5 {
            return Err(Error::format(format!(
                "expected 5 comma-separated fields, found {}",
                fields.len()
            )));
        }

        let version = parse_token::<u16>("version", fields[0].trim())?;
        let cipher_suites = parse_list::<u16>("cipher", fields[1])?;
        let extension_ids = parse_list::<u16>("extension", fields[2])?;
        let supported_groups = parse_list::<u16>("group", fields[3])?;
        let point_formats = parse_list::<u8>("point format", fields[4])?;

        Ok(Self {
            version: TlsVersion::from_wire(version)?,
            cipher_suites,
            extension_ids,
            supported_groups,
            point_formats,
        })
    }

    pub fn version(&self) -> TlsVersion {
        self.version
    }

    pub fn cipher_suites(&self) -> &[u16] {
        &self.cipher_suites
    }

    pub fn extension_ids(&self) -> &[u16] {
        &self.extension_ids
    }

    pub fn supported_groups(&self) -> &[u16] {
        &self.supported_groups
    }

    pub fn point_formats(&self) -> &[u8] {
        &self.point_formats
    }
}

impl FromStr for FingerprintDescriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for FingerprintDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{}",
            self.version.wire(),
            join(&self.cipher_suites),
            join(&self.extension_ids),
            join(&self.supported_groups),
            join(&self.point_formats)
        )
    }
}

pub(crate) fn join<T: fmt::Display>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("-")
}

fn parse_list<T>(field: &str, raw: &str) -> Result<Vec<T>>
where
    T: FromStr,
{
    // An empty field is a single empty token, rejected like any other.
    raw.trim()
        .split('-')
        .map(|token| parse_token(field, token))
        .collect()
}

fn parse_token<T>(field: &str, token: &str) -> Result<T>
where
    T: FromStr,
{
    // `str::parse` accepts a leading '+', decimal digits only here.
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::format(format!("invalid {field} token {token:?}")));
    }
    token
        .parse()
        .map_err(|_| Error::format(format!("{field} token {token:?} out of range")))
}
