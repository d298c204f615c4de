//! ClientHello blueprint assembly and wire encoding.

use rand::RngCore;

use super::descriptor::{join, FingerprintDescriptor, TlsVersion};
use super::extensions::{
    ids, put_len16, put_len8, put_u16, resolve, DerivedState, EncodeContext, ExtensionEntry,
    ExtensionPayload,
};
use super::grease::{is_grease, strip_grease, GREASE_PLACEHOLDER};

/// TLS 1.3 cipher suites (RFC 8446, B.4).
pub const TLS13_CIPHER_SUITES: std::ops::RangeInclusive<u16> = 0x1301..=0x1305;

/// How the legacy session id field is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionIdStrategy {
    /// Zero-length session id.
    Empty,
    /// 32 random bytes (TLS 1.3 middlebox compatibility mode).
    Compat,
}

/// Immutable description of the ClientHello a transport sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHelloBlueprint {
    version_max: TlsVersion,
    version_min: TlsVersion,
    cipher_suites: Vec<u16>,
    extensions: Vec<ExtensionEntry>,
    compression_methods: Vec<u8>,
    session_id: SessionIdStrategy,
}

impl ClientHelloBlueprint {
    /// Assemble a blueprint from a parsed descriptor.
    pub fn from_descriptor(descriptor: &FingerprintDescriptor) -> Self {
        let mut version = descriptor.version();
        // TLS 1.3 clients keep legacy_version at 771.
        if version == TlsVersion::Tls12
            && descriptor
                .cipher_suites()
                .iter()
                .any(|id| TLS13_CIPHER_SUITES.contains(id))
            && descriptor.extension_ids().contains(&ids::SUPPORTED_VERSIONS)
        {
            version = TlsVersion::Tls13;
        }
        let bounds = version.bounds();

        let derived = DerivedState {
            groups: grease_prefixed(descriptor.supported_groups()),
            point_formats: descriptor.point_formats().to_vec(),
            supported_versions: bounds.supported_versions,
        };

        let mut extensions: Vec<ExtensionEntry> = descriptor
            .extension_ids()
            .iter()
            .map(|&id| resolve(id, &derived))
            .collect();
        if extensions.first().is_some_and(|e| !e.is_grease()) {
            extensions.insert(0, ExtensionEntry::grease());
        }
        if extensions.last().is_some_and(|e| !e.is_grease()) {
            extensions.push(ExtensionEntry::grease());
        }
        // pre_shared_key must be last: its binders cover everything before it.
        if let Some(psk) = extensions
            .iter()
            .rposition(|e| e.id() == ids::PRE_SHARED_KEY)
        {
            let last = extensions.len() - 1;
            extensions.swap(psk, last);
        }

        let session_id = if bounds.max >= TlsVersion::Tls13 {
            SessionIdStrategy::Compat
        } else {
            SessionIdStrategy::Empty
        };

        Self {
            version_max: bounds.max,
            version_min: bounds.min,
            cipher_suites: grease_prefixed(descriptor.cipher_suites()),
            extensions,
            compression_methods: vec![0],
            session_id,
        }
    }

    pub fn version_max(&self) -> TlsVersion {
        self.version_max
    }

    pub fn version_min(&self) -> TlsVersion {
        self.version_min
    }

    /// Value of the ClientHello `legacy_version` field.
    pub fn legacy_version(&self) -> u16 {
        self.version_max.min(TlsVersion::Tls12).wire()
    }

    pub fn cipher_suites(&self) -> &[u16] {
        &self.cipher_suites
    }

    pub fn extensions(&self) -> &[ExtensionEntry] {
        &self.extensions
    }

    pub fn compression_methods(&self) -> &[u8] {
        &self.compression_methods
    }

    pub fn session_id(&self) -> SessionIdStrategy {
        self.session_id
    }

    /// Extension ids in the order they are sent.
    pub fn extension_ids(&self) -> Vec<u16> {
        self.extensions.iter().map(ExtensionEntry::id).collect()
    }

    /// First non-GREASE extension with the given id.
    pub fn extension(&self, id: u16) -> Option<&ExtensionEntry> {
        self.extensions
            .iter()
            .find(|e| !e.is_grease() && e.id() == id)
    }

    pub fn has_extension(&self, id: u16) -> bool {
        self.extension(id).is_some()
    }

    /// Whether any list of the blueprint carries a GREASE value.
    pub fn offers_grease(&self) -> bool {
        self.cipher_suites.iter().any(|&c| is_grease(c))
            || self.extensions.iter().any(ExtensionEntry::is_grease)
    }

    /// JA3 text of this blueprint, GREASE removed.
    pub fn ja3(&self) -> String {
        let extensions: Vec<u16> = self
            .extensions
            .iter()
            .filter(|e| !e.is_grease())
            .map(ExtensionEntry::id)
            .collect();
        let groups = match self.extension(ids::SUPPORTED_GROUPS).map(ExtensionEntry::payload) {
            Some(ExtensionPayload::SupportedGroups(groups)) => strip_grease(groups),
            _ => Vec::new(),
        };
        let points = match self.extension(ids::EC_POINT_FORMATS).map(ExtensionEntry::payload) {
            Some(ExtensionPayload::PointFormats(points)) => points.clone(),
            _ => Vec::new(),
        };
        format!(
            "{},{},{},{},{}",
            self.legacy_version(),
            join(&strip_grease(&self.cipher_suites)),
            join(&extensions),
            join(&groups),
            join(&points)
        )
    }

    /// Encode a complete TLS record carrying this ClientHello.
    ///
    /// GREASE values, randoms and key shares are drawn from `rng`.
    pub fn encode(&self, server_name: Option<&str>, rng: &mut dyn RngCore) -> Vec<u8> {
        let mut ctx = EncodeContext::new(server_name, rng);

        let mut body = Vec::with_capacity(512);
        put_u16(&mut body, self.legacy_version());
        let mut random = [0u8; 32];
        ctx.rng.fill_bytes(&mut random);
        body.extend_from_slice(&random);

        match self.session_id {
            SessionIdStrategy::Empty => body.push(0),
            SessionIdStrategy::Compat => {
                let mut id = [0u8; 32];
                ctx.rng.fill_bytes(&mut id);
                body.push(32);
                body.extend_from_slice(&id);
            }
        }

        put_len16(&mut body, self.cipher_suites.len() * 2);
        for &suite in &self.cipher_suites {
            put_u16(&mut body, if is_grease(suite) { ctx.grease.cipher } else { suite });
        }

        put_len8(&mut body, self.compression_methods.len());
        body.extend_from_slice(&self.compression_methods);

        let mut encoded = Vec::with_capacity(self.extensions.len());
        let mut padding_at = None;
        for entry in &self.extensions {
            if matches!(entry.payload(), ExtensionPayload::Padding) {
                padding_at = Some(encoded.len());
                continue;
            }
            if let Some(bytes) = entry.encode(&mut ctx) {
                encoded.push(bytes);
            }
        }

        if let Some(at) = padding_at {
            let extensions_len: usize = encoded.iter().map(Vec::len).sum();
            let unpadded = 4 + body.len() + 2 + extensions_len;
            if let Some(len) = boring_padding_len(unpadded) {
                let mut padding = Vec::with_capacity(4 + len);
                put_u16(&mut padding, ids::PADDING);
                put_len16(&mut padding, len);
                padding.resize(4 + len, 0);
                encoded.insert(at, padding);
            }
        }

        if !encoded.is_empty() {
            let extensions_len: usize = encoded.iter().map(Vec::len).sum();
            put_len16(&mut body, extensions_len);
            for ext in encoded {
                body.extend_from_slice(&ext);
            }
        }

        let mut record = Vec::with_capacity(9 + body.len());
        record.extend_from_slice(&[0x16, 0x03, 0x01]);
        put_len16(&mut record, body.len() + 4);
        record.push(0x01);
        let len = body.len() as u32;
        record.extend_from_slice(&len.to_be_bytes()[1..]);
        record.extend_from_slice(&body);
        record
    }
}

/// Prepend the GREASE placeholder unless the list already starts with GREASE.
fn grease_prefixed(values: &[u16]) -> Vec<u16> {
    let mut out = Vec::with_capacity(values.len() + 1);
    if let Some(&first) = values.first() {
        if !is_grease(first) {
            out.push(GREASE_PLACEHOLDER);
        }
    }
    out.extend_from_slice(values);
    out
}

/// Padding body length BoringSSL adds to a ClientHello of `unpadded` bytes,
/// working around servers that hang on hellos of 256..=511 bytes.
fn boring_padding_len(unpadded: usize) -> Option<usize> {
    if unpadded > 0xff && unpadded < 0x200 {
        let len = 0x200 - unpadded;
        Some(if len >= 5 { len - 4 } else { 1 })
    } else {
        None
    }
}
