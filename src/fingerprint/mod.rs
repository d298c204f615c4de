//! TLS fingerprint descriptors and ClientHello blueprints.

pub mod descriptor;
pub mod extensions;
pub mod grease;
pub mod hello;
pub mod inspect;

pub use descriptor::{FingerprintDescriptor, TlsVersion, VersionBounds};
pub use extensions::{CertCompression, ExtensionEntry, ExtensionPayload};
pub use grease::{is_grease, GREASE_PLACEHOLDER};
pub use hello::{ClientHelloBlueprint, SessionIdStrategy};
pub use inspect::{parse_client_hello, Ja3, ObservedHello};
