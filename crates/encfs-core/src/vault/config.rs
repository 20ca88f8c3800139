#![forbid(unsafe_code)]

//! The `.encfs6.xml` volume configuration record.
//!
//! The record is a boost-serialization XML document. It names the cipher and
//! name algorithms with their interface versions, fixes the content layout
//! (key size, block size, IV and MAC options) and carries the volume key,
//! wrapped under a key derived from the password with PBKDF2-HMAC-SHA1.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use quick_xml::Reader;
use quick_xml::events::Event;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::crypto::key_wrap::{UnwrapError, derive_kek, unwrap_key, wrap_key, wrapped_key_len};
use crate::crypto::keys::IV_LEN;
use crate::crypto::{CryptoError, VolumeKey};
use crate::fs::file::{ContentLayout, MAX_BLOCK_MAC_BYTES};
use crate::fs::name::NameAlgorithm;

/// File name of the configuration record at the backend root.
pub const CONFIG_FILE_NAME: &str = ".encfs6.xml";

/// Configuration format revision written by this crate.
pub const CONFIG_SUBVERSION: u32 = 20_100_713;

/// PBKDF2 iterations for newly created volumes.
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

/// Salt length for newly created volumes.
pub const SALT_LEN: usize = 20;

/// Desired KDF duration recorded in new configs, in milliseconds.
pub const DEFAULT_KDF_DURATION_MS: u32 = 500;

/// Supported content block sizes.
pub const BLOCK_SIZE_RANGE: std::ops::RangeInclusive<usize> = 64..=4096;

const CREATOR: &str = concat!("encfs-core ", env!("CARGO_PKG_VERSION"));

/// Content cipher of a volume.
///
/// Only AES is implemented. Blowfish volumes are reported as
/// [`ConfigError::UnsupportedFeature`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CipherAlgorithm {
    #[default]
    Aes,
}

impl CipherAlgorithm {
    pub const fn id(self) -> &'static str {
        match self {
            CipherAlgorithm::Aes => "ssl/aes",
        }
    }

    /// Interface version written for new volumes.
    pub const fn current_interface(self) -> (u32, u32) {
        match self {
            CipherAlgorithm::Aes => (3, 0),
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "ssl/aes" => Some(CipherAlgorithm::Aes),
            _ => None,
        }
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Errors that can occur while loading, validating or unlocking a config.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The password did not unwrap the volume key.
    #[error("Incorrect password")]
    InvalidPassword,

    /// A required field is missing or malformed.
    #[error("Invalid volume config: {reason}")]
    InvalidConfig { reason: String },

    /// A well-formed config declaring something this crate does not implement.
    #[error("Unsupported volume feature: {feature}")]
    UnsupportedFeature { feature: String },

    /// The wrapped key blob has the wrong size for the declared key.
    ///
    /// **[INTEGRITY VIOLATION]**
    #[error("[INTEGRITY VIOLATION] Wrapped volume key is {actual} bytes, expected {expected}")]
    CorruptKey { expected: usize, actual: usize },

    #[error("Config XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),
}

impl ConfigError {
    fn invalid(reason: impl Into<String>) -> Self {
        ConfigError::InvalidConfig {
            reason: reason.into(),
        }
    }

    fn unsupported(feature: impl Into<String>) -> Self {
        ConfigError::UnsupportedFeature {
            feature: feature.into(),
        }
    }
}

/// Options for a new volume.
///
/// # Example
///
/// ```
/// use encfs_core::vault::VolumeOptions;
///
/// let options = VolumeOptions {
///     kdf_iterations: 200_000,
///     ..VolumeOptions::paranoia()
/// };
/// assert_eq!(options.key_size_bits, 256);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeOptions {
    pub cipher: CipherAlgorithm,
    pub key_size_bits: u32,
    pub block_size: usize,
    pub name_algorithm: NameAlgorithm,
    pub unique_iv: bool,
    pub chained_name_iv: bool,
    pub external_iv_chaining: bool,
    pub block_mac_bytes: usize,
    pub block_mac_rand_bytes: usize,
    pub allow_holes: bool,
    pub kdf_iterations: u32,
}

impl VolumeOptions {
    /// AES-192, 1 KiB blocks, per-file IVs and chained name IVs.
    pub fn standard() -> Self {
        Self {
            cipher: CipherAlgorithm::Aes,
            key_size_bits: 192,
            block_size: 1024,
            name_algorithm: NameAlgorithm::Block,
            unique_iv: true,
            chained_name_iv: true,
            external_iv_chaining: false,
            block_mac_bytes: 0,
            block_mac_rand_bytes: 0,
            allow_holes: true,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
        }
    }

    /// AES-256 with 8-byte block MACs and external IV chaining.
    pub fn paranoia() -> Self {
        Self {
            key_size_bits: 256,
            external_iv_chaining: true,
            block_mac_bytes: 8,
            ..Self::standard()
        }
    }

    /// Check the options before any key material is generated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_layout(
            self.key_size_bits,
            self.block_size,
            self.block_mac_bytes,
            self.block_mac_rand_bytes,
            self.unique_iv,
            self.chained_name_iv,
            self.external_iv_chaining,
        )?;
        if self.kdf_iterations == 0 {
            return Err(ConfigError::invalid("kdf_iterations must be positive"));
        }
        Ok(())
    }
}

impl Default for VolumeOptions {
    fn default() -> Self {
        Self::standard()
    }
}

/// A parsed volume configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeConfig {
    pub creator: String,
    pub subversion: u32,
    pub cipher: CipherAlgorithm,
    pub cipher_interface: (u32, u32),
    pub name_algorithm: NameAlgorithm,
    pub name_interface: (u32, u32),
    pub key_size_bits: u32,
    pub block_size: usize,
    pub unique_iv: bool,
    pub chained_name_iv: bool,
    pub external_iv_chaining: bool,
    pub block_mac_bytes: usize,
    pub block_mac_rand_bytes: usize,
    pub allow_holes: bool,
    /// Checksum followed by the encrypted key and IV seed.
    pub encoded_key: Vec<u8>,
    pub salt: Vec<u8>,
    pub kdf_iterations: u32,
    pub desired_kdf_duration: u32,
}

impl VolumeConfig {
    /// Parse and validate a config record.
    pub fn load(bytes: &[u8]) -> Result<Self, ConfigError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ConfigError::invalid(format!("config is not UTF-8: {e}")))?;
        let fields = Fields::parse(text)?;
        trace!(fields = fields.0.len(), "Parsed config XML");

        let subversion: u32 = fields.number("version")?;
        if subversion > CONFIG_SUBVERSION {
            return Err(ConfigError::unsupported(format!(
                "config revision {subversion} is newer than {CONFIG_SUBVERSION}"
            )));
        }

        let cipher_id = fields.text("cipherAlg/name")?;
        let cipher = CipherAlgorithm::from_id(cipher_id)
            .ok_or_else(|| ConfigError::unsupported(format!("cipher {cipher_id}")))?;
        let cipher_interface = (fields.number("cipherAlg/major")?, fields.number("cipherAlg/minor")?);

        let name_id = fields.text("nameAlg/name")?;
        let name_algorithm = NameAlgorithm::from_id(name_id)
            .ok_or_else(|| ConfigError::unsupported(format!("name algorithm {name_id}")))?;
        let name_interface = (fields.number("nameAlg/major")?, fields.number("nameAlg/minor")?);

        let Some(salt_data) = fields.optional("saltData") else {
            return Err(ConfigError::unsupported(
                "legacy key derivation without salt",
            ));
        };
        let salt = decode_base64("saltData", salt_data)?;
        if let Some(salt_len) = fields.optional("saltLen") {
            let salt_len: usize = parse_number("saltLen", salt_len)?;
            if salt_len != salt.len() {
                return Err(ConfigError::invalid(format!(
                    "saltLen is {salt_len} but salt has {} bytes",
                    salt.len()
                )));
            }
        }

        let encoded_key = decode_base64("encodedKeyData", fields.text("encodedKeyData")?)?;
        let encoded_key_size: usize = fields.number("encodedKeySize")?;
        if encoded_key_size != encoded_key.len() {
            return Err(ConfigError::invalid(format!(
                "encodedKeySize is {encoded_key_size} but key data has {} bytes",
                encoded_key.len()
            )));
        }

        let config = Self {
            creator: fields.optional("creator").unwrap_or_default().to_owned(),
            subversion,
            cipher,
            cipher_interface,
            name_algorithm,
            name_interface,
            key_size_bits: fields.number("keySize")?,
            block_size: fields.number("blockSize")?,
            unique_iv: fields.flag("uniqueIV")?,
            chained_name_iv: fields.flag("chainedNameIV")?,
            external_iv_chaining: fields.optional_flag("externalIVChaining")?,
            block_mac_bytes: fields.number("blockMACBytes")?,
            block_mac_rand_bytes: fields.optional_number("blockMACRandBytes")?,
            allow_holes: fields.optional_flag("allowHoles")?,
            encoded_key,
            salt,
            kdf_iterations: fields.number("kdfIterations")?,
            desired_kdf_duration: fields.optional_number("desiredKDFDuration")?,
        };
        config.validate()?;

        debug!(
            cipher = %config.cipher,
            name_algorithm = %config.name_algorithm,
            key_size = config.key_size_bits,
            block_size = config.block_size,
            "Loaded volume config"
        );
        Ok(config)
    }

    /// Structural and feature checks shared by loading and creation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (cipher_major, _) = self.cipher_interface;
        if cipher_major < 3 {
            return Err(ConfigError::unsupported(format!(
                "{} interface {cipher_major} (legacy stream encoding)",
                self.cipher
            )));
        }
        if cipher_major > self.cipher.current_interface().0 {
            return Err(ConfigError::unsupported(format!(
                "{} interface {cipher_major}",
                self.cipher
            )));
        }
        let (name_major, _) = self.name_interface;
        if !self.name_algorithm.supports_interface(name_major) {
            return Err(ConfigError::unsupported(format!(
                "{} interface {name_major}",
                self.name_algorithm
            )));
        }

        check_layout(
            self.key_size_bits,
            self.block_size,
            self.block_mac_bytes,
            self.block_mac_rand_bytes,
            self.unique_iv,
            self.chained_name_iv,
            self.external_iv_chaining,
        )?;

        let expected = wrapped_key_len(self.key_len());
        if self.encoded_key.len() != expected {
            return Err(ConfigError::CorruptKey {
                expected,
                actual: self.encoded_key.len(),
            });
        }
        if self.salt.is_empty() {
            return Err(ConfigError::unsupported("legacy key derivation without salt"));
        }
        if self.kdf_iterations == 0 {
            return Err(ConfigError::invalid("kdfIterations must be positive"));
        }
        Ok(())
    }

    /// Serialize in the boost-serialization layout EncFS reads.
    pub fn to_xml(&self) -> String {
        let flag = |b: bool| u8::from(b);
        let mut xml = String::with_capacity(1200);
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\" ?>\n");
        xml.push_str("<!DOCTYPE boost_serialization>\n");
        xml.push_str("<boost_serialization signature=\"serialization::archive\" version=\"9\">\n");
        xml.push_str("<cfg class_id=\"0\" tracking_level=\"0\" version=\"20\">\n");
        xml.push_str(&format!("\t<version>{}</version>\n", self.subversion));
        xml.push_str(&format!("\t<creator>{}</creator>\n", escape_text(&self.creator)));
        xml.push_str("\t<cipherAlg class_id=\"1\" tracking_level=\"0\" version=\"0\">\n");
        push_interface(&mut xml, self.cipher.id(), self.cipher_interface);
        xml.push_str("\t</cipherAlg>\n");
        xml.push_str("\t<nameAlg>\n");
        push_interface(&mut xml, self.name_algorithm.id(), self.name_interface);
        xml.push_str("\t</nameAlg>\n");
        xml.push_str(&format!("\t<keySize>{}</keySize>\n", self.key_size_bits));
        xml.push_str(&format!("\t<blockSize>{}</blockSize>\n", self.block_size));
        xml.push_str(&format!("\t<uniqueIV>{}</uniqueIV>\n", flag(self.unique_iv)));
        xml.push_str(&format!("\t<chainedNameIV>{}</chainedNameIV>\n", flag(self.chained_name_iv)));
        xml.push_str(&format!(
            "\t<externalIVChaining>{}</externalIVChaining>\n",
            flag(self.external_iv_chaining)
        ));
        xml.push_str(&format!("\t<blockMACBytes>{}</blockMACBytes>\n", self.block_mac_bytes));
        xml.push_str(&format!(
            "\t<blockMACRandBytes>{}</blockMACRandBytes>\n",
            self.block_mac_rand_bytes
        ));
        xml.push_str(&format!("\t<allowHoles>{}</allowHoles>\n", flag(self.allow_holes)));
        xml.push_str(&format!("\t<encodedKeySize>{}</encodedKeySize>\n", self.encoded_key.len()));
        xml.push_str(&format!(
            "\t<encodedKeyData>\n{}\n</encodedKeyData>\n",
            BASE64.encode(&self.encoded_key)
        ));
        xml.push_str(&format!("\t<saltLen>{}</saltLen>\n", self.salt.len()));
        xml.push_str(&format!("\t<saltData>\n{}\n</saltData>\n", BASE64.encode(&self.salt)));
        xml.push_str(&format!("\t<kdfIterations>{}</kdfIterations>\n", self.kdf_iterations));
        xml.push_str(&format!(
            "\t<desiredKDFDuration>{}</desiredKDFDuration>\n",
            self.desired_kdf_duration
        ));
        xml.push_str("</cfg>\n");
        xml.push_str("</boost_serialization>\n");
        xml
    }

    /// Volume key length in bytes.
    pub fn key_len(&self) -> usize {
        (self.key_size_bits / 8) as usize
    }

    /// Content layout implied by this config.
    pub fn content_layout(&self) -> ContentLayout {
        ContentLayout {
            block_size: self.block_size,
            mac_bytes: self.block_mac_bytes,
            rand_bytes: self.block_mac_rand_bytes,
            unique_iv: self.unique_iv,
            allow_holes: self.allow_holes,
        }
    }

    /// Derive the key-encryption key from `password` and unwrap the volume key.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidPassword`] if the embedded checksum does not
    ///   match (wrong password or tampered blob)
    /// - [`ConfigError::CorruptKey`] if the blob has the wrong size
    pub fn unlock(&self, password: &str) -> Result<VolumeKey, ConfigError> {
        let key_len = self.key_len();
        let kek = derive_kek(password, &self.salt, self.kdf_iterations, key_len)?;
        unwrap_key(&kek, &self.encoded_key, key_len).map_err(|e| match e {
            UnwrapError::InvalidIntegrityCheck => {
                warn!("Volume key checksum mismatch");
                ConfigError::InvalidPassword
            }
            UnwrapError::InvalidLength { expected, actual } => ConfigError::CorruptKey { expected, actual },
        })
    }

    /// Build a config for a new volume with fresh random key material.
    ///
    /// Nothing is persisted; write [`to_xml`](Self::to_xml) through the
    /// provider to make the volume durable.
    pub fn create_new(options: &VolumeOptions, password: &str) -> Result<(Self, VolumeKey), ConfigError> {
        options.validate()?;
        let key_len = (options.key_size_bits / 8) as usize;
        let key = VolumeKey::random(key_len)?;
        let salt = random_salt();
        let kek = derive_kek(password, &salt, options.kdf_iterations, key_len)?;

        let config = Self {
            creator: CREATOR.to_owned(),
            subversion: CONFIG_SUBVERSION,
            cipher: options.cipher,
            cipher_interface: options.cipher.current_interface(),
            name_algorithm: options.name_algorithm,
            name_interface: options.name_algorithm.current_interface(),
            key_size_bits: options.key_size_bits,
            block_size: options.block_size,
            unique_iv: options.unique_iv,
            chained_name_iv: options.chained_name_iv,
            external_iv_chaining: options.external_iv_chaining,
            block_mac_bytes: options.block_mac_bytes,
            block_mac_rand_bytes: options.block_mac_rand_bytes,
            allow_holes: options.allow_holes,
            encoded_key: wrap_key(&kek, &key),
            salt,
            kdf_iterations: options.kdf_iterations,
            desired_kdf_duration: DEFAULT_KDF_DURATION_MS,
        };
        config.validate()?;
        debug!(key_size = options.key_size_bits, "Created volume config");
        Ok((config, key))
    }

    /// Re-wrap the volume key under `new_password` with a fresh salt.
    ///
    /// The volume key itself is unchanged, so existing content stays readable.
    pub fn change_password(&self, old_password: &str, new_password: &str) -> Result<Self, ConfigError> {
        let key = self.unlock(old_password)?;
        let salt = random_salt();
        let kek = derive_kek(new_password, &salt, self.kdf_iterations, self.key_len())?;
        Ok(Self {
            encoded_key: wrap_key(&kek, &key),
            salt,
            ..self.clone()
        })
    }
}

fn random_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}

#[allow(clippy::fn_params_excessive_bools)]
fn check_layout(
    key_size_bits: u32,
    block_size: usize,
    mac_bytes: usize,
    rand_bytes: usize,
    unique_iv: bool,
    chained_name_iv: bool,
    external_iv_chaining: bool,
) -> Result<(), ConfigError> {
    if !matches!(key_size_bits, 128 | 192 | 256) {
        return Err(ConfigError::unsupported(format!("key size {key_size_bits} bits")));
    }
    if !BLOCK_SIZE_RANGE.contains(&block_size) || block_size % IV_LEN != 0 {
        return Err(ConfigError::invalid(format!(
            "block size {block_size} must be a multiple of 16 in 64..=4096"
        )));
    }
    if mac_bytes > MAX_BLOCK_MAC_BYTES {
        return Err(ConfigError::invalid(format!(
            "blockMACBytes {mac_bytes} exceeds {MAX_BLOCK_MAC_BYTES}"
        )));
    }
    if mac_bytes + rand_bytes >= block_size {
        return Err(ConfigError::invalid("block MAC overhead leaves no room for data"));
    }
    if external_iv_chaining && !(chained_name_iv && unique_iv) {
        return Err(ConfigError::invalid(
            "externalIVChaining requires chainedNameIV and uniqueIV",
        ));
    }
    Ok(())
}

fn push_interface(xml: &mut String, id: &str, (major, minor): (u32, u32)) {
    xml.push_str(&format!("\t\t<name>{id}</name>\n"));
    xml.push_str(&format!("\t\t<major>{major}</major>\n"));
    xml.push_str(&format!("\t\t<minor>{minor}</minor>\n"));
}

fn escape_text(text: &str) -> String {
    quick_xml::escape::escape(text).into_owned()
}

fn decode_base64(field: &str, text: &str) -> Result<Vec<u8>, ConfigError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(compact)
        .map_err(|e| ConfigError::invalid(format!("{field} is not valid base64: {e}")))
}

fn parse_number<T: FromStr>(field: &str, text: &str) -> Result<T, ConfigError> {
    text.trim()
        .parse()
        .map_err(|_| ConfigError::invalid(format!("{field} is not a valid number: {text:?}")))
}

/// Leaf element text keyed by its path below `<cfg>`, e.g. `cipherAlg/name`.
struct Fields(HashMap<String, String>);

impl Fields {
    fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<String> = Vec::new();
        let mut fields = HashMap::new();
        let mut saw_cfg = false;
        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    saw_cfg |= stack.len() == 1 && name == "cfg";
                    stack.push(name);
                }
                Event::End(_) => {
                    stack.pop();
                }
                Event::Text(t) => {
                    // boost_serialization / cfg / field [/ subfield]
                    if stack.len() > 2 && stack[1] == "cfg" {
                        let value = t
                            .unescape()
                            .map_err(|e| ConfigError::invalid(format!("bad text in <{}>: {e}", stack.join("/"))))?;
                        fields.insert(stack[2..].join("/"), value.into_owned());
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        if !saw_cfg {
            return Err(ConfigError::invalid("missing <cfg> element"));
        }
        Ok(Self(fields))
    }

    fn optional(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn text(&self, key: &str) -> Result<&str, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::invalid(format!("missing field {key}")))
    }

    fn number<T: FromStr>(&self, key: &str) -> Result<T, ConfigError> {
        parse_number(key, self.text(key)?)
    }

    fn optional_number<T: FromStr + Default>(&self, key: &str) -> Result<T, ConfigError> {
        self.optional(key)
            .map_or_else(|| Ok(T::default()), |v| parse_number(key, v))
    }

    fn flag(&self, key: &str) -> Result<bool, ConfigError> {
        parse_flag(key, self.text(key)?)
    }

    fn optional_flag(&self, key: &str) -> Result<bool, ConfigError> {
        self.optional(key).map_or(Ok(false), |v| parse_flag(key, v))
    }
}

fn parse_flag(key: &str, text: &str) -> Result<bool, ConfigError> {
    match text.trim() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(ConfigError::invalid(format!("{key} is not a flag: {other:?}"))),
    }
}
