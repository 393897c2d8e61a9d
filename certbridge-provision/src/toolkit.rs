//! Certificate toolkit adapter
//!
//! The provisioning core only talks to [`CaToolkit`], a path-based contract
//! mirroring the classic `openssl` command surface. [`OpensslToolkit`] fulfils
//! it in-process with the `openssl` crate, with `x509-parser` providing the
//! precise end-date read.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::stack::Stack;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectKeyIdentifier,
};
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::{
    X509Builder, X509Name, X509NameBuilder, X509Req, X509ReqBuilder, X509StoreContext, X509,
};

use certbridge_common::logging::Logger;

use crate::error::{ProvisionError, Result};
use crate::log_debug;

/// Validity of freshly issued certificates, matching `openssl x509` defaults
pub const DEFAULT_VALIDITY_DAYS: u32 = 30;

/// Operations the provisioning core needs from a certificate toolkit
#[async_trait]
pub trait CaToolkit: Send + Sync {
    /// Whether the toolkit can be used at all
    async fn is_available(&self) -> bool;

    async fn generate_rsa_key(&self, bits: u32, out: &Path) -> Result<()>;

    /// Self-signed CA certificate; `subject` uses slash form (`/C=US/CN=Name`)
    async fn generate_self_signed_cert(&self, subject: &str, key: &Path, out: &Path) -> Result<()>;

    async fn generate_csr(&self, subject: &str, key: &Path, out: &Path) -> Result<()>;

    /// Sign `csr` with the CA. The serial file is created on first use and
    /// advanced on every signature.
    async fn sign_csr(
        &self,
        csr: &Path,
        ca_cert: &Path,
        ca_key: &Path,
        serial: &Path,
        out: &Path,
    ) -> Result<()>;

    /// Quick check: true when the certificate will expire within `seconds`.
    /// Implementations may answer conservatively.
    async fn is_expiring_within(&self, seconds: u64, cert: &Path) -> Result<bool>;

    /// Precise end of validity as a unix timestamp
    async fn read_end_date(&self, cert: &Path) -> Result<i64>;

    /// True when `cert` chains to the CA certificate in `ca_file`
    async fn verify_chain(&self, ca_file: &Path, cert: &Path) -> Result<bool>;

    /// Subject of a CSR in OpenSSL's default one-line form (`C = US, CN = app`)
    async fn csr_subject(&self, csr: &Path) -> Result<String>;
}

/// In-process toolkit backed by the `openssl` crate
pub struct OpensslToolkit {
    validity_days: u32,
    logger: Arc<Logger>,
}

impl OpensslToolkit {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self::with_validity_days(DEFAULT_VALIDITY_DAYS, logger)
    }

    /// Toolkit issuing certificates valid for `validity_days` from now
    pub fn with_validity_days(validity_days: u32, logger: Arc<Logger>) -> Self {
        Self {
            validity_days,
            logger,
        }
    }

    pub fn validity_days(&self) -> u32 {
        self.validity_days
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

#[async_trait]
impl CaToolkit for OpensslToolkit {
    async fn is_available(&self) -> bool {
        let version = openssl::version::version();
        log_debug!(self.logger, "Using {version}");
        !version.is_empty()
    }

    async fn generate_rsa_key(&self, bits: u32, out: &Path) -> Result<()> {
        log_debug!(self.logger, "Generating {bits}-bit RSA key at {}", out.display());
        let out = out.to_path_buf();
        blocking(move || {
            let key = PKey::from_rsa(Rsa::generate(bits)?)?;
            write_private(&out, &key.private_key_to_pem_pkcs8()?)
        })
        .await
    }

    async fn generate_self_signed_cert(&self, subject: &str, key: &Path, out: &Path) -> Result<()> {
        log_debug!(self.logger, "Self-signing {subject} into {}", out.display());
        let (subject, key, out) = (subject.to_string(), key.to_path_buf(), out.to_path_buf());
        let validity_days = self.validity_days;
        blocking(move || {
            let key = read_private_key(&key)?;
            let name = parse_subject(&subject)?;

            let mut builder = X509Builder::new()?;
            builder.set_version(2)?;
            let serial = random_serial()?.to_asn1_integer()?;
            let not_before = Asn1Time::days_from_now(0)?;
            let not_after = Asn1Time::days_from_now(validity_days)?;
            builder.set_serial_number(&serial)?;
            builder.set_subject_name(&name)?;
            builder.set_issuer_name(&name)?;
            builder.set_pubkey(&key)?;
            builder.set_not_before(&not_before)?;
            builder.set_not_after(&not_after)?;
            builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
            builder.append_extension(
                KeyUsage::new()
                    .critical()
                    .key_cert_sign()
                    .crl_sign()
                    .build()?,
            )?;
            let subject_key_id =
                SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
            builder.append_extension(subject_key_id)?;
            builder.sign(&key, MessageDigest::sha256())?;

            std::fs::write(&out, builder.build().to_pem()?)?;
            Ok(())
        })
        .await
    }

    async fn generate_csr(&self, subject: &str, key: &Path, out: &Path) -> Result<()> {
        let (subject, key, out) = (subject.to_string(), key.to_path_buf(), out.to_path_buf());
        blocking(move || {
            let key = read_private_key(&key)?;
            let name = parse_subject(&subject)?;
            let mut builder = X509ReqBuilder::new()?;
            builder.set_version(0)?;
            builder.set_subject_name(&name)?;
            builder.set_pubkey(&key)?;
            builder.sign(&key, MessageDigest::sha256())?;
            std::fs::write(&out, builder.build().to_pem()?)?;
            Ok(())
        })
        .await
    }

    async fn sign_csr(
        &self,
        csr: &Path,
        ca_cert: &Path,
        ca_key: &Path,
        serial: &Path,
        out: &Path,
    ) -> Result<()> {
        log_debug!(self.logger, "Signing {} into {}", csr.display(), out.display());
        let paths: [PathBuf; 5] = [csr, ca_cert, ca_key, serial, out].map(Path::to_path_buf);
        let validity_days = self.validity_days;
        blocking(move || {
            let [csr, ca_cert, ca_key, serial, out] = paths;
            let csr_pem = std::fs::read(&csr)?;
            let req = X509Req::from_pem(&csr_pem)
                .map_err(|e| ProvisionError::Toolkit(format!("Failed to parse CSR: {e}")))?;
            let req_key = req.public_key()?;
            if !req.verify(&req_key)? {
                return Err(ProvisionError::Toolkit(
                    "CSR signature does not match its public key".to_string(),
                ));
            }

            let ca = read_certificate(&ca_cert)?;
            let ca_key = read_private_key(&ca_key)?;
            let serial_number = next_serial(&serial)?.to_asn1_integer()?;
            let not_before = Asn1Time::days_from_now(0)?;
            let not_after = Asn1Time::days_from_now(validity_days)?;

            let mut builder = X509Builder::new()?;
            builder.set_version(2)?;
            builder.set_serial_number(&serial_number)?;
            builder.set_subject_name(req.subject_name())?;
            builder.set_issuer_name(ca.subject_name())?;
            builder.set_pubkey(&req_key)?;
            builder.set_not_before(&not_before)?;
            builder.set_not_after(&not_after)?;
            builder.append_extension(BasicConstraints::new().build()?)?;
            builder.append_extension(
                KeyUsage::new()
                    .digital_signature()
                    .key_encipherment()
                    .build()?,
            )?;
            builder.append_extension(
                ExtendedKeyUsage::new()
                    .server_auth()
                    .client_auth()
                    .build()?,
            )?;
            let authority_key_id = AuthorityKeyIdentifier::new()
                .keyid(false)
                .build(&builder.x509v3_context(Some(&*ca), None))?;
            builder.append_extension(authority_key_id)?;
            builder.sign(&ca_key, MessageDigest::sha256())?;

            std::fs::write(&out, builder.build().to_pem()?)?;
            Ok(())
        })
        .await
    }

    async fn is_expiring_within(&self, seconds: u64, cert: &Path) -> Result<bool> {
        let cert = cert.to_path_buf();
        blocking(move || {
            let cert = read_certificate(&cert)?;
            let seconds = i64::try_from(seconds).unwrap_or(i64::MAX);
            let threshold = Asn1Time::from_unix(unix_now().saturating_add(seconds) as _)?;
            Ok(cert.not_after().compare(&threshold)? != Ordering::Greater)
        })
        .await
    }

    async fn read_end_date(&self, cert: &Path) -> Result<i64> {
        let pem = tokio::fs::read(cert).await?;
        let (_, pem) = x509_parser::pem::parse_x509_pem(&pem).map_err(|e| {
            ProvisionError::Toolkit(format!("Failed to read PEM {}: {e}", cert.display()))
        })?;
        let parsed = pem.parse_x509().map_err(|e| {
            ProvisionError::Toolkit(format!("Failed to parse certificate {}: {e}", cert.display()))
        })?;
        Ok(parsed.validity().not_after.timestamp())
    }

    async fn verify_chain(&self, ca_file: &Path, cert: &Path) -> Result<bool> {
        let (ca_file, cert) = (ca_file.to_path_buf(), cert.to_path_buf());
        blocking(move || {
            let ca = read_certificate(&ca_file)?;
            let cert = read_certificate(&cert)?;

            let mut store = X509StoreBuilder::new()?;
            store.add_cert(ca)?;
            let store = store.build();
            let chain = Stack::new()?;

            let mut context = X509StoreContext::new()?;
            Ok(context.init(&store, &cert, &chain, |c| c.verify_cert())?)
        })
        .await
    }

    async fn csr_subject(&self, csr: &Path) -> Result<String> {
        let pem = tokio::fs::read(csr).await?;
        let req = X509Req::from_pem(&pem)
            .map_err(|e| ProvisionError::Toolkit(format!("Failed to parse CSR: {e}")))?;
        Ok(one_line_name(req.subject_name()))
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Parse `/C=US/ST=CA/O=Org/CN=Name` into an X509 name
fn parse_subject(subject: &str) -> Result<X509Name> {
    let mut builder = X509NameBuilder::new()?;
    let mut entries = 0;
    for component in subject.split('/').filter(|c| !c.is_empty()) {
        let (field, value) = component.split_once('=').ok_or_else(|| {
            ProvisionError::Toolkit(format!("Malformed subject component '{component}'"))
        })?;
        builder.append_entry_by_text(field.trim(), value.trim())?;
        entries += 1;
    }
    if entries == 0 {
        return Err(ProvisionError::Toolkit(format!("Empty subject '{subject}'")));
    }
    Ok(builder.build())
}

fn one_line_name(name: &openssl::x509::X509NameRef) -> String {
    name.entries()
        .map(|entry| {
            let field = entry.object().nid().short_name().unwrap_or("UNDEF");
            // Raw bytes, so an embedded NUL or invalid UTF-8 survives into the dump.
            let value = String::from_utf8_lossy(entry.data().as_slice());
            format!("{field} = {}", escape_name_value(&value))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Escape a name value the way RFC 4514 does, so separators inside a value
/// can never be read as the start of another component.
fn escape_name_value(value: &str) -> String {
    let last = value.chars().count().saturating_sub(1);
    let mut escaped = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        let special = matches!(c, '\\' | ',' | '+' | '"' | '<' | '>' | ';' | '=')
            || (i == 0 && matches!(c, ' ' | '#'))
            || (i == last && c == ' ');
        if special {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn random_serial() -> Result<BigNum> {
    let mut serial = BigNum::new()?;
    serial.rand(63, MsbOption::MAYBE_ZERO, false)?;
    Ok(serial)
}

/// Advance the hex serial stored at `path`, creating it from a random seed.
fn next_serial(path: &Path) -> Result<BigNum> {
    let current = match std::fs::read_to_string(path) {
        Ok(contents) => BigNum::from_hex_str(contents.trim()).map_err(|e| {
            ProvisionError::Toolkit(format!("Corrupt serial file {}: {e}", path.display()))
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => random_serial()?,
        Err(e) => return Err(e.into()),
    };
    let one = BigNum::from_u32(1)?;
    let mut next = BigNum::new()?;
    next.checked_add(&current, &one)?;
    std::fs::write(path, format!("{}\n", next.to_hex_str()?))?;
    Ok(next)
}

fn read_private_key(path: &Path) -> Result<PKey<Private>> {
    let pem = std::fs::read(path)?;
    PKey::private_key_from_pem(&pem).map_err(|e| {
        ProvisionError::Toolkit(format!("Failed to load private key {}: {e}", path.display()))
    })
}

fn read_certificate(path: &Path) -> Result<X509> {
    let pem = std::fs::read(path)?;
    X509::from_pem(&pem).map_err(|e| {
        ProvisionError::Toolkit(format!("Failed to load certificate {}: {e}", path.display()))
    })
}

fn write_private(path: &Path, pem: &[u8]) -> Result<()> {
    std::fs::write(path, pem)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_slash_subject() {
        let name = parse_subject("/C=US/O=Certbridge/CN=localhost").unwrap();
        assert_eq!(one_line_name(&name), "C = US, O = Certbridge, CN = localhost");
    }

    #[test]
    fn name_values_are_escaped() {
        assert_eq!(escape_name_value("plain.app"), "plain.app");
        assert_eq!(escape_name_value("a,b"), "a\\,b");
        assert_eq!(escape_name_value(" lead"), "\\ lead");
        assert_eq!(escape_name_value("trail "), "trail\\ ");
        assert_eq!(escape_name_value("x, CN = y"), "x\\, CN \\= y");
        assert_eq!(escape_name_value("back\\slash"), "back\\\\slash");
        assert_eq!(escape_name_value(""), "");
    }

    #[test]
    fn rejects_component_without_value() {
        assert!(parse_subject("/C=US/garbage").is_err());
        assert!(parse_subject("///").is_err());
    }

    #[test]
    fn serial_advances_on_each_use() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.srl");
        let first = next_serial(&path).unwrap();
        let second = next_serial(&path).unwrap();
        let mut expected = BigNum::new().unwrap();
        expected
            .checked_add(&first, &BigNum::from_u32(1).unwrap())
            .unwrap();
        assert_eq!(second, expected);
    }
}
