//! RSA certificate chain: root CA, intermediate CA, and end-entity key pairs.
//!
//! The chain a sender expects: a long-lived root CA (the pair persisted on
//! disk and patched into the sender binary), an intermediate that signs the
//! end-entity certs, a peer cert presented on the TLS socket, and an auth
//! cert that signs device-auth challenges. DER lives in memory; disk format
//! is PEM.

use rand::Rng;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, KeyUsagePurpose, SerialNumber,
};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::path::Path;

use crate::domain::error::{Error, Result};

const RSA_BITS: usize = 2048;

/// Subject and validity inputs for certificate generation.
#[derive(Debug, Clone)]
pub struct CertTemplate {
    pub common_name: String,
    pub organization: String,
    /// Empty means no OU attribute.
    pub organizational_unit: String,
    pub country: String,
    /// (year, month, day)
    pub not_before: (i32, u8, u8),
    pub not_after: (i32, u8, u8),
}

impl CertTemplate {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            organization: "TakeCast".into(),
            organizational_unit: String::new(),
            country: "US".into(),
            not_before: (2024, 1, 1),
            not_after: (2049, 1, 1),
        }
    }
}

/// A certificate plus its RSA private key.
///
/// Holds the DER as produced at generation (or load) time; `issuer` is the
/// rcgen handle used to sign child certificates.
pub struct KeyPair {
    der: Vec<u8>,
    key: RsaPrivateKey,
    signer: rcgen::KeyPair,
    issuer: rcgen::Certificate,
}

impl KeyPair {
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.key
    }

    pub fn cert_pem(&self) -> String {
        pem::encode(&pem::Pem::new("CERTIFICATE", self.der.clone()))
    }

    /// Write `cert_path` (PEM certificate) and `key_path` (PKCS#8 PEM key).
    pub fn persist_to_files(&self, cert_path: &Path, key_path: &Path) -> Result<()> {
        std::fs::write(cert_path, self.cert_pem())?;
        let key_pem = self
            .key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| Error::Configuration(format!("failed encoding private key: {e}")))?;
        std::fs::write(key_path, key_pem.as_bytes())?;
        Ok(())
    }

    /// Load a PEM certificate + PKCS#8 PEM key from disk. The stored DER is
    /// kept byte-for-byte as read.
    pub fn load_from_files(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let cert_pem = std::fs::read_to_string(cert_path)?;
        let block = pem::parse(&cert_pem)
            .map_err(|e| Error::Configuration(format!("bad certificate PEM: {e}")))?;
        let der = block.contents().to_vec();

        let key_pem = std::fs::read_to_string(key_path)?;
        let key = RsaPrivateKey::from_pkcs8_pem(&key_pem)
            .map_err(|e| Error::Configuration(format!("bad private key PEM: {e}")))?;
        let signer = rcgen_signer(&key)?;
        let params = CertificateParams::from_ca_cert_der(&CertificateDer::from(der.clone()))
            .map_err(|e| Error::Configuration(format!("bad certificate DER: {e}")))?;
        let issuer = params
            .self_signed(&signer)
            .map_err(|e| Error::Configuration(format!("failed rebuilding issuer: {e}")))?;
        Ok(Self {
            der,
            key,
            signer,
            issuer,
        })
    }

    /// Certificate + key in the form the TLS listener wants.
    pub fn rustls_identity(&self) -> Result<(CertificateDer<'static>, PrivateKeyDer<'static>)> {
        let key_der = self
            .key
            .to_pkcs8_der()
            .map_err(|e| Error::Configuration(format!("failed encoding private key: {e}")))?;
        Ok((
            CertificateDer::from(self.der.clone()),
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der.as_bytes().to_vec())),
        ))
    }
}

/// Self-signed root CA, long validity.
pub fn generate_root_ca(
    template: Option<CertTemplate>,
    key: Option<RsaPrivateKey>,
) -> Result<KeyPair> {
    let template = template.unwrap_or_else(|| CertTemplate::new("TakeCast Root CA"));
    let key = key_or_generate(key)?;
    let signer = rcgen_signer(&key)?;
    let mut params = params_from(&template);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    let cert = params
        .self_signed(&signer)
        .map_err(|e| Error::Configuration(format!("failed generating root CA: {e}")))?;
    Ok(KeyPair {
        der: cert.der().as_ref().to_vec(),
        key,
        signer,
        issuer: cert,
    })
}

/// Intermediate CA signed by the given root; path length 0.
pub fn generate_intermediate_ca(
    parent: &KeyPair,
    template: Option<CertTemplate>,
    key: Option<RsaPrivateKey>,
) -> Result<KeyPair> {
    let template = template.unwrap_or_else(|| CertTemplate::new("TakeCast Intermediate CA"));
    let key = key_or_generate(key)?;
    let signer = rcgen_signer(&key)?;
    let mut params = params_from(&template);
    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    let cert = params
        .signed_by(&signer, &parent.issuer, &parent.signer)
        .map_err(|e| Error::Configuration(format!("failed generating intermediate CA: {e}")))?;
    Ok(KeyPair {
        der: cert.der().as_ref().to_vec(),
        key,
        signer,
        issuer: cert,
    })
}

/// End-entity pair (peer or auth cert) signed by an intermediate.
pub fn generate_standard(
    parent: &KeyPair,
    template: Option<CertTemplate>,
    key: Option<RsaPrivateKey>,
) -> Result<KeyPair> {
    let template = template.unwrap_or_else(|| CertTemplate::new("TakeCast Device"));
    let key = key_or_generate(key)?;
    let signer = rcgen_signer(&key)?;
    let mut params = params_from(&template);
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    let cert = params
        .signed_by(&signer, &parent.issuer, &parent.signer)
        .map_err(|e| Error::Configuration(format!("failed generating key pair: {e}")))?;
    Ok(KeyPair {
        der: cert.der().as_ref().to_vec(),
        key,
        signer,
        issuer: cert,
    })
}

pub fn generate_rsa_key() -> Result<RsaPrivateKey> {
    RsaPrivateKey::new(&mut rand::thread_rng(), RSA_BITS)
        .map_err(|e| Error::Configuration(format!("failed generating RSA key: {e}")))
}

fn key_or_generate(key: Option<RsaPrivateKey>) -> Result<RsaPrivateKey> {
    match key {
        Some(k) => Ok(k),
        None => generate_rsa_key(),
    }
}

fn rcgen_signer(key: &RsaPrivateKey) -> Result<rcgen::KeyPair> {
    let pkcs8 = key
        .to_pkcs8_der()
        .map_err(|e| Error::Configuration(format!("failed encoding private key: {e}")))?;
    let der = PrivatePkcs8KeyDer::from(pkcs8.as_bytes().to_vec());
    rcgen::KeyPair::from_pkcs8_der_and_sign_algo(&der, &rcgen::PKCS_RSA_SHA256)
        .map_err(|e| Error::Configuration(format!("unusable RSA key: {e}")))
}

fn params_from(template: &CertTemplate) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, template.common_name.clone());
    dn.push(DnType::OrganizationName, template.organization.clone());
    if !template.organizational_unit.is_empty() {
        dn.push(
            DnType::OrganizationalUnitName,
            template.organizational_unit.clone(),
        );
    }
    dn.push(DnType::CountryName, template.country.clone());
    params.distinguished_name = dn;
    let (y, m, d) = template.not_before;
    params.not_before = rcgen::date_time_ymd(y, m, d);
    let (y, m, d) = template.not_after;
    params.not_after = rcgen::date_time_ymd(y, m, d);
    // Fixed-width serial keeps the DER size stable for a given subject.
    let mut serial = rand::thread_rng().gen::<[u8; 8]>();
    serial[0] = (serial[0] & 0x3f) | 0x40;
    params.serial_number = Some(SerialNumber::from(serial.to_vec()));
    params
}
