//! Device-auth challenge signing.
//!
//! The sender verifies the receiver's device chain by having it sign
//! `sender_nonce ‖ peer_cert_DER` with the auth cert's RSA key, under the
//! challenge's choice of signature scheme and hash.

use rsa::{Pkcs1v15Sign, Pss};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::domain::cast_channel::{AuthChallenge, AuthResponse, HashAlgorithm, SignatureAlgorithm};
use crate::domain::error::{Error, Result};

use super::cert::KeyPair;

/// Compute the response for a sender challenge.
///
/// Fails with [`Error::Auth`] when the chain is incomplete or the requested
/// algorithms are unrecognized.
pub fn auth_response(
    challenge: &AuthChallenge,
    intermediates: &[KeyPair],
    peer_cert: &KeyPair,
    auth_cert: &KeyPair,
) -> Result<AuthResponse> {
    if intermediates.is_empty() {
        return Err(Error::Auth("missing intermediate certificates".into()));
    }

    let hash_alg = HashAlgorithm::try_from(
        challenge
            .hash_algorithm
            .unwrap_or(HashAlgorithm::Sha1 as i32),
    )
    .map_err(|_| {
        Error::Auth(format!(
            "unrecognized hash algorithm: {:?}",
            challenge.hash_algorithm
        ))
    })?;
    let sig_alg = SignatureAlgorithm::try_from(
        challenge
            .signature_algorithm
            .unwrap_or(SignatureAlgorithm::RsassaPkcs1v15 as i32),
    )
    .map_err(|_| {
        Error::Auth(format!(
            "unrecognized signature algorithm: {:?}",
            challenge.signature_algorithm
        ))
    })?;

    let nonce = challenge.sender_nonce.as_deref().unwrap_or_default();
    let mut to_sign = Vec::with_capacity(nonce.len() + peer_cert.der().len());
    to_sign.extend_from_slice(nonce);
    to_sign.extend_from_slice(peer_cert.der());

    let digest = match hash_alg {
        HashAlgorithm::Sha1 => Sha1::digest(&to_sign).to_vec(),
        HashAlgorithm::Sha256 => Sha256::digest(&to_sign).to_vec(),
    };

    let key = auth_cert.private_key();
    let signature = match (sig_alg, hash_alg) {
        (SignatureAlgorithm::RsassaPkcs1v15, HashAlgorithm::Sha1) => {
            key.sign(Pkcs1v15Sign::new::<Sha1>(), &digest)
        }
        (SignatureAlgorithm::RsassaPkcs1v15, HashAlgorithm::Sha256) => {
            key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        }
        (SignatureAlgorithm::RsassaPss, HashAlgorithm::Sha1) => {
            key.sign_with_rng(&mut rand::thread_rng(), Pss::new::<Sha1>(), &digest)
        }
        (SignatureAlgorithm::RsassaPss, HashAlgorithm::Sha256) => {
            key.sign_with_rng(&mut rand::thread_rng(), Pss::new::<Sha256>(), &digest)
        }
        (SignatureAlgorithm::Unspecified, _) => {
            return Err(Error::Auth("unspecified signature algorithm".into()))
        }
    }
    .map_err(|e| Error::Auth(format!("signing failed: {e}")))?;

    Ok(AuthResponse {
        signature,
        client_auth_certificate: auth_cert.der().to_vec(),
        intermediate_certificate: intermediates.iter().map(|kp| kp.der().to_vec()).collect(),
        signature_algorithm: Some(sig_alg as i32),
        sender_nonce: challenge.sender_nonce.clone(),
        hash_algorithm: Some(hash_alg as i32),
        crl: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::crypto::cert::{
        generate_intermediate_ca, generate_root_ca, generate_standard,
    };
    use rsa::RsaPublicKey;

    fn chain() -> (KeyPair, Vec<KeyPair>, KeyPair, KeyPair) {
        let root = generate_root_ca(None, None).unwrap();
        let inter = generate_intermediate_ca(&root, None, None).unwrap();
        let peer = generate_standard(&inter, None, None).unwrap();
        let auth = generate_standard(&inter, None, None).unwrap();
        (root, vec![inter], peer, auth)
    }

    fn challenge(sig: SignatureAlgorithm, hash: HashAlgorithm) -> AuthChallenge {
        AuthChallenge {
            signature_algorithm: Some(sig as i32),
            sender_nonce: Some(b"fixed-nonce-0123".to_vec()),
            hash_algorithm: Some(hash as i32),
        }
    }

    #[test]
    fn pkcs1v15_sha256_signature_verifies() {
        let (_root, inters, peer, auth) = chain();
        let resp = auth_response(
            &challenge(SignatureAlgorithm::RsassaPkcs1v15, HashAlgorithm::Sha256),
            &inters,
            &peer,
            &auth,
        )
        .unwrap();

        let mut signed = b"fixed-nonce-0123".to_vec();
        signed.extend_from_slice(peer.der());
        let digest = Sha256::digest(&signed);

        let public: RsaPublicKey = auth.private_key().to_public_key();
        public
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &resp.signature)
            .unwrap();
        assert_eq!(resp.client_auth_certificate, auth.der());
        assert_eq!(resp.intermediate_certificate.len(), 1);
        assert_eq!(resp.sender_nonce.as_deref(), Some(&b"fixed-nonce-0123"[..]));
    }

    #[test]
    fn pss_sha1_signature_verifies() {
        let (_root, inters, peer, auth) = chain();
        let resp = auth_response(
            &challenge(SignatureAlgorithm::RsassaPss, HashAlgorithm::Sha1),
            &inters,
            &peer,
            &auth,
        )
        .unwrap();

        let mut signed = b"fixed-nonce-0123".to_vec();
        signed.extend_from_slice(peer.der());
        let digest = Sha1::digest(&signed);

        let public: RsaPublicKey = auth.private_key().to_public_key();
        public
            .verify(Pss::new::<Sha1>(), &digest, &resp.signature)
            .unwrap();
    }

    #[test]
    fn missing_chain_fails() {
        let (_root, _inters, peer, auth) = chain();
        let err = auth_response(
            &challenge(SignatureAlgorithm::RsassaPkcs1v15, HashAlgorithm::Sha256),
            &[],
            &peer,
            &auth,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn unknown_algorithms_fail() {
        let (_root, inters, peer, auth) = chain();
        let mut ch = challenge(SignatureAlgorithm::RsassaPkcs1v15, HashAlgorithm::Sha256);
        ch.hash_algorithm = Some(99);
        assert!(matches!(
            auth_response(&ch, &inters, &peer, &auth),
            Err(Error::Auth(_))
        ));

        let mut ch = challenge(SignatureAlgorithm::RsassaPkcs1v15, HashAlgorithm::Sha256);
        ch.signature_algorithm = Some(42);
        assert!(matches!(
            auth_response(&ch, &inters, &peer, &auth),
            Err(Error::Auth(_))
        ));
    }
}
