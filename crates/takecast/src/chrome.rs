//! In-place patching of the Cast root CA embedded in a sender binary.
//!
//! The sender only trusts receivers whose device chain ends at Google's root
//! CA. `patch` finds that DER blob inside the vendor library, generates (or
//! loads) a replacement root CA of the exact same byte length, keeps a
//! `.patched` backup, and overwrites the blob in place. `unpatch` restores
//! the backup.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tracing::{debug, info};

use takecast_core::adapters::crypto::cert::{self, CertTemplate, KeyPair};

/// The embedded root CA to search for, as shipped by the vendor. The blob is
/// not distributable with this source, so it is loaded from the cert dir.
fn load_existing_root_ca(cert_dir: &Path) -> anyhow::Result<Vec<u8>> {
    let path = cert_dir.join("cast_root_ca.der");
    std::fs::read(&path).with_context(|| {
        format!(
            "failed reading the vendor root CA at {}; export the embedded \
             certificate from the sender binary and place it there first",
            path.display()
        )
    })
}

pub fn patch(cert_dir: &Path, chrome_dir: &Path) -> anyhow::Result<()> {
    let existing = load_existing_root_ca(cert_dir)?;

    // Grab or create the replacement bytes.
    let cert_file = cert_dir.join("ca.crt");
    let replacement = match std::fs::read_to_string(&cert_file) {
        Ok(pem_text) => pem::parse(&pem_text)
            .context("failed parsing ca.crt")?
            .contents()
            .to_vec(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(
                "creating new root CA cert and saving as ca.crt and ca.key in {}",
                cert_dir.display()
            );
            let kp = generate_replacement_root_ca(existing.len())?;
            kp.persist_to_files(&cert_file, &cert_dir.join("ca.key"))?;
            kp.der().to_vec()
        }
        Err(e) => return Err(e).context("failed reading ca.crt"),
    };

    let lib = find_patchable_lib(chrome_dir, &existing, false)?;
    info!("patching library at {}", lib.path.display());
    lib.patch(&replacement)
}

pub fn unpatch(cert_dir: &Path, chrome_dir: &Path) -> anyhow::Result<()> {
    let existing = load_existing_root_ca(cert_dir)?;
    let lib = find_patchable_lib(chrome_dir, &existing, true)?;
    info!(
        "unpatching library from {} to {}",
        lib.path.display(),
        lib.orig_path().display()
    );
    lib.unpatch()
}

/// Generate a root CA whose DER is exactly `target_len` bytes by growing the
/// OU attribute one character at a time; a key whose first certificate
/// overshoots is discarded.
fn generate_replacement_root_ca(target_len: usize) -> anyhow::Result<KeyPair> {
    const MAX_TRIES: usize = 10;
    for attempt in 1..=MAX_TRIES {
        debug!("attempt {attempt}/{MAX_TRIES} to generate a certificate of {target_len} bytes");
        let key = cert::generate_rsa_key()?;
        let mut unit = String::new();
        loop {
            let mut template = CertTemplate::new("Cast Root CA");
            template.organizational_unit = unit.clone();
            let kp = cert::generate_root_ca(Some(template), Some(key.clone()))?;
            match kp.der().len().cmp(&target_len) {
                Ordering::Equal => return Ok(kp),
                Ordering::Greater => break,
                Ordering::Less => {
                    unit.push('0');
                    debug!(
                        "certificate of {} bytes is not {target_len}, grew OU to {:?}",
                        kp.der().len(),
                        unit
                    );
                }
            }
        }
    }
    bail!("tried {MAX_TRIES} times to reach the target certificate size")
}

struct PatchableLib {
    path: PathBuf,
    file_bytes: Vec<u8>,
    cert_index: usize,
    existing_len: usize,
}

impl PatchableLib {
    fn orig_path(&self) -> PathBuf {
        match self.path.to_str().and_then(|p| p.strip_suffix(".patched")) {
            Some(orig) => PathBuf::from(orig),
            None => self.path.clone(),
        }
    }

    fn patch(&self, replacement: &[u8]) -> anyhow::Result<()> {
        if replacement.len() != self.existing_len {
            bail!(
                "replacement byte size {} != existing byte size {}",
                replacement.len(),
                self.existing_len
            );
        }
        // Backup first, then overwrite the blob in place.
        let backup = PathBuf::from(format!("{}.patched", self.path.display()));
        std::fs::write(&backup, &self.file_bytes).context("failed making backup")?;
        let mut patched = self.file_bytes.clone();
        patched[self.cert_index..self.cert_index + replacement.len()]
            .copy_from_slice(replacement);
        std::fs::write(&self.path, &patched)
            .with_context(|| format!("failed patching file {}", self.path.display()))
    }

    fn unpatch(&self) -> anyhow::Result<()> {
        std::fs::write(self.orig_path(), &self.file_bytes)
            .context("failed overwriting existing file from backup")?;
        std::fs::remove_file(&self.path).context("unpatched, but unable to remove backup")
    }
}

fn find_patchable_lib(
    start_dir: &Path,
    existing: &[u8],
    backup: bool,
) -> anyhow::Result<PatchableLib> {
    if !cfg!(windows) {
        bail!("OS not supported yet: {}", std::env::consts::OS);
    }
    let matches_name = move |path: &Path| {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if backup {
            name.strip_suffix(".patched")
                .is_some_and(|orig| orig.ends_with("chrome.dll"))
        } else {
            name.ends_with("chrome.dll")
        }
    };

    let mut candidates = Vec::new();
    walk(start_dir, &mut |path| {
        if matches_name(path) {
            candidates.push(path.to_path_buf());
        }
    })?;

    for path in candidates {
        let file_bytes = std::fs::read(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        if let Some(cert_index) = find_subslice(&file_bytes, existing) {
            return Ok(PatchableLib {
                path,
                file_bytes,
                cert_index,
                existing_len: existing.len(),
            });
        }
    }
    bail!("failed finding file with cert to patch")
}

fn walk(dir: &Path, visit: &mut impl FnMut(&Path)) -> anyhow::Result<()> {
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed reading {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk(&path, visit)?;
        } else {
            visit(&path);
        }
    }
    Ok(())
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
