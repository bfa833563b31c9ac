use argon2::{password_hash::Output, Algorithm, Argon2, Params, Version};
use rand::{rngs::OsRng, RngCore};
use tracing::error;

const SALT_BYTES: usize = 16;
const DIGEST_BYTES: usize = 64;
const MEMORY_KIB: u32 = 19 * 1024;
const ITERATIONS: u32 = 2;
const PARALLELISM: u32 = 1;

/// Hex-encoded password digest and the salt it was derived with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordDigest {
    pub hash: String,
    pub salt: String,
}

fn kdf() -> anyhow::Result<Argon2<'static>> {
    let params = Params::new(MEMORY_KIB, ITERATIONS, PARALLELISM, Some(DIGEST_BYTES))
        .map_err(|e| anyhow::anyhow!("argon2 params: {e}"))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn derive(plain: &str, salt: &str) -> anyhow::Result<[u8; DIGEST_BYTES]> {
    let mut out = [0u8; DIGEST_BYTES];
    kdf()?
        .hash_password_into(plain.as_bytes(), salt.as_bytes(), &mut out)
        .map_err(|e| {
            error!(error = %e, "argon2 derive error");
            anyhow::anyhow!(e.to_string())
        })?;
    Ok(out)
}

/// Hash `plain` with `salt`, or with a fresh random salt when none is given.
pub fn hash_password(plain: &str, salt: Option<&str>) -> anyhow::Result<PasswordDigest> {
    let salt = match salt {
        Some(s) => s.to_string(),
        None => {
            let mut bytes = [0u8; SALT_BYTES];
            OsRng.fill_bytes(&mut bytes);
            hex::encode(bytes)
        }
    };
    let digest = derive(plain, &salt)?;
    Ok(PasswordDigest {
        hash: hex::encode(digest),
        salt,
    })
}

pub fn verify_password(plain: &str, stored: &PasswordDigest) -> anyhow::Result<bool> {
    let expected = hex::decode(&stored.hash).map_err(|e| {
        error!(error = %e, "stored password hash is not hex");
        anyhow::anyhow!(e.to_string())
    })?;
    let expected = Output::new(&expected).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let candidate = derive(plain, &stored.salt)?;
    let candidate = Output::new(&candidate).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    // Output equality is constant-time.
    Ok(expected == candidate)
}
