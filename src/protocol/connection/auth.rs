use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::error::{Error, Result};
use crate::opts::{Credential, Opts};

pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
pub const CLIENT_ED25519: &str = "client_ed25519";
pub const MYSQL_CLEAR_PASSWORD: &str = "mysql_clear_password";

/// caching_sha2_password sub-status: cached entry matched, OK follows.
const FAST_AUTH_SUCCESS: u8 = 0x03;
/// caching_sha2_password sub-status: full authentication required.
const FULL_AUTH_REQUIRED: u8 = 0x04;
/// caching_sha2_password client request for the server RSA public key.
const REQUEST_PUBLIC_KEY: u8 = 0x02;

/// Connection facts a plugin may branch on.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext<'a> {
    pub ssl_active: bool,
    pub opts: &'a Opts,
}

/// One authentication method. The session drives the exchange: it sends the
/// plugin's initial response, then routes every AuthMoreData payload back
/// through [`more_data`](AuthPlugin::more_data) until the server answers
/// OK or ERR.
pub trait AuthPlugin {
    fn name(&self) -> &'static str;

    /// Response bytes for the handshake response or an auth-switch reply.
    fn initial(&mut self, cred: &Credential, seed: &[u8], ctx: &AuthContext<'_>) -> Result<Vec<u8>>;

    /// Consume an AuthMoreData payload (0x01 header already stripped).
    /// Returns bytes to send back, or `None` when the exchange is complete
    /// on the client side.
    fn more_data(
        &mut self,
        data: &[u8],
        cred: &Credential,
        seed: &[u8],
        ctx: &AuthContext<'_>,
    ) -> Result<Option<Vec<u8>>> {
        let _ = (data, cred, seed, ctx);
        Err(Error::Auth(format!(
            "unexpected server data during {} exchange",
            self.name()
        )))
    }
}

impl std::fmt::Debug for dyn AuthPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthPlugin").field("name", &self.name()).finish()
    }
}

/// Instantiate the plugin the server asked for, by name.
pub fn plugin_by_name(name: &str) -> Result<Box<dyn AuthPlugin>> {
    match name {
        MYSQL_NATIVE_PASSWORD => Ok(Box::new(NativePassword)),
        CACHING_SHA2_PASSWORD => Ok(Box::new(CachingSha2::default())),
        CLIENT_ED25519 => Ok(Box::new(Ed25519)),
        MYSQL_CLEAR_PASSWORD => Ok(Box::new(ClearPassword)),
        _ => Err(Error::Auth(format!(
            "unsupported authentication plugin '{name}'"
        ))),
    }
}

// ============================================================================
// mysql_native_password
// ============================================================================

/// SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))
pub struct NativePassword;

pub fn scramble_native(password: &str, seed: &[u8]) -> [u8; 20] {
    if password.is_empty() {
        return [0_u8; 20];
    }

    let stage1: [u8; 20] = Sha1::digest(password.as_bytes()).into();
    let stage2: [u8; 20] = Sha1::digest(stage1).into();

    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let mut result: [u8; 20] = hasher.finalize().into();

    for (out, byte) in result.iter_mut().zip(stage1) {
        *out ^= byte;
    }
    result
}

impl AuthPlugin for NativePassword {
    fn name(&self) -> &'static str {
        MYSQL_NATIVE_PASSWORD
    }

    fn initial(&mut self, cred: &Credential, seed: &[u8], _: &AuthContext<'_>) -> Result<Vec<u8>> {
        match cred.password.as_deref() {
            // empty password authenticates with an empty response
            None | Some("") => Ok(Vec::new()),
            Some(password) => {
                // the seed may carry a trailing NUL that is not hashed
                let end = seed.iter().position(|&b| b == 0).unwrap_or(seed.len());
                Ok(scramble_native(password, &seed[..end]).to_vec())
            }
        }
    }
}

// ============================================================================
// caching_sha2_password
// ============================================================================

/// XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + seed)), with an
/// RSA-encrypted fallback when the server cache misses.
#[derive(Default)]
pub struct CachingSha2 {
    awaiting_public_key: bool,
}

pub fn scramble_sha256(password: &str, seed: &[u8]) -> [u8; 32] {
    if password.is_empty() {
        return [0_u8; 32];
    }

    let stage1: [u8; 32] = Sha256::digest(password.as_bytes()).into();
    let stage2: [u8; 32] = Sha256::digest(stage1).into();

    let mut hasher = Sha256::new();
    hasher.update(stage2);
    hasher.update(seed);
    let mut result: [u8; 32] = hasher.finalize().into();

    for (out, byte) in result.iter_mut().zip(stage1) {
        *out ^= byte;
    }
    result
}

/// Encrypt `password + NUL`, XOR-ed with the repeating seed, under the
/// server public key with RSA-OAEP.
fn rsa_encrypt_password(public_key_pem: &str, password: &str, seed: &[u8]) -> Result<Vec<u8>> {
    use rsa::pkcs8::DecodePublicKey;

    let key = rsa::RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| Error::Auth(format!("invalid RSA public key: {e}")))?;

    let mut plain: Vec<u8> = password.as_bytes().to_vec();
    plain.push(0);
    for (i, byte) in plain.iter_mut().enumerate() {
        *byte ^= seed[i % seed.len()];
    }

    key.encrypt(&mut rand::thread_rng(), rsa::Oaep::new::<Sha1>(), &plain)
        .map_err(|e| Error::Auth(format!("RSA encryption failed: {e}")))
}

impl CachingSha2 {
    fn full_authentication(
        &mut self,
        cred: &Credential,
        seed: &[u8],
        ctx: &AuthContext<'_>,
    ) -> Result<Option<Vec<u8>>> {
        let password = cred.password.as_deref().unwrap_or("");

        if ctx.ssl_active {
            // the channel is already encrypted
            let mut out = password.as_bytes().to_vec();
            out.push(0);
            return Ok(Some(out));
        }

        if let Some(path) = &ctx.opts.server_rsa_public_key_file {
            let pem = std::fs::read_to_string(path)
                .map_err(|e| Error::Auth(format!("cannot read RSA public key file '{path}': {e}")))?;
            return Ok(Some(rsa_encrypt_password(&pem, password, seed)?));
        }

        if ctx.opts.allow_public_key_retrieval {
            self.awaiting_public_key = true;
            return Ok(Some(vec![REQUEST_PUBLIC_KEY]));
        }

        Err(Error::Auth(
            "RSA public key is not available client side".into(),
        ))
    }
}

impl AuthPlugin for CachingSha2 {
    fn name(&self) -> &'static str {
        CACHING_SHA2_PASSWORD
    }

    fn initial(&mut self, cred: &Credential, seed: &[u8], _: &AuthContext<'_>) -> Result<Vec<u8>> {
        match cred.password.as_deref() {
            None | Some("") => Ok(Vec::new()),
            Some(password) => Ok(scramble_sha256(password, seed).to_vec()),
        }
    }

    fn more_data(
        &mut self,
        data: &[u8],
        cred: &Credential,
        seed: &[u8],
        ctx: &AuthContext<'_>,
    ) -> Result<Option<Vec<u8>>> {
        if self.awaiting_public_key {
            self.awaiting_public_key = false;
            let pem = simdutf8::basic::from_utf8(data)
                .map_err(|_| Error::Auth("server sent a malformed RSA public key".into()))?;
            let password = cred.password.as_deref().unwrap_or("");
            return Ok(Some(rsa_encrypt_password(pem, password, seed)?));
        }

        match data.first() {
            Some(&FAST_AUTH_SUCCESS) => Ok(None),
            Some(&FULL_AUTH_REQUIRED) => self.full_authentication(cred, seed, ctx),
            other => Err(Error::Auth(format!(
                "unexpected caching_sha2_password status {other:?}"
            ))),
        }
    }
}

// ============================================================================
// client_ed25519 (MariaDB)
// ============================================================================

/// Ed25519 signature over the server seed, with the secret scalar derived
/// from SHA-512(password) as the MariaDB server does.
pub struct Ed25519;

pub fn ed25519_sign(password: &str, seed: &[u8]) -> [u8; 64] {
    use curve25519_dalek::edwards::EdwardsPoint;
    use curve25519_dalek::scalar::{Scalar, clamp_integer};

    let az: [u8; 64] = Sha512::digest(password.as_bytes()).into();
    let mut scalar_bytes = [0_u8; 32];
    scalar_bytes.copy_from_slice(&az[..32]);
    let a = Scalar::from_bytes_mod_order(clamp_integer(scalar_bytes));
    let big_a = EdwardsPoint::mul_base_clamped(scalar_bytes);

    let mut hasher = Sha512::new();
    hasher.update(&az[32..]);
    hasher.update(seed);
    let nonce_hash: [u8; 64] = hasher.finalize().into();
    let r = Scalar::from_bytes_mod_order_wide(&nonce_hash);
    let big_r = EdwardsPoint::mul_base(&r);

    let mut hasher = Sha512::new();
    hasher.update(big_r.compress().as_bytes());
    hasher.update(big_a.compress().as_bytes());
    hasher.update(seed);
    let h_hash: [u8; 64] = hasher.finalize().into();
    let h = Scalar::from_bytes_mod_order_wide(&h_hash);

    let s = h * a + r;

    let mut out = [0_u8; 64];
    out[..32].copy_from_slice(big_r.compress().as_bytes());
    out[32..].copy_from_slice(&s.to_bytes());
    out
}

impl AuthPlugin for Ed25519 {
    fn name(&self) -> &'static str {
        CLIENT_ED25519
    }

    fn initial(&mut self, cred: &Credential, seed: &[u8], _: &AuthContext<'_>) -> Result<Vec<u8>> {
        let password = cred.password.as_deref().unwrap_or("");
        Ok(ed25519_sign(password, seed).to_vec())
    }
}

// ============================================================================
// mysql_clear_password
// ============================================================================

/// Plaintext password; only permitted over TLS.
pub struct ClearPassword;

impl AuthPlugin for ClearPassword {
    fn name(&self) -> &'static str {
        MYSQL_CLEAR_PASSWORD
    }

    fn initial(&mut self, cred: &Credential, _: &[u8], ctx: &AuthContext<'_>) -> Result<Vec<u8>> {
        if !ctx.ssl_active {
            return Err(Error::Auth(
                "mysql_clear_password requires an SSL connection".into(),
            ));
        }
        let mut out = cred.password.as_deref().unwrap_or("").as_bytes().to_vec();
        out.push(0);
        Ok(out)
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod auth_test;
