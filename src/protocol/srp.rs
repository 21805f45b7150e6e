//! SRP6 key exchange as spoken by the logon protocol.
//!
//! The server never sees a password. It keeps a `(salt, verifier)` pair per account and
//! proves knowledge of the verifier while the client proves knowledge of the password.
//!
//! Parameters are fixed by the client: a 256-bit safe prime `N`, generator `g = 7`,
//! multiplier `k = 3` and SHA-1 as the hash. Every big integer crosses the wire as a
//! little-endian byte string, and public values are padded to 32 bytes.
//!
//! ```text
//! x  = H(salt | H(I ":" P))            v  = g^x % N
//! B  = (k*v + g^b) % N                 u  = H(A | B)
//! S  = (A * v^u)^b % N                 K  = interleave(S)
//! M1 = H(H(N) ^ H(g) | H(I) | salt | A | B | K)
//! M2 = H(A | M1 | K)
//! ```
//!
//! `I` and `P` are upper-cased before hashing. [`SrpClient`] is the mirror image used by
//! the test-suite and by tooling that needs to log in against a running server.
//!
//! Private ephemerals are stored as byte arrays and wiped on drop.

use num_bigint::BigUint;
use sha1::{Digest, Sha1};
use zeroize::{Zeroize, ZeroizeOnDrop};

use tracing::{debug, instrument};

use crate::error::SrpError;

/// Size of `N`, salts, verifiers and public ephemerals on the wire
pub const KEY_LENGTH: usize = 32;

/// Size of the interleaved session key
pub const SESSION_KEY_LENGTH: usize = 40;

/// Size of a SHA-1 digest
pub const PROOF_LENGTH: usize = 20;

/// Generator `g`
pub const GENERATOR: u8 = 7;

/// Multiplier `k`
pub const MULTIPLIER: u8 = 3;

/// Safe prime `N`, little-endian
pub const LARGE_SAFE_PRIME_LE: [u8; KEY_LENGTH] = [
    0xB7, 0x9B, 0x3E, 0x2A, 0x87, 0x82, 0x3C, 0xAB, 0x8F, 0x5E, 0xBF, 0xBF, 0x8E, 0xB1, 0x01,
    0x08, 0x53, 0x50, 0x06, 0x29, 0x8B, 0x5B, 0xAD, 0xBD, 0x5B, 0x53, 0xE1, 0x89, 0x5E, 0x64,
    0x4B, 0x89,
];

pub type Proof = [u8; PROOF_LENGTH];

/// Shared secret `K` agreed by both sides of a successful exchange
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LENGTH]);

impl SessionKey {
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LENGTH] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Result of a verified client proof
#[derive(Debug)]
pub struct SrpProof {
    pub session_key: SessionKey,
    pub server_proof: Proof,
}

fn modulus() -> BigUint {
    BigUint::from_bytes_le(&LARGE_SAFE_PRIME_LE)
}

fn sha1(parts: &[&[u8]]) -> Proof {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

fn to_key_bytes(value: &BigUint) -> [u8; KEY_LENGTH] {
    let bytes = value.to_bytes_le();
    let mut out = [0u8; KEY_LENGTH];
    let n = bytes.len().min(KEY_LENGTH);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn is_zero_mod_n(value: &BigUint, n: &BigUint) -> bool {
    (value % n).bits() == 0
}

/// `x = H(salt | H(UPPER(I) ":" UPPER(P)))`
fn private_x(username: &str, password: &str, salt: &[u8; KEY_LENGTH]) -> BigUint {
    let identity = format!(
        "{}:{}",
        username.to_ascii_uppercase(),
        password.to_ascii_uppercase()
    );
    let identity_hash = sha1(&[identity.as_bytes()]);
    BigUint::from_bytes_le(&sha1(&[salt, &identity_hash]))
}

fn scrambler(client_public: &[u8; KEY_LENGTH], server_public: &[u8; KEY_LENGTH]) -> BigUint {
    BigUint::from_bytes_le(&sha1(&[client_public, server_public]))
}

/// Hash the even and odd bytes of `S` separately and interleave the digests.
///
/// Leading zero bytes are skipped in pairs so both halves start at the same offset.
fn interleave(s: &[u8; KEY_LENGTH]) -> SessionKey {
    let mut skip = s.iter().take_while(|&&b| b == 0).count();
    if skip % 2 == 1 {
        skip += 1;
    }
    skip /= 2;

    let half = KEY_LENGTH / 2;
    let mut even = [0u8; KEY_LENGTH / 2];
    let mut odd = [0u8; KEY_LENGTH / 2];
    for i in 0..half {
        even[i] = s[2 * i];
        odd[i] = s[2 * i + 1];
    }

    let even_hash = sha1(&[&even[skip.min(half)..]]);
    let odd_hash = sha1(&[&odd[skip.min(half)..]]);

    let mut key = [0u8; SESSION_KEY_LENGTH];
    for i in 0..PROOF_LENGTH {
        key[2 * i] = even_hash[i];
        key[2 * i + 1] = odd_hash[i];
    }
    even.zeroize();
    odd.zeroize();
    SessionKey(key)
}

fn client_proof(
    username: &str,
    salt: &[u8; KEY_LENGTH],
    client_public: &[u8; KEY_LENGTH],
    server_public: &[u8; KEY_LENGTH],
    session_key: &SessionKey,
) -> Proof {
    let n_hash = sha1(&[&LARGE_SAFE_PRIME_LE]);
    let g_hash = sha1(&[&[GENERATOR]]);
    let mut xor_hash = [0u8; PROOF_LENGTH];
    for (out, (n, g)) in xor_hash.iter_mut().zip(n_hash.iter().zip(g_hash.iter())) {
        *out = n ^ g;
    }
    let username_hash = sha1(&[username.to_ascii_uppercase().as_bytes()]);

    sha1(&[
        &xor_hash,
        &username_hash,
        salt,
        client_public,
        server_public,
        session_key.as_bytes(),
    ])
}

fn server_proof(client_public: &[u8; KEY_LENGTH], m1: &Proof, session_key: &SessionKey) -> Proof {
    sha1(&[client_public, m1, session_key.as_bytes()])
}

/// Fresh random salt for a new account
pub fn generate_salt() -> [u8; KEY_LENGTH] {
    rand::random()
}

/// Password verifier `v = g^x % N`, little-endian
pub fn compute_verifier(username: &str, password: &str, salt: &[u8; KEY_LENGTH]) -> [u8; KEY_LENGTH] {
    let x = private_x(username, password, salt);
    to_key_bytes(&BigUint::from(GENERATOR).modpow(&x, &modulus()))
}

/// Server half of one logon exchange
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SrpServer {
    username: String,
    salt: [u8; KEY_LENGTH],
    verifier: [u8; KEY_LENGTH],
    private_key: [u8; KEY_LENGTH],
    public_key: [u8; KEY_LENGTH],
}

impl SrpServer {
    /// Start an exchange with a fresh random ephemeral
    pub fn new(username: &str, salt: [u8; KEY_LENGTH], verifier: [u8; KEY_LENGTH]) -> Self {
        loop {
            let server = Self::with_private_key(username, salt, verifier, rand::random());
            if server.public_key != [0u8; KEY_LENGTH] {
                return server;
            }
        }
    }

    /// Start an exchange with a caller-chosen ephemeral `b`
    pub fn with_private_key(
        username: &str,
        salt: [u8; KEY_LENGTH],
        verifier: [u8; KEY_LENGTH],
        private_key: [u8; KEY_LENGTH],
    ) -> Self {
        let n = modulus();
        let v = BigUint::from_bytes_le(&verifier);
        let b = BigUint::from_bytes_le(&private_key);
        let public = (BigUint::from(MULTIPLIER) * v + BigUint::from(GENERATOR).modpow(&b, &n)) % &n;

        Self {
            username: username.to_string(),
            salt,
            verifier,
            private_key,
            public_key: to_key_bytes(&public),
        }
    }

    /// Server public ephemeral `B`
    pub fn public_key(&self) -> &[u8; KEY_LENGTH] {
        &self.public_key
    }

    pub fn salt(&self) -> &[u8; KEY_LENGTH] {
        &self.salt
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Check the client's `M1` and derive `K` and `M2`.
    ///
    /// # Errors
    /// - `SrpError::InvalidPublicKey` if `A % N == 0`
    /// - `SrpError::ProofMismatch` if `M1` does not match
    #[instrument(skip_all, fields(account = %self.username))]
    pub fn verify_proof(
        &self,
        client_public: &[u8; KEY_LENGTH],
        client_m1: &Proof,
    ) -> Result<SrpProof, SrpError> {
        let n = modulus();
        let a = BigUint::from_bytes_le(client_public);
        if is_zero_mod_n(&a, &n) {
            debug!("Rejected client ephemeral");
            return Err(SrpError::InvalidPublicKey);
        }

        let u = scrambler(client_public, &self.public_key);
        let v = BigUint::from_bytes_le(&self.verifier);
        let b = BigUint::from_bytes_le(&self.private_key);
        let s = (a * v.modpow(&u, &n)).modpow(&b, &n);
        let mut s_bytes = to_key_bytes(&s);
        let session_key = interleave(&s_bytes);
        s_bytes.zeroize();

        let expected = client_proof(
            &self.username,
            &self.salt,
            client_public,
            &self.public_key,
            &session_key,
        );
        if !constant_time_eq(&expected, client_m1) {
            debug!("Client proof mismatch");
            return Err(SrpError::ProofMismatch);
        }

        let server_proof = server_proof(client_public, client_m1, &session_key);
        Ok(SrpProof {
            session_key,
            server_proof,
        })
    }
}

/// Client half of one logon exchange
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SrpClient {
    username: String,
    password: String,
    private_key: [u8; KEY_LENGTH],
}

/// Values a client sends in its proof, plus what it expects back
#[derive(Debug)]
pub struct ClientProof {
    pub client_public: [u8; KEY_LENGTH],
    pub client_proof: Proof,
    pub session_key: SessionKey,
    expected_server_proof: Proof,
}

impl ClientProof {
    /// Whether the server's `M2` proves it knew the verifier
    pub fn verify_server_proof(&self, server_proof: &Proof) -> bool {
        constant_time_eq(&self.expected_server_proof, server_proof)
    }
}

impl SrpClient {
    pub fn new(username: &str, password: &str) -> Self {
        Self::with_private_key(username, password, rand::random())
    }

    pub fn with_private_key(username: &str, password: &str, private_key: [u8; KEY_LENGTH]) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            private_key,
        }
    }

    /// Client public ephemeral `A = g^a % N`
    pub fn public_key(&self) -> [u8; KEY_LENGTH] {
        let a = BigUint::from_bytes_le(&self.private_key);
        to_key_bytes(&BigUint::from(GENERATOR).modpow(&a, &modulus()))
    }

    /// Answer a challenge carrying the server's `B` and the account salt.
    ///
    /// # Errors
    /// Returns `SrpError::InvalidPublicKey` if `B % N == 0`
    pub fn respond(
        &self,
        server_public: &[u8; KEY_LENGTH],
        salt: &[u8; KEY_LENGTH],
    ) -> Result<ClientProof, SrpError> {
        let n = modulus();
        let b_pub = BigUint::from_bytes_le(server_public);
        if is_zero_mod_n(&b_pub, &n) {
            return Err(SrpError::InvalidPublicKey);
        }

        let client_public = self.public_key();
        let x = private_x(&self.username, &self.password, salt);
        let u = scrambler(&client_public, server_public);
        let a = BigUint::from_bytes_le(&self.private_key);

        // S = (B - k*g^x)^(a + u*x) % N, kept non-negative
        let kv = (BigUint::from(MULTIPLIER) * BigUint::from(GENERATOR).modpow(&x, &n)) % &n;
        let base = (b_pub % &n + &n - kv) % &n;
        let s = base.modpow(&(a + u * x), &n);
        let mut s_bytes = to_key_bytes(&s);
        let session_key = interleave(&s_bytes);
        s_bytes.zeroize();

        let client_proof = client_proof(
            &self.username,
            salt,
            &client_public,
            server_public,
            &session_key,
        );
        let expected_server_proof = server_proof(&client_public, &client_proof, &session_key);

        Ok(ClientProof {
            client_public,
            client_proof,
            session_key,
            expected_server_proof,
        })
    }
}
