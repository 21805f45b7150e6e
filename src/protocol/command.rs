//! # Wire Types
//!
//! Command ids, result codes, request decoders and response encoders for the logon
//! protocol.
//!
//! ## Framing
//! Every message starts with a one-byte command id. The challenge carries its own length
//! in a 4-byte header; the proof has a fixed size. Decoders follow the codec convention:
//! - `Ok(Some(value))`: the whole message was present and has been consumed
//! - `Ok(None)`: more bytes are needed, nothing was consumed
//! - `Err(FramingError)`: the bytes can never form a valid message
//!
//! ## Challenge Request
//! ```text
//! [cmd:1][error:1][size:2][game:4][major:1][minor:1][patch:1][build:2]
//! [platform:4][os:4][locale:4][timezone_bias:4][ip:4][name_len:1][name:name_len]
//! ```
//! `size` counts the bytes after the header, so it must equal `30 + name_len`.

use std::fmt;
use std::net::Ipv4Addr;

use crate::core::buffer::ByteBuffer;
use crate::error::{constants, BufferError, FramingError};
use crate::protocol::srp::{Proof, GENERATOR, KEY_LENGTH, LARGE_SAFE_PRIME_LE, PROOF_LENGTH};

/// Bytes before the challenge body
pub const CHALLENGE_HEADER_LEN: usize = 4;

/// Challenge body size without the account name
pub const CHALLENGE_FIXED_BODY_LEN: usize = 30;

/// Full size of a proof request
pub const PROOF_REQUEST_LEN: usize = 75;

/// Full size of a successful challenge response
pub const CHALLENGE_RESPONSE_LEN: usize = 135;

/// Last client build that expects the short proof layout
pub const SHORT_PROOF_MAX_BUILD: u16 = 6005;

/// Account flags sent with a successful proof to newer clients
pub const ACCOUNT_FLAGS: u32 = 0x0080_0000;

/// Security flag closing the challenge response
pub const SECURITY_FLAG: u8 = 0x01;

/// Command ids understood by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AuthCommand {
    LogonChallenge = 0x00,
    LogonProof = 0x01,
    ReconnectChallenge = 0x02,
    ReconnectProof = 0x03,
    RealmList = 0x10,
    XferInitiate = 0x30,
    XferData = 0x31,
    XferAccept = 0x32,
    XferResume = 0x33,
    XferCancel = 0x34,
}

impl AuthCommand {
    pub fn name(self) -> &'static str {
        match self {
            AuthCommand::LogonChallenge => "LogonChallenge",
            AuthCommand::LogonProof => "LogonProof",
            AuthCommand::ReconnectChallenge => "ReconnectChallenge",
            AuthCommand::ReconnectProof => "ReconnectProof",
            AuthCommand::RealmList => "RealmList",
            AuthCommand::XferInitiate => "XferInitiate",
            AuthCommand::XferData => "XferData",
            AuthCommand::XferAccept => "XferAccept",
            AuthCommand::XferResume => "XferResume",
            AuthCommand::XferCancel => "XferCancel",
        }
    }
}

impl TryFrom<u8> for AuthCommand {
    type Error = FramingError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => AuthCommand::LogonChallenge,
            0x01 => AuthCommand::LogonProof,
            0x02 => AuthCommand::ReconnectChallenge,
            0x03 => AuthCommand::ReconnectProof,
            0x10 => AuthCommand::RealmList,
            0x30 => AuthCommand::XferInitiate,
            0x31 => AuthCommand::XferData,
            0x32 => AuthCommand::XferAccept,
            0x33 => AuthCommand::XferResume,
            0x34 => AuthCommand::XferCancel,
            other => return Err(FramingError::UnknownCommand(other)),
        })
    }
}

/// Account result codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AuthResult {
    Success = 0x00,
    FailBanned = 0x03,
    FailUnknownAccount = 0x04,
    FailIncorrectPassword = 0x05,
    FailAlreadyOnline = 0x06,
    FailNoTime = 0x07,
    FailDbBusy = 0x08,
    FailVersionInvalid = 0x09,
    FailVersionUpdate = 0x0A,
    FailInvalidServer = 0x0B,
    FailSuspended = 0x0C,
    FailNoAccess = 0x0D,
    SuccessSurvey = 0x0E,
    FailParentControl = 0x0F,
    FailLockedEnforced = 0x10,
    FailTrialEnded = 0x11,
    FailUseBattleNet = 0x12,
    FailAntiIndulgence = 0x13,
    FailExpired = 0x14,
    FailNoGameAccount = 0x15,
    FailChargeback = 0x16,
    FailInternetGameRoomWithoutBnet = 0x17,
    FailGameAccountLocked = 0x18,
    FailUnlockableLock = 0x19,
    FailConversionRequired = 0x20,
    FailDisconnected = 0xFF,
}

impl AuthResult {
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Four-character tag sent byte-reversed by the client (`"68x\0"` for x86)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: String = self
            .0
            .iter()
            .rev()
            .filter(|&&b| b != 0)
            .map(|&b| b as char)
            .collect();
        f.write_str(&text)
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({self})")
    }
}

/// Client version triple plus build number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub build: u16,
}

impl ClientVersion {
    /// Whether the client expects the extended proof layout
    pub fn uses_extended_proof(&self) -> bool {
        self.build > SHORT_PROOF_MAX_BUILD
    }
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{} ({})", self.major, self.minor, self.patch, self.build)
    }
}

/// Decoded `LogonChallenge` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogonChallengeRequest {
    pub error: u8,
    pub game_name: String,
    pub version: ClientVersion,
    pub platform: FourCc,
    pub os: FourCc,
    pub locale: FourCc,
    pub timezone_bias: u32,
    pub ip: Ipv4Addr,
    pub account_name: String,
}

impl LogonChallengeRequest {
    /// Decode one challenge from the front of `buf`.
    ///
    /// The declared size is checked against the buffer's capacity before waiting for
    /// the body, so a size that can never arrive fails immediately.
    pub fn decode(buf: &mut ByteBuffer) -> Result<Option<Self>, FramingError> {
        let Ok(header) = buf.peek_slice(CHALLENGE_HEADER_LEN) else {
            return Ok(None);
        };
        if header[0] != AuthCommand::LogonChallenge as u8 {
            return Err(FramingError::Malformed(constants::ERR_WRONG_COMMAND));
        }
        let size = u16::from_le_bytes([header[2], header[3]]) as usize;
        let total = CHALLENGE_HEADER_LEN + size;
        if total > buf.capacity() {
            return Err(FramingError::Malformed(constants::ERR_CHALLENGE_TOO_LARGE));
        }
        if size <= CHALLENGE_FIXED_BODY_LEN {
            return Err(FramingError::Malformed(constants::ERR_CHALLENGE_SIZE_MISMATCH));
        }
        if buf.readable_len() < total {
            return Ok(None);
        }

        let name_offset = CHALLENGE_HEADER_LEN + CHALLENGE_FIXED_BODY_LEN - 1;
        let name_len = buf.readable_slice()[name_offset] as usize;
        if name_len == 0 {
            return Err(FramingError::Malformed(constants::ERR_EMPTY_ACCOUNT_NAME));
        }
        if size != CHALLENGE_FIXED_BODY_LEN + name_len {
            return Err(FramingError::Malformed(constants::ERR_CHALLENGE_SIZE_MISMATCH));
        }

        buf.read_atomically(|buf| -> Result<Self, BufferError> {
            buf.drain(1)?;
            let error = buf.read::<u8>()?;
            buf.drain(2)?;
            Ok(Self {
                error,
                game_name: buf.read_string(4)?,
                version: ClientVersion {
                    major: buf.read()?,
                    minor: buf.read()?,
                    patch: buf.read()?,
                    build: buf.read()?,
                },
                platform: FourCc(buf.read_bytes()?),
                os: FourCc(buf.read_bytes()?),
                locale: FourCc(buf.read_bytes()?),
                timezone_bias: buf.read()?,
                ip: Ipv4Addr::from(buf.read_bytes::<4>()?),
                account_name: buf.read_prefixed_string()?,
            })
        })
        .map(Some)
        .map_err(|_| FramingError::Malformed(constants::ERR_CHALLENGE_SIZE_MISMATCH))
    }

    /// Encode as a client would send it
    pub fn encode(&self) -> Result<ByteBuffer, BufferError> {
        let name_len = self.account_name.len();
        let size = CHALLENGE_FIXED_BODY_LEN + name_len;
        let mut buf = ByteBuffer::with_capacity(CHALLENGE_HEADER_LEN + size);
        buf.write(AuthCommand::LogonChallenge as u8)?;
        buf.write(self.error)?;
        buf.write(size as u16)?;
        buf.write_fixed_string(&self.game_name, 4)?;
        buf.write(self.version.major)?;
        buf.write(self.version.minor)?;
        buf.write(self.version.patch)?;
        buf.write(self.version.build)?;
        buf.write_bytes(&self.platform.0)?;
        buf.write_bytes(&self.os.0)?;
        buf.write_bytes(&self.locale.0)?;
        buf.write(self.timezone_bias)?;
        buf.write_bytes(&self.ip.octets())?;
        buf.write_prefixed_string(&self.account_name)?;
        Ok(buf)
    }
}

/// Decoded `LogonProof` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogonProofRequest {
    pub client_public: [u8; KEY_LENGTH],
    pub client_proof: Proof,
    pub crc_hash: [u8; PROOF_LENGTH],
    pub number_of_keys: u8,
    pub security_flags: u8,
}

impl LogonProofRequest {
    pub fn decode(buf: &mut ByteBuffer) -> Result<Option<Self>, FramingError> {
        if buf.readable_len() < PROOF_REQUEST_LEN {
            return Ok(None);
        }
        buf.read_atomically(|buf| -> Result<Self, FramingError> {
            let command = buf.read::<u8>().map_err(|_| truncated())?;
            if command != AuthCommand::LogonProof as u8 {
                return Err(FramingError::Malformed(constants::ERR_WRONG_COMMAND));
            }
            Ok(Self {
                client_public: buf.read_bytes().map_err(|_| truncated())?,
                client_proof: buf.read_bytes().map_err(|_| truncated())?,
                crc_hash: buf.read_bytes().map_err(|_| truncated())?,
                number_of_keys: buf.read().map_err(|_| truncated())?,
                security_flags: buf.read().map_err(|_| truncated())?,
            })
        })
        .map(Some)
    }

    pub fn encode(&self) -> Result<ByteBuffer, BufferError> {
        let mut buf = ByteBuffer::with_capacity(PROOF_REQUEST_LEN);
        buf.write(AuthCommand::LogonProof as u8)?;
        buf.write_bytes(&self.client_public)?;
        buf.write_bytes(&self.client_proof)?;
        buf.write_bytes(&self.crc_hash)?;
        buf.write(self.number_of_keys)?;
        buf.write(self.security_flags)?;
        Ok(buf)
    }
}

fn truncated() -> FramingError {
    FramingError::Malformed(constants::ERR_TRUNCATED_PROOF)
}

/// `[0x00][0x00][result]`
pub fn challenge_failure(result: AuthResult) -> Result<ByteBuffer, BufferError> {
    let mut buf = ByteBuffer::with_capacity(3);
    buf.write(AuthCommand::LogonChallenge as u8)?;
    buf.write(0u8)?;
    buf.write(result.code())?;
    Ok(buf)
}

/// Successful challenge carrying `B`, `g`, `N`, the salt and a random CRC salt
pub fn challenge_success(
    server_public: &[u8; KEY_LENGTH],
    salt: &[u8; KEY_LENGTH],
    crc_salt: &[u8; 16],
) -> Result<ByteBuffer, BufferError> {
    let mut buf = ByteBuffer::with_capacity(CHALLENGE_RESPONSE_LEN);
    buf.write(AuthCommand::LogonChallenge as u8)?;
    buf.write(0u8)?;
    buf.write(AuthResult::Success.code())?;
    buf.write_bytes(server_public)?;
    buf.write(1u8)?;
    buf.write(GENERATOR)?;
    buf.write(KEY_LENGTH as u8)?;
    buf.write_bytes(&LARGE_SAFE_PRIME_LE)?;
    buf.write_bytes(salt)?;
    buf.write_bytes(&[0u8; 16])?;
    buf.write_bytes(crc_salt)?;
    buf.write(SECURITY_FLAG)?;
    Ok(buf)
}

/// Successful proof carrying `M2`
pub fn proof_success(server_proof: &Proof, version: &ClientVersion) -> Result<ByteBuffer, BufferError> {
    if version.uses_extended_proof() {
        let mut buf = ByteBuffer::with_capacity(2 + PROOF_LENGTH + 10);
        buf.write(AuthCommand::LogonProof as u8)?;
        buf.write(AuthResult::Success.code())?;
        buf.write_bytes(server_proof)?;
        buf.write(ACCOUNT_FLAGS)?;
        buf.write(0u32)?; // survey id
        buf.write(0u16)?; // login flags
        Ok(buf)
    } else {
        let mut buf = ByteBuffer::with_capacity(2 + PROOF_LENGTH + 4);
        buf.write(AuthCommand::LogonProof as u8)?;
        buf.write(AuthResult::Success.code())?;
        buf.write_bytes(server_proof)?;
        buf.write(0u32)?;
        Ok(buf)
    }
}

/// Rejected proof
pub fn proof_failure(version: &ClientVersion) -> Result<ByteBuffer, BufferError> {
    if version.uses_extended_proof() {
        Ok(ByteBuffer::from_slice(&[
            AuthCommand::LogonProof as u8,
            AuthResult::FailIncorrectPassword.code(),
            0x03,
            0x00,
        ]))
    } else {
        Ok(ByteBuffer::from_slice(&[
            AuthCommand::LogonProof as u8,
            AuthResult::FailIncorrectPassword.code(),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_challenge(name: &str) -> LogonChallengeRequest {
        LogonChallengeRequest {
            error: 3,
            game_name: "WoW".into(),
            version: ClientVersion {
                major: 3,
                minor: 3,
                patch: 5,
                build: 12340,
            },
            platform: FourCc(*b"68x\0"),
            os: FourCc(*b"niW\0"),
            locale: FourCc(*b"SUne"),
            timezone_bias: 60,
            ip: Ipv4Addr::new(127, 0, 0, 1),
            account_name: name.into(),
        }
    }

    fn input_with(bytes: &[u8]) -> ByteBuffer {
        let mut buf = ByteBuffer::with_capacity(4096);
        buf.write_bytes(bytes).unwrap();
        buf
    }

    #[test]
    fn test_command_ids() {
        assert_eq!(AuthCommand::try_from(0x10).unwrap(), AuthCommand::RealmList);
        assert_eq!(AuthCommand::try_from(0x34).unwrap(), AuthCommand::XferCancel);
        assert_eq!(
            AuthCommand::try_from(0x7F),
            Err(FramingError::UnknownCommand(0x7F))
        );
    }

    #[test]
    fn test_challenge_decodes_and_consumes() {
        let wire = sample_challenge("TEST").encode().unwrap();
        assert_eq!(wire.readable_len(), 34 + 4);
        assert_eq!(&wire.readable_slice()[2..4], &34u16.to_le_bytes());

        let mut input = input_with(wire.readable_slice());
        input.write(0x01u8).unwrap();
        let decoded = LogonChallengeRequest::decode(&mut input).unwrap().unwrap();
        assert_eq!(decoded, sample_challenge("TEST"));
        assert_eq!(decoded.platform.to_string(), "x86");
        assert_eq!(decoded.locale.to_string(), "enUS");
        assert_eq!(input.readable_slice(), &[0x01]);
    }

    #[test]
    fn test_challenge_incomplete_consumes_nothing() {
        let wire = sample_challenge("TEST").encode().unwrap();
        for cut in 0..wire.readable_len() {
            let mut input = input_with(&wire.readable_slice()[..cut]);
            assert_eq!(LogonChallengeRequest::decode(&mut input).unwrap(), None);
            assert_eq!(input.readable_len(), cut);
        }
    }

    #[test]
    fn test_challenge_size_mismatch_is_malformed() {
        let wire = sample_challenge("TEST").encode().unwrap();
        let mut bytes = wire.readable_slice().to_vec();
        bytes[2] = 35;
        bytes.push(0);
        let mut input = input_with(&bytes);
        assert_eq!(
            LogonChallengeRequest::decode(&mut input),
            Err(FramingError::Malformed(constants::ERR_CHALLENGE_SIZE_MISMATCH))
        );
    }

    #[test]
    fn test_challenge_larger_than_buffer_is_malformed() {
        let mut input = ByteBuffer::with_capacity(64);
        input.write_bytes(&[0x00, 0x00, 0xFF, 0x00]).unwrap();
        assert_eq!(
            LogonChallengeRequest::decode(&mut input),
            Err(FramingError::Malformed(constants::ERR_CHALLENGE_TOO_LARGE))
        );
    }

    #[test]
    fn test_empty_account_name_is_malformed() {
        let wire = sample_challenge("").encode().unwrap();
        let mut input = input_with(wire.readable_slice());
        assert!(LogonChallengeRequest::decode(&mut input).is_err());
    }

    #[test]
    fn test_proof_request_layout() {
        let request = LogonProofRequest {
            client_public: [1; 32],
            client_proof: [2; 20],
            crc_hash: [3; 20],
            number_of_keys: 0,
            security_flags: 0,
        };
        let wire = request.encode().unwrap();
        assert_eq!(wire.readable_len(), PROOF_REQUEST_LEN);

        let mut input = input_with(&wire.readable_slice()[..74]);
        assert_eq!(LogonProofRequest::decode(&mut input).unwrap(), None);
        input.write(0u8).unwrap();
        assert_eq!(LogonProofRequest::decode(&mut input).unwrap(), Some(request));
        assert!(input.is_empty());
    }

    #[test]
    fn test_challenge_success_layout() {
        let buf = challenge_success(&[0xBB; 32], &[0x5A; 32], &[0xCC; 16]).unwrap();
        let bytes = buf.readable_slice();
        assert_eq!(bytes.len(), CHALLENGE_RESPONSE_LEN);
        assert_eq!(&bytes[..3], &[0, 0, 0]);
        assert_eq!(&bytes[35..38], &[1, 7, 32]);
        assert_eq!(&bytes[38..70], &LARGE_SAFE_PRIME_LE);
        assert_eq!(&bytes[70..102], &[0x5A; 32]);
        assert_eq!(&bytes[102..118], &[0; 16]);
        assert_eq!(bytes[134], SECURITY_FLAG);
    }

    #[test]
    fn test_proof_responses_follow_build() {
        let mut old = sample_challenge("A").version;
        old.build = 5875;
        let new = sample_challenge("A").version;

        assert_eq!(proof_success(&[9; 20], &new).unwrap().readable_len(), 32);
        assert_eq!(proof_success(&[9; 20], &old).unwrap().readable_len(), 26);
        assert_eq!(
            proof_failure(&new).unwrap().readable_slice(),
            &[0x01, 0x05, 0x03, 0x00]
        );
        assert_eq!(proof_failure(&old).unwrap().readable_slice(), &[0x01, 0x05]);
        assert_eq!(
            challenge_failure(AuthResult::FailUnknownAccount)
                .unwrap()
                .readable_slice(),
            &[0x00, 0x00, 0x04]
        );
    }
}
