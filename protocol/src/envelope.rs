//! The fixed-size request/reply envelope.
//!
//! Every call is one envelope out, one envelope back, overwritten in place.
//! The header carries the declared total length, the operation selector and
//! the broker's return status; the payload area is sized to the largest
//! operation and zero-filled beyond what the operation uses, so no stale
//! bytes from a previous call ever cross the channel.

use crate::WireError;
use crate::codec::Reader;
use crate::codec::Writer;
use crate::ops::ReplyPayload;
use crate::ops::RequestPayload;

pub const HEADER_SIZE: usize = 16;
pub const PAYLOAD_SIZE: usize = 112;
pub const ENVELOPE_SIZE: usize = HEADER_SIZE + PAYLOAD_SIZE;

/// Operation selectors. Selector 0 is never valid on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ApiNumber {
    Plugin = 1,
    ExecuteRunAsCommand = 2,
    UnloadDriver = 3,
    ControlProcess = 4,
    ControlService = 5,
    CreateService = 6,
    ChangeServiceConfig = 7,
    ChangeServiceConfig2 = 8,
    SetTcpEntry = 9,
    ControlThread = 10,
    AddAccountRight = 11,
    InvokeRunAsService = 12,
    IssueMemoryListCommand = 13,
    PostMessage = 14,
    SendMessage = 15,
    CreateProcessIgnoringDebugger = 16,
    SetServiceSecurity = 17,
    WriteMiniDumpProcess = 18,
    QueryProcessHeapInformation = 19,
}

impl ApiNumber {
    pub fn from_u32(value: u32) -> Result<Self, WireError> {
        use ApiNumber::*;
        Ok(match value {
            1 => Plugin,
            2 => ExecuteRunAsCommand,
            3 => UnloadDriver,
            4 => ControlProcess,
            5 => ControlService,
            6 => CreateService,
            7 => ChangeServiceConfig,
            8 => ChangeServiceConfig2,
            9 => SetTcpEntry,
            10 => ControlThread,
            11 => AddAccountRight,
            12 => InvokeRunAsService,
            13 => IssueMemoryListCommand,
            14 => PostMessage,
            15 => SendMessage,
            16 => CreateProcessIgnoringDebugger,
            17 => SetServiceSecurity,
            18 => WriteMiniDumpProcess,
            19 => QueryProcessHeapInformation,
            other => return Err(WireError::UnknownApiNumber(other)),
        })
    }
}

/// A wire envelope. The same storage holds the request on the way out and
/// the reply on the way back.
#[derive(Clone)]
pub struct Envelope {
    bytes: [u8; ENVELOPE_SIZE],
}

impl Envelope {
    /// Builds a request envelope: stamped header, encoded payload, the rest
    /// of the payload area zeroed.
    pub fn request(payload: &RequestPayload) -> Result<Self, WireError> {
        let mut bytes = [0u8; ENVELOPE_SIZE];
        {
            let mut w = Writer::new(&mut bytes[..HEADER_SIZE]);
            w.put_u32(ENVELOPE_SIZE as u32)?;
            w.put_u32(payload.api_number() as u32)?;
            w.put_u32(0)?; // return status, filled in by the broker
            w.put_u32(0)?; // reserved
        }
        payload.encode(&mut bytes[HEADER_SIZE..])?;
        Ok(Self { bytes })
    }

    /// Builds a reply envelope for the broker side.
    pub fn reply(
        api: ApiNumber,
        status: u32,
        payload: Option<&ReplyPayload>,
    ) -> Result<Self, WireError> {
        let mut bytes = [0u8; ENVELOPE_SIZE];
        {
            let mut w = Writer::new(&mut bytes[..HEADER_SIZE]);
            w.put_u32(ENVELOPE_SIZE as u32)?;
            w.put_u32(api as u32)?;
            w.put_u32(status)?;
            w.put_u32(0)?;
        }
        if let Some(payload) = payload {
            payload.encode(&mut bytes[HEADER_SIZE..])?;
        }
        Ok(Self { bytes })
    }

    /// Reconstructs an envelope from wire bytes, validating the declared
    /// length and the selector.
    pub fn parse(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() != ENVELOPE_SIZE {
            return Err(WireError::Truncated("envelope"));
        }
        let mut bytes = [0u8; ENVELOPE_SIZE];
        bytes.copy_from_slice(raw);

        let mut r = Reader::new(&bytes[..HEADER_SIZE]);
        let declared = r.get_u32()?;
        if declared as usize != ENVELOPE_SIZE {
            return Err(WireError::Malformed("declared envelope length"));
        }
        let selector = r.get_u32()?;
        ApiNumber::from_u32(selector)?;

        Ok(Self { bytes })
    }

    pub fn api_number(&self) -> ApiNumber {
        // Validated in every constructor.
        let raw = u32::from_le_bytes([self.bytes[4], self.bytes[5], self.bytes[6], self.bytes[7]]);
        ApiNumber::from_u32(raw).unwrap_or(ApiNumber::Plugin)
    }

    pub fn status(&self) -> u32 {
        u32::from_le_bytes([self.bytes[8], self.bytes[9], self.bytes[10], self.bytes[11]])
    }

    pub fn as_bytes(&self) -> &[u8; ENVELOPE_SIZE] {
        &self.bytes
    }

    /// Replaces the contents in place with a received reply. The reply must
    /// echo the request's selector.
    pub fn overwrite_with_reply(&mut self, raw: &[u8]) -> Result<(), WireError> {
        let reply = Envelope::parse(raw)?;
        if reply.api_number() != self.api_number() {
            return Err(WireError::Malformed("reply selector mismatch"));
        }
        self.bytes = reply.bytes;
        Ok(())
    }

    pub fn decode_request(&self) -> Result<RequestPayload, WireError> {
        RequestPayload::decode(self.api_number(), &self.bytes[HEADER_SIZE..])
    }

    pub fn decode_reply(&self) -> Result<ReplyPayload, WireError> {
        ReplyPayload::decode(self.api_number(), &self.bytes[HEADER_SIZE..])
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Payload bytes may reference credential data in the arena; only the
        // header is ever printed.
        f.debug_struct("Envelope")
            .field("api_number", &self.api_number())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn selector_round_trips_for_the_whole_catalog() {
        for raw in 1u32..=19 {
            let api = ApiNumber::from_u32(raw).unwrap();
            assert_eq!(api as u32, raw);
        }
        assert!(ApiNumber::from_u32(0).is_err());
        assert!(ApiNumber::from_u32(20).is_err());
    }

    #[test]
    fn parse_rejects_bad_length_and_selector() {
        let env = Envelope::request(&RequestPayload::IssueMemoryListCommand { command: 1 }).unwrap();
        let mut raw = *env.as_bytes();
        assert!(Envelope::parse(&raw[..ENVELOPE_SIZE - 1]).is_err());

        raw[0] = 0; // corrupt declared length
        assert!(Envelope::parse(&raw).is_err());

        let mut raw = *env.as_bytes();
        raw[4] = 0; // selector 0 is never valid
        assert!(Envelope::parse(&raw).is_err());
    }

    #[test]
    fn reply_must_echo_the_request_selector() {
        let mut env =
            Envelope::request(&RequestPayload::IssueMemoryListCommand { command: 1 }).unwrap();
        let reply = Envelope::reply(ApiNumber::ControlProcess, 0, None).unwrap();
        assert!(env.overwrite_with_reply(reply.as_bytes()).is_err());

        let reply = Envelope::reply(ApiNumber::IssueMemoryListCommand, 7, None).unwrap();
        env.overwrite_with_reply(reply.as_bytes()).unwrap();
        assert_eq!(env.status(), 7);
    }
}
