// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Application Layer Clock Synchronization commands.
//!
//! Devices without another time source send `AppTimeReq` carrying their idea
//! of the current GPS time; the server answers with a signed correction.
//! Both commands share CID 0x01 and are told apart by direction.

use crate::CodecError;

/// Well-known fPort for the clock synchronization protocol.
pub const DEFAULT_FPORT: u8 = 202;

const CID_APP_TIME: u8 = 0x01;

/// A clock synchronization command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Device request for a time correction (uplink).
    AppTimeReq(AppTimeReqPayload),
    /// Server answer carrying the correction (downlink).
    AppTimeAns(AppTimeAnsPayload),
}

impl Command {
    /// Returns the command identifier.
    pub fn cid(&self) -> u8 {
        match self {
            Command::AppTimeReq(_) | Command::AppTimeAns(_) => CID_APP_TIME,
        }
    }

    /// Serialises the command, CID byte first.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut b = vec![self.cid()];
        match self {
            Command::AppTimeReq(pl) => pl.encode(&mut b)?,
            Command::AppTimeAns(pl) => pl.encode(&mut b)?,
        }
        Ok(b)
    }

    /// Decodes a command received in the given direction.
    pub fn from_bytes(uplink: bool, b: &[u8]) -> Result<Self, CodecError> {
        let (&cid, payload) = b.split_first().ok_or(CodecError::PayloadTooShort {
            expected: 1,
            got: 0,
        })?;

        match (cid, uplink) {
            (CID_APP_TIME, true) => Ok(Command::AppTimeReq(AppTimeReqPayload::decode(payload)?)),
            (CID_APP_TIME, false) => Ok(Command::AppTimeAns(AppTimeAnsPayload::decode(payload)?)),
            _ => Err(CodecError::UnknownCid(cid)),
        }
    }
}

/// AppTimeReq payload: device time and a request token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppTimeReqPayload {
    /// Device clock, seconds since the GPS epoch modulo 2^32.
    pub device_time: u32,
    /// Token echoed in the answer, 4 bits.
    pub token_req: u8,
    /// Set when the device insists on an answer even for small deviations.
    pub ans_required: bool,
}

impl AppTimeReqPayload {
    fn encode(&self, b: &mut Vec<u8>) -> Result<(), CodecError> {
        if self.token_req > 15 {
            return Err(CodecError::FieldOutOfRange {
                field: "TokenReq",
                max: 15,
                got: self.token_req as u32,
            });
        }
        b.extend_from_slice(&self.device_time.to_le_bytes());
        b.push(self.token_req | (u8::from(self.ans_required) << 4));
        Ok(())
    }

    fn decode(b: &[u8]) -> Result<Self, CodecError> {
        if b.len() < 5 {
            return Err(CodecError::PayloadTooShort {
                expected: 5,
                got: b.len(),
            });
        }
        Ok(Self {
            device_time: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            token_req: b[4] & 0x0f,
            ans_required: b[4] & 0x10 != 0,
        })
    }
}

/// AppTimeAns payload: signed correction plus the echoed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppTimeAnsPayload {
    /// Seconds the device must add to its clock.
    pub time_correction: i32,
    /// Token from the matching request, 4 bits.
    pub token_ans: u8,
}

impl AppTimeAnsPayload {
    fn encode(&self, b: &mut Vec<u8>) -> Result<(), CodecError> {
        if self.token_ans > 15 {
            return Err(CodecError::FieldOutOfRange {
                field: "TokenAns",
                max: 15,
                got: self.token_ans as u32,
            });
        }
        b.extend_from_slice(&self.time_correction.to_le_bytes());
        b.push(self.token_ans);
        Ok(())
    }

    fn decode(b: &[u8]) -> Result<Self, CodecError> {
        if b.len() < 5 {
            return Err(CodecError::PayloadTooShort {
                expected: 5,
                got: b.len(),
            });
        }
        Ok(Self {
            time_correction: i32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            token_ans: b[4] & 0x0f,
        })
    }
}
