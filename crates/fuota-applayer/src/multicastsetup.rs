// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Remote Multicast Setup commands and multicast key derivation.
//!
//! The setup protocol provisions one of four multicast group slots on a
//! device (`McGroupSetupReq` / `McGroupDeleteReq`) and later schedules a
//! Class-C reception window for it (`McClassCSessionReq`). Every request has
//! a matching uplink answer carrying a status bitmap.
//!
//! The key material transported by `McGroupSetupReq` is wrapped per device:
//! the group's McKey never leaves the server in plaintext, only
//! `aes128_encrypt(McKEKey, McKey)` does. See [`mc_ke_key`] and the
//! McRootKey derivations below.

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;

use crate::types::{Aes128Key, DevAddr};
use crate::CodecError;

/// Well-known fPort for the remote multicast setup protocol.
pub const DEFAULT_FPORT: u8 = 200;

const CID_MC_GROUP_SETUP: u8 = 0x02;
const CID_MC_GROUP_DELETE: u8 = 0x03;
const CID_MC_CLASS_C_SESSION: u8 = 0x04;

/// Largest addressable multicast group slot on a device.
pub const MAX_MC_GROUP_ID: u8 = 3;

// ============================================================================
// Key derivation
// ============================================================================

fn aes128_encrypt_block(key: &Aes128Key, block: [u8; 16]) -> Aes128Key {
    let cipher = Aes128::new(key.as_bytes().into());
    let mut b = block.into();
    cipher.encrypt_block(&mut b);
    Aes128Key(b.into())
}

/// Derives the McRootKey from a LoRaWAN 1.0 GenAppKey:
/// `aes128_encrypt(GenAppKey, 0x00 | pad16)`.
pub fn mc_root_key_for_gen_app_key(gen_app_key: &Aes128Key) -> Aes128Key {
    aes128_encrypt_block(gen_app_key, [0x00; 16])
}

/// Derives the McRootKey from a LoRaWAN 1.1 AppKey:
/// `aes128_encrypt(AppKey, 0x20 | pad16)`.
pub fn mc_root_key_for_app_key(app_key: &Aes128Key) -> Aes128Key {
    let mut block = [0u8; 16];
    block[0] = 0x20;
    aes128_encrypt_block(app_key, block)
}

/// Derives the key-encryption key: `aes128_encrypt(McRootKey, 0x10 | pad16)`.
pub fn mc_ke_key(mc_root_key: &Aes128Key) -> Aes128Key {
    let mut block = [0u8; 16];
    block[0] = 0x10;
    aes128_encrypt_block(mc_root_key, block)
}

/// Wraps the multicast group key for transport:
/// `aes128_encrypt(McKEKey, McKey)`.
pub fn encrypt_mc_key(mc_ke_key: &Aes128Key, mc_key: &Aes128Key) -> Aes128Key {
    aes128_encrypt_block(mc_ke_key, *mc_key.as_bytes())
}

// ============================================================================
// Commands
// ============================================================================

/// A remote multicast setup command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Provision a multicast group slot (downlink).
    McGroupSetupReq(McGroupSetupReqPayload),
    /// Device answer to a group setup (uplink).
    McGroupSetupAns(McGroupSetupAnsPayload),
    /// Remove a multicast group slot (downlink).
    McGroupDeleteReq(McGroupDeleteReqPayload),
    /// Device answer to a group delete (uplink).
    McGroupDeleteAns(McGroupDeleteAnsPayload),
    /// Schedule a Class-C reception window (downlink).
    McClassCSessionReq(McClassCSessionReqPayload),
    /// Device answer to a Class-C session request (uplink).
    McClassCSessionAns(McClassCSessionAnsPayload),
}

impl Command {
    /// Returns the command identifier.
    pub fn cid(&self) -> u8 {
        match self {
            Command::McGroupSetupReq(_) | Command::McGroupSetupAns(_) => CID_MC_GROUP_SETUP,
            Command::McGroupDeleteReq(_) | Command::McGroupDeleteAns(_) => CID_MC_GROUP_DELETE,
            Command::McClassCSessionReq(_) | Command::McClassCSessionAns(_) => {
                CID_MC_CLASS_C_SESSION
            }
        }
    }

    /// Serialises the command, CID byte first.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut b = vec![self.cid()];
        match self {
            Command::McGroupSetupReq(pl) => pl.encode(&mut b)?,
            Command::McGroupSetupAns(pl) => pl.encode(&mut b)?,
            Command::McGroupDeleteReq(pl) => pl.encode(&mut b)?,
            Command::McGroupDeleteAns(pl) => pl.encode(&mut b)?,
            Command::McClassCSessionReq(pl) => pl.encode(&mut b)?,
            Command::McClassCSessionAns(pl) => pl.encode(&mut b)?,
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
            (CID_MC_GROUP_SETUP, false) => Ok(Command::McGroupSetupReq(
                McGroupSetupReqPayload::decode(payload)?,
            )),
            (CID_MC_GROUP_SETUP, true) => Ok(Command::McGroupSetupAns(
                McGroupSetupAnsPayload::decode(payload)?,
            )),
            (CID_MC_GROUP_DELETE, false) => Ok(Command::McGroupDeleteReq(
                McGroupDeleteReqPayload::decode(payload)?,
            )),
            (CID_MC_GROUP_DELETE, true) => Ok(Command::McGroupDeleteAns(
                McGroupDeleteAnsPayload::decode(payload)?,
            )),
            (CID_MC_CLASS_C_SESSION, false) => Ok(Command::McClassCSessionReq(
                McClassCSessionReqPayload::decode(payload)?,
            )),
            (CID_MC_CLASS_C_SESSION, true) => Ok(Command::McClassCSessionAns(
                McClassCSessionAnsPayload::decode(payload)?,
            )),
            _ => Err(CodecError::UnknownCid(cid)),
        }
    }
}

fn check_mc_group_id(id: u8) -> Result<(), CodecError> {
    if id > MAX_MC_GROUP_ID {
        return Err(CodecError::FieldOutOfRange {
            field: "McGroupID",
            max: MAX_MC_GROUP_ID as u32,
            got: id as u32,
        });
    }
    Ok(())
}

/// McGroupSetupReq: group slot, address, wrapped key and the accepted frame
/// counter window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McGroupSetupReqPayload {
    /// Group slot, 0..=3.
    pub mc_group_id: u8,
    /// Multicast network address.
    pub mc_addr: DevAddr,
    /// McKey wrapped under the per-device McKEKey.
    pub mc_key_encrypted: Aes128Key,
    /// Lowest accepted multicast frame counter.
    pub min_mc_f_cnt: u32,
    /// Highest accepted multicast frame counter.
    pub max_mc_f_cnt: u32,
}

impl McGroupSetupReqPayload {
    fn encode(&self, b: &mut Vec<u8>) -> Result<(), CodecError> {
        check_mc_group_id(self.mc_group_id)?;
        b.push(self.mc_group_id);
        b.extend_from_slice(&self.mc_addr.to_le_bytes());
        b.extend_from_slice(self.mc_key_encrypted.as_bytes());
        b.extend_from_slice(&self.min_mc_f_cnt.to_le_bytes());
        b.extend_from_slice(&self.max_mc_f_cnt.to_le_bytes());
        Ok(())
    }

    fn decode(b: &[u8]) -> Result<Self, CodecError> {
        if b.len() < 29 {
            return Err(CodecError::PayloadTooShort {
                expected: 29,
                got: b.len(),
            });
        }
        let mut key = [0u8; 16];
        key.copy_from_slice(&b[5..21]);
        Ok(Self {
            mc_group_id: b[0] & 0x03,
            mc_addr: DevAddr::from_le_bytes([b[1], b[2], b[3], b[4]]),
            mc_key_encrypted: Aes128Key(key),
            min_mc_f_cnt: u32::from_le_bytes([b[21], b[22], b[23], b[24]]),
            max_mc_f_cnt: u32::from_le_bytes([b[25], b[26], b[27], b[28]]),
        })
    }
}

/// McGroupSetupAns: echoed slot plus the IDError flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McGroupSetupAnsPayload {
    /// Group slot the answer refers to.
    pub mc_group_id: u8,
    /// Set when the device rejected the group identifier.
    pub id_error: bool,
}

impl McGroupSetupAnsPayload {
    fn encode(&self, b: &mut Vec<u8>) -> Result<(), CodecError> {
        check_mc_group_id(self.mc_group_id)?;
        b.push(self.mc_group_id | (u8::from(self.id_error) << 2));
        Ok(())
    }

    fn decode(b: &[u8]) -> Result<Self, CodecError> {
        if b.is_empty() {
            return Err(CodecError::PayloadTooShort {
                expected: 1,
                got: 0,
            });
        }
        Ok(Self {
            mc_group_id: b[0] & 0x03,
            id_error: b[0] & 0x04 != 0,
        })
    }
}

/// McGroupDeleteReq: the slot to remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McGroupDeleteReqPayload {
    /// Group slot, 0..=3.
    pub mc_group_id: u8,
}

impl McGroupDeleteReqPayload {
    fn encode(&self, b: &mut Vec<u8>) -> Result<(), CodecError> {
        check_mc_group_id(self.mc_group_id)?;
        b.push(self.mc_group_id);
        Ok(())
    }

    fn decode(b: &[u8]) -> Result<Self, CodecError> {
        if b.is_empty() {
            return Err(CodecError::PayloadTooShort {
                expected: 1,
                got: 0,
            });
        }
        Ok(Self {
            mc_group_id: b[0] & 0x03,
        })
    }
}

/// McGroupDeleteAns: echoed slot plus the undefined-group flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McGroupDeleteAnsPayload {
    /// Group slot the answer refers to.
    pub mc_group_id: u8,
    /// Set when the slot was not provisioned on the device.
    pub mc_group_undefined: bool,
}

impl McGroupDeleteAnsPayload {
    fn encode(&self, b: &mut Vec<u8>) -> Result<(), CodecError> {
        check_mc_group_id(self.mc_group_id)?;
        b.push(self.mc_group_id | (u8::from(self.mc_group_undefined) << 2));
        Ok(())
    }

    fn decode(b: &[u8]) -> Result<Self, CodecError> {
        if b.is_empty() {
            return Err(CodecError::PayloadTooShort {
                expected: 1,
                got: 0,
            });
        }
        Ok(Self {
            mc_group_id: b[0] & 0x03,
            mc_group_undefined: b[0] & 0x04 != 0,
        })
    }
}

/// McClassCSessionReq: reception window schedule for a group slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McClassCSessionReqPayload {
    /// Group slot, 0..=3.
    pub mc_group_id: u8,
    /// Window start, seconds since the GPS epoch modulo 2^32.
    pub session_time: u32,
    /// Window length exponent: the session stays open 2^timeout seconds.
    pub session_time_out: u8,
    /// Downlink frequency in Hz; must be a multiple of 100.
    pub dl_frequency: u32,
    /// Downlink data-rate index.
    pub dr: u8,
}

impl McClassCSessionReqPayload {
    fn encode(&self, b: &mut Vec<u8>) -> Result<(), CodecError> {
        check_mc_group_id(self.mc_group_id)?;
        if self.session_time_out > 15 {
            return Err(CodecError::FieldOutOfRange {
                field: "SessionTimeOut",
                max: 15,
                got: self.session_time_out as u32,
            });
        }
        let freq = self.dl_frequency / 100;
        if freq > 0x00ff_ffff {
            return Err(CodecError::FieldOutOfRange {
                field: "DLFrequency",
                max: 0x00ff_ffff * 100,
                got: self.dl_frequency,
            });
        }
        b.push(self.mc_group_id);
        b.extend_from_slice(&self.session_time.to_le_bytes());
        b.push(self.session_time_out);
        b.extend_from_slice(&freq.to_le_bytes()[..3]);
        b.push(self.dr);
        Ok(())
    }

    fn decode(b: &[u8]) -> Result<Self, CodecError> {
        if b.len() < 10 {
            return Err(CodecError::PayloadTooShort {
                expected: 10,
                got: b.len(),
            });
        }
        Ok(Self {
            mc_group_id: b[0] & 0x03,
            session_time: u32::from_le_bytes([b[1], b[2], b[3], b[4]]),
            session_time_out: b[5] & 0x0f,
            dl_frequency: u32::from_le_bytes([b[6], b[7], b[8], 0]) * 100,
            dr: b[9],
        })
    }
}

/// McClassCSessionAns: status bitmap plus, on success, the seconds left
/// until the window opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McClassCSessionAnsPayload {
    /// Group slot the answer refers to.
    pub mc_group_id: u8,
    /// The device cannot use the requested data-rate.
    pub dr_error: bool,
    /// The device cannot use the requested frequency.
    pub freq_error: bool,
    /// The slot was not provisioned on the device.
    pub mc_group_undefined: bool,
    /// Seconds until the window opens; present only on success.
    pub time_to_start: Option<u32>,
}

impl McClassCSessionAnsPayload {
    fn encode(&self, b: &mut Vec<u8>) -> Result<(), CodecError> {
        check_mc_group_id(self.mc_group_id)?;
        b.push(
            self.mc_group_id
                | (u8::from(self.dr_error) << 2)
                | (u8::from(self.freq_error) << 3)
                | (u8::from(self.mc_group_undefined) << 4),
        );
        if let Some(tts) = self.time_to_start {
            if tts > 0x00ff_ffff {
                return Err(CodecError::FieldOutOfRange {
                    field: "TimeToStart",
                    max: 0x00ff_ffff,
                    got: tts,
                });
            }
            b.extend_from_slice(&tts.to_le_bytes()[..3]);
        }
        Ok(())
    }

    fn decode(b: &[u8]) -> Result<Self, CodecError> {
        if b.is_empty() {
            return Err(CodecError::PayloadTooShort {
                expected: 1,
                got: 0,
            });
        }
        let time_to_start = if b.len() >= 4 {
            Some(u32::from_le_bytes([b[1], b[2], b[3], 0]))
        } else {
            None
        };
        Ok(Self {
            mc_group_id: b[0] & 0x03,
            dr_error: b[0] & 0x04 != 0,
            freq_error: b[0] & 0x08 != 0,
            mc_group_undefined: b[0] & 0x10 != 0,
            time_to_start,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: [u8; 16]) -> Aes128Key {
        Aes128Key(b)
    }

    #[test]
    fn test_mc_key_encrypted_lorawan_10() {
        let gen_app_key = key([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]);
        let mc_key = key([16, 15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1]);

        let root = mc_root_key_for_gen_app_key(&gen_app_key);
        let kek = mc_ke_key(&root);
        assert_eq!(
            encrypt_mc_key(&kek, &mc_key),
            key([
                0xe7, 0x12, 0x30, 0xc9, 0x53, 0x24, 0x02, 0x5a, 0x1d, 0xbe, 0xe6, 0x24, 0xcf,
                0x67, 0x85, 0xa2,
            ])
        );
    }

    #[test]
    fn test_mc_key_encrypted_lorawan_11() {
        let app_key = key([2, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]);
        let mc_key = key([16, 15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1]);

        let root = mc_root_key_for_app_key(&app_key);
        let kek = mc_ke_key(&root);
        assert_eq!(
            encrypt_mc_key(&kek, &mc_key),
            key([
                0xfb, 0xd1, 0x2a, 0x2e, 0xfa, 0x8d, 0x7f, 0x19, 0x78, 0x83, 0x12, 0x73, 0xac,
                0x5b, 0xdb, 0x74,
            ])
        );
    }

    #[test]
    fn test_mc_group_setup_req_layout() {
        let cmd = Command::McGroupSetupReq(McGroupSetupReqPayload {
            mc_group_id: 1,
            mc_addr: DevAddr([1, 2, 3, 4]),
            mc_key_encrypted: key([1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8]),
            min_mc_f_cnt: 10,
            max_mc_f_cnt: 20,
        });

        let b = cmd.to_bytes().unwrap();
        assert_eq!(b.len(), 30);
        assert_eq!(b[0], 0x02);
        assert_eq!(b[1], 0x01);
        // McAddr goes out little-endian
        assert_eq!(&b[2..6], &[4, 3, 2, 1]);
        // the wrapped key keeps its byte order
        assert_eq!(&b[6..22], &[1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&b[22..26], &[10, 0, 0, 0]);
        assert_eq!(&b[26..30], &[20, 0, 0, 0]);

        assert_eq!(Command::from_bytes(false, &b).unwrap(), cmd);
    }

    #[test]
    fn test_mc_group_setup_ans_decode() {
        let cmd = Command::from_bytes(true, &[0x02, 0x06]).unwrap();
        assert_eq!(
            cmd,
            Command::McGroupSetupAns(McGroupSetupAnsPayload {
                mc_group_id: 2,
                id_error: true,
            })
        );
    }

    #[test]
    fn test_mc_group_delete_req_encode() {
        let cmd = Command::McGroupDeleteReq(McGroupDeleteReqPayload { mc_group_id: 1 });
        assert_eq!(cmd.to_bytes().unwrap(), vec![0x03, 0x01]);
    }

    #[test]
    fn test_mc_class_c_session_req_layout() {
        let cmd = Command::McClassCSessionReq(McClassCSessionReqPayload {
            mc_group_id: 0,
            session_time: 0x01020304,
            session_time_out: 8,
            dl_frequency: 868_100_000,
            dr: 5,
        });

        let b = cmd.to_bytes().unwrap();
        assert_eq!(b.len(), 11);
        assert_eq!(b[0], 0x04);
        assert_eq!(&b[2..6], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(b[6], 8);
        // 868.1 MHz / 100 = 8681000 = 0x84_7628, little-endian
        assert_eq!(&b[7..10], &[0x28, 0x76, 0x84]);
        assert_eq!(b[10], 5);

        assert_eq!(Command::from_bytes(false, &b).unwrap(), cmd);
    }

    #[test]
    fn test_mc_class_c_session_ans_error_bits() {
        let cmd = Command::from_bytes(true, &[0x04, 0x0c]).unwrap();
        assert_eq!(
            cmd,
            Command::McClassCSessionAns(McClassCSessionAnsPayload {
                mc_group_id: 0,
                dr_error: true,
                freq_error: true,
                mc_group_undefined: false,
                time_to_start: None,
            })
        );
    }

    #[test]
    fn test_mc_group_id_out_of_range() {
        let cmd = Command::McGroupDeleteReq(McGroupDeleteReqPayload { mc_group_id: 4 });
        assert_eq!(
            cmd.to_bytes(),
            Err(CodecError::FieldOutOfRange {
                field: "McGroupID",
                max: 3,
                got: 4,
            })
        );
    }
}
