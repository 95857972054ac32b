// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fragmented Data Block Transport commands and the fragment encoder.
//!
//! A fragmentation session is installed with `FragSessionSetupReq`, after
//! which the data block is carried by `DataFragment` commands over
//! multicast. [`encode`] produces the fragment set: the payload split into
//! equal pieces followed by the forward-error-correction parity fragments of
//! the systematic GF(2) code from the transport recommendation, so receivers
//! can reconstruct the block with up to `redundancy` fragments lost.

use crate::types::bytea_type;
use crate::CodecError;

/// Well-known fPort for the fragmented data block transport protocol.
pub const DEFAULT_FPORT: u8 = 201;

const CID_FRAG_SESSION_SETUP: u8 = 0x02;
const CID_FRAG_SESSION_DELETE: u8 = 0x03;
const CID_DATA_FRAGMENT: u8 = 0x08;

/// Largest fragmentation session index on a device.
pub const MAX_FRAG_INDEX: u8 = 3;

/// Opaque 4-byte file descriptor carried by the session setup.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor(pub [u8; 4]);

bytea_type!(Descriptor, 4);

/// A fragmented data block transport command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Install a fragmentation session (downlink).
    FragSessionSetupReq(FragSessionSetupReqPayload),
    /// Device answer to a session setup (uplink).
    FragSessionSetupAns(FragSessionSetupAnsPayload),
    /// Remove a fragmentation session (downlink).
    FragSessionDeleteReq(FragSessionDeleteReqPayload),
    /// Device answer to a session delete (uplink).
    FragSessionDeleteAns(FragSessionDeleteAnsPayload),
    /// One encoded fragment of the data block (downlink).
    DataFragment(DataFragmentPayload),
}

impl Command {
    /// Returns the command identifier.
    pub fn cid(&self) -> u8 {
        match self {
            Command::FragSessionSetupReq(_) | Command::FragSessionSetupAns(_) => {
                CID_FRAG_SESSION_SETUP
            }
            Command::FragSessionDeleteReq(_) | Command::FragSessionDeleteAns(_) => {
                CID_FRAG_SESSION_DELETE
            }
            Command::DataFragment(_) => CID_DATA_FRAGMENT,
        }
    }

    /// Serialises the command, CID byte first.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut b = vec![self.cid()];
        match self {
            Command::FragSessionSetupReq(pl) => pl.encode(&mut b)?,
            Command::FragSessionSetupAns(pl) => pl.encode(&mut b)?,
            Command::FragSessionDeleteReq(pl) => pl.encode(&mut b)?,
            Command::FragSessionDeleteAns(pl) => pl.encode(&mut b)?,
            Command::DataFragment(pl) => pl.encode(&mut b)?,
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
            (CID_FRAG_SESSION_SETUP, false) => Ok(Command::FragSessionSetupReq(
                FragSessionSetupReqPayload::decode(payload)?,
            )),
            (CID_FRAG_SESSION_SETUP, true) => Ok(Command::FragSessionSetupAns(
                FragSessionSetupAnsPayload::decode(payload)?,
            )),
            (CID_FRAG_SESSION_DELETE, false) => Ok(Command::FragSessionDeleteReq(
                FragSessionDeleteReqPayload::decode(payload)?,
            )),
            (CID_FRAG_SESSION_DELETE, true) => Ok(Command::FragSessionDeleteAns(
                FragSessionDeleteAnsPayload::decode(payload)?,
            )),
            (CID_DATA_FRAGMENT, false) => Ok(Command::DataFragment(DataFragmentPayload::decode(
                payload,
            )?)),
            _ => Err(CodecError::UnknownCid(cid)),
        }
    }
}

fn check_frag_index(idx: u8) -> Result<(), CodecError> {
    if idx > MAX_FRAG_INDEX {
        return Err(CodecError::FieldOutOfRange {
            field: "FragIndex",
            max: MAX_FRAG_INDEX as u32,
            got: idx as u32,
        });
    }
    Ok(())
}

/// FragSessionSetupReq: session parameters for one fragment index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragSessionSetupReqPayload {
    /// Session index, 0..=3.
    pub frag_index: u8,
    /// Multicast group slots this session listens to; bit `i` selects slot `i`.
    pub mc_group_bit_mask: [bool; 4],
    /// Total number of fragments, data plus redundancy.
    pub nb_frag: u16,
    /// Fragment size in bytes.
    pub frag_size: u8,
    /// Erasure-code matrix selector, 3 bits.
    pub fragmentation_matrix: u8,
    /// Block acknowledgement delay exponent, 3 bits.
    pub block_ack_delay: u8,
    /// Number of zero bytes appended to the last data fragment.
    pub padding: u8,
    /// Opaque file descriptor.
    pub descriptor: Descriptor,
}

impl FragSessionSetupReqPayload {
    fn encode(&self, b: &mut Vec<u8>) -> Result<(), CodecError> {
        check_frag_index(self.frag_index)?;
        if self.fragmentation_matrix > 7 {
            return Err(CodecError::FieldOutOfRange {
                field: "FragmentationMatrix",
                max: 7,
                got: self.fragmentation_matrix as u32,
            });
        }
        if self.block_ack_delay > 7 {
            return Err(CodecError::FieldOutOfRange {
                field: "BlockAckDelay",
                max: 7,
                got: self.block_ack_delay as u32,
            });
        }

        let mut mask = 0u8;
        for (i, set) in self.mc_group_bit_mask.iter().enumerate() {
            mask |= u8::from(*set) << i;
        }

        b.push(mask | (self.frag_index << 4));
        b.extend_from_slice(&self.nb_frag.to_le_bytes());
        b.push(self.frag_size);
        b.push(self.block_ack_delay | (self.fragmentation_matrix << 3));
        b.push(self.padding);
        b.extend_from_slice(self.descriptor.as_bytes());
        Ok(())
    }

    fn decode(b: &[u8]) -> Result<Self, CodecError> {
        if b.len() < 10 {
            return Err(CodecError::PayloadTooShort {
                expected: 10,
                got: b.len(),
            });
        }
        let mut mask = [false; 4];
        for (i, set) in mask.iter_mut().enumerate() {
            *set = b[0] & (1 << i) != 0;
        }
        let mut descriptor = [0u8; 4];
        descriptor.copy_from_slice(&b[6..10]);
        Ok(Self {
            frag_index: (b[0] >> 4) & 0x03,
            mc_group_bit_mask: mask,
            nb_frag: u16::from_le_bytes([b[1], b[2]]),
            frag_size: b[3],
            fragmentation_matrix: (b[4] >> 3) & 0x07,
            block_ack_delay: b[4] & 0x07,
            padding: b[5],
            descriptor: Descriptor(descriptor),
        })
    }
}

/// FragSessionSetupAns: status bitmap for a session setup.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FragSessionSetupAnsPayload {
    /// Session index the answer refers to.
    pub frag_index: u8,
    /// The descriptor was rejected by the device application.
    pub wrong_descriptor: bool,
    /// The session index is not supported.
    pub frag_session_index_not_supported: bool,
    /// The device lacks memory for the announced block.
    pub not_enough_memory: bool,
    /// The erasure-code selector is not supported.
    pub encoding_unsupported: bool,
}

impl FragSessionSetupAnsPayload {
    fn encode(&self, b: &mut Vec<u8>) -> Result<(), CodecError> {
        check_frag_index(self.frag_index)?;
        b.push(
            u8::from(self.encoding_unsupported)
                | (u8::from(self.not_enough_memory) << 1)
                | (u8::from(self.frag_session_index_not_supported) << 2)
                | (u8::from(self.wrong_descriptor) << 3)
                | (self.frag_index << 6),
        );
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
            frag_index: (b[0] >> 6) & 0x03,
            wrong_descriptor: b[0] & 0x08 != 0,
            frag_session_index_not_supported: b[0] & 0x04 != 0,
            not_enough_memory: b[0] & 0x02 != 0,
            encoding_unsupported: b[0] & 0x01 != 0,
        })
    }
}

/// FragSessionDeleteReq: the session index to remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragSessionDeleteReqPayload {
    /// Session index, 0..=3.
    pub frag_index: u8,
}

impl FragSessionDeleteReqPayload {
    fn encode(&self, b: &mut Vec<u8>) -> Result<(), CodecError> {
        check_frag_index(self.frag_index)?;
        b.push(self.frag_index);
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
            frag_index: b[0] & 0x03,
        })
    }
}

/// FragSessionDeleteAns: echoed index plus the missing-session flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragSessionDeleteAnsPayload {
    /// Session index the answer refers to.
    pub frag_index: u8,
    /// Set when no such session existed on the device.
    pub session_does_not_exist: bool,
}

impl FragSessionDeleteAnsPayload {
    fn encode(&self, b: &mut Vec<u8>) -> Result<(), CodecError> {
        check_frag_index(self.frag_index)?;
        b.push(self.frag_index | (u8::from(self.session_does_not_exist) << 2));
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
            frag_index: b[0] & 0x03,
            session_does_not_exist: b[0] & 0x04 != 0,
        })
    }
}

/// DataFragment: one encoded fragment with its index within the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFragmentPayload {
    /// Session index, 2 bits.
    pub frag_index: u8,
    /// Fragment number within the encoded set, 14 bits.
    pub n: u16,
    /// Fragment bytes.
    pub payload: Vec<u8>,
}

impl DataFragmentPayload {
    fn encode(&self, b: &mut Vec<u8>) -> Result<(), CodecError> {
        check_frag_index(self.frag_index)?;
        if self.n > 0x3fff {
            return Err(CodecError::FieldOutOfRange {
                field: "N",
                max: 0x3fff,
                got: self.n as u32,
            });
        }
        let index_and_n = self.n | ((self.frag_index as u16) << 14);
        b.extend_from_slice(&index_and_n.to_le_bytes());
        b.extend_from_slice(&self.payload);
        Ok(())
    }

    fn decode(b: &[u8]) -> Result<Self, CodecError> {
        if b.len() < 2 {
            return Err(CodecError::PayloadTooShort {
                expected: 2,
                got: b.len(),
            });
        }
        let index_and_n = u16::from_le_bytes([b[0], b[1]]);
        Ok(Self {
            frag_index: (index_and_n >> 14) as u8,
            n: index_and_n & 0x3fff,
            payload: b[2..].to_vec(),
        })
    }
}

// ============================================================================
// Fragment encoder
// ============================================================================

/// Encodes a data block into `ceil(len / frag_size)` data fragments followed
/// by `redundancy` parity fragments.
///
/// The payload is zero-padded to a multiple of `frag_size` first; parity
/// fragment `i` (1-based) is the XOR of the data fragments selected by the
/// PRBS23-derived matrix line `i`.
pub fn encode(
    payload: &[u8],
    frag_size: usize,
    redundancy: usize,
) -> Result<Vec<Vec<u8>>, CodecError> {
    if frag_size == 0 {
        return Err(CodecError::ZeroFragSize);
    }

    let mut data = payload.to_vec();
    if data.len() % frag_size != 0 {
        let padding = frag_size - (data.len() % frag_size);
        data.resize(data.len() + padding, 0);
    }

    let w = data.len() / frag_size;
    let mut out: Vec<Vec<u8>> = data.chunks(frag_size).map(|c| c.to_vec()).collect();

    for i in 0..redundancy {
        let line = matrix_line(i + 1, w);
        let mut parity = vec![0u8; frag_size];
        for (j, selected) in line.iter().enumerate() {
            if *selected {
                for (p, d) in parity.iter_mut().zip(&out[j]) {
                    *p ^= d;
                }
            }
        }
        out.push(parity);
    }

    Ok(out)
}

/// One step of the 23-bit pseudo-random binary sequence generator.
fn prbs23(x: u32) -> u32 {
    let b0 = x & 1;
    let b1 = (x >> 5) & 1;
    (x >> 1) + ((b0 ^ b1) << 22)
}

/// Returns line `n` (1-based) of the parity matrix for `m` data fragments.
fn matrix_line(n: usize, m: usize) -> Vec<bool> {
    let mut line = vec![false; m];
    let mm = if m.is_power_of_two() { m + 1 } else { m };

    let mut x = 1 + 1001 * n as u32;

    for _ in 0..m / 2 {
        let mut r = 1 << 16;
        while r >= m {
            x = prbs23(x);
            r = (x as usize) % mm;
        }
        line[r] = true;
    }

    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_no_padding_single_parity() {
        let frags = encode(&[1, 2, 3, 4], 2, 1).unwrap();
        assert_eq!(frags, vec![vec![1, 2], vec![3, 4], vec![3, 4]]);
    }

    #[test]
    fn test_encode_pads_with_zero_bytes() {
        let frags = encode(&[1, 2, 3, 4, 5], 2, 0).unwrap();
        assert_eq!(frags, vec![vec![1, 2], vec![3, 4], vec![5, 0]]);
    }

    #[test]
    fn test_encode_fragment_count() {
        // 5 bytes at frag_size 2 -> 3 data fragments + 10 parity
        let frags = encode(&[1, 2, 3, 4, 5], 2, 10).unwrap();
        assert_eq!(frags.len(), 13);
        for f in &frags {
            assert_eq!(f.len(), 2);
        }
    }

    #[test]
    fn test_encode_zero_frag_size() {
        assert_eq!(encode(&[1, 2, 3], 0, 1), Err(CodecError::ZeroFragSize));
    }

    #[test]
    fn test_matrix_line_covers_only_data_fragments() {
        for m in [2usize, 3, 4, 7, 16, 21] {
            for n in 1..=8 {
                let line = matrix_line(n, m);
                assert_eq!(line.len(), m);
                assert!(line.iter().any(|b| *b), "line {n} of {m} selects nothing");
            }
        }
    }

    #[test]
    fn test_data_fragment_round_trip() {
        let cmd = Command::DataFragment(DataFragmentPayload {
            frag_index: 2,
            n: 513,
            payload: vec![0xaa, 0xbb, 0xcc],
        });
        let b = cmd.to_bytes().unwrap();
        assert_eq!(b[0], 0x08);
        // n = 513 | (2 << 14) = 0x8201, little-endian on the wire
        assert_eq!(&b[1..3], &[0x01, 0x82]);
        assert_eq!(Command::from_bytes(false, &b).unwrap(), cmd);
    }

    #[test]
    fn test_frag_session_setup_req_layout() {
        let cmd = Command::FragSessionSetupReq(FragSessionSetupReqPayload {
            frag_index: 1,
            mc_group_bit_mask: [true, false, false, false],
            nb_frag: 10,
            frag_size: 50,
            fragmentation_matrix: 5,
            block_ack_delay: 3,
            padding: 2,
            descriptor: Descriptor([1, 2, 3, 4]),
        });

        let b = cmd.to_bytes().unwrap();
        assert_eq!(b.len(), 11);
        assert_eq!(b[0], 0x02);
        assert_eq!(b[1], 0x11); // mask bit 0 + frag index 1 << 4
        assert_eq!(&b[2..4], &[10, 0]);
        assert_eq!(b[4], 50);
        assert_eq!(b[5], 3 | (5 << 3));
        assert_eq!(b[6], 2);
        assert_eq!(&b[7..11], &[1, 2, 3, 4]);

        assert_eq!(Command::from_bytes(false, &b).unwrap(), cmd);
    }

    #[test]
    fn test_frag_session_setup_ans_status_bits() {
        let cmd = Command::from_bytes(true, &[0x02, 0x48]).unwrap();
        assert_eq!(
            cmd,
            Command::FragSessionSetupAns(FragSessionSetupAnsPayload {
                frag_index: 1,
                wrong_descriptor: true,
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_frag_session_delete_ans_decode() {
        let cmd = Command::from_bytes(true, &[0x03, 0x05]).unwrap();
        assert_eq!(
            cmd,
            Command::FragSessionDeleteAns(FragSessionDeleteAnsPayload {
                frag_index: 1,
                session_does_not_exist: true,
            })
        );
    }
}
