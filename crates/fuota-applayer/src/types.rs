// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Primitive LoRaWAN identifier and key types.
//!
//! All types map to BYTEA columns so storage rows carry them directly, and
//! render as lowercase hex in text form.

use thiserror::Error;

/// Error returned when parsing an identifier or key from text.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    /// The input was not valid hex.
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    /// The decoded value had the wrong number of bytes.
    #[error("expected {expected} bytes, got {got}")]
    Length {
        /// Expected byte count.
        expected: usize,
        /// Actual byte count.
        got: usize,
    },
}

macro_rules! bytea_type {
    ($name:ident, $len:expr) => {
        impl $name {
            /// Returns the raw bytes, big-endian as stored.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Returns true when every byte is zero.
            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; $len]
            }
        }

        impl ::std::convert::From<[u8; $len]> for $name {
            fn from(b: [u8; $len]) -> Self {
                Self(b)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(&::hex::encode(self.0))
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::types::ParseError;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                let b = ::hex::decode(s)?;
                let got = b.len();
                let bytes: [u8; $len] = b.try_into().map_err(|_| {
                    $crate::types::ParseError::Length {
                        expected: $len,
                        got,
                    }
                })?;
                Ok(Self(bytes))
            }
        }

        impl ::sqlx::Type<::sqlx::Postgres> for $name {
            fn type_info() -> ::sqlx::postgres::PgTypeInfo {
                <&[u8] as ::sqlx::Type<::sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &::sqlx::postgres::PgTypeInfo) -> bool {
                <&[u8] as ::sqlx::Type<::sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'q> ::sqlx::Encode<'q, ::sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut ::sqlx::postgres::PgArgumentBuffer,
            ) -> ::std::result::Result<::sqlx::encode::IsNull, ::sqlx::error::BoxDynError> {
                buf.extend_from_slice(&self.0);
                Ok(::sqlx::encode::IsNull::No)
            }
        }

        impl<'r> ::sqlx::Decode<'r, ::sqlx::Postgres> for $name {
            fn decode(
                value: ::sqlx::postgres::PgValueRef<'r>,
            ) -> ::std::result::Result<Self, ::sqlx::error::BoxDynError> {
                let b = <&[u8] as ::sqlx::Decode<'r, ::sqlx::Postgres>>::decode(value)?;
                let bytes: [u8; $len] = b.try_into().map_err(|_| {
                    format!(
                        "expected {} bytes for {}, got {}",
                        $len,
                        stringify!($name),
                        b.len()
                    )
                })?;
                Ok(Self(bytes))
            }
        }
    };
}

pub(crate) use bytea_type;

/// 8-byte globally unique end-device identifier, big-endian.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Eui64(pub [u8; 8]);

bytea_type!(Eui64, 8);

/// 4-byte device / multicast network address, big-endian.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevAddr(pub [u8; 4]);

bytea_type!(DevAddr, 4);

impl DevAddr {
    /// Returns the address in the little-endian order used on the wire and
    /// inside encryption blocks.
    pub fn to_le_bytes(&self) -> [u8; 4] {
        let mut b = self.0;
        b.reverse();
        b
    }

    /// Builds an address from its little-endian wire order.
    pub fn from_le_bytes(mut b: [u8; 4]) -> Self {
        b.reverse();
        Self(b)
    }
}

/// 128-bit AES key.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Aes128Key(pub [u8; 16]);

bytea_type!(Aes128Key, 16);
