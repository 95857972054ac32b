// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Storage layer for the FUOTA engine.
//!
//! One module per entity, each holding the record struct and its queries.
//! All functions take `&mut PgConnection` so a tick composes them inside a
//! single transaction; a missing row surfaces as
//! [`Error::DoesNotExist`](crate::error::Error::DoesNotExist).

pub mod device_keys;
pub mod fuota_deployment;
pub mod multicast_group;
pub mod remote_fragmentation_session;
pub mod remote_multicast_class_c_session;
pub mod remote_multicast_setup;

pub use self::device_keys::*;
pub use self::fuota_deployment::*;
pub use self::multicast_group::*;
pub use self::remote_fragmentation_session::*;
pub use self::remote_multicast_class_c_session::*;
pub use self::remote_multicast_setup::*;

use std::fmt;

/// Maps an enum with `as_str` / `parse_str` onto a TEXT column.
macro_rules! text_enum_pg {
    ($name:ident) => {
        impl ::sqlx::Type<::sqlx::Postgres> for $name {
            fn type_info() -> ::sqlx::postgres::PgTypeInfo {
                <&str as ::sqlx::Type<::sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &::sqlx::postgres::PgTypeInfo) -> bool {
                <&str as ::sqlx::Type<::sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'q> ::sqlx::Encode<'q, ::sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut ::sqlx::postgres::PgArgumentBuffer,
            ) -> ::std::result::Result<::sqlx::encode::IsNull, ::sqlx::error::BoxDynError> {
                <&str as ::sqlx::Encode<'q, ::sqlx::Postgres>>::encode(self.as_str(), buf)
            }
        }

        impl<'r> ::sqlx::Decode<'r, ::sqlx::Postgres> for $name {
            fn decode(
                value: ::sqlx::postgres::PgValueRef<'r>,
            ) -> ::std::result::Result<Self, ::sqlx::error::BoxDynError> {
                let s = <&str as ::sqlx::Decode<'r, ::sqlx::Postgres>>::decode(value)?;
                $name::parse_str(s)
                    .ok_or_else(|| format!("unknown {}: {}", stringify!($name), s).into())
            }
        }
    };
}

/// Stage of a FUOTA deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuotaDeploymentState {
    /// Provisioning the multicast group on each device.
    MulticastSetup,
    /// Provisioning the fragmentation session on each device.
    FragmentationSessSetup,
    /// Scheduling the Class-C reception window on each device.
    MulticastSessCSetup,
    /// Fragmenting the payload and handing it to the multicast queue.
    Enqueue,
    /// Fragments handed over, waiting for transmission.
    WaitingTx,
    /// Deployment finished.
    Done,
}

impl FuotaDeploymentState {
    /// Returns the stored text form.
    pub fn as_str(&self) -> &'static str {
        match self {
            FuotaDeploymentState::MulticastSetup => "MC_SETUP",
            FuotaDeploymentState::FragmentationSessSetup => "FRAG_SESS_SETUP",
            FuotaDeploymentState::MulticastSessCSetup => "MC_SESS_C_SETUP",
            FuotaDeploymentState::Enqueue => "ENQUEUE",
            FuotaDeploymentState::WaitingTx => "WAITING_TX",
            FuotaDeploymentState::Done => "DONE",
        }
    }

    /// Parses the stored text form.
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "MC_SETUP" => Some(FuotaDeploymentState::MulticastSetup),
            "FRAG_SESS_SETUP" => Some(FuotaDeploymentState::FragmentationSessSetup),
            "MC_SESS_C_SETUP" => Some(FuotaDeploymentState::MulticastSessCSetup),
            "ENQUEUE" => Some(FuotaDeploymentState::Enqueue),
            "WAITING_TX" => Some(FuotaDeploymentState::WaitingTx),
            "DONE" => Some(FuotaDeploymentState::Done),
            _ => None,
        }
    }
}

impl fmt::Display for FuotaDeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

text_enum_pg!(FuotaDeploymentState);

/// Desired end-state of a per-device provisioning row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteSyncState {
    /// The resource must be provisioned on the device.
    Setup,
    /// The resource must be removed from the device.
    Delete,
}

impl RemoteSyncState {
    /// Returns the stored text form.
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteSyncState::Setup => "SETUP",
            RemoteSyncState::Delete => "DELETE",
        }
    }

    /// Parses the stored text form.
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "SETUP" => Some(RemoteSyncState::Setup),
            "DELETE" => Some(RemoteSyncState::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for RemoteSyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

text_enum_pg!(RemoteSyncState);

/// Multicast group type of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum GroupType {
    /// Class-C: a continuous reception window is scheduled.
    ClassC,
}

impl GroupType {
    /// Returns the stored text form.
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupType::ClassC => "C",
        }
    }

    /// Parses the stored text form.
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "C" => Some(GroupType::ClassC),
            _ => None,
        }
    }
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

text_enum_pg!(GroupType);
