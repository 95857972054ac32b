// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! FUOTA Core - Firmware-Update-Over-The-Air Orchestration Engine
//!
//! This crate drives firmware deployments for a LoRaWAN application server.
//! A deployment provisions a multicast group on every participating device,
//! installs a fragmentation session, schedules a Class-C reception window
//! and finally fragments the firmware payload onto the multicast queue. All
//! state is persisted to PostgreSQL; every tick of every worker is one
//! transaction.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     Embedding Application Server                     │
//! │            (gRPC admin surface, uplink frame handling)               │
//! └─────────────────────────────────────────────────────────────────────┘
//!         │ api::create_for_dev_eui      │ uplink::handle_uplink_command
//!         ▼                              ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       fuota-core (This Crate)                        │
//! │                                                                      │
//! │  ┌──────────────────┐   ┌────────────────────────────────────────┐   │
//! │  │ DeploymentWorker │──▶│ remote_multicast_setup                 │   │
//! │  │  MC_SETUP        │   │ remote_fragmentation_session           │   │
//! │  │  FRAG_SESS_SETUP │   │ remote_multicast_class_c_session       │   │
//! │  │  MC_SESS_C_SETUP │   └────────────────────────────────────────┘   │
//! │  │  ENQUEUE         │                    │ sync workers              │
//! │  └──────────────────┘                    ▼                           │
//! │           │              ┌────────────────────────────────────────┐  │
//! │           └─────────────▶│   NetworkServerClient (collaborator)   │  │
//! │     multicast::enqueue   └────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//!           │
//!           ▼
//! ┌───────────────────────┐
//! │      PostgreSQL       │
//! └───────────────────────┘
//! ```
//!
//! # Deployment State Machine
//!
//! ```text
//! MC_SETUP ──▶ FRAG_SESS_SETUP ──▶ MC_SESS_C_SETUP ──▶ ENQUEUE ──▶ WAITING_TX
//! ```
//!
//! One transition per driver tick, at the earliest at the deployment's
//! `next_step_after`. Each stage creates per-device provisioning rows; the
//! three sync workers dispatch them to the devices independently until the
//! device acknowledges or the per-row retry budget is exhausted. The next
//! stage only fans out to devices whose previous rows were acknowledged; a
//! device that never acknowledges is excluded from the rest of the
//! deployment.
//!
//! # Concurrency
//!
//! The four periodic workers share nothing in-process; the relational store
//! is the single shared resource. Provisioning scans use
//! `FOR UPDATE SKIP LOCKED` so replicas never dispatch the same row twice in
//! an interval, and the multicast enqueue locks the group row so frame
//! counters are assigned contiguously.
//!
//! # Modules
//!
//! - [`api`]: deployment creation behind the host's admin surface
//! - [`backend`]: network-server collaborator trait and test mock
//! - [`band`]: regional maximum-payload-size tables
//! - [`config`]: environment-variable configuration
//! - [`error`]: error taxonomy
//! - [`fuota`]: the deployment driver
//! - [`applayer`]: per-protocol sync workers and uplink handlers
//! - [`migrations`]: embedded schema migrations
//! - [`multicast`]: row-locked multicast queue enqueueing
//! - [`runtime`]: embeddable runtime spawning all workers
//! - [`storage`]: records and queries
//! - [`uplink`]: fPort dispatch for inbound commands

#![deny(missing_docs)]

pub mod api;
pub mod applayer;
pub mod backend;
pub mod band;
pub mod config;
pub mod error;
pub mod fuota;
pub mod migrations;
pub mod multicast;
pub mod runtime;
pub mod storage;
pub mod uplink;
