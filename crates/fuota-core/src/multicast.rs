// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Multicast-group queue enqueueing.
//!
//! Frame counters are the single shared mutable value of a multicast group:
//! two enqueuers that read the same counter would produce payloads the
//! devices cannot decrypt apart. The group row lock taken here serialises
//! counter assignment; the lock is released when the surrounding
//! transaction commits.

use anyhow::{bail, Context};
use sqlx::PgConnection;
use uuid::Uuid;

use fuota_applayer::crypto::encrypt_frm_payload;

use crate::backend::{MulticastQueueItem, NetworkServerClient};
use crate::storage;

/// Adds one payload to the multicast-group queue and returns the frame
/// counter it was assigned.
pub async fn enqueue(
    conn: &mut PgConnection,
    backend: &dyn NetworkServerClient,
    multicast_group_id: Uuid,
    f_port: u8,
    data: Vec<u8>,
) -> anyhow::Result<u32> {
    let f_cnts = enqueue_multiple(conn, backend, multicast_group_id, f_port, vec![data]).await?;
    if f_cnts.len() != 1 {
        bail!("expected 1 frame-counter, got: {}", f_cnts.len());
    }
    Ok(f_cnts[0])
}

/// Adds the given payloads to the multicast-group queue and returns the
/// contiguous block of frame counters they were assigned.
///
/// Each payload is encrypted with the group's McAppSKey under the counter
/// it is queued at.
pub async fn enqueue_multiple(
    conn: &mut PgConnection,
    backend: &dyn NetworkServerClient,
    multicast_group_id: Uuid,
    f_port: u8,
    payloads: Vec<Vec<u8>>,
) -> anyhow::Result<Vec<u32>> {
    // Lock the group so no concurrent enqueue sees the same counters.
    let mg = storage::get_multicast_group(&mut *conn, multicast_group_id, true)
        .await
        .context("get multicast-group error")?;

    let mut out = Vec::with_capacity(payloads.len());
    let mut f_cnt = mg.f_cnt as u32;

    for pl in payloads {
        let encrypted = encrypt_frm_payload(&mg.mc_app_s_key, false, &mg.mc_addr, f_cnt, &pl);

        backend
            .enqueue_multicast_queue_item(MulticastQueueItem {
                multicast_group_id,
                frm_payload: encrypted,
                f_cnt,
                f_port,
            })
            .await
            .context("enqueue multicast queue-item error")?;

        out.push(f_cnt);
        f_cnt = f_cnt.wrapping_add(1);
    }

    storage::update_multicast_group_f_cnt(conn, multicast_group_id, f_cnt as i64)
        .await
        .context("update multicast-group frame-counter error")?;

    Ok(out)
}
