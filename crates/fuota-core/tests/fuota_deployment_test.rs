// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests for the deployment driver stages.

mod common;

use chrono::Utc;
use uuid::Uuid;

use fuota_applayer::fragmentation::Descriptor;
use fuota_applayer::types::Aes128Key;
use fuota_core::backend::mock::MockNetworkServerClient;
use fuota_core::fuota::{process_pending_deployments, DeploymentWorkerConfig};
use fuota_core::storage::{
    self, DeviceKeys, FuotaDeployment, FuotaDeploymentState, GroupType, RemoteMulticastSetup,
    RemoteSyncState,
};

use common::{random_dev_eui, seed_multicast_group, test_pool};

fn deployment(multicast_group_id: Uuid) -> FuotaDeployment {
    FuotaDeployment {
        id: Uuid::nil(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
        name: "test-deployment".into(),
        multicast_group_id: Some(multicast_group_id),
        group_type: GroupType::ClassC,
        dr: 0,
        frequency: 0,
        payload: Vec::new(),
        frag_size: 0,
        redundancy: 0,
        fragmentation_matrix: 0,
        block_ack_delay: 0,
        descriptor: Descriptor::default(),
        multicast_timeout: 0,
        unicast_timeout_secs: 1,
        state: FuotaDeploymentState::MulticastSetup,
        next_step_after: Utc::now(),
    }
}

fn config() -> DeploymentWorkerConfig {
    DeploymentWorkerConfig {
        batch_size: 10,
        multicast_setup_retries: 3,
        fragmentation_session_retries: 3,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_multicast_setup_lorawan_10() {
    let Some(pool) = test_pool().await else {
        eprintln!("Skipping test: TEST_DATABASE_URL not set");
        return;
    };
    let mut tx = pool.begin().await.unwrap();
    let backend = MockNetworkServerClient::new();
    let dev_eui = random_dev_eui();

    let mut dk = DeviceKeys {
        dev_eui,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        app_key: Aes128Key::default(),
        gen_app_key: Aes128Key([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]),
    };
    storage::create_device_keys(&mut tx, &mut dk).await.unwrap();

    let mg = seed_multicast_group(
        &mut tx,
        Aes128Key([16, 15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1]),
        Aes128Key::default(),
        0,
        0,
        0,
    )
    .await;

    let mut fd = deployment(mg.id);
    storage::create_fuota_deployment_for_device(&mut tx, &mut fd, dev_eui)
        .await
        .unwrap();

    process_pending_deployments(&mut tx, &backend, &config())
        .await
        .unwrap();

    let items = storage::get_pending_remote_multicast_setup_items(&mut tx, 10, 10)
        .await
        .unwrap();
    assert_eq!(items.len(), 1);

    let item = &items[0];
    assert_eq!(item.dev_eui, dev_eui);
    assert_eq!(item.multicast_group_id, mg.id);
    assert_eq!(item.mc_group_id, 0);
    assert_eq!(item.min_mc_f_cnt, 0);
    assert_eq!(item.max_mc_f_cnt, (1 << 32) - 1);
    assert_eq!(item.state, RemoteSyncState::Setup);
    assert!(!item.state_provisioned);
    assert_eq!(item.retry_interval_secs, 1);
    assert_eq!(
        item.mc_key_encrypted,
        Aes128Key([
            0xe7, 0x12, 0x30, 0xc9, 0x53, 0x24, 0x02, 0x5a, 0x1d, 0xbe, 0xe6, 0x24, 0xcf, 0x67,
            0x85, 0xa2,
        ])
    );

    let updated = storage::get_fuota_deployment(&mut tx, fd.id, false)
        .await
        .unwrap();
    assert_eq!(updated.state, FuotaDeploymentState::FragmentationSessSetup);
    assert!(updated.next_step_after > Utc::now());
}

#[tokio::test]
async fn test_multicast_setup_lorawan_11() {
    let Some(pool) = test_pool().await else {
        eprintln!("Skipping test: TEST_DATABASE_URL not set");
        return;
    };
    let mut tx = pool.begin().await.unwrap();
    let backend = MockNetworkServerClient::new();
    let dev_eui = random_dev_eui();

    // Both keys set: the AppKey wins.
    let mut dk = DeviceKeys {
        dev_eui,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        app_key: Aes128Key([2, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]),
        gen_app_key: Aes128Key([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]),
    };
    storage::create_device_keys(&mut tx, &mut dk).await.unwrap();

    let mg = seed_multicast_group(
        &mut tx,
        Aes128Key([16, 15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1]),
        Aes128Key::default(),
        0,
        0,
        0,
    )
    .await;

    let mut fd = deployment(mg.id);
    storage::create_fuota_deployment_for_device(&mut tx, &mut fd, dev_eui)
        .await
        .unwrap();

    process_pending_deployments(&mut tx, &backend, &config())
        .await
        .unwrap();

    let items = storage::get_pending_remote_multicast_setup_items(&mut tx, 10, 10)
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(
        items[0].mc_key_encrypted,
        Aes128Key([
            0xfb, 0xd1, 0x2a, 0x2e, 0xfa, 0x8d, 0x7f, 0x19, 0x78, 0x83, 0x12, 0x73, 0xac, 0x5b,
            0xdb, 0x74,
        ])
    );
}

#[tokio::test]
async fn test_fragmentation_sess_setup() {
    let Some(pool) = test_pool().await else {
        eprintln!("Skipping test: TEST_DATABASE_URL not set");
        return;
    };
    let mut tx = pool.begin().await.unwrap();
    let backend = MockNetworkServerClient::new();
    let dev_eui = random_dev_eui();

    let mg = seed_multicast_group(
        &mut tx,
        Aes128Key([16, 15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1]),
        Aes128Key::default(),
        0,
        0,
        0,
    )
    .await;

    let mut fd = deployment(mg.id);
    fd.state = FuotaDeploymentState::FragmentationSessSetup;
    fd.payload = vec![1, 2, 3, 4, 5];
    fd.frag_size = 2;
    fd.redundancy = 10;
    fd.fragmentation_matrix = 3;
    fd.block_ack_delay = 4;
    fd.descriptor = Descriptor([1, 2, 3, 4]);
    storage::create_fuota_deployment_for_device(&mut tx, &mut fd, dev_eui)
        .await
        .unwrap();

    let mut rms = RemoteMulticastSetup {
        dev_eui,
        multicast_group_id: mg.id,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        mc_group_id: 0,
        mc_addr: mg.mc_addr,
        mc_key_encrypted: Aes128Key::default(),
        min_mc_f_cnt: 0,
        max_mc_f_cnt: 0,
        state: RemoteSyncState::Setup,
        state_provisioned: true,
        retry_after: Utc::now(),
        retry_count: 0,
        retry_interval_secs: 1,
    };
    storage::create_remote_multicast_setup(&mut tx, &mut rms)
        .await
        .unwrap();

    process_pending_deployments(&mut tx, &backend, &config())
        .await
        .unwrap();

    let items = storage::get_pending_remote_fragmentation_sessions(&mut tx, 10, 10)
        .await
        .unwrap();
    assert_eq!(items.len(), 1);

    let item = &items[0];
    assert_eq!(item.dev_eui, dev_eui);
    assert_eq!(item.frag_index, 0);
    assert_eq!(item.mc_group_ids, vec![0]);
    assert_eq!(item.nb_frag, 13);
    assert_eq!(item.frag_size, 2);
    assert_eq!(item.padding, 1);
    assert_eq!(item.fragmentation_matrix, 3);
    assert_eq!(item.block_ack_delay, 4);
    assert_eq!(item.descriptor, Descriptor([1, 2, 3, 4]));
    assert_eq!(item.state, RemoteSyncState::Setup);
    assert_eq!(item.retry_interval_secs, 1);

    let updated = storage::get_fuota_deployment(&mut tx, fd.id, false)
        .await
        .unwrap();
    assert_eq!(updated.state, FuotaDeploymentState::MulticastSessCSetup);
    assert!(updated.next_step_after > Utc::now());
}

#[tokio::test]
async fn test_fragmentation_sess_setup_multicast_setup_not_completed() {
    let Some(pool) = test_pool().await else {
        eprintln!("Skipping test: TEST_DATABASE_URL not set");
        return;
    };
    let mut tx = pool.begin().await.unwrap();
    let backend = MockNetworkServerClient::new();
    let dev_eui = random_dev_eui();

    let mg = seed_multicast_group(
        &mut tx,
        Aes128Key([16, 15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1]),
        Aes128Key::default(),
        0,
        0,
        0,
    )
    .await;

    let mut fd = deployment(mg.id);
    fd.state = FuotaDeploymentState::FragmentationSessSetup;
    fd.payload = vec![1, 2, 3, 4, 5];
    fd.frag_size = 2;
    fd.redundancy = 10;
    storage::create_fuota_deployment_for_device(&mut tx, &mut fd, dev_eui)
        .await
        .unwrap();

    let mut rms = RemoteMulticastSetup {
        dev_eui,
        multicast_group_id: mg.id,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        mc_group_id: 0,
        mc_addr: mg.mc_addr,
        mc_key_encrypted: Aes128Key::default(),
        min_mc_f_cnt: 0,
        max_mc_f_cnt: 0,
        state: RemoteSyncState::Setup,
        state_provisioned: false,
        retry_after: Utc::now(),
        retry_count: 0,
        retry_interval_secs: 1,
    };
    storage::create_remote_multicast_setup(&mut tx, &mut rms)
        .await
        .unwrap();

    process_pending_deployments(&mut tx, &backend, &config())
        .await
        .unwrap();

    // The unacknowledged device is excluded from the fragmentation stage.
    let items = storage::get_pending_remote_fragmentation_sessions(&mut tx, 10, 10)
        .await
        .unwrap();
    assert_eq!(items.len(), 0);
}

#[tokio::test]
async fn test_multicast_sess_c_setup() {
    let Some(pool) = test_pool().await else {
        eprintln!("Skipping test: TEST_DATABASE_URL not set");
        return;
    };
    let mut tx = pool.begin().await.unwrap();
    let backend = MockNetworkServerClient::new();
    let dev_eui = random_dev_eui();

    let mg = seed_multicast_group(
        &mut tx,
        Aes128Key::default(),
        Aes128Key::default(),
        0,
        868_100_000,
        5,
    )
    .await;

    let mut fd = deployment(mg.id);
    fd.state = FuotaDeploymentState::MulticastSessCSetup;
    fd.multicast_timeout = 8;
    storage::create_fuota_deployment_for_device(&mut tx, &mut fd, dev_eui)
        .await
        .unwrap();

    let mut rms = RemoteMulticastSetup {
        dev_eui,
        multicast_group_id: mg.id,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        mc_group_id: 0,
        mc_addr: mg.mc_addr,
        mc_key_encrypted: Aes128Key::default(),
        min_mc_f_cnt: 0,
        max_mc_f_cnt: 0,
        state: RemoteSyncState::Setup,
        state_provisioned: true,
        retry_after: Utc::now(),
        retry_count: 0,
        retry_interval_secs: 1,
    };
    storage::create_remote_multicast_setup(&mut tx, &mut rms)
        .await
        .unwrap();

    let mut rfs = fuota_core::storage::RemoteFragmentationSession {
        dev_eui,
        frag_index: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        mc_group_ids: vec![0],
        nb_frag: 0,
        frag_size: 0,
        fragmentation_matrix: 0,
        block_ack_delay: 0,
        padding: 0,
        descriptor: Descriptor::default(),
        state: RemoteSyncState::Setup,
        state_provisioned: true,
        retry_after: Utc::now(),
        retry_count: 0,
        retry_interval_secs: 1,
    };
    storage::create_remote_fragmentation_session(&mut tx, &mut rfs)
        .await
        .unwrap();

    process_pending_deployments(&mut tx, &backend, &config())
        .await
        .unwrap();

    let items = storage::get_pending_remote_multicast_class_c_sessions(&mut tx, 10, 10)
        .await
        .unwrap();
    assert_eq!(items.len(), 1);

    let item = &items[0];
    assert_eq!(item.dev_eui, dev_eui);
    assert_eq!(item.multicast_group_id, mg.id);
    assert_eq!(item.dl_frequency, 868_100_000);
    assert_eq!(item.dr, 5);
    assert_eq!(item.session_time_out, 8);
    assert_eq!(item.retry_interval_secs, 1);
    assert!(item.session_time > Utc::now());

    let updated = storage::get_fuota_deployment(&mut tx, fd.id, false)
        .await
        .unwrap();
    assert_eq!(updated.state, FuotaDeploymentState::Enqueue);
}

#[tokio::test]
async fn test_enqueue() {
    let Some(pool) = test_pool().await else {
        eprintln!("Skipping test: TEST_DATABASE_URL not set");
        return;
    };
    let mut tx = pool.begin().await.unwrap();
    let backend = MockNetworkServerClient::new();
    let dev_eui = random_dev_eui();

    let mg = seed_multicast_group(
        &mut tx,
        Aes128Key::default(),
        Aes128Key([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]),
        10,
        0,
        0,
    )
    .await;

    let mut fd = deployment(mg.id);
    fd.state = FuotaDeploymentState::Enqueue;
    fd.payload = vec![1, 2, 3, 4];
    fd.frag_size = 2;
    fd.redundancy = 1;
    storage::create_fuota_deployment_for_device(&mut tx, &mut fd, dev_eui)
        .await
        .unwrap();

    process_pending_deployments(&mut tx, &backend, &config())
        .await
        .unwrap();

    let items = backend.drain_multicast_queue();
    let expected: [(u32, [u8; 5]); 3] = [
        (10, [0xe2, 0xfc, 0x27, 0xb0, 0x1b]),
        (11, [0x60, 0x1a, 0x2d, 0x1d, 0x37]),
        (12, [0x76, 0x31, 0x39, 0xac, 0xae]),
    ];
    assert_eq!(items.len(), expected.len());
    for (item, (f_cnt, frm_payload)) in items.iter().zip(expected) {
        assert_eq!(item.multicast_group_id, mg.id);
        assert_eq!(item.f_cnt, f_cnt);
        assert_eq!(item.frm_payload, frm_payload);
        assert_eq!(item.f_port, fuota_applayer::fragmentation::DEFAULT_FPORT);
    }

    // the counter block is persisted under the same lock
    let mg = storage::get_multicast_group(&mut tx, mg.id, false)
        .await
        .unwrap();
    assert_eq!(mg.f_cnt, 13);

    let updated = storage::get_fuota_deployment(&mut tx, fd.id, false)
        .await
        .unwrap();
    assert_eq!(updated.state, FuotaDeploymentState::WaitingTx);
}

#[tokio::test]
async fn test_empty_deployment_still_advances() {
    let Some(pool) = test_pool().await else {
        eprintln!("Skipping test: TEST_DATABASE_URL not set");
        return;
    };
    let mut tx = pool.begin().await.unwrap();
    let backend = MockNetworkServerClient::new();
    let dev_eui = random_dev_eui();

    let mg = seed_multicast_group(
        &mut tx,
        Aes128Key::default(),
        Aes128Key::default(),
        0,
        0,
        0,
    )
    .await;

    // No multicast setup row is provisioned, the device filter matches
    // nothing; the stage still advances.
    let mut fd = deployment(mg.id);
    fd.state = FuotaDeploymentState::FragmentationSessSetup;
    fd.payload = vec![1, 2];
    fd.frag_size = 2;
    storage::create_fuota_deployment_for_device(&mut tx, &mut fd, dev_eui)
        .await
        .unwrap();

    process_pending_deployments(&mut tx, &backend, &config())
        .await
        .unwrap();

    let updated = storage::get_fuota_deployment(&mut tx, fd.id, false)
        .await
        .unwrap();
    assert_eq!(updated.state, FuotaDeploymentState::MulticastSessCSetup);
}

#[tokio::test]
async fn test_waiting_tx_is_surfaced_as_unexpected() {
    let Some(pool) = test_pool().await else {
        eprintln!("Skipping test: TEST_DATABASE_URL not set");
        return;
    };
    let mut tx = pool.begin().await.unwrap();
    let backend = MockNetworkServerClient::new();
    let dev_eui = random_dev_eui();

    let mg = seed_multicast_group(
        &mut tx,
        Aes128Key::default(),
        Aes128Key::default(),
        0,
        0,
        0,
    )
    .await;

    let mut fd = deployment(mg.id);
    fd.state = FuotaDeploymentState::WaitingTx;
    storage::create_fuota_deployment_for_device(&mut tx, &mut fd, dev_eui)
        .await
        .unwrap();

    let err = process_pending_deployments(&mut tx, &backend, &config())
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("unexpected state: WAITING_TX"));
}

#[tokio::test]
async fn test_fragmentation_sess_setup_zero_frag_size() {
    let Some(pool) = test_pool().await else {
        eprintln!("Skipping test: TEST_DATABASE_URL not set");
        return;
    };
    let mut tx = pool.begin().await.unwrap();
    let backend = MockNetworkServerClient::new();
    let dev_eui = random_dev_eui();

    let mg = seed_multicast_group(
        &mut tx,
        Aes128Key::default(),
        Aes128Key::default(),
        0,
        0,
        0,
    )
    .await;

    let mut fd = deployment(mg.id);
    fd.state = FuotaDeploymentState::FragmentationSessSetup;
    fd.payload = vec![1, 2, 3];
    fd.frag_size = 0;
    storage::create_fuota_deployment_for_device(&mut tx, &mut fd, dev_eui)
        .await
        .unwrap();

    let err = process_pending_deployments(&mut tx, &backend, &config())
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("FragSize must not be 0"));

    // the stage stays put until the configuration is corrected
    let updated = storage::get_fuota_deployment(&mut tx, fd.id, false)
        .await
        .unwrap();
    assert_eq!(updated.state, FuotaDeploymentState::FragmentationSessSetup);
}
