//! End-to-end tests: four in-process replicas over localhost TCP.
//!
//! Each test boots its own cluster on its own port range and temp
//! directory. Tests are serialized to keep listener ports and scheduler
//! load predictable.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;

use pbft_node::rpc::PeerClient;
use pbft_node::workload::WorkloadKind;
use pbft_node::{start, NodeHandle, NodeOptions};
use pbft_types::{
    encode_batch, method, pre_prepare_payload, Authenticator, CryptoScheme, Digest,
    GetStateChecksumArgs, GetStateChecksumReply, PrePrepareArgs, PrePrepareReply, ReplicaId,
};

const N: usize = 4;

fn addr(base_port: u16, id: u32) -> String {
    format!("127.0.0.1:{}", base_port + id as u16 - 1)
}

fn write_conf(dir: &Path, base_port: u16) -> PathBuf {
    let mut text = String::new();
    for id in 1..=N as u32 {
        text.push_str(&format!("{id} {}\n", addr(base_port, id)));
    }
    let path = dir.join("cluster.conf");
    std::fs::write(&path, text).unwrap();
    path
}

async fn boot_cluster(
    dir: &Path,
    base_port: u16,
    write_batch_size: usize,
    crypto: CryptoScheme,
) -> Vec<NodeHandle> {
    let conf = write_conf(dir, base_port);
    let mut handles = Vec::new();
    for id in 1..=N as u32 {
        let options = NodeOptions {
            write_batch_size,
            workers: 0, // no load driver; tests submit directly
            workload: WorkloadKind::YcsbC,
            crypto,
            data_dir: Some(dir.to_path_buf()),
            ..NodeOptions::new(ReplicaId(id), conf.clone())
        };
        handles.push(start(options).await.unwrap());
    }
    handles
}

async fn checksum_of(base_port: u16, id: u32) -> GetStateChecksumReply {
    let client = PeerClient::connect(&addr(base_port, id)).await.unwrap();
    client
        .call(method::GET_STATE_CHECKSUM, &GetStateChecksumArgs {})
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn missing_key_reports_literal() {
    let dir = TempDir::new().unwrap();
    let cluster = boot_cluster(dir.path(), 6200, 1, CryptoScheme::Ed25519).await;

    let response = cluster[0].submit("GET zzz").await;
    assert!(response.success);
    assert_eq!(response.value, "Key not found");
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn writes_are_visible_to_later_reads() {
    let dir = TempDir::new().unwrap();
    let cluster = boot_cluster(dir.path(), 6210, 1, CryptoScheme::Ed25519).await;
    let primary = &cluster[0];

    let response = primary.submit("SET x value42").await;
    assert!(response.success);
    assert_eq!(response.value, "OK");

    let response = primary.submit("GET x").await;
    assert_eq!(response.value, "value42");

    // Scenario from the protocol's happy path: a read against known state.
    assert_eq!(primary.submit("SET a 1").await.value, "OK");
    assert_eq!(primary.submit("GET a").await.value, "1");
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn lingering_submissions_batch_into_one_instance() {
    let dir = TempDir::new().unwrap();
    let cluster = boot_cluster(dir.path(), 6220, 3, CryptoScheme::Ed25519).await;
    let primary = &cluster[0];

    // Three submissions inside the linger window fill the batch exactly;
    // the GET observes the SET ahead of it in the same instance.
    let (first, second, third) = tokio::join!(
        primary.submit("SET a 1"),
        primary.submit("SET b 2"),
        primary.submit("GET a"),
    );
    assert_eq!(first.value, "OK");
    assert_eq!(second.value, "OK");
    assert_eq!(third.value, "1");
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn a_single_submission_flushes_on_the_linger_timer() {
    let dir = TempDir::new().unwrap();
    // Batch size far above what the test submits: only the timer flushes.
    let cluster = boot_cluster(dir.path(), 6230, 128, CryptoScheme::Ed25519).await;

    let response = cluster[0].submit("SET solo 1").await;
    assert_eq!(response.value, "OK");
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn replicas_converge_under_concurrent_load() {
    let dir = TempDir::new().unwrap();
    let cluster = boot_cluster(dir.path(), 6240, 8, CryptoScheme::Ed25519).await;
    let mut handles = cluster.into_iter();
    let primary = Arc::new(handles.next().unwrap());
    // The backup handles must stay alive for the duration of the test.
    let _backups: Vec<NodeHandle> = handles.collect();

    let mut tasks = tokio::task::JoinSet::new();
    for worker in 0..20u32 {
        let primary = primary.clone();
        tasks.spawn(async move {
            for i in 0..10u32 {
                let key = ["x", "y", "z", "a", "b", "c"][(worker as usize + i as usize) % 6];
                let response = if i % 3 == 0 {
                    primary.submit(format!("GET {key}")).await
                } else {
                    primary.submit(format!("SET {key} value{worker}_{i}")).await
                };
                assert!(response.success);
            }
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }

    // Replies prove f+1 replicas executed; give the rest a beat to finish.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let reference = checksum_of(6240, 1).await;
    assert!(reference.count > 0);
    for id in 2..=N as u32 {
        assert_eq!(checksum_of(6240, id).await, reference, "replica {id} diverged");
    }
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn tampered_pre_prepare_is_rejected_but_cluster_progresses() {
    let dir = TempDir::new().unwrap();
    let cluster = boot_cluster(dir.path(), 6250, 1, CryptoScheme::Ed25519).await;

    // Forge a pre-prepare as the primary would sign it, then corrupt one
    // bit of the signature in "transit" to backup 2.
    let replicas: Vec<ReplicaId> = (1..=N as u32).map(ReplicaId).collect();
    let primary_auth = Authenticator::derive(CryptoScheme::Ed25519, ReplicaId(1), &replicas);
    let command = encode_batch(&[b"SET planted 1".to_vec()]);
    let digest = Digest::of(&command);
    let seq = 1000; // far from anything the cluster assigns itself
    let mut signature = primary_auth
        .sign(ReplicaId(2), &pre_prepare_payload(0, seq, &digest))
        .unwrap();
    signature[0] ^= 0x01;

    let backup = PeerClient::connect(&addr(6250, 2)).await.unwrap();
    let reply: PrePrepareReply = backup
        .call(
            method::PRE_PREPARE,
            &PrePrepareArgs {
                view: 0,
                seq,
                digest,
                command,
                signature,
            },
        )
        .await
        .unwrap();
    assert!(!reply.success, "tampered signature must be dropped");

    // The cluster is unbothered: normal submissions still commit.
    let response = cluster[0].submit("SET live 1").await;
    assert_eq!(response.value, "OK");
    let response = cluster[0].submit("GET live").await;
    assert_eq!(response.value, "1");

    // The planted command never executed anywhere.
    let response = cluster[0].submit("GET planted").await;
    assert_eq!(response.value, "Key not found");
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn mac_cluster_reaches_agreement() {
    let dir = TempDir::new().unwrap();
    let cluster = boot_cluster(dir.path(), 6260, 1, CryptoScheme::Mac).await;

    assert_eq!(cluster[0].submit("SET m 7").await.value, "OK");
    assert_eq!(cluster[0].submit("GET m").await.value, "7");

    tokio::time::sleep(Duration::from_millis(500)).await;
    let reference = checksum_of(6260, 1).await;
    assert_eq!(reference.count, 1);
    for id in 2..=N as u32 {
        assert_eq!(checksum_of(6260, id).await, reference);
    }
}
