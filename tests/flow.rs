//! End-to-end runs against the loopback fabric.

use anyhow::Result;

use rdma_client::client::{self, exit_status};
use rdma_client::fabric::sim::{Call, SimConfig, SimFabric};
use rdma_client::ClientConfig;

fn cfg(msg_size: usize) -> ClientConfig {
    ClientConfig {
        msg_size,
        ..Default::default()
    }
}

fn position(calls: &[Call], call: Call) -> Option<usize> {
    calls.iter().position(|c| *c == call)
}

#[test]
fn matching_payload() -> Result<()> {
    let fabric = SimFabric::default();
    let result = client::run(&fabric, &cfg(64 << 10));
    assert_eq!(exit_status(&result, false), 0);

    let report = result?;
    assert!(report.all_same());
    assert_eq!(report.bytes(), 64 << 10);
    assert_eq!(report.preview(), &(0u8..20).collect::<Vec<_>>()[..]);

    let text = report.to_string();
    assert!(text.contains("is all same: YES"));
    assert!(!text.contains("error: mismatch"));
    assert!(text.contains("Throughput: "));
    assert!(text.ends_with(&format!("Latency: {} us", report.latency_us())));
    assert_eq!(fabric.live_resources(), 0);
    Ok(())
}

#[test]
#[ignore = "moves 1 GiB"]
fn matching_payload_1gib() -> Result<()> {
    let fabric = SimFabric::new(SimConfig::default().granted_inline(1 << 30));
    let result = client::run(&fabric, &ClientConfig::default());
    assert_eq!(exit_status(&result, false), 0);

    let report = result?;
    assert_eq!(report.bytes(), 1_073_741_824);
    assert!(report.to_string().contains("is all same: YES"));
    Ok(())
}

#[test]
fn mismatch_at_index_5() -> Result<()> {
    let fabric = SimFabric::new(SimConfig::default().corrupt(5, 99));
    let result = client::run(&fabric, &cfg(4096));

    // Reported, not a failure, unless asked otherwise.
    assert_eq!(exit_status(&result, false), 0);
    assert_eq!(exit_status(&result, true), 1);

    let report = result?;
    assert!(!report.all_same());
    let first = report.verification().first_mismatch().unwrap();
    assert_eq!((first.index, first.expected, first.actual), (5, 5, 99));
    assert_eq!(report.verification().mismatch_count(), 1);

    let text = report.to_string();
    assert!(text.contains("error: mismatch at index 5, expect 5, actual 99\n"));
    assert!(text.contains("is all same: NO"));
    Ok(())
}

#[test]
fn recv_posted_before_connect() -> Result<()> {
    let fabric = SimFabric::new(SimConfig::default().pending_polls(50));
    client::run(&fabric, &cfg(4096))?;

    let calls = fabric.calls();
    let post = position(&calls, Call::PostRecv(0)).unwrap();
    let connect = position(&calls, Call::Connect).unwrap();
    assert!(post < connect);

    let polls = calls.iter().filter(|c| **c == Call::PollRecv).count();
    assert_eq!(polls, 51);
    Ok(())
}

#[test]
fn sge_sends_register_send_buffer() -> Result<()> {
    // 256-byte inline threshold, 4 KiB message.
    let fabric = SimFabric::default();
    client::run(&fabric, &cfg(4096))?;
    assert_eq!(
        fabric.calls(),
        vec![
            Call::Resolve,
            Call::CreateEp,
            Call::RegMsgs(0),
            Call::RegMsgs(1),
            Call::PostRecv(0),
            Call::Connect,
            Call::PollRecv,
            Call::Disconnect,
            Call::DeregMr(1),
            Call::DeregMr(0),
            Call::DestroyEp,
            Call::FreeAddrInfo,
        ]
    );
    Ok(())
}

#[test]
fn inline_sends_skip_send_buffer() -> Result<()> {
    let fabric = SimFabric::new(SimConfig::default().granted_inline(4096));
    client::run(&fabric, &cfg(4096))?;
    assert_eq!(
        fabric.calls(),
        vec![
            Call::Resolve,
            Call::CreateEp,
            Call::RegMsgs(0),
            Call::PostRecv(0),
            Call::Connect,
            Call::PollRecv,
            Call::Disconnect,
            Call::DeregMr(0),
            Call::DestroyEp,
            Call::FreeAddrInfo,
        ]
    );
    Ok(())
}

#[test]
fn send_path() -> Result<()> {
    let send_cfg = ClientConfig {
        send: true,
        ..cfg(4096)
    };

    let fabric = SimFabric::default();
    client::run(&fabric, &send_cfg)?;
    let calls = fabric.calls();
    let send = position(&calls, Call::PostSend { inline: false }).unwrap();
    assert!(position(&calls, Call::Connect).unwrap() < send);
    assert!(send < position(&calls, Call::PollSend).unwrap());
    assert!(position(&calls, Call::PollSend).unwrap() < position(&calls, Call::PollRecv).unwrap());

    let fabric = SimFabric::new(SimConfig::default().granted_inline(4096));
    client::run(&fabric, &send_cfg)?;
    assert!(fabric.calls().contains(&Call::PostSend { inline: true }));
    assert_eq!(fabric.live_resources(), 0);
    Ok(())
}

#[test]
fn short_message() -> Result<()> {
    // The peer sends less than the receive buffer holds; the tail stays zero.
    let fabric = SimFabric::new(SimConfig::default().payload_len(1024));
    let report = client::run(&fabric, &cfg(4096))?;
    assert!(!report.all_same());
    assert_eq!(report.verification().first_mismatch().map(|m| m.index), Some(1025));
    Ok(())
}
