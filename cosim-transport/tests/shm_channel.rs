use std::path::Path;

use cosim_core::{Channel, ChannelParams, MsgType, SyncMode, SyncOutcome, TransportError};
use cosim_transport::ShmChannel;

fn params(dir: &Path, sync_mode: SyncMode) -> ChannelParams {
    ChannelParams {
        sync_mode,
        sync_interval_ns: 500,
        link_latency_ns: 500,
        queue_entries: 8,
        entry_size: 256,
        ..ChannelParams::new(dir.join("link.sock"))
    }
}

fn handshake(a: &mut ShmChannel, b: &mut ShmChannel) -> Result<(), TransportError> {
    let (mut a_done, mut b_done) = (false, false);
    for _ in 0..1_000 {
        a_done = a_done || a.poll_connected()?;
        b_done = b_done || b.poll_connected()?;
        if a_done && b_done {
            return Ok(());
        }
    }
    panic!("handshake did not complete");
}

fn pair(dir: &Path, listener: SyncMode, connector: SyncMode) -> (ShmChannel, ShmChannel) {
    // Connector first: it must tolerate the socket not existing yet.
    let mut b = ShmChannel::connect(params(dir, connector)).unwrap();
    assert!(!b.poll_connected().unwrap());
    assert!(b.handshake_fd().is_none());

    let mut a = ShmChannel::listen(params(dir, listener), &dir.join("link-shm")).unwrap();
    handshake(&mut a, &mut b).unwrap();
    (a, b)
}

#[test]
fn connector_started_before_listener_still_connects() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = pair(dir.path(), SyncMode::Required, SyncMode::Optional);
    assert!(a.is_connected() && b.is_connected());
    assert!(a.sync_enabled() && b.sync_enabled());
    assert!(a.intro_fd().is_some());
}

#[test]
fn intros_are_exchanged_over_the_socket() {
    let dir = tempfile::tempdir().unwrap();
    let (mut a, mut b) = pair(dir.path(), SyncMode::Optional, SyncMode::Optional);
    assert!(!a.sync_enabled());

    a.intro_send(b"from listener").unwrap();
    b.intro_send(b"from connector").unwrap();

    assert_eq!(&b.intro_recv().unwrap().unwrap()[..], b"from listener");
    assert_eq!(&a.intro_recv().unwrap().unwrap()[..], b"from connector");
    assert!(a.intro_recv().unwrap().is_none());
}

#[test]
fn oversized_intro_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let (mut a, _b) = pair(dir.path(), SyncMode::Disabled, SyncMode::Disabled);
    assert!(matches!(
        a.intro_send(&[0u8; 5000]),
        Err(TransportError::IntroTooLarge { len: 5000, .. })
    ));
}

#[test]
fn required_against_disabled_fails_on_both_sides() {
    let dir = tempfile::tempdir().unwrap();
    let mut b = ShmChannel::connect(params(dir.path(), SyncMode::Disabled)).unwrap();
    let mut a =
        ShmChannel::listen(params(dir.path(), SyncMode::Required), &dir.path().join("shm")).unwrap();

    let mut a_err = None;
    let mut b_err = None;
    for _ in 0..1_000 {
        if a_err.is_none() {
            a_err = a.poll_connected().err();
        }
        if b_err.is_none() {
            b_err = b.poll_connected().err();
        }
        if a_err.is_some() && b_err.is_some() {
            break;
        }
    }
    assert!(matches!(a_err, Some(TransportError::IncompatibleSync { .. })));
    assert!(matches!(b_err, Some(TransportError::IncompatibleSync { .. })));
}

#[test]
fn synchronized_receive_is_gated_by_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let (mut a, mut b) = pair(dir.path(), SyncMode::Required, SyncMode::Required);

    let slot = a.out_alloc(1_000).unwrap();
    a.out_send(slot, MsgType::Packet, 7, &[0x5a; 64]);

    assert_eq!(b.in_timestamp(), 1_500);
    assert!(b.in_poll(1_000).is_none());

    let msg = b.in_poll(1_500).unwrap();
    assert_eq!(msg.msg_type(), Ok(MsgType::Packet));
    assert_eq!(msg.port, 7);
    assert_eq!(&msg.payload[..], &[0x5a; 64][..]);
    b.in_done();
    assert_eq!(b.in_timestamp(), 0);
}

#[test]
fn free_running_receive_ignores_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let (mut a, mut b) = pair(dir.path(), SyncMode::Disabled, SyncMode::Optional);

    let slot = b.out_alloc(10_000).unwrap();
    b.out_send(slot, MsgType::Packet, 0, b"late");
    let msg = a.in_poll(0).unwrap();
    assert_eq!(msg.timestamp_ns, 10_500);
    a.in_done();
    assert_eq!(b.out_sync(50_000), SyncOutcome::NotDue);
}

#[test]
fn heartbeats_follow_the_interval() {
    let dir = tempfile::tempdir().unwrap();
    let (mut a, mut b) = pair(dir.path(), SyncMode::Required, SyncMode::Required);

    assert_eq!(a.out_sync(0), SyncOutcome::Sent);
    assert_eq!(a.out_sync(100), SyncOutcome::NotDue);
    assert_eq!(a.out_next_sync(), 500);
    assert_eq!(a.out_sync(500), SyncOutcome::Sent);

    let first = b.in_poll(500).unwrap();
    assert_eq!(first.msg_type(), Ok(MsgType::Sync));
    assert_eq!(first.timestamp_ns, 500);
    b.in_done();
    assert_eq!(b.in_timestamp(), 1_000);
}

#[test]
fn full_ring_reports_full() {
    let dir = tempfile::tempdir().unwrap();
    let (mut a, _b) = pair(dir.path(), SyncMode::Required, SyncMode::Required);

    for i in 0..8 {
        let slot = a.out_alloc(i).unwrap();
        a.out_send(slot, MsgType::Packet, 0, b"x");
    }
    assert!(a.out_alloc(8).is_none());
    assert_eq!(a.out_sync(10_000), SyncOutcome::Full);
}

#[test]
fn close_sends_one_terminate_and_listener_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let sock = dir.path().join("link.sock");
    let shm = dir.path().join("link-shm");
    let (mut a, mut b) = pair(dir.path(), SyncMode::Disabled, SyncMode::Disabled);

    b.close(2_000);
    b.close(3_000);

    let msg = a.in_poll(0).unwrap();
    assert_eq!(msg.msg_type(), Ok(MsgType::Terminate));
    a.in_done();
    assert!(a.in_poll(0).is_none());

    assert!(sock.exists() && shm.exists());
    drop(a);
    assert!(!sock.exists());
    assert!(!shm.exists());
}

#[test]
fn empty_socket_path_is_invalid() {
    assert!(matches!(
        ShmChannel::connect(ChannelParams::new("")),
        Err(TransportError::InvalidPath(_))
    ));
}

#[test]
fn listener_refuses_unusable_ring_shapes() {
    let dir = tempfile::tempdir().unwrap();
    let shm = dir.path().join("shape-shm");
    for (queue_entries, entry_size) in [(0, 256), (8, 64), (8, 64 + 65_536), (usize::MAX, 256)] {
        let params = ChannelParams {
            queue_entries,
            entry_size,
            ..params(dir.path(), SyncMode::Disabled)
        };
        assert!(
            matches!(
                ShmChannel::listen(params, &shm),
                Err(TransportError::RingShape { .. })
            ),
            "{queue_entries} x {entry_size} accepted"
        );
    }
    assert!(!shm.exists());
    assert!(!dir.path().join("link.sock").exists());
}

#[test]
fn smallest_usable_ring_connects() {
    let dir = tempfile::tempdir().unwrap();
    let shape = |sync| ChannelParams {
        queue_entries: 1,
        entry_size: 128,
        ..params(dir.path(), sync)
    };
    let mut b = ShmChannel::connect(shape(SyncMode::Disabled)).unwrap();
    let mut a = ShmChannel::listen(shape(SyncMode::Disabled), &dir.path().join("shm")).unwrap();
    handshake(&mut a, &mut b).unwrap();

    assert_eq!(a.max_payload_len(), 64);
    assert_eq!(a.in_timestamp(), 0);
    let slot = b.out_alloc(0).unwrap();
    b.out_send(slot, MsgType::Packet, 0, b"tiny");
    assert_eq!(&a.in_poll(0).unwrap().payload[..], b"tiny");
}
