// Writer timeout and reader eviction.
// Timing-sensitive, so these run serially.

use kzimp::{Channel, ChannelError, ChecksumMode, ReaderState};
use serial_test::serial;
use std::time::{Duration, Instant};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
#[serial]
fn test_stalled_reader_is_evicted() {
    init_logger();
    let ch = Channel::create(2, 16, 200, ChecksumMode::HeaderAndPayload).unwrap();
    let mut w = ch.become_writer().unwrap();
    let mut a = ch.join_reader().unwrap();

    let start = Instant::now();
    w.send("m1").unwrap();
    w.send("m2").unwrap();
    assert!(start.elapsed() < Duration::from_millis(150));

    let start = Instant::now();
    assert_eq!(w.send("m3").unwrap(), 2);
    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(190), "waited only {:?}", waited);

    assert_eq!(a.state(), ReaderState::Offline);
    let r = a.readiness();
    assert!(r.hangup);
    assert!(!r.readable);

    let mut buf = [0u8; 16];
    assert!(matches!(a.recv(&mut buf), Err(ChannelError::Gone)));
    assert!(matches!(a.try_recv(&mut buf), Err(ChannelError::Gone)));

    // bit stays reserved until the evicted handle leaves
    let s = ch.stats();
    assert_eq!(s.multicast_mask, 0);
    assert_eq!(s.reader_count, 1);
    assert_eq!(s.online_readers, 0);
    assert_eq!(ch.offline_mask(), 0b1);

    let mut b = ch.join_reader().unwrap();
    assert_eq!(b.bit(), 1);
    a.leave();
    assert_eq!(ch.offline_mask(), 0);

    // evicted reader no longer holds up the writer
    let start = Instant::now();
    w.send("m4").unwrap();
    assert!(start.elapsed() < Duration::from_millis(150));
    assert_eq!(b.recv_vec().unwrap(), b"m4");
}

#[test]
#[serial]
fn test_only_laggards_are_evicted() {
    init_logger();
    let ch = Channel::create(2, 16, 150, ChecksumMode::None).unwrap();
    let mut w = ch.become_writer().unwrap();
    let mut fast = ch.join_reader().unwrap();
    let mut slow = ch.join_reader().unwrap();

    w.send("a").unwrap();
    w.send("b").unwrap();
    assert_eq!(fast.recv_vec().unwrap(), b"a");
    assert_eq!(fast.recv_vec().unwrap(), b"b");

    w.send("c").unwrap();
    assert!(fast.is_online());
    assert!(!slow.is_online());
    assert_eq!(fast.recv_vec().unwrap(), b"c");
    assert!(matches!(slow.recv_vec(), Err(ChannelError::Gone)));
    assert_eq!(ch.stats().multicast_mask, 1 << fast.bit());
}

#[test]
#[serial]
fn test_blocked_evicted_reader_wakes_with_gone() {
    init_logger();
    let ch = Channel::create(1, 16, 100, ChecksumMode::None).unwrap();
    let mut w = ch.become_writer().unwrap();
    let mut holder = ch.join_reader().unwrap();

    w.send("first").unwrap();
    // hold the slot without finishing it
    let view = holder.start_read().unwrap();
    assert_eq!(&*view, b"first");
    drop(view);

    w.send("second").unwrap();
    assert!(!holder.is_online());
    assert!(matches!(holder.start_read(), Err(ChannelError::Gone)));
}

#[test]
#[serial]
fn test_eviction_of_waiting_reader_thread() {
    init_logger();
    let ch = Channel::create(2, 16, 100, ChecksumMode::None).unwrap();
    let mut w = ch.become_writer().unwrap();
    let mut lagging = ch.join_reader().unwrap();
    let mut waiting = ch.join_reader().unwrap();

    w.send("1").unwrap();
    w.send("2").unwrap();
    assert_eq!(waiting.recv_vec().unwrap(), b"1");
    assert_eq!(waiting.recv_vec().unwrap(), b"2");

    let t = std::thread::spawn(move || {
        let first = waiting.recv_vec();
        (first, waiting)
    });

    // evicts `lagging`, then delivers "3" to the waiting thread
    w.send("3").unwrap();
    let (first, waiting) = t.join().unwrap();
    assert_eq!(first.unwrap(), b"3");
    assert!(waiting.is_online());
    assert!(matches!(lagging.recv_vec(), Err(ChannelError::Gone)));
}
