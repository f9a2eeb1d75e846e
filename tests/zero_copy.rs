// In-place reads through ZeroCopyView.

use kzimp::Multicast::Buffer::SlotIndex;
use kzimp::{Channel, ChannelError, ChecksumMode};
use std::time::{Duration, Instant};

#[test]
fn test_view_reads_in_place() {
    let ch = Channel::create(4, 32, 500, ChecksumMode::HeaderAndPayload).unwrap();
    let mut w = ch.become_writer().unwrap();
    let mut r = ch.join_reader().unwrap();

    w.send("zero copy").unwrap();
    let view = r.start_read().unwrap();
    assert_eq!(view.index().get(), 0);
    assert_eq!(&*view, b"zero copy");
    assert_eq!(view.len(), 9);
    view.finish().unwrap();

    assert_eq!(r.next_read_idx().get(), 1);
    assert!(r.held().is_none());
    assert!(matches!(r.try_start_read(), Err(ChannelError::WouldBlock)));
}

#[test]
fn test_unfinished_view_is_returned_again() {
    let ch = Channel::create(4, 32, 500, ChecksumMode::None).unwrap();
    let mut w = ch.become_writer().unwrap();
    let mut r = ch.join_reader().unwrap();

    w.send("first").unwrap();
    w.send("second").unwrap();

    let view = r.start_read().unwrap();
    let idx = view.index();
    drop(view);
    assert_eq!(r.held(), Some(idx));
    assert!(r.poll_readable());

    // same message again, through either read path
    let view = r.try_start_read().unwrap();
    assert_eq!(view.index(), idx);
    assert_eq!(&*view, b"first");
    drop(view);
    assert_eq!(r.recv_vec().unwrap(), b"first");
    assert_eq!(r.recv_vec().unwrap(), b"second");
}

#[test]
fn test_finish_read_by_index() {
    let ch = Channel::create(2, 8, 500, ChecksumMode::None).unwrap();
    let mut w = ch.become_writer().unwrap();
    let mut r = ch.join_reader().unwrap();

    w.send("abc").unwrap();
    let idx = r.start_read().unwrap().index();
    assert!(matches!(
        r.finish_read(SlotIndex(1)),
        Err(ChannelError::NotHeld(_))
    ));
    r.finish_read(idx).unwrap();
    assert!(matches!(r.finish_read(idx), Err(ChannelError::NotHeld(_))));
}

#[test]
fn test_held_view_stalls_writer_until_finished() {
    let ch = Channel::create(1, 8, 5_000, ChecksumMode::None).unwrap();
    let mut r = ch.join_reader().unwrap();
    let writer_ch = ch.clone();

    let mut w = writer_ch.become_writer().unwrap();
    w.send("one").unwrap();

    let view = r.start_read().unwrap();
    assert_eq!(&*view, b"one");

    let t = std::thread::spawn(move || {
        let start = Instant::now();
        let n = w.send("two").unwrap();
        (n, start.elapsed())
    });

    std::thread::sleep(Duration::from_millis(50));
    view.finish().unwrap();

    let (n, waited) = t.join().unwrap();
    assert_eq!(n, 3);
    assert!(waited >= Duration::from_millis(40));
    assert!(waited < Duration::from_secs(4));
    assert!(r.is_online());
    assert_eq!(r.recv_vec().unwrap(), b"two");
}
