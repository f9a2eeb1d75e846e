// In demos/eviction.rs
// A reader that stops reading is evicted once the writer wraps the ring.
use kzimp::{Channel, ChannelError, ChecksumMode};
use std::time::Instant;

fn main() -> kzimp::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

    let channel = Channel::create(2, 64, 200, ChecksumMode::HeaderAndPayload)?;
    let mut writer = channel.become_writer()?;
    let mut sleeper = channel.join_reader()?;
    let mut active = channel.join_reader()?;

    for i in 0..4 {
        let start = Instant::now();
        writer.send(format!("m{}", i))?;
        println!("send m{} took {:?}", i, start.elapsed());
        println!("active got {:?}", String::from_utf8_lossy(&active.recv_vec()?));
    }

    match sleeper.recv_vec() {
        Err(ChannelError::Gone) => println!("sleeper was evicted: {:?}", sleeper.readiness()),
        other => println!("unexpected: {:?}", other),
    }
    println!("Stats: {:?}", channel.stats());
    Ok(())
}
