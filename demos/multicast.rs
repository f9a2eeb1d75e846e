// In demos/multicast.rs
// One writer fans messages out to several reader threads until Ctrl-C.
// Channel geometry comes from KZIMP_* environment variables.
use kzimp::{CancelToken, ChannelBuilder, ChannelError};
use std::env;
use std::thread;
use std::time::Duration;

fn main() -> kzimp::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let readers: usize = if args.len() > 1 {
        args[1].parse().unwrap_or(3)
    } else {
        3
    };

    let channel = ChannelBuilder::from_env()?.build()?;
    let stop = CancelToken::ctrlc()?;
    println!("Multicast: {:?}", channel);

    let mut handles = Vec::new();
    for _ in 0..readers {
        let reader = channel.join_reader()?.with_cancel_token(stop.clone());
        handles.push(thread::spawn(move || {
            let mut reader = reader;
            let bit = reader.bit();
            let mut received = 0u64;
            loop {
                match reader.recv_vec() {
                    Ok(msg) => {
                        received += 1;
                        println!("reader {}: {}", bit, String::from_utf8_lossy(&msg));
                    }
                    Err(ChannelError::Interrupted) => break,
                    Err(e) => {
                        eprintln!("reader {}: {}", bit, e);
                        break;
                    }
                }
            }
            received
        }));
    }

    let mut writer = channel.become_writer()?.with_cancel_token(stop.clone());
    let mut seq = 0u64;
    while !stop.is_cancelled() {
        match writer.send(format!("message {}", seq)) {
            Ok(_) => seq += 1,
            Err(ChannelError::Interrupted) => break,
            Err(e) => return Err(e),
        }
        thread::sleep(Duration::from_millis(250));
    }

    for h in handles {
        if let Ok(n) = h.join() {
            println!("reader finished after {} messages", n);
        }
    }
    println!("Stats: {:?}", channel.stats());
    Ok(())
}
