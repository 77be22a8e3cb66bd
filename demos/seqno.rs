//! Several processes take turns bumping a number stored in a file. Each
//! read-modify-write happens between `wait` and `signal`, so no update is
//! lost.
//!
//! ```text
//! cargo run --example seqno -- --workers 4
//! ```

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::process::Command;

use clap::Parser;
use semset::{Key, Semaphore};
use tracing_subscriber::EnvFilter;

const SEMKEY: i32 = 23456;

#[derive(Parser)]
struct Args {
    /// File holding the sequence number.
    #[arg(long, default_value = "seqno")]
    file: PathBuf,

    /// Number of worker processes to start.
    #[arg(long, default_value_t = 2)]
    workers: u32,

    /// Increments per worker.
    #[arg(long, default_value_t = 20)]
    rounds: u32,

    /// Run as a worker instead of spawning them.
    #[arg(long, hide = true)]
    worker: bool,
}

fn worker(args: &Args) -> semset::Result<()> {
    let pid = std::process::id();
    let mut file = OpenOptions::new().read(true).write(true).open(&args.file)?;
    let sem = Semaphore::create(Key::new(SEMKEY)?, 1)?;

    let mut buf = String::new();
    for _ in 0..args.rounds {
        sem.wait()?;

        buf.clear();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_string(&mut buf)?;
        let seqno: u32 = buf.trim().parse().unwrap_or(0);
        println!("pid = {}, seq number = {}", pid, seqno);

        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{:03}", seqno + 1)?;
        file.flush()?;

        sem.signal()?;
    }

    sem.close()
}

fn main() -> semset::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if args.worker {
        return worker(&args);
    }

    fs::write(&args.file, "000\n")?;
    let exe = std::env::current_exe()?;
    let children = (0..args.workers)
        .map(|_| {
            Command::new(&exe)
                .arg("--worker")
                .arg("--file")
                .arg(&args.file)
                .arg("--rounds")
                .arg(args.rounds.to_string())
                .spawn()
        })
        .collect::<Result<Vec<_>, _>>()?;
    for mut child in children {
        child.wait()?;
    }

    let last = fs::read_to_string(&args.file)?;
    println!("final seq number = {}", last.trim());
    Ok(())
}
