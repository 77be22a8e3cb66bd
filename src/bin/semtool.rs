//! Inspect, remove, or drive System V semaphore sets from the shell.

use std::io::{self, BufRead};
use std::path::Path;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use semset::{Backend, Key, Semaphore, Status, SysV, NSEMS};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "semtool", about = "Named process-shared semaphores")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the value, attachment count, lock and initialization state of a set.
    Status {
        /// Decimal or 0x-prefixed key, or a path to derive one from.
        key: String,
    },

    /// Destroy a set even if processes are still attached.
    Remove {
        /// Decimal or 0x-prefixed key, or a path to derive one from.
        key: String,
    },

    /// Attach, then run one command per stdin line: wait, signal, op <n>,
    /// status, close, exit, abort.
    Shell {
        /// Decimal or 0x-prefixed key, or a path to derive one from.
        key: String,

        /// Create the set with this initial value if it does not exist.
        #[arg(long)]
        create: Option<i32>,
    },
}

fn parse_key(arg: &str) -> semset::Result<Key> {
    if let Some(hex) = arg.strip_prefix("0x") {
        if let Ok(raw) = u32::from_str_radix(hex, 16) {
            return Key::new(raw as i32);
        }
    }
    match arg.parse::<i32>() {
        Ok(raw) => Key::new(raw),
        Err(_) => Key::from_path(Path::new(arg), 1),
    }
}

fn print_status(status: &Status) {
    println!(
        "ok value={} attachments={} locked={} initialized={}",
        status.value, status.attachments, status.locked, status.initialized
    );
}

fn shell(key: Key, create: Option<i32>) -> semset::Result<()> {
    let mut sem = Some(match create {
        Some(value) => Semaphore::create(key, value)?,
        None => Semaphore::open(key)?,
    });
    println!("ready");

    for line in io::stdin().lock().lines() {
        let line = line?;
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            continue;
        };
        match cmd {
            "exit" => std::process::exit(0),
            "abort" => std::process::abort(),
            _ => (),
        }
        let Some(handle) = sem.as_ref() else {
            println!("err closed");
            continue;
        };
        let result = match cmd {
            "wait" => handle.wait(),
            "signal" => handle.signal(),
            "op" => match words.next().map(str::parse::<i32>) {
                Some(Ok(delta)) => handle.op(delta),
                _ => {
                    println!("err usage: op <delta>");
                    continue;
                }
            },
            "status" => match handle.status() {
                Ok(status) => {
                    print_status(&status);
                    continue;
                }
                Err(err) => Err(err),
            },
            "close" => sem.take().map_or(Ok(()), Semaphore::close),
            other => {
                println!("err unknown command {}", other);
                continue;
            }
        };
        match result {
            Ok(()) => println!("ok"),
            Err(err) => println!("err {}", err),
        }
    }
    Ok(())
}

fn run(cli: Cli) -> semset::Result<()> {
    match cli.command {
        Command::Status { key } => {
            let status = Status::lookup(&SysV, parse_key(&key)?)?;
            print_status(&status);
        }
        Command::Remove { key } => {
            let id = SysV.get_only(parse_key(&key)?, NSEMS)?;
            SysV.destroy(id)?;
            println!("ok");
        }
        Command::Shell { key, create } => shell(parse_key(&key)?, create)?,
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("semtool: {}", err);
            ExitCode::FAILURE
        }
    }
}
