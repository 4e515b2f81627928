//! MiniKV - Interactive Shell
//! Maps text commands one-to-one onto the storage engine.
//!
//! Usage: `minikv [data_dir]` (defaults to `./minikv_data`)

use std::io::{self, BufRead, Write};

use minikv::{Config, MiniKv};

fn print_usage() {
    println!("  Commands:");
    println!("    put <key> <value>  - Store a key-value pair");
    println!("    get <key>          - Retrieve a value by key");
    println!("    del <key>          - Delete a key");
    println!("    flush              - Flush the memtable to a new SSTable");
    println!("    snapshot           - Copy the data directory into snapshots/");
    println!("    stats              - Show engine statistics");
    println!("    help               - Show this help");
    println!("    exit               - Shutdown engine");
}

fn main() {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(dir) => Config::new(dir),
        None => Config::default(),
    };

    let engine = match MiniKv::open(config) {
        Ok(e) => e,
        Err(err) => {
            eprintln!("[ERROR] Failed to open engine: {}", err);
            std::process::exit(1);
        }
    };

    println!("MiniKV - Lightweight Key-Value Store");
    println!("Type 'help' for commands\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();

    loop {
        print!("minikv> ");
        if stdout.flush().is_err() {
            break;
        }

        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(err) => {
                eprintln!("[ERROR] Failed to read input: {}", err);
                break;
            }
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        match parts[0].to_lowercase().as_str() {
            "put" => {
                if parts.len() < 3 {
                    println!("  Usage: put <key> <value>");
                    continue;
                }
                let key = parts[1].as_bytes().to_vec();
                let value = parts[2..].join(" ").into_bytes();
                match engine.put(key, value) {
                    Ok(()) => println!("  OK"),
                    Err(e) => println!("  ERROR: {}", e),
                }
            }
            "get" => {
                if parts.len() < 2 {
                    println!("  Usage: get <key>");
                    continue;
                }
                match engine.get(parts[1].as_bytes()) {
                    Ok(Some(value)) => println!("  {}", String::from_utf8_lossy(&value)),
                    Ok(None) => println!("  Key not found"),
                    Err(e) => println!("  ERROR: {}", e),
                }
            }
            "del" | "delete" => {
                if parts.len() < 2 {
                    println!("  Usage: del <key>");
                    continue;
                }
                match engine.delete(parts[1].as_bytes()) {
                    Ok(()) => println!("  OK"),
                    Err(e) => println!("  ERROR: {}", e),
                }
            }
            "flush" => match engine.flush() {
                Ok(()) => println!("  Memtable flushed"),
                Err(e) => println!("  ERROR: {}", e),
            },
            "snapshot" => match engine.snapshot() {
                Ok(meta) => println!("  Snapshot {} created at {}", meta.id, meta.path.display()),
                Err(e) => println!("  ERROR: {}", e),
            },
            "stats" | "info" => {
                println!("  Memtable keys: {}", engine.len());
                println!("  Memtable size: {} bytes", engine.memtable_size());
                println!("  SSTables:      {}", engine.sstable_count());
                for line in engine.metrics().report().lines() {
                    println!("  {}", line);
                }
            }
            "help" => print_usage(),
            "exit" | "quit" => break,
            _ => {
                println!("  Unknown command: '{}'. Type 'help' for commands.", parts[0]);
            }
        }
    }

    if let Err(err) = engine.close() {
        eprintln!("[ERROR] Failed to close engine: {}", err);
    }
}
