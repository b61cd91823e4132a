//! An echo example
//!
//! Attaches a server and a client stack to a loop-back network. The client sends the digit
//! pattern in chunks, waits for each chunk to come back and compares it. Call example:
//!
//! * `sixtcp-echo -n 4096 -l 200 --lose-every 5`
//! * `sixtcp-echo -n 1000 --udp`
use std::process;

pub use sixtcp_echo::{config, echo};

fn main() {
    let config = config::Config::from_args();

    println!("[+] Configured hosts, echoing {} bytes {}",
        config.total_bytes,
        if config.udp { "in datagrams" } else { "over tcp" });

    let result = match echo::run(&config) {
        Ok(result) => result,
        Err(err) => {
            eprintln!("[-] Echo failed: {}", err);
            process::exit(1);
        },
    };

    println!("[+] Done\n");
    println!("{}", result);
}
