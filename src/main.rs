//! kvpipe - One-Shot Command Client
//!
//! A small CLI front over the connection core: connect to a server, send a
//! single command, print the reply, disconnect. Handy for poking at a
//! server and for watching the connection lifecycle with `RUST_LOG=trace`.

use anyhow::bail;
use kvpipe::protocol::encode_command;
use kvpipe::{CommandError, Connection, ConnectionConfig, DisconnectReason, RespValue};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Client configuration
struct Config {
    /// Server address to connect to
    addr: String,
    /// Optional AUTH password
    password: Option<String>,
    /// The command to send, one argument per element
    command: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: format!("{}:{}", kvpipe::DEFAULT_HOST, kvpipe::DEFAULT_PORT),
            password: None,
            command: Vec::new(),
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--addr" | "-a" => {
                    if i + 1 < args.len() {
                        config.addr = args[i + 1].clone();
                        i += 2;
                    } else {
                        eprintln!("Error: --addr requires a value");
                        std::process::exit(1);
                    }
                }
                "--password" | "-p" => {
                    if i + 1 < args.len() {
                        config.password = Some(args[i + 1].clone());
                        i += 2;
                    } else {
                        eprintln!("Error: --password requires a value");
                        std::process::exit(1);
                    }
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("kvpipe version {}", kvpipe::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    // Everything from here on is the command itself
                    config.command = args[i..].to_vec();
                    break;
                }
            }
        }

        config
    }
}

fn print_help() {
    println!(
        r#"
kvpipe - A Pipelined Client Connection for Redis-Compatible Stores

USAGE:
    kvpipe [OPTIONS] <COMMAND> [ARGS...]

OPTIONS:
    -a, --addr <ADDR>         Server address (default: 127.0.0.1:6379)
    -p, --password <PASS>     AUTH password sent before the command
    -v, --version             Print version information
        --help                Print this help message

EXAMPLES:
    kvpipe PING
    kvpipe SET name Ariz
    kvpipe GET name
    kvpipe --addr 10.0.0.5:6380 --password hunter2 DBSIZE
"#
    );
}

/// Everything the connection can hand back to us, in one channel.
enum Outcome {
    Reply(RespValue),
    Failed(CommandError),
    Lost(DisconnectReason),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Set up logging; RUST_LOG controls verbosity
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let config = Config::from_args();
    if config.command.is_empty() {
        print_help();
        bail!("no command given");
    }

    let args: Vec<&[u8]> = config.command.iter().map(|s| s.as_bytes()).collect();
    let frame = encode_command(&args);

    let mut conn_config = ConnectionConfig::new(config.addr);
    if let Some(password) = config.password {
        conn_config = conn_config.with_password(password);
    }

    let conn = Connection::connect(conn_config);
    let (tx, mut rx) = mpsc::unbounded_channel::<Outcome>();

    let lost_tx = tx.clone();
    conn.on_disconnect(move |reason| {
        let _ = lost_tx.send(Outcome::Lost(reason));
    });

    let reply_tx = tx.clone();
    let failure_tx = tx;
    conn.send_command(
        frame,
        move |reply| {
            let _ = reply_tx.send(Outcome::Reply(reply));
        },
        move |err| {
            let _ = failure_tx.send(Outcome::Failed(err));
        },
    );

    let exit_code = match rx.recv().await {
        Some(Outcome::Reply(reply)) => {
            println!("{}", reply);
            0
        }
        Some(Outcome::Failed(err)) => {
            eprintln!("(error) {}", err);
            1
        }
        Some(Outcome::Lost(reason)) => {
            eprintln!("connection lost: {}", reason);
            1
        }
        None => {
            eprintln!("connection went away without reporting");
            1
        }
    };

    // disconnect() blocks until the driver has the request, so keep it off
    // the async workers.
    let closer = conn.clone();
    tokio::task::spawn_blocking(move || closer.disconnect()).await?;

    std::process::exit(exit_code);
}
