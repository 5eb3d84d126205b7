// ccrf: Command-line interface to the Cloud Chaser RF toolkit.
//
// Thin consumer of the `ccrf-link` façade; every verb maps onto one or two
// façade calls. Exit code 0 on success, 1 on tx failure, timeout, or
// argument validation error.

use ccrf_link::{Ccrf, RecvFilter, device};
use ccrf_proto::wire::{self, Event, FlashSections};
use clap::{Args, Parser, Subcommand};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::warn;

#[derive(Parser)]
#[command(name = "ccrf", about = "Cloud Chaser RF toolkit", version)]
struct Cli {
    /// Device spec: tty path, acm number, serial, `any`, `<cell>:<addr>`,
    /// or `unix://<socket>[@<tty>]`.
    #[arg(short, long, env = "CCRF_DEV", global = true)]
    device: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Display device status.
    #[command(alias = "stat")]
    Status {
        #[arg(short, long)]
        verbose: bool,
    },
    /// Make the device echo back.
    Echo {
        /// Data to echo, or stdin when omitted.
        data: Option<String>,
    },
    /// Display a rainbow on the onboard LEDs.
    #[command(alias = "rbow")]
    Rainbow,
    /// List attached devices.
    Devices,
    /// Print the peer table.
    Peer,
    /// Send a datagram.
    Send(SendArgs),
    /// Receive data.
    Recv(RecvArgs),
    /// Send and receive concurrently.
    Rxtx {
        #[command(flatten)]
        send: SendArgs,
        #[command(flatten)]
        recv: RecvArgs,
    },
    /// Show (or set) the device address.
    Addr {
        /// Do not print anything.
        #[arg(short, long)]
        quiet: bool,
        /// Current device address (hex), required to set.
        #[arg(value_parser = parse_hex16)]
        orig: Option<u16>,
        /// New device address (hex).
        #[arg(value_parser = parse_hex16)]
        addr: Option<u16>,
    },
    /// Show (or set) the cell id.
    Cell {
        /// Node address (hex), required to set.
        #[arg(value_parser = parse_hex16)]
        addr: Option<u16>,
        /// Current cell (hex).
        #[arg(value_parser = parse_hex8)]
        orig: Option<u8>,
        /// New cell (hex).
        #[arg(value_parser = parse_hex8)]
        cell: Option<u8>,
    },
    /// Monitor link events and i/o stats.
    Monitor,
    /// Inject a resync sequence into the output stream.
    Flush,
    /// Reboot the local device and reopen the link.
    Reset,
    /// Reboot a node without reopening.
    Reboot {
        /// Target address (hex, default: local).
        #[arg(value_parser = parse_hex16)]
        addr: Option<u16>,
    },
    /// Push the staged firmware image to a peer over the air.
    Fota {
        #[arg(value_parser = parse_hex16)]
        addr: u16,
    },
    /// Flash a firmware image to the local device.
    Update { file: PathBuf },
    /// Ping a peer.
    Ping {
        #[arg(value_parser = parse_hex16)]
        addr: u16,
        /// Timeout in milliseconds.
        #[arg(short, long, default_value_t = 100)]
        timeout: u32,
        /// Request payload size.
        #[arg(short, long, default_value_t = 0)]
        size: u16,
        /// Reply payload size.
        #[arg(short = 'S', long, default_value_t = 0)]
        size_reply: u16,
        /// Use stream (no-CCA) transmission.
        #[arg(long)]
        stream: bool,
    },
}

#[derive(Args)]
struct SendArgs {
    /// Destination address (hex, default: broadcast).
    #[arg(short = 'D', long, value_parser = parse_hex16, default_value = "0")]
    dest: u16,
    /// Destination port (0-1023).
    #[arg(short, long, default_value_t = 0)]
    port: u16,
    /// User type id (0-15).
    #[arg(short = 'y', long = "typ", default_value_t = 0)]
    typ: u8,
    /// Send as a message and await receipt.
    #[arg(short, long)]
    mesg: bool,
    /// Data to send (may repeat; stdin when omitted).
    #[arg(long = "tx")]
    data: Vec<String>,
    /// Send every n bytes.
    #[arg(short = 'S', long)]
    split: Option<usize>,
    /// File to send data from (default: stdin).
    #[arg(short, long)]
    input: Option<PathBuf>,
    /// Do not read stdin by default.
    #[arg(short = 'I', long)]
    no_input: bool,
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args)]
struct RecvArgs {
    /// Source address to receive from (hex, default: any).
    #[arg(short = 's', long, value_parser = parse_hex16)]
    source: Option<u16>,
    /// Port filter.
    #[arg(short = 'r', long)]
    rport: Option<u16>,
    /// Type filter.
    #[arg(short = 'Y', long)]
    rtyp: Option<u8>,
    /// Include broadcast messages only.
    #[arg(short, long)]
    bcast: bool,
    /// Do not include broadcast messages.
    #[arg(short = 'B', long)]
    no_bcast: bool,
    /// Exit after receiving one message.
    #[arg(short = '1', long)]
    once: bool,
    /// Amount of time in seconds to receive.
    #[arg(short = 'T', long)]
    timeout: Option<f64>,
    /// Newline at end of stdout.
    #[arg(short, long)]
    newline: bool,
}

fn parse_hex16(s: &str) -> Result<u16, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u16::from_str_radix(s, 16).map_err(|e| e.to_string())
}

fn parse_hex8(s: &str) -> Result<u8, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u8::from_str_radix(s, 16).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // `devices` enumerates without opening anything.
    if let Command::Devices = cli.command {
        return match device::enumerate() {
            Ok(devices) => {
                for d in devices {
                    println!("{}\t{}", d.path, d.serial.as_deref().unwrap_or("-"));
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let Some(spec) = cli.device.as_deref() else {
        eprintln!("error: no device given (use --device or CCRF_DEV)");
        return ExitCode::FAILURE;
    };

    let ccrf = match Ccrf::open(spec).await {
        Ok(ccrf) => ccrf,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = run(&ccrf, cli.command).await;
    ccrf.close().await;

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(ccrf: &Ccrf, command: Command) -> ccrf_link::Result<ExitCode> {
    match command {
        Command::Devices => unreachable!("handled before open"),

        Command::Status { verbose } => {
            let status = ccrf.status().await?;
            eprintln!("{}", Ccrf::format_status(&status));
            if verbose {
                eprintln!(
                    "mac: rx={}/{}/{} tx={}/{}/{} stack: {}",
                    status.mac_stat.recv.count,
                    status.mac_stat.recv.size,
                    status.mac_stat.recv.error,
                    status.mac_stat.send.count,
                    status.mac_stat.send.size,
                    status.mac_stat.send.error,
                    status.mac_su_rx,
                );
                eprintln!(
                    "phy: rx={}/{}/{} tx={}/{}/{} stack: {}",
                    status.phy_stat.recv.count,
                    status.phy_stat.recv.size,
                    status.phy_stat.recv.error,
                    status.phy_stat.send.count,
                    status.phy_stat.send.size,
                    status.phy_stat.send.error,
                    status.phy_su,
                );
                eprintln!(
                    "heap: free={} usage={}",
                    status.heap_free, status.heap_usage
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Echo { data } => {
            let data = match data {
                Some(text) => text.into_bytes(),
                None => read_stdin()?,
            };
            ccrf.echo(&data).await?;
            // Give the reply a moment to land in the handler log.
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(ExitCode::SUCCESS)
        }

        Command::Rainbow => {
            ccrf.rainbow().await?;
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(ExitCode::SUCCESS)
        }

        Command::Peer => {
            let table = ccrf.peers().await?;
            eprintln!("{:04X}: t={}", table.addr, table.time);
            for peer in &table.peers {
                eprintln!(
                    "  {:04X}: t={} q={} r={} v={:08x}",
                    peer.addr, peer.last, peer.lqi, peer.rssi, peer.version
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Send(args) => {
            let sent = do_send(ccrf, &args).await?;
            if args.mesg && sent == 0 {
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Recv(args) => do_recv(ccrf, &args).await,

        Command::Rxtx { send, recv } => {
            let sender = {
                let ccrf = ccrf.clone();
                tokio::spawn(async move { do_send(&ccrf, &send).await })
            };
            let code = do_recv(ccrf, &recv).await?;
            match sender.await {
                Ok(Ok(_)) => Ok(code),
                Ok(Err(e)) => Err(e),
                Err(_) => Ok(ExitCode::FAILURE),
            }
        }

        Command::Addr { quiet, orig, addr } => {
            let current = ccrf.addr().await?;
            let shown = match (orig, addr) {
                (Some(orig), Some(new)) => ccrf.addr_set(orig, new).await? as u16,
                (Some(_), None) => {
                    return Err(ccrf_link::Error::InvalidArgument(
                        "addr is required to set".to_owned(),
                    ));
                }
                _ => current,
            };
            if !quiet {
                println!("0x{shown:04X}");
            }
            if shown == 0 && orig.is_some() {
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Cell { addr, orig, cell } => {
            let shown = match (addr, orig, cell) {
                (Some(addr), Some(orig), Some(new)) => {
                    let value = ccrf.cell_set(addr, orig, new).await?;
                    if value == 0 {
                        eprintln!("cell change rejected");
                        return Ok(ExitCode::FAILURE);
                    }
                    value as u8
                }
                (None, None, None) => ccrf.cell().await?,
                _ => {
                    return Err(ccrf_link::Error::InvalidArgument(
                        "cell set needs ADDR ORIG CELL".to_owned(),
                    ));
                }
            };
            println!("0x{shown:02X}");
            Ok(ExitCode::SUCCESS)
        }

        Command::Monitor => do_monitor(ccrf).await,

        Command::Flush => {
            ccrf.flush().await?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Reset => {
            ccrf.reset(true).await?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Reboot { addr } => {
            ccrf.reboot(addr.unwrap_or(wire::NET_ADDR_INVL)).await?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Fota { addr } => {
            let sent = ccrf.fota(addr).await?;
            if sent == 0 {
                eprintln!("fota: nothing sent");
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Update { file } => {
            let image = std::fs::read(&file)?;
            let len = image.len() as u32;
            let sections = FlashSections {
                header: 0,
                user: 0,
                code: 0,
                text: 0,
                data: len,
                total: len,
            };
            let status = ccrf.update(sections, &image).await?;
            if status != 0 {
                eprintln!("update failed: status {status}");
                return Ok(ExitCode::FAILURE);
            }
            eprintln!("update ok: {len} bytes");
            Ok(ExitCode::SUCCESS)
        }

        Command::Ping {
            addr,
            timeout,
            size,
            size_reply,
            stream,
        } => {
            let result = ccrf.ping(addr, timeout, size, size_reply, stream).await?;
            println!(
                "{:04X}: tx={} rtt={}us local(r={} q={}) peer(r={} q={})",
                result.addr,
                result.tx_count,
                result.rtt_usec,
                result.locl.rssi,
                result.locl.lqi,
                result.peer.rssi,
                result.peer.lqi,
            );
            if result.tx_count == 0 {
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Send the `--tx` arguments, then the input file / stdin (unless `-I`),
/// split into chunks when asked. Returns the total ACKed count.
async fn do_send(ccrf: &Ccrf, args: &SendArgs) -> ccrf_link::Result<u64> {
    if args.mesg && args.dest == wire::NET_ADDR_BCST {
        return Err(ccrf_link::Error::InvalidArgument(
            "mesg requires a destination".to_owned(),
        ));
    }

    let mut total: u64 = 0;

    for text in &args.data {
        total += send_chunk(ccrf, args, text.as_bytes()).await?;
    }

    if args.no_input || (!args.data.is_empty() && args.input.is_none()) {
        return Ok(total);
    }

    let bytes = match &args.input {
        Some(path) => std::fs::read(path)?,
        None => read_stdin()?,
    };
    let chunk = args.split.unwrap_or(bytes.len().max(1));
    for piece in bytes.chunks(chunk.clamp(1, wire::NET_SEND_MAX)) {
        total += send_chunk(ccrf, args, piece).await?;
    }
    Ok(total)
}

async fn send_chunk(ccrf: &Ccrf, args: &SendArgs, data: &[u8]) -> ccrf_link::Result<u64> {
    let acked = if args.mesg {
        u64::from(ccrf.mesg(args.dest, args.port, args.typ, data).await?)
    } else {
        ccrf.send(args.dest, args.port, args.typ, data, false, false)
            .await?;
        0
    };
    if args.verbose {
        eprintln!(
            "-> {:04X} {:03X}:{:01X} #{}",
            args.dest,
            args.port,
            args.typ,
            data.len()
        );
    }
    Ok(acked)
}

async fn do_recv(ccrf: &Ccrf, args: &RecvArgs) -> ccrf_link::Result<ExitCode> {
    let own_addr = ccrf.addr().await?;
    let mut sub = ccrf.recv();
    let filter = RecvFilter {
        addr: args.source.filter(|&a| a != 0),
        dest: None,
        port: args.rport,
        typ: args.rtyp,
    };
    let timeout = args.timeout.map(Duration::from_secs_f64);

    let mut stdout = std::io::stdout();
    let mut received = false;
    loop {
        let Some(mesg) = sub.next_matching(&filter, timeout).await else {
            break;
        };
        if mesg.dest == wire::NET_ADDR_BCST {
            if args.no_bcast {
                continue;
            }
        } else if args.bcast || mesg.dest != own_addr {
            continue;
        }
        stdout.write_all(&mesg.data)?;
        stdout.flush()?;
        received = true;
        if args.once {
            break;
        }
    }
    if args.newline {
        let _ = writeln!(stdout);
    }
    if args.once && !received {
        // Timed out without a message.
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn do_monitor(ccrf: &Ccrf) -> ccrf_link::Result<ExitCode> {
    let mut events = ccrf.evnt();
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let started = tokio::time::Instant::now();
    let mut window_start: Option<tokio::time::Instant> = None;

    loop {
        tokio::select! {
            event = events.next() => {
                match event {
                    Some(Event::Peer { addr, action }) => {
                        println!("{addr:04X}: {action}");
                    }
                    Some(Event::Other { id, data }) => {
                        println!("event: {id} data={data:02X?}");
                    }
                    None => break,
                }
            }
            tick = ticker.tick() => {
                let Some(prev) = window_start.replace(tick) else {
                    // The interval fires its first tick immediately; that
                    // tick only opens the stats window.
                    ccrf.stats_take();
                    continue;
                };
                let secs = (tick - prev).as_secs_f64();
                let snap = ccrf.stats_take();
                if secs > 0.0 && (snap.recv_count > 0 || snap.send_count > 0) {
                    let d_rate = (snap.recv_size as f64 / secs).round() as u64;
                    let p_rate = (snap.recv_count as f64 / secs).round() as u64;
                    let elapsed = (tick - started).as_secs();
                    println!(
                        "{:02}:{:02}:{:02}  {:5} Bps / {:3} pps \t rssi {:<4}  lqi {:<2}",
                        elapsed / 3600,
                        (elapsed / 60) % 60,
                        elapsed % 60,
                        d_rate,
                        p_rate,
                        snap.rssi_avg(),
                        snap.lqi_avg(),
                    );
                }
            }
        }
    }
    warn!("event stream ended");
    Ok(ExitCode::SUCCESS)
}

fn read_stdin() -> std::io::Result<Vec<u8>> {
    let mut data = Vec::new();
    std::io::stdin().read_to_end(&mut data)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn hex_parsers() {
        assert_eq!(parse_hex16("4bc9").unwrap(), 0x4BC9);
        assert_eq!(parse_hex16("0x4BC9").unwrap(), 0x4BC9);
        assert!(parse_hex16("zz").is_err());
        assert_eq!(parse_hex8("ff").unwrap(), 0xFF);
    }

    #[test]
    fn send_and_recv_args_parse() {
        let cli = Cli::parse_from([
            "ccrf", "-d", "any", "send", "-D", "4bc9", "-p", "101", "-y", "1", "--tx", "hi", "-m",
        ]);
        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.dest, 0x4BC9);
                assert_eq!(args.port, 101);
                assert_eq!(args.typ, 1);
                assert!(args.mesg);
                assert_eq!(args.data, vec!["hi".to_owned()]);
            }
            _ => panic!("wrong subcommand"),
        }

        let cli = Cli::parse_from(["ccrf", "-d", "any", "recv", "-1", "-T", "1.5"]);
        match cli.command {
            Command::Recv(args) => {
                assert!(args.once);
                assert_eq!(args.timeout, Some(1.5));
            }
            _ => panic!("wrong subcommand"),
        }
    }
}
