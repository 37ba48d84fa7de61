use std::{ffi::OsString, str::FromStr, sync::Arc, time::Duration};

use squall::{
    dict::HeaderDict,
    driver::{self, RunPlan},
    rate_check::{self, RateCheckOpts},
    CtrlFrameKind, Dialer, Params, Scenario, Target,
};
use tracing::{info, Level};
use tracing_subscriber::{filter::Targets, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug)]
struct Args {
    /// server endpoint, `host:port` (a bare `:port` means localhost)
    address: String,
    /// value of `:authority` and the TLS server name
    host: String,
    threads: usize,
    /// total connections; per-iteration count for zero_window
    connections: usize,
    /// streams per connection (continuation flood)
    streams: u64,
    /// inter-scenario sleep in milliseconds
    conn_delay: u64,
    /// fields per header block (continuation flood)
    headers_cnt: usize,
    header_field_size: usize,
    /// outer loop for zero_window
    iterations: u64,
    close_type: String,
    flood_type: String,
    ctrl_frame_type: String,
    rapid_reset_type: String,
    /// frames (or streams) per connection
    frame_count: usize,
    /// rate_check: spawns per 125 ms window, 0 = all at once
    interval: usize,
    /// rate_check: tcp or tls
    conn_type: String,
    /// rate_check: TLS server name
    sni: String,
    debug: u8,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            address: "localhost:443".into(),
            host: "localhost".into(),
            threads: 1,
            connections: 1,
            streams: 10,
            conn_delay: 0,
            headers_cnt: 5,
            header_field_size: 1000,
            iterations: 1,
            close_type: "unknown".into(),
            flood_type: "continuation".into(),
            ctrl_frame_type: "ping_frame".into(),
            rapid_reset_type: "unknown".into(),
            frame_count: 100_000,
            interval: 0,
            conn_type: "tcp".into(),
            sni: "localhost".into(),
            debug: 0,
        }
    }
}

trait IntoStringResult {
    fn into_string_result(self) -> eyre::Result<String>;
}

impl IntoStringResult for OsString {
    fn into_string_result(self) -> eyre::Result<String> {
        self.into_string()
            .map_err(|_| eyre::eyre!("OsString contained invalid UTF-8"))
    }
}

fn number<T>(parser: &mut lexopt::Parser, flag: &str) -> eyre::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parser
        .value()?
        .into_string_result()?
        .parse()
        .map_err(|e| eyre::eyre!("failed to parse --{flag}: {e}"))
}

fn parse_args(mut parser: lexopt::Parser) -> eyre::Result<Args> {
    let mut args = Args::default();
    while let Some(arg) = parser.next()? {
        match arg {
            lexopt::Arg::Long("address") => {
                args.address = parser.value()?.into_string_result()?;
            }
            lexopt::Arg::Long("host") => {
                args.host = parser.value()?.into_string_result()?;
            }
            lexopt::Arg::Long("threads") => args.threads = number(&mut parser, "threads")?,
            lexopt::Arg::Long("connections") => {
                args.connections = number(&mut parser, "connections")?;
            }
            lexopt::Arg::Long("streams") => args.streams = number(&mut parser, "streams")?,
            lexopt::Arg::Long("conn_delay") => {
                args.conn_delay = number(&mut parser, "conn_delay")?;
            }
            lexopt::Arg::Long("headers_cnt") => {
                args.headers_cnt = number(&mut parser, "headers_cnt")?;
            }
            lexopt::Arg::Long("header_field_size") => {
                args.header_field_size = number(&mut parser, "header_field_size")?;
            }
            lexopt::Arg::Long("iterations") => {
                args.iterations = number(&mut parser, "iterations")?;
            }
            lexopt::Arg::Long("close_type") => {
                args.close_type = parser.value()?.into_string_result()?;
            }
            lexopt::Arg::Long("flood_type") => {
                args.flood_type = parser.value()?.into_string_result()?;
            }
            lexopt::Arg::Long("ctrl_frame_type") => {
                args.ctrl_frame_type = parser.value()?.into_string_result()?;
            }
            lexopt::Arg::Long("rapid_reset_type") => {
                args.rapid_reset_type = parser.value()?.into_string_result()?;
            }
            lexopt::Arg::Long("frame_count") => {
                args.frame_count = number(&mut parser, "frame_count")?;
            }
            lexopt::Arg::Long("interval") => args.interval = number(&mut parser, "interval")?,
            lexopt::Arg::Long("conn_type") => {
                args.conn_type = parser.value()?.into_string_result()?;
            }
            lexopt::Arg::Long("sni") => {
                args.sni = parser.value()?.into_string_result()?;
            }
            lexopt::Arg::Long("debug") => args.debug = number(&mut parser, "debug")?,
            lexopt::Arg::Long("help") | lexopt::Arg::Short('h') => {
                print_usage();
                std::process::exit(0);
            }
            _ => return Err(arg.unexpected().into()),
        }
    }
    Ok(args)
}

fn print_usage() {
    eprintln!(
        "Usage: squall [OPTIONS]

Options:
    --address <HOST:PORT>        server endpoint (default localhost:443)
    --host <NAME>                :authority / TLS server name (default localhost)
    --threads <N>                worker count (default 1)
    --connections <N>            total connections, or per-iteration count
                                 for zero_window (default 1)
    --conn_delay <MS>            sleep between scenario runs (default 0)
    --flood_type <KIND>          continuation | zero_window | ctrl_frames |
                                 rate_check (default continuation)
    --debug <N>                  0 silent, 1 connection errors, >1 every frame

continuation:
    --streams <N>                streams per connection (default 10)
    --headers_cnt <N>            fields per header block (default 5)
    --header_field_size <N>      field length in chars, max 4000 (default 1000)

zero_window:
    --iterations <N>             flood iterations (default 1)
    --close_type <FIN|RST>       socket close mode

ctrl_frames:
    --ctrl_frame_type <KIND>     ping_frame | settings_frame | window_update |
                                 rapid_reset (default ping_frame)
    --rapid_reset_type <KIND>    headers_by_max_streams_exceeded |
                                 headers_by_invalid_dependency |
                                 incorrect_frame_type | incorrect_header |
                                 window_update | priority | rst | batch
    --frame_count <N>            frames per connection (default 100000)

rate_check:
    --conn_type <tcp|tls>        connection type (default tcp)
    --sni <NAME>                 TLS server name (default localhost)
    --interval <N>               spawns per 125 ms window, 0 = all at once

Examples:
    squall --address localhost:443 --threads 4 --connections 100 --streams 100
    squall --flood_type ctrl_frames --ctrl_frame_type rapid_reset \\
           --rapid_reset_type rst --frame_count 100000
    squall --flood_type zero_window --close_type RST --iterations 10
"
    );
}

enum Mode {
    Flood {
        scenario: Scenario,
        total: u64,
        unit: &'static str,
    },
    RateCheck {
        tls: bool,
    },
}

fn resolve_mode(args: &Args) -> eyre::Result<Mode> {
    match args.flood_type.as_str() {
        "continuation" => Ok(Mode::Flood {
            scenario: Scenario::Continuation,
            total: args.connections as u64,
            unit: "connections",
        }),
        "zero_window" => Ok(Mode::Flood {
            scenario: Scenario::ZeroWindow {
                close: args.close_type.parse()?,
            },
            total: args.iterations,
            unit: "iterations",
        }),
        "ctrl_frames" => {
            let scenario = match args.ctrl_frame_type.as_str() {
                "ping_frame" => Scenario::CtrlFrames(CtrlFrameKind::Ping),
                "settings_frame" => Scenario::CtrlFrames(CtrlFrameKind::Settings),
                "window_update" => Scenario::CtrlFrames(CtrlFrameKind::WindowUpdate),
                "rapid_reset" => Scenario::RapidReset(args.rapid_reset_type.parse()?),
                other => return Err(eyre::eyre!("unknown control frame type: {other}")),
            };
            Ok(Mode::Flood {
                scenario,
                total: args.connections as u64,
                unit: "connections",
            })
        }
        "rate_check" => {
            let tls = match args.conn_type.as_str() {
                "tcp" => false,
                "tls" => true,
                other => return Err(eyre::eyre!("unknown connection type: {other}")),
            };
            Ok(Mode::RateCheck { tls })
        }
        other => Err(eyre::eyre!("unknown flood type: {other}")),
    }
}

/// A bare `:443` style address means localhost.
fn normalize_address(address: &str) -> String {
    if address.starts_with(':') {
        format!("localhost{address}")
    } else {
        address.to_string()
    }
}

fn setup_tracing_and_error_reporting(debug: u8) {
    color_eyre::install().unwrap();

    let targets = if let Ok(rust_log) = std::env::var("RUST_LOG") {
        rust_log.parse::<Targets>().unwrap()
    } else {
        let level = match debug {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        Targets::new()
            .with_default(Level::WARN)
            .with_target("squall", level)
            .with_target("squall_h2_parse", level)
            .with_target("squall_cli", level)
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_file(false)
        .with_line_number(false)
        .without_time();

    tracing_subscriber::registry()
        .with(targets)
        .with(fmt_layer)
        .init();
}

fn main() -> eyre::Result<()> {
    let args = match parse_args(lexopt::Parser::from_env()) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Failed to parse arguments: {e}");
            print_usage();
            std::process::exit(2);
        }
    };
    setup_tracing_and_error_reporting(args.debug);

    let mode = resolve_mode(&args)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(args, mode))
}

async fn async_main(args: Args, mode: Mode) -> eyre::Result<()> {
    match mode {
        Mode::RateCheck { tls } => {
            let target = Target {
                address: normalize_address(&args.address),
                server_name: args.sni.clone(),
            };
            rate_check::run(
                RateCheckOpts {
                    connections: args.connections,
                    interval: args.interval,
                    tls,
                },
                &target,
            )
            .await
        }
        Mode::Flood {
            scenario,
            total,
            unit,
        } => {
            info!(
                "Generating random headers (header-size={} header-count={})",
                args.header_field_size * 2,
                args.headers_cnt
            );
            let dict = HeaderDict::generate(args.header_field_size)?;

            let params = Arc::new(Params {
                authority: args.host.clone(),
                streams: args.streams,
                headers_count: args.headers_cnt,
                frame_count: args.frame_count,
                connections: args.connections,
                dict,
            });
            let dialer = Arc::new(Dialer::new(
                &Target {
                    address: normalize_address(&args.address),
                    server_name: args.host.clone(),
                },
                true,
            )?);

            info!("Starting {total} {unit} in {} threads", args.threads);
            driver::run(
                RunPlan {
                    total,
                    threads: args.threads,
                    conn_delay: Duration::from_millis(args.conn_delay),
                },
                scenario,
                dialer,
                params,
            )
            .await;

            Ok(())
        }
    }
}
