// Runs the ring exchange or the hybrid relay and prints the result table

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ringrelay::{
    run_exchange, run_hybrid, BufferFill, ExchangeConfig, ExchangeReport, FabricConfig,
    RelayConfig, RelaySummary, SendMode, ThreadLevel, World, ABORT_EXIT_CODE,
};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ringrelay")]
#[command(about = "Ring exchange and duplicated-context relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Non-blocking exchange with the ring neighbours, verified at the root
    Exchange {
        /// Number of participants
        #[arg(short = 'n', long, default_value = "4")]
        participants: usize,

        /// Elements per send/receive buffer
        #[arg(short, long)]
        buffer_size: usize,

        /// Send buffer contents
        #[arg(long, value_enum, default_value = "scaled")]
        fill: Fill,

        /// Base seed for the random fill
        #[arg(long, default_value = "0")]
        seed: u64,

        #[command(flatten)]
        fabric: FabricArgs,
    },

    /// Hybrid relay: one relay per thread, each in its own duplicated context
    Relay {
        /// Number of participants
        #[arg(short = 'n', long, default_value = "4")]
        participants: usize,

        /// Relay threads per participant
        #[arg(short, long)]
        threads: Option<usize>,

        /// Trips around the ring per context
        #[arg(short, long, default_value_t = RelayConfig::DEFAULT_ITERATIONS)]
        iterations: usize,

        /// Thread support level the participants are started with
        #[arg(long, default_value = "multiple")]
        thread_level: ThreadLevel,

        #[command(flatten)]
        fabric: FabricArgs,
    },
}

#[derive(clap::Args)]
struct FabricArgs {
    /// Sends complete only once matched by the receiver
    #[arg(long)]
    synchronous: bool,

    /// Lane size as a power of two
    #[arg(long, default_value = "6")]
    lane_bits: u8,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: Format,
}

impl FabricArgs {
    fn config(&self) -> FabricConfig {
        let mode = if self.synchronous {
            SendMode::Synchronous
        } else {
            SendMode::Buffered
        };
        FabricConfig::default()
            .with_lane_bits(self.lane_bits)
            .with_send_mode(mode)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Fill {
    Scaled,
    Random,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = err
                .downcast_ref::<ringrelay::Error>()
                .map_or(ABORT_EXIT_CODE, ringrelay::Error::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Exchange {
            participants,
            buffer_size,
            fill,
            seed,
            fabric,
        } => {
            let fill = match fill {
                Fill::Scaled => BufferFill::Scaled,
                Fill::Random => BufferFill::Random { seed },
            };
            let config = ExchangeConfig::new(buffer_size).with_fill(fill);
            let world = World::with_config(participants, fabric.config())?;
            let reports = world.run(|p| run_exchange(p.group(), &config))?;
            let report = reports
                .into_iter()
                .next()
                .flatten()
                .context("root produced no exchange report")?;
            match fabric.format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                Format::Text => print_exchange(&report),
            }
        }
        Commands::Relay {
            participants,
            threads,
            iterations,
            thread_level,
            fabric,
        } => {
            let config = RelayConfig::default().with_iterations(iterations);
            let world = World::with_config(
                participants,
                fabric.config().with_thread_level(thread_level),
            )?;
            let summaries: Vec<RelaySummary> = world
                .run(|p| run_hybrid(p, threads, &config))?
                .into_iter()
                .flatten()
                .collect();
            match fabric.format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&summaries)?),
                Format::Text => print_relay(participants, &summaries),
            }
        }
    }
    Ok(())
}

const RULE: &str = "##########################################################";

fn print_exchange(report: &ExchangeReport) {
    let size = report.record.len();
    println!("{RULE}");
    println!(" Ring exchange: non-blocking issue/wait");
    println!(" Vector size: {}", report.buffer_size);
    println!(" Number of participants: {size}");
    println!("{RULE}");
    println!("                --> BEFORE COMMUNICATION <--\n");
    for entry in &report.record {
        println!(
            "Participant {} : Sum of vector sent to {} = {:.6}",
            entry.rank,
            (entry.rank + 1) % size,
            entry.sent_sum
        );
    }
    println!("\n{RULE}");
    println!("                --> AFTER COMMUNICATION <--\n");
    for entry in &report.record {
        println!(
            "Participant {} : Sum of received vector = {:.6} : Time = {:.6} seconds",
            entry.rank, entry.received_sum, entry.elapsed_secs
        );
    }
    println!("\n{RULE}");
    println!(" Communication time : {:.6} seconds", report.total_elapsed_secs);
    println!("{RULE}");
}

fn print_relay(participants: usize, summaries: &[RelaySummary]) {
    println!("{RULE}");
    println!(" Hybrid relay over duplicated contexts");
    println!(" Number of participants: {participants}");
    println!("{RULE}");
    for summary in summaries {
        let source = summary
            .last_source
            .map_or_else(|| "-".to_string(), |rank| rank.to_string());
        println!(
            "Participant {} : {} : {:?} : {} trips : last from {} : {:?}",
            summary.rank, summary.context, summary.role, summary.iterations, source, summary.message
        );
    }
    println!("{RULE}");
}
