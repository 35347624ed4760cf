use clap::{Parser, Subcommand};
use omv_core::usbdbg::{Direction, Length, Requires, COMMANDS};
use omv_sim::SimConfig;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "omv-sim")]
#[command(about = "Run the imaging/debug core against a simulated sensor and debug host", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Suppress progress output (only show errors)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture, publish and stream frames over the loopback debug link
    Run {
        /// Frame buffer region size in bytes
        #[arg(long, default_value = "262144")]
        region_size: usize,

        /// Let the region grow up to this many bytes
        #[arg(long)]
        region_limit: Option<usize>,

        /// Number of frame buffers
        #[arg(short, long, default_value = "3")]
        buffers: usize,

        /// Spread the whole region over the buffers
        #[arg(long)]
        expand: bool,

        /// Sensor width in pixels
        #[arg(long, default_value = "160")]
        width: u32,

        /// Sensor height in pixels
        #[arg(long, default_value = "120")]
        height: u32,

        /// Frames to capture
        #[arg(short, long, default_value = "10")]
        frames: usize,

        /// Loopback packet size in bytes
        #[arg(long, default_value = "64")]
        packet: usize,

        /// Report a hardware performance counter unit
        #[arg(long)]
        pmu: bool,

        /// Directory for streamed .jpg frames
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Script to upload (a built-in snapshot loop otherwise)
        #[arg(short, long)]
        script: Option<PathBuf>,
    },
    /// List the debug protocol commands
    Info,
}

fn print_commands() {
    println!("{:<6} {:<22} {:<5} {:<10} requires", "code", "command", "dir", "length");
    for spec in COMMANDS.iter() {
        let dir = match spec.direction() {
            Some(Direction::In) => "in",
            Some(Direction::Out) => "out",
            None => "-",
        };
        let length = match spec.length {
            Length::None => "-".to_string(),
            Length::Fixed(n) => n.to_string(),
            Length::Declared => "declared".to_string(),
        };
        let requires = match spec.requires {
            Requires::Nothing => "",
            Requires::Profiler => "profiler",
            Requires::Pmu => "pmu",
        };
        println!(
            "{:#04x}   {:<22} {:<5} {:<10} {}",
            spec.code,
            format!("{:?}", spec.command),
            dir,
            length,
            requires
        );
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging (suppressed if --quiet)
    if !cli.quiet {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    let result = match cli.command {
        Commands::Run {
            region_size,
            region_limit,
            buffers,
            expand,
            width,
            height,
            frames,
            packet,
            pmu,
            out,
            script,
        } => {
            let config = SimConfig {
                region_size,
                region_limit,
                buffers,
                expand,
                width,
                height,
                frames,
                packet,
                out,
                script,
                pmu,
            };
            omv_sim::run(&config).map(|report| {
                if !cli.quiet {
                    eprintln!(
                        "Success: {} of {} frames streamed ({} bytes, {} x {} byte buffers, final quality {})",
                        report.frames_streamed,
                        frames,
                        report.bytes_streamed,
                        report.buffer_count,
                        report.buffer_size,
                        report.final_quality.unwrap_or(0)
                    );
                    if !report.frames_written.is_empty() {
                        eprintln!("Wrote {} frames", report.frames_written.len());
                    }
                    print!("{}", report.text);
                }
            })
        }
        Commands::Info => {
            print_commands();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
