use getopts::Options;
use time::macros::format_description;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use emulator::config::Config;
use emulator::{report, runner};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    let mut opts = Options::new();
    opts.optflag("", "genconf", "Generate a new configuration and print to stdout");
    opts.optopt("c", "config", "Config file path (default: emulator.toml)", "FILE");
    opts.optflag("", "autoconf", "Run with the default configuration");
    opts.optopt("t", "timeslots", "Timeslots to emulate (overrides the config)", "N");
    opts.optopt("l", "loglevel", "Log level: error, warn, info, debug, trace (default: info)", "LEVEL");
    opts.optflag("j", "json", "Print the run summary as JSON");
    opts.optflag("h", "help", "Print this help");
    opts.optflag("v", "version", "Print version");

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("{}", opts.usage("Usage: emulator [options]"));
            std::process::exit(1);
        }
    };

    if matches.opt_present("help") {
        println!("{}", opts.usage("Usage: emulator [options]"));
        return Ok(());
    }

    if matches.opt_present("version") {
        println!("emulator {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    if matches.opt_present("genconf") {
        print!("{}", Config::generate_config_text());
        return Ok(());
    }

    let config_path = matches.opt_str("config").unwrap_or_else(|| "emulator.toml".to_string());
    let autoconf = matches.opt_present("autoconf");
    let json = matches.opt_present("json");
    let loglevel = matches.opt_str("loglevel").unwrap_or_else(|| "info".to_string());
    let timeslots = match matches.opt_str("timeslots") {
        Some(t) => Some(t.parse::<u64>().map_err(|e| format!("invalid --timeslots {t}: {e}"))?),
        None => None,
    };

    let filter = EnvFilter::try_new(&loglevel)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");
    let timer = fmt::time::LocalTime::new(format);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_timer(timer)
        .with_writer(std::io::stderr)
        .init();

    let mut config = if autoconf {
        Config::default()
    } else if !config_path.is_empty() {
        Config::load(&config_path)?
    } else {
        tracing::error!("Please specify --genconf, --config, or --autoconf");
        std::process::exit(1);
    };
    if let Some(timeslots) = timeslots {
        config.timeslots = timeslots;
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping after the current timeslot");
            on_signal.cancel();
        }
    });

    tracing::info!(
        timeslots = config.timeslots,
        policy = config.emulation.router.name(),
        "Starting emulation"
    );
    let summary = {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || runner::run(&config, &cancel)).await??
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", report::render(&summary));
    }
    Ok(())
}
