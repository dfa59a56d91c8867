use std::process;

use anyhow::{self, Context};
use clap::Parser;
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;

use phonsym::interfaces::cli::{log_heading, Cli};
use phonsym::interfaces::input::Input;
use phonsym::interfaces::InputHandle;
use phonsym::io::read_phonsym_yaml;

/// Configures the `phonsym-output` logger for the main output and the root logger for
/// diagnostics on standard error.
fn configure_logging(cli: &Cli) -> Result<(), anyhow::Error> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{m}{n}")))
        .build();
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("[{l:<5}] {t}: {m}{n}")))
        .build();

    let mut output_logger = Logger::builder().appender("stdout").additive(false);
    let mut builder = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .appender(Appender::builder().build("stderr", Box::new(stderr)));
    if let Some(path) = cli.output.as_ref() {
        let file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new("{m}{n}")))
            .append(false)
            .build(path)
            .with_context(|| format!("Unable to open output file `{}`", path.display()))?;
        builder = builder.appender(Appender::builder().build("file", Box::new(file)));
        output_logger = output_logger.appender("file");
    }

    let root_level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    let config = builder
        .logger(output_logger.build("phonsym-output", LevelFilter::Info))
        .build(Root::builder().appender("stderr").build(root_level))?;
    log4rs::init_config(config)?;
    Ok(())
}

fn run(cli: &Cli) -> Result<(), anyhow::Error> {
    configure_logging(cli)?;
    log_heading();
    let input = read_phonsym_yaml::<Input, _>(&cli.config).with_context(|| {
        format!(
            "Unable to parse the configuration file `{}`",
            cli.config.display()
        )
    })?;
    input.handle()
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("Error: {err:?}");
        process::exit(1);
    }
}
