use std::{
    collections::HashSet,
    time::{Duration, Instant},
};

use anyhow::Result;
use clap::{arg, crate_authors, crate_name, crate_version, ArgAction, ArgMatches, Command};
use synscan::{error::ScanError, is_user_sudo, logger, resolver, scan::Scanner};

const DEFAULT_TOP_PORT: u16 = 1024;

struct ParsedArgs {
    debug: bool,
    ports: HashSet<u16>,
    timeout: Duration,
    retries: usize,
    rate: u32,
    target: String,
}

fn parse_args(matches: ArgMatches) -> Result<ParsedArgs, ScanError> {
    let debug = matches.get_flag("debug");

    let ports = match matches.get_many::<String>("port") {
        Some(rps) => rps
            .map(|rp| match rp.parse::<u16>() {
                Ok(p) => Ok(p),
                Err(_) => Err(ScanError::InvalidPort(String::from(rp))),
            })
            .collect::<Result<_, _>>()?,
        None => (1..=DEFAULT_TOP_PORT).collect(),
    };

    let timeout = Duration::from_secs(*matches.get_one::<u64>("timeout").unwrap());
    let retries = *matches.get_one::<usize>("retries").unwrap();
    let rate = *matches.get_one::<u32>("rate").unwrap();
    let target = matches.get_one::<String>("target").unwrap().to_owned();

    Ok(ParsedArgs {
        debug,
        ports,
        timeout,
        retries,
        rate,
        target,
    })
}

fn main() -> Result<()> {
    let arg_matches = Command::new(crate_name!())
        .about("Stateless SYN port scanner for a single IPv4 host. Requires sudo user.")
        .version(crate_version!())
        .arg_required_else_help(true)
        .author(crate_authors!())
        .args([
            arg!(-d --debug "Turns on debugging information").action(ArgAction::SetTrue),
            arg!(-p --port <PORT> "One or more ports separated by a comma (defaults to 1-1024)")
                .value_delimiter(','),
            arg!(-T --timeout <SECS> "Zero closes the capture right after emission; any other value keeps it open for the fixed grace window")
                .value_parser(clap::value_parser!(u64))
                .default_value("10"),
            arg!(-r --retries <TIMES> "Probe attempts per port")
                .value_parser(clap::value_parser!(usize))
                .default_value("3"),
            arg!(-R --rate <PPS> "Probes per second")
                .value_parser(clap::value_parser!(u32))
                .default_value("1000"),
            arg!([target] "Address or hostname to scan").required(true),
        ])
        .get_matches();

    // Extract arguments.
    let parsed = parse_args(arg_matches)?;

    // Raw sockets and packet capture both want root.
    if !is_user_sudo() {
        Err(ScanError::NormalUserRequired)?;
    }

    // Set debug if desired.
    if parsed.debug {
        logger::init();
    }

    // Parse target.
    let ip = resolver::lookup(&parsed.target)?;

    // Start scanner.
    let scanner = Scanner::new(ip, parsed.timeout, parsed.retries, parsed.rate)?;

    let now = Instant::now();
    let open = scanner.scan(&parsed.ports)?;
    let elapsed = now.elapsed();

    // Show result.
    let mut open: Vec<u16> = open.into_iter().collect();
    open.sort_unstable();

    for port in &open {
        println!("{}/tcp open", port);
    }
    println!(
        "Scanned {} ports on {} in {:.2?}: {} open",
        parsed.ports.len(),
        ip,
        elapsed,
        open.len()
    );

    Ok(())
}
