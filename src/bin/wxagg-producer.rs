//! The wxagg-producer executable pushes one station's record to an
//! aggregation server at a fixed interval:
//!
//! `wxagg-producer <SERVER> <RECORD_FILE> [--interval SECONDS] [--count N]`
//!
//!     SERVER is the aggregation server address as host:port (an http://
//!     prefix is tolerated). RECORD_FILE is a JSON file holding either a
//!     single record object or an array whose first element is used.
//!     Without --count the producer pushes until interrupted.

use std::fs;
use std::net::SocketAddr;
use std::process::exit;
use std::time::Duration;

use clap::{crate_version, App, Arg};
use crossbeam::channel::tick;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use wxagg::client::parse_server_addr;
use wxagg::{AggClient, AggError, Record, Result};

const DEFAULT_INTERVAL_SECS: u64 = 2;

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    addr: SocketAddr,
    record: Record,
    producer_id: String,
    interval: Duration,
    count: Option<u64>,
}

impl Opt {
    /// validates the server address and loads the record to push
    /// # Errors
    /// returns [`AggError::Parsing`] for bad parameters and
    /// [`AggError::InvalidRecord`] when the record file has no usable record
    fn build(
        server: &str,
        record_file: &str,
        interval: Option<&str>,
        count: Option<&str>,
    ) -> Result<Opt> {
        let addr = parse_server_addr(server)?;
        let record = load_record(record_file)?;
        let producer_id = record.require_id()?.to_string();
        let interval = match interval {
            Some(secs) => Duration::from_secs(secs.parse().map_err(|_| {
                AggError::Parsing(format!("could not parse {} into seconds", secs))
            })?),
            None => Duration::from_secs(DEFAULT_INTERVAL_SECS),
        };
        let count = match count {
            Some(n) => Some(n.parse().map_err(|_| {
                AggError::Parsing(format!("could not parse {} into a push count", n))
            })?),
            None => None,
        };
        Ok(Opt {
            addr,
            record,
            producer_id,
            interval,
            count,
        })
    }
}

fn main() {
    subscriber_config();

    let matches = App::new("wxagg-producer")
        .version(crate_version!())
        .about("pushes a station record to a weather-data aggregation server")
        .arg(
            Arg::with_name("server")
                .value_name("HOST:PORT")
                .help("address of the aggregation server")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("record-file")
                .value_name("PATH")
                .help("JSON file holding the record to push")
                .required(true)
                .index(2),
        )
        .arg(
            Arg::with_name("interval")
                .long("interval")
                .value_name("SECONDS")
                .help("seconds between pushes")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("count")
                .long("count")
                .value_name("N")
                .help("stop after N pushes instead of running forever")
                .takes_value(true),
        )
        .get_matches();

    let opt = match Opt::build(
        matches.value_of("server").unwrap(),
        matches.value_of("record-file").unwrap(),
        matches.value_of("interval"),
        matches.value_of("count"),
    ) {
        Ok(opt) => opt,
        Err(err) => {
            eprintln!("{:?}", err);
            exit(1);
        }
    };

    if let Err(err) = run(opt) {
        eprintln!("{:?}", err);
        exit(1);
    }
}

fn run(opt: Opt) -> Result<()> {
    let client = AggClient::new(opt.addr)?;
    let ticker = tick(opt.interval);
    let mut pushes: u64 = 0;

    loop {
        // a push that fails is retried at the next tick
        match client.push(&opt.producer_id, &opt.record) {
            Ok(response) => info!(
                status = response.status_code,
                lamport = response.lamport_clock,
                "pushed {}",
                opt.producer_id
            ),
            Err(err) => warn!("push failed: {}", err),
        }
        pushes += 1;
        if let Some(count) = opt.count {
            if pushes >= count {
                break;
            }
        }
        let _ = ticker.recv();
    }
    Ok(())
}

/// reads the record to push; an array file contributes its first element
fn load_record(path: &str) -> Result<Record> {
    let content = fs::read_to_string(path)?;
    if let Ok(record) = serde_json::from_str::<Record>(&content) {
        return Ok(record);
    }
    let mut records: Vec<Record> = serde_json::from_str(&content)?;
    if records.is_empty() {
        return Err(AggError::InvalidRecord("record file is empty".to_string()));
    }
    Ok(records.remove(0))
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
