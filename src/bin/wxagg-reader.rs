//! The wxagg-reader executable fetches the latest record for a station and
//! pretty-prints it:
//!
//! `wxagg-reader <SERVER> <STATION_ID>`
//!
//!     Print an error and return a non-zero exit code when the server
//!     reports an error status or the station is unknown.

use std::net::SocketAddr;
use std::process::exit;

use clap::{crate_version, App, Arg};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use wxagg::client::parse_server_addr;
use wxagg::protocol::STATUS_OK;
use wxagg::{AggClient, AggError, Result};

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    addr: SocketAddr,
    station_id: String,
}

impl Opt {
    fn build(server: &str, station_id: &str) -> Result<Opt> {
        let addr = parse_server_addr(server)?;
        Ok(Opt {
            addr,
            station_id: station_id.to_string(),
        })
    }
}

fn main() {
    subscriber_config();

    let matches = App::new("wxagg-reader")
        .version(crate_version!())
        .about("fetches the latest station record from a weather-data aggregation server")
        .arg(
            Arg::with_name("server")
                .value_name("HOST:PORT")
                .help("address of the aggregation server")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("station-id")
                .value_name("STATION_ID")
                .help("id of the station to fetch")
                .required(true)
                .index(2),
        )
        .get_matches();

    let opt = match Opt::build(
        matches.value_of("server").unwrap(),
        matches.value_of("station-id").unwrap(),
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
    let response = client.fetch(&opt.station_id)?;
    if response.status_code != STATUS_OK {
        return Err(AggError::Server(format!(
            "{} (status {})",
            response.msg, response.status_code
        )));
    }
    match response.weather_data {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("{}", response.msg),
    }
    Ok(())
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
