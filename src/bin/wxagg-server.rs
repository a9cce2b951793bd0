//! this binary starts the aggregation server
//! to see the list of options, type: `wxagg-server --help`

use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

use clap::{crate_version, App, Arg};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use wxagg::{AggError, AggregationServer, Result, ServerConfig};

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    config: ServerConfig,
}

impl Opt {
    /// validates the command line values over the default configuration
    /// # Errors
    /// returns [`AggError::Parsing`] if one of the parameters is invalid
    fn build(
        port: Option<&str>,
        cache_file: Option<&str>,
        max_idle: Option<&str>,
    ) -> Result<Opt> {
        let mut config = ServerConfig::default();
        if let Some(port) = port {
            config.port = port.parse().map_err(|_| {
                AggError::Parsing(format!("could not parse {} into a port number", port))
            })?;
        }
        if let Some(path) = cache_file {
            config.cache_path = PathBuf::from(path);
        }
        if let Some(secs) = max_idle {
            let secs: u64 = secs.parse().map_err(|_| {
                AggError::Parsing(format!("could not parse {} into seconds", secs))
            })?;
            config.max_idle = Duration::from_secs(secs);
        }
        Ok(Opt { config })
    }
}

fn main() {
    // set up a tracing subscriber to log to STDERR
    subscriber_config();

    // parse command line args
    let matches = App::new("wxagg-server")
        .version(crate_version!())
        .about("a weather-data aggregation server")
        .arg(
            Arg::with_name("port")
                .value_name("PORT")
                .help("sets the port the server listens on")
                .index(1),
        )
        .arg(
            Arg::with_name("cache-file")
                .long("cache-file")
                .value_name("PATH")
                .help("sets the path of the persisted cache document")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("max-idle")
                .long("max-idle")
                .value_name("SECONDS")
                .help("expires producers idle longer than this many seconds")
                .takes_value(true),
        )
        .get_matches();

    let opt = match Opt::build(
        matches.value_of("port"),
        matches.value_of("cache-file"),
        matches.value_of("max-idle"),
    ) {
        Ok(opt) => opt,
        Err(err) => {
            eprintln!("{:?}", err);
            exit(1);
        }
    };

    // start the server
    if let Err(err) = run(opt) {
        eprintln!("{:?}", err);
        exit(1);
    }
}

fn run(opt: Opt) -> Result<()> {
    info!("wxagg-server {}", env!("CARGO_PKG_VERSION"));
    info!("Cache document: {}", opt.config.cache_path.display());
    info!("Listening on port {}", opt.config.port);

    let mut server = AggregationServer::new(opt.config);
    server.start()?;
    // serve until the listener dies
    server.join()
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        // log to stderr instead of stdout
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
