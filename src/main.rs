use std::{env, process};

use clap::Parser;

use rdma_client::client::{self, report::Report};
use rdma_client::{ClientConfig, ClientError};

/// Environment variable naming a TOML configuration file.
const CONFIG_ENV: &str = "RDMA_CLIENT_CONFIG";

#[derive(Parser, Debug)]
#[command(
    disable_help_flag = true,
    disable_version_flag = true,
    args_override_self = true
)]
struct Args {
    /// Server address.
    #[arg(short = 's', value_name = "server_address")]
    server: Option<String>,

    /// Server port.
    #[arg(short = 'p', value_name = "port_number")]
    port: Option<String>,
}

fn usage(prog: &str) -> ! {
    println!("usage: {}", prog);
    println!("\t[-s server_address]");
    println!("\t[-p port_number]");
    process::exit(1);
}

fn load_config(args: Args) -> Result<ClientConfig, ClientError> {
    let mut cfg = match env::var_os(CONFIG_ENV) {
        Some(path) => {
            log::info!("rdma_client: loading configuration from {:?}", path);
            ClientConfig::load_toml(path)?
        }
        None => ClientConfig::default(),
    };
    cfg.override_with(args.server, args.port);
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(feature = "rdmacm")]
fn run_client(cfg: &ClientConfig) -> Result<Report, ClientError> {
    let fabric = rdma_client::fabric::rdmacm::CmFabric::new();
    client::run(&fabric, cfg)
}

#[cfg(not(feature = "rdmacm"))]
fn run_client(cfg: &ClientConfig) -> Result<Report, ClientError> {
    log::warn!("rdma_client: built without `rdmacm`, talking to the loopback fabric");
    let fabric = rdma_client::fabric::sim::SimFabric::default();
    client::run(&fabric, cfg)
}

fn main() {
    let prog = env::args().next().unwrap_or_else(|| "rdma_client".to_string());
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(_) => usage(&prog),
    };
    env_logger::init();

    println!("rdma_client: start");
    let code = match load_config(args) {
        Ok(cfg) => {
            let result = run_client(&cfg);
            match &result {
                Ok(report) => println!("{}", report),
                Err(e) => eprintln!("{}", e),
            }
            client::exit_status(&result, cfg.fail_on_mismatch)
        }
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    };
    println!("rdma_client: end {}", code);
    process::exit(code);
}
