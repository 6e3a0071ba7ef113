use std::env;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use echod::Server;

const DEFAULT_PORT: u16 = 8000;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = match env::args().nth(1) {
        Some(arg) => match arg.parse::<u16>() {
            Ok(port) => port,
            Err(_) => {
                eprintln!("usage: echod [port]");
                return ExitCode::FAILURE;
            }
        },
        None => DEFAULT_PORT,
    };

    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    let mut server = match Server::bind(addr) {
        Ok(server) => server,
        Err(err) => {
            error!(%err, %addr, "failed to start");
            return ExitCode::FAILURE;
        }
    };

    info!(%addr, "listening");
    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "server terminated");
            ExitCode::FAILURE
        }
    }
}
