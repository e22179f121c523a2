use std::net::SocketAddr;
use std::time::Duration;

use dht_dispatcher::rpc::{ChannelHandler, RequestOutcome};
use dht_dispatcher::{Config, Contact, Id, MessageDispatcher};

use clap::Parser;
use tracing::Level;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address of the node to ping
    address: SocketAddr,
    /// Local port to bind
    #[arg(short, long, default_value_t = 0)]
    port: u16,
    /// Number of pings to send
    #[arg(short, long, default_value_t = 3)]
    count: usize,
}

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();

    let cli = Cli::parse();

    let local = Contact::new(Id::random(), ([0, 0, 0, 0], cli.port).into());
    let dispatcher = MessageDispatcher::builder(local)
        .config(Config::default().with_private_addresses(true))
        .build();

    let local_addr = dispatcher
        .bind(([0, 0, 0, 0], cli.port).into())
        .expect("Failed to bind");
    dispatcher.start().expect("Failed to start");

    println!("Listening on {local_addr}, pinging {}\n", cli.address);

    for _ in 0..cli.count {
        let (handler, outcome) = ChannelHandler::with_timeout(Duration::from_secs(3));

        if !dispatcher.ping(cli.address, handler).expect("dispatcher running") {
            println!("Ping rejected: {:?}", outcome.try_recv());
            break;
        }

        match outcome.recv() {
            Ok(RequestOutcome::Response { message, rtt }) => {
                println!("Pong from {} in {:?}", message.sender.id, rtt)
            }
            Ok(RequestOutcome::Timeout { elapsed }) => println!("Timed out after {elapsed:?}"),
            Ok(RequestOutcome::Error(error)) => println!("Error: {error}"),
            Err(error) => println!("Outcome channel closed: {error}"),
        }
    }

    dispatcher.close();
}
