use tracing::info;
use tracing_subscriber;

use clap::{value_t, App, Arg};

use zfx_blockswap::server::{node, Settings};
use zfx_blockswap::Result;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_level(false)
        .with_target(false)
        .without_time()
        .compact()
        .with_max_level(tracing::Level::INFO)
        .init();

    let matches = App::new("zfx-blockswap")
        .version("0.1")
        .author("zero.fx labs ltd.")
        .about("Runs a blockswap node")
        .arg(
            Arg::with_name("listener-ip")
                .short("a")
                .long("listener-ip")
                .value_name("LISTENER_IP")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("bootstrap-peer")
                .short("b")
                .long("bootstrap-peer")
                .value_name("BOOTSTRAP_PEER")
                .multiple(true),
        )
        .arg(
            Arg::with_name("db")
                .short("d")
                .long("db")
                .value_name("DB_PATH")
                .takes_value(true)
                .required(false),
        )
        .get_matches();

    let listener_ip =
        value_t!(matches.value_of("listener-ip"), String).unwrap_or_else(|e| e.exit());
    let bootstrap_peers = match matches.values_of("bootstrap-peer") {
        Some(values) => values.map(String::from).collect(),
        None => vec![],
    };
    let db_path = matches.value_of("db").map(String::from);

    let settings = Settings { listener_ip, bootstrap_peers, db_path, swap: Default::default() };

    let sys = actix::System::new();
    sys.block_on(async move {
        node::run(settings).unwrap();

        let sig = if cfg!(unix) {
            use futures::future::FutureExt;
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigint = signal(SignalKind::interrupt()).unwrap();
            let mut sigterm = signal(SignalKind::terminate()).unwrap();

            futures::select! {
                _ = sigint.recv().fuse() => "SIGINT",
                _ = sigterm.recv().fuse() => "SIGTERM"
            }
        } else {
            tokio::signal::ctrl_c().await.unwrap();
            "Ctrl+C"
        };
        info!(target: "blockswap", "Got {}, stopping...", sig);

        actix::System::current().stop();
    });
    sys.run().unwrap();

    Ok(())
}
