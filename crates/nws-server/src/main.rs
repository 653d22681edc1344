//! Binary front-end: parse arguments, set up logging, run the server.

use clap::Parser;

use nws_server::ServerConfig;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = ServerConfig::parse();

    env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(config.log_level())
        .init();

    nws_server::run(config).await
}
