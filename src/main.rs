use clap::Parser;
use env_logger::Env;
use log::error;
use mediakb::cli::SubCommandExtend;
use mediakb::config::{Opts, SubCommand};
use tikv_jemallocator::Jemalloc;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();

    let result = match &opts.subcmd {
        SubCommand::Ingest(config) => config.run(&opts).await,
        SubCommand::Search(config) => config.run(&opts).await,
        SubCommand::Show(config) => config.run(&opts).await,
        SubCommand::Remove(config) => config.run(&opts).await,
        SubCommand::Check(config) => config.run(&opts).await,
        SubCommand::Server(config) => config.run(&opts).await,
    };

    if let Err(e) = result {
        error!("{e:#}");
        let code = e.downcast_ref::<mediakb::Error>().map_or(1, mediakb::Error::exit_code);
        std::process::exit(code);
    }
}
