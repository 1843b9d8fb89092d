use crate::{
    cli::Config,
    exec::{Executor, System},
};
use eyre::WrapErr;

mod build;
mod cli;
mod exec;
mod logging;
mod output;
mod registry;
mod secret;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    if let Err(error) = dotenvy::dotenv() {
        if !error.not_found() {
            return Err(error).wrap_err("invalid .env file");
        }
    }

    let args = cli::parse();
    logging::init(args.log_level, args.log_filter.as_deref());

    let config = args.into_config().unwrap_or_else(|error| error.exit());
    run(&config, &mut System)?;

    Ok(())
}

/// Log in, build, push, and report the pushed image
///
/// The output is only written once the image has been pushed.
fn run<E: Executor>(config: &Config, executor: &mut E) -> eyre::Result<String> {
    let registry_url = config
        .registry
        .login(&config.container_tool, executor)
        .wrap_err("failed to log in to the registry")?;

    let tag = build::publish(&config.build, &registry_url, &config.container_tool, executor)?;
    output::append(config.output.as_deref(), "image", &tag)?;

    Ok(tag)
}
