use anyhow::Context;
use clap::Parser;
use fnbridge::{args::CliArgs, config::Config};
use utils::{
    config::{ConfigBuilder, ConfigExt},
    context::AppContext,
    telemetry::{setup_console_tracing, setup_tracing},
};

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let config: Config = ConfigBuilder::new(args).build()?;
    config.validate().context("invalid config")?;

    let ctx = AppContext::new()?;

    // setup tracing
    let filters = config.tracing_env_filter()?;
    let tracer_provider = match config.jaeger.as_ref() {
        Some(collector) => Some(
            ctx.rt
                .block_on(async { setup_tracing(collector, "fnbridge", filters) })?,
        ),
        None => {
            setup_console_tracing(filters)?;
            None
        }
    };

    let result = fnbridge::run_bridge(ctx, config);

    if let Some(tracer) = tracer_provider {
        if let Err(err) = tracer.shutdown() {
            eprintln!("failed to shut down tracer provider: {err}");
        }
    }

    result
}
