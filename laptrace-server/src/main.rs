use clap::Parser;
use log::info;
use miette::{IntoDiagnostic, Result};
use std::time::Duration;
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

use laptrace_server::{web::Web, Cli, Session, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();

    info!("Laptrace server {}", VERSION);

    // Fail before binding anything if the lap cannot be had
    let source = args.lap_source();
    info!("Loading {}", source.describe());
    let lap = source.load().into_diagnostic()?;
    info!(
        "Loaded lap {} of {} at {}: {} samples, {} corners",
        lap.info().lap_number,
        lap.info().driver,
        lap.info().location,
        lap.len(),
        lap.corners().len()
    );

    let session = Session::new(args, lap).into_diagnostic()?;

    Toplevel::new(move |s| async move {
        session.start(&s);
        s.start(SubsystemBuilder::new("Web", |subsys| {
            Web::new(session).run(subsys)
        }));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(5))
    .await
    .into_diagnostic()
}
