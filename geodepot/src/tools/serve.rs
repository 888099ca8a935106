use anyhow::Result;
use clap::Args;
use geodepot::{
	config::{DatasetRegistry, Settings},
	server::TileServer,
};

#[derive(Args, Debug)]
pub struct Subcommand {
	/// Listening port (overrides the PORT environment variable)
	#[arg(short, long)]
	port: Option<u16>,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	let mut settings = Settings::from_env();
	if let Some(port) = arguments.port {
		settings.port = port;
	}
	let registry = DatasetRegistry::from_env()?;

	let runtime = tokio::runtime::Runtime::new()?;
	runtime.block_on(async move {
		let mut server = TileServer::from_settings(&settings, &registry);
		server.start().await?;
		log::info!("press Ctrl-C to stop");
		tokio::signal::ctrl_c().await?;
		server.stop().await;
		Ok(())
	})
}
