use anyhow::{Context, Result, anyhow, bail};
use clap::Args;
use geodepot::{
	client::{CacheSettings, CredentialProvider, Credentials, DatasetRef, DifferentialCache, NonInteractive},
	config::DataKind,
};
use geodepot_core::TileBounds;
use std::{
	io::{BufRead, Write},
	path::PathBuf,
	sync::Arc,
};

#[derive(Args, Debug)]
pub struct Subcommand {
	/// Dataset name as registered on the server
	dataset: String,

	/// Data kind served by the dataset
	#[arg(long, default_value = "gpkg")]
	kind: String,

	/// Bounding box as minx,miny,maxx,maxy in the dataset CRS
	#[arg(long)]
	bbox: String,

	/// Expansion applied on all sides (point-cloud datasets only)
	#[arg(long, default_value_t = 0)]
	buffer: i64,

	/// Server base URL
	#[arg(long, default_value = "http://127.0.0.1:8001")]
	server: String,

	/// Local mirror root (default: GEODEPOT_CACHE_DIR or ./geodepot-cache)
	#[arg(long)]
	cache_dir: Option<PathBuf>,

	/// Approve downloads without asking (non-interactive mode)
	#[arg(short, long)]
	yes: bool,

	/// Username for credential authentication; prompted for when omitted
	#[arg(long)]
	username: Option<String>,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	let kind = DataKind::parse(&arguments.kind).ok_or_else(|| anyhow!("unknown kind '{}'", arguments.kind))?;
	let bounds = parse_bbox(&arguments.bbox)?;
	let cache_root = arguments
		.cache_dir
		.clone()
		.or_else(|| std::env::var("GEODEPOT_CACHE_DIR").ok().map(PathBuf::from))
		.unwrap_or_else(|| PathBuf::from("geodepot-cache"));

	let provider: Arc<dyn CredentialProvider> = if arguments.yes {
		match (std::env::var("GEODEPOT_USERNAME"), std::env::var("GEODEPOT_PASSWORD")) {
			(Ok(username), Ok(password)) => Arc::new(NonInteractive::with_credentials(&username, &password)),
			_ => Arc::new(NonInteractive::new()),
		}
	} else {
		Arc::new(PromptProvider {
			username: arguments.username.clone(),
		})
	};

	let cache = DifferentialCache::new(CacheSettings::new(&arguments.server, cache_root), provider)?;
	let dataset = DatasetRef::new(&arguments.dataset, kind);

	let runtime = tokio::runtime::Runtime::new()?;
	let outcome = runtime.block_on(cache.reconcile(&dataset, &bounds, arguments.buffer))?;

	if outcome.skipped_network {
		log::info!("served from cache without contacting the server");
	}
	log::info!("{} tiles cover the requested bbox ({} downloaded)", outcome.paths.len(), outcome.downloaded);
	for path in &outcome.paths {
		println!("{}", path.display());
	}
	Ok(())
}

fn parse_bbox(text: &str) -> Result<TileBounds> {
	let parts: Vec<f64> = text
		.split(',')
		.map(|p| p.trim().parse::<f64>())
		.collect::<Result<_, _>>()
		.context("bbox must be four comma-separated numbers")?;
	if parts.len() != 4 {
		bail!("bbox must be minx,miny,maxx,maxy");
	}
	TileBounds::new(parts[0], parts[1], parts[2], parts[3])
}

/// Interactive credentials and download approval on stdin/stdout. The
/// library never prompts; this lives in the CLI on purpose.
struct PromptProvider {
	username: Option<String>,
}

impl CredentialProvider for PromptProvider {
	fn credentials(&self) -> Result<Credentials> {
		let username = match &self.username {
			Some(username) => username.clone(),
			None => prompt("Username: ")?,
		};
		let password = match std::env::var("GEODEPOT_PASSWORD") {
			Ok(password) => password,
			Err(_) => prompt("Password: ")?,
		};
		Ok(Credentials { username, password })
	}

	fn approve_download(&self, filenames: &[String]) -> bool {
		println!(
			"{} tiles are missing locally; downloading requires authentication.",
			filenames.len()
		);
		loop {
			match prompt("Download them now? [y/n] ").as_deref() {
				Ok("y") | Ok("Y") => return true,
				Ok("n") | Ok("N") => return false,
				_ => println!("Please answer y or n."),
			}
		}
	}
}

fn prompt(label: &str) -> Result<String> {
	print!("{label}");
	std::io::stdout().flush()?;
	let mut line = String::new();
	std::io::stdin().lock().read_line(&mut line)?;
	Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bbox_parsing() {
		let bounds = parse_bbox("0, 0, 1000.5, 2000").unwrap();
		assert_eq!(bounds.as_tuple(), (0.0, 0.0, 1000.5, 2000.0));
		assert!(parse_bbox("1,2,3").is_err());
		assert!(parse_bbox("a,b,c,d").is_err());
		assert!(parse_bbox("10,0,0,10").is_err());
	}
}
