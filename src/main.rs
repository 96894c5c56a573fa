use clap::{Arg, ArgMatches, Command};
use std::error::Error;
use std::path::{Path, PathBuf};

use mirrord::client::{StdinPrompt, SyncSession};
use mirrord::config::{ClientProfile, NetworkConfig, ServerSettings};
use mirrord::credentials::CredentialStore;
use mirrord::logging::*;
use mirrord::{serve, util};

///////////////////////
// Utility functions //
///////////////////////

/// Config file values, overridden by the flags given on the command line
fn network_config(matches: &ArgMatches) -> Result<NetworkConfig, Box<dyn Error>> {
	let mut config = NetworkConfig::load(matches.get_one::<String>("config").map(Path::new))?;
	if let Some(host) = matches.get_one::<String>("host") {
		config.host = host.clone();
	}
	if let Some(port) = matches.get_one::<String>("port") {
		config.port = port.parse().map_err(|e| format!("invalid port {:?}: {}", port, e))?;
	}
	config.validate()?;
	Ok(config)
}

async fn run_until_ctrl_c<F>(fut: F) -> Result<(), Box<dyn Error>>
where
	F: std::future::Future<Output = Result<(), mirrord::SyncError>>,
{
	tokio::select! {
		res = fut => Ok(res?),
		_ = tokio::signal::ctrl_c() => {
			info!("Interrupted, shutting down");
			Ok(())
		}
	}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	mirrord::logging::init_tracing();

	let matches = Command::new("mirrord")
		.version(env!("CARGO_PKG_VERSION"))
		.about("One-way directory mirroring to a per-user server sandbox")
		.subcommand_required(true)
		.arg(
			Arg::new("config")
				.short('c')
				.long("config")
				.value_name("FILE")
				.global(true)
				.help("Network configuration (TOML)"),
		)
		.arg(Arg::new("host").long("host").value_name("HOST").global(true).help("Server host"))
		.arg(Arg::new("port").long("port").value_name("PORT").global(true).help("Server port"))
		.subcommand(
			Command::new("serve")
				.about("Run the mirroring server")
				.arg(
					Arg::new("root")
						.long("root")
						.value_name("DIR")
						.default_value("server_root")
						.help("Directory holding the client sandboxes"),
				)
				.arg(
					Arg::new("auth")
						.long("auth")
						.value_name("FILE")
						.default_value("auth.txt")
						.help("Credential store"),
				),
		)
		.subcommand(
			Command::new("watch")
				.about("Watch a directory and mirror it to the server")
				.arg(
					Arg::new("profile")
						.short('p')
						.long("profile")
						.value_name("FILE")
						.default_value("client.conf")
						.help("Client profile (USER/PASS/PATH)"),
				),
		)
		.subcommand(
			Command::new("adduser")
				.about("Add a user to the credential store")
				.arg(Arg::new("auth").long("auth").value_name("FILE").default_value("auth.txt"))
				.arg(Arg::new("user").required(true))
				.arg(Arg::new("password").required(true)),
		)
		.subcommand(
			Command::new("hash")
				.about("Print the content hash of a file")
				.arg(Arg::new("file").required(true)),
		)
		.get_matches();

	if let Some(sub) = matches.subcommand_matches("serve") {
		let settings = ServerSettings {
			root: PathBuf::from(sub.get_one::<String>("root").ok_or("serve: root required")?),
			credentials: PathBuf::from(sub.get_one::<String>("auth").ok_or("serve: auth required")?),
			network: network_config(sub)?,
		};
		run_until_ctrl_c(serve::serve(settings)).await?;
	} else if let Some(sub) = matches.subcommand_matches("watch") {
		let network = network_config(sub)?;
		let profile_path =
			PathBuf::from(sub.get_one::<String>("profile").ok_or("watch: profile required")?);
		let profile = ClientProfile::load(&profile_path)?;
		run_until_ctrl_c(async move {
			let mut session =
				SyncSession::connect(network, profile, Some(profile_path), Box::new(StdinPrompt::new()))
					.await?;
			session.run().await
		})
		.await?;
	} else if let Some(sub) = matches.subcommand_matches("adduser") {
		let store = CredentialStore::new(sub.get_one::<String>("auth").ok_or("adduser: auth required")?);
		let user = sub.get_one::<String>("user").ok_or("adduser: user required")?;
		let password = sub.get_one::<String>("password").ok_or("adduser: password required")?;
		store.add_user(user, password)?;
	} else if let Some(sub) = matches.subcommand_matches("hash") {
		let file = sub.get_one::<String>("file").ok_or("hash: file required")?;
		println!("{}  {}", util::hash_file(Path::new(file)).await?, file);
	}

	Ok(())
}

// vim: ts=4
