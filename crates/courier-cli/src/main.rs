// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Courier CLI - run a single call job against a server and print the reply.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use courier_common_config::{load_config, CliOverrides, LogFormat, LoggingConfig};
use courier_jobs::{ConnectionData, HttpVerb, JobPhase, ReqwestTransport};

mod raw_call;

use raw_call::{parse_body, parse_query, RawCall};

/// Courier - asynchronous remote calls from the command line
#[derive(Parser, Debug)]
#[command(name = "courier", version, about, long_about = None)]
struct Args {
	/// Path to custom configuration file
	#[arg(short, long, global = true)]
	config: Option<PathBuf>,

	/// Server base URL
	#[arg(long, global = true)]
	base_url: Option<String>,

	/// Seconds to wait for a reply
	#[arg(long, global = true)]
	timeout_secs: Option<u64>,

	/// Log filter directive, e.g. `debug` or `courier_jobs=trace`
	#[arg(long, global = true)]
	log_level: Option<String>,

	/// Log output format
	#[arg(long, global = true, value_enum)]
	log_format: Option<LogFormatArg>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Perform one call and print the JSON reply
	Call {
		#[arg(value_enum)]
		verb: VerbArg,

		/// API path appended to the base URL
		path: String,

		/// Query parameter, may be repeated
		#[arg(short, long = "query", value_name = "KEY=VALUE")]
		query: Vec<String>,

		/// JSON object sent as the request body
		#[arg(short, long)]
		data: Option<String>,

		/// Do not send the access token
		#[arg(long)]
		anonymous: bool,

		/// Continue when the server certificate cannot be verified
		#[arg(long)]
		insecure: bool,
	},
	/// Print the resolved configuration
	Config,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum VerbArg {
	Get,
	Put,
	Post,
	Delete,
}

impl From<VerbArg> for HttpVerb {
	fn from(verb: VerbArg) -> Self {
		match verb {
			VerbArg::Get => HttpVerb::Get,
			VerbArg::Put => HttpVerb::Put,
			VerbArg::Post => HttpVerb::Post,
			VerbArg::Delete => HttpVerb::Delete,
		}
	}
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogFormatArg {
	Pretty,
	Json,
	Compact,
}

impl LogFormatArg {
	fn as_str(&self) -> &'static str {
		match self {
			Self::Pretty => "pretty",
			Self::Json => "json",
			Self::Compact => "compact",
		}
	}
}

impl From<&Args> for CliOverrides {
	fn from(args: &Args) -> Self {
		Self {
			base_url: args.base_url.clone(),
			timeout_secs: args.timeout_secs,
			log_level: args.log_level.clone(),
			log_format: args.log_format.map(|f| f.as_str().to_string()),
		}
	}
}

fn init_tracing(logging: &LoggingConfig) {
	let filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

	match logging.format {
		LogFormat::Json => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().json().with_writer(std::io::stderr))
				.init();
		}
		LogFormat::Compact => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().compact().with_writer(std::io::stderr))
				.init();
		}
		LogFormat::Pretty => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().with_writer(std::io::stderr))
				.init();
		}
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();

	let config = load_config(args.config.clone(), CliOverrides::from(&args))
		.context("failed to load configuration")?;
	init_tracing(&config.logging);
	debug!(base_url = %config.base_url, "configuration loaded");

	match args.command {
		Command::Config => {
			println!("{config:#?}");
			Ok(())
		}
		Command::Call {
			verb,
			path,
			query,
			data,
			anonymous,
			insecure,
		} => {
			let call = RawCall {
				verb: verb.into(),
				path,
				query: parse_query(&query)?,
				body: parse_body(data.as_deref())?,
				anonymous,
				trust_invalid_certs: insecure,
				reply: None,
			};

			let transport = Arc::new(ReqwestTransport::new().context("failed to build HTTP client")?);
			let connection = Arc::new(
				ConnectionData::from_config(&config, transport).context("invalid connection settings")?,
			);

			let job = connection.call_api(call)?;
			info!(job_id = %job.id(), verb = %job.verb(), "call started");

			match job.finished().await {
				JobPhase::Succeeded => {
					let reply = job.inspect(|call| call.reply.clone()).unwrap_or_default();
					println!("{}", serde_json::to_string_pretty(&reply)?);
					Ok(())
				}
				phase => anyhow::bail!(
					"call {phase}: {} ({}): {}",
					job.error(),
					job.error().as_i32(),
					job.error_string()
				),
			}
		}
	}
}
