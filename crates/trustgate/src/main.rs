// Trustgate
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead};
use tracing::info;
use tracing_subscriber::EnvFilter;
use trustgate::config::Config;
use trustgate::{TrustGate, crypto};

#[derive(Parser, Debug)]
#[command(name = "trustgate", about = "Trustgate operator tools")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print a random secret suitable for JWT_SECRET or RESOURCE_INDICATOR_SECRET
    GenSecret,

    /// Hash a password with Argon2id for account provisioning
    HashPassword {
        /// Password to hash; read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
    },

    /// Load and validate the environment configuration
    CheckConfig,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_writer(io::stderr).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::GenSecret => {
            println!("{}", crypto::generate_secret()?);
        }
        Commands::HashPassword { password } => {
            let password = match password {
                Some(password) => password,
                None => {
                    let mut line = String::new();
                    io::stdin().lock().read_line(&mut line).context("failed to read password from stdin")?;
                    line.trim_end_matches(['\r', '\n']).to_string()
                }
            };
            println!("{}", crypto::hash_password(&password)?);
        }
        Commands::CheckConfig => {
            let config = Config::from_env()?;
            info!("Loaded configuration: server_id={}", config.server_id);
            // Building the core also checks the role table and both secrets.
            let gate = TrustGate::new(config)?;
            println!("{:#?}", gate.config());
        }
    }

    Ok(())
}
