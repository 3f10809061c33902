//! Implementation of the `groupworker sign` command.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Args;
use serde::Serialize;

use super::run::load_config;
use crate::cli::output::{output, CommandOutput};
use crate::infrastructure::coordinator::{RequestSigner, SignedPath};

#[derive(Args, Debug)]
pub struct SignArgs {
    /// Coordinator path to sign, e.g. /worker/workers/<id>/message
    pub path: String,

    /// Signature time in epoch milliseconds (defaults to now)
    #[arg(short, long)]
    pub time: Option<i64>,

    /// Configuration file holding the worker credentials
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignOutput {
    path: String,
    worker_username: String,
    worker_signature: String,
    worker_time: i64,
}

impl SignOutput {
    fn new(path: String, signed: SignedPath) -> Self {
        Self {
            path,
            worker_username: signed.username,
            worker_signature: signed.signature,
            worker_time: signed.time,
        }
    }
}

impl CommandOutput for SignOutput {
    fn to_human(&self) -> String {
        format!(
            "path:            {}\nworkerUsername:  {}\nworkerSignature: {}\nworkerTime:      {}",
            self.path, self.worker_username, self.worker_signature, self.worker_time
        )
    }
}

pub fn execute(args: SignArgs, json_mode: bool) -> Result<()> {
    let config = load_config(args.config.as_deref(), None, None)?;
    let signer = RequestSigner::new(&config.coordinator.username, &config.coordinator.secret)
        .map_err(|e| anyhow!("invalid worker secret: {e}"))?;
    let signed = match args.time {
        Some(time) => signer.sign_at(&args.path, time),
        None => signer.sign(&args.path),
    };
    output(&SignOutput::new(args.path, signed), json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_matches_signer() {
        let signer = RequestSigner::new("w1", "secret").unwrap();
        let signed = signer.sign_at("/worker/x", 42);
        let expected = signed.signature.clone();
        let out = SignOutput::new("/worker/x".into(), signed);

        let json = out.to_json();
        assert_eq!(json["workerUsername"], "w1");
        assert_eq!(json["workerSignature"], expected.as_str());
        assert_eq!(json["workerTime"], 42);
        assert!(out.to_human().contains(&expected));
    }
}
