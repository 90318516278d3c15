//! `probe`: one identity call, reported as a JSON line.
//!
//! A 401 is a normal answer here (`authenticated: false`); only transport and
//! server failures make the command fail.

use serde::Serialize;
use serde_json::Value;

use activity_tracker_protocol::Endpoint;
use tracker_core::{DeliveryError, HttpChannel, RequestChannel};

use crate::settings::{self, Overrides};

#[derive(Debug, Serialize)]
struct ProbeReport {
    base_url: String,
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<Value>,
}

pub fn run(overrides: &Overrides) -> Result<(), String> {
    let config = settings::resolve_config(overrides)?;
    let channel = HttpChannel::new(&config)?;
    let report = probe(&channel, &config.base_url)?;

    let line = serde_json::to_string(&report)
        .map_err(|e| format!("Failed to serialize probe report: {}", e))?;
    println!("{}", line);
    Ok(())
}

fn probe(channel: &dyn RequestChannel, base_url: &str) -> Result<ProbeReport, String> {
    match channel.request(Endpoint::Me, None) {
        Ok(user) => Ok(ProbeReport {
            base_url: base_url.to_string(),
            authenticated: true,
            user: Some(user),
        }),
        Err(DeliveryError::Unauthorized { .. }) => Ok(ProbeReport {
            base_url: base_url.to_string(),
            authenticated: false,
            user: None,
        }),
        Err(err) => Err(err.to_string()),
    }
}
