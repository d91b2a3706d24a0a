//! Status command implementation

use anyhow::Result;
use serde_json::{json, Map, Value};

use vc_provision::status;

use super::context::{release, CommandContext, HostSelection};
use crate::output::{format_status, print_error};

/// Show daemon and tunnel state for the selected hosts.
///
/// An unreachable host is reported and the others are still queried.
pub async fn status_command(ctx: &CommandContext, selection: HostSelection, json: bool) -> Result<()> {
    let mut report = Map::new();

    for role in selection.roles() {
        let address = ctx.host(role).address.clone();
        let snapshot = match ctx.connect(role).await {
            Ok(session) => {
                let snapshot = status::query(&session).await;
                release(&session).await;
                Ok(snapshot)
            }
            Err(e) => Err(e),
        };

        if json {
            let value = match snapshot {
                Ok(s) => serde_json::to_value(&s)?,
                Err(e) => json!({ "error": format!("{:#}", e) }),
            };
            report.insert(role.to_string(), json!({ "address": address, "status": value }));
        } else {
            match snapshot {
                Ok(s) => println!("{}", format_status(role, &address, &s)),
                Err(e) => print_error(&format!("{:#}", e)),
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&Value::Object(report))?);
    }
    Ok(())
}

