//! Output formatting utilities for the CLI
//!
//! Status blocks, user and connection tables, setup progress lines, and
//! colored status messages.

use tabled::{settings::Style, Table, Tabled};

use vc_core::types::HostRole;
use vc_provision::{ConnectionRecord, ProgressKind, SetupProgress, StatusSnapshot, UserCredential};

/// Format one host's status as a labelled block, followed by a table of
/// established connections when there are any
pub fn format_status(role: HostRole, address: &str, status: &StatusSnapshot) -> String {
    let mut output = String::new();

    output.push_str(&format!("{} host {}\n", capitalize(&role.to_string()), address));
    output.push_str(&format!(
        "  Daemon:          {}\n",
        if status.connected { "running" } else { "stopped" }
    ));
    if !status.connected {
        return output;
    }

    output.push_str(&format!(
        "  Site-to-site:    {}\n",
        if status.tunnel_active { "established" } else { "down" }
    ));
    output.push_str(&format!("  Active clients:  {}\n", status.active_clients));
    output.push_str(&format!("  Active since:    {}\n", or_dash(&status.uptime)));
    output.push_str(&format!(
        "  External IP:     {}\n",
        or_dash(&status.external_address)
    ));

    if !status.connections.is_empty() {
        output.push('\n');
        output.push_str(&format_connections(&status.connections));
        output.push('\n');
    }

    output
}

/// Format established security associations as a table
pub fn format_connections(connections: &[ConnectionRecord]) -> String {
    #[derive(Tabled)]
    struct ConnectionRow {
        #[tabled(rename = "CONNECTION")]
        name: String,
        #[tabled(rename = "STATE")]
        state: String,
        #[tabled(rename = "REMOTE")]
        remote: String,
    }

    let rows: Vec<ConnectionRow> = connections
        .iter()
        .map(|c| ConnectionRow {
            name: match c.instance {
                Some(n) => format!("{}[{}]", c.name, n),
                None => c.name.clone(),
            },
            state: c.state.clone(),
            remote: c.remote.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format VPN users as a table. Passwords are never shown here.
pub fn format_users(users: &[UserCredential]) -> String {
    if users.is_empty() {
        return "No VPN users".to_string();
    }

    #[derive(Tabled)]
    struct UserRow {
        #[tabled(rename = "#")]
        index: usize,
        #[tabled(rename = "USERNAME")]
        username: String,
    }

    let rows: Vec<UserRow> = users
        .iter()
        .enumerate()
        .map(|(i, u)| UserRow {
            index: i + 1,
            username: u.username.clone(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// One line for a setup progress event
pub fn format_progress(event: &SetupProgress) -> String {
    let prefix = format!("[{}/{}]", event.stage.number(), vc_provision::SetupStage::total());
    match (event.kind, event.role) {
        (ProgressKind::StageCompleted, _) => format!("{} {} done", prefix, event.stage),
        (_, Some(role)) => format!("{} {}: {}", prefix, role, event.message),
        (_, None) => format!("{} {}", prefix, event.message),
    }
}

/// Print a setup progress event with the color matching its kind
pub fn print_progress(event: &SetupProgress) {
    let line = format_progress(event);
    match event.kind {
        ProgressKind::Warning => print_warning(&line),
        ProgressKind::StageCompleted | ProgressKind::Finished => print_success(&line),
        ProgressKind::StageStarted | ProgressKind::Step => print_info(&line),
    }
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message to stderr in red with an X prefix
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message to stderr in yellow
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use vc_provision::SetupStage;

    #[test]
    fn test_stopped_status_is_short() {
        let out = format_status(HostRole::Exit, "198.51.100.20", &StatusSnapshot::default());
        assert!(out.starts_with("Exit host 198.51.100.20\n"));
        assert!(out.contains("stopped"));
        assert!(!out.contains("Active clients"));
    }

    #[test]
    fn test_running_status_lists_connections() {
        let status = StatusSnapshot {
            connected: true,
            tunnel_active: true,
            active_clients: 1,
            uptime: String::new(),
            external_address: "203.0.113.10".into(),
            connections: vec![ConnectionRecord {
                name: "ikev2-vpn".into(),
                instance: Some(4),
                state: "ESTABLISHED".into(),
                remote: None,
            }],
        };
        let out = format_status(HostRole::Entry, "203.0.113.10", &status);
        assert!(out.contains("Site-to-site:    established"));
        assert!(out.contains("Active since:    -"));
        assert!(out.contains("ikev2-vpn[4]"));
    }

    #[test]
    fn test_users_table_hides_passwords() {
        let users = vec![UserCredential {
            username: "alice".into(),
            password: "s3cret".into(),
        }];
        let table = format_users(&users);
        assert!(table.contains("alice"));
        assert!(!table.contains("s3cret"));
        assert_eq!(format_users(&[]), "No VPN users");
    }

    #[test]
    fn test_progress_lines() {
        let step = SetupProgress::new(SetupStage::ConfigureExit, ProgressKind::Step, "IP forwarding enabled")
            .with_role(HostRole::Exit);
        assert_eq!(format_progress(&step), "[2/5] exit: IP forwarding enabled");

        let done = SetupProgress::new(SetupStage::LinkTunnel, ProgressKind::StageCompleted, "");
        assert_eq!(format_progress(&done), "[4/5] link tunnel done");
    }
}
