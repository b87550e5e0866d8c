//! Output formatting utilities for the CLI
//!
//! Anything meant to be consumed by the shell (the `export` line printed by
//! `session switch`) goes to stdout uncoloured; status messages are coloured
//! and warnings/errors go to stderr.

use std::path::Path;

use tabled::{settings::Style, Table, Tabled};

use ekssm_core::SessionRecord;
use ekssm_session::StartedSession;

/// Shown by `session list` when the store is empty
pub const NO_SESSIONS: &str = "No active ekssm sessions found.";

/// Format recorded sessions as an ASCII table
///
/// Rows keep the order they are given in (the store yields them sorted by
/// session ID). Returns [`NO_SESSIONS`] for an empty slice.
pub fn format_sessions(sessions: &[SessionRecord]) -> String {
    if sessions.is_empty() {
        return NO_SESSIONS.to_string();
    }

    #[derive(Tabled)]
    struct SessionRow {
        #[tabled(rename = "Session ID")]
        id: String,
        #[tabled(rename = "Cluster")]
        cluster: String,
        #[tabled(rename = "Instance")]
        instance: String,
        #[tabled(rename = "PID")]
        pid: i32,
        #[tabled(rename = "Local Port")]
        local_port: u16,
        #[tabled(rename = "Kubeconfig Path")]
        kubeconfig: String,
    }

    let rows: Vec<SessionRow> = sessions
        .iter()
        .map(|s| SessionRow {
            id: s.session_id.clone(),
            cluster: s.cluster_name.clone(),
            instance: s.instance_id.clone(),
            pid: s.pid,
            local_port: s.local_port,
            kubeconfig: if s.has_credential_file() {
                s.credential_file_path.display().to_string()
            } else {
                "-".to_string()
            },
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Shell assignment that points kubectl at `path`
///
/// The path is single-quoted with embedded quotes written as `'\''`, so the
/// line is safe to `eval`.
pub fn export_line(path: &Path) -> String {
    let quoted = path.display().to_string().replace('\'', r"'\''");
    format!("export KUBECONFIG='{}'", quoted)
}

/// Summary printed after `session start`
pub fn format_started(started: &StartedSession) -> String {
    let record = &started.record;
    let mut output = String::new();

    output.push_str(&format!("  PID: {}\n", record.pid));
    output.push_str(&format!("  Session ID: {}\n", record.session_id));
    output.push_str(&format!("  Cluster: {}\n", record.cluster_name));
    output.push_str(&format!(
        "  Proxy: localhost:{} -> {}:{} (via {})\n",
        record.local_port, started.remote_host, started.remote_port, record.instance_id
    ));
    output.push_str(&format!(
        "  Session Kubeconfig: {}\n\n",
        record.credential_file_path.display()
    ));
    output.push_str("To use this session, export the KUBECONFIG environment variable:\n");
    output.push_str(&format!(
        "  {}\n\n",
        export_line(&record.credential_file_path)
    ));
    output.push_str("Use 'ekssm session list' to see all sessions.\n");
    output.push_str("Use 'ekssm session switch <id>' to get the export command for a session.\n");
    output.push_str(
        "Run 'ekssm session stop --session-id <id>' or 'ekssm session stop' to terminate sessions.",
    );
    output
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

/// Print an error message in red with an X prefix to stderr
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

/// Print a warning message in yellow to stderr
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

/// Print a hint in cyan to stderr
///
/// Hints go to stderr so they never end up in an `eval`.
pub fn print_hint(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Cyan),
        Print("Hint: "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(id: &str) -> SessionRecord {
        SessionRecord {
            pid: 4242,
            session_id: id.to_string(),
            cluster_name: "demo".to_string(),
            instance_id: "i-abc".to_string(),
            local_port: 9443,
            credential_file_path: PathBuf::from(format!("/home/u/.ekssm/kubeconfigs/demo/{}.yaml", id)),
            remote_session_id: None,
        }
    }

    #[test]
    fn test_empty_sessions() {
        assert_eq!(format_sessions(&[]), NO_SESSIONS);
    }

    #[test]
    fn test_sessions_table_columns() {
        let table = format_sessions(&[record("a"), record("b")]);
        for header in [
            "Session ID",
            "Cluster",
            "Instance",
            "PID",
            "Local Port",
            "Kubeconfig Path",
        ] {
            assert!(table.contains(header), "missing column {}", header);
        }
        assert!(table.contains("4242"));
        assert!(table.contains("/home/u/.ekssm/kubeconfigs/demo/a.yaml"));
        assert!(table.find("a.yaml").unwrap() < table.find("b.yaml").unwrap());
    }

    #[test]
    fn test_export_line() {
        assert_eq!(
            export_line(Path::new("/tmp/x.yaml")),
            "export KUBECONFIG='/tmp/x.yaml'"
        );
    }

    #[test]
    fn test_export_line_escapes_single_quotes() {
        assert_eq!(
            export_line(Path::new("/home/o'brien/.ekssm/x.yaml")),
            r"export KUBECONFIG='/home/o'\''brien/.ekssm/x.yaml'"
        );
    }

    #[test]
    fn test_started_summary() {
        let started = StartedSession {
            record: record("abc"),
            remote_host: "abc.eks.amazonaws.com".to_string(),
            remote_port: 443,
        };
        let summary = format_started(&started);
        assert!(summary.contains("localhost:9443 -> abc.eks.amazonaws.com:443 (via i-abc)"));
        assert!(summary.contains("export KUBECONFIG='/home/u/.ekssm/kubeconfigs/demo/abc.yaml'"));
    }
}
