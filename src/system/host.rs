use std::process::Command;

use log::debug;

/// `COMPUTERNAME`, then `HOSTNAME`, then the `hostname` command
pub fn machine_name() -> String {
    ["COMPUTERNAME", "HOSTNAME"]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
        .or_else(hostname_command)
        .unwrap_or_else(|| "Unknown".to_string())
}

fn hostname_command() -> Option<String> {
    match Command::new("hostname").output() {
        Ok(output) if output.status.success() => {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            (!name.is_empty()).then_some(name)
        }
        Ok(output) => {
            debug!("hostname exited with {}", output.status);
            None
        }
        Err(e) => {
            debug!("failed to execute hostname: {e}");
            None
        }
    }
}
