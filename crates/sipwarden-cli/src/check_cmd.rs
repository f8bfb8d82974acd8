//! `sipwarden check`: resolve the worker executable and preview the
//! rendered worker config. Nothing is spawned and nothing is written.

use anyhow::Result;

use sipwarden_core::locator::WorkerLocator;

use crate::config::SipwardenConfig;

pub fn run_check(config: &SipwardenConfig) -> Result<()> {
    let locator = WorkerLocator::default();
    let executable = locator.locate()?;

    println!("worker executable: {}", executable.display());
    println!("transport: {}", config.transport);
    println!("http: {}:{}", config.http_bind, config.http_port);
    println!();
    println!("rendered worker config:");
    for line in config.params.render(config.transport).lines() {
        println!("  {}", mask_password(line));
    }

    Ok(())
}

/// The preview goes to a terminal; never echo the account password.
fn mask_password(line: &str) -> String {
    if line.starts_with("--password") {
        "--password ********".to_string()
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_line_is_masked() {
        assert_eq!(mask_password("--password hunter2"), "--password ********");
    }

    #[test]
    fn other_lines_pass_through() {
        assert_eq!(mask_password("--null-audio"), "--null-audio");
        assert_eq!(
            mask_password("--id sip:1001@sip.example.test"),
            "--id sip:1001@sip.example.test"
        );
    }
}
