//! Device protocol collaborator that shells out to an external helper.
//!
//! The helper is described by a command template; `{action}`, `{mac}`,
//! `{ip}`, `{user}`, `{pass}` and `{args}` are substituted per word after the
//! template is split, so values containing spaces stay one argument. Exit
//! status 0 is success and stdout is the result.

use async_trait::async_trait;
use netfleet_core::{DeviceProtocol, DeviceRecord, DeviceRequest, FleetError, Result, ScanProtocol};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

pub struct ExternalProtocol {
    template: Vec<String>,
    timeout: Duration,
}

impl ExternalProtocol {
    pub fn new(template: &str, timeout: Duration) -> Result<Self> {
        let template = shell_words::split(template)
            .map_err(|e| FleetError::Rejected(format!("bad protocol command template: {}", e)))?;
        Ok(Self { template, timeout })
    }

    fn render(&self, request: &DeviceRequest) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.template.len());
        for word in &self.template {
            // {args} alone expands to zero or more words
            if word == "{args}" {
                argv.extend(request.args.split_whitespace().map(String::from));
                continue;
            }
            argv.push(
                word.replace("{action}", request.action)
                    .replace("{mac}", &request.mac)
                    .replace("{ip}", &request.ip)
                    .replace("{user}", &request.user)
                    .replace("{pass}", &request.pass)
                    .replace("{args}", &request.args),
            );
        }
        argv
    }

    async fn run(&self, request: &DeviceRequest) -> Result<String> {
        let argv = self.render(request);
        let Some((program, args)) = argv.split_first() else {
            return Err(FleetError::Execution("no device protocol helper configured".into()));
        };
        debug!(action = request.action, mac = %request.mac, "running protocol helper");

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(program)
                .args(args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| FleetError::Execution(format!("{} timed out after {}s", request.action, self.timeout.as_secs())))?
        .map_err(|e| FleetError::Execution(format!("failed to start {}: {}", program, e)))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).to_string());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let reason = if stderr.is_empty() {
            format!("{} exited with {}", request.action, output.status.code().unwrap_or(-1))
        } else {
            stderr
        };
        Err(FleetError::Execution(reason))
    }
}

#[async_trait]
impl DeviceProtocol for ExternalProtocol {
    async fn execute(&self, request: DeviceRequest) -> Result<String> {
        self.run(&request).await
    }

    async fn scan(&self, protocol: ScanProtocol) -> Result<Vec<DeviceRecord>> {
        let args = match protocol {
            ScanProtocol::Gwd => "gwd",
            ScanProtocol::Snmp => "snmp",
        };
        let request = DeviceRequest { action: "scan", args: args.to_string(), ..Default::default() };
        let stdout = self.run(&request).await?;
        Ok(serde_json::from_str(&stdout)?)
    }
}
