use std::io::{self, Write};

use serde::Serialize;

use crate::app::{FetchSourcesResult, PipelineResult, ProgressEvent, ProgressSink, StatusResult};
use crate::oyez::DiscoveryReport;
use crate::pipeline::Estimate;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

/// Machine-readable results on stdout; logs stay on stderr.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_discovery(result: &DiscoveryReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_fetch_sources(result: &FetchSourcesResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_pipeline(result: &PipelineResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_estimate(result: &Estimate) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_status(result: &StatusResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}
