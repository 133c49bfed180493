use std::io::{self, Write};

use serde::Serialize;

use crate::app::{PurgeResult, StatsResult};
use crate::biocyc::RegulationSummary;
use crate::envelope::ErrorEnvelope;
use crate::fragment::GeneSummary;

/// Pretty-printed JSON on stdout, one document per command.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &GeneSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_regulation(summary: &RegulationSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_stats(result: &StatsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_purge(result: &PurgeResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_error(envelope: &ErrorEnvelope) -> io::Result<()> {
        Self::print_json(envelope)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
