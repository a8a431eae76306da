mod logger;
mod settings;

use std::fmt::Write as _;
use std::process::ExitCode;

use clap::Parser;
use receipt_print::{
    DryRunTransport, JobAction, JobReport, PrintJob, PrintResult, PrintWorker, TransportFactory,
};
use settings::{Cli, Command};
use tokio::runtime::Handle;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    logger::init_logger(&cli.log_level, cli.json_logs)?;

    match run(&cli).await {
        Ok(summary) => {
            println!("{}", summary);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            tracing::error!(kind = %e.kind(), error = %e, "Print failed");
            eprintln!("{}: {}", e.kind(), e);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run(cli: &Cli) -> PrintResult<String> {
    let config = settings::device_config(cli.config.as_deref(), cli.dry_run)?;
    tracing::info!(device = %config.transport, profile = %config.profile, "Device config loaded");

    let job = match &cli.command {
        Command::Print { image } => PrintJob::print(settings::load_image(image)?, config),
        Command::Feed { lines } => PrintJob::new(JobAction::Feed { lines: *lines }, None, config),
        Command::Cut => PrintJob::cut(config),
    };

    let dry = cli.dry_run.then(DryRunTransport::new);
    let factory = match &dry {
        Some(dry) => TransportFactory::dry_run(dry),
        None => TransportFactory::live(),
    };

    let worker = PrintWorker::new(Handle::current(), factory);
    let report = worker.submit(job)?.wait().await?;

    Ok(match dry {
        Some(dry) => dry_run_summary(&report, &dry.chunks()),
        None => format!(
            "{} job {} sent {} bytes via {}",
            report.action, report.job_id, report.bytes_sent, report.backend
        ),
    })
}

/// Number of leading bytes shown per chunk
const PREVIEW_BYTES: usize = 16;

fn dry_run_summary(report: &JobReport, chunks: &[Vec<u8>]) -> String {
    let mut out = format!(
        "dry run: {} job {} would send {} bytes in {} chunk(s)",
        report.action,
        report.job_id,
        report.bytes_sent,
        chunks.len()
    );
    for (i, chunk) in chunks.iter().enumerate() {
        let _ = write!(out, "\n  #{} {:>7} bytes ", i + 1, chunk.len());
        for byte in chunk.iter().take(PREVIEW_BYTES) {
            let _ = write!(out, " {:02x}", byte);
        }
        if chunk.len() > PREVIEW_BYTES {
            out.push_str(" ...");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use receipt_print::JobId;

    #[test]
    fn test_dry_run_summary() {
        let report = JobReport {
            job_id: JobId::new(),
            action: JobAction::Cut,
            backend: "dry_run",
            bytes_sent: 6,
        };
        let summary = dry_run_summary(&report, &[vec![0x1b, 0x40, 0x1d, 0x56, 0x42, 0x00]]);

        assert!(summary.starts_with("dry run: cut job"));
        assert!(summary.contains("6 bytes in 1 chunk(s)"));
        assert!(summary.ends_with("1b 40 1d 56 42 00"));
        assert!(!summary.contains("..."));
    }

    #[test]
    fn test_long_chunks_are_truncated() {
        let report = JobReport {
            job_id: JobId::new(),
            action: JobAction::Print,
            backend: "dry_run",
            bytes_sent: 40,
        };
        let summary = dry_run_summary(&report, &[vec![0xaa; 40]]);
        assert!(summary.ends_with(" ..."));
        assert_eq!(summary.matches("aa").count(), PREVIEW_BYTES);
    }
}
