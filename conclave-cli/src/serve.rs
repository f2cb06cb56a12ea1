//! `conclave serve`: one instance answering JSON-lines tool calls

use conclave::{Capabilities, ConclaveConfig, Instance, SessionGroup};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::info;

use crate::error::CliError;

pub async fn run(config: ConclaveConfig) -> Result<(), CliError> {
    let group = SessionGroup::new(&config);
    let instance = Instance::start(&group, config, Capabilities::default()).await?;
    let instance_id = instance.id();
    instance.on_leadership_change(move |is_leader| {
        info!(instance_id = %instance_id, is_leader, "Serve role changed");
    });
    info!(instance_id = %instance_id, "Serving tool calls on stdin");

    let served = tokio::select! {
        served = serve_lines(&instance, BufReader::new(tokio::io::stdin()), tokio::io::stdout()) => served,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
            Ok(0)
        }
    };

    instance.shutdown().await;
    let count = served?;
    info!(requests = count, "Serve loop finished");
    Ok(())
}

/// Answer every non-blank request line with one response line, until EOF.
/// Returns the number of requests answered.
pub async fn serve_lines<R, W>(instance: &Instance, reader: R, mut writer: W) -> Result<usize, CliError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut count = 0;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = instance.handle_line(&line).await;
        writer.write_all(response.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        count += 1;
    }
    Ok(count)
}
