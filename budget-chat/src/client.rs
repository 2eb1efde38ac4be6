use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    transport::{LineReader, LineWriter},
};

type ServerLines = LineReader<OwnedReadHalf>;
type ServerWriter = LineWriter<OwnedWriteHalf>;

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut server, mut writer) = establish_connection(&args).await?;
    if let Some(name) = &args.name {
        writer
            .write_line(name)
            .await
            .context("failed to send name")?;
    }

    let mut stdin = LineReader::new(tokio::io::stdin());

    run_client_loop(&mut server, &mut writer, &mut stdin).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(args: &ClientArgs) -> Result<(ServerLines, ServerWriter)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((LineReader::new(reader), LineWriter::new(writer)))
}

async fn run_client_loop(
    server: &mut ServerLines,
    writer: &mut ServerWriter,
    stdin: &mut LineReader<tokio::io::Stdin>,
) -> Result<()> {
    loop {
        select! {
            server_line = server.read_line() => {
                if !handle_server_line(server_line).await? {
                    break;
                }
            }
            input = stdin.read_line() => {
                if !handle_stdin_input(input, writer).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_line(line: io::Result<Option<String>>) -> Result<bool> {
    match line? {
        Some(line) => {
            write_stdout(&line).await?;
            Ok(true)
        }
        None => {
            write_stderr("*** server closed the connection").await?;
            Ok(false)
        }
    }
}

async fn handle_stdin_input(
    input: io::Result<Option<String>>,
    writer: &mut ServerWriter,
) -> Result<bool> {
    let Some(text) = input? else {
        return Ok(false);
    };

    if text.eq_ignore_ascii_case("/quit") {
        write_stderr("*** leaving chat").await?;
        return Ok(false);
    }

    writer
        .write_line(&text)
        .await
        .context("failed to send line")?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut ServerWriter) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
