use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use terminal_chat::message::{ClientEvent, ServerEvent, read_message, write_message};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpStream,
    process::{Child, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn server_binary_hosts_a_room() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("terminal-chat");

    let (mut server_child, mut server_stdout) = spawn_server(&binary).await?;
    let addr = read_server_addr(&mut server_stdout).await?;

    // Drain further server logs in the background so the pipe never fills.
    let server_log_task = tokio::spawn(async move {
        drain_stdout(server_stdout).await;
    });

    let stream = TcpStream::connect(addr.as_str())
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let welcome = next_event(&mut reader, "waiting for welcome").await?;
    assert_eq!(
        welcome,
        ServerEvent::info("Welcome! Please set a nickname using /nick <name>")
    );

    write_message(&mut writer, &ClientEvent::SetNick { nick: "erin".into() }).await?;
    next_event(&mut reader, "waiting for nickname notice").await?;
    assert_eq!(
        next_event(&mut reader, "waiting for nick_success").await?,
        ServerEvent::NickSuccess {
            nick: "erin".into()
        }
    );

    write_message(&mut writer, &ClientEvent::JoinPublic { room: "#e2e".into() }).await?;
    assert_eq!(
        next_event(&mut reader, "waiting for room_joined").await?,
        ServerEvent::RoomJoined {
            room: "#e2e".into()
        }
    );
    assert_eq!(
        next_event(&mut reader, "waiting for arrival notice").await?,
        ServerEvent::info(">> erin joined #e2e")
    );

    write_message(&mut writer, &ClientEvent::ListRooms).await?;
    assert_eq!(
        next_event(&mut reader, "waiting for room listing").await?,
        ServerEvent::info("Public Rooms: #e2e")
    );

    // The server stays up after clients disconnect; terminate it manually.
    drop(writer);
    drop(reader);
    let _ = server_child.kill().await;
    let _ = server_child.wait().await;
    let _ = server_log_task.await;

    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn interrupt_flushes_shutdown_notice_before_exit() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("terminal-chat");

    let (mut server_child, mut server_stdout) = spawn_server(&binary).await?;
    let addr = read_server_addr(&mut server_stdout).await?;
    let server_log_task = tokio::spawn(async move {
        drain_stdout(server_stdout).await;
    });

    let stream = TcpStream::connect(addr.as_str())
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    let (reader, _writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    next_event(&mut reader, "waiting for welcome").await?;

    let pid = server_child.id().context("server already exited")?;
    let status = Command::new("kill")
        .arg("-INT")
        .arg(pid.to_string())
        .status()
        .await
        .context("failed to run kill")?;
    assert!(status.success(), "kill -INT failed: {status}");

    assert_eq!(
        next_event(&mut reader, "waiting for shutdown notice").await?,
        ServerEvent::info("Server shutting down.")
    );
    let end = timeout(READ_TIMEOUT, read_message::<_, ServerEvent>(&mut reader)).await??;
    assert_eq!(end, None, "server should close the connection after the notice");

    let exit = timeout(READ_TIMEOUT, server_child.wait()).await??;
    assert!(exit.success(), "server exited with {exit}");
    let _ = server_log_task.await;

    Ok(())
}

async fn spawn_server(binary: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("server")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().context("failed to spawn server")?;
    let stdout = child
        .stdout
        .take()
        .context("server stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_server_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    loop {
        let line = read_line(reader)
            .await?
            .context("server did not emit listening address")?;
        if !line.contains("server listening on") {
            continue;
        }
        let addr = line
            .split_whitespace()
            .last()
            .context("unexpected server banner format")?;
        if !addr.contains(':') {
            return Err(anyhow!("server banner missing socket: {line}"));
        }
        return Ok(addr.to_string());
    }
}

async fn next_event(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    description: &str,
) -> Result<ServerEvent> {
    match timeout(READ_TIMEOUT, read_message::<_, ServerEvent>(reader)).await {
        Ok(Ok(Some(event))) => Ok(event),
        Ok(Ok(None)) => Err(anyhow!("{description}: connection closed")),
        Ok(Err(err)) => {
            Err(anyhow::Error::from(err).context(format!("{description}: read failed")))
        }
        Err(_) => Err(anyhow!("{description}: timed out")),
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let read_future = reader.read_line(&mut line);
    let bytes_io = match timeout(READ_TIMEOUT, read_future).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    let byte_count = bytes_io?;
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}
