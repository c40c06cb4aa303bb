use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow, ensure};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn cli_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("aio_chat");
    let mut server = ServerProcess::start(binary).await?;

    let mut alice = ClientProcess::spawn(binary, "alice", &server.addr)?;
    alice.expect("*** logged in as alice").await?;

    // A second "alice" is turned away and retries as "bob".
    let mut bob = ClientProcess::spawn(binary, "alice", &server.addr)?;
    bob.expect("*** name 'alice' is taken, enter another name:")
        .await?;
    bob.send("bob").await?;
    bob.expect("*** logged in as bob").await?;

    // Broadcasts reach everyone, the sender included.
    alice.send("hi").await?;
    bob.expect("alice says: hi").await?;
    alice.expect("alice says: hi").await?;

    // Direct messages reach only the target.
    alice.send("//bob:secret").await?;
    bob.expect("alice says (private): secret").await?;
    alice.send("after").await?;
    alice.expect("alice says: after").await?;
    bob.expect("alice says: after").await?;

    // Bob leaves; a whisper to him vanishes and broadcasts only echo to alice.
    bob.send("/quit").await?;
    bob.expect("*** leaving chat").await?;
    bob.wait_success().await?;

    alice.send("//bob:gone?").await?;
    alice.send("still here").await?;
    alice.expect("alice says: still here").await?;

    alice.send("/quit").await?;
    alice.expect("*** leaving chat").await?;
    alice.wait_success().await?;

    server.child.kill().await?;
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn interrupted_server_says_goodbye_before_exiting() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("aio_chat");
    let mut server = ServerProcess::start(binary).await?;

    let mut carol = ClientProcess::spawn(binary, "carol", &server.addr)?;
    carol.expect("*** logged in as carol").await?;

    server.interrupt().await?;

    carol.expect("*** server shutting down").await?;
    carol.expect("*** server closed the connection").await?;
    carol.wait_success().await?;

    let status = timeout(READ_TIMEOUT, server.child.wait())
        .await
        .context("server did not exit after SIGINT")??;
    ensure!(status.success(), "server exited with {status}");
    Ok(())
}

#[tokio::test]
async fn server_reports_bind_failure() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("aio_chat");
    let occupied = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = occupied.local_addr()?.to_string();

    let output = timeout(
        READ_TIMEOUT,
        Command::new(binary)
            .args(["server", "--listen", addr.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output(),
    )
    .await
    .context("server did not exit")??;

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("failed to bind"),
        "unexpected stderr: {stderr}"
    );
    Ok(())
}

struct ServerProcess {
    child: Child,
    addr: String,
    // Held open so log writes never hit a closed pipe.
    _logs: BufReader<ChildStdout>,
}

impl ServerProcess {
    /// Starts a server on an ephemeral port and waits for its banner.
    async fn start(binary: &Path) -> Result<Self> {
        let mut child = Command::new(binary)
            .args(["server", "--listen", "127.0.0.1:0", "--workers", "2"])
            .env("RUST_LOG", "info")
            .env("NO_COLOR", "1")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("failed to spawn server")?;
        let mut logs = BufReader::new(child.stdout.take().context("server stdout")?);

        let banner = next_line(&mut logs)
            .await?
            .context("server exited before listening")?;
        let addr = banner
            .rsplit(' ')
            .next()
            .filter(|addr| addr.contains(':'))
            .ok_or_else(|| anyhow!("unexpected server banner: {banner}"))?
            .to_string();

        Ok(Self {
            child,
            addr,
            _logs: logs,
        })
    }

    #[cfg(unix)]
    async fn interrupt(&self) -> Result<()> {
        let pid = self.child.id().context("server already exited")?;
        let pid = pid.to_string();
        let status = Command::new("kill")
            .args(["-INT", pid.as_str()])
            .status()
            .await?;
        ensure!(status.success(), "kill -INT {pid} failed");
        Ok(())
    }
}

struct ClientProcess {
    name: String,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ClientProcess {
    fn spawn(binary: &Path, name: &str, addr: &str) -> Result<Self> {
        let mut child = Command::new(binary)
            .args(["client", "--name", name, "--server", addr])
            .env("RUST_LOG", "warn")
            .env("NO_COLOR", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn client {name}"))?;

        Ok(Self {
            name: name.to_string(),
            stdin: child.stdin.take().context("client stdin")?,
            stdout: BufReader::new(child.stdout.take().context("client stdout")?),
            child,
        })
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(format!("{line}\n").as_bytes())
            .await
            .with_context(|| format!("{} failed to send '{line}'", self.name))?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn expect(&mut self, expected: &str) -> Result<()> {
        let line = next_line(&mut self.stdout)
            .await
            .with_context(|| format!("{} waiting for '{expected}'", self.name))?
            .ok_or_else(|| anyhow!("{}: output closed before '{expected}'", self.name))?;
        ensure!(
            line == expected,
            "{}: expected '{expected}', got '{line}'",
            self.name
        );
        Ok(())
    }

    async fn wait_success(&mut self) -> Result<()> {
        let status = timeout(READ_TIMEOUT, self.child.wait())
            .await
            .with_context(|| format!("{} did not exit", self.name))??;
        ensure!(status.success(), "{} exited with {status}", self.name);
        Ok(())
    }
}

async fn next_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let read = timeout(READ_TIMEOUT, reader.read_line(&mut line))
        .await
        .context("timed out waiting for a line")??;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}
