use anyhow::{Context, Result, bail};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, Lines},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{debug, info, warn};

use crate::{
    cli::ClientArgs,
    codec::{LoginReply, Message, ServerFrame, validate_name},
    error::CodecError,
    frame::{FrameReader, write_frame},
};

const MAX_SERVER_LINE_BYTES: usize = 64 * 1024;

type ServerReader = FrameReader<OwnedReadHalf>;

/// Lines typed by the user. `Lines::next_line` keeps a partial line buffered
/// when it loses a `select!` race.
type InputLines<R> = Lines<BufReader<R>>;

fn input_lines<R: AsyncRead>(reader: R) -> InputLines<R> {
    BufReader::new(reader).lines()
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut frames, mut writer) = establish_connection(&args).await?;
    let mut input = input_lines(io::stdin());

    let Some(name) = log_in(&mut frames, &mut writer, &mut input, args.name).await? else {
        return Ok(());
    };
    write_stdout(&format!("*** logged in as {name}")).await?;

    run_client_loop(&mut frames, &mut writer, &mut input).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

/// Turns a line typed by the user into a request.
///
/// `//name:text` is a direct message to `name`; anything else is a broadcast.
pub fn parse_input(line: &str) -> Result<Message, CodecError> {
    let direct = line
        .strip_prefix("//")
        .and_then(|rest| rest.split_once(':'))
        .filter(|(target, _)| !target.is_empty());

    let message = match direct {
        Some((target, body)) => Message::Direct {
            target: target.to_string(),
            body: body.to_string(),
        },
        None => Message::Broadcast {
            body: line.to_string(),
        },
    };

    message.validate()?;
    Ok(message)
}

async fn establish_connection(args: &ClientArgs) -> Result<(ServerReader, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((FrameReader::new(reader, MAX_SERVER_LINE_BYTES), writer))
}

/// Sends login requests until the server accepts one.
///
/// Returns `None` if stdin closes before a usable name was entered.
async fn log_in<R>(
    frames: &mut ServerReader,
    writer: &mut OwnedWriteHalf,
    input: &mut InputLines<R>,
    mut name: String,
) -> Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Err(error) = validate_name(&name) {
            write_stderr(&format!("!!! invalid name: {error}")).await?;
            write_stdout("*** enter another name:").await?;
            match input.next_line().await? {
                Some(next) => name = next,
                None => return Ok(None),
            }
            continue;
        }

        let request = Message::Login { name: name.clone() };
        write_frame(writer, &request.encode()).await?;

        match await_login_reply(frames).await? {
            LoginReply::Accepted => return Ok(Some(name)),
            LoginReply::NameTaken => {
                write_stdout(&format!("*** name '{name}' is taken, enter another name:")).await?;
                match input.next_line().await? {
                    Some(next) => name = next,
                    None => return Ok(None),
                }
            }
        }
    }
}

async fn await_login_reply(frames: &mut ServerReader) -> Result<LoginReply> {
    loop {
        let Some(unit) = frames.next_frame().await? else {
            bail!("server closed the connection during login");
        };
        match ServerFrame::decode(&unit) {
            ServerFrame::Login(reply) => return Ok(reply),
            ServerFrame::Text(line) => write_stdout(&line).await?,
        }
    }
}

async fn run_client_loop<R>(
    frames: &mut ServerReader,
    writer: &mut OwnedWriteHalf,
    input: &mut InputLines<R>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        select! {
            server_frame = frames.next_frame() => {
                if !handle_server_frame(server_frame).await? {
                    break;
                }
            }
            line = input.next_line() => {
                if !handle_input_line(line, writer).await? {
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

async fn handle_server_frame(unit: io::Result<Option<Vec<u8>>>) -> Result<bool> {
    match unit? {
        Some(unit) => {
            match ServerFrame::decode(&unit) {
                ServerFrame::Text(line) => write_stdout(&line).await?,
                ServerFrame::Login(reply) => debug!(?reply, "ignoring stray login reply"),
            }
            Ok(true)
        }
        None => {
            write_stdout("*** server closed the connection").await?;
            Ok(false)
        }
    }
}

async fn handle_input_line(
    line: io::Result<Option<String>>,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    let Some(line) = line? else {
        return Ok(false);
    };

    let text = line.trim();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving chat").await?;
        return Ok(false);
    }

    match parse_input(text) {
        Ok(message) => write_frame(writer, &message.encode()).await?,
        Err(error) => {
            debug!(%error, "refusing to send input");
            write_stderr("!!! message contains reserved characters").await?;
        }
    }
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
