use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::Sender;
use rand::{distributions::Alphanumeric, Rng};
use serde_json::{json, Value};
use tracing::{debug, warn};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::feed::Entry;
use crate::playback::{MediaEvent, MediaEventKind, MediaFactory, MediaHandle, PlayError};
use crate::resolve::is_hls_url;

const IPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const IPC_CONNECT_RETRY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSettings {
    pub mpv_path: String,
    pub fullscreen: bool,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            mpv_path: "mpv".into(),
            fullscreen: false,
        }
    }
}

/// One mpv window per active entry, controlled over mpv's JSON IPC.
pub struct MpvFactory {
    settings: Arc<PlayerSettings>,
    events: Sender<MediaEvent>,
}

impl MpvFactory {
    pub fn new(settings: PlayerSettings, events: Sender<MediaEvent>) -> Self {
        Self {
            settings: Arc::new(settings),
            events,
        }
    }
}

impl MediaFactory for MpvFactory {
    fn create(&self, entry: &Entry, url: &str) -> Box<dyn MediaHandle> {
        Box::new(MpvHandle {
            settings: self.settings.clone(),
            entry_id: entry.id.clone(),
            title: media_title(entry),
            url: url.to_string(),
            muted: Arc::new(AtomicBool::new(true)),
            session: None,
            events: self.events.clone(),
        })
    }
}

fn media_title(entry: &Entry) -> String {
    let username = entry.meta.username.trim();
    let description = entry.meta.description.trim();
    match (username.is_empty(), description.is_empty()) {
        (false, false) => format!("{username} - {description}"),
        (false, true) => username.to_string(),
        (true, false) => description.to_string(),
        (true, true) => entry.id.clone(),
    }
}

struct MpvSession {
    child: Child,
    ipc_path: Option<String>,
}

impl MpvSession {
    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn stop(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(path) = self.ipc_path.take() {
            cleanup_ipc_path(&path);
        }
    }
}

pub struct MpvHandle {
    settings: Arc<PlayerSettings>,
    entry_id: String,
    title: String,
    url: String,
    /// Wanted mute state, shared with the event reader so a change made
    /// before the IPC socket exists is applied once it does.
    muted: Arc<AtomicBool>,
    session: Option<MpvSession>,
    events: Sender<MediaEvent>,
}

impl MpvHandle {
    fn launch_args(&self, ipc_path: Option<&str>) -> Vec<String> {
        let mut args = vec![self.url.clone()];
        if self.settings.fullscreen {
            args.push("--fullscreen".to_string());
        }
        let muted = self.muted.load(Ordering::SeqCst);
        args.push(format!("--mute={}", if muted { "yes" } else { "no" }));
        if is_hls_url(&self.url) {
            // Start on the lowest variant; mpv climbs once buffered.
            args.push("--hls-bitrate=min".to_string());
        }
        args.push("--force-window=yes".to_string());
        args.push("--keep-open=no".to_string());
        args.push("--loop-file=inf".to_string());
        args.push("--really-quiet".to_string());
        args.push("--no-config".to_string());
        args.push("--ytdl=no".to_string());
        args.push(format!("--user-agent=snapfeed/{}", crate::VERSION));
        if let Some(path) = ipc_path {
            args.push(format!("--input-ipc-server={path}"));
        }
        if !self.title.is_empty() {
            args.push(format!("--force-media-title={}", self.title));
        }
        args
    }

    fn spawn(&mut self) -> Result<(), PlayError> {
        let ipc_path = unique_ipc_path();
        if let Some(path) = &ipc_path {
            cleanup_ipc_path(path);
        }
        let args = self.launch_args(ipc_path.as_deref());
        debug!(target: "player.mpv", entry = %self.entry_id, ?args, "spawn");

        let child = Command::new(&self.settings.mpv_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| PlayError::Backend(format!("launch mpv to play {}: {err}", self.url)))?;

        if let Some(path) = &ipc_path {
            spawn_event_reader(
                path.clone(),
                self.entry_id.clone(),
                self.muted.clone(),
                self.events.clone(),
            );
        }
        self.session = Some(MpvSession { child, ipc_path });
        Ok(())
    }

    fn send(&self, command: MpvCommand) {
        let Some(path) = self.session.as_ref().and_then(|s| s.ipc_path.as_deref()) else {
            return;
        };
        if let Err(err) = send_ipc_command(path, command) {
            debug!(target: "player.mpv", entry = %self.entry_id, %err, "ipc_command_failed");
        }
    }
}

impl MediaHandle for MpvHandle {
    fn play(&mut self) -> Result<(), PlayError> {
        if self.url.trim().is_empty() {
            return Err(PlayError::Backend("video URL missing".into()));
        }
        if let Some(session) = self.session.as_mut() {
            if session.is_running() {
                self.send(MpvCommand::SetPause(false));
                return Ok(());
            }
        }
        if let Some(session) = self.session.take() {
            session.stop();
        }
        self.spawn()
    }

    /// Stops the player process; the next `play` starts a fresh one.
    fn pause(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(target: "player.mpv", entry = %self.entry_id, "stop");
            session.stop();
        }
    }

    fn set_muted(&mut self, muted: bool) {
        // Stored first: a reader that connects after a failed send picks it up.
        self.muted.store(muted, Ordering::SeqCst);
        self.send(MpvCommand::SetMute(muted));
    }
}

impl Drop for MpvHandle {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop();
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MpvCommand {
    SetMute(bool),
    SetPause(bool),
}

fn command_payload(command: MpvCommand) -> Value {
    match command {
        MpvCommand::SetMute(muted) => json!(["set_property", "mute", muted]),
        MpvCommand::SetPause(paused) => json!(["set_property", "pause", paused]),
    }
}

fn send_ipc_command(path: &str, command: MpvCommand) -> Result<()> {
    let mut stream = connect_ipc(path)?;
    write_command(&mut stream, command)
}

fn write_command<W: Write + ?Sized>(stream: &mut W, command: MpvCommand) -> Result<()> {
    let payload = json!({
        "command": command_payload(command),
    });
    let serialized = serde_json::to_string(&payload).context("serialize mpv command")?;
    stream
        .write_all(serialized.as_bytes())
        .context("write mpv IPC command")?;
    stream
        .write_all(b"\n")
        .context("write mpv IPC command terminator")?;
    Ok(())
}

/// Maps one line of mpv IPC output to a media event.
pub fn parse_event(line: &str) -> Option<MediaEventKind> {
    let value: Value = serde_json::from_str(line).ok()?;
    match value.get("event")?.as_str()? {
        "playback-restart" => Some(MediaEventKind::FirstFrame),
        "end-file" => {
            let reason = value.get("reason").and_then(Value::as_str).unwrap_or("");
            if reason != "error" {
                return None;
            }
            let message = value
                .get("file_error")
                .and_then(Value::as_str)
                .unwrap_or("playback failed");
            Some(MediaEventKind::Error(message.to_string()))
        }
        _ => None,
    }
}

fn spawn_event_reader(
    path: String,
    entry_id: String,
    muted: Arc<AtomicBool>,
    events: Sender<MediaEvent>,
) {
    thread::spawn(move || {
        let deadline = Instant::now() + IPC_CONNECT_TIMEOUT;
        let mut stream = loop {
            match connect_ipc(&path) {
                Ok(stream) => break stream,
                Err(_) if Instant::now() < deadline => thread::sleep(IPC_CONNECT_RETRY),
                Err(err) => {
                    warn!(target: "player.mpv", entry = %entry_id, %err, "ipc_unavailable");
                    return;
                }
            }
        };
        let wanted = muted.load(Ordering::SeqCst);
        if let Err(err) = write_command(&mut stream, MpvCommand::SetMute(wanted)) {
            debug!(target: "player.mpv", entry = %entry_id, %err, "ipc_mute_sync_failed");
        }
        let reader = BufReader::new(stream);
        for line in reader.lines().map_while(Result::ok) {
            let Some(kind) = parse_event(&line) else {
                continue;
            };
            let event = MediaEvent {
                entry_id: entry_id.clone(),
                kind,
            };
            if events.send(event).is_err() {
                return;
            }
        }
    });
}

trait IpcStream: Read + Write + Send {}

impl<T: Read + Write + Send> IpcStream for T {}

#[cfg(unix)]
fn connect_ipc(path: &str) -> Result<Box<dyn IpcStream>> {
    let stream =
        UnixStream::connect(path).with_context(|| format!("connect to mpv IPC socket {path}"))?;
    Ok(Box::new(stream))
}

#[cfg(target_os = "windows")]
fn connect_ipc(path: &str) -> Result<Box<dyn IpcStream>> {
    let pipe = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("connect to mpv IPC named pipe {path}"))?;
    Ok(Box::new(pipe))
}

#[cfg(all(not(unix), not(target_os = "windows")))]
fn connect_ipc(_path: &str) -> Result<Box<dyn IpcStream>> {
    Err(anyhow!("mpv IPC is not supported on this platform"))
}

fn ipc_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}

#[cfg(unix)]
fn unique_ipc_path() -> Option<String> {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "snapfeed-mpv-{}-{}.sock",
        std::process::id(),
        ipc_suffix()
    ));
    Some(path.to_string_lossy().to_string())
}

#[cfg(target_os = "windows")]
fn unique_ipc_path() -> Option<String> {
    Some(format!(
        r"\\.\pipe\snapfeed-mpv-{}-{}",
        std::process::id(),
        ipc_suffix()
    ))
}

#[cfg(all(not(unix), not(target_os = "windows")))]
fn unique_ipc_path() -> Option<String> {
    None
}

#[cfg(unix)]
fn cleanup_ipc_path(path: &str) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            debug!(target: "player.mpv", %path, %err, "ipc_cleanup_failed");
        }
    }
}

#[cfg(not(unix))]
fn cleanup_ipc_path(_path: &str) {}

/// Checks that the configured mpv binary can be started at all.
pub fn probe(mpv_path: &str) -> Result<()> {
    let status = Command::new(mpv_path)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .with_context(|| format!("run {mpv_path} --version"))?;
    if !status.success() {
        return Err(anyhow!("{mpv_path} --version exited with {status}"));
    }
    Ok(())
}
