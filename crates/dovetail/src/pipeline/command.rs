//! Step runner backed by ffmpeg, dovi_tool and mkvmerge.

use std::ffi::{OsStr, OsString};
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, info_span};

use crate::config::ToolsConfig;
use crate::logging::JobLog;
use crate::queue::Step;

use super::context::JobContext;
use super::step::{StepOutcome, StepRunner};

/// Builder for one external tool invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<OsString>,
    /// mkvmerge exits with 1 when it only emitted warnings.
    warnings_exit_ok: bool,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            warnings_exit_ok: false,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn warnings_exit_ok(mut self) -> Self {
        self.warnings_exit_ok = true;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Short tool name used to prefix log lines.
    pub fn tool_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.clone())
    }

    /// Command line for logging.
    pub fn display(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().map(|a| a.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }

    fn accepts(&self, status: ExitStatus) -> bool {
        status.success() || (self.warnings_exit_ok && status.code() == Some(1))
    }
}

/// A single process, or a producer whose stdout feeds a consumer's stdin.
#[derive(Debug, Clone)]
pub enum Invocation {
    Single(ToolCommand),
    Piped {
        producer: ToolCommand,
        consumer: ToolCommand,
    },
}

impl Invocation {
    pub fn display(&self) -> String {
        match self {
            Invocation::Single(cmd) => cmd.display(),
            Invocation::Piped { producer, consumer } => {
                format!("{} | {}", producer.display(), consumer.display())
            }
        }
    }
}

struct OutputLine {
    tool: String,
    text: String,
}

fn spawn_reader<R>(tool: String, source: R, tx: Sender<OutputLine>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf).trim_end().to_string();
                    if text.is_empty() {
                        continue;
                    }
                    if tx
                        .send(OutputLine {
                            tool: tool.clone(),
                            text,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
    })
}

#[derive(Default)]
struct ProcessSet {
    children: Vec<(ToolCommand, Child)>,
    readers: Vec<JoinHandle<()>>,
}

impl ProcessSet {
    /// Spawns `cmd` with stderr streamed to `tx`. Stdout is streamed too,
    /// unless `hand_off_stdout` is set, in which case it is returned for
    /// piping into the next process.
    fn spawn(
        &mut self,
        cmd: &ToolCommand,
        stdin: Stdio,
        hand_off_stdout: bool,
        tx: &Sender<OutputLine>,
    ) -> Result<Option<ChildStdout>, String> {
        let mut child = cmd
            .to_command()
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => format!("Command not found: {}", cmd.program()),
                _ => format!("Failed to start {}: {}", cmd.program(), e),
            })?;

        let tool = cmd.tool_name();
        if let Some(stderr) = child.stderr.take() {
            self.readers
                .push(spawn_reader(tool.clone(), stderr, tx.clone()));
        }

        let stdout = child.stdout.take();
        let handed_off = if hand_off_stdout {
            stdout
        } else {
            if let Some(stdout) = stdout {
                self.readers.push(spawn_reader(tool, stdout, tx.clone()));
            }
            None
        };

        self.children.push((cmd.clone(), child));
        Ok(handed_off)
    }

    fn kill_all(&mut self) {
        for (_, child) in &mut self.children {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    /// Waits for every process. Reports the first one that did not succeed.
    fn wait_all(self, log: &JobLog) -> Result<(), String> {
        for reader in self.readers {
            let _ = reader.join();
        }

        let mut failure = None;
        for (cmd, mut child) in self.children {
            let status = child
                .wait()
                .map_err(|e| format!("Failed to wait for {}: {}", cmd.tool_name(), e))?;
            if !cmd.accepts(status) {
                failure.get_or_insert_with(|| format!("{} failed ({})", cmd.tool_name(), status));
            } else if !status.success() {
                log.warn(&format!("{} finished with warnings ({})", cmd.tool_name(), status));
            }
        }

        match failure {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }
}

/// Runs `invocation` to completion, streaming tool output into `log`.
pub fn execute(invocation: &Invocation, log: &JobLog) -> Result<(), String> {
    let (tx, rx) = unbounded::<OutputLine>();
    let mut processes = ProcessSet::default();

    let spawned = match invocation {
        Invocation::Single(cmd) => processes.spawn(cmd, Stdio::null(), false, &tx).map(|_| ()),
        Invocation::Piped { producer, consumer } => {
            match processes.spawn(producer, Stdio::null(), true, &tx) {
                Ok(Some(pipe)) => processes
                    .spawn(consumer, Stdio::from(pipe), false, &tx)
                    .map(|_| ()),
                Ok(None) => Err(format!("{} produced no stdout pipe", producer.tool_name())),
                Err(e) => Err(e),
            }
        }
    };
    drop(tx);

    if let Err(reason) = spawned {
        processes.kill_all();
        return Err(reason);
    }

    for line in rx.iter() {
        log.tool_output(&line.tool, &line.text);
    }

    processes.wait_all(log)
}

/// Drives the real media tools for each step.
#[derive(Debug, Clone)]
pub struct CommandStepRunner {
    tools: ToolsConfig,
}

impl CommandStepRunner {
    pub fn new(tools: ToolsConfig) -> Self {
        Self { tools }
    }

    fn ffmpeg(&self) -> ToolCommand {
        ToolCommand::new(&self.tools.ffmpeg).args(["-hide_banner", "-loglevel", "error", "-y"])
    }

    fn dovi_tool(&self) -> ToolCommand {
        ToolCommand::new(&self.tools.dovi_tool)
    }

    /// The tool invocation for `step` in the context of one job.
    pub fn invocation(&self, step: Step, ctx: &JobContext) -> Invocation {
        let t = &self.tools;
        match step {
            Step::ExtractVideo => Invocation::Single(
                self.ffmpeg()
                    .arg("-i")
                    .arg(ctx.input_path())
                    .args(["-map", "0:v:0", "-c", "copy"])
                    .arg(ctx.artifact_path(Step::ExtractVideo)),
            ),
            Step::ConvertProfile => Invocation::Piped {
                producer: self
                    .ffmpeg()
                    .arg("-i")
                    .arg(ctx.artifact_path(Step::ExtractVideo))
                    .args(["-c:v", "copy", "-bsf:v", "hevc_mp4toannexb", "-f", "hevc", "-"]),
                consumer: self
                    .dovi_tool()
                    .args(["-m", "2", "convert", "--discard", "-", "-o"])
                    .arg(ctx.artifact_path(Step::ConvertProfile)),
            },
            Step::ExtractRpu => Invocation::Single(
                self.dovi_tool()
                    .arg("extract-rpu")
                    .arg(ctx.artifact_path(Step::ConvertProfile))
                    .arg("-o")
                    .arg(ctx.artifact_path(Step::ExtractRpu)),
            ),
            Step::ReencodeVideo => Invocation::Single(
                self.ffmpeg()
                    .arg("-i")
                    .arg(ctx.reencode_source())
                    .args(["-an", "-sn", "-dn", "-c:v", "libx265"])
                    .arg("-preset")
                    .arg(&t.preset)
                    .arg("-crf")
                    .arg(t.crf.to_string())
                    .arg("-tune")
                    .arg(&t.tune)
                    .arg("-g")
                    .arg(t.gop.to_string())
                    .arg("-keyint_min")
                    .arg(t.keyint_min.to_string())
                    .arg("-x265-params")
                    .arg(&t.x265_params)
                    .arg(ctx.artifact_path(Step::ReencodeVideo)),
            ),
            Step::InjectRpu => Invocation::Single(
                self.dovi_tool()
                    .arg("inject-rpu")
                    .arg("-i")
                    .arg(ctx.artifact_path(Step::ReencodeVideo))
                    .arg("--rpu-in")
                    .arg(ctx.artifact_path(Step::ExtractRpu))
                    .arg("-o")
                    .arg(ctx.artifact_path(Step::InjectRpu)),
            ),
            Step::ExtractChapters => Invocation::Single(
                self.ffmpeg()
                    .arg("-i")
                    .arg(ctx.input_path())
                    .args(["-f", "ffmetadata"])
                    .arg(ctx.artifact_path(Step::ExtractChapters)),
            ),
            Step::Remux => {
                let language = format!("0:{}", t.language);
                Invocation::Single(
                    ToolCommand::new(&t.mkvmerge)
                        .arg("-o")
                        .arg(ctx.artifact_path(Step::Remux))
                        .arg("--language")
                        .arg(&language)
                        .args(["--default-track", "0:yes"])
                        .arg(ctx.remux_video_source())
                        .arg("--language")
                        .arg(&language)
                        .arg("--audio-tracks")
                        .arg(&t.audio_tracks)
                        .arg("--subtitle-tracks")
                        .arg(&t.subtitle_tracks)
                        .arg("--chapters")
                        .arg(ctx.artifact_path(Step::ExtractChapters))
                        .arg("--no-video")
                        .arg(ctx.input_path())
                        .warnings_exit_ok(),
                )
            }
        }
    }
}

impl StepRunner for CommandStepRunner {
    fn run_step(&self, step: Step, ctx: &JobContext) -> StepOutcome {
        let _span = info_span!("tool", step = %step).entered();
        let invocation = self.invocation(step, ctx);
        ctx.log.info(&format!("Executing: {}", invocation.display()));

        match execute(&invocation, &ctx.log) {
            Ok(()) => {
                debug!("{} finished", step);
                StepOutcome::succeeded(ctx.artifact_path(step))
            }
            Err(reason) => StepOutcome::failed(reason),
        }
    }
}
