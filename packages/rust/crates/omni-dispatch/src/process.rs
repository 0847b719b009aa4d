//! Out-of-process workers speaking line-delimited JSON over stdio.
//!
//! Host → worker, one object per line:
//!
//! ```text
//! {"type":"submit","requestId":"…","jobId":"ndvi","args":{…}}
//! {"type":"chunk","requestId":"…","chunk":{…}}      (zero or more)
//! {"type":"end","requestId":"…"}
//! {"type":"cancel","requestId":"…"}                 (caller abandoned the request)
//! ```
//!
//! Worker → host: `{"type":"result","value":…}` or `{"type":"error","message":"…"}`.
//! Replies may carry `requestId`; replies for another request are skipped.
//! Any other line (e.g. `{"type":"log",…}`) is ignored.
//!
//! A worker is only reused after it answered its last request. One that was
//! abandoned mid-request, exited, or broke the stream is disposed, so a late
//! reply can never reach the next caller.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio_util::sync::CancellationToken;

use crate::request::RequestId;
use crate::worker::{JobArgs, Worker, WorkerFactory, WorkerRequest};

/// Environment variable carrying the job id into the worker process.
pub const JOB_ID_ENV: &str = "OMNI_JOB_ID";

/// How worker processes are launched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessWorkerConfig {
    /// Interpreter to run the job file with (e.g. `node`); the job file is
    /// executed directly when unset.
    pub program: Option<String>,
    /// Extra interpreter arguments placed before the job path.
    pub program_args: Vec<String>,
}

impl ProcessWorkerConfig {
    fn command(&self, job_id: &str, job_path: &str) -> Command {
        let mut cmd = match &self.program {
            Some(program) => {
                let mut cmd = Command::new(program);
                cmd.args(&self.program_args).arg(job_path);
                cmd
            }
            None => Command::new(job_path),
        };
        cmd.env(JOB_ID_ENV, job_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }
}

/// Spawns one child process per worker.
#[derive(Debug, Clone, Default)]
pub struct ProcessWorkerFactory {
    config: ProcessWorkerConfig,
}

impl ProcessWorkerFactory {
    /// Factory launching workers as described by `config`.
    #[must_use]
    pub fn new(config: ProcessWorkerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl WorkerFactory for ProcessWorkerFactory {
    async fn create(&self, job_id: &str, job_path: &str) -> Result<Box<dyn Worker>> {
        let worker = ProcessWorker::spawn(&self.config, job_id, job_path)?;
        Ok(Box::new(worker))
    }
}

/// A worker child process.
pub struct ProcessWorker {
    job_id: String,
    child: Mutex<Child>,
    stdin: Arc<tokio::sync::Mutex<ChildStdin>>,
    stdout: tokio::sync::Mutex<Lines<BufReader<ChildStdout>>>,
    /// Cleared while a request is outstanding; set again once it is answered.
    reusable: AtomicBool,
}

impl ProcessWorker {
    fn spawn(config: &ProcessWorkerConfig, job_id: &str, job_path: &str) -> Result<Self> {
        let mut child = config
            .command(job_id, job_path)
            .spawn()
            .with_context(|| format!("spawn worker process for {job_path}"))?;
        let stdin = child.stdin.take().context("worker stdin not captured")?;
        let stdout = child.stdout.take().context("worker stdout not captured")?;
        tracing::debug!(
            event = "dispatch.process.spawned",
            job_id,
            job_path,
            pid = child.id(),
            "worker process started"
        );
        Ok(Self {
            job_id: job_id.to_string(),
            child: Mutex::new(child),
            stdin: Arc::new(tokio::sync::Mutex::new(stdin)),
            stdout: tokio::sync::Mutex::new(BufReader::new(stdout).lines()),
            reusable: AtomicBool::new(true),
        })
    }

    /// Forward a cancel line once `cancel` fires, unless the request ends first.
    fn spawn_cancel_watcher(
        &self,
        request_id: RequestId,
        cancel: CancellationToken,
        done: CancellationToken,
    ) {
        let stdin = Arc::clone(&self.stdin);
        let job_id = self.job_id.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    if let Err(error) = write_message(&stdin, &HostMessage::Cancel { request_id }).await {
                        tracing::debug!(
                            event = "dispatch.process.cancel_failed",
                            job_id = %job_id,
                            request_id = %request_id,
                            error = %error,
                            "could not forward cancellation to worker"
                        );
                    }
                }
                () = done.cancelled() => {}
            }
        });
    }
}

#[async_trait]
impl Worker for ProcessWorker {
    async fn submit(&self, request: WorkerRequest, cancel: CancellationToken) -> Result<Value> {
        let WorkerRequest {
            request_id,
            args: JobArgs { args, stream },
            ..
        } = request;

        let mut stdout = self.stdout.lock().await;
        self.reusable.store(false, Ordering::SeqCst);
        let done = CancellationToken::new();
        let _done_on_exit = done.clone().drop_guard();
        self.spawn_cancel_watcher(request_id, cancel, done);

        write_message(
            &self.stdin,
            &HostMessage::Submit {
                request_id,
                job_id: &self.job_id,
                args: &args,
            },
        )
        .await?;

        let writer = async {
            if let Some(mut stream) = stream {
                while let Some(chunk) = stream.recv().await {
                    write_message(
                        &self.stdin,
                        &HostMessage::Chunk {
                            request_id,
                            chunk: &chunk,
                        },
                    )
                    .await?;
                }
            }
            write_message(&self.stdin, &HostMessage::End { request_id }).await
        };
        let reader = read_reply(&mut stdout, request_id, &self.job_id);
        tokio::pin!(writer);
        tokio::pin!(reader);

        let mut writing = true;
        loop {
            tokio::select! {
                reply = &mut reader => {
                    let reply = reply?;
                    self.reusable.store(true, Ordering::SeqCst);
                    return reply.map_err(|message| anyhow!(message));
                }
                written = &mut writer, if writing => {
                    written?;
                    writing = false;
                }
            }
        }
    }

    fn is_reusable(&self) -> bool {
        self.reusable.load(Ordering::SeqCst)
    }

    fn dispose(&self) -> Result<()> {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        if child.try_wait().ok().flatten().is_some() {
            return Ok(());
        }
        child
            .start_kill()
            .with_context(|| format!("kill worker process <{}>", self.job_id))
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum HostMessage<'a> {
    Submit {
        request_id: RequestId,
        job_id: &'a str,
        args: &'a Value,
    },
    Chunk {
        request_id: RequestId,
        chunk: &'a Value,
    },
    End {
        request_id: RequestId,
    },
    Cancel {
        request_id: RequestId,
    },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum WorkerMessage {
    Result {
        #[serde(default)]
        request_id: Option<RequestId>,
        #[serde(default)]
        value: Value,
    },
    Error {
        #[serde(default)]
        request_id: Option<RequestId>,
        message: String,
    },
    #[serde(other)]
    Other,
}

async fn write_message(
    stdin: &tokio::sync::Mutex<ChildStdin>,
    message: &HostMessage<'_>,
) -> Result<()> {
    let mut line = serde_json::to_string(message).context("encode worker message")?;
    line.push('\n');
    let mut stdin = stdin.lock().await;
    stdin
        .write_all(line.as_bytes())
        .await
        .context("write to worker stdin")?;
    stdin.flush().await.context("flush worker stdin")
}

/// Read until this request's reply. The outer error means the stream is
/// broken; the inner one is an error reported by the worker.
async fn read_reply(
    stdout: &mut Lines<BufReader<ChildStdout>>,
    request_id: RequestId,
    job_id: &str,
) -> Result<std::result::Result<Value, String>> {
    let is_ours = |id: Option<RequestId>| id.is_none_or(|id| id == request_id);
    while let Some(line) = stdout
        .next_line()
        .await
        .context("read from worker stdout")?
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<WorkerMessage>(line) {
            Ok(WorkerMessage::Result { request_id: id, value }) if is_ours(id) => {
                return Ok(Ok(value));
            }
            Ok(WorkerMessage::Error { request_id: id, message }) if is_ours(id) => {
                return Ok(Err(message));
            }
            Ok(_) => {
                tracing::trace!(job_id, "skipping worker line: {line}");
            }
            Err(error) => {
                tracing::trace!(job_id, error = %error, "non-protocol worker line: {line}");
            }
        }
    }
    bail!("worker <{job_id}> exited before returning a result")
}
