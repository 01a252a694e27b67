//! Structural chunking delegated to a long-lived helper process.
//!
//! The helper reads one JSON request per line on stdin and answers one JSON
//! reply per line on stdout:
//!
//! ```text
//! -> {"id":1,"filepath":"src/App.java","content":"...","max_size":2000}
//! <- {"id":1,"chunks":[{"text":"...","start_line":1,"end_line":9,"node_type":"class_declaration"}]}
//! <- {"id":2,"error":"unsupported syntax"}
//! ```
//!
//! Replies are matched to requests by id; a reply without an id answers the
//! oldest outstanding request. A request that times out kills the helper,
//! which is restarted on the next request. After too many restarts the tier
//! disables itself and every file falls through to the next strategy.


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};

use super::{ChunkDraft, ChunkingError, ChunkingStrategy, Language, SourceFile};

pub const STRATEGY_NAME: &str = "external";

/// Restarts tolerated before the tier disables itself
pub const MAX_RESTARTS: usize = 5;
const HELPER_EXITED: &str = "chunker process exited";

type ReplySender = oneshot::Sender<Result<Vec<ExternalChunk>, String>>;
type PendingReplies = Arc<StdMutex<BTreeMap<u64, ReplySender>>>;

#[derive(Debug, Serialize)]
struct ChunkRequest<'a> {
    id: u64,
    filepath: &'a str,
    content: &'a str,
    max_size: usize,
}

#[derive(Debug, Deserialize)]
struct ChunkReply {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    chunks: Option<Vec<ExternalChunk>>,
    #[serde(default)]
    error: Option<String>,
}

/// One chunk as reported by the helper
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalChunk {
    pub text: String,
    #[serde(default)]
    pub contextualized: Option<String>,
    #[serde(default)]
    pub start_line: u32,
    #[serde(default)]
    pub end_line: u32,
    #[serde(default)]
    pub node_type: Option<String>,
    #[serde(default)]
    pub scope: Vec<Value>,
    #[serde(default)]
    pub signatures: Vec<Value>,
    #[serde(default)]
    pub imports: Vec<Value>,
}

impl ExternalChunk {
    fn into_draft(self) -> ChunkDraft {
        let (start_line, end_line) = if self.start_line == 0 {
            super::line_span(1, &self.text)
        } else {
            (self.start_line, self.end_line.max(self.start_line))
        };

        ChunkDraft {
            contextualized: self.contextualized.filter(|text| !text.trim().is_empty()),
            start_line,
            end_line,
            node_kind: self.node_type.unwrap_or_else(|| "block".to_string()),
            scope: normalize_values(self.scope),
            imports: normalize_values(self.imports),
            signatures: normalize_values(self.signatures),
            text: self.text,
        }
    }
}

/// Flatten loosely-typed metadata to display strings
fn normalize_values(values: Vec<Value>) -> Vec<String> {
    values
        .into_iter()
        .filter_map(|value| match value {
            Value::Null => None,
            Value::String(text) => Some(text),
            Value::Object(map) => match map.get("name") {
                Some(Value::String(name)) => Some(name.clone()),
                _ => Some(Value::Object(map).to_string()),
            },
            other => Some(other.to_string()),
        })
        .filter(|text| !text.trim().is_empty())
        .collect()
}

struct Worker {
    child: Child,
    stdin: ChildStdin,
    pending: PendingReplies,
}

pub struct ExternalChunker {
    command: Vec<String>,
    languages: HashSet<Language>,
    timeout: Duration,
    max_chars: usize,
    worker: Mutex<Option<Worker>>,
    spawns: AtomicUsize,
    /// Restarts since the last successful reply
    failed_restarts: AtomicUsize,
    disabled: AtomicBool,
    next_id: AtomicU64,
}

impl ExternalChunker {
    #[inline]
    pub fn new(
        command: Vec<String>,
        languages: impl IntoIterator<Item = Language>,
        timeout: Duration,
        max_chars: usize,
    ) -> Self {
        Self {
            command,
            languages: languages.into_iter().collect(),
            timeout,
            max_chars,
            worker: Mutex::new(None),
            spawns: AtomicUsize::new(0),
            failed_restarts: AtomicUsize::new(0),
            disabled: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    /// Number of times the helper had to be restarted over its lifetime
    #[inline]
    pub fn restarts(&self) -> usize {
        self.spawns.load(Ordering::SeqCst).saturating_sub(1)
    }

    fn spawn_worker(&self) -> Result<Worker, ChunkingError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| ChunkingError::Process("empty chunker command".to_string()))?;

        if self.spawns.load(Ordering::SeqCst) > 0 {
            let streak = self.failed_restarts.fetch_add(1, Ordering::SeqCst) + 1;
            if streak > MAX_RESTARTS {
                self.disabled.store(true, Ordering::SeqCst);
                warn!(
                    "External chunker restarted {} times without a successful reply, disabling it",
                    MAX_RESTARTS
                );
                return Err(ChunkingError::Process("chunker disabled after repeated failures".to_string()));
            }
        }
        self.spawns.fetch_add(1, Ordering::SeqCst);

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ChunkingError::Process(format!("Failed to start {}: {}", program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ChunkingError::Process("chunker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ChunkingError::Process("chunker stdout unavailable".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("external chunker: {}", line);
                }
            });
        }

        let pending: PendingReplies = Arc::new(StdMutex::new(BTreeMap::new()));
        let reader_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                route_reply(&reader_pending, &line);
            }
            // helper exited: fail whatever is still waiting
            if let Ok(mut waiting) = reader_pending.lock() {
                for (_, sender) in std::mem::take(&mut *waiting) {
                    let _ = sender.send(Err(HELPER_EXITED.to_string()));
                }
            }
        });

        info!("Started external chunker: {}", self.command.join(" "));
        Ok(Worker {
            child,
            stdin,
            pending,
        })
    }

    /// Send one request, returning the reply channel
    async fn submit(
        &self,
        id: u64,
        file: &SourceFile<'_>,
    ) -> Result<oneshot::Receiver<Result<Vec<ExternalChunk>, String>>, ChunkingError> {
        let mut line = serde_json::to_string(&ChunkRequest {
            id,
            filepath: file.display_path,
            content: file.content,
            max_size: self.max_chars,
        })
        .map_err(|e| ChunkingError::Protocol(format!("Failed to encode request: {}", e)))?;
        line.push('\n');

        let mut guard = self.worker.lock().await;

        let exited = match guard.as_mut() {
            Some(worker) => !matches!(worker.child.try_wait(), Ok(None)),
            None => true,
        };
        if exited {
            if guard.take().is_some() {
                debug!("External chunker exited, restarting");
            }
            *guard = Some(self.spawn_worker()?);
        }

        let Some(worker) = guard.as_mut() else {
            return Err(ChunkingError::Process("chunker unavailable".to_string()));
        };

        let (sender, receiver) = oneshot::channel();
        if let Ok(mut pending) = worker.pending.lock() {
            pending.insert(id, sender);
        }

        let written = async {
            worker.stdin.write_all(line.as_bytes()).await?;
            worker.stdin.flush().await
        }
        .await;

        if let Err(e) = written {
            if let Ok(mut pending) = worker.pending.lock() {
                pending.remove(&id);
            }
            guard.take();
            return Err(ChunkingError::Process(format!("Failed to write request: {}", e)));
        }

        Ok(receiver)
    }

    /// Kill the helper after a timeout so the next request starts fresh
    async fn abandon(&self, id: u64) {
        let mut guard = self.worker.lock().await;
        if let Some(mut worker) = guard.take() {
            if let Ok(mut pending) = worker.pending.lock() {
                pending.remove(&id);
            }
            if let Err(e) = worker.child.kill().await {
                debug!("Failed to kill external chunker: {}", e);
            }
        }
    }
}

fn route_reply(pending: &PendingReplies, line: &str) {
    let reply: ChunkReply = match serde_json::from_str(line) {
        Ok(reply) => reply,
        Err(e) => {
            warn!("Ignoring malformed chunker reply: {}", e);
            return;
        }
    };

    let id = reply.id.as_ref().and_then(|value| match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    });

    let Ok(mut waiting) = pending.lock() else {
        return;
    };
    let sender = match id {
        Some(id) => waiting.remove(&id),
        None => waiting.pop_first().map(|(_, sender)| sender),
    };
    drop(waiting);

    let Some(sender) = sender else {
        debug!("Chunker reply for unknown request {:?}", reply.id);
        return;
    };

    let outcome = match (reply.error, reply.chunks) {
        (Some(error), _) => Err(error),
        (None, Some(chunks)) => Ok(chunks),
        (None, None) => Err("reply carried neither chunks nor error".to_string()),
    };
    let _ = sender.send(outcome);
}

#[async_trait]
impl ChunkingStrategy for ExternalChunker {
    fn name(&self) -> &'static str {
        STRATEGY_NAME
    }

    fn supports(&self, language: Language) -> bool {
        !self.is_disabled() && self.languages.contains(&language)
    }

    async fn chunk(&self, file: &SourceFile<'_>) -> Result<Vec<ChunkDraft>, ChunkingError> {
        if self.is_disabled() {
            return Err(ChunkingError::Process("chunker disabled".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let receiver = self.submit(id, file).await?;

        let chunks = match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(Ok(chunks))) => {
                self.failed_restarts.store(0, Ordering::SeqCst);
                chunks
            }
            Ok(Ok(Err(error))) if error == HELPER_EXITED => {
                self.abandon(id).await;
                return Err(ChunkingError::Process(error));
            }
            Ok(Ok(Err(error))) => return Err(ChunkingError::Protocol(error)),
            Ok(Err(_)) => {
                return Err(ChunkingError::Process("chunker dropped the request".to_string()));
            }
            Err(_) => {
                warn!(
                    "External chunker timed out on {} after {:?}",
                    file.display_path, self.timeout
                );
                self.abandon(id).await;
                return Err(ChunkingError::Timeout(self.timeout));
            }
        };

        let drafts: Vec<ChunkDraft> = chunks
            .into_iter()
            .filter(|chunk| !chunk.text.trim().is_empty())
            .map(ExternalChunk::into_draft)
            .collect();

        if drafts.is_empty() {
            return Err(ChunkingError::Empty);
        }
        Ok(drafts)
    }

    async fn shutdown(&self) {
        let mut guard = self.worker.lock().await;
        if let Some(mut worker) = guard.take() {
            drop(worker.stdin);
            match tokio::time::timeout(Duration::from_secs(2), worker.child.wait()).await {
                Ok(_) => debug!("External chunker exited"),
                Err(_) => {
                    let _ = worker.child.kill().await;
                }
            }
        }
    }
}
