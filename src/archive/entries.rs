//! Async, one-pass view over a synchronous archive walk.
//!
//! The walk runs on a blocking worker and is driven by commands: `Advance`
//! moves to the next member, `Read` pulls the next chunk of the current one.
//! Every entry carries the generation it was produced in; reads against an
//! older generation are answered with an error instead of stale bytes.

use super::{ArchiveError, ArchiveReader, EntryDefect, EntryHeader, EntryVisitor};
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use std::{
    io::{self, Read},
    ops::ControlFlow,
};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

const CHUNK_SIZE: usize = 64 * 1024;

/// Content of a single entry, streamed in chunks.
pub type EntryContent = BoxStream<'static, io::Result<Bytes>>;

type AdvanceReply = oneshot::Sender<Result<Option<Announced>, ArchiveError>>;

/// What the worker tells the consumer about the member it just reached.
struct Announced {
    header: EntryHeader,
    defect: Option<EntryDefect>,
    generation: u64,
}

enum Command {
    Advance {
        reply: AdvanceReply,
    },
    Read {
        generation: u64,
        reply: oneshot::Sender<io::Result<Option<Bytes>>>,
    },
}

/// Lazy, finite sequence of archive entries.
pub struct ArchiveEntries {
    commands: mpsc::Sender<Command>,
    finished: bool,
}

impl ArchiveEntries {
    /// Start walking `reader` on the blocking pool. Nothing is read until
    /// the first call to [`ArchiveEntries::next`].
    pub fn spawn(reader: Box<dyn ArchiveReader>) -> Self {
        let (commands, inbox) = mpsc::channel(1);
        tokio::task::spawn_blocking(move || serve(reader, inbox));
        Self {
            commands,
            finished: false,
        }
    }

    /// Advance to the next entry. Any previously returned entry stops being readable.
    pub async fn next(&mut self) -> Result<Option<ArchiveEntry>, ArchiveError> {
        if self.finished {
            return Ok(None);
        }
        let (reply, response) = oneshot::channel();
        if self.commands.send(Command::Advance { reply }).await.is_err() {
            self.finished = true;
            return Err(ArchiveError::ReaderGone);
        }
        let outcome = response.await.unwrap_or(Err(ArchiveError::ReaderGone));
        match outcome {
            Ok(Some(Announced {
                header,
                defect,
                generation,
            })) => Ok(Some(ArchiveEntry {
                header,
                defect,
                generation,
                commands: self.commands.clone(),
            })),
            Ok(None) => {
                self.finished = true;
                Ok(None)
            }
            Err(err) => {
                self.finished = true;
                Err(err)
            }
        }
    }
}

/// The current member of an [`ArchiveEntries`] sequence.
pub struct ArchiveEntry {
    header: EntryHeader,
    defect: Option<EntryDefect>,
    generation: u64,
    commands: mpsc::Sender<Command>,
}

impl ArchiveEntry {
    pub fn key(&self) -> &str {
        &self.header.key
    }

    pub fn size(&self) -> u64 {
        self.header.size
    }

    pub fn is_directory(&self) -> bool {
        self.header.is_directory
    }

    #[cfg(test)]
    pub fn header(&self) -> &EntryHeader {
        &self.header
    }

    /// Set when the member was found but its content cannot be read.
    pub fn defect(&self) -> Option<&EntryDefect> {
        self.defect.as_ref()
    }

    /// Open the entry's content. Dropping the stream closes it; whatever was
    /// not read is skipped when the sequence advances.
    pub fn open_content(&self) -> EntryContent {
        let generation = self.generation;
        futures::stream::unfold(Some(self.commands.clone()), move |state| async move {
            let commands = state?;
            let (reply, response) = oneshot::channel();
            if commands
                .send(Command::Read { generation, reply })
                .await
                .is_err()
            {
                return Some((Err(reader_gone()), None));
            }
            match response.await {
                Ok(Ok(Some(chunk))) => Some((Ok(chunk), Some(commands))),
                Ok(Ok(None)) => None,
                Ok(Err(err)) => Some((Err(err), None)),
                Err(_) => Some((Err(reader_gone()), None)),
            }
        })
        .boxed()
    }
}

fn reader_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "archive reader stopped")
}

fn stale_entry() -> io::Error {
    io::Error::new(
        io::ErrorKind::Other,
        "entry is no longer readable: the archive has advanced past it",
    )
}

struct EntryServer {
    inbox: mpsc::Receiver<Command>,
    generation: u64,
    pending: Option<AdvanceReply>,
}

fn serve(reader: Box<dyn ArchiveReader>, inbox: mpsc::Receiver<Command>) {
    let mut server = EntryServer {
        inbox,
        generation: 0,
        pending: None,
    };
    if !server.wait_for_advance() {
        return;
    }
    let outcome = reader.walk(&mut server);
    match (server.pending.take(), outcome) {
        (Some(reply), outcome) => {
            let _ = reply.send(outcome.map(|()| None));
        }
        (None, Err(err)) => debug!(error = %err, "archive walk ended with error"),
        (None, Ok(())) => {}
    }
    server.drain();
}

impl EntryServer {
    /// Block until the consumer asks for an entry. Returns false once every
    /// handle to the sequence is gone.
    fn wait_for_advance(&mut self) -> bool {
        while let Some(command) = self.inbox.blocking_recv() {
            match command {
                Command::Advance { reply } => {
                    self.pending = Some(reply);
                    return true;
                }
                Command::Read { reply, .. } => {
                    let _ = reply.send(Err(stale_entry()));
                }
            }
        }
        false
    }

    /// Answer whatever arrives after the walk has ended.
    fn drain(&mut self) {
        while let Some(command) = self.inbox.blocking_recv() {
            match command {
                Command::Advance { reply } => {
                    let _ = reply.send(Ok(None));
                }
                Command::Read { reply, .. } => {
                    let _ = reply.send(Err(stale_entry()));
                }
            }
        }
    }
}

impl EntryVisitor for EntryServer {
    fn visit(
        &mut self,
        header: EntryHeader,
        content: &mut dyn Read,
    ) -> Result<ControlFlow<()>, ArchiveError> {
        self.serve_entry(header, None, content)
    }

    fn visit_defective(
        &mut self,
        header: EntryHeader,
        defect: EntryDefect,
    ) -> Result<ControlFlow<()>, ArchiveError> {
        self.serve_entry(header, Some(defect), &mut io::empty())
    }
}

impl EntryServer {
    /// Announce one member, then answer reads for it until the consumer advances.
    fn serve_entry(
        &mut self,
        header: EntryHeader,
        defect: Option<EntryDefect>,
        content: &mut dyn Read,
    ) -> Result<ControlFlow<()>, ArchiveError> {
        let Some(reply) = self.pending.take() else {
            return Ok(ControlFlow::Break(()));
        };
        self.generation += 1;
        let unreadable = defect.as_ref().map(ToString::to_string);
        let announced = Announced {
            header,
            defect,
            generation: self.generation,
        };
        if reply.send(Ok(Some(announced))).is_err() {
            return Ok(ControlFlow::Break(()));
        }

        let mut exhausted = false;
        while let Some(command) = self.inbox.blocking_recv() {
            match command {
                Command::Advance { reply } => {
                    self.pending = Some(reply);
                    return Ok(ControlFlow::Continue(()));
                }
                Command::Read { generation, reply } if generation != self.generation => {
                    let _ = reply.send(Err(stale_entry()));
                }
                Command::Read { reply, .. } => {
                    let chunk = match &unreadable {
                        Some(reason) => Err(io::Error::new(io::ErrorKind::InvalidData, reason.clone())),
                        None if exhausted => Ok(None),
                        None => read_chunk(content),
                    };
                    exhausted = matches!(chunk, Ok(None));
                    let _ = reply.send(chunk);
                }
            }
        }
        Ok(ControlFlow::Break(()))
    }
}

fn read_chunk(content: &mut dyn Read) -> io::Result<Option<Bytes>> {
    let mut buf = Vec::with_capacity(CHUNK_SIZE);
    Read::take(&mut *content, CHUNK_SIZE as u64).read_to_end(&mut buf)?;
    if buf.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Bytes::from(buf)))
    }
}
