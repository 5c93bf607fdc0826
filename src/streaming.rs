//! Bounded producer/consumer bridge between a row cursor and a caller.
//!
//! A spawned producer task owns the connection and cursor and pushes rows
//! into a bounded channel; the [`RowStream`] handed to the caller reads them.
//! A full channel suspends the producer, so a slow consumer slows the cursor
//! down instead of buffering without limit.

use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{DbKitError, Result};
use crate::executor::{guarded, CommandDescriptor, CommandExecutor, ConnectionSource};
use crate::materialize::{fetch_row, ColumnMapping, ColumnSelection, FieldOverrides, MemberPlan};
use crate::traits::{Connection, Entity};
use crate::types::{Command, Record, Value};

/// Lifecycle of a streaming bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    Producing,
    Completed,
    Faulted,
    CancelledByConsumer,
}

impl BridgeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BridgeState::Completed | BridgeState::Faulted | BridgeState::CancelledByConsumer
        )
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => BridgeState::Idle,
            1 => BridgeState::Producing,
            2 => BridgeState::Completed,
            3 => BridgeState::Faulted,
            _ => BridgeState::CancelledByConsumer,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            BridgeState::Idle => 0,
            BridgeState::Producing => 1,
            BridgeState::Completed => 2,
            BridgeState::Faulted => 3,
            BridgeState::CancelledByConsumer => 4,
        }
    }
}

/// Shared view of a bridge's [`BridgeState`].
#[derive(Debug, Clone)]
pub struct BridgeStatus {
    state: Arc<AtomicU8>,
}

impl Default for BridgeStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeStatus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(BridgeState::Idle.as_u8())),
        }
    }

    pub fn get(&self) -> BridgeState {
        BridgeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next`. Returns `false` and leaves the state alone if the
    /// current state is terminal or `next` would go backwards.
    pub fn transition(&self, next: BridgeState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let allowed = match (BridgeState::from_u8(current), next) {
                (from, _) if from.is_terminal() => false,
                (BridgeState::Idle, BridgeState::Producing) => true,
                (_, to) => to.is_terminal(),
            };
            if !allowed {
                return false;
            }
            match self.state.compare_exchange(
                current,
                next.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

enum Frame {
    Schema(ColumnMapping),
    Row(Vec<Value>),
    Fault(DbKitError),
}

impl CommandExecutor {
    /// Execute a query on a background task and stream its rows through a
    /// channel holding at most `capacity` rows.
    ///
    /// The descriptor must own its connection source; borrowed connections
    /// cannot move into the producer task. Cancelling `cancel` stops the
    /// producer and surfaces [`DbKitError::Cancelled`] to the consumer.
    pub fn stream(
        &self,
        descriptor: CommandDescriptor<'static>,
        selection: ColumnSelection,
        capacity: usize,
        cancel: &CancellationToken,
    ) -> Result<RowStream> {
        if capacity == 0 {
            return Err(DbKitError::InvalidArgument(
                "stream capacity must be at least 1".to_string(),
            ));
        }
        if matches!(descriptor.source, ConnectionSource::Borrowed(_)) {
            return Err(DbKitError::InvalidArgument(
                "streaming requires a factory or pool connection source".to_string(),
            ));
        }
        let (source, command) = self.prepare(descriptor, cancel)?;

        let (tx, rx) = mpsc::channel(capacity);
        let stop = cancel.child_token();
        let status = BridgeStatus::new();
        let producer = Producer {
            executor: self.clone(),
            command,
            selection,
            tx,
            caller: cancel.clone(),
            stop: stop.clone(),
            status: status.clone(),
        };
        let handle = tokio::spawn(producer.run(source));

        Ok(RowStream {
            rx,
            mapping: None,
            stop,
            status,
            handle: Some(handle),
        })
    }
}

struct Producer {
    executor: CommandExecutor,
    command: Command,
    selection: ColumnSelection,
    tx: mpsc::Sender<Frame>,
    /// The caller's token; distinguishes external cancellation from the
    /// consumer walking away.
    caller: CancellationToken,
    stop: CancellationToken,
    status: BridgeStatus,
}

impl Producer {
    async fn run(self, source: ConnectionSource<'static>) -> Result<BridgeState> {
        self.status.transition(BridgeState::Producing);

        let outcome = match self.executor.acquire(source, &self.stop).await {
            Ok(mut lease) => {
                let outcome = self.pump(lease.connection()).await;
                lease.release(outcome.is_ok()).await;
                outcome
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(rows) => {
                self.status.transition(BridgeState::Completed);
                debug!(rows, "stream completed");
                Ok(BridgeState::Completed)
            }
            Err(DbKitError::Cancelled) if !self.caller.is_cancelled() => {
                self.status.transition(BridgeState::CancelledByConsumer);
                debug!("stream stopped by consumer");
                Ok(BridgeState::CancelledByConsumer)
            }
            Err(e) => {
                self.status.transition(BridgeState::Faulted);
                match self.tx.send(Frame::Fault(e)).await {
                    Ok(()) => Ok(BridgeState::Faulted),
                    Err(mpsc::error::SendError(frame)) => match frame {
                        Frame::Fault(e) => {
                            warn!(error = %e, "stream faulted after consumer left");
                            Err(e)
                        }
                        _ => Ok(BridgeState::Faulted),
                    },
                }
            }
        }
    }

    async fn pump(&self, conn: &mut dyn Connection) -> Result<usize> {
        let mut cursor = guarded(&self.stop, self.command.timeout, conn.query(&self.command)).await?;
        let mapping = ColumnMapping::resolve(&*cursor, &self.selection)?;
        self.send(Frame::Schema(mapping.clone())).await?;

        let mut produced = 0;
        while let Some(row) = fetch_row(&mut *cursor, &mapping, &self.stop).await? {
            self.send(Frame::Row(row)).await?;
            produced += 1;
        }
        Ok(produced)
    }

    /// Wait for channel space, then send. A dropped receiver or a fired
    /// stop token both end production as `Cancelled`.
    async fn send(&self, frame: Frame) -> Result<()> {
        let permit = tokio::select! {
            biased;
            _ = self.stop.cancelled() => return Err(DbKitError::Cancelled),
            permit = self.tx.reserve() => permit.map_err(|_| DbKitError::Cancelled)?,
        };
        permit.send(frame);
        Ok(())
    }
}

/// Consumer side of a streaming query.
///
/// Dropping the stream stops the producer; use [`complete`](RowStream::complete)
/// or [`join`](RowStream::join) to also wait for it and observe how it ended.
pub struct RowStream {
    rx: mpsc::Receiver<Frame>,
    mapping: Option<ColumnMapping>,
    stop: CancellationToken,
    status: BridgeStatus,
    handle: Option<JoinHandle<Result<BridgeState>>>,
}

impl RowStream {
    /// The column mapping, waiting for the producer to resolve it if needed.
    /// `Ok(None)` means production ended before a mapping was produced.
    pub async fn mapping(&mut self) -> Result<Option<&ColumnMapping>> {
        if self.mapping.is_none() {
            match self.rx.recv().await {
                Some(Frame::Schema(mapping)) => self.mapping = Some(mapping),
                Some(Frame::Fault(e)) => return Err(e),
                Some(Frame::Row(_)) | None => return Ok(None),
            }
        }
        Ok(self.mapping.as_ref())
    }

    /// Next raw row, an error if production failed, or `None` at the end.
    pub async fn next_row(&mut self) -> Option<Result<Vec<Value>>> {
        loop {
            match self.rx.recv().await? {
                Frame::Schema(mapping) => self.mapping = Some(mapping),
                Frame::Row(row) => return Some(Ok(row)),
                Frame::Fault(e) => return Some(Err(e)),
            }
        }
    }

    /// Next row as a record.
    pub async fn next_record(&mut self) -> Option<Result<Record>> {
        let row = match self.next_row().await? {
            Ok(row) => row,
            Err(e) => return Some(Err(e)),
        };
        let names = self.mapping.as_ref()?.shared_names();
        Some(Ok(Record::new(names, row)))
    }

    /// Read the remaining rows as entities of type `T`.
    pub fn entities<'s, T: Entity>(&'s mut self, overrides: &'s FieldOverrides) -> EntityStream<'s, T> {
        EntityStream {
            stream: self,
            overrides,
            plan: None,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.status.get()
    }

    /// Stop production early and wait for the producer to release its
    /// connection. Rows still buffered are discarded.
    pub async fn complete(mut self) -> Result<BridgeState> {
        self.stop.cancel();
        self.rx.close();
        while self.rx.recv().await.is_some() {}
        self.wait().await
    }

    /// Wait for the producer to finish on its own, discarding rows not yet
    /// read. A fault that was not consumed through `next_row` is returned
    /// here.
    pub async fn join(mut self) -> Result<BridgeState> {
        let mut fault = None;
        while let Some(frame) = self.rx.recv().await {
            if let Frame::Fault(e) = frame {
                fault.get_or_insert(e);
            }
        }
        let state = self.wait().await?;
        match fault {
            Some(e) => Err(e),
            None => Ok(state),
        }
    }

    async fn wait(&mut self) -> Result<BridgeState> {
        let Some(handle) = self.handle.take() else {
            return Ok(self.status.get());
        };
        handle
            .await
            .map_err(|e| DbKitError::StreamTaskFailed(e.to_string()))?
    }
}

impl Drop for RowStream {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl Stream for RowStream {
    type Item = Result<Vec<Value>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match ready!(this.rx.poll_recv(cx)) {
                None => return Poll::Ready(None),
                Some(Frame::Schema(mapping)) => this.mapping = Some(mapping),
                Some(Frame::Row(row)) => return Poll::Ready(Some(Ok(row))),
                Some(Frame::Fault(e)) => return Poll::Ready(Some(Err(e))),
            }
        }
    }
}

/// Entity view over a [`RowStream`]. The member plan is built from the
/// mapping once, on the first row.
pub struct EntityStream<'s, T: Entity> {
    stream: &'s mut RowStream,
    overrides: &'s FieldOverrides,
    plan: Option<MemberPlan<T>>,
}

impl<T: Entity> EntityStream<'_, T> {
    pub async fn next(&mut self) -> Option<Result<T>> {
        let row = match self.stream.next_row().await? {
            Ok(row) => row,
            Err(e) => return Some(Err(e)),
        };
        if self.plan.is_none() {
            let mapping = self.stream.mapping.as_ref()?;
            self.plan = Some(MemberPlan::new(mapping.names(), self.overrides));
        }
        self.plan.as_ref().map(|plan| plan.apply(row))
    }
}
