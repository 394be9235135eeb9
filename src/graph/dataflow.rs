//! Dataflow adapter: one producer, many consumers.
//!
//! Every consumer attached to a [`Dataflow`] gets its own bounded queue. An
//! emitted item is frozen, the first open queue receives the original and
//! every other queue receives a pool-borrowed copy, so no two consumers share
//! an instance. A full queue blocks the producer until that consumer drains
//! an item; nothing is dropped for capacity reasons.
//!
//! End of stream is the disconnect of the queue senders. Consumers drain what
//! is buffered and then see their [`Input`] end. A consumer that stops early
//! drops its receiver; later sends to it fail, the item is recycled and the
//! queue is closed, so an early exit downstream never blocks the producer.

use crate::config::{EmptyEmitPolicy, EngineConfig};
use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::graph::gate::Gate;
use crate::graph::id::NodeInfo;
use crate::graph::pool::{short_type_name, ObjectPool};
use crate::graph::row::NodeOutput;
use crate::graph::stats::NodeStats;
use crossbeam_channel::{bounded, Receiver, SendError, Sender};
use std::any::Any;
use std::sync::Arc;

struct Lane<T> {
    consumer: NodeInfo,
    tx: Option<Sender<Box<T>>>,
    stats: Arc<NodeStats>,
}

/// Binds one producing node to its consumers.
pub struct Dataflow<T: NodeOutput> {
    producer: NodeInfo,
    producer_stats: Arc<NodeStats>,
    capacity: usize,
    empty_emit: EmptyEmitPolicy,
    lanes: Vec<Lane<T>>,
    pool: Option<Arc<ObjectPool<T>>>,
    started: Gate,
    emitted: u64,
    ended: bool,
}

impl<T: NodeOutput> Dataflow<T> {
    pub fn new(producer: NodeInfo, producer_stats: Arc<NodeStats>, config: &EngineConfig) -> Self {
        Self {
            producer,
            producer_stats,
            capacity: config.queue_capacity.max(1),
            empty_emit: config.empty_emit,
            lanes: Vec::new(),
            pool: None,
            started: Gate::new(),
            emitted: 0,
            ended: false,
        }
    }

    pub fn producer(&self) -> &NodeInfo {
        &self.producer
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn consumer_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn consumers(&self) -> impl Iterator<Item = &NodeInfo> {
        self.lanes.iter().map(|l| &l.consumer)
    }

    /// Create a dedicated queue for `consumer` and hand back its input.
    ///
    /// The input carries this adapter's start gate, released on the first
    /// emit or at end of stream.
    pub fn attach_consumer(&mut self, consumer: NodeInfo, stats: Arc<NodeStats>) -> Result<Input<T>> {
        if self.lanes.iter().any(|l| l.consumer.id == consumer.id) {
            return Err(EngineError::InputAlreadyBound {
                node: consumer.name,
                port: format!("from {}", self.producer.name),
            });
        }
        if self.ended {
            return Err(EngineError::AlreadyCompleted(self.producer.name.clone()));
        }
        let (tx, rx) = bounded(self.capacity);
        tracing::debug!("Attached {} to {} (capacity {})", consumer, self.producer, self.capacity);
        self.lanes.push(Lane {
            consumer,
            tx: Some(tx),
            stats,
        });
        Ok(Input {
            rx,
            ready: self.started.clone(),
        })
    }

    /// Pool used for fan-out copies and for recycling undeliverable items.
    /// Without one, copies are freshly allocated.
    pub fn bind_pool(&mut self, pool: Option<Arc<ObjectPool<T>>>) {
        self.pool = pool;
    }

    /// A reset instance from the pool, or a new one when no pool is bound.
    pub fn borrow(&self) -> Result<Box<T>> {
        match &self.pool {
            Some(pool) => pool.borrow(),
            None => Ok(Box::default()),
        }
    }

    /// Return an instance that will not be delivered.
    pub fn recycle(&self, item: Box<T>) {
        if let Some(pool) = &self.pool {
            if let Err(e) = pool.recycle(item) {
                tracing::debug!("{}: could not recycle item: {}", self.producer, e);
            }
        }
    }

    /// Deliver `item` to every open consumer queue, blocking on full queues.
    pub fn emit(&mut self, mut item: Box<T>) -> Result<()> {
        if self.ended {
            return Err(EngineError::AlreadyCompleted(self.producer.name.clone()));
        }
        item.freeze();
        if self.emitted == 0 {
            self.started.release();
        }
        self.emitted += 1;

        if self.lanes.is_empty() {
            self.recycle(item);
            return match self.empty_emit {
                EmptyEmitPolicy::Drop => Ok(()),
                EmptyEmitPolicy::Error => Err(EngineError::NoConsumers(self.producer.name.clone())),
            };
        }

        let open: Vec<usize> = self
            .lanes
            .iter()
            .enumerate()
            .filter(|(_, l)| l.tx.is_some())
            .map(|(i, _)| i)
            .collect();
        if open.is_empty() {
            // Every consumer has gone away; nothing left to feed.
            self.recycle(item);
            return Ok(());
        }

        // Take every copy up front so a failed borrow delivers nothing.
        let mut copies = Vec::with_capacity(open.len() - 1);
        for _ in 1..open.len() {
            match self.borrow() {
                Ok(mut copy) => {
                    item.copy_to(&mut copy);
                    copy.freeze();
                    copies.push(copy);
                }
                Err(e) => {
                    for copy in copies {
                        self.recycle(copy);
                    }
                    self.recycle(item);
                    return Err(e);
                }
            }
        }

        for (index, payload) in open.into_iter().zip(std::iter::once(item).chain(copies)) {
            self.deliver(index, payload);
        }
        Ok(())
    }

    fn deliver(&mut self, index: usize, payload: Box<T>) {
        let lane = &mut self.lanes[index];
        let undelivered = match lane.tx.as_ref().map(|tx| tx.send(payload)) {
            Some(Ok(())) => {
                lane.stats.record_read();
                self.producer_stats.record_write();
                return;
            }
            Some(Err(SendError(payload))) => {
                tracing::debug!("{} stopped consuming from {}", lane.consumer, self.producer);
                lane.tx = None;
                payload
            }
            None => return,
        };
        self.recycle(undelivered);
    }

    /// Close every consumer queue. Buffered items stay drainable.
    ///
    /// A second call is an error and is logged.
    pub fn signal_end(&mut self) -> Result<()> {
        if self.ended {
            tracing::warn!("{} signalled end of stream twice", self.producer);
            return Err(EngineError::AlreadyCompleted(self.producer.name.clone()));
        }
        self.ended = true;
        self.started.release();
        for lane in &mut self.lanes {
            lane.tx = None;
        }
        tracing::debug!("{} signalled end after {} items", self.producer, self.emitted);
        Ok(())
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn has_started(&self) -> bool {
        self.emitted > 0
    }

    /// Release every queue. Consumers still holding an input see it end.
    pub fn dispose(&mut self) {
        self.lanes.clear();
        self.started.release();
    }
}

impl<T: NodeOutput> Drop for Dataflow<T> {
    fn drop(&mut self) {
        self.started.release();
    }
}

/// Type-erased view used by the process builder to wire adapters whose
/// payload type is only known at graph-build time.
pub(crate) trait AnyDataflow: Send {
    fn producer(&self) -> &NodeInfo;
    fn payload_type(&self) -> &'static str;
    fn consumer_count(&self) -> usize;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: NodeOutput> AnyDataflow for Dataflow<T> {
    fn producer(&self) -> &NodeInfo {
        &self.producer
    }

    fn payload_type(&self) -> &'static str {
        short_type_name::<T>()
    }

    fn consumer_count(&self) -> usize {
        self.lanes.len()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A consumer's view of its queue: a lazy, single-pass, in-order sequence
/// that ends once the producer signals end and the buffer is drained.
pub struct Input<T> {
    rx: Receiver<Box<T>>,
    ready: Gate,
}

impl<T> Input<T> {
    /// Gate released when the producer starts emitting or ends.
    pub fn ready(&self) -> &Gate {
        &self.ready
    }

    /// Items currently buffered.
    pub fn buffered(&self) -> usize {
        self.rx.len()
    }

    pub(crate) fn receiver(&self) -> &Receiver<Box<T>> {
        &self.rx
    }
}

impl<T> Iterator for Input<T> {
    type Item = Box<T>;

    fn next(&mut self) -> Option<Box<T>> {
        self.rx.recv().ok()
    }
}

/// The handle a producing node publishes through.
pub struct Emitter<'a, T: NodeOutput> {
    flow: &'a mut Dataflow<T>,
    ctx: &'a Context,
    discarded: u64,
}

impl<'a, T: NodeOutput> Emitter<'a, T> {
    pub fn new(flow: &'a mut Dataflow<T>, ctx: &'a Context) -> Self {
        Self {
            flow,
            ctx,
            discarded: 0,
        }
    }

    /// A reset instance to fill and emit.
    pub fn borrow(&self) -> Result<Box<T>> {
        self.flow.borrow()
    }

    /// Give back an instance that will not be emitted.
    pub fn discard(&mut self, item: Box<T>) {
        self.discarded += 1;
        self.flow.recycle(item);
    }

    pub fn emit(&mut self, item: Box<T>) -> Result<()> {
        self.flow.emit(item)
    }

    /// Emit a copy of `item`, which may be frozen.
    pub fn emit_copy(&mut self, item: &T) -> Result<()> {
        let mut copy = self.flow.borrow()?;
        item.copy_to(&mut copy);
        self.flow.emit(copy)
    }

    pub fn emitted(&self) -> u64 {
        self.flow.emitted()
    }

    /// Items emitted or discarded so far. A producer that fails without
    /// moving this has made no progress.
    pub fn handled(&self) -> u64 {
        self.flow.emitted() + self.discarded
    }

    pub fn has_started(&self) -> bool {
        self.flow.has_started()
    }

    pub fn consumer_count(&self) -> usize {
        self.flow.consumer_count()
    }

    pub fn context(&self) -> &Context {
        self.ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::graph::id::NodeId;
    use crate::graph::row::Row;
    use std::time::Duration;

    fn flow(config: &EngineConfig) -> (Dataflow<Row>, Arc<NodeStats>) {
        let stats = Arc::new(NodeStats::new());
        let flow = Dataflow::new(NodeInfo::new(NodeId(0), "source"), stats.clone(), config);
        (flow, stats)
    }

    fn attach(flow: &mut Dataflow<Row>, id: u32) -> (Input<Row>, Arc<NodeStats>) {
        let stats = Arc::new(NodeStats::new());
        let input = flow
            .attach_consumer(NodeInfo::new(NodeId(id), format!("sink{}", id)), stats.clone())
            .unwrap();
        (input, stats)
    }

    fn row(n: i64) -> Box<Row> {
        Box::new(Row::new().with("number", n))
    }

    #[test]
    fn test_fan_out_counts_per_consumer() {
        let (mut flow, producer) = flow(&EngineConfig::default());
        let (a, a_stats) = attach(&mut flow, 1);
        let (b, b_stats) = attach(&mut flow, 2);

        for n in 1..=3 {
            flow.emit(row(n)).unwrap();
        }
        flow.signal_end().unwrap();

        let a: Vec<_> = a.map(|r| r.get_i64("number").unwrap()).collect();
        let b: Vec<_> = b.map(|r| r.get_i64("number").unwrap()).collect();
        assert_eq!(a, vec![1, 2, 3]);
        assert_eq!(a, b);
        assert_eq!(a_stats.reads(), 3);
        assert_eq!(b_stats.reads(), 3);
        assert_eq!(producer.writes(), 6);
        assert_eq!(flow.emitted(), 3);
    }

    #[test]
    fn test_only_first_consumer_gets_original() {
        let (mut flow, _) = flow(&EngineConfig::default());
        let (mut a, _) = attach(&mut flow, 1);
        let (mut b, _) = attach(&mut flow, 2);

        let item = row(7);
        let original: *const Row = &*item;
        flow.emit(item).unwrap();

        let first = a.next().unwrap();
        let second = b.next().unwrap();
        assert!(std::ptr::eq(&*first, original));
        assert!(!std::ptr::eq(&*second, original));
        assert_eq!(*first, *second);
        assert!(first.is_frozen() && second.is_frozen());
    }

    #[test]
    fn test_duplicate_consumer_rejected() {
        let (mut flow, _) = flow(&EngineConfig::default());
        let _ = attach(&mut flow, 1);
        let err = flow
            .attach_consumer(NodeInfo::new(NodeId(1), "sink1"), Arc::new(NodeStats::new()))
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::InputAlreadyBound { .. }));
    }

    #[test]
    fn test_zero_consumers_drop_policy() {
        let (mut flow, producer) = flow(&EngineConfig::default());
        flow.emit(row(1)).unwrap();
        assert_eq!(flow.emitted(), 1);
        assert_eq!(producer.writes(), 0);
    }

    #[test]
    fn test_zero_consumers_error_policy() {
        let config = EngineConfig::default().with_empty_emit(EmptyEmitPolicy::Error);
        let (mut flow, _) = flow(&config);
        assert!(matches!(flow.emit(row(1)), Err(EngineError::NoConsumers(_))));
    }

    #[test]
    fn test_signal_end_twice_fails() {
        let (mut flow, _) = flow(&EngineConfig::default());
        let (input, _) = attach(&mut flow, 1);
        flow.signal_end().unwrap();
        assert!(matches!(flow.signal_end(), Err(EngineError::AlreadyCompleted(_))));
        assert!(matches!(flow.emit(row(1)), Err(EngineError::AlreadyCompleted(_))));
        assert_eq!(input.count(), 0);
    }

    #[test]
    fn test_end_drains_buffered_items() {
        let (mut flow, _) = flow(&EngineConfig::default());
        let (input, _) = attach(&mut flow, 1);
        for n in 0..5 {
            flow.emit(row(n)).unwrap();
        }
        flow.signal_end().unwrap();
        drop(flow);
        assert_eq!(input.count(), 5);
    }

    #[test]
    fn test_start_gate() {
        let (mut flow, _) = flow(&EngineConfig::default());
        let (input, _) = attach(&mut flow, 1);
        assert!(!input.ready().is_released());
        assert!(!flow.has_started());
        flow.emit(row(1)).unwrap();
        assert!(input.ready().is_released());
        assert!(flow.has_started());
    }

    #[test]
    fn test_departed_consumer_does_not_block() {
        let config = EngineConfig::default().with_queue_capacity(1);
        let (mut flow, producer) = flow(&config);
        let (gone, _) = attach(&mut flow, 1);
        let (stays, stays_stats) = attach(&mut flow, 2);
        drop(gone);

        let reader = std::thread::spawn(move || stays.count());
        for n in 0..10 {
            flow.emit(row(n)).unwrap();
        }
        flow.signal_end().unwrap();
        assert_eq!(reader.join().unwrap(), 10);
        assert_eq!(stays_stats.reads(), 10);
        assert_eq!(producer.writes(), 10);
    }

    #[test]
    fn test_backpressure_blocks_until_drained() {
        let config = EngineConfig::default().with_queue_capacity(2);
        let (mut flow, _) = flow(&config);
        let (mut input, _) = attach(&mut flow, 1);

        let producer = std::thread::spawn(move || {
            for n in 0..3 {
                flow.emit(row(n)).unwrap();
            }
            flow.signal_end().unwrap();
        });

        // Two fit in the queue; the third waits for a drain.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(input.buffered(), 2);
        assert!(!producer.is_finished());

        let drained: Vec<_> = input.by_ref().map(|r| r.get_i64("number").unwrap()).collect();
        producer.join().unwrap();
        assert_eq!(drained, vec![0, 1, 2]);
    }

    #[test]
    fn test_copies_come_from_pool() {
        let pool = Arc::new(ObjectPool::<Row>::new(PoolConfig::fixed(4)));
        pool.initialize().unwrap();
        let (mut flow, _) = flow(&EngineConfig::default());
        flow.bind_pool(Some(pool.clone()));
        let (a, _) = attach(&mut flow, 1);
        let (b, _) = attach(&mut flow, 2);
        let (c, _) = attach(&mut flow, 3);

        flow.emit(row(1)).unwrap();
        assert_eq!(pool.stats().referenced, 2);

        for input in [a, b, c] {
            for item in input.take(1) {
                pool.recycle(item).unwrap();
            }
        }
        let stats = pool.stats();
        assert_eq!(stats.referenced, 0);
        assert_eq!(stats.free, 4);
    }

    #[test]
    fn test_emitter_emit_copy() {
        let ctx = Context::default();
        let (mut flow, _) = flow(&EngineConfig::default());
        let (mut input, _) = attach(&mut flow, 1);
        let mut out = Emitter::new(&mut flow, &ctx);

        let mut source = Row::new().with("k", "v");
        source.freeze();
        out.emit_copy(&source).unwrap();
        assert_eq!(out.emitted(), 1);
        assert!(out.has_started());
        assert_eq!(input.next().unwrap().get_str("k"), Some("v"));
    }
}
