//! Error handling for the pipeflow engine
//!
//! This module defines the engine-level error type and a Result alias.
//! Failures raised by user code inside nodes and operations travel as
//! `anyhow::Error` and are wrapped into structured faults by the runtime.

use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// A frozen record was mutated
    #[error("Record is frozen: cannot {0}")]
    Frozen(&'static str),

    /// Borrow or return on a pool that is not initialized
    #[error("Pool for {type_name} is not initialized")]
    PoolNotInitialized { type_name: &'static str },

    /// Initialize called twice without an intervening deallocate
    #[error("Pool for {type_name} is already initialized")]
    PoolAlreadyInitialized { type_name: &'static str },

    /// Borrow on an exhausted pool with auto-grow disabled
    #[error("Pool for {type_name} exhausted ({size} instances referenced)")]
    PoolExhausted { type_name: &'static str, size: usize },

    /// A node id that does not belong to the process
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    /// The upstream node of a connection does not produce output
    #[error("Node {0} does not produce output")]
    NotAProducer(String),

    /// The downstream node of a connection does not consume input
    #[error("Node {0} does not consume input")]
    NotAConsumer(String),

    /// The consumer has no input port of that name
    #[error("Node {node} has no input port {port}")]
    InvalidPort { node: String, port: String },

    /// The connections form a cycle, which would never terminate
    #[error("Connections form a cycle through node {0}")]
    Cycle(String),

    /// A consumer input was bound twice
    #[error("Input {port} of node {node} is already bound")]
    InputAlreadyBound { node: String, port: String },

    /// Producer and consumer disagree on the payload type
    #[error("Payload mismatch: {from} emits {produced}, {to} expects {expected}")]
    PayloadMismatch {
        from: String,
        to: String,
        produced: &'static str,
        expected: &'static str,
    },

    /// A consumer was never connected to a producer
    #[error("Input {port} of node {node} is not connected")]
    UnboundInput { node: String, port: String },

    /// A producer has no consumers and the empty-emit policy rejects that
    #[error("Node {0} has no attached consumers")]
    NoConsumers(String),

    /// End of stream was signalled twice on the same adapter
    #[error("End of stream already signalled for node {0}")]
    AlreadyCompleted(String),

    /// A process graph can only be executed once
    #[error("Process {0} has already been executed")]
    AlreadyExecuted(String),

    /// A background run ended without producing a result
    #[error("Run interrupted: {0}")]
    Interrupted(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        EngineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<EngineError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
