//! Capability names, handlers, and the per-run capability set.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Error returned by a capability, or by capability-set construction.
///
/// Inside the sandbox a capability error becomes an `Error` with the same
/// message, so scripts can catch it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CapabilityError {
    message: String,
}

impl CapabilityError {
    /// Create an error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message the script will see.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for CapabilityError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

/// The closed vocabulary of capability names the bridge recognizes.
///
/// Each name is installed in the sandbox as a global async function of the
/// same (camelCase) name. `finalAnswer` is reserved: the bridge always
/// installs it and callers cannot supply it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CapabilityName {
    /// `webSearch(query)`
    WebSearch,
    /// `fetchText(url)`
    FetchText,
    /// `queryKnowledgeBase(query)`
    QueryKnowledgeBase,
    /// `writeNote(note)`
    WriteNote,
    /// `schedule(job)`
    Schedule,
    /// `notify(message)`
    Notify,
    /// `finalAnswer(text)`, reserved for the terminal-answer latch
    FinalAnswer,
}

impl CapabilityName {
    /// Version of the vocabulary. Bumped whenever a name is added or removed.
    pub const VOCABULARY_VERSION: u32 = 1;

    /// Every name in the vocabulary, reserved ones included.
    pub const ALL: [CapabilityName; 7] = [
        CapabilityName::WebSearch,
        CapabilityName::FetchText,
        CapabilityName::QueryKnowledgeBase,
        CapabilityName::WriteNote,
        CapabilityName::Schedule,
        CapabilityName::Notify,
        CapabilityName::FinalAnswer,
    ];

    /// The global name the capability has inside the sandbox.
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityName::WebSearch => "webSearch",
            CapabilityName::FetchText => "fetchText",
            CapabilityName::QueryKnowledgeBase => "queryKnowledgeBase",
            CapabilityName::WriteNote => "writeNote",
            CapabilityName::Schedule => "schedule",
            CapabilityName::Notify => "notify",
            CapabilityName::FinalAnswer => "finalAnswer",
        }
    }

    /// Returns true for names the bridge implements itself.
    pub fn is_reserved(&self) -> bool {
        matches!(self, CapabilityName::FinalAnswer)
    }
}

impl fmt::Display for CapabilityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityName {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CapabilityName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| CapabilityError::new(format!("unknown capability: {s}")))
    }
}

/// A host function callable from inside the sandbox.
///
/// Arguments and results cross the isolation boundary as JSON values, so an
/// implementation never sees a script object and a script never sees a host
/// object.
///
/// A run that times out drops any call still in flight. Implementations must
/// tolerate being abandoned at an `.await` point.
///
/// # Example
///
/// ```rust
/// use nacre::{Capability, CapabilityError};
/// use serde_json::{Value, json};
///
/// struct Echo;
///
/// #[async_trait::async_trait]
/// impl Capability for Echo {
///     async fn call(&self, args: Value) -> Result<Value, CapabilityError> {
///         Ok(json!({ "echo": args }))
///     }
/// }
/// ```
#[async_trait]
pub trait Capability: Send + Sync {
    /// Invoke the capability with the script's (copied) arguments.
    async fn call(&self, args: Value) -> Result<Value, CapabilityError>;
}

/// Blanket implementation for async closures.
///
/// ```rust,ignore
/// set.insert(CapabilityName::Notify, |args: Value| async move {
///     Ok::<_, CapabilityError>(json!({ "sent": true, "message": args }))
/// })?;
/// ```
#[async_trait]
impl<F, Fut> Capability for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, CapabilityError>> + Send,
{
    async fn call(&self, args: Value) -> Result<Value, CapabilityError> {
        self(args).await
    }
}

/// The capabilities available to one sandbox run.
///
/// Cloning is cheap; the handlers are shared. The sandbox treats the set as
/// read-only and installs exactly the names it contains, plus `finalAnswer`.
#[derive(Clone, Default)]
pub struct CapabilitySet {
    entries: BTreeMap<CapabilityName, Arc<dyn Capability>>,
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

impl CapabilitySet {
    /// Create an empty capability set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability, replacing any previous handler for `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is reserved.
    pub fn insert(
        &mut self,
        name: CapabilityName,
        capability: impl Capability + 'static,
    ) -> Result<(), CapabilityError> {
        self.insert_arc(name, Arc::new(capability))
    }

    /// Register a shared capability handler.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is reserved.
    pub fn insert_arc(
        &mut self,
        name: CapabilityName,
        capability: Arc<dyn Capability>,
    ) -> Result<(), CapabilityError> {
        if name.is_reserved() {
            return Err(CapabilityError::new(format!(
                "{name} is reserved and cannot be supplied"
            )));
        }
        self.entries.insert(name, capability);
        Ok(())
    }

    /// Builder-style [`insert`](Self::insert).
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is reserved.
    pub fn with(
        mut self,
        name: CapabilityName,
        capability: impl Capability + 'static,
    ) -> Result<Self, CapabilityError> {
        self.insert(name, capability)?;
        Ok(self)
    }

    /// Look up the handler for `name`.
    pub fn get(&self, name: CapabilityName) -> Option<Arc<dyn Capability>> {
        self.entries.get(&name).cloned()
    }

    /// Names in the set, in vocabulary order.
    pub fn names(&self) -> impl Iterator<Item = CapabilityName> + '_ {
        self.entries.keys().copied()
    }

    /// Number of capabilities in the set.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the set has no capabilities.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
