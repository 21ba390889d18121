use std::sync::Arc;
use tracing::debug;

/// Ordered table of human-readable message type names, used for logging only.
///
/// Index `n` names message type `n`. Types outside the table are still
/// delivered to the handler; they are just logged as unknown.
///
/// # Usage
///
/// ```no_run
/// use udscomm::MessageNames;
///
/// let names = MessageNames::new(["guest-resolution", "monitors-config", "clipboard-grab"]);
/// assert_eq!(names.name(1), Some("monitors-config"));
/// assert_eq!(names.name(7), None);
/// ```
#[derive(Debug, Clone)]
pub struct MessageNames {
    names: Arc<[String]>,
}

impl Default for MessageNames {
    fn default() -> Self {
        Self {
            names: Arc::from(Vec::new()),
        }
    }
}

impl MessageNames {
    /// Creates a table from names ordered by message type.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        debug!(count = names.len(), "Registering message type names");
        Self {
            names: names.into(),
        }
    }

    /// Returns the name of `msg_type`, if the table has one.
    pub fn name(&self, msg_type: u32) -> Option<&str> {
        self.names.get(msg_type as usize).map(String::as_str)
    }

    /// Number of named types.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
